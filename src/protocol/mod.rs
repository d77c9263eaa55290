//! Line-framed control protocol: one opcode digit followed by its payload.

pub mod upload;

use std::fmt;

use thiserror::Error;

use crate::hardware::AssetError;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("empty frame")]
    EmptyFrame,
    #[error("unknown opcode '{0}'")]
    UnknownOpcode(char),
    #[error("frame is not valid UTF-8")]
    NotUtf8,
    #[error("frame exceeds {0} bytes")]
    FrameTooLong(usize),
    #[error("upload header must look like ':<name>:{0}'")]
    BadUploadHeader(String),
    #[error("upload exceeds {0} bytes")]
    UploadTooLarge(usize),
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error(transparent)]
    Asset(#[from] AssetError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    Authenticate(&'a str),
    Ping,
    LoadSequence(&'a str),
    UploadAsset(&'a str),
    Start,
    Stop,
    Shutdown,
}

impl<'a> Command<'a> {
    pub fn parse(frame: &'a str) -> Result<Self, ProtocolError> {
        let mut chars = frame.chars();
        let opcode = chars.next().ok_or(ProtocolError::EmptyFrame)?;
        let payload = chars.as_str();

        match opcode {
            '0' => Ok(Command::Authenticate(payload.trim())),
            '1' => Ok(Command::Ping),
            '2' => Ok(Command::LoadSequence(payload.trim())),
            '3' => Ok(Command::UploadAsset(payload)),
            '4' => Ok(Command::Start),
            '5' => Ok(Command::Stop),
            '6' => Ok(Command::Shutdown),
            other => Err(ProtocolError::UnknownOpcode(other)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Authenticate(_) => "authenticate",
            Command::Ping => "ping",
            Command::LoadSequence(_) => "load_sequence",
            Command::UploadAsset(_) => "upload_asset",
            Command::Start => "start",
            Command::Stop => "stop",
            Command::Shutdown => "shutdown",
        }
    }
}

/// Reply lines, worded the way the remote controller app expects them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Verified,
    AuthFailed,
    NotAuthenticated,
    Pong,
    SequenceLoaded,
    UploadStarted,
    ChunkReceived,
    UploadSaved(String),
    Starting,
    NothingPending,
    AlreadyRunning,
    Stopping,
    NothingRunning,
    ShuttingDown,
    Error(String),
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Verified => write!(f, "Verbindung verifiziert"),
            Reply::AuthFailed => write!(f, "Verbindung fehlgeschlagen"),
            Reply::NotAuthenticated => write!(f, "Nicht angemeldet"),
            Reply::Pong => write!(f, "Test erfolgreich"),
            Reply::SequenceLoaded => write!(f, "Abfolge erfolgreich erhalten"),
            Reply::UploadStarted => write!(f, "Audio Datei beginnt Transfer"),
            Reply::ChunkReceived => write!(f, "Teil empfangen"),
            Reply::UploadSaved(name) => write!(f, "Audio Datei gespeichet als {name}"),
            Reply::Starting => write!(f, "Startet abfolge"),
            Reply::NothingPending => write!(f, "Keine Abfolge erhalten"),
            Reply::AlreadyRunning => write!(f, "Abfolge laeuft bereits"),
            Reply::Stopping => write!(f, "Stoppe Abfolge"),
            Reply::NothingRunning => write!(f, "Keine Abfolge aktiv"),
            Reply::ShuttingDown => write!(f, "Fahre herunter"),
            Reply::Error(reason) => write!(f, "Fehler bei der Verarbeitung: {reason}"),
        }
    }
}
