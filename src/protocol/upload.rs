//! Chunked asset upload.
//!
//! `3:<name>:START` opens the transfer; raw base64 text follows, not line
//! framed, until the end marker shows up. Bytes after the marker stay in the
//! reader for the next command frame.

use std::io::{self, BufRead, Write};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use super::{ProtocolError, Reply};
use crate::config::UploadConfig;

pub struct Received {
    pub payload: Vec<u8>,
    pub chunks: usize,
    pub overflowed: bool,
}

/// Extracts the claimed file name from the opening frame's payload.
pub fn parse_header<'a>(payload: &'a str, start_marker: &str) -> Result<&'a str, ProtocolError> {
    let bad = || ProtocolError::BadUploadHeader(start_marker.to_string());

    let rest = payload.trim().strip_prefix(':').ok_or_else(bad)?;
    let (name, marker) = rest.rsplit_once(':').ok_or_else(bad)?;
    if marker.trim() != start_marker {
        return Err(bad());
    }

    Ok(name.trim())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Reads raw chunks until the end marker, which may straddle two reads.
pub fn receive<R: BufRead, W: Write>(
    reader: &mut R,
    writer: &mut W,
    config: &UploadConfig,
) -> io::Result<Received> {
    let marker = config.end_marker.as_bytes();
    let mut payload: Vec<u8> = Vec::new();
    let mut chunks = 0;
    let mut overflowed = false;

    loop {
        let chunk = reader.fill_buf()?;
        if chunk.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before end of upload",
            ));
        }
        chunks += 1;

        let before = payload.len();
        let search_from = before.saturating_sub(marker.len().saturating_sub(1));
        let chunk_len = chunk.len();
        payload.extend_from_slice(chunk);

        if let Some(pos) = find(&payload[search_from..], marker) {
            let marker_start = search_from + pos;
            reader.consume(marker_start + marker.len() - before);
            payload.truncate(marker_start);
            if payload.len() > config.max_bytes {
                overflowed = true;
            }
            break;
        }

        reader.consume(chunk_len);

        if payload.len() > config.max_bytes {
            // Keep only a possible partial marker; the rest is discarded.
            overflowed = true;
            let keep = marker.len().saturating_sub(1).min(payload.len());
            payload.drain(..payload.len() - keep);
        }

        if config.ack_chunks {
            writeln!(writer, "{}", Reply::ChunkReceived)?;
            writer.flush()?;
        }
    }

    if overflowed {
        payload.clear();
    }

    Ok(Received {
        payload,
        chunks,
        overflowed,
    })
}

/// Drops all whitespace and pads with `=` to a multiple of four.
pub fn normalize_base64(payload: &[u8]) -> String {
    let mut text: String = payload
        .iter()
        .filter(|b| !b.is_ascii_whitespace())
        .map(|&b| b as char)
        .collect();

    let missing = text.len() % 4;
    if missing != 0 {
        text.extend(std::iter::repeat_n('=', 4 - missing));
    }
    text
}

pub fn decode(payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    Ok(STANDARD.decode(normalize_base64(payload))?)
}
