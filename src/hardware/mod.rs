//! Capabilities the scheduler drives: digital outputs and the asset
//! directory. Audio playback lives in [`crate::audio`].

mod assets;
mod gpio;

pub use assets::{AssetError, AssetStore, DirAssetStore, validate_name};
pub use gpio::{DigitalOutputPort, Level, LogOnlyPins, SysfsGpio};

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::events::PinId;

/// A single pin write or playback request that failed. The scheduler logs
/// these and carries on with the timeline.
#[derive(Debug, Error)]
pub enum ActuationError {
    #[error("gpio {pin}: {source}")]
    Pin {
        pin: PinId,
        #[source]
        source: io::Error,
    },
    #[error("audio asset {0:?} not found")]
    MissingAsset(PathBuf),
    #[error("audio asset {0:?} is not a WAV file")]
    UnsupportedFormat(PathBuf),
    #[error("failed to decode {path:?}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },
    #[error("audio output queue is full")]
    QueueFull,
    #[error(transparent)]
    Asset(#[from] AssetError),
}
