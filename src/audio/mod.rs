mod output;
mod voice;

pub use output::{AudioInitError, DeviceAudio};
pub use voice::Voice;

use std::path::Path;

use tracing::debug;

use crate::hardware::ActuationError;

/// Playback volume in percent, clamped to the sink's 0..=100 range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Volume(u8);

impl Volume {
    pub const MAX: Volume = Volume(100);

    pub fn from_percent(percent: u32) -> Self {
        Self(percent.min(100) as u8)
    }

    pub fn percent(self) -> u8 {
        self.0
    }

    /// Linear gain, 0.0 -> 1.0
    pub fn gain(self) -> f32 {
        self.0 as f32 / 100.0
    }
}

pub trait AudioSink: Send + Sync {
    /// Starts playback without waiting for it to finish.
    fn play(&self, path: &Path, volume: Volume) -> Result<(), ActuationError>;
    fn is_busy(&self) -> bool;
    fn stop_all(&self);
}

/// Sink for hosts without an output device. Playback "finishes" instantly but
/// missing assets are still reported.
#[derive(Debug, Default)]
pub struct SilentAudio;

impl AudioSink for SilentAudio {
    fn play(&self, path: &Path, volume: Volume) -> Result<(), ActuationError> {
        if !path.is_file() {
            return Err(ActuationError::MissingAsset(path.to_path_buf()));
        }
        debug!(path = %path.display(), volume = volume.percent(), "silent playback");
        Ok(())
    }

    fn is_busy(&self) -> bool {
        false
    }

    fn stop_all(&self) {}
}
