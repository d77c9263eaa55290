//! Recording stand-ins for the hardware capabilities.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::audio::{AudioSink, Volume};
use crate::events::PinId;
use crate::hardware::{ActuationError, AssetError, AssetStore, DigitalOutputPort, Level, validate_name};
use crate::shutdown::ShutdownHook;
use crate::timing::{Hardware, SchedulerSettings};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PinWrite {
    Configure(PinId),
    Set(PinId, Level),
}

#[derive(Default)]
pub(crate) struct RecordingPins {
    writes: Mutex<Vec<PinWrite>>,
}

impl RecordingPins {
    pub(crate) fn writes(&self) -> Vec<PinWrite> {
        self.writes.lock().clone()
    }

    pub(crate) fn level(&self, pin: PinId) -> Option<Level> {
        self.writes.lock().iter().rev().find_map(|w| match w {
            PinWrite::Set(p, level) if *p == pin => Some(*level),
            _ => None,
        })
    }
}

impl DigitalOutputPort for RecordingPins {
    fn configure_as_output(&self, pin: PinId) -> Result<(), ActuationError> {
        self.writes.lock().push(PinWrite::Configure(pin));
        Ok(())
    }

    fn set_level(&self, pin: PinId, level: Level) -> Result<(), ActuationError> {
        self.writes.lock().push(PinWrite::Set(pin, level));
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct FakeAudio {
    played: Mutex<Vec<(String, Volume)>>,
    failing: Vec<String>,
    busy_polls: AtomicUsize,
    stops: AtomicUsize,
}

impl FakeAudio {
    pub(crate) fn failing(names: &[&str]) -> Self {
        Self {
            failing: names.iter().map(|n| n.to_string()).collect(),
            ..Self::default()
        }
    }

    /// Reports busy for the next `polls` calls to `is_busy`.
    pub(crate) fn busy_for(polls: usize) -> Self {
        Self {
            busy_polls: AtomicUsize::new(polls),
            ..Self::default()
        }
    }

    pub(crate) fn played(&self) -> Vec<(String, Volume)> {
        self.played.lock().clone()
    }

    pub(crate) fn stop_requests(&self) -> usize {
        self.stops.load(Ordering::Acquire)
    }
}

impl AudioSink for FakeAudio {
    fn play(&self, path: &Path, volume: Volume) -> Result<(), ActuationError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if self.failing.contains(&name) {
            return Err(ActuationError::MissingAsset(path.to_path_buf()));
        }
        self.played.lock().push((name, volume));
        Ok(())
    }

    fn is_busy(&self) -> bool {
        self.busy_polls
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }

    fn stop_all(&self) {
        self.stops.fetch_add(1, Ordering::AcqRel);
        self.busy_polls.store(0, Ordering::Release);
    }
}

#[derive(Default)]
pub(crate) struct MemoryAssets {
    files: Mutex<HashMap<String, Vec<u8>>>,
    deleted: Mutex<Vec<String>>,
}

impl MemoryAssets {
    pub(crate) fn deleted(&self) -> Vec<String> {
        self.deleted.lock().clone()
    }
}

impl AssetStore for MemoryAssets {
    fn locate(&self, name: &str) -> Result<PathBuf, AssetError> {
        Ok(Path::new("/memory").join(validate_name(name)?))
    }

    fn write(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, AssetError> {
        let path = self.locate(name)?;
        self.files.lock().insert(name.to_string(), bytes.to_vec());
        Ok(path)
    }

    fn exists(&self, name: &str) -> bool {
        self.files.lock().contains_key(name)
    }

    fn delete(&self, name: &str) -> Result<(), AssetError> {
        self.files.lock().remove(name);
        self.deleted.lock().push(name.to_string());
        Ok(())
    }
}

pub(crate) fn hardware(
    pins: &Arc<RecordingPins>,
    audio: &Arc<FakeAudio>,
    assets: &Arc<MemoryAssets>,
) -> Hardware {
    Hardware {
        pins: pins.clone(),
        audio: audio.clone(),
        assets: assets.clone(),
    }
}

pub(crate) fn fast_settings() -> SchedulerSettings {
    SchedulerSettings {
        poll_interval: Duration::from_millis(1),
        drain_poll_interval: Duration::from_millis(1),
    }
}

/// Shutdown hook that only remembers it was called.
#[derive(Clone, Default)]
pub(crate) struct RecordingShutdown {
    requested: Arc<AtomicUsize>,
}

impl RecordingShutdown {
    pub(crate) fn requested(&self) -> bool {
        self.requested.load(Ordering::Acquire) > 0
    }
}

impl ShutdownHook for RecordingShutdown {
    fn request_shutdown(&self) {
        self.requested.fetch_add(1, Ordering::AcqRel);
    }
}
