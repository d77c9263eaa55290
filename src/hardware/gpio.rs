use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, info};

use super::ActuationError;
use crate::events::PinId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    On,
    Off,
}

pub trait DigitalOutputPort: Send + Sync {
    fn configure_as_output(&self, pin: PinId) -> Result<(), ActuationError>;
    fn set_level(&self, pin: PinId, level: Level) -> Result<(), ActuationError>;
}

/// Linux sysfs GPIO (`/sys/class/gpio`), BCM numbering.
pub struct SysfsGpio {
    root: PathBuf,
    exported: Mutex<HashSet<PinId>>,
}

impl SysfsGpio {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            exported: Mutex::new(HashSet::new()),
        }
    }

    fn pin_dir(&self, pin: PinId) -> PathBuf {
        self.root.join(format!("gpio{pin}"))
    }

    fn write(pin: PinId, path: &Path, value: &str) -> Result<(), ActuationError> {
        fs::write(path, value).map_err(|source| ActuationError::Pin { pin, source })
    }
}

impl DigitalOutputPort for SysfsGpio {
    fn configure_as_output(&self, pin: PinId) -> Result<(), ActuationError> {
        let dir = self.pin_dir(pin);
        let mut exported = self.exported.lock();
        if !exported.contains(&pin) && !dir.exists() {
            Self::write(pin, &self.root.join("export"), &pin.to_string())?;
            debug!(pin, "exported gpio");
        }
        Self::write(pin, &dir.join("direction"), "out")?;
        exported.insert(pin);
        Ok(())
    }

    fn set_level(&self, pin: PinId, level: Level) -> Result<(), ActuationError> {
        let value = match level {
            Level::On => "1",
            Level::Off => "0",
        };
        Self::write(pin, &self.pin_dir(pin).join("value"), value)
    }
}

/// Stand-in for hosts without GPIO: every write only shows up in the log.
#[derive(Debug, Default)]
pub struct LogOnlyPins;

impl DigitalOutputPort for LogOnlyPins {
    fn configure_as_output(&self, pin: PinId) -> Result<(), ActuationError> {
        debug!(pin, "configure output");
        Ok(())
    }

    fn set_level(&self, pin: PinId, level: Level) -> Result<(), ActuationError> {
        info!(pin, ?level, "pin level");
        Ok(())
    }
}
