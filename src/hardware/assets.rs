use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("invalid asset name '{0}'")]
    InvalidName(String),
    #[error("asset '{name}': {source}")]
    Io {
        name: String,
        #[source]
        source: io::Error,
    },
}

/// The shared instructions directory: written by uploads, read by playback,
/// emptied after a run.
pub trait AssetStore: Send + Sync {
    /// Absolute location of `name`, whether or not it exists yet.
    fn locate(&self, name: &str) -> Result<PathBuf, AssetError>;
    fn write(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, AssetError>;
    fn exists(&self, name: &str) -> bool;
    /// Removing an absent asset is not an error.
    fn delete(&self, name: &str) -> Result<(), AssetError>;
}

/// Accepts only a bare file name: no separators, no parent or hidden entries.
pub fn validate_name(name: &str) -> Result<&str, AssetError> {
    let invalid = || AssetError::InvalidName(name.to_string());

    if name.is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\'])
        || name.chars().any(char::is_control)
    {
        return Err(invalid());
    }
    if Path::new(name).file_name().and_then(|n| n.to_str()) != Some(name) {
        return Err(invalid());
    }

    Ok(name)
}

pub struct DirAssetStore {
    dir: PathBuf,
}

impl DirAssetStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl AssetStore for DirAssetStore {
    fn locate(&self, name: &str) -> Result<PathBuf, AssetError> {
        Ok(self.dir.join(validate_name(name)?))
    }

    fn write(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, AssetError> {
        let path = self.locate(name)?;
        fs::write(&path, bytes).map_err(|source| AssetError::Io {
            name: name.to_string(),
            source,
        })?;
        debug!(name, bytes = bytes.len(), "asset written");
        Ok(path)
    }

    fn exists(&self, name: &str) -> bool {
        self.locate(name).is_ok_and(|path| path.is_file())
    }

    fn delete(&self, name: &str) -> Result<(), AssetError> {
        let path = self.locate(name)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(name, "asset deleted");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(AssetError::Io {
                name: name.to_string(),
                source,
            }),
        }
    }
}
