//! Data directory layout

use std::path::{Path, PathBuf};

use directories::ProjectDirs;

use crate::constants::{APP_NAME, CONSOLES_FILE, REGISTRATIONS_FILE};
use crate::error::StorageError;

/// Locations of every persisted file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaths {
    pub dir: PathBuf,
    pub consoles: PathBuf,
    pub registrations: PathBuf,
}

impl DataPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            consoles: dir.join(CONSOLES_FILE),
            registrations: dir.join(REGISTRATIONS_FILE),
            dir,
        }
    }

    /// Platform data directory for the application
    pub fn platform_default() -> Result<Self, StorageError> {
        let dirs = ProjectDirs::from("", "", APP_NAME).ok_or(StorageError::NoDataDir)?;
        Ok(Self::new(dirs.data_dir()))
    }

    /// Resolve an optional override, falling back to the platform default
    pub fn resolve(override_dir: Option<&Path>) -> Result<Self, StorageError> {
        match override_dir {
            Some(dir) => Ok(Self::new(dir)),
            None => Self::platform_default(),
        }
    }

    /// Where a console cache written with another schema version is kept
    pub fn rejected_cache(&self, version: u32) -> PathBuf {
        let mut name = self.consoles.clone().into_os_string();
        name.push(format!(".v{}.bak", version));
        PathBuf::from(name)
    }

    /// Create the data directory on first use
    pub fn ensure(&self) -> Result<(), StorageError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| StorageError::FileIo {
            path: self.dir.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_and_creation() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = DataPaths::new(tmp.path().join("nested").join("data"));
        assert!(paths.consoles.ends_with(CONSOLES_FILE));
        assert!(paths.registrations.ends_with(REGISTRATIONS_FILE));
        paths.ensure().unwrap();
        assert!(paths.dir.is_dir());
    }

    #[test]
    fn rejected_cache_sits_next_to_the_cache() {
        let paths = DataPaths::new("/data");
        let backup = paths.rejected_cache(2);
        assert_eq!(backup.parent(), paths.consoles.parent());
        assert_eq!(
            backup.file_name().and_then(|n| n.to_str()),
            Some(format!("{}.v2.bak", CONSOLES_FILE).as_str())
        );
    }
}
