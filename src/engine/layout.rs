//! Runtime Layout
//!
//! Private filesystem layout for downloaded artifacts and the extracted
//! runtime.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Directory layout under the updater's private data directory
#[derive(Debug, Clone)]
pub struct RuntimeLayout {
    base_dir: PathBuf,
}

impl RuntimeLayout {
    /// Create a layout in the platform data directory
    ///
    /// Linux: ~/.local/share/runtime-updater/
    /// Windows: %LOCALAPPDATA%\RuntimeUpdater\
    /// macOS: ~/Library/Application Support/RuntimeUpdater/
    pub fn new() -> Result<Self, LayoutError> {
        let base_dir = Self::get_base_dir()?;
        Ok(Self { base_dir })
    }

    /// Create with custom base directory
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    fn get_base_dir() -> Result<PathBuf, LayoutError> {
        #[cfg(target_os = "windows")]
        {
            let local_app_data = dirs::data_local_dir().ok_or(LayoutError::NoDataDir)?;
            Ok(local_app_data.join("RuntimeUpdater"))
        }

        #[cfg(target_os = "macos")]
        {
            let app_support = dirs::data_dir().ok_or(LayoutError::NoDataDir)?;
            Ok(app_support.join("RuntimeUpdater"))
        }

        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        {
            let data = dirs::data_local_dir().ok_or(LayoutError::NoDataDir)?;
            Ok(data.join("runtime-updater"))
        }
    }

    /// Create all required directories
    pub fn init(&self) -> Result<(), LayoutError> {
        fs::create_dir_all(self.downloads_dir())?;
        fs::create_dir_all(self.runtime_dir())?;
        fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Where artifacts are downloaded to
    pub fn downloads_dir(&self) -> PathBuf {
        self.base_dir.join("downloads")
    }

    /// Where the runtime gets extracted
    pub fn runtime_dir(&self) -> PathBuf {
        self.base_dir.join("runtime")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// Remove artifacts left behind by an interrupted process.
    ///
    /// Only safe while no update is in flight. Returns the number of files
    /// removed.
    pub fn cleanup_downloads(&self) -> Result<usize, LayoutError> {
        let downloads = self.downloads_dir();
        if !downloads.exists() {
            return Ok(0);
        }

        let mut removed = 0;
        for entry in fs::read_dir(&downloads)? {
            let path = entry?.path();
            if path.is_file() {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Layout errors
#[derive(Debug)]
pub enum LayoutError {
    NoDataDir,
    IoError(io::Error),
}

impl From<io::Error> for LayoutError {
    fn from(e: io::Error) -> Self {
        Self::IoError(e)
    }
}

impl std::fmt::Display for LayoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoDataDir => write!(f, "Could not determine data directory"),
            Self::IoError(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for LayoutError {}
