//! Runtime Status
//!
//! Describes the locally available runtime and probes it through the
//! `runtime.json` marker written next to an installed runtime.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Marker file name inside the extraction directory
pub const MARKER_FILE: &str = "runtime.json";

/// State of the locally available runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeStatus {
    /// Nothing installed
    Absent,
    /// Installed but not yet loaded for the first time
    PendingFirstUse,
    /// Installed with a different version than the host expects
    VersionMismatch,
    /// Installed and usable
    Matched,
    /// Marker unreadable or status lookup failed
    Unknown,
}

impl RuntimeStatus {
    /// True when no update is needed
    pub fn is_satisfied(self) -> bool {
        matches!(self, Self::PendingFirstUse | Self::Matched)
    }
}

/// Source of the current runtime status
pub trait RuntimeStatusProvider: Send + Sync {
    fn status(&self) -> RuntimeStatus;
}

impl<F> RuntimeStatusProvider for F
where
    F: Fn() -> RuntimeStatus + Send + Sync,
{
    fn status(&self) -> RuntimeStatus {
        self()
    }
}

/// Contents of the marker file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeMarker {
    pub version: String,
    /// Set on install, cleared by the host once the runtime was loaded
    #[serde(default)]
    pub pending_first_use: bool,
    #[serde(default)]
    pub installed_at: Option<DateTime<Utc>>,
}

impl RuntimeMarker {
    pub fn load(path: &Path) -> std::io::Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save atomically (write temp, then rename)
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &content)?;
        fs::rename(&temp_path, path)?;
        Ok(())
    }
}

/// Status provider backed by the marker in the extraction directory
pub struct MarkerStatusProvider {
    marker_path: PathBuf,
    expected_version: Option<String>,
}

impl MarkerStatusProvider {
    /// `expected_version` of `None` accepts any installed version
    pub fn new(runtime_dir: &Path, expected_version: Option<String>) -> Self {
        Self {
            marker_path: runtime_dir.join(MARKER_FILE),
            expected_version,
        }
    }
}

impl RuntimeStatusProvider for MarkerStatusProvider {
    fn status(&self) -> RuntimeStatus {
        let marker = match RuntimeMarker::load(&self.marker_path) {
            Ok(Some(marker)) => marker,
            Ok(None) => return RuntimeStatus::Absent,
            Err(e) => {
                tracing::warn!("Unreadable runtime marker {:?}: {}", self.marker_path, e);
                return RuntimeStatus::Unknown;
            }
        };

        if let Some(expected) = &self.expected_version {
            if marker.version.trim() != expected.trim() {
                tracing::debug!(
                    "Runtime version {} does not match expected {}",
                    marker.version,
                    expected
                );
                return RuntimeStatus::VersionMismatch;
            }
        }

        if marker.pending_first_use {
            RuntimeStatus::PendingFirstUse
        } else {
            RuntimeStatus::Matched
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_marker(dir: &Path, version: &str, pending: bool) {
        RuntimeMarker {
            version: version.to_string(),
            pending_first_use: pending,
            installed_at: Some(Utc::now()),
        }
        .save(&dir.join(MARKER_FILE))
        .unwrap();
    }

    #[test]
    fn test_absent_without_marker() {
        let dir = tempdir().unwrap();
        let provider = MarkerStatusProvider::new(dir.path(), Some("1.0.0".into()));
        assert_eq!(provider.status(), RuntimeStatus::Absent);
    }

    #[test]
    fn test_version_mismatch() {
        let dir = tempdir().unwrap();
        write_marker(dir.path(), "0.9.0", false);
        let provider = MarkerStatusProvider::new(dir.path(), Some("1.0.0".into()));
        assert_eq!(provider.status(), RuntimeStatus::VersionMismatch);
    }

    #[test]
    fn test_matched_and_pending() {
        let dir = tempdir().unwrap();
        write_marker(dir.path(), "1.0.0", false);
        let provider = MarkerStatusProvider::new(dir.path(), Some("1.0.0".into()));
        assert_eq!(provider.status(), RuntimeStatus::Matched);

        write_marker(dir.path(), "1.0.0", true);
        assert_eq!(provider.status(), RuntimeStatus::PendingFirstUse);

        let any = MarkerStatusProvider::new(dir.path(), None);
        assert!(any.status().is_satisfied());
    }

    #[test]
    fn test_garbage_marker_is_unknown() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(MARKER_FILE), "not json").unwrap();
        let provider = MarkerStatusProvider::new(dir.path(), None);
        assert_eq!(provider.status(), RuntimeStatus::Unknown);
        assert!(!RuntimeStatus::Unknown.is_satisfied());
        assert!(!RuntimeStatus::Absent.is_satisfied());
    }
}
