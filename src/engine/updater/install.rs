//! Artifact Installation
//!
//! Unpacks a runtime artifact into the extraction directory. Artifacts are
//! zip packages whose payload is either stored plainly or as gzip
//! compressed resources (single files or tarballs).

use super::error::UpdateError;
use super::status::{RuntimeMarker, MARKER_FILE};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;
use zip::ZipArchive;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const META_PREFIX: &str = "META-INF/";

/// Archive handling errors
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Entry escapes the destination: {0}")]
    UnsafePath(String),
}

/// Format probe and unpack primitives
pub trait ArchiveProbe: Send + Sync {
    /// True when the artifact carries compressed resources
    fn is_compressed(&self, artifact: &Path) -> Result<bool, ArchiveError>;

    /// Unpack compressed resources into `dest`
    fn decompress(&self, artifact: &Path, dest: &Path) -> Result<(), ArchiveError>;

    /// Copy plain resources into `dest`
    fn extract(&self, artifact: &Path, dest: &Path) -> Result<(), ArchiveError>;
}

/// Default probe for zip packages
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipArchiveProbe;

impl ZipArchiveProbe {
    fn open(artifact: &Path) -> Result<ZipArchive<File>, ArchiveError> {
        Ok(ZipArchive::new(File::open(artifact)?)?)
    }

    /// Resolve an entry to a path under `dest`; `None` for META-INF and directories
    fn target_path(
        name: &str,
        enclosed: Option<PathBuf>,
        dest: &Path,
    ) -> Result<Option<PathBuf>, ArchiveError> {
        if name.starts_with(META_PREFIX) || name.ends_with('/') {
            return Ok(None);
        }
        let relative = enclosed.ok_or_else(|| ArchiveError::UnsafePath(name.to_string()))?;
        Ok(Some(dest.join(relative)))
    }

    fn create_parent(path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

impl ArchiveProbe for ZipArchiveProbe {
    fn is_compressed(&self, artifact: &Path) -> Result<bool, ArchiveError> {
        let mut archive = Self::open(artifact)?;
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            if entry.is_dir() || entry.name().starts_with(META_PREFIX) {
                continue;
            }
            let mut head = [0u8; 2];
            let mut filled = 0;
            while filled < head.len() {
                let n = entry.read(&mut head[filled..])?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            if filled == head.len() && head == GZIP_MAGIC {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn decompress(&self, artifact: &Path, dest: &Path) -> Result<(), ArchiveError> {
        let mut archive = Self::open(artifact)?;
        fs::create_dir_all(dest)?;

        for i in 0..archive.len() {
            let entry = archive.by_index(i)?;
            let name = entry.name().to_string();
            let Some(outpath) = Self::target_path(&name, entry.enclosed_name(), dest)? else {
                continue;
            };

            let mut reader = BufReader::new(entry);
            let is_gzip = reader.fill_buf()?.starts_with(&GZIP_MAGIC);

            if !is_gzip {
                Self::create_parent(&outpath)?;
                io::copy(&mut reader, &mut File::create(&outpath)?)?;
                continue;
            }

            if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
                tracing::debug!("Unpacking tarball {}", name);
                // Tarball members land relative to the directory holding the tarball entry
                let base = outpath.parent().unwrap_or(dest).to_path_buf();
                fs::create_dir_all(&base)?;
                tar::Archive::new(GzDecoder::new(reader)).unpack(&base)?;
            } else {
                let target = if name.ends_with(".gz") {
                    outpath.with_extension("")
                } else {
                    outpath
                };
                tracing::debug!("Decompressing {} -> {:?}", name, target);
                Self::create_parent(&target)?;
                io::copy(&mut GzDecoder::new(reader), &mut File::create(&target)?)?;
            }
        }
        Ok(())
    }

    fn extract(&self, artifact: &Path, dest: &Path) -> Result<(), ArchiveError> {
        let mut archive = Self::open(artifact)?;
        fs::create_dir_all(dest)?;

        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            let name = entry.name().to_string();
            let Some(outpath) = Self::target_path(&name, entry.enclosed_name(), dest)? else {
                continue;
            };
            Self::create_parent(&outpath)?;
            io::copy(&mut entry, &mut File::create(&outpath)?)?;
        }
        Ok(())
    }
}

/// Dispatches an artifact to extract or decompress
pub struct ArtifactInstaller<'a> {
    probe: &'a dyn ArchiveProbe,
}

impl<'a> ArtifactInstaller<'a> {
    pub fn new(probe: &'a dyn ArchiveProbe) -> Self {
        Self { probe }
    }

    /// Unpack `artifact` into `dest`.
    ///
    /// The artifact is left in place; deleting it is the caller's job on
    /// every path.
    pub fn install(&self, artifact: &Path, dest: &Path) -> Result<(), UpdateError> {
        let compressed = self
            .probe
            .is_compressed(artifact)
            .map_err(|e| UpdateError::Installation(e.to_string()))?;

        tracing::info!(
            "Installing {:?} into {:?} ({})",
            artifact,
            dest,
            if compressed { "decompress" } else { "extract" }
        );

        clear_marker(dest).map_err(|e| UpdateError::Installation(e.to_string()))?;

        let result = if compressed {
            self.probe.decompress(artifact, dest)
        } else {
            self.probe.extract(artifact, dest)
        };
        result.map_err(|e| UpdateError::Installation(e.to_string()))?;

        stamp_marker(dest);
        Ok(())
    }
}

/// Drop the marker of an earlier install; only the new payload may bring one
fn clear_marker(dest: &Path) -> io::Result<()> {
    match fs::remove_file(dest.join(MARKER_FILE)) {
        Ok(()) => {
            tracing::debug!("Removed previous {}", MARKER_FILE);
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Flag a freshly installed runtime as pending its first use
fn stamp_marker(dest: &Path) {
    let path = dest.join(MARKER_FILE);
    match RuntimeMarker::load(&path) {
        Ok(Some(mut marker)) => {
            marker.pending_first_use = true;
            marker.installed_at = Some(chrono::Utc::now());
            if let Err(e) = marker.save(&path) {
                tracing::warn!("Could not update runtime marker: {}", e);
            }
        }
        Ok(None) => tracing::debug!("Artifact carries no {}", MARKER_FILE),
        Err(e) => tracing::warn!("Runtime marker in artifact is unreadable: {}", e),
    }
}
