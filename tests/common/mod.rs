//! Shared fixtures for the update flow tests
#![allow(dead_code)]

use ed25519_dalek::SigningKey;
use runtime_updater::engine::config::{META_DOWNLOAD_URL, META_VERIFY};
use runtime_updater::engine::updater::download::{DownloadHandle, DownloadTransport, OutcomeSink};
use runtime_updater::engine::updater::install::{ArchiveError, ArchiveProbe, ZipArchiveProbe};
use runtime_updater::engine::updater::verify::{ArtifactPacker, Identity, IdentityError};
use runtime_updater::engine::updater::{IdentityProvider, SignedArchiveIdentity, UpdateRequest};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub const UPDATE_URL: &str = "http://updates.test/runtime.pkg";

pub fn signing_key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

pub fn identity(seed: u8) -> Identity {
    Identity::from(&signing_key(seed).verifying_key())
}

/// Signed runtime package with a library and a version marker
pub fn pack_runtime(dest: &Path, seed: u8) {
    ArtifactPacker::new()
        .file("libruntime.so", b"\x7fELF runtime".to_vec())
        .file("runtime.json", br#"{ "version": "3.1.0" }"#.to_vec())
        .signer(signing_key(seed))
        .write(dest)
        .unwrap();
}

pub fn metadata(url: &str, verify: Option<&str>) -> HashMap<String, String> {
    let mut map = HashMap::new();
    map.insert(META_DOWNLOAD_URL.to_string(), url.to_string());
    if let Some(verify) = verify {
        map.insert(META_VERIFY.to_string(), verify.to_string());
    }
    map
}

/// What the scripted transport does for one session
pub enum Script {
    /// Copy the file into the download dir and complete
    Complete(PathBuf),
    /// Report some progress, then fail
    Fail { status: u16, error: u32 },
    /// Start and wait for cancel
    Hang,
}

/// Transport replaying one script per session, in order
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<VecDeque<Script>>,
    waiting: Mutex<Option<OutcomeSink>>,
    pub starts: AtomicUsize,
    pub artifacts: Mutex<Vec<PathBuf>>,
}

impl ScriptedTransport {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            ..Default::default()
        }
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

impl DownloadTransport for ScriptedTransport {
    fn start_download(&self, request: &UpdateRequest, sink: OutcomeSink) -> DownloadHandle {
        let handle = DownloadHandle(sink.session());
        self.starts.fetch_add(1, Ordering::SeqCst);
        let script = self.scripts.lock().unwrap().pop_front().unwrap_or(Script::Hang);

        match script {
            Script::Complete(source) => {
                std::fs::create_dir_all(&request.download_dir).unwrap();
                let artifact = request.download_dir.join(format!("runtime-{}.pkg", handle.0));
                std::fs::copy(&source, &artifact).unwrap();
                self.artifacts.lock().unwrap().push(artifact.clone());
                sink.started();
                sink.progress(40);
                sink.progress(100);
                sink.completed(artifact);
            }
            Script::Fail { status, error } => {
                sink.started();
                sink.progress(30);
                sink.failed(status, error);
            }
            Script::Hang => {
                sink.started();
                sink.progress(10);
                *self.waiting.lock().unwrap() = Some(sink);
            }
        }
        handle
    }

    fn cancel(&self, _handle: &DownloadHandle) -> bool {
        match self.waiting.lock().unwrap().take() {
            Some(sink) => {
                sink.cancelled();
                true
            }
            None => false,
        }
    }
}

/// Identity provider counting artifact lookups
pub struct CountingIdentity {
    inner: SignedArchiveIdentity,
    pub calls: AtomicUsize,
}

impl CountingIdentity {
    pub fn trusting(seeds: &[u8]) -> Self {
        Self {
            inner: SignedArchiveIdentity::new(seeds.iter().map(|s| identity(*s)).collect()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl IdentityProvider for CountingIdentity {
    fn host_identity(&self) -> Result<Vec<Identity>, IdentityError> {
        self.inner.host_identity()
    }

    fn artifact_identity(&self, artifact: &Path) -> Result<Vec<Identity>, IdentityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.artifact_identity(artifact)
    }
}

/// Archive probe counting installs
#[derive(Default)]
pub struct CountingProbe {
    inner: ZipArchiveProbe,
    pub calls: AtomicUsize,
}

impl CountingProbe {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ArchiveProbe for CountingProbe {
    fn is_compressed(&self, artifact: &Path) -> Result<bool, ArchiveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.is_compressed(artifact)
    }

    fn decompress(&self, artifact: &Path, dest: &Path) -> Result<(), ArchiveError> {
        self.inner.decompress(artifact, dest)
    }

    fn extract(&self, artifact: &Path, dest: &Path) -> Result<(), ArchiveError> {
        self.inner.extract(artifact, dest)
    }
}
