//! Artifact Verification
//!
//! Confirms that a downloaded runtime artifact is signed by the same
//! identities the host trusts.
//!
//! An artifact is a zip package. Its signer block lives in
//! `META-INF/SIGNERS.json`; every signer carries an ed25519 public key and a
//! signature over the payload digest. Parsing the block reads every payload
//! entry to the end, so the zip CRC of each entry is checked on the way.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Zip entry holding the signer block
pub const SIGNERS_ENTRY: &str = "META-INF/SIGNERS.json";
const META_PREFIX: &str = "META-INF/";

/// Identity lookup errors
#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Malformed signer block: {0}")]
    MalformedSigners(String),

    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Signature of signer {0} does not verify")]
    InvalidSignature(usize),

    #[error("Host identity unavailable: {0}")]
    HostUnavailable(String),
}

/// A signing identity (ed25519 public key)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Identity([u8; 32]);

impl Identity {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(value: &str) -> Result<Self, IdentityError> {
        let bytes = hex::decode(value.trim())
            .map_err(|e| IdentityError::InvalidPublicKey(e.to_string()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| IdentityError::InvalidPublicKey("expected 32 bytes".to_string()))?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<&VerifyingKey> for Identity {
    fn from(key: &VerifyingKey) -> Self {
        Self(key.to_bytes())
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({})", self)
    }
}

/// Supplies both sides of the identity comparison
pub trait IdentityProvider: Send + Sync {
    /// Identities the host application is signed with
    fn host_identity(&self) -> Result<Vec<Identity>, IdentityError>;

    /// Identities embedded in the artifact; fails on a malformed artifact
    fn artifact_identity(&self, artifact: &Path) -> Result<Vec<Identity>, IdentityError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct SignerBlock {
    signers: Vec<SignerEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SignerEntry {
    public_key: String,
    signature: String,
}

/// Identity provider for signed zip artifacts, trusting a fixed key list
#[derive(Debug, Clone, Default)]
pub struct SignedArchiveIdentity {
    trusted: Vec<Identity>,
}

impl SignedArchiveIdentity {
    pub fn new(trusted: Vec<Identity>) -> Self {
        Self { trusted }
    }

    /// Build from hex-encoded public keys (the `trusted_signers` config list)
    pub fn from_hex<S: AsRef<str>>(keys: &[S]) -> Result<Self, IdentityError> {
        let trusted = keys
            .iter()
            .map(|k| Identity::from_hex(k.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { trusted })
    }
}

impl IdentityProvider for SignedArchiveIdentity {
    fn host_identity(&self) -> Result<Vec<Identity>, IdentityError> {
        Ok(self.trusted.clone())
    }

    fn artifact_identity(&self, artifact: &Path) -> Result<Vec<Identity>, IdentityError> {
        read_signer_identities(artifact)
    }
}

/// Parse the signer block and check every signature against the payload
pub fn read_signer_identities(artifact: &Path) -> Result<Vec<Identity>, IdentityError> {
    let mut archive = ZipArchive::new(File::open(artifact)?)?;

    let block: SignerBlock = {
        let mut entry = archive.by_name(SIGNERS_ENTRY)?;
        let mut content = String::new();
        entry.read_to_string(&mut content)?;
        serde_json::from_str(&content)
            .map_err(|e| IdentityError::MalformedSigners(e.to_string()))?
    };

    let digest = payload_digest(&mut archive)?;

    let mut identities = Vec::with_capacity(block.signers.len());
    for (i, signer) in block.signers.iter().enumerate() {
        let identity = Identity::from_hex(&signer.public_key)?;
        let key = VerifyingKey::from_bytes(identity.as_bytes())
            .map_err(|e| IdentityError::InvalidPublicKey(e.to_string()))?;

        let sig_bytes = hex::decode(signer.signature.trim())
            .map_err(|e| IdentityError::MalformedSigners(e.to_string()))?;
        let sig_array: [u8; 64] = sig_bytes
            .try_into()
            .map_err(|_| IdentityError::InvalidSignature(i))?;
        let signature = Signature::from_bytes(&sig_array);

        key.verify(&digest, &signature)
            .map_err(|_| IdentityError::InvalidSignature(i))?;
        identities.push(identity);
    }

    Ok(identities)
}

/// SHA256 over every payload entry, sorted by name.
///
/// Each entry contributes its name, a zero byte, its little-endian length
/// and its contents.
pub fn payload_digest<R: Read + io::Seek>(
    archive: &mut ZipArchive<R>,
) -> Result<[u8; 32], IdentityError> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|name| !name.starts_with(META_PREFIX) && !name.ends_with('/'))
        .map(str::to_owned)
        .collect();
    names.sort();

    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    for name in &names {
        let mut entry = archive.by_name(name)?;
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        hasher.update(entry.size().to_le_bytes());

        let mut read_total: u64 = 0;
        loop {
            let n = entry.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
            read_total += n as u64;
        }
        if read_total != entry.size() {
            return Err(IdentityError::MalformedSigners(format!(
                "entry {} is truncated",
                name
            )));
        }
    }

    Ok(hasher.finalize().into())
}

/// Outcome of a verification, with a diagnostic reason
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationResult {
    pub passed: bool,
    pub reason: String,
}

impl VerificationResult {
    fn pass() -> Self {
        Self {
            passed: true,
            reason: "signatures match".to_string(),
        }
    }

    fn fail(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason: reason.into(),
        }
    }
}

/// Compares artifact identities against the host's
pub struct ArtifactVerifier<'a> {
    identities: &'a dyn IdentityProvider,
}

impl<'a> ArtifactVerifier<'a> {
    pub fn new(identities: &'a dyn IdentityProvider) -> Self {
        Self { identities }
    }

    /// Verify the artifact at `artifact`
    pub fn verify(&self, artifact: &Path) -> VerificationResult {
        let artifact_ids = match self.identities.artifact_identity(artifact) {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!("The downloaded artifact {:?} is invalid: {}", artifact, e);
                return VerificationResult::fail("invalid artifact");
            }
        };

        let host_ids = match self.identities.host_identity() {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!("Host identity lookup failed: {}", e);
                return VerificationResult::fail("invalid artifact");
            }
        };

        compare_identities(&host_ids, &artifact_ids)
    }
}

/// Both lists must be non-empty, equally long and equal index by index
pub fn compare_identities(host: &[Identity], artifact: &[Identity]) -> VerificationResult {
    if host.is_empty() || artifact.is_empty() {
        tracing::error!("No signature in identity info");
        return VerificationResult::fail("no signatures");
    }

    if host.len() != artifact.len() {
        tracing::error!(
            "Signature count differs: host {}, artifact {}",
            host.len(),
            artifact.len()
        );
        return VerificationResult::fail("signature count differs");
    }

    for (i, (h, a)) in host.iter().zip(artifact).enumerate() {
        tracing::debug!("Checking signature {}", i);
        if h != a {
            tracing::error!("Signature {} does not match", i);
            return VerificationResult::fail(format!("signature {} does not match", i));
        }
    }

    tracing::debug!("Signature check passed");
    VerificationResult::pass()
}

/// Builds signed artifacts in the format `read_signer_identities` expects
#[derive(Default)]
pub struct ArtifactPacker {
    files: Vec<(String, Vec<u8>)>,
    signers: Vec<SigningKey>,
}

impl ArtifactPacker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a payload entry
    pub fn file(mut self, name: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        self.files.push((name.into(), contents.into()));
        self
    }

    /// Sign with `key`; signer order is preserved
    pub fn signer(mut self, key: SigningKey) -> Self {
        self.signers.push(key);
        self
    }

    /// Write the package to `dest`
    pub fn write(&self, dest: &Path) -> Result<(), IdentityError> {
        let options =
            SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let mut writer = ZipWriter::new(File::create(dest)?);

        for (name, contents) in &self.files {
            writer.start_file(name.as_str(), options)?;
            writer.write_all(contents)?;
        }
        let file = writer.finish()?;
        drop(file);

        // Digest from the written payload so the signer block matches what a reader sees
        let digest = payload_digest(&mut ZipArchive::new(File::open(dest)?)?)?;
        let block = SignerBlock {
            signers: self
                .signers
                .iter()
                .map(|key| SignerEntry {
                    public_key: hex::encode(key.verifying_key().to_bytes()),
                    signature: hex::encode(key.sign(&digest).to_bytes()),
                })
                .collect(),
        };
        let block = serde_json::to_vec_pretty(&block)
            .map_err(|e| IdentityError::MalformedSigners(e.to_string()))?;

        let mut writer = ZipWriter::new_append(
            std::fs::OpenOptions::new().read(true).write(true).open(dest)?,
        )?;
        writer.start_file(SIGNERS_ENTRY, options)?;
        writer.write_all(&block)?;
        writer.finish()?;
        Ok(())
    }
}
