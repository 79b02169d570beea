//! Update Error Taxonomy
//!
//! Every failure of an update attempt ends up as one of these variants.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum UpdateError {
    /// Missing or empty download URL, unusable directories
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Transfer failed; codes are passed through untouched
    #[error("Transport error (status {status}, code {code})")]
    Transport { status: u16, code: u32 },

    /// Unparseable artifact or identity mismatch
    #[error("Invalid artifact: {0}")]
    InvalidArtifact(String),

    /// Extraction or decompression failure
    #[error("Installation error: {0}")]
    Installation(String),

    #[error("Update cancelled by the user")]
    UserCancelled,
}

pub type Result<T> = std::result::Result<T, UpdateError>;
