//! Runtime Updater
//!
//! Downloads, verifies and installs the shared runtime a host depends on.
//!
//! Components:
//! - `coordinator` - Update state machine and pipeline driver
//! - `session` - Per-download ordering guarantees
//! - `download` - Streaming HTTP transport
//! - `verify` - Signer identity checks
//! - `install` - Archive extraction
//! - `presentation` - Foreground dialogs and background listeners
//! - `status` - Installed runtime probe
//! - `store` - Store package selection

pub mod coordinator;
pub mod download;
pub mod error;
pub mod install;
pub mod presentation;
pub mod session;
pub mod state;
pub mod status;
pub mod store;
pub mod verify;

pub use coordinator::{CoordinatorBuilder, UpdateCoordinator};
pub use download::{DownloadOutcome, DownloadTransport, HttpTransport};
pub use error::UpdateError;
pub use presentation::{
    ActionReport, AttemptId, DialogSurface, Platform, PlatformError, UpdateListener, UserAction,
    UserActions,
};
pub use state::{UpdateEvent, UpdateOutcome, UpdateRequest, UpdateState, VerificationPolicy};
pub use status::{MarkerStatusProvider, RuntimeStatus, RuntimeStatusProvider};
pub use verify::{ArtifactVerifier, IdentityProvider, SignedArchiveIdentity};
