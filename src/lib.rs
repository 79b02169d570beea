//! Runtime Updater - keeps a host's shared runtime present and current
//! Library crate behind the `runtime-updater` binary

pub mod engine;

pub use engine::updater::{UpdateCoordinator, UpdateError, UpdateEvent, UpdateOutcome};
