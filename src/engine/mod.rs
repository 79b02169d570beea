// Runtime updater engine - core module structure
pub mod cli;
pub mod config;
pub mod layout;
pub mod updater;

pub use config::UpdaterConfig;
pub use layout::RuntimeLayout;
