//! Presentation
//!
//! Projects coordinator events onto either interactive dialogs
//! (foreground) or plain listener events (background).

use super::state::UpdateEvent;
use super::status::RuntimeStatus;
use super::store::StoreContext;
use std::path::Path;
use thiserror::Error;
use tokio::sync::mpsc;

/// Receives update events on the control task
pub trait UpdateListener: Send {
    fn on_event(&mut self, event: UpdateEvent);
}

impl<F> UpdateListener for F
where
    F: FnMut(UpdateEvent) + Send,
{
    fn on_event(&mut self, event: UpdateEvent) {
        self(event)
    }
}

impl UpdateListener for mpsc::UnboundedSender<UpdateEvent> {
    fn on_event(&mut self, event: UpdateEvent) {
        if self.send(event).is_err() {
            tracing::debug!("Update listener channel closed");
        }
    }
}

/// Choices a user can make in a dialog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserAction {
    /// Start (or retry) the download
    Accept,
    /// Give up on the update
    Decline,
    /// Stop the running download
    CancelDownload,
}

/// Identifies one update attempt
pub type AttemptId = u64;

/// A user choice tagged with the attempt whose dialog produced it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionReport {
    pub attempt: AttemptId,
    pub action: UserAction,
}

/// Cloneable handle dialogs use to report the user's choice.
///
/// Bound to one attempt; choices reaching the coordinator after that
/// attempt ended are dropped.
#[derive(Debug, Clone)]
pub struct UserActions {
    attempt: AttemptId,
    tx: mpsc::UnboundedSender<ActionReport>,
}

impl UserActions {
    pub(crate) fn new(attempt: AttemptId, tx: mpsc::UnboundedSender<ActionReport>) -> Self {
        Self { attempt, tx }
    }

    pub fn attempt(&self) -> AttemptId {
        self.attempt
    }

    fn send(&self, action: UserAction) {
        let report = ActionReport {
            attempt: self.attempt,
            action,
        };
        if self.tx.send(report).is_err() {
            tracing::debug!("Coordinator gone, dropping {:?}", action);
        }
    }

    pub fn accept(&self) {
        self.send(UserAction::Accept);
    }

    pub fn decline(&self) {
        self.send(UserAction::Decline);
    }

    pub fn cancel_download(&self) {
        self.send(UserAction::CancelDownload);
    }
}

/// Host dialog widgets (foreground only)
pub trait DialogSurface: Send {
    /// Runtime unusable; offer cancel or download
    fn show_eligibility_error(&mut self, status: RuntimeStatus, actions: UserActions);

    /// Download running; offer cancel
    fn show_progress(&mut self, actions: UserActions);

    fn set_progress(&mut self, percent: u8);

    /// Download failed; offer retry or cancel
    fn show_download_error(&mut self, actions: UserActions);

    fn dismiss(&mut self);
}

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("No application can open {0}")]
    NoHandler(String),
    #[error("Installer hand-off failed: {0}")]
    Install(String),
}

/// Platform hand-offs used by the foreground flow
pub trait Platform: Send {
    /// Open the store page at `uri`
    fn open_store(&mut self, uri: &str) -> Result<(), PlatformError>;

    /// Hand a downloaded package to the platform installer
    fn install_package(&mut self, artifact: &Path) -> Result<(), PlatformError>;

    fn store_context(&self) -> StoreContext {
        StoreContext::current()
    }
}

/// Either dialogs or silent listener events
pub enum PresentationAdapter {
    Foreground {
        dialogs: Box<dyn DialogSurface>,
        platform: Box<dyn Platform>,
    },
    Background,
}

impl PresentationAdapter {
    pub fn is_foreground(&self) -> bool {
        matches!(self, Self::Foreground { .. })
    }

    /// Runtime needs an update; ask the user (foreground only)
    pub fn present_eligibility(&mut self, status: RuntimeStatus, actions: &UserActions) {
        if let Self::Foreground { dialogs, .. } = self {
            dialogs.show_eligibility_error(status, actions.clone());
        }
    }

    /// Project one event
    pub fn present(
        &mut self,
        event: &UpdateEvent,
        actions: &UserActions,
        listener: &mut dyn UpdateListener,
    ) {
        match self {
            Self::Background => listener.on_event(event.clone()),
            Self::Foreground { dialogs, .. } => match event {
                UpdateEvent::Started => dialogs.show_progress(actions.clone()),
                UpdateEvent::Progress(percent) => dialogs.set_progress(*percent),
                UpdateEvent::Completed => dialogs.dismiss(),
                UpdateEvent::Failed(e) => {
                    tracing::debug!("Offering retry after: {}", e);
                    dialogs.dismiss();
                    dialogs.show_download_error(actions.clone());
                }
                UpdateEvent::Cancelled => {
                    dialogs.dismiss();
                    listener.on_event(UpdateEvent::Cancelled);
                }
            },
        }
    }

    /// Close any dialog without reporting anything
    pub fn dismiss(&mut self) {
        if let Self::Foreground { dialogs, .. } = self {
            dialogs.dismiss();
        }
    }

    /// Hand the artifact to the platform installer (foreground only)
    pub fn hand_off_install(&mut self, artifact: &Path) -> Result<(), PlatformError> {
        match self {
            Self::Foreground { platform, .. } => {
                tracing::info!("Install the runtime: {:?}", artifact);
                platform.install_package(artifact)
            }
            Self::Background => Ok(()),
        }
    }

    /// Open the store page; `None` in background mode
    pub fn open_store(&mut self) -> Option<Result<String, PlatformError>> {
        let Self::Foreground { platform, .. } = self else {
            return None;
        };
        let package = super::store::select_package(&platform.store_context());
        let uri = super::store::details_uri(package);
        Some(platform.open_store(&uri).map(|()| uri))
    }
}
