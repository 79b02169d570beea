//! Update Coordinator
//!
//! The state machine behind one update attempt. It owns every state
//! transition; downloads, verification and installation run elsewhere and
//! report back through channels drained by `process_next`.
//!
//! All methods must be called from within a tokio runtime.

use super::download::{DownloadOutcome, DownloadTransport, HttpTransport, SessionId, SessionReport};
use super::error::UpdateError;
use super::install::{ArchiveProbe, ArtifactInstaller, ZipArchiveProbe};
use super::presentation::{
    ActionReport, AttemptId, DialogSurface, Platform, PresentationAdapter, UpdateListener,
    UserAction, UserActions,
};
use super::session::DownloadSession;
use super::state::{UpdateEvent, UpdateOutcome, UpdateRequest, UpdateState, VerificationPolicy};
use super::status::{MarkerStatusProvider, RuntimeStatusProvider};
use super::store;
use super::verify::{ArtifactVerifier, IdentityProvider, SignedArchiveIdentity, VerificationResult};
use crate::engine::config::{
    configured_download_url, ConfigError, ConfigurationSource, UpdaterConfig, META_VERIFY,
};
use crate::engine::layout::RuntimeLayout;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Result of an out-of-line pipeline step
#[derive(Debug)]
enum WorkResult {
    Verified(VerificationResult),
    Installed(Result<(), UpdateError>),
}

enum Incoming {
    Work(WorkResult),
    Report(SessionReport),
    Action(ActionReport),
}

pub struct UpdateCoordinator {
    state: UpdateState,
    last_outcome: Option<UpdateOutcome>,

    config: Arc<dyn ConfigurationSource>,
    status: Arc<dyn RuntimeStatusProvider>,
    transport: Arc<dyn DownloadTransport>,
    identities: Arc<dyn IdentityProvider>,
    archive: Arc<dyn ArchiveProbe>,
    presentation: PresentationAdapter,
    listener: Box<dyn UpdateListener>,

    dest_dir: PathBuf,
    download_dir: PathBuf,
    arch: String,
    url_override: Option<String>,

    request: Option<UpdateRequest>,
    session: Option<DownloadSession>,
    artifact: Option<PathBuf>,
    next_session: SessionId,
    attempt: AttemptId,

    report_tx: mpsc::UnboundedSender<SessionReport>,
    report_rx: mpsc::UnboundedReceiver<SessionReport>,
    action_tx: mpsc::UnboundedSender<ActionReport>,
    action_rx: mpsc::UnboundedReceiver<ActionReport>,
    work_tx: mpsc::UnboundedSender<WorkResult>,
    work_rx: mpsc::UnboundedReceiver<WorkResult>,
}

impl UpdateCoordinator {
    /// Start building a coordinator extracting into `dest_dir`
    pub fn builder(dest_dir: PathBuf, download_dir: PathBuf) -> CoordinatorBuilder {
        CoordinatorBuilder::new(dest_dir, download_dir)
    }

    pub fn state(&self) -> &UpdateState {
        &self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state.is_idle()
    }

    pub fn is_downloading(&self) -> bool {
        matches!(self.state, UpdateState::Downloading)
    }

    /// True while a foreground dialog is on screen
    pub fn is_showing_dialog(&self) -> bool {
        self.presentation.is_foreground()
            && matches!(
                self.state,
                UpdateState::AwaitingUserDecision | UpdateState::Downloading
            )
    }

    pub fn is_foreground(&self) -> bool {
        self.presentation.is_foreground()
    }

    /// Outcome of the most recent finished attempt
    pub fn last_outcome(&self) -> Option<&UpdateOutcome> {
        self.last_outcome.as_ref()
    }

    /// Handle for reporting dialog choices in the current (or most recent)
    /// attempt
    pub fn user_actions(&self) -> UserActions {
        UserActions::new(self.attempt, self.action_tx.clone())
    }

    /// Use `url` instead of the configured download URL
    pub fn set_download_url_override(&mut self, url: impl Into<String>) {
        self.url_override = Some(url.into());
    }

    /// Launch an update attempt.
    ///
    /// Returns false without touching anything when an attempt is already
    /// running or the runtime needs no update.
    ///
    /// # Panics
    ///
    /// In foreground mode with no download URL, when the platform has no
    /// application able to open the store.
    pub fn attempt_update(&mut self) -> bool {
        if !self.state.is_idle() {
            tracing::debug!("Update already in progress ({:?})", self.state);
            return false;
        }

        let status = self.status.status();
        if status.is_satisfied() {
            tracing::debug!("Runtime status {:?}, no update needed", status);
            return false;
        }
        self.attempt += 1;
        tracing::info!("Runtime status {:?}, launching update {}", status, self.attempt);

        if self.presentation.is_foreground() {
            self.state = UpdateState::AwaitingUserDecision;
            let actions = self.user_actions();
            self.presentation.present_eligibility(status, &actions);
        } else {
            self.begin_download();
        }
        true
    }

    /// Cancel a background download; false for foreground coordinators or
    /// when nothing is downloading
    pub fn cancel_background_update(&mut self) -> bool {
        if self.presentation.is_foreground() || !self.is_downloading() {
            return false;
        }
        self.session.as_ref().map_or(false, DownloadSession::cancel)
    }

    /// Handle the next pending message. Returns false once idle.
    pub async fn process_next(&mut self) -> bool {
        if self.state.is_idle() {
            return false;
        }

        let incoming = tokio::select! {
            biased;
            Some(result) = self.work_rx.recv() => Incoming::Work(result),
            Some(report) = self.report_rx.recv() => Incoming::Report(report),
            Some(action) = self.action_rx.recv() => Incoming::Action(action),
            else => return false,
        };

        match incoming {
            Incoming::Work(result) => self.on_work(result),
            Incoming::Report(report) => self.on_report(report),
            Incoming::Action(action) => self.on_action(action),
        }
        true
    }

    /// Drive the current attempt until it is finished
    pub async fn run_until_idle(&mut self) {
        while self.process_next().await {}
    }

    fn resolve_url(&self) -> String {
        if let Some(url) = &self.url_override {
            return url.clone();
        }
        let url = configured_download_url(self.config.as_ref(), &self.arch);
        tracing::debug!("Runtime download URL: {}", url);
        url
    }

    fn build_request(&self) -> UpdateRequest {
        UpdateRequest {
            url: self.resolve_url(),
            verification: VerificationPolicy::from_metadata(self.config.get(META_VERIFY).as_deref()),
            dest_dir: self.dest_dir.clone(),
            download_dir: self.download_dir.clone(),
        }
    }

    fn begin_download(&mut self) {
        let request = self.build_request();

        if request.url.is_empty() {
            if self.presentation.is_foreground() {
                self.redirect_to_store();
            } else {
                tracing::error!("No runtime download URL configured");
                self.finish(UpdateOutcome::Failed(UpdateError::Configuration(
                    "download URL is not configured".to_string(),
                )));
            }
            return;
        }

        // Leave Idle before anything asynchronous starts
        self.state = UpdateState::Downloading;
        self.next_session += 1;
        let mut session = DownloadSession::new(self.next_session, self.transport.clone());
        session.start(&request, self.report_tx.clone());
        self.session = Some(session);
        self.request = Some(request);
    }

    fn redirect_to_store(&mut self) {
        match self.presentation.open_store() {
            Some(Ok(uri)) => {
                tracing::info!("Store opened: {}", uri);
                self.presentation.dismiss();
                self.state = UpdateState::Idle;
            }
            Some(Err(e)) => panic!("Store open failed: {}", e),
            None => {
                self.finish(UpdateOutcome::Failed(UpdateError::Configuration(
                    "no store available in background mode".to_string(),
                )));
            }
        }
    }

    fn on_action(&mut self, report: ActionReport) {
        if report.attempt != self.attempt {
            tracing::debug!(
                "Dropping {:?} from finished attempt {}",
                report.action,
                report.attempt
            );
            return;
        }

        match (report.action, &self.state) {
            (UserAction::Accept, UpdateState::AwaitingUserDecision) => self.begin_download(),
            (UserAction::Decline, UpdateState::AwaitingUserDecision) => {
                tracing::debug!("Update declined");
                self.finish(UpdateOutcome::Cancelled);
            }
            (UserAction::CancelDownload, UpdateState::Downloading) => {
                if let Some(session) = &self.session {
                    session.cancel();
                }
            }
            (action, state) => tracing::debug!("Ignoring {:?} in {:?}", action, state),
        }
    }

    fn on_report(&mut self, report: SessionReport) {
        let Some(session) = self.session.as_mut() else {
            tracing::debug!("No session, dropping {:?}", report);
            return;
        };
        let outcomes = session.accept(report);
        for outcome in outcomes {
            self.on_download(outcome);
        }
    }

    fn on_download(&mut self, outcome: DownloadOutcome) {
        if !self.is_downloading() {
            tracing::debug!("Not downloading, dropping {:?}", outcome);
            return;
        }

        match outcome {
            DownloadOutcome::Started => self.dispatch(UpdateEvent::Started),
            DownloadOutcome::ProgressUpdate(percent) => self.dispatch(UpdateEvent::Progress(percent)),
            DownloadOutcome::Cancelled => {
                self.session = None;
                self.finish(UpdateOutcome::Cancelled);
            }
            DownloadOutcome::Failed { status, error } => {
                self.session = None;
                let err = UpdateError::Transport {
                    status,
                    code: error,
                };
                if self.presentation.is_foreground() {
                    self.offer_retry(err);
                } else {
                    self.finish(UpdateOutcome::Failed(err));
                }
            }
            DownloadOutcome::Completed(path) => {
                self.session = None;
                if self.presentation.is_foreground() {
                    self.hand_off(path);
                } else {
                    self.artifact = Some(path);
                    self.start_verify();
                }
            }
        }
    }

    /// Foreground failure: show the error view and wait for retry/cancel
    fn offer_retry(&mut self, err: UpdateError) {
        tracing::warn!("Runtime download failed: {}", err);
        self.state = UpdateState::AwaitingUserDecision;
        self.dispatch(UpdateEvent::Failed(err));
    }

    fn hand_off(&mut self, path: PathBuf) {
        match self.presentation.hand_off_install(&path) {
            Ok(()) => self.finish(UpdateOutcome::Completed),
            Err(e) => self.offer_retry(UpdateError::Installation(e.to_string())),
        }
    }

    fn start_verify(&mut self) {
        let Some(path) = self.artifact.clone() else {
            self.finish(UpdateOutcome::Failed(UpdateError::InvalidArtifact(
                "no artifact".to_string(),
            )));
            return;
        };

        let verification = self
            .request
            .as_ref()
            .map_or(VerificationPolicy::Enabled, |r| r.verification);
        if !verification.is_enabled() {
            tracing::info!("Artifact verification disabled");
            self.start_install();
            return;
        }

        self.state = UpdateState::Verifying;
        let identities = self.identities.clone();
        let tx = self.work_tx.clone();
        tokio::task::spawn_blocking(move || {
            let result = ArtifactVerifier::new(identities.as_ref()).verify(&path);
            let _ = tx.send(WorkResult::Verified(result));
        });
    }

    fn start_install(&mut self) {
        let Some(path) = self.artifact.clone() else {
            self.finish(UpdateOutcome::Failed(UpdateError::InvalidArtifact(
                "no artifact".to_string(),
            )));
            return;
        };

        self.state = UpdateState::Installing;
        let dest = self
            .request
            .as_ref()
            .map_or_else(|| self.dest_dir.clone(), |r| r.dest_dir.clone());
        tracing::debug!("Runtime extract dir: {:?}", dest);
        let archive = self.archive.clone();
        let tx = self.work_tx.clone();
        tokio::task::spawn_blocking(move || {
            let result = ArtifactInstaller::new(archive.as_ref()).install(&path, &dest);
            let _ = tx.send(WorkResult::Installed(result));
        });
    }

    fn on_work(&mut self, result: WorkResult) {
        match (result, &self.state) {
            (WorkResult::Verified(verification), UpdateState::Verifying) => {
                if verification.passed {
                    self.start_install();
                } else {
                    self.delete_artifact();
                    self.finish(UpdateOutcome::Failed(UpdateError::InvalidArtifact(
                        verification.reason,
                    )));
                }
            }
            (WorkResult::Installed(result), UpdateState::Installing) => {
                self.delete_artifact();
                match result {
                    Ok(()) => self.finish(UpdateOutcome::Completed),
                    Err(e) => self.finish(UpdateOutcome::Failed(e)),
                }
            }
            (result, state) => tracing::debug!("Ignoring {:?} in {:?}", result, state),
        }
    }

    fn delete_artifact(&mut self) {
        let Some(path) = self.artifact.take() else {
            return;
        };
        match std::fs::remove_file(&path) {
            Ok(()) => tracing::debug!("Removed artifact {:?}", path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::error!("Could not remove artifact {:?}: {}", path, e),
        }
    }

    fn dispatch(&mut self, event: UpdateEvent) {
        let actions = self.user_actions();
        self.presentation
            .present(&event, &actions, self.listener.as_mut());
    }

    /// Enter Terminal, report, then return to Idle
    fn finish(&mut self, outcome: UpdateOutcome) {
        match &outcome {
            UpdateOutcome::Completed => tracing::info!("Runtime update completed"),
            UpdateOutcome::Cancelled => tracing::info!("Runtime update cancelled"),
            UpdateOutcome::Failed(e) => tracing::error!("Runtime update failed: {}", e),
        }

        self.state = UpdateState::Terminal(outcome.clone());
        self.session = None;
        self.request = None;

        let event = UpdateEvent::from(outcome.clone());
        if self.presentation.is_foreground() && matches!(event, UpdateEvent::Failed(_)) {
            self.presentation.dismiss();
        } else {
            self.dispatch(event);
        }

        self.last_outcome = Some(outcome);
        self.state = UpdateState::Idle;
    }
}

/// Wires collaborators into an `UpdateCoordinator`
pub struct CoordinatorBuilder {
    dest_dir: PathBuf,
    download_dir: PathBuf,
    arch: String,
    config: Option<Arc<dyn ConfigurationSource>>,
    status: Option<Arc<dyn RuntimeStatusProvider>>,
    transport: Option<Arc<dyn DownloadTransport>>,
    identities: Option<Arc<dyn IdentityProvider>>,
    archive: Option<Arc<dyn ArchiveProbe>>,
    foreground: Option<(Box<dyn DialogSurface>, Box<dyn Platform>)>,
    listener: Option<Box<dyn UpdateListener>>,
}

impl CoordinatorBuilder {
    pub fn new(dest_dir: PathBuf, download_dir: PathBuf) -> Self {
        Self {
            dest_dir,
            download_dir,
            arch: store::current_abi().to_string(),
            config: None,
            status: None,
            transport: None,
            identities: None,
            archive: None,
            foreground: None,
            listener: None,
        }
    }

    /// Builder wired from a config file and layout
    pub fn from_config(config: &UpdaterConfig, layout: &RuntimeLayout) -> Result<Self, ConfigError> {
        let identities = SignedArchiveIdentity::from_hex(&config.trusted_signers)
            .map_err(|e| ConfigError::InvalidSigner(e.to_string()))?;
        let runtime_dir = layout.runtime_dir();
        let status = MarkerStatusProvider::new(&runtime_dir, config.expected_version.clone());

        Ok(Self::new(runtime_dir, layout.downloads_dir())
            .config(Arc::new(config.source()))
            .status_provider(Arc::new(status))
            .identities(Arc::new(identities)))
    }

    /// Architecture reported in the download query
    pub fn arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = arch.into();
        self
    }

    pub fn config(mut self, config: Arc<dyn ConfigurationSource>) -> Self {
        self.config = Some(config);
        self
    }

    pub fn status_provider(mut self, status: Arc<dyn RuntimeStatusProvider>) -> Self {
        self.status = Some(status);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn DownloadTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn identities(mut self, identities: Arc<dyn IdentityProvider>) -> Self {
        self.identities = Some(identities);
        self
    }

    pub fn archive(mut self, archive: Arc<dyn ArchiveProbe>) -> Self {
        self.archive = Some(archive);
        self
    }

    /// Interactive mode with dialogs; without this the coordinator runs silently
    pub fn foreground(
        mut self,
        dialogs: impl DialogSurface + 'static,
        platform: impl Platform + 'static,
    ) -> Self {
        self.foreground = Some((Box::new(dialogs), Box::new(platform)));
        self
    }

    pub fn listener(mut self, listener: impl UpdateListener + 'static) -> Self {
        self.listener = Some(Box::new(listener));
        self
    }

    pub fn build(self) -> Result<UpdateCoordinator, ConfigError> {
        let listener = self.listener.ok_or(ConfigError::MissingListener)?;

        let presentation = match self.foreground {
            Some((dialogs, platform)) => PresentationAdapter::Foreground { dialogs, platform },
            None => PresentationAdapter::Background,
        };

        let status = self.status.unwrap_or_else(|| {
            Arc::new(MarkerStatusProvider::new(&self.dest_dir, None)) as Arc<dyn RuntimeStatusProvider>
        });

        let (report_tx, report_rx) = mpsc::unbounded_channel();
        let (action_tx, action_rx) = mpsc::unbounded_channel();
        let (work_tx, work_rx) = mpsc::unbounded_channel();

        Ok(UpdateCoordinator {
            state: UpdateState::Idle,
            last_outcome: None,
            config: self
                .config
                .unwrap_or_else(|| Arc::new(HashMap::<String, String>::new())),
            status,
            transport: self
                .transport
                .unwrap_or_else(|| Arc::new(HttpTransport::new())),
            identities: self
                .identities
                .unwrap_or_else(|| Arc::new(SignedArchiveIdentity::default())),
            archive: self.archive.unwrap_or_else(|| Arc::new(ZipArchiveProbe)),
            presentation,
            listener,
            dest_dir: self.dest_dir,
            download_dir: self.download_dir,
            arch: self.arch,
            url_override: None,
            request: None,
            session: None,
            artifact: None,
            next_session: 0,
            attempt: 0,
            report_tx,
            report_rx,
            action_tx,
            action_rx,
            work_tx,
            work_rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::updater::status::RuntimeStatus;
    use crate::engine::updater::download::{DownloadHandle, OutcomeSink};
    use std::sync::Mutex;

    /// Transport that only records calls; tests push reports by hand
    #[derive(Default)]
    struct ManualTransport {
        sinks: Mutex<Vec<OutcomeSink>>,
    }

    impl DownloadTransport for ManualTransport {
        fn start_download(&self, _request: &UpdateRequest, sink: OutcomeSink) -> DownloadHandle {
            let handle = DownloadHandle(sink.session());
            self.sinks.lock().unwrap().push(sink);
            handle
        }

        fn cancel(&self, _handle: &DownloadHandle) -> bool {
            if let Some(sink) = self.sinks.lock().unwrap().last() {
                sink.cancelled();
            }
            true
        }
    }

    fn coordinator(
        status: RuntimeStatus,
        transport: Arc<ManualTransport>,
        events: mpsc::UnboundedSender<UpdateEvent>,
    ) -> UpdateCoordinator {
        let metadata: HashMap<String, String> = [(
            crate::engine::config::META_DOWNLOAD_URL.to_string(),
            "http://localhost/runtime.pkg".to_string(),
        )]
        .into_iter()
        .collect();
        UpdateCoordinator::builder(PathBuf::from("dest"), PathBuf::from("dl"))
            .config(Arc::new(metadata))
            .status_provider(Arc::new(move || status))
            .transport(transport)
            .listener(events)
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_requires_listener() {
        let result = UpdateCoordinator::builder(PathBuf::from("d"), PathBuf::from("dl")).build();
        assert!(matches!(result, Err(ConfigError::MissingListener)));
    }

    #[tokio::test]
    async fn test_no_update_needed_statuses() {
        for status in [RuntimeStatus::Matched, RuntimeStatus::PendingFirstUse] {
            let transport = Arc::new(ManualTransport::default());
            let (tx, _rx) = mpsc::unbounded_channel();
            let mut c = coordinator(status, transport.clone(), tx);
            assert!(!c.attempt_update());
            assert!(c.is_idle());
            assert!(transport.sinks.lock().unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_single_flight() {
        let transport = Arc::new(ManualTransport::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut c = coordinator(RuntimeStatus::Absent, transport.clone(), tx);

        assert!(c.attempt_update());
        assert!(c.is_downloading());
        assert!(!c.attempt_update());
        assert!(c.is_downloading());
        assert_eq!(transport.sinks.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_background_download() {
        let transport = Arc::new(ManualTransport::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut c = coordinator(RuntimeStatus::VersionMismatch, transport.clone(), tx);

        assert!(!c.cancel_background_update());
        assert!(c.attempt_update());
        transport.sinks.lock().unwrap()[0].started();
        assert!(c.cancel_background_update());
        c.run_until_idle().await;

        assert_eq!(rx.recv().await, Some(UpdateEvent::Started));
        assert_eq!(rx.recv().await, Some(UpdateEvent::Cancelled));
        assert_eq!(c.last_outcome(), Some(&UpdateOutcome::Cancelled));
        assert!(!c.cancel_background_update());
    }

    #[tokio::test]
    async fn test_override_url_is_used() {
        let transport = Arc::new(ManualTransport::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut c = coordinator(RuntimeStatus::Absent, transport, tx);
        c.set_download_url_override("http://mirror/runtime.pkg");
        assert_eq!(c.build_request().url, "http://mirror/runtime.pkg");

        c.url_override = None;
        assert!(c.build_request().url.starts_with("http://localhost/runtime.pkg?arch="));
        assert_eq!(c.build_request().verification, VerificationPolicy::Enabled);
    }
}
