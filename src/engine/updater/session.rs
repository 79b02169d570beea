//! Download Session
//!
//! Control-side view of one transfer. The session normalizes whatever the
//! transport reports into a strictly ordered stream: `Started`, then
//! non-decreasing progress, then exactly one terminal outcome.

use super::download::{
    DownloadHandle, DownloadOutcome, DownloadTransport, OutcomeSink, SessionId, SessionReport,
};
use super::state::UpdateRequest;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    NotStarted,
    Started,
    Terminal,
}

pub struct DownloadSession {
    id: SessionId,
    transport: Arc<dyn DownloadTransport>,
    handle: Option<DownloadHandle>,
    phase: SessionPhase,
    /// Highest percentage delivered so far
    progress: Option<u8>,
}

impl DownloadSession {
    pub fn new(id: SessionId, transport: Arc<dyn DownloadTransport>) -> Self {
        Self {
            id,
            transport,
            handle: None,
            phase: SessionPhase::NotStarted,
            progress: None,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// True while a transfer may still report
    pub fn is_active(&self) -> bool {
        self.handle.is_some() && self.phase != SessionPhase::Terminal
    }

    /// Ask the transport to begin; reports arrive on `reports`
    pub fn start(
        &mut self,
        request: &UpdateRequest,
        reports: mpsc::UnboundedSender<SessionReport>,
    ) -> DownloadHandle {
        tracing::debug!("Session {} downloading {}", self.id, request.url);
        let handle = self
            .transport
            .start_download(request, OutcomeSink::new(self.id, reports));
        self.handle = Some(handle);
        handle
    }

    /// Request cooperative cancellation; false when nothing is running
    pub fn cancel(&self) -> bool {
        match &self.handle {
            Some(handle) if self.phase != SessionPhase::Terminal => self.transport.cancel(handle),
            _ => false,
        }
    }

    /// Normalize one raw report into the outcomes to act on.
    ///
    /// Reports from other sessions and anything after the first terminal
    /// outcome are dropped. A missing `Started` is synthesized; progress is
    /// clamped to 100 and lower values than already seen are dropped.
    pub fn accept(&mut self, report: SessionReport) -> Vec<DownloadOutcome> {
        if report.session != self.id {
            tracing::debug!("Dropping report from stale session {}", report.session);
            return Vec::new();
        }
        if self.phase == SessionPhase::Terminal {
            tracing::debug!("Session {} already finished, dropping {:?}", self.id, report.outcome);
            return Vec::new();
        }

        let mut out = Vec::with_capacity(2);
        if self.phase == SessionPhase::NotStarted {
            self.phase = SessionPhase::Started;
            out.push(DownloadOutcome::Started);
        }

        match report.outcome {
            DownloadOutcome::Started => {}
            DownloadOutcome::ProgressUpdate(percent) => {
                let percent = percent.min(100);
                if self.progress.map_or(true, |last| percent > last) {
                    self.progress = Some(percent);
                    out.push(DownloadOutcome::ProgressUpdate(percent));
                }
            }
            terminal => {
                self.phase = SessionPhase::Terminal;
                out.push(terminal);
            }
        }
        out
    }
}
