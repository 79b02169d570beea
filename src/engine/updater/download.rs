//! Download Transport
//!
//! Moves the artifact from the network to local storage, reporting
//! progress and exactly one terminal outcome through an `OutcomeSink`.

use super::state::UpdateRequest;
use futures_util::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, watch};

/// Unknown transport failure
pub const ERROR_UNKNOWN: u32 = 1000;
/// Local storage could not be written
pub const ERROR_FILE_ERROR: u32 = 1001;
/// Server answered with a non-success status
pub const ERROR_UNHANDLED_HTTP_CODE: u32 = 1002;
/// Connection broke or the body could not be read
pub const ERROR_HTTP_DATA_ERROR: u32 = 1004;

/// Identifies one download session
pub type SessionId = u64;

/// What a transfer reports, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Started,
    ProgressUpdate(u8),
    Cancelled,
    Failed { status: u16, error: u32 },
    Completed(PathBuf),
}

impl DownloadOutcome {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Cancelled | Self::Failed { .. } | Self::Completed(_)
        )
    }
}

/// Outcome tagged with the session that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub session: SessionId,
    pub outcome: DownloadOutcome,
}

/// Handle for cancelling a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DownloadHandle(pub SessionId);

/// Worker side of a session's report channel
#[derive(Debug, Clone)]
pub struct OutcomeSink {
    session: SessionId,
    tx: mpsc::UnboundedSender<SessionReport>,
}

impl OutcomeSink {
    pub fn new(session: SessionId, tx: mpsc::UnboundedSender<SessionReport>) -> Self {
        Self { session, tx }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    fn send(&self, outcome: DownloadOutcome) {
        // Receiver gone means the coordinator was dropped; nothing left to tell
        let _ = self.tx.send(SessionReport {
            session: self.session,
            outcome,
        });
    }

    pub fn started(&self) {
        self.send(DownloadOutcome::Started);
    }

    pub fn progress(&self, percentage: u8) {
        self.send(DownloadOutcome::ProgressUpdate(percentage));
    }

    pub fn cancelled(&self) {
        self.send(DownloadOutcome::Cancelled);
    }

    pub fn failed(&self, status: u16, error: u32) {
        self.send(DownloadOutcome::Failed { status, error });
    }

    pub fn completed(&self, artifact: PathBuf) {
        self.send(DownloadOutcome::Completed(artifact));
    }
}

/// Cancellable transfer capability
pub trait DownloadTransport: Send + Sync {
    /// Begin an asynchronous transfer; outcomes go to `sink`
    fn start_download(&self, request: &UpdateRequest, sink: OutcomeSink) -> DownloadHandle;

    /// Ask the transfer to stop; false when it is not running
    fn cancel(&self, handle: &DownloadHandle) -> bool;
}

struct ActiveDownload {
    handle: DownloadHandle,
    cancel: watch::Sender<bool>,
}

/// Streaming HTTP transport
pub struct HttpTransport {
    client: reqwest::Client,
    active: Mutex<Option<ActiveDownload>>,
}

impl HttpTransport {
    /// Create a new transport
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .user_agent("Runtime-Updater")
            .build()
            .unwrap_or_default();
        Self {
            client,
            active: Mutex::new(None),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl DownloadTransport for HttpTransport {
    fn start_download(&self, request: &UpdateRequest, sink: OutcomeSink) -> DownloadHandle {
        let handle = DownloadHandle(sink.session());
        let (cancel_tx, cancel_rx) = watch::channel(false);

        if let Ok(mut active) = self.active.lock() {
            *active = Some(ActiveDownload {
                handle,
                cancel: cancel_tx,
            });
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::error!("HTTP download started outside of a tokio runtime");
            sink.started();
            sink.failed(0, ERROR_UNKNOWN);
            return handle;
        };

        let client = self.client.clone();
        let url = request.url.clone();
        let download_dir = request.download_dir.clone();
        runtime.spawn(async move {
            run_download(client, url, download_dir, sink, cancel_rx).await;
        });

        handle
    }

    fn cancel(&self, handle: &DownloadHandle) -> bool {
        let Ok(active) = self.active.lock() else {
            return false;
        };
        match active.as_ref() {
            // Send fails once the download task has finished and dropped its receiver
            Some(download) if download.handle == *handle => download.cancel.send(true).is_ok(),
            _ => false,
        }
    }
}

/// Resolves once cancellation was requested; never resolves otherwise
async fn cancellation(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

enum Transfer {
    Done(u64),
    Cancelled,
    Failed { status: u16, error: u32 },
}

async fn run_download(
    client: reqwest::Client,
    url: String,
    download_dir: PathBuf,
    sink: OutcomeSink,
    mut cancel_rx: watch::Receiver<bool>,
) {
    sink.started();

    let name = format!("runtime-{}", uuid::Uuid::new_v4());
    let partial_path = download_dir.join(format!("{}.partial", name));
    let final_path = download_dir.join(format!("{}.pkg", name));

    let result = transfer(&client, &url, &partial_path, &sink, &mut cancel_rx).await;

    match result {
        Transfer::Done(bytes) => {
            // From here on the artifact is fully written; a late cancel loses
            if let Err(e) = tokio::fs::rename(&partial_path, &final_path).await {
                tracing::error!("Could not finalize download: {}", e);
                remove_partial(&partial_path).await;
                sink.failed(0, ERROR_FILE_ERROR);
                return;
            }
            tracing::info!("Downloaded {} bytes to {:?}", bytes, final_path);
            sink.completed(final_path);
        }
        Transfer::Cancelled => {
            tracing::info!("Download of {} cancelled", url);
            remove_partial(&partial_path).await;
            sink.cancelled();
        }
        Transfer::Failed { status, error } => {
            tracing::warn!("Download of {} failed (status {}, error {})", url, status, error);
            remove_partial(&partial_path).await;
            sink.failed(status, error);
        }
    }
}

async fn transfer(
    client: &reqwest::Client,
    url: &str,
    partial_path: &Path,
    sink: &OutcomeSink,
    cancel_rx: &mut watch::Receiver<bool>,
) -> Transfer {
    if let Some(parent) = partial_path.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            tracing::error!("Could not create download directory: {}", e);
            return Transfer::Failed {
                status: 0,
                error: ERROR_FILE_ERROR,
            };
        }
    }

    let response = tokio::select! {
        biased;
        _ = cancellation(cancel_rx) => return Transfer::Cancelled,
        response = client.get(url).send() => response,
    };
    let response = match response {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!("Request to {} failed: {}", url, e);
            return Transfer::Failed {
                status: e.status().map(|s| s.as_u16()).unwrap_or(0),
                error: ERROR_HTTP_DATA_ERROR,
            };
        }
    };

    let status = response.status();
    if !status.is_success() {
        return Transfer::Failed {
            status: status.as_u16(),
            error: ERROR_UNHANDLED_HTTP_CODE,
        };
    }

    let total_size = response.content_length().unwrap_or(0);
    let mut file = match tokio::fs::File::create(partial_path).await {
        Ok(file) => file,
        Err(e) => {
            tracing::error!("Could not create {:?}: {}", partial_path, e);
            return Transfer::Failed {
                status: status.as_u16(),
                error: ERROR_FILE_ERROR,
            };
        }
    };

    let mut downloaded: u64 = 0;
    let mut last_percent: Option<u8> = None;
    let mut stream = response.bytes_stream();

    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancellation(cancel_rx) => return Transfer::Cancelled,
            chunk = stream.next() => chunk,
        };

        let Some(chunk) = chunk else {
            break;
        };
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!("Body of {} broke off: {}", url, e);
                return Transfer::Failed {
                    status: status.as_u16(),
                    error: ERROR_HTTP_DATA_ERROR,
                };
            }
        };

        if let Err(e) = file.write_all(&chunk).await {
            tracing::error!("Write to {:?} failed: {}", partial_path, e);
            return Transfer::Failed {
                status: status.as_u16(),
                error: ERROR_FILE_ERROR,
            };
        }
        downloaded += chunk.len() as u64;

        if total_size > 0 {
            let percent = ((downloaded.saturating_mul(100)) / total_size).min(100) as u8;
            if last_percent != Some(percent) {
                last_percent = Some(percent);
                sink.progress(percent);
            }
        }
    }

    if let Err(e) = file.flush().await {
        tracing::error!("Flush of {:?} failed: {}", partial_path, e);
        return Transfer::Failed {
            status: status.as_u16(),
            error: ERROR_FILE_ERROR,
        };
    }

    Transfer::Done(downloaded)
}

async fn remove_partial(path: &Path) {
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        if let Err(e) = tokio::fs::remove_file(path).await {
            tracing::warn!("Could not remove partial download {:?}: {}", path, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_outcomes() {
        assert!(!DownloadOutcome::Started.is_terminal());
        assert!(!DownloadOutcome::ProgressUpdate(10).is_terminal());
        assert!(DownloadOutcome::Cancelled.is_terminal());
        assert!(DownloadOutcome::Failed { status: 404, error: 7 }.is_terminal());
        assert!(DownloadOutcome::Completed(PathBuf::from("a")).is_terminal());
    }

    #[tokio::test]
    async fn test_sink_tags_session() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = OutcomeSink::new(3, tx);
        sink.started();
        sink.progress(50);

        assert_eq!(
            rx.recv().await,
            Some(SessionReport {
                session: 3,
                outcome: DownloadOutcome::Started
            })
        );
        assert_eq!(rx.recv().await.unwrap().outcome, DownloadOutcome::ProgressUpdate(50));
    }

    #[test]
    fn test_cancel_unknown_handle() {
        let transport = HttpTransport::new();
        assert!(!transport.cancel(&DownloadHandle(1)));
    }
}
