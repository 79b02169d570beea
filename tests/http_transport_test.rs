mod common;

use common::*;
use runtime_updater::engine::updater::download::{
    DownloadOutcome, DownloadTransport, HttpTransport, OutcomeSink, SessionReport,
    ERROR_UNHANDLED_HTTP_CODE,
};
use runtime_updater::engine::updater::status::RuntimeStatus;
use runtime_updater::engine::updater::{
    UpdateCoordinator, UpdateOutcome, UpdateRequest, VerificationPolicy,
};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Serve `status` with `body` to every connection
async fn serve(status: &'static str, body: Vec<u8>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let body = body.clone();
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let head = format!(
                    "HTTP/1.1 {}\r\nContent-Length: {}\r\nContent-Type: application/octet-stream\r\nConnection: close\r\n\r\n",
                    status,
                    body.len()
                );
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(&body).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

/// Serve `body` with a 200 in small chunks, pausing between them
async fn serve_slowly(body: Vec<u8>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        let mut buf = [0u8; 1024];
        let _ = socket.read(&mut buf).await;
        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        if socket.write_all(head.as_bytes()).await.is_err() {
            return;
        }
        for chunk in body.chunks(16 * 1024) {
            if socket.write_all(chunk).await.is_err() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    });

    addr
}

fn request(url: String, download_dir: &Path) -> UpdateRequest {
    UpdateRequest {
        url,
        verification: VerificationPolicy::Enabled,
        dest_dir: download_dir.join("runtime"),
        download_dir: download_dir.to_path_buf(),
    }
}

/// Collect reports until the first terminal outcome
async fn collect(rx: &mut mpsc::UnboundedReceiver<SessionReport>) -> Vec<DownloadOutcome> {
    let mut outcomes = Vec::new();
    while let Some(report) = rx.recv().await {
        assert_eq!(report.session, 1);
        let terminal = report.outcome.is_terminal();
        outcomes.push(report.outcome);
        if terminal {
            break;
        }
    }
    outcomes
}

#[tokio::test]
async fn test_download_completes_with_identical_bytes() {
    let body: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();
    let addr = serve("200 OK", body.clone()).await;
    let dir = tempfile::tempdir().unwrap();

    let transport = HttpTransport::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    transport.start_download(
        &request(format!("http://{}/runtime.pkg", addr), dir.path()),
        OutcomeSink::new(1, tx),
    );
    let outcomes = collect(&mut rx).await;

    assert_eq!(outcomes.first(), Some(&DownloadOutcome::Started));
    let Some(DownloadOutcome::Completed(path)) = outcomes.last() else {
        panic!("download did not complete: {:?}", outcomes);
    };
    assert_eq!(std::fs::read(path).unwrap(), body);

    let percents: Vec<u8> = outcomes
        .iter()
        .filter_map(|o| match o {
            DownloadOutcome::ProgressUpdate(p) => Some(*p),
            _ => None,
        })
        .collect();
    assert!(percents.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(percents.last(), Some(&100));

    // No partial files left next to the artifact
    let leftovers = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().map_or(false, |x| x == "partial"))
        .count();
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn test_not_found_is_reported() {
    let addr = serve("404 Not Found", Vec::new()).await;
    let dir = tempfile::tempdir().unwrap();

    let transport = HttpTransport::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    transport.start_download(
        &request(format!("http://{}/missing.pkg", addr), dir.path()),
        OutcomeSink::new(1, tx),
    );
    let outcomes = collect(&mut rx).await;

    assert_eq!(
        outcomes,
        vec![
            DownloadOutcome::Started,
            DownloadOutcome::Failed {
                status: 404,
                error: ERROR_UNHANDLED_HTTP_CODE
            },
        ]
    );
}

#[tokio::test]
async fn test_cancel_mid_stream_removes_partial_file() {
    let addr = serve_slowly(vec![0x5a; 1024 * 1024]).await;
    let dir = tempfile::tempdir().unwrap();

    let transport = HttpTransport::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = transport.start_download(
        &request(format!("http://{}/runtime.pkg", addr), dir.path()),
        OutcomeSink::new(1, tx),
    );

    // Wait for the body to start flowing
    loop {
        let report = rx.recv().await.unwrap();
        assert!(!report.outcome.is_terminal(), "finished early: {:?}", report);
        if matches!(report.outcome, DownloadOutcome::ProgressUpdate(_)) {
            break;
        }
    }

    assert!(transport.cancel(&handle));
    let outcomes = collect(&mut rx).await;
    assert_eq!(outcomes.last(), Some(&DownloadOutcome::Cancelled));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_end_to_end_update_over_http() {
    let root = tempfile::tempdir().unwrap();
    let source = root.path().join("source.pkg");
    pack_runtime(&source, 7);
    let addr = serve("200 OK", std::fs::read(&source).unwrap()).await;

    let dest = root.path().join("runtime");
    let downloads = root.path().join("downloads");
    let (tx, _rx) = mpsc::unbounded_channel();
    let mut coordinator = UpdateCoordinator::builder(dest.clone(), downloads.clone())
        .config(Arc::new(metadata(&format!("http://{}/runtime.pkg", addr), None)))
        .status_provider(Arc::new(|| RuntimeStatus::Absent))
        .identities(Arc::new(CountingIdentity::trusting(&[7])))
        .listener(tx)
        .build()
        .unwrap();

    assert!(coordinator.attempt_update());
    coordinator.run_until_idle().await;

    assert_eq!(coordinator.last_outcome(), Some(&UpdateOutcome::Completed));
    assert!(dest.join("libruntime.so").exists());
    assert_eq!(std::fs::read_dir(&downloads).unwrap().count(), 0);
}
