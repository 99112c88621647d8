#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use sonic_rs::JsonValueTrait;
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use ws_ramp::{Config, CredentialIssuer, Session, Stats};

/// How the fake target treats each incoming connection.
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    /// Accept every handshake, then stay silent until the client leaves.
    AcceptAll,
    /// Reply to every handshake with an error field.
    RejectAll,
    /// Accept the first `n` connections, drop the TCP stream of the rest
    /// before the websocket upgrade.
    AcceptFirst(usize),
    /// Accept the handshake, then send a close frame.
    CloseAfterHandshake,
    /// Accept the handshake, then drop the socket without a close frame.
    DropAfterHandshake,
    /// Upgrade the connection but never answer the handshake.
    Silent,
}

pub struct FakeTarget {
    pub url: String,
    accepted: Arc<AtomicUsize>,
}

impl FakeTarget {
    pub async fn start(behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let url = format!("ws://127.0.0.1:{}/connection/websocket", addr.port());
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&accepted);

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let seen = counter.fetch_add(1, Ordering::SeqCst);
                if let Behavior::AcceptFirst(limit) = behavior {
                    if seen >= limit {
                        drop(stream);
                        continue;
                    }
                }

                tokio::spawn(async move {
                    let Ok(mut ws) = accept_async(stream).await else {
                        return;
                    };

                    let Some(Ok(Message::Text(request))) = ws.next().await else {
                        return;
                    };
                    let request: sonic_rs::Value = sonic_rs::from_str(&request).unwrap();
                    let id = request.get("id").and_then(|v| v.as_u64()).unwrap_or(0);

                    let reply = match behavior {
                        Behavior::Silent => {
                            while let Some(Ok(_)) = ws.next().await {}
                            return;
                        }
                        Behavior::RejectAll => format!(
                            r#"{{"id":{},"error":{{"code":109,"message":"token expired"}}}}"#,
                            id
                        ),
                        _ => format!(r#"{{"id":{},"connect":{{"client":"c-{}"}}}}"#, id, id),
                    };
                    if ws.send(Message::Text(reply)).await.is_err() {
                        return;
                    }

                    match behavior {
                        Behavior::CloseAfterHandshake => {
                            let _ = ws.close(None).await;
                        }
                        Behavior::DropAfterHandshake => drop(ws),
                        _ => while let Some(Ok(_)) = ws.next().await {},
                    }
                });
            }
        });

        Self { url, accepted }
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

/// A url nothing listens on.
pub async fn refused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("ws://127.0.0.1:{}/connection/websocket", port)
}

pub fn session(url: &str, extra: &[&str]) -> (Session, CredentialIssuer) {
    let mut argv = vec![
        "ws-ramp",
        "--target-url",
        url,
        "--jwt-secret",
        "test-secret",
        "--report-interval-ms",
        "0",
    ];
    argv.extend_from_slice(extra);
    Config::try_parse_from(argv).unwrap().validate().unwrap()
}

/// Polls until `check` holds or the timeout expires.
pub async fn wait_for(stats: &Stats, timeout: Duration, check: impl Fn(&ws_ramp::Snapshot) -> bool) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check(&stats.snapshot()) {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not met within {:?}: {:?}", timeout, stats.snapshot());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
