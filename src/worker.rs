//! One simulated client: connect, authenticate, idle, close.
//!
//! A worker never fails outward. Every exit path is folded into a
//! [`WorkerExit`] and the matching counter updates on [`Stats`]. The
//! counter teardown lives in a drop guard, so it also runs when the task is
//! aborted or unwinds.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::Session;
use crate::credential::{subject_for, CredentialIssuer};
use crate::error::{CredentialError, WorkerError};
use crate::stats::Stats;
use crate::transport::{Connection, Inbound};

/// Failures logged at warn level before the rest drop to debug.
const NOISY_FAILURES: u64 = 3;

#[derive(Debug, Serialize)]
struct HandshakeRequest<'a> {
    id: usize,
    connect: ConnectParams<'a>,
}

#[derive(Debug, Serialize)]
struct ConnectParams<'a> {
    token: &'a str,
}

#[derive(Debug, Deserialize)]
struct HandshakeReply {
    #[serde(default)]
    error: Option<sonic_rs::Value>,
}

/// How a worker left its lifecycle.
#[derive(Debug)]
pub enum WorkerExit {
    PeerClosed,
    Cancelled,
    Failed(WorkerError),
}

/// Coarse exit classification used for tallies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ExitKind {
    PeerClosed,
    Cancelled,
    ConnectFailed,
    CredentialFailed,
    AuthRejected,
    HandshakeTimeout,
    ClosedDuringHandshake,
    TransportFailed,
    IdleTimeout,
    Aborted,
    Panicked,
}

impl ExitKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ExitKind::PeerClosed => "peer closed",
            ExitKind::Cancelled => "cancelled",
            ExitKind::ConnectFailed => "connect failed",
            ExitKind::CredentialFailed => "credential failed",
            ExitKind::AuthRejected => "auth rejected",
            ExitKind::HandshakeTimeout => "handshake timeout",
            ExitKind::ClosedDuringHandshake => "closed during handshake",
            ExitKind::TransportFailed => "transport failed",
            ExitKind::IdleTimeout => "idle timeout",
            ExitKind::Aborted => "aborted",
            ExitKind::Panicked => "panicked",
        }
    }
}

impl fmt::Display for ExitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl WorkerExit {
    pub fn kind(&self) -> ExitKind {
        match self {
            WorkerExit::PeerClosed => ExitKind::PeerClosed,
            WorkerExit::Cancelled => ExitKind::Cancelled,
            WorkerExit::Failed(err) => match err {
                WorkerError::Connect(_) => ExitKind::ConnectFailed,
                WorkerError::Credential(_) => ExitKind::CredentialFailed,
                WorkerError::AuthRejected { .. } => ExitKind::AuthRejected,
                WorkerError::HandshakeTimeout(_) => ExitKind::HandshakeTimeout,
                WorkerError::ClosedDuringHandshake => ExitKind::ClosedDuringHandshake,
                WorkerError::Transport(_) => ExitKind::TransportFailed,
                WorkerError::IdleTimeout(_) => ExitKind::IdleTimeout,
            },
        }
    }
}

/// Everything a worker shares with the rest of the run.
#[derive(Clone)]
pub struct WorkerContext {
    session: Arc<Session>,
    issuer: CredentialIssuer,
    stats: Stats,
    cancel: CancellationToken,
}

impl WorkerContext {
    /// Cancelling `cancel` ends every worker sharing this context.
    pub fn new(
        session: Arc<Session>,
        issuer: CredentialIssuer,
        stats: Stats,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session,
            issuer,
            stats,
            cancel,
        }
    }
}

/// Owns the worker's contribution to the shared counters.
struct Lifecycle {
    stats: Stats,
    alive: bool,
    failed: bool,
}

impl Lifecycle {
    fn new(stats: Stats) -> Self {
        Self {
            stats,
            alive: false,
            failed: false,
        }
    }

    fn mark_alive(&mut self) {
        if !self.alive {
            self.alive = true;
            self.stats.increment_connected();
        }
    }

    fn mark_failed(&mut self) {
        if !self.failed {
            self.failed = true;
            self.stats.increment_errors();
        }
    }
}

impl Drop for Lifecycle {
    fn drop(&mut self) {
        if self.alive {
            self.stats.decrement_connected();
        }
        self.stats.increment_closed();
    }
}

/// Runs worker `id` to completion.
pub async fn run(id: usize, ctx: WorkerContext) -> WorkerExit {
    let mut lifecycle = Lifecycle::new(ctx.stats.clone());
    let exit = drive(id, &ctx, &mut lifecycle).await;

    match &exit {
        WorkerExit::Failed(err) => {
            lifecycle.mark_failed();
            if ctx.stats.snapshot().errors <= NOISY_FAILURES {
                warn!("Client {} failed: {}", id, err);
            } else {
                debug!("Client {} failed: {}", id, err);
            }
        }
        WorkerExit::PeerClosed => debug!("Client {} closed by peer", id),
        WorkerExit::Cancelled => trace!("Client {} cancelled", id),
    }

    drop(lifecycle);
    exit
}

async fn drive(id: usize, ctx: &WorkerContext, lifecycle: &mut Lifecycle) -> WorkerExit {
    let started = Instant::now();
    debug!("Client {} connecting to {}", id, ctx.session.url);

    let connected = tokio::select! {
        _ = ctx.cancel.cancelled() => None,
        res = Connection::connect(&ctx.session.url) => Some(res),
    };
    let mut conn = match connected {
        None => return WorkerExit::Cancelled,
        Some(Ok(conn)) => conn,
        Some(Err(e)) => return WorkerExit::Failed(WorkerError::Connect(e)),
    };

    let handshake = tokio::select! {
        _ = ctx.cancel.cancelled() => None,
        res = authenticate(id, ctx, &mut conn) => Some(res),
    };
    match handshake {
        None => {
            conn.close().await;
            return WorkerExit::Cancelled;
        }
        Some(Err(e)) => {
            conn.close().await;
            return WorkerExit::Failed(e);
        }
        Some(Ok(())) => {}
    }

    ctx.stats.record_handshake(started.elapsed()).await;
    lifecycle.mark_alive();
    debug!("Client {} authenticated", id);

    let exit = loop {
        let next = tokio::select! {
            _ = ctx.cancel.cancelled() => None,
            res = next_inbound(&mut conn, ctx.session.idle_timeout) => Some(res),
        };
        match next {
            None => break WorkerExit::Cancelled,
            Some(Ok(Inbound::Message(_))) => continue,
            Some(Ok(Inbound::Closed)) => return WorkerExit::PeerClosed,
            Some(Err(e)) => break WorkerExit::Failed(e),
        }
    };

    conn.close().await;
    exit
}

async fn authenticate(
    id: usize,
    ctx: &WorkerContext,
    conn: &mut Connection,
) -> Result<(), WorkerError> {
    let credential = ctx.issuer.issue(&subject_for(id))?;
    let request = HandshakeRequest {
        id,
        connect: ConnectParams {
            token: credential.as_str(),
        },
    };
    let payload = sonic_rs::to_string(&request).map_err(CredentialError::from)?;
    drop(credential);

    conn.send(payload).await.map_err(WorkerError::Transport)?;

    let received = match ctx.session.handshake_timeout {
        Some(limit) => timeout(limit, conn.receive())
            .await
            .map_err(|_| WorkerError::HandshakeTimeout(limit))?,
        None => conn.receive().await,
    };
    let reply = match received {
        Err(e) => return Err(WorkerError::Transport(e)),
        Ok(Inbound::Closed) => return Err(WorkerError::ClosedDuringHandshake),
        Ok(Inbound::Message(text)) => text,
    };

    match rejection_reason(&reply) {
        Some(reason) => Err(WorkerError::AuthRejected { reason }),
        None => Ok(()),
    }
}

/// Returns the rejection reason if the handshake reply carries an error
/// marker: a non-null `error` field, or the word `error` in a non-JSON reply.
fn rejection_reason(reply: &str) -> Option<String> {
    match sonic_rs::from_str::<HandshakeReply>(reply) {
        Ok(parsed) => parsed
            .error
            .map(|err| sonic_rs::to_string(&err).unwrap_or_else(|_| reply.to_string())),
        Err(_) if reply.contains("error") => Some(reply.to_string()),
        Err(_) => None,
    }
}

async fn next_inbound(
    conn: &mut Connection,
    idle_timeout: Option<Duration>,
) -> Result<Inbound, WorkerError> {
    match idle_timeout {
        Some(limit) => match timeout(limit, conn.receive()).await {
            Ok(res) => res.map_err(WorkerError::Transport),
            Err(_) => Err(WorkerError::IdleTimeout(limit)),
        },
        None => conn.receive().await.map_err(WorkerError::Transport),
    }
}
