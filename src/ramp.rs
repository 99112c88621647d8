//! Ramp controller: launch workers at a bounded rate, soak, shut down.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Session;
use crate::credential::CredentialIssuer;
use crate::reporter;
use crate::stats::{Snapshot, Stats};
use crate::summary::{ExitTally, RunSummary};
use crate::worker::{self, ExitKind, WorkerContext, WorkerExit};

const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(5);

pub struct RampController {
    session: Arc<Session>,
    issuer: CredentialIssuer,
    stats: Stats,
    stop: CancellationToken,
}

impl RampController {
    pub fn new(session: Session, issuer: CredentialIssuer, stats: Stats) -> Self {
        Self {
            session: Arc::new(session),
            issuer,
            stats,
            stop: CancellationToken::new(),
        }
    }

    /// Cancelling this token stops further launches and ends the soak early.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Runs the ramp and the soak. Workers are still running when this
    /// returns; hand the result to [`RampRun::shutdown`] to tear them down.
    pub async fn run(self) -> RampRun {
        let session = self.session;
        let stats = self.stats;
        let stop = self.stop;

        let workers_cancel = CancellationToken::new();
        let reporter_cancel = CancellationToken::new();

        stats.mark_start();
        let reporter = session
            .report_interval
            .map(|every| reporter::spawn(stats.clone(), every, reporter_cancel.clone()));

        let ctx = WorkerContext::new(
            Arc::clone(&session),
            self.issuer,
            stats.clone(),
            workers_cancel.clone(),
        );

        info!(
            "Ramping to {} connections at {}/s against {}",
            session.population, session.ramp_rate, session.url
        );

        let mut ticker = interval(session.launch_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut workers = JoinSet::new();
        let mut launched = 0;
        let mut interrupted = false;
        let mut last_log = Instant::now();

        for id in 0..session.population {
            let stopped = tokio::select! {
                biased;
                _ = stop.cancelled() => true,
                _ = ticker.tick() => false,
            };
            if stopped {
                interrupted = true;
                break;
            }

            workers.spawn(worker::run(id, ctx.clone()));
            launched += 1;

            if last_log.elapsed() >= PROGRESS_LOG_INTERVAL {
                let snapshot = stats.snapshot();
                info!(
                    "Ramp: launched={}, online={}, errors={}",
                    launched,
                    snapshot.connected,
                    snapshot.errors
                );
                last_log = Instant::now();
            }
        }

        if interrupted {
            warn!("Ramp interrupted after {} launches", launched);
        } else {
            info!(
                "All {} workers launched. Holding connections for {}s",
                launched,
                session.soak.as_secs_f64()
            );
            tokio::select! {
                _ = stop.cancelled() => {
                    warn!("Soak interrupted");
                    interrupted = true;
                }
                _ = sleep(session.soak) => {}
            }
        }

        let soak = stats.snapshot();
        info!(
            "Soak complete: online={}, errors={}, closed={}, peak={}",
            soak.connected, soak.errors, soak.closed, soak.peak
        );

        RampRun {
            launched,
            interrupted,
            soak,
            stats,
            workers,
            workers_cancel,
            reporter,
            reporter_cancel,
        }
    }
}

/// The outstanding state of a finished ramp: the live worker set and the
/// reporter.
pub struct RampRun {
    launched: usize,
    interrupted: bool,
    soak: Snapshot,
    stats: Stats,
    workers: JoinSet<WorkerExit>,
    workers_cancel: CancellationToken,
    reporter: Option<JoinHandle<()>>,
    reporter_cancel: CancellationToken,
}

impl RampRun {
    pub fn launched(&self) -> usize {
        self.launched
    }

    pub fn interrupted(&self) -> bool {
        self.interrupted
    }

    /// Counters as they stood when the soak ended.
    pub fn soak_snapshot(&self) -> Snapshot {
        self.soak
    }

    /// Cancels every worker and waits up to `grace` for them to close.
    /// Stragglers are aborted; their counters are still settled by the
    /// worker drop guard.
    pub async fn shutdown(mut self, grace: Duration) -> RunSummary {
        info!(
            "Shutting down {} workers (max {}s)",
            self.workers.len(),
            grace.as_secs_f64()
        );
        self.workers_cancel.cancel();

        let mut exits = ExitTally::default();
        let deadline = sleep(grace);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    warn!(
                        "Graceful shutdown timeout reached, aborting {} workers",
                        self.workers.len()
                    );
                    self.workers.abort_all();
                    break;
                }
                joined = self.workers.join_next() => match joined {
                    Some(res) => tally(&mut exits, res),
                    None => {
                        info!("All workers closed before timeout");
                        break;
                    }
                },
            }
        }

        while let Some(res) = self.workers.join_next().await {
            tally(&mut exits, res);
        }

        self.reporter_cancel.cancel();
        if let Some(reporter) = self.reporter.take() {
            if let Err(e) = reporter.await {
                error!("Reporter task failed: {}", e);
            }
        }

        RunSummary {
            launched: self.launched,
            interrupted: self.interrupted,
            soak: self.soak,
            final_snapshot: self.stats.snapshot(),
            exits,
            handshake_latency: self.stats.handshake_latency().await,
        }
    }
}

fn tally(exits: &mut ExitTally, joined: Result<WorkerExit, JoinError>) {
    match joined {
        Ok(exit) => exits.record(exit.kind()),
        Err(e) if e.is_cancelled() => exits.record(ExitKind::Aborted),
        Err(e) => {
            error!("Worker task panicked: {}", e);
            exits.record(ExitKind::Panicked);
        }
    }
}
