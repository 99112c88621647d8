use std::io::{IsTerminal, Write};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::stats::{Snapshot, Stats};

/// Progress log cadence when stdout is not a terminal.
const LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Spawns the progress reporter. It only reads snapshots and stops when
/// `cancel` fires.
pub fn spawn(stats: Stats, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let tty = std::io::stdout().is_terminal();
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_log = Instant::now();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let snapshot = stats.snapshot();
                    if tty {
                        let mut out = std::io::stdout().lock();
                        let _ = write!(out, "\r{}   ", render_status(&snapshot));
                        let _ = out.flush();
                    } else if last_log.elapsed() >= LOG_INTERVAL {
                        info!(
                            "Progress: elapsed={}s, online={}, errors={}, closed={}, peak={}",
                            snapshot.elapsed.as_secs(),
                            snapshot.connected,
                            snapshot.errors,
                            snapshot.closed,
                            snapshot.peak
                        );
                        last_log = Instant::now();
                    }
                }
            }
        }

        if tty {
            let mut out = std::io::stdout().lock();
            let _ = writeln!(out, "\r{}   ", render_status(&stats.snapshot()));
        }
    })
}

pub fn render_status(snapshot: &Snapshot) -> String {
    format!(
        "[Time: {}s] Online: {} | Errors: {} | Closed: {} | Peak: {}",
        snapshot.elapsed.as_secs(),
        snapshot.connected,
        snapshot.errors,
        snapshot.closed,
        snapshot.peak
    )
}
