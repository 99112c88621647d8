use std::collections::BTreeMap;

use tracing::info;

use crate::stats::{LatencySummary, Snapshot};
use crate::worker::ExitKind;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExitTally {
    counts: BTreeMap<ExitKind, u64>,
}

impl ExitTally {
    pub fn record(&mut self, kind: ExitKind) {
        *self.counts.entry(kind).or_insert(0) += 1;
    }

    pub fn get(&self, kind: ExitKind) -> u64 {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ExitKind, u64)> + '_ {
        self.counts.iter().map(|(kind, count)| (*kind, *count))
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub launched: usize,
    pub interrupted: bool,
    /// Counters when the soak ended, before teardown.
    pub soak: Snapshot,
    /// Counters once every worker has been joined.
    pub final_snapshot: Snapshot,
    pub exits: ExitTally,
    pub handshake_latency: Option<LatencySummary>,
}

impl RunSummary {
    pub fn print(&self) {
        info!("╔════════════════════════════════════════════════════════════╗");
        info!("║                      RAMP SUMMARY                          ║");
        info!("╚════════════════════════════════════════════════════════════╝");

        info!("");
        info!("Run:");
        info!("  Launched:            {}", self.launched);
        if self.interrupted {
            info!("  Interrupted:         yes");
        }
        info!("  Duration:            {:.1}s", self.final_snapshot.elapsed.as_secs_f64());

        info!("");
        info!("At Soak End:");
        info!("  Online:              {}", self.soak.connected);
        info!("  Errors:              {}", self.soak.errors);
        info!("  Closed:              {}", self.soak.closed);
        info!("  Peak Online:         {}", self.soak.peak);

        info!("");
        info!("After Shutdown:");
        info!("  Online:              {}", self.final_snapshot.connected);
        info!("  Errors:              {}", self.final_snapshot.errors);
        info!("  Closed:              {}", self.final_snapshot.closed);
        info!("  Peak Online:         {}", self.final_snapshot.peak);

        info!("");
        info!("Worker Exits:");
        if self.exits.total() == 0 {
            info!("  None");
        }
        for (kind, count) in self.exits.iter() {
            info!("  {:<21}{}", format!("{}:", kind), count);
        }

        info!("");
        info!("Handshake Latency (ms):");
        match &self.handshake_latency {
            Some(latency) => {
                info!("  Samples: {}", latency.samples);
                info!("  Min:    {}", latency.min);
                info!("  Mean:   {:.2}", latency.mean);
                info!("  p50:    {}", latency.p50);
                info!("  p95:    {}", latency.p95);
                info!("  p99:    {}", latency.p99);
                info!("  Max:    {}", latency.max);
            }
            None => info!("  No data"),
        }

        info!("");
        info!("═══════════════════════════════════════════════════════════");
    }
}
