use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use ws_ramp::{Config, ConfigError, RampController, RunSummary, Stats};

/// Exit status for a configuration refused before any worker launched.
const EXIT_CONFIG: u8 = 2;

// =============================================================================
// Run
// =============================================================================

async fn run(config: Config) -> Result<RunSummary> {
    let (session, issuer) = config
        .validate()
        .context("Refusing to start with an invalid configuration")?;

    info!("════════════════════════════════════════════════════════════");
    info!("           CONNECTION RAMP");
    info!("════════════════════════════════════════════════════════════");
    info!("Target: {}", session.url);
    info!("Connections: {}", session.population);
    info!("Ramp Rate: {}/s", session.ramp_rate);
    info!("Soak Duration: {}s", session.soak.as_secs());
    info!("Token Algorithm: {}", issuer.algorithm());
    if let Some(idle) = session.idle_timeout {
        info!("Idle Timeout: {}ms", idle.as_millis());
    }
    info!("════════════════════════════════════════════════════════════");

    let grace = session.shutdown_grace;
    let controller = RampController::new(session, issuer, Stats::new());

    let stop = controller.stop_token();
    tokio::spawn(async move {
        tokio::select! {
            res = tokio::signal::ctrl_c() => match res {
                Ok(()) => {
                    info!("Shutdown signal received");
                    stop.cancel();
                }
                Err(e) => error!("Failed to listen for ctrl-c: {}", e),
            },
            _ = stop.cancelled() => {}
        }
    });

    let ramp = controller.run().await;
    Ok(ramp.shutdown(grace).await)
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing; stdout carries the live status line
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();

    match run(config).await {
        Ok(summary) => {
            summary.print();
            info!("════════════════════════════════════════════════════════════");
            info!("                 RAMP COMPLETE");
            info!("════════════════════════════════════════════════════════════");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{:#}", err);
            if err.downcast_ref::<ConfigError>().is_some() {
                ExitCode::from(EXIT_CONFIG)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}
