use std::time::Duration;

use clap::Parser;
use url::Url;

use crate::credential::{CredentialIssuer, SigningAlgorithm};
use crate::error::ConfigError;

/// Host marker left in the default target url; a run against it is refused.
pub const PLACEHOLDER_MARKER: &str = "YOUR_SERVER_IP";

#[derive(Parser, Debug, Clone)]
#[command(name = "ws-ramp")]
#[command(about = "WebSocket connection ramp and soak harness", long_about = None)]
pub struct Config {
    /// WebSocket endpoint (ws:// or wss://)
    #[arg(
        long,
        env = "TARGET_URL",
        default_value = "ws://YOUR_SERVER_IP_HERE:8000/connection/websocket"
    )]
    pub target_url: String,

    /// Number of connections to open
    #[arg(long, env = "MAX_CONNECTIONS", default_value = "2000")]
    pub max_connections: usize,

    /// Connections launched per second
    #[arg(long, env = "RAMP_RATE", default_value = "50")]
    pub ramp_rate: f64,

    /// Seconds to hold connections open after the last launch
    #[arg(long, env = "SOAK_DURATION", default_value = "20")]
    pub soak_duration: u64,

    /// HMAC secret used to sign handshake tokens
    #[arg(long, env = "JWT_SECRET", default_value = "", hide_env_values = true, hide_default_value = true)]
    pub jwt_secret: String,

    /// Token signing algorithm
    #[arg(long, env = "JWT_ALGORITHM", value_enum, ignore_case = true, default_value = "HS256")]
    pub jwt_algorithm: SigningAlgorithm,

    /// Milliseconds to wait for the handshake reply (0 waits indefinitely)
    #[arg(long, env = "HANDSHAKE_TIMEOUT_MS", default_value = "10000")]
    pub handshake_timeout_ms: u64,

    /// Close a connection after this many milliseconds without inbound traffic (0 disables)
    #[arg(long, env = "IDLE_TIMEOUT_MS", default_value = "0")]
    pub idle_timeout_ms: u64,

    /// Progress line refresh interval in milliseconds (0 disables)
    #[arg(long, env = "REPORT_INTERVAL_MS", default_value = "500")]
    pub report_interval_ms: u64,

    /// Seconds to wait for workers to close at shutdown before aborting them
    #[arg(long, env = "SHUTDOWN_GRACE", default_value = "30")]
    pub shutdown_grace: u64,
}

impl Config {
    /// Validates the whole configuration, returning the run session and the
    /// token issuer built from it.
    pub fn validate(&self) -> Result<(Session, CredentialIssuer), ConfigError> {
        let session = Session::from_config(self)?;
        let issuer = CredentialIssuer::new(&self.jwt_secret, self.jwt_algorithm)?;
        Ok((session, issuer))
    }
}

/// Immutable parameters of one run.
#[derive(Debug, Clone)]
pub struct Session {
    pub url: Url,
    pub population: usize,
    pub ramp_rate: f64,
    /// Delay between two consecutive worker launches.
    pub launch_interval: Duration,
    pub soak: Duration,
    pub handshake_timeout: Option<Duration>,
    pub idle_timeout: Option<Duration>,
    pub report_interval: Option<Duration>,
    pub shutdown_grace: Duration,
}

impl Session {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let url = parse_target(&config.target_url)?;

        if config.max_connections == 0 {
            return Err(ConfigError::EmptyPopulation);
        }
        let launch_interval = launch_interval(config.ramp_rate)?;

        Ok(Self {
            url,
            population: config.max_connections,
            ramp_rate: config.ramp_rate,
            launch_interval,
            soak: Duration::from_secs(config.soak_duration),
            handshake_timeout: non_zero_millis(config.handshake_timeout_ms),
            idle_timeout: non_zero_millis(config.idle_timeout_ms),
            report_interval: non_zero_millis(config.report_interval_ms),
            shutdown_grace: Duration::from_secs(config.shutdown_grace),
        })
    }
}

/// The interval must be representable and non-zero, or the launch ticker
/// cannot be built.
fn launch_interval(rate: f64) -> Result<Duration, ConfigError> {
    if !rate.is_finite() || rate <= 0.0 {
        return Err(ConfigError::InvalidRampRate(rate));
    }
    match Duration::try_from_secs_f64(1.0 / rate) {
        Ok(interval) if !interval.is_zero() => Ok(interval),
        _ => Err(ConfigError::InvalidRampRate(rate)),
    }
}

fn non_zero_millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

fn parse_target(raw: &str) -> Result<Url, ConfigError> {
    if raw.contains(PLACEHOLDER_MARKER) {
        return Err(ConfigError::PlaceholderEndpoint(raw.to_string()));
    }

    let url = Url::parse(raw).map_err(|source| ConfigError::InvalidUrl {
        url: raw.to_string(),
        source,
    })?;

    match url.scheme() {
        "ws" | "wss" => {}
        _ => return Err(ConfigError::UnsupportedScheme(raw.to_string())),
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(ConfigError::MissingHost(raw.to_string()));
    }

    Ok(url)
}
