//! Connection ramp harness: opens many authenticated WebSocket connections
//! at a bounded rate, holds them through a soak period and reports live
//! health counters.

pub mod config;
pub mod credential;
pub mod error;
pub mod ramp;
pub mod reporter;
pub mod stats;
pub mod summary;
pub mod transport;
pub mod worker;

pub use config::{Config, Session};
pub use credential::{Credential, CredentialIssuer, SigningAlgorithm};
pub use error::{ConfigError, CredentialError, TransportError, WorkerError};
pub use ramp::{RampController, RampRun};
pub use stats::{Snapshot, Stats};
pub use summary::{ExitTally, RunSummary};
pub use worker::{ExitKind, WorkerContext, WorkerExit};
