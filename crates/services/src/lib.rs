#![forbid(unsafe_code)]

pub mod error;
pub mod network;
pub mod queue;
pub mod reconcile;
pub mod remote;
pub mod service;

pub use quiz_core::Clock;

pub use error::{ProgressError, SyncFault};
pub use network::{Connectivity, ConnectivityMonitor, ConnectivityProbe, HttpProbe, ManualProbe};
pub use queue::{DrainOutcome, MutationQueue};
pub use reconcile::ReconcileEngine;
pub use remote::{HttpRemote, InMemoryRemote, ProgressRemote, RemoteConfig, RemoteError};
pub use service::{DailyAnswerOutcome, DrainStatus, ProgressService};
