//! # netassert-runner
//!
//! Everything in netassert that touches the outside world.
//!
//! ## Architecture
//!
//! ```text
//!   ConfigDocument ──► Dispatcher ──(≤5 workers per class)──► ExecutionStrategy
//!                          │                                     ├─ LocalStrategy  (Docker API)
//!                          │                                     ├─ HostStrategy   (ssh)
//!                          │                                     └─ PodStrategy    (kubectl + node shell)
//!                          ▼
//!                       SinkDir ──► collect() ──► Verdict
//! ```
//!
//! - Each worker owns one ephemeral container and one sink.
//! - Remote containers are removed by an `EXIT` trap on the far side;
//!   local ones by a [`ContainerGuard`] that hands them to a [`Reaper`] if
//!   the worker is cancelled.
//! - A class-wide deadline is the only cancellation trigger.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dispatch;
pub mod guard;
pub mod kubectl;
pub mod process;
pub mod shell;
pub mod sink;
pub mod strategy;

pub use dispatch::{
    ClassReport, DispatchConfig, DispatchError, Dispatcher, DEFAULT_CONCURRENCY, DEFAULT_TIMEOUT,
};
pub use guard::{ContainerGuard, Reaper};
pub use kubectl::{ClusterInspector, Kubectl, MockCluster};
pub use process::CommandOutput;
pub use shell::{GcloudShell, MinikubeShell, RemoteShell, SshOptions, SshShell};
pub use sink::{SinkDir, SinkWriter};
pub use strategy::{
    ExecutionStrategy, HostStrategy, LocalStrategy, MockOutcome, MockStrategy, PodChoice,
    PodStrategy, RunSettings, StrategySet, DEFAULT_IMAGE,
};
