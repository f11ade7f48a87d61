//! # netassert-core
//!
//! Pure logic for netassert (no I/O, instant tests).
//!
//! ## Design Philosophy
//!
//! Everything here takes input and produces output without touching the
//! network, the container runtime, or the filesystem:
//! - [`ConfigDocument`] resolves targets and per-target payloads
//! - [`TapReport`] parses what a test container printed
//! - [`Verdict`] reconciles all sinks into one outcome
//! - [`script`] builds the shell scripts run on remote machines
//! - [`cluster`] interprets control-plane and runtime output
//!
//! The actual I/O is performed by `netassert-runner`, which executes the
//! scripts and feeds the captured output back into these functions.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cluster;
pub mod document;
pub mod payload;
pub mod script;
pub mod tap;
pub mod verdict;

pub use cluster::{ContextKind, PodInfo};
pub use document::{ConfigDocument, DocumentError};
pub use payload::{TestPayload, PAYLOAD_ENV};
pub use script::{ContainerRun, NetworkMode};
pub use tap::TapReport;
pub use verdict::{Outcome, TargetResult, Verdict};
