//! # netassert-types
//!
//! Foundational types shared by every netassert crate:
//! - [`Target`], [`TargetClass`], [`PodRef`], [`HostRef`] - What gets tested
//! - [`ContainerName`], [`SinkName`] - Names for ephemeral containers and result sinks
//! - [`TargetError`] - Target-level failure taxonomy

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod ids;
mod target;

pub use error::TargetError;
pub use ids::{ContainerName, SinkName, DEFAULT_CONTAINER_PREFIX};
pub use target::{HostRef, PodRef, Target, TargetClass, DEFAULT_NAMESPACE};
