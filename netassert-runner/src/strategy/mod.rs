//! Execution strategies: how one target's test container gets run.
//!
//! A strategy runs exactly one ephemeral container for one target and
//! streams everything it prints into that target's sink. It never touches
//! another target's sink, and every failure it returns is scoped to the
//! target it was given.

mod host;
mod local;
mod mock;
mod pod;

pub use host::HostStrategy;
pub use local::LocalStrategy;
pub use mock::{MockOutcome, MockStrategy};
pub use pod::{PodChoice, PodStrategy};

use std::sync::Arc;

use async_trait::async_trait;
use netassert_core::{ContainerRun, NetworkMode, TestPayload, PAYLOAD_ENV};
use netassert_types::{ContainerName, Target, TargetClass, TargetError, DEFAULT_CONTAINER_PREFIX};

use crate::sink::SinkWriter;

/// Default test image.
pub const DEFAULT_IMAGE: &str = "controlplane/netassert:0.1";

/// Environment variable switching the test container to verbose output.
pub const DEBUG_ENV: &str = "DEBUG";

/// Runs a target's test container.
#[async_trait]
pub trait ExecutionStrategy: Send + Sync + std::fmt::Debug {
    /// Run one ephemeral container for `target`, streaming its output into
    /// `sink`.
    ///
    /// Returns `Ok` only when the container ran and exited 0.
    async fn run_ephemeral(
        &self,
        target: &Target,
        payload: &TestPayload,
        sink: &mut SinkWriter,
    ) -> Result<(), TargetError>;

    /// Remove anything left behind by cancelled runs.
    async fn reap(&self) {}
}

/// Settings shared by every container launch.
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Test image.
    pub image: String,
    /// Pull the image before each run (best-effort).
    pub pull: bool,
    /// Ask the test container for verbose output.
    pub debug: bool,
    /// Prefix for ephemeral container names.
    pub container_prefix: String,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            pull: true,
            debug: false,
            container_prefix: DEFAULT_CONTAINER_PREFIX.to_string(),
        }
    }
}

impl RunSettings {
    /// Environment handed to the test container.
    pub fn container_env(&self, payload: &TestPayload) -> Vec<(String, String)> {
        let mut env = vec![(PAYLOAD_ENV.to_string(), payload.encode())];
        if self.debug {
            env.push((DEBUG_ENV.to_string(), "1".to_string()));
        }
        env
    }

    /// Describe a container run with a fresh name.
    pub fn container_run(
        &self,
        payload: &TestPayload,
        network: NetworkMode,
        privileged: bool,
    ) -> ContainerRun {
        ContainerRun {
            name: ContainerName::generate(&self.container_prefix),
            image: self.image.clone(),
            network,
            env: self.container_env(payload),
            pull: self.pull,
            privileged,
        }
    }
}

/// Map a remote script's exit status to a target result.
///
/// 255 is the remote shell's own connection failure.
pub(crate) fn remote_exit(target: &str, exit_code: i32) -> Result<(), TargetError> {
    match exit_code {
        0 => Ok(()),
        255 => Err(TargetError::Connectivity {
            target: target.to_string(),
            reason: "remote shell exited with code 255".into(),
        }),
        code => Err(TargetError::TestFailure {
            exit_code: code as i64,
        }),
    }
}

/// Routes each target to the strategy that handles it.
///
/// Local-direct hosts go to `local`; other hosts to `host`; cluster
/// targets to `pod`.
#[derive(Debug, Clone)]
pub struct StrategySet {
    /// Targets naming this machine.
    pub local: Arc<dyn ExecutionStrategy>,
    /// Remote hosts.
    pub host: Arc<dyn ExecutionStrategy>,
    /// Cluster pods.
    pub pod: Arc<dyn ExecutionStrategy>,
}

impl StrategySet {
    fn route(&self, target: &Target) -> &Arc<dyn ExecutionStrategy> {
        match target.class() {
            TargetClass::Host if target.is_local() => &self.local,
            TargetClass::Host => &self.host,
            TargetClass::Pod => &self.pod,
        }
    }
}

#[async_trait]
impl ExecutionStrategy for StrategySet {
    async fn run_ephemeral(
        &self,
        target: &Target,
        payload: &TestPayload,
        sink: &mut SinkWriter,
    ) -> Result<(), TargetError> {
        self.route(target).run_ephemeral(target, payload, sink).await
    }

    async fn reap(&self) {
        self.local.reap().await;
        self.host.reap().await;
        self.pod.reap().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::SinkDir;
    use serde_json::json;

    #[test]
    fn env_carries_payload_and_debug_flag() {
        let payload = TestPayload::wrap("localhost", json!(["10.0.0.1:80"]));
        let mut settings = RunSettings::default();
        let env = settings.container_env(&payload);
        assert_eq!(env, vec![("TARGETS".to_string(), payload.encode())]);

        settings.debug = true;
        let env = settings.container_env(&payload);
        assert_eq!(env[1], ("DEBUG".to_string(), "1".to_string()));
    }

    #[test]
    fn container_runs_get_unique_prefixed_names() {
        let payload = TestPayload::wrap("a", json!([]));
        let settings = RunSettings {
            container_prefix: "ci-netassert".into(),
            ..RunSettings::default()
        };
        let a = settings.container_run(&payload, NetworkMode::Host, false);
        let b = settings.container_run(&payload, NetworkMode::Host, false);
        assert!(a.name.as_str().starts_with("ci-netassert-"));
        assert_ne!(a.name, b.name);
        assert_eq!(a.image, DEFAULT_IMAGE);
        assert!(a.pull);
    }

    #[test]
    fn remote_exit_codes() {
        assert!(remote_exit("h", 0).is_ok());
        assert!(matches!(
            remote_exit("h", 255),
            Err(TargetError::Connectivity { .. })
        ));
        assert!(matches!(
            remote_exit("h", 1),
            Err(TargetError::TestFailure { exit_code: 1 })
        ));
    }

    #[tokio::test]
    async fn set_routes_by_class_and_locality() {
        let local = MockStrategy::new();
        let host = MockStrategy::new();
        let pod = MockStrategy::new();
        let set = StrategySet {
            local: Arc::new(local.clone()),
            host: Arc::new(host.clone()),
            pod: Arc::new(pod.clone()),
        };
        let dir = SinkDir::temporary().unwrap();
        let payload = TestPayload::wrap("x", json!([]));

        for target in [
            Target::host("localhost"),
            Target::host("10.0.0.1"),
            Target::pod("web:frontend"),
        ] {
            let mut sink = dir.create(&target).await.unwrap();
            set.run_ephemeral(&target, &payload, &mut sink).await.unwrap();
        }

        assert_eq!(local.started(), vec![Target::host("localhost")]);
        assert_eq!(host.started(), vec![Target::host("10.0.0.1")]);
        assert_eq!(pod.started(), vec![Target::pod("web:frontend")]);
    }
}
