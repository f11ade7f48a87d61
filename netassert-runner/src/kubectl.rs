//! Cluster control-plane queries.
//!
//! [`ClusterInspector`] is the seam between pod dispatch and `kubectl`, so
//! the pod strategy can be tested against [`MockCluster`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use netassert_core::cluster::{parse_gcloud_zone, parse_node_address, parse_pod_list};
use netassert_core::PodInfo;
use netassert_types::{PodRef, TargetError};
use tokio::process::Command;

use crate::process::{run_captured, CommandOutput};

/// Read-only questions asked of the cluster.
#[async_trait]
pub trait ClusterInspector: Send + Sync + std::fmt::Debug {
    /// Name of the current kubeconfig context.
    async fn current_context(&self) -> Result<String, TargetError>;

    /// Running, scheduled pods matching a pod ref.
    async fn list_pods(&self, pod: &PodRef) -> Result<Vec<PodInfo>, TargetError>;

    /// Address to reach a node over SSH.
    async fn node_address(&self, node: &str) -> Result<String, TargetError>;

    /// Compute zone of a cloud instance.
    async fn instance_zone(
        &self,
        instance: &str,
        project: Option<&str>,
    ) -> Result<String, TargetError>;
}

/// [`ClusterInspector`] backed by the `kubectl` and `gcloud` CLIs.
#[derive(Debug, Clone, Default)]
pub struct Kubectl {
    context: Option<String>,
}

impl Kubectl {
    /// Use the current kubeconfig context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin every query to a named context.
    pub fn with_context(context: impl Into<String>) -> Self {
        Self {
            context: Some(context.into()),
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new("kubectl");
        if let Some(context) = &self.context {
            command.arg("--context").arg(context);
        }
        command
    }

    async fn run(&self, command: Command, what: &str) -> Result<CommandOutput, TargetError> {
        let output = run_captured(command).await?;
        if !output.success() {
            return Err(TargetError::Connectivity {
                target: what.to_string(),
                reason: output.reason(),
            });
        }
        Ok(output)
    }
}

#[async_trait]
impl ClusterInspector for Kubectl {
    async fn current_context(&self) -> Result<String, TargetError> {
        if let Some(context) = &self.context {
            return Ok(context.clone());
        }
        let mut command = self.command();
        command.args(["config", "current-context"]);
        let output = self.run(command, "kubeconfig").await?;
        Ok(output.stdout.trim().to_string())
    }

    async fn list_pods(&self, pod: &PodRef) -> Result<Vec<PodInfo>, TargetError> {
        let mut command = self.command();
        command.args(["get", "pods", "-n", pod.namespace.as_str(), "-o", "json"]);
        if pod.is_label_selector() {
            command.args(["-l", pod.selector.as_str()]);
        }
        let output = self.run(command, "cluster API").await?;
        parse_pod_list(&output.stdout, pod).map_err(|e| TargetError::Connectivity {
            target: "cluster API".into(),
            reason: format!("unreadable pod list: {}", e),
        })
    }

    async fn node_address(&self, node: &str) -> Result<String, TargetError> {
        let mut command = self.command();
        command.args(["get", "node", node, "-o", "json"]);
        let output = self.run(command, "cluster API").await?;
        let address = parse_node_address(&output.stdout).map_err(|e| {
            TargetError::Connectivity {
                target: node.to_string(),
                reason: format!("unreadable node description: {}", e),
            }
        })?;
        Ok(address.unwrap_or_else(|| node.to_string()))
    }

    async fn instance_zone(
        &self,
        instance: &str,
        project: Option<&str>,
    ) -> Result<String, TargetError> {
        let mut command = Command::new("gcloud");
        command
            .args(["compute", "instances", "list"])
            .arg(format!("--filter=name={}", instance))
            .arg("--format=value(zone)");
        if let Some(project) = project {
            command.arg("--project").arg(project);
        }
        let output = self.run(command, "gcloud").await?;
        parse_gcloud_zone(&output.stdout).ok_or_else(|| TargetError::Connectivity {
            target: instance.to_string(),
            reason: "instance not found in any zone".into(),
        })
    }
}

/// In-memory cluster for testing.
///
/// Clones share state, so a test can keep a handle after giving one to a
/// strategy.
#[derive(Debug, Clone, Default)]
pub struct MockCluster {
    inner: Arc<Mutex<MockClusterInner>>,
}

#[derive(Debug, Default)]
struct MockClusterInner {
    context: String,
    pods: Vec<PodInfo>,
    addresses: HashMap<String, String>,
    zones: HashMap<String, String>,
    fail_next_list: Option<String>,
    list_calls: usize,
}

impl MockCluster {
    /// Create an empty cluster with context `mock`.
    pub fn new() -> Self {
        let cluster = Self::default();
        cluster.lock().context = "mock".into();
        cluster
    }

    fn lock(&self) -> MutexGuard<'_, MockClusterInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Set the current context name.
    pub fn set_context(&self, context: &str) {
        self.lock().context = context.to_string();
    }

    /// Add a running pod.
    pub fn add_pod(&self, namespace: &str, name: &str, node: &str) {
        self.lock().pods.push(PodInfo {
            name: name.to_string(),
            namespace: namespace.to_string(),
            node: node.to_string(),
        });
    }

    /// Set a node's SSH address.
    pub fn set_address(&self, node: &str, address: &str) {
        self.lock()
            .addresses
            .insert(node.to_string(), address.to_string());
    }

    /// Set an instance's zone.
    pub fn set_zone(&self, instance: &str, zone: &str) {
        self.lock()
            .zones
            .insert(instance.to_string(), zone.to_string());
    }

    /// Cause the next `list_pods()` to fail with the given reason.
    pub fn fail_next_list(&self, reason: &str) {
        self.lock().fail_next_list = Some(reason.to_string());
    }

    /// Number of `list_pods()` calls so far.
    pub fn list_calls(&self) -> usize {
        self.lock().list_calls
    }
}

#[async_trait]
impl ClusterInspector for MockCluster {
    async fn current_context(&self) -> Result<String, TargetError> {
        Ok(self.lock().context.clone())
    }

    async fn list_pods(&self, pod: &PodRef) -> Result<Vec<PodInfo>, TargetError> {
        let mut inner = self.lock();
        inner.list_calls += 1;
        if let Some(reason) = inner.fail_next_list.take() {
            return Err(TargetError::Connectivity {
                target: "cluster API".into(),
                reason,
            });
        }
        // Label selectors are not modelled; they match every pod in the namespace.
        Ok(inner
            .pods
            .iter()
            .filter(|p| p.namespace == pod.namespace)
            .filter(|p| pod.is_label_selector() || pod.matches_name(&p.name))
            .cloned()
            .collect())
    }

    async fn node_address(&self, node: &str) -> Result<String, TargetError> {
        Ok(self
            .lock()
            .addresses
            .get(node)
            .cloned()
            .unwrap_or_else(|| node.to_string()))
    }

    async fn instance_zone(
        &self,
        instance: &str,
        _project: Option<&str>,
    ) -> Result<String, TargetError> {
        self.lock()
            .zones
            .get(instance)
            .cloned()
            .ok_or_else(|| TargetError::Connectivity {
                target: instance.to_string(),
                reason: "instance not found in any zone".into(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_filters_by_namespace_and_name() {
        let cluster = MockCluster::new();
        cluster.add_pod("web", "frontend-1", "node-1");
        cluster.add_pod("web", "frontend-2", "node-2");
        cluster.add_pod("web", "frontendish", "node-2");
        cluster.add_pod("db", "frontend-3", "node-3");

        let pods = cluster
            .list_pods(&PodRef::parse("web:frontend").unwrap())
            .await
            .unwrap();
        let names: Vec<_> = pods.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["frontend-1", "frontend-2"]);
        assert_eq!(cluster.list_calls(), 1);
    }

    #[tokio::test]
    async fn mock_fail_next_list_is_one_shot() {
        let cluster = MockCluster::new();
        cluster.fail_next_list("connection refused");
        let pod = PodRef::parse("web:frontend").unwrap();

        let err = cluster.list_pods(&pod).await.unwrap_err();
        assert!(matches!(err, TargetError::Connectivity { .. }));
        assert!(cluster.list_pods(&pod).await.is_ok());
    }

    #[tokio::test]
    async fn mock_clones_share_state() {
        let cluster = MockCluster::new();
        let handle = cluster.clone();
        handle.set_context("minikube");
        handle.set_address("node-1", "34.1.2.3");
        assert_eq!(cluster.current_context().await.unwrap(), "minikube");
        assert_eq!(cluster.node_address("node-1").await.unwrap(), "34.1.2.3");
        assert_eq!(cluster.node_address("node-9").await.unwrap(), "node-9");
    }

    #[tokio::test]
    async fn pinned_context_skips_kubectl() {
        let kubectl = Kubectl::with_context("gke_p_z_c");
        assert_eq!(kubectl.current_context().await.unwrap(), "gke_p_z_c");
    }

    #[tokio::test]
    async fn mock_unknown_zone_is_connectivity_error() {
        let cluster = MockCluster::new();
        cluster.set_zone("gke-node-1", "us-central1-a");
        assert_eq!(
            cluster.instance_zone("gke-node-1", None).await.unwrap(),
            "us-central1-a"
        );
        assert!(cluster.instance_zone("gke-node-2", None).await.is_err());
    }
}
