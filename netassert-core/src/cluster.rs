//! Interpreting cluster control-plane and container-runtime output.

use serde::Deserialize;

use netassert_types::PodRef;

/// How to reach a cluster node, decided from the current context name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextKind {
    /// Single-node development VM (`minikube ssh`).
    LocalDevCluster,
    /// GKE: nodes reached through `gcloud compute ssh`.
    ManagedCloudCluster {
        /// GCP project parsed from the context name.
        project: Option<String>,
    },
    /// Plain `ssh` to the node address.
    GenericRemote,
}

impl ContextKind {
    /// Classify a kubeconfig context name.
    ///
    /// GKE contexts look like `gke_<project>_<location>_<cluster>`.
    pub fn classify(context: &str) -> Self {
        let context = context.trim();
        if context == "minikube" {
            return ContextKind::LocalDevCluster;
        }
        if let Some(rest) = context.strip_prefix("gke_") {
            let project = rest
                .split('_')
                .next()
                .filter(|p| !p.is_empty())
                .map(str::to_string);
            return ContextKind::ManagedCloudCluster { project };
        }
        ContextKind::GenericRemote
    }
}

/// A pod eligible to be the test subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodInfo {
    /// Pod name.
    pub name: String,
    /// Namespace.
    pub namespace: String,
    /// Node hosting the pod.
    pub node: String,
}

#[derive(Debug, Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<PodItem>,
}

#[derive(Debug, Deserialize)]
struct PodItem {
    metadata: Metadata,
    #[serde(default)]
    spec: PodSpec,
    #[serde(default)]
    status: PodStatus,
}

#[derive(Debug, Deserialize)]
struct Metadata {
    name: String,
    #[serde(default)]
    namespace: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PodSpec {
    #[serde(default)]
    node_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PodStatus {
    #[serde(default)]
    phase: Option<String>,
}

/// Running, scheduled pods from `kubectl get pods -o json` matching a pod ref.
///
/// Label selectors are applied by the API server, so only name-style
/// selectors are filtered here.
pub fn parse_pod_list(json: &str, pod: &PodRef) -> Result<Vec<PodInfo>, serde_json::Error> {
    let list: PodList = serde_json::from_str(json)?;
    let pods = list
        .items
        .into_iter()
        .filter(|item| item.status.phase.as_deref() == Some("Running"))
        .filter(|item| pod.is_label_selector() || pod.matches_name(&item.metadata.name))
        .filter_map(|item| {
            let node = item.spec.node_name.filter(|n| !n.is_empty())?;
            Some(PodInfo {
                name: item.metadata.name,
                namespace: item
                    .metadata
                    .namespace
                    .unwrap_or_else(|| pod.namespace.clone()),
                node,
            })
        })
        .collect();
    Ok(pods)
}

#[derive(Debug, Deserialize)]
struct Node {
    #[serde(default)]
    status: NodeStatus,
}

#[derive(Debug, Default, Deserialize)]
struct NodeStatus {
    #[serde(default)]
    addresses: Vec<NodeAddress>,
}

#[derive(Debug, Deserialize)]
struct NodeAddress {
    #[serde(rename = "type")]
    kind: String,
    address: String,
}

/// Best address to reach a node over SSH from `kubectl get node -o json`:
/// ExternalIP, then InternalIP, then Hostname.
pub fn parse_node_address(json: &str) -> Result<Option<String>, serde_json::Error> {
    let node: Node = serde_json::from_str(json)?;
    let pick = |kind: &str| {
        node.status
            .addresses
            .iter()
            .find(|a| a.kind == kind && !a.address.is_empty())
            .map(|a| a.address.clone())
    };
    Ok(pick("ExternalIP")
        .or_else(|| pick("InternalIP"))
        .or_else(|| pick("Hostname")))
}

/// Zone from `gcloud compute instances list --format=value(zone)`.
///
/// Accepts a bare zone or a zone URL.
pub fn parse_gcloud_zone(output: &str) -> Option<String> {
    let line = output.lines().map(str::trim).find(|l| !l.is_empty())?;
    line.rsplit('/').next().map(str::to_string)
}

/// Find the workload container of a pod in `docker ps` output.
///
/// Kubelet names containers `k8s_<container>_<pod>_<namespace>_<uid>_<attempt>`;
/// the `k8s_POD_` sandbox (pause) containers are infrastructure and skipped.
pub fn find_workload_container(ps_output: &str, pod: &str, namespace: &str) -> Option<String> {
    ps_output.lines().find_map(|line| {
        let (id, name) = line.trim().split_once(' ')?;
        let name = name.trim();
        if !name.starts_with("k8s_") || name.starts_with("k8s_POD_") {
            return None;
        }
        let parts: Vec<&str> = name.split('_').collect();
        if parts.len() >= 4 && parts[2] == pod && parts[3] == namespace {
            Some(id.to_string())
        } else {
            None
        }
    })
}
