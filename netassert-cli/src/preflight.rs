//! Pre-flight check for the external tools a run needs.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use netassert_core::ContextKind;
use netassert_runner::ClusterInspector;
use netassert_types::{Target, TargetClass};

/// Required tools missing from `PATH`.
#[derive(Debug, thiserror::Error)]
#[error("required tools not found in PATH: {}", .missing.join(", "))]
pub struct MissingTools {
    /// Tool names, sorted.
    pub missing: Vec<String>,
}

/// Tools the given targets need.
///
/// `docker` for targets on this machine, `ssh` for remote hosts, `kubectl`
/// for any cluster target, plus the node transport of the cluster context
/// once it is known.
pub fn required_tools(targets: &[Target], cluster: Option<&ContextKind>) -> BTreeSet<&'static str> {
    let mut tools = BTreeSet::new();
    for target in targets {
        match target.class() {
            TargetClass::Host if target.is_local() => tools.insert("docker"),
            TargetClass::Host => tools.insert("ssh"),
            TargetClass::Pod => {
                if let Some(kind) = cluster {
                    tools.insert(node_transport(kind));
                }
                tools.insert("kubectl")
            }
        };
    }
    tools
}

/// Program that opens a shell on a cluster node.
pub fn node_transport(kind: &ContextKind) -> &'static str {
    match kind {
        ContextKind::LocalDevCluster => "minikube",
        ContextKind::ManagedCloudCluster { .. } => "gcloud",
        ContextKind::GenericRemote => "ssh",
    }
}

/// Locate an executable on a search path.
pub fn find_in(tool: &str, search_path: &std::ffi::OsStr) -> Option<PathBuf> {
    std::env::split_paths(search_path)
        .map(|dir| dir.join(tool))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Verify every required tool is on `PATH`.
///
/// With cluster targets the current context is read once to learn which
/// node transport is needed. If it cannot be read, the transport check is
/// skipped and every pod target reports the problem itself.
pub async fn check(targets: &[Target], cluster: &dyn ClusterInspector) -> Result<(), MissingTools> {
    let search_path = std::env::var_os("PATH").unwrap_or_default();
    check_in(targets, cluster, &search_path).await
}

async fn check_in(
    targets: &[Target],
    cluster: &dyn ClusterInspector,
    search_path: &std::ffi::OsStr,
) -> Result<(), MissingTools> {
    missing_from(required_tools(targets, None), search_path)?;

    if !targets.iter().any(|t| t.class() == TargetClass::Pod) {
        return Ok(());
    }
    let kind = match cluster.current_context().await {
        Ok(context) => ContextKind::classify(&context),
        Err(e) => {
            tracing::warn!("Cannot read the cluster context, skipping node transport check: {}", e);
            return Ok(());
        }
    };
    missing_from(required_tools(targets, Some(&kind)), search_path)
}

fn missing_from(tools: BTreeSet<&'static str>, search_path: &std::ffi::OsStr) -> Result<(), MissingTools> {
    let missing: Vec<String> = tools
        .into_iter()
        .filter(|tool| find_in(tool, search_path).is_none())
        .map(str::to_string)
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(MissingTools { missing })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netassert_runner::MockCluster;

    #[test]
    fn tools_follow_target_kinds() {
        let targets = vec![
            Target::host("localhost"),
            Target::host("10.0.0.1"),
            Target::host("10.0.0.2"),
        ];
        let tools: Vec<_> = required_tools(&targets, None).into_iter().collect();
        assert_eq!(tools, vec!["docker", "ssh"]);

        let tools: Vec<_> = required_tools(&[Target::pod("web:frontend")], None)
            .into_iter()
            .collect();
        assert_eq!(tools, vec!["kubectl"]);

        assert!(required_tools(&[], None).is_empty());
    }

    #[test]
    fn cluster_context_adds_node_transport() {
        let pods = [Target::pod("web:frontend")];
        let tools = |kind: ContextKind| -> Vec<&'static str> {
            required_tools(&pods, Some(&kind)).into_iter().collect()
        };
        assert_eq!(tools(ContextKind::LocalDevCluster), vec!["kubectl", "minikube"]);
        assert_eq!(
            tools(ContextKind::ManagedCloudCluster { project: None }),
            vec!["gcloud", "kubectl"]
        );
        assert_eq!(tools(ContextKind::GenericRemote), vec!["kubectl", "ssh"]);

        let hosts_only = required_tools(&[Target::host("localhost")], Some(&ContextKind::LocalDevCluster));
        assert_eq!(hosts_only.into_iter().collect::<Vec<_>>(), vec!["docker"]);
    }

    #[cfg(unix)]
    #[test]
    fn finds_executables_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("kubectl");
        std::fs::write(&tool, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();
        let plain = dir.path().join("ssh");
        std::fs::write(&plain, "").unwrap();
        std::fs::set_permissions(&plain, std::fs::Permissions::from_mode(0o644)).unwrap();

        let search = dir.path().as_os_str();
        assert_eq!(find_in("kubectl", search), Some(tool));
        assert_eq!(find_in("ssh", search), None);
        assert_eq!(find_in("docker", search), None);
    }

    #[tokio::test]
    async fn nothing_required_always_passes() {
        assert!(check(&[], &MockCluster::new()).await.is_ok());
    }

    #[cfg(unix)]
    fn tool_dir(tools: &[&str]) -> tempfile::TempDir {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        for tool in tools {
            let path = dir.path().join(tool);
            std::fs::write(&path, "#!/bin/sh\n").unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        dir
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_node_transport_is_reported_per_context() {
        let pods = [Target::pod("web:frontend")];
        let dir = tool_dir(&["kubectl"]);
        let search = dir.path().as_os_str();
        let cluster = MockCluster::new();

        for (context, tool) in [
            ("minikube", "minikube"),
            ("gke_my-project_europe-west2_prod", "gcloud"),
            ("kubernetes-admin@prod", "ssh"),
        ] {
            cluster.set_context(context);
            let err = check_in(&pods, &cluster, search).await.unwrap_err();
            assert_eq!(err.missing, vec![tool.to_string()], "context {}", context);
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn present_node_transport_passes() {
        let pods = [Target::pod("web:frontend")];
        let dir = tool_dir(&["kubectl", "gcloud"]);
        let cluster = MockCluster::new();
        cluster.set_context("gke_my-project_europe-west2_prod");
        assert!(check_in(&pods, &cluster, dir.path().as_os_str()).await.is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_kubectl_is_reported_before_asking_the_cluster() {
        let dir = tool_dir(&[]);
        let cluster = MockCluster::new();
        cluster.set_context("minikube");
        let err = check_in(&[Target::pod("web:frontend")], &cluster, dir.path().as_os_str())
            .await
            .unwrap_err();
        assert_eq!(err.missing, vec!["kubectl".to_string()]);
    }

    #[test]
    fn missing_tools_are_listed() {
        let err = MissingTools {
            missing: vec!["kubectl".into(), "ssh".into()],
        };
        assert_eq!(err.to_string(), "required tools not found in PATH: kubectl, ssh");
    }
}
