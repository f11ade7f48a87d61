//! Cluster pods: run the test container inside a pod's network namespace
//! on the node hosting it.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use netassert_core::cluster::find_workload_container;
use netassert_core::script::discovery_command;
use netassert_core::{ContextKind, NetworkMode, PodInfo, TestPayload};
use netassert_types::{PodRef, Target, TargetError};
use rand::seq::SliceRandom;
use tokio::sync::OnceCell;

use super::{remote_exit, ExecutionStrategy, RunSettings};
use crate::kubectl::ClusterInspector;
use crate::process::{run_captured, stream_to_sink, CommandOutput};
use crate::shell::{GcloudShell, MinikubeShell, RemoteShell, SshOptions, SshShell};
use crate::sink::SinkWriter;

/// Which replica to test when a selector matches several pods.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PodChoice {
    /// Any matching replica, chosen at random.
    #[default]
    Random,
    /// The first matching replica by name.
    First,
}

impl PodChoice {
    /// Pick one pod. `None` if the list is empty.
    pub fn pick(self, mut pods: Vec<PodInfo>) -> Option<PodInfo> {
        match self {
            PodChoice::Random => pods.choose(&mut rand::thread_rng()).cloned(),
            PodChoice::First => {
                pods.sort_by(|a, b| a.name.cmp(&b.name));
                pods.into_iter().next()
            }
        }
    }
}

impl FromStr for PodChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "random" => Ok(PodChoice::Random),
            "first" => Ok(PodChoice::First),
            other => Err(format!("unknown pod choice '{}' (expected random or first)", other)),
        }
    }
}

impl fmt::Display for PodChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PodChoice::Random => "random",
            PodChoice::First => "first",
        })
    }
}

/// Runs the test container on the pod's node, joined to the network
/// namespace of the pod's workload container.
#[derive(Debug)]
pub struct PodStrategy {
    settings: RunSettings,
    ssh: SshOptions,
    cluster: Arc<dyn ClusterInspector>,
    choice: PodChoice,
    context: OnceCell<ContextKind>,
    node_shell: Option<Arc<dyn RemoteShell>>,
}

impl PodStrategy {
    /// Create a pod strategy.
    pub fn new(settings: RunSettings, ssh: SshOptions, cluster: Arc<dyn ClusterInspector>) -> Self {
        Self {
            settings,
            ssh,
            cluster,
            choice: PodChoice::default(),
            context: OnceCell::new(),
            node_shell: None,
        }
    }

    /// Set the replica selection policy.
    pub fn with_choice(mut self, choice: PodChoice) -> Self {
        self.choice = choice;
        self
    }

    /// Reach every node through one shell, bypassing transport detection.
    #[cfg(test)]
    pub(crate) fn with_node_shell(mut self, shell: Arc<dyn RemoteShell>) -> Self {
        self.node_shell = Some(shell);
        self
    }

    async fn context_kind(&self) -> Result<&ContextKind, TargetError> {
        self.context
            .get_or_try_init(|| async {
                let context = self.cluster.current_context().await?;
                let kind = ContextKind::classify(&context);
                tracing::info!("Cluster context {} reached as {:?}", context, kind);
                Ok(kind)
            })
            .await
    }

    async fn select_pod(&self, pod: &PodRef) -> Result<PodInfo, TargetError> {
        let pods = self.cluster.list_pods(pod).await?;
        let count = pods.len();
        let chosen = self.choice.pick(pods).ok_or_else(|| TargetError::TargetNotFound {
            namespace: pod.namespace.clone(),
            selector: pod.selector.clone(),
        })?;
        if count > 1 {
            tracing::debug!("{} replicas match {}, testing {}", count, pod, chosen.name);
        }
        Ok(chosen)
    }

    /// Shell onto a node, chosen by the cluster context.
    pub async fn shell_for(&self, node: &str) -> Result<Arc<dyn RemoteShell>, TargetError> {
        if let Some(shell) = &self.node_shell {
            return Ok(Arc::clone(shell));
        }
        let shell: Arc<dyn RemoteShell> = match self.context_kind().await? {
            ContextKind::LocalDevCluster => Arc::new(MinikubeShell),
            ContextKind::ManagedCloudCluster { project } => {
                let zone = self.cluster.instance_zone(node, project.as_deref()).await?;
                Arc::new(GcloudShell {
                    instance: node.to_string(),
                    zone,
                    project: project.clone(),
                })
            }
            ContextKind::GenericRemote => {
                let address = self.cluster.node_address(node).await?;
                let destination = match &self.ssh.user {
                    Some(user) => format!("{}@{}", user, address),
                    None => address,
                };
                Arc::new(SshShell::new(destination, self.ssh.clone()))
            }
        };
        Ok(shell)
    }

    /// List runtime containers on the node, escalating once on failure.
    async fn discover(&self, shell: &dyn RemoteShell) -> Result<(CommandOutput, bool), TargetError> {
        let output = run_captured(shell.command(&discovery_command(false))).await?;
        if output.success() {
            return Ok((output, false));
        }
        if output.exit_code == 255 {
            return Err(TargetError::Connectivity {
                target: shell.describe(),
                reason: output.reason(),
            });
        }

        tracing::debug!(
            "Unprivileged container listing failed on {} ({}), retrying with sudo",
            shell.describe(),
            output.reason()
        );
        let output = run_captured(shell.command(&discovery_command(true))).await?;
        match output.exit_code {
            0 => Ok((output, true)),
            255 => Err(TargetError::Connectivity {
                target: shell.describe(),
                reason: output.reason(),
            }),
            _ => Err(TargetError::Runtime(format!(
                "cannot list containers on {}: {}",
                shell.describe(),
                output.reason()
            ))),
        }
    }
}

#[async_trait]
impl ExecutionStrategy for PodStrategy {
    async fn run_ephemeral(
        &self,
        target: &Target,
        payload: &TestPayload,
        sink: &mut SinkWriter,
    ) -> Result<(), TargetError> {
        let pod_ref = PodRef::parse(target.id())?;
        let pod = self.select_pod(&pod_ref).await?;
        let shell = self.shell_for(&pod.node).await?;

        let (listing, privileged) = self.discover(shell.as_ref()).await?;
        let container = find_workload_container(&listing.stdout, &pod.name, &pod.namespace)
            .ok_or_else(|| TargetError::ContainerNotFound {
                pod: pod.name.clone(),
                node: pod.node.clone(),
            })?;

        let run = self.settings.container_run(
            payload,
            NetworkMode::Container(container),
            privileged,
        );
        tracing::info!(
            "Running {} on {} in the network of pod {}/{}",
            run.name,
            shell.describe(),
            pod.namespace,
            pod.name
        );
        let exit_code = stream_to_sink(shell.command(&run.to_script()), sink).await?;
        remote_exit(&shell.describe(), exit_code)
    }
}
