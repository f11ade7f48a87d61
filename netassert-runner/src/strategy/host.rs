//! Remote hosts over `ssh`.

use std::sync::Arc;

use async_trait::async_trait;
use netassert_core::{NetworkMode, TestPayload};
use netassert_types::{HostRef, Target, TargetError};

use super::{remote_exit, ExecutionStrategy, RunSettings};
use crate::process::stream_to_sink;
use crate::shell::{RemoteShell, SshOptions, SshShell};
use crate::sink::SinkWriter;

/// Runs the test container on a remote host in the host's network
/// namespace.
#[derive(Debug, Clone)]
pub struct HostStrategy {
    settings: RunSettings,
    ssh: SshOptions,
    fixed_shell: Option<Arc<dyn RemoteShell>>,
}

impl HostStrategy {
    /// Create a host strategy.
    pub fn new(settings: RunSettings, ssh: SshOptions) -> Self {
        Self {
            settings,
            ssh,
            fixed_shell: None,
        }
    }

    /// Reach every host through one shell instead of `ssh`.
    #[cfg(test)]
    pub(crate) fn with_shell(mut self, shell: Arc<dyn RemoteShell>) -> Self {
        self.fixed_shell = Some(shell);
        self
    }

    fn ssh_for(&self, host: &HostRef) -> SshShell {
        SshShell::new(host.destination(self.ssh.user.as_deref()), self.ssh.clone())
    }

    fn shell_for(&self, host: &HostRef) -> Arc<dyn RemoteShell> {
        match &self.fixed_shell {
            Some(shell) => Arc::clone(shell),
            None => Arc::new(self.ssh_for(host)),
        }
    }
}

#[async_trait]
impl ExecutionStrategy for HostStrategy {
    async fn run_ephemeral(
        &self,
        target: &Target,
        payload: &TestPayload,
        sink: &mut SinkWriter,
    ) -> Result<(), TargetError> {
        let host = HostRef::parse(target.id())?;
        let shell = self.shell_for(&host);
        let run = self.settings.container_run(payload, NetworkMode::Host, false);

        tracing::info!("Running {} on {}", run.name, shell.describe());
        let exit_code = stream_to_sink(shell.command(&run.to_script()), sink).await?;
        remote_exit(&shell.describe(), exit_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::ScriptedShell;
    use crate::sink::SinkDir;
    use serde_json::json;

    async fn run_with(reply: &str) -> (Result<(), TargetError>, ScriptedShell) {
        let shell = ScriptedShell::new().reply("docker run", reply);
        let strategy = HostStrategy::new(RunSettings::default(), SshOptions::default())
            .with_shell(Arc::new(shell.clone()));
        let dir = SinkDir::temporary().unwrap();
        let target = Target::host("10.0.0.1");
        let mut sink = dir.create(&target).await.unwrap();
        let result = strategy
            .run_ephemeral(&target, &TestPayload::wrap("10.0.0.1", json!(["10.0.0.2:80"])), &mut sink)
            .await;
        (result, shell)
    }

    #[tokio::test]
    async fn clean_exit_passes_with_host_network() {
        let (result, shell) = run_with("echo 'TAP version 13'; echo '# tests 0'").await;
        result.unwrap();
        let scripts = shell.scripts();
        assert_eq!(scripts.len(), 1);
        assert!(scripts[0].contains("docker run -i"));
        assert!(scripts[0].contains("--network host"));
        assert!(scripts[0].lines().next().unwrap().ends_with(" EXIT"));
    }

    #[tokio::test]
    async fn container_exit_code_is_test_failure() {
        let (result, _) = run_with("echo 'not ok 1'; exit 3").await;
        assert!(matches!(result, Err(TargetError::TestFailure { exit_code: 3 })));
    }

    #[tokio::test]
    async fn shell_exit_255_is_connectivity() {
        let (result, _) = run_with("echo 'ssh: Could not resolve hostname' >&2; exit 255").await;
        assert!(matches!(result, Err(TargetError::Connectivity { ref target, .. }) if target == "scripted"));
    }

    #[test]
    fn embedded_user_wins_over_default() {
        let strategy = HostStrategy::new(
            RunSettings::default(),
            SshOptions {
                user: Some("ops".into()),
                ..SshOptions::default()
            },
        );
        let plain = HostRef::parse("10.0.0.1").unwrap();
        let embedded = HostRef::parse("admin@10.0.0.2").unwrap();
        assert_eq!(strategy.ssh_for(&plain).describe(), "ops@10.0.0.1");
        assert_eq!(strategy.ssh_for(&embedded).describe(), "admin@10.0.0.2");
    }

    #[test]
    fn no_user_uses_bare_host() {
        let strategy = HostStrategy::new(RunSettings::default(), SshOptions::default());
        let host = HostRef::parse("bastion.internal").unwrap();
        assert_eq!(strategy.ssh_for(&host).describe(), "bastion.internal");
    }
}
