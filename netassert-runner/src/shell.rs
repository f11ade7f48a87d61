//! Remote shells: how a script reaches a host or a cluster node.
//!
//! Every implementation wraps the script as `sh -c '<script>'` so the
//! remote login shell does not matter.

use std::path::PathBuf;

use netassert_core::script::sh_command;
use tokio::process::Command;

/// Builds the local command that runs a script on some remote machine.
pub trait RemoteShell: Send + Sync + std::fmt::Debug {
    /// Local command executing `script` remotely.
    fn command(&self, script: &str) -> Command;

    /// Where the script runs, for logs and errors.
    fn describe(&self) -> String;
}

/// Options shared by every plain `ssh` invocation.
#[derive(Debug, Clone)]
pub struct SshOptions {
    /// Login user when the target does not embed one.
    pub user: Option<String>,
    /// Alternative `ssh_config` file.
    pub config_file: Option<PathBuf>,
    /// Known-hosts file used for host key checking.
    pub known_hosts: Option<PathBuf>,
    /// Connection timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Extra `-o` options, verbatim (`Key=Value`).
    pub extra: Vec<String>,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            user: None,
            config_file: None,
            known_hosts: None,
            connect_timeout_secs: 10,
            extra: Vec::new(),
        }
    }
}

impl SshOptions {
    /// Arguments placed before the destination.
    ///
    /// Batch mode is always on: the dispatcher cannot answer prompts.
    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(config) = &self.config_file {
            args.push("-F".to_string());
            args.push(config.display().to_string());
        }
        if let Some(known_hosts) = &self.known_hosts {
            args.push("-o".to_string());
            args.push(format!("UserKnownHostsFile={}", known_hosts.display()));
        }
        args.push("-o".to_string());
        args.push(format!("ConnectTimeout={}", self.connect_timeout_secs));
        args.push("-o".to_string());
        args.push("BatchMode=yes".to_string());
        for option in &self.extra {
            args.push("-o".to_string());
            args.push(option.clone());
        }
        args
    }
}

/// `ssh [options] <destination> sh -c '<script>'`.
#[derive(Debug, Clone)]
pub struct SshShell {
    /// `user@host` or `host`.
    pub destination: String,
    /// Connection options.
    pub options: SshOptions,
}

impl SshShell {
    /// Shell to one destination.
    pub fn new(destination: impl Into<String>, options: SshOptions) -> Self {
        Self {
            destination: destination.into(),
            options,
        }
    }

    fn argv(&self, script: &str) -> Vec<String> {
        let mut args = self.options.args();
        args.push(self.destination.clone());
        args.push(sh_command(script));
        args
    }
}

impl RemoteShell for SshShell {
    fn command(&self, script: &str) -> Command {
        let mut command = Command::new("ssh");
        command.args(self.argv(script));
        command
    }

    fn describe(&self) -> String {
        self.destination.clone()
    }
}

/// `gcloud compute ssh <instance> --zone <zone> --command '<script>'`.
#[derive(Debug, Clone)]
pub struct GcloudShell {
    /// Compute instance (the node name).
    pub instance: String,
    /// Instance zone.
    pub zone: String,
    /// GCP project, if known.
    pub project: Option<String>,
}

impl GcloudShell {
    fn argv(&self, script: &str) -> Vec<String> {
        let mut args = vec![
            "compute".to_string(),
            "ssh".to_string(),
            self.instance.clone(),
            "--zone".to_string(),
            self.zone.clone(),
        ];
        if let Some(project) = &self.project {
            args.push("--project".to_string());
            args.push(project.clone());
        }
        args.push("--quiet".to_string());
        args.push("--command".to_string());
        args.push(sh_command(script));
        args
    }
}

impl RemoteShell for GcloudShell {
    fn command(&self, script: &str) -> Command {
        let mut command = Command::new("gcloud");
        command.args(self.argv(script));
        command
    }

    fn describe(&self) -> String {
        format!("{} ({})", self.instance, self.zone)
    }
}

/// `minikube ssh -- '<script>'` into the single development node.
#[derive(Debug, Clone, Default)]
pub struct MinikubeShell;

impl MinikubeShell {
    fn argv(&self, script: &str) -> Vec<String> {
        vec!["ssh".to_string(), "--".to_string(), sh_command(script)]
    }
}

impl RemoteShell for MinikubeShell {
    fn command(&self, script: &str) -> Command {
        let mut command = Command::new("minikube");
        command.args(self.argv(script));
        command
    }

    fn describe(&self) -> String {
        "minikube".to_string()
    }
}

/// Shell that runs canned local scripts instead of reaching a machine.
///
/// Each remote script is answered by the first reply whose needle it
/// contains; every script is recorded.
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub(crate) struct ScriptedShell {
    replies: Vec<(String, String)>,
    seen: std::sync::Arc<std::sync::Mutex<Vec<String>>>,
}

#[cfg(test)]
impl ScriptedShell {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Answer scripts containing `needle` by running `reply` with `sh`.
    pub(crate) fn reply(mut self, needle: &str, reply: &str) -> Self {
        self.replies.push((needle.to_string(), reply.to_string()));
        self
    }

    /// Scripts received, in order.
    pub(crate) fn scripts(&self) -> Vec<String> {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[cfg(test)]
impl RemoteShell for ScriptedShell {
    fn command(&self, script: &str) -> Command {
        self.seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(script.to_string());
        let reply = self
            .replies
            .iter()
            .find(|(needle, _)| script.contains(needle.as_str()))
            .map(|(_, reply)| reply.as_str())
            .unwrap_or("echo 'unexpected script' >&2; exit 127");
        let mut command = Command::new("sh");
        command.arg("-c").arg(reply);
        command
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssh_defaults_are_batch_with_timeout() {
        let args = SshOptions::default().args();
        assert_eq!(args, vec!["-o", "ConnectTimeout=10", "-o", "BatchMode=yes"]);
    }

    #[test]
    fn ssh_options_in_order() {
        let options = SshOptions {
            user: Some("ops".into()),
            config_file: Some(PathBuf::from("/etc/netassert/ssh_config")),
            known_hosts: Some(PathBuf::from("/home/ops/.ssh/known_hosts")),
            connect_timeout_secs: 5,
            extra: vec!["StrictHostKeyChecking=accept-new".into()],
        };
        assert_eq!(
            options.args(),
            vec![
                "-F",
                "/etc/netassert/ssh_config",
                "-o",
                "UserKnownHostsFile=/home/ops/.ssh/known_hosts",
                "-o",
                "ConnectTimeout=5",
                "-o",
                "BatchMode=yes",
                "-o",
                "StrictHostKeyChecking=accept-new",
            ]
        );
    }

    #[test]
    fn ssh_wraps_script_after_destination() {
        let shell = SshShell::new("ops@10.0.0.1", SshOptions::default());
        let argv = shell.argv("exit 0");
        assert_eq!(argv[argv.len() - 2], "ops@10.0.0.1");
        assert_eq!(argv[argv.len() - 1], "sh -c 'exit 0'");
        assert_eq!(shell.describe(), "ops@10.0.0.1");
    }

    #[test]
    fn gcloud_passes_zone_and_project() {
        let shell = GcloudShell {
            instance: "gke-prod-pool-1-abcd".into(),
            zone: "europe-west2-a".into(),
            project: Some("my-project".into()),
        };
        assert_eq!(
            shell.argv("true"),
            vec![
                "compute",
                "ssh",
                "gke-prod-pool-1-abcd",
                "--zone",
                "europe-west2-a",
                "--project",
                "my-project",
                "--quiet",
                "--command",
                "sh -c true",
            ]
        );
    }

    #[test]
    fn minikube_uses_double_dash() {
        assert_eq!(MinikubeShell.argv("true"), vec!["ssh", "--", "sh -c true"]);
    }
}
