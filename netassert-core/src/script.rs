//! Shell scripts executed on remote hosts and cluster nodes.
//!
//! Every script installs an `EXIT` trap that force-removes the ephemeral
//! container, so a dropped session still cleans up on the far end.

use netassert_types::ContainerName;

/// Prefix used once an unprivileged runtime query has failed.
pub const PRIVILEGED_PREFIX: &str = "sudo -n";

/// Network namespace the test container joins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkMode {
    /// The machine's own network namespace.
    Host,
    /// The namespace of an existing container (by ID).
    Container(String),
}

impl NetworkMode {
    /// Value for `docker run --network`.
    pub fn as_arg(&self) -> String {
        match self {
            NetworkMode::Host => "host".to_string(),
            NetworkMode::Container(id) => format!("container:{}", id),
        }
    }
}

/// Everything needed to run one ephemeral test container.
#[derive(Debug, Clone)]
pub struct ContainerRun {
    /// Unique container name.
    pub name: ContainerName,
    /// Test image.
    pub image: String,
    /// Network namespace to join.
    pub network: NetworkMode,
    /// Environment variables.
    pub env: Vec<(String, String)>,
    /// Pull the image first (best-effort).
    pub pull: bool,
    /// Run runtime commands through `sudo -n`.
    pub privileged: bool,
}

impl ContainerRun {
    /// Container runtime invocation, with the privilege prefix if needed.
    pub fn docker(&self) -> String {
        docker_command(self.privileged)
    }

    /// Command that force-removes the container, ignoring errors.
    pub fn remove_command(&self) -> String {
        format!(
            "{} rm -f {} >/dev/null 2>&1 || true",
            self.docker(),
            shell_quote(self.name.as_str())
        )
    }

    /// `docker run` arguments after the program name.
    pub fn run_args(&self) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-i".to_string(),
            "--name".to_string(),
            self.name.to_string(),
            "--network".to_string(),
            self.network.as_arg(),
        ];
        for (key, value) in &self.env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push(self.image.clone());
        args
    }

    /// The full remote script: traps, optional pull, run.
    ///
    /// Hangup and termination turn into a normal exit so the `EXIT` trap
    /// fires when the session drops. The script's exit status is the test
    /// container's.
    pub fn to_script(&self) -> String {
        let mut lines = Vec::with_capacity(4);
        lines.push(format!("trap {} EXIT", shell_quote(&self.remove_command())));
        lines.push("trap 'exit 129' HUP INT TERM".to_string());
        if self.pull {
            lines.push(format!(
                "{} pull {} >/dev/null 2>&1 || true",
                self.docker(),
                shell_quote(&self.image)
            ));
        }
        let args: Vec<String> = self.run_args().iter().map(|a| shell_quote(a)).collect();
        lines.push(format!("{} {}", self.docker(), args.join(" ")));
        lines.join("\n")
    }
}

/// `docker` or `sudo -n docker`.
pub fn docker_command(privileged: bool) -> String {
    if privileged {
        format!("{} docker", PRIVILEGED_PREFIX)
    } else {
        "docker".to_string()
    }
}

/// Lists running containers as `<id> <name>` lines.
pub fn discovery_command(privileged: bool) -> String {
    format!(
        "{} ps --no-trunc --format {}",
        docker_command(privileged),
        shell_quote("{{.ID}} {{.Names}}")
    )
}

/// Quote a string for POSIX `sh`.
pub fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"-_./:=@,+".contains(&b))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r#"'"'"'"#))
}

/// Wrap a script so the remote login shell hands it to POSIX `sh`.
pub fn sh_command(script: &str) -> String {
    format!("sh -c {}", shell_quote(script))
}

/// Lines the remote-shell transport prints about its own teardown.
pub fn is_transport_noise(line: &str) -> bool {
    let line = line.trim();
    let rest = line
        .strip_prefix("Shared connection to ")
        .or_else(|| line.strip_prefix("Connection to "));
    match rest {
        Some(rest) => rest.ends_with(" closed.") || rest.ends_with(" closed by remote host."),
        None => false,
    }
}
