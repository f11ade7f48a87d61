//! # netassert
//!
//! Network policy conformance tests for hosts and Kubernetes pods.
//!
//! Reads a test configuration, runs one ephemeral test container per
//! target (at most five at a time per class), and reconciles every
//! target's report into a single verdict.
//!
//! ## Exit codes
//!
//! - `0`: every target passed
//! - `1`: tests failed, result count mismatch, or no results
//! - `2`: usage error
//! - `3`: environment error (missing tool, unreadable configuration)
//! - `130`: interrupted by Ctrl+C or SIGTERM (test containers are removed first)
//!
//! ## Example
//!
//! ```bash
//! # Run test/test.yaml with the default image
//! netassert
//!
//! # Use cached images and a custom ssh user
//! netassert --offline --ssh-user ops tests/prod.yaml
//!
//! # Show what would be tested
//! netassert --list tests/prod.yaml
//! ```

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod preflight;
mod settings;

use netassert_runner::PodChoice;
use commands::run::{Interrupted, RunOptions};
use settings::{Overrides, Settings};

/// Network policy conformance tests for hosts and Kubernetes pods.
#[derive(Parser, Debug)]
#[command(name = "netassert")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Test configuration (JSON or YAML)
    #[arg(default_value = "test/test.yaml")]
    config: PathBuf,

    /// Test container image
    #[arg(long)]
    image: Option<String>,

    /// Do not pull the test image
    #[arg(long)]
    offline: bool,

    /// Deadline in seconds for each target class
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    timeout: Option<u64>,

    /// Targets tested in parallel per class
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    concurrency: Option<u64>,

    /// Remote shell user for hosts and nodes
    #[arg(long)]
    ssh_user: Option<String>,

    /// Extra ssh option (Key=Value), repeatable
    #[arg(long = "ssh-option", value_name = "OPTION")]
    ssh_options: Vec<String>,

    /// Alternative ssh_config file
    #[arg(long)]
    ssh_config: Option<PathBuf>,

    /// Known-hosts file [default: ~/.ssh/known_hosts]
    #[arg(long)]
    known_hosts: Option<PathBuf>,

    /// Replica to test when a selector matches several pods
    #[arg(long, default_value_t = PodChoice::Random)]
    pod_choice: PodChoice,

    /// Kubeconfig context for cluster queries [default: current context]
    #[arg(long)]
    context: Option<String>,

    /// Keep per-target results in this directory (must be empty)
    #[arg(long, value_name = "DIR")]
    keep_sinks: Option<PathBuf>,

    /// TOML settings file
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Print the targets and exit
    #[arg(long)]
    list: bool,

    /// Verbose logs, and verbose output from the test container
    #[arg(long)]
    debug: bool,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            image: self.image.clone(),
            offline: self.offline,
            timeout_secs: self.timeout,
            concurrency: self.concurrency.map(|c| c as usize),
            ssh_user: self.ssh_user.clone(),
            ssh_options: self.ssh_options.clone(),
            ssh_config: self.ssh_config.clone(),
            known_hosts: self.known_hosts.clone(),
        }
    }

    fn run_options(&self) -> RunOptions {
        RunOptions {
            debug: self.debug,
            pod_choice: self.pod_choice,
            context: self.context.clone(),
            keep_sinks: self.keep_sinks.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    match execute(&cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) if e.is::<Interrupted>() => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(130)
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(3)
        }
    }
}

/// Returns whether the run passed. Errors are environment errors.
async fn execute(cli: &Cli) -> Result<bool> {
    if cli.list {
        commands::list::run(&cli.config).await?;
        return Ok(true);
    }

    let mut settings = Settings::load(cli.settings.as_deref())?;
    settings.apply(cli.overrides());

    let outcome = commands::run::run(&cli.config, &settings, &cli.run_options()).await?;
    Ok(outcome.is_pass())
}

fn init_tracing(debug: bool) {
    let filter = if debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_writer(std::io::stderr),
        )
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn config_defaults_to_test_yaml() {
        let cli = Cli::try_parse_from(["netassert"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("test/test.yaml"));
        assert_eq!(cli.pod_choice, PodChoice::Random);
        assert!(!cli.offline);
    }

    #[test]
    fn repeatable_ssh_options() {
        let cli = Cli::try_parse_from([
            "netassert",
            "--ssh-option",
            "A=1",
            "--ssh-option",
            "B=2",
            "--pod-choice",
            "first",
            "custom.json",
        ])
        .unwrap();
        assert_eq!(cli.ssh_options, vec!["A=1", "B=2"]);
        assert_eq!(cli.pod_choice, PodChoice::First);
        assert_eq!(cli.config, PathBuf::from("custom.json"));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        assert!(Cli::try_parse_from(["netassert", "--timeout", "0"]).is_err());
    }

    #[test]
    fn overrides_carry_flags() {
        let cli =
            Cli::try_parse_from(["netassert", "--offline", "--timeout", "30", "--image", "x:1"])
                .unwrap();
        let overrides = cli.overrides();
        assert!(overrides.offline);
        assert_eq!(overrides.timeout_secs, Some(30));
        assert_eq!(overrides.image.as_deref(), Some("x:1"));
        assert_eq!(overrides.concurrency, None);
    }

    #[test]
    fn run_options_carry_context_and_sink_dir() {
        let cli = Cli::try_parse_from([
            "netassert",
            "--context",
            "gke_p_europe-west2_prod",
            "--keep-sinks",
            "/tmp/netassert-results",
            "--pod-choice",
            "first",
        ])
        .unwrap();
        let options = cli.run_options();
        assert_eq!(options.context.as_deref(), Some("gke_p_europe-west2_prod"));
        assert_eq!(options.keep_sinks, Some(PathBuf::from("/tmp/netassert-results")));
        assert_eq!(options.pod_choice, PodChoice::First);
        assert!(!options.debug);
    }

    #[test]
    fn interrupted_error_is_recognised() {
        let err = anyhow::Error::from(Interrupted { signal: "SIGTERM" });
        assert!(err.is::<Interrupted>());
        assert_eq!(err.to_string(), "interrupted by SIGTERM");
    }
}
