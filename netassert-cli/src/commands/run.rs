//! Dispatch every target and report the verdict.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use netassert_core::{Outcome, Verdict};
use netassert_runner::{
    ClusterInspector, Dispatcher, HostStrategy, Kubectl, LocalStrategy, PodChoice, PodStrategy,
    SinkDir, StrategySet,
};
use netassert_types::{Target, TargetClass};

use crate::preflight;
use crate::settings::Settings;

/// The run stopped on a signal before every class finished.
#[derive(Debug, thiserror::Error)]
#[error("interrupted by {signal}")]
pub struct Interrupted {
    /// Signal received.
    pub signal: &'static str,
}

/// Per-invocation options that are not settings.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Verbose test container output.
    pub debug: bool,
    /// Replica selection for pod targets.
    pub pod_choice: PodChoice,
    /// Kubeconfig context for every cluster query.
    pub context: Option<String>,
    /// Keep sinks in this directory instead of a temporary one.
    pub keep_sinks: Option<PathBuf>,
}

/// Run the tests described by `config`.
pub async fn run(config: &Path, settings: &Settings, options: &RunOptions) -> Result<Outcome> {
    let started = Instant::now();
    let document = Arc::new(super::load_document(config).await?);
    let targets: Vec<Target> = TargetClass::ALL
        .iter()
        .flat_map(|class| document.targets(*class))
        .collect();

    tracing::info!(
        "Loaded {}: {} tests expected, {} assertions",
        config.display(),
        document.expected_test_count(),
        document.assertion_count()
    );

    let cluster: Arc<dyn ClusterInspector> = Arc::new(match &options.context {
        Some(context) => Kubectl::with_context(context.as_str()),
        None => Kubectl::new(),
    });
    preflight::check(&targets, cluster.as_ref()).await?;

    let run_settings = settings.run_settings(options.debug);
    let ssh = settings.ssh_options();
    let strategy = StrategySet {
        local: Arc::new(LocalStrategy::new(run_settings.clone())),
        host: Arc::new(HostStrategy::new(run_settings.clone(), ssh.clone())),
        pod: Arc::new(
            PodStrategy::new(run_settings, ssh, cluster).with_choice(options.pod_choice),
        ),
    };

    let sinks = match &options.keep_sinks {
        Some(dir) => SinkDir::at(dir)
            .with_context(|| format!("Failed to use sink directory {}", dir.display()))?,
        None => SinkDir::temporary().context("Failed to create result sink directory")?,
    };
    tracing::debug!("Result sinks in {}", sinks.path().display());

    let dispatcher = Dispatcher::new(
        Arc::new(strategy),
        Arc::clone(&document),
        Arc::new(sinks),
        settings.dispatch_config(),
    );

    let (signal_tx, mut signal_rx) = tokio::sync::oneshot::channel();
    let shutdown = async move {
        let signal = shutdown_signal().await;
        let _ = signal_tx.send(signal);
    };
    let reports = dispatcher.dispatch_until(shutdown).await;
    if reports.iter().any(|r| r.interrupted) {
        let signal = signal_rx.try_recv().unwrap_or("signal");
        return Err(Interrupted { signal }.into());
    }

    let verdict = Verdict::aggregate(document.expected_test_count(), dispatcher.collect().await?);
    for result in verdict.failures() {
        let reason = result
            .report
            .failure_reason()
            .unwrap_or_else(|| "failed".to_string());
        tracing::warn!(target_id = %result.target, "FAIL: {}", reason);
    }

    let summary = verdict.summary(started.elapsed());
    let outcome = verdict.outcome();
    if outcome.is_pass() {
        tracing::info!("{}", summary);
    } else {
        tracing::error!("{}", summary);
    }
    println!("{}", summary);

    Ok(outcome)
}

/// Resolves on Ctrl+C or SIGTERM with the signal's name.
///
/// A signal that cannot be watched never fires.
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::warn!("Received Ctrl+C, removing test containers");
            "SIGINT"
        }
        _ = terminate => {
            tracing::warn!("Received SIGTERM, removing test containers");
            "SIGTERM"
        }
    }
}
