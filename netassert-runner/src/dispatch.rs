//! Bounded parallel dispatch of one target class.
//!
//! Each target gets its own worker, at most `concurrency` of them in
//! flight. The whole class shares one deadline: workers still running when
//! it passes are aborted, their sinks stay partial, and the class moves
//! on. Nothing a single worker does can fail the class.
//!
//! A shutdown future (a signal, in the binary) interrupts the class in
//! flight the same way the deadline does, and stops later classes from
//! starting.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use netassert_core::ConfigDocument;
use netassert_types::{Target, TargetClass, TargetError};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::sink::SinkDir;
use crate::strategy::ExecutionStrategy;

/// Workers in flight per class.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Class-wide deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Errors that stop dispatch as a whole.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The sink directory could not be read.
    #[error("result sink directory {path}: {source}")]
    Sinks {
        /// Directory path.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },
}

/// Dispatch limits.
#[derive(Debug, Clone, Copy)]
pub struct DispatchConfig {
    /// Maximum workers in flight per class.
    pub concurrency: usize,
    /// Deadline for a whole class.
    pub timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// What happened to one class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassReport {
    /// Class dispatched.
    pub class: TargetClass,
    /// Targets whose worker ran to completion.
    pub completed: Vec<Target>,
    /// Targets abandoned at the deadline or on shutdown.
    pub timed_out: Vec<Target>,
    /// Targets whose worker panicked.
    pub crashed: Vec<Target>,
    /// Shutdown cut the class short.
    pub interrupted: bool,
    /// Wall-clock time spent on the class.
    pub elapsed: Duration,
}

impl ClassReport {
    fn empty(class: TargetClass) -> Self {
        Self {
            class,
            completed: Vec::new(),
            timed_out: Vec::new(),
            crashed: Vec::new(),
            interrupted: false,
            elapsed: Duration::ZERO,
        }
    }

    /// Targets dispatched.
    pub fn dispatched(&self) -> usize {
        self.completed.len() + self.timed_out.len() + self.crashed.len()
    }
}

/// Fans targets out to an execution strategy.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    strategy: Arc<dyn ExecutionStrategy>,
    document: Arc<ConfigDocument>,
    sinks: Arc<SinkDir>,
    config: DispatchConfig,
}

impl Dispatcher {
    /// Create a dispatcher.
    pub fn new(
        strategy: Arc<dyn ExecutionStrategy>,
        document: Arc<ConfigDocument>,
        sinks: Arc<SinkDir>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            strategy,
            document,
            sinks,
            config,
        }
    }

    /// Sink directory shared by all workers.
    pub fn sinks(&self) -> &SinkDir {
        &self.sinks
    }

    /// Dispatch every class in order: hosts, then pods.
    pub async fn dispatch_all(&self) -> Vec<ClassReport> {
        self.dispatch_until(std::future::pending()).await
    }

    /// Like [`Dispatcher::dispatch_all`], but stop as soon as `shutdown`
    /// completes.
    ///
    /// The class in flight is aborted and reaped; its report is the last
    /// one returned and has `interrupted` set.
    pub async fn dispatch_until<F>(&self, shutdown: F) -> Vec<ClassReport>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut reports = Vec::with_capacity(TargetClass::ALL.len());
        for class in TargetClass::ALL {
            let report = self.run_class(class, shutdown.as_mut()).await;
            let interrupted = report.interrupted;
            reports.push(report);
            if interrupted {
                break;
            }
        }
        reports
    }

    /// Dispatch one class and wait for it to finish or hit the deadline.
    pub async fn dispatch_class(&self, class: TargetClass) -> ClassReport {
        let never = std::future::pending::<()>();
        tokio::pin!(never);
        self.run_class(class, never).await
    }

    async fn run_class<F>(&self, class: TargetClass, mut shutdown: Pin<&mut F>) -> ClassReport
    where
        F: Future<Output = ()>,
    {
        let targets = self.document.targets(class);
        if targets.is_empty() {
            tracing::info!("No {} targets, skipping", class);
            return ClassReport::empty(class);
        }

        let started = Instant::now();
        let deadline = started + self.config.timeout;
        tracing::info!(
            "Dispatching {} {} targets ({} at a time, {}s deadline)",
            targets.len(),
            class,
            self.config.concurrency,
            self.config.timeout.as_secs()
        );

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut workers = JoinSet::new();
        let mut spawned = HashMap::with_capacity(targets.len());
        for target in targets.iter().cloned() {
            let semaphore = Arc::clone(&semaphore);
            let strategy = Arc::clone(&self.strategy);
            let document = Arc::clone(&self.document);
            let sinks = Arc::clone(&self.sinks);
            let task = target.clone();
            let handle = workers.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                run_worker(strategy.as_ref(), &document, &sinks, &task).await;
            });
            spawned.insert(handle.id(), target);
        }

        let mut completed = Vec::with_capacity(targets.len());
        let mut crashed = Vec::new();
        let mut interrupted = false;
        loop {
            let joined = tokio::select! {
                joined = tokio::time::timeout_at(deadline, workers.join_next_with_id()) => joined,
                _ = shutdown.as_mut() => {
                    tracing::warn!("Shutdown requested, abandoning {} targets", class);
                    interrupted = true;
                    workers.abort_all();
                    drain(&mut workers, &mut spawned, &mut completed).await;
                    break;
                }
            };
            match joined {
                Ok(Some(Ok((id, ())))) => completed.extend(spawned.remove(&id)),
                Ok(Some(Err(e))) => {
                    if let Some(target) = spawned.remove(&e.id()) {
                        tracing::error!(target_id = %target, "{} worker crashed: {}", class, e);
                        crashed.push(target);
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    workers.abort_all();
                    drain(&mut workers, &mut spawned, &mut completed).await;
                    break;
                }
            }
        }

        let mut timed_out: Vec<Target> = spawned.into_values().collect();
        timed_out.sort();
        if !timed_out.is_empty() {
            let ids: Vec<String> = timed_out.iter().map(|t| t.id().to_string()).collect();
            if interrupted {
                tracing::warn!(
                    "{} {} targets interrupted: {}",
                    timed_out.len(),
                    class,
                    ids.join(", ")
                );
            } else {
                tracing::warn!(
                    "{} {} targets unfinished after {}s: {}",
                    timed_out.len(),
                    class,
                    self.config.timeout.as_secs(),
                    ids.join(", ")
                );
            }
        }
        self.strategy.reap().await;

        let elapsed = started.elapsed();
        tracing::info!(
            "{} targets done: {} completed, {} unfinished, {} crashed in {:.1}s",
            class,
            completed.len(),
            timed_out.len(),
            crashed.len(),
            elapsed.as_secs_f64()
        );
        completed.sort();
        crashed.sort();
        ClassReport {
            class,
            completed,
            timed_out,
            crashed,
            interrupted,
            elapsed,
        }
    }

    /// Read every committed sink.
    pub async fn collect(&self) -> Result<Vec<(Target, String)>, DispatchError> {
        self.sinks.collect().await.map_err(|source| DispatchError::Sinks {
            path: self.sinks.path().display().to_string(),
            source,
        })
    }
}

/// Wait out aborted workers. Any that finished before the abort landed
/// still count as completed.
async fn drain(
    workers: &mut JoinSet<()>,
    spawned: &mut HashMap<tokio::task::Id, Target>,
    completed: &mut Vec<Target>,
) {
    while let Some(joined) = workers.join_next_with_id().await {
        if let Ok((id, ())) = joined {
            completed.extend(spawned.remove(&id));
        }
    }
}

/// One target, start to finish. Every failure ends up in the target's own
/// sink.
async fn run_worker(
    strategy: &dyn ExecutionStrategy,
    document: &ConfigDocument,
    sinks: &SinkDir,
    target: &Target,
) {
    let started = Instant::now();
    let mut sink = match sinks.create(target).await {
        Ok(sink) => sink,
        Err(e) => {
            tracing::error!(target_id = %target, "Cannot open result sink: {}", e);
            return;
        }
    };

    let result = match document.resolve(target) {
        Ok(payload) => strategy.run_ephemeral(target, &payload, &mut sink).await,
        Err(e) => Err(e),
    };
    let result = match result {
        Ok(()) if sink.lines_written() == 0 => Err(TargetError::Runtime(
            "test container produced no output".into(),
        )),
        other => other,
    };

    if let Err(e) = &result {
        tracing::warn!(target_id = %target, kind = e.kind(), "{}", e);
        if let Err(io) = sink.record_error(e).await {
            tracing::error!(target_id = %target, "Cannot record failure: {}", io);
        }
    }

    match sink.commit().await {
        Ok(_) => tracing::info!(
            "{} finished in {:.1}s ({})",
            target,
            started.elapsed().as_secs_f64(),
            if result.is_ok() { "ok" } else { "failed" }
        ),
        Err(e) => tracing::error!(target_id = %target, "Cannot commit result sink: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::{MockOutcome, MockStrategy};
    use netassert_core::{Outcome, Verdict};

    fn document(yaml: &str) -> Arc<ConfigDocument> {
        Arc::new(ConfigDocument::parse(yaml).unwrap())
    }

    fn dispatcher(mock: &MockStrategy, doc: Arc<ConfigDocument>, config: DispatchConfig) -> Dispatcher {
        Dispatcher::new(
            Arc::new(mock.clone()),
            doc,
            Arc::new(SinkDir::temporary().unwrap()),
            config,
        )
    }

    fn many_hosts(n: usize) -> String {
        let mut yaml = String::from("host:\n");
        for i in 0..n {
            yaml.push_str(&format!("  10.0.0.{}:\n    - 10.0.1.1:80\n", i));
        }
        yaml
    }

    #[tokio::test]
    async fn concurrency_is_capped() {
        let mock = MockStrategy::new();
        let doc = document(&many_hosts(12));
        for target in doc.host_targets() {
            mock.set_outcome(target, MockOutcome::pass().after(Duration::from_millis(20)));
        }
        let dispatcher = dispatcher(&mock, doc, DispatchConfig::default());

        let report = dispatcher.dispatch_class(TargetClass::Host).await;
        assert_eq!(report.completed.len(), 12);
        assert!(report.timed_out.is_empty());
        assert_eq!(mock.started().len(), 12);
        assert!(mock.max_concurrency() <= DEFAULT_CONCURRENCY);
        assert!(mock.max_concurrency() > 1);
    }

    #[tokio::test]
    async fn failures_are_isolated() {
        let mock = MockStrategy::new();
        let doc = document(
            "k8s:\n  deployment:\n    web:missing:\n      - a:80\n    web:frontend:\n      - b:80\n",
        );
        mock.set_outcome(Target::pod("web:missing"), MockOutcome::not_found());
        let dispatcher = dispatcher(&mock, Arc::clone(&doc), DispatchConfig::default());

        dispatcher.dispatch_all().await;
        let verdict = Verdict::aggregate(doc.expected_test_count(), dispatcher.collect().await.unwrap());
        assert_eq!(verdict.outcome(), Outcome::TestsFailed);
        assert_eq!(verdict.found(), 2);
        let failed: Vec<_> = verdict.failures().map(|r| r.target.id().to_string()).collect();
        assert_eq!(failed, vec!["web:missing"]);
    }

    #[tokio::test]
    async fn deadline_leaves_missing_sinks() {
        let mock = MockStrategy::new();
        let doc = document("host:\n  fast:\n    - a:80\n  slow:\n    - b:80\n");
        mock.set_outcome(Target::host("slow"), MockOutcome::pass().after(Duration::from_secs(30)));
        let config = DispatchConfig {
            concurrency: 5,
            timeout: Duration::from_millis(200),
        };
        let dispatcher = dispatcher(&mock, Arc::clone(&doc), config);

        let report = dispatcher.dispatch_class(TargetClass::Host).await;
        assert_eq!(report.completed, vec![Target::host("fast")]);
        assert_eq!(report.timed_out, vec![Target::host("slow")]);
        assert_eq!(mock.reap_calls(), 1);
        assert_eq!(
            dispatcher.sinks().incomplete().await.unwrap(),
            vec![Target::host("slow")]
        );

        let verdict = Verdict::aggregate(doc.expected_test_count(), dispatcher.collect().await.unwrap());
        assert_eq!(verdict.outcome(), Outcome::CountMismatch);
    }

    #[tokio::test]
    async fn crashed_worker_is_not_blamed_on_the_deadline() {
        let mock = MockStrategy::new();
        let doc = document("host:\n  ok:\n    - a:80\n  boom:\n    - b:80\n");
        mock.set_outcome(Target::host("boom"), MockOutcome::crash());
        let dispatcher = dispatcher(&mock, doc, DispatchConfig::default());

        let report = dispatcher.dispatch_class(TargetClass::Host).await;
        assert_eq!(report.completed, vec![Target::host("ok")]);
        assert_eq!(report.crashed, vec![Target::host("boom")]);
        assert!(report.timed_out.is_empty());
        assert!(!report.interrupted);
        assert_eq!(report.dispatched(), 2);
    }

    #[tokio::test]
    async fn shutdown_interrupts_class_and_skips_the_rest() {
        let mock = MockStrategy::new();
        let doc = document(
            "host:\n  fast:\n    - a:80\n  slow:\n    - b:80\nk8s:\n  deployment:\n    ns:p1:\n      - c:80\n",
        );
        mock.set_outcome(Target::host("slow"), MockOutcome::pass().after(Duration::from_secs(30)));
        let dispatcher = dispatcher(&mock, doc, DispatchConfig::default());

        let reports = dispatcher
            .dispatch_until(tokio::time::sleep(Duration::from_millis(200)))
            .await;
        assert_eq!(reports.len(), 1);
        let report = &reports[0];
        assert!(report.interrupted);
        assert_eq!(report.completed, vec![Target::host("fast")]);
        assert_eq!(report.timed_out, vec![Target::host("slow")]);
        assert_eq!(mock.reap_calls(), 1);
        assert!(!mock.started().contains(&Target::pod("ns:p1")));
        assert!(!mock.finished().contains(&Target::host("slow")));
    }

    #[tokio::test]
    async fn silent_success_is_recorded_as_failure() {
        let mock = MockStrategy::new();
        let doc = document("host:\n  quiet:\n    - a:80\n");
        mock.set_outcome(Target::host("quiet"), MockOutcome::silent());
        let dispatcher = dispatcher(&mock, Arc::clone(&doc), DispatchConfig::default());

        dispatcher.dispatch_class(TargetClass::Host).await;
        let sinks = dispatcher.collect().await.unwrap();
        assert_eq!(sinks.len(), 1);
        assert!(sinks[0].1.contains("produced no output"));
        assert!(!Verdict::aggregate(1, sinks).outcome().is_pass());
    }

    #[tokio::test]
    async fn empty_class_is_skipped() {
        let mock = MockStrategy::new();
        let dispatcher = dispatcher(&mock, document("host:\n  a:\n    - b:80\n"), DispatchConfig::default());

        let report = dispatcher.dispatch_class(TargetClass::Pod).await;
        assert_eq!(report.dispatched(), 0);
        assert!(mock.started().is_empty());
        assert_eq!(mock.reap_calls(), 0);
    }

    #[tokio::test]
    async fn payload_carries_only_own_assertions() {
        let mock = MockStrategy::new();
        let doc = document("host:\n  a:\n    - x:80\n  b:\n    - y:443\n");
        let dispatcher = dispatcher(&mock, doc, DispatchConfig::default());

        dispatcher.dispatch_class(TargetClass::Host).await;
        let mut keys: Vec<String> = mock.payloads().iter().map(|p| p.key().to_string()).collect();
        keys.sort();
        assert_eq!(keys, vec!["_a", "_b"]);
        for payload in mock.payloads() {
            let section = &payload.document()["host"];
            assert_eq!(section.as_object().map(|m| m.len()), Some(1));
        }
    }

    #[tokio::test]
    async fn hosts_run_before_pods() {
        let mock = MockStrategy::new();
        let doc = document(
            "host:\n  h1:\n    - a:80\nk8s:\n  deployment:\n    ns:p1:\n      - b:80\n",
        );
        let dispatcher = dispatcher(&mock, doc, DispatchConfig::default());

        let reports = dispatcher.dispatch_all().await;
        assert_eq!(reports.len(), 2);
        assert_eq!(mock.started(), vec![Target::host("h1"), Target::pod("ns:p1")]);
    }
}
