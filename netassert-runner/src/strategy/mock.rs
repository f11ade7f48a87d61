//! Mock strategy for testing dispatch without containers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use netassert_core::TestPayload;
use netassert_types::{Target, TargetError};

use super::{remote_exit, ExecutionStrategy};
use crate::sink::SinkWriter;

const PASSING_REPORT: &[&str] = &["TAP version 13", "ok 1 - mock", "1..1", "# tests 1", "# pass 1", "# fail 0"];

/// Scripted behaviour for one target.
#[derive(Debug, Clone)]
pub struct MockOutcome {
    /// Lines the "container" prints.
    pub lines: Vec<String>,
    /// How long the run takes.
    pub delay: Duration,
    /// Exit code of the run.
    pub exit_code: i32,
    /// Fail before anything runs, as a missing pod would.
    pub not_found: bool,
    /// Panic instead of returning.
    pub panics: bool,
}

impl MockOutcome {
    /// A single passing test.
    pub fn pass() -> Self {
        Self {
            lines: PASSING_REPORT.iter().map(|l| l.to_string()).collect(),
            delay: Duration::ZERO,
            exit_code: 0,
            not_found: false,
            panics: false,
        }
    }

    /// A single failing test, exit code 1.
    pub fn fail() -> Self {
        Self {
            lines: vec![
                "TAP version 13".into(),
                "not ok 1 - mock".into(),
                "1..1".into(),
                "# tests 1".into(),
                "# pass 0".into(),
                "# fail 1".into(),
            ],
            delay: Duration::ZERO,
            exit_code: 1,
            not_found: false,
            panics: false,
        }
    }

    /// Target cannot be resolved.
    pub fn not_found() -> Self {
        Self {
            lines: Vec::new(),
            delay: Duration::ZERO,
            exit_code: 0,
            not_found: true,
            panics: false,
        }
    }

    /// Prints nothing and exits 0.
    pub fn silent() -> Self {
        Self {
            lines: Vec::new(),
            delay: Duration::ZERO,
            exit_code: 0,
            not_found: false,
            panics: false,
        }
    }

    /// The worker panics mid-run.
    pub fn crash() -> Self {
        Self {
            panics: true,
            ..Self::silent()
        }
    }

    /// Same outcome after a delay.
    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Mock strategy for testing.
///
/// Targets without a scripted outcome pass. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockStrategy {
    inner: Arc<Mutex<MockStrategyInner>>,
}

#[derive(Debug, Default)]
struct MockStrategyInner {
    outcomes: HashMap<Target, MockOutcome>,
    started: Vec<Target>,
    finished: Vec<Target>,
    payloads: Vec<TestPayload>,
    running: usize,
    max_running: usize,
    reaped: usize,
}

impl MockStrategy {
    /// Create a new mock strategy.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockStrategyInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Script the outcome for a target.
    pub fn set_outcome(&self, target: Target, outcome: MockOutcome) {
        self.lock().outcomes.insert(target, outcome);
    }

    /// Targets in the order their runs started.
    pub fn started(&self) -> Vec<Target> {
        self.lock().started.clone()
    }

    /// Targets whose runs returned.
    pub fn finished(&self) -> Vec<Target> {
        self.lock().finished.clone()
    }

    /// Payloads handed to the strategy.
    pub fn payloads(&self) -> Vec<TestPayload> {
        self.lock().payloads.clone()
    }

    /// Highest number of runs in flight at once.
    pub fn max_concurrency(&self) -> usize {
        self.lock().max_running
    }

    /// Number of `reap()` calls.
    pub fn reap_calls(&self) -> usize {
        self.lock().reaped
    }
}

/// Decrements the in-flight count even when the run is aborted.
struct Running(Arc<Mutex<MockStrategyInner>>);

impl Drop for Running {
    fn drop(&mut self) {
        let mut inner = self.0.lock().unwrap_or_else(|e| e.into_inner());
        inner.running = inner.running.saturating_sub(1);
    }
}

#[async_trait]
impl ExecutionStrategy for MockStrategy {
    async fn run_ephemeral(
        &self,
        target: &Target,
        payload: &TestPayload,
        sink: &mut SinkWriter,
    ) -> Result<(), TargetError> {
        let outcome = {
            let mut inner = self.lock();
            inner.started.push(target.clone());
            inner.payloads.push(payload.clone());
            inner.running += 1;
            inner.max_running = inner.max_running.max(inner.running);
            inner
                .outcomes
                .get(target)
                .cloned()
                .unwrap_or_else(MockOutcome::pass)
        };
        let _running = Running(Arc::clone(&self.inner));

        if !outcome.delay.is_zero() {
            tokio::time::sleep(outcome.delay).await;
        }

        if outcome.panics {
            panic!("mock run for {} crashed", target);
        }

        let result = if outcome.not_found {
            Err(TargetError::TargetNotFound {
                namespace: "mock".into(),
                selector: target.id().to_string(),
            })
        } else {
            for line in &outcome.lines {
                sink.write_line(line).await?;
            }
            remote_exit(target.id(), outcome.exit_code)
        };

        self.lock().finished.push(target.clone());
        result
    }

    async fn reap(&self) {
        self.lock().reaped += 1;
    }
}
