//! Task orchestration primitives.
//!
//! Two shapes, mirroring how the pipeline composes work:
//! - [`Chain`]: ordered stages, each receiving the previous stage's output
//!   as a serialized value. The first failure skips everything downstream.
//! - [`Chord`]: concurrent branches joined in submission order under one
//!   deadline. All-or-nothing: any branch failure fails the chord and
//!   cancels the surviving branches.
//!
//! [`ActiveRuns`] enforces single-flight admission per document id.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::errors::OrchestrationError;

/// Execution status of one stage or branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// Bookkeeping for one stage or branch of a run.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub name: String,
    pub index: usize,
    pub status: TaskStatus,
    pub error: Option<String>,
}

impl TaskRecord {
    fn pending(name: &str, index: usize) -> Self {
        Self {
            name: name.to_string(),
            index,
            status: TaskStatus::Pending,
            error: None,
        }
    }
}

type StageFuture = BoxFuture<'static, anyhow::Result<Value>>;
type StageFn = Box<dyn FnOnce(Value, CancellationToken) -> StageFuture + Send>;

/// Ordered stages passing serialized values forward.
pub struct Chain {
    stages: Vec<(String, StageFn)>,
}

/// What a chain run produced: per-stage records plus the terminal result.
#[derive(Debug)]
pub struct ChainOutcome {
    pub records: Vec<TaskRecord>,
    pub result: Result<Value, OrchestrationError>,
}

impl Default for Chain {
    fn default() -> Self {
        Self::new()
    }
}

impl Chain {
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    /// Append a named stage.
    pub fn stage<F, Fut>(mut self, name: &str, f: F) -> Self
    where
        F: FnOnce(Value, CancellationToken) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.stages
            .push((name.to_string(), Box::new(move |v, c| Box::pin(f(v, c)))));
        self
    }

    /// Run the stages in order. On a stage failure, downstream stages stay
    /// `Pending` and the outcome carries that stage's error.
    pub async fn run(self, initial: Value, cancel: &CancellationToken) -> ChainOutcome {
        let mut records: Vec<TaskRecord> = self
            .stages
            .iter()
            .enumerate()
            .map(|(i, (name, _))| TaskRecord::pending(name, i))
            .collect();

        let mut value = initial;
        for (index, (name, stage)) in self.stages.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return ChainOutcome {
                    records,
                    result: Err(OrchestrationError::Cancelled),
                };
            }

            records[index].status = TaskStatus::Running;
            info!(stage = %name, index, "chain stage started");

            match stage(value, cancel.clone()).await {
                Ok(next) => {
                    records[index].status = TaskStatus::Succeeded;
                    value = next;
                }
                Err(source) => {
                    warn!(stage = %name, index, error = %source, "chain stage failed");
                    records[index].status = TaskStatus::Failed;
                    records[index].error = Some(source.to_string());
                    return ChainOutcome {
                        records,
                        result: Err(OrchestrationError::StageFailed {
                            stage: name,
                            source: source.into(),
                        }),
                    };
                }
            }
        }

        ChainOutcome {
            records,
            result: Ok(value),
        }
    }
}

type BranchFn = Box<dyn FnOnce(CancellationToken) -> StageFuture + Send>;

/// Concurrent branches joined in submission order.
pub struct Chord {
    branches: Vec<(String, BranchFn)>,
    timeout: Duration,
}

impl Chord {
    pub fn new(timeout: Duration) -> Self {
        Self {
            branches: Vec::new(),
            timeout,
        }
    }

    pub fn branch<F, Fut>(mut self, name: &str, f: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.branches
            .push((name.to_string(), Box::new(move |c| Box::pin(f(c)))));
        self
    }

    /// Run every branch concurrently and join the results in the order the
    /// branches were added, regardless of completion order.
    pub async fn run(self, cancel: &CancellationToken) -> Result<Vec<Value>, OrchestrationError> {
        let start = Instant::now();
        let branch_cancel = cancel.child_token();

        let mut handles = Vec::with_capacity(self.branches.len());
        for (name, branch) in self.branches {
            let token = branch_cancel.clone();
            handles.push((
                name,
                tokio::spawn(async move {
                    let result = branch(token.clone()).await;
                    if result.is_err() {
                        // First failure reclaims the surviving branches.
                        token.cancel();
                    }
                    result
                }),
            ));
        }

        let join_all = async {
            let mut results = Vec::with_capacity(handles.len());
            for (name, handle) in handles {
                let result = match handle.await {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => Err((name, e)),
                    Err(e) => Err((name, anyhow::anyhow!("branch panicked: {e}"))),
                };
                results.push(result);
            }
            results
        };

        let results = match tokio::time::timeout(self.timeout, join_all).await {
            Ok(results) => results,
            Err(_) => {
                branch_cancel.cancel();
                return Err(OrchestrationError::JoinTimeout {
                    elapsed: start.elapsed(),
                });
            }
        };

        if cancel.is_cancelled() {
            return Err(OrchestrationError::Cancelled);
        }

        // Submission order is the vec order; surface the first failure.
        let mut values = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok(value) => values.push(value),
                Err((stage, source)) => {
                    return Err(OrchestrationError::StageFailed {
                        stage,
                        source: source.into(),
                    });
                }
            }
        }
        Ok(values)
    }
}

/// Single-flight admission per document id.
#[derive(Default)]
pub struct ActiveRuns {
    inner: Mutex<HashSet<i64>>,
}

impl ActiveRuns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a run for `document_id`, or reject it if one is in flight.
    /// The returned guard releases the slot on drop.
    pub fn try_begin(self: Arc<Self>, document_id: i64) -> Result<RunGuard, OrchestrationError> {
        {
            let mut inner = self.inner.lock().expect("active-runs lock poisoned");
            if !inner.insert(document_id) {
                return Err(OrchestrationError::AlreadyRunning { document_id });
            }
        }
        Ok(RunGuard {
            runs: self,
            document_id,
        })
    }
}

pub struct RunGuard {
    runs: Arc<ActiveRuns>,
    document_id: i64,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.runs
            .inner
            .lock()
            .expect("active-runs lock poisoned")
            .remove(&self.document_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn chain_threads_values_through_stages() {
        let cancel = CancellationToken::new();
        let outcome = Chain::new()
            .stage("double", |v, _| async move {
                Ok(json!(v.as_i64().unwrap() * 2))
            })
            .stage("add_one", |v, _| async move {
                Ok(json!(v.as_i64().unwrap() + 1))
            })
            .run(json!(5), &cancel)
            .await;

        assert_eq!(outcome.result.unwrap(), json!(11));
        assert!(outcome
            .records
            .iter()
            .all(|r| r.status == TaskStatus::Succeeded));
    }

    #[tokio::test]
    async fn chain_failure_skips_downstream() {
        let ran_c = Arc::new(AtomicBool::new(false));
        let witness = ran_c.clone();
        let cancel = CancellationToken::new();

        let outcome = Chain::new()
            .stage("a", |v, _| async move { Ok(v) })
            .stage("b", |_, _| async move { anyhow::bail!("b broke") })
            .stage("c", move |v, _| {
                witness.store(true, Ordering::SeqCst);
                async move { Ok(v) }
            })
            .run(json!(null), &cancel)
            .await;

        let err = outcome.result.unwrap_err();
        match err {
            OrchestrationError::StageFailed { stage, source } => {
                assert_eq!(stage, "b");
                assert!(source.to_string().contains("b broke"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!ran_c.load(Ordering::SeqCst));
        assert_eq!(outcome.records[1].status, TaskStatus::Failed);
        assert_eq!(outcome.records[2].status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn chain_respects_pre_cancelled_token() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = Chain::new()
            .stage("a", |v, _| async move { Ok(v) })
            .run(json!(1), &cancel)
            .await;
        assert!(matches!(
            outcome.result,
            Err(OrchestrationError::Cancelled)
        ));
        assert_eq!(outcome.records[0].status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn chord_joins_in_submission_order() {
        let cancel = CancellationToken::new();
        // Later branches finish first; the join still comes back ordered.
        let values = Chord::new(Duration::from_secs(5))
            .branch("slow", |_| async {
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok(json!("first"))
            })
            .branch("medium", |_| async {
                tokio::time::sleep(Duration::from_millis(15)).await;
                Ok(json!("second"))
            })
            .branch("fast", |_| async { Ok(json!("third")) })
            .run(&cancel)
            .await
            .unwrap();

        assert_eq!(values, vec![json!("first"), json!("second"), json!("third")]);
    }

    #[tokio::test]
    async fn chord_failure_cancels_other_branches() {
        let cancel = CancellationToken::new();
        let slow_finished = Arc::new(AtomicBool::new(false));
        let witness = slow_finished.clone();

        let result = Chord::new(Duration::from_secs(5))
            .branch("fails", |_| async { anyhow::bail!("boom") })
            .branch("slow", move |token| async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(Duration::from_secs(30)) => {
                        witness.store(true, Ordering::SeqCst);
                    }
                }
                Ok(json!(null))
            })
            .run(&cancel)
            .await;

        assert!(matches!(
            result,
            Err(OrchestrationError::StageFailed { .. })
        ));
        assert!(!slow_finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn chord_enforces_deadline() {
        let cancel = CancellationToken::new();
        let result = Chord::new(Duration::from_millis(20))
            .branch("hangs", |token| async move {
                token.cancelled().await;
                Ok(json!(null))
            })
            .run(&cancel)
            .await;
        assert!(matches!(result, Err(OrchestrationError::JoinTimeout { .. })));
    }

    #[tokio::test]
    async fn second_run_for_same_document_is_rejected() {
        let runs = Arc::new(ActiveRuns::new());
        let guard = runs.clone().try_begin(42).unwrap();
        assert!(matches!(
            runs.clone().try_begin(42),
            Err(OrchestrationError::AlreadyRunning { document_id: 42 })
        ));
        // Other documents are unaffected.
        let _other = runs.clone().try_begin(43).unwrap();
        drop(guard);
        let _again = runs.clone().try_begin(42).unwrap();
    }
}
