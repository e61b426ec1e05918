use std::future::Future;
use std::time::Duration;

use tokio::task::JoinSet;

use crate::actuator::ActuatorError;
use crate::plan::SegmentType;

/// How a side effect ended on its own.
#[derive(Debug)]
pub(crate) struct SideEffectOutcome {
    pub primitive_id: String,
    pub segment_type: SegmentType,
    /// `None` when the command was still pending at the end of its bound.
    pub result: Option<Result<(), ActuatorError>>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Shutdown {
    pub cancelled: usize,
    pub failed: usize,
}

/// Expression and light commands running next to the motion loop. Each task
/// is bounded by the time its segment may occupy; whatever is left at
/// teardown is aborted as a group.
#[derive(Debug, Default)]
pub(crate) struct SideEffectSet {
    tasks: JoinSet<SideEffectOutcome>,
}

impl SideEffectSet {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn spawn<F>(&mut self, primitive_id: String, segment_type: SegmentType, bound: Duration, command: F)
    where
        F: Future<Output = Result<(), ActuatorError>> + Send + 'static,
    {
        self.tasks.spawn(async move {
            let result = tokio::time::timeout(bound, command).await.ok();
            SideEffectOutcome {
                primitive_id,
                segment_type,
                result,
            }
        });
    }

    /// Collects tasks that already finished. Returns how many failed.
    pub fn reap(&mut self) -> usize {
        let mut failed = 0;
        while let Some(joined) = self.tasks.try_join_next() {
            if !record(joined) {
                failed += 1;
            }
        }
        failed
    }

    /// Aborts everything still running and waits up to `grace` for the
    /// tasks to wind down.
    pub async fn shutdown(&mut self, grace: Duration) -> Shutdown {
        let mut summary = Shutdown::default();
        summary.failed += self.reap();
        if self.tasks.is_empty() {
            return summary;
        }

        self.tasks.abort_all();
        let drain = async {
            let mut drained = Shutdown::default();
            while let Some(joined) = self.tasks.join_next().await {
                match joined {
                    Err(err) if err.is_cancelled() => drained.cancelled += 1,
                    other => {
                        if !record(other) {
                            drained.failed += 1;
                        }
                    }
                }
            }
            drained
        };
        match tokio::time::timeout(grace, drain).await {
            Ok(drained) => {
                summary.cancelled += drained.cancelled;
                summary.failed += drained.failed;
            }
            Err(_) => {
                tracing::warn!(pending = self.tasks.len(), "side effects did not stop within the grace period");
                summary.cancelled += self.tasks.len();
                self.tasks.detach_all();
            }
        }
        summary
    }
}

/// Logs a finished task. Returns `false` when it counts as a failure.
fn record(joined: Result<SideEffectOutcome, tokio::task::JoinError>) -> bool {
    match joined {
        Ok(SideEffectOutcome {
            result: Some(Err(err)),
            primitive_id,
            segment_type,
        }) => {
            tracing::warn!(id = %primitive_id, kind = %segment_type, error = %err, "side effect failed");
            false
        }
        Ok(_) => true,
        Err(err) => {
            tracing::error!(error = %err, "side effect task crashed");
            false
        }
    }
}
