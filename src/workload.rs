use crate::error::{NautilusError, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;

pub type WorkloadFut<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// One load profile. Identifies exactly one baseline measurement and one
/// telemetry stream per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadSpec {
    pub name: String,
    /// Read percentage of the mix; 0 is pure write, 100 pure read.
    pub read_pct: u8,
    pub block_size: u32,
    pub queue_depth: u32,
    pub duration: Duration,
}

impl WorkloadSpec {
    pub fn new(name: &str, read_pct: u8, block_size: u32, queue_depth: u32, duration: Duration) -> Self {
        Self {
            name: name.to_string(),
            read_pct,
            block_size,
            queue_depth,
            duration,
        }
    }
}

/// How a bounded join ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Completed,
    /// The wait bound expired. The workload keeps running; tearing it
    /// down is the surrounding scenario's wrap-up concern, not ours.
    TimedOut,
}

/// Owner-held handle to one in-flight workload run. Replaces any notion
/// of process-wide "is a workload running" state: validity is the
/// handle's lifetime.
pub struct WorkloadHandle {
    task: tokio::task::JoinHandle<Result<()>>,
    result_path: PathBuf,
}

impl WorkloadHandle {
    pub fn new(task: tokio::task::JoinHandle<Result<()>>, result_path: PathBuf) -> Self {
        Self { task, result_path }
    }

    /// Where this run's telemetry lands once the generator flushes it.
    pub fn result_path(&self) -> &Path {
        &self.result_path
    }

    /// Wait for the run to finish. With a timeout, expiry yields
    /// `TimedOut` and leaves the workload running detached.
    pub async fn join(self, timeout: Option<Duration>) -> Result<JoinOutcome> {
        match timeout {
            None => {
                self.task
                    .await
                    .map_err(|e| NautilusError::Workload(format!("workload task failed: {e}")))??;
                Ok(JoinOutcome::Completed)
            }
            Some(bound) => match tokio::time::timeout(bound, self.task).await {
                Ok(joined) => {
                    joined
                        .map_err(|e| NautilusError::Workload(format!("workload task failed: {e}")))??;
                    Ok(JoinOutcome::Completed)
                }
                Err(_) => {
                    tracing::warn!("workload join timed out after {:?}", bound);
                    Ok(JoinOutcome::TimedOut)
                }
            },
        }
    }
}

/// Integration seam to the external load generator. Implementations own
/// process/file plumbing; the harness only sees handles and result paths.
pub trait WorkloadRunner: Send + Sync {
    fn start(&self, spec: &WorkloadSpec) -> WorkloadFut<'_, WorkloadHandle>;
}
