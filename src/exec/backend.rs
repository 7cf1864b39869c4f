// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The stages talk to an `ExecutorBackend` instead of spawning processes
//! themselves. This makes it easy to swap in a fake executor in tests while
//! keeping the production implementation in [`ProcessExecutor`].
//!
//! - `ProcessExecutor` is the Bounded Executor used by `gradewatch`: a
//!   semaphore admits at most `max_concurrent` subprocesses at once, every
//!   job gets a wall-clock timeout, and grading jobs get resource limits.
//! - Tests can provide their own `ExecutorBackend` that, for example, records
//!   which jobs were requested and returns canned outcomes.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::ExecutorSettings;
use crate::exec::job::{JobOutcome, JobSpec};
use crate::exec::limits::supports_resource_limits;
use crate::exec::process::{run_process, ProcessOptions};

/// Trait abstracting how jobs are executed.
///
/// Implementations must be callable concurrently and must never fail: every
/// problem is reported through the returned [`JobOutcome`].
pub trait ExecutorBackend: Send + Sync {
    fn run(&self, job: JobSpec) -> Pin<Box<dyn Future<Output = JobOutcome> + Send + '_>>;
}

/// Real, concurrency-capped subprocess executor.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    slots: Arc<Semaphore>,
    max_concurrent: usize,
    options: ProcessOptions,
}

impl ProcessExecutor {
    /// Create an executor from `[executor]` settings.
    ///
    /// `limits_requested` says whether any job will carry resource limits; if
    /// so and the platform cannot enforce them, that is logged here, once.
    pub fn new(settings: &ExecutorSettings, limits_requested: bool) -> Self {
        let supported = supports_resource_limits();
        if limits_requested && !supported {
            warn!(
                "resource limits are not supported on this platform; grading jobs run without CPU/memory/file/process limits"
            );
        }
        info!(
            max_concurrent = settings.max_concurrent,
            limits = limits_requested && supported,
            "process executor ready"
        );

        Self {
            slots: Arc::new(Semaphore::new(settings.max_concurrent)),
            max_concurrent: settings.max_concurrent,
            options: ProcessOptions {
                kill_grace: settings.kill_grace,
                max_output_bytes: settings.max_output_bytes,
                apply_limits: supported,
            },
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Number of jobs currently holding an execution slot.
    pub fn in_flight(&self) -> usize {
        self.max_concurrent - self.slots.available_permits()
    }
}

impl ExecutorBackend for ProcessExecutor {
    fn run(&self, job: JobSpec) -> Pin<Box<dyn Future<Output = JobOutcome> + Send + '_>> {
        Box::pin(async move {
            // The permit is released on drop, whatever happens below.
            let _permit = match self.slots.acquire().await {
                Ok(permit) => permit,
                Err(_) => return JobOutcome::errored("executor has been shut down"),
            };
            debug!(
                entity = job.entity.as_deref().unwrap_or("-"),
                kind = ?job.kind,
                in_flight = self.in_flight(),
                "acquired execution slot"
            );
            run_process(&job, self.options).await
        })
    }
}
