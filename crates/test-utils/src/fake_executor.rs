use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use gradewatch::exec::{ExecutorBackend, JobKind, JobOutcome, JobSpec};

type Responder = dyn Fn(&JobSpec) -> JobOutcome + Send + Sync;

/// A fake executor that:
/// - records every job it was asked to run
/// - answers with whatever the responder closure returns, optionally after a
///   (Tokio) delay
///
/// The responder may touch the filesystem, e.g. to play a grading program
/// that writes a marker.
pub struct FakeExecutor {
    responder: Arc<Responder>,
    delay: Option<Duration>,
    jobs: Arc<Mutex<Vec<JobSpec>>>,
}

impl FakeExecutor {
    pub fn new(responder: impl Fn(&JobSpec) -> JobOutcome + Send + Sync + 'static) -> Self {
        Self {
            responder: Arc::new(responder),
            delay: None,
            jobs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every job succeeds with empty output.
    pub fn succeeding() -> Self {
        Self::new(|_| JobOutcome::success(""))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn jobs(&self) -> Vec<JobSpec> {
        self.jobs.lock().unwrap().clone()
    }

    pub fn jobs_for(&self, entity: &str) -> Vec<JobSpec> {
        self.jobs()
            .into_iter()
            .filter(|j| j.entity.as_deref() == Some(entity))
            .collect()
    }

    pub fn count(&self, kind: JobKind) -> usize {
        self.jobs().iter().filter(|j| j.kind == kind).count()
    }
}

impl ExecutorBackend for FakeExecutor {
    fn run(&self, job: JobSpec) -> Pin<Box<dyn Future<Output = JobOutcome> + Send + '_>> {
        Box::pin(async move {
            self.jobs.lock().unwrap().push(job.clone());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            (self.responder)(&job)
        })
    }
}
