// src/stages/sync.rs

//! Sync Stage: refresh every existing working copy.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::SyncSettings;
use crate::exec::{ExecutorBackend, JobKind, JobOutcome, JobSpec};
use crate::fs::FileSystem;
use crate::layout::Layout;
use crate::types::EntityId;

/// What one sync pass produced.
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Outcome per entity that had a working copy and was synced.
    pub outcomes: BTreeMap<EntityId, JobOutcome>,
    /// Entities without a working copy. Not failures: cloning them is the
    /// job of whoever bootstraps the entities directory.
    pub skipped: Vec<EntityId>,
}

impl SyncReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &EntityId> {
        self.outcomes
            .iter()
            .filter(|(_, o)| o.succeeded)
            .map(|(id, _)| id)
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.values().filter(|o| !o.succeeded).count()
    }
}

pub struct SyncStage {
    executor: Arc<dyn ExecutorBackend>,
    fs: Arc<dyn FileSystem>,
    layout: Arc<Layout>,
    settings: SyncSettings,
}

impl SyncStage {
    pub fn new(
        executor: Arc<dyn ExecutorBackend>,
        fs: Arc<dyn FileSystem>,
        layout: Arc<Layout>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            executor,
            fs,
            layout,
            settings,
        }
    }

    /// Run the sync command for every entity that has a working copy.
    ///
    /// Jobs are dispatched together and only throttled by the executor. A job
    /// whose task dies is recorded as an errored outcome for its entity and
    /// does not affect the others.
    pub async fn sync_all(&self, entities: &[EntityId]) -> SyncReport {
        let mut report = SyncReport::default();
        let mut handles = Vec::with_capacity(entities.len());

        for id in entities {
            let working_copy = self.layout.working_copy(id);
            if !self.fs.is_dir(&working_copy) {
                debug!(entity = %id, path = %working_copy.display(), "no working copy; skipping sync");
                report.skipped.push(id.clone());
                continue;
            }

            let job = JobSpec::shell(
                JobKind::Sync,
                &self.settings.command,
                &working_copy,
                self.settings.timeout,
            )
            .for_entity(id.as_str());
            let executor = Arc::clone(&self.executor);
            let handle = tokio::spawn(async move { executor.run(job).await });
            handles.push((id.clone(), handle));
        }

        for (id, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(entity = %id, error = %e, "sync job aborted");
                    JobOutcome::errored(format!("sync job aborted: {e}"))
                }
            };
            if !outcome.succeeded {
                warn!(
                    entity = %id,
                    status = %outcome.sync_status(),
                    message = %outcome.message(),
                    "sync failed"
                );
            }
            report.outcomes.insert(id, outcome);
        }

        info!(
            synced = report.outcomes.len(),
            failed = report.failed_count(),
            skipped = report.skipped.len(),
            "sync stage finished"
        );
        report
    }
}
