// src/engine/runtime.rs

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigFile, SchedulerSettings};
use crate::detect::{LanguageDetector, ResultDetector};
use crate::errors;
use crate::exec::ExecutorBackend;
use crate::fs::FileSystem;
use crate::layout::Layout;
use crate::notify::{Notifier, Subscriber, SubscriberId};
use crate::stages::{GradeStage, SyncStage};
use crate::state::{EntityState, EntityStore, Snapshot};
use crate::types::{EntityId, LoopState, Period};

use super::core::{merge_cycle, plan_sleep, CycleSummary};

/// State shared between the loop, its cycles and every handle.
struct Shared {
    store: RwLock<EntityStore>,
    notifier: Mutex<Notifier>,
    state: watch::Sender<LoopState>,
    stop: CancellationToken,
    completed_cycles: AtomicU64,
    failed_cycles: AtomicU64,
}

/// Everything one cycle needs. Cheap to clone so each cycle can run in its
/// own task: a panic inside a cycle then surfaces as a `JoinError` at the
/// loop instead of unwinding through it.
#[derive(Clone)]
struct CycleRunner {
    fs: Arc<dyn FileSystem>,
    layout: Arc<Layout>,
    sync: Arc<SyncStage>,
    grade: Arc<GradeStage>,
    shared: Arc<Shared>,
}

impl CycleRunner {
    async fn run(self) -> Result<CycleSummary> {
        let started = Instant::now();
        let period = self.shared.store.read().current_period().to_string();

        let entities = self.layout.discover(self.fs.as_ref())?;
        self.register(&entities, &period);

        let sync = self.sync.sync_all(&entities).await;
        let eligible: Vec<EntityId> = sync.succeeded().cloned().collect();
        let grades = self.grade.grade_all(&eligible, &period).await;

        let (summary, snapshot) = {
            let mut store = self.shared.store.write();
            let summary = merge_cycle(&mut store, &sync, &grades, &period, Utc::now());
            (summary, store.snapshot())
        };

        info!(
            period = %summary.period,
            entities = summary.entities,
            synced = summary.synced,
            sync_failed = summary.sync_failed,
            sync_skipped = summary.sync_skipped,
            graded = summary.graded,
            pass = summary.pass,
            fail = summary.fail,
            unknown = summary.unknown,
            categories = ?summary.by_category,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "cycle complete"
        );

        let mut notifier = self.shared.notifier.lock().await;
        match notifier.notify(&snapshot).await {
            Ok(report) => {
                debug!(delivered = report.delivered, pruned = report.pruned.len(), "snapshot pushed");
            }
            Err(e) => warn!(error = %e, "could not push snapshot to subscribers"),
        }

        Ok(summary)
    }

    /// Start tracking entities seen for the first time, seeding their grade
    /// from whatever markers are already on disk.
    fn register(&self, entities: &[EntityId], period: &str) {
        let new: Vec<&EntityId> = {
            let store = self.shared.store.read();
            entities.iter().filter(|id| !store.contains(id)).collect()
        };
        if new.is_empty() {
            return;
        }

        let detector = self.grade.detector();
        let seeds: Vec<_> = new
            .into_iter()
            .map(|id| {
                let root = self.layout.grading_root(id);
                (id, detector.detect_marker(self.fs.as_ref(), &root, period))
            })
            .collect();

        let mut store = self.shared.store.write();
        for (id, detection) in seeds {
            if !store.register(id) {
                continue;
            }
            if let Some(found) = detection {
                let at = found.modified.map(DateTime::<Utc>::from);
                store.seed_grade(id, period, found.verdict, at);
            }
            info!(entity = %id, "tracking new entity");
        }
    }
}

/// The Scheduler Loop.
///
/// Owns the entity store and drives `sync -> grade -> merge -> notify` once
/// per interval until stopped. Construct it once at the top of the program
/// and hand [`SchedulerHandle`]s to whoever needs to query or steer it.
pub struct Scheduler {
    runner: CycleRunner,
    settings: SchedulerSettings,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    pub fn new(
        config: &ConfigFile,
        layout: Layout,
        executor: Arc<dyn ExecutorBackend>,
        fs: Arc<dyn FileSystem>,
    ) -> Result<Self> {
        let layout = Arc::new(layout);
        let store = EntityStore::new(config.periods.valid.clone(), config.periods.current.clone())?;

        let sync = SyncStage::new(
            Arc::clone(&executor),
            Arc::clone(&fs),
            Arc::clone(&layout),
            config.sync.clone(),
        );
        let grade = GradeStage::new(
            executor,
            Arc::clone(&fs),
            Arc::clone(&layout),
            ResultDetector::new(&config.results),
            LanguageDetector::new(&config.languages)?,
            config.grading.clone(),
            config.limits,
            config.results.explanation_file.clone(),
        );

        let (state, _) = watch::channel(LoopState::Stopped);
        let shared = Arc::new(Shared {
            store: RwLock::new(store),
            notifier: Mutex::new(Notifier::default()),
            state,
            stop: CancellationToken::new(),
            completed_cycles: AtomicU64::new(0),
            failed_cycles: AtomicU64::new(0),
        });

        Ok(Self {
            runner: CycleRunner {
                fs,
                layout,
                sync: Arc::new(sync),
                grade: Arc::new(grade),
                shared,
            },
            settings: config.scheduler,
        })
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            shared: Arc::clone(&self.runner.shared),
        }
    }

    /// Run the loop on a background task.
    pub fn start(self) -> (SchedulerHandle, JoinHandle<()>) {
        let handle = self.handle();
        let task = tokio::spawn(async move { self.run().await });
        (handle, task)
    }

    /// Run a single cycle and return its summary.
    pub async fn run_once(&self) -> Result<CycleSummary> {
        self.cycle().await
    }

    /// Run cycles until a stop is requested.
    ///
    /// The stop request is honoured only between cycles: a cycle in progress
    /// always finishes. A failed cycle is logged and followed by the shorter
    /// error backoff instead of the regular interval.
    pub async fn run(&self) {
        let shared = &self.runner.shared;
        shared.state.send_replace(LoopState::Running);
        info!(
            interval_ms = self.settings.interval.as_millis() as u64,
            error_backoff_ms = self.settings.error_backoff.as_millis() as u64,
            "scheduler loop started"
        );

        while !shared.stop.is_cancelled() {
            let started = Instant::now();
            let wait = match self.cycle().await {
                Ok(_) => {
                    let plan = plan_sleep(self.settings.interval, started.elapsed());
                    if let Some(overrun) = plan.overrun {
                        warn!(
                            interval_ms = self.settings.interval.as_millis() as u64,
                            overrun_ms = overrun.as_millis() as u64,
                            "cycle overran the interval; starting next cycle immediately"
                        );
                    }
                    plan.sleep
                }
                Err(e) => {
                    error!(
                        error = ?e,
                        backoff_ms = self.settings.error_backoff.as_millis() as u64,
                        "cycle failed"
                    );
                    self.settings.error_backoff
                }
            };

            if !self.sleep_or_stop(wait).await {
                break;
            }
        }

        shared.notifier.lock().await.clear();
        shared.state.send_replace(LoopState::Stopped);
        info!("scheduler loop stopped");
    }

    async fn cycle(&self) -> Result<CycleSummary> {
        let runner = self.runner.clone();
        let result = match tokio::spawn(runner.run()).await {
            Ok(result) => result,
            Err(e) => Err(anyhow!("cycle task panicked: {e}")),
        };

        let counter = match result {
            Ok(_) => &self.runner.shared.completed_cycles,
            Err(_) => &self.runner.shared.failed_cycles,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        result
    }

    /// Returns `false` if a stop was requested while waiting.
    async fn sleep_or_stop(&self, wait: Duration) -> bool {
        let stop = &self.runner.shared.stop;
        if wait.is_zero() {
            return !stop.is_cancelled();
        }
        tokio::select! {
            _ = tokio::time::sleep(wait) => !stop.is_cancelled(),
            _ = stop.cancelled() => false,
        }
    }
}

/// Cloneable, read-mostly view of a running scheduler.
///
/// Every read returns a copy; nothing hands out references into live state.
#[derive(Clone)]
pub struct SchedulerHandle {
    shared: Arc<Shared>,
}

impl fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerHandle")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl SchedulerHandle {
    pub fn current_snapshot(&self) -> Snapshot {
        self.shared.store.read().snapshot()
    }

    pub fn current_period(&self) -> Period {
        self.shared.store.read().current_period().to_string()
    }

    pub fn valid_periods(&self) -> Vec<Period> {
        self.shared.store.read().valid_periods().to_vec()
    }

    pub fn entity(&self, id: &str) -> Option<EntityState> {
        self.shared.store.read().get(id)
    }

    /// Switch the current period. Rejected periods change nothing.
    pub fn set_period(&self, period: &str) -> errors::Result<()> {
        self.shared.store.write().set_period(period)
    }

    /// Ask the loop to exit after the cycle in progress.
    pub fn stop(&self) {
        if !self.shared.stop.is_cancelled() {
            info!("stop requested; the loop exits at the next cycle boundary");
        }
        self.shared.stop.cancel();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.shared.stop.is_cancelled()
    }

    pub fn state(&self) -> LoopState {
        *self.shared.state.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<LoopState> {
        self.shared.state.subscribe()
    }

    pub async fn subscribe(&self, subscriber: Box<dyn Subscriber>) -> SubscriberId {
        self.shared.notifier.lock().await.subscribe(subscriber)
    }

    pub async fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.shared.notifier.lock().await.unsubscribe(id)
    }

    pub fn completed_cycles(&self) -> u64 {
        self.shared.completed_cycles.load(Ordering::Relaxed)
    }

    pub fn failed_cycles(&self) -> u64 {
        self.shared.failed_cycles.load(Ordering::Relaxed)
    }
}
