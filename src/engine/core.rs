// src/engine/core.rs

//! Pure parts of the scheduler loop.
//!
//! Sleep planning and merging a cycle's stage results into the store are
//! plain synchronous functions with no Tokio, channels, filesystem or
//! processes, so they can be unit tested directly. The async shell lives in
//! [`runtime`](super::runtime).

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::stages::{GradeReport, SyncReport};
use crate::state::{EntityStore, SyncUpdate};
use crate::types::{EntityId, FailureCategory, GradeVerdict, Period};

/// How long to wait before the next cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SleepPlan {
    pub sleep: Duration,
    /// Set when the cycle took longer than the interval; holds the excess.
    pub overrun: Option<Duration>,
}

/// `sleep = max(0, interval - elapsed)`.
///
/// An overrun never shortens or skips later cycles: the next cycle simply
/// starts right away.
pub fn plan_sleep(interval: Duration, elapsed: Duration) -> SleepPlan {
    let overrun = elapsed.checked_sub(interval).filter(|d| !d.is_zero());
    SleepPlan {
        sleep: interval.saturating_sub(elapsed),
        overrun,
    }
}

/// Aggregate counts for one cycle, logged by the loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    pub period: Period,
    pub entities: usize,
    pub synced: usize,
    pub sync_failed: usize,
    pub sync_skipped: usize,
    pub graded: usize,
    pub pass: usize,
    pub fail: usize,
    pub unknown: usize,
    pub by_category: BTreeMap<FailureCategory, usize>,
}

/// Fold one cycle's stage results into `store`.
///
/// Every synced entity gets its sync status; entities that were graded also
/// get their verdict. Entities that were skipped by the sync stage are left
/// untouched, as are the grades of entities whose sync failed.
pub fn merge_cycle(
    store: &mut EntityStore,
    sync: &SyncReport,
    grades: &BTreeMap<EntityId, GradeReport>,
    period: &str,
    now: DateTime<Utc>,
) -> CycleSummary {
    let mut summary = CycleSummary {
        period: period.to_string(),
        entities: store.len(),
        sync_skipped: sync.skipped.len(),
        ..CycleSummary::default()
    };

    for (id, outcome) in &sync.outcomes {
        if outcome.succeeded {
            summary.synced += 1;
        } else {
            summary.sync_failed += 1;
        }

        // Grades only exist for entities whose sync succeeded.
        let grade = grades
            .get(id)
            .filter(|_| outcome.succeeded)
            .map(GradeReport::update);
        let applied = store.merge(id, Some(SyncUpdate::from(outcome)), grade, period, now);
        if !applied {
            continue;
        }

        let Some(report) = grades.get(id) else {
            continue;
        };
        summary.graded += 1;
        match report.verdict {
            GradeVerdict::Pass => summary.pass += 1,
            GradeVerdict::Fail => summary.fail += 1,
            GradeVerdict::Unknown => summary.unknown += 1,
        }
        if let Some(category) = report.category {
            *summary.by_category.entry(category).or_default() += 1;
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::JobOutcome;
    use crate::types::SyncStatus;

    fn report(verdict: GradeVerdict, category: Option<FailureCategory>) -> GradeReport {
        GradeReport {
            verdict,
            category,
            language: None,
            detail: String::new(),
        }
    }

    fn store() -> EntityStore {
        let mut store = EntityStore::new(vec!["week01".into()], "week01".into()).unwrap();
        for id in ["S1", "S2", "S3", "S4"] {
            store.register(id);
        }
        store
    }

    #[test]
    fn sleep_is_interval_minus_elapsed() {
        let plan = plan_sleep(Duration::from_secs(60), Duration::from_secs(45));
        assert_eq!(plan.sleep, Duration::from_secs(15));
        assert_eq!(plan.overrun, None);

        let plan = plan_sleep(Duration::from_secs(60), Duration::from_secs(60));
        assert_eq!(plan.sleep, Duration::ZERO);
        assert_eq!(plan.overrun, None);
    }

    #[test]
    fn overrun_means_no_sleep_and_no_catch_up() {
        let plan = plan_sleep(Duration::from_secs(60), Duration::from_secs(95));
        assert_eq!(plan.sleep, Duration::ZERO);
        assert_eq!(plan.overrun, Some(Duration::from_secs(35)));
    }

    #[test]
    fn merge_applies_sync_and_grades_and_counts_buckets() {
        let mut store = store();
        store.merge(
            "S2",
            None,
            Some(crate::state::GradeUpdate {
                verdict: GradeVerdict::Pass,
                category: None,
            }),
            "week01",
            Utc::now(),
        );

        let mut sync = SyncReport::default();
        sync.outcomes.insert("S1".into(), JobOutcome::success("Already up to date"));
        sync.outcomes.insert("S2".into(), JobOutcome::exited(1, "fatal"));
        sync.outcomes.insert("S3".into(), JobOutcome::success(""));
        sync.skipped.push("S4".into());

        let mut grades = BTreeMap::new();
        grades.insert("S1".to_string(), report(GradeVerdict::Pass, None));
        grades.insert(
            "S3".to_string(),
            report(GradeVerdict::Unknown, Some(FailureCategory::NoLanguageDetected)),
        );

        let summary = merge_cycle(&mut store, &sync, &grades, "week01", Utc::now());

        assert_eq!(summary.entities, 4);
        assert_eq!(summary.synced, 2);
        assert_eq!(summary.sync_failed, 1);
        assert_eq!(summary.sync_skipped, 1);
        assert_eq!(summary.graded, 2);
        assert_eq!((summary.pass, summary.fail, summary.unknown), (1, 0, 1));
        assert_eq!(summary.by_category[&FailureCategory::NoLanguageDetected], 1);

        let s2 = store.get("S2").unwrap();
        assert_eq!(s2.sync_status, SyncStatus::Failed);
        assert_eq!(s2.grade_status, GradeVerdict::Pass, "failed sync keeps previous grade");

        let s3 = store.get("S3").unwrap();
        assert_eq!(s3.failure_category, Some(FailureCategory::NoLanguageDetected));

        let s4 = store.get("S4").unwrap();
        assert_eq!(s4.sync_status, SyncStatus::Unattempted);
    }

    #[test]
    fn grade_for_failed_sync_is_never_applied() {
        let mut store = store();
        let mut sync = SyncReport::default();
        sync.outcomes.insert("S1".into(), JobOutcome::timed_out(Duration::from_secs(30)));
        let mut grades = BTreeMap::new();
        grades.insert("S1".to_string(), report(GradeVerdict::Fail, None));

        let summary = merge_cycle(&mut store, &sync, &grades, "week01", Utc::now());

        assert_eq!(summary.graded, 0);
        let s1 = store.get("S1").unwrap();
        assert_eq!(s1.sync_status, SyncStatus::TimedOut);
        assert_eq!(s1.grade_status, GradeVerdict::Unknown);
    }
}
