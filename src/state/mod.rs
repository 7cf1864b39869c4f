// src/state/mod.rs

//! Entity State Store.
//!
//! One record per tracked entity. The scheduler loop is the only writer; every
//! reader gets a [`Snapshot`], which is a deep copy taken under the lock.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::errors::{GradewatchError, Result};
use crate::exec::JobOutcome;
use crate::types::{EntityId, FailureCategory, GradeVerdict, Period, SyncStatus};

/// Mutable status of one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityState {
    pub id: EntityId,
    pub sync_status: SyncStatus,
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Trimmed output of the last sync (stdout on success, stderr otherwise).
    pub last_sync_message: Option<String>,
    pub grade_status: GradeVerdict,
    pub last_grade_time: Option<DateTime<Utc>>,
    /// Period the grade status refers to.
    pub period: Period,
    pub failure_category: Option<FailureCategory>,
}

impl EntityState {
    fn new(id: EntityId, period: Period) -> Self {
        Self {
            id,
            sync_status: SyncStatus::Unattempted,
            last_sync_time: None,
            last_sync_message: None,
            grade_status: GradeVerdict::Unknown,
            last_grade_time: None,
            period,
            failure_category: None,
        }
    }

    fn reset_grade(&mut self, period: &str) {
        self.period = period.to_string();
        self.grade_status = GradeVerdict::Unknown;
        self.last_grade_time = None;
        self.failure_category = None;
    }
}

/// Sync result to merge into an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncUpdate {
    pub status: SyncStatus,
    pub message: String,
}

impl From<&JobOutcome> for SyncUpdate {
    fn from(outcome: &JobOutcome) -> Self {
        Self {
            status: outcome.sync_status(),
            message: outcome.message(),
        }
    }
}

/// Grade result to merge into an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GradeUpdate {
    pub verdict: GradeVerdict,
    pub category: Option<FailureCategory>,
}

/// Pass / fail / unknown counts over a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GradeSummary {
    pub pass: usize,
    pub fail: usize,
    pub unknown: usize,
}

/// Point-in-time copy of the whole store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub period: Period,
    pub taken_at: DateTime<Utc>,
    pub entities: BTreeMap<EntityId, EntityState>,
}

impl Snapshot {
    pub fn summary(&self) -> GradeSummary {
        let mut summary = GradeSummary::default();
        for entity in self.entities.values() {
            match entity.grade_status {
                GradeVerdict::Pass => summary.pass += 1,
                GradeVerdict::Fail => summary.fail += 1,
                GradeVerdict::Unknown => summary.unknown += 1,
            }
        }
        summary
    }
}

#[derive(Debug)]
pub struct EntityStore {
    valid_periods: Vec<Period>,
    current_period: Period,
    entities: BTreeMap<EntityId, EntityState>,
}

impl EntityStore {
    pub fn new(valid_periods: Vec<Period>, current_period: Period) -> Result<Self> {
        if !valid_periods.contains(&current_period) {
            return Err(GradewatchError::InvalidPeriod {
                period: current_period,
                valid: valid_periods,
            });
        }
        Ok(Self {
            valid_periods,
            current_period,
            entities: BTreeMap::new(),
        })
    }

    pub fn current_period(&self) -> &str {
        &self.current_period
    }

    pub fn valid_periods(&self) -> &[Period] {
        &self.valid_periods
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entities.contains_key(id)
    }

    /// Start tracking `id`. Returns `false` if it was already tracked.
    pub fn register(&mut self, id: &str) -> bool {
        if self.entities.contains_key(id) {
            return false;
        }
        debug!(entity = id, "registering entity");
        self.entities.insert(
            id.to_string(),
            EntityState::new(id.to_string(), self.current_period.clone()),
        );
        true
    }

    /// Initialise the grade of a freshly registered entity from what is
    /// already on disk for `period`.
    ///
    /// Ignored once the entity has a graded result, and when `period` is no
    /// longer the current period. Returns whether the seed was applied.
    pub fn seed_grade(
        &mut self,
        id: &str,
        period: &str,
        verdict: GradeVerdict,
        at: Option<DateTime<Utc>>,
    ) -> bool {
        if period != self.current_period {
            debug!(entity = id, period, current = %self.current_period, "dropping seed for stale period");
            return false;
        }
        if let Some(entity) = self.entities.get_mut(id) {
            if entity.last_grade_time.is_none() && entity.grade_status == GradeVerdict::Unknown {
                entity.grade_status = verdict;
                entity.last_grade_time = at;
                return true;
            }
        }
        false
    }

    /// Merge one cycle's results for `id`.
    ///
    /// `period` is the period the grade was computed for. A grade for any
    /// other period than the current one is dropped, so a late result can
    /// never leak across a period switch. Returns whether the grade was
    /// applied.
    pub fn merge(
        &mut self,
        id: &str,
        sync: Option<SyncUpdate>,
        grade: Option<GradeUpdate>,
        period: &str,
        now: DateTime<Utc>,
    ) -> bool {
        self.register(id);
        let current = self.current_period.clone();
        let Some(entity) = self.entities.get_mut(id) else {
            return false;
        };

        if let Some(sync) = sync {
            entity.sync_status = sync.status;
            entity.last_sync_time = Some(now);
            entity.last_sync_message = Some(sync.message);
        }

        let Some(grade) = grade else {
            return false;
        };
        if period != current {
            debug!(
                entity = id,
                grade_period = period,
                current_period = %current,
                "dropping grade computed for a stale period"
            );
            return false;
        }

        entity.period = current;
        entity.grade_status = grade.verdict;
        entity.failure_category = grade.category;
        entity.last_grade_time = Some(now);
        true
    }

    pub fn get(&self, id: &str) -> Option<EntityState> {
        self.entities.get(id).cloned()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            period: self.current_period.clone(),
            taken_at: Utc::now(),
            entities: self.entities.clone(),
        }
    }

    /// Switch the current period and reset every grade to unknown.
    ///
    /// An unknown period is rejected and nothing changes.
    pub fn set_period(&mut self, period: &str) -> Result<()> {
        if !self.valid_periods.iter().any(|p| p == period) {
            return Err(GradewatchError::InvalidPeriod {
                period: period.to_string(),
                valid: self.valid_periods.clone(),
            });
        }

        self.current_period = period.to_string();
        for entity in self.entities.values_mut() {
            entity.reset_grade(period);
        }
        info!(period, entities = self.entities.len(), "current period changed; grades reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn store() -> EntityStore {
        EntityStore::new(
            vec!["week01".to_string(), "week02".to_string()],
            "week01".to_string(),
        )
        .unwrap()
    }

    fn pass() -> Option<GradeUpdate> {
        Some(GradeUpdate {
            verdict: GradeVerdict::Pass,
            category: None,
        })
    }

    #[test]
    fn new_rejects_current_outside_valid() {
        let err = EntityStore::new(vec!["week01".into()], "week09".into()).unwrap_err();
        assert!(matches!(err, GradewatchError::InvalidPeriod { .. }));
    }

    #[test]
    fn merge_updates_sync_and_grade() {
        let mut s = store();
        let sync = SyncUpdate::from(&JobOutcome::success("Already up to date.\n"));
        assert!(s.merge("S1", Some(sync), pass(), "week01", Utc::now()));

        let e = s.get("S1").unwrap();
        assert_eq!(e.sync_status, SyncStatus::Success);
        assert_eq!(e.last_sync_message.as_deref(), Some("Already up to date."));
        assert_eq!(e.grade_status, GradeVerdict::Pass);
        assert!(e.last_grade_time.is_some());
    }

    #[test]
    fn sync_only_merge_keeps_previous_grade() {
        let mut s = store();
        s.merge("S2", None, pass(), "week01", Utc::now());
        let failed = SyncUpdate::from(&JobOutcome::exited(1, "fatal: could not read"));
        assert!(!s.merge("S2", Some(failed), None, "week01", Utc::now()));

        let e = s.get("S2").unwrap();
        assert_eq!(e.sync_status, SyncStatus::Failed);
        assert_eq!(e.grade_status, GradeVerdict::Pass);
    }

    #[test]
    fn grade_for_stale_period_is_dropped() {
        let mut s = store();
        s.register("S1");
        s.set_period("week02").unwrap();
        assert!(!s.merge("S1", None, pass(), "week01", Utc::now()));
        assert_eq!(s.get("S1").unwrap().grade_status, GradeVerdict::Unknown);
    }

    #[test]
    fn set_period_resets_grades() {
        let mut s = store();
        s.merge(
            "S1",
            None,
            Some(GradeUpdate {
                verdict: GradeVerdict::Fail,
                category: Some(FailureCategory::CompileFailure),
            }),
            "week01",
            Utc::now(),
        );
        s.merge("S2", None, pass(), "week01", Utc::now());

        s.set_period("week02").unwrap();

        for e in s.snapshot().entities.values() {
            assert_eq!(e.grade_status, GradeVerdict::Unknown);
            assert_eq!(e.failure_category, None);
            assert_eq!(e.period, "week02");
        }
        assert_eq!(s.current_period(), "week02");
    }

    #[test]
    fn seed_only_fills_ungraded_entities() {
        let mut s = store();
        s.register("S1");
        assert!(s.seed_grade("S1", "week01", GradeVerdict::Fail, None));
        assert_eq!(s.get("S1").unwrap().grade_status, GradeVerdict::Fail);

        s.merge("S1", None, pass(), "week01", Utc::now());
        assert!(!s.seed_grade("S1", "week01", GradeVerdict::Fail, None));
        assert_eq!(s.get("S1").unwrap().grade_status, GradeVerdict::Pass);
    }

    #[test]
    fn seed_read_before_a_period_switch_is_dropped() {
        let mut s = store();
        // Markers were read for week01, then the period moved on before the
        // entity got registered.
        s.set_period("week02").unwrap();
        s.register("S1");

        assert!(!s.seed_grade("S1", "week01", GradeVerdict::Pass, Some(Utc::now())));
        let e = s.get("S1").unwrap();
        assert_eq!(e.period, "week02");
        assert_eq!(e.grade_status, GradeVerdict::Unknown);
        assert_eq!(e.last_grade_time, None);
    }

    #[test]
    fn snapshot_is_a_detached_copy() {
        let mut s = store();
        s.register("S1");
        let snap = s.snapshot();
        s.merge("S1", None, pass(), "week01", Utc::now());

        assert_eq!(snap.entities["S1"].grade_status, GradeVerdict::Unknown);
        assert_eq!(snap.summary(), GradeSummary { pass: 0, fail: 0, unknown: 1 });
        assert_eq!(s.snapshot().summary().pass, 1);
    }

    fn verdict() -> impl Strategy<Value = GradeVerdict> {
        prop_oneof![
            Just(GradeVerdict::Pass),
            Just(GradeVerdict::Fail),
            Just(GradeVerdict::Unknown),
        ]
    }

    proptest! {
        #[test]
        fn invalid_period_leaves_state_untouched(
            grades in proptest::collection::btree_map("S[0-9]{1,3}", verdict(), 0..20),
            bogus in "[a-z]{1,8}",
        ) {
            prop_assume!(bogus != "week01" && bogus != "week02");
            let mut s = store();
            for (id, v) in &grades {
                s.merge(id, None, Some(GradeUpdate { verdict: *v, category: None }), "week01", Utc::now());
            }
            let before = s.snapshot();

            prop_assert!(s.set_period(&bogus).is_err());

            let after = s.snapshot();
            prop_assert_eq!(before.entities, after.entities);
            prop_assert_eq!(s.current_period(), "week01");
        }

        #[test]
        fn valid_period_resets_every_grade(
            grades in proptest::collection::btree_map("S[0-9]{1,3}", verdict(), 0..20),
            target in prop_oneof![Just("week01"), Just("week02")],
        ) {
            let mut s = store();
            for (id, v) in &grades {
                s.merge(id, None, Some(GradeUpdate { verdict: *v, category: None }), "week01", Utc::now());
            }

            s.set_period(target).unwrap();

            let snap = s.snapshot();
            prop_assert_eq!(snap.entities.len(), grades.len());
            prop_assert!(snap.entities.values().all(|e| e.grade_status == GradeVerdict::Unknown));
        }
    }
}
