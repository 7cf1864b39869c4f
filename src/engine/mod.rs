// src/engine/mod.rs

//! Orchestration engine for gradewatch.
//!
//! One cycle is `discover -> sync -> grade -> merge -> notify`. The pure
//! pieces (sleep planning, merging stage results into the store) live in
//! [`core`]; the async loop, its stop handling and the [`SchedulerHandle`]
//! given to external callers live in [`runtime`].

pub mod core;
pub mod runtime;

pub use self::core::{merge_cycle, plan_sleep, CycleSummary, SleepPlan};
pub use runtime::{Scheduler, SchedulerHandle};
