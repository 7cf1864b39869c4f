// src/stages/mod.rs

//! The two per-cycle stages. Both dispatch their jobs concurrently through an
//! [`ExecutorBackend`](crate::exec::ExecutorBackend) and never fail as a
//! whole: every problem ends up in the per-entity result.

pub mod grade;
pub mod sync;

pub use grade::{GradeReport, GradeStage};
pub use sync::{SyncReport, SyncStage};
