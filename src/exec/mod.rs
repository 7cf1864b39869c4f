// src/exec/mod.rs

//! Process execution layer (the Bounded Executor).
//!
//! - [`job`] describes what to run (`JobSpec`) and how it ended (`JobOutcome`).
//! - [`process`] runs one subprocess with output capture, timeout and
//!   terminate-then-kill handling.
//! - [`limits`] installs best-effort CPU/memory/file/process limits.
//! - [`backend`] provides the `ExecutorBackend` trait and the concurrency
//!   capped `ProcessExecutor` that the stages use in production, and which
//!   tests can replace with a fake implementation.

pub mod backend;
pub mod job;
pub mod limits;
pub mod process;

pub use backend::{ExecutorBackend, ProcessExecutor};
pub use job::{JobKind, JobOutcome, JobSpec};
pub use limits::{supports_resource_limits, ResourceLimits};
