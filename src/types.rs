use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a tracked entity (one student repository).
///
/// This is the name of the entity's directory under the entities root.
pub type EntityId = String;

/// Name of a grading period, e.g. `"week01"`.
///
/// Periods are folder names: the same string locates the problem folder in
/// the working copy and the grading folder next to it.
pub type Period = String;

/// Result of the most recent sync attempt for an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// No sync has been attempted since the entity was discovered.
    #[default]
    Unattempted,
    Success,
    /// The sync command ran and exited unsuccessfully.
    Failed,
    TimedOut,
    /// The sync command could not be run at all (spawn failure, aborted job).
    Errored,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncStatus::Unattempted => "unattempted",
            SyncStatus::Success => "success",
            SyncStatus::Failed => "failed",
            SyncStatus::TimedOut => "timed_out",
            SyncStatus::Errored => "errored",
        };
        f.write_str(s)
    }
}

/// Verdict produced by the result detector / grade stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GradeVerdict {
    Pass,
    Fail,
    #[default]
    Unknown,
}

impl fmt::Display for GradeVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GradeVerdict::Pass => "pass",
            GradeVerdict::Fail => "fail",
            GradeVerdict::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// How a subprocess ended, independent of its exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExitSignal {
    /// The process exited on its own (or never started).
    #[default]
    Normal,
    /// The executor terminated the process after its timeout elapsed.
    Timeout,
    /// The process was terminated by a signal the executor did not send.
    Killed,
}

/// Why a graded submission did not pass.
///
/// Only the bucket is part of the core contract; the explanation text written
/// next to the marker is presentation detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureCategory {
    NoLanguageDetected,
    CompileFailure,
    RuntimeFailure,
    Other,
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureCategory::NoLanguageDetected => "no-language-detected",
            FailureCategory::CompileFailure => "compile-failure",
            FailureCategory::RuntimeFailure => "runtime-failure",
            FailureCategory::Other => "other",
        };
        f.write_str(s)
    }
}

/// Lifecycle of the scheduler loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LoopState {
    #[default]
    Stopped,
    Running,
}
