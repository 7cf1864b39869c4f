// src/exec/job.rs

//! Job description handed to an executor, and the normalized outcome it
//! returns.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::exec::ResourceLimits;
use crate::types::{EntityId, ExitSignal, SyncStatus};

/// Which stage produced a job. Used for logging and by test executors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    Sync,
    Compile,
    Grade,
    Other,
}

/// A single subprocess to run.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub kind: JobKind,
    pub entity: Option<EntityId>,
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub timeout: Duration,
    /// Applied before the program starts, where the platform allows it.
    pub limits: Option<ResourceLimits>,
}

impl JobSpec {
    /// Run `program` with `args` directly (no shell).
    pub fn program(
        kind: JobKind,
        program: impl Into<String>,
        args: Vec<String>,
        working_dir: impl AsRef<Path>,
        timeout: Duration,
    ) -> Self {
        Self {
            kind,
            entity: None,
            program: program.into(),
            args,
            working_dir: working_dir.as_ref().to_path_buf(),
            timeout,
            limits: None,
        }
    }

    /// Run a command line through the platform shell.
    pub fn shell(
        kind: JobKind,
        command: &str,
        working_dir: impl AsRef<Path>,
        timeout: Duration,
    ) -> Self {
        let (program, args) = if cfg!(windows) {
            ("cmd", vec!["/C".to_string(), command.to_string()])
        } else {
            ("sh", vec!["-c".to_string(), command.to_string()])
        };
        Self::program(kind, program, args, working_dir, timeout)
    }

    pub fn for_entity(mut self, entity: impl Into<EntityId>) -> Self {
        self.entity = Some(entity.into());
        self
    }

    pub fn with_limits(mut self, limits: Option<ResourceLimits>) -> Self {
        self.limits = limits;
        self
    }

    /// The command as it would be typed, for logs.
    pub fn display_command(&self) -> String {
        if self.args.is_empty() {
            return self.program.clone();
        }
        format!("{} {}", self.program, self.args.join(" "))
    }
}

/// Normalized result of running a [`JobSpec`].
///
/// `succeeded` is true only for a process that exited on its own with status
/// zero. Every other case has `succeeded == false` and is described by
/// `exit_signal` plus `exit_code` (`None` when the process never started or
/// was ended by a signal).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub succeeded: bool,
    pub exit_signal: ExitSignal,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// True when either stream hit the capture limit.
    pub truncated: bool,
    pub duration: Duration,
}

impl JobOutcome {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            exit_signal: ExitSignal::Normal,
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
            truncated: false,
            duration: Duration::ZERO,
        }
    }

    pub fn exited(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            succeeded: code == 0,
            exit_signal: ExitSignal::Normal,
            exit_code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
            truncated: false,
            duration: Duration::ZERO,
        }
    }

    pub fn timed_out(duration: Duration) -> Self {
        Self {
            succeeded: false,
            exit_signal: ExitSignal::Timeout,
            exit_code: None,
            stdout: String::new(),
            stderr: format!("timed out after {}ms", duration.as_millis()),
            truncated: false,
            duration,
        }
    }

    /// The job could not be run at all; `reason` ends up in `stderr`.
    pub fn errored(reason: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            exit_signal: ExitSignal::Normal,
            exit_code: None,
            stdout: String::new(),
            stderr: reason.into(),
            truncated: false,
            duration: Duration::ZERO,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn duration_ms(&self) -> u64 {
        u64::try_from(self.duration.as_millis()).unwrap_or(u64::MAX)
    }

    /// Map the outcome of a sync job onto the entity's sync status.
    pub fn sync_status(&self) -> SyncStatus {
        match (self.succeeded, self.exit_signal, self.exit_code) {
            (true, _, _) => SyncStatus::Success,
            (false, ExitSignal::Timeout, _) => SyncStatus::TimedOut,
            (false, ExitSignal::Killed, _) => SyncStatus::Failed,
            (false, ExitSignal::Normal, Some(_)) => SyncStatus::Failed,
            (false, ExitSignal::Normal, None) => SyncStatus::Errored,
        }
    }

    /// One-line summary for state and explanations: trimmed stdout on
    /// success, stderr (or stdout if stderr is empty) otherwise.
    pub fn message(&self) -> String {
        let primary = if self.succeeded { &self.stdout } else { &self.stderr };
        let text = if primary.trim().is_empty() {
            if self.succeeded { &self.stderr } else { &self.stdout }
        } else {
            primary
        };
        text.trim().to_string()
    }
}
