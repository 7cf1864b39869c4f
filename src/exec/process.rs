// src/exec/process.rs

//! Runs a single job as a subprocess and normalizes how it ended.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use crate::exec::job::{JobOutcome, JobSpec};
use crate::exec::limits;
use crate::types::ExitSignal;

/// Knobs shared by every process the executor starts.
#[derive(Debug, Clone, Copy)]
pub struct ProcessOptions {
    /// Time between the termination request and the forced kill.
    pub kill_grace: Duration,
    /// Per-stream capture cap.
    pub max_output_bytes: usize,
    /// Whether `job.limits` may be installed (platform support).
    pub apply_limits: bool,
}

/// Captured bytes of one stream plus whether anything was dropped.
type Captured = (Vec<u8>, bool);

/// Run `job` to completion, timeout, or failure to start.
///
/// Never returns an error: every failure is folded into the outcome.
pub async fn run_process(job: &JobSpec, opts: ProcessOptions) -> JobOutcome {
    let started = Instant::now();

    if !job.working_dir.is_dir() {
        return JobOutcome::errored(format!(
            "working directory {} does not exist",
            job.working_dir.display()
        ));
    }

    let mut cmd = build_command(job, opts);
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!(
                entity = job.entity.as_deref().unwrap_or("-"),
                cmd = %job.display_command(),
                error = %e,
                "failed to start process"
            );
            return JobOutcome::errored(format!("failed to start `{}`: {e}", job.program))
                .with_duration(started.elapsed());
        }
    };

    debug!(
        entity = job.entity.as_deref().unwrap_or("-"),
        kind = ?job.kind,
        pid = child.id(),
        cmd = %job.display_command(),
        "process started"
    );

    let stdout = child
        .stdout
        .take()
        .map(|s| spawn_capture(s, opts.max_output_bytes));
    let stderr = child
        .stderr
        .take()
        .map(|s| spawn_capture(s, opts.max_output_bytes));

    let (status, timed_out) = match timeout(job.timeout, child.wait()).await {
        Ok(Ok(status)) => (Some(status), false),
        Ok(Err(e)) => {
            warn!(error = %e, cmd = %job.display_command(), "failed waiting for process");
            terminate(&mut child, opts.kill_grace).await;
            (None, false)
        }
        Err(_elapsed) => {
            info!(
                entity = job.entity.as_deref().unwrap_or("-"),
                kind = ?job.kind,
                timeout_ms = job.timeout.as_millis() as u64,
                "process timed out; terminating"
            );
            terminate(&mut child, opts.kill_grace).await;
            (None, true)
        }
    };

    // A grandchild that escaped the process group can keep the pipes open;
    // don't let it hold the slot forever.
    let (stdout, out_truncated) = finish_capture(stdout, opts.kill_grace).await;
    let (stderr, err_truncated) = finish_capture(stderr, opts.kill_grace).await;

    let mut outcome = JobOutcome {
        succeeded: false,
        exit_signal: ExitSignal::Normal,
        exit_code: None,
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        truncated: out_truncated || err_truncated,
        duration: started.elapsed(),
    };

    if timed_out {
        outcome.exit_signal = ExitSignal::Timeout;
        if outcome.stderr.trim().is_empty() {
            outcome.stderr = format!("timed out after {}ms", job.timeout.as_millis());
        }
    } else if let Some(status) = status {
        outcome.exit_code = status.code();
        outcome.succeeded = status.success();
        if killed_by_signal(&status) {
            outcome.exit_signal = ExitSignal::Killed;
        }
    } else {
        outcome.stderr.push_str("\nlost track of process while waiting for it");
    }

    debug!(
        entity = job.entity.as_deref().unwrap_or("-"),
        kind = ?job.kind,
        succeeded = outcome.succeeded,
        exit_code = ?outcome.exit_code,
        exit_signal = ?outcome.exit_signal,
        duration_ms = outcome.duration_ms(),
        "process finished"
    );

    outcome
}

fn build_command(job: &JobSpec, opts: ProcessOptions) -> Command {
    let mut cmd = Command::new(&job.program);
    cmd.args(&job.args)
        .current_dir(&job.working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    // Own process group, so termination reaches everything the job spawned.
    #[cfg(unix)]
    cmd.process_group(0);

    if opts.apply_limits {
        if let Some(l) = job.limits {
            limits::apply_to_command(&mut cmd, l);
        }
    }

    cmd
}

/// Ask politely, wait `grace`, then kill.
async fn terminate(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            signal_group(pid, nix::sys::signal::Signal::SIGTERM);
            if let Ok(Ok(_)) = timeout(grace, child.wait()).await {
                // The leader is gone; sweep up anything left in its group.
                signal_group(pid, nix::sys::signal::Signal::SIGKILL);
                return;
            }
            signal_group(pid, nix::sys::signal::Signal::SIGKILL);
        }
    }
    #[cfg(not(unix))]
    let _ = grace;

    if let Err(e) = child.kill().await {
        debug!(error = %e, "kill after grace period failed (process already gone?)");
    }
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: nix::sys::signal::Signal) {
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if let Err(e) = nix::sys::signal::killpg(Pid::from_raw(raw), signal) {
        debug!(pid, ?signal, error = %e, "signalling process group failed");
    }
}

#[cfg(unix)]
fn killed_by_signal(status: &ExitStatus) -> bool {
    use std::os::unix::process::ExitStatusExt;
    status.signal().is_some()
}

#[cfg(not(unix))]
fn killed_by_signal(_status: &ExitStatus) -> bool {
    false
}

/// Read a stream to EOF, keeping at most `limit` bytes.
///
/// The stream is drained past the limit so the child never blocks on a full
/// pipe.
fn spawn_capture<R>(mut reader: R, limit: usize) -> JoinHandle<Captured>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        let mut truncated = false;
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let room = limit.saturating_sub(buf.len());
                    if n > room {
                        truncated = true;
                    }
                    buf.extend_from_slice(&chunk[..n.min(room)]);
                }
            }
        }
        (buf, truncated)
    })
}

async fn finish_capture(handle: Option<JoinHandle<Captured>>, wait: Duration) -> Captured {
    let Some(mut handle) = handle else {
        return (Vec::new(), false);
    };
    match timeout(wait, &mut handle).await {
        Ok(Ok(captured)) => captured,
        Ok(Err(e)) => {
            debug!(error = %e, "output capture task failed");
            (Vec::new(), false)
        }
        Err(_) => {
            handle.abort();
            debug!("output pipe still open after process exit; dropping remainder");
            (Vec::new(), true)
        }
    }
}
