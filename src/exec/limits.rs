// src/exec/limits.rs

//! Best-effort resource limits for untrusted grading jobs.
//!
//! On Linux the limits are installed with `setrlimit` in the forked child,
//! after `fork` and before `exec`, so they bind the grading program from its
//! first instruction. Other platforms report no support; callers check
//! [`supports_resource_limits`] once at startup and carry on without limits.
//! This is not an isolation boundary.

/// Limits applied to a single subprocess. `None` leaves that limit untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceLimits {
    /// `RLIMIT_CPU`, seconds of CPU time.
    pub cpu_seconds: Option<u64>,
    /// `RLIMIT_AS`, bytes of address space.
    pub memory_bytes: Option<u64>,
    /// `RLIMIT_FSIZE`, largest file the process may write.
    pub file_size_bytes: Option<u64>,
    /// `RLIMIT_NPROC`, processes/threads for the user.
    pub max_processes: Option<u64>,
}

impl ResourceLimits {
    pub fn is_empty(&self) -> bool {
        self.cpu_seconds.is_none()
            && self.memory_bytes.is_none()
            && self.file_size_bytes.is_none()
            && self.max_processes.is_none()
    }
}

/// Whether [`apply_to_command`] can enforce anything on this platform.
pub fn supports_resource_limits() -> bool {
    cfg!(target_os = "linux")
}

/// Install `limits` on `cmd` so they take effect in the child before `exec`.
///
/// No-op on platforms without support.
#[cfg(target_os = "linux")]
pub fn apply_to_command(cmd: &mut tokio::process::Command, limits: ResourceLimits) {
    if limits.is_empty() {
        return;
    }
    // SAFETY: the closure runs in the child between fork and exec. It only
    // performs `setrlimit` syscalls on copied integers: no allocation, no
    // locking, nothing that is not async-signal-safe.
    unsafe {
        cmd.pre_exec(move || set_limits(limits));
    }
}

#[cfg(not(target_os = "linux"))]
pub fn apply_to_command(_cmd: &mut tokio::process::Command, _limits: ResourceLimits) {}

#[cfg(target_os = "linux")]
fn set_limits(limits: ResourceLimits) -> std::io::Result<()> {
    use nix::libc::rlim_t;
    use nix::sys::resource::{getrlimit, setrlimit, Resource};

    let pairs = [
        (Resource::RLIMIT_CPU, limits.cpu_seconds),
        (Resource::RLIMIT_AS, limits.memory_bytes),
        (Resource::RLIMIT_FSIZE, limits.file_size_bytes),
        (Resource::RLIMIT_NPROC, limits.max_processes),
    ];
    for (resource, value) in pairs {
        if let Some(v) = value {
            // Never try to raise the hard limit: that needs privileges.
            let (_, hard) = getrlimit(resource).map_err(std::io::Error::from)?;
            let v = rlim_t::try_from(v).unwrap_or(rlim_t::MAX).min(hard);
            setrlimit(resource, v, v).map_err(std::io::Error::from)?;
        }
    }
    Ok(())
}
