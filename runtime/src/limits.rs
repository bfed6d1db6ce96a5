// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Resource ceilings.
//!
//! Each limit is enforced twice: the kernel caps the child (`RLIMIT_CPU`,
//! `RLIMIT_AS`, the parent-side wall deadline), and the parent checks the
//! child's `rusage` afterwards so an overrun is reported as
//! `ResourceExhausted` instead of whatever the workload did when its
//! allocation failed or its CPU ran out.
//!
//! `RLIMIT_AS` refuses an allocation long before the resident set reaches
//! the cap, so peak RSS alone rarely shows the overrun. The supervisor
//! watches the address-space calls the kernel refused, and a workload that
//! failed after such a refusal counts as over its memory limit.

use cage_kernel::types::ResourceLimits;
use std::fmt;
use std::io;
use std::time::Duration;

/// Captured stdout/stderr per stream. Output beyond this is an overrun.
pub const MAX_CAPTURE_BYTES: usize = 64 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    WallTime,
    CpuTime,
    Memory,
    Output,
}

impl Resource {
    pub fn as_str(self) -> &'static str {
        match self {
            Resource::WallTime => "wall_time",
            Resource::CpuTime => "cpu_time",
            Resource::Memory => "memory",
            Resource::Output => "output",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Soft `RLIMIT_CPU` in whole seconds, rounded up.
pub fn cpu_rlimit_secs(max_cpu_time_ms: u64) -> u64 {
    max_cpu_time_ms.saturating_add(999) / 1000
}

fn set_rlimit(resource: libc::c_int, soft: u64, hard: u64) -> io::Result<()> {
    let limit = libc::rlimit {
        rlim_cur: soft as libc::rlim_t,
        rlim_max: hard as libc::rlim_t,
    };
    // SAFETY: setrlimit reads a fully initialised struct and has no other
    // side effects on our memory.
    let rc = unsafe { libc::setrlimit(resource as _, &limit) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Apply the limits to the calling process. Runs in the child after `fork`,
/// so it only issues syscalls.
///
/// The CPU hard limit sits one second above the soft one: the soft limit
/// delivers `SIGXCPU`, the hard one `SIGKILL`.
pub fn apply_rlimits(limits: &ResourceLimits) -> io::Result<()> {
    if let Some(ms) = limits.max_cpu_time_ms {
        let secs = cpu_rlimit_secs(ms);
        set_rlimit(libc::RLIMIT_CPU as _, secs, secs.saturating_add(1))?;
    }
    if let Some(bytes) = limits.max_memory_bytes {
        set_rlimit(libc::RLIMIT_AS as _, bytes, bytes)?;
    }
    set_rlimit(libc::RLIMIT_CORE as _, 0, 0)
}

/// What the child consumed, from `wait4` and the parent's clock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceUsage {
    pub cpu_time_ms: u64,
    pub max_rss_bytes: u64,
    pub wall_time_ms: u64,
}

fn timeval_ms(tv: &libc::timeval) -> u64 {
    (tv.tv_sec.max(0) as u64) * 1000 + (tv.tv_usec.max(0) as u64) / 1000
}

impl ResourceUsage {
    pub fn from_rusage(usage: &libc::rusage, wall: Duration) -> Self {
        // ru_maxrss is in KiB on Linux, bytes on macOS.
        let rss = usage.ru_maxrss.max(0) as u64;
        let max_rss_bytes = if cfg!(target_os = "macos") { rss } else { rss * 1024 };
        Self {
            cpu_time_ms: timeval_ms(&usage.ru_utime) + timeval_ms(&usage.ru_stime),
            max_rss_bytes,
            wall_time_ms: wall.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Overrun {
    pub resource: Resource,
    pub limit: u64,
    pub observed: u64,
}

/// How the child ended, as far as limit checks care.
#[derive(Debug, Clone, Copy, Default)]
pub struct Termination {
    pub signal: Option<i32>,
    pub exit_code: i32,
    pub timed_out: bool,
    pub output_overflow: bool,
    /// Largest address-space request the kernel refused, if any.
    pub memory_refused: Option<u64>,
}

impl Termination {
    fn failed(&self) -> bool {
        self.signal.is_some() || self.exit_code != 0
    }
}

/// First limit the child overran, checked wall, CPU, memory, output.
pub fn check(limits: &ResourceLimits, usage: &ResourceUsage, end: &Termination) -> Option<Overrun> {
    if end.timed_out {
        return Some(Overrun {
            resource: Resource::WallTime,
            limit: limits.max_wall_time_ms.unwrap_or(0),
            observed: usage.wall_time_ms,
        });
    }
    if let Some(limit) = limits.max_cpu_time_ms {
        if usage.cpu_time_ms > limit || end.signal == Some(libc::SIGXCPU) {
            return Some(Overrun {
                resource: Resource::CpuTime,
                limit,
                observed: usage.cpu_time_ms,
            });
        }
    }
    if let Some(limit) = limits.max_memory_bytes {
        let refused = end.memory_refused.filter(|_| end.failed());
        if usage.max_rss_bytes > limit || refused.is_some() {
            return Some(Overrun {
                resource: Resource::Memory,
                limit,
                observed: usage.max_rss_bytes.max(refused.unwrap_or(0)),
            });
        }
    }
    if end.output_overflow {
        return Some(Overrun {
            resource: Resource::Output,
            limit: MAX_CAPTURE_BYTES as u64,
            observed: MAX_CAPTURE_BYTES as u64 + 1,
        });
    }
    None
}
