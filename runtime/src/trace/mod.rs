// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Workload Supervisor
//!
//! The parent traces the workload and every task it creates. Calls the
//! filter hands over stop the task until the supervisor has recorded them
//! and decided the answer:
//!
//! - denied call: recorded, then refused with `EPERM` or the whole workload
//!   is killed, per the deny action
//! - `open` of `/dev/urandom` or `/dev/random`: recorded, then pointed at
//!   the DRG pool on the entropy descriptor
//! - address-space growth: followed to its return so refusals under the
//!   memory cap are known
//! - `rdtsc` (x86_64): the counter is made to fault; the fault is recorded
//!   and answered with zero or a kill
//!
//! Every exec'd image loses its vDSO, which would otherwise serve clock
//! reads without entering the kernel.
//!
//! When the first process exits, everything it left behind is killed, so a
//! detached descendant cannot outlive the cage or hold its pipes open. The
//! wall deadline is a watchdog thread that kills every traced task.
//!
//! All `ptrace` requests come from the thread that spawned the workload;
//! the kernel ties a tracee to that thread.

use crate::errors::CageError;
use crate::filter::{DeniedCall, InterceptFn, Interception, TraceRules, Violation};
use cage_kernel::policy::{DenyAction, OperationId};
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Mutex;
use std::time::Instant;

/// `ptrace(2)` returning `io::Result`. Not for `PEEK*` requests, whose
/// result may legitimately be -1.
macro_rules! ptrace {
    ($request:expr, $pid:expr, $addr:expr, $data:expr) => {{
        // SAFETY: callers pass pointers to live, correctly sized buffers or
        // plain integers, as the request expects.
        let rc = unsafe {
            libc::ptrace(
                $request,
                $pid,
                $addr as *mut libc::c_void,
                $data as *mut libc::c_void,
            )
        };
        if rc == -1 {
            Err(::std::io::Error::last_os_error())
        } else {
            Ok(rc)
        }
    }};
}

pub mod memory;
pub mod regs;

use regs::Regs;

/// Path an entropy-device open is redirected to.
pub const ENTROPY_PATH: &[u8] = b"/proc/self/fd/3\0";

const TRACE_OPTIONS: libc::c_int = libc::PTRACE_O_EXITKILL
    | libc::PTRACE_O_TRACESECCOMP
    | libc::PTRACE_O_TRACEEXEC
    | libc::PTRACE_O_TRACEFORK
    | libc::PTRACE_O_TRACEVFORK
    | libc::PTRACE_O_TRACECLONE
    | libc::PTRACE_O_TRACESYSGOOD;

/// How the workload ended under supervision.
pub struct Supervised {
    /// `wait4` status and usage of the first process.
    pub status: libc::c_int,
    pub usage: libc::rusage,
    pub timed_out: bool,
    pub violation: Option<Violation>,
    /// Largest address-space request the kernel refused.
    pub memory_refused: Option<u64>,
}

/// Runs in the child between `fork` and `exec`: syscalls only.
pub fn prepare_child(trap_tsc: bool) -> io::Result<()> {
    #[cfg(target_arch = "x86_64")]
    if trap_tsc {
        // SAFETY: affects only the calling thread and what it execs.
        if unsafe { libc::prctl(libc::PR_SET_TSC, libc::PR_TSC_SIGSEGV, 0, 0, 0) } != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    #[cfg(not(target_arch = "x86_64"))]
    let _ = trap_tsc;
    ptrace!(libc::PTRACE_TRACEME, 0, 0usize, 0usize)?;
    Ok(())
}

/// Every task of the workload seen so far.
struct Tasks {
    root: libc::pid_t,
    live: Mutex<BTreeSet<libc::pid_t>>,
}

impl Tasks {
    fn new(root: libc::pid_t) -> Self {
        Self {
            root,
            live: Mutex::new(BTreeSet::from([root])),
        }
    }

    fn with<T>(&self, f: impl FnOnce(&mut BTreeSet<libc::pid_t>) -> T) -> T {
        let mut live = self.live.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut live)
    }

    fn insert(&self, pid: libc::pid_t) {
        self.with(|live| live.insert(pid));
    }

    fn remove(&self, pid: libc::pid_t) {
        self.with(|live| live.remove(&pid));
    }

    fn kill_all(&self) {
        self.with(|live| {
            for pid in live.iter() {
                // SAFETY: plain signal delivery; ESRCH for a task that just
                // exited is fine.
                unsafe {
                    libc::kill(*pid, libc::SIGKILL);
                }
            }
        });
        // SAFETY: as above, for the workload's process group.
        unsafe {
            libc::killpg(self.root, libc::SIGKILL);
        }
    }
}

enum Resume {
    Continue(libc::c_int),
    /// Continue and stop again when the current syscall returns.
    Syscall,
}

enum StopError {
    /// The task died while stopped.
    Gone,
    Fatal(CageError),
}

impl From<io::Error> for StopError {
    fn from(e: io::Error) -> Self {
        if e.raw_os_error() == Some(libc::ESRCH) {
            StopError::Gone
        } else {
            StopError::Fatal(CageError::Internal(format!("ptrace: {e}")))
        }
    }
}

impl From<CageError> for StopError {
    fn from(e: CageError) -> Self {
        StopError::Fatal(e)
    }
}

#[derive(Clone, Copy)]
struct MemoryCall {
    nr: i64,
    requested: u64,
}

struct Supervisor<'a, 'b> {
    rules: &'a TraceRules,
    tasks: &'a Tasks,
    on_intercept: &'a mut InterceptFn<'b>,
    root_started: bool,
    killed: bool,
    pending: BTreeMap<libc::pid_t, MemoryCall>,
    violation: Option<Violation>,
    memory_refused: Option<u64>,
    error: Option<CageError>,
}

/// Supervise the traced workload `root` until every task is gone.
pub fn supervise(
    root: libc::pid_t,
    rules: &TraceRules,
    deadline: Option<Instant>,
    on_intercept: &mut InterceptFn<'_>,
) -> Result<Supervised, CageError> {
    let tasks = Tasks::new(root);
    let timed_out = AtomicBool::new(false);
    let (done, expired) = mpsc::channel::<()>();

    std::thread::scope(|s| {
        if let Some(deadline) = deadline {
            let (tasks, timed_out) = (&tasks, &timed_out);
            s.spawn(move || {
                let wait = deadline.saturating_duration_since(Instant::now());
                if let Err(RecvTimeoutError::Timeout) = expired.recv_timeout(wait) {
                    tracing::warn!("Wall time limit reached; killing workload {}", root);
                    timed_out.store(true, Ordering::SeqCst);
                    tasks.kill_all();
                }
            });
        }

        let mut supervisor = Supervisor {
            rules,
            tasks: &tasks,
            on_intercept,
            root_started: false,
            killed: false,
            pending: BTreeMap::new(),
            violation: None,
            memory_refused: None,
            error: None,
        };
        let result = supervisor.run();
        drop(done);

        result.map(|(status, usage)| Supervised {
            status,
            usage,
            timed_out: timed_out.load(Ordering::SeqCst),
            violation: supervisor.violation,
            memory_refused: supervisor.memory_refused,
        })
    })
}

/// `wait4` on any traced task. `None` once there are none left.
fn wait_any() -> io::Result<Option<(libc::pid_t, libc::c_int, libc::rusage)>> {
    loop {
        let mut status: libc::c_int = 0;
        // SAFETY: rusage is plain data; wait4 fills it on success.
        let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
        // __WNOTHREAD: only tasks traced by this thread, never another
        // cage's.
        let rc = unsafe { libc::wait4(-1, &mut status, libc::__WALL | libc::__WNOTHREAD, &mut usage) };
        if rc > 0 {
            return Ok(Some((rc, status, usage)));
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::ECHILD) => return Ok(None),
            Some(libc::EINTR) => continue,
            _ => return Err(err),
        }
    }
}

fn event_message(pid: libc::pid_t) -> io::Result<u64> {
    let mut message: libc::c_ulong = 0;
    ptrace!(libc::PTRACE_GETEVENTMSG, pid, 0usize, &mut message as *mut libc::c_ulong)?;
    Ok(message as u64)
}

fn resume(pid: libc::pid_t, how: Resume) {
    let rc = match how {
        Resume::Continue(sig) => ptrace!(libc::PTRACE_CONT, pid, 0usize, sig as usize),
        Resume::Syscall => ptrace!(libc::PTRACE_SYSCALL, pid, 0usize, 0usize),
    };
    if let Err(e) = rc {
        if e.raw_os_error() != Some(libc::ESRCH) {
            tracing::warn!("Failed to resume task {}: {}", pid, e);
        }
    }
}

impl Supervisor<'_, '_> {
    fn run(&mut self) -> Result<(libc::c_int, libc::rusage), CageError> {
        let mut root_exit = None;
        loop {
            let (pid, status, usage) = match wait_any() {
                Ok(Some(stop)) => stop,
                Ok(None) => break,
                Err(e) => {
                    self.tasks.kill_all();
                    return Err(CageError::Internal(format!("wait4: {e}")));
                }
            };

            if libc::WIFEXITED(status) || libc::WIFSIGNALED(status) {
                self.tasks.remove(pid);
                self.pending.remove(&pid);
                if pid == self.tasks.root {
                    root_exit = Some((status, usage));
                    // Whatever the workload left behind goes with it.
                    self.tasks.kill_all();
                }
                continue;
            }
            if !libc::WIFSTOPPED(status) {
                continue;
            }

            self.tasks.insert(pid);
            match self.on_stop(pid, status) {
                Ok(how) => resume(pid, how),
                Err(StopError::Gone) => {}
                Err(StopError::Fatal(e)) => {
                    tracing::error!("Supervision of task {} failed: {}", pid, e);
                    self.error.get_or_insert(e);
                    self.kill();
                    resume(pid, Resume::Continue(0));
                }
            }
        }

        if let Some(e) = self.error.take() {
            return Err(e);
        }
        root_exit.ok_or_else(|| CageError::Internal("workload exited without a status".to_string()))
    }

    fn kill(&mut self) {
        self.killed = true;
        self.tasks.kill_all();
    }

    fn on_stop(&mut self, pid: libc::pid_t, status: libc::c_int) -> Result<Resume, StopError> {
        let sig = libc::WSTOPSIG(status);
        let event = (status >> 16) & 0xffff;

        if pid == self.tasks.root && !self.root_started {
            // Stop after the first exec, before any workload instruction.
            self.root_started = true;
            ptrace!(libc::PTRACE_SETOPTIONS, pid, 0usize, TRACE_OPTIONS as usize)?;
            if self.rules.hide_vdso {
                self.hide_vdso(pid)?;
            }
            return Ok(Resume::Continue(if sig == libc::SIGTRAP { 0 } else { sig }));
        }
        if self.killed {
            return Ok(Resume::Continue(0));
        }

        if sig == libc::SIGTRAP | 0x80 {
            return self.on_syscall_exit(pid);
        }
        if sig == libc::SIGTRAP && event != 0 {
            return match event {
                libc::PTRACE_EVENT_SECCOMP => self.on_seccomp(pid),
                libc::PTRACE_EVENT_FORK | libc::PTRACE_EVENT_VFORK | libc::PTRACE_EVENT_CLONE => {
                    let child = event_message(pid)? as libc::pid_t;
                    self.tasks.insert(child);
                    Ok(Resume::Continue(0))
                }
                libc::PTRACE_EVENT_EXEC => {
                    let former = event_message(pid)? as libc::pid_t;
                    if former != pid {
                        self.tasks.remove(former);
                    }
                    if self.rules.hide_vdso {
                        self.hide_vdso(pid)?;
                    }
                    Ok(Resume::Continue(0))
                }
                _ => Ok(Resume::Continue(0)),
            };
        }

        match sig {
            // Job control would leave the workload stopped with nobody to
            // continue it. Also the first stop of every new task.
            libc::SIGSTOP | libc::SIGTSTP | libc::SIGTTIN | libc::SIGTTOU => Ok(Resume::Continue(0)),
            libc::SIGSEGV if self.rules.trap_tsc => self.on_segv(pid),
            _ => Ok(Resume::Continue(sig)),
        }
    }

    fn hide_vdso(&self, pid: libc::pid_t) -> Result<(), StopError> {
        let regs = Regs::read(pid)?;
        if !memory::hide_vdso(pid, regs.sp())? {
            tracing::debug!("Task {} was exec'd without a vDSO", pid);
        }
        Ok(())
    }

    fn deny(&mut self, pid: libc::pid_t, call: DeniedCall, regs: &mut Regs) -> Result<Resume, StopError> {
        let sequence_number = (self.on_intercept)(&Interception::Denied(call))?;
        match self.rules.deny_action {
            DenyAction::ReturnError => {
                tracing::debug!("Refused {} ({}) in task {}", call.name, call.operation, pid);
                regs.skip_syscall(pid, -i64::from(libc::EPERM))?;
            }
            DenyAction::TerminateProcess => {
                tracing::warn!("Denied {} ({}) in task {}; killing workload", call.name, call.operation, pid);
                self.violation = Some(Violation { call, sequence_number });
                self.kill();
            }
        }
        Ok(Resume::Continue(0))
    }

    fn on_seccomp(&mut self, pid: libc::pid_t) -> Result<Resume, StopError> {
        let mut regs = Regs::read(pid)?;
        let nr = regs.syscall_nr();

        if let Some(call) = self.rules.denied.get(&nr).copied() {
            return self.deny(pid, call, &mut regs);
        }
        if self.rules.opens.contains(&nr) {
            self.on_open(pid, nr, &mut regs)?;
            return Ok(Resume::Continue(0));
        }
        if self.rules.memory.contains(&nr) {
            let requested = if nr == i64::from(libc::SYS_mremap) {
                regs.arg(2)
            } else if nr == i64::from(libc::SYS_mmap) {
                regs.arg(1)
            } else {
                regs.arg(0)
            };
            self.pending.insert(pid, MemoryCall { nr, requested });
            return Ok(Resume::Syscall);
        }
        Ok(Resume::Continue(0))
    }

    fn on_open(&mut self, pid: libc::pid_t, nr: i64, regs: &mut Regs) -> Result<(), StopError> {
        #[cfg(target_arch = "x86_64")]
        let legacy_open = nr == i64::from(libc::SYS_open);
        #[cfg(not(target_arch = "x86_64"))]
        let legacy_open = {
            let _ = nr;
            false
        };
        let (dirfd, arg) = if legacy_open {
            (libc::AT_FDCWD, 0)
        } else {
            (regs.arg(0) as libc::c_int, 1)
        };

        let raw = match memory::read_cstr(pid, regs.arg(arg)) {
            Ok(raw) => raw,
            // Bad pointer or path: the kernel reports it to the workload.
            Err(e) if e.raw_os_error() != Some(libc::ESRCH) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        match memory::tracee_path(pid, dirfd, &raw) {
            Some(host) if memory::is_entropy_device(&host) => {}
            _ => return Ok(()),
        }

        let path = String::from_utf8_lossy(&raw).into_owned();
        (self.on_intercept)(&Interception::EntropyDevice { path: path.clone() })?;
        if let Err(e) = memory::redirect_path(pid, regs, arg, ENTROPY_PATH) {
            if e.raw_os_error() == Some(libc::ESRCH) {
                return Err(StopError::Gone);
            }
            tracing::warn!("Could not redirect {} in task {}: {}; refusing it", path, pid, e);
            regs.skip_syscall(pid, -i64::from(libc::EACCES))?;
        }
        Ok(())
    }

    fn on_syscall_exit(&mut self, pid: libc::pid_t) -> Result<Resume, StopError> {
        let Some(call) = self.pending.remove(&pid) else {
            return Ok(Resume::Continue(0));
        };
        let ret = Regs::read(pid)?.ret();
        let refused = if call.nr == i64::from(libc::SYS_brk) {
            // brk reports failure by returning the old break.
            (call.requested > ret as u64).then(|| call.requested - ret as u64)
        } else {
            (ret == -i64::from(libc::ENOMEM)).then_some(call.requested)
        };
        if let Some(bytes) = refused {
            tracing::debug!("Kernel refused {} bytes of address space to task {}", bytes, pid);
            self.memory_refused = Some(self.memory_refused.unwrap_or(0).max(bytes));
        }
        Ok(Resume::Continue(0))
    }

    /// `SIGSEGV` with the time-stamp counter disabled: `rdtsc` or `rdtscp`
    /// at the faulting instruction means a counter read.
    #[cfg(target_arch = "x86_64")]
    fn on_segv(&mut self, pid: libc::pid_t) -> Result<Resume, StopError> {
        let mut regs = Regs::read(pid)?;
        let mut code = [0u8; 3];
        let n = memory::read(pid, regs.pc(), &mut code).unwrap_or(0);
        let (name, len, with_aux) = match &code[..n] {
            [0x0f, 0x31, ..] => ("rdtsc", 2, false),
            [0x0f, 0x01, 0xf9] => ("rdtscp", 3, true),
            _ => return Ok(Resume::Continue(libc::SIGSEGV)),
        };
        let call = DeniedCall {
            operation: OperationId::HardwareCounter,
            name,
        };
        let sequence_number = (self.on_intercept)(&Interception::Denied(call))?;
        match self.rules.deny_action {
            DenyAction::ReturnError => regs.emulate_counter_read(pid, len, with_aux)?,
            DenyAction::TerminateProcess => {
                tracing::warn!("Counter read ({}) in task {}; killing workload", name, pid);
                self.violation = Some(Violation { call, sequence_number });
                self.kill();
            }
        }
        Ok(Resume::Continue(0))
    }

    #[cfg(not(target_arch = "x86_64"))]
    fn on_segv(&mut self, _pid: libc::pid_t) -> Result<Resume, StopError> {
        Ok(Resume::Continue(libc::SIGSEGV))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entropy_path_names_the_entropy_descriptor() {
        let expected = format!("/proc/self/fd/{}\0", crate::process::ENTROPY_FD);
        assert_eq!(ENTROPY_PATH, expected.as_bytes());
    }
}
