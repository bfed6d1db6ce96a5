// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Child process supervision.
//!
//! One workload, one process group. The parent writes stdin and the entropy
//! pool and drains stdout/stderr on scoped helper threads. On Linux the
//! spawning thread then traces the workload (see [`crate::trace`]), which
//! reaps it with `rusage` for the limit checks, answers the calls the
//! filter hands over and kills the whole tree at the wall deadline or when
//! the first process exits. Elsewhere the child is polled with `wait4`.
//!
//! Order of setup in the child, after `fork`:
//! 1. resource limits
//! 2. entropy pipe onto fd 3
//! 3. counter trap and `PTRACE_TRACEME` (Linux)
//! 4. syscall filter, last, so nothing above runs filtered
//!
//! Output pipes a stray descendant still holds after the workload is gone
//! are cut after [`OUTPUT_GRACE`]; the capture then counts as overrun.

use crate::errors::CageError;
use crate::filter::{CompiledFilter, InterceptFn, Violation};
use crate::limits::{apply_rlimits, ResourceUsage, MAX_CAPTURE_BYTES};
#[cfg(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64")))]
use crate::trace;
use cage_kernel::types::ResourceLimits;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Descriptor the workload reads its entropy pool from.
pub const ENTROPY_FD: RawFd = 3;

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// How long output readers may outlive the workload.
pub const OUTPUT_GRACE: Duration = Duration::from_millis(500);

/// `poll` timeout of the output readers, bounding how late they see a stop.
const READ_POLL_MS: libc::c_int = 100;

pub struct ChildSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Complete environment; nothing is inherited from the parent.
    pub env: BTreeMap<String, String>,
    pub stdin: Vec<u8>,
    pub entropy: Vec<u8>,
    pub work_dir: Option<PathBuf>,
    pub limits: ResourceLimits,
    pub filter: CompiledFilter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    Exited(i32),
    Signaled(i32),
}

impl ExitKind {
    /// Shell convention: signals map to 128 + signal number.
    pub fn code(self) -> i32 {
        match self {
            ExitKind::Exited(code) => code,
            ExitKind::Signaled(sig) => 128 + sig,
        }
    }

    pub fn signal(self) -> Option<i32> {
        match self {
            ExitKind::Exited(_) => None,
            ExitKind::Signaled(sig) => Some(sig),
        }
    }

    fn from_wait_status(status: libc::c_int) -> Self {
        if libc::WIFSIGNALED(status) {
            ExitKind::Signaled(libc::WTERMSIG(status))
        } else {
            ExitKind::Exited(libc::WEXITSTATUS(status))
        }
    }
}

#[derive(Debug)]
pub struct ChildOutcome {
    pub exit: ExitKind,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub usage: ResourceUsage,
    pub timed_out: bool,
    pub output_overflow: bool,
    /// A denied call that got the workload killed.
    pub violation: Option<Violation>,
    pub memory_refused: Option<u64>,
}

fn entropy_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0 as libc::c_int; 2];
    // SAFETY: pipe2 writes two descriptors into the array on success.
    #[cfg(target_os = "linux")]
    let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) };
    // SAFETY: as above; CLOEXEC is set right after.
    #[cfg(not(target_os = "linux"))]
    let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: both descriptors are fresh and owned by nobody else.
    let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    #[cfg(not(target_os = "linux"))]
    for fd in [&read, &write] {
        set_cloexec(fd.as_raw_fd(), true)?;
    }
    Ok((read, write))
}

fn set_cloexec(fd: RawFd, on: bool) -> io::Result<()> {
    let flags = if on { libc::FD_CLOEXEC } else { 0 };
    // SAFETY: F_SETFD only changes descriptor flags.
    if unsafe { libc::fcntl(fd, libc::F_SETFD, flags) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Put the entropy pipe on [`ENTROPY_FD`], inheritable across `exec`.
fn install_entropy_fd(read_fd: RawFd) -> io::Result<()> {
    if read_fd == ENTROPY_FD {
        return set_cloexec(read_fd, false);
    }
    // SAFETY: dup2 onto a fixed number; the new descriptor has CLOEXEC clear.
    if unsafe { libc::dup2(read_fd, ENTROPY_FD) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Bytes kept from one output stream.
#[derive(Debug, Default)]
struct CappedBuffer {
    bytes: Vec<u8>,
    cap: usize,
    overflow: bool,
}

impl CappedBuffer {
    fn new(cap: usize) -> Self {
        Self {
            cap,
            ..Self::default()
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        let room = self.cap.saturating_sub(self.bytes.len());
        if chunk.len() > room {
            self.overflow = true;
        }
        self.bytes.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }
}

/// Read a pipe until EOF, keeping at most `cap` bytes and draining past the
/// cap so the writer never blocks. Gives up once `stop` is set; the second
/// value is then true, as it is on overflow.
fn drain<R: Read + AsRawFd>(mut pipe: R, cap: usize, stop: &AtomicBool) -> io::Result<(Vec<u8>, bool)> {
    let mut kept = CappedBuffer::new(cap);
    let mut buf = [0u8; 8192];
    loop {
        if stop.load(Ordering::SeqCst) {
            tracing::warn!("Output stream still open after the workload exited; cutting it");
            return Ok((kept.bytes, true));
        }
        let mut fds = libc::pollfd {
            fd: pipe.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        // SAFETY: one valid pollfd.
        let ready = unsafe { libc::poll(&mut fds, 1, READ_POLL_MS) };
        if ready < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        if ready == 0 {
            continue;
        }
        match pipe.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => kept.push(&buf[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok((kept.bytes, kept.overflow))
}

/// Write all of `data`, treating a closed pipe as the reader declining it.
fn feed<W: Write>(mut writer: W, data: &[u8]) -> io::Result<()> {
    match writer.write_all(data) {
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        other => other,
    }
}

fn kill_group(pgid: libc::pid_t) {
    // SAFETY: signals a process group we created. ESRCH when it is already
    // gone is fine.
    unsafe {
        libc::killpg(pgid, libc::SIGKILL);
    }
}

fn join<T>(handle: std::thread::ScopedJoinHandle<'_, io::Result<T>>, what: &str) -> Result<T, CageError> {
    handle
        .join()
        .map_err(|_| CageError::Internal(format!("{what} thread panicked")))?
        .map_err(|e| CageError::Internal(format!("{what}: {e}")))
}

/// How the child ended, however it was watched.
struct Reaped {
    status: libc::c_int,
    usage: libc::rusage,
    timed_out: bool,
    violation: Option<Violation>,
    memory_refused: Option<u64>,
}

#[cfg(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64")))]
fn reap(
    pid: libc::pid_t,
    filter: &CompiledFilter,
    deadline: Option<Instant>,
    on_intercept: &mut InterceptFn<'_>,
) -> Result<Reaped, CageError> {
    let done = trace::supervise(pid, &filter.rules, deadline, on_intercept)?;
    Ok(Reaped {
        status: done.status,
        usage: done.usage,
        timed_out: done.timed_out,
        violation: done.violation,
        memory_refused: done.memory_refused,
    })
}

/// `wait4` for `pid`. `None` while it is still running (non-blocking only).
#[cfg(not(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64"))))]
fn wait4(pid: libc::pid_t, block: bool) -> io::Result<Option<(libc::c_int, libc::rusage)>> {
    let flags = if block { 0 } else { libc::WNOHANG };
    loop {
        let mut status: libc::c_int = 0;
        // SAFETY: rusage is plain data; wait4 fills it on success.
        let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::wait4(pid, &mut status, flags, &mut usage) };
        if rc == pid {
            return Ok(Some((status, usage)));
        }
        if rc == 0 {
            return Ok(None);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// Untraced: poll until exit or the deadline. No call is intercepted here.
#[cfg(not(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64"))))]
fn reap(
    pid: libc::pid_t,
    _filter: &CompiledFilter,
    deadline: Option<Instant>,
    _on_intercept: &mut InterceptFn<'_>,
) -> Result<Reaped, CageError> {
    let mut timed_out = false;
    let reaped = loop {
        match wait4(pid, false) {
            Ok(Some(done)) => break Ok(done),
            Ok(None) => {}
            Err(e) => break Err(e),
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            tracing::warn!("Wall time limit reached; killing process group {}", pid);
            kill_group(pid);
            timed_out = true;
            break wait4(pid, true).and_then(|r| r.ok_or_else(|| io::Error::other("child vanished")));
        }
        std::thread::sleep(POLL_INTERVAL);
    };
    let (status, usage) = reaped.map_err(|e| CageError::Internal(format!("wait4: {e}")))?;
    Ok(Reaped {
        status,
        usage,
        timed_out,
        violation: None,
        memory_refused: None,
    })
}

/// Spawn the workload and supervise it to completion. `on_intercept` is
/// called on this thread while the workload is stopped.
pub fn run_child(spec: ChildSpec, on_intercept: &mut InterceptFn<'_>) -> Result<ChildOutcome, CageError> {
    let ChildSpec {
        program,
        args,
        env,
        stdin,
        entropy,
        work_dir,
        limits,
        filter,
    } = spec;

    let (entropy_read, entropy_write) =
        entropy_pipe().map_err(|e| CageError::Internal(format!("entropy pipe: {e}")))?;
    let entropy_read_fd = entropy_read.as_raw_fd();

    let mut cmd = Command::new(&program);
    cmd.args(&args)
        .env_clear()
        .envs(&env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0);
    if let Some(dir) = &work_dir {
        cmd.current_dir(dir);
    }

    let armed = filter.clone();
    #[cfg(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64")))]
    let trap_tsc = filter.rules.trap_tsc;
    // SAFETY: the hook only issues syscalls (setrlimit, dup2, fcntl, prctl,
    // ptrace, seccomp) and touches no locks.
    unsafe {
        cmd.pre_exec(move || {
            apply_rlimits(&limits)?;
            install_entropy_fd(entropy_read_fd)?;
            #[cfg(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64")))]
            trace::prepare_child(trap_tsc)?;
            armed.apply()
        });
    }

    let start = Instant::now();
    let mut child = cmd.spawn().map_err(|source| CageError::Spawn {
        program: program.clone(),
        source,
    })?;
    drop(entropy_read);

    let pid = child.id() as libc::pid_t;
    tracing::debug!("Spawned {} in process group {}", program, pid);

    let child_stdin = child.stdin.take();
    let child_stdout = child.stdout.take();
    let child_stderr = child.stderr.take();
    let entropy_file = File::from(entropy_write);
    let deadline = limits.max_wall_time_ms.map(|ms| start + Duration::from_millis(ms));
    let stop = AtomicBool::new(false);

    std::thread::scope(|s| {
        let stdin_task = s.spawn(|| match child_stdin {
            Some(pipe) => feed(pipe, &stdin),
            None => Ok(()),
        });
        let entropy_task = s.spawn(|| feed(entropy_file, &entropy));
        let stdout_task = s.spawn(|| match child_stdout {
            Some(pipe) => drain(pipe, MAX_CAPTURE_BYTES, &stop),
            None => Ok((Vec::new(), false)),
        });
        let stderr_task = s.spawn(|| match child_stderr {
            Some(pipe) => drain(pipe, MAX_CAPTURE_BYTES, &stop),
            None => Ok((Vec::new(), false)),
        });

        let reaped = reap(pid, &filter, deadline, on_intercept);
        let wall = start.elapsed();

        // Stragglers in the group would hold the output pipes open.
        kill_group(pid);
        let grace = Instant::now() + OUTPUT_GRACE;
        while !(stdout_task.is_finished() && stderr_task.is_finished()) && Instant::now() < grace {
            std::thread::sleep(POLL_INTERVAL);
        }
        stop.store(true, Ordering::SeqCst);

        let (stdout, stdout_overflow) = join(stdout_task, "stdout reader")?;
        let (stderr, stderr_overflow) = join(stderr_task, "stderr reader")?;
        let reaped = reaped?;
        join(stdin_task, "stdin writer")?;
        join(entropy_task, "entropy writer")?;

        Ok(ChildOutcome {
            exit: ExitKind::from_wait_status(reaped.status),
            stdout,
            stderr,
            usage: ResourceUsage::from_rusage(&reaped.usage, wall),
            timed_out: reaped.timed_out,
            output_overflow: stdout_overflow || stderr_overflow,
            violation: reaped.violation,
            memory_refused: reaped.memory_refused,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_signal_exit_code() {
        assert_eq!(ExitKind::Signaled(libc::SIGSYS).code(), 128 + libc::SIGSYS);
        assert_eq!(ExitKind::Exited(3).code(), 3);
        assert_eq!(ExitKind::Exited(3).signal(), None);
    }

    #[test]
    fn test_capped_reader_drains_past_cap() {
        let stop = AtomicBool::new(false);
        let (mut writer, reader) = UnixStream::pair().unwrap();
        let data = vec![7u8; 10_000];
        let writes = std::thread::spawn(move || writer.write_all(&data));
        let (kept, overflow) = drain(reader, 100, &stop).unwrap();
        writes.join().unwrap().unwrap();
        assert_eq!(kept.len(), 100);
        assert!(overflow);

        let mut buffer = CappedBuffer::new(10_000);
        buffer.push(&[7u8; 10_000]);
        assert!(!buffer.overflow);
        assert_eq!(buffer.bytes.len(), 10_000);
    }

    #[test]
    fn test_reader_gives_up_on_held_stream() {
        let stop = AtomicBool::new(false);
        let (mut writer, reader) = UnixStream::pair().unwrap();
        writer.write_all(b"partial").unwrap();

        let start = Instant::now();
        let (kept, cut) = std::thread::scope(|s| {
            let task = s.spawn(|| drain(reader, 100, &stop));
            std::thread::sleep(Duration::from_millis(200));
            stop.store(true, Ordering::SeqCst);
            task.join().unwrap().unwrap()
        });
        assert_eq!(kept, b"partial");
        assert!(cut);
        assert!(start.elapsed() < Duration::from_secs(2));
        drop(writer);
    }
}
