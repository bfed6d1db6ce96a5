// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Tracee memory and the two rewrites the supervisor makes in it: hiding
//! the vDSO and pointing an entropy-device open at the DRG pool.

use super::regs::Regs;
use std::ffi::OsStr;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};

/// Longest path read out of a tracee.
const PATH_MAX: usize = 4096;

/// Bound on the argv/envp/auxv walk.
const MAX_STACK_WORDS: u64 = 1 << 18;

/// Below the x86_64 red zone, rounded to 16.
const SCRATCH_OFFSET: u64 = 256;

/// `(major, minor)` of `/dev/random` and `/dev/urandom`.
const ENTROPY_DEVICES: [(u64, u64); 2] = [(1, 8), (1, 9)];

pub fn read(pid: libc::pid_t, addr: u64, buf: &mut [u8]) -> io::Result<usize> {
    let local = libc::iovec {
        iov_base: buf.as_mut_ptr().cast(),
        iov_len: buf.len(),
    };
    let remote = libc::iovec {
        iov_base: addr as *mut libc::c_void,
        iov_len: buf.len(),
    };
    // SAFETY: the local iovec covers `buf` exactly; the remote side is only
    // read by the kernel.
    let n = unsafe { libc::process_vm_readv(pid, &local, 1, &remote, 1, 0) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(n as usize)
}

pub fn write(pid: libc::pid_t, addr: u64, data: &[u8]) -> io::Result<()> {
    let local = libc::iovec {
        iov_base: data.as_ptr() as *mut libc::c_void,
        iov_len: data.len(),
    };
    let remote = libc::iovec {
        iov_base: addr as *mut libc::c_void,
        iov_len: data.len(),
    };
    // SAFETY: the kernel only reads the local buffer.
    let n = unsafe { libc::process_vm_writev(pid, &local, 1, &remote, 1, 0) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    if n as usize != data.len() {
        return Err(io::Error::new(io::ErrorKind::WriteZero, "short write into tracee"));
    }
    Ok(())
}

fn read_word(pid: libc::pid_t, addr: u64) -> io::Result<u64> {
    let mut word = [0u8; 8];
    if read(pid, addr, &mut word)? != word.len() {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "short read from tracee"));
    }
    Ok(u64::from_ne_bytes(word))
}

/// NUL-terminated string at `addr`, read a page fragment at a time so an
/// unmapped page after the terminator is never touched.
pub fn read_cstr(pid: libc::pid_t, addr: u64) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut cursor = addr;
    while out.len() < PATH_MAX {
        let to_page_end = 4096 - (cursor % 4096) as usize;
        let mut chunk = vec![0u8; to_page_end.min(PATH_MAX - out.len())];
        let n = read(pid, cursor, &mut chunk)?;
        if n == 0 {
            break;
        }
        if let Some(end) = chunk[..n].iter().position(|b| *b == 0) {
            out.extend_from_slice(&chunk[..end]);
            return Ok(out);
        }
        out.extend_from_slice(&chunk[..n]);
        cursor += n as u64;
    }
    Err(io::Error::new(io::ErrorKind::InvalidData, "unterminated path"))
}

/// Replace `AT_SYSINFO_EHDR` in the auxiliary vector of a freshly exec'd
/// image with `AT_IGNORE`, so libc never finds the vDSO and every clock
/// read becomes a real syscall. `sp` must point at `argc`.
pub fn hide_vdso(pid: libc::pid_t, sp: u64) -> io::Result<bool> {
    let bad = || io::Error::new(io::ErrorKind::InvalidData, "malformed initial stack");

    let argc = read_word(pid, sp)?;
    if argc > MAX_STACK_WORDS {
        return Err(bad());
    }
    // argc, argv[0..argc], NULL
    let mut addr = sp + 8 * (argc + 2);
    let mut walked = 0;
    while read_word(pid, addr)? != 0 {
        addr += 8;
        walked += 1;
        if walked > MAX_STACK_WORDS {
            return Err(bad());
        }
    }
    addr += 8;

    for _ in 0..MAX_STACK_WORDS {
        match read_word(pid, addr)? {
            libc::AT_NULL => return Ok(false),
            libc::AT_SYSINFO_EHDR => {
                write(pid, addr, &libc::AT_IGNORE.to_ne_bytes())?;
                return Ok(true);
            }
            _ => addr += 16,
        }
    }
    Err(bad())
}

/// Host path of what the tracee names with `(dirfd, path)`.
pub fn tracee_path(pid: libc::pid_t, dirfd: libc::c_int, path: &[u8]) -> Option<PathBuf> {
    if path.is_empty() {
        return None;
    }
    let base = if path[0] == b'/' {
        format!("/proc/{pid}/root")
    } else if dirfd == libc::AT_FDCWD {
        format!("/proc/{pid}/cwd")
    } else {
        format!("/proc/{pid}/fd/{dirfd}")
    };
    let relative = &path[path.iter().take_while(|b| **b == b'/').count()..];
    Some(Path::new(&base).join(OsStr::from_bytes(relative)))
}

/// `(major, minor)` of a Linux device number.
fn dev_numbers(rdev: u64) -> (u64, u64) {
    let major = ((rdev >> 8) & 0xfff) | ((rdev >> 32) & !0xfff);
    let minor = (rdev & 0xff) | ((rdev >> 12) & !0xff);
    (major, minor)
}

/// True for the kernel's random character devices, through any symlinks.
pub fn is_entropy_device(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) => meta.file_type().is_char_device() && ENTROPY_DEVICES.contains(&dev_numbers(meta.rdev())),
        Err(_) => false,
    }
}

/// Point path argument `arg` of the stopped call at `replacement`, written
/// below the tracee's stack pointer.
pub fn redirect_path(pid: libc::pid_t, regs: &mut Regs, arg: usize, replacement: &[u8]) -> io::Result<()> {
    let scratch = (regs.sp() - SCRATCH_OFFSET - replacement.len() as u64) & !0xf;
    write(pid, scratch, replacement)?;
    regs.set_arg(arg, scratch);
    regs.write(pid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_devices_detected() {
        assert!(is_entropy_device(Path::new("/dev/urandom")));
        assert!(is_entropy_device(Path::new("/dev/random")));
        assert!(!is_entropy_device(Path::new("/dev/null")));
        assert!(!is_entropy_device(Path::new("/nonexistent/urandom")));
    }

    #[test]
    fn test_tracee_paths() {
        assert_eq!(
            tracee_path(42, libc::AT_FDCWD, b"/dev/urandom"),
            Some(PathBuf::from("/proc/42/root/dev/urandom"))
        );
        assert_eq!(
            tracee_path(42, libc::AT_FDCWD, b"urandom"),
            Some(PathBuf::from("/proc/42/cwd/urandom"))
        );
        assert_eq!(tracee_path(42, 7, b"urandom"), Some(PathBuf::from("/proc/42/fd/7/urandom")));
        assert_eq!(tracee_path(42, 7, b""), None);
    }

    #[test]
    fn test_own_memory_reads_back() {
        let pid = std::process::id() as libc::pid_t;
        let text = b"/dev/urandom\0trailing";
        let read_back = read_cstr(pid, text.as_ptr() as u64).unwrap();
        assert_eq!(read_back, b"/dev/urandom");
    }
}
