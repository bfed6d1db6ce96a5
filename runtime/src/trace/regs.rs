// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Register access for a stopped tracee.

use std::io;

/// Syscall argument registers, in ABI order.
#[cfg(target_arch = "x86_64")]
#[derive(Clone, Copy)]
pub struct Regs(libc::user_regs_struct);

#[cfg(target_arch = "x86_64")]
impl Regs {
    pub fn read(pid: libc::pid_t) -> io::Result<Self> {
        // SAFETY: user_regs_struct is plain data.
        let mut raw: libc::user_regs_struct = unsafe { std::mem::zeroed() };
        ptrace!(libc::PTRACE_GETREGS, pid, 0usize, &mut raw as *mut libc::user_regs_struct)?;
        Ok(Self(raw))
    }

    pub fn write(&self, pid: libc::pid_t) -> io::Result<()> {
        ptrace!(libc::PTRACE_SETREGS, pid, 0usize, &self.0 as *const libc::user_regs_struct)?;
        Ok(())
    }

    pub fn syscall_nr(&self) -> i64 {
        self.0.orig_rax as i64
    }

    pub fn arg(&self, n: usize) -> u64 {
        let r = &self.0;
        [r.rdi, r.rsi, r.rdx, r.r10, r.r8, r.r9][n]
    }

    pub fn set_arg(&mut self, n: usize, value: u64) {
        let r = &mut self.0;
        let slot = match n {
            0 => &mut r.rdi,
            1 => &mut r.rsi,
            2 => &mut r.rdx,
            3 => &mut r.r10,
            4 => &mut r.r8,
            _ => &mut r.r9,
        };
        *slot = value;
    }

    pub fn ret(&self) -> i64 {
        self.0.rax as i64
    }

    pub fn sp(&self) -> u64 {
        self.0.rsp
    }

    pub fn pc(&self) -> u64 {
        self.0.rip
    }

    /// Skip the pending syscall and make it return `ret`.
    pub fn skip_syscall(&mut self, pid: libc::pid_t, ret: i64) -> io::Result<()> {
        self.0.orig_rax = u64::MAX;
        self.0.rax = ret as u64;
        self.write(pid)
    }

    /// Answer a trapped `rdtsc`/`rdtscp` of `len` bytes with a zero counter.
    pub fn emulate_counter_read(&mut self, pid: libc::pid_t, len: u64, with_aux: bool) -> io::Result<()> {
        self.0.rax = 0;
        self.0.rdx = 0;
        if with_aux {
            self.0.rcx = 0;
        }
        self.0.rip += len;
        self.write(pid)
    }
}

#[cfg(target_arch = "aarch64")]
const NT_PRSTATUS: usize = 1;

/// `NT_ARM_SYSTEM_CALL`: the syscall number of a stopped task.
#[cfg(target_arch = "aarch64")]
const NT_ARM_SYSTEM_CALL: usize = 0x404;

#[cfg(target_arch = "aarch64")]
#[derive(Clone, Copy)]
pub struct Regs(libc::user_regs_struct);

#[cfg(target_arch = "aarch64")]
impl Regs {
    pub fn read(pid: libc::pid_t) -> io::Result<Self> {
        // SAFETY: user_regs_struct is plain data.
        let mut raw: libc::user_regs_struct = unsafe { std::mem::zeroed() };
        let mut iov = libc::iovec {
            iov_base: (&mut raw as *mut libc::user_regs_struct).cast(),
            iov_len: std::mem::size_of::<libc::user_regs_struct>(),
        };
        ptrace!(libc::PTRACE_GETREGSET, pid, NT_PRSTATUS, &mut iov as *mut libc::iovec)?;
        Ok(Self(raw))
    }

    pub fn write(&self, pid: libc::pid_t) -> io::Result<()> {
        let mut raw = self.0;
        let mut iov = libc::iovec {
            iov_base: (&mut raw as *mut libc::user_regs_struct).cast(),
            iov_len: std::mem::size_of::<libc::user_regs_struct>(),
        };
        ptrace!(libc::PTRACE_SETREGSET, pid, NT_PRSTATUS, &mut iov as *mut libc::iovec)?;
        Ok(())
    }

    pub fn syscall_nr(&self) -> i64 {
        self.0.regs[8] as i64
    }

    pub fn arg(&self, n: usize) -> u64 {
        self.0.regs[n]
    }

    pub fn set_arg(&mut self, n: usize, value: u64) {
        self.0.regs[n] = value;
    }

    pub fn ret(&self) -> i64 {
        self.0.regs[0] as i64
    }

    pub fn sp(&self) -> u64 {
        self.0.sp
    }

    pub fn pc(&self) -> u64 {
        self.0.pc
    }

    /// Skip the pending syscall and make it return `ret`.
    pub fn skip_syscall(&mut self, pid: libc::pid_t, ret: i64) -> io::Result<()> {
        let mut nr: libc::c_int = -1;
        let mut iov = libc::iovec {
            iov_base: (&mut nr as *mut libc::c_int).cast(),
            iov_len: std::mem::size_of::<libc::c_int>(),
        };
        ptrace!(libc::PTRACE_SETREGSET, pid, NT_ARM_SYSTEM_CALL, &mut iov as *mut libc::iovec)?;
        self.0.regs[0] = ret as u64;
        self.write(pid)
    }
}
