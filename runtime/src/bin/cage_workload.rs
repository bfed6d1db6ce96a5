// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! cage-workload: a small program for exercising the cage.
//!
//! ```text
//! cage-workload random <n>     read n bytes from $CAGE_RANDOM, print hex and derived values
//! cage-workload urandom <n>    read n bytes from /dev/urandom, print hex
//! cage-workload clock          read CLOCK_REALTIME through libc
//! cage-workload getrandom <n>  ask the kernel for entropy directly
//! cage-workload rdtsc          read the timestamp counter (x86_64)
//! cage-workload socket         open a TCP socket
//! cage-workload alloc <mib>    allocate and touch mib MiB
//! cage-workload daemon <secs>  leave a detached child sleeping, exit 0
//! cage-workload sleep <secs>   sleep, then exit 0
//! cage-workload spin           burn CPU until killed
//! cage-workload echo           copy stdin to stdout
//! cage-workload env <key>      print one environment variable
//! cage-workload exit <code>    exit with a code
//! ```
//!
//! Nothing here may use a randomly seeded map: that would read kernel
//! entropy at startup.

use std::io::{self, Read, Write};
use std::process::ExitCode;

fn usage() -> ExitCode {
    eprintln!(
        "usage: cage-workload <random|urandom|clock|getrandom|rdtsc|socket|alloc|daemon|sleep|spin|echo|env|exit> [arg]"
    );
    ExitCode::from(2)
}

fn parse<T: std::str::FromStr>(arg: Option<&String>) -> Option<T> {
    arg.and_then(|a| a.parse().ok())
}

fn random(n: usize) -> io::Result<()> {
    let path = std::env::var("CAGE_RANDOM").map_err(|_| io::Error::new(io::ErrorKind::NotFound, "CAGE_RANDOM unset"))?;
    let mut buf = vec![0u8; n];
    std::fs::File::open(path)?.read_exact(&mut buf)?;

    let mut out = io::stdout().lock();
    writeln!(out, "bytes {}", hex::encode(&buf))?;
    for (i, chunk) in buf.chunks_exact(8).enumerate() {
        let mut word = [0u8; 8];
        word.copy_from_slice(chunk);
        writeln!(out, "u64[{i}] {}", u64::from_le_bytes(word))?;
    }
    Ok(())
}

fn urandom(n: usize) -> io::Result<()> {
    let mut buf = vec![0u8; n];
    std::fs::File::open("/dev/urandom")?.read_exact(&mut buf)?;
    println!("urandom {}", hex::encode(&buf));
    Ok(())
}

fn clock() -> ExitCode {
    let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
    // SAFETY: clock_gettime writes into a local timespec.
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts) };
    if rc != 0 {
        println!("clock denied: {}", io::Error::last_os_error());
        return ExitCode::from(1);
    }
    println!("clock {}", ts.tv_sec);
    ExitCode::SUCCESS
}

fn getrandom(n: usize) -> ExitCode {
    let mut buf = vec![0u8; n];
    // SAFETY: getrandom writes at most n bytes into buf.
    let rc = unsafe { libc::syscall(libc::SYS_getrandom, buf.as_mut_ptr(), n, 0) };
    if rc < 0 {
        println!("getrandom denied: {}", io::Error::last_os_error());
        return ExitCode::from(1);
    }
    println!("getrandom {}", rc);
    ExitCode::SUCCESS
}

#[cfg(target_arch = "x86_64")]
fn rdtsc() -> ExitCode {
    // SAFETY: rdtsc has no memory effects.
    let ticks = unsafe { std::arch::x86_64::_rdtsc() };
    println!("rdtsc {ticks}");
    ExitCode::SUCCESS
}

#[cfg(not(target_arch = "x86_64"))]
fn rdtsc() -> ExitCode {
    println!("rdtsc unsupported");
    ExitCode::from(1)
}

fn socket() -> ExitCode {
    // SAFETY: plain socket(2); the descriptor is closed below.
    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0) };
    if fd < 0 {
        println!("socket denied: {}", io::Error::last_os_error());
        return ExitCode::from(1);
    }
    // SAFETY: fd was just returned by socket(2).
    unsafe { libc::close(fd) };
    println!("socket opened");
    ExitCode::SUCCESS
}

fn alloc(mib: usize) -> ExitCode {
    let len = mib << 20;
    let mut buf: Vec<u8> = Vec::new();
    if buf.try_reserve_exact(len).is_err() {
        println!("alloc refused");
        return ExitCode::from(1);
    }
    buf.resize(len, 1);
    println!("alloc {} {}", mib, std::hint::black_box(&buf).len());
    ExitCode::SUCCESS
}

/// Fork a child into its own session that keeps stdout open, then exit.
fn daemon(secs: u32) -> ExitCode {
    // SAFETY: the child only calls async-signal-safe functions before _exit.
    match unsafe { libc::fork() } {
        -1 => {
            println!("fork failed: {}", io::Error::last_os_error());
            ExitCode::FAILURE
        }
        0 => unsafe {
            libc::setsid();
            libc::sleep(secs);
            libc::_exit(0)
        },
        _ => {
            println!("daemon started");
            ExitCode::SUCCESS
        }
    }
}

fn spin() -> ! {
    let mut x: u64 = 0;
    loop {
        x = std::hint::black_box(x.wrapping_mul(6364136223846793005).wrapping_add(1));
    }
}

fn echo() -> io::Result<()> {
    let mut input = Vec::new();
    io::stdin().read_to_end(&mut input)?;
    io::stdout().write_all(&input)
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let arg = args.get(1);

    let result = match args.first().map(String::as_str) {
        Some("random") => match parse::<usize>(arg) {
            Some(n) => random(n),
            None => return usage(),
        },
        Some("urandom") => urandom(parse(arg).unwrap_or(16)),
        Some("clock") => return clock(),
        Some("getrandom") => return getrandom(parse(arg).unwrap_or(16)),
        Some("rdtsc") => return rdtsc(),
        Some("socket") => return socket(),
        Some("alloc") => match parse::<usize>(arg) {
            Some(mib) => return alloc(mib),
            None => return usage(),
        },
        Some("daemon") => match parse::<u32>(arg) {
            Some(secs) => return daemon(secs),
            None => return usage(),
        },
        Some("sleep") => match parse::<u64>(arg) {
            Some(secs) => {
                std::thread::sleep(std::time::Duration::from_secs(secs));
                Ok(())
            }
            None => return usage(),
        },
        Some("spin") => spin(),
        Some("echo") => echo(),
        Some("env") => match arg {
            Some(key) => {
                println!("{}", std::env::var(key).unwrap_or_default());
                Ok(())
            }
            None => return usage(),
        },
        Some("exit") => match parse::<u8>(arg) {
            Some(code) => return ExitCode::from(code),
            None => return usage(),
        },
        _ => return usage(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("cage-workload: {e}");
            ExitCode::FAILURE
        }
    }
}
