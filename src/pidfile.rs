//! PID record for the running daemon
//!
//! The record holds the decimal pid of the daemon's top-level process
//! followed by a newline. A missing or stale record means no instance is
//! believed to be running; stopping always clears it.

use crate::error::{io_err, sys_err, Result};
use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::{getpgid, getpgrp, Pid};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

/// Poll interval while waiting for a stopped daemon to exit
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// What `stop_existing` found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// No pid record
    NotRunning,
    /// A record naming no live process (or an unparsable one)
    Stale(i32),
    /// Signalled the process group rooted at this pid
    Signaled(Pid),
}

/// Write `pid` as a newline-terminated decimal, replacing any old record.
pub fn write_pid(path: &Path, pid: Pid) -> Result<()> {
    let mut file = fs::File::create(path).map_err(|e| io_err(path, e))?;
    writeln!(file, "{}", pid).map_err(|e| io_err(path, e))?;
    tracing::debug!(pid = pid.as_raw(), path = %path.display(), "wrote pid file");
    Ok(())
}

/// Read the record, `None` when there is none.
pub fn read_pid(path: &Path) -> Result<Option<i32>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(parse_pid(&bytes))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_err(path, e)),
    }
}

/// Decimal digits at the start of `bytes`; anything else ends the number.
/// Zero means "no usable pid", which also covers overflow.
pub fn parse_pid(bytes: &[u8]) -> i32 {
    let mut pid: i32 = 0;
    for &b in bytes.iter().take_while(|b| b.is_ascii_digit()) {
        match pid
            .checked_mul(10)
            .and_then(|p| p.checked_add(i32::from(b - b'0')))
        {
            Some(next) => pid = next,
            None => return 0,
        }
    }
    pid
}

/// Signal the instance named in the pid record and remove the record.
///
/// The whole process group of the recorded pid receives SIGINT, so the
/// daemon's workers go down with it. Afterwards this waits up to `timeout`
/// for the daemon itself to disappear, escalating to SIGKILL once. The
/// record is removed in every case, even when it could not be read.
pub fn stop_existing(path: &Path, timeout: Duration) -> Result<StopOutcome> {
    let raw = match read_pid(path) {
        Ok(Some(raw)) => raw,
        Ok(None) => return Ok(StopOutcome::NotRunning),
        Err(e) => {
            // Nothing we can act on, but the record still goes.
            tracing::warn!(error = %e, "cannot read pid file");
            if let Err(e) = remove_record(path) {
                tracing::warn!(error = %e, "cannot remove pid file");
            }
            return Ok(StopOutcome::NotRunning);
        }
    };

    let outcome = if raw == 0 {
        StopOutcome::Stale(raw)
    } else {
        let pid = Pid::from_raw(raw);
        match lookup_target(pid)? {
            None => StopOutcome::Stale(raw),
            Some(target) => terminate(pid, target, timeout)?,
        }
    };

    remove_record(path)?;

    match outcome {
        StopOutcome::Signaled(pid) => {
            tracing::info!(pid = pid.as_raw(), "stopped previous instance")
        }
        StopOutcome::Stale(raw) => tracing::warn!(pid = raw, "removed stale pid file"),
        StopOutcome::NotRunning => {}
    }

    Ok(outcome)
}

fn remove_record(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_err(path, e)),
    }
}

/// Who receives the stop signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Group(Pid),
    Process(Pid),
}

impl Target {
    fn send(self, signal: Signal) -> nix::Result<()> {
        match self {
            Target::Group(pgid) => killpg(pgid, signal),
            Target::Process(pid) => kill(pid, signal),
        }
    }
}

/// `None` when the recorded pid names no process.
fn lookup_target(pid: Pid) -> Result<Option<Target>> {
    let pgid = match getpgid(Some(pid)) {
        Ok(pgid) => pgid,
        Err(Errno::ESRCH) => return Ok(None),
        Err(e) => return Err(sys_err("getpgid")(e)),
    };

    // Never take down our own group (the shell or harness that ran us).
    if pgid == getpgrp() {
        Ok(Some(Target::Process(pid)))
    } else {
        Ok(Some(Target::Group(pgid)))
    }
}

/// SIGINT, then SIGKILL if the daemon outlives `timeout`.
///
/// SIGKILL goes to the recorded pid alone. Workers already died of the
/// group-wide SIGINT, and a recycled pid that turned out to be, say, a
/// shell ignoring SIGINT must not take its whole job group down with it.
fn terminate(pid: Pid, target: Target, timeout: Duration) -> Result<StopOutcome> {
    match target.send(Signal::SIGINT) {
        Ok(()) => {}
        Err(Errno::ESRCH) => return Ok(StopOutcome::Stale(pid.as_raw())),
        Err(e) => return Err(sys_err("kill")(e)),
    }

    if !wait_for_exit(pid, timeout) {
        tracing::warn!(
            pid = pid.as_raw(),
            ?timeout,
            "previous instance ignored SIGINT, killing"
        );
        match kill(pid, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => return Err(sys_err("kill")(e)),
        }
        if !wait_for_exit(pid, timeout) {
            tracing::warn!(pid = pid.as_raw(), "previous instance still alive");
        }
    }

    Ok(StopOutcome::Signaled(pid))
}

/// Poll until `pid` no longer names a live process.
pub fn wait_for_exit(pid: Pid, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if !is_alive(pid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(EXIT_POLL_INTERVAL);
    }
}

/// Exists and has not yet exited. A zombie waiting for its parent (which
/// for a detached daemon may be an init that never reaps) counts as gone.
pub fn is_alive(pid: Pid) -> bool {
    if kill(pid, None).is_err() {
        return false;
    }
    !is_zombie(pid)
}

#[cfg(target_os = "linux")]
fn is_zombie(pid: Pid) -> bool {
    // /proc/<pid>/stat: "<pid> (<comm>) <state> ..."; comm may hold spaces.
    fs::read_to_string(format!("/proc/{}/stat", pid))
        .ok()
        .and_then(|stat| {
            let rest = &stat[stat.rfind(')')? + 1..];
            rest.split_whitespace().next().map(|state| state == "Z")
        })
        .unwrap_or(false)
}

#[cfg(not(target_os = "linux"))]
fn is_zombie(_pid: Pid) -> bool {
    false
}
