//! Signal management for the daemon and its workers
//!
//! Handlers are installed with `sigaction` and without `SA_RESTART`, so a
//! delivered signal makes the blocking call in progress (accept, read)
//! return `EINTR` instead of resuming:
//! - SIGALRM: no-op, lets a handler put a deadline on a blocking read
//! - SIGCHLD: no-op, wakes the accept loop so it can reap finished workers
//! - SIGINT/SIGTERM (daemon only): raise the shutdown flag
//!
//! The daemon keeps SIGCHLD, SIGINT and SIGTERM blocked except while it
//! waits for a connection, so none of them can slip in between the loop's
//! checks and the wait itself.

use crate::error::{sys_err, Result};
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::alarm;
use std::sync::atomic::{AtomicBool, Ordering};

/// Set once SIGINT or SIGTERM reaches the daemon
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Signals that wake the accept loop
const WAKEUP_SIGNALS: [Signal; 3] = [Signal::SIGCHLD, Signal::SIGINT, Signal::SIGTERM];

fn wakeup_set() -> SigSet {
    let mut set = SigSet::empty();
    for signal in WAKEUP_SIGNALS {
        set.add(signal);
    }
    set
}

extern "C" fn interrupt_only(_signum: libc::c_int) {}

extern "C" fn request_shutdown(_signum: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

fn install(signal: Signal, handler: SigHandler) -> Result<()> {
    let action = SigAction::new(handler, SaFlags::empty(), SigSet::empty());
    // Safety: both handlers only touch an atomic, which is async-signal-safe.
    unsafe { sigaction(signal, &action) }.map_err(sys_err("sigaction"))?;
    Ok(())
}

/// Make SIGALRM and SIGCHLD interrupt blocking calls instead of being
/// ignored or killing the process.
pub fn install_interrupt_handlers() -> Result<()> {
    install(Signal::SIGALRM, SigHandler::Handler(interrupt_only))?;
    install(Signal::SIGCHLD, SigHandler::Handler(interrupt_only))?;
    Ok(())
}

/// Turn SIGINT and SIGTERM into a shutdown request for the accept loop.
pub fn install_shutdown_handlers() -> Result<()> {
    install(Signal::SIGINT, SigHandler::Handler(request_shutdown))?;
    install(Signal::SIGTERM, SigHandler::Handler(request_shutdown))?;
    Ok(())
}

/// Block the wake-up signals and return the mask to use while waiting,
/// i.e. the previous mask with them unblocked.
pub fn block_wakeups() -> Result<SigSet> {
    let mut waiting = SigSet::thread_get_mask().map_err(sys_err("sigprocmask"))?;
    for signal in WAKEUP_SIGNALS {
        waiting.remove(signal);
    }
    wakeup_set().thread_block().map_err(sys_err("sigprocmask"))?;
    Ok(waiting)
}

/// Workers die on SIGINT/SIGTERM like any plain process and see every
/// signal the daemon had blocked.
pub fn reset_for_worker() -> Result<()> {
    install(Signal::SIGINT, SigHandler::SigDfl)?;
    install(Signal::SIGTERM, SigHandler::SigDfl)?;
    wakeup_set().thread_unblock().map_err(sys_err("sigprocmask"))?;
    Ok(())
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

/// Pending SIGALRM, cancelled when dropped.
///
/// While armed, a blocking read on the connection returns
/// `ErrorKind::Interrupted` once the deadline passes.
///
/// ```no_run
/// # use std::io::Read;
/// # fn demo(input: &mut impl Read) -> std::io::Result<usize> {
/// let mut buf = [0u8; 512];
/// let _deadline = sloop::signal::AlarmGuard::arm(30);
/// input.read(&mut buf)
/// # }
/// ```
#[derive(Debug)]
#[must_use = "the alarm is cancelled as soon as the guard is dropped"]
pub struct AlarmGuard {
    _private: (),
}

impl AlarmGuard {
    /// Schedule SIGALRM in `secs` seconds. A zero value would cancel
    /// instead, so it is rounded up to one second.
    pub fn arm(secs: u32) -> Self {
        alarm::set(secs.max(1));
        Self { _private: () }
    }
}

impl Drop for AlarmGuard {
    fn drop(&mut self) {
        alarm::cancel();
    }
}
