//! Accept loop with fork-per-connection workers
//!
//! Each accepted connection gets its own forked worker whose stdin and
//! stdout are the connection. The listener process never touches request
//! bytes and shares no mutable state with workers; all it keeps is the set
//! of worker pids so it can reap and, on shutdown, terminate them.
//!
//! The wait for a connection is a `ppoll` that unblocks SIGCHLD, SIGINT and
//! SIGTERM atomically, so a worker exiting or a stop request always wakes
//! the loop. The accept that follows is non-blocking: a client that gave up
//! in between costs one empty round, never a hang.

use crate::error::{io_err, sys_err, Result};
use crate::session::Channel;
use crate::signal;
use nix::errno::Errno;
use nix::poll::{ppoll, PollFd, PollFlags};
use nix::sys::signal::{kill, SigSet, Signal};
use nix::sys::socket::accept;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{dup2, fork, ForkResult, Pid};
use std::collections::HashSet;
use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::os::fd::{AsFd, AsRawFd, FromRawFd, OwnedFd};
use std::thread;
use std::time::{Duration, Instant};

/// Procedure run inside a worker, once per connection.
///
/// The channel is the connection itself and is unbuffered: every write
/// reaches the client at once, partial lines included. The worker's stdin
/// and stdout are the connection too, but `std::io::stdout()` is line
/// buffered and only flushed when the worker exits, so a prompt written
/// with `print!` would sit there while the handler waits for a reply.
pub type Handler = fn(&mut Channel) -> anyhow::Result<()>;

/// How long shutdown waits for terminated workers before giving up on them
const SHUTDOWN_REAP_TIMEOUT: Duration = Duration::from_secs(1);

/// Accept loop state owned by the daemon process
pub struct Acceptor {
    listener: Option<TcpListener>,
    handler: Handler,
    workers: HashSet<Pid>,
}

impl Acceptor {
    pub fn new(listener: TcpListener, handler: Handler) -> Self {
        Self {
            listener: Some(listener),
            handler,
            workers: HashSet::new(),
        }
    }

    /// Live (not yet reaped) workers
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Reap, accept, fork; repeat until a shutdown signal arrives.
    pub fn run(&mut self) -> Result<()> {
        if let Some(listener) = &self.listener {
            listener
                .set_nonblocking(true)
                .map_err(|e| io_err("<listening socket>", e))?;
        }
        let waiting_mask = signal::block_wakeups()?;

        while !signal::shutdown_requested() {
            self.reap_workers();

            if !self.wait_for_connection(&waiting_mask) {
                continue;
            }

            if let Some(conn) = self.accept_connection() {
                self.spawn_worker(conn)?;
            }
        }

        self.shutdown();
        Ok(())
    }

    /// Sleep until the listener is readable; `false` when woken by a signal.
    fn wait_for_connection(&self, waiting_mask: &SigSet) -> bool {
        let Some(listener) = self.listener.as_ref() else {
            return false;
        };

        let mut fds = [PollFd::new(listener.as_fd(), PollFlags::POLLIN)];
        match ppoll(&mut fds, None, Some(*waiting_mask)) {
            Ok(ready) => ready > 0,
            Err(Errno::EINTR) => false,
            Err(e) => {
                // Keep the loop from spinning on a persistent failure.
                tracing::warn!(error = %e, "ppoll failed");
                thread::sleep(Duration::from_millis(10));
                false
            }
        }
    }

    /// Collect every worker that has already exited. Never blocks.
    pub fn reap_workers(&mut self) -> usize {
        let mut reaped = 0;
        loop {
            match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => break,
                Ok(status) => {
                    if let Some(pid) = status.pid() {
                        self.workers.remove(&pid);
                        tracing::debug!(pid = pid.as_raw(), ?status, "reaped worker");
                    }
                    reaped += 1;
                }
                Err(Errno::EINTR) => continue,
                Err(Errno::ECHILD) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "waitpid failed");
                    break;
                }
            }
        }
        reaped
    }

    /// One accept. Interruption, a client that gave up, or any other accept
    /// error all mean "nothing this round".
    fn accept_connection(&self) -> Option<TcpStream> {
        let listener = self.listener.as_ref()?;
        let fd = match accept(listener.as_raw_fd()) {
            // Safety: accept just returned this descriptor and nothing else owns it.
            Ok(fd) => unsafe { OwnedFd::from_raw_fd(fd) },
            Err(Errno::EINTR) | Err(Errno::EAGAIN) | Err(Errno::ECONNABORTED) => return None,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                return None;
            }
        };

        let stream = TcpStream::from(fd);
        // Handlers expect ordinary blocking reads.
        if let Err(e) = stream.set_nonblocking(false) {
            tracing::warn!(error = %e, "cannot make connection blocking");
            return None;
        }
        Some(stream)
    }

    fn spawn_worker(&mut self, conn: TcpStream) -> Result<()> {
        // Safety: the daemon is single-threaded, and the child only runs the
        // handler before exiting.
        match unsafe { fork() }.map_err(sys_err("fork"))? {
            ForkResult::Parent { child } => {
                // The worker owns the connection now.
                drop(conn);
                self.workers.insert(child);
                tracing::debug!(pid = child.as_raw(), "spawned worker");
                Ok(())
            }
            ForkResult::Child => {
                let listener = self.listener.take();
                run_worker(listener, conn, self.handler)
            }
        }
    }

    /// Terminate tracked workers and reap them for a short while.
    pub fn shutdown(&mut self) {
        tracing::info!(workers = self.workers.len(), "shutting down");
        self.listener = None;

        for pid in &self.workers {
            match kill(*pid, Signal::SIGINT) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => tracing::warn!(pid = pid.as_raw(), error = %e, "cannot signal worker"),
            }
        }

        let deadline = Instant::now() + SHUTDOWN_REAP_TIMEOUT;
        while !self.workers.is_empty() && Instant::now() < deadline {
            if self.reap_workers() == 0 {
                thread::sleep(Duration::from_millis(10));
            }
        }

        if !self.workers.is_empty() {
            tracing::warn!(workers = self.workers.len(), "workers still running at exit");
        }
    }
}

/// Worker body in the forked child. Never returns.
fn run_worker(listener: Option<TcpListener>, conn: TcpStream, handler: Handler) -> ! {
    // A lingering copy of the listener would keep a restarted daemon from
    // binding the address.
    drop(listener);

    let code = match prepare_worker(conn) {
        Ok(mut channel) => match handler(&mut channel) {
            Ok(()) => 0,
            Err(e) => {
                tracing::error!(error = %e, "handler failed");
                1
            }
        },
        Err(e) => {
            tracing::error!(error = %e, "cannot prepare worker");
            1
        }
    };

    let _ = std::io::stdout().flush();
    std::process::exit(code);
}

fn prepare_worker(conn: TcpStream) -> Result<Channel> {
    bind_stdio(conn)?;
    signal::reset_for_worker()?;
    Channel::open().map_err(|e| io_err("<connection>", e))
}

/// Replace stdin and stdout with the connection, then close the original.
fn bind_stdio(conn: TcpStream) -> Result<()> {
    dup2(conn.as_raw_fd(), libc::STDIN_FILENO).map_err(sys_err("dup2"))?;
    dup2(conn.as_raw_fd(), libc::STDOUT_FILENO).map_err(sys_err("dup2"))?;
    drop(conn);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_channel: &mut Channel) -> anyhow::Result<()> {
        Ok(())
    }

    #[test]
    fn test_new_acceptor_has_no_workers() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let acceptor = Acceptor::new(listener, noop);
        assert_eq!(acceptor.worker_count(), 0);
    }

    #[test]
    fn test_accept_without_listener_yields_nothing() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut acceptor = Acceptor::new(listener, noop);
        acceptor.listener = None;
        assert!(acceptor.accept_connection().is_none());
    }

    #[test]
    fn test_accept_with_nothing_pending() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let acceptor = Acceptor::new(listener, noop);
        assert!(acceptor.accept_connection().is_none());
    }

    #[test]
    fn test_pending_client_is_accepted_blocking() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        listener.set_nonblocking(true).unwrap();
        let acceptor = Acceptor::new(listener, noop);

        let _client = TcpStream::connect(addr).unwrap();
        let mask = SigSet::thread_get_mask().unwrap();
        assert!(acceptor.wait_for_connection(&mask));

        let stream = acceptor.accept_connection().expect("pending connection");
        stream.set_read_timeout(Some(Duration::from_millis(50))).unwrap();
        let mut buf = [0u8; 1];
        // Blocking socket: a read with nothing sent times out instead of
        // failing with WouldBlock straight away.
        let start = Instant::now();
        let _ = std::io::Read::read(&mut &stream, &mut buf);
        assert!(start.elapsed() >= Duration::from_millis(40));
    }
}
