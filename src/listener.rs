//! Listening socket setup
//!
//! The socket is built by hand rather than through `TcpListener::bind` so
//! that the address-reuse option is set before bind and the bind can be
//! retried while a just-stopped predecessor releases the port.

use crate::config::BindRetry;
use crate::error::{sys_err, Error, Result};
use nix::sys::socket::{
    bind, listen, setsockopt, socket, sockopt, AddressFamily, Backlog, SockFlag, SockProtocol,
    SockType, SockaddrIn,
};
use std::net::{SocketAddrV4, TcpListener};
use std::os::fd::{AsRawFd, OwnedFd};
use std::thread;

/// Pending connections queued by the kernel
pub const LISTEN_BACKLOG: i32 = 10;

/// Create a TCP socket bound to `addr` and listening.
pub fn create_listener(addr: SocketAddrV4, retry: &BindRetry) -> Result<TcpListener> {
    let fd = socket(
        AddressFamily::Inet,
        SockType::Stream,
        SockFlag::empty(),
        SockProtocol::Tcp,
    )
    .map_err(sys_err("socket"))?;

    // Lets a restart bind while old connections sit in TIME_WAIT.
    if let Err(e) = setsockopt(&fd, sockopt::ReuseAddr, &true) {
        tracing::warn!(error = %e, "cannot set SO_REUSEADDR");
    }

    bind_with_retry(&fd, addr, retry)?;

    let backlog = Backlog::new(LISTEN_BACKLOG).map_err(sys_err("listen"))?;
    listen(&fd, backlog).map_err(sys_err("listen"))?;

    tracing::debug!(%addr, "socket listening");
    Ok(TcpListener::from(fd))
}

fn bind_with_retry(fd: &OwnedFd, addr: SocketAddrV4, retry: &BindRetry) -> Result<()> {
    let sockaddr = SockaddrIn::from(addr);
    let mut remaining = retry.attempts;

    loop {
        match bind(fd.as_raw_fd(), &sockaddr) {
            Ok(()) => return Ok(()),
            Err(source) if remaining == 0 => {
                return Err(Error::Bind {
                    addr,
                    attempts: retry.attempts + 1,
                    source,
                });
            }
            Err(source) => {
                tracing::debug!(%addr, error = %source, remaining, "bind failed, retrying");
                remaining -= 1;
                thread::sleep(retry.delay);
            }
        }
    }
}
