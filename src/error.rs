//! Error types for the sloop daemon framework
//!
//! Every failure the framework can hit at startup or while managing the
//! control files is one of these variants. Callers at the process boundary
//! log the error and exit; nothing here is retried except bind.

use nix::errno::Errno;
use std::net::SocketAddrV4;
use std::path::PathBuf;
use thiserror::Error;

/// Error surface for the controller, listener, acceptor and pid file.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{op} failed: {source}")]
    Sys {
        op: &'static str,
        #[source]
        source: Errno,
    },

    #[error("bind to {addr} failed after {attempts} attempts: {source}")]
    Bind {
        addr: SocketAddrV4,
        attempts: u32,
        #[source]
        source: Errno,
    },

    #[error("cannot derive control directory from executable path {0}")]
    ControlPath(PathBuf),

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> Error {
    Error::Io {
        path: path.into(),
        source,
    }
}

/// Adapter for `map_err` on nix calls: `fork().map_err(sys_err("fork"))`.
pub(crate) fn sys_err(op: &'static str) -> impl FnOnce(Errno) -> Error {
    move |source| Error::Sys { op, source }
}
