// Library interface for sloop, a fork-per-connection TCP daemon framework.
// A binary supplies a handler and calls `run_server`; the framework handles
// start/stop, the pid record, the listening socket and worker processes.

pub mod acceptor;
pub mod buffer;
pub mod config;
pub mod controller;
pub mod error;
pub mod listener;
pub mod logging;
pub mod paths;
pub mod pidfile;
pub mod session;
pub mod signal;

pub use acceptor::{Acceptor, Handler};
pub use buffer::Buffer;
pub use config::{BindRetry, ServerConfig};
pub use controller::{run_server, run_with_args, Command, Controller};
pub use error::{Error, Result};
pub use paths::ControlPaths;
pub use pidfile::StopOutcome;
pub use session::Channel;
pub use signal::AlarmGuard;
