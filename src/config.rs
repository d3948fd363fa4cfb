//! Server configuration
//!
//! A `ServerConfig` is fixed once the controller starts. Defaults come from
//! the binary that embeds the framework; a few environment variables can
//! override them without recompiling:
//! - SLOOP_ADDR (IPv4 address to bind)
//! - SLOOP_PORT (TCP port to bind)
//! - SLOOP_RUN_DIR (control directory holding `pid` and `error_log`)

use crate::acceptor::Handler;
use crate::error::{Error, Result};
use std::env;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable overriding the bind address
pub const ENV_ADDR: &str = "SLOOP_ADDR";
/// Environment variable overriding the bind port
pub const ENV_PORT: &str = "SLOOP_PORT";
/// Environment variable overriding the control directory
pub const ENV_RUN_DIR: &str = "SLOOP_RUN_DIR";

/// Default number of bind retries after the first attempt fails
pub const DEFAULT_BIND_ATTEMPTS: u32 = 10;

/// Default pause between bind attempts
pub const DEFAULT_BIND_DELAY: Duration = Duration::from_micros(10);

/// How long `stop` waits for a signalled daemon to go away
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Bind retry policy for the listening socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindRetry {
    /// Retries after the first failed attempt
    pub attempts: u32,
    /// Sleep between attempts
    pub delay: Duration,
}

impl Default for BindRetry {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_BIND_ATTEMPTS,
            delay: DEFAULT_BIND_DELAY,
        }
    }
}

/// Startup configuration owned by the controller for the life of the process
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind
    pub addr: Ipv4Addr,
    /// Port to bind
    pub port: u16,
    /// Procedure run once per accepted connection
    pub handler: Handler,
    /// Explicit control directory; resolved from the executable when `None`
    pub run_dir: Option<PathBuf>,
    /// Bind retry policy
    pub bind_retry: BindRetry,
    /// Upper bound on waiting for a stopped instance to exit
    pub stop_timeout: Duration,
}

impl ServerConfig {
    pub fn new(addr: Ipv4Addr, port: u16, handler: Handler) -> Self {
        Self {
            addr,
            port,
            handler,
            run_dir: None,
            bind_retry: BindRetry::default(),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }

    pub fn with_run_dir(mut self, run_dir: impl Into<PathBuf>) -> Self {
        self.run_dir = Some(run_dir.into());
        self
    }

    pub fn with_bind_retry(mut self, bind_retry: BindRetry) -> Self {
        self.bind_retry = bind_retry;
        self
    }

    pub fn with_stop_timeout(mut self, stop_timeout: Duration) -> Self {
        self.stop_timeout = stop_timeout;
        self
    }

    /// Apply SLOOP_* overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(value) = lookup(ENV_ADDR) {
            self.addr = value.trim().parse().map_err(|_| {
                Error::Config(format!("{}={:?} is not an IPv4 address", ENV_ADDR, value))
            })?;
        }

        if let Some(value) = lookup(ENV_PORT) {
            self.port = value.trim().parse().map_err(|_| {
                Error::Config(format!("{}={:?} is not a port number", ENV_PORT, value))
            })?;
        }

        if let Some(value) = lookup(ENV_RUN_DIR) {
            if value.is_empty() {
                return Err(Error::Config(format!("{} is set but empty", ENV_RUN_DIR)));
            }
            self.run_dir = Some(PathBuf::from(value));
        }

        Ok(self)
    }

    /// Socket address the listener binds
    pub fn socket_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.addr, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn noop(_channel: &mut crate::Channel) -> anyhow::Result<()> {
        Ok(())
    }

    fn base() -> ServerConfig {
        ServerConfig::new(Ipv4Addr::LOCALHOST, 9722, noop)
    }

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = base();
        assert_eq!(config.socket_addr().to_string(), "127.0.0.1:9722");
        assert_eq!(config.bind_retry.attempts, 10);
        assert_eq!(config.bind_retry.delay, Duration::from_micros(10));
        assert!(config.run_dir.is_none());
    }

    #[test]
    fn test_overrides_applied() {
        let config = base()
            .with_overrides(lookup(&[
                (ENV_ADDR, "0.0.0.0"),
                (ENV_PORT, "18080"),
                (ENV_RUN_DIR, "/tmp/sloop-run"),
            ]))
            .unwrap();

        assert_eq!(config.addr, Ipv4Addr::UNSPECIFIED);
        assert_eq!(config.port, 18080);
        assert_eq!(config.run_dir, Some(PathBuf::from("/tmp/sloop-run")));
    }

    #[test]
    fn test_no_overrides_keeps_config() {
        let config = base().with_overrides(lookup(&[])).unwrap();
        assert_eq!(config.port, 9722);
        assert_eq!(config.addr, Ipv4Addr::LOCALHOST);
    }

    #[test]
    fn test_bad_port_rejected() {
        let result = base().with_overrides(lookup(&[(ENV_PORT, "70000")]));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_bad_addr_rejected() {
        let result = base().with_overrides(lookup(&[(ENV_ADDR, "localhost")]));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_empty_run_dir_rejected() {
        let result = base().with_overrides(lookup(&[(ENV_RUN_DIR, "")]));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
