//! Demo daemon that echoes each read back to the client
//!
//! Usage: echo [start|stop]
//!
//! When `ECHO_BANNER` is set, its value is sent as-is as soon as a client
//! connects, before anything is read.

use anyhow::Result;
use sloop::{AlarmGuard, Buffer, Channel, ServerConfig};
use std::env;
use std::io::{ErrorKind, Write};
use std::net::Ipv4Addr;
use std::process::ExitCode;

/// Seconds of client silence before the session ends
const IDLE_TIMEOUT_SECS: u32 = 30;

const MAX_READ_BYTES: usize = 8192;

const ENV_BANNER: &str = "ECHO_BANNER";

fn main() -> ExitCode {
    sloop::run_server(ServerConfig::new(Ipv4Addr::LOCALHOST, 9723, session))
}

fn session(channel: &mut Channel) -> Result<()> {
    if let Some(banner) = env::var_os(ENV_BANNER) {
        channel.write_all(banner.as_encoded_bytes())?;
    }

    let mut buf = Buffer::new();

    loop {
        let read = {
            let _deadline = AlarmGuard::arm(IDLE_TIMEOUT_SECS);
            buf.read_from(channel, MAX_READ_BYTES)
        };

        match read {
            Ok(0) => break,
            Ok(_) => buf.flush_to(channel)?,
            Err(e) if e.kind() == ErrorKind::Interrupted => break,
            Err(e) if e.kind() == ErrorKind::ConnectionReset => break,
            Err(e) => return Err(e.into()),
        }
    }

    buf.release();
    Ok(())
}
