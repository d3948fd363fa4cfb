//! Helpers shared by the integration tests: one echo daemon per test,
//! isolated by its own control directory and port.

#![allow(dead_code)]

use std::fs;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::process::{Command, Output};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

pub const ECHO_BIN: &str = env!("CARGO_BIN_EXE_echo");

/// Ask the kernel for a port nobody is using right now.
pub fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind probe socket");
    listener.local_addr().unwrap().port()
}

/// Poll `check` every 20ms until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(20));
    }
}

pub struct EchoInstance {
    dir: TempDir,
    pub port: u16,
    banner: Option<String>,
}

impl EchoInstance {
    pub fn new() -> Self {
        Self::with_port(free_port())
    }

    pub fn with_port(port: u16) -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp dir"),
            port,
            banner: None,
        }
    }

    /// Workers greet each client with `banner` before reading.
    pub fn with_banner(banner: &str) -> Self {
        let mut instance = Self::new();
        instance.banner = Some(banner.to_string());
        instance
    }

    pub fn run_dir(&self) -> PathBuf {
        self.dir.path().join("run")
    }

    pub fn pid_file(&self) -> PathBuf {
        self.run_dir().join("pid")
    }

    pub fn error_log(&self) -> PathBuf {
        self.run_dir().join("error_log")
    }

    pub fn command(&self, args: &[&str]) -> Output {
        let mut cmd = Command::new(ECHO_BIN);
        cmd.args(args)
            .env("SLOOP_RUN_DIR", self.run_dir())
            .env("SLOOP_PORT", self.port.to_string())
            .env("SLOOP_LOG", "debug")
            .env_remove("ECHO_BANNER");
        if let Some(banner) = &self.banner {
            cmd.env("ECHO_BANNER", banner);
        }
        cmd.output().expect("Failed to run echo binary")
    }

    pub fn start(&self) -> Output {
        let output = self.command(&["start"]);
        assert!(
            output.status.success(),
            "start failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        output
    }

    pub fn stop(&self) -> Output {
        self.command(&["stop"])
    }

    pub fn pid(&self) -> Option<i32> {
        let text = fs::read_to_string(self.pid_file()).ok()?;
        text.trim().parse().ok()
    }

    /// Connect, retrying while the daemon is still coming up.
    pub fn connect(&self) -> TcpStream {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match TcpStream::connect(("127.0.0.1", self.port)) {
                Ok(stream) => {
                    stream
                        .set_read_timeout(Some(Duration::from_secs(5)))
                        .unwrap();
                    return stream;
                }
                Err(e) if Instant::now() >= deadline => {
                    panic!("Daemon on port {} never accepted: {}", self.port, e)
                }
                Err(_) => thread::sleep(Duration::from_millis(20)),
            }
        }
    }

    /// Send `message` and read the same number of bytes back.
    pub fn round_trip(&self, stream: &mut TcpStream, message: &[u8]) -> Vec<u8> {
        stream.write_all(message).unwrap();
        let mut reply = vec![0u8; message.len()];
        stream.read_exact(&mut reply).unwrap();
        reply
    }

    pub fn log(&self) -> String {
        fs::read_to_string(self.error_log()).unwrap_or_default()
    }
}

impl Drop for EchoInstance {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Children of `parent` as (pid, state) pairs, read from /proc.
#[cfg(target_os = "linux")]
pub fn children_of(parent: i32) -> Vec<(i32, char)> {
    let mut children = Vec::new();
    let Ok(entries) = fs::read_dir("/proc") else {
        return children;
    };

    for entry in entries.flatten() {
        let Ok(pid) = entry.file_name().to_string_lossy().parse::<i32>() else {
            continue;
        };
        let Ok(stat) = fs::read_to_string(format!("/proc/{}/stat", pid)) else {
            continue;
        };
        let Some(close) = stat.rfind(')') else {
            continue;
        };
        let mut fields = stat[close + 1..].split_whitespace();
        let state = fields.next().and_then(|s| s.chars().next());
        let ppid = fields.next().and_then(|s| s.parse::<i32>().ok());
        if let (Some(state), Some(ppid)) = (state, ppid) {
            if ppid == parent {
                children.push((pid, state));
            }
        }
    }

    children
}
