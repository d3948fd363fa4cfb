//! Start/stop control for a daemon built on this crate
//!
//! `start` and `stop` both begin by stopping whatever instance the pid
//! record names, so `start` is idempotent. `start` then forks: the child
//! detaches and becomes the background daemon, the parent records the
//! child's pid and returns.

use crate::acceptor::Acceptor;
use crate::config::ServerConfig;
use crate::error::{io_err, sys_err, Result};
use crate::listener::create_listener;
use crate::logging;
use crate::paths::ControlPaths;
use crate::pidfile::{self, StopOutcome};
use crate::signal;
use nix::unistd::{dup2, fork, getpid, setsid, ForkResult};
use std::fs::{self, OpenOptions};
use std::os::fd::AsRawFd;
use std::path::Path;
use std::process::ExitCode;
use std::str::FromStr;

/// Command given on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "start" => Ok(Command::Start),
            "stop" => Ok(Command::Stop),
            other => Err(format!("unknown command '{}'", other)),
        }
    }
}

pub struct Controller {
    config: ServerConfig,
    paths: ControlPaths,
}

impl Controller {
    /// Control files live in `config.run_dir`, or two levels above the
    /// path the program was invoked by.
    pub fn new(config: ServerConfig) -> Result<Self> {
        let paths = match &config.run_dir {
            Some(dir) => ControlPaths::new(dir),
            None => ControlPaths::from_invocation(std::env::args_os().next().as_deref())?,
        };
        Ok(Self { config, paths })
    }

    pub fn paths(&self) -> &ControlPaths {
        &self.paths
    }

    pub fn run(&self, command: Command) -> Result<()> {
        // Must be in place before the daemon exists so it inherits them.
        signal::install_interrupt_handlers()?;

        self.stop_existing()?;

        match command {
            Command::Start => self.start(),
            Command::Stop => Ok(()),
        }
    }

    fn stop_existing(&self) -> Result<StopOutcome> {
        pidfile::stop_existing(&self.paths.pid_file(), self.config.stop_timeout)
    }

    fn start(&self) -> Result<()> {
        let run_dir = self.paths.run_dir();
        fs::create_dir_all(run_dir).map_err(|e| io_err(run_dir, e))?;

        // Safety: the controller is single-threaded at this point.
        match unsafe { fork() }.map_err(sys_err("fork"))? {
            ForkResult::Parent { child } => {
                pidfile::write_pid(&self.paths.pid_file(), child)?;
                tracing::info!(
                    pid = child.as_raw(),
                    addr = %self.config.socket_addr(),
                    "started daemon"
                );
                Ok(())
            }
            ForkResult::Child => self.run_daemon(),
        }
    }

    /// Daemon process body. Never returns.
    fn run_daemon(&self) -> ! {
        let code = match self.serve() {
            Ok(()) => 0,
            Err(e) => {
                tracing::error!(error = %e, "daemon failed");
                1
            }
        };
        std::process::exit(code);
    }

    fn serve(&self) -> Result<()> {
        // Own session and process group: "daemon plus workers" is exactly
        // what a group-wide stop signal reaches.
        setsid().map_err(sys_err("setsid"))?;
        signal::install_shutdown_handlers()?;

        let addr = self.config.socket_addr();
        let listener = create_listener(addr, &self.config.bind_retry)?;

        redirect_stdio(&self.paths.error_log())?;
        tracing::info!(pid = getpid().as_raw(), %addr, "listening");

        Acceptor::new(listener, self.config.handler).run()
    }
}

/// stderr appends to the error log; stdin and stdout go to /dev/null.
fn redirect_stdio(error_log: &Path) -> Result<()> {
    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(error_log)
        .map_err(|e| io_err(error_log, e))?;

    let null_path = Path::new("/dev/null");
    let null = OpenOptions::new()
        .read(true)
        .write(true)
        .open(null_path)
        .map_err(|e| io_err(null_path, e))?;

    dup2(null.as_raw_fd(), libc::STDIN_FILENO).map_err(sys_err("dup2"))?;
    dup2(null.as_raw_fd(), libc::STDOUT_FILENO).map_err(sys_err("dup2"))?;
    dup2(log.as_raw_fd(), libc::STDERR_FILENO).map_err(sys_err("dup2"))?;
    Ok(())
}

fn program_name(argv0: Option<&str>) -> String {
    argv0
        .map(Path::new)
        .and_then(Path::file_name)
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "sloop".to_string())
}

fn print_usage(program: &str) {
    eprintln!("Usage: {} [start|stop]", program);
}

/// Entry point for a daemon binary: parse `start`/`stop` from the process
/// arguments and act on it.
///
/// The handler in `config` gets an unbuffered [`Channel`](crate::Channel)
/// for each connection and should write through it; `std::io::stdout()`
/// is line buffered and holds partial lines until the worker exits.
pub fn run_server(config: ServerConfig) -> ExitCode {
    run_with_args(std::env::args(), config)
}

pub fn run_with_args<I>(args: I, config: ServerConfig) -> ExitCode
where
    I: IntoIterator<Item = String>,
{
    let args: Vec<String> = args.into_iter().collect();
    let program = program_name(args.first().map(String::as_str));

    let command = match args.get(1).map(|arg| arg.parse::<Command>()) {
        Some(Ok(command)) => command,
        Some(Err(e)) => {
            eprintln!("Error: {}", e);
            print_usage(&program);
            return ExitCode::FAILURE;
        }
        None => {
            print_usage(&program);
            return ExitCode::FAILURE;
        }
    };

    logging::init();

    let result = config
        .with_env_overrides()
        .and_then(Controller::new)
        .and_then(|controller| controller.run(command));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, ?command, "{} failed", program);
            eprintln!("{}: {}", program, e);
            ExitCode::FAILURE
        }
    }
}
