use crate::error::{io_err, Error, Result};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

pub const RUN_DIR: &str = "run";
pub const PID_FILE: &str = "pid";
pub const ERROR_LOG: &str = "error_log";

/// Location of the control files for one daemon installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPaths {
    run_dir: PathBuf,
}

impl ControlPaths {
    pub fn new(run_dir: impl Into<PathBuf>) -> Self {
        Self {
            run_dir: run_dir.into(),
        }
    }

    /// `<base>/run` where `<base>` is two levels above the executable:
    /// `/srv/app/bin/world` resolves to `/srv/app/run`.
    pub fn from_executable(exe: &Path) -> Result<Self> {
        let base = exe
            .parent()
            .and_then(Path::parent)
            .ok_or_else(|| Error::ControlPath(exe.to_path_buf()))?;
        Ok(Self::new(base.join(RUN_DIR)))
    }

    /// Resolve from `argv[0]` when it names a path, so a symlinked install
    /// keeps its control files beside the link. A bare command name looked
    /// up through `PATH` falls back to the running executable.
    pub fn from_invocation(argv0: Option<&OsStr>) -> Result<Self> {
        match argv0.map(Path::new) {
            Some(path) if path.components().count() > 1 => Self::from_executable(path),
            _ => Self::from_current_exe(),
        }
    }

    /// Resolve from the running executable, symlinks followed.
    pub fn from_current_exe() -> Result<Self> {
        let exe = std::env::current_exe().map_err(|e| io_err("<current executable>", e))?;
        Self::from_executable(&exe)
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn pid_file(&self) -> PathBuf {
        self.run_dir.join(PID_FILE)
    }

    pub fn error_log(&self) -> PathBuf {
        self.run_dir.join(ERROR_LOG)
    }
}
