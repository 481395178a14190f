// src/dispatch.rs

use anyhow::{Context, Result};
use glob::{glob, Pattern};
use std::{
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
    process::Command,
};
use tracing::{debug, info};

/// Working directory for scripts: the volume mounted into the container.
pub const DEFAULT_WORKDIR: &str = "/data";
pub const SCRIPTS_DIR_ENV: &str = "XNAT_SCRIPTS_DIR";
pub const WORKDIR_ENV: &str = "XNAT_SCRIPTS_WORKDIR";

/// Drop the `.py` suffix older invocations still pass (`disk_usages.py`).
pub fn normalize_script_name(name: &str) -> &str {
    name.strip_suffix(".py").unwrap_or(name)
}

/// Finds and runs the scripts installed next to the dispatcher.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    scripts_dir: PathBuf,
    workdir: PathBuf,
    exclude: Vec<String>,
}

impl Dispatcher {
    pub fn new(scripts_dir: impl Into<PathBuf>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            scripts_dir: scripts_dir.into(),
            workdir: workdir.into(),
            exclude: Vec::new(),
        }
    }

    /// Never list or run `name` (the dispatcher's own binary).
    pub fn excluding(mut self, name: impl Into<String>) -> Self {
        self.exclude.push(name.into());
        self
    }

    pub fn scripts_dir(&self) -> &Path {
        &self.scripts_dir
    }

    /// Names of runnable scripts, sorted.
    pub fn available_scripts(&self) -> Result<Vec<String>> {
        let pattern = format!(
            "{}/*",
            Pattern::escape(&self.scripts_dir.to_string_lossy())
        );
        let mut names = Vec::new();
        for path in glob(&pattern)?.filter_map(Result::ok) {
            if !is_executable(&path) {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if !self.exclude.iter().any(|e| e == name) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Path of the script called `name`, if there is one.
    pub fn resolve(&self, name: &str) -> Result<Option<PathBuf>> {
        let name = normalize_script_name(name);
        if name.is_empty() || name.contains(['/', '\\']) {
            return Ok(None);
        }
        let found = self.available_scripts()?.iter().any(|s| s == name);
        Ok(found.then(|| self.scripts_dir.join(name)))
    }

    /// Run `script` in the working directory and return its exit code.
    pub fn run(&self, script: &Path, args: &[OsString]) -> Result<i32> {
        info!(script = %script.display(), workdir = %self.workdir.display(), "running script");
        let status = Command::new(script)
            .args(args)
            .current_dir(&self.workdir)
            .status()
            .with_context(|| {
                format!(
                    "running {} in {}",
                    script.display(),
                    self.workdir.display()
                )
            })?;
        debug!(?status, "script finished");
        // killed by a signal
        Ok(status.code().unwrap_or(1))
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
}
