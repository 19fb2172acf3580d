//! Per-run lock files: `<lock_dir>/<prefix><pid>`, one qualified action
//! name per line.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{EtlError, Result};

/// Held for the duration of a run; the file is removed on drop.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
}

impl LockFile {
    /// Writes this process's lock. Fails when a live process holds a lock
    /// listing any of `actions`. Locks left by dead processes are removed.
    pub fn acquire(dir: &Path, prefix: &str, actions: &[String]) -> Result<Self> {
        let lock_error = |e: std::io::Error| EtlError::Lock(format!("{}: {}", dir.display(), e));
        fs::create_dir_all(dir).map_err(lock_error)?;

        let own_pid = std::process::id();
        let wanted: BTreeSet<&str> = actions.iter().map(String::as_str).collect();

        for entry in fs::read_dir(dir).map_err(lock_error)? {
            let entry = entry.map_err(lock_error)?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let Some(pid) = file_name
                .strip_prefix(prefix)
                .and_then(|rest| rest.parse::<u32>().ok())
            else {
                continue;
            };
            if pid == own_pid {
                continue;
            }

            let path = entry.path();
            if !process_alive(pid) {
                warn!(path = %path.display(), pid, "removing stale lock file");
                if let Err(e) = fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %e, "failed to remove stale lock file");
                }
                continue;
            }

            let content = fs::read_to_string(&path).unwrap_or_default();
            let overlap: Vec<&str> = content
                .lines()
                .map(str::trim)
                .filter(|line| wanted.contains(line))
                .collect();
            if !overlap.is_empty() {
                return Err(EtlError::Lock(format!(
                    "process {} is already running {}",
                    pid,
                    overlap.join(", ")
                )));
            }
        }

        let path = dir.join(format!("{}{}", prefix, own_pid));
        let mut content = actions.join("\n");
        content.push('\n');
        fs::write(&path, content).map_err(lock_error)?;
        debug!(path = %path.display(), "lock acquired");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to release lock file");
        }
    }
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

// Without /proc every lock is assumed live.
#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    true
}
