//! Single-instance lock file.
//!
//! The lock pins one router instance per state directory. The file holds a
//! `{pid, start_time}` payload and is flocked for the life of the process:
//! a live holder refuses the newcomer (exit 0), a stale payload from a
//! crashed process is overwritten, and the file is removed on shutdown.

use anyhow::{Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize)]
struct LockPayload {
    pid: u32,
    start_time: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    connection_info: Option<String>,
}

/// Held for the life of the process; the flock releases and the file is
/// removed on drop.
pub struct InstanceLock {
    file: File,
    path: PathBuf,
}

/// Outcome of an acquisition attempt.
pub enum LockAcquisition {
    Acquired(InstanceLock),
    /// Another live process holds the lock; exit 0.
    HeldByOther { pid: u32 },
}

impl InstanceLock {
    pub fn acquire(path: &Path) -> Result<LockAcquisition> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create lock dir {}", parent.display()))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("open lock {}", path.display()))?;

        if file.try_lock_exclusive().is_err() {
            let pid = read_payload(path).map(|p| p.pid).unwrap_or(0);
            return Ok(LockAcquisition::HeldByOther { pid });
        }

        // The flock is ours, but a payload naming a live foreign process
        // still wins: flocks do not survive every filesystem, pids do.
        if let Some(existing) = read_payload(path) {
            if existing.pid != std::process::id() && pid_alive(existing.pid) {
                return Ok(LockAcquisition::HeldByOther { pid: existing.pid });
            }
            if existing.pid != std::process::id() {
                log::warn!(
                    "Replacing stale lock file {} (pid {} is gone)",
                    path.display(),
                    existing.pid
                );
            }
        }

        let payload = LockPayload {
            pid: std::process::id(),
            start_time: costwise_protocol::job::unix_now(),
            connection_info: None,
        };
        let json = serde_json::to_string_pretty(&payload)?;
        file.set_len(0)?;
        file.write_all(json.as_bytes())
            .with_context(|| format!("write lock {}", path.display()))?;
        file.sync_all().ok();

        Ok(LockAcquisition::Acquired(InstanceLock {
            file,
            path: path.to_path_buf(),
        }))
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
        if let Err(e) = std::fs::remove_file(&self.path) {
            log::warn!("Failed to remove lock file {}: {e}", self.path.display());
        }
    }
}

fn read_payload(path: &Path) -> Option<LockPayload> {
    let raw = std::fs::read_to_string(path).ok()?;
    if raw.trim().is_empty() {
        return None;
    }
    match serde_json::from_str(&raw) {
        Ok(payload) => Some(payload),
        Err(e) => {
            // An unparseable lock is treated as stale.
            log::warn!("Ignoring corrupted lock file {}: {e}", path.display());
            None
        }
    }
}

/// Signal 0 probes liveness without touching the process. EPERM still
/// means the pid exists.
fn pid_alive(pid: u32) -> bool {
    // Zero would probe our own process group; out-of-range pids cannot
    // name a live process.
    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if rc == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}
