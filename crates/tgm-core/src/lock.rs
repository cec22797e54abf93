//! Single-instance guard backed by a lock marker file.
//!
//! The marker's presence plus a liveness probe of the recorded pid is the only
//! coordination between processes.

use std::{
    fs::{self, File},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration as StdDuration,
};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{clock::Clock, errors::Error, Result};

/// Answers whether a pid belongs to a running process.
///
/// `None` means the platform offers no way to tell; callers then fall back to
/// the marker's age.
pub trait ProcessProbe: Send + Sync {
    fn is_process_alive(&self, pid: u32) -> Option<bool>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct OsProcessProbe;

impl ProcessProbe for OsProcessProbe {
    #[cfg(target_os = "linux")]
    fn is_process_alive(&self, pid: u32) -> Option<bool> {
        Some(Path::new(&format!("/proc/{pid}")).exists())
    }

    #[cfg(all(unix, not(target_os = "linux")))]
    fn is_process_alive(&self, pid: u32) -> Option<bool> {
        use std::process::{Command, Stdio};

        Command::new("kill")
            .arg("-0")
            .arg(pid.to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .ok()
            .map(|s| s.success())
    }

    #[cfg(not(unix))]
    fn is_process_alive(&self, _pid: u32) -> Option<bool> {
        None
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockMarker {
    pub pid: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockState {
    Unlocked,
    Acquiring,
    Held,
    Released,
}

/// What `inspect()` found on disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LockStatus {
    Free,
    Held { marker: LockMarker, live: bool },
    /// Contents cannot be parsed. `fresh` markers are younger than the
    /// staleness threshold and may still be in the middle of being written.
    Unreadable { fresh: bool },
}

pub struct InstanceLock {
    path: PathBuf,
    probe: Arc<dyn ProcessProbe>,
    clock: Arc<dyn Clock>,
    stale_after: Duration,
    pid: u32,
    state: LockState,
}

impl InstanceLock {
    pub fn new(
        path: impl Into<PathBuf>,
        probe: Arc<dyn ProcessProbe>,
        clock: Arc<dyn Clock>,
        stale_after: StdDuration,
    ) -> Self {
        Self {
            path: path.into(),
            probe,
            clock,
            stale_after: Duration::from_std(stale_after).unwrap_or_else(|_| Duration::days(1)),
            pid: std::process::id(),
            state: LockState::Unlocked,
        }
    }

    /// Act as a different process id (tests and tooling).
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> LockState {
        self.state
    }

    /// Take ownership of the marker, reclaiming it if the recorded holder is gone.
    pub fn acquire(&mut self) -> Result<()> {
        if self.state == LockState::Held {
            return Ok(());
        }
        self.state = LockState::Acquiring;
        match self.try_acquire() {
            Ok(()) => {
                self.state = LockState::Held;
                tracing::info!(pid = self.pid, path = %self.path.display(), "instance lock acquired");
                Ok(())
            }
            Err(e) => {
                self.state = LockState::Unlocked;
                Err(e)
            }
        }
    }

    fn try_acquire(&self) -> Result<()> {
        match self.inspect()? {
            LockStatus::Free => {}
            LockStatus::Held { marker, live: true } => {
                tracing::error!(pid = marker.pid, "another instance holds the lock");
                return Err(Error::AlreadyRunning { pid: marker.pid });
            }
            LockStatus::Held { marker, live: false } => {
                tracing::warn!(pid = marker.pid, "removing stale lock file");
                self.remove_marker()?;
            }
            LockStatus::Unreadable { fresh: true } => return Err(self.fresh_unreadable_error()),
            LockStatus::Unreadable { fresh: false } => {
                tracing::warn!(path = %self.path.display(), "removing unreadable lock file");
                self.remove_marker()?;
            }
        }
        self.write_marker()
    }

    /// Remove the marker if it still names this process. Safe to call repeatedly.
    pub fn release(&mut self) {
        if self.state != LockState::Held {
            return;
        }
        self.state = LockState::Released;

        match read_marker(&self.path) {
            Ok(Some(marker)) if marker.pid == self.pid => match fs::remove_file(&self.path) {
                Ok(()) => tracing::info!(pid = self.pid, "instance lock released"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => tracing::error!(error = %e, "failed to remove lock file"),
            },
            Ok(Some(marker)) => {
                tracing::warn!(
                    holder = marker.pid,
                    pid = self.pid,
                    "lock file now names another process; leaving it in place"
                );
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "lock file unreadable on release; leaving it in place"),
        }
    }

    /// Report the marker on disk and whether its holder counts as live.
    pub fn inspect(&self) -> Result<LockStatus> {
        match read_marker(&self.path) {
            Ok(None) => Ok(LockStatus::Free),
            Ok(Some(marker)) => {
                let live = self.holder_is_live(&marker);
                Ok(LockStatus::Held { marker, live })
            }
            Err(Error::Io(e)) if e.kind() != ErrorKind::InvalidData => Err(Error::Lock {
                path: self.path.clone(),
                reason: e.to_string(),
            }),
            Err(_) => Ok(LockStatus::Unreadable {
                fresh: self.file_is_fresh(),
            }),
        }
    }

    /// Delete a marker whose holder is gone. Refuses while the holder is live.
    ///
    /// Returns the pid that was recorded in the removed marker, if any.
    pub fn remove_if_stale(&self) -> Result<Option<u32>> {
        match self.inspect()? {
            LockStatus::Free => Ok(None),
            LockStatus::Held { marker, live: true } => {
                Err(Error::AlreadyRunning { pid: marker.pid })
            }
            LockStatus::Held { marker, live: false } => {
                self.remove_marker()?;
                Ok(Some(marker.pid))
            }
            LockStatus::Unreadable { fresh: true } => Err(self.fresh_unreadable_error()),
            LockStatus::Unreadable { fresh: false } => {
                self.remove_marker()?;
                Ok(None)
            }
        }
    }

    /// Whether the marker file was modified within the staleness threshold.
    /// A future mtime counts as fresh.
    fn file_is_fresh(&self) -> bool {
        let stale_after = self.stale_after.to_std().unwrap_or(StdDuration::MAX);
        fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .map(|mtime| mtime.elapsed().map_or(true, |age| age < stale_after))
            .unwrap_or(false)
    }

    fn fresh_unreadable_error(&self) -> Error {
        Error::Lock {
            path: self.path.clone(),
            reason: "unreadable lock file was modified recently; another instance may be starting"
                .to_string(),
        }
    }

    fn holder_is_live(&self, marker: &LockMarker) -> bool {
        // A marker carrying our own pid was left by an earlier run (pid reuse).
        if marker.pid == self.pid {
            return false;
        }
        match self.probe.is_process_alive(marker.pid) {
            Some(alive) => alive,
            None => self.clock.now().signed_duration_since(marker.created_at) < self.stale_after,
        }
    }

    /// Publish the marker with a hard link so it never appears half-written.
    fn write_marker(&self) -> Result<()> {
        let marker = LockMarker {
            pid: self.pid,
            created_at: self.clock.now(),
        };
        let tmp = self.temp_path();
        let written = (|| -> std::io::Result<()> {
            let mut file = File::create(&tmp)?;
            file.write_all(serde_json::to_string(&marker)?.as_bytes())?;
            file.sync_all()
        })();
        let linked = written.and_then(|()| fs::hard_link(&tmp, &self.path));
        let _ = fs::remove_file(&tmp);

        match linked {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                // Lost a race with another starting instance.
                let pid = read_marker(&self.path).ok().flatten().map(|m| m.pid).unwrap_or(0);
                Err(Error::AlreadyRunning { pid })
            }
            Err(e) => Err(Error::Lock {
                path: self.path.clone(),
                reason: e.to_string(),
            }),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "lock".to_string());
        self.path.with_file_name(format!(".{name}.{}.tmp", self.pid))
    }

    fn remove_marker(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Lock {
                path: self.path.clone(),
                reason: e.to_string(),
            }),
        }
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        self.release();
    }
}

/// Read a marker: JSON `{pid, created_at}`, or a bare pid (creation time taken from mtime).
///
/// Unparseable contents surface as `Io(InvalidData)`.
fn read_marker(path: &Path) -> Result<Option<LockMarker>> {
    let txt = match fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let trimmed = txt.trim();

    if let Ok(marker) = serde_json::from_str::<LockMarker>(trimmed) {
        return Ok(Some(marker));
    }
    if let Ok(pid) = trimmed.parse::<u32>() {
        let created_at = fs::metadata(path)
            .and_then(|m| m.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        return Ok(Some(LockMarker { pid, created_at }));
    }
    Err(std::io::Error::new(ErrorKind::InvalidData, format!("unrecognized lock file contents: {trimmed:?}")).into())
}
