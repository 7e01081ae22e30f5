//! Background jobs
//!
//! Sync and icon fetches run as detached re-invocations of wardenbar. A
//! lock file per job name (`<runtime>/jobs/<name>.pid`) keeps at most one
//! instance of each alive. Creating the file is the atomic claim; the file
//! then holds the pid of the process doing the work.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

use wardenbar_core::process;

/// A claimed slot with no pid yet counts as running for this long
const CLAIM_GRACE: Duration = Duration::from_secs(30);

/// How long `claim` waits for a launcher to write the pid
const CLAIM_WAIT: Duration = Duration::from_secs(2);
const CLAIM_POLL: Duration = Duration::from_millis(50);

/// Named single-instance registry
#[derive(Debug, Clone)]
pub struct JobRegistry {
    dir: PathBuf,
}

/// What a lock file says about its job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Free,
    Running(Option<u32>),
    Stale,
}

impl JobRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn lock_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.pid"))
    }

    /// Log file a detached job writes its stderr to
    pub fn log_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.log"))
    }

    fn inspect(&self, name: &str) -> SlotState {
        slot_state(&self.lock_path(name))
    }

    /// Move a stale lock aside so the caller can retry `create_new`.
    /// Returns whether the slot was freed by this call.
    fn clear_stale(&self, name: &str) -> bool {
        let path = self.lock_path(name);
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let tombstone = self
            .dir
            .join(format!("{name}.pid.stale.{}.{nanos}", std::process::id()));

        if let Err(e) = fs::rename(&path, &tombstone) {
            debug!("stale {} job lock already moved: {}", name, e);
            return false;
        }

        // the lock may have been replaced between inspect and rename
        let freed = slot_state(&tombstone) == SlotState::Stale;
        if !freed {
            debug!("{} job lock was taken over, restoring it", name);
            if let Err(e) = fs::hard_link(&tombstone, &path) {
                warn!("cannot restore job lock {}: {}", path.display(), e);
            }
        }
        if let Err(e) = fs::remove_file(&tombstone) {
            warn!("cannot remove {}: {}", tombstone.display(), e);
        }
        freed
    }

    pub fn is_running(&self, name: &str) -> bool {
        matches!(self.inspect(name), SlotState::Running(_))
    }

    /// Start `name` through `launch` unless an instance is already running.
    ///
    /// `launch` spawns the job and returns its pid. Returns whether it was
    /// invoked.
    pub fn ensure_running<F>(&self, name: &str, launch: F) -> Result<bool>
    where
        F: FnOnce() -> Result<u32>,
    {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create job directory {:?}", self.dir))?;
        let path = self.lock_path(name);

        // retries only follow the removal of a stale lock
        for _ in 0..3 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let pid = match launch() {
                        Ok(pid) => pid,
                        Err(e) => {
                            let _ = fs::remove_file(&path);
                            return Err(e.context(format!("Failed to start {name} job")));
                        }
                    };
                    write!(file, "{pid}")?;
                    info!("started {} job (pid {})", name, pid);
                    return Ok(true);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => match self.inspect(name) {
                    SlotState::Running(pid) => {
                        debug!("{} job already running ({:?})", name, pid);
                        return Ok(false);
                    }
                    SlotState::Stale => {
                        debug!("removing stale {} job lock", name);
                        self.clear_stale(name);
                    }
                    SlotState::Free => {}
                },
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to claim job lock {:?}", path))
                }
            }
        }
        Ok(false)
    }

    /// Register the current process as the running `name` job. `None` when a
    /// different process holds the slot.
    ///
    /// A background job finds the slot already claimed by the launcher that
    /// spawned it, possibly before its pid was written. An empty claim is
    /// waited on for a short while and never overwritten.
    pub fn claim(&self, name: &str) -> Result<Option<JobGuard>> {
        fs::create_dir_all(&self.dir)?;
        let path = self.lock_path(name);
        let own = std::process::id();
        let deadline = Instant::now() + CLAIM_WAIT;

        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    write!(file, "{own}")?;
                    return Ok(Some(JobGuard { path, pid: own }));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to claim job lock {:?}", path))
                }
            }

            match self.inspect(name) {
                SlotState::Running(Some(pid)) if pid == own => {
                    return Ok(Some(JobGuard { path, pid: own }));
                }
                SlotState::Running(Some(pid)) => {
                    debug!("{} job held by pid {}", name, pid);
                    return Ok(None);
                }
                SlotState::Running(None) | SlotState::Stale if Instant::now() >= deadline => {
                    debug!("{} job slot still claimed, giving up", name);
                    return Ok(None);
                }
                SlotState::Running(None) => thread::sleep(CLAIM_POLL),
                SlotState::Stale => {
                    if !self.clear_stale(name) {
                        thread::sleep(CLAIM_POLL);
                    }
                }
                SlotState::Free => {}
            }
        }
    }
}

/// What the lock file at `path` says about its job
fn slot_state(path: &Path) -> SlotState {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return SlotState::Free,
        Err(e) => {
            warn!("cannot read job lock {}: {}", path.display(), e);
            return SlotState::Running(None);
        }
    };

    match contents.trim().parse::<u32>() {
        Ok(pid) if process::is_alive(pid) => SlotState::Running(Some(pid)),
        Ok(_) => SlotState::Stale,
        // claimed, pid not written yet
        Err(_) => {
            let fresh = fs::metadata(path)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| SystemTime::now().duration_since(modified).ok())
                .is_some_and(|age| age < CLAIM_GRACE);
            if fresh {
                SlotState::Running(None)
            } else {
                SlotState::Stale
            }
        }
    }
}

/// Held by a running job; releases the lock file on drop
#[derive(Debug)]
pub struct JobGuard {
    path: PathBuf,
    pid: u32,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        let ours = fs::read_to_string(&self.path)
            .map(|c| c.trim() == self.pid.to_string())
            .unwrap_or(false);
        if ours {
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// Re-invoke the current executable with `args`, detached from the caller.
/// Stderr goes to `log`.
pub fn spawn_detached(args: &[&str], log: &Path) -> Result<u32> {
    let exe = std::env::current_exe().context("Cannot locate the wardenbar executable")?;
    if let Some(parent) = log.parent() {
        fs::create_dir_all(parent)?;
    }
    let log_file = File::create(log).with_context(|| format!("Failed to open {:?}", log))?;

    let mut command = Command::new(exe);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::from(log_file));

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let child = command.spawn().context("Failed to spawn background job")?;
    Ok(child.id())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};

    const DEAD_PID: u32 = u32::MAX - 7;

    #[test]
    fn test_launches_once_when_free() {
        let temp = tempfile::tempdir().unwrap();
        let registry = JobRegistry::new(temp.path());

        let launched = registry.ensure_running("sync", || Ok(std::process::id())).unwrap();
        assert!(launched);
        assert!(registry.is_running("sync"));

        let again = registry
            .ensure_running("sync", || panic!("second launch"))
            .unwrap();
        assert!(!again);
    }

    #[test]
    fn test_registered_job_is_not_relaunched() {
        let temp = tempfile::tempdir().unwrap();
        let registry = JobRegistry::new(temp.path());
        fs::write(temp.path().join("sync.pid"), std::process::id().to_string()).unwrap();

        let calls = AtomicUsize::new(0);
        for _ in 0..2 {
            registry
                .ensure_running("sync", || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(1)
                })
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_concurrent_callers_launch_at_most_once() {
        let temp = tempfile::tempdir().unwrap();
        let registry = JobRegistry::new(temp.path());
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let calls = Arc::clone(&calls);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    registry
                        .ensure_running("sync", || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            Ok(std::process::id())
                        })
                        .unwrap()
                })
            })
            .collect();

        let launched = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|launched| *launched)
            .count();
        assert_eq!(launched, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stale_lock_is_replaced() {
        let temp = tempfile::tempdir().unwrap();
        let registry = JobRegistry::new(temp.path());
        fs::write(temp.path().join("icons.pid"), DEAD_PID.to_string()).unwrap();
        assert!(!registry.is_running("icons"));

        let launched = registry.ensure_running("icons", || Ok(std::process::id())).unwrap();
        assert!(launched);
        let pid = fs::read_to_string(temp.path().join("icons.pid")).unwrap();
        assert_eq!(pid, std::process::id().to_string());
    }

    #[test]
    fn test_fresh_empty_claim_counts_as_running() {
        let temp = tempfile::tempdir().unwrap();
        let registry = JobRegistry::new(temp.path());
        fs::write(temp.path().join("sync.pid"), "").unwrap();
        assert!(registry.is_running("sync"));
    }

    #[test]
    fn test_failed_launch_releases_slot() {
        let temp = tempfile::tempdir().unwrap();
        let registry = JobRegistry::new(temp.path());
        let result = registry.ensure_running("sync", || Err(anyhow::anyhow!("no exe")));
        assert!(result.is_err());
        assert!(!temp.path().join("sync.pid").exists());
    }

    #[test]
    fn test_guard_claims_and_releases() {
        let temp = tempfile::tempdir().unwrap();
        let registry = JobRegistry::new(temp.path());

        let guard = registry.claim("icons").unwrap();
        assert!(guard.is_some());
        assert!(registry.is_running("icons"));
        drop(guard);
        assert!(!temp.path().join("icons.pid").exists());
        assert!(!registry.is_running("icons"));
    }

    #[test]
    fn test_claim_refused_while_other_process_runs() {
        let temp = tempfile::tempdir().unwrap();
        let registry = JobRegistry::new(temp.path());
        // pid 1 is always alive on unix systems
        fs::write(temp.path().join("sync.pid"), "1").unwrap();
        if process::is_alive(1) && std::process::id() != 1 {
            assert!(registry.claim("sync").unwrap().is_none());
        }
    }

    fn leftover_tombstones(dir: &Path) -> usize {
        fs::read_dir(dir)
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().contains(".stale."))
            .count()
    }

    #[test]
    fn test_claim_never_overwrites_empty_claim() {
        let temp = tempfile::tempdir().unwrap();
        let registry = JobRegistry::new(temp.path());
        let lock = temp.path().join("sync.pid");
        fs::write(&lock, "").unwrap();

        assert!(registry.claim("sync").unwrap().is_none());
        assert_eq!(fs::read_to_string(&lock).unwrap(), "");
    }

    #[test]
    fn test_claim_accepts_pid_written_by_launcher() {
        let temp = tempfile::tempdir().unwrap();
        let registry = JobRegistry::new(temp.path());
        let lock = temp.path().join("icons.pid");
        fs::write(&lock, "").unwrap();

        let writer = {
            let lock = lock.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(200));
                fs::write(lock, std::process::id().to_string()).unwrap();
            })
        };
        let guard = registry.claim("icons").unwrap();
        writer.join().unwrap();

        assert!(guard.is_some());
        drop(guard);
        assert!(!lock.exists());
    }

    #[test]
    fn test_claim_replaces_stale_lock() {
        let temp = tempfile::tempdir().unwrap();
        let registry = JobRegistry::new(temp.path());
        fs::write(temp.path().join("sync.pid"), DEAD_PID.to_string()).unwrap();

        let guard = registry.claim("sync").unwrap();
        assert!(guard.is_some());
        let pid = fs::read_to_string(temp.path().join("sync.pid")).unwrap();
        assert_eq!(pid, std::process::id().to_string());
        assert_eq!(leftover_tombstones(temp.path()), 0);
    }

    #[test]
    fn test_clear_stale_restores_live_lock() {
        let temp = tempfile::tempdir().unwrap();
        let registry = JobRegistry::new(temp.path());
        let lock = temp.path().join("sync.pid");

        // another caller replaced the stale lock after we inspected it
        fs::write(&lock, std::process::id().to_string()).unwrap();
        assert!(!registry.clear_stale("sync"));
        assert_eq!(fs::read_to_string(&lock).unwrap(), std::process::id().to_string());

        fs::write(&lock, DEAD_PID.to_string()).unwrap();
        assert!(registry.clear_stale("sync"));
        assert!(!lock.exists());
        assert!(!registry.clear_stale("sync"));
        assert_eq!(leftover_tombstones(temp.path()), 0);
    }
}
