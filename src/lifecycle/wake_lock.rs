//! File-backed wake lock
//!
//! Materializes the power-retention resource as a PID lock file so an
//! external supervisor can see that a tracking session is running, and so two
//! livetrack processes never track on the same device at once.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::provider::{ResourceError, WakeLockProvider, WakeLockToken};

#[derive(Debug, Default)]
struct LockState {
    issued: u64,
    held: Option<WakeLockToken>,
}

#[derive(Debug)]
pub struct FileWakeLock {
    lock_path: PathBuf,
    state: Mutex<LockState>,
}

impl FileWakeLock {
    const LOCK_FILE_NAME: &'static str = ".livetrack.lock";

    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            lock_path: dir.as_ref().join(Self::LOCK_FILE_NAME),
            state: Mutex::new(LockState::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }

    fn io_err(&self, source: std::io::Error) -> ResourceError {
        ResourceError::Io {
            path: self.lock_path.clone(),
            source,
        }
    }

    /// PID recorded in an existing lock file, if it is still running.
    fn live_holder(&self) -> Option<u32> {
        let contents = fs::read_to_string(&self.lock_path).ok()?;
        let pid: u32 = contents.lines().next()?.trim().parse().ok()?;
        (pid != std::process::id() && is_process_running(pid)).then_some(pid)
    }
}

impl WakeLockProvider for FileWakeLock {
    fn acquire(&self, tag: &str) -> Result<WakeLockToken, ResourceError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(dir) = self.lock_path.parent() {
            fs::create_dir_all(dir).map_err(|e| self.io_err(e))?;
        }

        if self.lock_path.exists() {
            if let Some(pid) = self.live_holder() {
                return Err(ResourceError::Denied {
                    tag: tag.to_string(),
                    reason: format!(
                        "another livetrack instance is tracking (PID: {pid}); \
                         stop it or remove {:?}",
                        self.lock_path
                    ),
                });
            }
            tracing::info!("Removing stale wake lock file from previous instance");
            fs::remove_file(&self.lock_path).map_err(|e| self.io_err(e))?;
        }

        let mut file = fs::File::create(&self.lock_path).map_err(|e| self.io_err(e))?;
        writeln!(file, "{}\n{}", std::process::id(), tag).map_err(|e| self.io_err(e))?;

        state.issued += 1;
        let token = WakeLockToken(state.issued);
        state.held = Some(token);
        tracing::debug!(tag, path = ?self.lock_path, "Acquired wake lock");
        Ok(token)
    }

    fn release(&self, token: WakeLockToken) -> Result<(), ResourceError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match state.held {
            Some(held) if held == token => {
                state.held = None;
                match fs::remove_file(&self.lock_path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(self.io_err(e)),
                }
                tracing::debug!(path = ?self.lock_path, "Released wake lock");
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(unix)]
fn is_process_running(pid: u32) -> bool {
    fs::read_to_string(format!("/proc/{pid}/cmdline"))
        .map(|cmdline| cmdline.contains("livetrack"))
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_process_running(_pid: u32) -> bool {
    true
}
