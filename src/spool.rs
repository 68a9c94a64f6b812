//! Combined inbox lock: the mailbox dotlock plus an advisory lock on the
//! spool file itself, held together and released together.
use crate::bridge::LockBridge;
use crate::config::types::{BridgeError, LockMode, Result};
use crate::mail::refresher::LockRefresher;
use log::{info, warn};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Guard over a locked user spool.
///
/// Dropping it stops the refresher, unlocks the spool file and releases the
/// mailbox lock, in that order.
pub struct SpoolLock<'a> {
    bridge: &'a mut LockBridge,
    refresher: Option<LockRefresher>,
    file: File,
    path: PathBuf,
    mode: LockMode,
}

impl<'a> SpoolLock<'a> {
    /// Lock `user`'s spool for reading or writing according to `mode_tag`.
    ///
    /// The advisory lock is never waited for: a competing reader or writer
    /// fails the acquisition and the mailbox lock is given back.
    pub fn acquire(
        bridge: &'a mut LockBridge,
        user: &str,
        mode_tag: &str,
        retries: u32,
    ) -> Result<Self> {
        let mode = LockMode::from_tag(mode_tag);
        let path = bridge.spool_path(user);

        let status = bridge.mail_lock_status(user, retries);
        if !status.is_success() {
            return Err(BridgeError::MailLock(status));
        }

        let file = match Self::open_and_lock(bridge, &path, mode) {
            Ok(file) => file,
            Err(e) => {
                warn!("Cannot lock spool {}: {}", path.display(), e);
                bridge.mail_unlock();
                return Err(e);
            }
        };

        let interval = bridge.config().mail.refresh_interval();
        let refresher = bridge
            .mail_locker()
            .refresh_task()
            .map(|task| LockRefresher::spawn(interval, task));

        info!("Locked spool {} for {}", path.display(), mode);
        Ok(Self {
            bridge,
            refresher,
            file,
            path,
            mode,
        })
    }

    fn open_and_lock(bridge: &LockBridge, path: &Path, mode: LockMode) -> Result<File> {
        let file = OpenOptions::new()
            .read(true)
            .write(mode == LockMode::Write)
            .open(path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => BridgeError::NotFound {
                    path: path.to_path_buf(),
                },
                _ => BridgeError::Io(e),
            })?;
        bridge.try_lock(&file, mode.as_tag(), false)?;
        Ok(file)
    }

    /// The locked spool file
    pub fn file(&self) -> &File {
        &self.file
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Refresh the mailbox lock now instead of waiting for the refresher
    pub fn touch(&mut self) {
        self.bridge.touch_lock();
    }
}

impl Drop for SpoolLock<'_> {
    fn drop(&mut self) {
        if let Some(refresher) = self.refresher.take() {
            refresher.stop();
        }
        if !self.bridge.unlock(&self.file) {
            warn!("Cannot unlock spool {}", self.path.display());
        }
        self.bridge.mail_unlock();
        info!("Unlocked spool {}", self.path.display());
    }
}
