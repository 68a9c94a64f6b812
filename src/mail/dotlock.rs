/// Portable mailbox dotlocking
///
/// Follows the traditional spool convention so other mail programs see the
/// same lock: a `<user>.lock` file next to the mailbox, created atomically
/// by hard-linking a private temp file, holding the owner PID, and kept
/// fresh by touching its mtime.
use crate::config::settings::MailLockConfig;
use crate::config::types::MailLockStatus;
use crate::kernel;
use crate::mail::MailLocker;
use log::{debug, info, warn};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use serde::Serialize;
use std::ffi::OsStr;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::{MetadataExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, SystemTime};

const LOCK_SUFFIX: &str = ".lock";

/// Longest lock file name a spool filesystem is expected to accept
const MAX_LOCK_NAME: usize = 255;

/// Counters for a single locker
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DotLockMetrics {
    pub acquisitions: u64,
    /// Attempts that found the lock taken and had to wait
    pub contentions: u64,
    pub stale_removed: u64,
    pub failures: u64,
}

#[derive(Debug)]
struct HeldLock {
    user: String,
    path: PathBuf,
}

/// Which file a path pointed at when it was examined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LockIdentity {
    dev: u64,
    ino: u64,
}

impl LockIdentity {
    fn of(meta: &fs::Metadata) -> Self {
        Self {
            dev: meta.dev(),
            ino: meta.ino(),
        }
    }
}

enum LinkOutcome {
    Linked,
    Exists,
    Failed(io::Error),
}

/// Dotlock-based [`MailLocker`]
#[derive(Debug)]
pub struct DotLocker {
    config: MailLockConfig,
    held: Option<HeldLock>,
    metrics: DotLockMetrics,
    /// PID written into new locks; this process when unset
    owner_pid: Option<u32>,
}

impl DotLocker {
    pub fn new(config: MailLockConfig) -> Self {
        Self {
            config,
            held: None,
            metrics: DotLockMetrics::default(),
            owner_pid: None,
        }
    }

    /// Record `pid` as the owner of locks taken from now on.
    ///
    /// A lock meant to outlive this process must name a process that stays
    /// alive while the lock is wanted, or owner checks elsewhere will break it.
    pub fn with_owner_pid(mut self, pid: u32) -> Self {
        self.owner_pid = Some(pid);
        self
    }

    fn recorded_pid(&self) -> u32 {
        self.owner_pid.unwrap_or_else(std::process::id)
    }

    pub fn config(&self) -> &MailLockConfig {
        &self.config
    }

    pub fn metrics(&self) -> DotLockMetrics {
        self.metrics.clone()
    }

    /// Where the lock for `user` lives
    pub fn lock_path_for(&self, user: &str) -> Result<PathBuf, MailLockStatus> {
        if user.is_empty() || user.contains('/') || user.contains('\0') {
            return Err(MailLockStatus::Error);
        }
        if user.len() + LOCK_SUFFIX.len() > MAX_LOCK_NAME {
            return Err(MailLockStatus::NameLength);
        }

        if self.config.honor_mail_env {
            if let Some(mail) = std::env::var_os("MAIL") {
                let mail = PathBuf::from(mail);
                if mail.file_name() == Some(OsStr::new(user)) {
                    let mut lock = mail.into_os_string();
                    lock.push(LOCK_SUFFIX);
                    return Ok(PathBuf::from(lock));
                }
            }
        }

        Ok(self
            .config
            .spool_dir
            .join(format!("{}{}", user, LOCK_SUFFIX)))
    }

    /// Take over an existing lock for `user`, typically one left by an
    /// earlier `mboxlock mail lock` invocation
    pub fn adopt(&mut self, user: &str) -> MailLockStatus {
        let path = match self.lock_path_for(user) {
            Ok(path) => path,
            Err(status) => return status,
        };
        if fs::symlink_metadata(&path).is_err() {
            debug!("No lock at {} to adopt", path.display());
            return MailLockStatus::Error;
        }
        self.held = Some(HeldLock {
            user: user.to_string(),
            path,
        });
        MailLockStatus::Success
    }

    /// Forget the held lock without removing it
    pub fn persist(&mut self) -> Option<PathBuf> {
        self.held.take().map(|held| held.path)
    }

    /// Create the private temp file that gets linked into place
    fn create_tmp(dir: &Path, owner: u32) -> Result<PathBuf, MailLockStatus> {
        let tag = uuid::Uuid::new_v4().simple().to_string();
        let tmp = dir.join(format!(".lk{:05}{}", std::process::id(), &tag[..8]));

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o644)
            .open(&tmp)
            .map_err(|e| {
                warn!("Cannot create temporary lock {}: {}", tmp.display(), e);
                MailLockStatus::TmpLock
            })?;

        if let Err(e) = writeln!(file, "{}", owner).and_then(|_| file.sync_all()) {
            warn!("Cannot write temporary lock {}: {}", tmp.display(), e);
            let _ = fs::remove_file(&tmp);
            return Err(MailLockStatus::TmpWrite);
        }
        Ok(tmp)
    }

    /// link(tmp, lock), confirmed by inode so a lost NFS reply still counts
    fn try_link(tmp: &Path, lock: &Path) -> LinkOutcome {
        let link_result = fs::hard_link(tmp, lock);

        if let (Ok(t), Ok(l)) = (fs::metadata(tmp), fs::symlink_metadata(lock)) {
            if t.ino() == l.ino() && t.dev() == l.dev() {
                return LinkOutcome::Linked;
            }
        }

        match link_result {
            Err(e) if e.kind() != io::ErrorKind::AlreadyExists => LinkOutcome::Failed(e),
            _ => LinkOutcome::Exists,
        }
    }

    /// Identity of the lock at `lock` if it is stale
    fn stale_identity(&self, lock: &Path) -> Option<LockIdentity> {
        let meta = fs::symlink_metadata(lock).ok()?;
        let identity = LockIdentity::of(&meta);

        let age = meta
            .modified()
            .ok()
            .and_then(|mtime| SystemTime::now().duration_since(mtime).ok())
            .unwrap_or(Duration::ZERO);
        if age > self.config.stale_after() {
            debug!("Lock {} untouched for {:?}", lock.display(), age);
            return Some(identity);
        }

        if self.config.check_owner_pid {
            if let Some(pid) = read_owner_pid(lock) {
                if !is_process_alive(pid) {
                    debug!("Lock {} owner {} is gone", lock.display(), pid);
                    return Some(identity);
                }
            }
        }

        None
    }

    /// Unlink `lock` only if it is still the file judged stale.
    ///
    /// Returns false when another locker already replaced it.
    fn remove_stale(lock: &Path, identity: LockIdentity) -> io::Result<bool> {
        let current = fs::symlink_metadata(lock)?;
        if LockIdentity::of(&current) != identity {
            return Ok(false);
        }
        fs::remove_file(lock)?;
        Ok(true)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let step = self.config.retry_step_ms;
        let base = step
            .saturating_mul(attempt as u64)
            .min(self.config.retry_max_ms);
        let jitter = if step >= 4 {
            fastrand::u64(0..=step / 4)
        } else {
            0
        };
        Duration::from_millis(base + jitter)
    }

    fn link_with_retries(&mut self, tmp: &Path, lock: &Path, retries: u32) -> MailLockStatus {
        let mut attempt = 0u32;
        loop {
            match Self::try_link(tmp, lock) {
                LinkOutcome::Linked => return MailLockStatus::Success,
                LinkOutcome::Failed(e) => {
                    warn!("Cannot link {} to {}: {}", tmp.display(), lock.display(), e);
                    return MailLockStatus::Error;
                }
                LinkOutcome::Exists => {}
            }

            if let Some(identity) = self.stale_identity(lock) {
                match Self::remove_stale(lock, identity) {
                    Ok(true) => {
                        warn!("Removed stale mail lock {}", lock.display());
                        self.metrics.stale_removed += 1;
                        continue;
                    }
                    Ok(false) => {
                        debug!("Stale lock {} was replaced before removal", lock.display());
                        continue;
                    }
                    Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                    Err(e) => {
                        warn!("Cannot remove stale mail lock {}: {}", lock.display(), e);
                        return MailLockStatus::Error;
                    }
                }
            }

            if attempt >= retries {
                return MailLockStatus::MaxTries;
            }
            attempt += 1;
            self.metrics.contentions += 1;

            let delay = self.backoff(attempt);
            debug!(
                "Mail lock {} busy, attempt {}/{} in {:?}",
                lock.display(),
                attempt,
                retries,
                delay
            );
            thread::sleep(delay);
        }
    }
}

impl MailLocker for DotLocker {
    fn acquire(&mut self, user: &str, retries: u32) -> MailLockStatus {
        let lock_path = match self.lock_path_for(user) {
            Ok(path) => path,
            Err(status) => {
                warn!("Rejected mail lock for user {:?}: {}", user, status);
                self.metrics.failures += 1;
                return status;
            }
        };

        if self.held.is_some() {
            self.release();
        }

        let dir = lock_path.parent().unwrap_or_else(|| Path::new("."));
        let tmp = match Self::create_tmp(dir, self.recorded_pid()) {
            Ok(tmp) => tmp,
            Err(status) => {
                self.metrics.failures += 1;
                return status;
            }
        };

        let status = self.link_with_retries(&tmp, &lock_path, retries);

        if let Err(e) = fs::remove_file(&tmp) {
            debug!("Cannot remove temporary lock {}: {}", tmp.display(), e);
        }

        if status.is_success() {
            info!("Acquired mail lock {} for {}", lock_path.display(), user);
            self.metrics.acquisitions += 1;
            self.held = Some(HeldLock {
                user: user.to_string(),
                path: lock_path,
            });
        } else {
            warn!("Mail lock {} not acquired: {}", lock_path.display(), status);
            self.metrics.failures += 1;
        }
        status
    }

    fn release(&mut self) {
        let Some(held) = self.held.take() else {
            debug!("Mail unlock with no lock held");
            return;
        };

        match fs::remove_file(&held.path) {
            Ok(()) => info!("Released mail lock {} for {}", held.path.display(), held.user),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!("Mail lock {} was already removed", held.path.display())
            }
            Err(e) => warn!("Cannot remove mail lock {}: {}", held.path.display(), e),
        }
    }

    fn refresh(&mut self) {
        match &self.held {
            Some(held) => {
                if let Err(e) = kernel::stat::touch(&held.path) {
                    warn!("Cannot refresh mail lock {}: {}", held.path.display(), e);
                }
            }
            None => debug!("Mail lock touch with no lock held"),
        }
    }

    fn held_path(&self) -> Option<&Path> {
        self.held.as_ref().map(|held| held.path.as_path())
    }

    fn refresh_task(&self) -> Option<Box<dyn FnMut() + Send>> {
        let path = self.held.as_ref()?.path.clone();
        Some(Box::new(move || {
            if let Err(e) = kernel::stat::touch(&path) {
                warn!("Cannot refresh mail lock {}: {}", path.display(), e);
            }
        }))
    }
}

impl Drop for DotLocker {
    fn drop(&mut self) {
        if self.held.is_some() {
            self.release();
        }
    }
}

/// PID recorded in a lock file; 0 or garbage means unknown
fn read_owner_pid(lock: &Path) -> Option<i32> {
    let content = fs::read_to_string(lock).ok()?;
    content
        .lines()
        .next()
        .and_then(|line| line.trim().parse::<i32>().ok())
        .filter(|pid| *pid > 0)
}

fn is_process_alive(pid: i32) -> bool {
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        // Exists but belongs to someone else
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}
