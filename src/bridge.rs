//! The lock bridge: advisory locks, access times and mailbox locks behind
//! one value.
//!
//! Every operation forwards to a single OS call or to the configured
//! [`MailLocker`]. The plain variants (`lock`, `last_accessed_millis`,
//! `mail_lock`) collapse failures into `false` / `-1`; the `try_*` and
//! `*_status` variants keep the reason.
use crate::config::settings::BridgeConfig;
use crate::config::types::{BridgeError, LockMode, MailLockStatus, OpStatus, Result};
use crate::kernel::fcntl::{self, LockHolder};
use crate::kernel::stat;
use crate::mail::{default_locker, MailLocker};
use log::debug;
use std::os::fd::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};

pub struct LockBridge {
    config: BridgeConfig,
    locker: Box<dyn MailLocker>,
}

impl LockBridge {
    /// Bridge using the descriptor offset already present in `config`
    pub fn new(config: BridgeConfig) -> Self {
        let locker = default_locker(&config.mail);
        debug!(
            "Lock bridge ready (descriptor offset {}, spool {})",
            config.descriptor_offset,
            config.mail.spool_dir.display()
        );
        Self { config, locker }
    }

    /// Record `reference_descriptor` as the descriptor offset.
    ///
    /// The reference is the number the caller's runtime reports for standard
    /// input. Conformant runtimes report 0; runtimes that numbered
    /// descriptors from 1 report 1, and every later descriptor is corrected
    /// by the same amount.
    pub fn initialize(reference_descriptor: RawFd, mut config: BridgeConfig) -> Self {
        config.descriptor_offset = reference_descriptor;
        Self::new(config)
    }

    /// [`LockBridge::initialize`] with this process's own standard input
    pub fn from_stdin(config: BridgeConfig) -> Self {
        Self::initialize(std::io::stdin().as_raw_fd(), config)
    }

    /// Replace the mail locker, e.g. with a differently configured one
    pub fn with_locker(mut self, locker: Box<dyn MailLocker>) -> Self {
        self.locker.release();
        self.locker = locker;
        self
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn descriptor_offset(&self) -> RawFd {
        self.config.descriptor_offset
    }

    /// OS descriptor for a caller-numbered descriptor.
    ///
    /// A number the offset cannot be taken from is a bad descriptor.
    pub fn os_descriptor(&self, descriptor: RawFd) -> Result<RawFd> {
        descriptor
            .checked_sub(self.config.descriptor_offset)
            .ok_or(BridgeError::BadDescriptor { fd: descriptor })
    }

    // ------------------------------------------------------------------
    // Advisory locks
    // ------------------------------------------------------------------

    /// Whole-file advisory lock on a caller-numbered descriptor
    pub fn try_lock_raw(&self, descriptor: RawFd, mode_tag: &str, blocking: bool) -> Result<()> {
        let fd = self.os_descriptor(descriptor)?;
        let mode = LockMode::from_tag(mode_tag);
        debug!(
            "{} {} lock on fd {} (caller fd {})",
            if blocking { "Waiting for" } else { "Trying" },
            mode,
            fd,
            descriptor
        );
        fcntl::set_lock(fd, mode, blocking)
    }

    pub fn try_lock<D: AsRawFd>(&self, handle: &D, mode_tag: &str, blocking: bool) -> Result<()> {
        self.try_lock_raw(handle.as_raw_fd(), mode_tag, blocking)
    }

    /// True iff the lock was granted
    pub fn lock_raw(&self, descriptor: RawFd, mode_tag: &str, blocking: bool) -> bool {
        self.try_lock_raw(descriptor, mode_tag, blocking).is_ok()
    }

    pub fn lock<D: AsRawFd>(&self, handle: &D, mode_tag: &str, blocking: bool) -> bool {
        self.lock_raw(handle.as_raw_fd(), mode_tag, blocking)
    }

    pub fn lock_status<D: AsRawFd>(&self, handle: &D, mode_tag: &str, blocking: bool) -> OpStatus {
        OpStatus::from(&self.try_lock(handle, mode_tag, blocking))
    }

    /// Drop this process's lock on the file behind `descriptor`
    pub fn unlock_raw(&self, descriptor: RawFd) -> bool {
        self.os_descriptor(descriptor)
            .and_then(fcntl::unlock)
            .is_ok()
    }

    pub fn unlock<D: AsRawFd>(&self, handle: &D) -> bool {
        self.unlock_raw(handle.as_raw_fd())
    }

    /// Report who, if anyone, would block a lock of `mode_tag`
    pub fn probe<D: AsRawFd>(&self, handle: &D, mode_tag: &str) -> Result<Option<LockHolder>> {
        let fd = self.os_descriptor(handle.as_raw_fd())?;
        fcntl::probe(fd, LockMode::from_tag(mode_tag))
    }

    // ------------------------------------------------------------------
    // Access time
    // ------------------------------------------------------------------

    /// Last access time of `path` in milliseconds since the epoch.
    ///
    /// Whole seconds unless `precise_access_time` is configured, so the value
    /// compares cleanly with second-granularity modification times.
    pub fn try_last_accessed<P: AsRef<Path>>(&self, path: P) -> Result<i64> {
        let atime = stat::access_time(path.as_ref())?;
        Ok(if self.config.precise_access_time {
            atime.as_millis_precise()
        } else {
            atime.as_millis_truncated()
        })
    }

    /// Like [`LockBridge::try_last_accessed`], -1 on any failure
    pub fn last_accessed_millis<P: AsRef<Path>>(&self, path: P) -> i64 {
        self.try_last_accessed(path).unwrap_or(-1)
    }

    // ------------------------------------------------------------------
    // Mailbox lock
    // ------------------------------------------------------------------

    /// Mailbox of `user` in the configured spool
    pub fn spool_path(&self, user: &str) -> PathBuf {
        self.config.mail.spool_dir.join(user)
    }

    pub fn mail_lock_status(&mut self, user: &str, retries: u32) -> MailLockStatus {
        self.locker.acquire(user, retries)
    }

    /// True only on an exact success status
    pub fn mail_lock(&mut self, user: &str, retries: u32) -> bool {
        self.mail_lock_status(user, retries).is_success()
    }

    pub fn mail_unlock(&mut self) {
        self.locker.release();
    }

    /// Refresh the held mailbox lock; ignored when none is held
    pub fn touch_lock(&mut self) {
        self.locker.refresh();
    }

    pub fn mail_locker(&self) -> &dyn MailLocker {
        self.locker.as_ref()
    }
}
