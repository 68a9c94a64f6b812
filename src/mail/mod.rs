//! Mailbox spool locking
//!
//! A [`MailLocker`] holds at most one `<user>.lock` at a time. The portable
//! [`dotlock::DotLocker`] is always available; with the `liblockfile`
//! feature the system library can be used instead.

pub mod dotlock;
#[cfg(feature = "liblockfile")]
pub mod liblockfile;
pub mod refresher;

use crate::config::settings::MailLockConfig;
use crate::config::types::MailLockStatus;
use std::path::Path;

/// Capability to lock, unlock and refresh a user's mail spool
pub trait MailLocker: Send {
    /// Take the lock for `user`, trying up to `retries` more times while
    /// another holder has it. Any lock this locker already holds is
    /// released first.
    fn acquire(&mut self, user: &str, retries: u32) -> MailLockStatus;

    /// Release the held lock. Does nothing when none is held.
    fn release(&mut self);

    /// Mark the held lock as fresh. Does nothing when none is held.
    fn refresh(&mut self);

    /// Path of the held lock file, when known
    fn held_path(&self) -> Option<&Path>;

    /// Detached closure that refreshes the currently held lock, for use on
    /// a background thread. None when nothing is held.
    fn refresh_task(&self) -> Option<Box<dyn FnMut() + Send>>;
}

/// Locker used when the caller does not supply one
pub fn default_locker(config: &MailLockConfig) -> Box<dyn MailLocker> {
    #[cfg(feature = "liblockfile")]
    {
        let _ = config;
        Box::new(liblockfile::LibLockfile::new())
    }

    #[cfg(not(feature = "liblockfile"))]
    {
        Box::new(dotlock::DotLocker::new(config.clone()))
    }
}
