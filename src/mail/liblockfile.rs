//! [`MailLocker`] backed by the system liblockfile.
//!
//! The library keeps the held lock in process-wide state, so every call is
//! serialized through one mutex regardless of how many lockers exist.
use crate::config::types::MailLockStatus;
use crate::mail::MailLocker;
use log::{debug, info, warn};
use std::ffi::CString;
use std::os::raw::{c_char, c_int};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

#[link(name = "lockfile")]
extern "C" {
    fn maillock(name: *const c_char, retrycnt: c_int) -> c_int;
    fn mailunlock() -> c_int;
    // void in maillock.h; it reports nothing worth checking
    fn touchlock();
}

static LIBRARY: Mutex<()> = Mutex::new(());

fn library() -> MutexGuard<'static, ()> {
    LIBRARY.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
pub struct LibLockfile {
    held: bool,
}

impl LibLockfile {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MailLocker for LibLockfile {
    fn acquire(&mut self, user: &str, retries: u32) -> MailLockStatus {
        let Ok(name) = CString::new(user) else {
            return MailLockStatus::Error;
        };
        if self.held {
            self.release();
        }

        let retries = c_int::try_from(retries).unwrap_or(c_int::MAX);
        let _guard = library();
        // SAFETY: name is NUL-terminated and outlives the call.
        let code = unsafe { maillock(name.as_ptr(), retries) };
        let status = MailLockStatus::from_code(code);

        if status.is_success() {
            info!("Acquired mail lock for {} via liblockfile", user);
            self.held = true;
        } else {
            warn!("liblockfile maillock for {} failed: {}", user, status);
        }
        status
    }

    fn release(&mut self) {
        if !self.held {
            debug!("Mail unlock with no lock held");
            return;
        }
        let _guard = library();
        // SAFETY: no arguments; the library tracks its own lock path.
        unsafe {
            mailunlock();
        }
        self.held = false;
    }

    fn refresh(&mut self) {
        if !self.held {
            debug!("Mail lock touch with no lock held");
            return;
        }
        let _guard = library();
        // SAFETY: as in release.
        unsafe {
            touchlock();
        }
    }

    fn held_path(&self) -> Option<&Path> {
        None
    }

    fn refresh_task(&self) -> Option<Box<dyn FnMut() + Send>> {
        if !self.held {
            return None;
        }
        Some(Box::new(|| {
            let _guard = library();
            // SAFETY: as in release.
            unsafe {
                touchlock();
            }
        }))
    }
}

impl Drop for LibLockfile {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unheld_operations_are_noops() {
        let mut locker = LibLockfile::new();
        locker.release();
        locker.refresh();
        assert!(locker.held_path().is_none());
        assert!(locker.refresh_task().is_none());
    }

    #[test]
    fn test_interior_nul_is_rejected_before_the_library() {
        let mut locker = LibLockfile::new();
        assert_eq!(locker.acquire("bad\0name", 0), MailLockStatus::Error);
        assert!(!locker.held);
    }

    #[test]
    fn test_acquire_follows_library_status() {
        // The spool may not be writable here; either outcome must leave the
        // locker consistent with the status it reported.
        let mut locker = LibLockfile::new();
        let status = locker.acquire("mboxlock-test", 0);
        assert_eq!(locker.held, status.is_success());

        if status.is_success() {
            let mut task = locker.refresh_task().unwrap();
            task();
            locker.refresh();
            locker.release();
            assert!(!locker.held);
        }
        locker.release();
    }
}
