//! Whole-file POSIX record locks through fcntl(2).
//!
//! Record locks belong to the process: a second lock request from the same
//! process on the same file never conflicts, it converts the existing lock.
//! All locks of a process on a file vanish when any descriptor for that file
//! is closed.
use crate::config::types::{BridgeError, LockMode, Result};
use nix::errno::Errno;
use std::os::fd::RawFd;

/// Process holding a lock that conflicts with a probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockHolder {
    pub pid: libc::pid_t,
    pub mode: LockMode,
}

/// Request covering the whole file: start 0, length 0 (to EOF and beyond)
fn whole_file(l_type: libc::c_short) -> libc::flock {
    // SAFETY: flock is plain old data and all-zero is a valid bit pattern.
    let mut fl: libc::flock = unsafe { std::mem::zeroed() };
    fl.l_type = l_type;
    fl.l_whence = libc::SEEK_SET as libc::c_short;
    fl.l_start = 0;
    fl.l_len = 0;
    fl
}

/// Acquire a read or write lock on the whole file behind `fd`.
///
/// `blocking` selects F_SETLKW, which sleeps until the lock is granted or a
/// signal interrupts the wait.
pub fn set_lock(fd: RawFd, mode: LockMode, blocking: bool) -> Result<()> {
    let fl = whole_file(mode.flock_type());
    let cmd = if blocking {
        libc::F_SETLKW
    } else {
        libc::F_SETLK
    };

    // SAFETY: fl outlives the call and the kernel validates fd.
    let rc = unsafe { libc::fcntl(fd, cmd, &fl as *const libc::flock) };
    if rc == 0 {
        Ok(())
    } else {
        Err(BridgeError::from_lock_errno(Errno::last(), fd))
    }
}

/// Release any lock this process holds on the file behind `fd`
pub fn unlock(fd: RawFd) -> Result<()> {
    let fl = whole_file(libc::F_UNLCK as libc::c_short);

    // SAFETY: as in set_lock.
    let rc = unsafe { libc::fcntl(fd, libc::F_SETLK, &fl as *const libc::flock) };
    if rc == 0 {
        Ok(())
    } else {
        Err(BridgeError::from_lock_errno(Errno::last(), fd))
    }
}

/// Ask the kernel whether a lock of `mode` could be placed right now.
///
/// Returns the first conflicting holder, or None when the lock is free.
/// Locks held by the calling process are never reported.
pub fn probe(fd: RawFd, mode: LockMode) -> Result<Option<LockHolder>> {
    let mut fl = whole_file(mode.flock_type());

    // SAFETY: fl is a valid, writable flock for the kernel to fill in.
    let rc = unsafe { libc::fcntl(fd, libc::F_GETLK, &mut fl as *mut libc::flock) };
    if rc != 0 {
        return Err(BridgeError::from_lock_errno(Errno::last(), fd));
    }

    if fl.l_type == libc::F_UNLCK as libc::c_short {
        return Ok(None);
    }
    let held = if fl.l_type == libc::F_WRLCK as libc::c_short {
        LockMode::Write
    } else {
        LockMode::Read
    };
    Ok(Some(LockHolder {
        pid: fl.l_pid,
        mode: held,
    }))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use nix::sys::wait::{waitpid, WaitStatus};
    use nix::unistd::{fork, ForkResult};
    use std::fs::OpenOptions;
    use std::os::fd::AsRawFd;

    /// Run a non-blocking lock attempt on `fd` from a forked child.
    /// Returns whether the child got the lock.
    pub(crate) fn child_can_lock(fd: RawFd, mode: LockMode) -> bool {
        // SAFETY: the child only calls fcntl and _exit, both async-signal-safe.
        match unsafe { fork() }.unwrap() {
            ForkResult::Child => {
                let fl = whole_file(mode.flock_type());
                let rc = unsafe { libc::fcntl(fd, libc::F_SETLK, &fl as *const libc::flock) };
                unsafe { libc::_exit(if rc == 0 { 0 } else { 1 }) }
            }
            ForkResult::Parent { child } => match waitpid(child, None).unwrap() {
                WaitStatus::Exited(_, code) => code == 0,
                other => panic!("unexpected child status: {:?}", other),
            },
        }
    }

    fn scratch_file() -> (tempfile::NamedTempFile, std::fs::File) {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(tmp.path())
            .unwrap();
        (tmp, file)
    }

    #[test]
    fn test_write_lock_excludes_other_process() {
        let (_tmp, file) = scratch_file();
        set_lock(file.as_raw_fd(), LockMode::Write, false).unwrap();

        assert!(!child_can_lock(file.as_raw_fd(), LockMode::Read));
        assert!(!child_can_lock(file.as_raw_fd(), LockMode::Write));

        unlock(file.as_raw_fd()).unwrap();
        assert!(child_can_lock(file.as_raw_fd(), LockMode::Write));
    }

    #[test]
    fn test_read_lock_shares_with_readers_only() {
        let (_tmp, file) = scratch_file();
        set_lock(file.as_raw_fd(), LockMode::Read, false).unwrap();

        assert!(child_can_lock(file.as_raw_fd(), LockMode::Read));
        assert!(!child_can_lock(file.as_raw_fd(), LockMode::Write));
    }

    #[test]
    fn test_same_process_relock_converts() {
        let (_tmp, file) = scratch_file();
        set_lock(file.as_raw_fd(), LockMode::Read, false).unwrap();
        set_lock(file.as_raw_fd(), LockMode::Write, false).unwrap();
        set_lock(file.as_raw_fd(), LockMode::Write, true).unwrap();
    }

    #[test]
    fn test_probe_sees_nothing_of_own_locks() {
        let (_tmp, file) = scratch_file();
        set_lock(file.as_raw_fd(), LockMode::Write, false).unwrap();
        assert_eq!(probe(file.as_raw_fd(), LockMode::Write).unwrap(), None);
    }

    #[test]
    fn test_bad_descriptor() {
        let err = set_lock(-1, LockMode::Read, false).unwrap_err();
        assert!(matches!(err, BridgeError::BadDescriptor { fd: -1 }));
    }

    #[test]
    fn test_write_lock_needs_writable_descriptor() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let read_only = std::fs::File::open(tmp.path()).unwrap();
        let err = set_lock(read_only.as_raw_fd(), LockMode::Write, false).unwrap_err();
        assert!(matches!(err, BridgeError::BadDescriptor { .. }));
        set_lock(read_only.as_raw_fd(), LockMode::Read, false).unwrap();
    }
}
