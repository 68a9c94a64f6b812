//! Cross-process helpers. fcntl locks belong to the process, so contention
//! has to come from a forked child.

use mboxlock::kernel::fcntl;
use mboxlock::LockMode;
use nix::sys::wait::waitpid;
use nix::unistd::{fork, pipe, ForkResult, Pid};
use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::RawFd;

/// A lock held by a forked child until this value is dropped
pub struct HeldByChild {
    pub pid: Pid,
    release: Option<File>,
}

impl HeldByChild {
    pub fn acquire(fd: RawFd, mode: LockMode) -> Self {
        let (ready_r, ready_w) = pipe().unwrap();
        let (release_r, release_w) = pipe().unwrap();

        // SAFETY: the child only locks, writes, reads and exits.
        match unsafe { fork() }.unwrap() {
            ForkResult::Child => {
                drop(ready_r);
                drop(release_w);
                let ok = fcntl::set_lock(fd, mode, false).is_ok();
                let _ = File::from(ready_w).write_all(&[ok as u8]);
                let mut byte = [0u8; 1];
                let _ = File::from(release_r).read(&mut byte);
                unsafe { libc::_exit(0) }
            }
            ForkResult::Parent { child } => {
                drop(ready_w);
                drop(release_r);
                let mut byte = [0u8; 1];
                File::from(ready_r).read_exact(&mut byte).unwrap();
                assert_eq!(byte[0], 1, "child could not take the lock");
                Self {
                    pid: child,
                    release: Some(File::from(release_w)),
                }
            }
        }
    }
}

impl Drop for HeldByChild {
    fn drop(&mut self) {
        if let Some(mut release) = self.release.take() {
            let _ = release.write_all(&[0]);
        }
        let _ = waitpid(self.pid, None);
    }
}

/// Whether a forked child can take `mode` on `fd` right now
pub fn child_can_lock(fd: RawFd, mode: LockMode) -> bool {
    // SAFETY: the child only calls fcntl and _exit.
    match unsafe { fork() }.unwrap() {
        ForkResult::Child => {
            let rc = if fcntl::set_lock(fd, mode, false).is_ok() { 0 } else { 1 };
            unsafe { libc::_exit(rc) }
        }
        ForkResult::Parent { child } => matches!(
            waitpid(child, None).unwrap(),
            nix::sys::wait::WaitStatus::Exited(_, 0)
        ),
    }
}

pub fn scratch_file() -> (tempfile::NamedTempFile, File) {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    let file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(tmp.path())
        .unwrap();
    (tmp, file)
}
