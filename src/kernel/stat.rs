//! File timestamps: reading atime and touching a path.
use crate::config::types::{BridgeError, Result};
use nix::errno::Errno;
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

/// Access time as reported by stat(2)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessTime {
    pub secs: i64,
    pub nanos: i64,
}

impl AccessTime {
    /// Whole seconds expressed in milliseconds, matching mtime-based callers
    pub fn as_millis_truncated(&self) -> i64 {
        self.secs * 1000
    }

    pub fn as_millis_precise(&self) -> i64 {
        self.secs * 1000 + self.nanos / 1_000_000
    }
}

/// stat(2) `path` and return its access time
pub fn access_time(path: &Path) -> Result<AccessTime> {
    let st = nix::sys::stat::stat(path).map_err(|e| BridgeError::from_path_errno(e, path))?;
    Ok(AccessTime {
        secs: st.st_atime as i64,
        nanos: st.st_atime_nsec as i64,
    })
}

/// Set both atime and mtime of `path` to now, like utime(path, NULL)
pub fn touch(path: &Path) -> Result<()> {
    let path_c = CString::new(path.as_os_str().as_bytes()).map_err(|_| {
        BridgeError::Config(format!("Path contains NUL byte: {}", path.display()))
    })?;

    // SAFETY: path_c is NUL-terminated and a null times pointer means "now".
    let rc = unsafe { libc::utimes(path_c.as_ptr(), std::ptr::null()) };
    if rc != 0 {
        return Err(BridgeError::from_path_errno(Errno::last(), path));
    }
    Ok(())
}
