/// Core types and closed enums shared across mboxlock
use serde::{Deserialize, Serialize};
use std::fmt;
use std::os::fd::RawFd;
use std::path::PathBuf;
use thiserror::Error;

/// Advisory lock type selected by a file-open mode tag
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    /// Shared lock, compatible with other readers
    Read,
    /// Exclusive lock
    Write,
}

impl LockMode {
    /// Parse a mode tag like "r", "rw" or "rws".
    ///
    /// Only the second character is examined: 'w' selects a write lock,
    /// anything else (including a one-character tag) selects a read lock.
    pub fn from_tag(tag: &str) -> Self {
        match tag.as_bytes().get(1) {
            Some(b'w') => LockMode::Write,
            _ => LockMode::Read,
        }
    }

    /// Canonical mode tag for this lock type
    pub fn as_tag(self) -> &'static str {
        match self {
            LockMode::Read => "r",
            LockMode::Write => "rw",
        }
    }

    /// fcntl lock type for this mode
    pub(crate) fn flock_type(self) -> libc::c_short {
        match self {
            LockMode::Read => libc::F_RDLCK as libc::c_short,
            LockMode::Write => libc::F_WRLCK as libc::c_short,
        }
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Read => write!(f, "read"),
            LockMode::Write => write!(f, "write"),
        }
    }
}

/// Coarse outcome of a bridge operation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpStatus {
    Success,
    WouldBlock,
    PermissionDenied,
    NotFound,
    Unknown,
}

impl OpStatus {
    /// Boolean projection used by the plain `lock`/`mail_lock` calls
    pub fn succeeded(self) -> bool {
        self == OpStatus::Success
    }
}

impl<T> From<&Result<T>> for OpStatus {
    fn from(result: &Result<T>) -> Self {
        match result {
            Ok(_) => OpStatus::Success,
            Err(e) => e.status(),
        }
    }
}

/// Status codes of the mailbox locking convention (maillock.h numbering)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum MailLockStatus {
    Success = 0,
    /// User name or resulting lock path too long
    NameLength = 1,
    /// Could not create the temporary lock file
    TmpLock = 2,
    /// Could not write the temporary lock file
    TmpWrite = 3,
    /// Retries exhausted while another holder kept the lock
    MaxTries = 4,
    Error = 5,
}

impl MailLockStatus {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Map a library status code, folding unknown values into `Error`
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => MailLockStatus::Success,
            1 => MailLockStatus::NameLength,
            2 => MailLockStatus::TmpLock,
            3 => MailLockStatus::TmpWrite,
            4 => MailLockStatus::MaxTries,
            _ => MailLockStatus::Error,
        }
    }

    pub fn is_success(self) -> bool {
        self == MailLockStatus::Success
    }
}

impl fmt::Display for MailLockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            MailLockStatus::Success => "success",
            MailLockStatus::NameLength => "lock name too long",
            MailLockStatus::TmpLock => "cannot create temporary lock file",
            MailLockStatus::TmpWrite => "cannot write temporary lock file",
            MailLockStatus::MaxTries => "maximum retries exceeded",
            MailLockStatus::Error => "lock error",
        };
        write!(f, "{} ({})", text, self.code())
    }
}

/// Error types for mboxlock operations
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Lock on fd {fd} would block")]
    WouldBlock { fd: RawFd },

    #[error("Deadlock detected while waiting on fd {fd}")]
    Deadlock { fd: RawFd },

    #[error("Descriptor {fd} is not open with a suitable mode")]
    BadDescriptor { fd: RawFd },

    #[error("Interrupted by signal")]
    Interrupted,

    #[error("Permission denied: {details}")]
    PermissionDenied { details: String },

    #[error("Not found: {}", .path.display())]
    NotFound { path: PathBuf },

    #[error("Mail lock failed: {0}")]
    MailLock(MailLockStatus),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("System error: {0}")]
    Os(#[from] nix::errno::Errno),
}

impl BridgeError {
    /// Classify a failed F_SETLK/F_SETLKW/F_GETLK call
    pub(crate) fn from_lock_errno(errno: nix::errno::Errno, fd: RawFd) -> Self {
        use nix::errno::Errno;
        match errno {
            // POSIX lets F_SETLK report a conflict as either EAGAIN or EACCES
            Errno::EAGAIN | Errno::EACCES => BridgeError::WouldBlock { fd },
            Errno::EDEADLK => BridgeError::Deadlock { fd },
            Errno::EBADF => BridgeError::BadDescriptor { fd },
            Errno::EINTR => BridgeError::Interrupted,
            other => BridgeError::Os(other),
        }
    }

    /// Classify a failed stat/utimes on `path`
    pub(crate) fn from_path_errno(errno: nix::errno::Errno, path: &std::path::Path) -> Self {
        use nix::errno::Errno;
        match errno {
            Errno::ENOENT | Errno::ENOTDIR => BridgeError::NotFound {
                path: path.to_path_buf(),
            },
            Errno::EACCES | Errno::EPERM => BridgeError::PermissionDenied {
                details: format!("{}: {}", path.display(), errno),
            },
            other => BridgeError::Os(other),
        }
    }

    /// Project onto the coarse status enumeration
    pub fn status(&self) -> OpStatus {
        match self {
            BridgeError::WouldBlock { .. } => OpStatus::WouldBlock,
            BridgeError::PermissionDenied { .. } => OpStatus::PermissionDenied,
            BridgeError::NotFound { .. } => OpStatus::NotFound,
            BridgeError::MailLock(MailLockStatus::MaxTries) => OpStatus::WouldBlock,
            BridgeError::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound => OpStatus::NotFound,
                std::io::ErrorKind::PermissionDenied => OpStatus::PermissionDenied,
                std::io::ErrorKind::WouldBlock => OpStatus::WouldBlock,
                _ => OpStatus::Unknown,
            },
            _ => OpStatus::Unknown,
        }
    }
}

/// Convert errors to process exit codes (sysexits numbering where one applies)
impl From<&BridgeError> for i32 {
    fn from(err: &BridgeError) -> i32 {
        match err {
            BridgeError::WouldBlock { .. } => 2, // Temporary failure
            BridgeError::Deadlock { .. } => 2,
            BridgeError::Interrupted => 3,
            BridgeError::NotFound { .. } => 66,         // EX_NOINPUT
            BridgeError::PermissionDenied { .. } => 77, // EX_NOPERM
            BridgeError::Config(_) => 78,               // EX_CONFIG
            BridgeError::MailLock(MailLockStatus::MaxTries) => 75, // EX_TEMPFAIL
            BridgeError::MailLock(_) => 1,
            BridgeError::BadDescriptor { .. } => 74, // EX_IOERR
            BridgeError::Io(_) => 74,
            BridgeError::Os(_) => 74,
        }
    }
}

/// Result type alias for mboxlock operations
pub type Result<T> = std::result::Result<T, BridgeError>;
