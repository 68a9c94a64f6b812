//! mboxlock: advisory file locks, access times and UNIX mailbox locking
//!
//! Each operation is a thin forward to one OS facility, with the failure
//! reason kept available for callers that want more than a boolean.
//!
//! # Architecture
//!
//! ## Bridge ([`bridge`])
//! - [`bridge::LockBridge`]: descriptor offset, whole-file `fcntl` locks,
//!   last-access time, mailbox lock/unlock/touch
//!
//! ## Kernel Primitives ([`kernel`])
//! - [`kernel::fcntl`]: `F_SETLK` / `F_SETLKW` / `F_GETLK` record locks
//! - [`kernel::stat`]: access time and `utimes` touch
//! - [`kernel::signal`]: async-safe signal flags for long-held locks
//!
//! ## Mailbox Locking ([`mail`])
//! - [`mail::MailLocker`]: acquire/release/refresh capability
//! - [`mail::dotlock`]: portable `<user>.lock` dotlocks
//! - `mail::liblockfile`: system liblockfile (feature `liblockfile`)
//! - [`mail::refresher`]: background staleness refresh
//!
//! ## Spool ([`spool`])
//! - [`spool::SpoolLock`]: dotlock plus advisory lock on the spool file
//!
//! ## Configuration ([`config`])
//! - [`config::types`]: closed enums and error types
//! - [`config::settings`]: JSON configuration and validation
//!
//! ## CLI ([`cli`])
//! - `mboxlock` binary entrypoint

// Lock bridge
pub mod bridge;

// Kernel Primitives
pub mod kernel;

// Mailbox locking
pub mod mail;

// Combined spool lock
pub mod spool;

// Configuration
pub mod config;

// CLI entrypoint wiring for the mboxlock binary
pub mod cli;

// Re-export commonly used types for convenience
pub use bridge::LockBridge;
pub use config::settings::{BridgeConfig, MailLockConfig};
pub use config::types::*;
pub use mail::MailLocker;
pub use spool::SpoolLock;
