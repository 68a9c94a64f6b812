//! Thin wrappers around the POSIX primitives mboxlock forwards to.
//!
//! All `unsafe` code is concentrated here with explicit SAFETY comments.

pub mod fcntl;
pub mod signal;
pub mod stat;
