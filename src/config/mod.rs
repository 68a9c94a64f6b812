//! Configuration and shared types
//!
//! Closed enums, error types, and the bridge configuration.

pub mod settings;
pub mod types;
