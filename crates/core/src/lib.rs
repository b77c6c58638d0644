//! Multiwatch Core - path identity and timestamp primitives
//!
//! This crate provides the pieces the multiplexer keys its state on:
//! - Canonical path identity with value equality (`PathKey`)
//! - Ordered modification timestamps for change de-duplication (`ModTime`)
//! - The shared error type (`WatchError`)

pub mod error;
pub mod mtime;
pub mod path;

// Re-export main types for convenience
pub use error::WatchError;
pub use mtime::ModTime;
pub use path::PathKey;

/// Common result type used throughout multiwatch
pub type Result<T> = std::result::Result<T, WatchError>;
