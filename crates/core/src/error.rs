//! Error type shared by every multiwatch crate

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the file watcher
///
/// Duplicate watches, unwatched notifications and duplicate change
/// notifications are not errors; they are filtered or reported through
/// return values instead.
#[derive(Debug, Error)]
pub enum WatchError {
    /// Filesystem access failed while resolving or inspecting a path
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The path has no file name or no parent directory to subscribe to
    #[error("path has no parent directory: {}", .0.display())]
    NoParent(PathBuf),

    /// The native notification facility reported a failure
    #[error("native watch error{}: {message}", dir_suffix(.dir))]
    Native {
        dir: Option<PathBuf>,
        message: String,
    },

    /// Configuration could not be parsed or is inconsistent
    #[error("invalid watcher configuration: {0}")]
    Config(String),

    /// A directory worker thread could not be started
    #[error("failed to spawn directory worker: {0}")]
    Spawn(#[source] io::Error),

    /// The watcher has been disposed and accepts no more work
    #[error("watcher has been disposed")]
    Disposed,
}

impl WatchError {
    /// Build a native error for a directory subscription
    pub fn native(dir: Option<PathBuf>, message: impl Into<String>) -> Self {
        Self::Native {
            dir,
            message: message.into(),
        }
    }

    /// Build an I/O error tagged with the offending path
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

fn dir_suffix(dir: &Option<PathBuf>) -> String {
    match dir {
        Some(dir) => format!(" in {}", dir.display()),
        None => String::new(),
    }
}
