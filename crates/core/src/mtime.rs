//! Modification timestamps used to suppress duplicate change notifications

use filetime::FileTime;
use std::fs::Metadata;
use std::io;
use std::path::Path;

/// Last-write time of a file with nanosecond precision
///
/// Ordered chronologically. A change is only genuine when the timestamp
/// strictly advances past the stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModTime {
    seconds: i64,
    nanos: u32,
}

impl ModTime {
    /// Timestamp recorded for files that did not exist when first observed
    pub const ZERO: ModTime = ModTime {
        seconds: 0,
        nanos: 0,
    };

    /// Build from unix seconds and a sub-second nanosecond part
    pub const fn from_unix(seconds: i64, nanos: u32) -> Self {
        Self { seconds, nanos }
    }

    /// Read the modification time of a file
    pub fn of(path: &Path) -> io::Result<Self> {
        let metadata = std::fs::metadata(path)?;
        Ok(Self::from_metadata(&metadata))
    }

    /// Read the modification time, falling back to `ZERO` if the file is missing
    pub fn probe(path: &Path) -> Self {
        Self::of(path).unwrap_or(Self::ZERO)
    }

    /// Extract the modification time from already-fetched metadata
    pub fn from_metadata(metadata: &Metadata) -> Self {
        let time = FileTime::from_last_modification_time(metadata);
        Self {
            seconds: time.unix_seconds(),
            nanos: time.nanoseconds(),
        }
    }

    /// Seconds since the unix epoch
    pub fn unix_seconds(&self) -> i64 {
        self.seconds
    }

    /// Sub-second part in nanoseconds
    pub fn nanoseconds(&self) -> u32 {
        self.nanos
    }
}

impl Default for ModTime {
    fn default() -> Self {
        Self::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use filetime::set_file_mtime;

    #[test]
    fn test_ordering_is_chronological() {
        let early = ModTime::from_unix(100, 999_999_999);
        let late = ModTime::from_unix(101, 0);
        assert!(early < late);
        assert!(ModTime::ZERO < early);
        assert_eq!(ModTime::default(), ModTime::ZERO);
    }

    #[test]
    fn test_of_reads_file_mtime() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let file = temp_dir.path().join("stamp.txt");
        std::fs::write(&file, b"data")?;

        set_file_mtime(&file, FileTime::from_unix_time(1_700_000_000, 42))?;

        let mtime = ModTime::of(&file)?;
        assert_eq!(mtime.unix_seconds(), 1_700_000_000);
        assert_eq!(mtime.nanoseconds(), 42);
        Ok(())
    }

    #[test]
    fn test_probe_missing_file_is_zero() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let missing = temp_dir.path().join("nope.txt");

        assert!(ModTime::of(&missing).is_err());
        assert_eq!(ModTime::probe(&missing), ModTime::ZERO);
        Ok(())
    }
}
