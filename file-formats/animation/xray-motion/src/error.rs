use std::io;
use thiserror::Error;
use xray_data::DataError;

/// Error types for motion decoding, encoding and merging
#[derive(Error, Debug)]
pub enum MotionError {
    /// Container level failure
    #[error("Container error: {0}")]
    Data(#[from] DataError),

    /// I/O error during reading or writing
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Corrupt or inconsistent motion data
    #[error("Invalid format: {0}")]
    Format(String),

    /// Stored CRC32 does not match the keys it covers
    #[error("Checksum mismatch in {context}: stored 0x{stored:08X}, computed 0x{computed:08X}")]
    ChecksumMismatch {
        context: String,
        stored: u32,
        computed: u32,
    },

    /// A motion refers to data that is not available
    #[error("Missing dependency: {0}")]
    MissingDependency(String),

    /// Record version outside the supported range
    #[error("Unsupported {record} version: {version}")]
    VersionUnsupported { record: &'static str, version: u32 },

    /// A motion name occurs more than once
    #[error("Duplicate motion: {0}")]
    DuplicateMotion(String),

    /// Bone partitions differ in names, bones or order
    #[error("Bone partition mismatch: {0}")]
    PartitionMismatch(String),

    /// A record has bytes left after its last field
    #[error("{bytes} trailing bytes after {context}")]
    TrailingData { context: String, bytes: usize },
}

impl MotionError {
    /// Create a new Format error
    pub fn format<S: Into<String>>(msg: S) -> Self {
        Self::Format(msg.into())
    }

    /// Create a new MissingDependency error
    pub fn missing<S: Into<String>>(msg: S) -> Self {
        Self::MissingDependency(msg.into())
    }

    /// Whether the error aborts the current file
    ///
    /// Non-fatal kinds are collected in a [`Report`] and processing continues.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::ChecksumMismatch { .. }
                | Self::MissingDependency(_)
                | Self::DuplicateMotion(_)
                | Self::PartitionMismatch(_)
                | Self::TrailingData { .. }
        )
    }
}

/// Result type using MotionError
pub type Result<T> = std::result::Result<T, MotionError>;

/// Non-fatal problems met while processing one file
#[derive(Debug, Default)]
pub struct Report {
    warnings: Vec<MotionError>,
}

impl Report {
    /// Create an empty report
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a warning and log it
    pub fn push(&mut self, warning: MotionError) {
        log::warn!("{warning}");
        self.warnings.push(warning);
    }

    /// Move every warning of `other` into this report
    pub fn append(&mut self, other: Self) {
        self.warnings.extend(other.warnings);
    }

    /// Warnings in the order they were recorded
    pub fn warnings(&self) -> &[MotionError] {
        &self.warnings
    }

    /// Take ownership of the recorded warnings
    pub fn into_warnings(self) -> Vec<MotionError> {
        self.warnings
    }

    /// Whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }

    /// Number of recorded warnings
    pub fn len(&self) -> usize {
        self.warnings.len()
    }

    /// Number of checksum mismatches recorded
    pub fn checksum_mismatches(&self) -> usize {
        self.warnings
            .iter()
            .filter(|w| matches!(w, MotionError::ChecksumMismatch { .. }))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_kinds() {
        assert!(MotionError::format("bad").is_fatal());
        assert!(
            MotionError::VersionUnsupported {
                record: "motion parameters",
                version: 9
            }
            .is_fatal()
        );
        assert!(MotionError::Data(DataError::format("short")).is_fatal());
        assert!(!MotionError::missing("walk").is_fatal());
        assert!(
            !MotionError::TrailingData {
                context: "motion".into(),
                bytes: 4
            }
            .is_fatal()
        );
        assert!(
            !MotionError::ChecksumMismatch {
                context: "bone 0 rotation".into(),
                stored: 0,
                computed: 1
            }
            .is_fatal()
        );
    }

    #[test]
    fn test_report_collects() {
        let mut report = Report::new();
        assert!(report.is_empty());
        report.push(MotionError::DuplicateMotion("idle".into()));
        report.push(MotionError::ChecksumMismatch {
            context: "bone 1 translation".into(),
            stored: 0,
            computed: 0xDEAD_BEEF,
        });

        let mut total = Report::new();
        total.append(report);
        assert_eq!(total.len(), 2);
        assert_eq!(total.checksum_mismatches(), 1);
        assert_eq!(
            total.warnings()[1].to_string(),
            "Checksum mismatch in bone 1 translation: stored 0x00000000, computed 0xDEADBEEF"
        );
    }
}
