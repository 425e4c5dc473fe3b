//! Sequential processing of many files
//!
//! Every file is read and handed to a callback. A failing file is recorded
//! and the loop moves on to the next one.

use std::path::{Path, PathBuf};

use crate::error::{MotionError, Report, Result};

/// What happened to one file
#[derive(Debug)]
pub struct FileOutcome<T> {
    pub path: PathBuf,
    pub result: Result<T>,
    /// Non-fatal problems, also present when `result` is an error
    pub warnings: Report,
}

impl<T> FileOutcome<T> {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Outcomes of a batch, in input order
#[derive(Debug)]
pub struct BatchReport<T> {
    pub outcomes: Vec<FileOutcome<T>>,
}

impl<T> Default for BatchReport<T> {
    fn default() -> Self {
        Self {
            outcomes: Vec::new(),
        }
    }
}

impl<T> BatchReport<T> {
    /// Files processed without error
    pub fn succeeded(&self) -> impl Iterator<Item = &FileOutcome<T>> {
        self.outcomes.iter().filter(|outcome| outcome.is_ok())
    }

    /// Files that failed
    pub fn failed(&self) -> impl Iterator<Item = &FileOutcome<T>> {
        self.outcomes.iter().filter(|outcome| !outcome.is_ok())
    }

    pub fn has_failures(&self) -> bool {
        self.failed().next().is_some()
    }

    /// Total number of warnings over every file
    pub fn warning_count(&self) -> usize {
        self.outcomes.iter().map(|o| o.warnings.len()).sum()
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

/// Read each file and pass its bytes to `process`
pub fn process_files<P, T, F>(paths: &[P], mut process: F) -> BatchReport<T>
where
    P: AsRef<Path>,
    F: FnMut(&Path, &[u8], &mut Report) -> Result<T>,
{
    let mut batch = BatchReport::default();
    for path in paths {
        let path = path.as_ref();
        let mut warnings = Report::new();
        let result = std::fs::read(path)
            .map_err(MotionError::from)
            .and_then(|data| process(path, &data, &mut warnings));

        match &result {
            Ok(_) => log::debug!("{}: done, {} warnings", path.display(), warnings.len()),
            Err(e) => log::error!("{}: {e}", path.display()),
        }
        batch.outcomes.push(FileOutcome {
            path: path.to_path_buf(),
            result,
            warnings,
        });
    }
    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_failure_does_not_stop_batch() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("good.bin");
        let bad = dir.path().join("bad.bin");
        let missing = dir.path().join("missing.bin");
        fs::write(&good, [1, 2, 3]).unwrap();
        fs::write(&bad, []).unwrap();

        let batch = process_files(&[&good, &bad, &missing, &good], |_, data, report| {
            if data.is_empty() {
                return Err(MotionError::format("empty"));
            }
            report.push(MotionError::missing("something"));
            Ok(data.len())
        });

        assert_eq!(batch.len(), 4);
        assert_eq!(batch.succeeded().count(), 2);
        assert_eq!(batch.failed().count(), 2);
        assert!(batch.has_failures());
        assert_eq!(batch.warning_count(), 2);
        assert!(matches!(batch.outcomes[2].result, Err(MotionError::Io(_))));
        assert_eq!(batch.outcomes[3].path, good);
    }

    #[test]
    fn test_empty_batch() {
        let batch = process_files::<PathBuf, (), _>(&[], |_, _, _| Ok(()));
        assert!(batch.is_empty());
        assert!(!batch.has_failures());
    }
}
