//! Command implementations for each file format

pub mod chunks;
pub mod omf;
pub mod skls;

use anyhow::{Result, bail};
use console::style;
use xray_motion::{BatchReport, FileOutcome};

/// Print the warnings and error of one file
pub(crate) fn print_outcome<T>(outcome: &FileOutcome<T>) {
    for warning in outcome.warnings.warnings() {
        eprintln!(
            "{} {}: {warning}",
            style("warning").yellow(),
            outcome.path.display()
        );
    }
    if let Err(e) = &outcome.result {
        eprintln!("{} {}: {e}", style("error").red(), outcome.path.display());
    }
}

/// Fail when any file of the batch failed
pub(crate) fn finish_batch<T>(batch: &BatchReport<T>, quiet: bool) -> Result<()> {
    let failed = batch.failed().count();
    if !quiet {
        println!(
            "{} files, {} failed, {} warnings",
            batch.len(),
            failed,
            batch.warning_count()
        );
    }
    if failed > 0 {
        bail!("{failed} of {} files failed", batch.len());
    }
    Ok(())
}
