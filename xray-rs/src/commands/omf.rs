//! OMF motion file command implementations

use anyhow::{Context, Result};
use clap::Subcommand;
use console::style;
use std::path::{Path, PathBuf};

use xray_motion::{MotionError, OmfFile, Report, merge_omf, process_files};

use super::{finish_batch, print_outcome};
use crate::utils::{
    add_table_row, create_progress_bar, create_table, format_bytes, format_frames,
    format_motion_flags,
};

#[derive(Subcommand)]
pub enum OmfCommands {
    /// Display information about OMF files
    Info {
        /// Paths to the OMF files
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// List every motion
        #[arg(short, long)]
        motions: bool,

        /// Print the parameter record as JSON
        #[cfg(feature = "serde")]
        #[arg(long)]
        json: bool,
    },

    /// Decode every motion and check its checksums
    Verify {
        /// Paths to the OMF files
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Treat warnings as failures
        #[arg(long)]
        strict: bool,
    },

    /// Merge OMF files into one without re-encoding motions
    Merge {
        /// Input files; the first one supplies the bone parts
        #[arg(required = true, num_args = 1..)]
        inputs: Vec<PathBuf>,

        /// Path to write the merged file
        #[arg(short, long)]
        output: PathBuf,
    },
}

pub fn execute(command: OmfCommands, quiet: bool) -> Result<()> {
    match command {
        #[cfg(feature = "serde")]
        OmfCommands::Info {
            files,
            motions,
            json,
        } => execute_info(&files, motions, json, quiet),
        #[cfg(not(feature = "serde"))]
        OmfCommands::Info { files, motions } => execute_info(&files, motions, false, quiet),
        OmfCommands::Verify { files, strict } => execute_verify(&files, strict, quiet),
        OmfCommands::Merge { inputs, output } => execute_merge(&inputs, &output, quiet),
    }
}

fn execute_info(files: &[PathBuf], list_motions: bool, json: bool, quiet: bool) -> Result<()> {
    let batch = process_files(files, |path, data, report| {
        let file = OmfFile::read(data, report)?;
        if json {
            print_json(&file)?;
        } else {
            print_info(path, data.len(), &file, list_motions);
        }
        Ok(())
    });
    for outcome in &batch.outcomes {
        print_outcome(outcome);
    }
    finish_batch(&batch, quiet || json)
}

#[cfg(feature = "serde")]
fn print_json(file: &OmfFile) -> xray_motion::Result<()> {
    let params = file.params()?;
    let text = serde_json::to_string_pretty(&params)
        .map_err(|e| MotionError::format(format!("JSON encoding failed: {e}")))?;
    println!("{text}");
    Ok(())
}

#[cfg(not(feature = "serde"))]
fn print_json(_file: &OmfFile) -> xray_motion::Result<()> {
    Ok(())
}

fn print_info(path: &Path, size: usize, file: &OmfFile, list_motions: bool) {
    println!("{}", style(path.display()).cyan().bold());
    println!("  Size:        {}", format_bytes(size as u64));
    println!("  Parameters:  v{}", file.params_version);
    println!("  Bones:       {}", file.bone_count());
    println!("  Bone parts:  {}", file.parts.len());
    for part in &file.parts {
        println!("    {} ({} bones)", style(&part.name).yellow(), part.bones.len());
    }
    println!("  Motions:     {}", file.motions.len());

    if list_motions && !file.motions.is_empty() {
        let mut table = create_table(&[
            "Id", "Name", "Frames", "Flags", "Part", "Speed", "Power", "Accrue", "Falloff",
            "Marks",
        ]);
        for (id, entry) in file.motions.iter().enumerate() {
            let def = &entry.def;
            add_table_row(
                &mut table,
                vec![
                    id.to_string(),
                    def.name.clone(),
                    format_frames(entry.motion.length),
                    format_motion_flags(def.flags),
                    def.bone_or_part.to_string(),
                    format!("{:.2}", def.speed),
                    format!("{:.2}", def.power),
                    format!("{:.2}", def.accrue),
                    format!("{:.2}", def.falloff),
                    def.marks.len().to_string(),
                ],
            );
        }
        table.printstd();
    }
}

fn execute_verify(files: &[PathBuf], strict: bool, quiet: bool) -> Result<()> {
    let pb = create_progress_bar(files.len() as u64, "Verifying", quiet);
    let batch = process_files(files, |path, data, report| {
        pb.set_message(path.display().to_string());
        let result = verify(data, strict, report);
        pb.inc(1);
        result
    });
    pb.finish_and_clear();

    for outcome in &batch.outcomes {
        print_outcome(outcome);
        if !quiet && let Ok(motions) = &outcome.result {
            println!(
                "{} {}: {motions} motions",
                style("✓").green(),
                outcome.path.display()
            );
        }
    }
    finish_batch(&batch, quiet)
}

fn verify(data: &[u8], strict: bool, report: &mut Report) -> xray_motion::Result<usize> {
    let file = OmfFile::read(data, report)?;
    if strict && !report.is_empty() {
        return Err(MotionError::format(format!(
            "{} warnings in strict mode",
            report.len()
        )));
    }
    Ok(file.motions.len())
}

fn execute_merge(inputs: &[PathBuf], output: &Path, quiet: bool) -> Result<()> {
    let data = inputs
        .iter()
        .map(|path| {
            std::fs::read(path).with_context(|| format!("Failed to read file: {}", path.display()))
        })
        .collect::<Result<Vec<_>>>()?;
    let slices: Vec<&[u8]> = data.iter().map(Vec::as_slice).collect();

    let merged = merge_omf(&slices).context("Failed to merge motion files")?;
    for warning in merged.report.warnings() {
        eprintln!("{} {warning}", style("warning").yellow());
    }
    std::fs::write(output, &merged.data)
        .with_context(|| format!("Failed to write file: {}", output.display()))?;

    if !quiet {
        println!(
            "✓ Merged {} files into {} ({} motions, {})",
            inputs.len(),
            style(output.display()).cyan(),
            merged.motions,
            format_bytes(merged.data.len() as u64)
        );
    }
    Ok(())
}
