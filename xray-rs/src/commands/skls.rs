//! SKL/SKLS editor motion command implementations

use anyhow::{Context, Result, bail};
use clap::{Subcommand, ValueEnum};
use console::style;
use std::path::{Path, PathBuf};

use xray_motion::export::{ExportMode, ExportOptions, export_omf};
use xray_motion::params::PARAMS_VERSION;
use xray_motion::skl::bake_all;
use xray_motion::{EditorMotion, OmfFile, Report, omf, process_files, read_skl, read_skls};

use super::{finish_batch, print_outcome};
use crate::utils::{add_table_row, create_table, format_motion_flags};

/// How baked motions combine with an existing output file
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    /// Replace the output file
    Overwrite,
    /// Keep existing motions, skip new ones with taken names
    Add,
    /// Replace same-named motions, append the rest
    Replace,
}

impl From<ModeArg> for ExportMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Overwrite => ExportMode::Overwrite,
            ModeArg::Add => ExportMode::Add,
            ModeArg::Replace => ExportMode::Replace,
        }
    }
}

#[derive(Subcommand)]
pub enum SklsCommands {
    /// Display information about SKL/SKLS files
    Info {
        /// Paths to the SKL or SKLS files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Bake editor motions into an OMF file
    Bake {
        /// SKL or SKLS files to bake
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Path of the OMF file to write
        #[arg(short, long)]
        output: PathBuf,

        /// OMF file supplying bone order and bone parts
        #[arg(long, conflicts_with = "bones")]
        skeleton: Option<PathBuf>,

        /// Comma-separated bone names in skeleton order
        #[arg(long, value_delimiter = ',')]
        bones: Option<Vec<String>>,

        /// Store translations with 16-bit keys
        #[arg(long)]
        high_quality: bool,

        /// How to combine with an existing output file
        #[arg(long, value_enum, default_value = "overwrite")]
        mode: ModeArg,

        /// Keep the bone parts of the existing output file
        #[arg(long)]
        keep_parts: bool,

        /// Parameter record version to write
        #[arg(long, default_value_t = PARAMS_VERSION)]
        params_version: u16,
    },
}

pub fn execute(command: SklsCommands, quiet: bool) -> Result<()> {
    match command {
        SklsCommands::Info { files } => execute_info(&files, quiet),
        SklsCommands::Bake {
            inputs,
            output,
            skeleton,
            bones,
            high_quality,
            mode,
            keep_parts,
            params_version,
        } => {
            let options = ExportOptions {
                high_quality,
                export_mode: mode.into(),
                bone_parts: !keep_parts,
                motions: true,
                params_version,
            };
            execute_bake(&inputs, &output, skeleton.as_deref(), bones, &options, quiet)
        }
    }
}

/// Editor motions of a `.skl` or `.skls` file, chosen by extension
fn read_editor_motions(path: &Path, data: &[u8]) -> xray_motion::Result<Vec<EditorMotion>> {
    let is_skl = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("skl"));
    if is_skl {
        Ok(vec![read_skl(data)?])
    } else {
        read_skls(data)
    }
}

fn execute_info(files: &[PathBuf], quiet: bool) -> Result<()> {
    let batch = process_files(files, |path, data, _| {
        let motions = read_editor_motions(path, data)?;
        println!("{}", style(path.display()).cyan().bold());
        let mut table = create_table(&[
            "Name", "Frames", "FPS", "Version", "Bones", "Flags", "Marks",
        ]);
        for motion in &motions {
            add_table_row(
                &mut table,
                vec![
                    motion.name.clone(),
                    format!("{}..={}", motion.frame_start, motion.frame_end),
                    format!("{:.1}", motion.fps),
                    motion.version.to_string(),
                    motion.bones.len().to_string(),
                    format_motion_flags(motion.flags),
                    motion.marks.len().to_string(),
                ],
            );
        }
        table.printstd();
        Ok(motions.len())
    });
    for outcome in &batch.outcomes {
        print_outcome(outcome);
    }
    finish_batch(&batch, quiet)
}

fn execute_bake(
    inputs: &[PathBuf],
    output: &Path,
    skeleton: Option<&Path>,
    bones: Option<Vec<String>>,
    options: &ExportOptions,
    quiet: bool,
) -> Result<()> {
    let batch = process_files(inputs, |path, data, _| read_editor_motions(path, data));
    for outcome in batch.failed() {
        print_outcome(outcome);
    }
    if batch.has_failures() {
        bail!("{} of {} input files failed", batch.failed().count(), batch.len());
    }
    let editor: Vec<EditorMotion> = batch
        .outcomes
        .into_iter()
        .filter_map(|outcome| outcome.result.ok())
        .flatten()
        .collect();

    let (bone_names, parts) = match (skeleton, bones) {
        (Some(path), _) => {
            let data = std::fs::read(path)
                .with_context(|| format!("Failed to read skeleton: {}", path.display()))?;
            let params = omf::read_params(&data)
                .with_context(|| format!("Failed to parse skeleton: {}", path.display()))?;
            (params.bone_names(), params.parts)
        }
        (None, Some(bones)) => (bones, Vec::new()),
        (None, None) => {
            let Some(first) = editor.first() else {
                bail!("No editor motions to bake");
            };
            let names: Vec<String> = first.bones.iter().map(|b| b.name.clone()).collect();
            (names, Vec::new())
        }
    };

    let mut report = Report::new();
    let baked = bake_all(&editor, &bone_names, options.high_quality, &mut report)
        .context("Failed to bake editor motions")?;

    let existing = if options.export_mode != ExportMode::Overwrite && output.exists() {
        let data = std::fs::read(output)
            .with_context(|| format!("Failed to read file: {}", output.display()))?;
        Some(
            OmfFile::read(&data, &mut report)
                .with_context(|| format!("Failed to parse existing file: {}", output.display()))?,
        )
    } else {
        None
    };
    let file = export_omf(baked, parts, &bone_names, existing.as_ref(), options, &mut report)
        .context("Failed to combine motions")?;
    let data = file.write().context("Failed to encode motions")?;
    std::fs::write(output, &data)
        .with_context(|| format!("Failed to write file: {}", output.display()))?;

    for warning in report.warnings() {
        eprintln!("{} {warning}", style("warning").yellow());
    }
    if !quiet {
        println!(
            "✓ Baked {} editor motions into {} ({} motions)",
            editor.len(),
            style(output.display()).cyan(),
            file.motions.len()
        );
    }
    Ok(())
}
