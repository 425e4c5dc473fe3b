//! Skeletal motions of the X-Ray engine.
//!
//! Supported files:
//!
//! - **OMF**: baked, quantized per-frame bone tracks plus bone partitions and
//!   playback definitions ([`OmfFile`])
//! - **SKL / SKLS**: editor motions storing animation curves ([`EditorMotion`])
//!
//! Editor motions are baked into OMF tracks, OMF files can be merged without
//! decoding their tracks, and the [`export`] and [`import`] modules connect
//! both to a host application through the [`PoseSource`] and
//! [`MotionTarget`] traits.
//!
//! # Examples
//!
//! ```no_run
//! use xray_motion::{OmfFile, Report};
//!
//! let data = std::fs::read("actor.omf")?;
//! let mut report = Report::new();
//! let file = OmfFile::read(&data, &mut report)?;
//! for entry in &file.motions {
//!     println!("{}: {} frames", entry.name(), entry.motion.length);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod batch;
pub mod coordinate;
pub mod envelope;
pub mod error;
pub mod export;
pub mod flags;
pub mod import;
pub mod merge;
pub mod motion;
pub mod omf;
pub mod params;
pub mod skl;

pub use batch::{BatchReport, FileOutcome, process_files};
pub use envelope::{Behavior, Envelope, Key, KeyParams, Shape};
pub use error::{MotionError, Report, Result};
pub use export::{ExportMode, ExportOptions, PoseSource, export_motion, export_omf};
pub use flags::{KeyFlags, MotionFlags};
pub use import::{ImportOptions, MotionTarget, apply_motion, import_omf};
pub use merge::{MergeOutput, merge_omf};
pub use motion::{BoneTrack, Motion, RotationTrack, TranslationTrack};
pub use omf::{OmfFile, OmfMotion};
pub use params::{BonePart, BoneRef, MotionDef, MotionMark, MotionParams};
pub use skl::{BoneMotion, Channel, EditorMotion, read_skl, read_skls, write_skl, write_skls};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
