//! Delivering decoded motions to a host application

use glam::Mat4;

use crate::coordinate;
use crate::error::{MotionError, Report, Result};
use crate::motion::Motion;
use crate::omf::{self, OmfFile};

/// Receiver of decoded per-frame bone transforms
pub trait MotionTarget {
    /// Called once per bone before its frames; returning `false` skips it
    fn accept_bone(&mut self, bone: &str) -> bool;

    /// Host-space transform of `bone` relative to its parent at `frame`
    fn set_transform(&mut self, bone: &str, frame: u32, transform: Mat4);
}

/// Import configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportOptions {
    /// Decode motions; otherwise only the parameter record is read
    pub motions: bool,
    /// Keep bone partitions
    pub bone_parts: bool,
    /// Names of the motions to keep; all when `None`
    pub motion_filter: Option<Vec<String>>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            motions: true,
            bone_parts: true,
            motion_filter: None,
        }
    }
}

impl ImportOptions {
    fn wants(&self, name: &str) -> bool {
        self.motion_filter
            .as_ref()
            .is_none_or(|names| names.iter().any(|n| n == name))
    }
}

/// Decode an OMF file as configured by `options`
pub fn import_omf(data: &[u8], options: &ImportOptions) -> Result<(OmfFile, Report)> {
    let mut report = Report::new();
    let mut file = if options.motions {
        OmfFile::read(data, &mut report)?
    } else {
        let params = omf::read_params(data)?;
        OmfFile {
            params_version: params.version,
            parts: params.parts,
            motions: Vec::new(),
        }
    };

    file.motions.retain(|entry| options.wants(entry.name()));
    if let Some(filter) = &options.motion_filter {
        for name in filter {
            if options.motions && file.find(name).is_none() {
                report.push(MotionError::missing(format!("motion {name:?} not in file")));
            }
        }
    }
    if !options.bone_parts {
        file.parts.clear();
    }
    Ok((file, report))
}

/// Feed every frame of `motion` to `target`
///
/// `bone_names` is the track order of the motion. Bones the target declines
/// are recorded in the returned report.
pub fn apply_motion<T: MotionTarget + ?Sized>(
    motion: &Motion,
    bone_names: &[String],
    target: &mut T,
) -> Result<Report> {
    if bone_names.len() != motion.tracks.len() {
        return Err(MotionError::format(format!(
            "motion {:?} has {} tracks for {} bone names",
            motion.name,
            motion.tracks.len(),
            bone_names.len()
        )));
    }

    let mut report = Report::new();
    for (track, name) in motion.tracks.iter().zip(bone_names) {
        if !target.accept_bone(name) {
            report.push(MotionError::missing(format!(
                "motion {:?}: target has no bone {name:?}",
                motion.name
            )));
            continue;
        }
        for frame in 0..motion.length {
            let (rotation, translation) = track.sample(frame as usize);
            let transform = coordinate::to_host(rotation.normalize(), translation);
            target.set_transform(name, frame, transform);
        }
    }
    Ok(report)
}
