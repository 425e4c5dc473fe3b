//! Building engine motions from a host skeleton
//!
//! The host application supplies poses through [`PoseSource`]. Exported
//! motions can then be combined with an existing OMF file according to
//! [`ExportOptions`].

use std::ops::RangeInclusive;

use glam::{Mat4, Quat, Vec3};

use crate::coordinate;
use crate::error::{MotionError, Report, Result};
use crate::motion::{BoneTrack, Motion};
use crate::omf::{OmfFile, OmfMotion};
use crate::params::{BonePart, MotionParams, PARAMS_VERSION};

/// Skeleton and animation data of the host application
pub trait PoseSource {
    fn bone_count(&self) -> usize;

    fn bone_name(&self, bone: usize) -> &str;

    /// Whether the bone is written to motion files
    fn is_exportable(&self, bone: usize) -> bool;

    fn parent(&self, bone: usize) -> Option<usize>;

    /// Host-space world transform of `bone` at `frame`
    fn world_transform(&self, bone: usize, frame: i32) -> Mat4;
}

/// How new motions combine with an existing file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub enum ExportMode {
    /// Ignore the existing file
    #[default]
    Overwrite,
    /// Keep existing motions, append new ones with unused names
    Add,
    /// Replace same-named motions in place, append the rest
    Replace,
}

/// Export configuration
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct ExportOptions {
    /// 16-bit translation keys
    pub high_quality: bool,
    pub export_mode: ExportMode,
    /// Write the new bone partitions; otherwise keep the existing ones
    pub bone_parts: bool,
    /// Write the new motions; otherwise keep the existing ones
    pub motions: bool,
    /// Parameter record version to write
    pub params_version: u16,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            high_quality: false,
            export_mode: ExportMode::Overwrite,
            bone_parts: true,
            motions: true,
            params_version: PARAMS_VERSION,
        }
    }
}

/// Exportable bones with their nearest exportable ancestor
///
/// Parents are positions in the returned list.
pub fn exportable_bones<P: PoseSource + ?Sized>(source: &P) -> Vec<(usize, Option<usize>)> {
    let bones: Vec<usize> = (0..source.bone_count())
        .filter(|&bone| source.is_exportable(bone))
        .collect();

    bones
        .iter()
        .map(|&bone| {
            let mut parent = source.parent(bone);
            // Bounded walk, a malformed hierarchy may contain cycles
            for _ in 0..source.bone_count() {
                match parent {
                    Some(p) if !source.is_exportable(p) => parent = source.parent(p),
                    _ => break,
                }
            }
            let parent = parent.and_then(|p| bones.iter().position(|&b| b == p));
            (bone, parent)
        })
        .collect()
}

/// Names of the exportable bones in track order
pub fn exportable_bone_names<P: PoseSource + ?Sized>(source: &P) -> Vec<String> {
    exportable_bones(source)
        .into_iter()
        .map(|(bone, _)| source.bone_name(bone).to_owned())
        .collect()
}

/// Sample the pose source at every frame and quantize into an engine motion
pub fn export_motion<P: PoseSource + ?Sized>(
    source: &P,
    name: &str,
    frames: RangeInclusive<i32>,
    high_quality: bool,
) -> Result<Motion> {
    let length = frames
        .end()
        .checked_sub(*frames.start())
        .and_then(|span| u32::try_from(span).ok())
        .and_then(|span| span.checked_add(1))
        .ok_or_else(|| {
            MotionError::format(format!(
                "motion {name:?}: invalid frame range {}..={}",
                frames.start(),
                frames.end()
            ))
        })?;

    let bones = exportable_bones(source);
    let mut rotations: Vec<Vec<Quat>> = vec![Vec::with_capacity(length as usize); bones.len()];
    let mut positions: Vec<Vec<Vec3>> = vec![Vec::with_capacity(length as usize); bones.len()];

    for frame in frames {
        let world: Vec<Mat4> = bones
            .iter()
            .map(|&(bone, _)| source.world_transform(bone, frame))
            .collect();
        for (slot, &(_, parent)) in bones.iter().enumerate() {
            let local = match parent {
                Some(parent) => world[parent].inverse() * world[slot],
                None => world[slot],
            };
            let (_, rotation, translation) = local.to_scale_rotation_translation();
            let (mut rotation, translation) = coordinate::to_engine(rotation, translation);

            // Keep consecutive keys in one hemisphere
            if let Some(previous) = rotations[slot].last()
                && previous.dot(rotation) < 0.0
            {
                rotation = -rotation;
            }
            rotations[slot].push(rotation);
            positions[slot].push(translation);
        }
    }

    let tracks = rotations
        .iter()
        .zip(&positions)
        .map(|(r, p)| BoneTrack::from_samples(r, p, high_quality))
        .collect();
    log::debug!("exported motion {name:?}: {length} frames, {} bones", bones.len());

    Ok(Motion {
        name: name.to_owned(),
        length,
        tracks,
    })
}

/// Reorder the tracks of `motion` from `from` bone order to `to` bone order
fn reorder_tracks(mut motion: Motion, from: &[String], to: &[String]) -> Result<Motion> {
    if from == to {
        return Ok(motion);
    }
    let tracks = to
        .iter()
        .map(|name| {
            from.iter()
                .position(|n| n.eq_ignore_ascii_case(name))
                .and_then(|index| motion.tracks.get(index).cloned())
                .ok_or_else(|| {
                    MotionError::format(format!(
                        "motion {:?} has no track for bone {name:?}",
                        motion.name
                    ))
                })
        })
        .collect::<Result<Vec<_>>>()?;
    motion.tracks = tracks;
    Ok(motion)
}

/// Check that every bone belongs to exactly one partition
///
/// Index-only references get the name of the bone they point at.
fn resolve_partition(mut parts: Vec<BonePart>, bone_names: &[String]) -> Result<Vec<BonePart>> {
    let mut seen: Vec<String> = Vec::with_capacity(bone_names.len());
    for part in &mut parts {
        for bone in &mut part.bones {
            let name = match (&bone.name, bone.index) {
                (Some(name), _) => name.clone(),
                (None, Some(index)) => bone_names.get(index as usize).cloned().ok_or_else(|| {
                    MotionError::format(format!(
                        "part {:?} refers to bone {index}, the skeleton has {}",
                        part.name,
                        bone_names.len()
                    ))
                })?,
                (None, None) => {
                    return Err(MotionError::format(format!(
                        "part {:?} has a bone without name or index",
                        part.name
                    )));
                }
            };
            if !bone_names.iter().any(|n| n.eq_ignore_ascii_case(&name)) {
                return Err(MotionError::format(format!(
                    "part {:?} refers to unknown bone {name:?}",
                    part.name
                )));
            }
            if seen.iter().any(|n| n.eq_ignore_ascii_case(&name)) {
                return Err(MotionError::format(format!(
                    "bone {name:?} belongs to more than one part"
                )));
            }
            bone.name = Some(name.clone());
            seen.push(name);
        }
    }
    if let Some(missing) = bone_names
        .iter()
        .find(|name| !seen.iter().any(|n| n.eq_ignore_ascii_case(name)))
    {
        return Err(MotionError::format(format!("bone {missing:?} belongs to no part")));
    }
    Ok(parts)
}

/// Combine new motions and partitions with an optional existing file
///
/// `bone_names` is the track order of `new_motions`. When `new_parts` is
/// empty, or partitions are not exported, a single "default" partition
/// covering every bone is used. Otherwise each bone must belong to exactly
/// one of `new_parts`, and tracks are reordered to the partitions' order.
pub fn export_omf<S: AsRef<str>>(
    new_motions: Vec<OmfMotion>,
    new_parts: Vec<BonePart>,
    bone_names: &[S],
    existing: Option<&OmfFile>,
    options: &ExportOptions,
    report: &mut Report,
) -> Result<OmfFile> {
    let bone_names: Vec<String> = bone_names.iter().map(|n| n.as_ref().to_owned()).collect();
    for entry in &new_motions {
        if entry.motion.tracks.len() != bone_names.len() {
            return Err(MotionError::format(format!(
                "motion {:?} has {} tracks for {} bones",
                entry.motion.name,
                entry.motion.tracks.len(),
                bone_names.len()
            )));
        }
    }

    let fresh_parts = || -> Result<Vec<BonePart>> {
        if new_parts.is_empty() || !options.bone_parts {
            return Ok(MotionParams::default_parts(&bone_names));
        }
        resolve_partition(new_parts.clone(), &bone_names)
    };
    let track_order = |parts: &[BonePart]| {
        MotionParams {
            version: options.params_version,
            parts: parts.to_vec(),
            defs: Vec::new(),
        }
        .bone_names()
    };
    let reorder = |entry: OmfMotion, from: &[String], to: &[String]| -> Result<OmfMotion> {
        Ok(OmfMotion {
            motion: reorder_tracks(entry.motion, from, to)?,
            def: entry.def,
        })
    };

    let existing = existing.filter(|_| options.export_mode != ExportMode::Overwrite);
    let (parts, motions) = match existing {
        None => {
            let parts = fresh_parts()?;
            let target = track_order(&parts);
            let motions = if options.motions {
                new_motions
                    .into_iter()
                    .map(|entry| reorder(entry, &bone_names, &target))
                    .collect::<Result<Vec<_>>>()?
            } else {
                Vec::new()
            };
            (parts, motions)
        }
        Some(existing) => {
            if existing.bone_count() != bone_names.len() {
                return Err(MotionError::format(format!(
                    "existing file has {} bones, the skeleton has {}",
                    existing.bone_count(),
                    bone_names.len()
                )));
            }
            let parts = if options.bone_parts {
                fresh_parts()?
            } else {
                existing.parts.clone()
            };
            let target = track_order(&parts);
            let existing_names = existing.bone_names();

            let mut motions = existing
                .motions
                .iter()
                .cloned()
                .map(|entry| reorder(entry, &existing_names, &target))
                .collect::<Result<Vec<_>>>()?;

            if options.motions {
                for entry in new_motions {
                    let entry = reorder(entry, &bone_names, &target)?;
                    let slot = motions.iter().position(|m| m.name() == entry.name());
                    match (options.export_mode, slot) {
                        (ExportMode::Replace, Some(index)) => {
                            log::debug!("replacing motion {:?}", entry.name());
                            motions[index] = entry;
                        }
                        (_, Some(_)) => {
                            report.push(MotionError::DuplicateMotion(entry.name().to_owned()));
                        }
                        (_, None) => motions.push(entry),
                    }
                }
            }
            (parts, motions)
        }
    };

    Ok(OmfFile {
        params_version: options.params_version,
        parts,
        motions,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::params::BoneRef;
    use pretty_assertions::assert_eq;

    /// Three-bone chain: root -> (helper, not exported) -> hand
    pub(crate) struct Chain {
        pub frames: i32,
    }

    impl PoseSource for Chain {
        fn bone_count(&self) -> usize {
            3
        }

        fn bone_name(&self, bone: usize) -> &str {
            ["root", "helper", "hand"][bone]
        }

        fn is_exportable(&self, bone: usize) -> bool {
            bone != 1
        }

        fn parent(&self, bone: usize) -> Option<usize> {
            bone.checked_sub(1)
        }

        fn world_transform(&self, bone: usize, frame: i32) -> Mat4 {
            let t = frame as f32 / self.frames.max(1) as f32;
            match bone {
                0 => Mat4::from_translation(Vec3::new(t, 0.0, 0.0)),
                1 => Mat4::from_translation(Vec3::new(t, 0.0, 1.0)),
                _ => {
                    Mat4::from_translation(Vec3::new(t, 0.0, 2.0))
                        * Mat4::from_quat(Quat::from_rotation_z(t))
                }
            }
        }
    }

    #[test]
    fn test_effective_parents() {
        let bones = exportable_bones(&Chain { frames: 10 });
        assert_eq!(bones, vec![(0, None), (2, Some(0))]);
        assert_eq!(exportable_bone_names(&Chain { frames: 10 }), vec!["root", "hand"]);
    }

    #[test]
    fn test_export_motion() {
        let motion = export_motion(&Chain { frames: 10 }, "reach", 0..=10, true).unwrap();
        assert_eq!(motion.length, 11);
        assert_eq!(motion.tracks.len(), 2);

        // Root slides along host X, never rotates
        let root = &motion.tracks[0];
        assert!(root.rotation.is_constant());
        let (_, end) = root.sample(10);
        assert!((end - Vec3::new(1.0, 0.0, 0.0)).length() < 1e-3);

        // Hand sits two units above root on host Z, engine Y
        let hand = &motion.tracks[1];
        let (rotation, position) = hand.sample(10);
        assert!((position - Vec3::new(0.0, 2.0, 0.0)).length() < 1e-4);
        let expected = coordinate::swap_rotation(Quat::from_rotation_z(1.0));
        assert!(rotation.abs_diff_eq(expected, 1e-3));
    }

    #[test]
    fn test_empty_frame_range() {
        #[allow(clippy::reversed_empty_ranges)]
        let result = export_motion(&Chain { frames: 10 }, "none", 5..=2, false);
        assert!(matches!(result, Err(MotionError::Format(_))));
    }

    fn entry(name: &str, bones: usize, value: f32) -> OmfMotion {
        OmfMotion::new(Motion {
            name: name.into(),
            length: 2,
            tracks: (0..bones)
                .map(|_| {
                    BoneTrack::from_samples(
                        &[Quat::IDENTITY; 2],
                        &[Vec3::ZERO, Vec3::splat(value)],
                        false,
                    )
                })
                .collect(),
        })
    }

    fn existing() -> OmfFile {
        OmfFile {
            params_version: 4,
            parts: MotionParams::default_parts(&["root", "hand"]),
            motions: vec![entry("idle", 2, 1.0), entry("walk", 2, 2.0)],
        }
    }

    fn names(file: &OmfFile) -> Vec<&str> {
        file.motions.iter().map(OmfMotion::name).collect()
    }

    #[test]
    fn test_overwrite_ignores_existing() {
        let existing = existing();
        let mut report = Report::new();
        let options = ExportOptions {
            bone_parts: false,
            ..ExportOptions::default()
        };
        let out = export_omf(
            vec![entry("run", 2, 3.0)],
            Vec::new(),
            &["root", "hand"],
            Some(&existing),
            &options,
            &mut report,
        )
        .unwrap();
        assert_eq!(names(&out), vec!["run"]);
        assert_eq!(out.parts[0].name, "default");
        assert_eq!(out.parts[0].bones[1], BoneRef::new("hand", 1));
    }

    #[test]
    fn test_add_skips_existing_names() {
        let existing = existing();
        let mut report = Report::new();
        let options = ExportOptions {
            export_mode: ExportMode::Add,
            ..ExportOptions::default()
        };
        let out = export_omf(
            vec![entry("walk", 2, 9.0), entry("run", 2, 3.0)],
            Vec::new(),
            &["root", "hand"],
            Some(&existing),
            &options,
            &mut report,
        )
        .unwrap();
        assert_eq!(names(&out), vec!["idle", "walk", "run"]);
        assert_eq!(out.motions[1], existing.motions[1]);
        assert!(matches!(report.warnings()[0], MotionError::DuplicateMotion(_)));
    }

    #[test]
    fn test_replace_in_place() {
        let existing = existing();
        let mut report = Report::new();
        let options = ExportOptions {
            export_mode: ExportMode::Replace,
            ..ExportOptions::default()
        };
        let replacement = entry("walk", 2, 9.0);
        let out = export_omf(
            vec![replacement.clone(), entry("run", 2, 3.0)],
            Vec::new(),
            &["root", "hand"],
            Some(&existing),
            &options,
            &mut report,
        )
        .unwrap();
        assert_eq!(names(&out), vec!["idle", "walk", "run"]);
        assert_eq!(out.motions[1], replacement);
        assert!(report.is_empty());
    }

    #[test]
    fn test_keep_existing_motions_and_parts() {
        let mut existing = existing();
        existing.parts = vec![
            BonePart {
                name: "upper".into(),
                bones: vec![BoneRef::new("hand", 1)],
            },
            BonePart {
                name: "lower".into(),
                bones: vec![BoneRef::new("root", 0)],
            },
        ];
        let mut report = Report::new();
        let options = ExportOptions {
            export_mode: ExportMode::Add,
            motions: false,
            bone_parts: false,
            ..ExportOptions::default()
        };
        let out = export_omf(
            vec![entry("run", 2, 3.0)],
            MotionParams::default_parts(&["root", "hand"]),
            &["root", "hand"],
            Some(&existing),
            &options,
            &mut report,
        )
        .unwrap();
        assert_eq!(names(&out), vec!["idle", "walk"]);
        assert_eq!(out.parts, existing.parts);
    }

    #[test]
    fn test_new_motions_follow_kept_bone_order() {
        let mut existing = existing();
        existing.parts = vec![BonePart {
            name: "body".into(),
            bones: vec![BoneRef::new("hand", 0), BoneRef::new("root", 1)],
        }];
        let mut new = entry("run", 2, 0.0);
        new.motion.tracks[0] = BoneTrack::from_samples(&[Quat::IDENTITY; 2], &[Vec3::X; 2], false);

        let mut report = Report::new();
        let options = ExportOptions {
            export_mode: ExportMode::Add,
            bone_parts: false,
            ..ExportOptions::default()
        };
        let out = export_omf(
            vec![new],
            Vec::new(),
            &["root", "hand"],
            Some(&existing),
            &options,
            &mut report,
        )
        .unwrap();
        // "root" moved to the second track
        let run = &out.motions[2].motion;
        assert_eq!(run.tracks[1].sample(0).1, Vec3::X);
    }

    fn export_parts(parts: Vec<BonePart>) -> Result<OmfFile> {
        let mut report = Report::new();
        export_omf(
            vec![entry("run", 2, 1.0)],
            parts,
            &["root", "hand"],
            None,
            &ExportOptions::default(),
            &mut report,
        )
    }

    #[test]
    fn test_bone_in_two_parts() {
        let result = export_parts(vec![
            BonePart {
                name: "a".into(),
                bones: vec![BoneRef::new("root", 0)],
            },
            BonePart {
                name: "b".into(),
                bones: vec![BoneRef::new("root", 0)],
            },
        ]);
        assert!(matches!(result, Err(MotionError::Format(_))));
    }

    #[test]
    fn test_bone_in_no_part() {
        let result = export_parts(vec![BonePart {
            name: "a".into(),
            bones: vec![BoneRef::new("root", 0)],
        }]);
        assert!(matches!(result, Err(MotionError::Format(_))));

        let result = export_parts(vec![BonePart {
            name: "a".into(),
            bones: vec![BoneRef::new("root", 0), BoneRef::new("foot", 1)],
        }]);
        assert!(matches!(result, Err(MotionError::Format(_))));
    }

    #[test]
    fn test_overwrite_follows_new_bone_order() {
        let mut new = entry("run", 2, 0.0);
        new.motion.tracks[0] = BoneTrack::from_samples(&[Quat::IDENTITY; 2], &[Vec3::X; 2], false);
        let out = export_parts(vec![
            BonePart {
                name: "upper".into(),
                bones: vec![BoneRef::new("hand", 0)],
            },
            BonePart {
                name: "lower".into(),
                bones: vec![BoneRef::new("root", 1)],
            },
        ]);
        let out = out.unwrap();
        assert_eq!(out.bone_names(), vec!["hand", "root"]);
        // "root" moved to the second track
        assert_eq!(out.motions[0].motion.tracks[1].sample(0).1, Vec3::X);
    }

    #[test]
    fn test_index_only_refs_take_skeleton_names() {
        let out = export_parts(vec![BonePart {
            name: "body".into(),
            bones: vec![
                BoneRef {
                    name: None,
                    index: Some(0),
                },
                BoneRef {
                    name: None,
                    index: Some(1),
                },
            ],
        }])
        .unwrap();
        assert_eq!(out.bone_names(), vec!["root", "hand"]);
    }

    #[test]
    fn test_bone_count_mismatch() {
        let existing = existing();
        let mut report = Report::new();
        let options = ExportOptions {
            export_mode: ExportMode::Replace,
            ..ExportOptions::default()
        };
        let result = export_omf(
            vec![entry("run", 3, 1.0)],
            Vec::new(),
            &["root", "hand", "head"],
            Some(&existing),
            &options,
            &mut report,
        );
        assert!(matches!(result, Err(MotionError::Format(_))));
    }
}
