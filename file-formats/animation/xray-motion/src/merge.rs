//! Merging OMF files without decoding their tracks
//!
//! Motion records are copied as raw bytes. Only the motion chunk ids and the
//! 2-byte `motion_id` field of each copied definition are rewritten, so
//! merging thousands of motions costs one scan per file.

use std::borrow::Cow;
use std::collections::HashSet;

use xray_data::{ChunkedWriter, find_chunk};

use crate::error::{MotionError, Report, Result};
use crate::motion::Motion;
use crate::omf::{CHUNK_MOTIONS, CHUNK_PARAMS};
use crate::params::{BonePart, BoneRef, MARKS_VERSION, MotionParams, ParamsLayout};

/// Result of a merge
#[derive(Debug)]
pub struct MergeOutput {
    /// Encoded OMF file
    pub data: Vec<u8>,
    /// Number of motions in the output
    pub motions: usize,
    /// Duplicates and partition mismatches
    pub report: Report,
}

/// One motion record of an input file
struct IndexedMotion<'a> {
    name: String,
    payload: Cow<'a, [u8]>,
}

/// Everything merge needs from one input file
struct IndexedFile<'a> {
    data: &'a [u8],
    params: MotionParams,
    layout: ParamsLayout,
    /// Payload of the parameter chunk
    params_payload: Cow<'a, [u8]>,
    motions: Vec<IndexedMotion<'a>>,
}

/// Motion records of a motions chunk payload, borrowing from it
fn index_motions(inner: &[u8]) -> Result<Vec<IndexedMotion<'_>>> {
    let mut chunks = xray_data::read_chunks(inner);
    let count = chunks.next_expect(0)?.reader().u32()?;
    (0..count)
        .map(|id| {
            let chunk = chunks.next_expect(id + 1)?;
            Ok(IndexedMotion {
                name: Motion::peek_name(chunk.data())?,
                payload: chunk.data,
            })
        })
        .collect()
}

fn index_file(data: &[u8]) -> Result<IndexedFile<'_>> {
    let params_chunk = find_chunk(data, CHUNK_PARAMS)?
        .ok_or_else(|| MotionError::format("missing motion parameter chunk"))?;
    let (params, layout) = MotionParams::read_with_layout(params_chunk.data())?;

    let motions_chunk = find_chunk(data, CHUNK_MOTIONS)?
        .ok_or_else(|| MotionError::format("missing motions chunk"))?;
    let motions = match motions_chunk.data {
        Cow::Borrowed(inner) => index_motions(inner)?,
        // A compressed motions chunk was inflated into a temporary buffer
        Cow::Owned(inner) => index_motions(&inner)?
            .into_iter()
            .map(|motion| IndexedMotion {
                name: motion.name,
                payload: Cow::Owned(motion.payload.into_owned()),
            })
            .collect(),
    };

    Ok(IndexedFile {
        data,
        params,
        layout,
        params_payload: params_chunk.data,
        motions,
    })
}

/// Key identifying a bone across files: its name, or its index for legacy refs
fn bone_key(bone: &BoneRef) -> String {
    match (&bone.name, bone.index) {
        (Some(name), _) => name.to_ascii_lowercase(),
        (None, Some(index)) => format!("#{index}"),
        (None, None) => String::new(),
    }
}

/// Check that `other` partitions the same bones as `first`
///
/// Tracks are copied verbatim, so a different bone count or bone set would
/// leave motions whose tracks no longer match the output's bone table. Only
/// renamed parts and reordered bones are tolerated.
fn compare_parts(first: &[BonePart], other: &[BonePart], file: usize, report: &mut Report) -> Result<()> {
    if first.len() != other.len() {
        return Err(MotionError::format(format!(
            "file {file} has {} bone parts, the first file has {}",
            other.len(),
            first.len()
        )));
    }
    for (index, (a, b)) in first.iter().zip(other).enumerate() {
        if a.name != b.name {
            report.push(MotionError::PartitionMismatch(format!(
                "file {file}: part {index} is {:?}, expected {:?}",
                b.name, a.name
            )));
        }
        if a.bones.len() != b.bones.len() {
            return Err(MotionError::format(format!(
                "file {file}: part {:?} has {} bones, the first file has {}",
                a.name,
                b.bones.len(),
                a.bones.len()
            )));
        }
        let keys = |part: &BonePart| -> Vec<String> { part.bones.iter().map(bone_key).collect() };
        let (ordered_a, ordered_b) = (keys(a), keys(b));
        let (mut sorted_a, mut sorted_b) = (ordered_a.clone(), ordered_b.clone());
        sorted_a.sort_unstable();
        sorted_b.sort_unstable();
        if sorted_a != sorted_b {
            return Err(MotionError::format(format!(
                "file {file}: bones of part {:?} differ from the first file",
                a.name
            )));
        }
        if ordered_a != ordered_b {
            report.push(MotionError::PartitionMismatch(format!(
                "file {file}: bones of part {:?} are in a different order",
                a.name
            )));
        }
    }
    Ok(())
}

/// Merge encoded OMF files into one
///
/// The first file supplies the bone partitions and parameter version. A
/// motion whose name was already taken by an earlier one is dropped with a
/// warning. Surviving motions are renumbered in order.
pub fn merge_omf(files: &[&[u8]]) -> Result<MergeOutput> {
    let mut report = Report::new();
    let indexed = files
        .iter()
        .map(|data| index_file(data))
        .collect::<Result<Vec<_>>>()?;
    let Some(first) = indexed.first() else {
        return Err(MotionError::format("nothing to merge"));
    };
    let target_version = first.params.version;

    for (file, other) in indexed.iter().enumerate().skip(1) {
        compare_parts(&first.params.parts, &other.params.parts, file, &mut report)?;
        if other.params.version >= MARKS_VERSION && target_version < MARKS_VERSION {
            return Err(MotionError::format(format!(
                "file {file} stores marks (version {}), the first file is version {target_version}",
                other.params.version
            )));
        }
    }

    let mut seen = HashSet::new();
    let mut motions = ChunkedWriter::new();
    let mut entries: Vec<u8> = Vec::new();
    let mut entry_count: u16 = 0;
    let mut next_id: u32 = 0;

    for (file, input) in indexed.iter().enumerate() {
        for (old_id, motion) in input.motions.iter().enumerate() {
            if !seen.insert(motion.name.to_ascii_lowercase()) {
                report.push(MotionError::DuplicateMotion(format!(
                    "{:?} in file {file}",
                    motion.name
                )));
                continue;
            }
            let new_id = u16::try_from(next_id).map_err(|_| {
                MotionError::format("merged motions do not fit 16-bit motion ids")
            })?;
            motions.put(next_id + 1, &motion.payload)?;
            next_id += 1;

            let spans = input
                .layout
                .defs
                .iter()
                .filter(|span| usize::from(span.motion_id) == old_id);
            for span in spans {
                let mut entry = input.params_payload[span.range.clone()].to_vec();
                let field = span.motion_id_offset - span.range.start;
                entry[field..field + 2].copy_from_slice(&new_id.to_le_bytes());
                if input.params.version < MARKS_VERSION && target_version >= MARKS_VERSION {
                    entry.extend_from_slice(&0u32.to_le_bytes());
                }
                entries.extend_from_slice(&entry);
                entry_count = entry_count.checked_add(1).ok_or_else(|| {
                    MotionError::format("merged definitions do not fit a 16-bit count")
                })?;
            }
        }

        let known = input.motions.len();
        for span in input.layout.defs.iter().filter(|s| usize::from(s.motion_id) >= known) {
            report.push(MotionError::missing(format!(
                "file {file}: definition {:?} refers to motion {}, skipped",
                span.name, span.motion_id
            )));
        }
        log::debug!("merged file {file}: {} bytes", input.data.len());
    }

    let mut motions_chunk = ChunkedWriter::new();
    motions_chunk.put(0, &next_id.to_le_bytes())?;
    let mut body = motions_chunk.into_bytes();
    body.extend_from_slice(motions.as_bytes());

    let mut params = first.params_payload[first.layout.header.clone()].to_vec();
    params.extend_from_slice(&entry_count.to_le_bytes());
    params.extend_from_slice(&entries);

    let mut out = ChunkedWriter::new();
    out.put(CHUNK_MOTIONS, &body)?;
    out.put(CHUNK_PARAMS, &params)?;

    Ok(MergeOutput {
        data: out.into_bytes(),
        motions: next_id as usize,
        report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::BoneTrack;
    use crate::omf::{OmfFile, OmfMotion};
    use glam::{Quat, Vec3};
    use pretty_assertions::assert_eq;

    fn motion(name: &str, frames: u32) -> OmfMotion {
        let rotations: Vec<Quat> = (0..frames)
            .map(|f| Quat::from_rotation_z(f as f32 * 0.2))
            .collect();
        let positions = vec![Vec3::new(0.0, 1.0, 0.0); frames as usize];
        OmfMotion::new(Motion {
            name: name.into(),
            length: frames,
            tracks: vec![
                BoneTrack::from_samples(&rotations, &positions, false),
                BoneTrack::from_samples(&rotations, &positions, true),
            ],
        })
    }

    fn omf(version: u16, names: &[&str]) -> Vec<u8> {
        OmfFile {
            params_version: version,
            parts: vec![BonePart {
                name: "default".into(),
                bones: vec![BoneRef::new("root", 0), BoneRef::new("spine", 1)],
            }],
            motions: names.iter().map(|name| motion(name, 4)).collect(),
        }
        .write()
        .unwrap()
    }

    fn decode(data: &[u8]) -> OmfFile {
        let mut report = Report::new();
        let file = OmfFile::read(data, &mut report).unwrap();
        assert!(report.is_empty());
        file
    }

    #[test]
    fn test_merge_renumbers() {
        let a = omf(4, &["idle", "walk"]);
        let b = omf(4, &["run", "jump", "crouch"]);
        let merged = merge_omf(&[&a, &b]).unwrap();
        assert_eq!(merged.motions, 5);
        assert!(merged.report.is_empty());

        let file = decode(&merged.data);
        let names: Vec<&str> = file.motions.iter().map(|m| m.name()).collect();
        assert_eq!(names, vec!["idle", "walk", "run", "jump", "crouch"]);
        for (id, entry) in file.motions.iter().enumerate() {
            assert_eq!(usize::from(entry.def.motion_id), id);
            assert_eq!(entry.motion.name, entry.def.name);
        }
    }

    #[test]
    fn test_self_merge_is_idempotent() {
        let a = omf(4, &["idle", "walk"]);
        let merged = merge_omf(&[&a, &a]).unwrap();
        assert_eq!(merged.motions, 2);
        assert_eq!(merged.report.len(), 2);
        assert!(
            merged
                .report
                .warnings()
                .iter()
                .all(|w| matches!(w, MotionError::DuplicateMotion(_)))
        );
        assert_eq!(decode(&merged.data), decode(&a));
    }

    #[test]
    fn test_single_file_is_reproduced() {
        let a = omf(4, &["idle", "walk"]);
        assert_eq!(merge_omf(&[&a]).unwrap().data, a);
    }

    #[test]
    fn test_old_definitions_gain_empty_marks() {
        let a = omf(4, &["idle"]);
        let b = omf(3, &["walk"]);
        let merged = merge_omf(&[&a, &b]).unwrap();
        let file = decode(&merged.data);
        assert_eq!(file.params_version, 4);
        assert_eq!(file.motions[1].name(), "walk");
        assert!(file.motions[1].def.marks.is_empty());
    }

    #[test]
    fn test_marks_do_not_fit_older_target() {
        let a = omf(3, &["idle"]);
        let b = omf(4, &["walk"]);
        assert!(matches!(merge_omf(&[&a, &b]), Err(MotionError::Format(_))));
    }

    #[test]
    fn test_partition_count_mismatch() {
        let a = omf(4, &["idle"]);
        let b = OmfFile {
            params_version: 4,
            parts: vec![
                BonePart {
                    name: "legs".into(),
                    bones: vec![BoneRef::new("root", 0)],
                },
                BonePart {
                    name: "torso".into(),
                    bones: vec![BoneRef::new("spine", 1)],
                },
            ],
            motions: vec![motion("walk", 2)],
        }
        .write()
        .unwrap();
        assert!(matches!(merge_omf(&[&a, &b]), Err(MotionError::Format(_))));
    }

    #[test]
    fn test_partition_name_mismatch_warns() {
        let a = omf(4, &["idle"]);
        let b = OmfFile {
            params_version: 4,
            parts: vec![BonePart {
                name: "body".into(),
                bones: vec![BoneRef::new("root", 0), BoneRef::new("spine", 1)],
            }],
            motions: vec![motion("walk", 2)],
        }
        .write()
        .unwrap();
        let merged = merge_omf(&[&a, &b]).unwrap();
        assert_eq!(merged.motions, 2);
        assert_eq!(merged.report.len(), 1);
        assert!(matches!(
            merged.report.warnings()[0],
            MotionError::PartitionMismatch(_)
        ));
    }

    fn omf_with_bones(bones: &[&str], name: &str) -> Vec<u8> {
        let rotations = vec![Quat::IDENTITY; 3];
        let positions = vec![Vec3::ZERO; 3];
        OmfFile {
            params_version: 4,
            parts: MotionParams::default_parts(bones),
            motions: vec![OmfMotion::new(Motion {
                name: name.into(),
                length: 3,
                tracks: bones
                    .iter()
                    .map(|_| BoneTrack::from_samples(&rotations, &positions, false))
                    .collect(),
            })],
        }
        .write()
        .unwrap()
    }

    #[test]
    fn test_bone_count_mismatch_is_fatal() {
        let a = omf_with_bones(&["root", "hand"], "a");
        let b = omf_with_bones(&["root", "hand", "foot"], "b");
        assert!(matches!(merge_omf(&[&a, &b]), Err(MotionError::Format(_))));
        assert!(matches!(merge_omf(&[&b, &a]), Err(MotionError::Format(_))));
    }

    #[test]
    fn test_bone_set_mismatch_is_fatal() {
        let a = omf_with_bones(&["root", "hand"], "a");
        let b = omf_with_bones(&["root", "foot"], "b");
        assert!(matches!(merge_omf(&[&a, &b]), Err(MotionError::Format(_))));
    }

    #[test]
    fn test_reordered_bones_warn() {
        let a = omf(4, &["idle"]);
        let b = OmfFile {
            params_version: 4,
            parts: vec![BonePart {
                name: "default".into(),
                bones: vec![BoneRef::new("spine", 1), BoneRef::new("root", 0)],
            }],
            motions: vec![motion("walk", 2)],
        }
        .write()
        .unwrap();
        let merged = merge_omf(&[&a, &b]).unwrap();
        assert_eq!(merged.motions, 2);
        assert_eq!(merged.report.len(), 1);
        assert!(matches!(
            merged.report.warnings()[0],
            MotionError::PartitionMismatch(_)
        ));
    }

    #[test]
    fn test_duplicates_ignore_case() {
        let a = omf(4, &["Idle", "walk"]);
        let b = omf(4, &["idle", "run"]);
        let merged = merge_omf(&[&a, &b]).unwrap();
        assert_eq!(merged.motions, 3);
        assert_eq!(merged.report.len(), 1);
        let names: Vec<String> = decode(&merged.data)
            .motions
            .iter()
            .map(|m| m.name().to_owned())
            .collect();
        assert_eq!(names, vec!["Idle", "walk", "run"]);
    }

    #[test]
    fn test_nothing_to_merge() {
        assert!(merge_omf(&[]).is_err());
    }
}
