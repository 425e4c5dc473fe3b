//! Bone partitions and motion definitions
//!
//! The parameter record lives in its own chunk of an OMF file:
//!
//! ```text
//! version         u16          1..=4
//! part count      u16
//! per part:
//!   name          stringZ
//!   bone count    u16
//!   per bone:     v1: u32 index | v2: stringZ name | v3, v4: stringZ name + u32 index
//! def count       u16
//! per def:
//!   name          stringZ
//!   flags         u32          MotionFlags
//!   bone_or_part  u16
//!   motion_id     u16
//!   speed, power, accrue, falloff: f32
//!   v4 only:      u32 mark count, marks
//! ```
//!
//! A mark is a linefeed-terminated name, a `u32` interval count and that many
//! `(f32, f32)` pairs.

use std::ops::Range;

use xray_data::{PackedReader, PackedWriter};

use crate::error::{MotionError, Result};
use crate::flags::MotionFlags;

/// Oldest supported parameter version
pub const MIN_PARAMS_VERSION: u16 = 1;

/// Newest parameter version, the one written by default
pub const PARAMS_VERSION: u16 = 4;

/// Parameter version that introduced marks
pub const MARKS_VERSION: u16 = 4;

/// Reference from a partition to a skeleton bone
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct BoneRef {
    /// Bone name; authoritative when present
    pub name: Option<String>,
    /// Bone index in the skeleton
    pub index: Option<u32>,
}

impl BoneRef {
    pub fn new(name: impl Into<String>, index: u32) -> Self {
        Self {
            name: Some(name.into()),
            index: Some(index),
        }
    }

    fn read(reader: &mut PackedReader<'_>, version: u16) -> Result<Self> {
        Ok(match version {
            1 => Self {
                name: None,
                index: Some(reader.u32()?),
            },
            2 => Self {
                name: Some(reader.string_z()?),
                index: None,
            },
            _ => Self {
                name: Some(reader.string_z()?),
                index: Some(reader.u32()?),
            },
        })
    }

    fn write(&self, writer: &mut PackedWriter, version: u16) -> Result<()> {
        let name = || {
            self.name.as_deref().ok_or_else(|| {
                MotionError::format(format!(
                    "bone {:?} has no name, required by parameter version {version}",
                    self.index
                ))
            })
        };
        let index = || {
            self.index.ok_or_else(|| {
                MotionError::format(format!(
                    "bone {:?} has no index, required by parameter version {version}",
                    self.name
                ))
            })
        };
        match version {
            1 => {
                writer.u32(index()?);
            }
            2 => {
                writer.string_z(name()?)?;
            }
            _ => {
                writer.string_z(name()?)?.u32(index()?);
            }
        }
        Ok(())
    }
}

/// Named group of bones
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct BonePart {
    pub name: String,
    pub bones: Vec<BoneRef>,
}

/// Named time intervals attached to a motion
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct MotionMark {
    pub name: String,
    pub intervals: Vec<(f32, f32)>,
}

impl MotionMark {
    pub(crate) fn read(reader: &mut PackedReader<'_>) -> Result<Self> {
        let name = reader.string_lf()?;
        let count = reader.u32()? as usize;
        let raw = reader.read_array::<f32>(count.saturating_mul(2))?;
        Ok(Self {
            name,
            intervals: raw.chunks_exact(2).map(|pair| (pair[0], pair[1])).collect(),
        })
    }

    pub(crate) fn write(&self, writer: &mut PackedWriter) -> Result<()> {
        writer
            .string_lf(&self.name)?
            .u32(len_u32(self.intervals.len(), "mark intervals")?);
        for &(start, end) in &self.intervals {
            writer.f32(start).f32(end);
        }
        Ok(())
    }

    pub(crate) fn read_list(reader: &mut PackedReader<'_>) -> Result<Vec<Self>> {
        let count = reader.u32()?;
        (0..count).map(|_| Self::read(reader)).collect()
    }

    pub(crate) fn write_list(marks: &[Self], writer: &mut PackedWriter) -> Result<()> {
        writer.u32(len_u32(marks.len(), "marks")?);
        for mark in marks {
            mark.write(writer)?;
        }
        Ok(())
    }
}

/// Playback parameters of one motion
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct MotionDef {
    pub name: String,
    pub flags: MotionFlags,
    /// Bone index for FX motions, partition index otherwise
    pub bone_or_part: u16,
    /// Index of the motion chunk this definition describes
    pub motion_id: u16,
    pub speed: f32,
    pub power: f32,
    pub accrue: f32,
    pub falloff: f32,
    /// Only stored by version 4 records
    pub marks: Vec<MotionMark>,
}

impl MotionDef {
    /// Definition with the engine's default playback parameters
    pub fn new(name: impl Into<String>, motion_id: u16) -> Self {
        Self {
            name: name.into(),
            flags: MotionFlags::empty(),
            bone_or_part: 0,
            motion_id,
            speed: 1.0,
            power: 1.0,
            accrue: 2.0,
            falloff: 2.0,
            marks: Vec::new(),
        }
    }

    fn read(reader: &mut PackedReader<'_>, version: u16) -> Result<Self> {
        let name = reader.string_z()?;
        let flags = MotionFlags::from_bits_retain(reader.u32()?);
        let bone_or_part = reader.u16()?;
        let motion_id = reader.u16()?;
        let speed = reader.f32()?;
        let power = reader.f32()?;
        let accrue = reader.f32()?;
        let falloff = reader.f32()?;
        let marks = if version >= MARKS_VERSION {
            MotionMark::read_list(reader)?
        } else {
            Vec::new()
        };
        Ok(Self {
            name,
            flags,
            bone_or_part,
            motion_id,
            speed,
            power,
            accrue,
            falloff,
            marks,
        })
    }

    fn write(&self, writer: &mut PackedWriter, version: u16) -> Result<()> {
        writer
            .string_z(&self.name)?
            .u32(self.flags.bits())
            .u16(self.bone_or_part)
            .u16(self.motion_id)
            .f32(self.speed)
            .f32(self.power)
            .f32(self.accrue)
            .f32(self.falloff);
        if version >= MARKS_VERSION {
            MotionMark::write_list(&self.marks, writer)?;
        } else if !self.marks.is_empty() {
            log::warn!(
                "motion {:?}: {} marks dropped, parameter version {version} cannot store them",
                self.name,
                self.marks.len()
            );
        }
        Ok(())
    }
}

/// Byte layout of one motion definition inside a parameter payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefSpan {
    pub name: String,
    /// Whole definition
    pub range: Range<usize>,
    /// Offset of the 2-byte `motion_id` field
    pub motion_id_offset: usize,
    pub motion_id: u16,
}

/// Byte layout of a parameter payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamsLayout {
    /// Version and partition table, up to the definition count
    pub header: Range<usize>,
    pub defs: Vec<DefSpan>,
}

/// Parameter record of an OMF file
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct MotionParams {
    pub version: u16,
    pub parts: Vec<BonePart>,
    pub defs: Vec<MotionDef>,
}

impl Default for MotionParams {
    fn default() -> Self {
        Self {
            version: PARAMS_VERSION,
            parts: Vec::new(),
            defs: Vec::new(),
        }
    }
}

fn check_version(version: u16) -> Result<()> {
    if (MIN_PARAMS_VERSION..=PARAMS_VERSION).contains(&version) {
        Ok(())
    } else {
        Err(MotionError::VersionUnsupported {
            record: "motion parameters",
            version: u32::from(version),
        })
    }
}

fn len_u16(len: usize, what: &str) -> Result<u16> {
    u16::try_from(len).map_err(|_| MotionError::format(format!("{len} {what} do not fit a u16 count")))
}

fn len_u32(len: usize, what: &str) -> Result<u32> {
    u32::try_from(len).map_err(|_| MotionError::format(format!("{len} {what} do not fit a u32 count")))
}

impl MotionParams {
    /// Decode a parameter payload
    pub fn read(data: &[u8]) -> Result<Self> {
        Self::read_with_layout(data).map(|(params, _)| params)
    }

    /// Decode a parameter payload and record where each part of it lives
    pub fn read_with_layout(data: &[u8]) -> Result<(Self, ParamsLayout)> {
        let mut reader = PackedReader::new(data);
        let version = reader.u16()?;
        check_version(version)?;

        let part_count = reader.u16()?;
        let mut parts = Vec::with_capacity(usize::from(part_count));
        for _ in 0..part_count {
            let name = reader.string_z()?;
            let bone_count = reader.u16()?;
            let bones = (0..bone_count)
                .map(|_| BoneRef::read(&mut reader, version))
                .collect::<Result<Vec<_>>>()?;
            parts.push(BonePart { name, bones });
        }
        let header = 0..reader.position();

        let def_count = reader.u16()?;
        let mut defs = Vec::with_capacity(usize::from(def_count));
        let mut spans = Vec::with_capacity(usize::from(def_count));
        for _ in 0..def_count {
            let start = reader.position();
            let def = MotionDef::read(&mut reader, version)?;
            // name, NUL, u32 flags, u16 bone_or_part
            let name_len = data[start..]
                .iter()
                .position(|&b| b == 0)
                .unwrap_or_default();
            spans.push(DefSpan {
                name: def.name.clone(),
                range: start..reader.position(),
                motion_id_offset: start + name_len + 1 + 4 + 2,
                motion_id: def.motion_id,
            });
            defs.push(def);
        }
        log::debug!(
            "motion parameters v{version}: {} parts, {} definitions",
            parts.len(),
            defs.len()
        );

        Ok((
            Self {
                version,
                parts,
                defs,
            },
            ParamsLayout {
                header,
                defs: spans,
            },
        ))
    }

    /// Encode with `self.version`
    pub fn write(&self, writer: &mut PackedWriter) -> Result<()> {
        check_version(self.version)?;
        writer
            .u16(self.version)
            .u16(len_u16(self.parts.len(), "bone parts")?);
        for part in &self.parts {
            writer
                .string_z(&part.name)?
                .u16(len_u16(part.bones.len(), "bones")?);
            for bone in &part.bones {
                bone.write(writer, self.version)?;
            }
        }
        writer.u16(len_u16(self.defs.len(), "motion definitions")?);
        for def in &self.defs {
            def.write(writer, self.version)?;
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = PackedWriter::new();
        self.write(&mut writer)?;
        Ok(writer.into_bytes())
    }

    /// Total number of bones over every partition
    pub fn bone_count(&self) -> usize {
        self.parts.iter().map(|part| part.bones.len()).sum()
    }

    /// Bones in track order
    ///
    /// Tracks follow skeleton order: by index when the version stores
    /// indices, by order of appearance otherwise.
    pub fn track_bones(&self) -> Vec<&BoneRef> {
        let mut bones: Vec<&BoneRef> = self.parts.iter().flat_map(|p| p.bones.iter()).collect();
        if bones.iter().all(|bone| bone.index.is_some()) {
            bones.sort_by_key(|bone| bone.index);
        }
        bones
    }

    /// Bone names in track order; bones stored by index only are named
    /// after their index
    pub fn bone_names(&self) -> Vec<String> {
        self.track_bones()
            .into_iter()
            .enumerate()
            .map(|(track, bone)| match (&bone.name, bone.index) {
                (Some(name), _) => name.clone(),
                (None, Some(index)) => format!("bone_{index}"),
                (None, None) => format!("bone_{track}"),
            })
            .collect()
    }

    /// Index of the partition holding `bone`
    pub fn part_of(&self, bone: &str) -> Option<usize> {
        self.parts.iter().position(|part| {
            part.bones
                .iter()
                .any(|b| b.name.as_deref().is_some_and(|n| n.eq_ignore_ascii_case(bone)))
        })
    }

    /// One partition named "default" covering `bone_names` in order
    pub fn default_parts<S: AsRef<str>>(bone_names: &[S]) -> Vec<BonePart> {
        vec![BonePart {
            name: "default".to_owned(),
            bones: bone_names
                .iter()
                .enumerate()
                .map(|(index, name)| BoneRef::new(name.as_ref(), index as u32))
                .collect(),
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn params(version: u16) -> MotionParams {
        let mut def = MotionDef::new("idle", 0);
        def.flags = MotionFlags::IDLE | MotionFlags::STOP_AT_END;
        def.bone_or_part = 1;
        if version >= MARKS_VERSION {
            def.marks.push(MotionMark {
                name: "step".into(),
                intervals: vec![(0.1, 0.2), (0.6, 0.7)],
            });
        }
        MotionParams {
            version,
            parts: vec![
                BonePart {
                    name: "legs".into(),
                    bones: vec![BoneRef::new("foot", 2), BoneRef::new("root", 0)],
                },
                BonePart {
                    name: "torso".into(),
                    bones: vec![BoneRef::new("spine", 1)],
                },
            ],
            defs: vec![def, MotionDef::new("run", 1)],
        }
        .normalized()
    }

    impl MotionParams {
        /// Drop the bone fields `version` does not store
        fn normalized(mut self) -> Self {
            for bone in self.parts.iter_mut().flat_map(|p| p.bones.iter_mut()) {
                match self.version {
                    1 => bone.name = None,
                    2 => bone.index = None,
                    _ => {}
                }
            }
            self
        }
    }

    #[test]
    fn test_version_one_body_partition() {
        let params = MotionParams {
            version: 1,
            parts: vec![BonePart {
                name: "body".into(),
                bones: (0..3)
                    .map(|index| BoneRef {
                        name: None,
                        index: Some(index),
                    })
                    .collect(),
            }],
            defs: Vec::new(),
        };
        let bytes = params.to_bytes().unwrap();
        let decoded = MotionParams::read(&bytes).unwrap();
        assert_eq!(decoded.parts[0].name, "body");
        assert_eq!(decoded.parts[0].bones.len(), 3);
        assert_eq!(decoded, params);
    }

    #[test_case(1 ; "index only")]
    #[test_case(2 ; "name only")]
    #[test_case(3 ; "name and index")]
    #[test_case(4 ; "with marks")]
    fn test_versions(version: u16) {
        let params = params(version);
        let bytes = params.to_bytes().unwrap();
        assert_eq!(MotionParams::read(&bytes).unwrap(), params);
    }

    #[test]
    fn test_mark_names_are_line_terminated() {
        let bytes = params(4).to_bytes().unwrap();
        let needle = b"step\n";
        assert!(bytes.windows(needle.len()).any(|w| w == needle));
    }

    #[test_case(0 ; "zero")]
    #[test_case(5 ; "newer")]
    fn test_unsupported_version(version: u16) {
        let data = version.to_le_bytes();
        assert!(matches!(
            MotionParams::read(&data),
            Err(MotionError::VersionUnsupported { .. })
        ));
    }

    #[test]
    fn test_layout_points_at_motion_ids() {
        let bytes = params(3).to_bytes().unwrap();
        let (decoded, layout) = MotionParams::read_with_layout(&bytes).unwrap();
        assert_eq!(layout.defs.len(), 2);
        assert_eq!(layout.header.end + 2, layout.defs[0].range.start);
        assert_eq!(layout.defs[0].range.end, layout.defs[1].range.start);
        assert_eq!(layout.defs[1].range.end, bytes.len());
        for (span, def) in layout.defs.iter().zip(&decoded.defs) {
            let field = &bytes[span.motion_id_offset..span.motion_id_offset + 2];
            assert_eq!(u16::from_le_bytes([field[0], field[1]]), def.motion_id);
        }
    }

    #[test]
    fn test_track_order() {
        let params = params(3);
        assert_eq!(params.bone_count(), 3);
        assert_eq!(params.bone_names(), vec!["root", "spine", "foot"]);
        assert_eq!(params.part_of("SPINE"), Some(1));

        // Name-only records keep order of appearance
        let params = self::params(2);
        assert_eq!(params.bone_names(), vec!["foot", "root", "spine"]);
    }

    #[test]
    fn test_writer_needs_fields_of_version() {
        let mut params = params(2);
        params.version = 3;
        assert!(matches!(params.to_bytes(), Err(MotionError::Format(_))));
    }
}
