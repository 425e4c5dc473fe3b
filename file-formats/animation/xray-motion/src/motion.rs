//! Engine motions and their quantized bone tracks
//!
//! Layout of one motion record:
//!
//! ```text
//! name            stringZ
//! length          u32          frame count
//! per bone:
//!   flags         u8           KeyFlags
//!   if R_ABSENT:  i16 x 4      constant rotation
//!   else:         u32 crc      CRC32 of the key bytes
//!                 i16 x 4 x length
//!   if T_PRESENT: u32 crc
//!                 (i8 | i16) x 3 x length
//!                 f32 x 3      size
//!                 f32 x 3      init
//!   else:         f32 x 3      constant translation
//! ```
//!
//! Rotation components decode as `raw / 32767`, translation axes as
//! `raw * size / Q + init` with `Q = 127`, or `32767` for high-quality
//! tracks.

use glam::{Quat, Vec3};
use xray_data::{PackedReader, PackedWriter};

use crate::error::{MotionError, Report, Result};
use crate::flags::KeyFlags;

/// Quantization range of rotation components
pub const ROTATION_QUANT: f32 = 32767.0;

/// Quantization range of 8-bit translation keys
pub const TRANSLATION_QUANT: f32 = 127.0;

/// Quantization range of 16-bit translation keys
pub const TRANSLATION_QUANT_HQ: f32 = 32767.0;

fn quantize_rotation(rotation: Quat) -> [i16; 4] {
    rotation
        .to_array()
        .map(|c| (c.clamp(-1.0, 1.0) * ROTATION_QUANT).round() as i16)
}

fn dequantize_rotation(raw: [i16; 4]) -> Quat {
    let [x, y, z, w] = raw.map(|c| f32::from(c) / ROTATION_QUANT);
    Quat::from_xyzw(x, y, z, w)
}

/// Rotation channel of a bone
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub enum RotationTrack {
    /// One rotation for the whole motion
    Constant([i16; 4]),
    /// One quantized `(x, y, z, w)` per frame
    Keys(Vec<[i16; 4]>),
}

impl RotationTrack {
    /// Quantize per-frame rotations, collapsing identical frames
    pub fn quantize(rotations: &[Quat]) -> Self {
        let keys: Vec<[i16; 4]> = rotations.iter().copied().map(quantize_rotation).collect();
        match keys.first() {
            Some(&first) if keys.iter().all(|&key| key == first) => Self::Constant(first),
            None => Self::Constant(quantize_rotation(Quat::IDENTITY)),
            Some(_) => Self::Keys(keys),
        }
    }

    /// Rotation at `frame`, the last key past the end
    pub fn sample(&self, frame: usize) -> Quat {
        match self {
            Self::Constant(raw) => dequantize_rotation(*raw),
            Self::Keys(keys) => keys
                .get(frame)
                .or_else(|| keys.last())
                .map_or(Quat::IDENTITY, |&raw| dequantize_rotation(raw)),
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Self::Constant(_))
    }
}

/// Translation channel of a bone
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub enum TranslationTrack {
    /// One position for the whole motion
    Constant(Vec3),
    /// One quantized position per frame
    Keys {
        /// 16-bit keys; otherwise every component fits `i8`
        high_quality: bool,
        keys: Vec<[i16; 3]>,
        /// Half the per-axis value range
        size: Vec3,
        /// Per-axis range center
        init: Vec3,
    },
}

impl TranslationTrack {
    /// Quantize per-frame positions
    ///
    /// Each axis is centered on the middle of its range and scaled to the
    /// quantization width. A track whose frames are all equal becomes a
    /// constant.
    pub fn quantize(positions: &[Vec3], high_quality: bool) -> Self {
        let Some(&first) = positions.first() else {
            return Self::Constant(Vec3::ZERO);
        };
        if positions.iter().all(|&p| p == first) {
            return Self::Constant(first);
        }

        let (min, max) = positions
            .iter()
            .fold((first, first), |(min, max), &p| (min.min(p), max.max(p)));
        let init = (max + min) * 0.5;
        let size = (max - min) * 0.5;
        let quant = if high_quality {
            TRANSLATION_QUANT_HQ
        } else {
            TRANSLATION_QUANT
        };

        let axis = |value: f32, init: f32, size: f32| -> i16 {
            if size == 0.0 {
                0
            } else {
                ((value - init) / size * quant).round().clamp(-quant, quant) as i16
            }
        };
        let keys = positions
            .iter()
            .map(|p| {
                [
                    axis(p.x, init.x, size.x),
                    axis(p.y, init.y, size.y),
                    axis(p.z, init.z, size.z),
                ]
            })
            .collect();

        Self::Keys {
            high_quality,
            keys,
            size,
            init,
        }
    }

    /// Translation at `frame`, the last key past the end
    pub fn sample(&self, frame: usize) -> Vec3 {
        match self {
            Self::Constant(value) => *value,
            Self::Keys {
                high_quality,
                keys,
                size,
                init,
            } => {
                let quant = if *high_quality {
                    TRANSLATION_QUANT_HQ
                } else {
                    TRANSLATION_QUANT
                };
                keys.get(frame).or_else(|| keys.last()).map_or(*init, |raw| {
                    let raw = Vec3::new(
                        f32::from(raw[0]),
                        f32::from(raw[1]),
                        f32::from(raw[2]),
                    );
                    raw * *size / quant + *init
                })
            }
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Self::Constant(_))
    }
}

/// Rotation and translation tracks of one bone
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct BoneTrack {
    pub rotation: RotationTrack,
    pub translation: TranslationTrack,
}

impl BoneTrack {
    /// Quantize per-frame engine-space samples
    pub fn from_samples(rotations: &[Quat], positions: &[Vec3], high_quality: bool) -> Self {
        Self {
            rotation: RotationTrack::quantize(rotations),
            translation: TranslationTrack::quantize(positions, high_quality),
        }
    }

    /// Flags byte describing the on-disk layout
    pub fn flags(&self) -> KeyFlags {
        let mut flags = KeyFlags::empty();
        if self.rotation.is_constant() {
            flags |= KeyFlags::R_ABSENT;
        }
        if let TranslationTrack::Keys { high_quality, .. } = self.translation {
            flags |= KeyFlags::T_PRESENT;
            if high_quality {
                flags |= KeyFlags::T_HIGH_QUALITY;
            }
        }
        flags
    }

    /// Engine-space rotation and translation at `frame`
    pub fn sample(&self, frame: usize) -> (Quat, Vec3) {
        (self.rotation.sample(frame), self.translation.sample(frame))
    }

    fn read(
        reader: &mut PackedReader<'_>,
        bone: usize,
        length: usize,
        report: &mut Report,
    ) -> Result<Self> {
        let flags = KeyFlags::from_bits_truncate(reader.u8()?);

        let rotation = if flags.contains(KeyFlags::R_ABSENT) {
            RotationTrack::Constant(reader.read_fixed()?)
        } else {
            let stored = reader.u32()?;
            let bytes = reader.bytes(length.saturating_mul(8))?;
            verify_crc(stored, bytes, || format!("bone {bone} rotation"), report);
            let mut keys = PackedReader::new(bytes);
            RotationTrack::Keys(
                (0..length)
                    .map(|_| keys.read_fixed::<i16, 4>())
                    .collect::<xray_data::Result<_>>()?,
            )
        };

        let translation = if flags.contains(KeyFlags::T_PRESENT) {
            let high_quality = flags.contains(KeyFlags::T_HIGH_QUALITY);
            let stored = reader.u32()?;
            let width = if high_quality { 2 } else { 1 };
            let bytes = reader.bytes(length.saturating_mul(3 * width))?;
            verify_crc(stored, bytes, || format!("bone {bone} translation"), report);

            let keys = if high_quality {
                bytes
                    .chunks_exact(6)
                    .map(|k| {
                        [
                            i16::from_le_bytes([k[0], k[1]]),
                            i16::from_le_bytes([k[2], k[3]]),
                            i16::from_le_bytes([k[4], k[5]]),
                        ]
                    })
                    .collect()
            } else {
                bytes
                    .chunks_exact(3)
                    .map(|k| [k[0] as i8, k[1] as i8, k[2] as i8].map(i16::from))
                    .collect()
            };
            TranslationTrack::Keys {
                high_quality,
                keys,
                size: Vec3::from_array(reader.vec3()?),
                init: Vec3::from_array(reader.vec3()?),
            }
        } else {
            TranslationTrack::Constant(Vec3::from_array(reader.vec3()?))
        };

        Ok(Self {
            rotation,
            translation,
        })
    }

    fn write(&self, writer: &mut PackedWriter, bone: usize, length: usize) -> Result<()> {
        writer.u8(self.flags().bits());

        match &self.rotation {
            RotationTrack::Constant(raw) => {
                writer.write_slice(raw);
            }
            RotationTrack::Keys(keys) => {
                check_length(keys.len(), length, bone, "rotation")?;
                let slot = writer.len();
                writer.u32(0);
                for key in keys {
                    writer.write_slice(key);
                }
                patch_crc(writer, slot)?;
            }
        }

        match &self.translation {
            TranslationTrack::Constant(value) => {
                writer.vec3(value.to_array());
            }
            TranslationTrack::Keys {
                high_quality,
                keys,
                size,
                init,
            } => {
                check_length(keys.len(), length, bone, "translation")?;
                let slot = writer.len();
                writer.u32(0);
                for key in keys {
                    if *high_quality {
                        writer.write_slice(key);
                    } else {
                        for &component in key {
                            let narrow = i8::try_from(component).map_err(|_| {
                                MotionError::format(format!(
                                    "bone {bone}: translation key {component} does not fit 8 bits"
                                ))
                            })?;
                            writer.i8(narrow);
                        }
                    }
                }
                patch_crc(writer, slot)?;
                writer.vec3(size.to_array()).vec3(init.to_array());
            }
        }
        Ok(())
    }
}

fn verify_crc(stored: u32, bytes: &[u8], context: impl FnOnce() -> String, report: &mut Report) {
    let computed = crc32fast::hash(bytes);
    if stored != computed {
        report.push(MotionError::ChecksumMismatch {
            context: context(),
            stored,
            computed,
        });
    }
}

/// Fill the CRC32 slot at `slot` with the checksum of everything after it
fn patch_crc(writer: &mut PackedWriter, slot: usize) -> Result<()> {
    let crc = crc32fast::hash(&writer.as_bytes()[slot + 4..]);
    writer.replace_u32(slot, crc)?;
    Ok(())
}

fn check_length(keys: usize, length: usize, bone: usize, channel: &str) -> Result<()> {
    if keys == length {
        Ok(())
    } else {
        Err(MotionError::format(format!(
            "bone {bone}: {keys} {channel} keys for a motion of {length} frames"
        )))
    }
}

/// One engine motion clip
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct Motion {
    pub name: String,
    /// Frame count
    pub length: u32,
    /// One track per bone, in skeleton order
    pub tracks: Vec<BoneTrack>,
}

impl Motion {
    /// Decode a motion record with `bone_count` tracks
    ///
    /// Checksum mismatches are recorded in `report`; the keys are used as
    /// stored.
    pub fn read(
        reader: &mut PackedReader<'_>,
        bone_count: usize,
        report: &mut Report,
    ) -> Result<Self> {
        let name = reader.string_z()?;
        let length = reader.u32()?;
        let frames = length as usize;

        let tracks = (0..bone_count)
            .map(|bone| BoneTrack::read(reader, bone, frames, report))
            .collect::<Result<Vec<_>>>()?;
        log::debug!("motion {name:?}: {length} frames, {bone_count} bones");

        Ok(Self {
            name,
            length,
            tracks,
        })
    }

    /// Encode the motion record, computing every CRC32
    pub fn write(&self, writer: &mut PackedWriter) -> Result<()> {
        writer.string_z(&self.name)?.u32(self.length);
        for (bone, track) in self.tracks.iter().enumerate() {
            track.write(writer, bone, self.length as usize)?;
        }
        Ok(())
    }

    /// Encoded record bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = PackedWriter::new();
        self.write(&mut writer)?;
        Ok(writer.into_bytes())
    }

    /// Decode a record that must span the whole buffer
    ///
    /// Bytes left after `bone_count` tracks mean the record holds more bones
    /// than the caller expects; they are reported and ignored.
    pub fn from_bytes(data: &[u8], bone_count: usize, report: &mut Report) -> Result<Self> {
        let mut reader = PackedReader::partial(data);
        let motion = Self::read(&mut reader, bone_count, report)?;
        if !reader.is_end() {
            report.push(MotionError::TrailingData {
                context: format!("motion {:?} with {bone_count} bones", motion.name),
                bytes: reader.remaining(),
            });
        }
        Ok(motion)
    }

    /// Read only the name at the front of an encoded record
    pub fn peek_name(data: &[u8]) -> Result<String> {
        Ok(PackedReader::partial(data).string_z()?)
    }
}
