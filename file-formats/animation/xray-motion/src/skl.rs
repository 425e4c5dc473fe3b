//! Editor motions (SKL / SKLS)
//!
//! The editor keeps motions as curves instead of per-frame samples. A `.skl`
//! file is a chunked file with one [`CHUNK_SKL_MOTION`] chunk; a `.skls` file
//! is a `u32` count followed by that many motions back to back.
//!
//! ```text
//! name            stringZ
//! frame start     u32
//! frame end       u32
//! fps             f32
//! version         u16          6 or 7
//! flags           u8           MotionFlags
//! bone_or_part    u16
//! speed, accrue, falloff, power: f32
//! bone count      u16
//! per bone:
//!   name          stringZ
//!   flags         u8
//!   6 envelopes   tx, ty, tz, rh, rp, rb
//! version 7:      u32 mark count, marks
//! ```

use glam::{EulerRot, Quat, Vec3};
use xray_data::{ChunkedWriter, PackedReader, PackedWriter};

use crate::envelope::Envelope;
use crate::error::{MotionError, Report, Result};
use crate::flags::MotionFlags;
use crate::motion::{BoneTrack, Motion, RotationTrack, TranslationTrack};
use crate::omf::OmfMotion;
use crate::params::{MotionDef, MotionMark};

/// Chunk of a `.skl` file holding its motion
pub const CHUNK_SKL_MOTION: u32 = 0x1200;

/// Version written by default
pub const EDITOR_MOTION_VERSION: u16 = 7;

/// Oldest readable version
pub const MIN_EDITOR_MOTION_VERSION: u16 = 6;

/// Channel index of each envelope of a bone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    PositionX = 0,
    PositionY = 1,
    PositionZ = 2,
    /// Heading, rotation about Y
    RotationH = 3,
    /// Pitch, rotation about X
    RotationP = 4,
    /// Bank, rotation about Z
    RotationB = 5,
}

/// Curves of one bone
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct BoneMotion {
    pub name: String,
    pub flags: u8,
    /// Indexed by [`Channel`]
    pub envelopes: [Envelope; 6],
}

impl BoneMotion {
    pub fn envelope(&self, channel: Channel) -> &Envelope {
        &self.envelopes[channel as usize]
    }

    /// Engine-space translation at `time` (seconds)
    pub fn translation(&self, time: f32) -> Vec3 {
        Vec3::new(
            self.envelope(Channel::PositionX).evaluate(time),
            self.envelope(Channel::PositionY).evaluate(time),
            self.envelope(Channel::PositionZ).evaluate(time),
        )
    }

    /// Engine-space rotation at `time` (seconds)
    pub fn rotation(&self, time: f32) -> Quat {
        Quat::from_euler(
            EulerRot::YXZ,
            self.envelope(Channel::RotationH).evaluate(time),
            self.envelope(Channel::RotationP).evaluate(time),
            self.envelope(Channel::RotationB).evaluate(time),
        )
    }

    fn read(reader: &mut PackedReader<'_>) -> Result<Self> {
        let name = reader.string_z()?;
        let flags = reader.u8()?;
        let mut envelopes: [Envelope; 6] = Default::default();
        for envelope in &mut envelopes {
            *envelope = Envelope::read(reader)?;
        }
        Ok(Self {
            name,
            flags,
            envelopes,
        })
    }

    fn write(&self, writer: &mut PackedWriter) -> Result<()> {
        writer.string_z(&self.name)?.u8(self.flags);
        for envelope in &self.envelopes {
            envelope.write(writer)?;
        }
        Ok(())
    }

    /// Bake the curves over `frames` into a quantized track
    fn bake(&self, frames: &[u32], fps: f32, high_quality: bool) -> BoneTrack {
        let range = match (frames.first(), frames.last()) {
            (Some(&first), Some(&last)) => first as i32..=last as i32,
            _ => 0..=0,
        };
        let start = frames.first().map_or(0.0, |&f| f as f32 / fps);
        let constant = |channels: [Channel; 3]| {
            channels
                .iter()
                .all(|&c| self.envelope(c).is_constant(range.clone(), fps))
        };

        let rotation = if constant([Channel::RotationH, Channel::RotationP, Channel::RotationB]) {
            RotationTrack::quantize(&[self.rotation(start)])
        } else {
            let samples: Vec<Quat> = frames
                .iter()
                .map(|&f| self.rotation(f as f32 / fps))
                .collect();
            RotationTrack::quantize(&samples)
        };

        let translation = if constant([Channel::PositionX, Channel::PositionY, Channel::PositionZ]) {
            TranslationTrack::Constant(self.translation(start))
        } else {
            let samples: Vec<Vec3> = frames
                .iter()
                .map(|&f| self.translation(f as f32 / fps))
                .collect();
            TranslationTrack::quantize(&samples, high_quality)
        };

        BoneTrack {
            rotation,
            translation,
        }
    }
}

/// Curve-based motion as stored by the editor
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct EditorMotion {
    pub name: String,
    pub frame_start: u32,
    pub frame_end: u32,
    pub fps: f32,
    pub version: u16,
    /// Only the low byte is stored
    pub flags: MotionFlags,
    pub bone_or_part: u16,
    pub speed: f32,
    pub accrue: f32,
    pub falloff: f32,
    pub power: f32,
    pub bones: Vec<BoneMotion>,
    /// Stored by version 7 only
    pub marks: Vec<MotionMark>,
}

impl Default for EditorMotion {
    fn default() -> Self {
        Self {
            name: String::new(),
            frame_start: 0,
            frame_end: 0,
            fps: 30.0,
            version: EDITOR_MOTION_VERSION,
            flags: MotionFlags::empty(),
            bone_or_part: 0,
            speed: 1.0,
            accrue: 2.0,
            falloff: 2.0,
            power: 1.0,
            bones: Vec::new(),
            marks: Vec::new(),
        }
    }
}

impl EditorMotion {
    /// Decode one editor motion
    pub fn read(reader: &mut PackedReader<'_>) -> Result<Self> {
        let name = reader.string_z()?;
        let frame_start = reader.u32()?;
        let frame_end = reader.u32()?;
        let fps = reader.f32()?;
        let version = reader.u16()?;
        if !(MIN_EDITOR_MOTION_VERSION..=EDITOR_MOTION_VERSION).contains(&version) {
            return Err(MotionError::VersionUnsupported {
                record: "editor motion",
                version: u32::from(version),
            });
        }
        let flags = MotionFlags::from_bits_retain(u32::from(reader.u8()?));
        let bone_or_part = reader.u16()?;
        let speed = reader.f32()?;
        let accrue = reader.f32()?;
        let falloff = reader.f32()?;
        let power = reader.f32()?;
        let bone_count = reader.u16()?;
        let bones = (0..bone_count)
            .map(|_| BoneMotion::read(reader))
            .collect::<Result<Vec<_>>>()?;
        let marks = if version >= 7 {
            MotionMark::read_list(reader)?
        } else {
            Vec::new()
        };
        log::debug!(
            "editor motion {name:?} v{version}: frames {frame_start}..={frame_end} at {fps} fps, {} bones",
            bones.len()
        );

        Ok(Self {
            name,
            frame_start,
            frame_end,
            fps,
            version,
            flags,
            bone_or_part,
            speed,
            accrue,
            falloff,
            power,
            bones,
            marks,
        })
    }

    /// Encode with `self.version`
    pub fn write(&self, writer: &mut PackedWriter) -> Result<()> {
        if !(MIN_EDITOR_MOTION_VERSION..=EDITOR_MOTION_VERSION).contains(&self.version) {
            return Err(MotionError::VersionUnsupported {
                record: "editor motion",
                version: u32::from(self.version),
            });
        }
        let flags = u8::try_from(self.flags.bits()).map_err(|_| {
            MotionError::format(format!(
                "motion {:?}: flags 0x{:X} do not fit the editor's 8-bit field",
                self.name,
                self.flags.bits()
            ))
        })?;
        let bone_count = u16::try_from(self.bones.len()).map_err(|_| {
            MotionError::format(format!("motion {:?} has too many bones", self.name))
        })?;

        writer
            .string_z(&self.name)?
            .u32(self.frame_start)
            .u32(self.frame_end)
            .f32(self.fps)
            .u16(self.version)
            .u8(flags)
            .u16(self.bone_or_part)
            .f32(self.speed)
            .f32(self.accrue)
            .f32(self.falloff)
            .f32(self.power)
            .u16(bone_count);
        for bone in &self.bones {
            bone.write(writer)?;
        }
        if self.version >= 7 {
            MotionMark::write_list(&self.marks, writer)?;
        }
        Ok(())
    }

    pub fn find_bone(&self, name: &str) -> Option<&BoneMotion> {
        self.bones
            .iter()
            .find(|bone| bone.name.eq_ignore_ascii_case(name))
    }

    /// Number of frames in `frame_start..=frame_end`
    pub fn frame_count(&self) -> u32 {
        self.frame_end.saturating_sub(self.frame_start) + 1
    }

    /// Playback definition carried by the motion
    pub fn def(&self) -> MotionDef {
        MotionDef {
            name: self.name.clone(),
            flags: self.flags,
            bone_or_part: self.bone_or_part,
            motion_id: 0,
            speed: self.speed,
            power: self.power,
            accrue: self.accrue,
            falloff: self.falloff,
            marks: self.marks.clone(),
        }
    }

    /// Sample the curves at every frame and quantize them into an engine motion
    ///
    /// `bone_names` gives the skeleton's track order. A bone the motion has
    /// no curves for is a [`MotionError::MissingDependency`].
    pub fn bake<S: AsRef<str>>(&self, bone_names: &[S], high_quality: bool) -> Result<OmfMotion> {
        if self.fps.is_nan() || self.fps <= 0.0 {
            return Err(MotionError::format(format!(
                "motion {:?} has invalid fps {}",
                self.name, self.fps
            )));
        }
        if self.frame_end < self.frame_start {
            return Err(MotionError::format(format!(
                "motion {:?} ends at frame {} before it starts at {}",
                self.name, self.frame_end, self.frame_start
            )));
        }

        let frames: Vec<u32> = (self.frame_start..=self.frame_end).collect();
        let tracks = bone_names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                self.find_bone(name)
                    .map(|bone| bone.bake(&frames, self.fps, high_quality))
                    .ok_or_else(|| {
                        MotionError::missing(format!("motion {:?} has no bone {name:?}", self.name))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(OmfMotion {
            motion: Motion {
                name: self.name.clone(),
                length: self.frame_count(),
                tracks,
            },
            def: self.def(),
        })
    }
}

/// Bake several motions, skipping those with missing bones
pub fn bake_all<S: AsRef<str>>(
    motions: &[EditorMotion],
    bone_names: &[S],
    high_quality: bool,
    report: &mut Report,
) -> Result<Vec<OmfMotion>> {
    let mut baked = Vec::with_capacity(motions.len());
    for motion in motions {
        match motion.bake(bone_names, high_quality) {
            Ok(entry) => baked.push(entry),
            Err(e) if !e.is_fatal() => report.push(e),
            Err(e) => return Err(e),
        }
    }
    Ok(baked)
}

/// Read a `.skl` file
pub fn read_skl(data: &[u8]) -> Result<EditorMotion> {
    let chunk = xray_data::find_chunk(data, CHUNK_SKL_MOTION)?
        .ok_or_else(|| MotionError::format("missing editor motion chunk"))?;
    let mut reader = chunk.reader();
    EditorMotion::read(&mut reader)
}

/// Write a `.skl` file
pub fn write_skl(motion: &EditorMotion) -> Result<Vec<u8>> {
    let mut payload = PackedWriter::new();
    motion.write(&mut payload)?;
    let mut out = ChunkedWriter::new();
    out.put_packed(CHUNK_SKL_MOTION, &payload)?;
    Ok(out.into_bytes())
}

/// Read a `.skls` file
pub fn read_skls(data: &[u8]) -> Result<Vec<EditorMotion>> {
    let mut reader = PackedReader::new(data);
    let count = reader.u32()?;
    let mut motions = Vec::with_capacity((count as usize).min(4096));
    for _ in 0..count {
        motions.push(EditorMotion::read(&mut reader)?);
    }
    Ok(motions)
}

/// Write a `.skls` file
pub fn write_skls(motions: &[EditorMotion]) -> Result<Vec<u8>> {
    let mut writer = PackedWriter::new();
    writer.u32(
        u32::try_from(motions.len())
            .map_err(|_| MotionError::format("too many motions for one file"))?,
    );
    for motion in motions {
        motion.write(&mut writer)?;
    }
    Ok(writer.into_bytes())
}
