//! OMF motion files
//!
//! ```text
//! chunk 0x0E  motions
//!   chunk 0        u32 motion count
//!   chunk i + 1    motion record with id i
//! chunk 0x0F  parameter record
//! ```

use xray_data::{ChunkedWriter, PackedWriter, find_chunk};

use crate::error::{MotionError, Report, Result};
use crate::motion::Motion;
use crate::params::{BonePart, MotionDef, MotionParams, PARAMS_VERSION};

/// Chunk holding the motion records
pub const CHUNK_MOTIONS: u32 = 0x0E;

/// Chunk holding the parameter record
pub const CHUNK_PARAMS: u32 = 0x0F;

/// A motion and its playback definition
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct OmfMotion {
    pub motion: Motion,
    /// `motion_id` is reassigned on write
    pub def: MotionDef,
}

impl OmfMotion {
    /// Pair a motion with a default definition of the same name
    pub fn new(motion: Motion) -> Self {
        let def = MotionDef::new(motion.name.clone(), 0);
        Self { motion, def }
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }
}

/// Decoded OMF file
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct OmfFile {
    /// Version of the parameter record
    pub params_version: u16,
    pub parts: Vec<BonePart>,
    /// Motions in on-disk order
    pub motions: Vec<OmfMotion>,
}

impl Default for OmfFile {
    fn default() -> Self {
        Self {
            params_version: PARAMS_VERSION,
            parts: Vec::new(),
            motions: Vec::new(),
        }
    }
}

/// Parse only the parameter chunk of an OMF file
pub fn read_params(data: &[u8]) -> Result<MotionParams> {
    let chunk = find_chunk(data, CHUNK_PARAMS)?
        .ok_or_else(|| MotionError::format("missing motion parameter chunk"))?;
    MotionParams::read(chunk.data())
}

impl OmfFile {
    /// Decode a whole OMF file
    ///
    /// Checksum mismatches and definitions that point at absent motions end
    /// up in `report`; the affected definitions are skipped.
    pub fn read(data: &[u8], report: &mut Report) -> Result<Self> {
        let params = read_params(data)?;
        let bone_count = params.bone_count();

        let motions_chunk = find_chunk(data, CHUNK_MOTIONS)?
            .ok_or_else(|| MotionError::format("missing motions chunk"))?;
        let mut chunks = motions_chunk.chunks();
        let count = chunks.next_expect(0)?.reader().u32()?;

        let mut motions = Vec::with_capacity((count as usize).min(4096));
        for id in 0..count {
            let chunk = chunks.next_expect(id + 1)?;
            motions.push(Motion::from_bytes(chunk.data(), bone_count, report)?);
        }
        if !chunks.is_end() {
            log::warn!("motions chunk has data after {count} motions");
        }

        let mut paired = vec![false; motions.len()];
        let mut entries = Vec::with_capacity(params.defs.len());
        for def in params.defs {
            let id = usize::from(def.motion_id);
            let Some(motion) = motions.get(id) else {
                report.push(MotionError::missing(format!(
                    "definition {:?} refers to motion {id}, the file has {}",
                    def.name,
                    motions.len()
                )));
                continue;
            };
            paired[id] = true;
            entries.push(OmfMotion {
                motion: motion.clone(),
                def,
            });
        }
        for (motion, _) in motions.into_iter().zip(paired).filter(|(_, p)| !p) {
            log::warn!("motion {:?} has no definition, using defaults", motion.name);
            entries.push(OmfMotion::new(motion));
        }

        log::debug!(
            "read OMF: {} motions, {} bone parts, {bone_count} bones",
            entries.len(),
            params.parts.len()
        );
        Ok(Self {
            params_version: params.version,
            parts: params.parts,
            motions: entries,
        })
    }

    /// Parameter record with motion ids assigned in motion order
    pub fn params(&self) -> Result<MotionParams> {
        let defs = self
            .motions
            .iter()
            .enumerate()
            .map(|(id, entry)| {
                let motion_id = u16::try_from(id).map_err(|_| {
                    MotionError::format(format!("{} motions do not fit u16 ids", self.motions.len()))
                })?;
                Ok(MotionDef {
                    motion_id,
                    ..entry.def.clone()
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(MotionParams {
            version: self.params_version,
            parts: self.parts.clone(),
            defs,
        })
    }

    /// Encode the file
    pub fn write(&self) -> Result<Vec<u8>> {
        let params = self.params()?;
        let bone_count = params.bone_count();

        let mut motions = ChunkedWriter::new();
        let mut count = PackedWriter::new();
        count.u32(self.motions.len() as u32);
        motions.put_packed(0, &count)?;
        for (id, entry) in self.motions.iter().enumerate() {
            if entry.motion.tracks.len() != bone_count {
                return Err(MotionError::format(format!(
                    "motion {:?} has {} tracks, bone parts cover {bone_count} bones",
                    entry.motion.name,
                    entry.motion.tracks.len()
                )));
            }
            motions.put(id as u32 + 1, &entry.motion.to_bytes()?)?;
        }

        let mut out = ChunkedWriter::new();
        out.put_chunked(CHUNK_MOTIONS, &motions)?;
        out.put(CHUNK_PARAMS, &params.to_bytes()?)?;
        Ok(out.into_bytes())
    }

    /// Bone names in track order
    pub fn bone_names(&self) -> Vec<String> {
        MotionParams {
            version: self.params_version,
            parts: self.parts.clone(),
            defs: Vec::new(),
        }
        .bone_names()
    }

    /// Number of bones over every partition
    pub fn bone_count(&self) -> usize {
        self.parts.iter().map(|part| part.bones.len()).sum()
    }

    /// Motion entry with the given name
    pub fn find(&self, name: &str) -> Option<&OmfMotion> {
        self.motions.iter().find(|entry| entry.name() == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::BoneTrack;
    use crate::params::BoneRef;
    use glam::{Quat, Vec3};
    use pretty_assertions::assert_eq;

    fn motion(name: &str, bones: usize, frames: u32) -> Motion {
        let rotations: Vec<Quat> = (0..frames)
            .map(|f| Quat::from_rotation_x(f as f32 * 0.1))
            .collect();
        let positions: Vec<Vec3> = (0..frames).map(|f| Vec3::new(0.0, f as f32, 0.0)).collect();
        Motion {
            name: name.into(),
            length: frames,
            tracks: (0..bones)
                .map(|_| BoneTrack::from_samples(&rotations, &positions, false))
                .collect(),
        }
    }

    fn file() -> OmfFile {
        OmfFile {
            params_version: 4,
            parts: vec![BonePart {
                name: "default".into(),
                bones: vec![BoneRef::new("root", 0), BoneRef::new("spine", 1)],
            }],
            motions: vec![
                OmfMotion::new(motion("idle", 2, 3)),
                OmfMotion::new(motion("walk", 2, 5)),
            ],
        }
    }

    #[test]
    fn test_write_read() {
        let file = file();
        let bytes = file.write().unwrap();

        let mut report = Report::new();
        let decoded = OmfFile::read(&bytes, &mut report).unwrap();
        assert!(report.is_empty());
        assert_eq!(decoded.motions.len(), 2);
        assert_eq!(decoded.motions[1].def.motion_id, 1);
        assert_eq!(decoded.motions[1].motion, file.motions[1].motion);
        assert_eq!(decoded.bone_names(), vec!["root", "spine"]);
        assert!(decoded.find("walk").is_some());
    }

    #[test]
    fn test_chunk_order() {
        let bytes = file().write().unwrap();
        let ids: Vec<u32> = xray_data::read_chunks(&bytes)
            .map(|chunk| chunk.unwrap().id)
            .collect();
        assert_eq!(ids, vec![CHUNK_MOTIONS, CHUNK_PARAMS]);
    }

    #[test]
    fn test_dangling_definition_is_skipped() {
        let file = file();
        let mut params = file.params().unwrap();
        params.defs[1].motion_id = 7;

        let mut motions = ChunkedWriter::new();
        motions.put(0, &1u32.to_le_bytes()).unwrap();
        motions.put(1, &file.motions[0].motion.to_bytes().unwrap()).unwrap();
        let mut out = ChunkedWriter::new();
        out.put_chunked(CHUNK_MOTIONS, &motions).unwrap();
        out.put(CHUNK_PARAMS, &params.to_bytes().unwrap()).unwrap();

        let mut report = Report::new();
        let decoded = OmfFile::read(out.as_bytes(), &mut report).unwrap();
        assert_eq!(decoded.motions.len(), 1);
        assert_eq!(report.len(), 1);
        assert!(matches!(
            report.warnings()[0],
            MotionError::MissingDependency(_)
        ));
    }

    #[test]
    fn test_track_count_must_match_bones() {
        let mut file = file();
        file.motions.push(OmfMotion::new(motion("broken", 3, 2)));
        assert!(matches!(file.write(), Err(MotionError::Format(_))));
    }

    #[test]
    fn test_missing_params() {
        let mut out = ChunkedWriter::new();
        out.put(CHUNK_MOTIONS, &[]).unwrap();
        let mut report = Report::new();
        assert!(OmfFile::read(out.as_bytes(), &mut report).is_err());
    }
}
