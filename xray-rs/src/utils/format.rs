//! Formatting utilities

use humansize::{DECIMAL, format_size};
use xray_motion::MotionFlags;

/// Format file size in human-readable format
pub fn format_bytes(bytes: u64) -> String {
    format_size(bytes, DECIMAL)
}

/// Format a chunk id, marking compressed chunks
pub fn format_chunk_id(id: u32, compressed: bool) -> String {
    if compressed {
        format!("0x{id:04X} (compressed)")
    } else {
        format!("0x{id:04X}")
    }
}

/// Names of the set motion flags, `-` when none
pub fn format_motion_flags(flags: MotionFlags) -> String {
    let mut named = 0;
    let mut parts: Vec<String> = flags
        .iter_names()
        .map(|(name, flag)| {
            named |= flag.bits();
            name.to_string()
        })
        .collect();
    let unknown = flags.bits() & !named;
    if unknown != 0 {
        parts.push(format!("0x{unknown:X}"));
    }
    if parts.is_empty() {
        "-".to_string()
    } else {
        parts.join("|")
    }
}

/// Format a duration in frames at 30 fps
pub fn format_frames(frames: u32) -> String {
    format!("{frames} ({:.2}s)", frames as f32 / 30.0)
}
