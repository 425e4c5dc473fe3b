//! Bit flags stored in motion records

use bitflags::bitflags;

bitflags! {
    /// Per-bone track flags of an engine motion
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct KeyFlags: u8 {
        /// Translation is keyed; otherwise a single constant vector follows
        const T_PRESENT = 0x01;
        /// Rotation is not keyed; a single constant quaternion follows
        const R_ABSENT = 0x02;
        /// Translation keys are 16-bit instead of 8-bit
        const T_HIGH_QUALITY = 0x04;
    }
}

bitflags! {
    /// Playback flags of a motion definition
    ///
    /// Stored as `u32` in parameter records and as `u8` in editor motions.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
    pub struct MotionFlags: u32 {
        const FX = 0x01;
        const STOP_AT_END = 0x02;
        const NO_MIX = 0x04;
        const SYNC_PART = 0x08;
        const USE_FOOT_STEPS = 0x10;
        const ROOT_MOVER = 0x20;
        const IDLE = 0x40;
        const USE_WEAPON_BONE = 0x80;

        // Unknown bits are carried through untouched
        const _ = !0;
    }
}
