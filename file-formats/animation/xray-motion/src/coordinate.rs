//! Axis conversion between host and engine space
//!
//! The engine is left-handed with Y up. Host applications (Blender and the
//! like) are right-handed with Z up. Converting between the two swaps the Y
//! and Z axes, a reflection, so rotations also change handedness:
//!
//! ```text
//! position (x, y, z)       <-> (x, z, y)
//! rotation (x, y, z, w)    <-> (-x, -z, -y, w)
//! matrix   M               <-> S * M * S,  S = swap(Y, Z)
//! ```
//!
//! Every conversion is its own inverse.

use glam::{Mat4, Quat, Vec3, Vec4};

/// Swap the Y and Z components of a position
pub fn swap_position(position: Vec3) -> Vec3 {
    Vec3::new(position.x, position.z, position.y)
}

/// Mirror a rotation through the Y/Z swap
pub fn swap_rotation(rotation: Quat) -> Quat {
    Quat::from_xyzw(-rotation.x, -rotation.z, -rotation.y, rotation.w)
}

/// Conjugate a transform by the Y/Z swap
pub fn swap_matrix(matrix: Mat4) -> Mat4 {
    let swap = Mat4::from_cols(Vec4::X, Vec4::Z, Vec4::Y, Vec4::W);
    swap * matrix * swap
}

/// Host space rotation and translation to engine space
pub fn to_engine(rotation: Quat, translation: Vec3) -> (Quat, Vec3) {
    (swap_rotation(rotation), swap_position(translation))
}

/// Engine space rotation and translation to a host space transform
pub fn to_host(rotation: Quat, translation: Vec3) -> Mat4 {
    Mat4::from_rotation_translation(swap_rotation(rotation), swap_position(translation))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_swap() {
        assert_eq!(swap_position(Vec3::new(1.0, 2.0, 3.0)), Vec3::new(1.0, 3.0, 2.0));
        let p = Vec3::new(-4.0, 5.5, 0.25);
        assert_eq!(swap_position(swap_position(p)), p);
    }

    #[test]
    fn test_rotation_matches_matrix_conjugation() {
        let rotation = Quat::from_euler(glam::EulerRot::XYZ, 0.3, -1.1, 0.7);
        let translation = Vec3::new(0.5, -2.0, 1.5);
        let host = Mat4::from_rotation_translation(rotation, translation);

        let (engine_rotation, engine_translation) = to_engine(rotation, translation);
        let expected = swap_matrix(host);
        let actual = Mat4::from_rotation_translation(engine_rotation, engine_translation);
        assert!(actual.abs_diff_eq(expected, 1e-5));
    }

    #[test]
    fn test_round_trip() {
        let rotation = Quat::from_rotation_z(0.9);
        let translation = Vec3::new(1.0, 2.0, 3.0);
        let (r, t) = to_engine(rotation, translation);
        let host = to_host(r, t);
        assert!(host.abs_diff_eq(Mat4::from_rotation_translation(rotation, translation), 1e-6));
    }
}
