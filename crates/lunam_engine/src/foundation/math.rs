//! Math types and camera matrices
//!
//! nalgebra aliases used across the engine, plus the projection helpers that
//! match the renderer's conventions: right-handed view space looking down
//! -Z, depth in `[0, 1]`, and a viewport flipped so +Y points up.

pub use nalgebra::{Matrix4, Point3 as NPoint3, Vector3, Vector4};

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// 3D point type
pub type Point3 = NPoint3<f32>;

/// Right-handed perspective projection mapping depth to `[0, 1]`
///
/// `fov_y` is in radians. Geometry at `-near` lands on depth 0 and at
/// `-far` on depth 1.
pub fn perspective(fov_y: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
    let focal = 1.0 / (fov_y * 0.5).tan();
    let range = near - far;
    let mut m = Mat4::zeros();
    m[(0, 0)] = focal / aspect;
    m[(1, 1)] = focal;
    m[(2, 2)] = far / range;
    m[(2, 3)] = near * far / range;
    m[(3, 2)] = -1.0;
    m
}

/// Right-handed view matrix looking from `eye` towards `target`
pub fn look_at(eye: &Vec3, target: &Vec3, up: &Vec3) -> Mat4 {
    Mat4::look_at_rh(&Point3::from(*eye), &Point3::from(*target), up)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn project(m: &Mat4, z: f32) -> f32 {
        let clip = m * Vec4::new(0.0, 0.0, z, 1.0);
        clip.z / clip.w
    }

    #[test]
    fn test_perspective_depth_range() {
        let proj = perspective(std::f32::consts::FRAC_PI_2, 16.0 / 9.0, 0.1, 100.0);
        assert_relative_eq!(project(&proj, -0.1), 0.0, epsilon = 1e-5);
        assert_relative_eq!(project(&proj, -100.0), 1.0, epsilon = 1e-5);
        assert!(project(&proj, -10.0) > 0.0 && project(&proj, -10.0) < 1.0);
    }

    #[test]
    fn test_look_at_moves_target_onto_negative_z() {
        let view = look_at(&Vec3::new(0.0, 0.0, 5.0), &Vec3::zeros(), &Vec3::y());
        let target = view * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(target.z, -5.0, epsilon = 1e-5);
        assert_relative_eq!(target.x, 0.0, epsilon = 1e-5);
    }
}
