//! Per-frame uniform data shared with shaders
//!
//! The layout of [`PerFrameData`] is mirrored by the GLSL side, so field
//! order and sizes must not change without updating the shader include.
//! Every block is made of `vec4`/`mat4` sized members; the compile-time
//! checks below keep the struct a whole number of `vec4`s.

use bytemuck::{Pod, Zeroable};

use crate::foundation::math::{Mat4, Vec3};

/// Descriptor set index of the per-frame uniform buffer
pub const SET_IDX_PER_FRAME: u32 = 0;
/// Descriptor set index of material data
pub const SET_IDX_PER_MATERIAL: u32 = 1;
/// Descriptor set index left to individual pipelines
pub const SET_IDX_CUSTOM: u32 = 2;

/// Binding of [`PerFrameData`] inside [`SET_IDX_PER_FRAME`]
pub const PER_FRAME_BINDING: u32 = 0;

const VEC4_SIZE: usize = 4 * std::mem::size_of::<f32>();

/// Sky model parameters (Perez all-weather model)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SkyParams {
    /// Sun luminance in RGB, w unused
    pub sun_luminance: [f32; 4],
    /// Zenith sky luminance in RGB, w unused
    pub sky_luminance: [f32; 4],
    /// Perez coefficients A..E for x, y and Y chromaticity; w is zero
    pub perez: [[f32; 4]; 5],
    /// x: turbidity, y: exposure, z: hour of day, w unused
    pub params: [f32; 4],
}

/// Uniform block bound at set 0, binding 0 as a dynamic uniform buffer
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PerFrameData {
    /// Projection times view, column major
    pub view_proj: [[f32; 4]; 4],
    /// View matrix, column major
    pub view: [[f32; 4]; 4],
    /// Projection matrix, column major
    pub proj: [[f32; 4]; 4],
    /// Camera world position, w = 1
    pub cam_pos: [f32; 4],
    /// Direction towards the sun, w unused
    pub sun_dir: [f32; 4],
    /// Sun color, w is intensity
    pub sun_color: [f32; 4],
    /// Ambient light color, w is intensity
    pub ambient: [f32; 4],
    /// Sky model block
    pub sky: SkyParams,
}

const _: () = assert!(std::mem::size_of::<SkyParams>() % VEC4_SIZE == 0);
const _: () = assert!(std::mem::size_of::<PerFrameData>() % VEC4_SIZE == 0);

fn mat4_columns(m: &Mat4) -> [[f32; 4]; 4] {
    let mut out = [[0.0; 4]; 4];
    for (c, column) in out.iter_mut().enumerate() {
        for (r, value) in column.iter_mut().enumerate() {
            *value = m[(r, c)];
        }
    }
    out
}

fn vec4(v: &Vec3, w: f32) -> [f32; 4] {
    [v.x, v.y, v.z, w]
}

impl PerFrameData {
    /// Camera block from view and projection; lighting is left zeroed
    pub fn from_camera(view: &Mat4, proj: &Mat4, cam_pos: &Vec3) -> Self {
        Self {
            view_proj: mat4_columns(&(proj * view)),
            view: mat4_columns(view),
            proj: mat4_columns(proj),
            cam_pos: vec4(cam_pos, 1.0),
            ..Self::zeroed()
        }
    }

    /// Set the sun direction (normalized) and color
    pub fn with_sun(mut self, direction: &Vec3, color: &Vec3, intensity: f32) -> Self {
        let dir = direction.try_normalize(f32::EPSILON).unwrap_or_else(Vec3::y);
        self.sun_dir = vec4(&dir, 0.0);
        self.sun_color = vec4(color, intensity);
        self
    }

    /// Set the ambient term
    pub fn with_ambient(mut self, color: &Vec3, intensity: f32) -> Self {
        self.ambient = vec4(color, intensity);
        self
    }

    /// Attach sky parameters
    pub fn with_sky(mut self, sky: SkyParams) -> Self {
        self.sky = sky;
        self
    }
}

const PEREZ_BASE: [[f32; 3]; 5] = [
    [-0.2592, -0.2608, -1.4630],
    [0.0008, 0.0092, 0.4275],
    [0.2125, 0.2102, 5.3251],
    [-0.8989, -1.6537, -2.5771],
    [0.0452, 0.0529, 0.3703],
];

const PEREZ_TURBIDITY: [[f32; 3]; 5] = [
    [-0.0193, -0.0167, 0.1787],
    [-0.0665, -0.0950, -0.3554],
    [-0.0004, -0.0079, -0.0227],
    [-0.0641, -0.0441, 0.1206],
    [-0.0033, -0.0109, -0.0670],
];

/// Perez distribution coefficients for `turbidity`
///
/// Each row is `base + turbidity * slope` for the x, y and Y channels.
pub fn perez_coefficients(turbidity: f32) -> [[f32; 4]; 5] {
    let mut out = [[0.0; 4]; 5];
    for (i, row) in out.iter_mut().enumerate() {
        for ch in 0..3 {
            row[ch] = PEREZ_TURBIDITY[i][ch].mul_add(turbidity, PEREZ_BASE[i][ch]);
        }
    }
    out
}

/// CIE XYZ to linear sRGB
pub fn xyz_to_rgb(xyz: &Vec3) -> Vec3 {
    Vec3::new(
        3.240_454_2 * xyz.x - 1.537_138_5 * xyz.y - 0.498_531_4 * xyz.z,
        -0.969_266 * xyz.x + 1.876_010_8 * xyz.y + 0.041_556 * xyz.z,
        0.055_643_4 * xyz.x - 0.204_025_9 * xyz.y + 1.057_225_2 * xyz.z,
    )
}

/// Piecewise linear curve over keyed `Vec3` values
///
/// Outside the keyed range the nearest key's value is held.
#[derive(Debug, Clone, Default)]
pub struct KeyframeCurve {
    keys: Vec<(f32, Vec3)>,
}

impl KeyframeCurve {
    /// Build from `(time, value)` pairs in any order
    pub fn new(keys: &[(f32, [f32; 3])]) -> Self {
        let mut keys: Vec<(f32, Vec3)> = keys.iter().map(|&(t, v)| (t, Vec3::from(v))).collect();
        keys.sort_by(|a, b| a.0.total_cmp(&b.0));
        Self { keys }
    }

    /// Interpolated value at `time`; zero for an empty curve
    pub fn value_at(&self, time: f32) -> Vec3 {
        let upper = self.keys.partition_point(|(t, _)| *t <= time);
        match (upper, self.keys.len()) {
            (_, 0) => Vec3::zeros(),
            (0, _) => self.keys[0].1,
            (u, n) if u == n => self.keys[n - 1].1,
            (u, _) => {
                let (t0, v0) = self.keys[u - 1];
                let (t1, v1) = self.keys[u];
                if t1 <= t0 {
                    return v0;
                }
                v0.lerp(&v1, (time - t0) / (t1 - t0))
            }
        }
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the curve has no keys
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Sun luminance (XYZ) by hour of day
pub const SUN_LUMINANCE_XYZ: [(f32, [f32; 3]); 14] = [
    (5.0, [0.0, 0.0, 0.0]),
    (7.0, [12.703_322, 12.989_393, 9.100_411]),
    (8.0, [13.202_644, 13.597_814, 11.524_929]),
    (9.0, [13.192_974, 13.597_458, 12.264_488]),
    (10.0, [13.132_943, 13.535_914, 12.560_032]),
    (11.0, [13.088_722, 13.489_535, 12.692_996]),
    (12.0, [13.067_827, 13.467_483, 12.745_179]),
    (13.0, [13.069_653, 13.469_413, 12.740_822]),
    (14.0, [13.094_319, 13.495_428, 12.678_066]),
    (15.0, [13.142_133, 13.545_483, 12.526_785]),
    (16.0, [13.201_734, 13.606_017, 12.188_001]),
    (17.0, [13.182_774, 13.572_725, 11.311_157]),
    (18.0, [12.448_635, 12.672_52, 8.267_771]),
    (20.0, [0.0, 0.0, 0.0]),
];

/// Zenith sky luminance (XYZ) by hour of day
pub const SKY_LUMINANCE_XYZ: [(f32, [f32; 3]); 22] = [
    (0.0, [0.308, 0.308, 0.411]),
    (1.0, [0.308, 0.308, 0.410]),
    (2.0, [0.301, 0.301, 0.402]),
    (3.0, [0.287, 0.287, 0.382]),
    (4.0, [0.258, 0.258, 0.344]),
    (5.0, [0.258, 0.258, 0.344]),
    (7.0, [0.962_851, 1.0, 1.747_835]),
    (8.0, [0.967_787, 1.0, 1.776_762]),
    (9.0, [0.970_173, 1.0, 1.788_413]),
    (10.0, [0.971_431, 1.0, 1.794_102]),
    (11.0, [0.972_099, 1.0, 1.797_096]),
    (12.0, [0.972_385, 1.0, 1.798_389]),
    (13.0, [0.972_361, 1.0, 1.798_278]),
    (14.0, [0.972_02, 1.0, 1.796_74]),
    (15.0, [0.971_275, 1.0, 1.793_407]),
    (16.0, [0.969_885, 1.0, 1.787_078]),
    (17.0, [0.967_216, 1.0, 1.773_758]),
    (18.0, [0.961_668, 1.0, 1.739_891]),
    (20.0, [0.264, 0.264, 0.352]),
    (21.0, [0.264, 0.264, 0.352]),
    (22.0, [0.290, 0.290, 0.386]),
    (23.0, [0.303, 0.303, 0.404]),
];

impl SkyParams {
    /// Sky state for `hour` (0..24) with the built-in luminance tables
    pub fn at_hour(hour: f32, turbidity: f32, exposure: f32) -> Self {
        let sun = KeyframeCurve::new(&SUN_LUMINANCE_XYZ);
        let sky = KeyframeCurve::new(&SKY_LUMINANCE_XYZ);
        Self {
            sun_luminance: vec4(&xyz_to_rgb(&sun.value_at(hour)), 0.0),
            sky_luminance: vec4(&xyz_to_rgb(&sky.value_at(hour)), 0.0),
            perez: perez_coefficients(turbidity),
            params: [turbidity, exposure, hour, 0.0],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_layout_is_vec4_multiple() {
        assert_eq!(std::mem::size_of::<SkyParams>(), 8 * VEC4_SIZE);
        assert_eq!(std::mem::size_of::<PerFrameData>(), 12 * VEC4_SIZE + 8 * VEC4_SIZE);
        assert_eq!(std::mem::offset_of!(PerFrameData, cam_pos), 3 * 64);
        assert_eq!(std::mem::offset_of!(PerFrameData, sky), 3 * 64 + 4 * VEC4_SIZE);
    }

    #[test]
    fn test_view_proj_is_column_major_product() {
        let view = Mat4::new_translation(&Vec3::new(1.0, 2.0, 3.0));
        let proj = Mat4::new_scaling(2.0);
        let data = PerFrameData::from_camera(&view, &proj, &Vec3::new(4.0, 5.0, 6.0));
        // translation lives in the last column
        assert_relative_eq!(data.view_proj[3][0], 2.0);
        assert_relative_eq!(data.view_proj[3][1], 4.0);
        assert_relative_eq!(data.view_proj[3][2], 6.0);
        assert_eq!(data.cam_pos, [4.0, 5.0, 6.0, 1.0]);
        assert_eq!(data.sky, SkyParams::zeroed());
    }

    #[test]
    fn test_sun_direction_normalized() {
        let data = PerFrameData::zeroed().with_sun(&Vec3::new(0.0, 3.0, 4.0), &Vec3::new(1.0, 1.0, 1.0), 2.0);
        assert_relative_eq!(data.sun_dir[1], 0.6);
        assert_relative_eq!(data.sun_dir[2], 0.8);
        assert_relative_eq!(data.sun_color[3], 2.0);

        let fallback = PerFrameData::zeroed().with_sun(&Vec3::zeros(), &Vec3::zeros(), 0.0);
        assert_eq!(fallback.sun_dir, [0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_perez_coefficients() {
        let coeffs = perez_coefficients(2.0);
        assert_relative_eq!(coeffs[0][0], -0.2592 - 0.0386, epsilon = 1e-6);
        assert_relative_eq!(coeffs[2][2], 5.3251 - 0.0454, epsilon = 1e-6);
        assert!(coeffs.iter().all(|row| row[3] == 0.0));
    }

    #[test]
    fn test_curve_interpolates_and_clamps() {
        let curve = KeyframeCurve::new(&[(10.0, [2.0, 0.0, 0.0]), (0.0, [0.0, 0.0, 0.0])]);
        assert_relative_eq!(curve.value_at(5.0).x, 1.0);
        assert_relative_eq!(curve.value_at(-1.0).x, 0.0);
        assert_relative_eq!(curve.value_at(12.0).x, 2.0);
        assert_relative_eq!(curve.value_at(10.0).x, 2.0);
        assert_eq!(KeyframeCurve::default().value_at(1.0), Vec3::zeros());
    }

    #[test]
    fn test_night_has_no_sun() {
        let sky = SkyParams::at_hour(2.0, 2.5, 1.0);
        assert_eq!(sky.sun_luminance, [0.0; 4]);
        assert!(sky.sky_luminance[2] > 0.0);
        assert_relative_eq!(sky.params[0], 2.5);
    }
}
