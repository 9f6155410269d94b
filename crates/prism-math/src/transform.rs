// SPDX-License-Identifier: CEPL-1.0
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

/// Inline constant block pushed once per draw (vertex stage).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct MeshPushConstants {
    pub data: Vec4,
    pub render_matrix: Mat4,
}

impl MeshPushConstants {
    pub fn for_model(model: Mat4) -> Self {
        Self {
            data: Vec4::ZERO,
            render_matrix: model,
        }
    }
}

/// Places a uniformly scaled instance at (x, 0, z).
pub fn grid_transform(x: i32, z: i32, scale: f32) -> Mat4 {
    Mat4::from_translation(Vec3::new(x as f32, 0.0, z as f32)) * Mat4::from_scale(Vec3::splat(scale))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_block_fits_the_guaranteed_minimum() {
        // 128 bytes is the smallest maxPushConstantsSize a device may report.
        assert_eq!(std::mem::size_of::<MeshPushConstants>(), 80);
    }

    #[test]
    fn grid_transform_scales_then_translates() {
        let m = grid_transform(3, -2, 0.2);
        let p = m.transform_point3(Vec3::new(1.0, 1.0, 1.0));
        assert!((p - Vec3::new(3.2, 0.2, -1.8)).length() < 1e-5);
    }
}
