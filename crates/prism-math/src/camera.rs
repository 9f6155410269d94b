// SPDX-License-Identifier: CEPL-1.0
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// Per-frame camera uniform, std140-compatible (three column-major mat4).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GpuCameraData {
    pub view: Mat4,
    pub proj: Mat4,
    pub viewproj: Mat4,
}

/// A fixed camera: a world translation plus perspective parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraPose {
    pub position: Vec3,
    pub fov_y_degrees: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for CameraPose {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, -6.0, -10.0),
            fov_y_degrees: 70.0,
            near: 0.1,
            far: 200.0,
        }
    }
}

impl CameraPose {
    pub fn view(&self) -> Mat4 {
        Mat4::from_translation(self.position)
    }

    /// Right-handed perspective with a [0, 1] depth range. Y is flipped so
    /// +Y points up in Vulkan clip space.
    pub fn projection(&self, aspect: f32) -> Mat4 {
        let mut proj =
            Mat4::perspective_rh(self.fov_y_degrees.to_radians(), aspect, self.near, self.far);
        proj.y_axis.y *= -1.0;
        proj
    }

    pub fn gpu_data(&self, width: u32, height: u32) -> GpuCameraData {
        let view = self.view();
        let proj = self.projection(aspect_ratio(width, height));
        GpuCameraData {
            view,
            proj,
            viewproj: proj * view,
        }
    }
}

/// Width over height; degenerate extents fall back to 1.0.
pub fn aspect_ratio(width: u32, height: u32) -> f32 {
    if width == 0 || height == 0 {
        return 1.0;
    }
    width as f32 / height as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_block_is_three_mat4() {
        assert_eq!(std::mem::size_of::<GpuCameraData>(), 3 * 64);
    }

    #[test]
    fn projection_flips_y_for_vulkan() {
        let pose = CameraPose::default();
        let gl_style = Mat4::perspective_rh(70f32.to_radians(), 1.0, 0.1, 200.0);
        let ours = pose.projection(1.0);
        assert_eq!(ours.y_axis.y, -gl_style.y_axis.y);
        assert_eq!(ours.x_axis.x, gl_style.x_axis.x);
    }

    #[test]
    fn viewproj_is_proj_times_view() {
        let data = CameraPose::default().gpu_data(1700, 900);
        assert_eq!(data.viewproj, data.proj * data.view);
        assert_eq!(data.view.w_axis.truncate(), Vec3::new(0.0, -6.0, -10.0));
    }

    #[test]
    fn aspect_ratio_guards_zero_extent() {
        assert_eq!(aspect_ratio(0, 900), 1.0);
        assert_eq!(aspect_ratio(1700, 0), 1.0);
        assert!((aspect_ratio(1700, 900) - 1.888_888_9).abs() < 1e-5);
    }
}
