// SPDX-License-Identifier: CEPL-1.0
//! Matrix helpers and the GPU-facing data blocks shared by every backend.
mod camera;
mod transform;

pub use camera::{aspect_ratio, CameraPose, GpuCameraData};
pub use glam::{self, Mat4, Vec3, Vec4};
pub use transform::{grid_transform, MeshPushConstants};
