// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::path::PathBuf;
use std::time::Duration;

pub mod deletion;
pub mod frame;
pub mod material;
pub mod mesh;
pub mod obj;
pub mod registry;
pub mod scene;

pub use deletion::DeletionQueue;
pub use frame::{
    slot_for_frame, Acquire, ClearValues, DrawEngine, DrawStats, FrameDevice, FrameError,
    FrameOutcome, FrameStage, PresentStatus, WaitStatus, FRAME_OVERLAP,
};
pub use material::{Material, MaterialRegistry};
pub use mesh::{Mesh, MeshRegistry, UploadError, Vertex, VertexUploader};
pub use obj::MeshLoadError;
pub use registry::{Handle, Registry};
pub use scene::{RenderObject, Scene};

/// Bounded wait applied to fence waits and image acquisition.
pub const FRAME_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const DEFAULT: RenderSize = RenderSize {
        width: 1700,
        height: 900,
    };

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Startup knobs handed to a backend. Everything else is compiled in.
#[derive(Clone, Debug)]
pub struct RenderSettings {
    pub app_name: String,
    pub frame_timeout: Duration,
    /// Directory holding `tri_mesh.vert.spv` and `colored_triangle.frag.spv`.
    /// `None` means the blobs the backend compiled at build time.
    pub shader_dir: Option<PathBuf>,
    pub monkey_mesh: PathBuf,
    /// Half-width of the demo triangle grid; 30 gives 61x61 instances.
    pub grid_radius: i32,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            app_name: "prism".to_owned(),
            frame_timeout: FRAME_TIMEOUT,
            shader_dir: None,
            monkey_mesh: PathBuf::from("assets/monkey_lowpoly.obj"),
            grid_radius: 30,
        }
    }
}

pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: &RenderSettings,
    ) -> Result<Self>
    where
        Self: Sized;

    fn resize(&mut self, size: RenderSize) -> Result<()>;
    /// Draws one frame. `Ok(false)` means nothing was presented: the
    /// renderer is paused or the surface had to be rebuilt.
    fn render(&mut self) -> Result<bool>;
    fn frame_number(&self) -> u64;
}
