// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use ash::vk;
use prism_render::scene::DEFAULT_MATERIAL;
use prism_render::{
    DeletionQueue, DrawEngine, FrameOutcome, RenderSettings, RenderSize, Renderer, Scene,
    FRAME_OVERLAP,
};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::path::PathBuf;
use tracing::{debug, info, warn};

mod context;
mod device;
mod frames;
mod pipeline;
mod surface;
mod upload;

use context::GpuContext;
use device::VkFrameDevice;
use frames::FramePool;
use surface::SurfaceManager;
use upload::BufferUploader;

pub use pipeline::{MESH_FRAG_SHADER, MESH_VERT_SHADER};

/// Where the build script wrote the compiled SPIR-V.
pub const BUILT_SHADER_DIR: &str = env!("PRISM_SHADER_DIR");

/// The configured shader directory, or the build output when none is set.
pub fn shader_dir(settings: &RenderSettings) -> PathBuf {
    settings
        .shader_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(BUILT_SHADER_DIR))
}

pub type VkScene = Scene<vk::Buffer, vk::Pipeline, vk::PipelineLayout>;

pub struct VkRenderer {
    ctx: GpuContext,
    render_pass: vk::RenderPass,
    surface: SurfaceManager,
    frames: FramePool,
    scene: VkScene,
    engine: DrawEngine,
    /// Render pass, frame slots, pipelines and mesh buffers. Flushed after
    /// the surface queue at shutdown.
    deletion: DeletionQueue,
    state: SurfaceState,
}

/// Window size plus the pause and rebuild flags it drives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct SurfaceState {
    size: RenderSize,
    paused: bool,
    needs_rebuild: bool,
}

impl SurfaceState {
    fn new(size: RenderSize) -> Self {
        Self {
            size,
            paused: false,
            needs_rebuild: false,
        }
    }

    /// Only the window can pause or resume rendering.
    fn resize(&mut self, size: RenderSize) {
        if size.is_empty() {
            if !self.paused {
                info!("vk: resize to 0x0 → paused");
            }
            self.paused = true;
            return;
        }
        if self.paused {
            info!("vk: resize to {}x{} → resumed", size.width, size.height);
        }
        self.paused = false;
        if size != self.size {
            self.size = size;
            self.needs_rebuild = true;
        }
    }

    /// A 0x0 surface extent leaves the rebuild pending; the next frame
    /// asks again.
    fn extent_usable(&self, extent: vk::Extent2D) -> bool {
        extent.width != 0 && extent.height != 0
    }
}

/// Everything created after the context, in creation order. On failure the
/// caller flushes `deletion` and destroys the context.
unsafe fn build_on_context(
    ctx: &GpuContext,
    size: RenderSize,
    settings: &RenderSettings,
    deletion: &mut DeletionQueue,
) -> Result<(vk::RenderPass, SurfaceManager, FramePool, VkScene)> {
    let device = &ctx.device;

    // 1) Render pass against the surface's color format + chosen depth format
    let color_format = surface::query_surface_format(ctx)?;
    let depth_format = surface::pick_depth_format(&ctx.instance, ctx.phys);
    let render_pass = pipeline::create_render_pass(device, color_format, depth_format)?;
    {
        let d = device.clone();
        deletion.register(move || unsafe { d.destroy_render_pass(render_pass, None) });
    }

    // 2) Swapchain, depth, framebuffers (own deletion queue)
    let mut surface = SurfaceManager::new(ctx, render_pass, depth_format, size)?;

    let rest = (|| -> Result<(FramePool, VkScene)> {
        // 3) Frame slots (command buffers, sync, camera UBO + set)
        let frames = FramePool::new(ctx, FRAME_OVERLAP, deletion)?;

        // 4) Materials
        let mut scene = VkScene::new();
        let material = pipeline::create_mesh_material(
            device,
            render_pass,
            frames.global_set_layout,
            &shader_dir(settings),
            deletion,
        )
        .context("building the default mesh pipeline")?;
        scene.materials.register(DEFAULT_MATERIAL, material);

        // 5) Meshes, uploaded before anything can reference them
        scene.load_demo_meshes(&settings.monkey_mesh);
        let mut uploader = BufferUploader {
            device,
            allocator: ctx.allocator()?,
        };
        let uploaded = scene.meshes.upload_all(&mut uploader, deletion)?;
        debug!("vk: {} meshes uploaded", uploaded);

        // 6) Render list
        scene.populate_demo(settings.grid_radius);
        Ok((frames, scene))
    })();

    match rest {
        Ok((frames, scene)) => Ok((render_pass, surface, frames, scene)),
        Err(e) => {
            device.device_wait_idle().ok();
            surface.destroy();
            Err(e)
        }
    }
}

unsafe fn build_renderer(
    window: &dyn HasWindowHandle,
    display: &dyn HasDisplayHandle,
    size: RenderSize,
    settings: &RenderSettings,
) -> Result<VkRenderer> {
    let mut ctx = GpuContext::new(window, display, &settings.app_name)?;
    let mut deletion = DeletionQueue::new();

    match build_on_context(&ctx, size, settings, &mut deletion) {
        Ok((render_pass, surface, frames, scene)) => {
            info!(
                "vk: renderer ready ({} frame slots, {} objects)",
                frames.slots.len(),
                scene.len()
            );
            Ok(VkRenderer {
                ctx,
                render_pass,
                surface,
                frames,
                scene,
                engine: DrawEngine::new(FRAME_OVERLAP, settings.frame_timeout),
                deletion,
                state: SurfaceState::new(size),
            })
        }
        Err(e) => {
            ctx.device.device_wait_idle().ok();
            deletion.flush();
            ctx.destroy();
            Err(e)
        }
    }
}

impl VkRenderer {
    pub fn scene(&self) -> &VkScene {
        &self.scene
    }

    /// Returns `false` when the surface is 0x0 and the rebuild was put off.
    unsafe fn rebuild_surface(&mut self) -> Result<bool> {
        let caps = self
            .ctx
            .surface_loader
            .get_physical_device_surface_capabilities(self.ctx.phys, self.ctx.surface)
            .context("get_physical_device_surface_capabilities")?;
        let extent = surface::extent_from_caps(&caps, self.state.size);
        if !self.state.extent_usable(extent) {
            debug!("vk: surface is 0x0, swapchain rebuild deferred");
            return Ok(false);
        }

        self.ctx
            .device
            .device_wait_idle()
            .context("device_wait_idle(rebuild)")?;
        self.surface
            .rebuild(&self.ctx, self.render_pass, self.state.size)
            .context("rebuilding swapchain")?;
        self.state.needs_rebuild = false;
        Ok(true)
    }
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: &RenderSettings,
    ) -> Result<Self> {
        unsafe { build_renderer(window, display, size, settings) }
    }

    fn resize(&mut self, size: RenderSize) -> Result<()> {
        self.state.resize(size);
        Ok(())
    }

    fn render(&mut self) -> Result<bool> {
        if self.state.paused {
            return Ok(false);
        }
        if self.state.needs_rebuild && !unsafe { self.rebuild_surface()? } {
            return Ok(false);
        }

        let outcome = {
            let mut device = VkFrameDevice {
                ctx: &self.ctx,
                surface: &self.surface,
                frames: &self.frames,
                render_pass: self.render_pass,
            };
            self.engine.draw_frame(&mut device, &self.scene)?
        };

        match outcome {
            FrameOutcome::Presented { stale: true, .. } => {
                debug!("vk: swapchain suboptimal, rebuilding before next frame");
                self.state.needs_rebuild = true;
            }
            FrameOutcome::Presented { .. } => {}
            FrameOutcome::SurfaceOutOfDate => {
                debug!("vk: swapchain out of date, frame skipped");
                self.state.needs_rebuild = true;
            }
        }
        Ok(outcome.is_presented())
    }

    fn frame_number(&self) -> u64 {
        self.engine.frame_number()
    }
}

// STRICT TEARDOWN ORDER:
// - Wait every slot fence (bounded), then device_wait_idle()
// - Surface queue: framebuffers, depth, image views, swapchain
// - Main queue, newest first: mesh buffers, pipelines + layouts, frame slots,
//   descriptor pool + set layout, render pass
// - Allocator, device, surface, debug messenger, instance (GpuContext::destroy)
impl Drop for VkRenderer {
    fn drop(&mut self) {
        unsafe {
            let fences = self.frames.fences();
            if !fences.is_empty() {
                let timeout = u64::try_from(self.engine.timeout().as_nanos()).unwrap_or(u64::MAX);
                if let Err(e) = self.ctx.device.wait_for_fences(&fences, true, timeout) {
                    warn!("vk: waiting for frame fences at shutdown: {e:?}");
                }
            }
            self.ctx.device.device_wait_idle().ok();

            self.surface.destroy();
            self.deletion.flush();
            self.ctx.destroy();
        }
        info!("vk: renderer destroyed after {} frames", self.engine.frame_number());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    #[test]
    fn default_settings_load_the_built_spirv() {
        let dir = shader_dir(&RenderSettings::default());
        assert_eq!(dir, PathBuf::from(BUILT_SHADER_DIR));
        for name in [MESH_VERT_SHADER, MESH_FRAG_SHADER] {
            let bytes = std::fs::read(dir.join(name)).unwrap();
            assert_eq!(bytes.len() % 4, 0, "{name}");
            assert_eq!(&bytes[..4], &SPIRV_MAGIC.to_ne_bytes(), "{name}");
        }
    }

    #[test]
    fn zero_window_pauses_until_resized() {
        let mut state = SurfaceState::new(RenderSize::DEFAULT);
        state.resize(RenderSize {
            width: 0,
            height: 900,
        });
        assert!(state.paused);
        assert!(!state.needs_rebuild);

        state.resize(RenderSize {
            width: 800,
            height: 600,
        });
        assert!(!state.paused);
        assert!(state.needs_rebuild);
        assert_eq!(state.size.width, 800);
    }

    #[test]
    fn same_size_resize_needs_no_rebuild() {
        let mut state = SurfaceState::new(RenderSize::DEFAULT);
        state.resize(RenderSize::DEFAULT);
        assert_eq!(state, SurfaceState::new(RenderSize::DEFAULT));
    }

    #[test]
    fn zero_surface_extent_keeps_the_rebuild_pending() {
        let mut state = SurfaceState::new(RenderSize::DEFAULT);
        state.needs_rebuild = true;
        let zero = vk::Extent2D {
            width: 0,
            height: 0,
        };
        assert!(!state.extent_usable(zero));
        // Still drawing-eligible, so the next frame retries the rebuild.
        assert!(!state.paused);
        assert!(state.needs_rebuild);
        assert!(state.extent_usable(vk::Extent2D {
            width: 1700,
            height: 900,
        }));
    }

    #[test]
    fn configured_shader_dir_is_used_as_is() {
        let settings = RenderSettings {
            shader_dir: Some(PathBuf::from("custom/spv")),
            ..RenderSettings::default()
        };
        assert_eq!(shader_dir(&settings), PathBuf::from("custom/spv"));
    }
}
