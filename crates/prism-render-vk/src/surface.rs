// SPDX-License-Identifier: CEPL-1.0
//! Swapchain, depth buffer and framebuffers. Everything sized to the window
//! lives here under its own deletion queue so a resize can drop and rebuild
//! it without touching the rest of the renderer.
use anyhow::{anyhow, bail, Context, Result};
use ash::vk;
use gpu_allocator::vulkan::{AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use prism_render::{DeletionQueue, RenderSize};
use tracing::{info, warn};

use crate::context::GpuContext;

pub struct SurfaceManager {
    pub swapchain: vk::SwapchainKHR,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub depth_format: vk::Format,
    pub depth_image: vk::Image,
    pub depth_view: vk::ImageView,
    pub framebuffers: Vec<vk::Framebuffer>,
    deletion: DeletionQueue,
}

// Info only
fn pm_name(m: vk::PresentModeKHR) -> &'static str {
    match m {
        vk::PresentModeKHR::IMMEDIATE => "IMMEDIATE",
        vk::PresentModeKHR::MAILBOX => "MAILBOX",
        vk::PresentModeKHR::FIFO => "FIFO",
        vk::PresentModeKHR::FIFO_RELAXED => "FIFO_RELAXED",
        _ => "OTHER",
    }
}

/// FIFO is the only mode every implementation must offer, and it paces the
/// loop to the display.
fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if !modes.contains(&vk::PresentModeKHR::FIFO) {
        warn!("vk: surface does not list FIFO; using it anyway");
    }
    vk::PresentModeKHR::FIFO
}

fn pick_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Result<vk::SurfaceFormatKHR> {
    let preferred = [vk::Format::B8G8R8A8_UNORM, vk::Format::R8G8B8A8_UNORM];
    preferred
        .iter()
        .find_map(|&want| {
            formats.iter().copied().find(|f| {
                f.format == want && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
        })
        .or_else(|| formats.first().copied())
        .ok_or_else(|| anyhow!("surface reports no formats"))
}

pub(crate) fn extent_from_caps(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

pub(crate) fn image_count_from_caps(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    if caps.max_image_count == 0 {
        caps.min_image_count + 1
    } else {
        (caps.min_image_count + 1).min(caps.max_image_count)
    }
}

pub unsafe fn pick_depth_format(instance: &ash::Instance, phys: vk::PhysicalDevice) -> vk::Format {
    // Prefer 32f → 32f+S8 → 24+S8 → 16
    let candidates = [
        vk::Format::D32_SFLOAT,
        vk::Format::D32_SFLOAT_S8_UINT,
        vk::Format::D24_UNORM_S8_UINT,
        vk::Format::D16_UNORM,
    ];
    for &fmt in &candidates {
        let props = instance.get_physical_device_format_properties(phys, fmt);
        if props
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        {
            return fmt;
        }
    }
    vk::Format::D32_SFLOAT
}

/// Surface format the swapchain will use. Needed before the render pass can
/// be built.
pub unsafe fn query_surface_format(ctx: &GpuContext) -> Result<vk::Format> {
    let formats = ctx
        .surface_loader
        .get_physical_device_surface_formats(ctx.phys, ctx.surface)
        .context("get_physical_device_surface_formats")?;
    Ok(pick_surface_format(&formats)?.format)
}

unsafe fn create_depth_resources(
    ctx: &GpuContext,
    extent: vk::Extent2D,
    depth_format: vk::Format,
    deletion: &mut DeletionQueue,
) -> Result<(vk::Image, vk::ImageView)> {
    let device = &ctx.device;
    let img_ci = vk::ImageCreateInfo {
        s_type: vk::StructureType::IMAGE_CREATE_INFO,
        image_type: vk::ImageType::TYPE_2D,
        format: depth_format,
        extent: vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        },
        mip_levels: 1,
        array_layers: 1,
        samples: vk::SampleCountFlags::TYPE_1,
        tiling: vk::ImageTiling::OPTIMAL,
        usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        sharing_mode: vk::SharingMode::EXCLUSIVE,
        ..Default::default()
    };
    let image = device.create_image(&img_ci, None).context("create_image(depth)")?;

    let requirements = device.get_image_memory_requirements(image);
    let allocator = ctx.allocator()?.clone();
    let allocation = match allocator.lock().allocate(&AllocationCreateDesc {
        name: "depth",
        requirements,
        location: MemoryLocation::GpuOnly,
        linear: false,
        allocation_scheme: AllocationScheme::GpuAllocatorManaged,
    }) {
        Ok(a) => a,
        Err(e) => {
            device.destroy_image(image, None);
            return Err(anyhow!("allocating depth memory: {e}"));
        }
    };
    let bound = device.bind_image_memory(image, allocation.memory(), allocation.offset());
    {
        let device = device.clone();
        let allocator = allocator.clone();
        deletion.register(move || unsafe {
            device.destroy_image(image, None);
            if let Err(e) = allocator.lock().free(allocation) {
                warn!("vk: freeing depth memory: {e}");
            }
        });
    }
    bound.context("bind_image_memory(depth)")?;

    let view_ci = vk::ImageViewCreateInfo {
        s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
        image,
        view_type: vk::ImageViewType::TYPE_2D,
        format: depth_format,
        subresource_range: vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::DEPTH,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        },
        ..Default::default()
    };
    let view = device
        .create_image_view(&view_ci, None)
        .context("create_image_view(depth)")?;
    {
        let device = device.clone();
        deletion.register(move || unsafe { device.destroy_image_view(view, None) });
    }
    Ok((image, view))
}

impl SurfaceManager {
    pub unsafe fn new(
        ctx: &GpuContext,
        render_pass: vk::RenderPass,
        depth_format: vk::Format,
        size: RenderSize,
    ) -> Result<Self> {
        let mut deletion = DeletionQueue::new();
        match Self::create_in(ctx, render_pass, depth_format, size, &mut deletion) {
            Ok(mut surface) => {
                surface.deletion = deletion;
                Ok(surface)
            }
            Err(e) => {
                deletion.flush();
                Err(e)
            }
        }
    }

    // STRICT ORDER:
    // 1) Swapchain + image views
    // 2) Depth image (same extent) + view
    // 3) One framebuffer per swapchain image: [color view, shared depth view]
    // Teardown runs the reverse through `deletion`.
    unsafe fn create_in(
        ctx: &GpuContext,
        render_pass: vk::RenderPass,
        depth_format: vk::Format,
        size: RenderSize,
        deletion: &mut DeletionQueue,
    ) -> Result<Self> {
        let device = &ctx.device;
        let caps = ctx
            .surface_loader
            .get_physical_device_surface_capabilities(ctx.phys, ctx.surface)?;
        let formats = ctx
            .surface_loader
            .get_physical_device_surface_formats(ctx.phys, ctx.surface)?;
        let modes = ctx
            .surface_loader
            .get_physical_device_surface_present_modes(ctx.phys, ctx.surface)?;

        let surf_format = pick_surface_format(&formats)?;
        let present_mode = choose_present_mode(&modes);
        let extent = extent_from_caps(&caps, size);
        if extent.width == 0 || extent.height == 0 {
            bail!("surface extent is 0x0");
        }
        let min_count = image_count_from_caps(&caps);

        let pre_transform = if caps
            .supported_transforms
            .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
        {
            vk::SurfaceTransformFlagsKHR::IDENTITY
        } else {
            caps.current_transform
        };

        let swap_info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: ctx.surface,
            min_image_count: min_count,
            image_format: surf_format.format,
            image_color_space: surf_format.color_space,
            image_extent: extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: vk::SharingMode::EXCLUSIVE,
            pre_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode,
            clipped: vk::TRUE,
            old_swapchain: vk::SwapchainKHR::null(),
            ..Default::default()
        };
        let swapchain = ctx
            .swapchain_loader
            .create_swapchain(&swap_info, None)
            .context("create_swapchain")?;
        {
            let loader = ctx.swapchain_loader.clone();
            deletion.register(move || unsafe { loader.destroy_swapchain(swapchain, None) });
        }
        let images = ctx.swapchain_loader.get_swapchain_images(swapchain)?;

        let mut image_views = Vec::with_capacity(images.len());
        for &img in &images {
            let iv_info = vk::ImageViewCreateInfo {
                s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
                image: img,
                view_type: vk::ImageViewType::TYPE_2D,
                format: surf_format.format,
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                ..Default::default()
            };
            let view = device.create_image_view(&iv_info, None)?;
            let d = device.clone();
            deletion.register(move || unsafe { d.destroy_image_view(view, None) });
            image_views.push(view);
        }

        let (depth_image, depth_view) = create_depth_resources(ctx, extent, depth_format, deletion)?;

        let mut framebuffers = Vec::with_capacity(image_views.len());
        for &view in &image_views {
            let attachments = [view, depth_view];
            let fb_info = vk::FramebufferCreateInfo {
                s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
                render_pass,
                attachment_count: attachments.len() as u32,
                p_attachments: attachments.as_ptr(),
                width: extent.width,
                height: extent.height,
                layers: 1,
                ..Default::default()
            };
            let fb = device
                .create_framebuffer(&fb_info, None)
                .context("create_framebuffer")?;
            let d = device.clone();
            deletion.register(move || unsafe { d.destroy_framebuffer(fb, None) });
            framebuffers.push(fb);
        }

        info!(
            "vk: swapchain {}x{}, {} images, format {:?}, depth {:?}, present {}",
            extent.width,
            extent.height,
            images.len(),
            surf_format.format,
            depth_format,
            pm_name(present_mode)
        );

        Ok(Self {
            swapchain,
            format: surf_format.format,
            extent,
            images,
            image_views,
            depth_format,
            depth_image,
            depth_view,
            framebuffers,
            deletion: DeletionQueue::new(),
        })
    }

    /// Drops every size-dependent object and builds a fresh set. The caller
    /// waits for the device to go idle first. A format change is an error
    /// because pipelines and the render pass were built against the old one.
    pub unsafe fn rebuild(
        &mut self,
        ctx: &GpuContext,
        render_pass: vk::RenderPass,
        size: RenderSize,
    ) -> Result<()> {
        let old_format = self.format;
        self.destroy();
        *self = Self::new(ctx, render_pass, self.depth_format, size)?;
        if self.format != old_format {
            bail!(
                "surface format changed from {:?} to {:?}",
                old_format,
                self.format
            );
        }
        Ok(())
    }

    /// Runs the queued teardown. The device must be idle.
    pub fn destroy(&mut self) {
        self.deletion.flush();
        self.framebuffers.clear();
        self.image_views.clear();
        self.images.clear();
        self.swapchain = vk::SwapchainKHR::null();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(current: (u32, u32), min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            min_image_count: min,
            max_image_count: max,
            ..Default::default()
        }
    }

    #[test]
    fn fixed_surface_extent_wins() {
        let e = extent_from_caps(&caps((800, 600), 2, 3), RenderSize::DEFAULT);
        assert_eq!((e.width, e.height), (800, 600));
    }

    #[test]
    fn free_surface_uses_requested_size_clamped() {
        let e = extent_from_caps(
            &caps((u32::MAX, u32::MAX), 2, 3),
            RenderSize {
                width: 9000,
                height: 900,
            },
        );
        assert_eq!((e.width, e.height), (4096, 900));
    }

    #[test]
    fn image_count_is_min_plus_one_capped() {
        assert_eq!(image_count_from_caps(&caps((1, 1), 2, 0)), 3);
        assert_eq!(image_count_from_caps(&caps((1, 1), 2, 2)), 2);
    }

    #[test]
    fn srgb_nonlinear_bgra_preferred() {
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::R16G16B16A16_SFLOAT,
                color_space: vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];
        assert_eq!(
            pick_surface_format(&formats).unwrap().format,
            vk::Format::B8G8R8A8_UNORM
        );
        assert!(pick_surface_format(&[]).is_err());
    }

    #[test]
    fn present_mode_is_fifo() {
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO]),
            vk::PresentModeKHR::FIFO
        );
    }
}
