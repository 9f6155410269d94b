// SPDX-License-Identifier: CEPL-1.0
//! Vulkan side of the frame protocol: one borrowed view over the context,
//! the surface and the slot pool, rebuilt every frame.
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use ash::vk;
use prism_math::{GpuCameraData, MeshPushConstants};
use prism_render::{Acquire, ClearValues, FrameDevice, PresentStatus, WaitStatus};

use crate::context::GpuContext;
use crate::frames::FramePool;
use crate::surface::SurfaceManager;

pub struct VkFrameDevice<'a> {
    pub ctx: &'a GpuContext,
    pub surface: &'a SurfaceManager,
    pub frames: &'a FramePool,
    pub render_pass: vk::RenderPass,
}

fn timeout_ns(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX)
}

impl VkFrameDevice<'_> {
    fn cmd(&self, slot: usize) -> vk::CommandBuffer {
        self.frames.slot(slot).command_buffer
    }
}

impl FrameDevice for VkFrameDevice<'_> {
    type Buffer = vk::Buffer;
    type Pipeline = vk::Pipeline;
    type Layout = vk::PipelineLayout;

    fn wait_for_slot(&mut self, slot: usize, timeout: Duration) -> Result<WaitStatus> {
        let fence = self.frames.slot(slot).render_fence;
        match unsafe { self.ctx.device.wait_for_fences(&[fence], true, timeout_ns(timeout)) } {
            Ok(()) => Ok(WaitStatus::Signaled),
            Err(vk::Result::TIMEOUT) => Ok(WaitStatus::TimedOut),
            Err(e) => Err(anyhow!("wait_for_fences: {e:?}")),
        }
    }

    fn reset_slot(&mut self, slot: usize) -> Result<()> {
        let s = self.frames.slot(slot);
        unsafe {
            self.ctx
                .device
                .reset_fences(&[s.render_fence])
                .context("reset_fences")?;
            self.ctx
                .device
                .reset_command_buffer(s.command_buffer, vk::CommandBufferResetFlags::empty())
                .context("reset_command_buffer")?;
        }
        Ok(())
    }

    fn acquire_image(&mut self, slot: usize, timeout: Duration) -> Result<Acquire> {
        let s = self.frames.slot(slot);
        let acquired = unsafe {
            self.ctx.swapchain_loader.acquire_next_image(
                self.surface.swapchain,
                timeout_ns(timeout),
                s.present_semaphore,
                vk::Fence::null(),
            )
        };
        match acquired {
            Ok((index, suboptimal)) => Ok(Acquire::Image { index, suboptimal }),
            Err(vk::Result::TIMEOUT) | Err(vk::Result::NOT_READY) => Ok(Acquire::TimedOut),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquire::OutOfDate),
            Err(e) => Err(anyhow!("acquire_next_image: {e:?}")),
        }
    }

    // An empty submit signals the fence once everything already queued has
    // finished, so the next wait on this slot still has something to see.
    fn release_slot(&mut self, slot: usize) -> Result<()> {
        let fence = self.frames.slot(slot).render_fence;
        unsafe {
            self.ctx
                .device
                .queue_submit(self.ctx.queue, &[], fence)
                .context("queue_submit(release slot)")
        }
    }

    fn begin_frame(&mut self, slot: usize, image: u32, clear: &ClearValues) -> Result<()> {
        let cmd = self.cmd(slot);
        let framebuffer = *self
            .surface
            .framebuffers
            .get(image as usize)
            .ok_or_else(|| anyhow!("no framebuffer for swapchain image {image}"))?;
        let extent = self.surface.extent;
        let d = &self.ctx.device;
        unsafe {
            let begin = vk::CommandBufferBeginInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
                ..Default::default()
            };
            d.begin_command_buffer(cmd, &begin)
                .context("begin_command_buffer")?;

            let clear_values = [
                vk::ClearValue {
                    color: vk::ClearColorValue {
                        float32: clear.color,
                    },
                },
                vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue {
                        depth: clear.depth,
                        stencil: 0,
                    },
                },
            ];
            let rp_info = vk::RenderPassBeginInfo {
                s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
                render_pass: self.render_pass,
                framebuffer,
                render_area: vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent,
                },
                clear_value_count: clear_values.len() as u32,
                p_clear_values: clear_values.as_ptr(),
                ..Default::default()
            };
            d.cmd_begin_render_pass(cmd, &rp_info, vk::SubpassContents::INLINE);

            let viewport = vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width as f32,
                height: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            };
            let scissor = vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            };
            d.cmd_set_viewport(cmd, 0, &[viewport]);
            d.cmd_set_scissor(cmd, 0, &[scissor]);
        }
        Ok(())
    }

    fn write_camera(&mut self, slot: usize, camera: &GpuCameraData) -> Result<()> {
        unsafe { self.frames.slot(slot).write_camera(camera) };
        Ok(())
    }

    fn bind_material(&mut self, slot: usize, pipeline: vk::Pipeline, layout: vk::PipelineLayout) {
        let s = self.frames.slot(slot);
        let d = &self.ctx.device;
        unsafe {
            d.cmd_bind_pipeline(s.command_buffer, vk::PipelineBindPoint::GRAPHICS, pipeline);
            d.cmd_bind_descriptor_sets(
                s.command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                0,
                &[s.global_descriptor],
                &[],
            );
        }
    }

    fn push_constants(&mut self, slot: usize, layout: vk::PipelineLayout, constants: &MeshPushConstants) {
        unsafe {
            self.ctx.device.cmd_push_constants(
                self.cmd(slot),
                layout,
                vk::ShaderStageFlags::VERTEX,
                0,
                bytemuck::bytes_of(constants),
            );
        }
    }

    fn bind_vertex_buffer(&mut self, slot: usize, buffer: vk::Buffer) {
        unsafe {
            self.ctx
                .device
                .cmd_bind_vertex_buffers(self.cmd(slot), 0, &[buffer], &[0]);
        }
    }

    fn draw(&mut self, slot: usize, vertex_count: u32) {
        unsafe { self.ctx.device.cmd_draw(self.cmd(slot), vertex_count, 1, 0, 0) };
    }

    fn end_frame(&mut self, slot: usize) -> Result<()> {
        let cmd = self.cmd(slot);
        unsafe {
            self.ctx.device.cmd_end_render_pass(cmd);
            self.ctx
                .device
                .end_command_buffer(cmd)
                .context("end_command_buffer")
        }
    }

    // STRICT: wait on image-acquired at COLOR_ATTACHMENT_OUTPUT, signal
    // render-complete for present and the slot fence for the CPU.
    fn submit(&mut self, slot: usize) -> Result<()> {
        let s = self.frames.slot(slot);
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &s.present_semaphore,
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &s.command_buffer,
            signal_semaphore_count: 1,
            p_signal_semaphores: &s.render_semaphore,
            ..Default::default()
        };
        unsafe {
            self.ctx
                .device
                .queue_submit(self.ctx.queue, std::slice::from_ref(&submit), s.render_fence)
                .context("queue_submit")
        }
    }

    fn present(&mut self, slot: usize, image: u32) -> Result<PresentStatus> {
        let s = self.frames.slot(slot);
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &s.render_semaphore,
            swapchain_count: 1,
            p_swapchains: &self.surface.swapchain,
            p_image_indices: &image,
            ..Default::default()
        };
        match unsafe { self.ctx.swapchain_loader.queue_present(self.ctx.queue, &present) } {
            Ok(false) => Ok(PresentStatus::Presented),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentStatus::Stale),
            Err(e) => Err(anyhow!("queue_present: {e:?}")),
        }
    }

    fn extent(&self) -> (u32, u32) {
        (self.surface.extent.width, self.surface.extent.height)
    }
}
