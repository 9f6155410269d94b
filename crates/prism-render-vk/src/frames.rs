// SPDX-License-Identifier: CEPL-1.0
use std::ptr::NonNull;

use anyhow::{anyhow, Context, Result};
use ash::vk;
use gpu_allocator::vulkan::{AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use prism_math::GpuCameraData;
use prism_render::DeletionQueue;
use tracing::{debug, warn};

use crate::context::GpuContext;

const CAMERA_UBO_SIZE: vk::DeviceSize = std::mem::size_of::<GpuCameraData>() as vk::DeviceSize;
const DESCRIPTOR_POOL_UBOS: u32 = 10;
const DESCRIPTOR_POOL_SETS: u32 = 10;

/// Per-slot resources reused every `FRAME_OVERLAP` frames.
pub struct FrameSlot {
    pub command_pool: vk::CommandPool,
    pub command_buffer: vk::CommandBuffer,
    /// Signaled by the GPU when this slot's last submit finished. Created
    /// signaled so the first wait returns at once.
    pub render_fence: vk::Fence,
    /// Image-acquired.
    pub present_semaphore: vk::Semaphore,
    /// Render-complete.
    pub render_semaphore: vk::Semaphore,
    pub camera_buffer: vk::Buffer,
    camera_mapped: NonNull<u8>,
    pub global_descriptor: vk::DescriptorSet,
}

impl FrameSlot {
    /// Copies the camera block into the slot's persistently mapped uniform.
    /// The slot fence must have been waited on first.
    pub unsafe fn write_camera(&self, camera: &GpuCameraData) {
        let bytes = bytemuck::bytes_of(camera);
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.camera_mapped.as_ptr(), bytes.len());
    }
}

pub struct FramePool {
    pub slots: Vec<FrameSlot>,
    pub global_set_layout: vk::DescriptorSetLayout,
    pub descriptor_pool: vk::DescriptorPool,
}

unsafe fn create_camera_desc_set_layout(device: &ash::Device) -> Result<vk::DescriptorSetLayout> {
    let binding = vk::DescriptorSetLayoutBinding {
        binding: 0,
        descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
        descriptor_count: 1,
        stage_flags: vk::ShaderStageFlags::VERTEX,
        ..Default::default()
    };
    let ci = vk::DescriptorSetLayoutCreateInfo {
        s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
        binding_count: 1,
        p_bindings: &binding,
        ..Default::default()
    };
    Ok(device.create_descriptor_set_layout(&ci, None)?)
}

unsafe fn create_command_resources(
    device: &ash::Device,
    queue_family: u32,
    deletion: &mut DeletionQueue,
) -> Result<(vk::CommandPool, vk::CommandBuffer)> {
    let pool_info = vk::CommandPoolCreateInfo {
        s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
        queue_family_index: queue_family,
        flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        ..Default::default()
    };
    let pool = device
        .create_command_pool(&pool_info, None)
        .context("create_command_pool")?;
    {
        // Destroying the pool frees its command buffers.
        let d = device.clone();
        deletion.register(move || unsafe { d.destroy_command_pool(pool, None) });
    }
    let alloc_info = vk::CommandBufferAllocateInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
        command_pool: pool,
        level: vk::CommandBufferLevel::PRIMARY,
        command_buffer_count: 1,
        ..Default::default()
    };
    let buffer = device
        .allocate_command_buffers(&alloc_info)
        .context("allocate_command_buffers")?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("driver returned no command buffer"))?;
    Ok((pool, buffer))
}

unsafe fn create_sync_objects(
    device: &ash::Device,
    deletion: &mut DeletionQueue,
) -> Result<(vk::Fence, vk::Semaphore, vk::Semaphore)> {
    let fence_ci = vk::FenceCreateInfo {
        s_type: vk::StructureType::FENCE_CREATE_INFO,
        flags: vk::FenceCreateFlags::SIGNALED,
        ..Default::default()
    };
    let sem_ci = vk::SemaphoreCreateInfo::default();

    let fence = device.create_fence(&fence_ci, None)?;
    let d = device.clone();
    deletion.register(move || unsafe { d.destroy_fence(fence, None) });

    let present = device.create_semaphore(&sem_ci, None)?;
    let d = device.clone();
    deletion.register(move || unsafe { d.destroy_semaphore(present, None) });

    let render = device.create_semaphore(&sem_ci, None)?;
    let d = device.clone();
    deletion.register(move || unsafe { d.destroy_semaphore(render, None) });

    Ok((fence, present, render))
}

/// Host-visible uniform buffer that stays mapped for its whole life.
unsafe fn create_camera_buffer(
    ctx: &GpuContext,
    deletion: &mut DeletionQueue,
) -> Result<(vk::Buffer, NonNull<u8>)> {
    let device = &ctx.device;
    let bci = vk::BufferCreateInfo {
        s_type: vk::StructureType::BUFFER_CREATE_INFO,
        size: CAMERA_UBO_SIZE,
        usage: vk::BufferUsageFlags::UNIFORM_BUFFER,
        sharing_mode: vk::SharingMode::EXCLUSIVE,
        ..Default::default()
    };
    let buffer = device.create_buffer(&bci, None).context("create_buffer(camera)")?;
    let requirements = device.get_buffer_memory_requirements(buffer);

    let allocator = ctx.allocator()?.clone();
    let allocation = match allocator.lock().allocate(&AllocationCreateDesc {
        name: "camera",
        requirements,
        location: MemoryLocation::CpuToGpu,
        linear: true,
        allocation_scheme: AllocationScheme::GpuAllocatorManaged,
    }) {
        Ok(a) => a,
        Err(e) => {
            device.destroy_buffer(buffer, None);
            return Err(anyhow!("allocating camera buffer: {e}"));
        }
    };
    let mapped = allocation.mapped_ptr().map(|p| p.cast::<u8>());
    let bound = device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset());
    {
        let d = device.clone();
        deletion.register(move || unsafe {
            d.destroy_buffer(buffer, None);
            if let Err(e) = allocator.lock().free(allocation) {
                warn!("vk: freeing camera buffer: {e}");
            }
        });
    }
    bound.context("bind_buffer_memory(camera)")?;
    let mapped = mapped.ok_or_else(|| anyhow!("camera buffer memory is not host mapped"))?;
    Ok((buffer, mapped))
}

impl FramePool {
    // STRICT ORDER:
    // 1) Camera set layout (pipelines are built against it)
    // 2) Descriptor pool
    // 3) Per slot: command pool/buffer, fence + semaphores, camera UBO, set
    pub unsafe fn new(ctx: &GpuContext, count: usize, deletion: &mut DeletionQueue) -> Result<Self> {
        let device = &ctx.device;

        let global_set_layout = create_camera_desc_set_layout(device)?;
        {
            let d = device.clone();
            deletion.register(move || unsafe { d.destroy_descriptor_set_layout(global_set_layout, None) });
        }

        let pool_sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: DESCRIPTOR_POOL_UBOS,
        }];
        let pool_ci = vk::DescriptorPoolCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
            max_sets: DESCRIPTOR_POOL_SETS,
            pool_size_count: pool_sizes.len() as u32,
            p_pool_sizes: pool_sizes.as_ptr(),
            ..Default::default()
        };
        let descriptor_pool = device.create_descriptor_pool(&pool_ci, None)?;
        {
            // Sets are freed with the pool.
            let d = device.clone();
            deletion.register(move || unsafe { d.destroy_descriptor_pool(descriptor_pool, None) });
        }

        let mut slots = Vec::with_capacity(count);
        for i in 0..count {
            let (command_pool, command_buffer) =
                create_command_resources(device, ctx.queue_family, deletion)?;
            let (render_fence, present_semaphore, render_semaphore) =
                create_sync_objects(device, deletion)?;
            let (camera_buffer, camera_mapped) = create_camera_buffer(ctx, deletion)?;

            let alloc = vk::DescriptorSetAllocateInfo {
                s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
                descriptor_pool,
                descriptor_set_count: 1,
                p_set_layouts: &global_set_layout,
                ..Default::default()
            };
            let global_descriptor = device
                .allocate_descriptor_sets(&alloc)
                .context("allocate_descriptor_sets")?
                .into_iter()
                .next()
                .ok_or_else(|| anyhow!("driver returned no descriptor set"))?;

            let info = vk::DescriptorBufferInfo {
                buffer: camera_buffer,
                offset: 0,
                range: CAMERA_UBO_SIZE,
            };
            let write = vk::WriteDescriptorSet {
                s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                dst_set: global_descriptor,
                dst_binding: 0,
                descriptor_count: 1,
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                p_buffer_info: &info,
                ..Default::default()
            };
            device.update_descriptor_sets(std::slice::from_ref(&write), &[]);

            debug!("vk: frame slot {} ready", i);
            slots.push(FrameSlot {
                command_pool,
                command_buffer,
                render_fence,
                present_semaphore,
                render_semaphore,
                camera_buffer,
                camera_mapped,
                global_descriptor,
            });
        }

        Ok(Self {
            slots,
            global_set_layout,
            descriptor_pool,
        })
    }

    pub fn slot(&self, index: usize) -> &FrameSlot {
        &self.slots[index % self.slots.len()]
    }

    pub fn fences(&self) -> Vec<vk::Fence> {
        self.slots.iter().map(|s| s.render_fence).collect()
    }
}
