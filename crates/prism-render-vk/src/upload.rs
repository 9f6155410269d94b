// SPDX-License-Identifier: CEPL-1.0
use anyhow::{anyhow, Context, Result};
use ash::vk;
use gpu_allocator::vulkan::{AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use prism_render::{DeletionQueue, VertexUploader};
use tracing::warn;

use crate::context::SharedAllocator;

/// Vertex buffers in host-visible memory, written through the persistent
/// mapping. No staging copy.
pub struct BufferUploader<'a> {
    pub device: &'a ash::Device,
    pub allocator: &'a SharedAllocator,
}

impl VertexUploader for BufferUploader<'_> {
    type Buffer = vk::Buffer;

    fn upload_vertices(&mut self, bytes: &[u8], deletion: &mut DeletionQueue) -> Result<vk::Buffer> {
        let device = self.device;
        unsafe {
            let bci = vk::BufferCreateInfo {
                s_type: vk::StructureType::BUFFER_CREATE_INFO,
                size: bytes.len() as vk::DeviceSize,
                usage: vk::BufferUsageFlags::VERTEX_BUFFER,
                sharing_mode: vk::SharingMode::EXCLUSIVE,
                ..Default::default()
            };
            let buffer = device.create_buffer(&bci, None).context("create_buffer(vertex)")?;
            let requirements = device.get_buffer_memory_requirements(buffer);

            let mut allocation = match self.allocator.lock().allocate(&AllocationCreateDesc {
                name: "vertices",
                requirements,
                location: MemoryLocation::CpuToGpu,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            }) {
                Ok(a) => a,
                Err(e) => {
                    device.destroy_buffer(buffer, None);
                    return Err(anyhow!("allocating vertex memory: {e}"));
                }
            };
            let copied = match allocation.mapped_slice_mut() {
                Some(mapped) if mapped.len() >= bytes.len() => {
                    mapped[..bytes.len()].copy_from_slice(bytes);
                    true
                }
                _ => false,
            };
            let bound = device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset());

            let d = device.clone();
            let allocator = self.allocator.clone();
            deletion.register(move || unsafe {
                d.destroy_buffer(buffer, None);
                if let Err(e) = allocator.lock().free(allocation) {
                    warn!("vk: freeing vertex buffer: {e}");
                }
            });

            bound.context("bind_buffer_memory(vertex)")?;
            if !copied {
                return Err(anyhow!("vertex memory is not host mapped"));
            }
            Ok(buffer)
        }
    }
}
