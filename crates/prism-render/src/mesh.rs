// SPDX-License-Identifier: CEPL-1.0
use std::fmt;
use std::path::Path;

use bytemuck::{Pod, Zeroable};
use thiserror::Error;
use tracing::{debug, info};

use crate::deletion::DeletionQueue;
use crate::obj::{self, MeshLoadError};
use crate::registry::{Handle, Registry};

/// Interleaved vertex as laid out in the vertex buffer (binding 0).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub color: [f32; 3],
}

impl Vertex {
    pub const STRIDE: usize = std::mem::size_of::<Vertex>();

    pub fn new(position: [f32; 3], normal: [f32; 3], color: [f32; 3]) -> Self {
        Self {
            position,
            normal,
            color,
        }
    }
}

/// CPU vertices plus the GPU buffer they were last uploaded into.
#[derive(Clone, Debug, PartialEq)]
pub struct Mesh<B> {
    vertices: Vec<Vertex>,
    vertex_buffer: Option<B>,
}

impl<B: Copy> Mesh<B> {
    pub fn new(vertices: Vec<Vertex>) -> Self {
        Self {
            vertices,
            vertex_buffer: None,
        }
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertices.len() as u32
    }

    pub fn byte_size(&self) -> usize {
        self.vertices.len() * Vertex::STRIDE
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    /// `None` until [`Registry::upload`] has run for this mesh.
    pub fn vertex_buffer(&self) -> Option<B> {
        self.vertex_buffer
    }

    pub fn is_uploaded(&self) -> bool {
        self.vertex_buffer.is_some()
    }
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("mesh '{0}' has no vertices")]
    Empty(String),
    #[error("unknown mesh handle {0}")]
    UnknownMesh(usize),
    #[error("vertex buffer for '{name}' could not be created: {source}")]
    Device {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Backend side of mesh upload.
pub trait VertexUploader {
    type Buffer: Copy + PartialEq + fmt::Debug;

    /// Creates a host-visible vertex buffer of exactly `bytes.len()` bytes,
    /// copies `bytes` into it, and registers the buffer's teardown in
    /// `deletion` before returning.
    fn upload_vertices(
        &mut self,
        bytes: &[u8],
        deletion: &mut DeletionQueue,
    ) -> anyhow::Result<Self::Buffer>;
}

pub type MeshRegistry<B> = Registry<Mesh<B>>;

impl<B: Copy + PartialEq + fmt::Debug> Registry<Mesh<B>> {
    pub fn load(&mut self, name: &str, vertices: Vec<Vertex>) -> Handle<Mesh<B>> {
        debug!("mesh '{}' registered ({} vertices)", name, vertices.len());
        self.register(name, Mesh::new(vertices))
    }

    pub fn load_from_file(
        &mut self,
        name: &str,
        path: impl AsRef<Path>,
    ) -> Result<Handle<Mesh<B>>, MeshLoadError> {
        let vertices = obj::load_obj_file(path.as_ref())?;
        info!(
            "mesh '{}' loaded from {} ({} vertices)",
            name,
            path.as_ref().display(),
            vertices.len()
        );
        Ok(self.load(name, vertices))
    }

    /// Copies the mesh into a fresh GPU buffer. Uploading again allocates a
    /// new buffer; the old one stays alive until the deletion queue flushes,
    /// so in-flight frames that still reference it are unaffected.
    pub fn upload<U>(
        &mut self,
        handle: Handle<Mesh<B>>,
        uploader: &mut U,
        deletion: &mut DeletionQueue,
    ) -> Result<B, UploadError>
    where
        U: VertexUploader<Buffer = B>,
    {
        let name = self.name(handle).unwrap_or("<unnamed>").to_owned();
        let mesh = self
            .get_mut(handle)
            .ok_or(UploadError::UnknownMesh(handle.index()))?;
        if mesh.vertices.is_empty() {
            return Err(UploadError::Empty(name));
        }
        let buffer = uploader
            .upload_vertices(mesh.as_bytes(), deletion)
            .map_err(|source| UploadError::Device {
                name: name.clone(),
                source,
            })?;
        mesh.vertex_buffer = Some(buffer);
        debug!("mesh '{}' uploaded ({} bytes)", name, mesh.byte_size());
        Ok(buffer)
    }

    pub fn upload_all<U>(
        &mut self,
        uploader: &mut U,
        deletion: &mut DeletionQueue,
    ) -> Result<usize, UploadError>
    where
        U: VertexUploader<Buffer = B>,
    {
        let handles: Vec<_> = self.handles().collect();
        for &handle in &handles {
            self.upload(handle, uploader, deletion)?;
        }
        Ok(handles.len())
    }
}
