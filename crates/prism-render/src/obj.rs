// SPDX-License-Identifier: CEPL-1.0
//! Wavefront OBJ → flat triangle list. Parsing is delegated to `tobj`.
use std::io::BufRead;
use std::path::Path;

use thiserror::Error;
use tracing::warn;

use crate::mesh::Vertex;

#[derive(Debug, Error)]
pub enum MeshLoadError {
    #[error("failed to load OBJ '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: tobj::LoadError,
    },
    #[error("OBJ '{0}' contains no triangles")]
    Empty(String),
}

fn load_options() -> tobj::LoadOptions {
    tobj::LoadOptions {
        triangulate: true,
        single_index: false,
        ignore_points: true,
        ignore_lines: true,
        ..Default::default()
    }
}

pub fn load_obj_file(path: &Path) -> Result<Vec<Vertex>, MeshLoadError> {
    let label = path.display().to_string();
    let (models, materials) =
        tobj::load_obj(path, &load_options()).map_err(|source| MeshLoadError::Parse {
            path: label.clone(),
            source,
        })?;
    if let Err(e) = materials {
        warn!("OBJ '{}': material library ignored ({})", label, e);
    }
    flatten(&models, &label)
}

/// Same as [`load_obj_file`] for an in-memory source. Material libraries are
/// not resolved.
pub fn load_obj_reader<R: BufRead>(reader: &mut R, label: &str) -> Result<Vec<Vertex>, MeshLoadError> {
    let (models, _) = tobj::load_obj_buf(reader, &load_options(), |_| Ok(Default::default()))
        .map_err(|source| MeshLoadError::Parse {
            path: label.to_owned(),
            source,
        })?;
    flatten(&models, label)
}

/// One vertex per triangle corner; color mirrors the normal.
fn flatten(models: &[tobj::Model], label: &str) -> Result<Vec<Vertex>, MeshLoadError> {
    let mut vertices = Vec::new();
    for model in models {
        let mesh = &model.mesh;
        let has_normal_indices = mesh.normal_indices.len() == mesh.indices.len();
        let normals_follow_positions =
            !mesh.normals.is_empty() && mesh.normals.len() == mesh.positions.len();
        if !has_normal_indices && !normals_follow_positions {
            warn!("OBJ '{}': model '{}' has no normals", label, model.name);
        }

        let whole_triangles = mesh.indices.len() - mesh.indices.len() % 3;
        for corner in 0..whole_triangles {
            let p = mesh.indices[corner] as usize;
            let position = read3(&mesh.positions, p);
            let normal = if has_normal_indices {
                read3(&mesh.normals, mesh.normal_indices[corner] as usize)
            } else if normals_follow_positions {
                read3(&mesh.normals, p)
            } else {
                [0.0; 3]
            };
            vertices.push(Vertex::new(position, normal, normal));
        }
    }
    if vertices.is_empty() {
        return Err(MeshLoadError::Empty(label.to_owned()));
    }
    Ok(vertices)
}

fn read3(data: &[f32], index: usize) -> [f32; 3] {
    match data.get(3 * index..3 * index + 3) {
        Some(v) => [v[0], v[1], v[2]],
        None => [0.0; 3],
    }
}
