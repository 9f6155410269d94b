// SPDX-License-Identifier: CEPL-1.0
use std::fmt;
use std::path::Path;

use prism_math::{grid_transform, Mat4};
use tracing::{error, info, warn};

use crate::material::{Material, MaterialRegistry};
use crate::mesh::{Mesh, MeshRegistry, Vertex};
use crate::registry::{Handle, Registry};

pub const DEFAULT_MATERIAL: &str = "defaultmesh";
const GRID_SCALE: f32 = 0.2;

/// One drawable instance. Handles point into the owning [`Scene`]'s
/// registries.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderObject<B, P, L> {
    pub mesh: Handle<Mesh<B>>,
    pub material: Handle<Material<P, L>>,
    pub transform: Mat4,
}

/// Registries plus the ordered render list. The list order is the draw order.
pub struct Scene<B, P, L> {
    pub meshes: MeshRegistry<B>,
    pub materials: MaterialRegistry<P, L>,
    objects: Vec<RenderObject<B, P, L>>,
}

impl<B, P, L> Default for Scene<B, P, L> {
    fn default() -> Self {
        Self {
            meshes: Registry::new(),
            materials: Registry::new(),
            objects: Vec::new(),
        }
    }
}

impl<B, P, L> Scene<B, P, L>
where
    B: Copy + PartialEq + fmt::Debug,
    P: Copy + PartialEq + fmt::Debug,
    L: Copy + PartialEq + fmt::Debug,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an object by name. Returns `None`, adding nothing, when either
    /// name is not registered.
    pub fn add(&mut self, mesh: &str, material: &str, transform: Mat4) -> Option<usize> {
        let mesh = self.meshes.lookup(mesh)?;
        let material = self.materials.lookup(material)?;
        self.push(RenderObject {
            mesh,
            material,
            transform,
        });
        Some(self.objects.len() - 1)
    }

    pub fn push(&mut self, object: RenderObject<B, P, L>) {
        self.objects.push(object);
    }

    pub fn objects(&self) -> &[RenderObject<B, P, L>] {
        &self.objects
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Registers the three colored triangles and the monkey. A monkey that
    /// fails to load is logged and left out; objects naming it get skipped.
    pub fn load_demo_meshes(&mut self, monkey: &Path) {
        self.meshes.load("triangle", demo_triangle([0.0, 1.0, 0.0]));
        self.meshes.load("redTriangle", demo_triangle([1.0, 0.0, 0.0]));
        self.meshes.load("blueTriangle", demo_triangle([0.0, 0.0, 1.0]));
        if let Err(e) = self.meshes.load_from_file("monkey", monkey) {
            error!("{e}; objects using 'monkey' will be skipped");
        }
    }

    /// The monkey at the origin followed by a (2r+1)² grid of small
    /// triangles on the XZ plane. Returns the number of objects added.
    pub fn populate_demo(&mut self, grid_radius: i32) -> usize {
        let before = self.objects.len();
        let mut skipped = 0usize;

        if self.add("monkey", DEFAULT_MATERIAL, Mat4::IDENTITY).is_none() {
            skipped += 1;
        }
        for x in -grid_radius..=grid_radius {
            for y in -grid_radius..=grid_radius {
                let transform = grid_transform(x, y, GRID_SCALE);
                if self.add(grid_mesh_for_row(y), DEFAULT_MATERIAL, transform).is_none() {
                    skipped += 1;
                }
            }
        }

        if skipped > 0 {
            warn!("{} scene objects skipped (unresolved mesh or material)", skipped);
        }
        let added = self.objects.len() - before;
        info!("scene ready: {} render objects", self.objects.len());
        added
    }
}

/// Row bands of the demo grid: green at the back, red in the middle, blue in
/// front.
pub fn grid_mesh_for_row(y: i32) -> &'static str {
    if y <= -10 {
        "triangle"
    } else if y < 10 {
        "redTriangle"
    } else {
        "blueTriangle"
    }
}

fn demo_triangle(color: [f32; 3]) -> Vec<Vertex> {
    [[1.0, 1.0, 0.0], [-1.0, 1.0, 0.0], [0.0, -1.0, 0.0]]
        .into_iter()
        .map(|p| Vertex::new(p, [0.0; 3], color))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::tests::triangle;

    type TestScene = Scene<usize, u64, u64>;

    fn scene_with_all_meshes() -> TestScene {
        let mut scene = TestScene::new();
        for name in ["triangle", "redTriangle", "blueTriangle", "monkey"] {
            scene.meshes.load(name, triangle([1.0; 3]));
        }
        scene.materials.register(DEFAULT_MATERIAL, Material::new(1, 2));
        scene
    }

    #[test]
    fn demo_scene_has_3722_objects() {
        let mut scene = scene_with_all_meshes();
        assert_eq!(scene.populate_demo(30), 3722);
        assert_eq!(scene.len(), 61 * 61 + 1);
        let material = scene.materials.lookup(DEFAULT_MATERIAL).unwrap();
        assert!(scene.objects().iter().all(|o| o.material == material));
    }

    #[test]
    fn objects_without_material_are_skipped() {
        let mut scene = TestScene::new();
        scene.meshes.load("triangle", triangle([1.0; 3]));
        assert_eq!(scene.populate_demo(2), 0);
        assert!(scene.is_empty());
    }

    #[test]
    fn missing_monkey_only_drops_the_monkey() {
        let mut scene = TestScene::new();
        scene.load_demo_meshes(Path::new("no/such/monkey.obj"));
        scene.materials.register(DEFAULT_MATERIAL, Material::new(1, 2));
        assert!(scene.meshes.lookup("monkey").is_none());
        assert_eq!(scene.populate_demo(30), 3721);
    }

    #[test]
    fn every_grid_row_resolves_to_a_mesh() {
        assert_eq!(grid_mesh_for_row(-30), "triangle");
        assert_eq!(grid_mesh_for_row(-10), "triangle");
        assert_eq!(grid_mesh_for_row(-9), "redTriangle");
        assert_eq!(grid_mesh_for_row(9), "redTriangle");
        assert_eq!(grid_mesh_for_row(10), "blueTriangle");
        assert_eq!(grid_mesh_for_row(30), "blueTriangle");
    }

    #[test]
    fn first_object_is_the_monkey_at_origin() {
        let mut scene = scene_with_all_meshes();
        scene.populate_demo(1);
        let first = scene.objects()[0];
        assert_eq!(first.mesh, scene.meshes.lookup("monkey").unwrap());
        assert_eq!(first.transform, Mat4::IDENTITY);
    }
}
