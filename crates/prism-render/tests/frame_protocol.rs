// SPDX-License-Identifier: CEPL-1.0
use std::path::PathBuf;
use std::time::Duration;

use prism_math::{GpuCameraData, Mat4, MeshPushConstants};
use prism_render::scene::DEFAULT_MATERIAL;
use prism_render::{
    Acquire, ClearValues, DeletionQueue, DrawEngine, FrameDevice, FrameOutcome, Material,
    PresentStatus, Scene, VertexUploader, WaitStatus, FRAME_OVERLAP,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Event {
    Wait(usize),
    Reset(usize),
    Submit(usize),
}

/// Records only the slot-lifecycle calls; recording calls are counted.
#[derive(Default)]
struct SlotLog {
    events: Vec<Event>,
    draws: usize,
    next_buffer: u32,
    image: u32,
}

impl VertexUploader for SlotLog {
    type Buffer = u32;

    fn upload_vertices(&mut self, bytes: &[u8], _: &mut DeletionQueue) -> anyhow::Result<u32> {
        anyhow::ensure!(!bytes.is_empty(), "empty upload");
        self.next_buffer += 1;
        Ok(self.next_buffer)
    }
}

impl FrameDevice for SlotLog {
    type Buffer = u32;
    type Pipeline = u8;
    type Layout = u8;

    fn wait_for_slot(&mut self, slot: usize, _: Duration) -> anyhow::Result<WaitStatus> {
        self.events.push(Event::Wait(slot));
        Ok(WaitStatus::Signaled)
    }

    fn reset_slot(&mut self, slot: usize) -> anyhow::Result<()> {
        self.events.push(Event::Reset(slot));
        Ok(())
    }

    fn acquire_image(&mut self, _: usize, _: Duration) -> anyhow::Result<Acquire> {
        self.image = (self.image + 1) % 3;
        Ok(Acquire::Image {
            index: self.image,
            suboptimal: false,
        })
    }

    fn release_slot(&mut self, _: usize) -> anyhow::Result<()> {
        Ok(())
    }

    fn begin_frame(&mut self, _: usize, _: u32, _: &ClearValues) -> anyhow::Result<()> {
        Ok(())
    }

    fn write_camera(&mut self, _: usize, _: &GpuCameraData) -> anyhow::Result<()> {
        Ok(())
    }

    fn bind_material(&mut self, _: usize, _: u8, _: u8) {}

    fn push_constants(&mut self, _: usize, _: u8, _: &MeshPushConstants) {}

    fn bind_vertex_buffer(&mut self, _: usize, _: u32) {}

    fn draw(&mut self, _: usize, _: u32) {
        self.draws += 1;
    }

    fn end_frame(&mut self, _: usize) -> anyhow::Result<()> {
        Ok(())
    }

    fn submit(&mut self, slot: usize) -> anyhow::Result<()> {
        self.events.push(Event::Submit(slot));
        Ok(())
    }

    fn present(&mut self, _: usize, _: u32) -> anyhow::Result<PresentStatus> {
        Ok(PresentStatus::Presented)
    }

    fn extent(&self) -> (u32, u32) {
        (1700, 900)
    }
}

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name)
}

fn demo_scene(device: &mut SlotLog) -> Scene<u32, u8, u8> {
    let mut scene = Scene::new();
    scene.load_demo_meshes(&fixture("tetrahedron.obj"));
    scene.materials.register(DEFAULT_MATERIAL, Material::new(1, 1));
    let mut deletion = DeletionQueue::new();
    scene.meshes.upload_all(device, &mut deletion).unwrap();
    deletion.flush();
    scene
}

#[test]
fn triangle_and_monkey_are_registered() {
    let mut device = SlotLog::default();
    let scene = demo_scene(&mut device);

    let triangle = scene.meshes.find("triangle").unwrap();
    assert_eq!(triangle.vertex_count(), 3);
    let monkey = scene.meshes.find("monkey").unwrap();
    assert_eq!(monkey.vertex_count(), 12);
    assert!(monkey.is_uploaded());
    assert!(scene.meshes.lookup("nonexistent").is_none());
}

#[test]
fn demo_scene_draws_every_object() {
    let mut device = SlotLog::default();
    let mut scene = demo_scene(&mut device);
    assert_eq!(scene.populate_demo(30), 3722);

    let mut engine = DrawEngine::default();
    let outcome = engine.draw_frame(&mut device, &scene).unwrap();
    let FrameOutcome::Presented { stats, .. } = outcome else {
        panic!("frame was not presented: {outcome:?}");
    };
    assert_eq!(stats.draws, 3722);
    assert_eq!(stats.pipeline_binds, 1);
    assert_eq!(device.draws, 3722);
}

#[test]
fn slots_alternate_and_wait_precedes_reset() {
    let mut device = SlotLog::default();
    let mut scene = demo_scene(&mut device);
    scene.add("triangle", DEFAULT_MATERIAL, Mat4::IDENTITY).unwrap();

    let mut engine = DrawEngine::default();
    let mut slots = Vec::new();
    for _ in 0..6 {
        slots.push(engine.current_slot());
        engine.draw_frame(&mut device, &scene).unwrap();
    }
    assert_eq!(FRAME_OVERLAP, 2);
    assert_eq!(slots, vec![0, 1, 0, 1, 0, 1]);
    assert_eq!(engine.frame_number(), 6);

    // Frame 2 reuses slot 0: its fence wait comes before its reset, and both
    // come after frame 0 submitted on that slot.
    let frame_events: Vec<_> = device.events.chunks(3).collect();
    assert_eq!(
        frame_events[2],
        &[Event::Wait(0), Event::Reset(0), Event::Submit(0)]
    );
    assert_eq!(frame_events[0][2], Event::Submit(0));
    for (frame, events) in frame_events.iter().enumerate() {
        let slot = frame % 2;
        assert_eq!(
            *events,
            &[Event::Wait(slot), Event::Reset(slot), Event::Submit(slot)]
        );
    }
}
