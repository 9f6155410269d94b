// SPDX-License-Identifier: CEPL-1.0
//! Per-frame draw protocol.
//!
//! [`DrawEngine::draw_frame`] runs one frame against a [`FrameDevice`] in a
//! fixed order: wait for the slot fence, reset the slot, acquire an image,
//! record, submit, present, advance. The device trait keeps the protocol
//! independent of the graphics API so the ordering can be checked without a
//! GPU.
use std::fmt;
use std::time::Duration;

use prism_math::{CameraPose, GpuCameraData, MeshPushConstants};
use thiserror::Error;
use tracing::{debug, trace};

use crate::scene::{RenderObject, Scene};
use crate::FRAME_TIMEOUT;

/// Frames the CPU may record ahead of the GPU.
pub const FRAME_OVERLAP: usize = 2;

/// Slot used by frame `frame` in a pool of `slots` slots.
pub fn slot_for_frame(frame: u64, slots: usize) -> usize {
    (frame % slots.max(1) as u64) as usize
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitStatus {
    Signaled,
    TimedOut,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquire {
    /// `suboptimal` images are still drawn; the surface should be rebuilt
    /// afterwards.
    Image { index: u32, suboptimal: bool },
    TimedOut,
    /// The surface no longer matches the swapchain. Nothing was acquired.
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentStatus {
    Presented,
    /// Presented (or dropped) on a swapchain that needs rebuilding.
    Stale,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClearValues {
    pub color: [f32; 4],
    pub depth: f32,
}

impl Default for ClearValues {
    fn default() -> Self {
        Self {
            color: [0.0, 0.0, 0.0, 1.0],
            depth: 1.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStage {
    WaitForSlot,
    Reset,
    Acquire,
    Record,
    Submit,
    Present,
}

impl fmt::Display for FrameStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameStage::WaitForSlot => "wait for frame slot",
            FrameStage::Reset => "slot reset",
            FrameStage::Acquire => "image acquire",
            FrameStage::Record => "command recording",
            FrameStage::Submit => "queue submit",
            FrameStage::Present => "present",
        };
        f.write_str(name)
    }
}

/// Everything here is fatal for the frame loop.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("{stage} timed out after {timeout:?}; the GPU is likely hung")]
    Timeout { stage: FrameStage, timeout: Duration },
    #[error("mesh '{0}' is drawn before it was uploaded")]
    MeshNotUploaded(String),
    #[error("render object references an unregistered {0}")]
    DanglingHandle(&'static str),
    #[error("{stage} failed: {source}")]
    Backend {
        stage: FrameStage,
        #[source]
        source: anyhow::Error,
    },
}

/// Recording-side operations the draw protocol needs from a backend.
///
/// Calls on one slot arrive in protocol order. Recording calls
/// (`bind_*`, `push_constants`, `draw`) only happen between `begin_frame`
/// and `end_frame`.
pub trait FrameDevice {
    type Buffer: Copy + PartialEq + fmt::Debug;
    type Pipeline: Copy + PartialEq + fmt::Debug;
    type Layout: Copy + PartialEq + fmt::Debug;

    /// Bounded wait on the slot's fence.
    fn wait_for_slot(&mut self, slot: usize, timeout: Duration) -> anyhow::Result<WaitStatus>;
    /// Unsignals the fence and empties the slot's command buffer.
    fn reset_slot(&mut self, slot: usize) -> anyhow::Result<()>;
    fn acquire_image(&mut self, slot: usize, timeout: Duration) -> anyhow::Result<Acquire>;
    /// Puts a reset slot back into the signaled state without drawing. Used
    /// when acquisition fails after the fence was already reset.
    fn release_slot(&mut self, slot: usize) -> anyhow::Result<()>;

    /// Begins recording and the render pass on `image` with the given clears.
    fn begin_frame(&mut self, slot: usize, image: u32, clear: &ClearValues) -> anyhow::Result<()>;
    fn write_camera(&mut self, slot: usize, camera: &GpuCameraData) -> anyhow::Result<()>;
    /// Binds the pipeline and the slot's camera descriptor set.
    fn bind_material(&mut self, slot: usize, pipeline: Self::Pipeline, layout: Self::Layout);
    fn push_constants(&mut self, slot: usize, layout: Self::Layout, constants: &MeshPushConstants);
    fn bind_vertex_buffer(&mut self, slot: usize, buffer: Self::Buffer);
    fn draw(&mut self, slot: usize, vertex_count: u32);
    /// Ends the render pass and the command buffer.
    fn end_frame(&mut self, slot: usize) -> anyhow::Result<()>;

    /// Submits the slot: waits on image-acquired at color output, signals
    /// render-complete and the slot fence.
    fn submit(&mut self, slot: usize) -> anyhow::Result<()>;
    fn present(&mut self, slot: usize, image: u32) -> anyhow::Result<PresentStatus>;

    /// Current render-target size in pixels.
    fn extent(&self) -> (u32, u32);
}

/// Commands issued while recording one frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrawStats {
    pub pipeline_binds: u32,
    pub vertex_buffer_binds: u32,
    pub draws: u32,
    pub vertices: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The frame was submitted and presented. `stale` asks the caller to
    /// rebuild the surface before the next frame.
    Presented { stats: DrawStats, stale: bool },
    /// Acquisition reported an out-of-date surface. Nothing was drawn and the
    /// frame counter did not move.
    SurfaceOutOfDate,
}

impl FrameOutcome {
    pub fn is_presented(&self) -> bool {
        matches!(self, FrameOutcome::Presented { .. })
    }
}

struct DrawCall<B, P, L> {
    pipeline: P,
    layout: L,
    buffer: B,
    vertex_count: u32,
}

fn resolve<B, P, L>(
    scene: &Scene<B, P, L>,
    object: &RenderObject<B, P, L>,
) -> Result<DrawCall<B, P, L>, FrameError>
where
    B: Copy + PartialEq + fmt::Debug,
    P: Copy + PartialEq + fmt::Debug,
    L: Copy + PartialEq + fmt::Debug,
{
    let material = scene
        .materials
        .get(object.material)
        .ok_or(FrameError::DanglingHandle("material"))?;
    let mesh = scene
        .meshes
        .get(object.mesh)
        .ok_or(FrameError::DanglingHandle("mesh"))?;
    let buffer = mesh.vertex_buffer().ok_or_else(|| {
        FrameError::MeshNotUploaded(scene.meshes.name(object.mesh).unwrap_or("<unnamed>").to_owned())
    })?;
    Ok(DrawCall {
        pipeline: material.pipeline,
        layout: material.layout,
        buffer,
        vertex_count: mesh.vertex_count(),
    })
}

fn backend(stage: FrameStage) -> impl FnOnce(anyhow::Error) -> FrameError {
    move |source| FrameError::Backend { stage, source }
}

/// Records every object in list order. Pipeline and vertex buffer are only
/// rebound when the handle differs from the previous object's.
pub fn record_draws<D: FrameDevice>(
    device: &mut D,
    slot: usize,
    scene: &Scene<D::Buffer, D::Pipeline, D::Layout>,
) -> Result<DrawStats, FrameError> {
    let mut stats = DrawStats::default();
    let mut last_material = None;
    let mut last_mesh = None;

    for object in scene.objects() {
        let call = resolve(scene, object)?;
        if last_material != Some(object.material) {
            device.bind_material(slot, call.pipeline, call.layout);
            last_material = Some(object.material);
            stats.pipeline_binds += 1;
        }
        device.push_constants(slot, call.layout, &MeshPushConstants::for_model(object.transform));
        if last_mesh != Some(object.mesh) {
            device.bind_vertex_buffer(slot, call.buffer);
            last_mesh = Some(object.mesh);
            stats.vertex_buffer_binds += 1;
        }
        device.draw(slot, call.vertex_count);
        stats.draws += 1;
        stats.vertices += u64::from(call.vertex_count);
    }
    Ok(stats)
}

/// Drives the frame loop. Owns the frame counter; slots, registries and the
/// swapchain stay with the caller.
#[derive(Clone, Debug)]
pub struct DrawEngine {
    frame_number: u64,
    slot_count: usize,
    timeout: Duration,
    pub camera: CameraPose,
    pub clear: ClearValues,
}

impl Default for DrawEngine {
    fn default() -> Self {
        Self::new(FRAME_OVERLAP, FRAME_TIMEOUT)
    }
}

impl DrawEngine {
    pub fn new(slot_count: usize, timeout: Duration) -> Self {
        Self {
            frame_number: 0,
            slot_count: slot_count.max(1),
            timeout,
            camera: CameraPose::default(),
            clear: ClearValues::default(),
        }
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn current_slot(&self) -> usize {
        slot_for_frame(self.frame_number, self.slot_count)
    }

    pub fn draw_frame<D: FrameDevice>(
        &mut self,
        device: &mut D,
        scene: &Scene<D::Buffer, D::Pipeline, D::Layout>,
    ) -> Result<FrameOutcome, FrameError> {
        // A bad object would leave a half-recorded command buffer behind a
        // reset fence, so everything is checked before the slot is touched.
        for object in scene.objects() {
            resolve(scene, object)?;
        }

        let slot = self.current_slot();
        let timeout = self.timeout;

        // 1. wait
        match device
            .wait_for_slot(slot, timeout)
            .map_err(backend(FrameStage::WaitForSlot))?
        {
            WaitStatus::Signaled => {}
            WaitStatus::TimedOut => {
                return Err(FrameError::Timeout {
                    stage: FrameStage::WaitForSlot,
                    timeout,
                })
            }
        }

        // 2. reset
        device.reset_slot(slot).map_err(backend(FrameStage::Reset))?;

        // 3. acquire
        let (image, suboptimal) = match device
            .acquire_image(slot, timeout)
            .map_err(backend(FrameStage::Acquire))?
        {
            Acquire::Image { index, suboptimal } => (index, suboptimal),
            Acquire::TimedOut => {
                return Err(FrameError::Timeout {
                    stage: FrameStage::Acquire,
                    timeout,
                })
            }
            Acquire::OutOfDate => {
                debug!("frame {}: surface out of date, skipping", self.frame_number);
                device.release_slot(slot).map_err(backend(FrameStage::Acquire))?;
                return Ok(FrameOutcome::SurfaceOutOfDate);
            }
        };

        // 4. record
        let (width, height) = device.extent();
        let camera = self.camera.gpu_data(width, height);
        device
            .begin_frame(slot, image, &self.clear)
            .map_err(backend(FrameStage::Record))?;
        device
            .write_camera(slot, &camera)
            .map_err(backend(FrameStage::Record))?;
        let stats = record_draws(device, slot, scene)?;
        device.end_frame(slot).map_err(backend(FrameStage::Record))?;

        // 5. submit
        device.submit(slot).map_err(backend(FrameStage::Submit))?;

        // 6. present
        let presented = device
            .present(slot, image)
            .map_err(backend(FrameStage::Present))?;

        // 7. advance
        trace!(
            "frame {} slot {} image {}: {} draws, {} pipeline binds",
            self.frame_number,
            slot,
            image,
            stats.draws,
            stats.pipeline_binds
        );
        self.frame_number += 1;

        Ok(FrameOutcome::Presented {
            stats,
            stale: suboptimal || presented == PresentStatus::Stale,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::Material;
    use crate::mesh::tests::{triangle, RecordingUploader};
    use crate::DeletionQueue;
    use prism_math::Mat4;

    #[derive(Clone, Debug, PartialEq)]
    enum Call {
        Wait(usize),
        Reset(usize),
        Acquire(usize),
        Release(usize),
        Begin(usize, u32),
        Camera(usize),
        BindMaterial(u64),
        Push,
        BindVertices(usize),
        Draw(u32),
        End(usize),
        Submit(usize),
        Present(usize, u32),
    }

    /// Scripted device that logs every call.
    #[derive(Default)]
    struct MockDevice {
        pub calls: Vec<Call>,
        pub images: u32,
        pub next_image: u32,
        pub wait_times_out: bool,
        pub acquire_script: Vec<Acquire>,
        pub present_stale: bool,
    }

    impl MockDevice {
        pub fn with_images(images: u32) -> Self {
            Self {
                images,
                ..Default::default()
            }
        }

        pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
            self.calls.iter().filter(|c| pred(c)).count()
        }
    }

    impl FrameDevice for MockDevice {
        type Buffer = usize;
        type Pipeline = u64;
        type Layout = u64;

        fn wait_for_slot(&mut self, slot: usize, _: Duration) -> anyhow::Result<WaitStatus> {
            self.calls.push(Call::Wait(slot));
            Ok(if self.wait_times_out {
                WaitStatus::TimedOut
            } else {
                WaitStatus::Signaled
            })
        }

        fn reset_slot(&mut self, slot: usize) -> anyhow::Result<()> {
            self.calls.push(Call::Reset(slot));
            Ok(())
        }

        fn acquire_image(&mut self, slot: usize, _: Duration) -> anyhow::Result<Acquire> {
            self.calls.push(Call::Acquire(slot));
            if !self.acquire_script.is_empty() {
                return Ok(self.acquire_script.remove(0));
            }
            let index = self.next_image;
            self.next_image = (self.next_image + 1) % self.images.max(1);
            Ok(Acquire::Image {
                index,
                suboptimal: false,
            })
        }

        fn release_slot(&mut self, slot: usize) -> anyhow::Result<()> {
            self.calls.push(Call::Release(slot));
            Ok(())
        }

        fn begin_frame(&mut self, slot: usize, image: u32, _: &ClearValues) -> anyhow::Result<()> {
            self.calls.push(Call::Begin(slot, image));
            Ok(())
        }

        fn write_camera(&mut self, slot: usize, _: &GpuCameraData) -> anyhow::Result<()> {
            self.calls.push(Call::Camera(slot));
            Ok(())
        }

        fn bind_material(&mut self, _: usize, pipeline: u64, _: u64) {
            self.calls.push(Call::BindMaterial(pipeline));
        }

        fn push_constants(&mut self, _: usize, _: u64, _: &MeshPushConstants) {
            self.calls.push(Call::Push);
        }

        fn bind_vertex_buffer(&mut self, _: usize, buffer: usize) {
            self.calls.push(Call::BindVertices(buffer));
        }

        fn draw(&mut self, _: usize, vertex_count: u32) {
            self.calls.push(Call::Draw(vertex_count));
        }

        fn end_frame(&mut self, slot: usize) -> anyhow::Result<()> {
            self.calls.push(Call::End(slot));
            Ok(())
        }

        fn submit(&mut self, slot: usize) -> anyhow::Result<()> {
            self.calls.push(Call::Submit(slot));
            Ok(())
        }

        fn present(&mut self, slot: usize, image: u32) -> anyhow::Result<PresentStatus> {
            self.calls.push(Call::Present(slot, image));
            Ok(if self.present_stale {
                PresentStatus::Stale
            } else {
                PresentStatus::Presented
            })
        }

        fn extent(&self) -> (u32, u32) {
            (1700, 900)
        }
    }

    type TestScene = Scene<usize, u64, u64>;

    /// Two uploaded meshes ("a" → buffer 0, "b" → buffer 1) and materials
    /// "m1" → pipeline 1, "m2" → pipeline 2.
    fn two_material_scene() -> TestScene {
        let mut scene = TestScene::new();
        scene.meshes.load("a", triangle([1.0; 3]));
        scene.meshes.load("b", triangle([0.5; 3]));
        let mut gpu = RecordingUploader::default();
        let mut deletion = DeletionQueue::new();
        scene.meshes.upload_all(&mut gpu, &mut deletion).unwrap();
        deletion.flush();
        scene.materials.register("m1", Material::new(1, 10));
        scene.materials.register("m2", Material::new(2, 20));
        scene
    }

    #[test]
    fn slot_assignment_is_periodic() {
        for n in 1..=4usize {
            for f in 0..64u64 {
                assert_eq!(slot_for_frame(f, n), slot_for_frame(f + n as u64, n));
                assert!(slot_for_frame(f, n) < n);
            }
        }
    }

    #[test]
    fn stages_run_in_protocol_order() {
        let mut scene = two_material_scene();
        scene.add("a", "m1", Mat4::IDENTITY).unwrap();
        let mut device = MockDevice::with_images(3);
        let mut engine = DrawEngine::default();

        engine.draw_frame(&mut device, &scene).unwrap();
        assert_eq!(
            device.calls,
            vec![
                Call::Wait(0),
                Call::Reset(0),
                Call::Acquire(0),
                Call::Begin(0, 0),
                Call::Camera(0),
                Call::BindMaterial(1),
                Call::Push,
                Call::BindVertices(0),
                Call::Draw(3),
                Call::End(0),
                Call::Submit(0),
                Call::Present(0, 0),
            ]
        );
        assert_eq!(engine.frame_number(), 1);
    }

    #[test]
    fn rebinds_follow_contiguous_runs() {
        let mut scene = two_material_scene();
        let order = [
            ("a", "m1"),
            ("a", "m1"),
            ("b", "m1"),
            ("b", "m2"),
            ("b", "m2"),
            ("a", "m2"),
            ("b", "m1"),
        ];
        for (mesh, material) in order {
            scene.add(mesh, material, Mat4::IDENTITY).unwrap();
        }
        let mut device = MockDevice::with_images(2);
        let mut engine = DrawEngine::default();

        let outcome = engine.draw_frame(&mut device, &scene).unwrap();
        let FrameOutcome::Presented { stats, stale } = outcome else {
            panic!("expected a presented frame, got {outcome:?}");
        };
        assert!(!stale);
        assert_eq!(stats.draws, 7);
        assert_eq!(stats.pipeline_binds, 3);
        assert_eq!(stats.vertex_buffer_binds, 4);
        assert_eq!(stats.vertices, 21);
        assert_eq!(device.count(|c| matches!(c, Call::BindMaterial(_))), 3);
        assert_eq!(device.count(|c| matches!(c, Call::Push)), 7);
    }

    #[test]
    fn wait_timeout_is_fatal_and_nothing_is_reset() {
        let mut scene = two_material_scene();
        scene.add("a", "m1", Mat4::IDENTITY).unwrap();
        let mut device = MockDevice::with_images(2);
        device.wait_times_out = true;
        let mut engine = DrawEngine::default();

        let err = engine.draw_frame(&mut device, &scene).unwrap_err();
        assert!(matches!(
            err,
            FrameError::Timeout {
                stage: FrameStage::WaitForSlot,
                ..
            }
        ));
        assert_eq!(device.calls, vec![Call::Wait(0)]);
        assert_eq!(engine.frame_number(), 0);
    }

    #[test]
    fn acquire_timeout_is_fatal() {
        let scene = two_material_scene();
        let mut device = MockDevice::with_images(2);
        device.acquire_script = vec![Acquire::TimedOut];
        let err = DrawEngine::default().draw_frame(&mut device, &scene).unwrap_err();
        assert!(matches!(
            err,
            FrameError::Timeout {
                stage: FrameStage::Acquire,
                ..
            }
        ));
    }

    #[test]
    fn unuploaded_mesh_is_rejected_before_the_slot_is_touched() {
        let mut scene = two_material_scene();
        scene.meshes.load("fresh", triangle([1.0; 3]));
        scene.add("fresh", "m1", Mat4::IDENTITY).unwrap();
        let mut device = MockDevice::with_images(2);

        let err = DrawEngine::default().draw_frame(&mut device, &scene).unwrap_err();
        assert!(matches!(err, FrameError::MeshNotUploaded(ref n) if n == "fresh"));
        assert!(device.calls.is_empty());
    }

    #[test]
    fn out_of_date_skips_without_advancing() {
        let mut scene = two_material_scene();
        scene.add("a", "m1", Mat4::IDENTITY).unwrap();
        let mut device = MockDevice::with_images(2);
        device.acquire_script = vec![Acquire::OutOfDate];
        let mut engine = DrawEngine::default();

        let outcome = engine.draw_frame(&mut device, &scene).unwrap();
        assert_eq!(outcome, FrameOutcome::SurfaceOutOfDate);
        assert!(!outcome.is_presented());
        assert_eq!(engine.frame_number(), 0);
        assert_eq!(
            device.calls,
            vec![Call::Wait(0), Call::Reset(0), Call::Acquire(0), Call::Release(0)]
        );

        // The same slot is used again once the surface is back.
        device.calls.clear();
        let outcome = engine.draw_frame(&mut device, &scene).unwrap();
        assert!(outcome.is_presented());
        assert_eq!(device.calls[0], Call::Wait(0));
        assert_eq!(engine.frame_number(), 1);
    }

    #[test]
    fn suboptimal_or_stale_present_requests_rebuild() {
        let scene = two_material_scene();
        let mut device = MockDevice::with_images(2);
        device.acquire_script = vec![Acquire::Image {
            index: 1,
            suboptimal: true,
        }];
        let mut engine = DrawEngine::default();
        let outcome = engine.draw_frame(&mut device, &scene).unwrap();
        assert!(matches!(outcome, FrameOutcome::Presented { stale: true, .. }));
        // Stale frames still reached the screen.
        assert!(outcome.is_presented());

        device.present_stale = true;
        let outcome = engine.draw_frame(&mut device, &scene).unwrap();
        assert!(matches!(outcome, FrameOutcome::Presented { stale: true, .. }));
        assert_eq!(engine.frame_number(), 2);
    }
}
