// Frame loop
//
// One tick: rebuild if needed -> wait for the slot -> acquire -> step the
// match -> write vertices and record -> submit -> present -> next slot.
// The slot fence is the only place a tick blocks.
//
// `FrameLoop` owns the ordering and the skip rules, `FrameTarget` is the GPU
// side it drives. `VulkanTarget` implements it on top of the backend.

use crate::backend::buffer::{VertexBuffer, VERTEX_CAPACITY};
use crate::backend::sync::{next_slot, FrameSlot};
use crate::backend::{
    Acquired, DeviceContext, FrameResources, GpuError, InitError, Pipeline, PresentationSurface, Presented,
    Swapchain,
};
use crate::config::{Config, GameConfig};
use crate::game::{Inputs, SimulationState};
use crate::geometry::{self, Vertex};
use ash::vk;
use std::sync::Arc;

/// What a tick ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Rendered,
    /// Nothing drawn and the simulation not advanced (minimized window,
    /// swapchain rebuilt mid-tick)
    Skipped,
}

/// GPU operations of one tick, in the order `FrameLoop::tick` issues them
pub trait FrameTarget {
    /// Recreate the swapchain and everything sized by it
    fn rebuild(&mut self, extent: vk::Extent2D) -> Result<(), GpuError>;
    /// Wait for `slot`'s previous submission to finish
    fn begin_frame(&mut self, slot: usize) -> Result<FrameSlot, GpuError>;
    fn acquire(&mut self, frame: &FrameSlot) -> Result<Acquired, GpuError>;
    /// Upload `vertices` for `slot` and record the draw into its command buffer
    fn draw(&mut self, slot: usize, frame: &FrameSlot, image_index: u32, vertices: &[Vertex]) -> Result<(), GpuError>;
    fn submit(&mut self, slot: usize) -> Result<(), GpuError>;
    fn present(&mut self, frame: &FrameSlot, image_index: u32) -> Result<Presented, GpuError>;
}

/// Slot cycling and recreation bookkeeping
pub struct FrameLoop {
    current_frame: usize,
    frames_in_flight: usize,
    needs_recreate: bool,
    /// Window extent the swapchain was last built for
    built_for: vk::Extent2D,
    vertices: Vec<Vertex>,
}

impl FrameLoop {
    pub fn new(frames_in_flight: usize, built_for: vk::Extent2D) -> Self {
        Self {
            current_frame: 0,
            frames_in_flight,
            needs_recreate: false,
            built_for,
            vertices: Vec::with_capacity(VERTEX_CAPACITY),
        }
    }

    /// Returns false for a zero-area extent, leaving the recreation pending
    fn rebuild<T: FrameTarget>(&mut self, target: &mut T, extent: vk::Extent2D) -> Result<bool, GpuError> {
        if extent.width == 0 || extent.height == 0 {
            self.needs_recreate = true;
            return Ok(false);
        }

        target.rebuild(extent)?;
        self.built_for = extent;
        self.needs_recreate = false;
        Ok(true)
    }

    /// Run one frame. `state` only advances when the frame is rendered.
    pub fn tick<T: FrameTarget>(
        &mut self,
        target: &mut T,
        window_extent: vk::Extent2D,
        state: &mut SimulationState,
        rules: &GameConfig,
        dt: f32,
        inputs: &Inputs,
    ) -> Result<Tick, GpuError> {
        if (self.needs_recreate || window_extent != self.built_for) && !self.rebuild(target, window_extent)? {
            return Ok(Tick::Skipped);
        }

        let slot = self.current_frame;
        let frame = target.begin_frame(slot)?;

        let (image_index, suboptimal) = match target.acquire(&frame)? {
            Acquired::Image { index, suboptimal } => (index, suboptimal),
            Acquired::Outdated => {
                log::debug!("Swapchain out of date on acquire");
                self.rebuild(target, window_extent)?;
                return Ok(Tick::Skipped);
            }
        };

        *state = state.step(rules, dt, inputs);

        self.vertices.clear();
        geometry::tessellate(&geometry::scene(state, rules), rules, &mut self.vertices);
        target.draw(slot, &frame, image_index, &self.vertices)?;
        target.submit(slot)?;

        if suboptimal || target.present(&frame, image_index)? == Presented::NeedsRecreate {
            self.needs_recreate = true;
        }

        log::trace!("Frame {} rendered to image {}", slot, image_index);
        self.current_frame = next_slot(slot, self.frames_in_flight);
        Ok(Tick::Rendered)
    }
}

/// Owns everything created from the device.
///
/// Fields drop top to bottom: per-frame resources, then the pipeline (whose
/// framebuffers reference swapchain views), then the swapchain and surface,
/// then our handle on the device.
pub struct VulkanTarget {
    staging: Vec<VertexBuffer>,
    frames: FrameResources,
    pipeline: Pipeline,
    swapchain: Swapchain,
    device: Arc<DeviceContext>,

    clear_color: [f32; 4],
    aspect: f32,
}

impl FrameTarget for VulkanTarget {
    fn rebuild(&mut self, extent: vk::Extent2D) -> Result<(), GpuError> {
        // recreate() waits for idle, so the old framebuffers are unused by
        // the time they are dropped here
        self.swapchain.recreate(extent)?;
        self.pipeline = Pipeline::build(self.device.clone(), &self.swapchain, self.aspect)?;
        Ok(())
    }

    fn begin_frame(&mut self, slot: usize) -> Result<FrameSlot, GpuError> {
        self.frames.begin_frame(self.device.device(), slot).copied()
    }

    fn acquire(&mut self, frame: &FrameSlot) -> Result<Acquired, GpuError> {
        self.swapchain.acquire_next(frame.image_available)
    }

    fn draw(&mut self, slot: usize, frame: &FrameSlot, image_index: u32, vertices: &[Vertex]) -> Result<(), GpuError> {
        let staging = &mut self.staging[slot];
        let vertex_count = staging.write(vertices)?;
        self.pipeline.record(
            frame.command_buffer,
            image_index,
            self.clear_color,
            staging.handle(),
            vertex_count,
        )
    }

    fn submit(&mut self, slot: usize) -> Result<(), GpuError> {
        self.frames
            .submit(self.device.device(), self.device.graphics_queue(), slot)
    }

    fn present(&mut self, frame: &FrameSlot, image_index: u32) -> Result<Presented, GpuError> {
        self.swapchain
            .present(self.device.present_queue(), image_index, frame.render_finished)
    }
}

impl Drop for VulkanTarget {
    fn drop(&mut self) {
        // Nothing below may be destroyed while the GPU still uses it
        if let Err(e) = self.device.wait_idle() {
            log::warn!("wait_idle failed during shutdown: {:?}", e);
        }
    }
}

pub struct Renderer {
    frame_loop: FrameLoop,
    target: VulkanTarget,
}

impl Renderer {
    pub fn new(
        device: Arc<DeviceContext>,
        surface: PresentationSurface,
        window_extent: vk::Extent2D,
        config: &Config,
    ) -> Result<Self, InitError> {
        let swapchain = Swapchain::new(device.clone(), surface, window_extent, config.get_present_mode())?;
        let aspect = config.game.aspect();
        let pipeline = Pipeline::build(device.clone(), &swapchain, aspect)?;

        let frames_in_flight = config.graphics.max_frames_in_flight;
        let frames = FrameResources::new(device.clone(), frames_in_flight)?;
        let staging = (0..frames_in_flight)
            .map(|i| VertexBuffer::new(device.clone(), VERTEX_CAPACITY, &format!("frame {i} vertices")))
            .collect::<Result<Vec<_>, _>>()?;

        log::info!(
            "Renderer ready: {} frames in flight, {} swapchain images",
            frames.len(),
            swapchain.image_count()
        );

        Ok(Self {
            frame_loop: FrameLoop::new(frames.len(), window_extent),
            target: VulkanTarget {
                staging,
                frames,
                pipeline,
                swapchain,
                device,
                clear_color: config.graphics.clear_color,
                aspect,
            },
        })
    }

    /// Rebuild before the next frame is recorded
    pub fn request_recreate(&mut self) {
        self.frame_loop.needs_recreate = true;
    }

    pub fn tick(
        &mut self,
        window_extent: vk::Extent2D,
        state: &mut SimulationState,
        rules: &GameConfig,
        dt: f32,
        inputs: &Inputs,
    ) -> Result<Tick, GpuError> {
        self.frame_loop
            .tick(&mut self.target, window_extent, state, rules, dt, inputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        Rebuild(vk::Extent2D),
        Begin(usize),
        Acquire(vk::Semaphore),
        Draw { slot: usize, image: u32 },
        Submit(usize),
        Present(u32),
    }

    /// Records the calls of a tick and replays scripted acquire/present results
    #[derive(Default)]
    struct ScriptedTarget {
        calls: Vec<Call>,
        acquires: VecDeque<Acquired>,
        presents: VecDeque<Presented>,
    }

    fn slot(n: usize) -> FrameSlot {
        let n = n as u64;
        FrameSlot {
            command_buffer: vk::CommandBuffer::from_raw(n * 10 + 1),
            image_available: vk::Semaphore::from_raw(n * 10 + 2),
            render_finished: vk::Semaphore::from_raw(n * 10 + 3),
            in_flight_fence: vk::Fence::from_raw(n * 10 + 4),
        }
    }

    impl FrameTarget for ScriptedTarget {
        fn rebuild(&mut self, extent: vk::Extent2D) -> Result<(), GpuError> {
            self.calls.push(Call::Rebuild(extent));
            Ok(())
        }

        fn begin_frame(&mut self, slot_index: usize) -> Result<FrameSlot, GpuError> {
            self.calls.push(Call::Begin(slot_index));
            Ok(slot(slot_index))
        }

        fn acquire(&mut self, frame: &FrameSlot) -> Result<Acquired, GpuError> {
            self.calls.push(Call::Acquire(frame.image_available));
            Ok(self.acquires.pop_front().unwrap_or(Acquired::Image {
                index: 0,
                suboptimal: false,
            }))
        }

        fn draw(&mut self, slot: usize, _: &FrameSlot, image_index: u32, vertices: &[Vertex]) -> Result<(), GpuError> {
            assert!(!vertices.is_empty());
            self.calls.push(Call::Draw { slot, image: image_index });
            Ok(())
        }

        fn submit(&mut self, slot: usize) -> Result<(), GpuError> {
            self.calls.push(Call::Submit(slot));
            Ok(())
        }

        fn present(&mut self, _: &FrameSlot, image_index: u32) -> Result<Presented, GpuError> {
            self.calls.push(Call::Present(image_index));
            Ok(self.presents.pop_front().unwrap_or(Presented::Ok))
        }
    }

    const EXTENT: vk::Extent2D = vk::Extent2D {
        width: 1280,
        height: 800,
    };

    struct Harness {
        frame_loop: FrameLoop,
        target: ScriptedTarget,
        state: SimulationState,
        rules: GameConfig,
    }

    impl Harness {
        fn new() -> Self {
            let rules = GameConfig::default();
            Self {
                frame_loop: FrameLoop::new(2, EXTENT),
                target: ScriptedTarget::default(),
                state: SimulationState::new(&rules),
                rules,
            }
        }

        fn tick(&mut self, extent: vk::Extent2D) -> Tick {
            self.frame_loop
                .tick(
                    &mut self.target,
                    extent,
                    &mut self.state,
                    &self.rules,
                    0.016,
                    &Inputs::default(),
                )
                .unwrap()
        }

        fn take_calls(&mut self) -> Vec<Call> {
            std::mem::take(&mut self.target.calls)
        }
    }

    #[test]
    fn rendered_tick_runs_in_order_and_cycles_slots() {
        let mut h = Harness::new();
        h.target.acquires.extend([
            Acquired::Image {
                index: 2,
                suboptimal: false,
            },
            Acquired::Image {
                index: 0,
                suboptimal: false,
            },
        ]);
        let before = h.state;

        assert_eq!(h.tick(EXTENT), Tick::Rendered);
        assert_eq!(
            h.take_calls(),
            vec![
                Call::Begin(0),
                Call::Acquire(slot(0).image_available),
                Call::Draw { slot: 0, image: 2 },
                Call::Submit(0),
                Call::Present(2),
            ]
        );
        assert!(h.state.phase_time > before.phase_time);

        assert_eq!(h.tick(EXTENT), Tick::Rendered);
        assert_eq!(
            h.take_calls(),
            vec![
                Call::Begin(1),
                Call::Acquire(slot(1).image_available),
                Call::Draw { slot: 1, image: 0 },
                Call::Submit(1),
                Call::Present(0),
            ]
        );
        assert!(!h.frame_loop.needs_recreate);
        assert_eq!(h.frame_loop.current_frame, 0);
    }

    #[test]
    fn outdated_acquire_rebuilds_and_skips_without_stepping() {
        let mut h = Harness::new();
        h.target.acquires.push_back(Acquired::Outdated);
        let before = h.state;

        assert_eq!(h.tick(EXTENT), Tick::Skipped);
        assert_eq!(
            h.take_calls(),
            vec![Call::Begin(0), Call::Acquire(slot(0).image_available), Call::Rebuild(EXTENT)]
        );
        assert_eq!(h.state, before);

        // The fence was never reset, so the same slot is used again
        assert_eq!(h.tick(EXTENT), Tick::Rendered);
        assert_eq!(h.take_calls()[0], Call::Begin(0));
    }

    #[test]
    fn zero_area_window_skips_and_keeps_rebuild_pending() {
        let mut h = Harness::new();
        let minimized = vk::Extent2D { width: 0, height: 0 };
        let before = h.state;

        assert_eq!(h.tick(minimized), Tick::Skipped);
        assert_eq!(h.tick(vk::Extent2D { width: 640, height: 0 }), Tick::Skipped);
        assert!(h.take_calls().is_empty());
        assert!(h.frame_loop.needs_recreate);
        assert_eq!(h.state, before);

        assert_eq!(h.tick(EXTENT), Tick::Rendered);
        let calls = h.take_calls();
        assert_eq!(calls[0], Call::Rebuild(EXTENT));
        assert_eq!(calls[1], Call::Begin(0));
        assert!(!h.frame_loop.needs_recreate);
    }

    #[test]
    fn resized_window_rebuilds_before_waiting() {
        let mut h = Harness::new();
        let resized = vk::Extent2D {
            width: 1920,
            height: 1080,
        };

        assert_eq!(h.tick(resized), Tick::Rendered);
        assert_eq!(h.take_calls()[..2], [Call::Rebuild(resized), Call::Begin(0)]);

        h.tick(resized);
        assert!(!h.take_calls().contains(&Call::Rebuild(resized)));
    }

    #[test]
    fn suboptimal_acquire_still_renders_then_rebuilds() {
        let mut h = Harness::new();
        h.target.acquires.push_back(Acquired::Image {
            index: 1,
            suboptimal: true,
        });

        assert_eq!(h.tick(EXTENT), Tick::Rendered);
        assert!(h.take_calls().contains(&Call::Present(1)));
        assert!(h.frame_loop.needs_recreate);

        h.tick(EXTENT);
        assert_eq!(h.take_calls()[..2], [Call::Rebuild(EXTENT), Call::Begin(1)]);
    }

    #[test]
    fn present_needing_recreate_flags_the_next_tick() {
        let mut h = Harness::new();
        h.target.presents.push_back(Presented::NeedsRecreate);

        assert_eq!(h.tick(EXTENT), Tick::Rendered);
        assert!(h.frame_loop.needs_recreate);
        h.take_calls();

        h.tick(EXTENT);
        assert_eq!(h.take_calls()[0], Call::Rebuild(EXTENT));
        assert!(!h.frame_loop.needs_recreate);
    }

    #[test]
    fn requested_recreate_rebuilds_at_same_extent() {
        let mut h = Harness::new();
        h.frame_loop.needs_recreate = true;

        h.tick(EXTENT);
        assert_eq!(h.take_calls()[0], Call::Rebuild(EXTENT));
    }
}
