// Frame driver
//
// wait fence -> acquire -> reset fence -> reset + record -> submit -> present -> advance
//
// The driver owns the frame counter and the resize flag. Everything that
// touches the GPU goes through `FrameBackend`.

use crate::backend::swapchain::{AcquireOutcome, PresentOutcome};
use crate::error::Result;

/// Frames the CPU may record ahead of the GPU
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Where the driver currently is within an iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Waiting,
    Acquiring,
    Recording,
    Submitting,
    Presenting,
    /// Surface is being rebuilt; re-enters at Idle
    Invalidated,
}

/// Why the surface had to be rebuilt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationCause {
    OutOfDateOnAcquire,
    OutOfDateOnPresent,
    Suboptimal,
    Resized,
}

/// What a single iteration ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Frame submitted and presented
    Presented,
    /// Frame submitted, then the surface was rebuilt at present time
    Rebuilt(InvalidationCause),
    /// Acquire found the surface out of date; rebuilt without advancing
    Stale,
    /// Nothing to draw into (minimized window)
    Skipped,
}

impl FrameOutcome {
    /// Whether the frame counter moved on
    pub fn advanced(self) -> bool {
        matches!(self, FrameOutcome::Presented | FrameOutcome::Rebuilt(_))
    }
}

/// Running totals, mostly for logging at shutdown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub frames: u64,
    pub rebuilds: u64,
    pub skipped: u64,
}

/// GPU side of the present loop.
///
/// `slot` is always in `[0, frames_in_flight)`; `image_index` is whatever the
/// last successful acquire returned.
pub trait FrameBackend {
    /// False while the window has no pixels to render into
    fn is_drawable(&self) -> bool;
    fn wait_for_slot(&mut self, slot: usize) -> Result<()>;
    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome>;
    fn reset_slot_fence(&mut self, slot: usize) -> Result<()>;
    fn reset_command_buffer(&mut self, slot: usize) -> Result<()>;
    fn record(&mut self, slot: usize, image_index: u32) -> Result<()>;
    fn submit(&mut self, slot: usize, image_index: u32) -> Result<()>;
    fn present(&mut self, image_index: u32) -> Result<PresentOutcome>;
    /// Wait for idle, then rebuild the swapchain and everything sized by it
    fn rebuild_surface(&mut self) -> Result<()>;
    fn wait_idle(&mut self) -> Result<()>;
}

pub struct FrameDriver {
    frame_index: usize,
    frames_in_flight: usize,
    resize_pending: bool,
    /// Set by a skipped iteration; no redraws until the window has pixels again
    parked: bool,
    wait_idle_each_frame: bool,
    state: FrameState,
    stats: FrameStats,
}

impl FrameDriver {
    pub fn new(frames_in_flight: usize, wait_idle_each_frame: bool) -> Self {
        assert!(frames_in_flight > 0, "at least one frame in flight");
        Self {
            frame_index: 0,
            frames_in_flight,
            resize_pending: false,
            parked: false,
            wait_idle_each_frame,
            state: FrameState::Idle,
            stats: FrameStats::default(),
        }
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Called from the window event handler; consumed at the next present
    pub fn request_resize(&mut self) {
        self.resize_pending = true;
    }

    /// Whether the event loop should ask for another frame right away
    pub fn wants_redraw(&self) -> bool {
        !self.parked
    }

    /// The window has pixels again after being minimized
    pub fn resume(&mut self) {
        self.parked = false;
    }

    /// Run one iteration of the present loop.
    ///
    /// Out-of-date and suboptimal surfaces are handled here and never come
    /// back as errors. Any error returned is fatal.
    pub fn run_iteration<B: FrameBackend>(&mut self, backend: &mut B) -> Result<FrameOutcome> {
        if !backend.is_drawable() {
            self.stats.skipped += 1;
            self.parked = true;
            return Ok(FrameOutcome::Skipped);
        }
        self.parked = false;

        let outcome = self.iterate(backend)?;

        if self.wait_idle_each_frame {
            backend.wait_idle()?;
        }
        Ok(outcome)
    }

    fn iterate<B: FrameBackend>(&mut self, backend: &mut B) -> Result<FrameOutcome> {
        let slot = self.frame_index;

        self.state = FrameState::Waiting;
        backend.wait_for_slot(slot)?;

        self.state = FrameState::Acquiring;
        let image_index = match backend.acquire_image(slot)? {
            AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            } => {
                if suboptimal {
                    log::debug!("Acquired image {} from a suboptimal swapchain", image_index);
                }
                image_index
            }
            AcquireOutcome::OutOfDate => {
                // The fence stays signaled, so the retry on this slot won't block
                self.invalidate(backend, InvalidationCause::OutOfDateOnAcquire)?;
                return Ok(FrameOutcome::Stale);
            }
        };

        // Only now is work certain to be submitted with this fence
        backend.reset_slot_fence(slot)?;

        self.state = FrameState::Recording;
        backend.reset_command_buffer(slot)?;
        backend.record(slot, image_index)?;

        self.state = FrameState::Submitting;
        backend.submit(slot, image_index)?;

        self.state = FrameState::Presenting;
        let cause = match backend.present(image_index)? {
            PresentOutcome::OutOfDate => Some(InvalidationCause::OutOfDateOnPresent),
            PresentOutcome::Suboptimal => Some(InvalidationCause::Suboptimal),
            PresentOutcome::Presented if self.resize_pending => Some(InvalidationCause::Resized),
            PresentOutcome::Presented => None,
        };

        let outcome = match cause {
            Some(cause) => {
                self.resize_pending = false;
                self.invalidate(backend, cause)?;
                FrameOutcome::Rebuilt(cause)
            }
            None => FrameOutcome::Presented,
        };

        self.frame_index = (self.frame_index + 1) % self.frames_in_flight;
        self.stats.frames += 1;
        self.state = FrameState::Idle;

        Ok(outcome)
    }

    fn invalidate<B: FrameBackend>(
        &mut self,
        backend: &mut B,
        cause: InvalidationCause,
    ) -> Result<()> {
        log::debug!("Rebuilding swapchain: {:?}", cause);
        self.state = FrameState::Invalidated;
        backend.rebuild_surface()?;
        self.stats.rebuilds += 1;
        self.state = FrameState::Idle;
        Ok(())
    }
}
