//! Parallel secondary command buffer recording
//!
//! Each worker owns a [`SecondaryCommandRing`] with one secondary buffer per
//! ring slot. A frame runs in lockstep with the main thread:
//!
//! 1. [`RenderThreadPool::begin_frame`] publishes the inheritance data and
//!    releases every worker through the frame-start barrier.
//! 2. Each worker begins its slot's buffer, runs the draw callback, ends the
//!    buffer and bumps the completion counter. The worker that brings the
//!    count to N triggers the completion signal.
//! 3. [`RenderThreadPool::process_frame`] waits for that signal and records
//!    the secondaries, in thread order, into the primary buffer.
//!
//! A worker that finished early parks on the barrier again, so it cannot
//! record twice before the next `begin_frame`. A panicking callback still
//! counts as finished; the frame is then reported as failed by
//! [`RenderThreadPool::collect_frame`].

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use ash::vk;

use super::command_buffer::CommandBuffer;
use crate::core::config::MAX_CONCURRENT_FRAMES;
use crate::render::backends::vulkan::initialization::device::Device;
use crate::render::backends::vulkan::state::signal::Signal;
use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// Draw callback run by every worker: `(secondary, thread_id, num_threads)`
pub type RenderCallback = Arc<dyn Fn(vk::CommandBuffer, usize, usize) + Send + Sync>;

/// What a secondary buffer inherits from the frame's render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInheritance {
    /// Render pass the secondaries execute in
    pub render_pass: vk::RenderPass,
    /// Framebuffer of the acquired swapchain image
    pub framebuffer: vk::Framebuffer,
    /// Render area size, used for the dynamic viewport and scissor
    pub extent: vk::Extent2D,
    /// Ring slot whose secondary buffers are recorded
    pub slot: usize,
}

impl FrameInheritance {
    /// Viewport covering the render area, flipped so +Y points up
    pub fn flipped_viewport(&self) -> vk::Viewport {
        let height = self.extent.height as f32;
        vk::Viewport {
            x: 0.0,
            y: height,
            width: self.extent.width as f32,
            height: -height,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }

    /// Scissor covering the render area
    pub fn scissor(&self) -> vk::Rect2D {
        vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: self.extent,
        }
    }
}

/// Per-worker ring of secondary command buffers
pub trait SecondaryCommandRing: Send {
    /// Begin the buffer of `frame.slot` for use inside `frame.render_pass`
    fn begin(&mut self, frame: &FrameInheritance) -> VulkanResult<vk::CommandBuffer>;

    /// End the buffer returned by the last `begin`
    fn end(&mut self) -> VulkanResult<()>;
}

/// Secondary buffers allocated from a worker-private graphics pool
pub struct VulkanSecondaryRing {
    device: Arc<Device>,
    pool: vk::CommandPool,
    buffers: Vec<CommandBuffer>,
    active: usize,
}

impl VulkanSecondaryRing {
    /// Create the pool and `slots` secondary buffers
    pub fn new(device: Arc<Device>, slots: usize) -> VulkanResult<Self> {
        let logical = device.logical();
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(device.queue_families().graphics);
        let pool = unsafe {
            logical.create_command_pool(&pool_info, None)
                .map_err(VulkanError::Api)?
        };

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::SECONDARY)
            .command_buffer_count(slots as u32);
        let raw = match unsafe { logical.allocate_command_buffers(&alloc_info) } {
            Ok(raw) => raw,
            Err(e) => {
                unsafe { logical.destroy_command_pool(pool, None) };
                return Err(VulkanError::Api(e));
            }
        };

        let queue = device.graphics_queue();
        let buffers = raw
            .into_iter()
            .map(|cmd| CommandBuffer::new(Arc::clone(&device), pool, cmd, queue, vk::QueueFlags::GRAPHICS))
            .collect();
        Ok(Self { device, pool, buffers, active: 0 })
    }
}

impl SecondaryCommandRing for VulkanSecondaryRing {
    fn begin(&mut self, frame: &FrameInheritance) -> VulkanResult<vk::CommandBuffer> {
        let Some(cmd) = self.buffers.get_mut(frame.slot) else {
            return Err(VulkanError::InvalidOperation {
                reason: format!("ring slot {} out of range", frame.slot),
            });
        };
        self.active = frame.slot;

        let inheritance = vk::CommandBufferInheritanceInfo::builder()
            .render_pass(frame.render_pass)
            .subpass(0)
            .framebuffer(frame.framebuffer)
            .build();
        cmd.begin(vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE, Some(&inheritance))?;
        cmd.set_viewport(frame.flipped_viewport());
        cmd.set_scissor(frame.scissor());
        Ok(cmd.handle())
    }

    fn end(&mut self) -> VulkanResult<()> {
        self.buffers[self.active].end()
    }
}

impl Drop for VulkanSecondaryRing {
    fn drop(&mut self) {
        let raw: Vec<vk::CommandBuffer> = self.buffers.iter().map(CommandBuffer::handle).collect();
        self.buffers.clear();
        unsafe {
            let logical = self.device.logical();
            logical.free_command_buffers(self.pool, &raw);
            logical.destroy_command_pool(self.pool, None);
        }
    }
}

/// Starts a named thread running `body`
type Spawner<'a> = dyn FnMut(String, Box<dyn FnOnce() + Send>) -> io::Result<JoinHandle<()>> + 'a;

fn spawn_named(name: String, body: Box<dyn FnOnce() + Send>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new().name(name).spawn(body)
}

const LAUNCH_GO: i32 = 1;
const LAUNCH_ABORT: i32 = -1;

struct SharedContext {
    launch: Signal,
    frame_start: Barrier,
    frame: Mutex<Option<FrameInheritance>>,
    recorded: Mutex<Vec<Option<vk::CommandBuffer>>>,
    completed: AtomicUsize,
    panicked: AtomicUsize,
    finished: Signal,
    stop: AtomicBool,
}

/// Workers recording secondary command buffers in parallel
pub struct RenderThreadPool {
    shared: Arc<SharedContext>,
    threads: Vec<JoinHandle<()>>,
    in_flight: bool,
}

impl RenderThreadPool {
    /// Spawn `num_threads` workers, each with a ring from `make_ring`
    ///
    /// Rings are created on the calling thread before any worker starts.
    /// With zero threads every frame call is a no-op.
    pub fn new<R, F>(num_threads: usize, callback: RenderCallback, make_ring: F) -> VulkanResult<Self>
    where
        R: SecondaryCommandRing + 'static,
        F: FnMut(usize) -> VulkanResult<R>,
    {
        Self::launch(num_threads, callback, make_ring, &mut spawn_named)
    }

    /// Workers are held at a launch gate until all of them exist. If a spawn
    /// fails, the gate opens with an abort value and the started workers are
    /// joined before the error is returned.
    fn launch<R, F>(
        num_threads: usize,
        callback: RenderCallback,
        mut make_ring: F,
        spawn: &mut Spawner<'_>,
    ) -> VulkanResult<Self>
    where
        R: SecondaryCommandRing + 'static,
        F: FnMut(usize) -> VulkanResult<R>,
    {
        log::info!("[RENDER] Creating render thread pool with {} threads", num_threads);
        let rings = (0..num_threads).map(&mut make_ring).collect::<VulkanResult<Vec<R>>>()?;

        let shared = Arc::new(SharedContext {
            launch: Signal::new(),
            frame_start: Barrier::new(num_threads + 1),
            frame: Mutex::new(None),
            recorded: Mutex::new(vec![None; num_threads]),
            completed: AtomicUsize::new(0),
            panicked: AtomicUsize::new(0),
            finished: Signal::new(),
            stop: AtomicBool::new(false),
        });

        let mut threads = Vec::with_capacity(num_threads);
        for (thread_id, ring) in rings.into_iter().enumerate() {
            let worker_shared = Arc::clone(&shared);
            let callback = Arc::clone(&callback);
            let body: Box<dyn FnOnce() + Send> =
                Box::new(move || worker_loop(thread_id, num_threads, ring, &callback, &worker_shared));
            match spawn(format!("render-{thread_id}"), body) {
                Ok(handle) => threads.push(handle),
                Err(e) => {
                    shared.launch.trigger(true, LAUNCH_ABORT);
                    join_workers(&mut threads);
                    return Err(VulkanError::InitializationFailed(format!(
                        "Failed to spawn render thread {thread_id}: {e}"
                    )));
                }
            }
        }
        if num_threads > 0 {
            shared.launch.trigger(true, LAUNCH_GO);
        }

        Ok(Self { shared, threads, in_flight: false })
    }

    /// Pool whose workers record into [`VulkanSecondaryRing`]s of `slots` buffers
    pub fn with_device(
        device: &Arc<Device>,
        num_threads: usize,
        slots: usize,
        callback: RenderCallback,
    ) -> VulkanResult<Self> {
        assert!(slots <= MAX_CONCURRENT_FRAMES, "more ring slots than concurrent frames");
        Self::new(num_threads, callback, |_| VulkanSecondaryRing::new(Arc::clone(device), slots))
    }

    /// Number of workers
    pub fn num_threads(&self) -> usize {
        self.threads.len()
    }

    /// Publish `frame` and start every worker
    ///
    /// # Panics
    /// If the previous frame was not collected.
    pub fn begin_frame(&mut self, frame: FrameInheritance) {
        if self.threads.is_empty() {
            return;
        }
        assert!(!self.in_flight, "begin_frame called twice without process_frame");
        *self.shared.frame.lock().unwrap_or_else(PoisonError::into_inner) = Some(frame);
        self.shared.completed.store(0, Ordering::SeqCst);
        self.shared.panicked.store(0, Ordering::SeqCst);
        self.in_flight = true;
        self.shared.frame_start.wait();
    }

    /// Block until every worker ended recording and return the secondaries in thread order
    ///
    /// Workers whose recording failed are left out. Returns nothing if no
    /// frame is in flight.
    ///
    /// # Errors
    /// If a draw callback panicked during this frame. The pool stays usable.
    pub fn collect_frame(&mut self) -> VulkanResult<Vec<vk::CommandBuffer>> {
        if !self.in_flight {
            return Ok(Vec::new());
        }
        self.shared.finished.wait(true, 1);
        self.in_flight = false;
        let panicked = self.shared.panicked.load(Ordering::SeqCst);
        if panicked > 0 {
            return Err(VulkanError::InvalidOperation {
                reason: format!("{panicked} render thread callback(s) panicked while recording"),
            });
        }
        let recorded = self.shared.recorded.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(recorded.iter().flatten().copied().collect())
    }

    /// Record every worker's secondary into `primary`
    pub fn process_frame(&mut self, primary: &mut CommandBuffer) -> VulkanResult<()> {
        let secondaries = self.collect_frame()?;
        primary.execute_commands(&secondaries);
        Ok(())
    }
}

impl Drop for RenderThreadPool {
    fn drop(&mut self) {
        if self.threads.is_empty() {
            return;
        }
        if self.in_flight {
            self.shared.finished.wait(true, 1);
        }
        self.shared.stop.store(true, Ordering::SeqCst);
        self.shared.frame_start.wait();
        join_workers(&mut self.threads);
    }
}

fn join_workers(threads: &mut Vec<JoinHandle<()>>) {
    for handle in threads.drain(..) {
        if handle.join().is_err() {
            log::error!("[RENDER] Render thread panicked");
        }
    }
}

fn worker_loop<R: SecondaryCommandRing>(
    thread_id: usize,
    num_threads: usize,
    mut ring: R,
    callback: &RenderCallback,
    shared: &SharedContext,
) {
    if shared.launch.wait(false, 0) == LAUNCH_ABORT {
        return;
    }
    log::info!("[RENDER] Render thread {} started", thread_id);
    loop {
        shared.frame_start.wait();
        if shared.stop.load(Ordering::SeqCst) {
            break;
        }
        let frame = *shared.frame.lock().unwrap_or_else(PoisonError::into_inner);
        let recorded = frame.and_then(|frame| record(thread_id, num_threads, &mut ring, callback, &frame, shared));
        shared.recorded.lock().unwrap_or_else(PoisonError::into_inner)[thread_id] = recorded;

        if shared.completed.fetch_add(1, Ordering::SeqCst) + 1 == num_threads {
            shared.finished.trigger(false, 1);
        }
    }
    log::info!("[RENDER] Render thread {} stopped", thread_id);
}

fn record<R: SecondaryCommandRing>(
    thread_id: usize,
    num_threads: usize,
    ring: &mut R,
    callback: &RenderCallback,
    frame: &FrameInheritance,
    shared: &SharedContext,
) -> Option<vk::CommandBuffer> {
    let cmd = match ring.begin(frame) {
        Ok(cmd) => cmd,
        Err(e) => {
            log::error!("[RENDER] Render thread {} failed to begin recording: {}", thread_id, e);
            return None;
        }
    };
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(cmd, thread_id, num_threads)));
    let ended = ring.end();
    if outcome.is_err() {
        log::error!("[RENDER] Draw callback panicked on render thread {}", thread_id);
        shared.panicked.fetch_add(1, Ordering::SeqCst);
        return None;
    }
    match ended {
        Ok(()) => Some(cmd),
        Err(e) => {
            log::error!("[RENDER] Render thread {} failed to end recording: {}", thread_id, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    struct MockRing {
        id: u64,
        recording: bool,
        ends: Arc<AtomicUsize>,
    }

    impl SecondaryCommandRing for MockRing {
        fn begin(&mut self, frame: &FrameInheritance) -> VulkanResult<vk::CommandBuffer> {
            assert!(!self.recording);
            self.recording = true;
            Ok(vk::CommandBuffer::from_raw(self.id * 10 + frame.slot as u64))
        }

        fn end(&mut self) -> VulkanResult<()> {
            assert!(self.recording);
            self.recording = false;
            self.ends.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn frame(slot: usize) -> FrameInheritance {
        FrameInheritance {
            render_pass: vk::RenderPass::from_raw(1),
            framebuffer: vk::Framebuffer::from_raw(2),
            extent: vk::Extent2D { width: 800, height: 600 },
            slot,
        }
    }

    #[test]
    fn test_each_callback_runs_once_per_frame() {
        const THREADS: usize = 4;
        let calls: Arc<Vec<AtomicUsize>> = Arc::new((0..THREADS).map(|_| AtomicUsize::new(0)).collect());
        let ends = Arc::new(AtomicUsize::new(0));
        let callback: RenderCallback = {
            let calls = Arc::clone(&calls);
            Arc::new(move |_, thread_id, num_threads| {
                assert_eq!(num_threads, THREADS);
                calls[thread_id].fetch_add(1, Ordering::SeqCst);
            })
        };
        let mut pool = RenderThreadPool::new(THREADS, callback, |i| {
            Ok(MockRing { id: i as u64 + 1, recording: false, ends: Arc::clone(&ends) })
        })
        .unwrap();

        for n in 0..5 {
            pool.begin_frame(frame(n % 3));
            let secondaries = pool.collect_frame().unwrap();
            // Every buffer handed back has already been ended
            assert_eq!(ends.load(Ordering::SeqCst), (n + 1) * THREADS);
            let expected: Vec<_> = (0..THREADS)
                .map(|i| vk::CommandBuffer::from_raw((i as u64 + 1) * 10 + (n % 3) as u64))
                .collect();
            assert_eq!(secondaries, expected);
            for count in calls.iter() {
                assert_eq!(count.load(Ordering::SeqCst), n + 1);
            }
        }
    }

    #[test]
    fn test_zero_threads_is_noop() {
        let callback: RenderCallback = Arc::new(|_, _, _| panic!("no workers expected"));
        let mut pool = RenderThreadPool::new(0, callback, |_| -> VulkanResult<MockRing> { unreachable!() }).unwrap();
        pool.begin_frame(frame(0));
        assert!(pool.collect_frame().unwrap().is_empty());
    }

    #[test]
    fn test_drop_mid_frame_joins() {
        let ends = Arc::new(AtomicUsize::new(0));
        let callback: RenderCallback = Arc::new(|_, _, _| {});
        let mut pool = RenderThreadPool::new(2, callback, |i| {
            Ok(MockRing { id: i as u64 + 1, recording: false, ends: Arc::clone(&ends) })
        })
        .unwrap();
        pool.begin_frame(frame(0));
        drop(pool);
        assert_eq!(ends.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_panicking_callback_fails_frame_without_hanging() {
        let ends = Arc::new(AtomicUsize::new(0));
        let panic_next = Arc::new(AtomicBool::new(true));
        let callback: RenderCallback = {
            let panic_next = Arc::clone(&panic_next);
            Arc::new(move |_, thread_id, _| {
                if thread_id == 1 && panic_next.swap(false, Ordering::SeqCst) {
                    panic!("draw callback failure");
                }
            })
        };
        let mut pool = RenderThreadPool::new(3, callback, |i| {
            Ok(MockRing { id: i as u64 + 1, recording: false, ends: Arc::clone(&ends) })
        })
        .unwrap();

        pool.begin_frame(frame(0));
        assert!(pool.collect_frame().is_err());
        // The panicking worker still ended its buffer
        assert_eq!(ends.load(Ordering::SeqCst), 3);

        pool.begin_frame(frame(1));
        assert_eq!(pool.collect_frame().unwrap().len(), 3);
        drop(pool);
    }

    #[test]
    fn test_failed_spawn_releases_started_workers() {
        struct CountedRing(Arc<AtomicUsize>);

        impl SecondaryCommandRing for CountedRing {
            fn begin(&mut self, _: &FrameInheritance) -> VulkanResult<vk::CommandBuffer> {
                Ok(vk::CommandBuffer::null())
            }

            fn end(&mut self) -> VulkanResult<()> {
                Ok(())
            }
        }

        impl Drop for CountedRing {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let dropped = Arc::new(AtomicUsize::new(0));
        let callback: RenderCallback = Arc::new(|_, _, _| panic!("no frame expected"));
        let mut spawned = 0;
        let mut spawn = |name: String, body: Box<dyn FnOnce() + Send>| {
            spawned += 1;
            if spawned == 3 {
                return Err(io::Error::new(io::ErrorKind::Other, "out of threads"));
            }
            spawn_named(name, body)
        };
        let result = RenderThreadPool::launch(4, callback, |_| Ok(CountedRing(Arc::clone(&dropped))), &mut spawn);

        assert!(matches!(result, Err(VulkanError::InitializationFailed(_))));
        // Two joined workers plus the two rings that never got a thread
        assert_eq!(dropped.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_flipped_viewport() {
        let viewport = frame(0).flipped_viewport();
        assert_eq!(viewport.y, 600.0);
        assert_eq!(viewport.height, -600.0);
        assert_eq!(frame(0).scissor().extent.width, 800);
    }
}
