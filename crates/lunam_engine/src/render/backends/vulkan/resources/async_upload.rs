//! Background GPU uploads
//!
//! Uploads are recorded by worker threads and submitted from the main thread.
//! Two pools share the work: four static uploaders for large, rarely-changing
//! data and two dynamic uploaders for small streamed data. Each pool has its
//! own task queue guarded by its own mutex and condition variable.
//!
//! An uploader moves through `Idle -> Recorded -> Submitted -> Idle`.
//! Workers record; [`AsyncUploadManager::tick`] submits recorded work,
//! polls fences of submitted work, and wakes workers when tasks are waiting.
//! The main thread never blocks on an uploader that is busy recording.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread::{self, JoinHandle};

use ash::vk;

use super::buffer::{GpuBuffer, MemoryLocation};
use crate::render::backends::vulkan::initialization::device::Device;
use crate::render::backends::vulkan::rendering::command_buffer::CommandBuffer;
use crate::render::backends::vulkan::state::sync::{Fence, FrameFence};
use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// Uploaders serving large, rarely-changing data
pub const STATIC_UPLOADERS: usize = 4;
/// Uploaders serving small streamed data
pub const DYNAMIC_UPLOADERS: usize = 2;
/// Staging allocations are rounded up to this many bytes
pub const STAGING_ROUND: usize = 128;

/// Staging bytes reserved for an upload of `size` bytes
pub fn quantize_upload_size(size: usize) -> usize {
    size.max(1).div_ceil(STAGING_ROUND) * STAGING_ROUND
}

/// Which pool an upload is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UploadPool {
    /// Large, rarely-changing uploads
    Static,
    /// Small or streamed uploads
    Dynamic,
}

impl UploadPool {
    /// Pool for an upload of `size` bytes: `threshold` and above go static
    pub fn route(size: usize, threshold: usize) -> Self {
        if size >= threshold {
            UploadPool::Static
        } else {
            UploadPool::Dynamic
        }
    }

    fn index(self) -> usize {
        match self {
            UploadPool::Static => 0,
            UploadPool::Dynamic => 1,
        }
    }
}

/// Recording context handed to [`UploadTask::record`]
pub struct UploadContext<'a> {
    /// Mapped staging memory reserved for this task
    pub staging: &'a mut [u8],
    /// Staging buffer backing `staging`
    pub staging_buffer: vk::Buffer,
    /// Transfer command buffer, already begun
    pub cmd: &'a mut CommandBuffer,
}

/// A unit of upload work
pub trait UploadTask: Send {
    /// Bytes of staging memory the task writes
    fn upload_size(&self) -> usize;

    /// Fill staging memory and record the copies
    fn record(&mut self, ctx: UploadContext<'_>);

    /// Called on the main thread once the GPU finished the copies
    fn on_finish(&mut self) {}
}

/// Per-uploader command recording and submission
pub trait UploadTarget: Send {
    /// Record `task` (runs on the uploader thread)
    fn record(&mut self, task: &mut dyn UploadTask) -> VulkanResult<()>;

    /// Submit the last recording (runs on the main thread)
    fn submit(&mut self) -> VulkanResult<()>;

    /// Whether submitted work completed; completion resets the fence
    fn poll(&mut self) -> VulkanResult<bool>;
}

/// Transfer-queue uploader with its own pool, fence and staging buffer
pub struct VulkanUploadTarget {
    device: Arc<Device>,
    cmd: CommandBuffer,
    fence: Fence,
    staging: Option<GpuBuffer>,
    submitted: bool,
}

impl VulkanUploadTarget {
    /// Create the command pool, buffer and fence on the calling thread
    pub fn new(device: Arc<Device>) -> VulkanResult<Self> {
        let cmd = CommandBuffer::allocate(Arc::clone(&device), vk::QueueFlags::TRANSFER, vk::CommandBufferLevel::PRIMARY)?;
        let fence = Fence::new(Arc::clone(&device), false)?;
        Ok(Self {
            device,
            cmd,
            fence,
            staging: None,
            submitted: false,
        })
    }

    fn ensure_staging(&mut self, size: usize) -> VulkanResult<()> {
        let fits = self.staging.as_ref().is_some_and(|s| s.size() >= size as vk::DeviceSize);
        if !fits {
            self.staging = Some(GpuBuffer::new(
                Arc::clone(&self.device),
                size as vk::DeviceSize,
                vk::BufferUsageFlags::TRANSFER_SRC,
                MemoryLocation::CpuToGpu,
                true,
            )?);
        }
        Ok(())
    }
}

impl UploadTarget for VulkanUploadTarget {
    fn record(&mut self, task: &mut dyn UploadTask) -> VulkanResult<()> {
        let size = task.upload_size();
        self.ensure_staging(quantize_upload_size(size))?;
        let Some(staging) = self.staging.as_mut() else {
            return Err(VulkanError::InvalidOperation {
                reason: "staging buffer missing".to_string(),
            });
        };
        let staging_buffer = staging.handle();
        let Some(bytes) = staging.mapped_slice_mut() else {
            return Err(VulkanError::InvalidOperation {
                reason: "staging buffer not mapped".to_string(),
            });
        };

        self.cmd.reset()?;
        self.cmd.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT, None)?;
        task.record(UploadContext {
            staging: &mut bytes[..size],
            staging_buffer,
            cmd: &mut self.cmd,
        });
        self.cmd.end()
    }

    fn submit(&mut self) -> VulkanResult<()> {
        let buffers = [self.cmd.handle()];
        let submit = vk::SubmitInfo::builder().command_buffers(&buffers).build();
        unsafe {
            self.device
                .logical()
                .queue_submit(self.device.transfer_queue(), &[submit], self.fence.handle())
                .map_err(VulkanError::Api)?;
        }
        self.submitted = true;
        Ok(())
    }

    fn poll(&mut self) -> VulkanResult<bool> {
        if !self.fence.is_signaled()? {
            return Ok(false);
        }
        self.fence.reset()?;
        self.submitted = false;
        Ok(true)
    }
}

impl Drop for VulkanUploadTarget {
    fn drop(&mut self) {
        if self.submitted {
            if let Err(e) = self.fence.wait_timeout(u64::MAX) {
                log::error!("[UPLOAD] Failed to wait for in-flight upload: {}", e);
            }
        }
    }
}

enum SlotState {
    Idle,
    Recorded(Box<dyn UploadTask>),
    Submitted(Box<dyn UploadTask>),
}

struct Slot<T> {
    target: T,
    state: SlotState,
}

struct Uploader<T> {
    name: String,
    pool: UploadPool,
    busy: AtomicBool,
    slot: Mutex<Slot<T>>,
}

#[derive(Default)]
struct TaskQueue {
    tasks: Mutex<VecDeque<Box<dyn UploadTask>>>,
    cond: Condvar,
}

impl TaskQueue {
    fn lock(&self) -> MutexGuard<'_, VecDeque<Box<dyn UploadTask>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        let _guard = self.lock();
        self.cond.notify_all();
    }
}

/// Starts a named thread running `body`
type Spawner<'a> = dyn FnMut(String, Box<dyn FnOnce() + Send>) -> io::Result<JoinHandle<()>> + 'a;

fn spawn_named(name: String, body: Box<dyn FnOnce() + Send>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new().name(name).spawn(body)
}

fn try_lock<T>(mutex: &Mutex<T>) -> Option<MutexGuard<'_, T>> {
    match mutex.try_lock() {
        Ok(guard) => Some(guard),
        Err(TryLockError::Poisoned(e)) => Some(e.into_inner()),
        Err(TryLockError::WouldBlock) => None,
    }
}

/// Routes upload tasks to uploader threads and drives their submission
pub struct AsyncUploadManager<T: UploadTarget + 'static> {
    threshold: usize,
    queues: [Arc<TaskQueue>; 2],
    uploaders: Vec<Arc<Uploader<T>>>,
    threads: Vec<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
}

impl AsyncUploadManager<VulkanUploadTarget> {
    /// Manager with Vulkan transfer uploaders
    pub fn with_device(device: &Arc<Device>, threshold: usize) -> VulkanResult<Self> {
        Self::new(threshold, |_, _| VulkanUploadTarget::new(Arc::clone(device)))
    }
}

impl<T: UploadTarget + 'static> AsyncUploadManager<T> {
    /// Create every uploader through `make_target`, then start their threads
    pub fn new<F>(threshold: usize, make_target: F) -> VulkanResult<Self>
    where
        F: FnMut(UploadPool, usize) -> VulkanResult<T>,
    {
        Self::launch(threshold, make_target, &mut spawn_named)
    }

    /// A failed spawn drops the partially started manager, which stops and
    /// joins the workers already running.
    fn launch<F>(threshold: usize, mut make_target: F, spawn: &mut Spawner<'_>) -> VulkanResult<Self>
    where
        F: FnMut(UploadPool, usize) -> VulkanResult<T>,
    {
        let layout = (0..STATIC_UPLOADERS)
            .map(|i| (UploadPool::Static, i))
            .chain((0..DYNAMIC_UPLOADERS).map(|i| (UploadPool::Dynamic, i)));

        let mut uploaders = Vec::with_capacity(STATIC_UPLOADERS + DYNAMIC_UPLOADERS);
        for (pool, i) in layout {
            let target = make_target(pool, i)?;
            let name = match pool {
                UploadPool::Static => format!("static-{i}"),
                UploadPool::Dynamic => format!("dynamic-{i}"),
            };
            uploaders.push(Arc::new(Uploader {
                name,
                pool,
                busy: AtomicBool::new(false),
                slot: Mutex::new(Slot { target, state: SlotState::Idle }),
            }));
        }

        let mut manager = Self {
            threshold,
            queues: [Arc::new(TaskQueue::default()), Arc::new(TaskQueue::default())],
            threads: Vec::with_capacity(uploaders.len()),
            uploaders,
            stop: Arc::new(AtomicBool::new(false)),
        };
        for uploader in &manager.uploaders {
            let uploader = Arc::clone(uploader);
            let queue = Arc::clone(&manager.queues[uploader.pool.index()]);
            let stop = Arc::clone(&manager.stop);
            let name = format!("upload-{}", uploader.name);
            let body: Box<dyn FnOnce() + Send> = Box::new(move || uploader_loop(&uploader, &queue, &stop));
            let handle = spawn(name, body)
                .map_err(|e| VulkanError::InitializationFailed(format!("Failed to spawn uploader thread: {e}")))?;
            manager.threads.push(handle);
        }
        log::info!(
            "[UPLOAD] Async upload manager online: {} static, {} dynamic uploaders, threshold {} bytes",
            STATIC_UPLOADERS,
            DYNAMIC_UPLOADERS,
            threshold
        );

        Ok(manager)
    }

    /// Queue `task`, routed by its size; returns the pool it went to
    pub fn push_task(&self, task: Box<dyn UploadTask>) -> UploadPool {
        let pool = UploadPool::route(task.upload_size(), self.threshold);
        let queue = &self.queues[pool.index()];
        queue.lock().push_back(task);
        queue.cond.notify_one();
        pool
    }

    /// Number of tasks not yet picked up by an uploader
    pub fn queued(&self, pool: UploadPool) -> usize {
        self.queues[pool.index()].lock().len()
    }

    /// Whether any uploader holds a task
    pub fn any_in_flight(&self) -> bool {
        self.uploaders.iter().any(|u| u.busy.load(Ordering::SeqCst))
    }

    /// Finish completed uploads, submit recorded ones and wake idle workers
    pub fn tick(&self) {
        self.sync_pending_objects();
        self.submit_objects();
        for queue in &self.queues {
            if !queue.lock().is_empty() {
                queue.notify();
            }
        }
    }

    /// Drive uploads until nothing is queued or in flight
    pub fn flush_task(&self) {
        loop {
            self.tick();
            let queued = self.queues.iter().any(|q| !q.lock().is_empty());
            if !queued && !self.any_in_flight() {
                break;
            }
            thread::yield_now();
        }
    }

    fn sync_pending_objects(&self) {
        for uploader in &self.uploaders {
            let Some(mut slot) = try_lock(&uploader.slot) else {
                continue;
            };
            if !matches!(slot.state, SlotState::Submitted(_)) {
                continue;
            }
            match slot.target.poll() {
                Ok(true) => {
                    if let SlotState::Submitted(mut task) = std::mem::replace(&mut slot.state, SlotState::Idle) {
                        task.on_finish();
                    }
                    drop(slot);
                    uploader.busy.store(false, Ordering::SeqCst);
                    self.queues[uploader.pool.index()].notify();
                }
                Ok(false) => {}
                Err(e) => log::error!("[UPLOAD] Uploader {} fence poll failed: {}", uploader.name, e),
            }
        }
    }

    fn submit_objects(&self) {
        for uploader in &self.uploaders {
            let Some(mut slot) = try_lock(&uploader.slot) else {
                continue;
            };
            if !matches!(slot.state, SlotState::Recorded(_)) {
                continue;
            }
            let SlotState::Recorded(task) = std::mem::replace(&mut slot.state, SlotState::Idle) else {
                continue;
            };
            match slot.target.submit() {
                Ok(()) => slot.state = SlotState::Submitted(task),
                Err(e) => {
                    log::error!("[UPLOAD] Uploader {} submit failed, dropping task: {}", uploader.name, e);
                    drop(slot);
                    uploader.busy.store(false, Ordering::SeqCst);
                }
            }
        }
    }
}

impl<T: UploadTarget + 'static> Drop for AsyncUploadManager<T> {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        for queue in &self.queues {
            queue.notify();
        }
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                log::error!("[UPLOAD] Uploader thread panicked");
            }
        }
    }
}

fn uploader_loop<T: UploadTarget>(uploader: &Uploader<T>, queue: &TaskQueue, stop: &AtomicBool) {
    log::info!("[UPLOAD] Uploader {} online", uploader.name);
    loop {
        let mut task = {
            let mut tasks = queue
                .cond
                .wait_while(queue.lock(), |tasks| {
                    !stop.load(Ordering::SeqCst) && (tasks.is_empty() || uploader.busy.load(Ordering::SeqCst))
                })
                .unwrap_or_else(PoisonError::into_inner);
            if stop.load(Ordering::SeqCst) {
                break;
            }
            let Some(task) = tasks.pop_front() else {
                continue;
            };
            uploader.busy.store(true, Ordering::SeqCst);
            task
        };

        let mut slot = uploader.slot.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.target.record(task.as_mut()) {
            Ok(()) => slot.state = SlotState::Recorded(task),
            Err(e) => {
                log::error!("[UPLOAD] Uploader {} failed to record task: {}", uploader.name, e);
                drop(slot);
                uploader.busy.store(false, Ordering::SeqCst);
            }
        }
    }
    log::info!("[UPLOAD] Uploader {} offline", uploader.name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counters {
        recorded: AtomicUsize,
        submitted: AtomicUsize,
        finished: AtomicUsize,
        dropped: AtomicUsize,
    }

    struct MockTarget {
        counters: Arc<Counters>,
        pending: bool,
    }

    impl UploadTarget for MockTarget {
        fn record(&mut self, _task: &mut dyn UploadTask) -> VulkanResult<()> {
            self.counters.recorded.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn submit(&mut self) -> VulkanResult<()> {
            assert!(!self.pending, "submitted twice without completion");
            self.pending = true;
            self.counters.submitted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn poll(&mut self) -> VulkanResult<bool> {
            let done = self.pending;
            self.pending = false;
            Ok(done)
        }
    }

    impl Drop for MockTarget {
        fn drop(&mut self) {
            self.counters.dropped.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct SizedTask {
        size: usize,
        counters: Arc<Counters>,
    }

    impl UploadTask for SizedTask {
        fn upload_size(&self) -> usize {
            self.size
        }

        fn record(&mut self, _ctx: UploadContext<'_>) {}

        fn on_finish(&mut self) {
            self.counters.finished.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn manager(counters: &Arc<Counters>) -> AsyncUploadManager<MockTarget> {
        AsyncUploadManager::new(1024, |_, _| Ok(MockTarget { counters: Arc::clone(counters), pending: false })).unwrap()
    }

    #[test]
    fn test_quantize() {
        assert_eq!(quantize_upload_size(0), 128);
        assert_eq!(quantize_upload_size(1), 128);
        assert_eq!(quantize_upload_size(128), 128);
        assert_eq!(quantize_upload_size(129), 256);
    }

    #[test]
    fn test_route_by_threshold() {
        assert_eq!(UploadPool::route(4096, 1024), UploadPool::Static);
        assert_eq!(UploadPool::route(1024, 1024), UploadPool::Static);
        assert_eq!(UploadPool::route(16, 1024), UploadPool::Dynamic);
    }

    #[test]
    fn test_push_task_routes() {
        let counters = Arc::new(Counters::default());
        let uploads = manager(&counters);
        let big = Box::new(SizedTask { size: 1 << 20, counters: Arc::clone(&counters) });
        let small = Box::new(SizedTask { size: 64, counters: Arc::clone(&counters) });
        assert_eq!(uploads.push_task(big), UploadPool::Static);
        assert_eq!(uploads.push_task(small), UploadPool::Dynamic);
        uploads.flush_task();
    }

    #[test]
    fn test_flush_completes_every_task() {
        let counters = Arc::new(Counters::default());
        let uploads = manager(&counters);
        for i in 0..40 {
            let size = if i % 2 == 0 { 4096 } else { 32 };
            uploads.push_task(Box::new(SizedTask { size, counters: Arc::clone(&counters) }));
        }
        uploads.flush_task();

        assert_eq!(counters.recorded.load(Ordering::SeqCst), 40);
        assert_eq!(counters.submitted.load(Ordering::SeqCst), 40);
        assert_eq!(counters.finished.load(Ordering::SeqCst), 40);
        assert_eq!(uploads.queued(UploadPool::Static), 0);
        assert_eq!(uploads.queued(UploadPool::Dynamic), 0);
        assert!(!uploads.any_in_flight());
    }

    #[test]
    fn test_failed_spawn_stops_started_uploaders() {
        let counters = Arc::new(Counters::default());
        let mut spawned = 0;
        let mut spawn = |name: String, body: Box<dyn FnOnce() + Send>| {
            spawned += 1;
            if spawned == 3 {
                return Err(io::Error::new(io::ErrorKind::Other, "out of threads"));
            }
            spawn_named(name, body)
        };
        let result = AsyncUploadManager::launch(
            1024,
            |_, _| Ok(MockTarget { counters: Arc::clone(&counters), pending: false }),
            &mut spawn,
        );

        assert!(matches!(result, Err(VulkanError::InitializationFailed(_))));
        assert_eq!(counters.dropped.load(Ordering::SeqCst), STATIC_UPLOADERS + DYNAMIC_UPLOADERS);
    }

    #[test]
    fn test_drop_with_idle_workers() {
        let counters = Arc::new(Counters::default());
        drop(manager(&counters));
        assert_eq!(counters.recorded.load(Ordering::SeqCst), 0);
    }
}
