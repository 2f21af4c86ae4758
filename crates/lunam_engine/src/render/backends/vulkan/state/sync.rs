//! Vulkan synchronization primitives and the frames-in-flight ring
//!
//! [`Semaphore`] and [`Fence`] are RAII wrappers holding a shared [`Device`].
//! [`FrameRing`] bounds CPU/GPU overlap: each ring slot owns one fence that
//! is waited on and reset before the slot's command buffer is reused, so at
//! most `len()` frames are ever in flight.
//!
//! The ring is generic over [`FrameFence`] so the pacing logic can be driven
//! without a GPU.

use std::sync::Arc;

use ash::vk;

use crate::render::backends::vulkan::initialization::device::Device;
use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// Binary semaphore with RAII cleanup
pub struct Semaphore {
    device: Arc<Device>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Create a new semaphore
    pub fn new(device: Arc<Device>) -> VulkanResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::builder();

        let semaphore = unsafe {
            device.logical().create_semaphore(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, semaphore })
    }

    /// Get the semaphore handle
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.logical().destroy_semaphore(self.semaphore, None);
        }
    }
}

/// Fence wrapper with RAII cleanup
pub struct Fence {
    device: Arc<Device>,
    fence: vk::Fence,
}

impl Fence {
    /// Create a new fence, optionally already signaled
    pub fn new(device: Arc<Device>, signaled: bool) -> VulkanResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::builder().flags(flags);

        let fence = unsafe {
            device.logical().create_fence(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, fence })
    }

    /// Block for at most `timeout` nanoseconds
    pub fn wait_timeout(&self, timeout: u64) -> VulkanResult<()> {
        unsafe {
            self.device.logical().wait_for_fences(&[self.fence], true, timeout)
                .map_err(VulkanError::Api)
        }
    }

    /// Whether the fence is currently signaled
    pub fn is_signaled(&self) -> VulkanResult<bool> {
        unsafe {
            self.device.logical().get_fence_status(self.fence)
                .map_err(VulkanError::Api)
        }
    }

    /// Get the fence handle
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.logical().destroy_fence(self.fence, None);
        }
    }
}

/// CPU-side view of a fence guarding one ring slot
pub trait FrameFence {
    /// Block until the GPU signals the fence
    fn wait(&self) -> VulkanResult<()>;
    /// Return the fence to the unsignaled state
    fn reset(&self) -> VulkanResult<()>;
}

impl FrameFence for Fence {
    fn wait(&self) -> VulkanResult<()> {
        self.wait_timeout(u64::MAX)
    }

    fn reset(&self) -> VulkanResult<()> {
        unsafe {
            self.device.logical().reset_fences(&[self.fence])
                .map_err(VulkanError::Api)
        }
    }
}

/// Ring of per-frame fences indexed by the concurrent frame slot
pub struct FrameRing<F> {
    fences: Vec<F>,
    current: usize,
}

impl<F: FrameFence> FrameRing<F> {
    /// Create a ring with one slot per fence, starting at slot 0
    ///
    /// Fences should start signaled so the first pass over the ring does not block.
    pub fn new(fences: Vec<F>) -> Self {
        assert!(!fences.is_empty(), "frame ring needs at least one slot");
        Self { fences, current: 0 }
    }

    /// Wait for the current slot's previous frame to retire, then reset its fence
    ///
    /// Returns the slot index that may now be recorded into.
    pub fn acquire(&self) -> VulkanResult<usize> {
        let fence = &self.fences[self.current];
        fence.wait()?;
        fence.reset()?;
        Ok(self.current)
    }

    /// Move to the next slot, wrapping at `len()`
    pub fn advance(&mut self) -> usize {
        self.current = (self.current + 1) % self.fences.len();
        self.current
    }

    /// Current slot index
    pub fn current(&self) -> usize {
        self.current
    }

    /// Fence guarding the current slot
    pub fn current_fence(&self) -> &F {
        &self.fences[self.current]
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.fences.len()
    }

    /// Always false, a ring has at least one slot
    pub fn is_empty(&self) -> bool {
        self.fences.is_empty()
    }

    /// Swap in fresh fences and restart at slot 0
    pub fn replace(&mut self, fences: Vec<F>) {
        assert!(!fences.is_empty(), "frame ring needs at least one slot");
        self.fences = fences;
        self.current = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Condvar, Mutex};
    use std::thread;
    use std::time::Duration;

    type Events = Arc<Mutex<Vec<(usize, &'static str)>>>;

    struct MockFence {
        id: usize,
        state: Arc<(Mutex<bool>, Condvar)>,
        events: Events,
    }

    impl MockFence {
        fn new(id: usize, events: &Events) -> Self {
            Self {
                id,
                state: Arc::new((Mutex::new(true), Condvar::new())),
                events: Arc::clone(events),
            }
        }
    }

    impl FrameFence for MockFence {
        fn wait(&self) -> VulkanResult<()> {
            let (lock, cvar) = &*self.state;
            let mut signaled = lock.lock().unwrap();
            while !*signaled {
                signaled = cvar.wait(signaled).unwrap();
            }
            self.events.lock().unwrap().push((self.id, "wait"));
            Ok(())
        }

        fn reset(&self) -> VulkanResult<()> {
            *self.state.0.lock().unwrap() = false;
            self.events.lock().unwrap().push((self.id, "reset"));
            Ok(())
        }
    }

    fn signal(state: &Arc<(Mutex<bool>, Condvar)>) {
        let (lock, cvar) = &**state;
        *lock.lock().unwrap() = true;
        cvar.notify_all();
    }

    fn ring(n: usize, events: &Events) -> FrameRing<MockFence> {
        FrameRing::new((0..n).map(|id| MockFence::new(id, events)).collect())
    }

    #[test]
    fn test_slots_cycle_in_order() {
        let events = Events::default();
        let mut ring = ring(3, &events);
        let mut slots = Vec::new();
        for _ in 0..7 {
            let slot = ring.acquire().unwrap();
            slots.push(slot);
            // Simulated GPU completion of the submitted frame
            signal(&ring.current_fence().state);
            ring.advance();
        }
        assert_eq!(slots, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn test_fence_waited_before_reset() {
        let events = Events::default();
        let mut ring = ring(3, &events);
        for _ in 0..4 {
            ring.acquire().unwrap();
            signal(&ring.current_fence().state);
            ring.advance();
        }
        let events = events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                (0, "wait"), (0, "reset"),
                (1, "wait"), (1, "reset"),
                (2, "wait"), (2, "reset"),
                (0, "wait"), (0, "reset"),
            ]
        );
    }

    #[test]
    fn test_fourth_frame_blocks_until_first_retires() {
        let events = Events::default();
        let mut ring = ring(3, &events);
        let first = Arc::clone(&ring.fences[0].state);

        // Three frames submitted, none retired yet
        for _ in 0..3 {
            ring.acquire().unwrap();
            ring.advance();
        }
        assert_eq!(ring.current(), 0);

        let (tx, rx) = std::sync::mpsc::channel();
        let handle = thread::spawn(move || {
            let slot = ring.acquire().unwrap();
            tx.send(slot).unwrap();
        });

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        signal(&first);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 0);
        handle.join().unwrap();
    }

    #[test]
    fn test_replace_restarts_at_zero() {
        let events = Events::default();
        let mut ring = ring(2, &events);
        ring.advance();
        assert_eq!(ring.current(), 1);
        ring.replace((0..3).map(|id| MockFence::new(id, &events)).collect());
        assert_eq!(ring.current(), 0);
        assert_eq!(ring.len(), 3);
    }
}
