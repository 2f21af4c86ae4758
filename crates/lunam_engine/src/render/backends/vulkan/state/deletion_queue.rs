//! LIFO teardown list
//!
//! Resources that reference each other are pushed in creation order and
//! destroyed in reverse, so framebuffers die before the image views they use.

/// Deferred destruction closures, flushed in reverse insertion order
pub struct DeletionQueue {
    deleters: Vec<Box<dyn FnOnce() + Send>>,
}

impl DeletionQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self { deleters: Vec::with_capacity(512) }
    }

    /// Append a teardown closure
    pub fn push(&mut self, deleter: impl FnOnce() + Send + 'static) {
        self.deleters.push(Box::new(deleter));
    }

    /// Run every closure, newest first, and empty the queue
    ///
    /// Calling it again without pushing is a no-op.
    pub fn flush(&mut self) {
        while let Some(deleter) = self.deleters.pop() {
            deleter();
        }
    }

    /// Number of pending closures
    pub fn len(&self) -> usize {
        self.deleters.len()
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.deleters.is_empty()
    }
}

impl Default for DeletionQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DeletionQueue {
    fn drop(&mut self) {
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_flush_runs_in_reverse_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut queue = DeletionQueue::new();
        for i in 0..4 {
            let order = Arc::clone(&order);
            queue.push(move || order.lock().unwrap().push(i));
        }
        assert_eq!(queue.len(), 4);
        queue.flush();
        assert_eq!(*order.lock().unwrap(), vec![3, 2, 1, 0]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_second_flush_is_noop() {
        let count = Arc::new(Mutex::new(0));
        let mut queue = DeletionQueue::new();
        let c = Arc::clone(&count);
        queue.push(move || *c.lock().unwrap() += 1);
        queue.flush();
        queue.flush();
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn test_drop_flushes() {
        let count = Arc::new(Mutex::new(0));
        {
            let mut queue = DeletionQueue::new();
            let c = Arc::clone(&count);
            queue.push(move || *c.lock().unwrap() += 1);
        }
        assert_eq!(*count.lock().unwrap(), 1);
    }
}
