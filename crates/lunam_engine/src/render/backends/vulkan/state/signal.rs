//! Condvar-backed one-shot signal carrying an `i32`
//!
//! A signal is triggered once with a non-zero value and stays triggered
//! until reset. With `auto_reset`, the last of an expected number of waiters
//! clears it on the way out. Auto-reset alone does not stop a fast waiter
//! from looping back and waiting on the same trigger twice; callers that
//! loop must gate the next round on something else.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct SignalState {
    value: i32,
    awoken: i32,
}

/// One-shot cross-thread signal
#[derive(Debug, Default)]
pub struct Signal {
    state: Mutex<SignalState>,
    cond: Condvar,
}

impl Signal {
    /// Untriggered signal
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SignalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Trigger with `value`, waking one waiter or all of them
    ///
    /// # Panics
    /// If `value` is zero, or the signal is already triggered.
    pub fn trigger(&self, notify_all: bool, value: i32) {
        assert!(value != 0, "signal value must be non-zero");
        {
            let mut state = self.lock();
            assert!(state.value == 0 && state.awoken == 0, "signal triggered twice");
            state.value = value;
        }
        if notify_all {
            self.cond.notify_all();
        } else {
            self.cond.notify_one();
        }
    }

    /// Block until triggered and return the value
    ///
    /// With `auto_reset`, the `num_threads_waiting`-th waiter to wake clears
    /// the signal.
    ///
    /// # Panics
    /// If `auto_reset` is set with `num_threads_waiting == 0`.
    pub fn wait(&self, auto_reset: bool, num_threads_waiting: i32) -> i32 {
        let mut state = self
            .cond
            .wait_while(self.lock(), |s| s.value == 0)
            .unwrap_or_else(PoisonError::into_inner);
        let value = state.value;
        state.awoken += 1;
        if auto_reset {
            assert!(num_threads_waiting != 0, "auto-reset needs the waiter count");
            if state.awoken == num_threads_waiting {
                state.value = 0;
                state.awoken = 0;
            }
        }
        value
    }

    /// Clear the signal
    pub fn reset(&self) {
        let mut state = self.lock();
        state.value = 0;
        state.awoken = 0;
    }

    /// Whether the signal is currently triggered
    pub fn is_triggered(&self) -> bool {
        self.lock().value != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_wait_returns_triggered_value() {
        let signal = Arc::new(Signal::new());
        let waiter = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || signal.wait(false, 0))
        };
        signal.trigger(false, 7);
        assert_eq!(waiter.join().unwrap(), 7);
        assert!(signal.is_triggered());
    }

    #[test]
    fn test_auto_reset_by_last_waiter() {
        let signal = Arc::new(Signal::new());
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let signal = Arc::clone(&signal);
                thread::spawn(move || signal.wait(true, 3))
            })
            .collect();
        signal.trigger(true, -1);
        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), -1);
        }
        assert!(!signal.is_triggered());
        signal.trigger(false, 1);
    }

    #[test]
    fn test_already_triggered_returns_immediately() {
        let signal = Signal::new();
        signal.trigger(false, 3);
        assert_eq!(signal.wait(true, 1), 3);
        assert!(!signal.is_triggered());
    }

    #[test]
    #[should_panic(expected = "signal triggered twice")]
    fn test_double_trigger_panics() {
        let signal = Signal::new();
        signal.trigger(false, 1);
        signal.trigger(false, 1);
    }

    #[test]
    fn test_reset_clears() {
        let signal = Signal::new();
        signal.trigger(false, 1);
        signal.reset();
        assert!(!signal.is_triggered());
    }
}
