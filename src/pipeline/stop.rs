//! Cooperative cancellation shared by the two pipeline stages

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One-way stop flag for a single pipeline run.
///
/// Clones share the same flag. Once set it stays set.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Returns `true` only for the call that flipped the flag.
    pub fn set(&self) -> bool {
        !self.flag.swap(true, Ordering::AcqRel)
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Guard that sets the signal when dropped, including during unwinding.
    pub fn set_on_drop(&self) -> StopOnDrop<'_> {
        StopOnDrop { signal: self }
    }
}

pub struct StopOnDrop<'a> {
    signal: &'a StopSignal,
}

impl Drop for StopOnDrop<'_> {
    fn drop(&mut self) {
        self.signal.set();
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn set_is_idempotent_and_reports_first_transition() {
        let stop = StopSignal::new();
        assert!(!stop.is_set());

        assert!(stop.set());
        assert!(!stop.set());
        assert!(stop.is_set());
    }

    #[test]
    fn clones_observe_the_same_flag() {
        let stop = StopSignal::new();
        let remote = stop.clone();

        thread::spawn(move || remote.set()).join().unwrap();

        assert!(stop.is_set());
    }

    #[test]
    fn concurrent_setters_see_exactly_one_transition() {
        let stop = StopSignal::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stop = stop.clone();
                thread::spawn(move || stop.set())
            })
            .collect();

        let transitions = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|flipped| *flipped)
            .count();

        assert_eq!(transitions, 1);
    }

    #[test]
    fn guard_sets_signal_on_panic() {
        let stop = StopSignal::new();
        let inner = stop.clone();

        let result = thread::spawn(move || {
            let _guard = inner.set_on_drop();
            panic!("stage failed");
        })
        .join();

        assert!(result.is_err());
        assert!(stop.is_set());
    }
}
