//! Cooperative cancellation.
//!
//! Every conversion stage polls an [`Interrupter`] at coarse granularity
//! (once per particle chunk, per morphology pass, per tile batch) and aborts
//! promptly when it fires. Cancellation is not rollback: the conversion
//! returns whatever outputs completed before the abort, flagged as
//! interrupted, and nothing partial is committed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Poll-and-abort capability handed into the conversion entry point.
pub trait Interrupter: Sync {
    /// Returns `true` once the caller wants the conversion to stop.
    fn was_interrupted(&self) -> bool;

    /// Called when a named stage begins. Default: no-op.
    fn start(&self, _stage: &str) {}

    /// Called when the current stage ends. Default: no-op.
    fn end(&self) {}
}

/// Interrupter that never fires.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullInterrupter;

impl Interrupter for NullInterrupter {
    #[inline]
    fn was_interrupted(&self) -> bool {
        false
    }
}

/// Interrupter backed by a shared atomic flag, settable from another thread.
#[derive(Debug, Default, Clone)]
pub struct FlagInterrupter {
    flag: Arc<AtomicBool>,
}

impl FlagInterrupter {
    /// Create an unset interrupter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Handle to the underlying flag, for wiring into host UIs or signal
    /// handlers.
    pub fn flag(&self) -> Arc<AtomicBool> {
        self.flag.clone()
    }
}

impl Interrupter for FlagInterrupter {
    #[inline]
    fn was_interrupted(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_interrupter_never_fires() {
        assert!(!NullInterrupter.was_interrupted());
    }

    #[test]
    fn test_flag_interrupter_fires_once_set() {
        let boss = FlagInterrupter::new();
        assert!(!boss.was_interrupted());
        boss.interrupt();
        assert!(boss.was_interrupted());
    }

    #[test]
    fn test_flag_interrupter_shared_across_clones() {
        let boss = FlagInterrupter::new();
        let other = boss.clone();
        other.interrupt();
        assert!(boss.was_interrupted());
    }
}
