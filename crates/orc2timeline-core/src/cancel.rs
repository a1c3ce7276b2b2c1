//! Cooperative cancellation.
//!
//! SIGINT flips the flag; workers poll it at member boundaries so a running
//! extraction finishes its current member before the pool drains. Scratch
//! directories are removed by their owners' `Drop` either way.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
