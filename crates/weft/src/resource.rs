//! Execution limits and cooperative cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Limits enforced during execution.
///
/// The engine checks scope depth on every push and fails fast before
/// allocating the frame. Timeouts are an external concern; hosts cancel
/// through a [`CancelToken`] instead.
#[derive(Debug, Clone, Copy)]
pub struct ResourceLimits {
    /// Maximum scope stack depth, root included.
    pub max_scope_depth: usize,
}

impl ResourceLimits {
    pub const DEFAULT_MAX_SCOPE_DEPTH: usize = 1_000;

    /// Effectively unbounded, for hosts that trust their input.
    #[must_use]
    pub fn no_limits() -> Self {
        Self {
            max_scope_depth: usize::MAX,
        }
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_scope_depth: Self::DEFAULT_MAX_SCOPE_DEPTH,
        }
    }
}

/// Shared cancellation flag, observed at the top of every loop iteration.
///
/// Cloning shares the flag: a host keeps one clone and hands the engine the
/// other.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation; the engine observes it at its next check.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Clears the flag so the engine can be reused after a cancelled run.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_clones_share_the_flag() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());
        token.cancel();
        assert!(other.is_cancelled());
        other.reset();
        assert!(!token.is_cancelled());
    }
}
