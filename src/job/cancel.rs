//! Cancellation tokens for searches and jobs.
//!
//! Workers poll the token between units of work (one file, one folder
//! listing) and wind down as soon as it reports cancelled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag; clones observe the same cancellation.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// `Some(())` while active, so workers can bail out with `?`.
    #[inline]
    pub fn check(&self) -> Option<()> {
        if self.is_cancelled() {
            None
        } else {
            Some(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_token_is_active() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert!(token.check().is_some());
    }

    #[test]
    fn clones_share_cancellation() {
        let token = CancellationToken::new();
        let worker_side = token.clone();
        token.cancel();
        assert!(worker_side.is_cancelled());
        assert!(worker_side.check().is_none());
    }
}
