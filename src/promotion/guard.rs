//! Promotion mutual exclusion
//!
//! One flag per cluster. `try_acquire` either returns a permit or fails
//! immediately; dropping the permit clears the flag, so every exit path of a
//! promotion releases it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::errors::{PromotionError, PromotionResult};

#[derive(Debug, Default)]
pub struct FailoverGuard {
    in_progress: AtomicBool,
}

impl FailoverGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the flag, or fail with `AlreadyInProgress`.
    pub fn try_acquire(self: &Arc<Self>) -> PromotionResult<FailoverPermit> {
        self.in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| PromotionError::already_in_progress())?;
        Ok(FailoverPermit {
            guard: Arc::clone(self),
        })
    }

    pub fn is_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }
}

/// Proof that the holder owns the promotion flag.
#[derive(Debug)]
pub struct FailoverPermit {
    guard: Arc<FailoverGuard>,
}

impl Drop for FailoverPermit {
    fn drop(&mut self) {
        self.guard.in_progress.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::promotion::PromotionErrorKind;

    #[test]
    fn test_second_acquire_fails_while_held() {
        let guard = Arc::new(FailoverGuard::new());
        let permit = guard.try_acquire().unwrap();
        assert!(guard.is_in_progress());

        let err = guard.try_acquire().unwrap_err();
        assert_eq!(err.kind, PromotionErrorKind::AlreadyInProgress);

        drop(permit);
        assert!(!guard.is_in_progress());
        assert!(guard.try_acquire().is_ok());
    }

    #[test]
    fn test_released_on_early_return() {
        fn fails_midway(guard: &Arc<FailoverGuard>) -> PromotionResult<()> {
            let _permit = guard.try_acquire()?;
            Err(PromotionError::no_candidate())
        }

        let guard = Arc::new(FailoverGuard::new());
        assert!(fails_midway(&guard).is_err());
        assert!(!guard.is_in_progress());
    }

    #[test]
    fn test_only_one_thread_wins() {
        let guard = Arc::new(FailoverGuard::new());
        let barrier = Arc::new(std::sync::Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let guard = Arc::clone(&guard);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    guard.try_acquire().map(std::mem::forget).is_ok()
                })
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
