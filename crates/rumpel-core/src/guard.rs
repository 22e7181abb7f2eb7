//! In-flight guard for single-flight sync.
//!
//! [`InFlightGuard`] claims an [`AtomicBool`] and releases it when dropped,
//! so the flag is cleared on every exit path including early returns,
//! timeouts and panics.

use std::sync::atomic::{AtomicBool, Ordering};

/// Holds an in-flight flag for as long as the guard lives.
///
/// # Example
///
/// ```
/// use std::sync::atomic::AtomicBool;
/// use rumpel_core::InFlightGuard;
///
/// let flag = AtomicBool::new(false);
/// let guard = InFlightGuard::try_acquire(&flag).unwrap();
/// assert!(InFlightGuard::try_acquire(&flag).is_none());
/// drop(guard);
/// assert!(InFlightGuard::try_acquire(&flag).is_some());
/// ```
#[derive(Debug)]
pub struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> InFlightGuard<'a> {
    /// Claim `flag`, or return `None` if it is already held.
    pub fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
