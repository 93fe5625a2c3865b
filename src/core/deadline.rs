use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use crate::core::error::{Error, ErrorKind};

/// Why a query stopped before exhausting its iterators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    TimedOut,
    IndexDropped,
}

#[derive(Debug)]
struct DeadlineInner {
    expires_at: Option<Instant>,
    expired: AtomicBool,
    dropped: Arc<AtomicBool>,
    // Debug hook: report a timeout once this many results were produced.
    forced_after: Option<u64>,
    produced: AtomicU64,
}

/// Shared cancellation state for one query. Cloning shares the same state,
/// so both halves of a hybrid query observe the same expiry.
#[derive(Debug, Clone)]
pub struct Deadline {
    inner: Arc<DeadlineInner>,
}

impl Deadline {
    /// `timeout_ms == 0` means no time limit.
    pub fn new(timeout_ms: u64, dropped: Arc<AtomicBool>) -> Self {
        let expires_at = if timeout_ms == 0 {
            None
        } else {
            Some(Instant::now() + Duration::from_millis(timeout_ms))
        };
        Deadline {
            inner: Arc::new(DeadlineInner {
                expires_at,
                expired: AtomicBool::new(false),
                dropped,
                forced_after: None,
                produced: AtomicU64::new(0),
            }),
        }
    }

    pub fn unlimited() -> Self {
        Deadline::new(0, Arc::new(AtomicBool::new(false)))
    }

    pub fn with_forced_timeout(timeout_ms: u64, dropped: Arc<AtomicBool>, after: Option<u64>) -> Self {
        let mut d = Deadline::new(timeout_ms, dropped);
        if let Some(inner) = Arc::get_mut(&mut d.inner) {
            inner.forced_after = after;
        }
        d
    }

    pub fn check(&self) -> Result<(), Interrupt> {
        if self.inner.dropped.load(Ordering::Acquire) {
            return Err(Interrupt::IndexDropped);
        }
        if self.inner.expired.load(Ordering::Acquire) {
            return Err(Interrupt::TimedOut);
        }
        if let Some(at) = self.inner.expires_at {
            if Instant::now() >= at {
                self.inner.expired.store(true, Ordering::Release);
                return Err(Interrupt::TimedOut);
            }
        }
        Ok(())
    }

    /// Called once per produced row. Trips the forced timeout when the
    /// configured row budget is exhausted.
    pub fn on_result(&self) -> Result<(), Interrupt> {
        if let Some(limit) = self.inner.forced_after {
            let n = self.inner.produced.load(Ordering::Relaxed);
            if n >= limit {
                self.inner.expired.store(true, Ordering::Release);
                return Err(Interrupt::TimedOut);
            }
            self.inner.produced.fetch_add(1, Ordering::Relaxed);
        }
        self.check()
    }

    pub fn expire(&self) {
        self.inner.expired.store(true, Ordering::Release);
    }

    pub fn is_expired(&self) -> bool {
        self.check().is_err()
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.inner
            .expires_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }
}

impl From<Interrupt> for Error {
    fn from(i: Interrupt) -> Self {
        match i {
            Interrupt::TimedOut => Error::new(ErrorKind::Timeout, "Timeout limit was reached"),
            Interrupt::IndexDropped => Error::new(ErrorKind::IndexDropped, "index dropped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlimited_never_expires() {
        let d = Deadline::unlimited();
        assert!(d.check().is_ok());
        assert!(d.remaining().is_none());
    }

    #[test]
    fn test_forced_timeout_after_zero() {
        let d = Deadline::with_forced_timeout(0, Arc::new(AtomicBool::new(false)), Some(0));
        assert_eq!(d.on_result(), Err(Interrupt::TimedOut));
        assert!(d.is_expired());
    }

    #[test]
    fn test_forced_timeout_after_two() {
        let d = Deadline::with_forced_timeout(0, Arc::new(AtomicBool::new(false)), Some(2));
        assert!(d.on_result().is_ok());
        assert!(d.on_result().is_ok());
        assert_eq!(d.on_result(), Err(Interrupt::TimedOut));
    }

    #[test]
    fn test_drop_flag_wins() {
        let flag = Arc::new(AtomicBool::new(false));
        let d = Deadline::new(0, flag.clone());
        flag.store(true, Ordering::Release);
        assert_eq!(d.check(), Err(Interrupt::IndexDropped));
    }

    #[test]
    fn test_clones_share_expiry() {
        let d = Deadline::unlimited();
        let other = d.clone();
        d.expire();
        assert!(other.is_expired());
    }
}
