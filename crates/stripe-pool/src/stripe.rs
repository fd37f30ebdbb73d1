//! The processor capability driven by a stripe worker.

use std::sync::Arc;

use crate::TickError;

/// Whether a tick found anything to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The tick performed work; the worker ticks again immediately.
    DidWork,
    /// Nothing to do; counts towards the idle threshold.
    NoWork,
}

impl TickOutcome {
    #[inline]
    #[must_use]
    pub const fn did_work(self) -> bool {
        matches!(self, Self::DidWork)
    }
}

impl From<bool> for TickOutcome {
    #[inline]
    fn from(did_work: bool) -> Self {
        if did_work { Self::DidWork } else { Self::NoWork }
    }
}

/// Result of a single tick.
pub type TickResult = Result<TickOutcome, TickError>;

/// One independently owned partition of state, processed by exactly one
/// stripe worker thread.
///
/// `tick` is only ever called from the stripe's own worker thread. While the
/// pool is parked no tick runs, so the owner may inspect or mutate the
/// processor's state from the parking thread.
pub trait TickableStripe: Send + Sync {
    /// Perform one unit of work.
    fn tick(&self) -> TickResult;
}

impl<S: TickableStripe + ?Sized> TickableStripe for Arc<S> {
    #[inline]
    fn tick(&self) -> TickResult {
        (**self).tick()
    }
}

impl<S: TickableStripe + ?Sized> TickableStripe for Box<S> {
    #[inline]
    fn tick(&self) -> TickResult {
        (**self).tick()
    }
}
