//! Stripe worker: one OS thread running the tick loop for one processor.
//!
//! Each iteration of the loop:
//!
//! 1. Safe point: stop exits the loop, a park request blocks in `Parked`
//!    until released.
//! 2. Tick the processor. Work resets the empty-tick counter.
//! 3. After `ticks_before_wait` consecutive empty ticks, sleep in `Idling`
//!    for `tick_wait_duration` or until woken.
//!
//! The safe point at the top of the loop is the only place a worker parks or
//! stops; a tick in progress always runs to completion.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;
use tracing::{debug, error, trace};

use crate::barrier::{ParkBarrier, SafePoint};
use crate::tuning::TickTuning;
use crate::{FailureKind, StripeFailure, TickOutcome, TickableStripe};

/// Loop state of a stripe worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StripeState {
    Ticking = 0,
    Idling = 1,
    Parked = 2,
    Stopping = 3,
}

impl StripeState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Ticking,
            1 => Self::Idling,
            2 => Self::Parked,
            _ => Self::Stopping,
        }
    }
}

#[derive(Debug, Default)]
struct StatCounters {
    ticks_with_work: AtomicU64,
    ticks_without_work: AtomicU64,
    idle_waits: AtomicU64,
    parks: AtomicU64,
}

/// Snapshot of a worker's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StripeStats {
    /// Completed ticks.
    pub ticks: u64,
    /// Ticks that reported work.
    pub ticks_with_work: u64,
    /// Idle sleeps entered.
    pub idle_waits: u64,
    /// Park cycles this worker took part in.
    pub parks: u64,
}

impl StripeStats {
    /// Ticks that found nothing to do.
    #[must_use]
    pub const fn ticks_without_work(&self) -> u64 {
        self.ticks.saturating_sub(self.ticks_with_work)
    }
}

/// Handle to one stripe: its index, its processor and its live state.
///
/// Shared between the pool and the stripe's worker thread.
pub struct StripeWorker<S: ?Sized> {
    index: usize,
    processor: Arc<S>,
    state: AtomicU8,
    stats: StatCounters,
    barrier: Arc<ParkBarrier>,
    tuning: Arc<TickTuning>,
}

impl<S: ?Sized> StripeWorker<S> {
    pub(crate) fn new(
        index: usize,
        processor: Arc<S>,
        barrier: Arc<ParkBarrier>,
        tuning: Arc<TickTuning>,
    ) -> Self {
        Self {
            index,
            processor,
            state: AtomicU8::new(StripeState::Ticking as u8),
            stats: StatCounters::default(),
            barrier,
            tuning,
        }
    }

    /// Stripe index within the pool.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// The processor driven by this stripe.
    ///
    /// Only touch processor state that its own ticks also touch while the
    /// pool is parked.
    #[inline]
    pub fn processor(&self) -> &Arc<S> {
        &self.processor
    }

    /// Current loop state. Advisory; may be stale by the time it is read.
    pub fn state(&self) -> StripeState {
        StripeState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Counters are sampled one at a time while the worker runs; `ticks` is
    /// always the sum of the two tick counters in the same snapshot.
    pub fn stats(&self) -> StripeStats {
        let ticks_with_work = self.stats.ticks_with_work.load(Ordering::Relaxed);
        let ticks_without_work = self.stats.ticks_without_work.load(Ordering::Relaxed);
        StripeStats {
            ticks: ticks_with_work + ticks_without_work,
            ticks_with_work,
            idle_waits: self.stats.idle_waits.load(Ordering::Relaxed),
            parks: self.stats.parks.load(Ordering::Relaxed),
        }
    }

    /// Wake this worker early from an idle sleep, e.g. after queueing work for
    /// its stripe. If it is not sleeping, its next idle sleep is skipped.
    pub fn notify_event_has_triggered(&self) {
        self.barrier.notify_event(self.index);
    }

    #[inline]
    fn set_state(&self, state: StripeState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

impl<S: ?Sized> core::fmt::Debug for StripeWorker<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StripeWorker")
            .field("index", &self.index)
            .field("state", &self.state())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Leaves the barrier group when the worker exits, however it exits.
struct LeaveOnDrop<'a>(&'a ParkBarrier);

impl Drop for LeaveOnDrop<'_> {
    fn drop(&mut self) {
        self.0.leave();
    }
}

impl<S: TickableStripe + ?Sized> StripeWorker<S> {
    /// Tick loop. Runs on the stripe's own thread until stopped or until the
    /// processor fails. A failure stops every other stripe of the group too.
    pub(crate) fn run(&self, failures: &Sender<StripeFailure>) {
        let _leave = LeaveOnDrop(&self.barrier);
        debug!(stripe = self.index, "stripe thread started");

        let mut ticks_without_work: u32 = 0;
        loop {
            match self.barrier.poll() {
                SafePoint::Stop => break,
                SafePoint::Park => {
                    self.set_state(StripeState::Parked);
                    if self.barrier.park_until_released() {
                        self.stats.parks.fetch_add(1, Ordering::Relaxed);
                    }
                    self.set_state(StripeState::Ticking);
                    continue;
                }
                SafePoint::Continue => {}
            }

            let outcome = match self.tick_once() {
                Ok(outcome) => outcome,
                Err(kind) => {
                    error!(stripe = self.index, error = %kind, "stripe processor failed");
                    // The owner may have dropped its receiver during teardown.
                    let _ = failures.send(StripeFailure {
                        stripe: self.index,
                        kind,
                    });
                    // A failed stripe takes the whole pool down.
                    self.barrier.abort();
                    break;
                }
            };

            if outcome.did_work() {
                self.stats.ticks_with_work.fetch_add(1, Ordering::Relaxed);
                ticks_without_work = 0;
                continue;
            }
            self.stats.ticks_without_work.fetch_add(1, Ordering::Relaxed);

            ticks_without_work = ticks_without_work.saturating_add(1);
            if ticks_without_work >= self.tuning.ticks_before_wait() {
                // Fixed before the state is published: retuning an idle
                // worker only affects its later sleeps.
                let wait = self.tuning.tick_wait_duration();
                self.set_state(StripeState::Idling);
                self.stats.idle_waits.fetch_add(1, Ordering::Relaxed);
                let wake = self.barrier.idle_wait(self.index, wait);
                trace!(stripe = self.index, ?wait, ?wake, "idle wait finished");
                self.set_state(StripeState::Ticking);
                ticks_without_work = 0;
            }
        }

        self.set_state(StripeState::Stopping);
        debug!(stripe = self.index, "stripe thread exiting");
    }

    fn tick_once(&self) -> Result<TickOutcome, FailureKind> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.processor.tick())) {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(err)) => Err(FailureKind::Tick(err)),
            Err(payload) => Err(FailureKind::Panic(panic_message(payload.as_ref()))),
        }
    }
}

fn panic_message(payload: &(dyn core::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

/// Owned stripe thread that is joined when dropped.
#[derive(Debug)]
pub(crate) struct StripeThread {
    index: usize,
    handle: Option<JoinHandle<()>>,
}

impl StripeThread {
    pub(crate) fn spawn<F>(index: usize, name: String, body: F) -> std::io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = thread::Builder::new().name(name).spawn(body)?;
        Ok(Self {
            index,
            handle: Some(handle),
        })
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    /// Wait for the thread to finish.
    pub(crate) fn join(mut self) -> thread::Result<()> {
        self.handle.take().map_or(Ok(()), JoinHandle::join)
    }
}

impl Drop for StripeThread {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!(stripe = self.index, "stripe thread panicked");
            }
        }
    }
}
