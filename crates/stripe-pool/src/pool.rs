//! The stripe pool: lifecycle, park/unpark API and live tuning.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::{debug, error, info};

use crate::barrier::ParkBarrier;
use crate::tuning::TickTuning;
use crate::worker::{StripeThread, StripeWorker};
use crate::{
    FailureKind, StripeFailure, StripePoolConfig, StripePoolError, StripePoolResult,
    TickableStripe,
};

/// Management and coordination of a pool of stripe threads.
///
/// Besides owning the threads, the pool offers a way to get every stripe into
/// a well-defined state before the caller touches processor state:
///
/// - [`park_all_threads`](Self::park_all_threads) returns once *all* threads
///   are parked. Until the matching unpark, no processor is ticked; it is as if
///   the caller held one large lock over every stripe.
/// - [`unpark_all_threads`](Self::unpark_all_threads) returns once all threads
///   have left the parked state.
///
/// Park and unpark must strictly alternate and may only be called between
/// [`start`](Self::start) and [`stop_and_join`](Self::stop_and_join).
///
/// Tick tuning may be changed before and after `start`; running workers pick
/// up the new values without locking.
pub struct StripePool<S: ?Sized + 'static = dyn TickableStripe> {
    thread_name_prefix: String,
    tuning: Arc<TickTuning>,
    barrier: Option<Arc<ParkBarrier>>,
    workers: Vec<Arc<StripeWorker<S>>>,
    threads: Vec<StripeThread>,
    failures_tx: Sender<StripeFailure>,
    failures_rx: Receiver<StripeFailure>,
    stopped: bool,
}

impl<S: TickableStripe + ?Sized + 'static> StripePool<S> {
    /// Create an empty pool with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(&StripePoolConfig::default())
    }

    #[must_use]
    pub fn with_config(config: &StripePoolConfig) -> Self {
        let (failures_tx, failures_rx) = unbounded();
        Self {
            thread_name_prefix: config.thread_name_prefix.clone(),
            tuning: Arc::new(TickTuning::new(
                config.tick_wait_duration,
                config.ticks_before_wait,
            )),
            barrier: None,
            workers: Vec::new(),
            threads: Vec::new(),
            failures_tx,
            failures_rx,
            stopped: false,
        }
    }

    /// Start one thread per processor. Stripe `i` drives `processors[i]`.
    ///
    /// Returns once every thread is spawned, not once they are ticking.
    ///
    /// # Panics
    ///
    /// Panics if `processors` is empty or the pool was already started or
    /// stopped.
    ///
    /// # Errors
    ///
    /// Returns [`StripePoolError::Spawn`] if a thread cannot be spawned. Threads
    /// spawned before the failure are stopped and joined, and the pool is left
    /// stopped.
    pub fn start(&mut self, processors: Vec<Arc<S>>) -> StripePoolResult<()> {
        self.start_with(processors, StripeThread::spawn)
    }

    fn start_with<F>(&mut self, processors: Vec<Arc<S>>, mut spawn: F) -> StripePoolResult<()>
    where
        F: FnMut(usize, String, Box<dyn FnOnce() + Send>) -> io::Result<StripeThread>,
    {
        assert!(!processors.is_empty(), "stripe pool needs at least one processor");
        assert!(self.barrier.is_none(), "stripe pool already started");
        assert!(!self.stopped, "stripe pool already stopped");

        let stripe_count = processors.len();
        let barrier = Arc::new(ParkBarrier::new(stripe_count));
        self.workers = processors
            .into_iter()
            .enumerate()
            .map(|(index, processor)| {
                Arc::new(StripeWorker::new(
                    index,
                    processor,
                    Arc::clone(&barrier),
                    Arc::clone(&self.tuning),
                ))
            })
            .collect();
        self.barrier = Some(Arc::clone(&barrier));

        self.threads = Vec::with_capacity(stripe_count);
        for worker in &self.workers {
            let index = worker.index();
            let name = format!("{}-{index}", self.thread_name_prefix);
            let body: Box<dyn FnOnce() + Send> = {
                let worker = Arc::clone(worker);
                let failures = self.failures_tx.clone();
                Box::new(move || worker.run(&failures))
            };
            match spawn(index, name, body) {
                Ok(thread) => self.threads.push(thread),
                Err(source) => {
                    error!(stripe = index, error = %source, "failed to spawn stripe thread");
                    // Members that never ran still count towards the group.
                    for _ in index..stripe_count {
                        barrier.leave();
                    }
                    barrier.request_stop();
                    // Joins the threads already spawned.
                    self.threads.clear();
                    self.stopped = true;
                    return Err(StripePoolError::Spawn {
                        stripe: index,
                        source,
                    });
                }
            }
        }

        info!(
            stripes = stripe_count,
            tick_wait = ?self.tuning.tick_wait_duration(),
            ticks_before_wait = self.tuning.ticks_before_wait(),
            "stripe pool started"
        );
        Ok(())
    }

    /// Stop every stripe thread and wait for all of them to exit.
    ///
    /// Idle and parked workers are woken; a tick in progress is allowed to
    /// finish.
    ///
    /// # Panics
    ///
    /// Panics if called more than once.
    ///
    /// # Errors
    ///
    /// Returns [`StripePoolError::StripesFailed`] with every stripe failure not
    /// already drained by [`take_failures`](Self::take_failures).
    pub fn stop_and_join(&mut self) -> StripePoolResult<()> {
        assert!(!self.stopped, "stripe pool already stopped");
        self.stopped = true;

        if let Some(barrier) = &self.barrier {
            barrier.request_stop();
        }

        let mut failures = Vec::new();
        for thread in self.threads.drain(..) {
            let stripe = thread.index();
            if thread.join().is_err() {
                failures.push(StripeFailure {
                    stripe,
                    kind: FailureKind::Panic("stripe thread panicked".to_owned()),
                });
            }
        }
        failures.extend(self.failures_rx.try_iter());

        info!(
            stripes = self.workers.len(),
            failed = failures.len(),
            "stripe pool stopped"
        );
        if failures.is_empty() {
            Ok(())
        } else {
            failures.sort_by_key(|failure| failure.stripe);
            Err(StripePoolError::StripesFailed(failures))
        }
    }

    /// Park every stripe thread at its next safe point and block until all of
    /// them are parked.
    ///
    /// Everything the stripes did before parking is visible to the caller when
    /// this returns. Must be followed by
    /// [`unpark_all_threads`](Self::unpark_all_threads).
    ///
    /// If the pool has [failed](Self::is_failed), no thread parks: this
    /// returns once every stripe thread has exited, with `parked_count() == 0`.
    /// No tick runs until the unpark in that case either.
    ///
    /// # Panics
    ///
    /// Panics if the pool is not running or a park is already in progress.
    pub fn park_all_threads(&self) {
        let barrier = self.running_barrier();
        barrier.park_all();
        debug!(parked = barrier.parked_count(), "all stripe threads parked");
    }

    /// Release every parked stripe thread and block until all of them have
    /// left the parked state.
    ///
    /// # Panics
    ///
    /// Panics if the pool is not running or no park is in progress.
    pub fn unpark_all_threads(&self) {
        self.running_barrier().unpark_all();
        debug!("all stripe threads unparked");
    }

    /// Park all threads for the lifetime of the returned guard.
    ///
    /// # Panics
    ///
    /// Same as [`park_all_threads`](Self::park_all_threads).
    pub fn park(&self) -> ParkedStripes<'_, S> {
        self.park_all_threads();
        ParkedStripes { pool: self }
    }

    /// # Panics
    ///
    /// Panics if `index >= stripe_count()`.
    #[must_use]
    pub fn stripe(&self, index: usize) -> &StripeWorker<S> {
        &self.workers[index]
    }

    /// Number of stripes; zero before `start`.
    #[must_use]
    pub fn stripe_count(&self) -> usize {
        self.workers.len()
    }

    pub fn stripes(&self) -> impl ExactSizeIterator<Item = &StripeWorker<S>> {
        self.workers.iter().map(|worker| &**worker)
    }

    /// Applies to all stripes, before or after `start`. Sleeps already in
    /// progress keep their original duration.
    pub fn set_tick_wait_duration(&self, duration: Duration) {
        self.tuning.set_tick_wait_duration(duration);
    }

    /// Applies to all stripes, before or after `start`. Zero means sleep after
    /// every empty tick.
    pub fn set_ticks_before_wait(&self, ticks: u32) {
        self.tuning.set_ticks_before_wait(ticks);
    }

    #[must_use]
    pub fn tick_wait_duration(&self) -> Duration {
        self.tuning.tick_wait_duration()
    }

    #[must_use]
    pub fn ticks_before_wait(&self) -> u32 {
        self.tuning.ticks_before_wait()
    }

    /// Number of stripe threads currently parked.
    #[must_use]
    pub fn parked_count(&self) -> usize {
        self.barrier.as_ref().map_or(0, |barrier| barrier.parked_count())
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        self.barrier.is_some()
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Whether a stripe failure has brought the pool down. The remaining
    /// stripes stop at their next safe point; the owner still has to call
    /// [`stop_and_join`](Self::stop_and_join).
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.barrier.as_ref().is_some_and(|barrier| barrier.is_aborted())
    }

    /// Whether any stripe has failed since the last
    /// [`take_failures`](Self::take_failures).
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failures_rx.is_empty()
    }

    /// Drain the stripe failures reported so far.
    pub fn take_failures(&self) -> Vec<StripeFailure> {
        self.failures_rx.try_iter().collect()
    }

    fn running_barrier(&self) -> &ParkBarrier {
        assert!(!self.stopped, "stripe pool already stopped");
        self.barrier.as_deref().expect("stripe pool not started")
    }
}

impl<S: TickableStripe + ?Sized + 'static> Default for StripePool<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: ?Sized + 'static> Drop for StripePool<S> {
    fn drop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        if let Some(barrier) = &self.barrier {
            barrier.request_stop();
        }
        // Joins every thread.
        self.threads.clear();
        for failure in self.failures_rx.try_iter() {
            error!(%failure, "stripe failure at pool drop");
        }
    }
}

impl<S: ?Sized + 'static> core::fmt::Debug for StripePool<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StripePool")
            .field("stripes", &self.workers.len())
            .field("tuning", &self.tuning)
            .field("barrier", &self.barrier)
            .field("stopped", &self.stopped)
            .finish()
    }
}

/// Guard holding every stripe of a pool parked. Unparks on drop.
pub struct ParkedStripes<'a, S: TickableStripe + ?Sized + 'static> {
    pool: &'a StripePool<S>,
}

impl<'a, S: TickableStripe + ?Sized + 'static> ParkedStripes<'a, S> {
    /// Processor of stripe `index`; no tick runs on it while the guard lives.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    #[must_use]
    pub fn processor(&self, index: usize) -> &'a S {
        self.pool.stripe(index).processor()
    }

    pub fn processors(&self) -> impl ExactSizeIterator<Item = &'a S> + use<'a, S> {
        self.pool.workers.iter().map(|worker| Arc::as_ref(worker.processor()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pool.stripe_count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<S: TickableStripe + ?Sized + 'static> Drop for ParkedStripes<'_, S> {
    fn drop(&mut self) {
        self.pool.unpark_all_threads();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;
    use crate::{StripeState, TickOutcome, TickResult};

    #[derive(Default)]
    struct Busy {
        ticks: AtomicU64,
    }

    impl TickableStripe for Busy {
        fn tick(&self) -> TickResult {
            self.ticks.fetch_add(1, Ordering::Relaxed);
            Ok(TickOutcome::DidWork)
        }
    }

    fn busy(n: usize) -> Vec<Arc<Busy>> {
        (0..n).map(|_| Arc::new(Busy::default())).collect()
    }

    #[test]
    fn test_accessors_before_start() {
        let pool = StripePool::<Busy>::new();
        assert_eq!(pool.stripe_count(), 0);
        assert_eq!(pool.parked_count(), 0);
        assert!(!pool.is_started());
        assert!(!pool.has_failures());
    }

    #[test]
    fn test_tuning_before_start_reaches_workers() {
        let mut pool = StripePool::with_config(&StripePoolConfig {
            thread_name_prefix: "tuned".into(),
            ..StripePoolConfig::default()
        });
        pool.set_tick_wait_duration(Duration::from_millis(7));
        pool.set_ticks_before_wait(2);
        pool.start(busy(1)).unwrap();
        assert_eq!(pool.tick_wait_duration(), Duration::from_millis(7));
        assert_eq!(pool.ticks_before_wait(), 2);
        pool.stop_and_join().unwrap();
    }

    #[test]
    fn test_parked_states() {
        let mut pool = StripePool::new();
        pool.start(busy(3)).unwrap();

        pool.park_all_threads();
        assert!(pool.stripes().all(|s| s.state() == StripeState::Parked));
        pool.unpark_all_threads();

        pool.stop_and_join().unwrap();
        assert!(pool.stripes().all(|s| s.state() == StripeState::Stopping));
    }

    #[test]
    fn test_guard_unparks_on_drop() {
        let mut pool = StripePool::new();
        pool.start(busy(2)).unwrap();
        {
            let parked = pool.park();
            assert_eq!(parked.len(), 2);
            let frozen: Vec<u64> = parked
                .processors()
                .map(|p| p.ticks.load(Ordering::Relaxed))
                .collect();
            std::thread::sleep(Duration::from_millis(10));
            assert_eq!(parked.processor(0).ticks.load(Ordering::Relaxed), frozen[0]);
            assert_eq!(parked.processor(1).ticks.load(Ordering::Relaxed), frozen[1]);
        }
        assert_eq!(pool.parked_count(), 0);
        pool.stop_and_join().unwrap();
    }

    #[test]
    fn test_drop_without_stop_joins() {
        let processors = busy(2);
        {
            let mut pool = StripePool::new();
            pool.start(processors.clone()).unwrap();
        }
        // Only our handles remain once every thread has been joined.
        assert!(processors.iter().all(|p| Arc::strong_count(p) == 1));
    }

    #[test]
    fn test_stop_without_start() {
        let mut pool = StripePool::<Busy>::new();
        pool.stop_and_join().unwrap();
        assert!(pool.is_stopped());
    }

    #[test]
    #[should_panic(expected = "not started")]
    fn test_park_before_start_panics() {
        let pool = StripePool::<Busy>::new();
        pool.park_all_threads();
    }

    #[test]
    #[should_panic(expected = "already stopped")]
    fn test_park_after_stop_panics() {
        let mut pool = StripePool::new();
        pool.start(busy(1)).unwrap();
        pool.stop_and_join().unwrap();
        pool.park_all_threads();
    }

    #[test]
    #[should_panic(expected = "already stopped")]
    fn test_double_stop_panics() {
        let mut pool = StripePool::<Busy>::new();
        pool.stop_and_join().unwrap();
        let _ = pool.stop_and_join();
    }

    #[test]
    fn test_spawn_failure_rolls_back() {
        let processors = busy(4);
        let mut pool = StripePool::new();
        let result = pool.start_with(processors.clone(), |index, name, body| {
            if index == 2 {
                Err(io::Error::other("thread limit reached"))
            } else {
                StripeThread::spawn(index, name, body)
            }
        });

        match result {
            Err(StripePoolError::Spawn { stripe, .. }) => assert_eq!(stripe, 2),
            other => panic!("expected spawn failure, got {other:?}"),
        }
        assert!(pool.is_stopped());
        assert!(!pool.is_failed());
        assert!(pool.threads.is_empty());

        // Spawned stripes ran and were joined; the rest never started.
        let states: Vec<_> = pool.stripes().map(StripeWorker::state).collect();
        assert_eq!(
            states,
            [
                StripeState::Stopping,
                StripeState::Stopping,
                StripeState::Ticking,
                StripeState::Ticking,
            ]
        );
        let barrier = pool.barrier.as_ref().unwrap();
        assert_eq!(barrier.member_count(), 0);
        assert_eq!(barrier.parked_count(), 0);

        // Pool and test are the only holders left.
        assert!(processors.iter().all(|p| Arc::strong_count(p) == 2));
        drop(pool);
        assert!(processors.iter().all(|p| Arc::strong_count(p) == 1));
    }

    #[test]
    fn test_spawn_failure_on_first_stripe() {
        let mut pool = StripePool::new();
        let result = pool.start_with(busy(2), |_, _, _| {
            Err(io::Error::other("no threads"))
        });
        assert!(matches!(result, Err(StripePoolError::Spawn { stripe: 0, .. })));
        assert_eq!(pool.barrier.as_ref().unwrap().member_count(), 0);
        assert!(pool.is_stopped());
    }
}
