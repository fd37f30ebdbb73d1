#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::redundant_pub_crate)]

//! Stripe Pool
//!
//! A fixed pool of worker threads ("stripes"), each repeatedly ticking one
//! independently owned partition of storage state, with a barrier that lets an
//! owner pause every stripe at once without a per-tick lock.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  StripePool                                                      │
//! │    - start / stop_and_join                                       │
//! │    - park_all_threads / unpark_all_threads                       │
//! │    - tick tuning (relaxed atomics, read every idle decision)     │
//! └──────────────────────────────────────────────────────────────────┘
//!          │ Arc<ParkBarrier>          │ Arc<TickTuning>
//!          ▼                           ▼
//! ┌────────────────┐ ┌────────────────┐      ┌────────────────┐
//! │ StripeWorker 0 │ │ StripeWorker 1 │ ...  │ StripeWorker N │
//! │  tick loop     │ │  tick loop     │      │  tick loop     │
//! └───────┬────────┘ └───────┬────────┘      └───────┬────────┘
//!         ▼                  ▼                       ▼
//!   TickableStripe     TickableStripe          TickableStripe
//! ```
//!
//! Workers check a single atomic flag word at the top of every loop iteration.
//! They block on the barrier mutex only while parked or idle.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicU64, Ordering};
//!
//! use stripe_pool::{StripePool, TickOutcome, TickResult, TickableStripe};
//!
//! #[derive(Default)]
//! struct Counter(AtomicU64);
//!
//! impl TickableStripe for Counter {
//!     fn tick(&self) -> TickResult {
//!         self.0.fetch_add(1, Ordering::Relaxed);
//!         Ok(TickOutcome::DidWork)
//!     }
//! }
//!
//! let mut pool = StripePool::new();
//! pool.start(vec![Arc::new(Counter::default()), Arc::new(Counter::default())])?;
//!
//! pool.park_all_threads();
//! // No stripe ticks until unparked.
//! let total: u64 = pool.stripes().map(|s| s.processor().0.load(Ordering::Relaxed)).sum();
//! pool.unpark_all_threads();
//!
//! pool.stop_and_join()?;
//! # let _ = total;
//! # Ok::<(), stripe_pool::StripePoolError>(())
//! ```

mod barrier;
mod config;
mod error;
mod pool;
mod stripe;
mod tuning;
mod worker;

pub use barrier::{IdleWake, ParkBarrier, SafePoint};
pub use config::{ENV_THREAD_PREFIX, ENV_TICK_WAIT_MS, ENV_TICKS_BEFORE_WAIT, StripePoolConfig};
pub use error::{
    BoxError, ConfigError, FailureKind, StripeFailure, StripePoolError, StripePoolResult,
    TickError,
};
pub use pool::{ParkedStripes, StripePool};
pub use stripe::{TickOutcome, TickResult, TickableStripe};
pub use tuning::{DEFAULT_TICK_WAIT_DURATION, DEFAULT_TICKS_BEFORE_WAIT};
pub use worker::{StripeState, StripeStats, StripeWorker};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        StripePool, StripePoolConfig, StripeWorker, TickError, TickOutcome, TickResult,
        TickableStripe,
    };
}
