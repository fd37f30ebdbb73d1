//! Stripe pool runner
//!
//! Drives a pool of simulated storage stripes:
//! 1. A feeder thread enqueues operations round-robin and wakes the target
//!    stripe
//! 2. Every reconfiguration interval the main thread parks all stripes,
//!    applies a new cluster state version and logs per-stripe progress
//! 3. Ctrl-C, `RUN_SECONDS` or a failed stripe stops the pool
//!
//! Pool tuning comes from `STRIPE_*` environment variables.

mod sim;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use stripe_pool::{StripePool, StripePoolConfig};
use tracing::{info, warn};

use crate::sim::SimulatedStripe;

fn env_or<T: std::str::FromStr>(var: &str, default: T) -> T {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("stripe_runner=info".parse()?)
                .add_directive("stripe_pool=info".parse()?),
        )
        .init();

    let stripe_count: usize = env_or("STRIPES", 4);
    let reconfig_interval = Duration::from_millis(env_or("RECONFIG_MS", 1000));
    let run_for = std::env::var("RUN_SECONDS")
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs);
    let config = StripePoolConfig::from_env()?;

    info!(stripe_count, ?config, "starting stripe runner");

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || running.store(false, Ordering::Relaxed))?;
    }

    let stripes: Vec<_> = (0..stripe_count)
        .map(|_| Arc::new(SimulatedStripe::default()))
        .collect();
    let mut pool = StripePool::with_config(&config);
    pool.start(stripes.clone())?;
    let pool = Arc::new(pool);

    let feeder = {
        let pool = Arc::clone(&pool);
        let running = Arc::clone(&running);
        thread::Builder::new()
            .name("feeder".into())
            .spawn(move || {
                let mut next = 0;
                while running.load(Ordering::Relaxed) {
                    let stripe = pool.stripe(next % pool.stripe_count());
                    stripe.processor().enqueue(64);
                    stripe.notify_event_has_triggered();
                    next += 1;
                    thread::sleep(Duration::from_millis(2));
                }
            })?
    };

    let started = Instant::now();
    let mut version = 0;
    while running.load(Ordering::Relaxed) {
        thread::sleep(reconfig_interval);
        if run_for.is_some_and(|limit| started.elapsed() >= limit) {
            running.store(false, Ordering::Relaxed);
        }

        version += 1;
        let park_started = Instant::now();
        {
            let parked = pool.park();
            for stripe in parked.processors() {
                stripe.apply_cluster_state(version);
            }
        }
        info!(version, park = ?park_started.elapsed(), "applied cluster state");

        for stripe in pool.stripes() {
            let stats = stripe.stats();
            info!(
                stripe = stripe.index(),
                pending = stripe.processor().pending(),
                completed = stripe.processor().completed(),
                ticks = stats.ticks,
                idle_waits = stats.idle_waits,
                "stripe progress"
            );
        }

        for failure in pool.take_failures() {
            warn!(%failure, "stripe failed");
        }
        if pool.is_failed() {
            warn!("stripe pool failed");
            running.store(false, Ordering::Relaxed);
        }
    }

    info!("shutting down");
    if feeder.join().is_err() {
        warn!("feeder thread panicked");
    }
    let mut pool = Arc::try_unwrap(pool).map_err(|_| eyre::eyre!("pool still shared"))?;
    pool.stop_and_join()?;

    let total: u64 = stripes.iter().map(|s| s.completed()).sum();
    info!(total, elapsed = ?started.elapsed(), "stripe runner stopped");
    Ok(())
}
