//! Two-phase park barrier for a fixed group of worker threads.
//!
//! The owner drives the group through park cycles:
//!
//! ```text
//! owner                         members
//! ─────                         ───────
//! request_park()      ──────▶   poll() == Park at next safe point
//! wait_until_all_parked()  ◀──  park_until_released()  (parked += 1)
//!   ... exclusive access ...
//! release()           ──────▶   wake, parked -= 1
//! wait_until_all_released() ◀─  back to work
//! ```
//!
//! All shared counters and flags live behind a single mutex. The park and
//! stop flags are mirrored into an atomic so members can check them once per
//! loop iteration without locking.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

const SIGNAL_PARK: u8 = 1 << 0;
const SIGNAL_STOP: u8 = 1 << 1;

/// What a member should do at its safe point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafePoint {
    /// Keep working.
    Continue,
    /// A park cycle is in progress; call [`ParkBarrier::park_until_released`].
    Park,
    /// The group is shutting down.
    Stop,
}

/// Why an idle wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleWake {
    /// The full duration elapsed.
    TimedOut,
    /// A park or stop request arrived.
    Interrupted,
    /// An event notification for this member arrived.
    Notified,
}

#[derive(Debug)]
struct GroupState {
    park_requested: bool,
    stop_requested: bool,
    /// Stop came from a failed member rather than the owner.
    aborted: bool,
    /// Members currently blocked in `park_until_released`.
    parked: usize,
    /// Members that have not left the group.
    members: usize,
    /// Pending event notification per member.
    events: Vec<bool>,
}

/// A pausable worker group: parks and releases a fixed set of members in
/// lockstep.
#[derive(Debug)]
pub struct ParkBarrier {
    signals: AtomicU8,
    state: Mutex<GroupState>,
    /// Owner waits here for `parked == members`.
    all_parked: Condvar,
    /// Owner waits here for `parked == 0`.
    all_released: Condvar,
    /// Parked members wait here for the park request to clear.
    unparked: Condvar,
    /// Idle members wait here.
    wake: Condvar,
}

impl ParkBarrier {
    /// Create a barrier for `members` workers.
    #[must_use]
    pub fn new(members: usize) -> Self {
        Self {
            signals: AtomicU8::new(0),
            state: Mutex::new(GroupState {
                park_requested: false,
                stop_requested: false,
                aborted: false,
                parked: 0,
                members,
                events: vec![false; members],
            }),
            all_parked: Condvar::new(),
            all_released: Condvar::new(),
            unparked: Condvar::new(),
            wake: Condvar::new(),
        }
    }

    // ------------------------------------------------------------------
    // Member side
    // ------------------------------------------------------------------

    /// Lock-free safe point check. Stop takes precedence over park.
    #[inline]
    pub fn poll(&self) -> SafePoint {
        let signals = self.signals.load(Ordering::Acquire);
        if signals & SIGNAL_STOP != 0 {
            SafePoint::Stop
        } else if signals & SIGNAL_PARK != 0 {
            SafePoint::Park
        } else {
            SafePoint::Continue
        }
    }

    /// Count the calling member as parked and block until the park request is
    /// cleared or the group is stopped.
    ///
    /// Returns `false` immediately, without counting, if no park is requested
    /// (or the group is stopping) by the time the lock is taken.
    ///
    /// # Panics
    ///
    /// Panics if every member is already parked.
    pub fn park_until_released(&self) -> bool {
        let mut state = self.state.lock();
        if !state.park_requested || state.stop_requested {
            return false;
        }

        assert!(
            state.parked < state.members,
            "more members parked than are in the group"
        );
        state.parked += 1;
        if state.parked == state.members {
            self.all_parked.notify_all();
        }

        while state.park_requested && !state.stop_requested {
            self.unparked.wait(&mut state);
        }

        state.parked -= 1;
        if state.parked == 0 {
            self.all_released.notify_all();
        }
        true
    }

    /// Sleep for up to `timeout`, waking early on park, stop, or an event
    /// notification for `member`.
    ///
    /// The timeout is fixed when the wait begins.
    ///
    /// # Panics
    ///
    /// Panics if `member` is out of range.
    pub fn idle_wait(&self, member: usize, timeout: Duration) -> IdleWake {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();
        loop {
            if state.stop_requested || state.park_requested {
                return IdleWake::Interrupted;
            }
            if std::mem::take(&mut state.events[member]) {
                return IdleWake::Notified;
            }
            match deadline {
                Some(deadline) => {
                    if self.wake.wait_until(&mut state, deadline).timed_out() {
                        return IdleWake::TimedOut;
                    }
                }
                None => self.wake.wait(&mut state),
            }
        }
    }

    /// Wake `member` from an idle wait. If it is not waiting, its next idle
    /// wait returns immediately.
    ///
    /// # Panics
    ///
    /// Panics if `member` is out of range.
    pub fn notify_event(&self, member: usize) {
        let mut state = self.state.lock();
        state.events[member] = true;
        self.wake.notify_all();
    }

    /// Remove the calling member from the group. A pending park cycle only
    /// waits for the remaining members.
    ///
    /// # Panics
    ///
    /// Panics if every member has already left.
    pub fn leave(&self) {
        let mut state = self.state.lock();
        assert!(state.members > 0, "leave called on an empty group");
        state.members -= 1;
        if state.parked == state.members {
            self.all_parked.notify_all();
        }
    }

    // ------------------------------------------------------------------
    // Owner side
    // ------------------------------------------------------------------

    /// Ask every member to park at its next safe point, interrupting idle
    /// waits.
    ///
    /// On a stopping group nobody parks; the cycle completes once every
    /// member has left.
    ///
    /// # Panics
    ///
    /// Panics if a park cycle is already in progress.
    pub fn request_park(&self) {
        let mut state = self.state.lock();
        assert!(
            !state.park_requested,
            "park requested while a park cycle is already in progress"
        );
        state.park_requested = true;
        self.signals.fetch_or(SIGNAL_PARK, Ordering::Release);
        self.wake.notify_all();
    }

    /// Block until every remaining member is parked.
    pub fn wait_until_all_parked(&self) {
        let mut state = self.state.lock();
        while state.parked < state.members {
            self.all_parked.wait(&mut state);
        }
    }

    /// Clear the park request and wake parked members.
    ///
    /// # Panics
    ///
    /// Panics if no park cycle is in progress.
    pub fn release(&self) {
        let mut state = self.state.lock();
        assert!(
            state.park_requested,
            "unpark requested without a matching park"
        );
        state.park_requested = false;
        self.signals.fetch_and(!SIGNAL_PARK, Ordering::Release);
        self.unparked.notify_all();
    }

    /// Block until no member is parked.
    pub fn wait_until_all_released(&self) {
        let mut state = self.state.lock();
        while state.parked > 0 {
            self.all_released.wait(&mut state);
        }
    }

    /// [`request_park`](Self::request_park) then
    /// [`wait_until_all_parked`](Self::wait_until_all_parked).
    pub fn park_all(&self) {
        self.request_park();
        self.wait_until_all_parked();
    }

    /// [`release`](Self::release) then
    /// [`wait_until_all_released`](Self::wait_until_all_released).
    pub fn unpark_all(&self) {
        self.release();
        self.wait_until_all_released();
    }

    /// Tell every member to stop, waking idle and parked members.
    pub fn request_stop(&self) {
        let mut state = self.state.lock();
        Self::stop_locked(&mut state, &self.signals);
        self.unparked.notify_all();
        self.wake.notify_all();
    }

    /// Stop the group from a member that cannot continue.
    pub fn abort(&self) {
        let mut state = self.state.lock();
        state.aborted = true;
        Self::stop_locked(&mut state, &self.signals);
        self.unparked.notify_all();
        self.wake.notify_all();
    }

    fn stop_locked(state: &mut GroupState, signals: &AtomicU8) {
        state.stop_requested = true;
        signals.fetch_or(SIGNAL_STOP, Ordering::Release);
    }

    #[must_use]
    pub fn parked_count(&self) -> usize {
        self.state.lock().parked
    }

    #[must_use]
    pub fn member_count(&self) -> usize {
        self.state.lock().members
    }

    #[must_use]
    pub fn is_park_requested(&self) -> bool {
        self.state.lock().park_requested
    }

    #[must_use]
    pub fn is_stop_requested(&self) -> bool {
        self.state.lock().stop_requested
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.state.lock().aborted
    }
}
