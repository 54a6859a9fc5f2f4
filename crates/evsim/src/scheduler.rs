//! The event scheduler.
//!
//! [`Simulator`] owns the virtual clock and every scheduled event. It is a
//! cheap, clonable handle to shared state so callbacks can schedule and
//! cancel events while the run loop is executing them.
//!
//! # Re-entrancy
//!
//! No borrow of the scheduler state is held while a callback runs, and
//! callbacks are never dropped while the state is borrowed. A callback may
//! therefore schedule, cancel, or drop objects (such as an
//! [`EventGarbageCollector`](crate::EventGarbageCollector)) whose destructors
//! call back into the scheduler.
//!
//! Callbacks that keep the simulator alive should hold a [`WeakSimulator`]
//! rather than a clone, otherwise a pending event and the simulator keep
//! each other alive until [`Simulator::destroy`] runs.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};
use std::time::Duration;

use tracing::{debug, info, trace};

use crate::clock::{SimClock, SimTime};
use crate::error::{LimitKind, SimError};
use crate::event::{Callback, EventId, EventQueue};
use crate::{SimConfig, SimSummary, StopReason};

// ============================================================================
// Statistics
// ============================================================================

/// Counters collected over the lifetime of a simulator.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SimStats {
    /// Events scheduled (excluding destroy callbacks).
    pub scheduled: u64,
    /// Events whose callback was invoked.
    pub processed: u64,
    /// Events cancelled while pending.
    pub cancelled: u64,
    /// Cancelled entries reclaimed from the queue without invocation.
    pub discarded: u64,
}

// ============================================================================
// Shared State
// ============================================================================

#[derive(Debug)]
struct SimInner {
    config: SimConfig,
    clock: SimClock,
    queue: EventQueue,
    destroy_events: VecDeque<DestroyEvent>,
    stats: SimStats,
    stop_requested: bool,
    running: bool,
}

struct DestroyEvent(Callback);

impl std::fmt::Debug for DestroyEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DestroyEvent")
    }
}

/// Clears the running flag when [`Simulator::run`] exits, including by unwinding
/// out of a callback.
struct RunningGuard<'a>(&'a RefCell<SimInner>);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.0.try_borrow_mut() {
            inner.running = false;
        }
    }
}

/// Why the run loop could not fire another event.
enum Halt {
    Stopped(StopReason),
    Limit(LimitKind),
}

impl SimInner {
    fn new(config: SimConfig) -> Self {
        Self {
            config,
            clock: SimClock::new(),
            queue: EventQueue::new(),
            destroy_events: VecDeque::new(),
            stats: SimStats::default(),
            stop_requested: false,
            running: false,
        }
    }

    /// Hands a rejected callback back so the caller can drop it after the
    /// borrow is released.
    fn try_schedule_at(
        &mut self,
        deadline: SimTime,
        callback: Callback,
    ) -> Result<EventId, (SimError, Callback)> {
        let now = self.clock.now();
        if deadline < now {
            return Err((SimError::DeadlineInPast { now, deadline }, callback));
        }

        let id = self.queue.insert(deadline, callback);
        self.stats.scheduled += 1;
        if self.config.trace_enabled {
            trace!(event = %id, now = %now, "event scheduled");
        }
        Ok(id)
    }

    fn cancel(&mut self, id: EventId) -> Option<Callback> {
        let callback = self.queue.cancel(id)?;
        self.stats.cancelled += 1;
        if self.config.trace_enabled {
            trace!(event = %id, now = %self.clock.now(), "event cancelled");
        }
        Some(callback)
    }

    fn next_deadline(&mut self) -> Option<SimTime> {
        let (deadline, discarded) = self.queue.next_deadline();
        self.stats.discarded += discarded;
        deadline
    }

    /// Pops the earliest pending event and advances the clock to it.
    fn fire_next(&mut self) -> Option<(EventId, Callback)> {
        let (next, discarded) = self.queue.pop_pending();
        self.stats.discarded += discarded;

        let (id, callback) = next?;
        self.clock.advance_to(id.deadline());
        self.stats.processed += 1;
        if self.config.trace_enabled {
            trace!(event = %id, "event fired");
        }
        Some((id, callback))
    }

    /// Decides whether the run loop may fire another event, and pops it.
    fn poll_run(&mut self) -> Result<(EventId, Callback), Halt> {
        if self.stop_requested {
            return Err(Halt::Stopped(StopReason::StopRequested));
        }
        let Some(deadline) = self.next_deadline() else {
            return Err(Halt::Stopped(StopReason::Drained));
        };
        if deadline > self.config.max_time {
            return Err(Halt::Stopped(StopReason::TimeLimit));
        }
        if self.stats.processed >= self.config.max_events {
            return Err(Halt::Limit(LimitKind::Events));
        }
        self.fire_next().ok_or(Halt::Stopped(StopReason::Drained))
    }

    fn summary(&self, stop_reason: StopReason) -> SimSummary {
        SimSummary {
            stats: self.stats,
            final_time: self.clock.now(),
            stop_reason,
        }
    }
}

// ============================================================================
// Simulator
// ============================================================================

/// Discrete-event scheduler driving a single virtual clock.
///
/// Events fire in (deadline, sequence) order: earliest deadline first, and
/// in scheduling order among events that share a deadline.
///
/// ```
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use std::time::Duration;
/// use evsim::{SimTime, Simulator};
///
/// let sim = Simulator::new();
/// let fired = Rc::new(Cell::new(false));
///
/// let flag = Rc::clone(&fired);
/// let id = sim.schedule(Duration::from_millis(10), move || flag.set(true));
/// assert!(!sim.is_expired(id));
///
/// sim.run().unwrap();
/// assert!(fired.get());
/// assert!(sim.is_expired(id));
/// assert_eq!(sim.now(), SimTime::from_millis(10));
/// ```
#[derive(Debug, Clone)]
pub struct Simulator {
    inner: Rc<RefCell<SimInner>>,
}

impl Simulator {
    /// Creates a simulator with the default configuration.
    pub fn new() -> Self {
        Self::with_config(SimConfig::default())
    }

    /// Creates a simulator with the given configuration.
    pub fn with_config(config: SimConfig) -> Self {
        Self {
            inner: Rc::new(RefCell::new(SimInner::new(config))),
        }
    }

    /// Creates a non-owning reference to this simulator.
    pub fn downgrade(&self) -> WeakSimulator {
        WeakSimulator {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Returns the current simulated time.
    pub fn now(&self) -> SimTime {
        self.inner.borrow().clock.now()
    }

    /// Returns the configuration.
    pub fn config(&self) -> SimConfig {
        self.inner.borrow().config.clone()
    }

    /// Schedules `callback` to run `delay` after the current time.
    ///
    /// # Panics
    ///
    /// Panics if the deadline overflows simulated time.
    pub fn schedule<F>(&self, delay: Duration, callback: F) -> EventId
    where
        F: FnOnce() + 'static,
    {
        let deadline = self.now() + delay;
        self.schedule_at(deadline, callback)
    }

    /// Schedules `callback` to run at the current time, after every event
    /// already scheduled for it.
    pub fn schedule_now<F>(&self, callback: F) -> EventId
    where
        F: FnOnce() + 'static,
    {
        self.schedule(Duration::ZERO, callback)
    }

    /// Schedules `callback` at an absolute deadline.
    ///
    /// # Panics
    ///
    /// Panics if `deadline` is before the current time.
    pub fn schedule_at<F>(&self, deadline: SimTime, callback: F) -> EventId
    where
        F: FnOnce() + 'static,
    {
        match self.try_schedule_at(deadline, callback) {
            Ok(id) => id,
            Err(e) => panic!("{e}"),
        }
    }

    /// Schedules `callback` at an absolute deadline, rejecting deadlines in
    /// the past.
    pub fn try_schedule_at<F>(&self, deadline: SimTime, callback: F) -> Result<EventId, SimError>
    where
        F: FnOnce() + 'static,
    {
        let result = self
            .inner
            .borrow_mut()
            .try_schedule_at(deadline, Box::new(callback));
        result.map_err(|(err, rejected)| {
            drop(rejected);
            err
        })
    }

    /// Registers `callback` to run once when [`Simulator::destroy`] is called.
    pub fn schedule_destroy<F>(&self, callback: F)
    where
        F: FnOnce() + 'static,
    {
        self.inner
            .borrow_mut()
            .destroy_events
            .push_back(DestroyEvent(Box::new(callback)));
    }

    /// Cancels a pending event.
    ///
    /// Does nothing if the event already fired or was cancelled, or if the
    /// handle is null or stale. The queue entry is reclaimed lazily.
    pub fn cancel(&self, id: EventId) {
        let callback = self.inner.borrow_mut().cancel(id);
        // Released outside the borrow: the closure may own values whose
        // destructors call back into the simulator.
        drop(callback);
    }

    /// Returns true if the event fired or was cancelled, or the handle is
    /// null or stale.
    pub fn is_expired(&self, id: EventId) -> bool {
        !self.is_pending(id)
    }

    /// Returns true if the event is still waiting to fire.
    pub fn is_pending(&self, id: EventId) -> bool {
        self.inner.borrow().queue.is_pending(id)
    }

    /// Returns the time remaining until the event fires, or zero if it has
    /// expired.
    pub fn delay_left(&self, id: EventId) -> Duration {
        let inner = self.inner.borrow();
        if inner.queue.is_pending(id) {
            id.deadline().saturating_since(inner.clock.now())
        } else {
            Duration::ZERO
        }
    }

    /// Number of events still pending.
    pub fn pending_count(&self) -> usize {
        self.inner.borrow().queue.pending_len()
    }

    /// Returns true if any event is still pending.
    pub fn has_pending(&self) -> bool {
        self.pending_count() > 0
    }

    /// Returns the deadline of the earliest pending event.
    pub fn next_deadline(&self) -> Option<SimTime> {
        self.inner.borrow_mut().next_deadline()
    }

    /// Returns a snapshot of the lifetime counters.
    pub fn stats(&self) -> SimStats {
        self.inner.borrow().stats
    }

    /// Returns true while [`Simulator::run`] is executing.
    pub fn is_running(&self) -> bool {
        self.inner.borrow().running
    }

    /// Fires the earliest pending event.
    ///
    /// Advances the clock to the event's deadline and invokes its callback to
    /// completion. Returns false if no event is pending. Ignores the run
    /// limits in [`SimConfig`].
    pub fn step(&self) -> bool {
        let next = self.inner.borrow_mut().fire_next();
        match next {
            Some((_, callback)) => {
                callback();
                true
            }
            None => false,
        }
    }

    /// Runs events until none remain, a stop is requested, or a configured
    /// limit is reached.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::LimitExceeded`] if the event budget runs out while
    /// events are still pending.
    ///
    /// # Panics
    ///
    /// Panics if called from inside a callback of the same simulator.
    pub fn run(&self) -> Result<SimSummary, SimError> {
        {
            let mut inner = self.inner.borrow_mut();
            assert!(!inner.running, "Simulator::run called re-entrantly");
            inner.running = true;
            inner.stop_requested = false;
        }
        let _running = RunningGuard(&self.inner);

        let halt = loop {
            let next = self.inner.borrow_mut().poll_run();
            match next {
                Ok((_, callback)) => callback(),
                Err(halt) => break halt,
            }
        };

        let inner = self.inner.borrow();
        match halt {
            Halt::Stopped(reason) => {
                let summary = inner.summary(reason);
                info!(
                    reason = ?reason,
                    final_time = %summary.final_time,
                    processed = summary.stats.processed,
                    pending = inner.queue.pending_len(),
                    "simulation run finished"
                );
                Ok(summary)
            }
            Halt::Limit(kind) => {
                debug!(
                    limit = %kind,
                    now = %inner.clock.now(),
                    pending = inner.queue.pending_len(),
                    "simulation limit exceeded"
                );
                Err(SimError::LimitExceeded { kind })
            }
        }
    }

    /// Requests that [`Simulator::run`] return once the current callback
    /// completes. The request is cleared when the next run starts.
    pub fn stop(&self) {
        self.inner.borrow_mut().stop_requested = true;
    }

    /// Schedules a stop request `delay` after the current time.
    pub fn stop_after(&self, delay: Duration) -> EventId {
        let sim = self.downgrade();
        self.schedule(delay, move || sim.stop())
    }

    /// Tears the simulation down.
    ///
    /// Runs every destroy callback in registration order, then discards all
    /// remaining events. Outstanding handles become expired. The clock is
    /// left where it was.
    pub fn destroy(&self) {
        loop {
            let next = self.inner.borrow_mut().destroy_events.pop_front();
            match next {
                Some(DestroyEvent(callback)) => callback(),
                None => break,
            }
        }

        let dropped = self.inner.borrow_mut().queue.drain();
        debug!(
            discarded = dropped.len(),
            now = %self.now(),
            "simulator destroyed"
        );
        drop(dropped);
    }
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Weak Reference
// ============================================================================

/// Non-owning reference to a [`Simulator`].
///
/// Operations degrade gracefully once the simulator is gone: every handle
/// reads as expired and cancellation does nothing.
#[derive(Debug, Clone, Default)]
pub struct WeakSimulator {
    inner: Weak<RefCell<SimInner>>,
}

impl WeakSimulator {
    /// Attempts to upgrade to a strong reference.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::SimulatorDropped`] if the simulator no longer exists.
    pub fn upgrade(&self) -> Result<Simulator, SimError> {
        self.inner
            .upgrade()
            .map(|inner| Simulator { inner })
            .ok_or(SimError::SimulatorDropped)
    }

    /// Returns the current simulated time.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::SimulatorDropped`] if the simulator no longer exists.
    pub fn now(&self) -> Result<SimTime, SimError> {
        Ok(self.upgrade()?.now())
    }

    /// Schedules `callback` to run `delay` after the current time.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::SimulatorDropped`] if the simulator no longer exists.
    pub fn schedule<F>(&self, delay: Duration, callback: F) -> Result<EventId, SimError>
    where
        F: FnOnce() + 'static,
    {
        Ok(self.upgrade()?.schedule(delay, callback))
    }

    /// Cancels a pending event, if the simulator still exists.
    pub fn cancel(&self, id: EventId) {
        if let Ok(sim) = self.upgrade() {
            sim.cancel(id);
        }
    }

    /// Returns true if the event has expired or the simulator is gone.
    pub fn is_expired(&self, id: EventId) -> bool {
        self.upgrade().map_or(true, |sim| sim.is_expired(id))
    }

    /// Requests a stop, if the simulator still exists.
    pub fn stop(&self) {
        if let Ok(sim) = self.upgrade() {
            sim.stop();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn recorder() -> (Rc<RefCell<Vec<u32>>>, impl Fn(u32) -> Box<dyn FnOnce()>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        let make = move |label: u32| -> Box<dyn FnOnce()> {
            let sink = Rc::clone(&sink);
            Box::new(move || sink.borrow_mut().push(label))
        };
        (log, make)
    }

    #[test]
    fn schedule_uses_current_time() {
        let sim = Simulator::new();
        sim.schedule(Duration::from_millis(1), || {});
        assert!(sim.step());
        assert_eq!(sim.now(), SimTime::from_millis(1));

        let id = sim.schedule(Duration::from_micros(500), || {});
        assert_eq!(id.deadline(), SimTime::from_nanos(1_500_000));
    }

    #[test]
    fn step_advances_clock_and_fires() {
        let sim = Simulator::new();
        let (log, make) = recorder();

        sim.schedule(Duration::from_millis(2), make(2));
        sim.schedule(Duration::from_millis(1), make(1));

        assert!(sim.step());
        assert_eq!(sim.now(), SimTime::from_millis(1));
        assert!(sim.step());
        assert_eq!(sim.now(), SimTime::from_millis(2));
        assert!(!sim.step());

        assert_eq!(*log.borrow(), vec![1, 2]);
        assert_eq!(sim.stats().processed, 2);
    }

    #[test]
    fn schedule_now_runs_after_same_time_events() {
        let sim = Simulator::new();
        let (log, make) = recorder();

        sim.schedule(Duration::ZERO, make(1));
        sim.schedule_now(make(2));
        sim.run().unwrap();

        assert_eq!(*log.borrow(), vec![1, 2]);
        assert_eq!(sim.now(), SimTime::ZERO);
    }

    #[test]
    fn try_schedule_at_rejects_past_deadline() {
        let sim = Simulator::new();
        sim.schedule(Duration::from_millis(5), || {});
        sim.step();

        let err = sim
            .try_schedule_at(SimTime::from_millis(4), || {})
            .unwrap_err();
        assert_eq!(
            err,
            SimError::DeadlineInPast {
                now: SimTime::from_millis(5),
                deadline: SimTime::from_millis(4),
            }
        );
        assert_eq!(sim.pending_count(), 0);

        // The current instant itself is fine.
        assert!(sim.try_schedule_at(SimTime::from_millis(5), || {}).is_ok());
    }

    #[test]
    #[should_panic(expected = "is before the current time")]
    fn schedule_at_past_panics() {
        let sim = Simulator::new();
        sim.schedule(Duration::from_secs(1), || {});
        sim.step();
        sim.schedule_at(SimTime::ZERO, || {});
    }

    #[test]
    #[should_panic(expected = "simulated time overflow")]
    fn schedule_overflow_panics() {
        let sim = Simulator::new();
        sim.schedule(Duration::MAX, || {});
    }

    #[test]
    fn cancel_prevents_callback() {
        let sim = Simulator::new();
        let fired = Rc::new(Cell::new(false));
        let flag = Rc::clone(&fired);

        let id = sim.schedule(Duration::from_millis(1), move || flag.set(true));
        sim.cancel(id);
        assert!(sim.is_expired(id));

        let summary = sim.run().unwrap();
        assert!(!fired.get());
        assert_eq!(summary.stats.processed, 0);
        assert_eq!(summary.stats.cancelled, 1);
        assert_eq!(summary.stats.discarded, 1);
        // The clock never advanced to the cancelled deadline.
        assert_eq!(summary.final_time, SimTime::ZERO);
    }

    #[test]
    fn cancel_releases_captures_immediately() {
        let sim = Simulator::new();
        let token = Rc::new(());
        let held = Rc::clone(&token);

        let id = sim.schedule(Duration::from_secs(1), move || drop(held));
        assert_eq!(Rc::strong_count(&token), 2);

        sim.cancel(id);
        assert_eq!(Rc::strong_count(&token), 1);
    }

    #[test]
    fn callback_can_cancel_same_tick_event() {
        let sim = Simulator::new();
        let (log, make) = recorder();

        let victim = Rc::new(Cell::new(EventId::NULL));
        let weak = sim.downgrade();
        let target = Rc::clone(&victim);
        sim.schedule_now(move || weak.cancel(target.get()));
        victim.set(sim.schedule_now(make(2)));
        sim.schedule_now(make(3));

        sim.run().unwrap();
        assert_eq!(*log.borrow(), vec![3]);
    }

    #[test]
    fn callback_can_schedule_more_events() {
        let sim = Simulator::new();
        let count = Rc::new(Cell::new(0u32));

        fn tick(sim: WeakSimulator, count: Rc<Cell<u32>>) {
            count.set(count.get() + 1);
            if count.get() < 5 {
                let next = sim.clone();
                sim.schedule(Duration::from_millis(1), move || tick(next, count))
                    .unwrap();
            }
        }

        let weak = sim.downgrade();
        let c = Rc::clone(&count);
        sim.schedule_now(move || tick(weak, c));

        let summary = sim.run().unwrap();
        assert_eq!(count.get(), 5);
        assert_eq!(summary.final_time, SimTime::from_millis(4));
    }

    #[test]
    fn is_expired_inside_own_callback() {
        let sim = Simulator::new();
        let own = Rc::new(Cell::new(EventId::NULL));
        let seen = Rc::new(Cell::new(false));

        let weak = sim.downgrade();
        let (id_cell, seen_cell) = (Rc::clone(&own), Rc::clone(&seen));
        let id = sim.schedule_now(move || seen_cell.set(weak.is_expired(id_cell.get())));
        own.set(id);

        sim.run().unwrap();
        assert!(seen.get());
    }

    #[test]
    fn delay_left_counts_down() {
        let sim = Simulator::new();
        let id = sim.schedule(Duration::from_millis(10), || {});
        sim.schedule(Duration::from_millis(4), || {});

        assert_eq!(sim.delay_left(id), Duration::from_millis(10));
        sim.step();
        assert_eq!(sim.delay_left(id), Duration::from_millis(6));
        sim.cancel(id);
        assert_eq!(sim.delay_left(id), Duration::ZERO);
        assert_eq!(sim.delay_left(EventId::NULL), Duration::ZERO);
    }

    #[test]
    fn next_deadline_ignores_cancelled() {
        let sim = Simulator::new();
        let a = sim.schedule(Duration::from_millis(1), || {});
        sim.schedule(Duration::from_millis(3), || {});
        sim.cancel(a);

        assert_eq!(sim.next_deadline(), Some(SimTime::from_millis(3)));
        assert_eq!(sim.pending_count(), 1);
        assert!(sim.has_pending());
    }

    #[test]
    fn stop_ends_run_after_current_callback() {
        let sim = Simulator::new();
        let (log, make) = recorder();

        let weak = sim.downgrade();
        let first = make(1);
        sim.schedule(Duration::from_millis(1), move || {
            first();
            weak.stop();
        });
        sim.schedule(Duration::from_millis(2), make(2));

        let summary = sim.run().unwrap();
        assert_eq!(summary.stop_reason, StopReason::StopRequested);
        assert_eq!(*log.borrow(), vec![1]);

        // A new run clears the request and continues.
        let summary = sim.run().unwrap();
        assert_eq!(summary.stop_reason, StopReason::Drained);
        assert_eq!(*log.borrow(), vec![1, 2]);
    }

    #[test]
    fn stop_after_halts_at_time() {
        let sim = Simulator::new();
        let (log, make) = recorder();

        for ms in [1u32, 2, 5, 8] {
            sim.schedule(Duration::from_millis(u64::from(ms)), make(ms));
        }
        sim.stop_after(Duration::from_millis(3));

        let summary = sim.run().unwrap();
        assert_eq!(summary.stop_reason, StopReason::StopRequested);
        assert_eq!(summary.final_time, SimTime::from_millis(3));
        assert_eq!(*log.borrow(), vec![1, 2]);
        assert_eq!(sim.pending_count(), 2);
    }

    #[test]
    fn run_respects_time_limit() {
        let sim = Simulator::with_config(
            SimConfig::default().with_max_time(SimTime::from_millis(1)),
        );
        sim.schedule(Duration::from_micros(500), || {});
        sim.schedule(Duration::from_millis(2), || {});

        let summary = sim.run().unwrap();
        assert_eq!(summary.stop_reason, StopReason::TimeLimit);
        assert_eq!(summary.stats.processed, 1);
        assert_eq!(sim.pending_count(), 1);
        assert_eq!(sim.now(), SimTime::from_nanos(500_000));
    }

    #[test]
    fn run_reports_event_limit() {
        let sim = Simulator::with_config(SimConfig::default().with_max_events(2));
        for ms in 1..=3 {
            sim.schedule(Duration::from_millis(ms), || {});
        }

        let err = sim.run().unwrap_err();
        assert_eq!(
            err,
            SimError::LimitExceeded {
                kind: LimitKind::Events
            }
        );
        assert_eq!(sim.stats().processed, 2);
        assert!(!sim.is_running());
    }

    #[test]
    fn event_limit_not_reported_when_drained() {
        let sim = Simulator::with_config(SimConfig::default().with_max_events(2));
        sim.schedule(Duration::from_millis(1), || {});
        sim.schedule(Duration::from_millis(2), || {});

        let summary = sim.run().unwrap();
        assert_eq!(summary.stop_reason, StopReason::Drained);
    }

    #[test]
    #[should_panic(expected = "re-entrantly")]
    fn nested_run_panics() {
        let sim = Simulator::new();
        let inner = sim.clone();
        sim.schedule_now(move || {
            let _ = inner.run();
        });
        let _ = sim.run();
    }

    #[test]
    fn run_recovers_after_callback_panic() {
        use std::panic::{catch_unwind, AssertUnwindSafe};

        let sim = Simulator::new();
        sim.schedule(Duration::from_millis(1), || panic!("callback failed"));
        let fired = Rc::new(Cell::new(false));
        let flag = Rc::clone(&fired);
        sim.schedule(Duration::from_millis(2), move || flag.set(true));

        assert!(catch_unwind(AssertUnwindSafe(|| sim.run())).is_err());
        assert!(!sim.is_running());

        let summary = sim.run().unwrap();
        assert!(fired.get());
        assert_eq!(summary.final_time, SimTime::from_millis(2));
    }

    #[test]
    fn destroy_runs_destroy_events_and_discards_pending() {
        let sim = Simulator::new();
        let (log, make) = recorder();

        let pending = sim.schedule(Duration::from_secs(1), make(99));
        sim.schedule_destroy(make(1));
        sim.schedule_destroy(make(2));

        sim.destroy();
        assert_eq!(*log.borrow(), vec![1, 2]);
        assert!(sim.is_expired(pending));
        assert_eq!(sim.pending_count(), 0);
        assert!(!sim.step());
    }

    #[test]
    fn weak_simulator_after_drop() {
        let sim = Simulator::new();
        let id = sim.schedule(Duration::from_secs(1), || {});
        let weak = sim.downgrade();

        assert!(!weak.is_expired(id));
        assert_eq!(weak.now(), Ok(SimTime::ZERO));
        drop(sim);

        assert!(weak.is_expired(id));
        assert_eq!(weak.upgrade().unwrap_err(), SimError::SimulatorDropped);
        assert!(weak.schedule(Duration::ZERO, || {}).is_err());
        weak.cancel(id);
        weak.stop();
    }

    #[test]
    fn stats_track_lifecycle() {
        let sim = Simulator::new();
        let a = sim.schedule(Duration::from_millis(1), || {});
        sim.schedule(Duration::from_millis(2), || {});
        sim.cancel(a);
        sim.cancel(a);
        sim.run().unwrap();

        assert_eq!(
            sim.stats(),
            SimStats {
                scheduled: 2,
                processed: 1,
                cancelled: 1,
                discarded: 1,
            }
        );
    }
}
