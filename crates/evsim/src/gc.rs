//! Amortized garbage collection for timer handles.
//!
//! Protocol components that re-arm timers on every frame accumulate handles
//! far faster than they need them. [`EventGarbageCollector`] keeps those
//! handles in a set ordered by (deadline, sequence) and prunes the expired
//! ones in batches.
//!
//! # Why the prefix walk is enough
//!
//! Time never goes backwards and an event cannot expire by firing before
//! its own deadline. Walking the set in ascending order, the expired
//! handles therefore form a contiguous prefix. Cleanup stops at the first
//! live handle and never scans the rest.
//!
//! Cancellation can expire a handle out of order. Such a handle stays
//! tracked until the live handles ahead of it expire; it costs memory, not
//! correctness.
//!
//! # Batch sizing
//!
//! Cleanup runs when the set reaches a threshold. If the set is still at or
//! above the threshold afterwards, the threshold doubles (up to the maximum
//! batch). Otherwise it halves until it fits under the set size and then
//! doubles once, leaving headroom so the next insertion does not trigger
//! another cleanup straight away.

use std::collections::BTreeSet;

use tracing::debug;

use crate::event::EventId;
use crate::scheduler::{Simulator, WeakSimulator};

/// Smallest cleanup batch.
pub const DEFAULT_MIN_BATCH: usize = 8;

/// Largest cleanup batch.
pub const DEFAULT_MAX_BATCH: usize = 128;

// ============================================================================
// Configuration
// ============================================================================

/// Bounds for the adaptive cleanup threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcConfig {
    /// Lower bound, and the initial threshold.
    pub min_batch: usize,
    /// Upper bound on the threshold.
    pub max_batch: usize,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            min_batch: DEFAULT_MIN_BATCH,
            max_batch: DEFAULT_MAX_BATCH,
        }
    }
}

impl GcConfig {
    /// Sets the minimum batch size.
    pub fn with_min_batch(mut self, min_batch: usize) -> Self {
        self.min_batch = min_batch;
        self
    }

    /// Sets the maximum batch size.
    pub fn with_max_batch(mut self, max_batch: usize) -> Self {
        self.max_batch = max_batch;
        self
    }
}

// ============================================================================
// Batch Policy
// ============================================================================

/// Adaptive cleanup threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    config: GcConfig,
    threshold: usize,
}

impl BatchPolicy {
    /// Creates a policy starting at the minimum batch size.
    ///
    /// # Panics
    ///
    /// Panics if `min_batch` is zero or greater than `max_batch`.
    pub fn new(config: GcConfig) -> Self {
        assert!(config.min_batch > 0, "min_batch must be non-zero");
        assert!(
            config.min_batch <= config.max_batch,
            "min_batch {} exceeds max_batch {}",
            config.min_batch,
            config.max_batch
        );
        Self {
            config,
            threshold: config.min_batch,
        }
    }

    /// Size at which the next cleanup triggers.
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Returns true if a set of `len` handles is due for cleanup.
    pub fn should_clean(&self, len: usize) -> bool {
        len >= self.threshold
    }

    /// Adjusts the threshold after a cleanup left `len` handles.
    pub fn after_cleanup(&mut self, len: usize) {
        if len >= self.threshold {
            self.grow();
        } else {
            self.shrink(len);
        }
    }

    fn grow(&mut self) {
        self.threshold = self
            .threshold
            .saturating_mul(2)
            .clamp(self.config.min_batch, self.config.max_batch);
    }

    fn shrink(&mut self, len: usize) {
        while self.threshold > len {
            self.threshold >>= 1;
        }
        self.grow();
        // Bounds that are not powers of two can double back to exactly `len`.
        // `len` is below the previous threshold, so this stays within max_batch.
        self.threshold = self.threshold.max(len + 1);
    }
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self::new(GcConfig::default())
    }
}

// ============================================================================
// Collector
// ============================================================================

/// Tracks timer handles on behalf of one component and forgets expired ones.
///
/// Dropping the collector cancels every handle it still tracks, so no
/// callback fires into a component that no longer exists.
///
/// ```
/// use std::time::Duration;
/// use evsim::{EventGarbageCollector, Simulator};
///
/// let sim = Simulator::new();
/// let mut timers = EventGarbageCollector::new(&sim);
///
/// for ms in 1..=20 {
///     timers.track(sim.schedule(Duration::from_millis(ms), || {}));
/// }
/// drop(timers);
///
/// assert_eq!(sim.pending_count(), 0);
/// ```
#[derive(Debug)]
pub struct EventGarbageCollector {
    sim: WeakSimulator,
    events: BTreeSet<EventId>,
    policy: BatchPolicy,
}

impl EventGarbageCollector {
    /// Creates a collector with the default batch bounds.
    pub fn new(sim: &Simulator) -> Self {
        Self::with_config(sim, GcConfig::default())
    }

    /// Creates a collector with custom batch bounds.
    ///
    /// # Panics
    ///
    /// Panics if the bounds are invalid (see [`BatchPolicy::new`]).
    pub fn with_config(sim: &Simulator, config: GcConfig) -> Self {
        Self {
            sim: sim.downgrade(),
            events: BTreeSet::new(),
            policy: BatchPolicy::new(config),
        }
    }

    /// Starts tracking a handle, cleaning up if the batch threshold is hit.
    pub fn track(&mut self, id: EventId) {
        self.events.insert(id);
        if self.policy.should_clean(self.events.len()) {
            self.cleanup();
        }
    }

    /// Number of handles currently tracked.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns true if no handles are tracked.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Size at which the next cleanup triggers.
    pub fn threshold(&self) -> usize {
        self.policy.threshold()
    }

    /// Iterates over tracked handles in (deadline, sequence) order.
    pub fn iter(&self) -> impl Iterator<Item = &EventId> {
        self.events.iter()
    }

    fn cleanup(&mut self) {
        let before = self.events.len();
        match self.sim.upgrade() {
            Ok(sim) => {
                while let Some(first) = self.events.first() {
                    if !sim.is_expired(*first) {
                        break;
                    }
                    self.events.pop_first();
                }
            }
            // Nothing can fire without a simulator.
            Err(_) => self.events.clear(),
        }

        let previous = self.policy.threshold();
        self.policy.after_cleanup(self.events.len());
        debug!(
            removed = before - self.events.len(),
            tracked = self.events.len(),
            threshold = self.policy.threshold(),
            previous_threshold = previous,
            "event collector cleanup"
        );
    }
}

impl Drop for EventGarbageCollector {
    fn drop(&mut self) {
        let Ok(sim) = self.sim.upgrade() else {
            return;
        };
        for id in std::mem::take(&mut self.events) {
            sim.cancel(id);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
