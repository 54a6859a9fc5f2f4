//! # evsim: deterministic discrete-event timing kernel
//!
//! This crate is the timing core of a discrete-event network simulator. It
//! advances a single virtual clock and executes scheduled events strictly
//! in deadline order, while letting any subsystem create, query and cancel
//! timers cheaply.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Simulator                            │
//! │  ┌─────────────┐   ┌──────────────────────────────────────┐  │
//! │  │ SimClock    │   │ EventQueue                           │  │
//! │  │ (virtual)   │   │ BinaryHeap<(deadline, seq)> + arena  │  │
//! │  └─────────────┘   │ lazy cancellation                    │  │
//! │                    └──────────────────────────────────────┘  │
//! └───────────────▲──────────────────────────────┬───────────────┘
//!                 │ is_expired / cancel          │ EventId
//!                 │                              ▼
//! ┌───────────────┴──────────────────────────────────────────────┐
//! │  EventGarbageCollector (one per protocol component)           │
//! │  BTreeSet<EventId>, pruned in amortized batches               │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```
//! use std::time::Duration;
//! use evsim::{EventGarbageCollector, SimConfig, Simulator, StopReason};
//!
//! let sim = Simulator::with_config(SimConfig::default().with_max_events(1_000));
//! let mut timers = EventGarbageCollector::new(&sim);
//!
//! let retransmit = sim.schedule(Duration::from_millis(200), || {});
//! timers.track(retransmit);
//! timers.track(sim.schedule(Duration::from_millis(50), || {}));
//!
//! sim.cancel(retransmit);
//!
//! let summary = sim.run().unwrap();
//! assert_eq!(summary.stop_reason, StopReason::Drained);
//! assert_eq!(summary.stats.processed, 1);
//! ```
//!
//! ## Key Concepts
//!
//! - **`SimTime`**: nanosecond virtual time, advanced only by the scheduler
//! - **`EventId`**: copyable, non-owning handle ordered by (deadline, sequence)
//! - **`Simulator`**: the scheduler; owns every event record
//! - **`EventGarbageCollector`**: per-component handle bookkeeping

mod clock;
mod error;
mod event;
mod gc;
mod scheduler;


pub use clock::{SimClock, SimTime, ms_to_ns, ns_to_ms, ns_to_sec, sec_to_ns};
pub use error::{LimitKind, SimError};
pub use event::EventId;
pub use gc::{BatchPolicy, DEFAULT_MAX_BATCH, DEFAULT_MIN_BATCH, EventGarbageCollector, GcConfig};
pub use scheduler::{SimStats, Simulator, WeakSimulator};

// ============================================================================
// Simulation Configuration
// ============================================================================

/// Configuration for a simulator.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Events with a later deadline are left pending by [`Simulator::run`].
    pub max_time: SimTime,
    /// Maximum number of events processed over the simulator's lifetime.
    pub max_events: u64,
    /// Whether to emit a trace record per scheduled, cancelled and fired event.
    pub trace_enabled: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            max_time: SimTime::MAX,
            max_events: u64::MAX,
            trace_enabled: false,
        }
    }
}

impl SimConfig {
    /// Sets the maximum simulation time.
    pub fn with_max_time(mut self, max_time: SimTime) -> Self {
        self.max_time = max_time;
        self
    }

    /// Sets the maximum number of events.
    pub fn with_max_events(mut self, max_events: u64) -> Self {
        self.max_events = max_events;
        self
    }

    /// Enables per-event tracing.
    pub fn with_tracing(mut self) -> Self {
        self.trace_enabled = true;
        self
    }
}

// ============================================================================
// Simulation Summary
// ============================================================================

/// Why [`Simulator::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// No pending events remain.
    Drained,
    /// [`Simulator::stop`] was called.
    StopRequested,
    /// The next pending event lies beyond [`SimConfig::max_time`].
    TimeLimit,
}

/// Summary of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimSummary {
    /// Lifetime counters at the end of the run.
    pub stats: SimStats,
    /// Simulation time when the run ended.
    pub final_time: SimTime,
    /// Why the run ended.
    pub stop_reason: StopReason,
}
