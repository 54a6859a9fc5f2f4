//! Event records, handles, and the lazily-deleted priority queue.
//!
//! # Design
//!
//! Event records live in an arena owned by [`EventQueue`]. Callers only ever
//! see an [`EventId`]: a copyable handle carrying the event's ordering key
//! (deadline, sequence) plus the arena slot and generation it was issued
//! for. A handle whose slot has since been reclaimed is stale and reports
//! the event as expired; it is never dereferenced.
//!
//! Cancellation flips the record to cancelled and releases its callback,
//! but leaves the heap entry in place. Cancelled entries are skipped and
//! reclaimed when they reach the top of the heap.
//!
//! Events are processed in strict deadline order. Events with the same
//! deadline are processed in the order they were scheduled.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::clock::SimTime;

/// Deferred unit of work attached to an event.
pub(crate) type Callback = Box<dyn FnOnce()>;

// ============================================================================
// Event Handle
// ============================================================================

/// Handle to a scheduled event.
///
/// Handles are ordered by (deadline, sequence), the same order in which the
/// scheduler fires events. They do not keep the event alive and may be
/// copied freely. [`EventId::default`] is the null handle: always expired,
/// cancelling it does nothing.
#[derive(Debug, Clone, Copy)]
pub struct EventId {
    deadline: SimTime,
    sequence: u64,
    slot: u32,
    generation: u32,
}

impl EventId {
    /// The null handle. Never refers to an event.
    pub const NULL: EventId = EventId {
        deadline: SimTime::ZERO,
        sequence: 0,
        slot: u32::MAX,
        generation: 0,
    };

    /// Returns the time at which the event fires.
    pub fn deadline(&self) -> SimTime {
        self.deadline
    }

    /// Returns the issuance sequence number (tie-break among equal deadlines).
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Returns true for the null handle.
    pub fn is_null(&self) -> bool {
        self.sequence == 0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::NULL
    }
}

impl PartialEq for EventId {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.sequence == other.sequence
    }
}

impl Eq for EventId {}

impl Hash for EventId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.deadline.hash(state);
        self.sequence.hash(state);
    }
}

impl PartialOrd for EventId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EventId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then_with(|| self.sequence.cmp(&other.sequence))
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "event(null)")
        } else {
            write!(f, "event#{}@{}", self.sequence, self.deadline)
        }
    }
}

// ============================================================================
// Event Arena
// ============================================================================

enum Entry {
    Pending(Callback),
    Cancelled,
}

struct Occupant {
    sequence: u64,
    entry: Entry,
}

struct Slot {
    generation: u32,
    occupant: Option<Occupant>,
}

/// Heap entry. Reverses the ordering so `BinaryHeap` pops the earliest event.
#[derive(Debug)]
struct QueuedEvent(EventId);

impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for QueuedEvent {}

impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.cmp(&self.0)
    }
}

// ============================================================================
// Event Queue
// ============================================================================

/// Priority queue of scheduled events with lazy cancellation.
pub(crate) struct EventQueue {
    heap: BinaryHeap<QueuedEvent>,
    slots: Vec<Slot>,
    free: Vec<u32>,
    /// Next issuance sequence. Zero is reserved for the null handle.
    next_sequence: u64,
    /// Events scheduled and neither fired nor cancelled.
    pending: usize,
}

impl EventQueue {
    pub(crate) fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            slots: Vec::new(),
            free: Vec::new(),
            next_sequence: 1,
            pending: 0,
        }
    }

    /// Inserts a pending event and returns its handle.
    pub(crate) fn insert(&mut self, deadline: SimTime, callback: Callback) -> EventId {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let slot = match self.free.pop() {
            Some(slot) => slot,
            None => {
                let slot = u32::try_from(self.slots.len())
                    .ok()
                    .filter(|&slot| slot != u32::MAX)
                    .expect("event arena exhausted");
                self.slots.push(Slot {
                    generation: 0,
                    occupant: None,
                });
                slot
            }
        };

        let record = &mut self.slots[slot as usize];
        debug_assert!(record.occupant.is_none(), "free slot {slot} is occupied");
        record.occupant = Some(Occupant {
            sequence,
            entry: Entry::Pending(callback),
        });

        let id = EventId {
            deadline,
            sequence,
            slot,
            generation: record.generation,
        };
        self.heap.push(QueuedEvent(id));
        self.pending += 1;
        id
    }

    fn occupant(&self, id: EventId) -> Option<&Occupant> {
        if id.is_null() {
            return None;
        }
        self.slots
            .get(id.slot as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.occupant.as_ref())
            .filter(|occupant| occupant.sequence == id.sequence)
    }

    /// Returns true if the event has neither fired nor been cancelled.
    pub(crate) fn is_pending(&self, id: EventId) -> bool {
        matches!(
            self.occupant(id),
            Some(Occupant {
                entry: Entry::Pending(_),
                ..
            })
        )
    }

    /// Marks a pending event cancelled and hands back its callback.
    ///
    /// The callback is returned rather than dropped so the caller can
    /// release it outside any borrow of the scheduler.
    pub(crate) fn cancel(&mut self, id: EventId) -> Option<Callback> {
        if !self.is_pending(id) {
            return None;
        }
        let occupant = self.slots[id.slot as usize].occupant.as_mut()?;
        match std::mem::replace(&mut occupant.entry, Entry::Cancelled) {
            Entry::Pending(callback) => {
                self.pending -= 1;
                Some(callback)
            }
            Entry::Cancelled => None,
        }
    }

    /// Reclaims the arena slot behind a heap entry that was just popped.
    fn reclaim(&mut self, id: EventId) -> Entry {
        let slot = &mut self.slots[id.slot as usize];
        assert_eq!(
            slot.generation, id.generation,
            "heap entry {id} outlived its arena slot"
        );
        let occupant = slot
            .occupant
            .take()
            .filter(|occupant| occupant.sequence == id.sequence);
        let Some(occupant) = occupant else {
            panic!("heap entry {id} does not match its arena slot");
        };
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.slot);
        occupant.entry
    }

    /// Drops cancelled entries sitting at the top of the heap.
    ///
    /// Returns the number of entries discarded.
    fn purge_cancelled(&mut self) -> u64 {
        let mut discarded = 0;
        while let Some(id) = self.heap.peek().map(|queued| queued.0) {
            let cancelled = matches!(
                self.slots[id.slot as usize].occupant,
                Some(Occupant {
                    entry: Entry::Cancelled,
                    ..
                })
            );
            if !cancelled {
                break;
            }
            self.heap.pop();
            self.reclaim(id);
            discarded += 1;
        }
        discarded
    }

    /// Returns the deadline of the earliest pending event.
    ///
    /// Cancelled entries ahead of it are reclaimed along the way; the
    /// number reclaimed is returned alongside.
    pub(crate) fn next_deadline(&mut self) -> (Option<SimTime>, u64) {
        let discarded = self.purge_cancelled();
        (self.heap.peek().map(|queued| queued.0.deadline), discarded)
    }

    /// Removes the earliest pending event, skipping cancelled entries.
    ///
    /// Returns the event and the number of cancelled entries discarded
    /// before it.
    pub(crate) fn pop_pending(&mut self) -> (Option<(EventId, Callback)>, u64) {
        let mut discarded = 0;
        while let Some(QueuedEvent(id)) = self.heap.pop() {
            match self.reclaim(id) {
                Entry::Pending(callback) => {
                    self.pending -= 1;
                    return (Some((id, callback)), discarded);
                }
                Entry::Cancelled => discarded += 1,
            }
        }
        (None, discarded)
    }

    /// Removes every event, invalidating all outstanding handles.
    ///
    /// Pending callbacks are returned so they can be dropped by the caller.
    pub(crate) fn drain(&mut self) -> Vec<Callback> {
        let mut callbacks = Vec::with_capacity(self.pending);
        for QueuedEvent(id) in std::mem::take(&mut self.heap) {
            if let Entry::Pending(callback) = self.reclaim(id) {
                callbacks.push(callback);
            }
        }
        self.pending = 0;
        callbacks
    }

    /// Number of events that are still pending.
    pub(crate) fn pending_len(&self) -> usize {
        self.pending
    }

    /// Number of heap entries, including cancelled ones not yet reclaimed.
    pub(crate) fn queued_len(&self) -> usize {
        self.heap.len()
    }
}

impl fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventQueue")
            .field("pending", &self.pending)
            .field("queued", &self.heap.len())
            .field("slots", &self.slots.len())
            .field("next_sequence", &self.next_sequence)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
