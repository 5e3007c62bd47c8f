//! Synchronous delay ring: per-domain circular buffer of pending trigger
//! firings and FIFO push/pop events, indexed by cycles-ahead.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::trigger::{FifoId, TriggerId};

/// A pending ring event. Kept small (`SmallVec` inline up to 8 bytes,
/// matching the word-size fast path) since most captured values are a
/// single byte.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RingEvent {
    Push(FifoId),
    Pop(FifoId),
    Trigger {
        trigger: TriggerId,
        value: SmallVec<[u8; 8]>,
    },
}

/// Per-domain circular buffer, `depth` slots (a power of two), draining
/// one slot per rising edge.
///
/// Ordering guarantee: for two events scheduled in the same update phase
/// with equal delay, the one scheduled first drains first (each slot is
/// a stable FIFO, i.e. insertion-ordered `Vec`).
#[derive(Debug)]
pub struct SyncRing {
    slots: Vec<Vec<RingEvent>>,
    mask: usize,
    sync_index: usize,
}

impl SyncRing {
    /// `min_depth` is the largest delay (in cycles) any trigger or FIFO
    /// binding in this domain will ever schedule; the ring is sized to
    /// the smallest power of two `>= min_depth + 1` so that a delay of
    /// exactly `min_depth` always has a free slot ahead of `sync_index`.
    pub fn new(min_depth: usize) -> Self {
        let depth = (min_depth + 1).next_power_of_two().max(2);
        Self {
            slots: vec![Vec::new(); depth],
            mask: depth - 1,
            sync_index: 0,
        }
    }

    pub fn depth(&self) -> usize {
        self.slots.len()
    }

    pub fn sync_index(&self) -> usize {
        self.sync_index
    }

    fn slot_for(&self, delay: u8) -> usize {
        (self.sync_index + delay as usize) & self.mask
    }

    pub fn schedule_trigger(&mut self, delay: u8, trigger: TriggerId, value: &[u8]) {
        let slot = self.slot_for(delay);
        self.slots[slot].push(RingEvent::Trigger {
            trigger,
            value: SmallVec::from_slice(value),
        });
    }

    pub fn schedule_push(&mut self, delay: u8, fifo: FifoId) {
        let slot = self.slot_for(delay);
        self.slots[slot].push(RingEvent::Push(fifo));
    }

    pub fn schedule_pop(&mut self, delay: u8, fifo: FifoId) {
        let slot = self.slot_for(delay);
        self.slots[slot].push(RingEvent::Pop(fifo));
    }

    /// Advances `sync_index` by one (called once per rising edge, in
    /// `post_tick`) and drains the slot that is now current, in the
    /// required order: pushes, then pops, then triggers.
    pub fn advance_and_drain(&mut self) -> Vec<RingEvent> {
        self.sync_index = (self.sync_index + 1) & self.mask;
        let slot = std::mem::take(&mut self.slots[self.sync_index]);
        let (mut pushes, mut rest): (Vec<_>, Vec<_>) =
            slot.into_iter().partition(|e| matches!(e, RingEvent::Push(_)));
        let (pops, triggers): (Vec<_>, Vec<_>) =
            rest.drain(..).partition(|e| matches!(e, RingEvent::Pop(_)));
        pushes.extend(pops);
        pushes.extend(triggers);
        pushes
    }

    pub fn occupancy(&self) -> usize {
        self.slots.iter().map(|s| s.len()).sum()
    }

    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            slot.clear();
        }
        self.sync_index = 0;
    }

    /// Used by `archive()`: the full slot contents plus `sync_index`.
    pub fn slots(&self) -> &[Vec<RingEvent>] {
        &self.slots
    }

    pub fn restore(&mut self, slots: Vec<Vec<RingEvent>>, sync_index: usize) {
        assert_eq!(slots.len(), self.slots.len(), "archive ring-depth mismatch");
        self.slots = slots;
        self.sync_index = sync_index & self.mask;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_slot_events_drain_in_scheduled_order() {
        let mut ring = SyncRing::new(4);
        ring.schedule_trigger(1, 0, &[1]);
        ring.schedule_trigger(1, 1, &[2]);
        let drained = ring.advance_and_drain();
        assert_eq!(drained.len(), 2);
        match (&drained[0], &drained[1]) {
            (
                RingEvent::Trigger { trigger: a, .. },
                RingEvent::Trigger { trigger: b, .. },
            ) => {
                assert_eq!(*a, 0);
                assert_eq!(*b, 1);
            }
            _ => panic!("expected two trigger events"),
        }
    }

    #[test]
    fn pushes_drain_before_pops_before_triggers() {
        let mut ring = SyncRing::new(4);
        ring.schedule_trigger(1, 0, &[1]);
        ring.schedule_pop(1, 0);
        ring.schedule_push(1, 0);
        let drained = ring.advance_and_drain();
        assert!(matches!(drained[0], RingEvent::Push(_)));
        assert!(matches!(drained[1], RingEvent::Pop(_)));
        assert!(matches!(drained[2], RingEvent::Trigger { .. }));
    }

    #[test]
    fn ring_depth_is_power_of_two() {
        assert_eq!(SyncRing::new(5).depth(), 8);
        assert_eq!(SyncRing::new(8).depth(), 16);
    }
}
