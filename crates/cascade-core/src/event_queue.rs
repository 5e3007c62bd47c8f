//! Event queue: per-domain priority multimap of future discrete events,
//! keyed by tick count.

use std::collections::BTreeMap;

/// An opaque, owning scheduled event. `equals` backs the dedup-on-reset
/// rule: during `Resetting`, `schedule_event` skips inserting a duplicate
/// of an event already pending at the same tick. `archive_key`/
/// `archive_bytes` back the checkpoint format's (key, value) pair through
/// a trait-object factory; see [`crate::checkpoint::EventFactory`].
pub trait Event: std::fmt::Debug + std::any::Any + Send {
    fn fire(&mut self);
    fn equals(&self, other: &dyn Event) -> bool;
    fn as_any(&self) -> &dyn std::any::Any;
    fn archive_key(&self) -> &'static str;
    fn archive_bytes(&self) -> Vec<u8>;
}

/// `BTreeMap<tick, Vec<Event>>`-equivalent with insertion order preserved
/// within a tick.
#[derive(Default)]
pub struct EventQueue {
    events: BTreeMap<u64, Vec<Box<dyn Event>>>,
}

impl std::fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventQueue")
            .field("pending_ticks", &self.events.len())
            .finish()
    }
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `event` to fire at `tick`. When `dedup` is set (i.e. while
    /// the domain is `Resetting`), skips the insert if an event that
    /// `equals` it is already pending at that tick.
    pub fn schedule(&mut self, tick: u64, event: Box<dyn Event>, dedup: bool) {
        let bucket = self.events.entry(tick).or_default();
        if dedup && bucket.iter().any(|existing| existing.equals(event.as_ref())) {
            return;
        }
        bucket.push(event);
    }

    pub fn next_tick(&self) -> Option<u64> {
        self.events.keys().next().copied()
    }

    /// Drains and fires every event scheduled for `tick`, in insertion
    /// order, and returns how many fired. Called at the top of `update()`
    /// before any combinational update runs.
    pub fn fire_tick(&mut self, tick: u64) -> usize {
        if let Some(mut bucket) = self.events.remove(&tick) {
            let n = bucket.len();
            for event in &mut bucket {
                event.fire();
            }
            n
        } else {
            0
        }
    }

    /// Exports every pending event as `(tick, key, bytes)` triples, in
    /// tick then insertion order, for the checkpoint writer.
    pub fn export(&self) -> Vec<(u64, String, Vec<u8>)> {
        let mut out = Vec::new();
        for (&tick, bucket) in &self.events {
            for event in bucket {
                out.push((tick, event.archive_key().to_string(), event.archive_bytes()));
            }
        }
        out
    }

    /// Rebuilds the queue from a checkpoint's exported triples, using
    /// `factory` to reconstruct each concrete event type. An unknown key
    /// aborts the load: a version or checksum mismatch at load time is
    /// always fatal, never silently skipped.
    pub fn import(
        &mut self,
        entries: Vec<(u64, String, Vec<u8>)>,
        factory: &crate::checkpoint::EventFactory,
    ) -> Result<(), crate::error::ArchiveError> {
        self.events.clear();
        for (tick, key, bytes) in entries {
            let event = factory.load(&key, &bytes)?;
            self.events.entry(tick).or_default().push(event);
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct CountingEvent {
        tag: u32,
        fired: Arc<AtomicU32>,
    }

    impl Event for CountingEvent {
        fn fire(&mut self) {
            self.fired.fetch_add(1, Ordering::SeqCst);
        }
        fn equals(&self, other: &dyn Event) -> bool {
            other
                .as_any()
                .downcast_ref::<CountingEvent>()
                .map(|o| o.tag == self.tag)
                .unwrap_or(false)
        }
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
        fn archive_key(&self) -> &'static str {
            "test.counting_event"
        }
        fn archive_bytes(&self) -> Vec<u8> {
            self.tag.to_le_bytes().to_vec()
        }
    }

    #[test]
    fn duplicate_events_are_deduped_during_reset() {
        let fired = Arc::new(AtomicU32::new(0));
        let mut q = EventQueue::new();
        q.schedule(
            5,
            Box::new(CountingEvent {
                tag: 1,
                fired: fired.clone(),
            }),
            true,
        );
        q.schedule(
            5,
            Box::new(CountingEvent {
                tag: 1,
                fired: fired.clone(),
            }),
            true,
        );
        assert_eq!(q.fire_tick(5), 1);
    }

    #[test]
    fn events_fire_in_insertion_order_within_a_tick() {
        let fired = Arc::new(AtomicU32::new(0));
        let mut q = EventQueue::new();
        q.schedule(
            10,
            Box::new(CountingEvent {
                tag: 1,
                fired: fired.clone(),
            }),
            false,
        );
        q.schedule(
            10,
            Box::new(CountingEvent {
                tag: 2,
                fired: fired.clone(),
            }),
            false,
        );
        assert_eq!(q.fire_tick(10), 2);
        assert_eq!(fired.load(Ordering::SeqCst), 2);
        assert!(q.is_empty());
    }
}
