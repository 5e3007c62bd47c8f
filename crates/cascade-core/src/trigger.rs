//! Trigger table and sticky-trigger set: the flat table of update records
//! and their attached trigger records is the source of truth for "what
//! runs, in what order".
//!
//! Update records live in a `Vec<UpdateRecord>`, each carrying a
//! `(trigger_start, trigger_count)` range into a separate
//! `Vec<TriggerRecord>`, and the sticky set is a `BTreeSet<TriggerId>` so
//! iterating it is always in deterministic id order.

use std::collections::BTreeSet;

use crate::component::ComponentId;
use crate::port::{PortId, PortStorage};

pub type TriggerId = u32;
pub type FifoId = u32;

/// What firing a trigger does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerTarget {
    /// Activates a component so its update record runs this cycle.
    Component(ComponentId),
    /// Re-fires another trigger record.
    Trigger(TriggerId),
    /// Pushes/pops a FIFO slot.
    Fifo(FifoId),
}

/// One trigger record: an entry in `TriggerTable::triggers` pointed to by
/// its owning `UpdateRecord::{trigger_start, trigger_count}`.
#[derive(Debug, Clone)]
pub struct TriggerRecord {
    pub port: PortId,
    pub size: u8,
    /// 1-byte, active-high, non-latch: takes the fast comparison path.
    pub fast: bool,
    pub delay: u8,
    pub active_low: bool,
    pub latch: bool,
    /// Sticky-set membership state for latch triggers (toggled on state
    /// change rather than recomputed, since a latch trigger's condition
    /// is edge-triggered, not level-triggered).
    pub active: bool,
    pub target: TriggerTarget,
}

impl TriggerRecord {
    /// Whether the *initial* assignment of this trigger must go to the
    /// head sentinel rather than the last writer of its port.
    pub fn forces_head_sentinel(&self, port_has_known_writer: bool) -> bool {
        !self.fast && self.size as usize > std::mem::size_of::<u64>()
            || self.delay > 255
            || !port_has_known_writer
    }
}

/// One unit of combinational work; `trigger_start..trigger_start+trigger_count`
/// indexes into the table's shared trigger vector. `component == None` marks
/// the head sentinel (index 0): no component runs, but its triggers are
/// still checked before any combinational update on every cycle.
#[derive(Debug, Clone)]
pub struct UpdateRecord {
    pub component: Option<ComponentId>,
    pub trigger_start: u32,
    pub trigger_count: u32,
}

impl UpdateRecord {
    pub fn is_head_sentinel(&self) -> bool {
        self.component.is_none()
    }
}

/// Read-only-after-init table of update records and trigger records, plus
/// the ordered sticky-trigger set.
#[derive(Debug, Default)]
pub struct TriggerTable {
    pub records: Vec<UpdateRecord>,
    pub triggers: Vec<TriggerRecord>,
    /// Triggers that must be re-evaluated every cycle regardless of
    /// whether their owning component ran, kept in `TriggerId` order for
    /// deterministic iteration.
    pub sticky: BTreeSet<TriggerId>,
    finalized: bool,
}

impl TriggerTable {
    pub fn new() -> Self {
        let mut table = Self::default();
        // Head sentinel: index 0, no component, no triggers yet.
        table.records.push(UpdateRecord {
            component: None,
            trigger_start: 0,
            trigger_count: 0,
        });
        table
    }

    /// Appends a new update record for `component`, owning the following
    /// `triggers`. Returns the record's index.
    pub fn push_record(&mut self, component: ComponentId, triggers: Vec<TriggerRecord>) -> u32 {
        assert!(!self.finalized, "trigger table is read-only after init()");
        let start = self.triggers.len() as u32;
        let count = triggers.len() as u32;
        self.triggers.extend(triggers);
        let idx = self.records.len() as u32;
        self.records.push(UpdateRecord {
            component: Some(component),
            trigger_start: start,
            trigger_count: count,
        });
        idx
    }

    /// Appends triggers directly to the head sentinel (record 0).
    pub fn push_head_triggers(&mut self, triggers: Vec<TriggerRecord>) {
        assert!(!self.finalized, "trigger table is read-only after init()");
        let start = self.triggers.len() as u32;
        let count = triggers.len() as u32;
        self.triggers.extend(triggers);
        let head = &mut self.records[0];
        if head.trigger_count == 0 {
            head.trigger_start = start;
        }
        head.trigger_count += count;
    }

    /// Called once the port graph is resolved: builds the initial sticky
    /// set membership and marks the table read-only.
    pub fn finalize(&mut self) {
        for (id, trig) in self.triggers.iter().enumerate() {
            if trig.latch && trig.active {
                self.sticky.insert(id as TriggerId);
            }
        }
        self.finalized = true;
    }

    pub fn triggers_of(&self, record: &UpdateRecord) -> &[TriggerRecord] {
        let start = record.trigger_start as usize;
        let end = start + record.trigger_count as usize;
        &self.triggers[start..end]
    }

    pub fn trigger_ids_of(&self, record: &UpdateRecord) -> std::ops::Range<u32> {
        record.trigger_start..(record.trigger_start + record.trigger_count)
    }
}

/// The result of evaluating one trigger record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerFire {
    /// Did not fire; no action.
    None,
    /// Fires immediately against `target`.
    Immediate(TriggerTarget),
    /// Fires into the synchronous delay ring `delay` cycles ahead,
    /// carrying the captured value bytes.
    Delayed { delay: u8, target: TriggerTarget },
}

/// Evaluates one trigger's fire condition: fast triggers fire on a
/// non-zero byte; slow triggers compare all `size` bytes to zero (inverted
/// by `active_low`); latch triggers toggle sticky-set membership on state
/// change rather than firing every time the condition holds.
pub fn eval_trigger(
    trig: &mut TriggerRecord,
    id: TriggerId,
    storage: &PortStorage,
    sticky: &mut BTreeSet<TriggerId>,
) -> TriggerFire {
    let port = storage.get(trig.port);
    let value = port.value();

    let condition = if trig.fast {
        value.first().copied().unwrap_or(0) != 0
    } else {
        let nonzero = value.iter().any(|&b| b != 0);
        nonzero ^ trig.active_low
    };

    if trig.latch {
        if condition != trig.active {
            trig.active = condition;
            if condition {
                sticky.insert(id);
            } else {
                sticky.remove(&id);
            }
            return fire_result(trig);
        }
        return TriggerFire::None;
    }

    if condition {
        fire_result(trig)
    } else {
        TriggerFire::None
    }
}

fn fire_result(trig: &TriggerRecord) -> TriggerFire {
    if trig.delay > 0 {
        TriggerFire::Delayed {
            delay: trig.delay,
            target: trig.target,
        }
    } else {
        TriggerFire::Immediate(trig.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{PortDesc, PortKind, PortStorage};
    use test_case::test_case;

    fn storage_with_port(size: u8, value: &[u8]) -> (PortStorage, PortId) {
        let mut storage = PortStorage::new();
        let id = storage.add_port(PortDesc {
            name: "p".to_string(),
            kind: PortKind::Wired,
            size,
            delay: 0,
            shadow: false,
        });
        storage.init_ports();
        storage.get_mut(id).value_mut().copy_from_slice(value);
        (storage, id)
    }

    fn trigger(port: PortId, fast: bool, active_low: bool, latch: bool, delay: u8) -> TriggerRecord {
        TriggerRecord {
            port,
            size: if fast { 1 } else { 2 },
            fast,
            delay,
            active_low,
            latch,
            active: false,
            target: TriggerTarget::Component(0),
        }
    }

    #[test_case(&[0], false, false, false => false; "fast zero byte does not fire")]
    #[test_case(&[1], true, false, false => true; "fast nonzero byte fires")]
    #[test_case(&[0, 0], false, false, false => false; "slow all-zero does not fire")]
    #[test_case(&[0, 1], false, false, false => true; "slow any-nonzero fires")]
    #[test_case(&[0, 0], false, true, false => true; "active-low zero fires")]
    #[test_case(&[0, 1], false, true, false => false; "active-low nonzero does not fire")]
    fn eval_trigger_fast_and_slow_paths(value: &[u8], fast: bool, active_low: bool, latch: bool) -> bool {
        let (storage, port) = storage_with_port(value.len() as u8, value);
        let mut trig = trigger(port, fast, active_low, latch, 0);
        let mut sticky = BTreeSet::new();
        !matches!(eval_trigger(&mut trig, 0, &storage, &mut sticky), TriggerFire::None)
    }

    #[test]
    fn delayed_trigger_schedules_instead_of_firing_immediately() {
        let (storage, port) = storage_with_port(1, &[1]);
        let mut trig = trigger(port, true, false, false, 3);
        let mut sticky = BTreeSet::new();
        match eval_trigger(&mut trig, 0, &storage, &mut sticky) {
            TriggerFire::Delayed { delay, .. } => assert_eq!(delay, 3),
            other => panic!("expected a delayed fire, got {other:?}"),
        }
    }

    #[test]
    fn latch_trigger_fires_once_per_transition_and_toggles_sticky_membership() {
        let (mut storage, port) = storage_with_port(1, &[0]);
        let mut trig = trigger(port, false, false, true, 0);
        let mut sticky = BTreeSet::new();

        // Steady at zero: no transition, no fire.
        assert!(matches!(eval_trigger(&mut trig, 7, &storage, &mut sticky), TriggerFire::None));
        assert!(!sticky.contains(&7));

        // Transition to non-zero: fires once, joins the sticky set.
        storage.get_mut(port).value_mut()[0] = 1;
        assert!(!matches!(eval_trigger(&mut trig, 7, &storage, &mut sticky), TriggerFire::None));
        assert!(sticky.contains(&7));

        // Holding non-zero: does not fire again.
        assert!(matches!(eval_trigger(&mut trig, 7, &storage, &mut sticky), TriggerFire::None));
        assert!(sticky.contains(&7));

        // Transition back to zero: fires again and leaves the sticky set.
        storage.get_mut(port).value_mut()[0] = 0;
        assert!(!matches!(eval_trigger(&mut trig, 7, &storage, &mut sticky), TriggerFire::None));
        assert!(!sticky.contains(&7));
    }

    #[test]
    fn trigger_table_assigns_head_sentinel_and_component_records_separately() {
        let mut table = TriggerTable::new();
        assert_eq!(table.records.len(), 1);
        assert!(table.records[0].is_head_sentinel());

        table.push_head_triggers(vec![trigger(0, true, false, false, 0)]);
        let idx = table.push_record(1, vec![trigger(1, true, false, false, 0)]);
        table.finalize();

        assert_eq!(table.triggers_of(&table.records[0]).len(), 1);
        assert_eq!(table.triggers_of(&table.records[idx as usize]).len(), 1);
        assert!(!table.records[idx as usize].is_head_sentinel());
    }
}
