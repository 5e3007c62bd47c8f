//! Clock-domain state machine: one domain per unique clock source,
//! modeling the five-phase cycle plus generated (divided) and manual
//! (externally ticked) clocks.

use std::collections::BTreeSet;

use crate::clock::{ClockId, DomainId, GeneratorParams};
use crate::component::{Component, ComponentId, UpdateCtx};
use crate::delay_ring::{RingEvent, SyncRing};
use crate::error::ConfigError;
use crate::event_queue::EventQueue;
use crate::port::{PortId, PortStorage};
use crate::trigger::{self, TriggerFire, TriggerTable, TriggerTarget};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainState {
    None,
    Construct,
    Initializing,
    Initialized,
    Running,
    Resetting,
}

/// One domain per unique clock source.
pub struct ClockDomain {
    pub id: DomainId,
    pub clock: ClockId,
    pub name: String,
    /// Period in ps; `0` iff manual.
    pub period: u64,
    /// Offset in ps, signed.
    pub clock_offset: i64,
    /// Rising-edge count.
    pub num_ticks: u64,
    /// Rising+falling edge count.
    pub num_edges: u64,
    pub prev_tick: i64,
    pub prev_index: u64,
    pub next_edge: i64,
    pub generator: Option<DomainId>,
    pub generator_params: Option<GeneratorParams>,
    pub manual: bool,
    pub disabled: bool,
    pub state: DomainState,

    pub ports: PortStorage,
    pub triggers: TriggerTable,
    pub ring: SyncRing,
    pub events: EventQueue,
    pub components: Vec<Box<dyn Component>>,
    pub tickable: Vec<ComponentId>,
}

impl std::fmt::Debug for ClockDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClockDomain")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("period", &self.period)
            .field("next_edge", &self.next_edge)
            .field("num_ticks", &self.num_ticks)
            .field("state", &self.state)
            .finish()
    }
}

impl ClockDomain {
    pub fn new(id: DomainId, clock: ClockId, name: String, ring_depth_hint: usize) -> Self {
        Self {
            id,
            clock,
            name,
            period: 0,
            clock_offset: 0,
            num_ticks: 0,
            num_edges: 0,
            prev_tick: 0,
            prev_index: 0,
            next_edge: 0,
            generator: None,
            generator_params: None,
            manual: false,
            disabled: false,
            state: DomainState::Construct,
            ports: PortStorage::new(),
            triggers: TriggerTable::new(),
            ring: SyncRing::new(ring_depth_hint),
            events: EventQueue::new(),
            components: Vec::new(),
            tickable: Vec::new(),
        }
    }

    pub fn register_component(&mut self, component: Box<dyn Component>, tickable: bool) -> ComponentId {
        let id = self.components.len() as ComponentId;
        self.components.push(component);
        if tickable {
            self.tickable.push(id);
        }
        id
    }

    /// Whether `num_edges` (before this edge completes) parks the *next*
    /// edge on the rising phase. Rising edges are even-indexed.
    pub fn next_edge_is_rising(&self) -> bool {
        self.num_edges % 2 == 0
    }

    /// `init()`: clock identity/period resolution already happened when
    /// the caller set `period`/`clock_offset`/`generator` (via
    /// `ClockRegistry`, before this domain was registered with the
    /// scheduler); this validates that resolution, then finalizes the
    /// port and trigger tables built up incrementally via
    /// `ports`/`triggers`/`ring`.
    pub fn init(&mut self) -> Result<(), ConfigError> {
        if self.period == 0 && !self.manual && !self.disabled {
            return Err(ConfigError::ZeroPeriod(self.name.clone()));
        }
        for trig in &self.triggers.triggers {
            if !self.ports.is_owner(trig.port) {
                return Err(ConfigError::UnknownPort(self.ports.name_of(trig.port)));
            }
        }

        self.ports.init_ports();
        self.ports.finalize_copies();
        self.triggers.finalize();
        self.state = DomainState::Initialized;
        Ok(())
    }

    /// `reset(is_reset)`: clears rings and events, rebuilds the sticky
    /// set, and for each sync trigger whose current value meets its
    /// active condition, pre-seeds ring slots at every delay offset so
    /// that state held before reset is still observed on the first few
    /// cycles afterward.
    pub fn reset(&mut self, is_reset: bool) {
        self.state = DomainState::Resetting;
        self.ring.clear();
        self.events.clear();

        if is_reset {
            // Evaluate "currently satisfied" against the state held before
            // this reset zeroes it, so that state is still observed on the
            // first few cycles after the reset.
            let sticky = &mut self.triggers.sticky;
            let depth = self.ring.depth();
            for (id, trig) in self.triggers.triggers.iter().enumerate() {
                let value = self.ports.get(trig.port).value();
                let condition = if trig.fast {
                    value.first().copied().unwrap_or(0) != 0
                } else {
                    value.iter().any(|&b| b != 0) ^ trig.active_low
                };
                if condition && trig.delay > 0 {
                    let value = value.to_vec();
                    for d in 1..=(trig.delay as usize).min(depth - 1) {
                        self.ring.schedule_trigger(d as u8, id as u32, &value);
                    }
                }
                if condition && trig.latch {
                    sticky.insert(id as u32);
                }
            }
            self.ports.reset();
        } else {
            self.ports.reset();
            self.triggers.sticky.clear();
            for (id, trig) in self.triggers.triggers.iter().enumerate() {
                if trig.latch && trig.active {
                    self.triggers.sticky.insert(id as u32);
                }
            }
        }
        self.state = DomainState::Running;
    }

    // ---- the five-phase cycle ----

    /// Phase 1: if about to take a rising edge, rotate delay frames.
    /// `rising` is computed once by the caller (before `num_edges` is
    /// incremented for this edge) and threaded through every phase; this
    /// must not recompute it from `num_edges`, which has already moved on
    /// to the next edge by the time `pre_tick` runs.
    pub fn pre_tick(&mut self, rising: bool) {
        self.ports.pre_tick(rising);
    }

    /// Phase 2: on rising edge, invoke each tickable component's `tick()`.
    pub fn tick_phase(&mut self, ctx: UpdateCtx) {
        if !ctx.rising {
            return;
        }
        for &cid in &self.tickable {
            let component = &mut self.components[cid as usize];
            if component.is_active() {
                component.tick(&ctx, &mut self.ports);
            }
        }
        self.ports.tick(ctx.rising);
    }

    /// Phase 3: invalidate N-ports, zero Pulse ports; on a rising edge,
    /// advance the ring index and drain the new slot (the ring only
    /// advances on rising edges).
    pub fn post_tick(&mut self, rising: bool) -> Vec<RingEvent> {
        self.ports.post_tick();
        if rising {
            self.ring.advance_and_drain()
        } else {
            Vec::new()
        }
    }

    /// Phase 4: on rising edge only. Fires events scheduled for
    /// `num_ticks`, then walks the trigger table in record order, applying
    /// each record's triggers as soon as it is evaluated rather than after
    /// the whole table has been walked. A trigger firing at record `i` can
    /// therefore activate a component at record `j > i` in time for that
    /// later record's own pass through this same loop (records are kept in
    /// topological order, so a trigger's target component record index is
    /// always greater than the record the trigger is attached to) — this
    /// same-cycle propagation through a chain of combinational stages is
    /// what the whole scheduler is built around.
    pub fn update_phase(&mut self, ctx: UpdateCtx) {
        if !ctx.rising {
            return;
        }
        self.events.fire_tick(self.num_ticks);

        let record_count = self.triggers.records.len();
        for record_idx in 0..record_count {
            let active = self
                .triggers
                .records
                .get(record_idx)
                .and_then(|r| r.component)
                .map(|cid| self.components[cid as usize].is_active())
                .unwrap_or(true);

            let ids: Vec<u32> = {
                let record = &self.triggers.records[record_idx];
                if active {
                    self.triggers.trigger_ids_of(record).collect()
                } else {
                    // inactive components still get their sticky range
                    // evaluated.
                    self.triggers
                        .trigger_ids_of(record)
                        .filter(|id| self.triggers.sticky.contains(id))
                        .collect()
                }
            };

            if active {
                if let Some(cid) = self.triggers.records[record_idx].component {
                    let mut comp_ctx = ctx;
                    comp_ctx.record = record_idx as u32;
                    self.components[cid as usize].update(&comp_ctx, &mut self.ports);
                }
            }

            for id in ids {
                let trig = &mut self.triggers.triggers[id as usize];
                let fire = trigger::eval_trigger(trig, id, &self.ports, &mut self.triggers.sticky);
                match fire {
                    TriggerFire::Immediate(target) => self.apply_targets(vec![target]),
                    TriggerFire::Delayed { delay, target } => {
                        // The ring's `trigger` field is repurposed to carry
                        // an encoded `TriggerTarget` rather than a
                        // `TriggerId`: eval_trigger already decided to
                        // fire, so draining the ring only needs to know
                        // what to activate `delay` cycles from now, not
                        // re-run the condition.
                        let value: Vec<u8> = self.ports.get(trig.port).value().to_vec();
                        let target_id = encode_target(target);
                        self.ring.schedule_trigger(delay, target_id, &value);
                    }
                    TriggerFire::None => {}
                }
            }
        }
    }

    /// Phase 5 is driven by the scheduler, which owns the
    /// [`crate::vcd::VcdWriter`] and has direct access to every domain's
    /// port storage; `ClockDomain` itself holds no VCD reference and
    /// treats waveform dumping as an external collaborator's concern.

    /// Applies ring events drained by `post_tick` (pushes, pops, and
    /// delayed trigger firings whose delay has just elapsed), in the order
    /// `advance_and_drain` already guarantees: pushes, then pops, then
    /// triggers. Push/Pop events act directly on the FIFO's backing queue
    /// here rather than round-tripping through `apply_targets`, so the
    /// queue is mutated before any trigger this drain also fires gets a
    /// chance to observe it.
    pub fn apply_ring_events(&mut self, events: Vec<RingEvent>) {
        let mut targets = Vec::new();
        for event in events {
            match event {
                RingEvent::Trigger { trigger, .. } => targets.push(decode_target(trigger)),
                RingEvent::Push(fifo) => self.ports.fifo_push(fifo),
                RingEvent::Pop(fifo) => {
                    self.ports.fifo_pop(fifo);
                }
            }
        }
        self.apply_targets(targets);
    }

    /// Applies the targets a trigger firing (immediate or delay-elapsed)
    /// points at: activates a component, re-fires another trigger record
    /// directly (inactive-component triggers may still retarget a sticky
    /// trigger elsewhere), or runs a FIFO push/pop.
    pub fn apply_targets(&mut self, targets: Vec<TriggerTarget>) {
        for target in targets {
            match target {
                TriggerTarget::Component(cid) => {
                    if let Some(component) = self.components.get_mut(cid as usize) {
                        component.activate();
                    }
                }
                TriggerTarget::Trigger(tid) => {
                    if let Some(trig) = self.triggers.triggers.get_mut(tid as usize) {
                        let fire = trigger::eval_trigger(trig, tid, &self.ports, &mut self.triggers.sticky);
                        match fire {
                            TriggerFire::Immediate(t) => self.apply_targets(vec![t]),
                            TriggerFire::Delayed { delay, target } => {
                                let value: Vec<u8> = self.ports.get(trig.port).value().to_vec();
                                let target_id = encode_target(target);
                                self.ring.schedule_trigger(delay, target_id, &value);
                            }
                            TriggerFire::None => {}
                        }
                    }
                }
                TriggerTarget::Fifo(fifo) => {
                    // An i-trigger targeting a FIFO directly (as opposed to
                    // a ring-native Push/Pop drained by apply_ring_events)
                    // pushes the current value and immediately pops it
                    // back out, so it's observed this same cycle instead
                    // of sitting queued.
                    self.ports.fifo_push(fifo);
                    self.ports.fifo_pop(fifo);
                }
            }
        }
    }

    /// Schedules a FIFO push `delay` cycles ahead. The component-construction
    /// code that wires a FIFO port's producer side into this domain calls
    /// this directly, the same way trigger records are built up through
    /// `triggers` before `init()`.
    pub fn schedule_fifo_push(&mut self, port: PortId, delay: u8) {
        self.ring.schedule_push(delay, port);
    }

    /// Schedules a FIFO pop `delay` cycles ahead.
    pub fn schedule_fifo_pop(&mut self, port: PortId, delay: u8) {
        self.ring.schedule_pop(delay, port);
    }

    /// `compatible`: the rounded-gcd same-tick test used to group domains
    /// sharing `next_edge` into one scheduler bucket.
    pub fn compatible(&self, other: &ClockDomain, rounding: i64) -> bool {
        (self.next_edge - other.next_edge).abs() <= rounding
    }

    pub fn sticky_ids(&self) -> &BTreeSet<u32> {
        &self.triggers.sticky
    }
}

/// Packs a `TriggerTarget` into the `u32` id space the delay ring stores
/// (the ring only needs an opaque id to replay on drain; the scheduler
/// resolves it back via `decode_target`).
pub fn encode_target(target: TriggerTarget) -> u32 {
    match target {
        TriggerTarget::Component(id) => id << 2,
        TriggerTarget::Trigger(id) => (id << 2) | 1,
        TriggerTarget::Fifo(id) => (id << 2) | 2,
    }
}

pub fn decode_target(encoded: u32) -> TriggerTarget {
    match encoded & 0b11 {
        1 => TriggerTarget::Trigger(encoded >> 2),
        2 => TriggerTarget::Fifo(encoded >> 2),
        _ => TriggerTarget::Component(encoded >> 2),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{PortDesc, PortKind};
    use crate::trigger::TriggerRecord;

    #[test]
    fn target_encoding_round_trips_through_all_three_variants() {
        for target in [
            TriggerTarget::Component(5),
            TriggerTarget::Trigger(9),
            TriggerTarget::Fifo(3),
        ] {
            assert_eq!(decode_target(encode_target(target)), target);
        }
    }

    #[test]
    fn reset_preseeds_the_ring_for_a_trigger_already_satisfied_before_reset() {
        let mut domain = ClockDomain::new(0, 0, "d".to_string(), 4);
        domain.manual = true;
        let port = domain.ports.add_port(PortDesc {
            name: "p".to_string(),
            kind: PortKind::Synchronous,
            size: 1,
            delay: 2,
            shadow: false,
        });
        domain.ports.init_ports();
        domain.ports.get_mut(port).value_mut()[0] = 1;
        domain.triggers.push_head_triggers(vec![TriggerRecord {
            port,
            size: 1,
            fast: true,
            delay: 2,
            active_low: false,
            latch: false,
            active: false,
            target: TriggerTarget::Component(0),
        }]);
        domain.init().unwrap();

        domain.reset(true);
        assert!(domain.ring.occupancy() > 0, "a satisfied trigger must pre-seed the ring on reset");
    }

    #[test]
    fn reset_without_is_reset_clears_the_ring_and_rebuilds_sticky_from_latch_state() {
        let mut domain = ClockDomain::new(0, 0, "d".to_string(), 4);
        domain.manual = true;
        domain.init().unwrap();
        domain.reset(false);
        assert_eq!(domain.ring.occupancy(), 0);
        assert!(domain.sticky_ids().is_empty());
    }
}
