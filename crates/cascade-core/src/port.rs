//! Port storage: owns all inter-component signal memory, manages
//! per-cycle copy/invalidation and delay lines.

use std::collections::VecDeque;

use crate::HashMap;

pub type PortId = u32;

/// How a port is connected, relevant to trigger-assignment and ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    /// Plain wire; writes are visible immediately within the same update
    /// ordering.
    Wired,
    /// Registered between domains or between phases; has a `delay` in
    /// source-domain cycles.
    Synchronous,
    /// Cross-domain slow path; always bound to the head-sentinel trigger.
    SlowQ,
    /// Cross-domain patched path; always bound to the head-sentinel trigger.
    Patched,
    /// FIFO push/pop target.
    Fifo,
    /// Retains its last written value across cycles that have no writer.
    Latch,
    /// Reads zero in every cycle where no writer fired this cycle.
    Pulse,
}

/// A port description supplied by a component before `init_ports`.
#[derive(Debug, Clone)]
pub struct PortDesc {
    pub name: String,
    pub kind: PortKind,
    /// Byte width of the port's value. Must be `<= 8` (word size) for the
    /// fast trigger-evaluation path; larger widths fall back to the slow
    /// path and are bound to the head sentinel.
    pub size: u8,
    /// Cycles of delay for `Synchronous` ports. `0..=255` for the fast
    /// path; values above 255 are bound to the head sentinel.
    pub delay: u8,
    /// Explicit flag for intra-domain synchronous paths with `delay == 0`:
    /// a `shadow` port always keeps its one-cycle history available even
    /// at `delay == 0`, rather than synthesizing a fake register only when
    /// one turns out to be needed.
    pub shadow: bool,
}

impl PortDesc {
    pub fn fast_path(&self) -> bool {
        self.size as usize <= std::mem::size_of::<u64>() && self.delay <= 255
    }
}

/// One port's live storage: a small ring of byte frames, one per delay
/// step needed (`delay + 1`, or `+2` if `shadow` is requested at
/// `delay == 0`).
#[derive(Debug, Clone)]
pub struct Port {
    pub id: PortId,
    pub desc: PortDesc,
    frames: Vec<Vec<u8>>,
    /// Backing queue for `Fifo`-kind ports; unused (and always empty) for
    /// every other kind.
    fifo: VecDeque<Vec<u8>>,
}

impl Port {
    fn new(id: PortId, desc: PortDesc) -> Self {
        let frame_count = if desc.shadow {
            desc.delay as usize + 2
        } else {
            desc.delay as usize + 1
        };
        let frames = vec![vec![0u8; desc.size as usize]; frame_count.max(1)];
        Self {
            id,
            desc,
            frames,
            fifo: VecDeque::new(),
        }
    }

    /// The active (current) frame, read by combinational consumers.
    pub fn value(&self) -> &[u8] {
        &self.frames[0]
    }

    /// Mutable access to the active frame. Pulse ports are zeroed
    /// unconditionally at the start of the next cycle's `post_tick`
    /// regardless of whether this was called, so no per-cycle write
    /// bookkeeping is needed here; Latch ports simply keep whatever was
    /// last written until overwritten again.
    pub fn value_mut(&mut self) -> &mut [u8] {
        &mut self.frames[0]
    }

    /// A shadow frame `delay` cycles old; used by synchronous readers.
    pub fn shadow(&self, delay: u8) -> &[u8] {
        let idx = (delay as usize).min(self.frames.len() - 1);
        &self.frames[idx]
    }

    /// All delay frames, oldest-last. Used by `archive()` to serialize the
    /// port's full delay history.
    pub fn frames(&self) -> &[Vec<u8>] {
        &self.frames
    }

    /// Restores every delay frame from a checkpoint; `frames` must match
    /// this port's frame count exactly (the schema is fixed at `init()`).
    pub fn restore_frames(&mut self, frames: Vec<Vec<u8>>) {
        assert_eq!(frames.len(), self.frames.len(), "archive frame-count mismatch");
        self.frames = frames;
    }

    /// Rotates the delay frames: the current frame becomes the `1`-cycle
    /// shadow, oldest frame is dropped. Called from `pre_tick` before a
    /// rising edge if this port has any delay frames.
    fn rotate(&mut self) {
        if self.frames.len() > 1 {
            let last = self.frames.len() - 1;
            for i in (1..=last).rev() {
                self.frames.swap(i, i - 1);
            }
        }
    }
}

/// Owns the raw byte region for every non-wired port in one domain, plus
/// delay lines and the deterministic owner lookup used for cross-domain
/// sanity checks.
#[derive(Debug, Default)]
pub struct PortStorage {
    ports: Vec<Port>,
    by_name: HashMap<String, PortId>,
    initialized: bool,
}

impl PortStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a port description before `init_ports`.
    pub fn add_port(&mut self, desc: PortDesc) -> PortId {
        assert!(!self.initialized, "add_port called after init_ports");
        let id = self.ports.len() as PortId;
        self.by_name.insert(desc.name.clone(), id);
        self.ports.push(Port::new(id, desc));
        id
    }

    /// Lays out port bytes and wires each port's value frames. Frames are
    /// allocated eagerly in `add_port`, so this mainly marks storage as
    /// closed for further registration and is the hook point a richer
    /// layout strategy (packed byte region, delay_offset table) would use.
    pub fn init_ports(&mut self) {
        self.initialized = true;
    }

    pub fn get(&self, id: PortId) -> &Port {
        &self.ports[id as usize]
    }

    pub fn get_mut(&mut self, id: PortId) -> &mut Port {
        &mut self.ports[id as usize]
    }

    pub fn by_name(&self, name: &str) -> Option<PortId> {
        self.by_name.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Port> {
        self.ports.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Port> {
        self.ports.iter_mut()
    }

    /// `is_owner`: addresses-in-region test, used only for diagnostics.
    /// Since each domain owns a disjoint `PortStorage`, this degrades to a
    /// bounds check against the local port-id range.
    pub fn is_owner(&self, id: PortId) -> bool {
        (id as usize) < self.ports.len()
    }

    /// Name of a port for diagnostics, falling back to its numeric id if
    /// it isn't a valid reference (the caller is usually about to report
    /// that very fact).
    pub fn name_of(&self, id: PortId) -> String {
        self.ports
            .get(id as usize)
            .map(|p| p.desc.name.clone())
            .unwrap_or_else(|| format!("#{id}"))
    }

    /// Rotates delay frames ahead of a rising edge.
    pub fn pre_tick(&mut self, rising: bool) {
        if rising {
            for port in &mut self.ports {
                if matches!(port.desc.kind, PortKind::Synchronous) {
                    port.rotate();
                }
            }
        }
    }

    /// Latches registered outputs (captures Q-side of flip-flops). Kept
    /// as a distinct phase from `pre_tick`/`post_tick` even though the
    /// actual write happens through `value_mut` during the update phase.
    pub fn tick(&mut self, _rising: bool) {}

    /// Invalidates N-ports and zeroes Pulse ports.
    pub fn post_tick(&mut self) {
        for port in &mut self.ports {
            if matches!(port.desc.kind, PortKind::Pulse) {
                port.frames[0].fill(0);
            }
        }
    }

    /// Pushes a `Fifo`-kind port's current value onto its queue.
    pub fn fifo_push(&mut self, id: PortId) {
        let bytes = self.get(id).value().to_vec();
        self.get_mut(id).fifo.push_back(bytes);
    }

    /// Pops the oldest queued value into the port's active frame, making it
    /// visible to readers of `value()`. Returns `false` (leaving the frame
    /// untouched) if the queue was empty.
    pub fn fifo_pop(&mut self, id: PortId) -> bool {
        match self.get_mut(id).fifo.pop_front() {
            Some(bytes) => {
                self.get_mut(id).value_mut().copy_from_slice(&bytes);
                true
            }
            None => false,
        }
    }

    pub fn fifo_len(&self, id: PortId) -> usize {
        self.get(id).fifo.len()
    }

    /// Zeroes every frame of every port (spec: "Reset zeroes all frames").
    pub fn reset(&mut self) {
        for port in &mut self.ports {
            for frame in &mut port.frames {
                frame.fill(0);
            }
        }
    }

    /// Resolves cross-domain synchronous reads to their shadow frames.
    /// A no-op placeholder in this architecture: cross-domain ports are
    /// modeled as SlowQ/Patched and routed through the head-sentinel
    /// trigger rather than a resolved shadow pointer.
    pub fn finalize_copies(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(name: &str, kind: PortKind, size: u8, delay: u8) -> PortDesc {
        PortDesc {
            name: name.to_string(),
            kind,
            size,
            delay,
            shadow: false,
        }
    }

    #[test]
    fn pulse_port_reads_zero_without_a_writer() {
        let mut storage = PortStorage::new();
        let p = storage.add_port(desc("strobe", PortKind::Pulse, 1, 0));
        storage.init_ports();
        storage.get_mut(p).value_mut()[0] = 1;
        storage.post_tick();
        assert_eq!(storage.get(p).value(), &[0]);
    }

    #[test]
    fn synchronous_delay_shadow_lags_by_one_cycle() {
        let mut storage = PortStorage::new();
        let p = storage.add_port(desc("q", PortKind::Synchronous, 1, 1));
        storage.init_ports();

        storage.get_mut(p).value_mut()[0] = 0x5A;
        assert_eq!(storage.get(p).shadow(1), &[0]);

        storage.pre_tick(true);
        assert_eq!(storage.get(p).shadow(1), &[0x5A]);
    }

    #[test]
    fn fifo_pop_surfaces_values_in_push_order_and_reports_empty() {
        let mut storage = PortStorage::new();
        let p = storage.add_port(desc("q", PortKind::Fifo, 1, 0));
        storage.init_ports();

        storage.get_mut(p).value_mut()[0] = 0xAA;
        storage.fifo_push(p);
        storage.get_mut(p).value_mut()[0] = 0xBB;
        storage.fifo_push(p);
        assert_eq!(storage.fifo_len(p), 2);

        assert!(storage.fifo_pop(p));
        assert_eq!(storage.get(p).value(), &[0xAA]);
        assert!(storage.fifo_pop(p));
        assert_eq!(storage.get(p).value(), &[0xBB]);
        assert!(!storage.fifo_pop(p));
    }

    proptest::proptest! {
        /// Writing `n` values one per cycle, rotating the delay frames in
        /// between, always leaves the oldest write visible `n - 1` cycles
        /// later in the `n - 1` shadow frame, regardless of what the values
        /// are.
        #[test]
        fn shadow_frame_surfaces_the_first_write_after_n_minus_one_rotations(
            values in proptest::collection::vec(proptest::prelude::any::<u8>(), 1..6),
        ) {
            let delay = (values.len() - 1) as u8;
            let mut storage = PortStorage::new();
            let p = storage.add_port(desc("q", PortKind::Synchronous, 1, delay));
            storage.init_ports();

            for (i, &v) in values.iter().enumerate() {
                storage.get_mut(p).value_mut()[0] = v;
                if i + 1 < values.len() {
                    storage.pre_tick(true);
                }
            }

            proptest::prop_assert_eq!(storage.get(p).shadow(delay)[0], values[0]);
        }
    }
}
