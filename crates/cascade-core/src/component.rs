//! The component collaborator contract and the opaque context passed to
//! every `tick`/`update` call.
//!
//! Component identity (which domain, which update record, what edge) is
//! passed explicitly as an `UpdateCtx` reference rather than through
//! thread-local globals, so components stay free of any dependency on
//! which thread happens to be running them.

use crate::clock::DomainId;
use crate::port::PortStorage;

pub type ComponentId = u32;

/// Per-call context handed to `Component::tick`/`Component::update`.
#[derive(Debug, Clone, Copy)]
pub struct UpdateCtx {
    pub domain: DomainId,
    /// Index of the update record currently running (0 is always the
    /// head sentinel and never reaches component code).
    pub record: u32,
    pub num_ticks: u64,
    pub num_edges: u64,
    pub rising: bool,
}

/// The component collaborator contract.
///
/// Implementors register an ordered list of update functions with their
/// read/write port sets via [`crate::trigger::TriggerTable`], a
/// zero-or-one `tick` hook, and any Verilog clock ports, through whatever
/// construction API the embedding crate provides; `Component` itself only
/// describes the per-cycle callbacks the scheduler invokes.
pub trait Component: std::fmt::Debug + Send {
    /// Invoked during phase 2 if this component is registered as tickable
    /// and `is_active()` is true. `ports` is the owning domain's port
    /// storage, the same explicit-argument replacement for thread-local
    /// state `update` below uses.
    fn tick(&mut self, _ctx: &UpdateCtx, _ports: &mut PortStorage) {}

    /// Invoked during phase 4 for each update record this component owns.
    /// `ports` gives direct access to this domain's port byte storage,
    /// since a `Component` cannot hold its own `&mut` into storage the
    /// domain also owns.
    fn update(&mut self, ctx: &UpdateCtx, ports: &mut PortStorage);

    /// Inactive components skip `update()` (their sticky-trigger range is
    /// still evaluated) and skip `tick()`.
    fn is_active(&self) -> bool {
        true
    }

    fn activate(&mut self) {}
    fn deactivate(&mut self) {}
}
