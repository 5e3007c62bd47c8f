//! Cascade: a cycle-accurate, multi-clock hardware-style simulation core.
//!
//! The crate is organized around the components of the scheduling model:
//! port storage (`port`), the trigger table and sticky set (`trigger`),
//! the synchronous delay ring (`delay_ring`), the per-domain event queue
//! (`event_queue`), clock identity and ratio resolution (`clock`), the
//! clock-domain state machine and five-phase cycle (`domain`), the global
//! scheduler (`scheduler`), and the thread pool (`threadpool`).
//! `checkpoint` and `vcd` are the archive and waveform collaborators;
//! `config` is the runtime parameter surface; `simulation` is the public
//! entry point tying all of it together.

pub(crate) use fxhash::FxHashMap as HashMap;
#[allow(unused_imports)]
pub(crate) use fxhash::FxHashSet as HashSet;

pub mod checkpoint;
pub mod clock;
pub mod component;
pub mod config;
pub mod delay_ring;
pub mod domain;
pub mod error;
pub mod event_queue;
mod port;
pub mod scheduler;
mod simulation;
mod threadpool;
mod trigger;
pub mod vcd;

pub use checkpoint::EventFactory;
pub use clock::{Clock, ClockId, ClockKind, ClockRegistry, DomainId, GeneratorParams};
pub use component::{Component, ComponentId, UpdateCtx};
pub use config::RuntimeParameters;
pub use domain::{ClockDomain, DomainState};
pub use error::{ArchiveError, AssertionError, CascadeError, ConfigError};
pub use event_queue::{Event, EventQueue};
pub use port::{PortDesc, PortId, PortKind, PortStorage};
pub use scheduler::Scheduler;
pub use simulation::{Simulation, SimulationBuilder};
pub use threadpool::ThreadPool;
pub use trigger::{FifoId, TriggerFire, TriggerId, TriggerRecord, TriggerTable, TriggerTarget, UpdateRecord};
pub use vcd::{VcdWriter, WaveAddr};
