//! The public entry point: a fluent builder over [`Scheduler`].

use std::io::{Read, Write};
use std::path::Path;

use crate::checkpoint::{self, EventFactory};
use crate::clock::DomainId;
use crate::config::RuntimeParameters;
use crate::domain::ClockDomain;
use crate::error::{ArchiveError, CascadeError};
use crate::scheduler::Scheduler;
use crate::vcd::VcdWriter;

/// Fluent construction of a [`Simulation`]: register domains, then
/// optionally attach a waveform sink, before calling [`SimulationBuilder::build`].
pub struct SimulationBuilder {
    params: RuntimeParameters,
    scheduler: Scheduler,
    vcd_domains: Vec<(DomainId, String, Vec<(u32, String, u8, bool)>)>,
}

impl SimulationBuilder {
    pub fn new(params: RuntimeParameters) -> Self {
        Self {
            scheduler: Scheduler::new(params.clone()),
            params,
            vcd_domains: Vec::new(),
        }
    }

    /// Registers a domain, returning its assigned [`DomainId`].
    pub fn add_domain(&mut self, domain: ClockDomain) -> DomainId {
        self.scheduler.add_domain(domain)
    }

    /// Declares a domain's ports for VCD dumping. `ports` is `(port_id,
    /// name, width_bytes, is_clock_signal)`.
    pub fn trace_domain(mut self, id: DomainId, name: impl Into<String>, ports: Vec<(u32, String, u8, bool)>) -> Self {
        self.vcd_domains.push((id, name.into(), ports));
        self
    }

    /// Finalizes domain wiring, resolving trigger tables and seeding the
    /// first `next_edge` for every domain, and opens the waveform file if
    /// any domain was registered via [`Self::trace_domain`].
    pub fn build(mut self) -> Result<Simulation, CascadeError> {
        if !self.vcd_domains.is_empty() {
            let path = format!("{}.vcd", self.params.checkpoint_name.trim_end_matches(".checkpoint"));
            self.scheduler.vcd = Some(VcdWriter::new(path, &self.vcd_domains)?);
        }
        self.scheduler.init()?;
        Ok(Simulation {
            scheduler: self.scheduler,
        })
    }

    /// Same as [`Self::build`], but writes the waveform to an explicit path.
    pub fn build_with_trace_path<P: AsRef<Path>>(mut self, path: P) -> Result<Simulation, CascadeError> {
        if !self.vcd_domains.is_empty() {
            self.scheduler.vcd = Some(VcdWriter::new(path, &self.vcd_domains)?);
        }
        self.scheduler.init()?;
        Ok(Simulation {
            scheduler: self.scheduler,
        })
    }
}

/// A running simulation: every clock domain, the scheduler driving them,
/// and (optionally) a waveform sink.
pub struct Simulation {
    scheduler: Scheduler,
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("sim_time", &self.scheduler.sim_time)
            .field("domains", &self.scheduler.domains.len())
            .finish()
    }
}

impl Simulation {
    pub fn builder(params: RuntimeParameters) -> SimulationBuilder {
        SimulationBuilder::new(params)
    }

    pub fn domain(&self, id: DomainId) -> &ClockDomain {
        self.scheduler.domain(id)
    }

    pub fn domain_mut(&mut self, id: DomainId) -> &mut ClockDomain {
        self.scheduler.domain_mut(id)
    }

    /// Applies a full reset (or a plain re-init, if `is_reset` is false) to
    /// every domain: clears rings, events, and port frames.
    pub fn reset(&mut self, is_reset: bool) {
        self.scheduler.reset(is_reset);
    }

    /// Runs the simulation to completion, in simulated picoseconds.
    pub fn run_until(&mut self, run_until_ps: i64) -> Result<(), CascadeError> {
        self.scheduler.run_simulation(run_until_ps)
    }

    /// Advances exactly one scheduler step (the next due edge, possibly
    /// shared by several domains).
    pub fn step(&mut self) -> Result<(), CascadeError> {
        self.scheduler.run_single_tick()
    }

    /// Drives a manual (externally ticked) domain forward to `sim_time_ps`.
    pub fn manual_tick(&mut self, domain: DomainId, sim_time_ps: i64) -> Result<(), CascadeError> {
        self.scheduler.manual_tick(domain, sim_time_ps)
    }

    pub fn time(&self) -> i64 {
        self.scheduler.sim_time
    }

    /// Whether a checkpoint write is due at the current simulated time,
    /// per `cascade.CheckpointInterval`.
    pub fn checkpoint_due(&mut self) -> bool {
        self.scheduler.checkpoint_due()
    }

    /// Serializes every domain's state to `writer`. `safe_mode` mirrors
    /// `cascade.SafeCheckpoint`: a per-field rolling checksum, at the cost
    /// of a larger archive.
    pub fn save_checkpoint<W: Write>(&self, writer: &mut W, safe_mode: bool) -> Result<(), ArchiveError> {
        checkpoint::save(writer, &self.scheduler.domains, safe_mode)
    }

    /// Restores every domain's state from `reader`, reconstructing pending
    /// events through `factory`. Domain topology (port counts, ring depths)
    /// must already match what was active when the checkpoint was taken.
    pub fn load_checkpoint<R: Read>(&mut self, reader: &mut R, factory: &EventFactory) -> Result<(), ArchiveError> {
        checkpoint::load(reader, &mut self.scheduler.domains, factory)
    }
}
