//! Global scheduler: keeps domains ordered by next edge time, decides
//! which domains tick on the next step, and advances simulated time.
//!
//! Domains sharing the same next edge time are chained into one "bucket"
//! that ticks together. Domain counts in practice are small (tens, not
//! millions), so the bucket is found by rescanning a plain
//! `Vec<ClockDomain>` each step rather than maintaining a sorted linked
//! structure incrementally.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use itertools::Itertools;

use crate::HashMap;
use crate::clock::{ClockRegistry, DomainId};
use crate::component::UpdateCtx;
use crate::config::RuntimeParameters;
use crate::domain::ClockDomain;
use crate::error::CascadeError;
use crate::threadpool::ThreadPool;
use crate::vcd::VcdWriter;

const DEADLOCK_CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Owns every clock domain and drives the global stepping loop.
/// `ClockRegistry` resolves clock identities at construction time; this
/// struct only ever deals in resolved domains.
pub struct Scheduler {
    pub clocks: ClockRegistry,
    pub domains: Vec<ClockDomain>,
    pub params: RuntimeParameters,
    pool: ThreadPool,
    pub vcd: Option<VcdWriter>,
    /// Simulated time, in ps.
    pub sim_time: i64,
    last_checkpoint_ns: u64,
    last_deadlock_check: Instant,
}

impl Scheduler {
    pub fn new(params: RuntimeParameters) -> Self {
        let pool = ThreadPool::new(params.num_threads);
        Self {
            clocks: ClockRegistry::new(),
            domains: Vec::new(),
            params,
            pool,
            vcd: None,
            sim_time: 0,
            last_checkpoint_ns: 0,
            last_deadlock_check: Instant::now(),
        }
    }

    pub fn add_domain(&mut self, domain: ClockDomain) -> DomainId {
        let id = domain.id;
        self.domains.push(domain);
        id
    }

    pub fn domain_mut(&mut self, id: DomainId) -> &mut ClockDomain {
        &mut self.domains[id as usize]
    }

    pub fn domain(&self, id: DomainId) -> &ClockDomain {
        &self.domains[id as usize]
    }

    /// Finalizes every domain's port/trigger tables, then seeds
    /// `next_edge` for the first scheduler step: the first rising edge of
    /// every non-manual domain occurs exactly at its `clock_offset`, so
    /// priming is a plain assignment, not a half-period advance —
    /// `update_next_edge` only ever computes the edge *after* the one
    /// currently named by `next_edge`.
    pub fn init(&mut self) -> Result<(), crate::error::ConfigError> {
        for domain in &mut self.domains {
            domain.init()?;
        }
        for domain in &mut self.domains {
            if domain.period > 0 {
                domain.next_edge = domain.clock_offset;
            }
        }
        Ok(())
    }

    pub fn reset(&mut self, is_reset: bool) {
        for domain in &mut self.domains {
            domain.reset(is_reset);
        }
    }

    // ---- bucket selection ----

    /// Finds the set of non-manual, non-disabled domains whose `next_edge`
    /// is minimal (within `ClockRounding`), i.e. the next same-tick bucket.
    fn find_bucket(&self) -> Option<(i64, Vec<usize>)> {
        let rounding = self.params.clock_rounding as i64;
        let min_edge = self
            .domains
            .iter()
            .filter(|d| !d.disabled && !d.manual)
            .map(|d| d.next_edge)
            .min()?;
        let bucket: Vec<usize> = self
            .domains
            .iter()
            .enumerate()
            .filter(|(_, d)| !d.disabled && !d.manual && (d.next_edge - min_edge).abs() <= rounding)
            .map(|(i, _)| i)
            .collect();
        Some((min_edge, bucket))
    }

    /// Repeatedly advances the earliest bucket of domains until
    /// `run_until_ps` is reached or a timeout/finish/assertion error stops
    /// the run.
    pub fn run_simulation(&mut self, run_until_ps: i64) -> Result<(), CascadeError> {
        loop {
            let Some((edge, bucket)) = self.find_bucket() else {
                break;
            };
            if edge >= run_until_ps {
                break;
            }
            self.sim_time = edge;
            self.enforce_timeout_and_finish()?;

            self.tick_domains(&bucket)?;
            for &idx in &bucket {
                self.update_next_edge(idx);
            }
        }
        self.sim_time = run_until_ps;
        Ok(())
    }

    /// Advances exactly one bucket (the next due edge, possibly shared by
    /// several domains), for callers driving the simulation step by step.
    pub fn run_single_tick(&mut self) -> Result<(), CascadeError> {
        let Some((edge, bucket)) = self.find_bucket() else {
            return Ok(());
        };
        self.sim_time = edge;
        self.enforce_timeout_and_finish()?;
        self.tick_domains(&bucket)?;
        for &idx in &bucket {
            self.update_next_edge(idx);
        }
        Ok(())
    }

    fn enforce_timeout_and_finish(&self) -> Result<(), CascadeError> {
        let sim_ns = (self.sim_time / 1000) as u64;
        if self.params.timeout > 0 && sim_ns >= self.params.timeout {
            return Err(CascadeError::Timeout(self.params.timeout));
        }
        if self.params.finish > 0 && sim_ns >= self.params.finish {
            return Err(CascadeError::Finish(self.params.finish));
        }
        Ok(())
    }

    /// Whether a checkpoint is due at the current `sim_time`. The embedding
    /// application (which owns the [`crate::checkpoint::EventFactory`]
    /// needed to serialize its own event types) is responsible for
    /// actually calling [`crate::checkpoint::save`] when this returns true;
    /// the scheduler only tracks cadence.
    pub fn checkpoint_due(&mut self) -> bool {
        if !self.params.checkpointing_enabled() {
            return false;
        }
        let sim_ns = (self.sim_time / 1000) as u64;
        let interval = self.params.checkpoint_interval;
        if sim_ns.saturating_sub(self.last_checkpoint_ns) >= interval {
            self.last_checkpoint_ns = sim_ns;
            true
        } else {
            false
        }
    }

    fn maybe_warn_deadlock(&mut self) {
        if self.last_deadlock_check.elapsed() < DEADLOCK_CHECK_INTERVAL {
            return;
        }
        self.last_deadlock_check = Instant::now();
        for domain in &self.domains {
            if domain.ring.occupancy() > 0 && domain.components.iter().all(|c| !c.is_active()) {
                log::warn!(
                    "cascade: domain `{}` has a non-empty sync ring feeding only deactivated components (possible deadlock)",
                    domain.name
                );
            }
        }
    }

    /// Runs the four threaded phases of one edge across `bucket`:
    /// pre_tick, tick, post_tick, update. Waveform dumping (phase 5) runs
    /// serially afterward since the [`VcdWriter`] is a single shared
    /// sink.
    fn tick_domains(&mut self, bucket: &[usize]) -> Result<(), CascadeError> {
        self.maybe_warn_deadlock();

        let mut rising_of: HashMap<u32, bool> = HashMap::default();
        for &idx in bucket {
            let rising = self.domains[idx].next_edge_is_rising();
            rising_of.insert(self.domains[idx].id, rising);
            if rising {
                self.domains[idx].num_ticks += 1;
            }
            self.domains[idx].num_edges += 1;
        }

        {
            let rising_of = rising_of.clone();
            self.run_threaded_phase(bucket, move |d| {
                d.pre_tick(rising_of[&d.id]);
                Ok(())
            })?;
        }

        {
            let rising_of = rising_of.clone();
            self.run_threaded_phase(bucket, move |d| {
                let ctx = ctx_for(d, rising_of[&d.id]);
                d.tick_phase(ctx);
                Ok(())
            })?;
        }

        {
            let rising_of = rising_of.clone();
            self.run_threaded_phase(bucket, move |d| {
                let rising = rising_of[&d.id];
                let events = d.post_tick(rising);
                d.apply_ring_events(events);
                Ok(())
            })?;
        }

        {
            let rising_of = rising_of.clone();
            self.run_threaded_phase(bucket, move |d| {
                let ctx = ctx_for(d, rising_of[&d.id]);
                d.update_phase(ctx);
                Ok(())
            })?;
        }

        for &idx in bucket {
            let rising = rising_of[&self.domains[idx].id];
            self.dump_waves_for(idx, rising);
        }

        Ok(())
    }

    fn run_threaded_phase(
        &mut self,
        bucket: &[usize],
        phase: impl Fn(&mut ClockDomain) -> Result<(), crate::error::AssertionError> + Sync,
    ) -> Result<(), CascadeError> {
        let set: HashSet<usize> = bucket.iter().copied().collect();
        let refs: Vec<&mut ClockDomain> = self
            .domains
            .iter_mut()
            .enumerate()
            .filter(|(i, _)| set.contains(i))
            .map(|(_, d)| d)
            .collect();
        self.pool.run_phase(refs, phase).map_err(CascadeError::from)
    }

    fn dump_waves_for(&mut self, idx: usize, rising: bool) {
        if self.vcd.is_none() {
            return;
        }
        let sim_ns = (self.sim_time / 1000) as u64;
        if sim_ns < self.params.trace_start_time {
            return;
        }
        if self.params.trace_stop_time > 0 && sim_ns > self.params.trace_stop_time {
            return;
        }
        let vcd = self.vcd.as_mut().unwrap();
        let domain = &self.domains[idx];
        let timestamp = self.sim_time as u64;
        let ports = &domain.ports;
        let result = if rising {
            vcd.dump_domain_values(domain.id, timestamp, |port| ports.get(port).value().to_vec())
        } else {
            vcd.dump_clock_values(domain.id, timestamp, |port| ports.get(port).value().to_vec())
        };
        if let Err(err) = result {
            log::warn!("cascade: VCD dump failed for domain `{}`: {err}", domain.name);
        }
    }

    // ---- next-edge computation ----

    fn tick_time_of(&self, domain_idx: usize, n: i64) -> i64 {
        let d = &self.domains[domain_idx];
        d.clock_offset + n * d.period as i64
    }

    /// Alternates rising→falling by `period / 2`, rounded to the nearest
    /// ns when within `ClockRounding` (the two-pass test tries rounding to
    /// absolute ns first, then to an offset-relative ns grid, accepting
    /// whichever lands within tolerance). For a divided clock whose next
    /// tick lands on a `b`-aligned boundary, the exact
    /// `generator.tick(n*a + m) + k` formula is used instead of rounding,
    /// so the generator ratio holds exactly rather than drifting.
    fn update_next_edge(&mut self, idx: usize) {
        let (period, clock_offset, next_edge, num_ticks, num_edges, generator, generator_params) = {
            let d = &self.domains[idx];
            (
                d.period,
                d.clock_offset,
                d.next_edge,
                d.num_ticks,
                d.num_edges,
                d.generator,
                d.generator_params,
            )
        };
        if period == 0 {
            return; // manual/disabled: not auto-advanced here.
        }

        let half = (period / 2) as i64;
        let raw_next = next_edge + half;

        // `num_edges` already reflects the edge most recently processed, so
        // the edge this call is computing the time for is rising iff
        // `num_edges` is even. The exact generator-ratio formula (invariant
        // 3) only applies to rising edges — `num_ticks` counts rising edges
        // only, and an upcoming falling edge has no tick index to align.
        let upcoming_rising = num_edges % 2 == 0;
        let mut exact: Option<i64> = None;
        if upcoming_rising {
            if let (Some(gen_id), Some(params)) = (generator, generator_params) {
                // A manual (period-0) generator has no tick-indexed time base:
                // `tick_time_of` would return `clock_offset` for every `n`,
                // collapsing the formula to a constant and starving the
                // catch-up loop in `manual_tick` of forward progress. Fall
                // through to `round_time` for those dependents instead.
                if num_ticks % params.b == 0 && self.domains[gen_id as usize].period > 0 {
                    let n = (num_ticks / params.b) as i64;
                    let gen_n = n * params.a as i64 + params.m;
                    let gen_time = self.tick_time_of(gen_id as usize, gen_n);
                    exact = Some(gen_time + params.k);
                }
            }
        }

        let rounding = self.params.clock_rounding as i64;
        let next = exact.unwrap_or_else(|| round_time(raw_next, clock_offset, rounding));

        let d = &mut self.domains[idx];
        d.prev_tick = d.next_edge;
        d.prev_index += 1;
        d.next_edge = next;
    }

    // ---- manual clocks ----

    /// Every domain directly divided from `parent_idx`'s clock, sorted by
    /// `clock_offset` (the order `manual_tick`'s first-invocation firing
    /// pass and catch-up loop both rely on).
    fn dependent_divided_domains(&self, parent_idx: usize) -> Vec<usize> {
        let parent_id = self.domains[parent_idx].id;
        self.domains
            .iter()
            .enumerate()
            .filter(|(_, d)| d.generator == Some(parent_id))
            .map(|(i, _)| i)
            .sorted_by_key(|&i| self.domains[i].clock_offset)
            .collect()
    }

    fn fire_single_domain_edge(&mut self, idx: usize) -> Result<(), CascadeError> {
        let rising = self.domains[idx].next_edge_is_rising();
        if rising {
            self.domains[idx].num_ticks += 1;
        }
        self.domains[idx].num_edges += 1;
        self.domains[idx].prev_tick = self.domains[idx].next_edge;
        self.domains[idx].prev_index += 1;
        let ctx = ctx_for(&self.domains[idx], rising);

        self.domains[idx].pre_tick(rising);
        self.domains[idx].tick_phase(ctx);
        let events = self.domains[idx].post_tick(rising);
        self.domains[idx].apply_ring_events(events);
        self.domains[idx].update_phase(ctx);
        self.dump_waves_for(idx, rising);
        Ok(())
    }

    /// Fires the manually-ticked domain's own edge. A manual domain has no
    /// period to alternate against, so every call is unconditionally a
    /// rising edge rather than parity-alternated like a generated clock's.
    fn fire_manual_domain_edge(&mut self, idx: usize) -> Result<(), CascadeError> {
        self.domains[idx].num_ticks += 1;
        self.domains[idx].num_edges += 1;
        self.domains[idx].prev_tick = self.domains[idx].next_edge;
        self.domains[idx].prev_index += 1;
        let rising = true;
        let ctx = ctx_for(&self.domains[idx], rising);

        self.domains[idx].pre_tick(rising);
        self.domains[idx].tick_phase(ctx);
        let events = self.domains[idx].post_tick(rising);
        self.domains[idx].apply_ring_events(events);
        self.domains[idx].update_phase(ctx);
        self.dump_waves_for(idx, rising);
        Ok(())
    }

    /// Projects `dep`'s edges against `parent`'s observed effective period
    /// (`ClockDomain.cpp`'s `manualTick`: `dividedPeriod = effectivePeriod
    /// * clockRatio`, `nextEdge = roundTime(clockOffset + dividedPeriod/2 *
    /// numEdges)`), then fires every edge that is now due, in order,
    /// checking each pending edge against `current_time` *before*
    /// recomputing the next one so a due edge is never overwritten unfired.
    fn catch_up_manual_dependent(&mut self, dep: usize, parent: usize, current_time: i64) -> Result<(), CascadeError> {
        let parent_offset = self.domains[parent].clock_offset;
        let parent_ticks = self.domains[parent].num_ticks;
        if parent_ticks == 0 {
            return Ok(());
        }

        let effective_period = (current_time - parent_offset) as f64 / parent_ticks as f64;
        let half = (effective_period / 2.0).round() as i64;
        let rounding = self.params.clock_rounding as i64;

        if self.domains[dep].num_edges == 0 {
            let offset = self.domains[dep].clock_offset;
            self.domains[dep].next_edge = round_time(offset + half, offset, rounding);
        }

        while self.domains[dep].next_edge <= current_time {
            self.fire_single_domain_edge(dep)?;
            let offset = self.domains[dep].clock_offset;
            let next = self.domains[dep].next_edge + half;
            self.domains[dep].next_edge = round_time(next, offset, rounding);
        }
        Ok(())
    }

    /// `manual_tick`: the first invocation sets the effective offset from
    /// `sim_time` and fires edges of any already-created divided domains
    /// whose offset is non-positive; subsequent invocations catch up every
    /// dependent divided domain to `sim_time` by projecting its edges from
    /// the parent's observed effective period, then fire the parent's own
    /// (always-rising) edge at `sim_time`.
    ///
    /// The interaction between disabled domains, repeated manual ticks,
    /// and manually-generated divided clocks is underspecified in any
    /// single invariant; the effective-period projection above is ground
    /// truth preserved from the scenario it was derived against, not a
    /// more general rule inferred past what that scenario observes.
    pub fn manual_tick(&mut self, domain_id: DomainId, sim_time: i64) -> Result<(), CascadeError> {
        let idx = domain_id as usize;
        let first_invocation = self.domains[idx].num_ticks == 0 && self.domains[idx].num_edges == 0;

        if first_invocation {
            self.domains[idx].clock_offset = sim_time;
            self.domains[idx].next_edge = sim_time;

            for dep in self.dependent_divided_domains(idx) {
                if self.domains[dep].clock_offset <= 0 {
                    self.fire_single_domain_edge(dep)?;
                }
            }
            self.fire_manual_domain_edge(idx)?;
        } else {
            for dep in self.dependent_divided_domains(idx) {
                self.catch_up_manual_dependent(dep, idx, sim_time)?;
            }
            self.domains[idx].next_edge = sim_time;
            self.fire_manual_domain_edge(idx)?;
        }
        self.sim_time = sim_time;
        Ok(())
    }
}

fn ctx_for(domain: &ClockDomain, rising: bool) -> UpdateCtx {
    UpdateCtx {
        domain: domain.id,
        record: 0,
        num_ticks: domain.num_ticks,
        num_edges: domain.num_edges,
        rising,
    }
}

/// Two-pass rounding: round to absolute ns first, then to offset-relative
/// ns; accept either within `rounding` ps of the raw value.
fn round_time(raw: i64, offset: i64, rounding: i64) -> i64 {
    if rounding <= 0 {
        return raw;
    }
    let abs_rounded = round_to_step(raw, 1000);
    if (raw - abs_rounded).abs() <= rounding {
        return abs_rounded;
    }
    let rel = raw - offset;
    let rel_rounded = round_to_step(rel, 1000);
    if (rel - rel_rounded).abs() <= rounding {
        return rel_rounded + offset;
    }
    raw
}

fn round_to_step(v: i64, step: i64) -> i64 {
    let half = step / 2;
    let shifted = if v >= 0 { v + half } else { v - half };
    (shifted / step) * step
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_time_snaps_to_nearest_ns_within_tolerance() {
        assert_eq!(round_time(1998, 0, 5), 2000);
        assert_eq!(round_time(1990, 0, 5), 1990);
    }
}
