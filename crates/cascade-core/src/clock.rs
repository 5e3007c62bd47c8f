//! Clock identity and resolution.
//!
//! A [`Clock`] is just a named identity for a signal net; the actual
//! scheduling state lives in [`crate::domain::ClockDomain`], one per
//! resolved source/generator. `Connected` clocks are pure forwarding
//! links and never get their own domain.

use crate::HashMap;
use crate::error::ConfigError;

pub type ClockId = u32;
pub type DomainId = u32;

/// The rational-ratio parameters relating a divided clock to its generator.
///
/// `tick(n*b) = generator.tick(n*a + m) + k` exactly, for `b < 64`. Computed
/// once at `init()` time and immutable for the life of the domain, so the
/// generator ratio holds exactly rather than drifting under rounding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratorParams {
    pub a: u64,
    pub b: u64,
    pub m: i64,
    pub k: i64,
}

#[derive(Debug, Clone)]
pub enum ClockKind {
    /// Free-running clock with its own period and offset (ps).
    Source { period: u64, offset: i64 },
    /// Derived from another clock by an integer or rational ratio.
    Divided {
        generator: ClockId,
        ratio_num: u32,
        ratio_den: u32,
        offset: i64,
    },
    /// Advanced only by explicit `manual_tick()` calls.
    Manual,
    /// Never advances.
    Disabled,
    /// Wire-only alias; resolution follows the chain to the sole source.
    Connected(ClockId),
}

#[derive(Debug, Clone)]
pub struct Clock {
    pub id: ClockId,
    pub name: String,
    pub kind: ClockKind,
}

impl Clock {
    pub fn is_forwarding(&self) -> bool {
        matches!(self.kind, ClockKind::Connected(_))
    }
}

/// Registry of all [`Clock`] identities, independent of the domains they
/// resolve to. Owns connection resolution (`resolve`) and generator-ratio
/// computation (`generator_params`).
#[derive(Debug, Default)]
pub struct ClockRegistry {
    clocks: Vec<Clock>,
    by_name: HashMap<String, ClockId>,
}

impl ClockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn construct(&mut self, name: &str, kind: ClockKind) -> ClockId {
        let id = self.clocks.len() as ClockId;
        self.by_name.insert(name.to_string(), id);
        self.clocks.push(Clock {
            id,
            name: name.to_string(),
            kind,
        });
        id
    }

    pub fn get(&self, id: ClockId) -> &Clock {
        &self.clocks[id as usize]
    }

    pub fn by_name(&self, name: &str) -> Option<ClockId> {
        self.by_name.get(name).copied()
    }

    /// Connects `a` to forward through `b` (`connect(a <- b)`).
    pub fn connect(&mut self, a: ClockId, b: ClockId) {
        self.clocks[a as usize].kind = ClockKind::Connected(b);
    }

    /// Follows a `Connected` chain to the sole source/generator/manual
    /// clock it resolves to. Returns `ConnectionCycle` if the chain loops.
    pub fn resolve(&self, id: ClockId) -> Result<ClockId, ConfigError> {
        let mut cur = id;
        let mut seen = bit_set::BitSet::with_capacity(self.clocks.len());
        loop {
            if !seen.insert(cur as usize) {
                return Err(ConfigError::ConnectionCycle(self.clocks[id as usize].name.clone()));
            }
            match &self.clocks[cur as usize].kind {
                ClockKind::Connected(next) => cur = *next,
                _ => return Ok(cur),
            }
        }
    }

    /// Computes the exact rational-ratio generator parameters for a divided
    /// clock, trying denominators `b` in `1..64`.
    pub fn generator_params(
        &self,
        child: ClockId,
        child_period: u64,
        child_offset: i64,
        gen_period: u64,
        gen_offset: i64,
    ) -> Result<GeneratorParams, ConfigError> {
        for b in 1u64..64 {
            let num = child_period * b;
            if num % gen_period != 0 {
                continue;
            }
            let a = num / gen_period;
            if a == 0 {
                continue;
            }
            // Solve for integer m, k such that the nth rising edge of the
            // child (time = child_offset + n*b*child_period) lands exactly
            // on generator edge (a*n + m), i.e.
            //   child_offset + n*b*child_period == gen_offset + (a*n+m)*gen_period + k
            // Since b*child_period == a*gen_period by construction, the n
            // term cancels and m can be fixed at 0, solving k directly.
            let k = child_offset - gen_offset;
            return Ok(GeneratorParams { a, b, m: 0, k });
        }
        Err(ConfigError::UnexpressibleRatio {
            child: self.clocks[child as usize].name.clone(),
            generator: "generator".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connected_clock_resolves_through_the_forwarding_chain() {
        let mut reg = ClockRegistry::new();
        let src = reg.construct("src", ClockKind::Source { period: 1000, offset: 0 });
        let a = reg.construct("a", ClockKind::Connected(src));
        let b = reg.construct("b", ClockKind::Connected(a));
        assert_eq!(reg.resolve(b).unwrap(), src);
    }

    #[test]
    fn cyclic_connection_is_rejected() {
        let mut reg = ClockRegistry::new();
        let a = reg.construct("a", ClockKind::Disabled);
        let b = reg.construct("b", ClockKind::Connected(a));
        reg.connect(a, b);
        assert!(matches!(reg.resolve(a), Err(ConfigError::ConnectionCycle(_))));
    }

    #[test]
    fn generator_params_finds_the_minimal_integer_ratio() {
        let mut reg = ClockRegistry::new();
        let gen = reg.construct("gen", ClockKind::Source { period: 2000, offset: 0 });
        let child = reg.construct(
            "child",
            ClockKind::Divided {
                generator: gen,
                ratio_num: 1,
                ratio_den: 3,
                offset: 0,
            },
        );
        let params = reg.generator_params(child, 6000, 0, 2000, 0).unwrap();
        assert_eq!(params.a, 3);
        assert_eq!(params.b, 1);
        assert_eq!(params.k, 0);
    }

    #[test]
    fn generator_params_carries_the_offset_difference_into_k() {
        let mut reg = ClockRegistry::new();
        let gen = reg.construct("gen", ClockKind::Source { period: 1000, offset: 0 });
        let child = reg.construct(
            "child",
            ClockKind::Divided {
                generator: gen,
                ratio_num: 1,
                ratio_den: 2,
                offset: 250,
            },
        );
        let params = reg.generator_params(child, 2000, 250, 1000, 0).unwrap();
        assert_eq!(params.k, 250);
    }
}
