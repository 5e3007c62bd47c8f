//! Checkpoint / archive format: a bit-exact-across-versions byte stream,
//! opaque to the rest of the core. Saves and restores every
//! domain's scheduling state, port storage, delay ring and pending
//! events.
//!
//! Layout:
//!   magic (u32) | version (f32) | safe_mode (bool)
//!   [if safe_mode: every primitive below is preceded by a 1-byte rolling
//!    checksum that increments by the primitive's size]
//!   domain_count (u32)
//!   domain_count * DomainSnapshot (bincode, deflate-compressed in 1 MiB
//!   length-prefixed blocks)

use std::collections::HashMap as StdHashMap;
use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use serde::{Deserialize, Serialize};

use crate::domain::ClockDomain;
use crate::error::ArchiveError;
use crate::event_queue::Event;

const MAGIC: u32 = 0xCA5C_ADE1;
const VERSION: f32 = 1.0;
const COMPRESSION_BLOCK_SIZE: usize = 1 << 20;

/// Reconstructs concrete [`Event`] implementations from their
/// `archive_key`/`archive_bytes` pair: events serialize via a (key, value)
/// pair through a trait-object factory registered by the embedding
/// application, and an unknown key aborts the load.
#[derive(Default)]
pub struct EventFactory {
    loaders: StdHashMap<&'static str, Box<dyn Fn(&[u8]) -> Box<dyn Event> + Send + Sync>>,
}

impl EventFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        key: &'static str,
        loader: impl Fn(&[u8]) -> Box<dyn Event> + Send + Sync + 'static,
    ) {
        self.loaders.insert(key, Box::new(loader));
    }

    pub fn load(&self, key: &str, bytes: &[u8]) -> Result<Box<dyn Event>, ArchiveError> {
        self.loaders
            .get(key)
            .map(|loader| loader(bytes))
            .ok_or_else(|| ArchiveError::UnknownEventKey(key.to_string()))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PortSnapshot {
    frames: Vec<Vec<u8>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct DomainSnapshot {
    id: u32,
    period: u64,
    clock_offset: i64,
    num_ticks: u64,
    num_edges: u64,
    prev_tick: i64,
    prev_index: u64,
    next_edge: i64,
    ports: Vec<PortSnapshot>,
    sync_index: usize,
    ring_slots: Vec<Vec<crate::delay_ring::RingEvent>>,
    events: Vec<(u64, String, Vec<u8>)>,
}

impl DomainSnapshot {
    fn capture(domain: &ClockDomain) -> Self {
        Self {
            id: domain.id,
            period: domain.period,
            clock_offset: domain.clock_offset,
            num_ticks: domain.num_ticks,
            num_edges: domain.num_edges,
            prev_tick: domain.prev_tick,
            prev_index: domain.prev_index,
            next_edge: domain.next_edge,
            ports: domain
                .ports
                .iter()
                .map(|p| PortSnapshot {
                    frames: p.frames().to_vec(),
                })
                .collect(),
            sync_index: domain.ring.sync_index(),
            ring_slots: domain.ring.slots().to_vec(),
            events: domain.events.export(),
        }
    }

    fn restore_into(self, domain: &mut ClockDomain, factory: &EventFactory) -> Result<(), ArchiveError> {
        domain.period = self.period;
        domain.clock_offset = self.clock_offset;
        domain.num_ticks = self.num_ticks;
        domain.num_edges = self.num_edges;
        domain.prev_tick = self.prev_tick;
        domain.prev_index = self.prev_index;
        domain.next_edge = self.next_edge;
        for (port, snapshot) in domain.ports.iter_mut().zip(self.ports.into_iter()) {
            port.restore_frames(snapshot.frames);
        }
        domain.ring.restore(self.ring_slots, self.sync_index);
        domain.events.import(self.events, factory)?;
        Ok(())
    }
}

/// A rolling 1-byte checksum: accumulates the size (in bytes) of each
/// primitive written/read so far, wrapping on overflow. Written ahead of
/// every primitive in `safe_mode` to detect store/load schema drift.
struct RollingChecksum {
    value: u8,
}

impl RollingChecksum {
    fn new() -> Self {
        Self { value: 0 }
    }

    fn advance(&mut self, size: usize) -> u8 {
        let check = self.value;
        self.value = self.value.wrapping_add(size as u8);
        check
    }
}

fn write_block<W: Write>(writer: &mut W, bytes: &[u8]) -> Result<(), ArchiveError> {
    for chunk in bytes.chunks(COMPRESSION_BLOCK_SIZE) {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(chunk)?;
        let compressed = encoder.finish()?;
        writer.write_all(&(compressed.len() as u64).to_le_bytes())?;
        writer.write_all(&compressed)?;
    }
    // Zero-length sentinel block terminates the stream.
    writer.write_all(&0u64.to_le_bytes())?;
    Ok(())
}

fn read_block<R: Read>(reader: &mut R) -> Result<Vec<u8>, ArchiveError> {
    let mut out = Vec::new();
    loop {
        let mut len_bytes = [0u8; 8];
        reader.read_exact(&mut len_bytes)?;
        let len = u64::from_le_bytes(len_bytes) as usize;
        if len == 0 {
            break;
        }
        let mut compressed = vec![0u8; len];
        reader.read_exact(&mut compressed)?;
        let mut decoder = DeflateDecoder::new(&compressed[..]);
        decoder.read_to_end(&mut out)?;
    }
    Ok(out)
}

/// Saves every domain's state into `writer` (`archive_clock_domains` in
/// spec terms).
pub fn save<W: Write>(writer: &mut W, domains: &[ClockDomain], safe_mode: bool) -> Result<(), ArchiveError> {
    writer.write_all(&MAGIC.to_le_bytes())?;
    writer.write_all(&VERSION.to_le_bytes())?;
    writer.write_all(&[safe_mode as u8])?;

    let mut checksum = RollingChecksum::new();
    let write_primitive = |w: &mut W, checksum: &mut RollingChecksum, bytes: &[u8]| -> Result<(), ArchiveError> {
        if safe_mode {
            w.write_all(&[checksum.advance(bytes.len())])?;
        }
        w.write_all(bytes)?;
        Ok(())
    };

    write_primitive(writer, &mut checksum, &(domains.len() as u32).to_le_bytes())?;

    let snapshots: Vec<DomainSnapshot> = domains.iter().map(DomainSnapshot::capture).collect();
    let encoded = bincode::serialize(&snapshots)?;
    write_block(writer, &encoded)?;
    Ok(())
}

/// Loads domain state from `reader` into `domains`, which must already
/// have been constructed with matching topology (port/ring schemas are
/// validated by `restore_frames`/`restore`, not re-derived).
pub fn load<R: Read>(
    reader: &mut R,
    domains: &mut [ClockDomain],
    factory: &EventFactory,
) -> Result<(), ArchiveError> {
    let mut magic_bytes = [0u8; 4];
    reader.read_exact(&mut magic_bytes)?;
    let magic = u32::from_le_bytes(magic_bytes);
    if magic != MAGIC {
        return Err(ArchiveError::BadMagic {
            expected: MAGIC,
            found: magic,
        });
    }

    let mut version_bytes = [0u8; 4];
    reader.read_exact(&mut version_bytes)?;
    let version = f32::from_le_bytes(version_bytes);
    if version != VERSION {
        return Err(ArchiveError::VersionMismatch {
            expected: VERSION,
            found: version,
        });
    }

    let mut safe_mode_byte = [0u8; 1];
    reader.read_exact(&mut safe_mode_byte)?;
    let safe_mode = safe_mode_byte[0] != 0;

    let mut checksum = RollingChecksum::new();
    let mut read_primitive = |r: &mut R, checksum: &mut RollingChecksum, size: usize| -> Result<Vec<u8>, ArchiveError> {
        if safe_mode {
            let mut found = [0u8; 1];
            r.read_exact(&mut found)?;
            let expected = checksum.advance(size);
            if found[0] != expected {
                return Err(ArchiveError::ChecksumMismatch {
                    offset: 0,
                    expected,
                    found: found[0],
                });
            }
        }
        let mut buf = vec![0u8; size];
        r.read_exact(&mut buf)?;
        Ok(buf)
    };

    let count_bytes = read_primitive(reader, &mut checksum, 4)?;
    let domain_count = u32::from_le_bytes(count_bytes.try_into().unwrap()) as usize;

    let encoded = read_block(reader)?;
    let snapshots: Vec<DomainSnapshot> = bincode::deserialize(&encoded)?;
    assert_eq!(snapshots.len(), domain_count);
    assert_eq!(domains.len(), domain_count, "archive domain-count mismatch");

    for (domain, snapshot) in domains.iter_mut().zip(snapshots.into_iter()) {
        snapshot.restore_into(domain, factory)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ClockDomain;
    use crate::port::{PortDesc, PortKind};

    fn one_domain_with_a_synchronous_port() -> ClockDomain {
        let mut domain = ClockDomain::new(0, 0, "d".to_string(), 4);
        let port = domain.ports.add_port(PortDesc {
            name: "q".to_string(),
            kind: PortKind::Synchronous,
            size: 1,
            delay: 2,
            shadow: false,
        });
        domain.ports.init_ports();
        domain.ports.get_mut(port).value_mut()[0] = 0x5A;
        domain.ring.schedule_trigger(1, 0, &[0x5A]);
        domain.num_ticks = 7;
        domain.next_edge = 7000;
        domain
    }

    #[test]
    fn save_then_load_reproduces_port_and_ring_state_exactly() {
        let original = one_domain_with_a_synchronous_port();
        let mut buf = Vec::new();
        save(&mut buf, std::slice::from_ref(&original), false).unwrap();

        let mut restored = vec![ClockDomain::new(0, 0, "d".to_string(), 4)];
        restored[0].ports.add_port(PortDesc {
            name: "q".to_string(),
            kind: PortKind::Synchronous,
            size: 1,
            delay: 2,
            shadow: false,
        });
        restored[0].ports.init_ports();

        let factory = EventFactory::new();
        load(&mut buf.as_slice(), &mut restored, &factory).unwrap();

        assert_eq!(restored[0].num_ticks, 7);
        assert_eq!(restored[0].next_edge, 7000);
        assert_eq!(restored[0].ports.get(0).value(), &[0x5A]);
        assert_eq!(restored[0].ring.occupancy(), original.ring.occupancy());
    }

    #[test]
    fn bad_magic_is_rejected_before_touching_domain_state() {
        let mut buf = vec![0u8; 16];
        let factory = EventFactory::new();
        let mut domains = vec![ClockDomain::new(0, 0, "d".to_string(), 4)];
        let err = load(&mut buf.as_slice(), &mut domains, &factory).unwrap_err();
        assert!(matches!(err, ArchiveError::BadMagic { .. }));
    }

    #[test]
    fn safe_mode_round_trips_with_checksums_enabled() {
        let original = one_domain_with_a_synchronous_port();
        let mut buf = Vec::new();
        save(&mut buf, std::slice::from_ref(&original), true).unwrap();

        let mut restored = vec![ClockDomain::new(0, 0, "d".to_string(), 4)];
        restored[0].ports.add_port(PortDesc {
            name: "q".to_string(),
            kind: PortKind::Synchronous,
            size: 1,
            delay: 2,
            shadow: false,
        });
        restored[0].ports.init_ports();

        let factory = EventFactory::new();
        load(&mut buf.as_slice(), &mut restored, &factory).unwrap();
        assert_eq!(restored[0].ports.get(0).value(), &[0x5A]);
    }
}
