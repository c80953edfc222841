//! Soft-fork deployment table and the versionbit state cache.

use hashbrown::HashMap;

use crate::encoding::{Reader, Writer};
use crate::error::ChainResult;
use crate::primitives::Hash;

/// Number of signalling bits in a block version.
pub const VERSION_BITS: u8 = 32;

/// One soft-fork deployment as persisted in the `D` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deployment {
    pub bit: u8,
    pub start_time: u32,
    pub timeout: u32,
    pub threshold: i32,
    pub window: i32,
}

impl Deployment {
    fn encode_into(&self, w: &mut Writer) {
        w.put_u8(self.bit);
        w.put_u32(self.start_time);
        w.put_u32(self.timeout);
        w.put_i32(self.threshold);
        w.put_i32(self.window);
    }

    fn decode_from(r: &mut Reader<'_>) -> ChainResult<Self> {
        Ok(Self {
            bit: r.get_u8()?,
            start_time: r.get_u32()?,
            timeout: r.get_u32()?,
            threshold: r.get_i32()?,
            window: r.get_i32()?,
        })
    }
}

pub fn encode_table(deployments: &[Deployment]) -> Vec<u8> {
    let mut w = Writer::with_capacity(1 + deployments.len() * 17);
    debug_assert!(deployments.len() <= u8::MAX as usize);
    w.put_u8(deployments.len() as u8);
    for deployment in deployments {
        deployment.encode_into(&mut w);
    }
    w.into_vec()
}

pub fn decode_table(buf: &[u8]) -> ChainResult<Vec<Deployment>> {
    let mut r = Reader::new(buf, "deployments");
    let count = r.get_u8()? as usize;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        out.push(Deployment::decode_from(&mut r)?);
    }
    r.finish()?;
    Ok(out)
}

/// Versionbit deployment state keyed by (bit, block hash), mirrored from
/// the `v` table.
///
/// Reads hit the in-memory map; writes accumulate in `updates` and are
/// folded into the key-value batch when the chain commits, or reverted
/// when the batch is dropped.
#[derive(Debug, Default)]
pub struct VersionBits {
    map: HashMap<(u8, Hash), u8>,
    updates: Vec<((u8, Hash), Option<u8>)>,
}

impl VersionBits {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the cache from the persisted `v` records at open.
    pub fn load(&mut self, bit: u8, hash: Hash, state: u8) {
        self.map.insert((bit, hash), state);
    }

    pub fn get(&self, bit: u8, hash: &Hash) -> Option<u8> {
        self.map.get(&(bit, *hash)).copied()
    }

    pub fn set(&mut self, bit: u8, hash: Hash, state: u8) {
        let prev = self.map.insert((bit, hash), state);
        self.updates.push(((bit, hash), prev));
    }

    /// Drop every cached state for one signalling bit. Out-of-range bits
    /// are a no-op, never a fault.
    pub fn invalidate(&mut self, bit: u8) -> Vec<Hash> {
        if bit >= VERSION_BITS {
            return Vec::new();
        }
        let removed: Vec<Hash> = self
            .map
            .keys()
            .filter(|(b, _)| *b == bit)
            .map(|(_, hash)| *hash)
            .collect();
        for hash in &removed {
            self.map.remove(&(bit, *hash));
        }
        removed
    }

    /// Pending keys in insertion order, for flushing into a batch.
    pub fn pending(&self) -> Vec<(u8, Hash, u8)> {
        self.updates
            .iter()
            .filter_map(|((bit, hash), _)| {
                self.map
                    .get(&(*bit, *hash))
                    .map(|state| (*bit, *hash, *state))
            })
            .collect()
    }

    pub fn commit(&mut self) {
        self.updates.clear();
    }

    pub fn rollback(&mut self) {
        while let Some((key, prev)) = self.updates.pop() {
            match prev {
                Some(state) => {
                    self.map.insert(key, state);
                }
                None => {
                    self.map.remove(&key);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_round_trip() {
        let table = vec![
            Deployment {
                bit: 0,
                start_time: 100,
                timeout: 200,
                threshold: -1,
                window: -1,
            },
            Deployment {
                bit: 5,
                start_time: 1_600_000_000,
                timeout: 1_700_000_000,
                threshold: 1916,
                window: 2016,
            },
        ];
        let back = decode_table(&encode_table(&table)).unwrap();
        assert_eq!(back, table);
    }

    #[test]
    fn empty_table_is_one_byte() {
        let bytes = encode_table(&[]);
        assert_eq!(bytes, vec![0]);
        assert!(decode_table(&bytes).unwrap().is_empty());
    }

    #[test]
    fn corrupt_table_errors() {
        assert!(decode_table(&[2, 0, 0]).is_err());
    }

    #[test]
    fn pending_updates_roll_back() {
        let mut cache = VersionBits::new();
        cache.load(1, [9u8; 32], 3);

        cache.set(1, [9u8; 32], 4);
        cache.set(2, [8u8; 32], 1);
        assert_eq!(cache.get(1, &[9u8; 32]), Some(4));
        assert_eq!(cache.pending().len(), 2);

        cache.rollback();
        assert_eq!(cache.get(1, &[9u8; 32]), Some(3));
        assert_eq!(cache.get(2, &[8u8; 32]), None);
    }

    #[test]
    fn committed_updates_stick() {
        let mut cache = VersionBits::new();
        cache.set(0, [1u8; 32], 2);
        cache.commit();
        assert_eq!(cache.get(0, &[1u8; 32]), Some(2));
        assert!(cache.pending().is_empty());
    }

    #[test]
    fn out_of_range_bit_invalidation_is_noop() {
        let mut cache = VersionBits::new();
        cache.load(1, [1u8; 32], 1);
        assert!(cache.invalidate(40).is_empty());
        assert_eq!(cache.get(1, &[1u8; 32]), Some(1));
    }
}
