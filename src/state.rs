//! Versioned aggregate state: chain counters, tree anchor, persisted
//! flags and the versionbit cache.

use crate::encoding::{Reader, Writer};
use crate::error::{ChainError, ChainResult};
use crate::options::ChainOptions;
use crate::primitives::{Amount, Block, Hash, Height, Output, ZERO_HASH};

pub mod deployments;

pub use deployments::{Deployment, VersionBits};

/// Aggregate chain counters plus the tip, cloned at batch start and swapped
/// in only when the batch commits a new tip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainState {
    pub tip: Hash,
    pub tx: u64,
    pub coin: u64,
    pub value: Amount,
    pub burned: Amount,
    /// Set by `commit`; the in-memory state only swaps when true.
    pub committed: bool,
}

impl Default for ChainState {
    fn default() -> Self {
        Self {
            tip: ZERO_HASH,
            tx: 0,
            coin: 0,
            value: 0,
            burned: 0,
            committed: false,
        }
    }
}

impl ChainState {
    /// Working copy for a new batch.
    pub fn inherit(&self) -> Self {
        Self {
            tip: self.tip,
            tx: self.tx,
            coin: self.coin,
            value: self.value,
            burned: self.burned,
            committed: false,
        }
    }

    pub fn connect(&mut self, block: &Block) {
        self.tx += block.txs.len() as u64;
    }

    pub fn disconnect(&mut self, block: &Block) {
        self.tx -= block.txs.len() as u64;
    }

    pub fn add(&mut self, output: &Output) {
        self.coin += 1;
        self.value += output.value;
    }

    pub fn spend(&mut self, output: &Output) {
        self.coin -= 1;
        self.value -= output.value;
    }

    pub fn burn(&mut self, output: &Output) {
        self.coin += 1;
        self.burned += output.value;
    }

    pub fn unburn(&mut self, output: &Output) {
        self.coin -= 1;
        self.burned -= output.value;
    }

    /// Seal the batch at `tip` and return the record for the `R` key.
    pub fn commit(&mut self, tip: Hash) -> Vec<u8> {
        self.tip = tip;
        self.committed = true;
        self.encode()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(64);
        w.put_hash(&self.tip);
        w.put_u64(self.tx);
        w.put_u64(self.coin);
        w.put_u64(self.value);
        w.put_u64(self.burned);
        w.into_vec()
    }

    pub fn decode(buf: &[u8]) -> ChainResult<Self> {
        let mut r = Reader::new(buf, "chainstate");
        let state = Self {
            tip: r.get_hash()?,
            tx: r.get_u64()?,
            coin: r.get_u64()?,
            value: r.get_u64()?,
            burned: r.get_u64()?,
            committed: false,
        };
        r.finish()?;
        Ok(state)
    }
}

/// Anchor between the metadata store and the name tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeState {
    pub tree_root: Hash,
    /// Height of the last tree commit, always a tree-interval boundary.
    pub commit_height: Height,
    pub compaction_root: Hash,
    pub compaction_height: Height,
    pub committed: bool,
}

impl TreeState {
    pub fn new(tree_root: Hash) -> Self {
        Self {
            tree_root,
            commit_height: 0,
            compaction_root: ZERO_HASH,
            compaction_height: 0,
            committed: false,
        }
    }

    pub fn inherit(&self) -> Self {
        Self {
            committed: false,
            ..*self
        }
    }

    /// Record a committed root and return the record for the `s` key.
    pub fn commit(&mut self, root: Hash, height: Height) -> Vec<u8> {
        self.tree_root = root;
        self.commit_height = height;
        self.committed = true;
        self.encode()
    }

    /// Record a compaction horizon and return the record for the `s` key.
    pub fn compact(&mut self, root: Hash, height: Height) -> Vec<u8> {
        self.compaction_root = root;
        self.compaction_height = height;
        self.committed = true;
        self.encode()
    }

    pub fn is_compacted(&self) -> bool {
        self.compaction_height != 0
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(72);
        w.put_hash(&self.tree_root);
        w.put_u32(self.commit_height);
        w.put_hash(&self.compaction_root);
        w.put_u32(self.compaction_height);
        w.into_vec()
    }

    pub fn decode(buf: &[u8]) -> ChainResult<Self> {
        let mut r = Reader::new(buf, "treestate");
        let state = Self {
            tree_root: r.get_hash()?,
            commit_height: r.get_u32()?,
            compaction_root: r.get_hash()?,
            compaction_height: r.get_u32()?,
            committed: false,
        };
        r.finish()?;
        Ok(state)
    }
}

/// Persisted database options, checked against the configuration on every
/// open. Changing any of them requires a migration, except `prune` which
/// is flipped on by a successful `prune()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainFlags {
    pub network: u32,
    pub spv: bool,
    pub prune: bool,
    pub index_tx: bool,
    pub index_address: bool,
}

const FLAG_SPV: u8 = 1 << 0;
const FLAG_PRUNE: u8 = 1 << 1;
const FLAG_INDEX_TX: u8 = 1 << 2;
const FLAG_INDEX_ADDRESS: u8 = 1 << 3;

impl ChainFlags {
    pub fn from_options(options: &ChainOptions, network: u32) -> Self {
        Self {
            network,
            spv: options.spv,
            prune: options.prune,
            index_tx: options.index_tx,
            index_address: options.index_address,
        }
    }

    pub fn verify(&self, requested: &ChainFlags) -> ChainResult<()> {
        if self.network != requested.network {
            return Err(ChainError::NetworkMismatch {
                stored: self.network,
                configured: requested.network,
            });
        }
        if self.spv != requested.spv {
            return Err(ChainError::FlagMismatch { flag: "spv" });
        }
        if self.prune != requested.prune {
            return Err(ChainError::FlagMismatch { flag: "prune" });
        }
        if self.index_tx != requested.index_tx {
            return Err(ChainError::FlagMismatch { flag: "index-tx" });
        }
        if self.index_address != requested.index_address {
            return Err(ChainError::FlagMismatch {
                flag: "index-address",
            });
        }
        Ok(())
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(5);
        w.put_u32(self.network);
        let mut bits = 0u8;
        if self.spv {
            bits |= FLAG_SPV;
        }
        if self.prune {
            bits |= FLAG_PRUNE;
        }
        if self.index_tx {
            bits |= FLAG_INDEX_TX;
        }
        if self.index_address {
            bits |= FLAG_INDEX_ADDRESS;
        }
        w.put_u8(bits);
        w.into_vec()
    }

    pub fn decode(buf: &[u8]) -> ChainResult<Self> {
        let mut r = Reader::new(buf, "flags");
        let network = r.get_u32()?;
        let bits = r.get_u8()?;
        r.finish()?;
        Ok(Self {
            network,
            spv: bits & FLAG_SPV != 0,
            prune: bits & FLAG_PRUNE != 0,
            index_tx: bits & FLAG_INDEX_TX != 0,
            index_address: bits & FLAG_INDEX_ADDRESS != 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::Output;

    #[test]
    fn chain_state_accounting_is_symmetric() {
        let mut state = ChainState::default();
        let a = Output::new(70, [1; 32]);
        let b = Output::new(30, [2; 32]);

        state.add(&a);
        state.add(&b);
        assert_eq!(state.coin, 2);
        assert_eq!(state.value, 100);

        state.burn(&a);
        assert_eq!(state.burned, 70);
        assert_eq!(state.value, 100);

        state.unburn(&a);
        state.spend(&b);
        state.spend(&a);
        assert_eq!(state.coin, 0);
        assert_eq!(state.value, 0);
        assert_eq!(state.burned, 0);
    }

    #[test]
    fn chain_state_round_trip() {
        let mut state = ChainState::default();
        state.tx = 9;
        state.coin = 4;
        state.value = 1234;
        state.burned = 55;
        let bytes = state.commit([7u8; 32]);
        assert!(state.committed);

        let back = ChainState::decode(&bytes).unwrap();
        assert_eq!(back.tip, [7u8; 32]);
        assert_eq!(back.tx, 9);
        assert!(!back.committed);
    }

    #[test]
    fn tree_state_round_trip() {
        let mut state = TreeState::new([3u8; 32]);
        state.commit([4u8; 32], 36);
        state.compact([4u8; 32], 37);
        assert!(state.is_compacted());

        let back = TreeState::decode(&state.encode()).unwrap();
        assert_eq!(back.tree_root, [4u8; 32]);
        assert_eq!(back.commit_height, 36);
        assert_eq!(back.compaction_height, 37);
        assert!(!back.committed);
    }

    #[test]
    fn flags_round_trip_and_verify() {
        let flags = ChainFlags {
            network: 0xdead_cafe,
            spv: false,
            prune: true,
            index_tx: true,
            index_address: false,
        };
        let back = ChainFlags::decode(&flags.encode()).unwrap();
        assert_eq!(back, flags);
        back.verify(&flags).unwrap();

        let mut other = flags;
        other.index_tx = false;
        assert!(matches!(
            back.verify(&other),
            Err(ChainError::FlagMismatch { flag: "index-tx" })
        ));
    }
}
