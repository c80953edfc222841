//! Database configuration and network parameters.

use std::path::{Path, PathBuf};

use crate::primitives::{Block, BlockHeader, Height, Input, Outpoint, Output, Transaction};
use crate::state::Deployment;
use crate::store::kv::DEFAULT_MAP_SIZE;
use crate::tree::Tree;

/// One base unit of currency.
pub const COIN: u64 = 1_000_000;

/// Consensus-level parameters the database needs: identity, tree cadence,
/// prune window and the genesis block.
#[derive(Debug, Clone)]
pub struct Network {
    pub magic: u32,
    /// Height period at which the name tree is committed.
    pub tree_interval: Height,
    /// Number of recent blocks pruning always retains.
    pub keep_blocks: Height,
    /// Blocks at or below this height are never pruned.
    pub prune_after_height: Height,
    /// Blocks a name may go unrenewed before expiring.
    pub renewal_window: Height,
    pub deployments: Vec<Deployment>,
    pub genesis: Block,
}

impl Network {
    /// Main network parameters.
    pub fn main() -> Self {
        Self {
            magic: 0x5b6d_7452,
            tree_interval: 36,
            keep_blocks: 288,
            prune_after_height: 1_000,
            renewal_window: 105_120,
            deployments: vec![Deployment {
                bit: 28,
                start_time: 0,
                timeout: u32::MAX,
                threshold: -1,
                window: -1,
            }],
            genesis: Self::build_genesis(0x5b6d_7452, 1_580_745_080),
        }
    }

    /// Small-parameter network for local testing.
    pub fn regtest() -> Self {
        Self {
            magic: 0x8efa_1fbe,
            tree_interval: 5,
            keep_blocks: 10,
            prune_after_height: 0,
            renewal_window: 100,
            deployments: vec![Deployment {
                bit: 28,
                start_time: 0,
                timeout: u32::MAX,
                threshold: -1,
                window: -1,
            }],
            genesis: Self::build_genesis(0x8efa_1fbe, 1_580_745_078),
        }
    }

    /// Replace the genesis block, for tests that need custom outputs.
    pub fn with_genesis(mut self, genesis: Block) -> Self {
        self.genesis = genesis;
        self
    }

    fn build_genesis(magic: u32, time: u64) -> Block {
        let coinbase = Transaction::new(
            vec![Input::new(Outpoint::null())],
            vec![Output::new(2_002 * COIN, [0x11u8; 32])],
        );
        let header = BlockHeader {
            version: 0,
            prev_block: [0u8; 32],
            merkle_root: Block::compute_merkle_root(std::slice::from_ref(&coinbase)),
            tree_root: Tree::empty_root(),
            time,
            bits: 0x207f_ffff,
            nonce: magic,
        };
        Block::new(header, vec![coinbase])
    }
}

/// Open-time database options.
#[derive(Debug, Clone)]
pub struct ChainOptions {
    pub data_dir: PathBuf,
    pub spv: bool,
    pub prune: bool,
    pub index_tx: bool,
    pub index_address: bool,
    /// Entry-cache capacity (hash- and height-keyed caches each).
    pub entry_cache: usize,
    pub coin_cache: usize,
    pub map_size: usize,
    pub compress_blobs: bool,
}

impl ChainOptions {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            spv: false,
            prune: false,
            index_tx: false,
            index_address: false,
            entry_cache: 4_096,
            coin_cache: 16_384,
            map_size: DEFAULT_MAP_SIZE,
            compress_blobs: true,
        }
    }

    pub fn with_spv(mut self, spv: bool) -> Self {
        self.spv = spv;
        self
    }

    pub fn with_prune(mut self, prune: bool) -> Self {
        self.prune = prune;
        self
    }

    pub fn with_index_tx(mut self, index_tx: bool) -> Self {
        self.index_tx = index_tx;
        self
    }

    pub fn with_index_address(mut self, index_address: bool) -> Self {
        self.index_address = index_address;
        self
    }

    pub fn with_map_size(mut self, map_size: usize) -> Self {
        self.map_size = map_size;
        self
    }

    pub fn with_compress_blobs(mut self, compress: bool) -> Self {
        self.compress_blobs = compress;
        self
    }

    pub(crate) fn kv_dir(&self) -> PathBuf {
        self.data_dir.join("chain")
    }

    pub(crate) fn blob_dir(&self) -> PathBuf {
        self.data_dir.join("blocks")
    }

    pub(crate) fn tree_dir(&self) -> PathBuf {
        self.data_dir.join("tree")
    }

    pub(crate) fn tree_tmp_dir(&self) -> PathBuf {
        self.data_dir.join("tree~")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_is_deterministic() {
        let a = Network::regtest().genesis.hash();
        let b = Network::regtest().genesis.hash();
        assert_eq!(a, b);
        assert_ne!(a, Network::main().genesis.hash());
    }

    #[test]
    fn genesis_commits_to_empty_tree() {
        let genesis = Network::regtest().genesis;
        assert_eq!(genesis.header.tree_root, Tree::empty_root());
        assert!(genesis.txs[0].is_coinbase());
    }
}
