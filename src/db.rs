//! The chain database: five substores under one atomic-commit discipline.
//!
//! A [`ChainDB`] composes the LMDB metadata store, the blob store, the
//! authenticated name tree, the staged LRU caches and the versionbit
//! cache. All mutators run through the batch coordinator in
//! [`batch`](self::batch); readers may run concurrently and observe either
//! the pre- or post-commit state, never a torn one.

use std::fs;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::cache::StagedLru;
use crate::coins::CoinEntry;
use crate::error::{ChainError, ChainResult};
use crate::layout;
use crate::options::{ChainOptions, Network};
use crate::primitives::{BitField, ChainEntry, Hash, Height, Outpoint};
use crate::state::deployments::{decode_table, encode_table};
use crate::state::{ChainFlags, ChainState, TreeState, VersionBits};
use crate::store::{BlobStore, KvBatch, KvStore, StoreLockGuard};
use crate::tree::Tree;

mod apply;
mod batch;
mod mutation;
mod read;

pub use read::BlockRef;

/// Schema version stored under the `V` key.
pub const DB_VERSION: u32 = 3;

const VERSION_TAG: &[u8; 5] = b"chain";

#[derive(Debug)]
pub struct ChainDB {
    pub(crate) options: ChainOptions,
    pub(crate) network: Network,
    pub(crate) kv: KvStore,
    pub(crate) blobs: BlobStore,
    pub(crate) tree: Mutex<Tree>,
    pub(crate) state: RwLock<Arc<ChainState>>,
    pub(crate) tree_state: RwLock<Arc<TreeState>>,
    pub(crate) field: RwLock<BitField>,
    pub(crate) version_bits: Mutex<VersionBits>,
    pub(crate) flags: RwLock<ChainFlags>,
    pub(crate) cache_hash: Mutex<StagedLru<Hash, ChainEntry>>,
    pub(crate) cache_height: Mutex<StagedLru<Height, ChainEntry>>,
    pub(crate) cache_coin: Mutex<StagedLru<Outpoint, CoinEntry>>,
    /// Serializes mutators; readers never take it.
    pub(crate) write_gate: Mutex<()>,
    pub(crate) batch_active: AtomicBool,
    _lock: StoreLockGuard,
}

impl ChainDB {
    /// Open (or initialize) the database under `options.data_dir`.
    pub fn open(options: ChainOptions, network: Network) -> ChainResult<Self> {
        let lock = StoreLockGuard::acquire(&options.data_dir)?;

        let kv = KvStore::open(&options.kv_dir(), options.map_size)?;
        let blobs = BlobStore::open(&options.blob_dir(), options.compress_blobs)?;

        // A leftover temp directory means a compaction died before its
        // swap; the committed tree state is authoritative.
        let tree_tmp = options.tree_tmp_dir();
        if tree_tmp.exists() {
            tracing::warn!(path = ?tree_tmp, "Removing stale tree compaction directory");
            fs::remove_dir_all(&tree_tmp)?;
        }

        let tree = Tree::open(&options.tree_dir(), options.map_size)?;
        let requested = ChainFlags::from_options(&options, network.magic);

        let db = Self {
            kv,
            blobs,
            tree: Mutex::new(tree),
            state: RwLock::new(Arc::new(ChainState::default())),
            tree_state: RwLock::new(Arc::new(TreeState::new(Tree::empty_root()))),
            field: RwLock::new(BitField::new()),
            version_bits: Mutex::new(VersionBits::new()),
            flags: RwLock::new(requested),
            cache_hash: Mutex::new(StagedLru::new(options.entry_cache)),
            cache_height: Mutex::new(StagedLru::new(options.entry_cache)),
            cache_coin: Mutex::new(StagedLru::new(options.coin_cache)),
            write_gate: Mutex::new(()),
            batch_active: AtomicBool::new(false),
            options,
            network,
            _lock: lock,
        };

        if db.kv.get(&layout::version())?.is_none() {
            db.initialize(&requested)?;
        } else {
            db.check_version()?;
            db.verify_flags(&requested)?;
            db.verify_deployments()?;
            db.load_state()?;
        }

        Ok(db)
    }

    /// Flush nothing, close the tree store and release the directory lock.
    pub fn close(self) -> ChainResult<()> {
        self.tree.lock().close();
        tracing::info!("Chain database closed");
        Ok(())
    }

    pub fn options(&self) -> &ChainOptions {
        &self.options
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    /// Snapshot of the aggregate counters.
    pub fn chain_state(&self) -> ChainState {
        self.state.read().as_ref().clone()
    }

    pub fn tree_state(&self) -> TreeState {
        **self.tree_state.read()
    }

    fn initialize(&self, flags: &ChainFlags) -> ChainResult<()> {
        let mut ops = KvBatch::new();
        let mut version = Vec::with_capacity(9);
        version.extend_from_slice(VERSION_TAG);
        version.extend_from_slice(&DB_VERSION.to_le_bytes());
        ops.put(layout::version(), version);
        ops.put(layout::flags(), flags.encode());
        ops.put(
            layout::deployments(),
            encode_table(&self.network.deployments),
        );
        self.kv.write(&ops)?;

        self.save_genesis()?;
        tracing::info!(magic = self.network.magic, "Initialized chain database");
        Ok(())
    }

    fn save_genesis(&self) -> ChainResult<()> {
        let block = self.network.genesis.clone();
        let entry = ChainEntry::from_block(&block, None);
        let mut view = crate::coins::CoinView::new();
        self.save(&entry, &block, Some(&mut view))
    }

    fn check_version(&self) -> ChainResult<()> {
        let raw = self
            .kv
            .get(&layout::version())?
            .ok_or(ChainError::MissingRecord("version"))?;
        if raw.len() != 9 || &raw[0..5] != VERSION_TAG {
            return Err(ChainError::CorruptRecord {
                record: "version",
                reason: "bad tag",
            });
        }
        let found = u32::from_le_bytes(raw[5..9].try_into().unwrap());
        if found != DB_VERSION {
            return Err(ChainError::VersionMismatch {
                found,
                expected: DB_VERSION,
            });
        }
        Ok(())
    }

    /// Check the stored `O` record against the requested configuration.
    pub fn verify_flags(&self, requested: &ChainFlags) -> ChainResult<()> {
        let raw = self
            .kv
            .get(&layout::flags())?
            .ok_or(ChainError::MissingRecord("flags"))?;
        let stored = ChainFlags::decode(&raw)?;
        stored.verify(requested)?;
        *self.flags.write() = stored;
        Ok(())
    }

    /// Rewrite the `O` record from the current in-memory flags.
    pub fn save_flags(&self) -> ChainResult<()> {
        let mut ops = KvBatch::new();
        ops.put(layout::flags(), self.flags.read().encode());
        self.kv.write(&ops)
    }

    /// Rewrite the `D` table from the configured network deployments.
    pub fn save_deployments(&self) -> ChainResult<()> {
        let mut ops = KvBatch::new();
        ops.put(
            layout::deployments(),
            encode_table(&self.network.deployments),
        );
        self.kv.write(&ops)
    }

    /// Reconcile the stored deployment table with the configured one,
    /// invalidating cached versionbit state for any bit whose parameters
    /// changed. An unreadable table invalidates every bit.
    pub fn verify_deployments(&self) -> ChainResult<()> {
        let raw = self
            .kv
            .get(&layout::deployments())?
            .ok_or(ChainError::MissingRecord("deployment table"))?;

        let mut invalid: Vec<u8> = Vec::new();
        match decode_table(&raw) {
            Err(_) => {
                tracing::warn!("Deployment table unreadable; invalidating all versionbit state");
                invalid.extend(0..crate::state::deployments::VERSION_BITS);
            }
            Ok(stored) => {
                for deployment in &stored {
                    let current = self
                        .network
                        .deployments
                        .iter()
                        .find(|d| d.bit == deployment.bit);
                    if current != Some(deployment) {
                        invalid.push(deployment.bit);
                    }
                }
            }
        }

        if invalid.is_empty() {
            return Ok(());
        }

        let mut ops = KvBatch::new();
        {
            let mut cache = self.version_bits.lock();
            for bit in &invalid {
                cache.invalidate(*bit);
                for key in self.kv.prefix_keys(&layout::version_bit_prefix(*bit))? {
                    ops.del(key);
                }
            }
        }
        ops.put(
            layout::deployments(),
            encode_table(&self.network.deployments),
        );
        self.kv.write(&ops)?;
        tracing::info!(bits = ?invalid, "Invalidated versionbit state for changed deployments");
        Ok(())
    }

    /// Stored deployment table.
    pub fn get_deployments(&self) -> ChainResult<Vec<crate::state::Deployment>> {
        let raw = self
            .kv
            .get(&layout::deployments())?
            .ok_or(ChainError::MissingRecord("deployment table"))?;
        decode_table(&raw)
    }

    /// Cached versionbit state for `(bit, hash)`.
    pub fn version_state(&self, bit: u8, hash: &Hash) -> Option<u8> {
        self.version_bits.lock().get(bit, hash)
    }

    /// Stage a versionbit state; persisted by the next committed batch.
    pub fn set_version_state(&self, bit: u8, hash: Hash, state: u8) {
        self.version_bits.lock().set(bit, hash, state);
    }

    fn load_state(&self) -> ChainResult<()> {
        let raw = self
            .kv
            .get(&layout::state())?
            .ok_or(ChainError::MissingRecord("chain state"))?;
        let state = ChainState::decode(&raw)?;

        // SPV databases never commit the tree, so a missing anchor means
        // the empty tree rather than corruption.
        let tree_state = match self.kv.get(&layout::tree_state())? {
            Some(raw) => TreeState::decode(&raw)?,
            None => TreeState::new(Tree::empty_root()),
        };

        // The committed tree root is the recovery anchor: re-injecting it
        // discards any tree writes that outran the last KV commit.
        self.tree.lock().inject(tree_state.tree_root)?;

        if let Some(raw) = self.kv.get(&layout::field())? {
            *self.field.write() = BitField::decode(&raw)?;
        }

        {
            let mut cache = self.version_bits.lock();
            for (key, value) in self.kv.prefix(&[layout::VERSION_BIT])? {
                if key.len() == 34 && value.len() == 1 {
                    let mut hash = [0u8; 32];
                    hash.copy_from_slice(&key[2..34]);
                    cache.load(key[1], hash, value[0]);
                }
            }
        }

        tracing::info!(
            tip = ?&state.tip[..4],
            tx = state.tx,
            coin = state.coin,
            "Loaded chain state"
        );

        *self.state.write() = Arc::new(state);
        *self.tree_state.write() = Arc::new(tree_state);

        if self.flags.read().prune {
            self.retry_pending_prunes();
        }

        Ok(())
    }

    /// Re-run the idempotent prune sweep; a crash between a blob prune and
    /// its flag write leaves orphans this cleans up.
    fn retry_pending_prunes(&self) {
        let result = (|| -> ChainResult<()> {
            let tip = self.chain_state().tip;
            let Some(tip) = self.get_entry_by_hash(&tip)? else {
                return Ok(());
            };
            if tip.height < self.network.keep_blocks {
                return Ok(());
            }
            let end = tip.height - self.network.keep_blocks;
            let start = self.network.prune_after_height + 1;
            if end <= start {
                return Ok(());
            }
            let mut batch = self.blobs.batch();
            for height in start..=end {
                if let Some(hash) = self.get_hash(height)? {
                    batch.prune(crate::store::BlobKind::Block, hash);
                    batch.prune(crate::store::BlobKind::Undo, hash);
                }
            }
            self.blobs.commit_prunes(&batch)
        })();
        if let Err(err) = result {
            tracing::warn!(?err, "Prune retry failed; will retry on next open");
        }
    }
}
