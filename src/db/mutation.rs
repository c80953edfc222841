//! Chain mutation engine: save, reconnect, disconnect, reset, prune and
//! tree compaction.

use std::fs;
use std::sync::Arc;

use crate::coins::CoinView;
use crate::error::{ChainError, ChainResult};
use crate::layout;
use crate::primitives::{Block, ChainEntry};
use crate::store::{BlobKind, KvBatch};

use super::batch::Batch;
use super::read::BlockRef;
use super::ChainDB;

impl ChainDB {
    /// Store a block entry. With a view, the block is connected at the tip
    /// in the same batch; without one it is only recorded (alternate
    /// chains, headers-first download).
    pub fn save(
        &self,
        entry: &ChainEntry,
        block: &Block,
        view: Option<&mut CoinView>,
    ) -> ChainResult<()> {
        self.with_batch(|batch| {
            self.flush_version_bits(batch);

            batch.ops.put(
                layout::height_by_hash(&entry.hash),
                entry.height.to_le_bytes().to_vec(),
            );
            batch.ops.put(layout::entry(&entry.hash), entry.encode());
            self.cache_hash.lock().push(entry.hash, Arc::new(*entry));

            batch.ops.del(layout::tip(&entry.prev_block));
            batch.ops.put(layout::tip(&entry.hash), Vec::new());

            match view {
                None => {
                    self.save_block(batch, entry, block);
                }
                Some(view) => {
                    batch
                        .ops
                        .put(layout::next(&entry.prev_block), entry.hash.to_vec());
                    batch
                        .ops
                        .put(layout::hash_by_height(entry.height), entry.hash.to_vec());
                    self.cache_height.lock().push(entry.height, Arc::new(*entry));

                    self.save_block(batch, entry, block);
                    self.connect_block(batch, entry, block, view)?;

                    let record = batch.pending.commit(entry.hash);
                    batch.ops.put(layout::state(), record);
                }
            }
            Ok(())
        })?;

        tracing::debug!(height = entry.height, "Saved block");
        Ok(())
    }

    fn save_block(&self, batch: &mut Batch, entry: &ChainEntry, block: &Block) {
        if self.options.spv {
            return;
        }
        batch.blob.write(BlobKind::Block, entry.hash, block.encode());
    }

    /// Re-attach a previously stored block whose parent is the current tip.
    pub fn reconnect(
        &self,
        entry: &ChainEntry,
        block: &Block,
        view: &mut CoinView,
    ) -> ChainResult<()> {
        self.with_batch(|batch| {
            self.flush_version_bits(batch);

            batch
                .ops
                .put(layout::next(&entry.prev_block), entry.hash.to_vec());
            batch
                .ops
                .put(layout::hash_by_height(entry.height), entry.hash.to_vec());
            batch.ops.del(layout::tip(&entry.prev_block));
            batch.ops.put(layout::tip(&entry.hash), Vec::new());
            self.cache_hash.lock().push(entry.hash, Arc::new(*entry));
            self.cache_height.lock().push(entry.height, Arc::new(*entry));

            self.connect_block(batch, entry, block, view)?;

            let record = batch.pending.commit(entry.hash);
            batch.ops.put(layout::state(), record);
            Ok(())
        })?;

        tracing::debug!(height = entry.height, "Reconnected block");
        Ok(())
    }

    /// Detach the tip block, returning the view that restores its inputs.
    pub fn disconnect(&self, entry: &ChainEntry, block: &Block) -> ChainResult<CoinView> {
        let view = self.with_batch(|batch| {
            self.flush_version_bits(batch);

            batch.ops.del(layout::next(&entry.prev_block));
            batch.ops.del(layout::hash_by_height(entry.height));
            batch.ops.del(layout::tip(&entry.hash));
            batch.ops.put(layout::tip(&entry.prev_block), Vec::new());
            self.cache_height.lock().unpush(entry.height);

            let view = self.disconnect_block(batch, entry, block)?;

            let record = batch.pending.commit(entry.prev_block);
            batch.ops.put(layout::state(), record);
            Ok(view)
        })?;

        tracing::debug!(height = entry.height, "Disconnected block");
        Ok(view)
    }

    /// Rewind the main chain to `target`, removing alternate chains and
    /// every record of the disconnected blocks. One batch per block, so a
    /// crash resumes from a consistent intermediate tip.
    pub fn reset(&self, target: impl Into<BlockRef>) -> ChainResult<ChainEntry> {
        let target = target.into();
        let target = match target {
            BlockRef::Hash(hash) => self
                .get_entry_by_hash(&hash)?
                .ok_or(ChainError::UnknownBlock(hash))?,
            BlockRef::Height(height) => self
                .get_entry_by_height(height)?
                .ok_or(ChainError::UnknownHeight(height))?,
        };

        if !self.is_main_chain(&target)? {
            return Err(ChainError::NotMainChain(target.hash));
        }
        if self.flags.read().prune {
            return Err(ChainError::ResetWhilePruned);
        }
        {
            let tree_state = self.tree_state.read();
            if tree_state.is_compacted() {
                return Err(ChainError::ResetWhileCompacted {
                    compaction_height: tree_state.compaction_height,
                });
            }
        }

        self.remove_chains()?;

        let tip_hash = self.state.read().tip;
        let mut tip = self
            .get_entry_by_hash(&tip_hash)?
            .ok_or(ChainError::UnknownBlock(tip_hash))?;

        tracing::info!(from = tip.height, to = target.height, "Resetting chain");

        loop {
            if tip.hash == target.hash {
                self.with_batch(|batch| {
                    self.flush_version_bits(batch);
                    let record = batch.pending.commit(target.hash);
                    batch.ops.put(layout::state(), record);
                    Ok(())
                })?;
                break;
            }

            assert!(!tip.is_genesis(), "reset walked past genesis");
            let prev = self
                .get_entry_by_hash(&tip.prev_block)?
                .ok_or(ChainError::UnknownBlock(tip.prev_block))?;

            let removed = tip;
            self.with_batch(|batch| {
                self.flush_version_bits(batch);

                batch.ops.del(layout::tip(&removed.hash));
                batch.ops.put(layout::tip(&removed.prev_block), Vec::new());
                batch.ops.del(layout::hash_by_height(removed.height));
                batch.ops.del(layout::height_by_hash(&removed.hash));
                batch.ops.del(layout::entry(&removed.hash));
                batch.ops.del(layout::next(&removed.prev_block));
                self.cache_hash.lock().unpush(removed.hash);
                self.cache_height.lock().unpush(removed.height);

                self.remove_block(batch, &removed)?;

                let record = batch.pending.commit(removed.prev_block);
                batch.ops.put(layout::state(), record);
                Ok(())
            })?;

            tracing::debug!(height = removed.height, "Removed block during reset");
            tip = prev;
        }

        Ok(target)
    }

    /// Disconnect a block being removed entirely and prune its blobs.
    fn remove_block(&self, batch: &mut Batch, entry: &ChainEntry) -> ChainResult<()> {
        if self.options.spv {
            return Ok(());
        }
        let raw = self
            .blobs
            .read(BlobKind::Block, &entry.hash)?
            .ok_or(ChainError::UnknownBlock(entry.hash))?;
        let block = Block::decode(&raw)?;
        self.disconnect_block(batch, entry, &block)?;
        batch.blob.prune(BlobKind::Block, entry.hash);
        Ok(())
    }

    /// Delete every alternate-chain entry back to its main-chain fork.
    pub fn remove_chains(&self) -> ChainResult<()> {
        let tips = self.get_tips()?;
        self.with_batch(|batch| {
            for tip in tips {
                if self.is_main_hash(&tip)? {
                    continue;
                }
                batch.ops.del(layout::tip(&tip));
                let mut hash = tip;
                while !self.is_main_hash(&hash)? {
                    let entry = self
                        .get_entry_by_hash(&hash)?
                        .ok_or(ChainError::UnknownBlock(hash))?;
                    batch.ops.del(layout::entry(&hash));
                    batch.ops.del(layout::height_by_hash(&hash));
                    self.cache_hash.lock().unpush(hash);
                    hash = entry.prev_block;
                }
                tracing::debug!(tip = ?&tip[..4], "Removed alternate chain");
            }
            Ok(())
        })
    }

    /// Delete block and undo blobs outside the keep window. The flag write
    /// follows the blob prunes so an interrupted prune simply reruns.
    pub fn prune(&self) -> ChainResult<bool> {
        if self.options.spv {
            return Err(ChainError::PruneInSpv);
        }
        if self.flags.read().prune {
            return Err(ChainError::AlreadyPruned);
        }

        let _gate = self.write_gate.lock();

        let tip_hash = self.state.read().tip;
        let tip = self
            .get_entry_by_hash(&tip_hash)?
            .ok_or(ChainError::UnknownBlock(tip_hash))?;

        if tip.height < self.network.keep_blocks {
            return Ok(false);
        }
        let end = tip.height - self.network.keep_blocks;
        let start = self.network.prune_after_height + 1;
        if end <= start {
            return Ok(false);
        }

        let mut batch = self.blobs.batch();
        for height in start..=end {
            if let Some(hash) = self.get_hash(height)? {
                batch.prune(BlobKind::Block, hash);
                batch.prune(BlobKind::Undo, hash);
            }
        }
        self.blobs.commit_prunes(&batch)?;

        let mut flags = *self.flags.read();
        flags.prune = true;
        let mut ops = KvBatch::new();
        ops.put(layout::flags(), flags.encode());
        self.kv.write(&ops)?;
        *self.flags.write() = flags;

        tracing::info!(start, end, "Pruned block blobs");
        Ok(true)
    }

    /// Rewrite the tree store to contain only the state reachable from
    /// `entry.tree_root`.
    ///
    /// The target must sit one block past a tree-interval boundary, so the
    /// crash-marker `s` record keeps its alignment invariant.
    pub fn compact_tree(&self, entry: &ChainEntry) -> ChainResult<()> {
        if self.options.spv {
            return Err(ChainError::TreeInSpv);
        }
        if entry.height < 1 || (entry.height - 1) % self.network.tree_interval != 0 {
            return Err(ChainError::CompactionMisaligned {
                height: entry.height,
            });
        }
        {
            let tree_state = self.tree_state.read();
            if tree_state.is_compacted() && tree_state.compaction_root == entry.tree_root {
                return Ok(());
            }
        }

        // Crash marker: recovery re-injects this root before anything else.
        self.with_batch(|batch| {
            let record = batch.pending_tree.commit(entry.tree_root, entry.height - 1);
            batch.ops.put(layout::tree_state(), record);
            Ok(())
        })?;

        let tmp_dir = self.options.tree_tmp_dir();
        if tmp_dir.exists() {
            tracing::warn!(path = ?tmp_dir, "Removing stale tree compaction directory");
            fs::remove_dir_all(&tmp_dir)?;
        }

        {
            let mut tree = self.tree.lock();
            tree.inject(entry.tree_root)?;
            tree.compact(&tmp_dir)?;
        }

        self.with_batch(|batch| {
            let record = batch.pending_tree.compact(entry.tree_root, entry.height);
            batch.ops.put(layout::tree_state(), record);
            Ok(())
        })?;

        tracing::info!(height = entry.height, "Compacted name tree");
        Ok(())
    }
}
