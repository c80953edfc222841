//! Batch coordinator.
//!
//! Every mutation runs inside [`ChainDB::with_batch`]: the writer gate is
//! taken, the caches and pending states enter staged mode, the operation
//! body fills the batch, and the commit applies the substores in a fixed
//! order:
//!
//! 1. blob writes (a later failure only leaves orphan blobs),
//! 2. the key-value batch, atomically,
//! 3. the in-memory chain-state swap (if the batch committed a tip),
//! 4. the in-memory tree-state swap,
//! 5. cache promotion and versionbit flush,
//! 6. blob prunes (idempotent, retried on the next open if they fail).
//!
//! A failure in (1) or (2) rolls the staged layers back; the caller
//! observes the pre-batch state unchanged.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::error::ChainResult;
use crate::layout;
use crate::primitives::BitField;
use crate::state::{ChainState, TreeState};
use crate::store::{BlobBatch, KvBatch};

use super::ChainDB;

/// One in-flight chain transition across all substores.
pub(crate) struct Batch {
    pub ops: KvBatch,
    pub blob: BlobBatch,
    pub pending: ChainState,
    pub pending_tree: TreeState,
    pub pending_field: Option<BitField>,
}

impl ChainDB {
    /// Run `body` inside a fresh batch and commit it on success.
    pub(crate) fn with_batch<T>(
        &self,
        body: impl FnOnce(&mut Batch) -> ChainResult<T>,
    ) -> ChainResult<T> {
        let _gate = self.write_gate.lock();
        let was_active = self.batch_active.swap(true, Ordering::AcqRel);
        assert!(!was_active, "batch already active");

        self.cache_hash.lock().start();
        self.cache_height.lock().start();
        self.cache_coin.lock().start();

        let mut batch = Batch {
            ops: KvBatch::new(),
            blob: self.blobs.batch(),
            pending: self.state.read().inherit(),
            pending_tree: self.tree_state.read().inherit(),
            pending_field: None,
        };

        match body(&mut batch) {
            Ok(value) => {
                self.commit_batch(batch)?;
                Ok(value)
            }
            Err(err) => {
                self.rollback_staged();
                Err(err)
            }
        }
    }

    fn commit_batch(&self, batch: Batch) -> ChainResult<()> {
        if let Err(err) = self.blobs.commit_writes(&batch.blob) {
            self.rollback_staged();
            return Err(err);
        }

        if let Err(err) = self.kv.write(&batch.ops) {
            self.rollback_staged();
            return Err(err);
        }

        if batch.pending.committed {
            *self.state.write() = Arc::new(batch.pending);
        }
        if batch.pending_tree.committed {
            *self.tree_state.write() = Arc::new(batch.pending_tree);
        }
        if let Some(field) = batch.pending_field {
            *self.field.write() = field;
        }

        self.cache_hash.lock().commit();
        self.cache_height.lock().commit();
        self.cache_coin.lock().commit();
        self.version_bits.lock().commit();
        self.batch_active.store(false, Ordering::Release);

        if batch.blob.has_prunes() {
            if let Err(err) = self.blobs.commit_prunes(&batch.blob) {
                tracing::warn!(?err, "Blob prune failed; retried on next open");
            }
        }

        Ok(())
    }

    fn rollback_staged(&self) {
        self.cache_hash.lock().rollback();
        self.cache_height.lock().rollback();
        self.cache_coin.lock().rollback();
        self.version_bits.lock().rollback();
        self.batch_active.store(false, Ordering::Release);
    }

    /// Fold the pending versionbit updates into the batch as `v` puts.
    pub(crate) fn flush_version_bits(&self, batch: &mut Batch) {
        for (bit, hash, state) in self.version_bits.lock().pending() {
            batch.ops.put(layout::version_bit(bit, &hash), vec![state]);
        }
    }
}
