//! UTXO and name-state application.
//!
//! Covenant value accounting: the `REGISTER..=REVOKE` range is locked and
//! never touches the `value` counter; `REGISTER` outputs burn their value
//! permanently; claims credit value only on their first sequence. The same
//! rules run mirrored on disconnect.

use std::sync::Arc;

use crate::coins::{CoinEntry, CoinView};
use crate::error::{ChainError, ChainResult};
use crate::layout;
use crate::primitives::{Block, ChainEntry, Hash, NameUndo, Outpoint, Transaction};
use crate::store::BlobKind;

use super::batch::Batch;
use super::ChainDB;

/// Claim covenant items: 0 name-hash, 1 claim slot, 2 name, 3 flags,
/// 4 commitment, 5 sequence.
const CLAIM_SLOT_ITEM: usize = 1;
const CLAIM_SEQUENCE_ITEM: usize = 5;

impl ChainDB {
    pub(crate) fn connect_block(
        &self,
        batch: &mut Batch,
        entry: &ChainEntry,
        block: &Block,
        view: &mut CoinView,
    ) -> ChainResult<()> {
        batch.pending.connect(block);
        if self.options.spv {
            return Ok(());
        }

        for (i, tx) in block.txs.iter().enumerate() {
            if i > 0 {
                for input in &tx.inputs {
                    let output = view
                        .get_output(&input.prevout)
                        .ok_or(ChainError::MissingRecord("spent coin in view"))?
                        .clone();
                    if output.covenant.is_locked() {
                        continue;
                    }
                    batch.pending.spend(&output);
                }
            }

            let txid = tx.hash();
            for (j, output) in tx.outputs.iter().enumerate() {
                if output.is_unspendable() {
                    continue;
                }
                let covenant = &output.covenant;
                if covenant.is_register() {
                    batch.pending.burn(output);
                } else if covenant.is_locked() {
                    // Locked value, bookkeeping only.
                } else if covenant.is_claim() {
                    if covenant.get_u32(CLAIM_SEQUENCE_ITEM) == Some(1) {
                        batch.pending.add(output);
                    }
                } else {
                    batch.pending.add(output);
                }

                let outpoint = Outpoint::new(txid, j as u32);
                if !view.coins.contains_key(&outpoint) {
                    view.add_coin(outpoint, CoinEntry::from_tx(tx, j, entry.height));
                }
            }

            if i == 0 {
                // First-sequence claims mark their slot in the bitfield.
                for output in &tx.outputs {
                    let covenant = &output.covenant;
                    if covenant.is_claim()
                        && covenant.get_u32(CLAIM_SEQUENCE_ITEM) == Some(1)
                    {
                        if let Some(slot) = covenant.get_u32(CLAIM_SLOT_ITEM) {
                            view.bits.set.push(slot);
                        }
                    }
                }
            }

            self.index_tx(batch, tx, &txid, view, entry, i as u32);
        }

        self.save_view(batch, view);

        if !view.undo.is_empty() {
            batch
                .blob
                .write(BlobKind::Undo, entry.hash, view.undo.encode());
        }

        self.prune_block_blobs(batch, entry)?;
        self.connect_names(batch, view, entry)
    }

    pub(crate) fn disconnect_block(
        &self,
        batch: &mut Batch,
        entry: &ChainEntry,
        block: &Block,
    ) -> ChainResult<CoinView> {
        let mut view = CoinView::new();
        batch.pending.disconnect(block);
        if self.options.spv {
            return Ok(view);
        }

        let hash = entry.hash;
        let mut undo = self.get_undo_coins(&hash)?.unwrap_or_default();

        let spends_inputs = block.txs.iter().skip(1).any(|tx| !tx.inputs.is_empty());
        if undo.is_empty() && spends_inputs {
            return Err(ChainError::MissingUndo(hash));
        }

        for (i, tx) in block.txs.iter().enumerate().rev() {
            let txid = tx.hash();

            for (j, output) in tx.outputs.iter().enumerate().rev() {
                if output.is_unspendable() {
                    continue;
                }
                let covenant = &output.covenant;
                if covenant.is_register() {
                    batch.pending.unburn(output);
                } else if covenant.is_locked() {
                    // Locked value, bookkeeping only.
                } else if covenant.is_claim() {
                    if covenant.get_u32(CLAIM_SEQUENCE_ITEM) == Some(1) {
                        batch.pending.spend(output);
                    }
                } else {
                    batch.pending.spend(output);
                }
                view.remove_coin(
                    Outpoint::new(txid, j as u32),
                    CoinEntry::from_tx(tx, j, entry.height),
                );
            }

            if i == 0 {
                // The coinbase has no undo coins; its claims clear the
                // slots they set.
                for output in &tx.outputs {
                    let covenant = &output.covenant;
                    if covenant.is_claim()
                        && covenant.get_u32(CLAIM_SEQUENCE_ITEM) == Some(1)
                    {
                        if let Some(slot) = covenant.get_u32(CLAIM_SLOT_ITEM) {
                            view.bits.cleared.push(slot);
                        }
                    }
                }
            } else {
                for input in tx.inputs.iter().rev() {
                    let coin = match undo.pop() {
                        Some(coin) => coin,
                        None => panic!("Undo coins data inconsistency"),
                    };
                    if !coin.output.covenant.is_locked() {
                        batch.pending.add(&coin.output);
                    }
                    view.add_coin(input.prevout, coin);
                }
            }

            self.unindex_tx(batch, tx, &txid, &view);
        }

        assert!(undo.is_empty(), "Undo coins data inconsistency");

        self.save_view(batch, &mut view);
        batch.blob.prune(BlobKind::Undo, hash);
        self.disconnect_names(batch, &mut view, entry)?;
        Ok(view)
    }

    /// Persist a view's dirty coins and bitfield delta into the batch.
    fn save_view(&self, batch: &mut Batch, view: &mut CoinView) {
        let mut cache = self.cache_coin.lock();
        for (outpoint, staged) in &view.coins {
            let key = layout::coin(&outpoint.hash, outpoint.index);
            if staged.spent {
                batch.ops.del(key);
                cache.unpush(*outpoint);
            } else if !staged.coin.output.covenant.is_locked() {
                batch.ops.put(key, staged.coin.encode());
                cache.push(*outpoint, Arc::new(staged.coin.clone()));
            }
        }
        drop(cache);

        if !view.bits.is_empty() {
            let mut field = self.field.read().clone();
            view.bits.apply(&mut field);
            batch.ops.put(layout::field(), field.encode());
            batch.pending_field = Some(field);
        }
    }

    fn connect_names(
        &self,
        batch: &mut Batch,
        view: &CoinView,
        entry: &ChainEntry,
    ) -> ChainResult<()> {
        let undo = view.name_undo();
        if undo.is_empty() {
            batch.ops.del(layout::name_undo(entry.height));
        } else {
            batch
                .ops
                .put(layout::name_undo(entry.height), undo.encode());
        }
        self.save_names(batch, view, entry, false)
    }

    fn disconnect_names(
        &self,
        batch: &mut Batch,
        view: &mut CoinView,
        entry: &ChainEntry,
    ) -> ChainResult<()> {
        if let Some(raw) = self.kv.get(&layout::name_undo(entry.height))? {
            let undo = NameUndo::decode(&raw)?;
            for (hash, prev) in undo.items {
                view.restore_name(hash, prev);
            }
            batch.ops.del(layout::name_undo(entry.height));
        }
        self.save_names(batch, view, entry, true)
    }

    /// Apply staged name deltas to the tree transaction and, on interval
    /// boundaries, move the tree root forward (commit) or back (inject).
    fn save_names(
        &self,
        batch: &mut Batch,
        view: &CoinView,
        entry: &ChainEntry,
        revert: bool,
    ) -> ChainResult<()> {
        let mut tree = self.tree.lock();

        for (hash, delta) in &view.names {
            match &delta.state {
                Some(state) => tree.insert(*hash, state.encode()),
                None => tree.remove(*hash),
            }
        }

        if entry.height % self.network.tree_interval == 0 {
            let record = if revert {
                // The transaction deltas alone cannot recover an earlier
                // root; rewind to the snapshot the header commits to.
                tree.inject(entry.tree_root)?;
                let height = entry.height.saturating_sub(self.network.tree_interval);
                batch.pending_tree.commit(entry.tree_root, height)
            } else {
                let root = tree.commit()?;
                batch.pending_tree.commit(root, entry.height)
            };
            batch.ops.put(layout::tree_state(), record);
        }

        Ok(())
    }

    fn index_tx(
        &self,
        batch: &mut Batch,
        tx: &Transaction,
        txid: &Hash,
        view: &CoinView,
        entry: &ChainEntry,
        index: u32,
    ) {
        let flags = *self.flags.read();

        if flags.index_tx {
            let meta = crate::primitives::TxMeta::new(tx.clone(), entry, index);
            batch.ops.put(layout::tx(txid), meta.encode());

            if flags.index_address {
                for output in &tx.outputs {
                    if output.is_unspendable() {
                        continue;
                    }
                    batch
                        .ops
                        .put(layout::tx_by_addr(&output.address, txid), Vec::new());
                }
                if !tx.is_coinbase() {
                    for input in &tx.inputs {
                        if let Some(output) = view.get_output(&input.prevout) {
                            batch
                                .ops
                                .put(layout::tx_by_addr(&output.address, txid), Vec::new());
                        }
                    }
                }
            }
        }

        if flags.index_address {
            for (j, output) in tx.outputs.iter().enumerate() {
                if output.is_unspendable() {
                    continue;
                }
                batch.ops.put(
                    layout::coin_by_addr(&output.address, txid, j as u32),
                    Vec::new(),
                );
            }
            if !tx.is_coinbase() {
                for input in &tx.inputs {
                    if let Some(output) = view.get_output(&input.prevout) {
                        batch.ops.del(layout::coin_by_addr(
                            &output.address,
                            &input.prevout.hash,
                            input.prevout.index,
                        ));
                    }
                }
            }
        }
    }

    fn unindex_tx(&self, batch: &mut Batch, tx: &Transaction, txid: &Hash, view: &CoinView) {
        let flags = *self.flags.read();

        if flags.index_tx {
            batch.ops.del(layout::tx(txid));

            if flags.index_address {
                for output in &tx.outputs {
                    if output.is_unspendable() {
                        continue;
                    }
                    batch.ops.del(layout::tx_by_addr(&output.address, txid));
                }
                if !tx.is_coinbase() {
                    for input in &tx.inputs {
                        if let Some(output) = view.get_output(&input.prevout) {
                            batch.ops.del(layout::tx_by_addr(&output.address, txid));
                        }
                    }
                }
            }
        }

        if flags.index_address {
            for (j, output) in tx.outputs.iter().enumerate() {
                if output.is_unspendable() {
                    continue;
                }
                batch
                    .ops
                    .del(layout::coin_by_addr(&output.address, txid, j as u32));
            }
            if !tx.is_coinbase() {
                for input in &tx.inputs {
                    if let Some(output) = view.get_output(&input.prevout) {
                        batch.ops.put(
                            layout::coin_by_addr(
                                &output.address,
                                &input.prevout.hash,
                                input.prevout.index,
                            ),
                            Vec::new(),
                        );
                    }
                }
            }
        }
    }

    /// Queue the blob prune for the block falling out of the keep window.
    fn prune_block_blobs(&self, batch: &mut Batch, entry: &ChainEntry) -> ChainResult<()> {
        if !self.flags.read().prune {
            return Ok(());
        }
        if entry.height < self.network.keep_blocks {
            return Ok(());
        }
        let height = entry.height - self.network.keep_blocks;
        if height <= self.network.prune_after_height {
            return Ok(());
        }
        if let Some(hash) = self.get_hash(height)? {
            batch.blob.prune(BlobKind::Block, hash);
            batch.blob.prune(BlobKind::Undo, hash);
        }
        Ok(())
    }
}
