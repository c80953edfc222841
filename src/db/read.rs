//! Read API: entries, blocks, coins, names, indices and rescans.

use std::sync::Arc;

use crate::coins::{CoinEntry, CoinView, UndoCoins};
use crate::encoding::Writer;
use crate::error::{ChainError, ChainResult};
use crate::filter::ScanFilter;
use crate::layout;
use crate::primitives::{
    hash_name, AddrHash, Block, ChainEntry, Hash, Height, NameHash, NameState, NameStatus,
    Outpoint, Transaction, TxMeta,
};
use crate::store::BlobKind;
use crate::tree::Proof;

use super::ChainDB;

/// Either side of the hash/height duality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRef {
    Hash(Hash),
    Height(Height),
}

impl From<Hash> for BlockRef {
    fn from(hash: Hash) -> Self {
        BlockRef::Hash(hash)
    }
}

impl From<Height> for BlockRef {
    fn from(height: Height) -> Self {
        BlockRef::Height(height)
    }
}

impl ChainDB {
    // ---- entries ---------------------------------------------------

    pub fn get_entry(&self, block: impl Into<BlockRef>) -> ChainResult<Option<ChainEntry>> {
        match block.into() {
            BlockRef::Hash(hash) => self.get_entry_by_hash(&hash),
            BlockRef::Height(height) => self.get_entry_by_height(height),
        }
    }

    pub fn get_entry_by_hash(&self, hash: &Hash) -> ChainResult<Option<ChainEntry>> {
        if let Some(entry) = self.cache_hash.lock().get(hash) {
            return Ok(Some(*entry));
        }
        let Some(raw) = self.kv.get(&layout::entry(hash))? else {
            return Ok(None);
        };
        let entry = ChainEntry::decode(&raw)?;
        self.cache_hash.lock().push(*hash, Arc::new(entry));
        Ok(Some(entry))
    }

    pub fn get_entry_by_height(&self, height: Height) -> ChainResult<Option<ChainEntry>> {
        if let Some(entry) = self.cache_height.lock().get(&height) {
            return Ok(Some(*entry));
        }

        // Reorg-race guard: only cache by height if the chain state did
        // not move underneath the read.
        let observed = self.state.read().clone();

        let Some(hash) = self.get_hash(height)? else {
            return Ok(None);
        };
        let Some(entry) = self.get_entry_by_hash(&hash)? else {
            return Ok(None);
        };

        if Arc::ptr_eq(&observed, &self.state.read()) {
            self.cache_height.lock().push(height, Arc::new(entry));
        }
        Ok(Some(entry))
    }

    /// Main-chain hash at `height` (`H` record).
    pub fn get_hash(&self, height: Height) -> ChainResult<Option<Hash>> {
        let Some(raw) = self.kv.get(&layout::hash_by_height(height))? else {
            return Ok(None);
        };
        raw.try_into().map(Some).map_err(|_| ChainError::CorruptRecord {
            record: "hash index",
            reason: "bad hash width",
        })
    }

    /// Stored height of `hash` (`h` record), main chain or not.
    pub fn get_height(&self, hash: &Hash) -> ChainResult<Option<Height>> {
        let Some(raw) = self.kv.get(&layout::height_by_hash(hash))? else {
            return Ok(None);
        };
        if raw.len() != 4 {
            return Err(ChainError::CorruptRecord {
                record: "height index",
                reason: "bad height width",
            });
        }
        Ok(Some(Height::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])))
    }

    pub fn has_entry(&self, hash: &Hash) -> ChainResult<bool> {
        Ok(self.kv.has(&layout::height_by_hash(hash))?)
    }

    pub fn get_tip(&self) -> ChainResult<Option<ChainEntry>> {
        let tip = self.state.read().tip;
        self.get_entry_by_hash(&tip)
    }

    pub fn get_previous(&self, entry: &ChainEntry) -> ChainResult<Option<ChainEntry>> {
        if entry.is_genesis() {
            return Ok(None);
        }
        self.get_entry_by_hash(&entry.prev_block)
    }

    /// Main-chain successor of `hash` (`n` record).
    pub fn get_next_hash(&self, hash: &Hash) -> ChainResult<Option<Hash>> {
        let Some(raw) = self.kv.get(&layout::next(hash))? else {
            return Ok(None);
        };
        raw.try_into().map(Some).map_err(|_| ChainError::CorruptRecord {
            record: "next index",
            reason: "bad hash width",
        })
    }

    pub fn get_next(&self, entry: &ChainEntry) -> ChainResult<Option<ChainEntry>> {
        match self.get_next_hash(&entry.hash)? {
            Some(hash) => self.get_entry_by_hash(&hash),
            None => Ok(None),
        }
    }

    /// Ancestor of `entry` at `height`: an index jump on the main chain, a
    /// parent walk off it.
    pub fn get_ancestor(&self, entry: &ChainEntry, height: Height) -> ChainResult<Option<ChainEntry>> {
        if height > entry.height {
            return Ok(None);
        }
        if self.is_main_chain(entry)? {
            return self.get_entry_by_height(height);
        }
        let mut cursor = *entry;
        while cursor.height > height {
            cursor = self
                .get_entry_by_hash(&cursor.prev_block)?
                .ok_or(ChainError::UnknownBlock(cursor.prev_block))?;
        }
        Ok(Some(cursor))
    }

    pub fn is_main_chain(&self, entry: &ChainEntry) -> ChainResult<bool> {
        if entry.hash == self.state.read().tip {
            return Ok(true);
        }
        if let Some(cached) = self.cache_height.lock().peek(&entry.height) {
            return Ok(cached.hash == entry.hash);
        }
        Ok(self.kv.has(&layout::next(&entry.hash))?)
    }

    pub fn is_main_hash(&self, hash: &Hash) -> ChainResult<bool> {
        match self.get_entry_by_hash(hash)? {
            Some(entry) => self.is_main_chain(&entry),
            None => Ok(false),
        }
    }

    /// Every main-chain hash, genesis first.
    pub fn get_hashes(&self) -> ChainResult<Vec<Hash>> {
        let mut hashes = Vec::new();
        for (_, value) in self.kv.prefix(&[layout::HASH_BY_HEIGHT])? {
            let hash: Hash = value.try_into().map_err(|_| ChainError::CorruptRecord {
                record: "hash index",
                reason: "bad hash width",
            })?;
            hashes.push(hash);
        }
        Ok(hashes)
    }

    /// Every stored entry, main chain and alternates.
    pub fn get_entries(&self) -> ChainResult<Vec<ChainEntry>> {
        let mut entries = Vec::new();
        for (_, value) in self.kv.prefix(&[layout::ENTRY])? {
            entries.push(ChainEntry::decode(&value)?);
        }
        Ok(entries)
    }

    /// All chain tips, main and alternate (`p` records).
    pub fn get_tips(&self) -> ChainResult<Vec<Hash>> {
        let mut tips = Vec::new();
        for key in self.kv.prefix_keys(&[layout::TIP])? {
            if let Some(hash) = layout::parse_hash_suffix(&key) {
                tips.push(hash);
            }
        }
        Ok(tips)
    }

    // ---- blocks ----------------------------------------------------

    pub fn get_raw_block(&self, hash: &Hash) -> ChainResult<Option<Vec<u8>>> {
        if self.options.spv {
            return Ok(None);
        }
        self.blobs.read(BlobKind::Block, hash)
    }

    pub fn get_block(&self, hash: &Hash) -> ChainResult<Option<Block>> {
        match self.get_raw_block(hash)? {
            Some(raw) => Ok(Some(Block::decode(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn has_block(&self, hash: &Hash) -> bool {
        !self.options.spv && self.blobs.has(BlobKind::Block, hash)
    }

    pub fn get_raw_undo(&self, hash: &Hash) -> ChainResult<Option<Vec<u8>>> {
        if self.options.spv {
            return Ok(None);
        }
        self.blobs.read(BlobKind::Undo, hash)
    }

    pub fn get_undo_coins(&self, hash: &Hash) -> ChainResult<Option<UndoCoins>> {
        match self.get_raw_undo(hash)? {
            Some(raw) => Ok(Some(UndoCoins::decode(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn has_undo(&self, hash: &Hash) -> bool {
        !self.options.spv && self.blobs.has(BlobKind::Undo, hash)
    }

    /// Rebuild the view a stored block was connected under, from its undo
    /// record.
    pub fn get_block_view(&self, block: &Block) -> ChainResult<CoinView> {
        let mut view = CoinView::new();
        let Some(mut undo) = self.get_undo_coins(&block.hash())? else {
            return Ok(view);
        };
        for tx in block.txs.iter().skip(1).rev() {
            for input in tx.inputs.iter().rev() {
                if let Some(coin) = undo.pop() {
                    view.add_coin(input.prevout, coin);
                }
            }
        }
        Ok(view)
    }

    // ---- coins -----------------------------------------------------

    /// Cached coin read.
    pub fn get_coin(&self, outpoint: &Outpoint) -> ChainResult<Option<CoinEntry>> {
        if let Some(coin) = self.cache_coin.lock().get(outpoint) {
            return Ok(Some(coin.as_ref().clone()));
        }
        let Some(coin) = self.read_coin(outpoint)? else {
            return Ok(None);
        };
        self.cache_coin
            .lock()
            .push(*outpoint, Arc::new(coin.clone()));
        Ok(Some(coin))
    }

    /// Uncached coin read straight from the metadata store.
    pub fn read_coin(&self, outpoint: &Outpoint) -> ChainResult<Option<CoinEntry>> {
        let Some(raw) = self
            .kv
            .get(&layout::coin(&outpoint.hash, outpoint.index))?
        else {
            return Ok(None);
        };
        Ok(Some(CoinEntry::decode(&raw)?))
    }

    /// Whether any output of `txid` is still unspent.
    pub fn has_coins(&self, txid: &Hash) -> ChainResult<bool> {
        Ok(!self.kv.prefix_keys(&layout::coin_prefix(txid))?.is_empty())
    }

    /// View resolving the inputs of `tx` from the UTXO set.
    pub fn get_coin_view(&self, tx: &Transaction) -> ChainResult<CoinView> {
        let mut view = CoinView::new();
        if tx.is_coinbase() {
            return Ok(view);
        }
        for input in &tx.inputs {
            if let Some(coin) = self.get_coin(&input.prevout)? {
                view.add_coin(input.prevout, coin);
            }
        }
        Ok(view)
    }

    /// `get_coin_view` extended by the tx index, resolving inputs whose
    /// coins were already spent.
    pub fn get_spent_view(&self, tx: &Transaction) -> ChainResult<CoinView> {
        let mut view = self.get_coin_view(tx)?;
        if tx.is_coinbase() {
            return Ok(view);
        }
        for input in &tx.inputs {
            if view.coins.contains_key(&input.prevout) {
                continue;
            }
            let Some(meta) = self.get_meta(&input.prevout.hash)? else {
                continue;
            };
            let index = input.prevout.index as usize;
            if index >= meta.tx.outputs.len() {
                continue;
            }
            let coin = CoinEntry {
                version: meta.tx.version,
                height: meta.height,
                coinbase: meta.tx.is_coinbase(),
                output: meta.tx.outputs[index].clone(),
            };
            view.add_coin(input.prevout, coin);
        }
        Ok(view)
    }

    // ---- names -----------------------------------------------------

    pub fn get_name_state(&self, hash: &NameHash) -> ChainResult<Option<NameState>> {
        let raw = self.tree.lock().get(hash)?;
        raw.map(|bytes| NameState::decode(&bytes)).transpose()
    }

    pub fn get_name_state_by_name(&self, name: &[u8]) -> ChainResult<Option<NameState>> {
        self.get_name_state(&hash_name(name))
    }

    pub fn get_name_status(&self, hash: &NameHash, height: Height) -> ChainResult<NameStatus> {
        match self.get_name_state(hash)? {
            None => Ok(NameStatus::Available),
            Some(state) => Ok(state.status(height, self.network.renewal_window)),
        }
    }

    /// Resolve a name at a historical committed root.
    pub fn lookup(&self, root: &Hash, key: &NameHash) -> ChainResult<Option<Vec<u8>>> {
        if self.options.spv {
            return Err(ChainError::TreeInSpv);
        }
        let tree = self.tree.lock();
        tree.snapshot(*root)?.get(key)
    }

    /// Merkle proof for a name at a historical committed root.
    pub fn prove(&self, root: &Hash, key: &NameHash) -> ChainResult<Proof> {
        if self.options.spv {
            return Err(ChainError::TreeInSpv);
        }
        let tree = self.tree.lock();
        tree.snapshot(*root)?.prove(key)
    }

    /// Current committed tree root.
    pub fn tree_root(&self) -> Hash {
        self.tree.lock().root_hash()
    }

    // ---- tx and address indices ------------------------------------

    pub fn get_meta(&self, txid: &Hash) -> ChainResult<Option<TxMeta>> {
        if !self.flags.read().index_tx {
            return Ok(None);
        }
        match self.kv.get(&layout::tx(txid))? {
            Some(raw) => Ok(Some(TxMeta::decode(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn get_tx(&self, txid: &Hash) -> ChainResult<Option<Transaction>> {
        Ok(self.get_meta(txid)?.map(|meta| meta.tx))
    }

    pub fn has_tx(&self, txid: &Hash) -> ChainResult<bool> {
        if !self.flags.read().index_tx {
            return Ok(false);
        }
        Ok(self.kv.has(&layout::tx(txid))?)
    }

    pub fn get_hashes_by_address(&self, addr: &AddrHash) -> ChainResult<Vec<Hash>> {
        let mut hashes = Vec::new();
        for key in self.kv.prefix_keys(&layout::tx_by_addr_prefix(addr))? {
            if let Some(txid) = layout::parse_tx_by_addr(&key) {
                hashes.push(txid);
            }
        }
        Ok(hashes)
    }

    pub fn get_coins_by_address(
        &self,
        addr: &AddrHash,
    ) -> ChainResult<Vec<(Outpoint, CoinEntry)>> {
        let mut coins = Vec::new();
        for key in self.kv.prefix_keys(&layout::coin_by_addr_prefix(addr))? {
            if let Some((txid, index)) = layout::parse_coin_by_addr(&key) {
                let outpoint = Outpoint::new(txid, index);
                if let Some(coin) = self.read_coin(&outpoint)? {
                    coins.push((outpoint, coin));
                }
            }
        }
        Ok(coins)
    }

    pub fn get_meta_by_address(&self, addr: &AddrHash) -> ChainResult<Vec<TxMeta>> {
        let mut metas = Vec::new();
        for txid in self.get_hashes_by_address(addr)? {
            if let Some(meta) = self.get_meta(&txid)? {
                metas.push(meta);
            }
        }
        Ok(metas)
    }

    pub fn get_tx_by_address(&self, addr: &AddrHash) -> ChainResult<Vec<Transaction>> {
        Ok(self
            .get_meta_by_address(addr)?
            .into_iter()
            .map(|meta| meta.tx)
            .collect())
    }

    // ---- rescan ----------------------------------------------------

    /// Walk the main chain from `start`, handing each entry and its
    /// filter-matched transactions to `iter`. Pruned blocks yield an
    /// empty list.
    pub fn scan<F>(
        &self,
        start: Option<BlockRef>,
        filter: &dyn ScanFilter,
        mut iter: F,
    ) -> ChainResult<()>
    where
        F: FnMut(&ChainEntry, &[Transaction]) -> ChainResult<()>,
    {
        let mut entry = match start {
            None => self
                .get_entry_by_height(0)?
                .ok_or(ChainError::UnknownHeight(0))?,
            Some(BlockRef::Hash(hash)) => self
                .get_entry_by_hash(&hash)?
                .ok_or(ChainError::UnknownBlock(hash))?,
            Some(BlockRef::Height(height)) => self
                .get_entry_by_height(height)?
                .ok_or(ChainError::UnknownHeight(height))?,
        };

        if !self.is_main_chain(&entry)? {
            return Err(ChainError::NotMainChain(entry.hash));
        }

        tracing::info!(height = entry.height, "Scanning chain");

        loop {
            let matched = self.scan_entry(&entry, filter)?;
            iter(&entry, &matched)?;
            match self.get_next(&entry)? {
                Some(next) => entry = next,
                None => break,
            }
        }
        Ok(())
    }

    /// Filter one stored block.
    pub fn scan_block(
        &self,
        block: impl Into<BlockRef>,
        filter: &dyn ScanFilter,
    ) -> ChainResult<Vec<Transaction>> {
        let entry = match block.into() {
            BlockRef::Hash(hash) => self
                .get_entry_by_hash(&hash)?
                .ok_or(ChainError::UnknownBlock(hash))?,
            BlockRef::Height(height) => self
                .get_entry_by_height(height)?
                .ok_or(ChainError::UnknownHeight(height))?,
        };
        self.scan_entry(&entry, filter)
    }

    fn scan_entry(
        &self,
        entry: &ChainEntry,
        filter: &dyn ScanFilter,
    ) -> ChainResult<Vec<Transaction>> {
        let Some(block) = self.get_block(&entry.hash)? else {
            if !self.flags.read().prune && !self.options.spv {
                return Err(ChainError::UnknownBlock(entry.hash));
            }
            return Ok(Vec::new());
        };

        let mut matched = Vec::new();
        for tx in block.txs {
            if tx_matches(&tx, filter) {
                matched.push(tx);
            }
        }
        Ok(matched)
    }
}

fn tx_matches(tx: &Transaction, filter: &dyn ScanFilter) -> bool {
    if filter.contains(&tx.hash()) {
        return true;
    }
    for output in &tx.outputs {
        if filter.contains(&output.address) {
            return true;
        }
    }
    if !tx.is_coinbase() {
        for input in &tx.inputs {
            let mut w = Writer::with_capacity(36);
            input.prevout.encode_into(&mut w);
            if filter.contains(&w.into_vec()) {
                return true;
            }
        }
    }
    false
}
