//! Spendable coins and the per-block working set.

use std::collections::BTreeMap;

use hashbrown::HashMap;

use crate::encoding::{Reader, Writer};
use crate::error::ChainResult;
use crate::primitives::{
    BitField, Height, NameHash, NameState, NameUndo, Outpoint, Output, Transaction,
};

/// Spendable form of an output plus the context it was created in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinEntry {
    pub version: u32,
    pub height: Height,
    pub coinbase: bool,
    pub output: Output,
}

impl CoinEntry {
    pub fn from_tx(tx: &Transaction, index: usize, height: Height) -> Self {
        Self {
            version: tx.version,
            height,
            coinbase: tx.is_coinbase(),
            output: tx.outputs[index].clone(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(64);
        w.put_u32(self.version);
        w.put_u32(self.height);
        w.put_u8(self.coinbase as u8);
        self.output.encode_into(&mut w);
        w.into_vec()
    }

    pub fn decode(buf: &[u8]) -> ChainResult<Self> {
        let mut r = Reader::new(buf, "coin");
        let coin = Self::decode_from(&mut r)?;
        r.finish()?;
        Ok(coin)
    }

    fn decode_from(r: &mut Reader<'_>) -> ChainResult<Self> {
        let version = r.get_u32()?;
        let height = r.get_u32()?;
        let coinbase = match r.get_u8()? {
            0 => false,
            1 => true,
            _ => return Err(r.corrupt("bad coinbase flag")),
        };
        let output = Output::decode_from(r)?;
        Ok(Self {
            version,
            height,
            coinbase,
            output,
        })
    }
}

/// Coins consumed by a block, recorded in application order and replayed
/// from the back on disconnect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UndoCoins {
    items: Vec<CoinEntry>,
}

impl UndoCoins {
    pub fn push(&mut self, coin: CoinEntry) {
        self.items.push(coin);
    }

    pub fn pop(&mut self) -> Option<CoinEntry> {
        self.items.pop()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_u32(self.items.len() as u32);
        for coin in &self.items {
            let bytes = coin.encode();
            w.put_u32(bytes.len() as u32);
            w.put_bytes(&bytes);
        }
        w.into_vec()
    }

    pub fn decode(buf: &[u8]) -> ChainResult<Self> {
        let mut r = Reader::new(buf, "undo");
        let count = r.get_u32()? as usize;
        let mut items = Vec::with_capacity(count.min(1 << 16));
        for _ in 0..count {
            let len = r.get_u32()? as usize;
            let bytes = r.get_bytes(len)?;
            items.push(CoinEntry::decode(&bytes)?);
        }
        r.finish()?;
        Ok(Self { items })
    }
}

/// A coin staged in a view, dirty until persisted.
#[derive(Debug, Clone)]
pub struct CoinViewEntry {
    pub coin: CoinEntry,
    pub spent: bool,
}

/// Name-state change staged in a view: the value to write (None removes
/// the name from the tree) plus the previous value for the undo record.
#[derive(Debug, Clone)]
pub struct NameDelta {
    pub state: Option<NameState>,
    pub prev: Option<NameState>,
    /// Whether `prev` should enter the block's name undo record.
    pub record_undo: bool,
}

/// Claim-slot changes staged in a view.
#[derive(Debug, Clone, Default)]
pub struct BitDelta {
    pub set: Vec<u32>,
    pub cleared: Vec<u32>,
}

impl BitDelta {
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.cleared.is_empty()
    }

    pub fn apply(&self, field: &mut BitField) {
        for index in &self.set {
            field.set(*index);
        }
        for index in &self.cleared {
            field.clear(*index);
        }
    }
}

/// Working set for one block transition: dirty coins, the undo log, staged
/// name-state changes and the claim-bitfield delta.
#[derive(Debug, Default)]
pub struct CoinView {
    pub coins: HashMap<Outpoint, CoinViewEntry>,
    pub undo: UndoCoins,
    pub names: BTreeMap<NameHash, NameDelta>,
    pub bits: BitDelta,
}

impl CoinView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a live coin.
    pub fn add_coin(&mut self, outpoint: Outpoint, coin: CoinEntry) {
        self.coins.insert(outpoint, CoinViewEntry { coin, spent: false });
    }

    /// Stage a coin as consumed, logging it for the undo record.
    pub fn spend_coin(&mut self, outpoint: Outpoint, coin: CoinEntry) {
        self.undo.push(coin.clone());
        self.coins.insert(outpoint, CoinViewEntry { coin, spent: true });
    }

    /// Stage a coin deletion without an undo entry (output removal on
    /// disconnect).
    pub fn remove_coin(&mut self, outpoint: Outpoint, coin: CoinEntry) {
        self.coins.insert(outpoint, CoinViewEntry { coin, spent: true });
    }

    /// The output behind `outpoint`, whether spent or live in this view.
    pub fn get_output(&self, outpoint: &Outpoint) -> Option<&Output> {
        self.coins.get(outpoint).map(|entry| &entry.coin.output)
    }

    pub fn get_coin(&self, outpoint: &Outpoint) -> Option<&CoinEntry> {
        self.coins.get(outpoint).map(|entry| &entry.coin)
    }

    /// Stage a name-state write, keeping the first observed previous value
    /// for the undo record.
    pub fn set_name(&mut self, hash: NameHash, state: Option<NameState>, prev: Option<NameState>) {
        match self.names.get_mut(&hash) {
            Some(delta) => delta.state = state,
            None => {
                self.names.insert(
                    hash,
                    NameDelta {
                        state,
                        prev,
                        record_undo: true,
                    },
                );
            }
        }
    }

    /// Stage a restored name-state during disconnect; no undo is recorded
    /// for restorations.
    pub fn restore_name(&mut self, hash: NameHash, state: Option<NameState>) {
        self.names.insert(
            hash,
            NameDelta {
                state,
                prev: None,
                record_undo: false,
            },
        );
    }

    /// Undo record derived from the staged name deltas.
    pub fn name_undo(&self) -> NameUndo {
        let mut undo = NameUndo::default();
        for (hash, delta) in &self.names {
            if delta.record_undo {
                undo.items.push((*hash, delta.prev.clone()));
            }
        }
        undo
    }
}
