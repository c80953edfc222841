use crate::encoding::{Reader, Writer};
use crate::error::ChainResult;
use crate::primitives::tx::Outpoint;
use crate::primitives::{Amount, Height, NameHash};

/// Authenticated per-name record, stored only in the name tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameState {
    pub name: Vec<u8>,
    /// Height the name was opened or claimed at.
    pub height: Height,
    /// Height of the last renewal.
    pub renewal: Height,
    /// Output currently controlling the name.
    pub owner: Outpoint,
    /// Value locked under the name.
    pub value: Amount,
    /// Resource data published for the name.
    pub data: Vec<u8>,
    /// Height a transfer was initiated at, zero when none is pending.
    pub transfer: Height,
    pub revoked: bool,
    /// Claim sequence for reserved names, zero for auctioned names.
    pub claimed: u32,
}

/// Lifecycle classification relative to a chain height.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameStatus {
    /// No state recorded for the name.
    Available,
    Active,
    Expired,
    Revoked,
}

impl NameState {
    pub fn open(name: Vec<u8>, height: Height, owner: Outpoint) -> Self {
        Self {
            name,
            height,
            renewal: height,
            owner,
            value: 0,
            data: Vec::new(),
            transfer: 0,
            revoked: false,
            claimed: 0,
        }
    }

    pub fn is_expired(&self, height: Height, renewal_window: Height) -> bool {
        height.saturating_sub(self.renewal) > renewal_window
    }

    pub fn status(&self, height: Height, renewal_window: Height) -> NameStatus {
        if self.revoked {
            NameStatus::Revoked
        } else if self.is_expired(height, renewal_window) {
            NameStatus::Expired
        } else {
            NameStatus::Active
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(64 + self.name.len() + self.data.len());
        w.put_var_bytes(&self.name);
        w.put_u32(self.height);
        w.put_u32(self.renewal);
        self.owner.encode_into(&mut w);
        w.put_u64(self.value);
        w.put_var_bytes(&self.data);
        w.put_u32(self.transfer);
        w.put_u8(self.revoked as u8);
        w.put_u32(self.claimed);
        w.into_vec()
    }

    pub fn decode(buf: &[u8]) -> ChainResult<Self> {
        let mut r = Reader::new(buf, "namestate");
        let state = Self::decode_from(&mut r)?;
        r.finish()?;
        Ok(state)
    }

    pub fn decode_from(r: &mut Reader<'_>) -> ChainResult<Self> {
        let name = r.get_var_bytes()?;
        let height = r.get_u32()?;
        let renewal = r.get_u32()?;
        let owner = Outpoint::decode_from(r)?;
        let value = r.get_u64()?;
        let data = r.get_var_bytes()?;
        let transfer = r.get_u32()?;
        let revoked = match r.get_u8()? {
            0 => false,
            1 => true,
            _ => return Err(r.corrupt("bad revoked flag")),
        };
        let claimed = r.get_u32()?;
        Ok(Self {
            name,
            height,
            renewal,
            owner,
            value,
            data,
            transfer,
            revoked,
            claimed,
        })
    }
}

/// Per-block reversal data for name-state changes: the previous state of
/// every touched name, `None` when the name did not exist before.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameUndo {
    pub items: Vec<(NameHash, Option<NameState>)>,
}

impl NameUndo {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_u32(self.items.len() as u32);
        for (hash, prev) in &self.items {
            w.put_hash(hash);
            match prev {
                None => w.put_u8(0),
                Some(state) => {
                    w.put_u8(1);
                    let bytes = state.encode();
                    w.put_u32(bytes.len() as u32);
                    w.put_bytes(&bytes);
                }
            }
        }
        w.into_vec()
    }

    pub fn decode(buf: &[u8]) -> ChainResult<Self> {
        let mut r = Reader::new(buf, "nameundo");
        let count = r.get_u32()? as usize;
        let mut items = Vec::with_capacity(count.min(1 << 16));
        for _ in 0..count {
            let hash = r.get_hash()?;
            let prev = match r.get_u8()? {
                0 => None,
                1 => {
                    let len = r.get_u32()? as usize;
                    let bytes = r.get_bytes(len)?;
                    Some(NameState::decode(&bytes)?)
                }
                _ => return Err(r.corrupt("bad name undo tag")),
            };
            items.push((hash, prev));
        }
        r.finish()?;
        Ok(Self { items })
    }
}
