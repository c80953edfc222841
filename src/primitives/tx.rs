use crate::encoding::{Reader, Writer};
use crate::error::ChainResult;
use crate::primitives::covenant::Covenant;
use crate::primitives::entry::ChainEntry;
use crate::primitives::{blake2b256, AddrHash, Amount, Hash, Height, NULL_ADDRESS, ZERO_HASH};

/// Reference to a transaction output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Outpoint {
    pub hash: Hash,
    pub index: u32,
}

impl Outpoint {
    pub fn new(hash: Hash, index: u32) -> Self {
        Self { hash, index }
    }

    /// The coinbase prevout.
    pub fn null() -> Self {
        Self {
            hash: ZERO_HASH,
            index: u32::MAX,
        }
    }

    pub fn is_null(&self) -> bool {
        self.index == u32::MAX && self.hash == ZERO_HASH
    }

    pub fn encode_into(&self, w: &mut Writer) {
        w.put_hash(&self.hash);
        w.put_u32(self.index);
    }

    pub fn decode_from(r: &mut Reader<'_>) -> ChainResult<Self> {
        let hash = r.get_hash()?;
        let index = r.get_u32()?;
        Ok(Self { hash, index })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Input {
    pub prevout: Outpoint,
    pub sequence: u32,
}

impl Input {
    pub fn new(prevout: Outpoint) -> Self {
        Self {
            prevout,
            sequence: u32::MAX,
        }
    }

    fn encode_into(&self, w: &mut Writer) {
        self.prevout.encode_into(w);
        w.put_u32(self.sequence);
    }

    fn decode_from(r: &mut Reader<'_>) -> ChainResult<Self> {
        let prevout = Outpoint::decode_from(r)?;
        let sequence = r.get_u32()?;
        Ok(Self { prevout, sequence })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    pub value: Amount,
    pub address: AddrHash,
    pub covenant: Covenant,
}

impl Output {
    pub fn new(value: Amount, address: AddrHash) -> Self {
        Self {
            value,
            address,
            covenant: Covenant::none(),
        }
    }

    pub fn with_covenant(value: Amount, address: AddrHash, covenant: Covenant) -> Self {
        Self {
            value,
            address,
            covenant,
        }
    }

    /// Outputs paying the null address carry data only and never enter the
    /// coin set.
    pub fn is_unspendable(&self) -> bool {
        self.address == NULL_ADDRESS
    }

    pub fn encode_into(&self, w: &mut Writer) {
        w.put_u64(self.value);
        w.put_hash(&self.address);
        self.covenant.encode_into(w);
    }

    pub fn decode_from(r: &mut Reader<'_>) -> ChainResult<Self> {
        let value = r.get_u64()?;
        let address = r.get_hash()?;
        let covenant = Covenant::decode_from(r)?;
        Ok(Self {
            value,
            address,
            covenant,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<Input>,
    pub outputs: Vec<Output>,
    pub locktime: u32,
}

impl Transaction {
    pub fn new(inputs: Vec<Input>, outputs: Vec<Output>) -> Self {
        Self {
            version: 0,
            inputs,
            outputs,
            locktime: 0,
        }
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prevout.is_null()
    }

    /// Transaction id: Blake2b-256 of the encoding.
    pub fn hash(&self) -> Hash {
        blake2b256(&self.encode())
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(64 + self.outputs.len() * 48);
        self.encode_into(&mut w);
        w.into_vec()
    }

    pub fn encode_into(&self, w: &mut Writer) {
        w.put_u32(self.version);
        w.put_u32(self.inputs.len() as u32);
        for input in &self.inputs {
            input.encode_into(w);
        }
        w.put_u32(self.outputs.len() as u32);
        for output in &self.outputs {
            output.encode_into(w);
        }
        w.put_u32(self.locktime);
    }

    pub fn decode_from(r: &mut Reader<'_>) -> ChainResult<Self> {
        let version = r.get_u32()?;
        let input_count = r.get_u32()? as usize;
        let mut inputs = Vec::with_capacity(input_count.min(1 << 16));
        for _ in 0..input_count {
            inputs.push(Input::decode_from(r)?);
        }
        let output_count = r.get_u32()? as usize;
        let mut outputs = Vec::with_capacity(output_count.min(1 << 16));
        for _ in 0..output_count {
            outputs.push(Output::decode_from(r)?);
        }
        let locktime = r.get_u32()?;
        Ok(Self {
            version,
            inputs,
            outputs,
            locktime,
        })
    }
}

/// A transaction plus the chain context it was mined in, stored by the
/// optional transaction index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxMeta {
    pub tx: Transaction,
    pub height: Height,
    pub block_hash: Hash,
    pub time: u64,
    pub index: u32,
}

impl TxMeta {
    pub fn new(tx: Transaction, entry: &ChainEntry, index: u32) -> Self {
        Self {
            tx,
            height: entry.height,
            block_hash: entry.hash,
            time: entry.time,
            index,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_u32(self.height);
        w.put_hash(&self.block_hash);
        w.put_u64(self.time);
        w.put_u32(self.index);
        self.tx.encode_into(&mut w);
        w.into_vec()
    }

    pub fn decode(buf: &[u8]) -> ChainResult<Self> {
        let mut r = Reader::new(buf, "txmeta");
        let height = r.get_u32()?;
        let block_hash = r.get_hash()?;
        let time = r.get_u64()?;
        let index = r.get_u32()?;
        let tx = Transaction::decode_from(&mut r)?;
        r.finish()?;
        Ok(Self {
            tx,
            height,
            block_hash,
            time,
            index,
        })
    }
}
