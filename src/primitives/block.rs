use crate::encoding::{Reader, Writer};
use crate::error::ChainResult;
use crate::primitives::tx::Transaction;
use crate::primitives::{blake2b256, Hash, ZERO_HASH};

pub const HEADER_SIZE: usize = 4 + 32 + 32 + 32 + 8 + 4 + 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: u32,
    pub prev_block: Hash,
    pub merkle_root: Hash,
    /// Root of the authenticated name tree this block was built against.
    pub tree_root: Hash,
    pub time: u64,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    pub fn hash(&self) -> Hash {
        blake2b256(&self.encode())
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(HEADER_SIZE);
        self.encode_into(&mut w);
        w.into_vec()
    }

    pub fn encode_into(&self, w: &mut Writer) {
        w.put_u32(self.version);
        w.put_hash(&self.prev_block);
        w.put_hash(&self.merkle_root);
        w.put_hash(&self.tree_root);
        w.put_u64(self.time);
        w.put_u32(self.bits);
        w.put_u32(self.nonce);
    }

    pub fn decode_from(r: &mut Reader<'_>) -> ChainResult<Self> {
        Ok(Self {
            version: r.get_u32()?,
            prev_block: r.get_hash()?,
            merkle_root: r.get_hash()?,
            tree_root: r.get_hash()?,
            time: r.get_u64()?,
            bits: r.get_u32()?,
            nonce: r.get_u32()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub txs: Vec<Transaction>,
}

impl Block {
    pub fn new(header: BlockHeader, txs: Vec<Transaction>) -> Self {
        Self { header, txs }
    }

    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    /// Merkle root over transaction ids. Odd levels duplicate the last
    /// node, an empty block commits to the zero hash.
    pub fn compute_merkle_root(txs: &[Transaction]) -> Hash {
        if txs.is_empty() {
            return ZERO_HASH;
        }
        let mut level: Vec<Hash> = txs.iter().map(|tx| tx.hash()).collect();
        while level.len() > 1 {
            let mut next = Vec::with_capacity((level.len() + 1) / 2);
            for pair in level.chunks(2) {
                let left = &pair[0];
                let right = pair.get(1).unwrap_or(left);
                let mut data = Vec::with_capacity(64);
                data.extend_from_slice(left);
                data.extend_from_slice(right);
                next.push(blake2b256(&data));
            }
            level = next;
        }
        level[0]
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(HEADER_SIZE + 4 + self.txs.len() * 128);
        self.header.encode_into(&mut w);
        w.put_u32(self.txs.len() as u32);
        for tx in &self.txs {
            tx.encode_into(&mut w);
        }
        w.into_vec()
    }

    pub fn decode(buf: &[u8]) -> ChainResult<Self> {
        let mut r = Reader::new(buf, "block");
        let header = BlockHeader::decode_from(&mut r)?;
        let count = r.get_u32()? as usize;
        let mut txs = Vec::with_capacity(count.min(1 << 16));
        for _ in 0..count {
            txs.push(Transaction::decode_from(&mut r)?);
        }
        r.finish()?;
        Ok(Self { header, txs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::tx::{Input, Outpoint, Output};

    fn sample_block() -> Block {
        let cb = Transaction::new(
            vec![Input::new(Outpoint::null())],
            vec![Output::new(50, [1u8; 32])],
        );
        let header = BlockHeader {
            version: 0,
            prev_block: [9u8; 32],
            merkle_root: Block::compute_merkle_root(std::slice::from_ref(&cb)),
            tree_root: ZERO_HASH,
            time: 1_700_000_000,
            bits: 0x207f_ffff,
            nonce: 4,
        };
        Block::new(header, vec![cb])
    }

    #[test]
    fn block_round_trip() {
        let block = sample_block();
        let back = Block::decode(&block.encode()).unwrap();
        assert_eq!(back, block);
        assert_eq!(back.hash(), block.hash());
    }

    #[test]
    fn merkle_root_depends_on_order() {
        let a = Transaction::new(vec![Input::new(Outpoint::null())], vec![Output::new(1, [1; 32])]);
        let b = Transaction::new(vec![Input::new(Outpoint::null())], vec![Output::new(2, [2; 32])]);
        let ab = Block::compute_merkle_root(&[a.clone(), b.clone()]);
        let ba = Block::compute_merkle_root(&[b, a]);
        assert_ne!(ab, ba);
        assert_eq!(Block::compute_merkle_root(&[]), ZERO_HASH);
    }
}
