use crate::encoding::{Reader, Writer};
use crate::error::ChainResult;
use crate::primitives::block::{Block, BlockHeader};
use crate::primitives::{Hash, Height};

/// A block header anchored into the chain: immutable once written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainEntry {
    pub hash: Hash,
    pub height: Height,
    pub version: u32,
    pub prev_block: Hash,
    pub merkle_root: Hash,
    pub tree_root: Hash,
    pub time: u64,
    pub bits: u32,
    pub nonce: u32,
}

impl ChainEntry {
    pub fn from_block(block: &Block, prev: Option<&ChainEntry>) -> Self {
        let header = &block.header;
        Self {
            hash: header.hash(),
            height: prev.map_or(0, |p| p.height + 1),
            version: header.version,
            prev_block: header.prev_block,
            merkle_root: header.merkle_root,
            tree_root: header.tree_root,
            time: header.time,
            bits: header.bits,
            nonce: header.nonce,
        }
    }

    pub fn is_genesis(&self) -> bool {
        self.height == 0
    }

    pub fn header(&self) -> BlockHeader {
        BlockHeader {
            version: self.version,
            prev_block: self.prev_block,
            merkle_root: self.merkle_root,
            tree_root: self.tree_root,
            time: self.time,
            bits: self.bits,
            nonce: self.nonce,
        }
    }

    /// Entry record: header fields plus height. The hash is recomputed on
    /// decode rather than stored.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(120);
        self.header().encode_into(&mut w);
        w.put_u32(self.height);
        w.into_vec()
    }

    pub fn decode(buf: &[u8]) -> ChainResult<Self> {
        let mut r = Reader::new(buf, "entry");
        let header = BlockHeader::decode_from(&mut r)?;
        let height = r.get_u32()?;
        r.finish()?;
        Ok(Self {
            hash: header.hash(),
            height,
            version: header.version,
            prev_block: header.prev_block,
            merkle_root: header.merkle_root,
            tree_root: header.tree_root,
            time: header.time,
            bits: header.bits,
            nonce: header.nonce,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::ZERO_HASH;

    #[test]
    fn entry_round_trip_recomputes_hash() {
        let header = BlockHeader {
            version: 0,
            prev_block: [5u8; 32],
            merkle_root: [6u8; 32],
            tree_root: ZERO_HASH,
            time: 42,
            bits: 0x1d00_ffff,
            nonce: 99,
        };
        let entry = ChainEntry {
            hash: header.hash(),
            height: 17,
            version: header.version,
            prev_block: header.prev_block,
            merkle_root: header.merkle_root,
            tree_root: header.tree_root,
            time: header.time,
            bits: header.bits,
            nonce: header.nonce,
        };
        let back = ChainEntry::decode(&entry.encode()).unwrap();
        assert_eq!(back, entry);
        assert_eq!(back.hash, entry.header().hash());
    }
}
