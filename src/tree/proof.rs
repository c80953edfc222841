use crate::encoding::{Reader, Writer};
use crate::error::{ChainError, ChainResult};
use crate::primitives::{Hash, NameHash};
use crate::tree::{defaults, internal_hash, key_bit, leaf_hash, TREE_DEPTH};

/// Merkle path for one key against one root.
///
/// Default (empty-subtree) siblings are elided: the bitmap marks the depths
/// whose sibling is carried explicitly in `siblings`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proof {
    pub bitmap: [u8; 32],
    pub siblings: Vec<Hash>,
    /// Value at the key, absent for a non-inclusion proof.
    pub value: Option<Vec<u8>>,
}

impl Proof {
    /// Recompute the root from the leaf up and compare against `root`.
    /// Returns the proven value (or `None` for proven absence).
    pub fn verify(&self, root: &Hash, key: &NameHash) -> ChainResult<Option<Vec<u8>>> {
        let explicit = self
            .bitmap
            .iter()
            .map(|byte| byte.count_ones() as usize)
            .sum::<usize>();
        if explicit != self.siblings.len() {
            return Err(ChainError::InvalidProof("sibling count mismatch"));
        }

        let mut hash = match &self.value {
            Some(value) => leaf_hash(key, value),
            None => defaults()[0],
        };

        let mut next_sibling = self.siblings.len();
        for depth in (0..TREE_DEPTH).rev() {
            let height = TREE_DEPTH - depth;
            let sibling = if self.bitmap[depth / 8] & (0x80 >> (depth % 8)) != 0 {
                if next_sibling == 0 {
                    return Err(ChainError::InvalidProof("sibling underflow"));
                }
                next_sibling -= 1;
                self.siblings[next_sibling]
            } else {
                defaults()[height - 1]
            };
            let (left, right) = if key_bit(key, depth) {
                (sibling, hash)
            } else {
                (hash, sibling)
            };
            hash = internal_hash(&left, &right);
        }

        if hash != *root {
            return Err(ChainError::InvalidProof("root mismatch"));
        }
        Ok(self.value.clone())
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(32 + 4 + self.siblings.len() * 32);
        w.put_bytes(&self.bitmap);
        w.put_u32(self.siblings.len() as u32);
        for sibling in &self.siblings {
            w.put_hash(sibling);
        }
        match &self.value {
            None => w.put_u8(0),
            Some(value) => {
                w.put_u8(1);
                w.put_u32(value.len() as u32);
                w.put_bytes(value);
            }
        }
        w.into_vec()
    }

    pub fn decode(buf: &[u8]) -> ChainResult<Self> {
        let mut r = Reader::new(buf, "proof");
        let bitmap_bytes = r.get_bytes(32)?;
        let mut bitmap = [0u8; 32];
        bitmap.copy_from_slice(&bitmap_bytes);
        let count = r.get_u32()? as usize;
        if count > TREE_DEPTH {
            return Err(r.corrupt("too many siblings"));
        }
        let mut siblings = Vec::with_capacity(count);
        for _ in 0..count {
            siblings.push(r.get_hash()?);
        }
        let value = match r.get_u8()? {
            0 => None,
            1 => {
                let len = r.get_u32()? as usize;
                Some(r.get_bytes(len)?)
            }
            _ => return Err(r.corrupt("bad value tag")),
        };
        r.finish()?;
        Ok(Self {
            bitmap,
            siblings,
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_proof_proves_absence_in_empty_tree() {
        let proof = Proof {
            bitmap: [0u8; 32],
            siblings: Vec::new(),
            value: None,
        };
        let root = defaults()[TREE_DEPTH];
        let key = crate::primitives::blake2b256(b"anything");
        assert_eq!(proof.verify(&root, &key).unwrap(), None);
    }

    #[test]
    fn proof_round_trip() {
        let mut bitmap = [0u8; 32];
        bitmap[0] = 0x80;
        let proof = Proof {
            bitmap,
            siblings: vec![[0x42u8; 32]],
            value: Some(b"value".to_vec()),
        };
        assert_eq!(Proof::decode(&proof.encode()).unwrap(), proof);
    }

    #[test]
    fn sibling_count_mismatch_rejected() {
        let proof = Proof {
            bitmap: [0u8; 32],
            siblings: vec![[1u8; 32]],
            value: None,
        };
        let root = defaults()[TREE_DEPTH];
        let key = [0u8; 32];
        assert!(matches!(
            proof.verify(&root, &key),
            Err(ChainError::InvalidProof(_))
        ));
    }
}
