//! Authenticated name tree.
//!
//! A 256-level sparse Merkle tree mapping name hashes to name-state
//! records. Nodes are content-addressed by their Blake2b-256 hash and kept
//! in a dedicated LMDB environment, so every historical root that has not
//! been compacted away remains readable as a snapshot. Empty subtrees are
//! represented by per-height default hashes and never stored.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use hashbrown::HashMap;

use crate::error::{ChainError, ChainResult};
use crate::primitives::{blake2b256_multi, Hash, NameHash};

pub mod proof;
pub mod store;

pub use proof::Proof;
use store::NodeStore;

pub const TREE_DEPTH: usize = 256;

const LEAF_TAG: u8 = 0x00;
const INTERNAL_TAG: u8 = 0x01;

/// Default hashes indexed by subtree height: `defaults()[0]` is the empty
/// leaf slot, `defaults()[256]` the root of an empty tree.
fn defaults() -> &'static [Hash; TREE_DEPTH + 1] {
    static DEFAULTS: OnceLock<[Hash; TREE_DEPTH + 1]> = OnceLock::new();
    DEFAULTS.get_or_init(|| {
        let mut table = [[0u8; 32]; TREE_DEPTH + 1];
        for height in 1..=TREE_DEPTH {
            let child = table[height - 1];
            table[height] = internal_hash(&child, &child);
        }
        table
    })
}

fn leaf_hash(key: &NameHash, value: &[u8]) -> Hash {
    blake2b256_multi(&[&[LEAF_TAG], key.as_slice(), value])
}

fn internal_hash(left: &Hash, right: &Hash) -> Hash {
    blake2b256_multi(&[&[INTERNAL_TAG], left.as_slice(), right.as_slice()])
}

/// MSB-first bit of `key` selecting the child at `depth`.
#[inline]
fn key_bit(key: &NameHash, depth: usize) -> bool {
    key[depth / 8] & (0x80 >> (depth % 8)) != 0
}

fn encode_leaf(key: &NameHash, value: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + 32 + 4 + value.len());
    buf.push(LEAF_TAG);
    buf.extend_from_slice(key);
    buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
    buf.extend_from_slice(value);
    buf
}

fn encode_internal(left: &Hash, right: &Hash) -> Vec<u8> {
    let mut buf = Vec::with_capacity(65);
    buf.push(INTERNAL_TAG);
    buf.extend_from_slice(left);
    buf.extend_from_slice(right);
    buf
}

enum Node {
    Leaf { key: NameHash, value: Vec<u8> },
    Internal { left: Hash, right: Hash },
}

fn decode_node(bytes: &[u8]) -> ChainResult<Node> {
    let corrupt = |reason| ChainError::CorruptRecord {
        record: "tree node",
        reason,
    };
    match bytes.first() {
        Some(&LEAF_TAG) => {
            if bytes.len() < 37 {
                return Err(corrupt("truncated leaf"));
            }
            let mut key = [0u8; 32];
            key.copy_from_slice(&bytes[1..33]);
            let len = u32::from_le_bytes(bytes[33..37].try_into().unwrap()) as usize;
            if bytes.len() != 37 + len {
                return Err(corrupt("leaf length mismatch"));
            }
            Ok(Node::Leaf {
                key,
                value: bytes[37..].to_vec(),
            })
        }
        Some(&INTERNAL_TAG) => {
            if bytes.len() != 65 {
                return Err(corrupt("bad internal node size"));
            }
            let mut left = [0u8; 32];
            let mut right = [0u8; 32];
            left.copy_from_slice(&bytes[1..33]);
            right.copy_from_slice(&bytes[33..65]);
            Ok(Node::Internal { left, right })
        }
        _ => Err(corrupt("bad node tag")),
    }
}

/// The name tree plus its long-lived transaction.
///
/// `root_hash` always reflects the last committed root; staged inserts and
/// removes are visible through `get` until `commit` folds them into a new
/// root or `inject` discards them.
#[derive(Debug)]
pub struct Tree {
    store: Option<NodeStore>,
    root: Hash,
    staged: BTreeMap<NameHash, Option<Vec<u8>>>,
}

impl Tree {
    pub fn open(path: &Path, map_size: usize) -> ChainResult<Self> {
        let store = NodeStore::open(path, map_size)?;
        let root = store.root()?.unwrap_or(defaults()[TREE_DEPTH]);
        Ok(Self {
            store: Some(store),
            root,
            staged: BTreeMap::new(),
        })
    }

    /// Root of the empty tree.
    pub fn empty_root() -> Hash {
        defaults()[TREE_DEPTH]
    }

    pub fn root_hash(&self) -> Hash {
        self.root
    }

    pub fn path(&self) -> PathBuf {
        self.store().path().to_path_buf()
    }

    fn store(&self) -> &NodeStore {
        match &self.store {
            Some(store) => store,
            None => panic!("tree store is closed"),
        }
    }

    /// Close the node store. Any use after this is a programming error.
    pub fn close(&mut self) {
        self.staged.clear();
        self.store = None;
    }

    /// Rewind the in-memory tree to `root`, discarding the transaction.
    pub fn inject(&mut self, root: Hash) -> ChainResult<()> {
        if root != defaults()[TREE_DEPTH] && self.store().node(&root)?.is_none() {
            return Err(ChainError::UnknownTreeRoot(root));
        }
        self.root = root;
        self.staged.clear();
        Ok(())
    }

    /// Stage an insert into the long-lived transaction.
    pub fn insert(&mut self, key: NameHash, value: Vec<u8>) {
        self.staged.insert(key, Some(value));
    }

    /// Stage a removal into the long-lived transaction.
    pub fn remove(&mut self, key: NameHash) {
        self.staged.insert(key, None);
    }

    /// Read through the transaction, falling back to the committed root.
    pub fn get(&self, key: &NameHash) -> ChainResult<Option<Vec<u8>>> {
        if let Some(staged) = self.staged.get(key) {
            return Ok(staged.clone());
        }
        self.lookup(self.root, key, &HashMap::new())
    }

    /// Fold the staged transaction into a new committed root.
    pub fn commit(&mut self) -> ChainResult<Hash> {
        if self.staged.is_empty() {
            return Ok(self.root);
        }

        let mut pending: HashMap<Hash, Vec<u8>> = HashMap::new();
        let mut root = self.root;
        let ops = std::mem::take(&mut self.staged);
        for (key, value) in &ops {
            root = self.update(root, key, value.as_deref(), &mut pending)?;
        }

        self.store().write_nodes(&pending, &root)?;
        tracing::debug!(
            nodes = pending.len(),
            ops = ops.len(),
            root = ?&root[..4],
            "Committed name tree transaction"
        );
        self.root = root;
        Ok(root)
    }

    /// Read-only view of the tree at an arbitrary committed root.
    pub fn snapshot(&self, root: Hash) -> ChainResult<Snapshot<'_>> {
        if root != defaults()[TREE_DEPTH] && self.store().node(&root)?.is_none() {
            return Err(ChainError::UnknownTreeRoot(root));
        }
        Ok(Snapshot { tree: self, root })
    }

    fn node(&self, hash: &Hash, pending: &HashMap<Hash, Vec<u8>>) -> ChainResult<Node> {
        if let Some(bytes) = pending.get(hash) {
            return decode_node(bytes);
        }
        let bytes = self
            .store()
            .node(hash)?
            .ok_or(ChainError::UnknownTreeRoot(*hash))?;
        decode_node(&bytes)
    }

    fn lookup(
        &self,
        root: Hash,
        key: &NameHash,
        pending: &HashMap<Hash, Vec<u8>>,
    ) -> ChainResult<Option<Vec<u8>>> {
        let mut cur = root;
        for depth in 0..TREE_DEPTH {
            let height = TREE_DEPTH - depth;
            if cur == defaults()[height] {
                return Ok(None);
            }
            match self.node(&cur, pending)? {
                Node::Internal { left, right } => {
                    cur = if key_bit(key, depth) { right } else { left };
                }
                Node::Leaf { .. } => {
                    return Err(ChainError::CorruptRecord {
                        record: "tree node",
                        reason: "leaf above bottom level",
                    })
                }
            }
        }
        if cur == defaults()[0] {
            return Ok(None);
        }
        match self.node(&cur, pending)? {
            Node::Leaf { key: leaf_key, value } if leaf_key == *key => Ok(Some(value)),
            Node::Leaf { .. } => Err(ChainError::CorruptRecord {
                record: "tree node",
                reason: "leaf key mismatch",
            }),
            Node::Internal { .. } => Err(ChainError::CorruptRecord {
                record: "tree node",
                reason: "internal node at bottom level",
            }),
        }
    }

    /// Apply one key update against `root`, buffering new nodes in
    /// `pending`, and return the resulting root.
    fn update(
        &self,
        root: Hash,
        key: &NameHash,
        value: Option<&[u8]>,
        pending: &mut HashMap<Hash, Vec<u8>>,
    ) -> ChainResult<Hash> {
        // Descend, recording the sibling at every depth.
        let mut siblings = Vec::with_capacity(TREE_DEPTH);
        let mut cur = root;
        for depth in 0..TREE_DEPTH {
            let height = TREE_DEPTH - depth;
            if cur == defaults()[height] {
                siblings.push(defaults()[height - 1]);
                cur = defaults()[height - 1];
                continue;
            }
            match self.node(&cur, pending)? {
                Node::Internal { left, right } => {
                    if key_bit(key, depth) {
                        siblings.push(left);
                        cur = right;
                    } else {
                        siblings.push(right);
                        cur = left;
                    }
                }
                Node::Leaf { .. } => {
                    return Err(ChainError::CorruptRecord {
                        record: "tree node",
                        reason: "leaf above bottom level",
                    })
                }
            }
        }

        // Replace the leaf slot.
        let mut hash = match value {
            Some(value) => {
                let hash = leaf_hash(key, value);
                pending.insert(hash, encode_leaf(key, value));
                hash
            }
            None => defaults()[0],
        };

        // Rebuild the path bottom-up. Subtrees that hash to a default are
        // empty and never materialized.
        for depth in (0..TREE_DEPTH).rev() {
            let sibling = siblings[depth];
            let (left, right) = if key_bit(key, depth) {
                (sibling, hash)
            } else {
                (hash, sibling)
            };
            let height = TREE_DEPTH - depth;
            let parent = internal_hash(&left, &right);
            if parent != defaults()[height] {
                pending.insert(parent, encode_internal(&left, &right));
            }
            hash = parent;
        }

        Ok(hash)
    }

    fn prove_at(&self, root: Hash, key: &NameHash) -> ChainResult<Proof> {
        let empty = HashMap::new();
        let mut bitmap = [0u8; 32];
        let mut siblings = Vec::new();
        let mut cur = root;
        let mut done = false;
        for depth in 0..TREE_DEPTH {
            let height = TREE_DEPTH - depth;
            if done || cur == defaults()[height] {
                done = true;
                continue;
            }
            match self.node(&cur, &empty)? {
                Node::Internal { left, right } => {
                    let sibling = if key_bit(key, depth) {
                        cur = right;
                        left
                    } else {
                        cur = left;
                        right
                    };
                    if sibling != defaults()[height - 1] {
                        bitmap[depth / 8] |= 0x80 >> (depth % 8);
                        siblings.push(sibling);
                    }
                }
                Node::Leaf { .. } => {
                    return Err(ChainError::CorruptRecord {
                        record: "tree node",
                        reason: "leaf above bottom level",
                    })
                }
            }
        }

        let value = if done || cur == defaults()[0] {
            None
        } else {
            match self.node(&cur, &empty)? {
                Node::Leaf { key: leaf_key, value } if leaf_key == *key => Some(value),
                _ => {
                    return Err(ChainError::CorruptRecord {
                        record: "tree node",
                        reason: "leaf key mismatch",
                    })
                }
            }
        };

        Ok(Proof {
            bitmap,
            siblings,
            value,
        })
    }

    /// Rewrite the node store under `tmp_dir`, keeping only nodes reachable
    /// from the current root, then swap it into place.
    pub fn compact(&mut self, tmp_dir: &Path) -> ChainResult<()> {
        let root = self.root;
        if tmp_dir.exists() {
            fs::remove_dir_all(tmp_dir)?;
        }

        let (path, map_size) = {
            let store = self.store();
            (store.path().to_path_buf(), store.map_size())
        };

        let copied = {
            let tmp = NodeStore::open(tmp_dir, map_size)?;
            self.copy_reachable(&tmp, root)?
        };

        // Both environments must be closed before the directory swap.
        self.store = None;
        fs::remove_dir_all(&path)?;
        fs::rename(tmp_dir, &path)?;
        self.store = Some(NodeStore::open(&path, map_size)?);
        self.root = root;
        self.staged.clear();

        tracing::info!(nodes = copied, path = ?path, "Compacted name tree");
        Ok(())
    }

    fn copy_reachable(&self, tmp: &NodeStore, root: Hash) -> ChainResult<usize> {
        let default_set: Vec<&Hash> = defaults().iter().collect();
        let is_default = |hash: &Hash| default_set.iter().any(|d| *d == hash);

        let mut batch: HashMap<Hash, Vec<u8>> = HashMap::new();
        let mut stack = vec![root];
        let mut copied = 0usize;
        while let Some(hash) = stack.pop() {
            if is_default(&hash) || batch.contains_key(&hash) {
                continue;
            }
            let bytes = self
                .store()
                .node(&hash)?
                .ok_or(ChainError::UnknownTreeRoot(hash))?;
            if let Node::Internal { left, right } = decode_node(&bytes)? {
                stack.push(left);
                stack.push(right);
            }
            batch.insert(hash, bytes);
            copied += 1;
            if batch.len() >= 4096 {
                tmp.write_nodes(&batch, &root)?;
                batch.clear();
            }
        }
        tmp.write_nodes(&batch, &root)?;
        Ok(copied)
    }
}

/// Read-only view pinned to one committed root.
pub struct Snapshot<'a> {
    tree: &'a Tree,
    root: Hash,
}

impl Snapshot<'_> {
    pub fn root(&self) -> Hash {
        self.root
    }

    pub fn get(&self, key: &NameHash) -> ChainResult<Option<Vec<u8>>> {
        self.tree.lookup(self.root, key, &HashMap::new())
    }

    pub fn prove(&self, key: &NameHash) -> ChainResult<Proof> {
        self.tree.prove_at(self.root, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs as stdfs;

    use tempfile::tempdir_in;

    const MAP_SIZE: usize = 64 << 20;

    fn open_tree() -> (tempfile::TempDir, Tree) {
        let workspace_tmp = std::env::current_dir().unwrap().join("target/testdata");
        stdfs::create_dir_all(&workspace_tmp).unwrap();
        let tmp = tempdir_in(&workspace_tmp).unwrap();
        let tree = Tree::open(&tmp.path().join("tree"), MAP_SIZE).unwrap();
        (tmp, tree)
    }

    fn key(n: u8) -> NameHash {
        crate::primitives::blake2b256(&[n])
    }

    #[test]
    fn empty_tree_has_stable_root() {
        let (_tmp, tree) = open_tree();
        assert_eq!(tree.root_hash(), Tree::empty_root());
        assert_eq!(tree.get(&key(1)).unwrap(), None);
    }

    #[test]
    fn staged_reads_then_commit() {
        let (_tmp, mut tree) = open_tree();
        tree.insert(key(1), b"one".to_vec());
        assert_eq!(tree.get(&key(1)).unwrap(), Some(b"one".to_vec()));
        assert_eq!(tree.root_hash(), Tree::empty_root());

        let root = tree.commit().unwrap();
        assert_ne!(root, Tree::empty_root());
        assert_eq!(tree.root_hash(), root);
        assert_eq!(tree.get(&key(1)).unwrap(), Some(b"one".to_vec()));
    }

    #[test]
    fn insert_then_remove_restores_empty_root() {
        let (_tmp, mut tree) = open_tree();
        tree.insert(key(1), b"one".to_vec());
        tree.commit().unwrap();
        tree.remove(key(1));
        let root = tree.commit().unwrap();
        assert_eq!(root, Tree::empty_root());
    }

    #[test]
    fn inject_rewinds_and_discards_txn() {
        let (_tmp, mut tree) = open_tree();
        tree.insert(key(1), b"one".to_vec());
        let root1 = tree.commit().unwrap();

        tree.insert(key(2), b"two".to_vec());
        let root2 = tree.commit().unwrap();
        assert_ne!(root1, root2);

        tree.insert(key(3), b"staged".to_vec());
        tree.inject(root1).unwrap();
        assert_eq!(tree.root_hash(), root1);
        assert_eq!(tree.get(&key(2)).unwrap(), None);
        assert_eq!(tree.get(&key(3)).unwrap(), None);

        // Snapshots of later roots survive a rewind.
        let snap = tree.snapshot(root2).unwrap();
        assert_eq!(snap.get(&key(2)).unwrap(), Some(b"two".to_vec()));
    }

    #[test]
    fn inject_unknown_root_fails() {
        let (_tmp, mut tree) = open_tree();
        let err = tree.inject([0x5au8; 32]).unwrap_err();
        assert!(matches!(err, ChainError::UnknownTreeRoot(_)));
    }

    #[test]
    fn proofs_verify_inclusion_and_absence() {
        let (_tmp, mut tree) = open_tree();
        for n in 0..8u8 {
            tree.insert(key(n), vec![n; 3]);
        }
        let root = tree.commit().unwrap();

        let snap = tree.snapshot(root).unwrap();
        let proof = snap.prove(&key(3)).unwrap();
        assert_eq!(proof.verify(&root, &key(3)).unwrap(), Some(vec![3u8; 3]));

        let absent = snap.prove(&key(99)).unwrap();
        assert_eq!(absent.verify(&root, &key(99)).unwrap(), None);

        // A proof bound to the wrong key fails.
        assert!(proof.verify(&root, &key(4)).is_err());
    }

    #[test]
    fn compaction_keeps_current_root_only() {
        let (tmp, mut tree) = open_tree();
        tree.insert(key(1), b"one".to_vec());
        let root1 = tree.commit().unwrap();
        tree.insert(key(2), b"two".to_vec());
        let root2 = tree.commit().unwrap();

        tree.compact(&tmp.path().join("tree~")).unwrap();
        assert_eq!(tree.root_hash(), root2);
        assert_eq!(tree.get(&key(1)).unwrap(), Some(b"one".to_vec()));
        assert_eq!(tree.get(&key(2)).unwrap(), Some(b"two".to_vec()));

        // The pre-compaction root is gone.
        assert!(tree.snapshot(root1).is_err());
    }

    #[test]
    fn reopen_recovers_root() {
        let workspace_tmp = std::env::current_dir().unwrap().join("target/testdata");
        stdfs::create_dir_all(&workspace_tmp).unwrap();
        let tmp = tempdir_in(&workspace_tmp).unwrap();
        let path = tmp.path().join("tree");

        let root = {
            let mut tree = Tree::open(&path, MAP_SIZE).unwrap();
            tree.insert(key(7), b"seven".to_vec());
            let root = tree.commit().unwrap();
            tree.close();
            root
        };

        let tree = Tree::open(&path, MAP_SIZE).unwrap();
        assert_eq!(tree.root_hash(), root);
        assert_eq!(tree.get(&key(7)).unwrap(), Some(b"seven".to_vec()));
    }
}
