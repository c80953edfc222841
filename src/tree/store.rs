use std::path::{Path, PathBuf};

use hashbrown::HashMap;
use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvOpenOptions, Error as HeedError};

use crate::error::ChainResult;
use crate::primitives::Hash;

const ROOT_KEY: &str = "root";

/// Content-addressed node store backing the name tree.
#[derive(Debug)]
pub struct NodeStore {
    env: Env,
    nodes: Database<Bytes, Bytes>,
    meta: Database<Str, Bytes>,
    path: PathBuf,
    map_size: usize,
}

impl NodeStore {
    pub fn open(path: &Path, map_size: usize) -> ChainResult<Self> {
        std::fs::create_dir_all(path)?;

        let mut options = EnvOpenOptions::new();
        options.map_size(map_size);
        options.max_dbs(2);

        let env = unsafe {
            match options.open(path) {
                Ok(env) => env,
                Err(HeedError::BadOpenOptions { env, .. }) => env,
                Err(err) => {
                    tracing::error!(path = ?path, map_size, ?err, "Failed to open tree environment");
                    return Err(err.into());
                }
            }
        };

        let mut txn = env.write_txn()?;
        let nodes = env.create_database::<Bytes, Bytes>(&mut txn, Some("nodes"))?;
        let meta = env.create_database::<Str, Bytes>(&mut txn, Some("meta"))?;
        txn.commit()?;

        Ok(Self {
            env,
            nodes,
            meta,
            path: path.to_path_buf(),
            map_size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn map_size(&self) -> usize {
        self.map_size
    }

    pub fn node(&self, hash: &Hash) -> ChainResult<Option<Vec<u8>>> {
        let txn = self.env.read_txn()?;
        Ok(self.nodes.get(&txn, hash.as_slice())?.map(<[u8]>::to_vec))
    }

    pub fn root(&self) -> ChainResult<Option<Hash>> {
        let txn = self.env.read_txn()?;
        match self.meta.get(&txn, ROOT_KEY)? {
            Some(bytes) if bytes.len() == 32 => {
                let mut root = [0u8; 32];
                root.copy_from_slice(bytes);
                Ok(Some(root))
            }
            Some(_) => Ok(None),
            None => Ok(None),
        }
    }

    /// Persist a set of nodes and the root pointer in one transaction.
    pub fn write_nodes(&self, batch: &HashMap<Hash, Vec<u8>>, root: &Hash) -> ChainResult<()> {
        let mut txn = self.env.write_txn()?;
        for (hash, bytes) in batch {
            self.nodes.put(&mut txn, hash.as_slice(), bytes)?;
        }
        self.meta.put(&mut txn, ROOT_KEY, root.as_slice())?;
        txn.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use tempfile::tempdir_in;

    #[test]
    fn nodes_and_root_round_trip() {
        let workspace_tmp = std::env::current_dir().unwrap().join("target/testdata");
        fs::create_dir_all(&workspace_tmp).unwrap();
        let tmp = tempdir_in(&workspace_tmp).unwrap();
        let store = NodeStore::open(tmp.path(), 16 << 20).unwrap();

        assert_eq!(store.root().unwrap(), None);

        let hash = [0xAAu8; 32];
        let mut batch = HashMap::new();
        batch.insert(hash, vec![1u8, 2, 3]);
        store.write_nodes(&batch, &hash).unwrap();

        assert_eq!(store.node(&hash).unwrap(), Some(vec![1u8, 2, 3]));
        assert_eq!(store.node(&[0u8; 32]).unwrap(), None);
        assert_eq!(store.root().unwrap(), Some(hash));
    }
}
