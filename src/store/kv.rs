use std::path::{Path, PathBuf};

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, Error as HeedError};

use crate::error::ChainResult;

pub const DEFAULT_MAP_SIZE: usize = 2 << 30;

const TABLE_NAME: &str = "chain";

/// Ordered byte-key metadata store over a single LMDB table.
///
/// All chain tables share the database and are distinguished by the key
/// prefixes in [`crate::layout`]. Mutations only happen through a
/// [`KvBatch`] applied in one write transaction.
#[derive(Debug)]
pub struct KvStore {
    env: Env,
    db: Database<Bytes, Bytes>,
    path: PathBuf,
}

impl KvStore {
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
                    tracing::error!(path = ?path, map_size, ?err, "Failed to open LMDB environment");
                    return Err(err.into());
                }
            }
        };

        let mut txn = env.write_txn()?;
        let db = env.create_database::<Bytes, Bytes>(&mut txn, Some(TABLE_NAME))?;
        txn.commit()?;

        Ok(Self {
            env,
            db,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &[u8]) -> ChainResult<Option<Vec<u8>>> {
        let txn = self.env.read_txn()?;
        Ok(self.db.get(&txn, key)?.map(<[u8]>::to_vec))
    }

    pub fn has(&self, key: &[u8]) -> ChainResult<bool> {
        let txn = self.env.read_txn()?;
        Ok(self.db.get(&txn, key)?.is_some())
    }

    /// All pairs whose key starts with `prefix`, in key order.
    pub fn prefix(&self, prefix: &[u8]) -> ChainResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let txn = self.env.read_txn()?;
        let mut out = Vec::new();
        for result in self.db.prefix_iter(&txn, prefix)? {
            let (key, value) = result?;
            out.push((key.to_vec(), value.to_vec()));
        }
        Ok(out)
    }

    /// Keys only, for index tables whose values are empty.
    pub fn prefix_keys(&self, prefix: &[u8]) -> ChainResult<Vec<Vec<u8>>> {
        let txn = self.env.read_txn()?;
        let mut out = Vec::new();
        for result in self.db.prefix_iter(&txn, prefix)? {
            let (key, _) = result?;
            out.push(key.to_vec());
        }
        Ok(out)
    }

    /// Apply a batch atomically, in the order it was recorded.
    pub fn write(&self, batch: &KvBatch) -> ChainResult<()> {
        let mut txn = self.env.write_txn()?;
        for op in &batch.ops {
            match op {
                KvOp::Put(key, value) => {
                    self.db.put(&mut txn, key, value)?;
                }
                KvOp::Del(key) => {
                    self.db.delete(&mut txn, key)?;
                }
            }
        }
        txn.commit()?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum KvOp {
    Put(Vec<u8>, Vec<u8>),
    Del(Vec<u8>),
}

/// Ordered set of staged mutations.
#[derive(Debug, Clone, Default)]
pub struct KvBatch {
    ops: Vec<KvOp>,
}

impl KvBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(KvOp::Put(key, value));
    }

    pub fn del(&mut self, key: Vec<u8>) {
        self.ops.push(KvOp::Del(key));
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
