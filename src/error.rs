use std::path::PathBuf;

use thiserror::Error;

use crate::primitives::{Hash, Height};

pub type ChainResult<T> = Result<T, ChainError>;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("heed error: {0}")]
    Heed(#[from] heed::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database version is {found}, expected {expected}; run a migration before opening")]
    VersionMismatch { found: u32, expected: u32 },

    #[error("database network magic {stored:#010x} does not match configured {configured:#010x}")]
    NetworkMismatch { stored: u32, configured: u32 },

    #[error("database was created with a different '{flag}' setting; run a migration to change it")]
    FlagMismatch { flag: &'static str },

    #[error("required record '{0}' is missing")]
    MissingRecord(&'static str),

    #[error("corrupt {record} record: {reason}")]
    CorruptRecord {
        record: &'static str,
        reason: &'static str,
    },

    #[error("cannot reset when pruning is enabled")]
    ResetWhilePruned,

    #[error("cannot reset: tree was compacted at height {compaction_height}")]
    ResetWhileCompacted { compaction_height: Height },

    #[error("chain is already pruned")]
    AlreadyPruned,

    #[error("cannot prune in SPV mode")]
    PruneInSpv,

    #[error("cannot access the name tree in SPV mode")]
    TreeInSpv,

    #[error("compaction target at height {height} is not aligned to the tree interval")]
    CompactionMisaligned { height: Height },

    #[error("block {0:?} is not on the main chain")]
    NotMainChain(Hash),

    #[error("unknown block {0:?}")]
    UnknownBlock(Hash),

    #[error("no main-chain block at height {0}")]
    UnknownHeight(Height),

    #[error("undo data missing for block {0:?}")]
    MissingUndo(Hash),

    #[error("unknown tree root {0:?}")]
    UnknownTreeRoot(Hash),

    #[error("invalid proof: {0}")]
    InvalidProof(&'static str),

    #[error("blob header invalid: {reason}")]
    BlobHeaderInvalid { reason: &'static str },

    #[error("blob checksum mismatch for {0:?}")]
    BlobChecksumMismatch(Hash),

    #[error("data directory locked at {path:?}")]
    DataDirLocked { path: PathBuf },
}

impl ChainError {
    /// True for errors that indicate on-disk corruption rather than a
    /// recoverable operational condition.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            ChainError::MissingRecord(_)
                | ChainError::CorruptRecord { .. }
                | ChainError::BlobHeaderInvalid { .. }
                | ChainError::BlobChecksumMismatch(_)
        )
    }
}
