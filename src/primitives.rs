//! Chain data model: blocks, transactions, covenants, entries and the
//! records derived from them.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};

pub mod bitfield;
pub mod block;
pub mod covenant;
pub mod entry;
pub mod names;
pub mod tx;

pub use bitfield::BitField;
pub use block::{Block, BlockHeader};
pub use covenant::{Covenant, CovenantType};
pub use entry::ChainEntry;
pub use names::{NameState, NameStatus, NameUndo};
pub use tx::{Input, Outpoint, Output, Transaction, TxMeta};

/// 32-byte opaque hash.
pub type Hash = [u8; 32];

/// Block height.
pub type Height = u32;

/// Output value in base units.
pub type Amount = u64;

/// Address hash an output pays to.
pub type AddrHash = [u8; 32];

/// Hash identifying a name in the authenticated tree.
pub type NameHash = [u8; 32];

pub const ZERO_HASH: Hash = [0u8; 32];

/// Outputs paying the null address are unspendable data carriers.
pub const NULL_ADDRESS: AddrHash = [0u8; 32];

type Blake2b256 = Blake2b<U32>;

/// Blake2b-256 over `data`, the hash used for block, transaction and name
/// identifiers.
pub fn blake2b256(data: &[u8]) -> Hash {
    let mut hasher = Blake2b256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Blake2b-256 over multiple segments without intermediate copies.
pub fn blake2b256_multi(parts: &[&[u8]]) -> Hash {
    let mut hasher = Blake2b256::new();
    for part in parts {
        hasher.update(part);
    }
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Name hash as stored in the authenticated tree.
pub fn hash_name(name: &[u8]) -> NameHash {
    blake2b256(name)
}
