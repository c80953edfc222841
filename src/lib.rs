//! # chainstore
//!
//! Chain database for a name-aware UTXO full node: block and undo
//! storage, the UTXO set, an authenticated name tree and the atomic
//! transitions (connect, reconnect, disconnect, reset, prune, compact)
//! that keep them consistent as the main chain evolves.
//!
//! ## Architecture
//!
//! Five substores live under one commit discipline:
//!
//! - an LMDB metadata store holding every index record (`store::kv`),
//! - a framed blob store for raw blocks and undo data (`store::blobs`),
//! - a content-addressed sparse Merkle tree for name state (`tree`),
//! - staged LRU caches for entries and coins (`cache`),
//! - the versionbit state cache (`state::deployments`).
//!
//! A single writer drives mutations through the batch coordinator; blob
//! writes land first, the key-value batch commits atomically, and only
//! then do the in-memory `ChainState`/`TreeState` pointers swap, so
//! readers never observe a torn transition.
//!
//! ## Quick start
//!
//! ```ignore
//! use chainstore::{ChainDB, ChainOptions, Network};
//!
//! let db = ChainDB::open(ChainOptions::new("./data"), Network::main())?;
//! let tip = db.get_tip()?.expect("genesis is always present");
//! println!("tip at height {}", tip.height);
//! db.close()?;
//! # Ok::<(), chainstore::ChainError>(())
//! ```

pub mod cache;
pub mod coins;
pub mod db;
pub mod encoding;
pub mod error;
pub mod filter;
pub mod layout;
pub mod options;
pub mod primitives;
pub mod state;
pub mod store;
pub mod tree;

pub use coins::{BitDelta, CoinEntry, CoinView, UndoCoins};
pub use db::{BlockRef, ChainDB, DB_VERSION};
pub use error::{ChainError, ChainResult};
pub use filter::{BloomFilter, ScanFilter};
pub use options::{ChainOptions, Network, COIN};
pub use primitives::{
    Block, BlockHeader, ChainEntry, Covenant, CovenantType, NameState, NameStatus, Transaction,
};
pub use state::{ChainFlags, ChainState, Deployment, TreeState};
pub use tree::{Proof, Tree};
