//! Key layout of the metadata store.
//!
//! Every table shares one LMDB database and is distinguished by a leading
//! prefix byte. Heights inside keys are big-endian so that range scans walk
//! the chain in order; heights inside values stay little-endian.

use crate::primitives::{AddrHash, Hash, Height};

pub const VERSION: u8 = b'V';
pub const FLAGS: u8 = b'O';
pub const STATE: u8 = b'R';
pub const TREE_STATE: u8 = b's';
pub const DEPLOYMENTS: u8 = b'D';
pub const FIELD: u8 = b'f';
pub const HEIGHT_BY_HASH: u8 = b'h';
pub const HASH_BY_HEIGHT: u8 = b'H';
pub const ENTRY: u8 = b'e';
pub const NEXT: u8 = b'n';
pub const TIP: u8 = b'p';
pub const COIN: u8 = b'c';
pub const TX: u8 = b't';
pub const TX_BY_ADDR: u8 = b'T';
pub const COIN_BY_ADDR: u8 = b'C';
pub const VERSION_BIT: u8 = b'v';
pub const NAME_UNDO: u8 = b'w';

#[inline]
fn hash_key(prefix: u8, hash: &Hash) -> Vec<u8> {
    let mut key = Vec::with_capacity(33);
    key.push(prefix);
    key.extend_from_slice(hash);
    key
}

#[inline]
fn height_key(prefix: u8, height: Height) -> Vec<u8> {
    let mut key = Vec::with_capacity(5);
    key.push(prefix);
    key.extend_from_slice(&height.to_be_bytes());
    key
}

pub fn version() -> Vec<u8> {
    vec![VERSION]
}

pub fn flags() -> Vec<u8> {
    vec![FLAGS]
}

pub fn state() -> Vec<u8> {
    vec![STATE]
}

pub fn tree_state() -> Vec<u8> {
    vec![TREE_STATE]
}

pub fn deployments() -> Vec<u8> {
    vec![DEPLOYMENTS]
}

pub fn field() -> Vec<u8> {
    vec![FIELD]
}

pub fn height_by_hash(hash: &Hash) -> Vec<u8> {
    hash_key(HEIGHT_BY_HASH, hash)
}

pub fn hash_by_height(height: Height) -> Vec<u8> {
    height_key(HASH_BY_HEIGHT, height)
}

pub fn entry(hash: &Hash) -> Vec<u8> {
    hash_key(ENTRY, hash)
}

pub fn next(hash: &Hash) -> Vec<u8> {
    hash_key(NEXT, hash)
}

pub fn tip(hash: &Hash) -> Vec<u8> {
    hash_key(TIP, hash)
}

pub fn coin(hash: &Hash, index: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(37);
    key.push(COIN);
    key.extend_from_slice(hash);
    key.extend_from_slice(&index.to_be_bytes());
    key
}

/// Prefix covering every coin of one transaction.
pub fn coin_prefix(hash: &Hash) -> Vec<u8> {
    hash_key(COIN, hash)
}

pub fn tx(hash: &Hash) -> Vec<u8> {
    hash_key(TX, hash)
}

pub fn tx_by_addr(addr: &AddrHash, txid: &Hash) -> Vec<u8> {
    let mut key = Vec::with_capacity(65);
    key.push(TX_BY_ADDR);
    key.extend_from_slice(addr);
    key.extend_from_slice(txid);
    key
}

pub fn tx_by_addr_prefix(addr: &AddrHash) -> Vec<u8> {
    hash_key(TX_BY_ADDR, addr)
}

pub fn coin_by_addr(addr: &AddrHash, txid: &Hash, index: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(69);
    key.push(COIN_BY_ADDR);
    key.extend_from_slice(addr);
    key.extend_from_slice(txid);
    key.extend_from_slice(&index.to_be_bytes());
    key
}

pub fn coin_by_addr_prefix(addr: &AddrHash) -> Vec<u8> {
    hash_key(COIN_BY_ADDR, addr)
}

pub fn version_bit(bit: u8, hash: &Hash) -> Vec<u8> {
    let mut key = Vec::with_capacity(34);
    key.push(VERSION_BIT);
    key.push(bit);
    key.extend_from_slice(hash);
    key
}

pub fn version_bit_prefix(bit: u8) -> Vec<u8> {
    vec![VERSION_BIT, bit]
}

pub fn name_undo(height: Height) -> Vec<u8> {
    height_key(NAME_UNDO, height)
}

/// Decode the trailing txid of a `T` key.
pub fn parse_tx_by_addr(key: &[u8]) -> Option<Hash> {
    if key.len() != 65 || key[0] != TX_BY_ADDR {
        return None;
    }
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&key[33..65]);
    Some(hash)
}

/// Decode the trailing (txid, index) of a `C` key.
pub fn parse_coin_by_addr(key: &[u8]) -> Option<(Hash, u32)> {
    if key.len() != 69 || key[0] != COIN_BY_ADDR {
        return None;
    }
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&key[33..65]);
    let index = u32::from_be_bytes([key[65], key[66], key[67], key[68]]);
    Some((hash, index))
}

/// Decode the height out of an `H` key.
pub fn parse_hash_by_height(key: &[u8]) -> Option<Height> {
    if key.len() != 5 || key[0] != HASH_BY_HEIGHT {
        return None;
    }
    Some(Height::from_be_bytes([key[1], key[2], key[3], key[4]]))
}

/// Decode the trailing hash of a single-hash key such as `p` or `e`.
pub fn parse_hash_suffix(key: &[u8]) -> Option<Hash> {
    if key.len() != 33 {
        return None;
    }
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&key[1..33]);
    Some(hash)
}
