//! End-to-end lifecycle: fresh open, connect, disconnect, reconnect.

mod common;

use chainstore::primitives::{Outpoint, Output};
use chainstore::store::KvStore;
use chainstore::{layout, ChainError, Network, DB_VERSION};

use common::*;

#[test]
fn fresh_open_writes_genesis_and_reopens() {
    let (_tmp, dir) = temp_data_dir();
    let network = Network::regtest();
    let genesis_hash = network.genesis.hash();

    let db = open_db(&dir, network.clone());

    let tip = db.get_tip().unwrap().expect("genesis tip");
    assert_eq!(tip.height, 0);
    assert_eq!(tip.hash, genesis_hash);
    assert_eq!(db.get_hash(0).unwrap(), Some(genesis_hash));
    assert_eq!(db.get_height(&genesis_hash).unwrap(), Some(0));
    assert!(db.is_main_hash(&genesis_hash).unwrap());
    assert_eq!(db.get_tips().unwrap(), vec![genesis_hash]);

    // Genesis coinbase entered the coin set.
    let state = db.chain_state();
    assert_eq!(state.tip, genesis_hash);
    assert_eq!(state.tx, 1);
    assert_eq!(state.coin, 1);
    assert_eq!(state.value, network.genesis.txs[0].outputs[0].value);
    assert!(db.get_coin(&genesis_outpoint(&db)).unwrap().is_some());

    // Genesis sits on a tree-interval boundary.
    let tree_state = db.tree_state();
    assert_eq!(tree_state.tree_root, db.tree_root());
    assert_eq!(tree_state.commit_height, 0);

    db.close().unwrap();

    // The version record is a literal "chain" tag plus u32-LE version.
    {
        let kv = KvStore::open(&dir.join("chain"), 16 << 20).unwrap();
        let mut expected = b"chain".to_vec();
        expected.extend_from_slice(&DB_VERSION.to_le_bytes());
        assert_eq!(kv.get(&layout::version()).unwrap(), Some(expected));
        assert!(kv.get(&layout::flags()).unwrap().is_some());
        assert!(kv.get(&layout::deployments()).unwrap().is_some());
    }

    let db = open_db(&dir, network);
    let tip = db.get_tip().unwrap().expect("tip after reopen");
    assert_eq!(tip.hash, genesis_hash);
    assert_eq!(db.chain_state().tx, 1);
    db.close().unwrap();
}

#[test]
fn second_writer_fails_fast() {
    let (_tmp, dir) = temp_data_dir();
    let db = open_db(&dir, Network::regtest());

    let err = chainstore::ChainDB::open(
        chainstore::ChainOptions::new(&dir),
        Network::regtest(),
    )
    .unwrap_err();
    assert!(matches!(err, ChainError::DataDirLocked { .. }));

    db.close().unwrap();
    open_db(&dir, Network::regtest()).close().unwrap();
}

#[test]
fn flag_mismatch_requires_migration() {
    let (_tmp, dir) = temp_data_dir();
    open_db(&dir, Network::regtest()).close().unwrap();

    let err = chainstore::ChainDB::open(
        chainstore::ChainOptions::new(&dir).with_index_tx(true),
        Network::regtest(),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        ChainError::FlagMismatch { flag: "index-tx" }
    ));
}

#[test]
fn connect_spend_then_disconnect_restores_everything() {
    let (_tmp, dir) = temp_data_dir();
    let db = open_db(&dir, Network::regtest());

    let genesis_state = db.chain_state();
    let genesis_hash = genesis_state.tip;
    let funding = genesis_outpoint(&db);
    let funding_value = db.get_coin(&funding).unwrap().unwrap().output.value;

    // Block 1 spends the genesis output into two new ones.
    let tx1 = spend(
        vec![funding],
        vec![
            Output::new(funding_value - 400, [0x21; 32]),
            Output::new(400, [0x22; 32]),
        ],
    );
    let tx1_hash = tx1.hash();
    let (entry1, block1, _) = connect(&db, vec![tx1]);

    // Spent coin gone, created coins present.
    assert!(db.get_coin(&funding).unwrap().is_none());
    let created = db
        .get_coin(&Outpoint::new(tx1_hash, 0))
        .unwrap()
        .expect("created coin");
    assert_eq!(created.output.value, funding_value - 400);
    assert_eq!(created.height, 1);

    // Indices and blobs.
    assert_eq!(db.get_next_hash(&genesis_hash).unwrap(), Some(entry1.hash));
    assert_eq!(db.get_hash(1).unwrap(), Some(entry1.hash));
    assert!(db.has_undo(&entry1.hash));
    assert!(db.has_block(&entry1.hash));
    assert_eq!(db.get_tips().unwrap(), vec![entry1.hash]);

    // Counters: one coinbase output (50) was added, the funding coin was
    // split without loss.
    let state = db.chain_state();
    assert_eq!(state.tip, entry1.hash);
    assert_eq!(state.tx, genesis_state.tx + 2);
    assert_eq!(state.coin, genesis_state.coin + 2);
    assert_eq!(state.value, genesis_state.value + 50);

    // Round-trip via the stored undo data.
    let undo = db.get_undo_coins(&entry1.hash).unwrap().expect("undo");
    assert_eq!(undo.len(), 1);

    let view = db.disconnect(&entry1, &block1).unwrap();
    assert!(view.coins.contains_key(&funding));

    assert!(db.get_coin(&Outpoint::new(tx1_hash, 0)).unwrap().is_none());
    let restored = db.get_coin(&funding).unwrap().expect("restored coin");
    assert_eq!(restored.output.value, funding_value);
    assert_eq!(db.get_next_hash(&genesis_hash).unwrap(), None);
    assert_eq!(db.get_hash(1).unwrap(), None);
    assert!(db.get_undo_coins(&entry1.hash).unwrap().is_none());
    assert_eq!(db.get_tips().unwrap(), vec![genesis_hash]);

    let state = db.chain_state();
    assert_eq!(state.tip, genesis_state.tip);
    assert_eq!(state.tx, genesis_state.tx);
    assert_eq!(state.coin, genesis_state.coin);
    assert_eq!(state.value, genesis_state.value);
    assert_eq!(state.burned, genesis_state.burned);

    // The entry itself survives as an alternate.
    assert!(db.has_entry(&entry1.hash).unwrap());
    assert!(!db.is_main_hash(&entry1.hash).unwrap());

    db.close().unwrap();
}

#[test]
fn disconnect_then_reconnect_restores_post_connect_state() {
    let (_tmp, dir) = temp_data_dir();
    let db = open_db(&dir, Network::regtest());

    let funding = genesis_outpoint(&db);
    let funding_value = db.get_coin(&funding).unwrap().unwrap().output.value;
    let tx1 = spend(vec![funding], vec![Output::new(funding_value, [0x31; 32])]);
    let (entry1, block1, _) = connect(&db, vec![tx1]);

    let connected = db.chain_state();
    let view = db.disconnect(&entry1, &block1).unwrap();
    drop(view);

    let mut view = spend_view(&db, &block1);
    db.reconnect(&entry1, &block1, &mut view).unwrap();

    let state = db.chain_state();
    assert_eq!(state.tip, connected.tip);
    assert_eq!(state.tx, connected.tx);
    assert_eq!(state.coin, connected.coin);
    assert_eq!(state.value, connected.value);
    assert!(db.has_undo(&entry1.hash));
    assert_eq!(db.get_hash(1).unwrap(), Some(entry1.hash));

    db.close().unwrap();
}

#[test]
fn store_only_save_records_an_alternate() {
    let (_tmp, dir) = temp_data_dir();
    let db = open_db(&dir, Network::regtest());

    let (main_entry, _, _) = connect(&db, vec![]);

    // A competing block at height 1, stored but not connected.
    let prev = db.get_entry_by_height(0).unwrap().unwrap();
    let cb = coinbase(1, vec![Output::new(77, [0x55; 32])]);
    let header = chainstore::BlockHeader {
        version: 0,
        prev_block: prev.hash,
        merkle_root: chainstore::Block::compute_merkle_root(std::slice::from_ref(&cb)),
        tree_root: db.tree_root(),
        time: prev.time + 9,
        bits: prev.bits,
        nonce: 1,
    };
    let alt_block = chainstore::Block::new(header, vec![cb]);
    let alt_entry = chainstore::ChainEntry::from_block(&alt_block, Some(&prev));
    db.save(&alt_entry, &alt_block, None).unwrap();

    assert!(db.has_entry(&alt_entry.hash).unwrap());
    assert!(!db.is_main_hash(&alt_entry.hash).unwrap());
    assert_eq!(db.get_hash(1).unwrap(), Some(main_entry.hash));
    assert_eq!(db.chain_state().tip, main_entry.hash);

    let mut tips = db.get_tips().unwrap();
    tips.sort();
    let mut expected = vec![main_entry.hash, alt_entry.hash];
    expected.sort();
    assert_eq!(tips, expected);

    // Off-main ancestry walks parents instead of the height index.
    let ancestor = db.get_ancestor(&alt_entry, 0).unwrap().unwrap();
    assert_eq!(ancestor.hash, prev.hash);

    db.close().unwrap();
}

#[test]
fn tx_and_address_indices_follow_connect_and_disconnect() {
    let (_tmp, dir) = temp_data_dir();
    let options = chainstore::ChainOptions::new(&dir)
        .with_index_tx(true)
        .with_index_address(true);
    let db = chainstore::ChainDB::open(options, Network::regtest()).unwrap();

    let funding = genesis_outpoint(&db);
    let funding_value = db.get_coin(&funding).unwrap().unwrap().output.value;
    let dest = [0x61u8; 32];
    let tx1 = spend(vec![funding], vec![Output::new(funding_value, dest)]);
    let tx1_hash = tx1.hash();
    let (entry1, block1, _) = connect(&db, vec![tx1.clone()]);

    assert!(db.has_tx(&tx1_hash).unwrap());
    let meta = db.get_meta(&tx1_hash).unwrap().expect("tx meta");
    assert_eq!(meta.height, 1);
    assert_eq!(meta.block_hash, entry1.hash);
    assert_eq!(meta.index, 1);
    assert_eq!(db.get_tx(&tx1_hash).unwrap(), Some(tx1.clone()));

    let hashes = db.get_hashes_by_address(&dest).unwrap();
    assert_eq!(hashes, vec![tx1_hash]);
    let coins = db.get_coins_by_address(&dest).unwrap();
    assert_eq!(coins.len(), 1);
    assert_eq!(coins[0].0, Outpoint::new(tx1_hash, 0));
    assert_eq!(coins[0].1.output.value, funding_value);

    // The spent-input lookup resolves through the tx index.
    let child = spend(
        vec![Outpoint::new(tx1_hash, 0)],
        vec![Output::new(funding_value, [0x62; 32])],
    );
    let spent = db.get_spent_view(&child).unwrap();
    assert!(spent.coins.contains_key(&Outpoint::new(tx1_hash, 0)));

    db.disconnect(&entry1, &block1).unwrap();
    assert!(!db.has_tx(&tx1_hash).unwrap());
    assert!(db.get_hashes_by_address(&dest).unwrap().is_empty());
    assert!(db.get_coins_by_address(&dest).unwrap().is_empty());

    db.close().unwrap();
}
