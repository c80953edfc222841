#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;
use std::sync::Once;

use chainstore::coins::CoinView;
use chainstore::primitives::{Input, Outpoint, Output};
use chainstore::{
    Block, BlockHeader, ChainDB, ChainEntry, ChainOptions, Network, Transaction,
};
use tempfile::tempdir_in;

static INIT_TESTDATA_ROOT: Once = Once::new();

pub fn temp_data_dir() -> (tempfile::TempDir, PathBuf) {
    let workspace_tmp = std::env::current_dir()
        .unwrap()
        .join("target/testdata/chainstore");
    INIT_TESTDATA_ROOT.call_once(|| {
        if std::env::var_os("CHAINSTORE_KEEP_TESTDATA").is_none() {
            let _ = fs::remove_dir_all(&workspace_tmp);
        }
    });
    fs::create_dir_all(&workspace_tmp).unwrap();
    let tmp = tempdir_in(&workspace_tmp).unwrap();
    let dir = tmp.path().join("db");
    (tmp, dir)
}

pub fn open_db(dir: &PathBuf, network: Network) -> ChainDB {
    ChainDB::open(ChainOptions::new(dir), network).expect("chain database should open")
}

/// Coinbase with the height folded into the locktime so every block gets a
/// distinct txid.
pub fn coinbase(height: u32, outputs: Vec<Output>) -> Transaction {
    let mut tx = Transaction::new(vec![Input::new(Outpoint::null())], outputs);
    tx.locktime = height;
    tx
}

/// Transaction spending `prevouts` into `outputs`.
pub fn spend(prevouts: Vec<Outpoint>, outputs: Vec<Output>) -> Transaction {
    let inputs = prevouts.into_iter().map(Input::new).collect();
    Transaction::new(inputs, outputs)
}

/// Block on the current tip committing to the current tree root.
pub fn build_block(db: &ChainDB, txs: Vec<Transaction>) -> (ChainEntry, Block) {
    let prev = db.get_tip().unwrap().expect("tip entry");
    let header = BlockHeader {
        version: 0,
        prev_block: prev.hash,
        merkle_root: Block::compute_merkle_root(&txs),
        tree_root: db.tree_root(),
        time: prev.time + 1,
        bits: prev.bits,
        nonce: 0,
    };
    let block = Block::new(header, txs);
    let entry = ChainEntry::from_block(&block, Some(&prev));
    (entry, block)
}

/// View pre-populated with the coins the block spends, the way a validator
/// hands one to the database.
pub fn spend_view(db: &ChainDB, block: &Block) -> CoinView {
    let mut view = CoinView::new();
    for tx in block.txs.iter().skip(1) {
        for input in &tx.inputs {
            let coin = db
                .get_coin(&input.prevout)
                .unwrap()
                .expect("input coin should be unspent");
            view.spend_coin(input.prevout, coin);
        }
    }
    view
}

/// Build, connect and return a block made of `txs` (coinbase excluded).
pub fn connect(db: &ChainDB, mut txs: Vec<Transaction>) -> (ChainEntry, Block, CoinView) {
    let height = db.get_tip().unwrap().expect("tip").height + 1;
    let mut all = vec![coinbase(height, vec![Output::new(50, [height as u8 + 1; 32])])];
    all.append(&mut txs);
    connect_raw(db, all)
}

/// Connect a block whose full tx list (coinbase first) is supplied.
pub fn connect_raw(db: &ChainDB, txs: Vec<Transaction>) -> (ChainEntry, Block, CoinView) {
    let (entry, block) = build_block(db, txs);
    let mut view = spend_view(db, &block);
    db.save(&entry, &block, Some(&mut view)).expect("connect");
    (entry, block, view)
}

/// Genesis coinbase outpoint of the opened database.
pub fn genesis_outpoint(db: &ChainDB) -> Outpoint {
    let genesis = db.network().genesis.clone();
    Outpoint::new(genesis.txs[0].hash(), 0)
}
