//! Name-tree lifecycle: interval commits, undo records, proofs,
//! compaction.

mod common;

use chainstore::primitives::{hash_name, Outpoint, Output};
use chainstore::{ChainError, NameState, NameStatus, Network, Tree};

use common::*;

/// Connect empty blocks until the tip reaches `height`.
fn advance_to(db: &chainstore::ChainDB, height: u32) {
    while db.get_tip().unwrap().unwrap().height < height {
        connect(db, vec![]);
    }
}

#[test]
fn tree_commits_on_interval_boundary() {
    let (_tmp, dir) = temp_data_dir();
    let network = Network::regtest();
    let interval = network.tree_interval;
    assert_eq!(interval, 5);
    let db = open_db(&dir, network);

    let root0 = db.tree_root();
    assert_eq!(root0, Tree::empty_root());

    advance_to(&db, interval - 1);
    assert_eq!(db.tree_root(), root0, "no commit before the boundary");

    // The boundary block registers a name.
    let name = b"example".to_vec();
    let name_hash = hash_name(&name);
    let (entry, block) = build_block(&db, vec![coinbase(interval, vec![Output::new(50, [9; 32])])]);
    let mut view = spend_view(&db, &block);
    let state = NameState::open(name.clone(), interval, Outpoint::new([7u8; 32], 0));
    view.set_name(name_hash, Some(state.clone()), None);
    db.save(&entry, &block, Some(&mut view)).unwrap();

    // Root moved and the anchor record tracks it.
    let root1 = db.tree_root();
    assert_ne!(root1, root0);
    let tree_state = db.tree_state();
    assert_eq!(tree_state.tree_root, root1);
    assert_eq!(tree_state.commit_height, interval);

    // The name resolves through the transaction and the snapshot.
    let stored = db.get_name_state(&name_hash).unwrap().expect("name state");
    assert_eq!(stored, state);
    assert_eq!(
        db.get_name_state_by_name(&name).unwrap(),
        Some(state.clone())
    );
    assert_eq!(
        db.get_name_status(&name_hash, interval).unwrap(),
        NameStatus::Active
    );
    assert_eq!(
        db.lookup(&root1, &name_hash).unwrap(),
        Some(state.encode())
    );

    let proof = db.prove(&root1, &name_hash).unwrap();
    assert_eq!(
        proof.verify(&root1, &name_hash).unwrap(),
        Some(state.encode())
    );

    // Absence proof for an unregistered name.
    let absent = hash_name(b"unregistered");
    let proof = db.prove(&root1, &absent).unwrap();
    assert_eq!(proof.verify(&root1, &absent).unwrap(), None);

    // Disconnecting the boundary block rewinds root and anchor.
    let view = db.disconnect(&entry, &block).unwrap();
    drop(view);
    assert_eq!(db.tree_root(), root0);
    let tree_state = db.tree_state();
    assert_eq!(tree_state.tree_root, root0);
    assert_eq!(tree_state.commit_height, 0);
    assert_eq!(db.get_name_state(&name_hash).unwrap(), None);

    db.close().unwrap();
}

#[test]
fn names_survive_reopen_via_recovery_anchor() {
    let (_tmp, dir) = temp_data_dir();
    let network = Network::regtest();
    let interval = network.tree_interval;

    let name_hash = hash_name(b"durable");
    {
        let db = open_db(&dir, network.clone());
        advance_to(&db, interval - 1);
        let (entry, block) =
            build_block(&db, vec![coinbase(interval, vec![Output::new(1, [8; 32])])]);
        let mut view = spend_view(&db, &block);
        let state = NameState::open(b"durable".to_vec(), interval, Outpoint::new([1; 32], 0));
        view.set_name(name_hash, Some(state), None);
        db.save(&entry, &block, Some(&mut view)).unwrap();

        // A tree write the KV store never anchored is discarded on reopen.
        db.close().unwrap();
    }

    let db = open_db(&dir, network);
    assert!(db.get_name_state(&name_hash).unwrap().is_some());
    assert_eq!(db.tree_state().tree_root, db.tree_root());
    db.close().unwrap();
}

#[test]
fn compaction_drops_old_roots_and_blocks_reset() {
    let (_tmp, dir) = temp_data_dir();
    let network = Network::regtest();
    let interval = network.tree_interval;
    let db = open_db(&dir, network);

    // Two boundary commits with different names.
    let first = hash_name(b"first");
    advance_to(&db, interval - 1);
    let (entry, block) = build_block(&db, vec![coinbase(interval, vec![Output::new(1, [2; 32])])]);
    let mut view = spend_view(&db, &block);
    view.set_name(
        first,
        Some(NameState::open(b"first".to_vec(), interval, Outpoint::new([1; 32], 0))),
        None,
    );
    db.save(&entry, &block, Some(&mut view)).unwrap();
    let root1 = db.tree_root();

    let second = hash_name(b"second");
    advance_to(&db, 2 * interval - 1);
    let (entry, block) =
        build_block(&db, vec![coinbase(2 * interval, vec![Output::new(1, [3; 32])])]);
    let mut view = spend_view(&db, &block);
    view.set_name(
        second,
        Some(NameState::open(b"second".to_vec(), 2 * interval, Outpoint::new([2; 32], 0))),
        None,
    );
    db.save(&entry, &block, Some(&mut view)).unwrap();
    let root2 = db.tree_root();
    assert_ne!(root1, root2);

    // One block past the boundary carries root2 in its header.
    let (target, _, _) = connect(&db, vec![]);
    assert_eq!(target.height, 2 * interval + 1);
    assert_eq!(target.tree_root, root2);

    // Misaligned targets fail fast.
    let (bad, _, _) = connect(&db, vec![]);
    assert!(matches!(
        db.compact_tree(&bad),
        Err(ChainError::CompactionMisaligned { .. })
    ));

    db.compact_tree(&target).unwrap();

    let tree_state = db.tree_state();
    assert!(tree_state.is_compacted());
    assert_eq!(tree_state.compaction_height, target.height);
    assert_eq!(tree_state.compaction_root, root2);

    // Current state is intact, the old root is gone.
    assert_eq!(db.lookup(&root2, &first).unwrap().map(|_| ()), Some(()));
    assert_eq!(db.lookup(&root2, &second).unwrap().map(|_| ()), Some(()));
    assert!(matches!(
        db.lookup(&root1, &first),
        Err(ChainError::UnknownTreeRoot(_))
    ));

    // Compacting again at the same root is a no-op.
    db.compact_tree(&target).unwrap();

    // Reset below a compacted tree is refused.
    assert!(matches!(
        db.reset(0u32),
        Err(ChainError::ResetWhileCompacted { .. })
    ));

    db.close().unwrap();
}
