#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use bytes::Bytes;
use ethereum_types::{Address, H256, U256};
use lattice_store::{
    api::{StorageBackend, TRIE_NODES},
    backend::InMemoryBackend, AddressingScheme, BlockHeader, CommitSpec,
    PruningConfig, StoreError, WorldState, EMPTY_TRIE_HASH,
};
use rand::{rngs::StdRng, Rng, SeedableRng};

fn new_state(scheme: AddressingScheme, config: PruningConfig) -> WorldState {
    let backend: Arc<dyn StorageBackend> = Arc::new(InMemoryBackend::new());
    WorldState::new(backend, scheme, config).unwrap()
}

fn address(n: u64) -> Address {
    let mut bytes = [0u8; 20];
    bytes[12..].copy_from_slice(&n.to_be_bytes());
    Address::from(bytes)
}

#[test]
fn balance_nonce_code_storage_round_trip() {
    let mut state = new_state(AddressingScheme::Hash, PruningConfig::archive());
    state.begin_scope(&BlockHeader::genesis()).unwrap();

    let alice = address(1);
    state.add_to_balance(alice, U256::from(1000)).unwrap();
    state.set_nonce(alice, 7).unwrap();
    state.set_code(alice, Bytes::from_static(b"\x60\x00")).unwrap();
    state.set_storage(alice, U256::from(5), U256::from(99)).unwrap();

    // read-your-writes before commit
    assert_eq!(state.get_balance(&alice).unwrap(), U256::from(1000));
    assert_eq!(state.get_nonce(&alice).unwrap(), 7);
    assert_eq!(state.get_storage(&alice, U256::from(5)).unwrap(), U256::from(99));

    let root = state.commit(&CommitSpec::default()).unwrap();
    assert_ne!(root, *EMPTY_TRIE_HASH);
    let committed = state.commit_tree(1).unwrap();
    assert_eq!(root, committed);

    // same values against the committed root
    assert_eq!(state.get_balance(&alice).unwrap(), U256::from(1000));
    assert_eq!(state.get_nonce(&alice).unwrap(), 7);
    assert_eq!(state.get_code(&alice).unwrap(), Bytes::from_static(b"\x60\x00"));
    assert_eq!(state.get_storage(&alice, U256::from(5)).unwrap(), U256::from(99));
    // absent slot reads as zero
    assert_eq!(state.get_storage(&alice, U256::from(6)).unwrap(), U256::zero());
}

#[test]
fn commit_root_is_order_independent() {
    let build = |reverse: bool| {
        let mut state = new_state(AddressingScheme::Hash, PruningConfig::archive());
        state.begin_scope(&BlockHeader::genesis()).unwrap();
        let mut ops: Vec<u64> = (0..40).collect();
        if reverse {
            ops.reverse();
        }
        for n in ops {
            let account = address(n % 8);
            state.add_to_balance(account, U256::from(n + 1)).unwrap();
            state.set_storage(account, U256::from(n), U256::from(n * 2 + 1)).unwrap();
        }
        state.commit(&CommitSpec::default()).unwrap()
    };
    assert_eq!(build(false), build(true));
}

#[test]
fn zero_storage_write_deletes_the_slot() {
    let mut state = new_state(AddressingScheme::Hash, PruningConfig::archive());
    state.begin_scope(&BlockHeader::genesis()).unwrap();

    let account = address(3);
    state.add_to_balance(account, U256::one()).unwrap();
    state.set_storage(account, U256::from(1), U256::from(11)).unwrap();
    state.commit(&CommitSpec::default()).unwrap();
    let root_one_slot = state.commit_tree(1).unwrap();

    state.set_storage(account, U256::from(2), U256::from(22)).unwrap();
    state.commit(&CommitSpec::default()).unwrap();
    state.commit_tree(2).unwrap();

    // deleting the second slot must collapse back to the single-slot shape
    state.set_storage(account, U256::from(2), U256::zero()).unwrap();
    state.commit(&CommitSpec::default()).unwrap();
    let root_after_delete = state.commit_tree(3).unwrap();

    assert_eq!(root_after_delete, root_one_slot);
    assert_eq!(state.get_storage(&account, U256::from(2)).unwrap(), U256::zero());
}

#[test]
fn same_slot_twice_keeps_only_final_value() {
    let mut state = new_state(AddressingScheme::Hash, PruningConfig::archive());
    state.begin_scope(&BlockHeader::genesis()).unwrap();
    let account = address(4);
    state.add_to_balance(account, U256::one()).unwrap();
    state.set_storage(account, U256::from(9), U256::from(1)).unwrap();
    state.set_storage(account, U256::from(9), U256::from(2)).unwrap();
    let root = state.commit(&CommitSpec::default()).unwrap();
    state.commit_tree(1).unwrap();

    assert_eq!(state.get_storage(&account, U256::from(9)).unwrap(), U256::from(2));

    // identical to writing the final value once
    let mut direct = new_state(AddressingScheme::Hash, PruningConfig::archive());
    direct.begin_scope(&BlockHeader::genesis()).unwrap();
    direct.add_to_balance(account, U256::one()).unwrap();
    direct.set_storage(account, U256::from(9), U256::from(2)).unwrap();
    assert_eq!(direct.commit(&CommitSpec::default()).unwrap(), root);
}

#[test]
fn untouched_accounts_keep_their_record() {
    let mut state = new_state(AddressingScheme::Hash, PruningConfig::archive());
    state.begin_scope(&BlockHeader::genesis()).unwrap();

    let stable = address(10);
    let churning = address(11);
    state.add_to_balance(stable, U256::from(5)).unwrap();
    state.set_storage(stable, U256::from(1), U256::from(1)).unwrap();
    state.add_to_balance(churning, U256::from(5)).unwrap();
    state.commit(&CommitSpec::default()).unwrap();
    state.commit_tree(1).unwrap();
    let stable_before = state.get_account(&stable).unwrap();

    for sequence in 2..6 {
        state.add_to_balance(churning, U256::from(1)).unwrap();
        state
            .set_storage(churning, U256::from(sequence), U256::from(sequence))
            .unwrap();
        state.commit(&CommitSpec::default()).unwrap();
        state.commit_tree(sequence).unwrap();
    }

    // structural sharing: the untouched account's record (storage root
    // included) is identical across all the later commits
    assert_eq!(state.get_account(&stable).unwrap(), stable_before);
}

#[test]
fn empty_accounts_are_removed_at_commit() {
    let mut state = new_state(AddressingScheme::Hash, PruningConfig::archive());
    state.begin_scope(&BlockHeader::genesis()).unwrap();
    // all-zero account: created by the write, removed by the commit rules
    state.set_nonce(address(1), 0).unwrap();
    let root = state.commit(&CommitSpec::default()).unwrap();
    assert_eq!(root, *EMPTY_TRIE_HASH);

    let mut keeping = new_state(AddressingScheme::Hash, PruningConfig::archive());
    keeping.begin_scope(&BlockHeader::genesis()).unwrap();
    keeping.set_nonce(address(1), 0).unwrap();
    let root = keeping
        .commit(&CommitSpec {
            remove_empty_accounts: false,
        })
        .unwrap();
    assert_ne!(root, *EMPTY_TRIE_HASH);
}

#[test]
fn scope_misuse_is_fatal() {
    let mut state = new_state(AddressingScheme::Hash, PruningConfig::archive());

    // commit with no open scope
    assert!(matches!(
        state.commit(&CommitSpec::default()),
        Err(StoreError::NoOpenScope)
    ));

    state.begin_scope(&BlockHeader::genesis()).unwrap();
    assert!(matches!(
        state.begin_scope(&BlockHeader::genesis()),
        Err(StoreError::ScopeAlreadyOpen)
    ));

    // commit_tree before commit
    assert!(matches!(
        state.commit_tree(1),
        Err(StoreError::NoPendingRoot)
    ));

    // unknown anchor root
    state.reset();
    let bogus = BlockHeader::new(9, H256::repeat_byte(0x42), H256::zero());
    assert!(matches!(
        state.begin_scope(&bogus),
        Err(StoreError::UnresolvableRoot(_))
    ));
}

#[test]
fn reset_discards_uncommitted_writes() {
    let mut state = new_state(AddressingScheme::Hash, PruningConfig::archive());
    state.begin_scope(&BlockHeader::genesis()).unwrap();
    state.add_to_balance(address(1), U256::from(50)).unwrap();
    state.commit(&CommitSpec::default()).unwrap();
    let root = state.commit_tree(1).unwrap();

    state.add_to_balance(address(1), U256::from(999)).unwrap();
    state.reset();

    state
        .begin_scope(&BlockHeader::new(1, root, H256::zero()))
        .unwrap();
    assert_eq!(state.get_balance(&address(1)).unwrap(), U256::from(50));
}

#[test]
fn addressing_scheme_is_fixed_per_store() {
    let backend: Arc<dyn StorageBackend> = Arc::new(InMemoryBackend::new());
    let state = WorldState::new(
        backend.clone(),
        AddressingScheme::Hash,
        PruningConfig::archive(),
    )
    .unwrap();
    drop(state);

    assert!(matches!(
        WorldState::new(backend, AddressingScheme::Path, PruningConfig::archive()),
        Err(StoreError::AddressingSchemeMismatch { .. })
    ));
}

#[test]
fn invalid_pruning_config_fails_before_touching_data() {
    let backend: Arc<dyn StorageBackend> = Arc::new(InMemoryBackend::new());
    let config = PruningConfig::hybrid(1 << 20, 64, 8);
    assert!(matches!(
        WorldState::new(backend, AddressingScheme::Hash, config),
        Err(StoreError::InvalidConfig(_))
    ));
}

#[test]
fn path_and_half_path_schemes_round_trip() {
    for scheme in [AddressingScheme::Path, AddressingScheme::HalfPath] {
        let mut state = new_state(scheme, PruningConfig::archive());
        state.begin_scope(&BlockHeader::genesis()).unwrap();
        let account = address(8);
        state.add_to_balance(account, U256::from(77)).unwrap();
        for slot in 0..50u64 {
            state
                .set_storage(account, U256::from(slot), U256::from(slot + 1))
                .unwrap();
        }
        state.commit(&CommitSpec::default()).unwrap();
        state.commit_tree(1).unwrap();

        assert_eq!(state.get_balance(&account).unwrap(), U256::from(77));
        for slot in 0..50u64 {
            assert_eq!(
                state.get_storage(&account, U256::from(slot)).unwrap(),
                U256::from(slot + 1)
            );
        }
    }
}

#[test]
fn path_scheme_serves_history_from_the_unflushed_buffer() {
    // position-addressed slots get overwritten at flush time, but while the
    // batches are buffered every retained version stays readable
    let mut state = new_state(
        AddressingScheme::Path,
        PruningConfig::in_memory(usize::MAX, 64),
    );
    state.begin_scope(&BlockHeader::genesis()).unwrap();
    let account = address(2);

    state.set_storage(account, U256::one(), U256::from(100)).unwrap();
    state.add_to_balance(account, U256::one()).unwrap();
    state.commit(&CommitSpec::default()).unwrap();
    let r1 = state.commit_tree(1).unwrap();

    state.set_storage(account, U256::one(), U256::from(200)).unwrap();
    state.commit(&CommitSpec::default()).unwrap();
    let r2 = state.commit_tree(2).unwrap();
    assert_ne!(r1, r2);

    let old = state.view_at(r1).unwrap();
    assert_eq!(old.get_storage(&account, U256::one()).unwrap(), U256::from(100));
    let new = state.view_at(r2).unwrap();
    assert_eq!(new.get_storage(&account, U256::one()).unwrap(), U256::from(200));
}

#[test]
fn hybrid_pruning_keeps_window_roots_resolvable() {
    let window = 4u64;
    let mut state = new_state(
        AddressingScheme::Hash,
        PruningConfig::hybrid(1, 1, window), // tiny budget: flush every commit
    );
    state.begin_scope(&BlockHeader::genesis()).unwrap();
    let account = address(1);

    let mut roots = Vec::new();
    for sequence in 1..=20u64 {
        state.add_to_balance(account, U256::one()).unwrap();
        state
            .set_storage(account, U256::from(sequence % 3), U256::from(sequence))
            .unwrap();
        state.commit(&CommitSpec::default()).unwrap();
        roots.push((sequence, state.commit_tree(sequence).unwrap()));
    }

    let latest = roots.last().unwrap().0;
    for &(sequence, root) in &roots {
        let view = state.view_at(root);
        if latest - sequence < window {
            // inside the window: fully resolvable, values intact
            let view = view.unwrap();
            assert_eq!(
                view.get_storage(&account, U256::from(sequence % 3)).unwrap(),
                U256::from(sequence)
            );
            assert_eq!(view.get_balance(&account).unwrap(), U256::from(sequence));
        }
    }

    // the oldest roots were unpinned and their exclusive nodes deleted
    assert!(matches!(
        state.view_at(roots[0].1),
        Err(StoreError::UnresolvableRoot(_))
    ));
}

#[test]
fn toggled_subtree_is_reclaimed_after_expiry() {
    // a slot toggling back to an earlier value re-emits byte-identical nodes
    // in a later batch; they must not pick up extra reference counts, or the
    // superseded subtree can never be deleted
    let backend: Arc<dyn StorageBackend> = Arc::new(InMemoryBackend::new());
    let mut state = WorldState::new(
        backend.clone(),
        AddressingScheme::Hash,
        PruningConfig::hybrid(1, 1, 2), // flush every commit, short window
    )
    .unwrap();
    state.begin_scope(&BlockHeader::genesis()).unwrap();
    let account = address(1);
    let other = address(2);

    state.add_to_balance(account, U256::one()).unwrap();
    state.set_storage(account, U256::one(), U256::from(111)).unwrap();
    state.commit(&CommitSpec::default()).unwrap();
    state.commit_tree(1).unwrap();
    let first_storage_root = state.get_account(&account).unwrap().storage_root;

    state.set_storage(account, U256::one(), U256::from(222)).unwrap();
    state.commit(&CommitSpec::default()).unwrap();
    state.commit_tree(2).unwrap();
    let second_storage_root = state.get_account(&account).unwrap().storage_root;
    assert_ne!(first_storage_root, second_storage_root);

    // toggle back and forth, flushing the same node contents twice
    state.set_storage(account, U256::one(), U256::from(111)).unwrap();
    state.commit(&CommitSpec::default()).unwrap();
    state.commit_tree(3).unwrap();
    assert_eq!(
        state.get_account(&account).unwrap().storage_root,
        first_storage_root
    );
    state.set_storage(account, U256::one(), U256::from(222)).unwrap();
    state.commit(&CommitSpec::default()).unwrap();
    state.commit_tree(4).unwrap();

    // churn unrelated state until every root holding the old storage subtree
    // has left the retention window
    for sequence in 5..=8 {
        state.add_to_balance(other, U256::one()).unwrap();
        state.commit(&CommitSpec::default()).unwrap();
        state.commit_tree(sequence).unwrap();
    }

    let view = backend.begin_read().unwrap();
    assert_eq!(
        view.get(TRIE_NODES, first_storage_root.as_bytes()).unwrap(),
        None
    );
    // the live subtree survives and reads stay intact
    assert!(view
        .get(TRIE_NODES, second_storage_root.as_bytes())
        .unwrap()
        .is_some());
    assert_eq!(state.get_storage(&account, U256::one()).unwrap(), U256::from(222));
}

#[test]
fn historical_views_read_concurrently_with_the_writer() {
    let mut state = new_state(AddressingScheme::Hash, PruningConfig::archive());
    state.begin_scope(&BlockHeader::genesis()).unwrap();
    let account = address(1);
    state.add_to_balance(account, U256::from(10)).unwrap();
    state.set_storage(account, U256::one(), U256::from(5)).unwrap();
    state.commit(&CommitSpec::default()).unwrap();
    let r1 = state.commit_tree(1).unwrap();

    let view = state.view_at(r1).unwrap();
    let reader = std::thread::spawn(move || {
        for _ in 0..200 {
            assert_eq!(view.get_balance(&account).unwrap(), U256::from(10));
            assert_eq!(
                view.get_storage(&account, U256::one()).unwrap(),
                U256::from(5)
            );
        }
    });

    for sequence in 2..=20 {
        state.add_to_balance(account, U256::one()).unwrap();
        state
            .set_storage(account, U256::from(sequence), U256::from(sequence))
            .unwrap();
        state.commit(&CommitSpec::default()).unwrap();
        state.commit_tree(sequence).unwrap();
    }
    reader.join().unwrap();

    assert_eq!(state.get_balance(&account).unwrap(), U256::from(29));
}

#[test]
fn memory_mode_evicts_out_of_window_headers() {
    let mut state = new_state(AddressingScheme::Hash, PruningConfig::in_memory(1, 2));
    state.begin_scope(&BlockHeader::genesis()).unwrap();
    let account = address(1);
    for sequence in 1..=10 {
        state.add_to_balance(account, U256::one()).unwrap();
        state
            .set_storage(account, U256::from(sequence), U256::from(sequence))
            .unwrap();
        state.commit(&CommitSpec::default()).unwrap();
        state.commit_tree(sequence).unwrap();
    }

    assert_eq!(state.get_header(1).unwrap(), None);
    assert!(state.get_header(10).unwrap().is_some());
    // evicted batches were flattened, the live state stays readable
    assert_eq!(state.get_balance(&account).unwrap(), U256::from(10));
}

#[test]
fn flush_cache_forces_nodes_to_the_backend() {
    let mut state = new_state(
        AddressingScheme::Hash,
        PruningConfig::hybrid(usize::MAX, 64, 64), // nothing flushes on its own
    );
    state.begin_scope(&BlockHeader::genesis()).unwrap();
    let account = address(5);
    state.add_to_balance(account, U256::from(42)).unwrap();
    state.commit(&CommitSpec::default()).unwrap();
    let root = state.commit_tree(1).unwrap();

    state.flush_cache().unwrap();

    // still readable after the forced flush
    let view = state.view_at(root).unwrap();
    assert_eq!(view.get_balance(&account).unwrap(), U256::from(42));
    assert_eq!(state.get_balance(&account).unwrap(), U256::from(42));
}

#[test]
fn headers_are_recorded_per_sequence() {
    let mut state = new_state(AddressingScheme::Hash, PruningConfig::archive());
    state.begin_scope(&BlockHeader::genesis()).unwrap();
    state.add_to_balance(address(1), U256::one()).unwrap();
    state.commit(&CommitSpec::default()).unwrap();
    let root = state.commit_tree(7).unwrap();

    let header = state.get_header(7).unwrap().unwrap();
    assert_eq!(header.number, 7);
    assert_eq!(header.state_root, root);
    assert_eq!(state.get_header(8).unwrap(), None);
}

#[test]
fn hundred_account_scenario() {
    let mut rng = StdRng::seed_from_u64(0x1a77ce);
    let mut state = new_state(AddressingScheme::Hash, PruningConfig::archive());
    state.begin_scope(&BlockHeader::genesis()).unwrap();

    // 100 accounts, each with a random number of storage slots, committed in
    // batches of 50 accounts
    let mut expected: Vec<(Address, Vec<(U256, U256)>)> = Vec::new();
    for account_index in 0..100u64 {
        let account = address(1000 + account_index);
        state.add_to_balance(account, U256::from(account_index + 1)).unwrap();
        let slot_count = rng.gen_range(0..2000u64);
        let mut slots = Vec::new();
        for slot in 0..slot_count {
            let value = U256::from(rng.gen_range(1..u64::MAX));
            state.set_storage(account, U256::from(slot), value).unwrap();
            slots.push((U256::from(slot), value));
        }
        expected.push((account, slots));

        if account_index % 50 == 49 {
            state.commit(&CommitSpec::default()).unwrap();
            state.commit_tree(account_index / 50 + 1).unwrap();
        }
    }
    let r1 = state.get_header(2).unwrap().unwrap().state_root;

    // modify 100 random slots across the first 10 accounts
    let mut modified: Vec<(Address, U256, U256)> = Vec::new();
    for _ in 0..100 {
        let (account, slots) = &expected[rng.gen_range(0..10)];
        if slots.is_empty() {
            continue;
        }
        let (slot, _) = slots[rng.gen_range(0..slots.len())];
        let value = U256::from(rng.gen_range(1..u64::MAX));
        state.set_storage(*account, slot, value).unwrap();
        modified.push((*account, slot, value));
    }
    state.commit(&CommitSpec::default()).unwrap();
    let r2 = state.commit_tree(3).unwrap();
    assert_ne!(r1, r2);

    // reopen at R1: original values
    state.reset();
    let at_r1 = state.view_at(r1).unwrap();
    for (account, slots) in &expected {
        for (slot, value) in slots.iter().take(20) {
            assert_eq!(at_r1.get_storage(account, *slot).unwrap(), *value);
        }
    }

    // reopen at R2: modified values
    let at_r2 = state.view_at(r2).unwrap();
    for (account, slot, value) in &modified {
        // later modifications of the same slot win
        let last = modified
            .iter()
            .rev()
            .find(|(a, s, _)| a == account && s == slot)
            .map(|(_, _, v)| *v)
            .unwrap_or(*value);
        assert_eq!(at_r2.get_storage(account, *slot).unwrap(), last);
    }
}
