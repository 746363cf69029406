//! Pool admission checks: what gets rejected before ever touching the pool.

use ethereum_types::U256;
use tessera_objects::{
    testing::{self, TestUser},
    AccountCreationAuth, AtomicGroupId, FeeSelector, Idx, Nonce, TokenId, TxId,
};
use tessera_state::{Mode, StateDb};
use tessera_tx::{
    admission::{prepare_atomic_submission, prepare_single_submission},
    AdmissionError, Config, MemPool, TxProcessor,
};

const CHAIN_ID: u16 = 7;

fn config() -> Config {
    Config {
        n_levels: 32,
        max_tx: 32,
        max_l1_tx: 16,
        max_fee_tx: 8,
        chain_id: CHAIN_ID,
    }
}

fn idx(value: u64) -> Idx {
    Idx::new(value).unwrap()
}

fn nonce(value: u64) -> Nonce {
    Nonce::new(value).unwrap()
}

fn u(value: u64) -> U256 {
    U256::from(value)
}

/// Two token-0 accounts (256, 257) with balance 1000 each.
fn state_with_users() -> (StateDb, Vec<TestUser>) {
    let users = testing::test_users(2, [41u8; 32]);
    let mut state = StateDb::new(Mode::Synchronizer, 32);
    let mut l1: Vec<_> = users
        .iter()
        .map(|user| testing::create_account_deposit(user, TokenId(0), u(1000)))
        .collect();
    let mut tp = TxProcessor::new(&mut state, config());
    tp.process_txs(&[], &mut l1, &mut [], &mut []).unwrap();
    (state, users)
}

#[test]
fn a_valid_transfer_is_admitted_normalized() {
    let (state, users) = state_with_users();
    let pool = MemPool::new();
    let tx = testing::transfer(
        CHAIN_ID,
        &users[0],
        idx(256),
        idx(257),
        TokenId(0),
        u(100),
        FeeSelector(126),
        nonce(0),
    );

    let admitted = prepare_single_submission(&state, &pool, CHAIN_ID, tx.clone()).unwrap();
    assert_eq!(admitted.tx_id, TxId::l2(idx(256), nonce(0)));

    // a nonce above the account nonce is accepted: bursts park in the pool
    let ahead = testing::transfer(
        CHAIN_ID,
        &users[0],
        idx(256),
        idx(257),
        TokenId(0),
        u(100),
        FeeSelector(126),
        nonce(5),
    );
    assert!(prepare_single_submission(&state, &pool, CHAIN_ID, ahead).is_ok());
}

#[test]
fn request_fields_are_rejected_on_the_single_path() {
    let (state, users) = state_with_users();
    let pool = MemPool::new();
    let mut tx = testing::transfer(
        CHAIN_ID,
        &users[0],
        idx(256),
        idx(257),
        TokenId(0),
        u(100),
        FeeSelector::ZERO,
        nonce(0),
    );
    tx.rq_offset = 1;
    assert!(matches!(
        prepare_single_submission(&state, &pool, CHAIN_ID, tx),
        Err(AdmissionError::RqFieldsInSingleSubmission)
    ));
}

#[test]
fn bad_senders_and_signatures_are_rejected() {
    let (state, users) = state_with_users();
    let pool = MemPool::new();

    // unknown sender
    let ghost = testing::transfer(
        CHAIN_ID,
        &users[0],
        idx(300),
        idx(257),
        TokenId(0),
        u(100),
        FeeSelector::ZERO,
        nonce(0),
    );
    assert!(matches!(
        prepare_single_submission(&state, &pool, CHAIN_ID, ghost),
        Err(AdmissionError::SenderNotFound(_))
    ));

    // wrong token
    let wrong_token = testing::transfer(
        CHAIN_ID,
        &users[0],
        idx(256),
        idx(257),
        TokenId(3),
        u(100),
        FeeSelector::ZERO,
        nonce(0),
    );
    assert!(matches!(
        prepare_single_submission(&state, &pool, CHAIN_ID, wrong_token),
        Err(AdmissionError::TokenMismatch { .. })
    ));

    // signed by somebody else
    let forged = testing::transfer(
        CHAIN_ID,
        &users[1],
        idx(256),
        idx(257),
        TokenId(0),
        u(100),
        FeeSelector::ZERO,
        nonce(0),
    );
    assert!(matches!(
        prepare_single_submission(&state, &pool, CHAIN_ID, forged),
        Err(AdmissionError::InvalidSignature)
    ));

    // signed for another chain
    let cross_chain = testing::transfer(
        CHAIN_ID + 1,
        &users[0],
        idx(256),
        idx(257),
        TokenId(0),
        u(100),
        FeeSelector::ZERO,
        nonce(0),
    );
    assert!(matches!(
        prepare_single_submission(&state, &pool, CHAIN_ID, cross_chain),
        Err(AdmissionError::InvalidSignature)
    ));

    // nonce below the account nonce
    let mut state = state;
    let mut spend = vec![testing::transfer(
        CHAIN_ID,
        &users[0],
        idx(256),
        idx(257),
        TokenId(0),
        u(1),
        FeeSelector::ZERO,
        nonce(0),
    )];
    let mut tp = TxProcessor::new(&mut state, config());
    tp.process_txs(&[], &mut [], &mut [], &mut spend).unwrap();
    let stale = testing::transfer(
        CHAIN_ID,
        &users[0],
        idx(256),
        idx(257),
        TokenId(0),
        u(100),
        FeeSelector::ZERO,
        nonce(0),
    );
    assert!(matches!(
        prepare_single_submission(&state, &pool, CHAIN_ID, stale),
        Err(AdmissionError::NonceTooLow { .. })
    ));
}

#[test]
fn destination_reachability_is_checked() {
    let (state, users) = state_with_users();
    let mut pool = MemPool::new();
    let stranger = &testing::test_users(1, [77u8; 32])[0];

    // transfer to an index that does not exist
    let to_ghost = testing::transfer(
        CHAIN_ID,
        &users[0],
        idx(256),
        idx(400),
        TokenId(0),
        u(100),
        FeeSelector::ZERO,
        nonce(0),
    );
    assert!(matches!(
        prepare_single_submission(&state, &pool, CHAIN_ID, to_ghost),
        Err(AdmissionError::RecipientNotFound(_))
    ));

    // transfer to an address with neither account nor authorization
    let unreachable = testing::transfer_to_eth_addr(
        CHAIN_ID,
        &users[0],
        idx(256),
        stranger.addr,
        TokenId(0),
        u(100),
        FeeSelector::ZERO,
        nonce(0),
    );
    assert!(matches!(
        prepare_single_submission(&state, &pool, CHAIN_ID, unreachable.clone()),
        Err(AdmissionError::DestinationNotReachable(_))
    ));

    // the authorization makes it reachable
    pool.add_auth(AccountCreationAuth {
        eth_addr: stranger.addr,
        bjj: stranger.bjj,
        signature: vec![1u8; 65],
    });
    assert!(prepare_single_submission(&state, &pool, CHAIN_ID, unreachable).is_ok());
}

#[test]
fn zero_amount_exits_are_rejected() {
    let (state, users) = state_with_users();
    let pool = MemPool::new();
    let tx = testing::exit(
        CHAIN_ID,
        &users[0],
        idx(256),
        TokenId(0),
        U256::zero(),
        FeeSelector::ZERO,
        nonce(0),
    );
    assert!(matches!(
        prepare_single_submission(&state, &pool, CHAIN_ID, tx),
        Err(AdmissionError::ExitZeroAmount)
    ));
}

/// A two-member cycle with request offsets 1 (next) and 7 (previous).
fn atomic_pair(users: &[TestUser]) -> Vec<tessera_objects::PoolL2Tx> {
    let group = AtomicGroupId([3u8; 32]);
    let mut first = testing::transfer(
        CHAIN_ID,
        &users[0],
        idx(256),
        idx(257),
        TokenId(0),
        u(100),
        FeeSelector::ZERO,
        nonce(0),
    );
    let mut second = testing::transfer(
        CHAIN_ID,
        &users[1],
        idx(257),
        idx(256),
        TokenId(0),
        u(50),
        FeeSelector::ZERO,
        nonce(0),
    );
    first.atomic_group_id = group;
    second.atomic_group_id = group;
    testing::set_request(&mut first, &second, 1);
    testing::set_request(&mut second, &first, 7);
    first.sign(&users[0].sk, CHAIN_ID).unwrap();
    second.sign(&users[1].sk, CHAIN_ID).unwrap();
    vec![first, second]
}

#[test]
fn atomic_submissions_resolve_links_and_detect_the_group() {
    let (state, users) = state_with_users();
    let pool = MemPool::new();

    let admitted =
        prepare_atomic_submission(&state, &pool, CHAIN_ID, atomic_pair(&users)).unwrap();
    assert_eq!(admitted.len(), 2);
    // links were copied from the referenced transactions
    assert_eq!(admitted[0].rq_from_idx, idx(257));
    assert_eq!(admitted[1].rq_from_idx, idx(256));
    assert_eq!(admitted[0].rq_amount, Some(u(50)));

    // one transaction is not an atomic submission
    let lone = atomic_pair(&users).remove(0);
    assert!(matches!(
        prepare_atomic_submission(&state, &pool, CHAIN_ID, vec![lone]),
        Err(AdmissionError::SingleTxInAtomicSubmission)
    ));
}

#[test]
fn broken_cycles_are_rejected() {
    let (state, users) = state_with_users();
    let pool = MemPool::new();

    // a member that requests nothing breaks atomicity at the offset table
    let mut pair = atomic_pair(&users);
    pair[1].rq_offset = 0;
    assert!(matches!(
        prepare_atomic_submission(&state, &pool, CHAIN_ID, pair),
        Err(AdmissionError::TxsNotAtomic)
    ));

    // an offset that escapes the submission bounds
    let mut pair = atomic_pair(&users);
    pair[1].rq_offset = 3;
    assert!(matches!(
        prepare_atomic_submission(&state, &pool, CHAIN_ID, pair),
        Err(AdmissionError::RqOffsetOutOfBounds { position: 1 })
    ));

    // a reference to a transaction outside the submission
    let mut pair = atomic_pair(&users);
    pair[1].rq_tx_id = TxId::l2(idx(300), nonce(0));
    pair[1].sign(&users[1].sk, CHAIN_ID).unwrap();
    assert!(matches!(
        prepare_atomic_submission(&state, &pool, CHAIN_ID, pair),
        Err(AdmissionError::TxsNotAtomic)
    ));
}
