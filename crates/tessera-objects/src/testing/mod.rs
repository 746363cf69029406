//! Deterministic fixtures for tests: keyed users and transaction builders.

use ethereum_types::{Address, U256};
use rand::RngCore;
use rand_chacha::{rand_core::SeedableRng, ChaCha20Rng};

use crate::{
    constants::FF_ADDR,
    crypto::{BjjPrivateKey, BjjPubkeyComp},
    fee::FeeSelector,
    ids::{Idx, Nonce, TokenId},
    transaction::{L1Tx, PoolL2Tx, TxType},
};

// TEST USER
// ================================================================================================

/// A user with a BJJ keypair and a settlement-chain address.
pub struct TestUser {
    pub sk: BjjPrivateKey,
    pub bjj: BjjPubkeyComp,
    pub addr: Address,
}

/// Derives `n` users from a seed; the same seed always yields the same users.
pub fn test_users(n: usize, seed: [u8; 32]) -> Vec<TestUser> {
    let mut rng = ChaCha20Rng::from_seed(seed);
    (0..n)
        .map(|_| {
            let mut key_bytes = [0u8; 32];
            rng.fill_bytes(&mut key_bytes);
            let sk = BjjPrivateKey::from_bytes(key_bytes);
            let bjj = sk.public().compress();
            let mut addr_bytes = [0u8; 20];
            rng.fill_bytes(&mut addr_bytes);
            TestUser {
                sk,
                bjj,
                addr: Address::from(addr_bytes),
            }
        })
        .collect()
}

// L1 BUILDERS
// ================================================================================================

/// A user-origin `CreateAccountDeposit` for the given token and deposit amount.
pub fn create_account_deposit(user: &TestUser, token_id: TokenId, deposit: U256) -> L1Tx {
    L1Tx {
        from_idx: Idx::NONE,
        to_idx: Idx::NONE,
        from_eth_addr: user.addr,
        from_bjj: user.bjj,
        token_id,
        amount: U256::zero(),
        deposit_amount: deposit,
        position: 0,
        user_origin: true,
        to_forge_l1_txs_num: Some(1),
        tx_type: TxType::CreateAccountDeposit,
        effective_amount: None,
        effective_deposit_amount: None,
    }
}

/// A user-origin `Deposit` into an existing account.
pub fn deposit(user: &TestUser, from_idx: Idx, token_id: TokenId, deposit: U256) -> L1Tx {
    L1Tx {
        from_idx,
        to_idx: Idx::NONE,
        from_eth_addr: user.addr,
        from_bjj: user.bjj,
        token_id,
        amount: U256::zero(),
        deposit_amount: deposit,
        position: 0,
        user_origin: true,
        to_forge_l1_txs_num: Some(1),
        tx_type: TxType::Deposit,
        effective_amount: None,
        effective_deposit_amount: None,
    }
}

/// A user-origin `ForceExit`.
pub fn force_exit(user: &TestUser, from_idx: Idx, token_id: TokenId, amount: U256) -> L1Tx {
    L1Tx {
        from_idx,
        to_idx: Idx::EXIT,
        from_eth_addr: user.addr,
        from_bjj: user.bjj,
        token_id,
        amount,
        deposit_amount: U256::zero(),
        position: 0,
        user_origin: true,
        to_forge_l1_txs_num: Some(1),
        tx_type: TxType::ForceExit,
        effective_amount: None,
        effective_deposit_amount: None,
    }
}

// L2 BUILDERS
// ================================================================================================

/// A signed pool `Transfer` to an explicit index.
#[allow(clippy::too_many_arguments)]
pub fn transfer(
    chain_id: u16,
    sender: &TestUser,
    from_idx: Idx,
    to_idx: Idx,
    token_id: TokenId,
    amount: U256,
    fee: FeeSelector,
    nonce: Nonce,
) -> PoolL2Tx {
    let tx = PoolL2Tx {
        from_idx,
        to_idx,
        token_id,
        amount,
        fee,
        nonce,
        tx_type: TxType::Transfer,
        ..PoolL2Tx::default()
    };
    finish(tx, chain_id, sender)
}

/// A signed pool `Exit`.
pub fn exit(
    chain_id: u16,
    sender: &TestUser,
    from_idx: Idx,
    token_id: TokenId,
    amount: U256,
    fee: FeeSelector,
    nonce: Nonce,
) -> PoolL2Tx {
    let tx = PoolL2Tx {
        from_idx,
        to_idx: Idx::EXIT,
        token_id,
        amount,
        fee,
        nonce,
        tx_type: TxType::Exit,
        ..PoolL2Tx::default()
    };
    finish(tx, chain_id, sender)
}

/// A signed pool `TransferToEthAddr`.
#[allow(clippy::too_many_arguments)]
pub fn transfer_to_eth_addr(
    chain_id: u16,
    sender: &TestUser,
    from_idx: Idx,
    to_eth_addr: Address,
    token_id: TokenId,
    amount: U256,
    fee: FeeSelector,
    nonce: Nonce,
) -> PoolL2Tx {
    let tx = PoolL2Tx {
        from_idx,
        to_idx: Idx::NONE,
        to_eth_addr,
        token_id,
        amount,
        fee,
        nonce,
        tx_type: TxType::TransferToEthAddr,
        ..PoolL2Tx::default()
    };
    finish(tx, chain_id, sender)
}

/// A signed pool `TransferToBJJ`.
#[allow(clippy::too_many_arguments)]
pub fn transfer_to_bjj(
    chain_id: u16,
    sender: &TestUser,
    from_idx: Idx,
    to_bjj: BjjPubkeyComp,
    token_id: TokenId,
    amount: U256,
    fee: FeeSelector,
    nonce: Nonce,
) -> PoolL2Tx {
    let tx = PoolL2Tx {
        from_idx,
        to_idx: Idx::NONE,
        to_eth_addr: FF_ADDR,
        to_bjj,
        token_id,
        amount,
        fee,
        nonce,
        tx_type: TxType::TransferToBjj,
        ..PoolL2Tx::default()
    };
    finish(tx, chain_id, sender)
}

/// Copies the `rq_*` coupling fields of `target` into `tx` and records the request offset.
/// The transaction must be re-signed afterwards.
pub fn set_request(tx: &mut PoolL2Tx, target: &PoolL2Tx, rq_offset: u8) {
    tx.rq_tx_id = target.tx_id;
    tx.rq_from_idx = target.from_idx;
    tx.rq_to_idx = target.to_idx;
    tx.rq_to_eth_addr = target.to_eth_addr;
    tx.rq_to_bjj = target.to_bjj;
    tx.rq_token_id = target.token_id;
    tx.rq_amount = Some(target.amount);
    tx.rq_fee = target.fee;
    tx.rq_nonce = target.nonce;
    tx.rq_offset = rq_offset;
}

fn finish(tx: PoolL2Tx, chain_id: u16, sender: &TestUser) -> PoolL2Tx {
    let mut tx = tx.normalized().expect("builder produced a well-formed tx");
    tx.sign(&sender.sk, chain_id).expect("builder amounts are representable");
    tx
}
