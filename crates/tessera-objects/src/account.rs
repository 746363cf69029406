use ethereum_types::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::{
    crypto::{self, BjjPubkeyComp, Fr},
    errors::CryptoError,
    ids::{Idx, Nonce, TokenId},
};

// ACCOUNT
// ================================================================================================

/// A rollup account: one leaf of the state tree.
///
/// Once created, `token_id`, `bjj` and `eth_addr` are immutable; `nonce` only increases; the
/// balance never goes below zero. The state store enforces these invariants on every update.
/// Either key may be the empty value but not both: an account is reachable through its
/// settlement-chain address, its BJJ key, or both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub idx: Idx,
    pub token_id: TokenId,
    pub nonce: Nonce,
    pub balance: U256,
    pub bjj: BjjPubkeyComp,
    pub eth_addr: Address,
}

impl Account {
    /// Returns the Poseidon hash committing to this account, used as the state-tree leaf value.
    ///
    /// The first element packs the small fields:
    /// `e0 = token_id | nonce << 32 | bjj_sign << 72`; the remaining elements are the balance,
    /// the BJJ `y` coordinate and the settlement-chain address.
    pub fn hash_value(&self) -> Result<Fr, CryptoError> {
        let (sign, ay) = self.bjj.unpack_sign_y();
        let mut e0 = self.token_id.0 as u128;
        e0 |= (self.nonce.as_u64() as u128) << 32;
        if sign {
            e0 |= 1 << 72;
        }
        crypto::poseidon_hash(&[
            Fr::from(e0),
            crypto::fr_from_u256(self.balance),
            crypto::fr_from_u256(ay),
            crypto::fr_from_addr(self.eth_addr),
        ])
    }
}

// ACCOUNT CREATION AUTHORIZATION
// ================================================================================================

/// A user's standing authorization for the coordinator to open accounts bound to their
/// settlement-chain address.
///
/// Required before a `TransferToEthAddr` recipient account can be synthesised; transfers to a
/// bare BJJ key need none, since only the key holder can ever spend from such an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountCreationAuth {
    pub eth_addr: Address,
    pub bjj: BjjPubkeyComp,
    /// The user's settlement-chain signature over the authorization message; opaque here, the
    /// contract checks it at account creation.
    pub signature: Vec<u8>,
}

// TESTS
// ================================================================================================
