use core::fmt;

use ark_ff::PrimeField;
use ethereum_types::{Address, U256};
use serde::{Deserialize, Serialize};

use super::{L2Tx, TxType};
use crate::{
    constants::{EMPTY_ADDR, FF_ADDR, SIGNATURE_CONSTANT},
    crypto::{self, BjjPrivateKey, BjjPubkeyComp, BjjSignatureComp, Fr},
    errors::TxError,
    fee::FeeSelector,
    float16::Float16,
    ids::{AtomicGroupId, Idx, Nonce, TokenId, TxId},
};

// POOL TRANSACTION STATE
// ================================================================================================

/// Lifecycle of a pool transaction. Only the pool owner writes these transitions.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolTxState {
    #[default]
    Pending,
    Forging,
    Forged,
    Invalid,
}

impl fmt::Display for PoolTxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Forging => "forging",
            Self::Forged => "forged",
            Self::Invalid => "invalid",
        };
        f.write_str(name)
    }
}

// POOL L2 TRANSACTION
// ================================================================================================

/// An L2 transaction as held by the off-chain pool.
///
/// The destination is exactly one of: an explicit index (`to_idx >= 256`), the exit
/// pseudo-account (`to_idx == 1`), a settlement-chain address, or a bare BJJ key. The type is
/// inferred from these fields and must match what the submitter claimed. The `rq_*` fields
/// couple the transaction to another member of its atomic group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolL2Tx {
    pub tx_id: TxId,
    pub from_idx: Idx,
    pub to_idx: Idx,
    /// Resolution cache for `to_idx == 0` destinations; filled during selection, never
    /// persisted or signed.
    pub aux_to_idx: Idx,
    pub to_eth_addr: Address,
    pub to_bjj: BjjPubkeyComp,
    pub token_id: TokenId,
    pub amount: U256,
    pub fee: FeeSelector,
    pub nonce: Nonce,
    pub state: PoolTxState,
    /// Human-readable discard reason, written back to the pool row.
    pub info: String,
    /// Machine-readable discard code, written back to the pool row.
    pub error_code: i32,
    pub error_type: String,
    pub signature: BjjSignatureComp,
    /// Seconds since the epoch at pool admission.
    pub timestamp: u64,
    pub rq_from_idx: Idx,
    pub rq_to_idx: Idx,
    pub rq_to_eth_addr: Address,
    pub rq_to_bjj: BjjPubkeyComp,
    pub rq_token_id: TokenId,
    pub rq_amount: Option<U256>,
    pub rq_fee: FeeSelector,
    pub rq_nonce: Nonce,
    /// Relative position of the requested transaction within the atomic group; 0 means "no
    /// request".
    pub rq_offset: u8,
    pub rq_tx_id: TxId,
    pub atomic_group_id: AtomicGroupId,
    /// USD-equivalent fee used for profitability ordering only.
    pub absolute_fee: f64,
    pub client_ip: String,
    pub tx_type: TxType,
}

impl Default for PoolL2Tx {
    fn default() -> Self {
        Self {
            tx_id: TxId::EMPTY,
            from_idx: Idx::NONE,
            to_idx: Idx::NONE,
            aux_to_idx: Idx::NONE,
            to_eth_addr: EMPTY_ADDR,
            to_bjj: BjjPubkeyComp::EMPTY,
            token_id: TokenId::default(),
            amount: U256::zero(),
            fee: FeeSelector::ZERO,
            nonce: Nonce::default(),
            state: PoolTxState::Pending,
            info: String::new(),
            error_code: 0,
            error_type: String::new(),
            signature: BjjSignatureComp::EMPTY,
            timestamp: 0,
            rq_from_idx: Idx::NONE,
            rq_to_idx: Idx::NONE,
            rq_to_eth_addr: EMPTY_ADDR,
            rq_to_bjj: BjjPubkeyComp::EMPTY,
            rq_token_id: TokenId::default(),
            rq_amount: None,
            rq_fee: FeeSelector::ZERO,
            rq_nonce: Nonce::default(),
            rq_offset: 0,
            rq_tx_id: TxId::EMPTY,
            atomic_group_id: AtomicGroupId::EMPTY,
            absolute_fee: 0.0,
            client_ip: String::new(),
            tx_type: TxType::Transfer,
        }
    }
}

impl PoolL2Tx {
    // DESTINATION & IDENTITY
    // --------------------------------------------------------------------------------------------

    /// Infers the transaction type from the destination fields.
    pub fn infer_type(&self) -> Result<TxType, TxError> {
        if self.to_idx >= Idx::USER_THRESHOLD {
            Ok(TxType::Transfer)
        } else if self.to_idx == Idx::EXIT {
            Ok(TxType::Exit)
        } else if self.to_idx == Idx::NONE {
            if !self.to_bjj.is_empty() && self.to_eth_addr == FF_ADDR {
                Ok(TxType::TransferToBjj)
            } else if self.to_eth_addr != FF_ADDR && self.to_eth_addr != EMPTY_ADDR {
                Ok(TxType::TransferToEthAddr)
            } else {
                Err(TxError::MalformedDestination)
            }
        } else {
            Err(TxError::MalformedDestination)
        }
    }

    /// Recomputes the transaction id from the sender index and nonce.
    pub fn compute_id(&self) -> TxId {
        TxId::l2(self.from_idx, self.nonce)
    }

    /// Validates the declared type and id against the transaction fields, filling them when
    /// unset.
    ///
    /// # Errors
    /// Returns an error if the destination is malformed, or if a declared type or id disagrees
    /// with the recomputed one.
    pub fn normalized(mut self) -> Result<Self, TxError> {
        let inferred = self.infer_type()?;
        if self.tx_type != inferred {
            return Err(TxError::TypeMismatch {
                declared: self.tx_type.to_string(),
                inferred: inferred.to_string(),
            });
        }
        let computed = self.compute_id();
        if !self.tx_id.is_empty() && self.tx_id != computed {
            return Err(TxError::TxIdMismatch { declared: self.tx_id, computed });
        }
        self.tx_id = computed;
        Ok(self)
    }

    /// The index balances actually move to: the explicit `to_idx`, or the resolved
    /// `aux_to_idx` for address/key destinations.
    pub fn effective_to_idx(&self) -> Idx {
        if self.to_idx == Idx::NONE {
            self.aux_to_idx
        } else {
            self.to_idx
        }
    }

    /// Returns true if the transaction belongs to an atomic group.
    pub fn is_atomic(&self) -> bool {
        !self.atomic_group_id.is_empty()
    }

    /// Strips pool metadata down to the forged form.
    pub fn l2_tx(&self) -> L2Tx {
        L2Tx {
            tx_id: self.tx_id,
            from_idx: self.from_idx,
            to_idx: self.effective_to_idx(),
            amount: self.amount,
            fee: self.fee,
            nonce: self.nonce,
            tx_type: self.tx_type,
        }
    }

    // SIGNED PAYLOAD
    // --------------------------------------------------------------------------------------------

    /// Packs the fixed 31-byte compressed transaction data:
    ///
    /// ```text
    /// [ toBjjSign(1B) | fee(1B) | nonce(5B) | tokenId(4B) | amountF16(2B)
    ///   | toIdx(6B) | fromIdx(6B) | chainId(2B) | signatureConstant(4B) ]
    /// ```
    ///
    /// interpreted as a big-endian integer (241 significant bits).
    pub fn tx_compressed_data(&self, chain_id: u16) -> Result<Fr, TxError> {
        let amount = Float16::from_u256(self.amount)?;
        let mut b = [0u8; 31];
        let (sign, _) = self.to_bjj.unpack_sign_y();
        b[0] = sign as u8;
        b[1] = self.fee.0;
        b[2..7].copy_from_slice(&self.nonce.to_bytes());
        b[7..11].copy_from_slice(&self.token_id.to_bytes());
        b[11..13].copy_from_slice(&amount.to_bytes());
        b[13..19].copy_from_slice(&self.to_idx.to_bytes());
        b[19..25].copy_from_slice(&self.from_idx.to_bytes());
        b[25..27].copy_from_slice(&chain_id.to_be_bytes());
        b[27..31].copy_from_slice(&SIGNATURE_CONSTANT.to_be_bytes());
        Ok(Fr::from_be_bytes_mod_order(&b))
    }

    /// Packs the 25-byte V2 compressed data: the same layout without the trailing chain id and
    /// signature constant (193 significant bits).
    pub fn tx_compressed_data_v2(&self) -> Result<Fr, TxError> {
        compressed_data_v2(
            self.to_bjj,
            self.fee,
            self.nonce,
            self.token_id,
            self.amount,
            self.to_idx,
            self.from_idx,
        )
    }

    /// Packs the V2 compressed data of the *requested* transaction, from the `rq_*` fields.
    pub fn rq_tx_compressed_data_v2(&self) -> Result<Fr, TxError> {
        compressed_data_v2(
            self.rq_to_bjj,
            self.rq_fee,
            self.rq_nonce,
            self.rq_token_id,
            self.rq_amount.unwrap_or_default(),
            self.rq_to_idx,
            self.rq_from_idx,
        )
    }

    /// Computes the Poseidon digest the sender signs:
    /// `Poseidon6(txCompressedData, toEthAddr, toBjjY, rqTxCompressedDataV2, rqToEthAddr,
    /// rqToBjjY)`.
    pub fn hash_to_sign(&self, chain_id: u16) -> Result<Fr, TxError> {
        let compressed = self.tx_compressed_data(chain_id)?;
        let rq_compressed = self.rq_tx_compressed_data_v2()?;
        let (_, to_bjj_y) = self.to_bjj.unpack_sign_y();
        let (_, rq_to_bjj_y) = self.rq_to_bjj.unpack_sign_y();
        let digest = crypto::poseidon_hash(&[
            compressed,
            crypto::fr_from_addr(self.to_eth_addr),
            crypto::fr_from_u256(to_bjj_y),
            rq_compressed,
            crypto::fr_from_addr(self.rq_to_eth_addr),
            crypto::fr_from_u256(rq_to_bjj_y),
        ])?;
        Ok(digest)
    }

    /// Verifies the carried signature against a compressed public key.
    pub fn verify_signature(&self, chain_id: u16, pk: &BjjPubkeyComp) -> bool {
        let Ok(digest) = self.hash_to_sign(chain_id) else {
            return false;
        };
        let Ok(pk) = pk.decompress() else {
            return false;
        };
        pk.verify_poseidon(digest, &self.signature)
    }

    /// Signs the transaction in place.
    pub fn sign(&mut self, sk: &BjjPrivateKey, chain_id: u16) -> Result<(), TxError> {
        let digest = self.hash_to_sign(chain_id)?;
        self.signature = sk.sign_poseidon(digest)?;
        Ok(())
    }
}

fn compressed_data_v2(
    to_bjj: BjjPubkeyComp,
    fee: FeeSelector,
    nonce: Nonce,
    token_id: TokenId,
    amount: U256,
    to_idx: Idx,
    from_idx: Idx,
) -> Result<Fr, TxError> {
    let amount = Float16::from_u256(amount)?;
    let mut b = [0u8; 25];
    if !to_bjj.is_empty() {
        let (sign, _) = to_bjj.unpack_sign_y();
        b[0] = sign as u8;
    }
    b[1] = fee.0;
    b[2..7].copy_from_slice(&nonce.to_bytes());
    b[7..11].copy_from_slice(&token_id.to_bytes());
    b[11..13].copy_from_slice(&amount.to_bytes());
    b[13..19].copy_from_slice(&to_idx.to_bytes());
    b[19..25].copy_from_slice(&from_idx.to_bytes());
    Ok(Fr::from_be_bytes_mod_order(&b))
}

// TESTS
// ================================================================================================
