//! Thin wrappers over the snark-friendly primitives.
//!
//! Everything observable on-chain reduces to Poseidon hashes over the BN254 scalar field, so the
//! conversions in this module are the single place where integers, addresses and curve
//! coordinates become field elements.

use ark_ff::{BigInteger, PrimeField};
use ethereum_types::{Address, U256};
use light_poseidon::{Poseidon, PoseidonHasher};

use crate::errors::CryptoError;

mod bjj;
pub use bjj::{BjjPrivateKey, BjjPubkey, BjjPubkeyComp, BjjSignatureComp};

/// The BN254 scalar field over which all state commitments are computed.
pub type Fr = ark_bn254::Fr;

// POSEIDON
// ================================================================================================

/// Hashes the inputs with the circom-parameter Poseidon permutation.
///
/// # Errors
/// Returns an error if the input arity is outside the supported 1..=12 range.
pub fn poseidon_hash(inputs: &[Fr]) -> Result<Fr, CryptoError> {
    let mut hasher =
        Poseidon::<Fr>::new_circom(inputs.len()).map_err(|e| CryptoError::Poseidon(e.to_string()))?;
    hasher.hash(inputs).map_err(|e| CryptoError::Poseidon(e.to_string()))
}

// FIELD CONVERSIONS
// ================================================================================================

/// Interprets a 256-bit integer as a field element, reducing modulo the field order.
pub fn fr_from_u256(value: U256) -> Fr {
    let mut bytes = [0u8; 32];
    value.to_big_endian(&mut bytes);
    Fr::from_be_bytes_mod_order(&bytes)
}

/// Returns the canonical integer representation of a field element.
pub fn fr_to_u256(value: Fr) -> U256 {
    U256::from_big_endian(&value.into_bigint().to_bytes_be())
}

/// Interprets a settlement-chain address as a field element (20 big-endian bytes).
pub fn fr_from_addr(addr: Address) -> Fr {
    Fr::from_be_bytes_mod_order(addr.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u256_round_trips_through_fr() {
        for value in [0u64, 1, 1000, u64::MAX] {
            let v = U256::from(value);
            assert_eq!(fr_to_u256(fr_from_u256(v)), v);
        }
    }

    #[test]
    fn poseidon_is_deterministic_and_arity_sensitive() {
        let a = poseidon_hash(&[Fr::from(1u64), Fr::from(2u64)]).unwrap();
        let b = poseidon_hash(&[Fr::from(1u64), Fr::from(2u64)]).unwrap();
        let c = poseidon_hash(&[Fr::from(1u64), Fr::from(2u64), Fr::from(0u64)]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
