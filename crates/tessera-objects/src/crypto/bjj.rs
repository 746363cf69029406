//! Baby Jubjub keys and Poseidon-flavoured EdDSA.
//!
//! Public keys travel compressed: the 32 little-endian bytes of the `y` coordinate with the sign
//! of `x` packed into the top bit of the last byte. The all-zero array is the designated empty
//! key. Signatures are the pair `(R8, S)` with `R8` compressed the same way.

use core::fmt;

use ark_ec::{twisted_edwards::TECurveConfig, CurveGroup, Group};
use ark_ed_on_bn254::{EdwardsAffine, EdwardsConfig, EdwardsProjective, Fr as BjjScalar};
use ark_ff::{BigInteger, Field, PrimeField, Zero};
use ethereum_types::U256;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};

use super::{poseidon_hash, Fr};
use crate::errors::CryptoError;

// COMPRESSED PUBLIC KEY
// ================================================================================================

/// A compressed Baby Jubjub public key.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BjjPubkeyComp(pub [u8; 32]);

impl BjjPubkeyComp {
    /// The empty key: a valid encoding that no account can ever control.
    pub const EMPTY: Self = Self([0u8; 32]);

    /// Returns true if this is the empty key.
    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }

    /// Splits the encoding into the sign of `x` and the integer value of `y`, without checking
    /// that the coordinates lie on the curve.
    ///
    /// This is the form in which keys enter compressed transaction data and signed payloads.
    pub fn unpack_sign_y(&self) -> (bool, U256) {
        let sign = self.0[31] & 0x80 != 0;
        let mut bytes = self.0;
        bytes[31] &= 0x7f;
        (sign, U256::from_little_endian(&bytes))
    }

    /// Decompresses the key into a curve point.
    ///
    /// # Errors
    /// Returns an error if `y` is not a canonical field element or no matching `x` exists.
    pub fn decompress(&self) -> Result<BjjPubkey, CryptoError> {
        let (sign, y_int) = self.unpack_sign_y();
        let modulus = U256::from_big_endian(&Fr::MODULUS.to_bytes_be());
        if y_int >= modulus {
            return Err(CryptoError::InvalidPoint);
        }
        let y = super::fr_from_u256(y_int);

        // solve a*x^2 + y^2 = 1 + d*x^2*y^2 for x
        let yy = y.square();
        let denominator = EdwardsConfig::COEFF_A - EdwardsConfig::COEFF_D * yy;
        let denominator = denominator.inverse().ok_or(CryptoError::InvalidPoint)?;
        let xx = (Fr::from(1u64) - yy) * denominator;
        let mut x = xx.sqrt().ok_or(CryptoError::InvalidPoint)?;
        if coordinate_sign(x) != sign {
            x = -x;
        }
        if x.is_zero() && sign {
            return Err(CryptoError::InvalidPoint);
        }

        let point = EdwardsAffine::new_unchecked(x, y);
        if !point.is_on_curve() {
            return Err(CryptoError::InvalidPoint);
        }
        Ok(BjjPubkey(point))
    }

    /// Parses a key from its 64-character hex encoding.
    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let bytes: [u8; 32] = hex::decode(s)
            .map_err(|_| CryptoError::InvalidPoint)?
            .try_into()
            .map_err(|_| CryptoError::InvalidPoint)?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for BjjPubkeyComp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

// PUBLIC KEY
// ================================================================================================

/// A decompressed Baby Jubjub public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BjjPubkey(EdwardsAffine);

impl BjjPubkey {
    /// Returns the `x` coordinate as a field element.
    pub fn x(&self) -> Fr {
        self.0.x
    }

    /// Returns the `y` coordinate as a field element.
    pub fn y(&self) -> Fr {
        self.0.y
    }

    /// Compresses the key into its 32-byte wire form.
    pub fn compress(&self) -> BjjPubkeyComp {
        compress_point(&self.0)
    }

    /// Verifies a Poseidon EdDSA signature over the given message.
    pub fn verify_poseidon(&self, msg: Fr, sig: &BjjSignatureComp) -> bool {
        let (r8, s) = match sig.decompress() {
            Ok(parts) => parts,
            Err(_) => return false,
        };
        let challenge = match challenge_scalar(&r8, &self.0, msg) {
            Ok(challenge) => challenge,
            Err(_) => return false,
        };
        let lhs = EdwardsProjective::generator() * s;
        let rhs = EdwardsProjective::from(r8) + EdwardsProjective::from(self.0) * challenge;
        lhs.into_affine() == rhs.into_affine()
    }
}

// SIGNATURE
// ================================================================================================

/// A compressed Poseidon EdDSA signature: the nonce point `R8` and the response scalar `S`,
/// both 32 bytes little-endian.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BjjSignatureComp {
    pub r8: [u8; 32],
    pub s: [u8; 32],
}

impl BjjSignatureComp {
    /// The all-zero placeholder carried by transactions that were never signed.
    pub const EMPTY: Self = Self { r8: [0u8; 32], s: [0u8; 32] };

    fn decompress(&self) -> Result<(EdwardsAffine, BjjScalar), CryptoError> {
        let r8 = BjjPubkeyComp(self.r8)
            .decompress()
            .map_err(|_| CryptoError::InvalidSignature)?
            .0;
        let s = BjjScalar::from_le_bytes_mod_order(&self.s);
        Ok((r8, s))
    }
}

// PRIVATE KEY
// ================================================================================================

/// A Baby Jubjub signing key.
#[derive(Clone)]
pub struct BjjPrivateKey(BjjScalar);

impl BjjPrivateKey {
    /// Derives a signing key from 32 bytes of key material.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(BjjScalar::from_le_bytes_mod_order(&bytes))
    }

    /// Returns the public key.
    pub fn public(&self) -> BjjPubkey {
        BjjPubkey((EdwardsProjective::generator() * self.0).into_affine())
    }

    /// Signs a message with a deterministic nonce.
    pub fn sign_poseidon(&self, msg: Fr) -> Result<BjjSignatureComp, CryptoError> {
        let mut hasher = Sha512::new();
        hasher.update(self.0.into_bigint().to_bytes_le());
        hasher.update(msg.into_bigint().to_bytes_be());
        let nonce = BjjScalar::from_le_bytes_mod_order(&hasher.finalize());

        let r8 = (EdwardsProjective::generator() * nonce).into_affine();
        let public = self.public();
        let challenge = challenge_scalar(&r8, &public.0, msg)?;
        let s = nonce + challenge * self.0;

        let mut s_bytes = [0u8; 32];
        let s_le = s.into_bigint().to_bytes_le();
        s_bytes[..s_le.len()].copy_from_slice(&s_le);
        Ok(BjjSignatureComp {
            r8: compress_point(&r8).0,
            s: s_bytes,
        })
    }
}

impl fmt::Debug for BjjPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // never print key material
        write!(f, "BjjPrivateKey(..)")
    }
}

// HELPERS
// ================================================================================================

/// The challenge binds the nonce point, the public key and the message:
/// `Poseidon5(R8.x, R8.y, A.x, A.y, msg)` reduced into the scalar field.
fn challenge_scalar(
    r8: &EdwardsAffine,
    pk: &EdwardsAffine,
    msg: Fr,
) -> Result<BjjScalar, CryptoError> {
    let h = poseidon_hash(&[r8.x, r8.y, pk.x, pk.y, msg])?;
    Ok(BjjScalar::from_le_bytes_mod_order(&h.into_bigint().to_bytes_le()))
}

fn compress_point(point: &EdwardsAffine) -> BjjPubkeyComp {
    let mut bytes = [0u8; 32];
    let y_le = point.y.into_bigint().to_bytes_le();
    bytes[..y_le.len()].copy_from_slice(&y_le);
    if coordinate_sign(point.x) {
        bytes[31] |= 0x80;
    }
    BjjPubkeyComp(bytes)
}

/// A coordinate is "negative" when it exceeds `(q - 1) / 2`.
fn coordinate_sign(x: Fr) -> bool {
    x.into_bigint() > Fr::MODULUS_MINUS_ONE_DIV_TWO
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests {
    use rand::RngCore;
    use rand_chacha::{rand_core::SeedableRng, ChaCha20Rng};

    use super::*;

    fn key(rng: &mut ChaCha20Rng) -> BjjPrivateKey {
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes);
        BjjPrivateKey::from_bytes(bytes)
    }

    #[test]
    fn compress_decompress_round_trip() {
        let mut rng = ChaCha20Rng::from_seed([7u8; 32]);
        for _ in 0..8 {
            let pk = key(&mut rng).public();
            let comp = pk.compress();
            let back = comp.decompress().unwrap();
            assert_eq!(back.x(), pk.x());
            assert_eq!(back.y(), pk.y());
        }
    }

    #[test]
    fn sign_and_verify() {
        let mut rng = ChaCha20Rng::from_seed([8u8; 32]);
        let sk = key(&mut rng);
        let pk = sk.public();
        let msg = Fr::from(123456u64);

        let sig = sk.sign_poseidon(msg).unwrap();
        assert!(pk.verify_poseidon(msg, &sig));
        // wrong message
        assert!(!pk.verify_poseidon(Fr::from(123457u64), &sig));
        // wrong key
        let other = key(&mut rng).public();
        assert!(!other.verify_poseidon(msg, &sig));
        // mangled signature
        let mut bad = sig;
        bad.s[0] ^= 1;
        assert!(!pk.verify_poseidon(msg, &bad));
    }

    #[test]
    fn empty_key_unpacks_to_zero() {
        let (sign, y) = BjjPubkeyComp::EMPTY.unpack_sign_y();
        assert!(!sign);
        assert!(y.is_zero());
    }
}
