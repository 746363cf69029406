//! The compact amount codec used on the wire and inside compressed transaction data.
//!
//! A [Float16] packs a non-negative decimal amount into 16 bits:
//!
//! ```text
//! [ exponent (5 bits) | half flag (1 bit) | mantissa (10 bits) ]
//! ```
//!
//! The decoded value is `mantissa * 10^exponent`, plus `5 * 10^(exponent - 1)` when the half
//! flag is set and the exponent is non-zero. Only amounts that survive a decode/encode round
//! trip are representable; everything observable on-chain goes through this codec, so encoding
//! is exact-or-error with an explicit flooring variant for witness packing.

use core::fmt;

use ethereum_types::U256;
use serde::{Deserialize, Serialize};

use crate::errors::AmountError;

const MANTISSA_MASK: u16 = 0x3ff;
const HALF_FLAG: u16 = 0x400;
const MAX_EXPONENT: u32 = 31;

/// A 16-bit compact representation of a non-negative decimal amount.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Float16(pub u16);

impl Float16 {
    /// Encodes an amount, failing if it is not exactly representable.
    pub fn from_u256(amount: U256) -> Result<Self, AmountError> {
        let floor = Self::from_u256_floor(amount)?;
        if floor.to_u256() == amount {
            return Ok(floor);
        }
        let half = Self(floor.0 | HALF_FLAG);
        if half.to_u256() == amount {
            return Ok(half);
        }
        Err(AmountError::NotRepresentable(amount))
    }

    /// Encodes the largest representable amount that does not exceed the given one.
    pub fn from_u256_floor(amount: U256) -> Result<Self, AmountError> {
        let mut mantissa = amount;
        let mut exponent = 0u32;
        while mantissa > U256::from(MANTISSA_MASK) {
            mantissa /= U256::from(10u64);
            exponent += 1;
            if exponent > MAX_EXPONENT {
                return Err(AmountError::ExponentOverflow(amount));
            }
        }
        let encoded = ((exponent as u16) << 11) | mantissa.as_u32() as u16;
        if exponent > 0 {
            // the floored mantissa may sit half a step below the amount
            let half = Self(encoded | HALF_FLAG);
            if half.to_u256() <= amount {
                return Ok(half);
            }
        }
        Ok(Self(encoded))
    }

    /// Decodes the amount.
    pub fn to_u256(self) -> U256 {
        let mantissa = U256::from(self.0 & MANTISSA_MASK);
        let exponent = (self.0 >> 11) as u32;
        let scale = U256::from(10u64).pow(U256::from(exponent));
        let mut amount = mantissa * scale;
        if self.0 & HALF_FLAG != 0 && exponent != 0 {
            amount += scale / 2;
        }
        amount
    }

    /// Returns the canonical 2-byte big-endian encoding.
    pub fn to_bytes(self) -> [u8; 2] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for Float16 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_u256())
    }
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn u(s: &str) -> U256 {
        U256::from_dec_str(s).unwrap()
    }

    #[test]
    fn decode_known_vectors() {
        assert_eq!(Float16(0xffff).to_u256(), u("10235000000000000000000000000000000"));
        assert_eq!(Float16(0xfffe).to_u256(), u("10225000000000000000000000000000000"));
        assert_eq!(Float16(0).to_u256(), U256::zero());
        assert_eq!(Float16(0x3ff).to_u256(), U256::from(1023u64));
        // half flag with zero exponent contributes nothing
        assert_eq!(Float16(0x400).to_u256(), U256::zero());
    }

    #[test]
    fn encode_decode_identity_on_representable_amounts() {
        for amount in [
            u("0"),
            u("1"),
            u("1023"),
            u("1000"),
            u("16000000"),
            u("10235000000000000000000000000000000"),
            u("10225000000000000000000000000000000"),
            u("1500"), // 150 * 10^1, and also 1 half-step above 1000 * 10^0? exact as mantissa 150
        ] {
            let f = Float16::from_u256(amount).unwrap();
            assert_eq!(f.to_u256(), amount);
        }
    }

    #[test]
    fn decode_encode_identity_on_in_domain_codes() {
        // canonical codes only: with a nonzero exponent the mantissa must be large enough that
        // the encoder cannot shrink the exponent (m >= 103); low-mantissa codes are aliases
        for code in [0x0001u16, 0x03ff, 0x0867, 0x0c67, 0xfffe, 0xffff] {
            let amount = Float16(code).to_u256();
            assert_eq!(Float16::from_u256(amount).unwrap().0, code);
        }
    }

    #[test]
    fn unrepresentable_amounts_fail() {
        assert!(Float16::from_u256(u("1024")).is_err()); // needs 10.24 * 10^2
        assert!(Float16::from_u256(u("10236000000000000000000000000000000")).is_err());
    }

    #[test]
    fn floor_rounds_down_to_nearest_half_step() {
        assert_eq!(Float16::from_u256_floor(u("1024")).unwrap().to_u256(), u("1020"));
        assert_eq!(Float16::from_u256_floor(u("1025")).unwrap().to_u256(), u("1025"));
        assert_eq!(Float16::from_u256_floor(u("1029")).unwrap().to_u256(), u("1025"));
        assert_eq!(Float16::from_u256_floor(u("1023")).unwrap().to_u256(), u("1023"));
    }
}
