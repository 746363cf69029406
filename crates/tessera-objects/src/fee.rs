//! The protocol fee table.
//!
//! An L2 transaction carries a one-byte [FeeSelector] indexing a 256-entry table of fee
//! factors. Selector 0 charges nothing; selectors 1..=191 sweep a geometric range below 100%
//! reaching parity just under selector 192; selectors 192..=255 double per step, which prices
//! spam out of the pool. Fee amounts are computed in fixed-point integer arithmetic (factor
//! scaled by `2^60`) so every node floors identically.

use core::fmt;

use ethereum_types::U256;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::errors::AmountError;

const FACTOR_SHIFT: u32 = 60;

/// Fee factors scaled by `2^60`, one per selector.
static FEE_FACTOR_LSH60: Lazy<[u128; 256]> = Lazy::new(|| {
    let mut table = [0u128; 256];
    for (selector, entry) in table.iter_mut().enumerate() {
        *entry = match selector {
            0 => 0,
            1..=191 => {
                let factor = 2f64.powf((selector as f64 - 192.0) / 20.0);
                (factor * (1u128 << FACTOR_SHIFT) as f64) as u128
            }
            _ => 1u128 << (selector as u32 - 192 + FACTOR_SHIFT),
        };
    }
    table
});

// FEE SELECTOR
// ================================================================================================

/// An index into the protocol fee table.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct FeeSelector(pub u8);

impl FeeSelector {
    /// The zero-fee selector.
    pub const ZERO: Self = Self(0);

    /// Returns the fee factor as a float, for display and profitability estimates only; all
    /// consensus arithmetic goes through [fee_amount](Self::fee_amount).
    pub fn factor(self) -> f64 {
        FEE_FACTOR_LSH60[self.0 as usize] as f64 / (1u128 << FACTOR_SHIFT) as f64
    }

    /// Computes the fee charged on an amount: `amount * factor` floored to an integer.
    ///
    /// # Errors
    /// Returns an error if the fixed-point product overflows 256 bits, which marks the
    /// transaction as unpayable rather than truncating the fee.
    pub fn fee_amount(self, amount: U256) -> Result<U256, AmountError> {
        let factor = U256::from(FEE_FACTOR_LSH60[self.0 as usize]);
        let (product, overflow) = amount.overflowing_mul(factor);
        if overflow {
            return Err(AmountError::FeeOverflow {
                amount,
                selector: self.0,
            });
        }
        Ok(product >> FACTOR_SHIFT)
    }
}

impl fmt::Display for FeeSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_zero_charges_nothing() {
        assert_eq!(
            FeeSelector::ZERO.fee_amount(U256::from(1_000_000u64)).unwrap(),
            U256::zero()
        );
    }

    #[test]
    fn table_is_monotonic() {
        for selector in 1..255u16 {
            assert!(
                FEE_FACTOR_LSH60[selector as usize] <= FEE_FACTOR_LSH60[selector as usize + 1],
                "factor decreased at selector {selector}"
            );
        }
    }

    #[test]
    fn selector_126_floors() {
        // the floors observable in the minimum-flow batches
        let sel = FeeSelector(126);
        assert_eq!(sel.fee_amount(U256::from(100u64)).unwrap(), U256::from(10u64));
        assert_eq!(sel.fee_amount(U256::from(200u64)).unwrap(), U256::from(20u64));
        assert_eq!(sel.fee_amount(U256::from(50u64)).unwrap(), U256::from(5u64));
    }

    #[test]
    fn selector_192_is_parity() {
        let sel = FeeSelector(192);
        assert_eq!(sel.fee_amount(U256::from(1234u64)).unwrap(), U256::from(1234u64));
    }

    #[test]
    fn high_selectors_double_per_step() {
        assert_eq!(
            FeeSelector(193).fee_amount(U256::from(10u64)).unwrap(),
            U256::from(20u64)
        );
        assert_eq!(
            FeeSelector(200).fee_amount(U256::from(1u64)).unwrap(),
            U256::from(256u64)
        );
    }

    #[test]
    fn overflow_is_an_error_not_a_truncation() {
        assert!(FeeSelector(255).fee_amount(U256::MAX).is_err());
    }
}
