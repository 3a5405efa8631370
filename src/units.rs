use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::error::{EngineError, EngineResult};

/// Conversion between human units and the ledger's atomic units for one
/// asset. The tracked asset and the native asset each get their own value.
#[derive(Debug, Clone, Copy)]
pub struct AssetUnits {
    decimals: u32,
}

impl AssetUnits {
    pub fn new(decimals: u32) -> Self {
        Self { decimals }
    }

    /// Exact conversion; amounts with more precision than the asset carries
    /// are rejected rather than rounded.
    pub fn to_atomic(&self, amount: Decimal) -> EngineResult<u64> {
        if amount.is_sign_negative() {
            return Err(EngineError::InvalidInput(format!(
                "negative amount: {}",
                amount
            )));
        }
        let scaled = amount * Decimal::from(10u64.pow(self.decimals));
        if !scaled.fract().is_zero() {
            return Err(EngineError::InvalidInput(format!(
                "amount {} exceeds {} decimal places",
                amount, self.decimals
            )));
        }
        scaled.to_u64().ok_or_else(|| {
            EngineError::InvalidInput(format!("amount {} out of atomic range", amount))
        })
    }

    pub fn from_atomic(&self, atomic: u64) -> Decimal {
        Decimal::from_i128_with_scale(atomic as i128, self.decimals).normalize()
    }
}
