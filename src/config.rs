use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database_url: String,
    /// Base URL of the ledger signing gateway
    pub gateway_url: String,
    /// Final resting place of consolidated funds
    pub custody_address: String,
    /// Operator credential used for activation sends and resource delegation
    pub operator_credential: String,
    /// Contract id of the tracked asset
    pub asset_contract: String,
    pub asset_decimals: u32,
    pub native_decimals: u32,

    /// New intents receive directly at the custody wallet instead of a
    /// per-intent intermediate address
    pub receive_to_custody: bool,

    /// Base wait between reconciliation cycles
    pub cycle_interval: Duration,
    /// Cap on the exponential backoff multiplier
    pub backoff_cap: u32,
    /// Lookback window for the first pull after a restart
    pub watch_window_hours: i64,

    /// Interval and budget shared by every confirmation wait
    pub confirmation_interval: Duration,
    pub confirmation_max_checks: u32,

    /// Native amount sent to bring a fresh address into existence
    pub activation_amount: Decimal,
    pub max_activation_attempts: i32,
    pub max_consolidation_attempts: i32,

    /// Native balance floor below which an address gets a fee top-up
    pub native_fee_floor: Decimal,
    pub native_topup_amount: Decimal,

    pub energy_floor: u64,
    pub energy_delegation: u64,
    pub bandwidth_floor: u64,
    pub bandwidth_delegation: u64,
}

impl Config {
    pub fn from_env() -> EngineResult<Self> {
        let custody_address = std::env::var("CUSTODY_ADDRESS")
            .map_err(|_| EngineError::Config("CUSTODY_ADDRESS must be set".into()))?;
        let operator_credential = std::env::var("OPERATOR_CREDENTIAL")
            .map_err(|_| EngineError::Config("OPERATOR_CREDENTIAL must be set".into()))?;
        let asset_contract = std::env::var("ASSET_CONTRACT")
            .map_err(|_| EngineError::Config("ASSET_CONTRACT must be set".into()))?;

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/payment_engine".to_string()),
            gateway_url: std::env::var("GATEWAY_URL")
                .unwrap_or_else(|_| "http://localhost:9090".to_string()),
            custody_address,
            operator_credential,
            asset_contract,
            asset_decimals: env_parse("ASSET_DECIMALS", 6)?,
            native_decimals: env_parse("NATIVE_DECIMALS", 6)?,
            receive_to_custody: env_parse("RECEIVE_TO_CUSTODY", true)?,
            cycle_interval: Duration::from_secs(env_parse("CYCLE_INTERVAL_SECS", 60)?),
            backoff_cap: env_parse("BACKOFF_CAP", 5)?,
            watch_window_hours: env_parse("WATCH_WINDOW_HOURS", 24)?,
            confirmation_interval: Duration::from_secs(env_parse(
                "CONFIRMATION_INTERVAL_SECS",
                5,
            )?),
            confirmation_max_checks: env_parse("CONFIRMATION_MAX_CHECKS", 12)?,
            activation_amount: env_parse("ACTIVATION_AMOUNT", Decimal::new(5, 0))?,
            max_activation_attempts: env_parse("MAX_ACTIVATION_ATTEMPTS", 3)?,
            max_consolidation_attempts: env_parse("MAX_CONSOLIDATION_ATTEMPTS", 3)?,
            native_fee_floor: env_parse("NATIVE_FEE_FLOOR", Decimal::new(5, 0))?,
            native_topup_amount: env_parse("NATIVE_TOPUP_AMOUNT", Decimal::new(10, 0))?,
            energy_floor: env_parse("ENERGY_FLOOR", 100_000)?,
            energy_delegation: env_parse("ENERGY_DELEGATION", 100_000)?,
            bandwidth_floor: env_parse("BANDWIDTH_FLOOR", 1_000)?,
            bandwidth_delegation: env_parse("BANDWIDTH_DELEGATION", 1_000)?,
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> EngineResult<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| EngineError::Config(format!("{} has an invalid value: {}", key, raw))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_parse_uses_default_when_unset() {
        std::env::remove_var("PE_TEST_MISSING");
        let value: u32 = env_parse("PE_TEST_MISSING", 7).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn env_parse_rejects_garbage() {
        std::env::set_var("PE_TEST_GARBAGE", "not-a-number");
        let result: EngineResult<u32> = env_parse("PE_TEST_GARBAGE", 7);
        assert!(matches!(result, Err(EngineError::Config(_))));
        std::env::remove_var("PE_TEST_GARBAGE");
    }
}
