use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::error::EngineResult;
use crate::ledger::types::{
    AccountResources, ConfirmationState, ExternalTransfer, GeneratedAccount, ResourceClass,
};

/// Capability surface the engine consumes from the external ledger. One
/// instance is injected into every component; tests substitute a fake.
///
/// Key custody lives behind this trait: `send_asset` takes an opaque
/// credential, everything else originates from the operator wallet the
/// implementation is configured with.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Tracked-asset balance at an address, in human units
    async fn get_asset_balance(&self, address: &str) -> EngineResult<Decimal>;

    /// Native-asset balance at an address, in human units
    async fn get_native_balance(&self, address: &str) -> EngineResult<Decimal>;

    /// Whether the address exists (has been activated) on the ledger
    async fn account_exists(&self, address: &str) -> EngineResult<bool>;

    /// Send native asset from the operator wallet; returns the transaction id
    async fn send_native(&self, to_address: &str, amount: Decimal) -> EngineResult<String>;

    /// Send the tracked asset from the address the credential controls
    async fn send_asset(
        &self,
        from_credential: &str,
        to_address: &str,
        atomic_amount: u64,
    ) -> EngineResult<String>;

    async fn get_transaction(&self, tx_id: &str) -> EngineResult<ConfirmationState>;

    /// Delegate revocable execution capacity from the operator wallet
    async fn delegate_resource(
        &self,
        to_address: &str,
        class: ResourceClass,
        amount: u64,
    ) -> EngineResult<String>;

    async fn get_account_resources(&self, address: &str) -> EngineResult<AccountResources>;

    /// Tracked-asset transfers credited to an address since a timestamp,
    /// with a best-effort memo decode
    async fn list_recent_asset_transfers(
        &self,
        address: &str,
        since: DateTime<Utc>,
    ) -> EngineResult<Vec<ExternalTransfer>>;

    /// Generate a fresh intermediate account for a new intent
    async fn generate_account(&self) -> EngineResult<GeneratedAccount>;
}
