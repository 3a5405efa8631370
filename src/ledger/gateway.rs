// Ledger gateway client
//
// Speaks JSON to the wallet signing gateway, which holds key material and
// fronts the ledger node. Amount fields cross the wire in atomic units;
// conversion to human units happens here at the boundary.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::ledger::client::LedgerClient;
use crate::ledger::types::{
    AccountResources, ConfirmationState, ExternalTransfer, GeneratedAccount, ResourceClass,
};
use crate::units::AssetUnits;

pub struct GatewayLedgerClient {
    /// Carries the operator credential as a default bearer header; the
    /// gateway signs operator-funded actions (activation, delegation,
    /// fee top-ups) under it
    http: reqwest::Client,
    base_url: String,
    asset_contract: String,
    asset_units: AssetUnits,
    native_units: AssetUnits,
}

#[derive(Deserialize)]
struct AccountInfo {
    exists: bool,
    #[serde(default)]
    native_balance_atomic: u64,
    #[serde(default)]
    resources: AccountResources,
}

#[derive(Deserialize)]
struct AssetBalance {
    atomic_amount: u64,
}

#[derive(Deserialize)]
struct SubmittedTransaction {
    transaction_id: String,
}

#[derive(Deserialize)]
struct TransactionInfo {
    state: ConfirmationState,
}

#[derive(Deserialize)]
struct TransferPage {
    transfers: Vec<RawTransfer>,
}

#[derive(Deserialize)]
struct RawTransfer {
    transaction_id: String,
    from: String,
    to: String,
    contract: String,
    atomic_amount: u64,
    #[serde(default)]
    memo_hex: Option<String>,
    /// Milliseconds since the epoch
    block_timestamp: i64,
}

impl GatewayLedgerClient {
    pub fn new(
        base_url: String,
        operator_credential: &str,
        asset_contract: String,
        asset_units: AssetUnits,
        native_units: AssetUnits,
    ) -> EngineResult<Self> {
        let mut auth = reqwest::header::HeaderValue::from_str(&format!(
            "Bearer {operator_credential}"
        ))
        .map_err(|_| {
            EngineError::Config("operator credential is not a valid header value".to_string())
        })?;
        auth.set_sensitive(true);
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::AUTHORIZATION, auth);

        Ok(Self {
            http: reqwest::Client::builder().default_headers(headers).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            asset_contract,
            asset_units,
            native_units,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_account(&self, address: &str) -> EngineResult<AccountInfo> {
        let response = self
            .http
            .get(self.url(&format!("/accounts/{}", address)))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(EngineError::Transient(format!(
                "gateway returned {} for account {}",
                response.status(),
                address
            )));
        }
        Ok(response.json().await?)
    }
}

/// Best-effort memo decode: hex to UTF-8, `None` for anything that is not
/// cleanly printable text.
pub fn decode_memo(memo_hex: Option<&str>) -> Option<String> {
    let raw = hex::decode(memo_hex?).ok()?;
    let text = String::from_utf8(raw).ok()?;
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_string())
}

#[async_trait]
impl LedgerClient for GatewayLedgerClient {
    async fn get_asset_balance(&self, address: &str) -> EngineResult<Decimal> {
        let response = self
            .http
            .get(self.url(&format!("/accounts/{}/asset-balance", address)))
            .query(&[("contract", self.asset_contract.as_str())])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(EngineError::Transient(format!(
                "gateway returned {} for asset balance of {}",
                response.status(),
                address
            )));
        }
        let balance: AssetBalance = response.json().await?;
        Ok(self.asset_units.from_atomic(balance.atomic_amount))
    }

    async fn get_native_balance(&self, address: &str) -> EngineResult<Decimal> {
        let account = self.get_account(address).await?;
        Ok(self.native_units.from_atomic(account.native_balance_atomic))
    }

    async fn account_exists(&self, address: &str) -> EngineResult<bool> {
        Ok(self.get_account(address).await?.exists)
    }

    async fn send_native(&self, to_address: &str, amount: Decimal) -> EngineResult<String> {
        let atomic = self.native_units.to_atomic(amount)?;
        let response = self
            .http
            .post(self.url("/transfers/native"))
            .json(&serde_json::json!({
                "to": to_address,
                "atomic_amount": atomic,
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(EngineError::Transient(format!(
                "gateway returned {} submitting native transfer to {}",
                response.status(),
                to_address
            )));
        }
        let submitted: SubmittedTransaction = response.json().await?;
        Ok(submitted.transaction_id)
    }

    async fn send_asset(
        &self,
        from_credential: &str,
        to_address: &str,
        atomic_amount: u64,
    ) -> EngineResult<String> {
        let response = self
            .http
            .post(self.url("/transfers/asset"))
            .json(&serde_json::json!({
                "from_credential": from_credential,
                "to": to_address,
                "contract": self.asset_contract,
                "atomic_amount": atomic_amount,
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(EngineError::Transient(format!(
                "gateway returned {} submitting asset transfer to {}",
                response.status(),
                to_address
            )));
        }
        let submitted: SubmittedTransaction = response.json().await?;
        Ok(submitted.transaction_id)
    }

    async fn get_transaction(&self, tx_id: &str) -> EngineResult<ConfirmationState> {
        let response = self
            .http
            .get(self.url(&format!("/transactions/{}", tx_id)))
            .send()
            .await?;
        // A transaction the node has not seen yet is still pending
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(ConfirmationState::Pending);
        }
        if !response.status().is_success() {
            return Err(EngineError::Transient(format!(
                "gateway returned {} for transaction {}",
                response.status(),
                tx_id
            )));
        }
        let info: TransactionInfo = response.json().await?;
        Ok(info.state)
    }

    async fn delegate_resource(
        &self,
        to_address: &str,
        class: ResourceClass,
        amount: u64,
    ) -> EngineResult<String> {
        let response = self
            .http
            .post(self.url("/resources/delegations"))
            .json(&serde_json::json!({
                "to": to_address,
                "class": class.as_str(),
                "amount": amount,
                // Revocable: the network reclaims it on its own expiry
                "lock": false,
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(EngineError::Transient(format!(
                "gateway returned {} delegating {} to {}",
                response.status(),
                class,
                to_address
            )));
        }
        let submitted: SubmittedTransaction = response.json().await?;
        Ok(submitted.transaction_id)
    }

    async fn get_account_resources(&self, address: &str) -> EngineResult<AccountResources> {
        Ok(self.get_account(address).await?.resources)
    }

    async fn list_recent_asset_transfers(
        &self,
        address: &str,
        since: DateTime<Utc>,
    ) -> EngineResult<Vec<ExternalTransfer>> {
        let response = self
            .http
            .get(self.url(&format!("/accounts/{}/asset-transfers", address)))
            .query(&[
                ("contract", self.asset_contract.clone()),
                ("min_timestamp", since.timestamp_millis().to_string()),
                ("limit", "100".to_string()),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(EngineError::Transient(format!(
                "gateway returned {} listing transfers for {}",
                response.status(),
                address
            )));
        }
        let page: TransferPage = response.json().await?;
        debug!(
            address,
            count = page.transfers.len(),
            "pulled asset transfers"
        );
        Ok(page
            .transfers
            .into_iter()
            .map(|raw| ExternalTransfer {
                memo: decode_memo(raw.memo_hex.as_deref()),
                transaction_id: raw.transaction_id,
                from_address: raw.from,
                to_address: raw.to,
                asset_contract: raw.contract,
                atomic_amount: raw.atomic_amount,
                observed_at: Utc
                    .timestamp_millis_opt(raw.block_timestamp)
                    .single()
                    .unwrap_or_else(Utc::now),
            })
            .collect())
    }

    async fn generate_account(&self) -> EngineResult<GeneratedAccount> {
        let response = self.http.post(self.url("/accounts")).send().await?;
        if !response.status().is_success() {
            return Err(EngineError::Transient(format!(
                "gateway returned {} generating account",
                response.status()
            )));
        }
        Ok(response.json().await?)
    }
}
