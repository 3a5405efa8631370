// Shared test doubles: an in-memory intent store with the same
// conditional-update semantics as the Postgres store, and a scriptable
// ledger client.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::intent::models::{IntentStatus, PaymentIntent};
use crate::intent::store::{validate_patch, IntentPatch, IntentStore};
use crate::ledger::client::LedgerClient;
use crate::ledger::types::{
    AccountResources, ConfirmationState, ExternalTransfer, GeneratedAccount, ResourceClass,
};

pub fn test_intent(address: &str, amount: Decimal, memo: Option<&str>) -> PaymentIntent {
    PaymentIntent::new(
        address.to_string(),
        amount,
        memo.map(str::to_string),
        None,
    )
}

pub fn test_transfer(
    tx_id: &str,
    to: &str,
    atomic_amount: u64,
    memo: Option<&str>,
) -> ExternalTransfer {
    ExternalTransfer {
        transaction_id: tx_id.to_string(),
        from_address: "external-sender".to_string(),
        to_address: to.to_string(),
        asset_contract: "asset-contract".to_string(),
        atomic_amount,
        memo: memo.map(str::to_string),
        observed_at: Utc::now(),
    }
}

#[derive(Default)]
pub struct MemoryIntentStore {
    intents: Mutex<HashMap<Uuid, PaymentIntent>>,
}

impl MemoryIntentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IntentStore for MemoryIntentStore {
    async fn insert(&self, intent: &PaymentIntent) -> EngineResult<()> {
        self.intents.lock().insert(intent.id, intent.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> EngineResult<Option<PaymentIntent>> {
        Ok(self.intents.lock().get(&id).cloned())
    }

    async fn find_by_external_tx(&self, tx_id: &str) -> EngineResult<Option<PaymentIntent>> {
        Ok(self
            .intents
            .lock()
            .values()
            .find(|intent| intent.external_transaction_id.as_deref() == Some(tx_id))
            .cloned())
    }

    async fn find_open(&self) -> EngineResult<Vec<PaymentIntent>> {
        let mut open: Vec<PaymentIntent> = self
            .intents
            .lock()
            .values()
            .filter(|intent| !intent.status.is_terminal())
            .cloned()
            .collect();
        open.sort_by_key(|intent| intent.created_at);
        Ok(open)
    }

    async fn update_conditional(
        &self,
        id: Uuid,
        expected: IntentStatus,
        patch: IntentPatch,
    ) -> EngineResult<bool> {
        validate_patch(expected, &patch)?;

        let mut intents = self.intents.lock();
        let Some(intent) = intents.get_mut(&id) else {
            return Ok(false);
        };
        if intent.status != expected {
            return Ok(false);
        }
        if let Some(status) = patch.status {
            intent.status = status;
        }
        if let Some(tx_id) = patch.external_transaction_id {
            intent.external_transaction_id = Some(tx_id);
        }
        if let Some(tx_id) = patch.consolidation_transaction_id {
            intent.consolidation_transaction_id = Some(tx_id);
        }
        if let Some(activated) = patch.account_activated {
            intent.account_activated = activated;
        }
        intent.updated_at = Utc::now();
        Ok(true)
    }

    async fn record_activation_attempt(&self, id: Uuid, activated: bool) -> EngineResult<()> {
        let mut intents = self.intents.lock();
        let intent = intents
            .get_mut(&id)
            .ok_or_else(|| EngineError::NotFound(format!("intent {id}")))?;
        intent.activation_attempts += 1;
        intent.account_activated = intent.account_activated || activated;
        intent.updated_at = Utc::now();
        Ok(())
    }

    async fn record_consolidation_attempt(&self, id: Uuid) -> EngineResult<i32> {
        let mut intents = self.intents.lock();
        let intent = intents
            .get_mut(&id)
            .ok_or_else(|| EngineError::NotFound(format!("intent {id}")))?;
        intent.consolidation_attempts += 1;
        intent.updated_at = Utc::now();
        Ok(intent.consolidation_attempts)
    }
}

struct FakeLedgerState {
    existing_accounts: HashSet<String>,
    asset_balances: HashMap<String, Decimal>,
    native_balances: HashMap<String, Decimal>,
    resources: HashMap<String, AccountResources>,
    transfers: Vec<ExternalTransfer>,
    tx_states: HashMap<String, ConfirmationState>,
    sent_native: Vec<(String, Decimal)>,
    sent_assets: Vec<(String, String, u64, String)>,
    delegations: Vec<(String, ResourceClass, u64)>,
    activate_on_native_send: bool,
    asset_send_state: ConfirmationState,
    fail_listing: bool,
    fail_delegation: bool,
    tx_counter: u64,
    account_counter: u64,
}

impl Default for FakeLedgerState {
    fn default() -> Self {
        Self {
            existing_accounts: HashSet::new(),
            asset_balances: HashMap::new(),
            native_balances: HashMap::new(),
            resources: HashMap::new(),
            transfers: Vec::new(),
            tx_states: HashMap::new(),
            sent_native: Vec::new(),
            sent_assets: Vec::new(),
            delegations: Vec::new(),
            activate_on_native_send: true,
            asset_send_state: ConfirmationState::Confirmed,
            fail_listing: false,
            fail_delegation: false,
            tx_counter: 0,
            account_counter: 0,
        }
    }
}

/// Scriptable ledger client. Unknown addresses have zero balances and
/// generous execution resources; asset sends confirm immediately unless
/// told otherwise.
pub struct FakeLedgerClient {
    state: Mutex<FakeLedgerState>,
}

impl FakeLedgerClient {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeLedgerState::default()),
        }
    }

    pub fn add_existing_account(&self, address: &str) {
        self.state.lock().existing_accounts.insert(address.to_string());
    }

    pub fn set_activate_on_native_send(&self, activate: bool) {
        self.state.lock().activate_on_native_send = activate;
    }

    pub fn set_asset_balance(&self, address: &str, balance: Decimal) {
        self.state
            .lock()
            .asset_balances
            .insert(address.to_string(), balance);
    }

    pub fn set_native_balance(&self, address: &str, balance: Decimal) {
        self.state
            .lock()
            .native_balances
            .insert(address.to_string(), balance);
    }

    pub fn set_resources(&self, address: &str, resources: AccountResources) {
        self.state
            .lock()
            .resources
            .insert(address.to_string(), resources);
    }

    pub fn add_transfer(&self, transfer: ExternalTransfer) {
        self.state.lock().transfers.push(transfer);
    }

    pub fn clear_transfers(&self) {
        self.state.lock().transfers.clear();
    }

    pub fn set_fail_listing(&self, fail: bool) {
        self.state.lock().fail_listing = fail;
    }

    pub fn set_fail_delegation(&self, fail: bool) {
        self.state.lock().fail_delegation = fail;
    }

    /// Confirmation state assigned to newly submitted asset transfers
    pub fn set_asset_send_state(&self, state: ConfirmationState) {
        self.state.lock().asset_send_state = state;
    }

    pub fn set_tx_state(&self, tx_id: &str, state: ConfirmationState) {
        self.state.lock().tx_states.insert(tx_id.to_string(), state);
    }

    pub fn sent_native(&self) -> Vec<(String, Decimal)> {
        self.state.lock().sent_native.clone()
    }

    /// (credential, to, atomic amount, transaction id) per submission
    pub fn sent_assets(&self) -> Vec<(String, String, u64, String)> {
        self.state.lock().sent_assets.clone()
    }

    pub fn delegations(&self) -> Vec<(String, ResourceClass, u64)> {
        self.state.lock().delegations.clone()
    }
}

#[async_trait]
impl LedgerClient for FakeLedgerClient {
    async fn get_asset_balance(&self, address: &str) -> EngineResult<Decimal> {
        Ok(self
            .state
            .lock()
            .asset_balances
            .get(address)
            .copied()
            .unwrap_or(Decimal::ZERO))
    }

    async fn get_native_balance(&self, address: &str) -> EngineResult<Decimal> {
        Ok(self
            .state
            .lock()
            .native_balances
            .get(address)
            .copied()
            .unwrap_or(Decimal::ZERO))
    }

    async fn account_exists(&self, address: &str) -> EngineResult<bool> {
        Ok(self.state.lock().existing_accounts.contains(address))
    }

    async fn send_native(&self, to: &str, amount: Decimal) -> EngineResult<String> {
        let mut state = self.state.lock();
        state.tx_counter += 1;
        let tx_id = format!("native-tx-{}", state.tx_counter);
        state.sent_native.push((to.to_string(), amount));
        *state
            .native_balances
            .entry(to.to_string())
            .or_insert(Decimal::ZERO) += amount;
        if state.activate_on_native_send {
            state.existing_accounts.insert(to.to_string());
        }
        Ok(tx_id)
    }

    async fn send_asset(
        &self,
        from_credential: &str,
        to: &str,
        atomic_amount: u64,
    ) -> EngineResult<String> {
        let mut state = self.state.lock();
        state.tx_counter += 1;
        let tx_id = format!("asset-tx-{}", state.tx_counter);
        state.sent_assets.push((
            from_credential.to_string(),
            to.to_string(),
            atomic_amount,
            tx_id.clone(),
        ));
        let send_state = state.asset_send_state;
        state.tx_states.insert(tx_id.clone(), send_state);
        Ok(tx_id)
    }

    async fn get_transaction(&self, tx_id: &str) -> EngineResult<ConfirmationState> {
        Ok(self
            .state
            .lock()
            .tx_states
            .get(tx_id)
            .copied()
            .unwrap_or(ConfirmationState::Pending))
    }

    async fn delegate_resource(
        &self,
        to: &str,
        class: ResourceClass,
        amount: u64,
    ) -> EngineResult<String> {
        let mut state = self.state.lock();
        if state.fail_delegation {
            return Err(EngineError::Transient("delegation refused".to_string()));
        }
        state.tx_counter += 1;
        let tx_id = format!("delegation-tx-{}", state.tx_counter);
        state.delegations.push((to.to_string(), class, amount));
        Ok(tx_id)
    }

    async fn get_account_resources(&self, address: &str) -> EngineResult<AccountResources> {
        Ok(self
            .state
            .lock()
            .resources
            .get(address)
            .copied()
            .unwrap_or(AccountResources {
                bandwidth: 1_000_000,
                energy: 1_000_000,
            }))
    }

    async fn list_recent_asset_transfers(
        &self,
        address: &str,
        since: DateTime<Utc>,
    ) -> EngineResult<Vec<ExternalTransfer>> {
        let state = self.state.lock();
        if state.fail_listing {
            return Err(EngineError::Transient("listing unavailable".to_string()));
        }
        Ok(state
            .transfers
            .iter()
            .filter(|t| t.to_address == address && t.observed_at >= since)
            .cloned()
            .collect())
    }

    async fn generate_account(&self) -> EngineResult<GeneratedAccount> {
        let mut state = self.state.lock();
        state.account_counter += 1;
        Ok(GeneratedAccount {
            address: format!("generated-{}", state.account_counter),
            credential: format!("generated-cred-{}", state.account_counter),
        })
    }
}
