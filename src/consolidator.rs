// Consolidation - moves matched funds from intermediate addresses into
// the custody wallet, with confirmation polling and a bounded attempt
// budget per intent.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::activation::AccountActivator;
use crate::delegation::ResourceDelegator;
use crate::error::{EngineError, EngineResult};
use crate::intent::models::{IntentStatus, PaymentIntent};
use crate::intent::store::{IntentPatch, IntentStore};
use crate::ledger::client::LedgerClient;
use crate::ledger::types::ConfirmationState;
use crate::poll::{poll_until, PollOutcome};
use crate::units::AssetUnits;

#[derive(Debug, Clone)]
pub struct ConsolidatorConfig {
    pub custody_address: String,
    /// Below this native balance the source gets a fee top-up before the
    /// outbound transfer is attempted
    pub native_fee_floor: Decimal,
    pub native_topup_amount: Decimal,
    pub confirmation_interval: Duration,
    pub confirmation_max_checks: u32,
    pub max_attempts: i32,
}

pub struct Consolidator {
    client: Arc<dyn LedgerClient>,
    store: Arc<dyn IntentStore>,
    activator: Arc<AccountActivator>,
    delegator: Arc<ResourceDelegator>,
    units: AssetUnits,
    config: ConsolidatorConfig,
    /// Transfers submitted but not yet confirmed, keyed by intent. A
    /// later call re-checks the known transaction instead of paying for
    /// a duplicate submission.
    submitted: Mutex<HashMap<Uuid, String>>,
}

impl Consolidator {
    pub fn new(
        client: Arc<dyn LedgerClient>,
        store: Arc<dyn IntentStore>,
        activator: Arc<AccountActivator>,
        delegator: Arc<ResourceDelegator>,
        units: AssetUnits,
        config: ConsolidatorConfig,
    ) -> Self {
        Self {
            client,
            store,
            activator,
            delegator,
            units,
            config,
            submitted: Mutex::new(HashMap::new()),
        }
    }

    /// Attempt to consolidate one intent. `Ok(true)` means the intent
    /// reached `completed` during this call; `Ok(false)` is a wait state
    /// (funds not yet visible, activation pending, confirmation pending)
    /// that a later cycle retries.
    pub async fn consolidate(&self, intent_id: Uuid) -> EngineResult<bool> {
        // Refetch: cycle snapshots go stale, another writer may have
        // finished or failed this intent already
        let Some(intent) = self.store.find_by_id(intent_id).await? else {
            return Err(EngineError::NotFound(format!("intent {intent_id}")));
        };

        if intent.status != IntentStatus::FundsReceived
            || intent.consolidation_transaction_id.is_some()
        {
            debug!(intent = %intent_id, status = intent.status.as_str(), "nothing to consolidate");
            return Ok(false);
        }
        // A previously submitted transfer may have landed since last
        // cycle; re-check it before anything that could lead to a
        // duplicate submission
        if let Some(tx_id) = self.submitted_tx(intent_id) {
            match self.client.get_transaction(&tx_id).await? {
                ConfirmationState::Confirmed => {
                    return self.finalize(&intent, &tx_id).await;
                }
                ConfirmationState::Pending => {
                    return self.await_confirmation(&intent, &tx_id).await;
                }
                ConfirmationState::Failed => {
                    warn!(intent = %intent_id, tx_id, "submitted consolidation failed on ledger, resubmitting");
                    self.submitted.lock().remove(&intent_id);
                }
            }
        }

        // A spent budget should already have failed the intent; this
        // closes the gap if that transition was lost to a crash
        if intent.consolidation_attempts >= self.config.max_attempts {
            return self
                .fail_exhausted(&intent, intent.consolidation_attempts)
                .await
                .map(|_| false);
        }

        let address = intent.destination_address.clone();
        let Some(credential) = intent.source_credential.clone() else {
            return Err(EngineError::Internal(format!(
                "intent {intent_id} has funds at {address} but no source credential"
            )));
        };

        if !self.activator.ensure_active(&intent).await? {
            warn!(intent = %intent_id, address, "source address not active, counting a failed attempt");
            return self.record_failed_attempt(&intent).await.map(|_| false);
        }

        // Funds were seen in the transfer listing, but the balance view
        // can lag behind it. Not an attempt, just not yet.
        let balance = self.client.get_asset_balance(&address).await?;
        if balance < intent.expected_amount {
            debug!(
                intent = %intent_id,
                %balance,
                expected = %intent.expected_amount,
                "balance not yet visible at source, waiting"
            );
            return Ok(false);
        }

        if !self.prepare_fees(&address).await? {
            warn!(intent = %intent_id, address, "fee top-up not confirmed, counting a failed attempt");
            return self.record_failed_attempt(&intent).await.map(|_| false);
        }

        let atomic_amount = self.units.to_atomic(intent.expected_amount)?;
        let tx_id = self
            .client
            .send_asset(&credential, &self.config.custody_address, atomic_amount)
            .await?;
        self.submitted.lock().insert(intent_id, tx_id.clone());
        info!(
            intent = %intent_id,
            address,
            amount = %intent.expected_amount,
            tx_id,
            "consolidation transfer submitted"
        );

        self.await_confirmation(&intent, &tx_id).await
    }

    fn submitted_tx(&self, intent_id: Uuid) -> Option<String> {
        self.submitted.lock().get(&intent_id).cloned()
    }

    /// Fee provisioning for the outbound transfer: delegate execution
    /// resources where depleted, and top up native balance below the
    /// floor. Returns whether the address is ready to pay fees; a top-up
    /// is waited on so the transfer is not submitted against an
    /// unfunded address.
    async fn prepare_fees(&self, address: &str) -> EngineResult<bool> {
        self.delegator.top_up_if_needed(address).await;

        let native = self.client.get_native_balance(address).await?;
        if native >= self.config.native_fee_floor {
            return Ok(true);
        }

        let tx_id = self
            .client
            .send_native(address, self.config.native_topup_amount)
            .await?;
        info!(
            address,
            amount = %self.config.native_topup_amount,
            tx_id,
            "native fee top-up sent"
        );

        let client = self.client.clone();
        let poll_address = address.to_string();
        let floor = self.config.native_fee_floor;
        let outcome = poll_until(
            move || {
                let client = client.clone();
                let address = poll_address.clone();
                async move {
                    client
                        .get_native_balance(&address)
                        .await
                        .map(|balance| balance >= floor)
                        .unwrap_or(false)
                }
            },
            self.config.confirmation_interval,
            self.config.confirmation_max_checks,
        )
        .await;

        Ok(outcome == PollOutcome::Confirmed)
    }

    async fn await_confirmation(&self, intent: &PaymentIntent, tx_id: &str) -> EngineResult<bool> {
        let client = self.client.clone();
        let poll_tx = tx_id.to_string();
        let outcome = poll_until(
            move || {
                let client = client.clone();
                let tx_id = poll_tx.clone();
                async move {
                    matches!(
                        client.get_transaction(&tx_id).await,
                        Ok(ConfirmationState::Confirmed)
                    )
                }
            },
            self.config.confirmation_interval,
            self.config.confirmation_max_checks,
        )
        .await;

        if outcome == PollOutcome::Confirmed {
            self.finalize(intent, tx_id).await
        } else {
            warn!(
                intent = %intent.id,
                tx_id,
                checks = self.config.confirmation_max_checks,
                "consolidation not confirmed within poll budget"
            );
            // The transfer stays in the submitted map; next cycle
            // re-checks it before considering a resubmission
            self.record_failed_attempt(intent).await.map(|_| false)
        }
    }

    async fn finalize(&self, intent: &PaymentIntent, tx_id: &str) -> EngineResult<bool> {
        let patch = IntentPatch {
            status: Some(IntentStatus::Completed),
            consolidation_transaction_id: Some(tx_id.to_string()),
            ..Default::default()
        };
        let applied = self
            .store
            .update_conditional(intent.id, intent.status, patch)
            .await?;
        self.submitted.lock().remove(&intent.id);

        if applied {
            info!(intent = %intent.id, tx_id, "consolidation confirmed, intent completed");
        } else {
            debug!(intent = %intent.id, tx_id, "intent moved concurrently, completion skipped");
        }
        Ok(applied)
    }

    /// Count a failed attempt; once the budget is spent the intent is
    /// failed terminally and the exhaustion surfaces as an error.
    async fn record_failed_attempt(&self, intent: &PaymentIntent) -> EngineResult<()> {
        let attempts = self.store.record_consolidation_attempt(intent.id).await?;
        if attempts < self.config.max_attempts {
            return Ok(());
        }
        self.fail_exhausted(intent, attempts).await
    }

    async fn fail_exhausted(&self, intent: &PaymentIntent, attempts: i32) -> EngineResult<()> {
        let patch = IntentPatch {
            status: Some(IntentStatus::Failed),
            ..Default::default()
        };
        self.store
            .update_conditional(intent.id, intent.status, patch)
            .await?;
        self.submitted.lock().remove(&intent.id);
        warn!(intent = %intent.id, attempts, "consolidation attempts exhausted, intent failed");

        Err(EngineError::ConsolidationExhausted {
            intent_id: intent.id,
            attempts,
        })
    }
}
