use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::error::EngineResult;
use crate::intent::models::PaymentIntent;
use crate::intent::store::IntentStore;
use crate::ledger::client::LedgerClient;
use crate::poll::{poll_until, PollOutcome};

#[derive(Debug, Clone)]
pub struct ActivationConfig {
    /// Native amount sent to bring the address into existence
    pub activation_amount: Decimal,
    pub poll_interval: Duration,
    pub max_checks: u32,
    /// Activation transfers allowed per intent; the budget stops native
    /// value draining into an address that never materializes
    pub max_attempts: i32,
}

/// Ensures an address exists on the ledger before it originates a
/// transaction. Idempotent: an already existing address is a no-op.
pub struct AccountActivator {
    client: Arc<dyn LedgerClient>,
    store: Arc<dyn IntentStore>,
    config: ActivationConfig,
}

impl AccountActivator {
    pub fn new(
        client: Arc<dyn LedgerClient>,
        store: Arc<dyn IntentStore>,
        config: ActivationConfig,
    ) -> Self {
        Self {
            client,
            store,
            config,
        }
    }

    /// Returns whether the address is active after this call. A `false`
    /// result is an exhausted poll budget, not a verdict; callers widen
    /// the retry or escalate instead of looping within the cycle.
    pub async fn ensure_active(&self, intent: &PaymentIntent) -> EngineResult<bool> {
        let address = intent.destination_address.clone();

        if self.client.account_exists(&address).await? {
            if !intent.account_activated {
                self.store.record_activation_attempt(intent.id, true).await?;
            }
            return Ok(true);
        }

        if intent.activation_attempts >= self.config.max_attempts {
            warn!(
                intent = %intent.id,
                address,
                attempts = intent.activation_attempts,
                "activation attempt budget spent, not sending again"
            );
            return Ok(false);
        }

        let tx_id = self
            .client
            .send_native(&address, self.config.activation_amount)
            .await?;
        info!(
            intent = %intent.id,
            address,
            amount = %self.config.activation_amount,
            tx_id,
            "activation transfer submitted"
        );

        let client = self.client.clone();
        let poll_address = address.clone();
        let outcome = poll_until(
            move || {
                let client = client.clone();
                let address = poll_address.clone();
                async move { client.account_exists(&address).await.unwrap_or(false) }
            },
            self.config.poll_interval,
            self.config.max_checks,
        )
        .await;

        let activated = outcome == PollOutcome::Confirmed;
        self.store
            .record_activation_attempt(intent.id, activated)
            .await?;

        if activated {
            info!(intent = %intent.id, address, "account activated");
        } else {
            warn!(
                intent = %intent.id,
                address,
                checks = self.config.max_checks,
                "account not visible after activation transfer"
            );
        }

        Ok(activated)
    }
}
