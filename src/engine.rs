// Engine facade - intent creation and inspection, targeted
// re-reconciliation, and rate-limited manual cycle triggering.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use crate::activation::AccountActivator;
use crate::consolidator::Consolidator;
use crate::delegation::ResourceDelegator;
use crate::error::{EngineError, EngineResult};
use crate::intent::models::{IntentStatus, IntentView, PaymentIntent};
use crate::intent::store::IntentStore;
use crate::ledger::client::LedgerClient;
use crate::scheduler::{CycleSummary, ReconcileScheduler};
use crate::watcher::LedgerWatcher;

#[derive(Debug, Clone)]
pub struct CreateIntentRequest {
    pub expected_amount: Decimal,
    pub memo: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub custody_address: String,
    pub asset_contract: String,
    /// When set, new intents receive directly at the custody wallet and
    /// never need consolidation. Otherwise each intent gets a fresh
    /// intermediate address.
    pub receive_to_custody: bool,
    pub watch_window_hours: i64,
    /// Minimum gap between manual cycle triggers
    pub manual_cycle_min_gap: Duration,
}

pub struct Engine {
    client: Arc<dyn LedgerClient>,
    store: Arc<dyn IntentStore>,
    watcher: Arc<LedgerWatcher>,
    consolidator: Arc<Consolidator>,
    scheduler: Arc<ReconcileScheduler>,
    activator: Arc<AccountActivator>,
    delegator: Arc<ResourceDelegator>,
    config: EngineConfig,
    manual_limiter: DefaultDirectRateLimiter,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<dyn LedgerClient>,
        store: Arc<dyn IntentStore>,
        watcher: Arc<LedgerWatcher>,
        consolidator: Arc<Consolidator>,
        scheduler: Arc<ReconcileScheduler>,
        activator: Arc<AccountActivator>,
        delegator: Arc<ResourceDelegator>,
        config: EngineConfig,
    ) -> EngineResult<Self> {
        let quota = Quota::with_period(config.manual_cycle_min_gap)
            .ok_or_else(|| EngineError::Config("manual cycle gap must be non-zero".to_string()))?;
        Ok(Self {
            client,
            store,
            watcher,
            consolidator,
            scheduler,
            activator,
            delegator,
            config,
            manual_limiter: RateLimiter::direct(quota),
        })
    }

    /// Register an expected inbound payment. In custody-direct mode the
    /// custody wallet itself is the destination; otherwise a fresh
    /// intermediate address is generated and prepared in the background.
    pub async fn create_intent(&self, request: CreateIntentRequest) -> EngineResult<IntentView> {
        if request.expected_amount <= Decimal::ZERO {
            return Err(EngineError::InvalidInput(
                "expected amount must be positive".to_string(),
            ));
        }

        let intent = if self.config.receive_to_custody {
            PaymentIntent::new(
                self.config.custody_address.clone(),
                request.expected_amount,
                request.memo,
                None,
            )
        } else {
            let account = self.client.generate_account().await?;
            PaymentIntent::new(
                account.address,
                request.expected_amount,
                request.memo,
                Some(account.credential),
            )
        };

        self.store.insert(&intent).await?;
        info!(
            intent = %intent.id,
            destination = intent.destination_address,
            amount = %intent.expected_amount,
            custody_direct = self.config.receive_to_custody,
            "✓ payment intent created"
        );

        // Warm up intermediate addresses ahead of the inbound transfer so
        // the later outbound leg does not stall on activation or fees.
        // Strictly best-effort; the consolidator redoes both checks.
        if !self.config.receive_to_custody {
            let activator = self.activator.clone();
            let delegator = self.delegator.clone();
            let prepared = intent.clone();
            tokio::spawn(async move {
                let address = prepared.destination_address.clone();
                if let Err(e) = activator.ensure_active(&prepared).await {
                    warn!(intent = %prepared.id, "eager activation failed: {e}");
                }
                delegator.top_up_if_needed(&address).await;
            });
        }

        Ok(IntentView::from_intent(intent, None))
    }

    /// Current state of an intent, with the live destination balance
    /// while it is still open. The source credential is never exposed.
    pub async fn get_intent(&self, id: Uuid) -> EngineResult<IntentView> {
        let intent = self
            .store
            .find_by_id(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("intent {id}")))?;

        let balance = if intent.status.is_terminal() {
            None
        } else {
            // Inspection stays useful when the ledger is unreachable
            self.client
                .get_asset_balance(&intent.destination_address)
                .await
                .ok()
        };

        Ok(IntentView::from_intent(intent, balance))
    }

    /// Re-run the whole pipeline for one intent, outside the scheduler:
    /// pull its destination's recent transfers, match, and consolidate if
    /// funds are there. Replaces ad-hoc repair runs against the store.
    /// Returns a cycle summary restricted to this intent.
    pub async fn force_reconcile(&self, id: Uuid) -> EngineResult<CycleSummary> {
        let intent = self
            .store
            .find_by_id(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("intent {id}")))?;

        let mut summary = CycleSummary::default();
        if intent.status.is_terminal() {
            info!(intent = %id, status = intent.status.as_str(), "intent already terminal");
            return Ok(summary);
        }

        if intent.status == IntentStatus::Pending {
            let since = Utc::now() - chrono::Duration::hours(self.config.watch_window_hours);
            let transfers: Vec<_> = self
                .client
                .list_recent_asset_transfers(&intent.destination_address, since)
                .await?
                .into_iter()
                .filter(|t| t.asset_contract == self.config.asset_contract)
                .collect();

            let report = self
                .watcher
                .match_transfers(&transfers, std::slice::from_ref(&intent))
                .await?;
            summary.matched = report.matched;
            summary.unmatched = report.unmatched;
            info!(
                intent = %id,
                transfers = transfers.len(),
                matched = report.matched,
                "forced match pass finished"
            );
        }

        let refreshed = self
            .store
            .find_by_id(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("intent {id}")))?;

        if refreshed.status == IntentStatus::FundsReceived && refreshed.needs_consolidation() {
            match self.consolidator.consolidate(id).await {
                Ok(true) => summary.consolidated = 1,
                Ok(false) => {}
                // Exhaustion already moved the intent to failed; the
                // caller sees that in the summary, not as an error
                Err(EngineError::ConsolidationExhausted { .. }) => summary.failed = 1,
                Err(e) => return Err(e),
            }
        }

        Ok(summary)
    }

    /// Run a reconciliation cycle immediately, throttled so repeated
    /// triggers cannot hammer the ledger gateway.
    pub async fn trigger_cycle_now(&self) -> EngineResult<CycleSummary> {
        self.manual_limiter.check().map_err(|_| {
            EngineError::RateLimited("manual cycle already triggered recently".to_string())
        })?;

        info!("🔄 manual reconciliation cycle triggered");
        Ok(self.scheduler.run_cycle().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::ActivationConfig;
    use crate::consolidator::ConsolidatorConfig;
    use crate::delegation::DelegationConfig;
    use crate::test_support::{test_transfer, FakeLedgerClient, MemoryIntentStore};
    use crate::units::AssetUnits;
    use rust_decimal_macros::dec;

    const CUSTODY: &str = "custody-wallet";
    const CONTRACT: &str = "asset-contract";

    fn engine(
        client: Arc<FakeLedgerClient>,
        store: Arc<MemoryIntentStore>,
        receive_to_custody: bool,
    ) -> Engine {
        let units = AssetUnits::new(6);
        let watcher = Arc::new(LedgerWatcher::new(
            client.clone(),
            store.clone(),
            CUSTODY.to_string(),
            CONTRACT.to_string(),
            units,
            24,
        ));
        let activator = Arc::new(AccountActivator::new(
            client.clone(),
            store.clone(),
            ActivationConfig {
                activation_amount: dec!(5),
                poll_interval: Duration::from_millis(1),
                max_checks: 2,
                max_attempts: 3,
            },
        ));
        let delegator = Arc::new(ResourceDelegator::new(
            client.clone(),
            DelegationConfig {
                energy_floor: 100_000,
                energy_delegation: 100_000,
                bandwidth_floor: 1_000,
                bandwidth_delegation: 1_000,
            },
        ));
        let consolidator = Arc::new(Consolidator::new(
            client.clone(),
            store.clone(),
            activator.clone(),
            delegator.clone(),
            units,
            ConsolidatorConfig {
                custody_address: CUSTODY.to_string(),
                native_fee_floor: dec!(5),
                native_topup_amount: dec!(10),
                confirmation_interval: Duration::from_millis(1),
                confirmation_max_checks: 2,
                max_attempts: 3,
            },
        ));
        let scheduler = Arc::new(ReconcileScheduler::new(
            watcher.clone(),
            consolidator.clone(),
            store.clone(),
            Duration::from_secs(60),
            5,
        ));
        Engine::new(
            client,
            store,
            watcher,
            consolidator,
            scheduler,
            activator,
            delegator,
            EngineConfig {
                custody_address: CUSTODY.to_string(),
                asset_contract: CONTRACT.to_string(),
                receive_to_custody,
                watch_window_hours: 24,
                manual_cycle_min_gap: Duration::from_secs(60),
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn custody_direct_intent_lands_at_the_custody_wallet() {
        let client = Arc::new(FakeLedgerClient::new());
        let store = Arc::new(MemoryIntentStore::new());
        let engine = engine(client, store.clone(), true);

        let view = engine
            .create_intent(CreateIntentRequest {
                expected_amount: dec!(99.5),
                memo: Some("ORDER-7".to_string()),
            })
            .await
            .unwrap();

        assert_eq!(view.destination_address, CUSTODY);
        assert_eq!(view.status, IntentStatus::Pending);

        let stored = store.find_by_id(view.id).await.unwrap().unwrap();
        assert!(stored.source_credential.is_none());
    }

    #[tokio::test]
    async fn intermediate_intent_gets_a_generated_address_and_credential() {
        let client = Arc::new(FakeLedgerClient::new());
        let store = Arc::new(MemoryIntentStore::new());
        let engine = engine(client, store.clone(), false);

        let view = engine
            .create_intent(CreateIntentRequest {
                expected_amount: dec!(10),
                memo: None,
            })
            .await
            .unwrap();

        assert_ne!(view.destination_address, CUSTODY);
        let stored = store.find_by_id(view.id).await.unwrap().unwrap();
        assert!(stored.source_credential.is_some());
    }

    #[tokio::test]
    async fn non_positive_amount_is_rejected() {
        let client = Arc::new(FakeLedgerClient::new());
        let store = Arc::new(MemoryIntentStore::new());
        let engine = engine(client, store, true);

        let result = engine
            .create_intent(CreateIntentRequest {
                expected_amount: dec!(0),
                memo: None,
            })
            .await;
        assert!(matches!(result, Err(EngineError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn get_intent_reports_live_balance_while_open() {
        let client = Arc::new(FakeLedgerClient::new());
        let store = Arc::new(MemoryIntentStore::new());
        let engine = engine(client.clone(), store, true);

        let view = engine
            .create_intent(CreateIntentRequest {
                expected_amount: dec!(50),
                memo: None,
            })
            .await
            .unwrap();

        client.set_asset_balance(CUSTODY, dec!(12.5));
        let fetched = engine.get_intent(view.id).await.unwrap();
        assert_eq!(fetched.current_balance, Some(dec!(12.5)));
    }

    #[tokio::test]
    async fn force_reconcile_runs_the_pipeline_for_one_intent() {
        let client = Arc::new(FakeLedgerClient::new());
        let store = Arc::new(MemoryIntentStore::new());
        let engine = engine(client.clone(), store.clone(), false);

        let view = engine
            .create_intent(CreateIntentRequest {
                expected_amount: dec!(20),
                memo: None,
            })
            .await
            .unwrap();
        let address = view.destination_address.clone();

        client.add_existing_account(&address);
        client.set_asset_balance(&address, dec!(20));
        client.set_native_balance(&address, dec!(20));
        client.add_transfer(test_transfer("tx-f", &address, 20_000_000, None));

        let summary = engine.force_reconcile(view.id).await.unwrap();
        assert_eq!(summary.matched, 1);
        assert_eq!(summary.consolidated, 1);

        let reconciled = engine.get_intent(view.id).await.unwrap();
        assert_eq!(reconciled.status, IntentStatus::Completed);
        assert_eq!(reconciled.external_transaction_id.as_deref(), Some("tx-f"));
        assert!(reconciled.consolidation_transaction_id.is_some());
    }

    #[tokio::test]
    async fn manual_cycle_trigger_is_rate_limited() {
        let client = Arc::new(FakeLedgerClient::new());
        let store = Arc::new(MemoryIntentStore::new());
        let engine = engine(client, store, true);

        engine.trigger_cycle_now().await.unwrap();
        assert!(matches!(
            engine.trigger_cycle_now().await,
            Err(EngineError::RateLimited(_))
        ));
    }

    #[tokio::test]
    async fn unknown_intent_is_not_found() {
        let client = Arc::new(FakeLedgerClient::new());
        let store = Arc::new(MemoryIntentStore::new());
        let engine = engine(client, store, true);

        assert!(matches!(
            engine.get_intent(Uuid::new_v4()).await,
            Err(EngineError::NotFound(_))
        ));
    }
}
