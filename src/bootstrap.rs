// Wiring - builds the component graph from configuration.

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tracing::info;

use crate::activation::{AccountActivator, ActivationConfig};
use crate::config::Config;
use crate::consolidator::{Consolidator, ConsolidatorConfig};
use crate::delegation::{DelegationConfig, ResourceDelegator};
use crate::engine::{Engine, EngineConfig};
use crate::error::EngineResult;
use crate::intent::store::{IntentStore, PgIntentStore};
use crate::ledger::client::LedgerClient;
use crate::ledger::gateway::GatewayLedgerClient;
use crate::scheduler::ReconcileScheduler;
use crate::units::AssetUnits;
use crate::watcher::LedgerWatcher;

pub struct App {
    pub engine: Arc<Engine>,
    pub scheduler: Arc<ReconcileScheduler>,
}

pub async fn build(config: &Config) -> EngineResult<App> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&config.database_url)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("✓ database ready");

    let asset_units = AssetUnits::new(config.asset_decimals);
    let native_units = AssetUnits::new(config.native_decimals);

    let client: Arc<dyn LedgerClient> = Arc::new(GatewayLedgerClient::new(
        config.gateway_url.clone(),
        &config.operator_credential,
        config.asset_contract.clone(),
        asset_units,
        native_units,
    )?);
    let store: Arc<dyn IntentStore> = Arc::new(PgIntentStore::new(pool));

    let watcher = Arc::new(LedgerWatcher::new(
        client.clone(),
        store.clone(),
        config.custody_address.clone(),
        config.asset_contract.clone(),
        asset_units,
        config.watch_window_hours,
    ));
    let activator = Arc::new(AccountActivator::new(
        client.clone(),
        store.clone(),
        ActivationConfig {
            activation_amount: config.activation_amount,
            poll_interval: config.confirmation_interval,
            max_checks: config.confirmation_max_checks,
            max_attempts: config.max_activation_attempts,
        },
    ));
    let delegator = Arc::new(ResourceDelegator::new(
        client.clone(),
        DelegationConfig {
            energy_floor: config.energy_floor,
            energy_delegation: config.energy_delegation,
            bandwidth_floor: config.bandwidth_floor,
            bandwidth_delegation: config.bandwidth_delegation,
        },
    ));
    let consolidator = Arc::new(Consolidator::new(
        client.clone(),
        store.clone(),
        activator.clone(),
        delegator.clone(),
        asset_units,
        ConsolidatorConfig {
            custody_address: config.custody_address.clone(),
            native_fee_floor: config.native_fee_floor,
            native_topup_amount: config.native_topup_amount,
            confirmation_interval: config.confirmation_interval,
            confirmation_max_checks: config.confirmation_max_checks,
            max_attempts: config.max_consolidation_attempts,
        },
    ));
    let scheduler = Arc::new(ReconcileScheduler::new(
        watcher.clone(),
        consolidator.clone(),
        store.clone(),
        config.cycle_interval,
        config.backoff_cap,
    ));

    let engine = Arc::new(Engine::new(
        client,
        store,
        watcher,
        consolidator,
        scheduler.clone(),
        activator,
        delegator,
        EngineConfig {
            custody_address: config.custody_address.clone(),
            asset_contract: config.asset_contract.clone(),
            receive_to_custody: config.receive_to_custody,
            watch_window_hours: config.watch_window_hours,
            // Manual triggers never fire more often than the scheduler
            manual_cycle_min_gap: config.cycle_interval,
        },
    )?);

    info!(
        custody = config.custody_address,
        contract = config.asset_contract,
        custody_direct = config.receive_to_custody,
        "✓ engine wired"
    );
    Ok(App { engine, scheduler })
}
