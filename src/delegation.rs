use std::sync::Arc;

use tracing::{info, warn};

use crate::error::EngineResult;
use crate::ledger::client::LedgerClient;
use crate::ledger::types::{AccountResources, ResourceClass};

#[derive(Debug, Clone)]
pub struct DelegationConfig {
    pub energy_floor: u64,
    pub energy_delegation: u64,
    pub bandwidth_floor: u64,
    pub bandwidth_delegation: u64,
}

#[derive(Debug, Clone)]
pub struct DelegationOutcome {
    pub success: bool,
    pub transaction_id: Option<String>,
}

/// Grants an address transient execution capacity so its outbound transfer
/// succeeds without the address holding reserves. Strictly best-effort:
/// a sufficient native balance at the address is an equally valid path, so
/// delegation failure never blocks consolidation.
pub struct ResourceDelegator {
    client: Arc<dyn LedgerClient>,
    config: DelegationConfig,
}

impl ResourceDelegator {
    pub fn new(client: Arc<dyn LedgerClient>, config: DelegationConfig) -> Self {
        Self { client, config }
    }

    pub async fn check_resources(&self, address: &str) -> EngineResult<AccountResources> {
        self.client.get_account_resources(address).await
    }

    pub async fn delegate(
        &self,
        address: &str,
        class: ResourceClass,
        amount: u64,
    ) -> DelegationOutcome {
        match self.client.delegate_resource(address, class, amount).await {
            Ok(tx_id) => {
                info!(address, %class, amount, tx_id, "resources delegated");
                DelegationOutcome {
                    success: true,
                    transaction_id: Some(tx_id),
                }
            }
            Err(e) => {
                warn!(address, %class, amount, "resource delegation failed: {e}");
                DelegationOutcome {
                    success: false,
                    transaction_id: None,
                }
            }
        }
    }

    /// Check current levels and delegate only the classes below their
    /// floor, so a delegation transaction is not spent needlessly.
    pub async fn top_up_if_needed(&self, address: &str) {
        let resources = match self.check_resources(address).await {
            Ok(resources) => resources,
            Err(e) => {
                warn!(address, "resource check failed, skipping delegation: {e}");
                return;
            }
        };

        if resources.energy < self.config.energy_floor {
            self.delegate(address, ResourceClass::Energy, self.config.energy_delegation)
                .await;
        }
        if resources.bandwidth < self.config.bandwidth_floor {
            self.delegate(
                address,
                ResourceClass::Bandwidth,
                self.config.bandwidth_delegation,
            )
            .await;
        }
    }
}
