// Ledger watcher - pulls inbound asset transfers and matches them to
// open payment intents
//
// Matching rules, in order:
// 1. Transfer must credit a tracked address (custody or an open intent's
//    destination) and carry the tracked asset contract.
// 2. Candidates: pending intents at that destination with the exact
//    expected amount (decimal equality at asset precision, no tolerance).
// 3. A decodable memo matching exactly one candidate wins outright.
// 4. Otherwise the oldest candidate by creation time wins. With several
//    equal-amount candidates and no memo this is a genuine ambiguity;
//    it is logged, not resolved.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::EngineResult;
use crate::intent::models::{
    IntentStatus, PaymentIntent, CONSOLIDATION_SKIPPED_CUSTODY,
};
use crate::intent::store::{IntentPatch, IntentStore};
use crate::ledger::client::LedgerClient;
use crate::ledger::types::ExternalTransfer;
use crate::units::AssetUnits;

#[derive(Debug, Clone, Copy, Default)]
pub struct MatchReport {
    pub matched: usize,
    pub unmatched: usize,
}

pub struct LedgerWatcher {
    client: Arc<dyn LedgerClient>,
    store: Arc<dyn IntentStore>,
    custody_address: String,
    asset_contract: String,
    units: AssetUnits,
    /// Pull horizon; advanced only after a successful pull (fail-closed)
    checkpoint: Mutex<DateTime<Utc>>,
}

impl LedgerWatcher {
    pub fn new(
        client: Arc<dyn LedgerClient>,
        store: Arc<dyn IntentStore>,
        custody_address: String,
        asset_contract: String,
        units: AssetUnits,
        lookback_hours: i64,
    ) -> Self {
        Self {
            client,
            store,
            custody_address,
            asset_contract,
            units,
            checkpoint: Mutex::new(Utc::now() - Duration::hours(lookback_hours)),
        }
    }

    #[cfg(test)]
    pub fn checkpoint_at(&self) -> DateTime<Utc> {
        *self.checkpoint.lock()
    }

    /// One watch pass: pull transfers since the checkpoint for every
    /// tracked address, advance the checkpoint, match. A failed pull
    /// leaves the checkpoint untouched so nothing is skipped.
    pub async fn run(&self) -> EngineResult<MatchReport> {
        let since = *self.checkpoint.lock();
        let pulled_at = Utc::now();
        let open = self.store.find_open().await?;

        let transfers = self.pull(since, &open).await?;
        *self.checkpoint.lock() = pulled_at;

        debug!(
            since = %since,
            transfers = transfers.len(),
            open_intents = open.len(),
            "watch pass pulled"
        );

        self.match_transfers(&transfers, &open).await
    }

    async fn pull(
        &self,
        since: DateTime<Utc>,
        open: &[PaymentIntent],
    ) -> EngineResult<Vec<ExternalTransfer>> {
        let mut addresses: Vec<&str> = vec![self.custody_address.as_str()];
        for intent in open {
            if intent.status == IntentStatus::Pending
                && intent.destination_address != self.custody_address
            {
                addresses.push(intent.destination_address.as_str());
            }
        }
        addresses.dedup();

        let mut transfers = Vec::new();
        let mut seen = HashSet::new();
        for address in addresses {
            // Any pull failure aborts the whole pass; the checkpoint
            // stays put and the next cycle re-pulls the window.
            let page = self
                .client
                .list_recent_asset_transfers(address, since)
                .await?;
            for transfer in page {
                if transfer.asset_contract != self.asset_contract {
                    continue;
                }
                if seen.insert(transfer.transaction_id.clone()) {
                    transfers.push(transfer);
                }
            }
        }
        Ok(transfers)
    }

    /// Match transfers against the given intents and commit each match as
    /// a conditional `pending -> ...` transition. Also used by the
    /// per-intent force path with a one-intent slice.
    pub async fn match_transfers(
        &self,
        transfers: &[ExternalTransfer],
        open: &[PaymentIntent],
    ) -> EngineResult<MatchReport> {
        let mut report = MatchReport::default();
        let mut claimed: HashSet<uuid::Uuid> = HashSet::new();

        for transfer in transfers {
            let amount = self.units.from_atomic(transfer.atomic_amount);

            // A transfer that already satisfied some intent is not
            // offered again; two intents never share an inbound tx.
            if self
                .store
                .find_by_external_tx(&transfer.transaction_id)
                .await?
                .is_some()
            {
                continue;
            }

            let candidates: Vec<&PaymentIntent> = open
                .iter()
                .filter(|intent| {
                    intent.status == IntentStatus::Pending
                        && intent.destination_address == transfer.to_address
                        && intent.expected_amount == amount
                        && !claimed.contains(&intent.id)
                })
                .collect();

            let Some(intent) = Self::select_candidate(transfer, &candidates) else {
                report.unmatched += 1;
                warn!(
                    tx_id = transfer.transaction_id,
                    to = transfer.to_address,
                    %amount,
                    "no open intent matches inbound transfer, leaving for a later cycle"
                );
                continue;
            };

            let to_custody = intent.is_custody_direct(&self.custody_address);
            let patch = IntentPatch {
                status: Some(if to_custody {
                    IntentStatus::Completed
                } else {
                    IntentStatus::FundsReceived
                }),
                external_transaction_id: Some(transfer.transaction_id.clone()),
                consolidation_transaction_id: to_custody
                    .then(|| CONSOLIDATION_SKIPPED_CUSTODY.to_string()),
                ..Default::default()
            };

            if self
                .store
                .update_conditional(intent.id, IntentStatus::Pending, patch)
                .await?
            {
                claimed.insert(intent.id);
                report.matched += 1;
                info!(
                    intent = %intent.id,
                    tx_id = transfer.transaction_id,
                    %amount,
                    custody_direct = to_custody,
                    "inbound transfer matched"
                );
            } else {
                // A concurrent cycle got there first; its write stands.
                debug!(
                    intent = %intent.id,
                    tx_id = transfer.transaction_id,
                    "match lost the conditional update, skipping"
                );
            }
        }

        Ok(report)
    }

    fn select_candidate<'a>(
        transfer: &ExternalTransfer,
        candidates: &[&'a PaymentIntent],
    ) -> Option<&'a PaymentIntent> {
        if candidates.is_empty() {
            return None;
        }

        // Memo match takes absolute precedence when it is unambiguous
        if let Some(memo) = &transfer.memo {
            let with_memo: Vec<&&PaymentIntent> = candidates
                .iter()
                .filter(|intent| intent.memo.as_deref() == Some(memo.as_str()))
                .collect();
            if with_memo.len() == 1 {
                return Some(*with_memo[0]);
            }
        }

        if candidates.len() > 1 {
            warn!(
                tx_id = transfer.transaction_id,
                candidates = candidates.len(),
                "amount-only match is ambiguous, selecting oldest intent"
            );
        }

        candidates
            .iter()
            .copied()
            .min_by_key(|intent| intent.created_at)
    }
}
