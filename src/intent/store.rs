use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::intent::models::{IntentStatus, PaymentIntent};

/// Fields a single state transition may set. `None` leaves the column
/// untouched.
#[derive(Debug, Clone, Default)]
pub struct IntentPatch {
    pub status: Option<IntentStatus>,
    pub external_transaction_id: Option<String>,
    pub consolidation_transaction_id: Option<String>,
    pub account_activated: Option<bool>,
}

/// Durable store of payment intents. Every status mutation goes through
/// `update_conditional`, guarded by the expected prior status, so concurrent
/// cycles get single-writer-wins-or-noop semantics without a global lock.
#[async_trait]
pub trait IntentStore: Send + Sync {
    async fn insert(&self, intent: &PaymentIntent) -> EngineResult<()>;

    async fn find_by_id(&self, id: Uuid) -> EngineResult<Option<PaymentIntent>>;

    /// The intent (if any) already satisfied by this inbound transfer
    async fn find_by_external_tx(&self, tx_id: &str) -> EngineResult<Option<PaymentIntent>>;

    /// All non-terminal intents, oldest first
    async fn find_open(&self) -> EngineResult<Vec<PaymentIntent>>;

    /// Apply the patch only if the intent still has the expected status.
    /// Returns whether the update was applied. Rejects illegal transitions
    /// before touching the store.
    async fn update_conditional(
        &self,
        id: Uuid,
        expected: IntentStatus,
        patch: IntentPatch,
    ) -> EngineResult<bool>;

    /// Bump the activation counter; marks the account activated on success
    async fn record_activation_attempt(&self, id: Uuid, activated: bool) -> EngineResult<()>;

    /// Bump the consolidation counter; returns the new count
    async fn record_consolidation_attempt(&self, id: Uuid) -> EngineResult<i32>;
}

/// Validate a patch's status change against the state machine. Shared by
/// every store implementation so an illegal transition can never reach
/// storage.
pub fn validate_patch(expected: IntentStatus, patch: &IntentPatch) -> EngineResult<()> {
    if let Some(to) = patch.status {
        if !expected.can_transition_to(to) {
            return Err(EngineError::InvalidTransition { from: expected, to });
        }
    }
    Ok(())
}

/// Postgres-backed intent store
pub struct PgIntentStore {
    pool: PgPool,
}

impl PgIntentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const INTENT_COLUMNS: &str = r#"
    id, destination_address, expected_amount, memo, status, source_credential,
    external_transaction_id, consolidation_transaction_id, account_activated,
    activation_attempts, consolidation_attempts, created_at, updated_at
"#;

#[async_trait]
impl IntentStore for PgIntentStore {
    async fn insert(&self, intent: &PaymentIntent) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO payment_intents (
                id, destination_address, expected_amount, memo, status,
                source_credential, account_activated, activation_attempts,
                consolidation_attempts, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(intent.id)
        .bind(&intent.destination_address)
        .bind(intent.expected_amount)
        .bind(&intent.memo)
        .bind(intent.status)
        .bind(&intent.source_credential)
        .bind(intent.account_activated)
        .bind(intent.activation_attempts)
        .bind(intent.consolidation_attempts)
        .bind(intent.created_at)
        .bind(intent.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> EngineResult<Option<PaymentIntent>> {
        let intent = sqlx::query_as::<_, PaymentIntent>(&format!(
            "SELECT {} FROM payment_intents WHERE id = $1",
            INTENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(intent)
    }

    async fn find_by_external_tx(&self, tx_id: &str) -> EngineResult<Option<PaymentIntent>> {
        let intent = sqlx::query_as::<_, PaymentIntent>(&format!(
            "SELECT {} FROM payment_intents WHERE external_transaction_id = $1",
            INTENT_COLUMNS
        ))
        .bind(tx_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(intent)
    }

    async fn find_open(&self) -> EngineResult<Vec<PaymentIntent>> {
        let intents = sqlx::query_as::<_, PaymentIntent>(&format!(
            r#"
            SELECT {}
            FROM payment_intents
            WHERE status IN ('pending', 'funds_received')
            ORDER BY created_at ASC
            "#,
            INTENT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(intents)
    }

    async fn update_conditional(
        &self,
        id: Uuid,
        expected: IntentStatus,
        patch: IntentPatch,
    ) -> EngineResult<bool> {
        validate_patch(expected, &patch)?;

        let result = sqlx::query(
            r#"
            UPDATE payment_intents
            SET status = COALESCE($3, status),
                external_transaction_id = COALESCE($4, external_transaction_id),
                consolidation_transaction_id = COALESCE($5, consolidation_transaction_id),
                account_activated = COALESCE($6, account_activated),
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id)
        .bind(expected)
        .bind(patch.status)
        .bind(patch.external_transaction_id)
        .bind(patch.consolidation_transaction_id)
        .bind(patch.account_activated)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_activation_attempt(&self, id: Uuid, activated: bool) -> EngineResult<()> {
        sqlx::query(
            r#"
            UPDATE payment_intents
            SET activation_attempts = activation_attempts + 1,
                account_activated = account_activated OR $2,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(activated)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_consolidation_attempt(&self, id: Uuid) -> EngineResult<i32> {
        let attempts: i32 = sqlx::query_scalar(
            r#"
            UPDATE payment_intents
            SET consolidation_attempts = consolidation_attempts + 1,
                updated_at = NOW()
            WHERE id = $1
            RETURNING consolidation_attempts
            "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        Ok(attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_with_illegal_transition_is_rejected() {
        let patch = IntentPatch {
            status: Some(IntentStatus::Pending),
            ..Default::default()
        };
        let result = validate_patch(IntentStatus::Completed, &patch);
        assert!(matches!(
            result,
            Err(EngineError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn patch_without_status_change_is_always_valid() {
        let patch = IntentPatch {
            account_activated: Some(true),
            ..Default::default()
        };
        assert!(validate_patch(IntentStatus::Completed, &patch).is_ok());
    }
}
