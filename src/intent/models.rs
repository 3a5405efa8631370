use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use sqlx::Type;
use uuid::Uuid;

/// Sentinel consolidation id for intents that receive directly at the
/// custody wallet: there is nothing to consolidate, and the presence of
/// this value marks the decision rather than a real transaction.
pub const CONSOLIDATION_SKIPPED_CUSTODY: &str = "CUSTODY_DIRECT_NO_CONSOLIDATION";

/// Intent status state machine.
///
/// Valid transitions:
/// - Pending → FundsReceived, Completed (match and consolidation in the
///   same cycle, or custody-direct), Failed
/// - FundsReceived → Completed, Failed
/// - Terminal states (Completed, Failed) → NO TRANSITIONS ALLOWED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "intent_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    Pending,
    FundsReceived,
    Completed,
    Failed,
}

impl IntentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentStatus::Pending => "pending",
            IntentStatus::FundsReceived => "funds_received",
            IntentStatus::Completed => "completed",
            IntentStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, IntentStatus::Completed | IntentStatus::Failed)
    }

    pub fn can_transition_to(&self, to: IntentStatus) -> bool {
        match self {
            IntentStatus::Pending => matches!(
                to,
                IntentStatus::FundsReceived | IntentStatus::Completed | IntentStatus::Failed
            ),
            IntentStatus::FundsReceived => {
                matches!(to, IntentStatus::Completed | IntentStatus::Failed)
            }
            IntentStatus::Completed | IntentStatus::Failed => false,
        }
    }
}

/// The unit of work: one expected inbound payment and its consolidation
/// into custody. Never physically deleted; this is the audit trail.
#[derive(Debug, Clone, FromRow)]
pub struct PaymentIntent {
    pub id: Uuid,
    pub destination_address: String,
    pub expected_amount: Decimal,
    pub memo: Option<String>,
    pub status: IntentStatus,
    /// Credential for originating the outbound transfer from the
    /// intermediate address; absent for custody-direct intents
    pub source_credential: Option<String>,
    /// Inbound transfer that satisfied this intent; set at most once
    pub external_transaction_id: Option<String>,
    /// Outbound transfer to custody; set at most once, by consolidation
    pub consolidation_transaction_id: Option<String>,
    pub account_activated: bool,
    pub activation_attempts: i32,
    pub consolidation_attempts: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentIntent {
    pub fn new(
        destination_address: String,
        expected_amount: Decimal,
        memo: Option<String>,
        source_credential: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            destination_address,
            expected_amount,
            memo,
            status: IntentStatus::Pending,
            source_credential,
            external_transaction_id: None,
            consolidation_transaction_id: None,
            account_activated: false,
            activation_attempts: 0,
            consolidation_attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_custody_direct(&self, custody_address: &str) -> bool {
        self.destination_address == custody_address
    }

    /// Eligible for a consolidation attempt this cycle
    pub fn needs_consolidation(&self) -> bool {
        !self.status.is_terminal() && self.consolidation_transaction_id.is_none()
    }
}

/// Externally visible projection of an intent. The source credential never
/// leaves the engine.
#[derive(Debug, Clone, Serialize)]
pub struct IntentView {
    pub id: Uuid,
    pub destination_address: String,
    pub expected_amount: Decimal,
    pub memo: Option<String>,
    pub status: IntentStatus,
    pub external_transaction_id: Option<String>,
    pub consolidation_transaction_id: Option<String>,
    pub account_activated: bool,
    pub activation_attempts: i32,
    pub consolidation_attempts: i32,
    /// Live balance at the destination, included while the intent is
    /// still pending
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_balance: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IntentView {
    pub fn from_intent(intent: PaymentIntent, current_balance: Option<Decimal>) -> Self {
        Self {
            id: intent.id,
            destination_address: intent.destination_address,
            expected_amount: intent.expected_amount,
            memo: intent.memo,
            status: intent.status,
            external_transaction_id: intent.external_transaction_id,
            consolidation_transaction_id: intent.consolidation_transaction_id,
            account_activated: intent.account_activated,
            activation_attempts: intent.activation_attempts,
            consolidation_attempts: intent.consolidation_attempts,
            current_balance,
            created_at: intent.created_at,
            updated_at: intent.updated_at,
        }
    }
}
