use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// An asset transfer observed on the external ledger. Read-only input to
/// matching; never mutated by this engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalTransfer {
    pub transaction_id: String,
    pub from_address: String,
    pub to_address: String,
    pub asset_contract: String,
    pub atomic_amount: u64,
    /// Best-effort decode of the raw transaction payload
    pub memo: Option<String>,
    pub observed_at: DateTime<Utc>,
}

/// Confirmation state of a submitted transaction as reported by the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationState {
    Pending,
    Confirmed,
    Failed,
}

/// The two independent kinds of transient execution capacity an address
/// needs to originate a transaction without holding its own reserves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceClass {
    Bandwidth,
    Energy,
}

impl ResourceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceClass::Bandwidth => "bandwidth",
            ResourceClass::Energy => "energy",
        }
    }
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Current execution capacity at an address
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AccountResources {
    pub bandwidth: u64,
    pub energy: u64,
}

/// A freshly generated ledger account. The credential is whatever the
/// signing gateway needs back to originate a transfer from this address.
#[derive(Debug, Clone, Deserialize)]
pub struct GeneratedAccount {
    pub address: String,
    pub credential: String,
}
