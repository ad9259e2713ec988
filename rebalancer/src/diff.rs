//! CURRENT→TARGET drift engine.
//!
//! Computes the transactions needed to move a portfolio from its current
//! allocation back to its target allocation. Amounts are expressed in
//! percentage points of the portfolio; the direction is carried by [`Action`].

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::allocation::Allocation;

/// Differences below this many percentage points are treated as noise.
pub const DRIFT_TOLERANCE: f64 = 0.01;

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Buy,
    Sell,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Buy => write!(f, "BUY"),
            Action::Sell => write!(f, "SELL"),
        }
    }
}

/// A single rebalance instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceTransaction {
    pub user_id: String,
    pub action: Action,
    pub asset: String,
    /// Always >= 0.
    pub rebalance_percent: f64,
    /// RFC 3339 UTC, shared by every transaction of one batch.
    pub timestamp: String,
}

impl RebalanceTransaction {
    /// Persistence key: `{user_id}_{asset}_{timestamp}`.
    ///
    /// Saving the same transaction twice overwrites the same record.
    pub fn storage_key(&self) -> String {
        format!("{}_{}_{}", self.user_id, self.asset, self.timestamp)
    }
}

/// Ordered transactions sharing one timestamp. Empty means "no action needed".
pub type TransactionBatch = Vec<RebalanceTransaction>;

/// Format a batch timestamp.
///
/// Microsecond precision keeps two batches for the same user apart unless they
/// are computed within the same microsecond.
pub fn batch_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Compute the rebalance batch stamped with the current wall-clock time.
pub fn calculate(current: &Allocation, target: &Allocation, user_id: &str) -> TransactionBatch {
    compute_drift(current, target, user_id, &batch_timestamp(Utc::now()))
}

/// Compute the rebalance batch from `current` to `target`.
///
/// Target assets come first in ascending asset order, followed by assets held
/// in `current` but absent from `target`, which are sold off entirely.
pub fn compute_drift(
    current: &Allocation,
    target: &Allocation,
    user_id: &str,
    timestamp: &str,
) -> TransactionBatch {
    let mut batch = Vec::new();

    // 1. Move each target asset back to its weight
    for (asset, target_percent) in target.iter() {
        let current_percent = current.get(asset).unwrap_or(0.0);
        let diff = current_percent - target_percent;

        if diff.abs() < DRIFT_TOLERANCE {
            continue;
        }

        let action = if diff > 0.0 { Action::Sell } else { Action::Buy };
        batch.push(transaction(user_id, action, asset, diff.abs(), timestamp));
    }

    // 2. Divest assets that left the target mix
    for (asset, current_percent) in current.iter() {
        if target.contains(asset) || current_percent <= DRIFT_TOLERANCE {
            continue;
        }
        batch.push(transaction(
            user_id,
            Action::Sell,
            asset,
            current_percent,
            timestamp,
        ));
    }

    batch
}

fn transaction(
    user_id: &str,
    action: Action,
    asset: &str,
    rebalance_percent: f64,
    timestamp: &str,
) -> RebalanceTransaction {
    RebalanceTransaction {
        user_id: user_id.to_string(),
        action,
        asset: asset.to_string(),
        rebalance_percent,
        timestamp: timestamp.to_string(),
    }
}
