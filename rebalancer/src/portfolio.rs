//! Portfolio records and the request/response shapes of the service surface.

use serde::{Deserialize, Serialize};

use crate::allocation::Allocation;
use crate::diff::RebalanceTransaction;

pub const QUEUED_MESSAGE: &str = "Rebalance transactions queued for processing";
pub const AT_TARGET_MESSAGE: &str = "No rebalancing needed - portfolio already at target allocation";

/// A user's portfolio as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    pub user_id: String,
    /// Last allocation reported by the provider.
    pub allocation: Allocation,
    /// Target allocation to maintain.
    pub original_allocation: Allocation,
}

impl Portfolio {
    /// New portfolio whose target is its initial allocation.
    pub fn new(user_id: impl Into<String>, allocation: Allocation) -> Self {
        Self {
            user_id: user_id.into(),
            original_allocation: allocation.clone(),
            allocation,
        }
    }
}

/// Establish or overwrite a portfolio's target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePortfolioRequest {
    pub user_id: String,
    pub allocation: Allocation,
}

/// New current allocation reported by a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceRequest {
    pub user_id: String,
    pub new_allocation: Allocation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceResponse {
    pub user_id: String,
    pub transactions: Vec<RebalanceTransaction>,
    pub transaction_count: usize,
    pub message: String,
}

impl RebalanceResponse {
    pub fn new(user_id: &str, transactions: Vec<RebalanceTransaction>) -> Self {
        let message = if transactions.is_empty() {
            AT_TARGET_MESSAGE
        } else {
            QUEUED_MESSAGE
        };
        Self {
            user_id: user_id.to_string(),
            transaction_count: transactions.len(),
            transactions,
            message: message.to_string(),
        }
    }
}
