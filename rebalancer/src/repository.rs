//! Typed access to portfolios and transactions over a [`Store`].
//!
//! Every call is bounded by the configured deadline; an expired deadline is
//! reported as [`Error::Timeout`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::debug;

use crate::diff::RebalanceTransaction;
use crate::error::{Error, Result};
use crate::portfolio::Portfolio;
use crate::store::{Collection, Store, StoreError};

fn corrupt(msg: String) -> Error {
    Error::Store(StoreError::Database(msg))
}

async fn with_deadline<T, F>(operation: &'static str, after: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(after, fut)
        .await
        .map_err(|_| Error::Timeout { operation, after })?
}

#[derive(Clone)]
pub struct PortfolioRepository {
    store: Arc<dyn Store>,
    timeout: Duration,
}

impl PortfolioRepository {
    pub fn new(store: Arc<dyn Store>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub async fn save(&self, portfolio: &Portfolio) -> Result<()> {
        let body = serde_json::to_vec(portfolio)
            .map_err(|e| corrupt(format!("unserializable portfolio: {e}")))?;
        with_deadline("save portfolio", self.timeout, async {
            self.store
                .put(Collection::Portfolios, &portfolio.user_id, &body)
                .await?;
            Ok(())
        })
        .await?;
        debug!("Portfolio saved for user {}", portfolio.user_id);
        Ok(())
    }

    /// Load a portfolio, [`Error::PortfolioNotFound`] when none is stored.
    pub async fn get(&self, user_id: &str) -> Result<Portfolio> {
        let record = with_deadline("load portfolio", self.timeout, async {
            Ok(self.store.get(Collection::Portfolios, user_id).await?)
        })
        .await?
        .ok_or_else(|| Error::PortfolioNotFound(user_id.to_string()))?;

        serde_json::from_slice(&record)
            .map_err(|e| corrupt(format!("corrupt portfolio record for user {user_id}: {e}")))
    }
}

#[derive(Clone)]
pub struct TransactionRepository {
    store: Arc<dyn Store>,
    timeout: Duration,
}

impl TransactionRepository {
    pub fn new(store: Arc<dyn Store>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Persist under [`RebalanceTransaction::storage_key`]; repeating the call
    /// rewrites the same record.
    pub async fn save(&self, tx: &RebalanceTransaction) -> Result<()> {
        let key = tx.storage_key();
        let persistence = |reason: String| Error::Persistence {
            key: key.clone(),
            reason,
        };

        let body = serde_json::to_vec(tx).map_err(|e| persistence(e.to_string()))?;
        with_deadline("save transaction", self.timeout, async {
            Ok(self
                .store
                .put(Collection::RebalanceTransactions, &key, &body)
                .await?)
        })
        .await
        .map_err(|e| persistence(e.to_string()))?;

        debug!(
            "Rebalance transaction saved: user={} action={} asset={} percent={:.2}%",
            tx.user_id, tx.action, tx.asset, tx.rebalance_percent
        );
        Ok(())
    }

    /// Transactions recorded for `user_id`, in key order.
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<RebalanceTransaction>> {
        let prefix = format!("{user_id}_");
        let records = with_deadline("list transactions", self.timeout, async {
            Ok(self
                .store
                .scan(Collection::RebalanceTransactions, &prefix)
                .await?)
        })
        .await?;

        let mut transactions = Vec::with_capacity(records.len());
        for (key, body) in records {
            let tx: RebalanceTransaction = serde_json::from_slice(&body)
                .map_err(|e| corrupt(format!("corrupt transaction record {key}: {e}")))?;
            // "a_" also prefixes user "a_b"
            if tx.user_id == user_id {
                transactions.push(tx);
            }
        }
        Ok(transactions)
    }
}
