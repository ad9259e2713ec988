//! Rebalance orchestrator: validate → load target → diff → publish → update.
//!
//! This is the request-side workflow that ties together all components. The
//! consumer side runs independently and only meets this code through the
//! queue and the store.

use log::{error, info, warn};

use crate::allocation::Allocation;
use crate::diff::{self, RebalanceTransaction};
use crate::error::{Error, Result};
use crate::portfolio::{CreatePortfolioRequest, Portfolio, RebalanceRequest, RebalanceResponse};
use crate::publisher::TransactionPublisher;
use crate::repository::{PortfolioRepository, TransactionRepository};

#[derive(Clone)]
pub struct RebalanceService {
    portfolios: PortfolioRepository,
    transactions: TransactionRepository,
    publisher: TransactionPublisher,
}

fn require_user_id(user_id: &str) -> Result<()> {
    if user_id.is_empty() {
        return Err(Error::InvalidRequest(
            "user_id is required and cannot be empty".into(),
        ));
    }
    Ok(())
}

impl RebalanceService {
    pub fn new(
        portfolios: PortfolioRepository,
        transactions: TransactionRepository,
        publisher: TransactionPublisher,
    ) -> Self {
        Self {
            portfolios,
            transactions,
            publisher,
        }
    }

    /// Establish (or overwrite) a portfolio whose target is `allocation`.
    pub async fn create_portfolio(&self, req: CreatePortfolioRequest) -> Result<Portfolio> {
        require_user_id(&req.user_id)?;
        req.allocation.validate()?;

        let portfolio = Portfolio::new(req.user_id, req.allocation);
        self.portfolios.save(&portfolio).await?;
        info!("Portfolio created for user {}", portfolio.user_id);
        Ok(portfolio)
    }

    pub async fn get_portfolio(&self, user_id: &str) -> Result<Portfolio> {
        require_user_id(user_id)?;
        self.portfolios.get(user_id).await
    }

    /// Transactions the consumer has persisted for `user_id`.
    pub async fn transactions(&self, user_id: &str) -> Result<Vec<RebalanceTransaction>> {
        require_user_id(user_id)?;
        self.transactions.list_for_user(user_id).await
    }

    /// Handle a provider-reported allocation.
    ///
    /// A publish failure fails the request: nothing was queued. Once the batch
    /// is queued, failing to record the new current allocation is only logged.
    pub async fn rebalance(&self, req: RebalanceRequest) -> Result<RebalanceResponse> {
        // 1. Validate
        require_user_id(&req.user_id)?;
        req.new_allocation.validate()?;

        // 2. Load target
        let mut portfolio = self.portfolios.get(&req.user_id).await?;

        // 3. Diff
        let batch = diff::calculate(
            &req.new_allocation,
            &portfolio.original_allocation,
            &req.user_id,
        );

        // 4. Publish
        if let Err(e) = self.publisher.publish(&batch).await {
            error!("Failed to publish transactions for user {}: {e}", req.user_id);
            return Err(e);
        }
        if batch.is_empty() {
            info!(
                "No rebalancing needed for user {} - portfolio already at target allocation",
                req.user_id
            );
        } else if !self.publisher.is_durable() {
            warn!(
                "Queue not configured; {} transactions for user {} were not recorded",
                batch.len(),
                req.user_id
            );
        } else {
            info!(
                "Published {} transactions for user {}",
                batch.len(),
                req.user_id
            );
        }

        // 5. Record the reported allocation
        self.record_current(&mut portfolio, req.new_allocation).await;

        Ok(RebalanceResponse::new(&req.user_id, batch))
    }

    async fn record_current(&self, portfolio: &mut Portfolio, allocation: Allocation) {
        portfolio.allocation = allocation;
        if let Err(e) = self.portfolios.save(portfolio).await {
            error!(
                "Failed to update portfolio for user {}: {e}",
                portfolio.user_id
            );
        }
    }
}
