//! portfolio-rebalancer: keeps user portfolios at their target allocation.
//!
//! A provider reports a user's current allocation; the service diffs it
//! against the stored target and publishes the resulting BUY/SELL
//! instructions to a queue. A consumer drains the queue and persists every
//! instruction idempotently, independent of the request that produced it.

pub mod allocation;
pub mod backend;
pub mod config;
pub mod consumer;
pub mod diff;
pub mod error;
pub mod orchestrator;
pub mod portfolio;
pub mod publisher;
pub mod queue;
pub mod repository;
pub mod session;
pub mod store;
