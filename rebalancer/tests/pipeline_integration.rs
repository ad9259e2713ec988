//! Integration tests for the publish → consume → persist pipeline on the
//! redb backends.

use std::sync::Arc;
use std::time::Duration;

use portfolio_rebalancer::allocation::Allocation;
use portfolio_rebalancer::backend;
use portfolio_rebalancer::config::Config;
use portfolio_rebalancer::consumer::{ConsumerState, DEFAULT_GROUP, MessageOutcome};
use portfolio_rebalancer::diff::{Action, RebalanceTransaction};
use portfolio_rebalancer::error::Error;
use portfolio_rebalancer::orchestrator::RebalanceService;
use portfolio_rebalancer::portfolio::{CreatePortfolioRequest, RebalanceRequest};
use portfolio_rebalancer::session;
use portfolio_rebalancer::queue::{DiskQueue, Queue, QueueReader};
use portfolio_rebalancer::store::{DiskStore, Store};

fn disk_config(dir: &tempfile::TempDir) -> Config {
    let toml = format!(
        r#"
[store]
path = {:?}
timeout_secs = 2

[queue]
path = {:?}
publish_timeout_secs = 2
poll_interval_ms = 20
retry_delay_ms = 20
"#,
        dir.path().join("store.redb").display().to_string(),
        dir.path().join("queue.redb").display().to_string(),
    );
    Config::parse(&toml).unwrap()
}

fn target() -> Allocation {
    Allocation::from([("stocks", 60.0), ("bonds", 40.0)])
}

async fn create(svc: &RebalanceService, user: &str, allocation: Allocation) {
    svc.create_portfolio(CreatePortfolioRequest {
        user_id: user.into(),
        allocation,
    })
    .await
    .unwrap();
}

async fn wait_for_history(svc: &RebalanceService, user: &str, n: usize) -> Vec<RebalanceTransaction> {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let history = svc.transactions(user).await.unwrap();
            if history.len() >= n {
                return history;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("consumer should persist the batch")
}

// ============================================================================
// End to end
// ============================================================================

#[tokio::test]
async fn rebalance_is_persisted_by_consumer() {
    let dir = tempfile::tempdir().unwrap();
    let config = disk_config(&dir);
    let store = backend::open_store(&config).unwrap();
    let queue = backend::open_queue(&config);
    assert!(queue.is_configured());

    let svc = backend::service(&config, store.clone(), queue.clone());
    create(&svc, "u1", target()).await;

    let mut handle = backend::consumer(&config, store, queue.clone()).spawn();
    handle.wait_for(ConsumerState::Running).await;

    // stray message ahead of the batch is skipped
    queue.publish(b"not json").await.unwrap();

    let response = svc
        .rebalance(RebalanceRequest {
            user_id: "u1".into(),
            new_allocation: Allocation::from([("stocks", 50.0), ("bonds", 30.0), ("gold", 20.0)]),
        })
        .await
        .unwrap();
    assert_eq!(response.transaction_count, 3);

    let history = wait_for_history(&svc, "u1", 3).await;
    handle.shutdown().await;

    let find = |asset: &str| history.iter().find(|t| t.asset == asset).unwrap();
    assert_eq!(find("stocks").action, Action::Buy);
    assert_eq!(find("stocks").rebalance_percent, 10.0);
    assert_eq!(find("bonds").action, Action::Buy);
    assert_eq!(find("bonds").rebalance_percent, 10.0);
    assert_eq!(find("gold").action, Action::Sell);
    assert_eq!(find("gold").rebalance_percent, 20.0);
    assert!(history.iter().all(|t| t.timestamp == history[0].timestamp));
}

#[tokio::test]
async fn requests_and_consumer_share_one_set_of_backends() {
    let dir = tempfile::tempdir().unwrap();
    let config = disk_config(&dir);
    let store = backend::open_store(&config).unwrap();
    let queue = backend::open_queue(&config);

    // the files are locked to this process
    assert!(backend::open_store(&config).is_err());

    let mut handle = backend::consumer(&config, store.clone(), queue.clone()).spawn();
    handle.wait_for(ConsumerState::Running).await;
    let svc = backend::service(&config, store, queue);

    let input = concat!(
        r#"{"op": "create", "user_id": "u1", "allocation": {"stocks": 60, "bonds": 40}}"#,
        "\n",
        r#"{"op": "rebalance", "user_id": "u1", "new_allocation": {"stocks": 100}}"#,
        "\n",
    );
    let mut output = Vec::new();
    let answered = session::serve(&svc, input.as_bytes(), &mut output)
        .await
        .unwrap();
    assert_eq!(answered, 2);
    assert!(String::from_utf8(output).unwrap().contains("\"transaction_count\":2"));

    let history = wait_for_history(&svc, "u1", 2).await;
    handle.shutdown().await;
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn sum_error_reports_the_total() {
    let dir = tempfile::tempdir().unwrap();
    let config = disk_config(&dir);
    let svc = backend::service(
        &config,
        backend::open_store(&config).unwrap(),
        backend::open_queue(&config),
    );

    let err = svc
        .create_portfolio(CreatePortfolioRequest {
            user_id: "u1".into(),
            allocation: Allocation::from([("stocks", 60.0), ("bonds", 30.0), ("gold", 15.0)]),
        })
        .await
        .unwrap_err();

    assert!(matches!(err, Error::InvalidAllocation(_)));
    assert!(err.to_string().contains("105.00"));
    assert!(err.is_client_error());
}

// ============================================================================
// Durability
// ============================================================================

#[tokio::test]
async fn portfolio_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = disk_config(&dir);
    {
        let svc = backend::service(
            &config,
            backend::open_store(&config).unwrap(),
            backend::open_queue(&config),
        );
        create(&svc, "u1", target()).await;
    }

    let svc = backend::service(
        &config,
        backend::open_store(&config).unwrap(),
        backend::open_queue(&config),
    );
    let portfolio = svc.get_portfolio("u1").await.unwrap();
    assert_eq!(portfolio.original_allocation, target());
}

#[tokio::test]
async fn uncommitted_batch_is_redelivered_and_saved_once() {
    let dir = tempfile::tempdir().unwrap();
    let config = disk_config(&dir);
    let queue_path = dir.path().join("queue.redb");

    let payload = {
        let store = backend::open_store(&config).unwrap();
        let queue = backend::open_queue(&config);
        let svc = backend::service(&config, store.clone(), queue.clone());
        create(&svc, "u1", target()).await;
        svc.rebalance(RebalanceRequest {
            user_id: "u1".into(),
            new_allocation: Allocation::from([("stocks", 100.0)]),
        })
        .await
        .unwrap();

        // first delivery is processed but the commit never happens
        let mut reader = queue.subscribe(DEFAULT_GROUP).await.unwrap();
        let delivery = reader.receive().await.unwrap();
        let consumer = backend::consumer(&config, store, queue.clone());
        assert_eq!(
            consumer.handle_message(&delivery.payload).await,
            MessageOutcome::Processed { saved: 2, failed: 0 }
        );
        delivery.payload
    };

    // after a restart the same group sees the batch again
    let queue = DiskQueue::open(&queue_path, &config.queue.topic, config.poll_interval()).unwrap();
    assert_eq!(queue.committed(DEFAULT_GROUP).unwrap(), 0);
    let mut reader = queue.subscribe(DEFAULT_GROUP).await.unwrap();
    let redelivered = reader.receive().await.unwrap();
    assert_eq!(redelivered.offset, 0);
    assert_eq!(redelivered.payload, payload);

    let store = DiskStore::open(&dir.path().join("store.redb")).unwrap();
    let store: Arc<dyn Store> = Arc::new(store);
    let queue: Arc<dyn Queue> = Arc::new(queue);
    let consumer = backend::consumer(&config, store.clone(), queue.clone());
    consumer.handle_message(&redelivered.payload).await;
    reader.commit(&redelivered).await.unwrap();

    let svc = backend::service(&config, store, queue);
    let history = svc.transactions("u1").await.unwrap();
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn consumer_resumes_after_committed_offset() {
    let dir = tempfile::tempdir().unwrap();
    let config = disk_config(&dir);

    {
        let store = backend::open_store(&config).unwrap();
        let queue = backend::open_queue(&config);
        let svc = backend::service(&config, store.clone(), queue.clone());
        create(&svc, "u1", target()).await;
        svc.rebalance(RebalanceRequest {
            user_id: "u1".into(),
            new_allocation: Allocation::from([("stocks", 100.0)]),
        })
        .await
        .unwrap();

        let handle = backend::consumer(&config, store, queue).spawn();
        wait_for_history(&svc, "u1", 2).await;
        handle.shutdown().await;
    }

    let queue = DiskQueue::open(
        &dir.path().join("queue.redb"),
        &config.queue.topic,
        config.poll_interval(),
    )
    .unwrap();
    assert_eq!(queue.committed(DEFAULT_GROUP).unwrap(), 1);
    assert_eq!(queue.next_offset().unwrap(), 1);
}
