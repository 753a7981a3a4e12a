use std::time::Duration;
use tokio::sync::broadcast;
use transaction_batcher::application::services::ServiceError;
use transaction_batcher::domain::batch::BatchStatus;
use transaction_batcher::domain::error::ErrorKind;
use transaction_batcher::domain::events::{EventRecord, SettlementEvent};
use transaction_batcher::domain::ports::AssetLedger;
use transaction_batcher::interfaces::cli::setup::Setup;
use transaction_batcher::interfaces::{LaunchOptions, Network};
use transaction_batcher::shared::protocol::{AccountId, Amount, BatchHandle, BatchType, Domain};

async fn launch(options: LaunchOptions) -> Network {
    Network::launch(&Setup::default(), options)
        .await
        .expect("两个域启动失败")
}

fn fund(network: &Network, name: &str, amount: Amount) -> AccountId {
    let user = AccountId::new(name);
    network.ledger.mint(&network.base_asset, &user, amount).unwrap();
    network
        .ledger
        .approve(&network.base_asset, &user, &network.custody, Amount::MAX);
    for token in &network.tokens {
        network.ledger.approve(token, &user, &network.custody, Amount::MAX);
    }
    user
}

async fn wait_processed(
    events: &mut broadcast::Receiver<EventRecord>,
    domain: Domain,
    handle: BatchHandle,
) {
    let wait = async {
        loop {
            let record = events.recv().await.expect("事件流关闭");
            if record.event == (SettlementEvent::BatchProcessed { domain, handle }) {
                return;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("等待批次处理超时");
}

/// 三个用户分别存入三个组合：汇总 [50, 80, 60]
async fn deposit_reference_batch(network: &Network) -> (AccountId, AccountId, AccountId) {
    let alice = fund(network, "alice", 1_000);
    let bob = fund(network, "bob", 1_000);
    let carl = fund(network, "carl", 1_000);

    network.batcher.deposit(&alice, 50, 0).await.unwrap();
    network.batcher.deposit(&bob, 80, 1).await.unwrap();
    network.batcher.deposit(&carl, 60, 2).await.unwrap();
    (alice, bob, carl)
}

async fn fire(network: &Network, batch_type: BatchType) -> BatchHandle {
    let mut child = network.batcher.subscribe();
    let handle = network
        .batcher
        .execute_batch(&network.operator, batch_type)
        .await
        .unwrap();
    wait_processed(&mut child, Domain::Child, handle).await;
    handle
}

#[tokio::test]
async fn test_deposit_round_trip_distributes_minted_tokens() {
    let network = launch(LaunchOptions {
        auto_relay: true,
        ..Default::default()
    })
    .await;
    let (alice, bob, carl) = deposit_reference_batch(&network).await;
    assert_eq!(network.ledger.balance_of(&network.base_asset, &alice), 950);

    let handle = fire(&network, BatchType::Deposit).await;
    assert_eq!(handle, BatchHandle::deposit(0));

    let snapshot = network.batcher.snapshot().await.unwrap();
    let batch = snapshot.batch(BatchType::Deposit, 0).unwrap();
    assert_eq!(batch.status, BatchStatus::Processed);
    assert_eq!(batch.totals, vec![50, 80, 60]);
    assert_eq!(batch.result, vec![27, 68]);
    assert_eq!(snapshot.deposit_batch_id, 1);

    let allocation = network
        .batcher
        .distribute(&network.operator, 0)
        .await
        .unwrap();
    assert_eq!(allocation.shares[&alice], vec![5, 10]);
    assert_eq!(allocation.shares[&bob], vec![16, 40]);
    assert_eq!(allocation.shares[&carl], vec![6, 18]);
    assert_eq!(allocation.dust, vec![0, 0]);

    let ra = &network.tokens[0];
    let by = &network.tokens[1];
    assert_eq!(network.ledger.balance_of(ra, &bob), 16);
    assert_eq!(network.ledger.balance_of(by, &carl), 18);

    // 已结算批次不能重复分发
    let err = network
        .batcher
        .distribute(&network.operator, 0)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Precondition);
    assert_eq!(network.ledger.balance_of(ra, &bob), 16);

    network.shutdown().await;
}

#[tokio::test]
async fn test_sell_round_trip_pays_yield() {
    let network = launch(LaunchOptions {
        auto_relay: true,
        ..Default::default()
    })
    .await;
    let (alice, bob, _carl) = deposit_reference_batch(&network).await;
    fire(&network, BatchType::Deposit).await;
    network
        .batcher
        .distribute(&network.operator, 0)
        .await
        .unwrap();

    // 每 10000 单位基础资产只再换得 8000 个代币：每个代币赎回更多基础资产
    network.protocols[0].set_rate_bps(8_000);

    network.batcher.sell(&alice, vec![10_000, 10_000]).await.unwrap();
    network.batcher.sell(&bob, vec![5_000, 5_000]).await.unwrap();

    let handle = fire(&network, BatchType::Sell).await;
    assert_eq!(handle, BatchHandle::sell(0));

    let snapshot = network.batcher.snapshot().await.unwrap();
    let batch = snapshot.batch(BatchType::Sell, 0).unwrap();
    assert_eq!(batch.totals, vec![13, 30]);
    assert_eq!(batch.result, vec![16, 30]);

    let allocation = network
        .batcher
        .retrieve(&network.operator, 0)
        .await
        .unwrap();
    assert_eq!(allocation.shares[&alice], 16);
    assert_eq!(allocation.shares[&bob], 29);
    assert_eq!(allocation.dust, vec![1, 0]);

    assert_eq!(network.ledger.balance_of(&network.base_asset, &alice), 950 + 16);
    assert_eq!(network.ledger.balance_of(&network.tokens[0], &alice), 0);

    let snapshot = network.batcher.snapshot().await.unwrap();
    assert_eq!(snapshot.deposit_per_user[&alice], 34);
    assert_eq!(snapshot.deposit_per_user[&bob], 51);

    network.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_delivery_settles_once() {
    let network = launch(LaunchOptions {
        auto_relay: true,
        duplicate_delivery: true,
        ..Default::default()
    })
    .await;
    let (alice, bob, carl) = deposit_reference_batch(&network).await;

    fire(&network, BatchType::Deposit).await;
    let allocation = network
        .batcher
        .distribute(&network.operator, 0)
        .await
        .unwrap();
    assert_eq!(allocation.shares[&alice], vec![5, 10]);

    let ra = &network.tokens[0];
    let by = &network.tokens[1];
    let root = network.router.snapshot().await.unwrap();
    assert_eq!(root.processed, 1);
    assert!(root.pending.is_empty());

    // 第二个存款批次独立于第一个
    network.batcher.deposit(&carl, 100, 0).await.unwrap();
    fire(&network, BatchType::Deposit).await;
    network
        .batcher
        .distribute(&network.operator, 1)
        .await
        .unwrap();

    assert_eq!(network.ledger.balance_of(ra, &alice), 5);
    assert_eq!(network.ledger.balance_of(by, &bob), 40);
    // 100 * [1000, 2000] / 10000 = [10, 20]
    assert_eq!(network.ledger.balance_of(ra, &carl), 6 + 10);
    assert_eq!(network.ledger.balance_of(by, &carl), 18 + 20);

    let root = network.router.snapshot().await.unwrap();
    assert_eq!(root.processed, 2);

    network.shutdown().await;
}

#[tokio::test]
async fn test_failed_relay_can_be_retried() {
    let network = launch(LaunchOptions {
        auto_relay: false,
        ..Default::default()
    })
    .await;
    deposit_reference_batch(&network).await;

    let mut root_events = network.router.subscribe();
    let handle = network
        .batcher
        .execute_batch(&network.operator, BatchType::Deposit)
        .await
        .unwrap();
    wait_processed(&mut root_events, Domain::Root, handle).await;

    let root = network.router.snapshot().await.unwrap();
    assert_eq!(root.pending.len(), 1);
    assert_eq!(root.pending[0].amounts, vec![27, 68]);

    network.tunnel.set_online(false);
    let err = network
        .router
        .relay(&network.operator, handle)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Collaborator);
    assert_eq!(network.router.snapshot().await.unwrap().pending.len(), 1);

    // 非运营者不能回传
    let err = network
        .router
        .relay(&AccountId::new("mallory"), handle)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Router(_)));
    assert_eq!(err.kind(), ErrorKind::Authorization);

    network.tunnel.set_online(true);
    let mut child_events = network.batcher.subscribe();
    network.router.relay(&network.operator, handle).await.unwrap();
    wait_processed(&mut child_events, Domain::Child, handle).await;
    assert!(network.router.snapshot().await.unwrap().pending.is_empty());

    let err = network
        .router
        .relay(&network.operator, handle)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Precondition);

    network.shutdown().await;
}

#[tokio::test]
async fn test_sell_amounts_relay_unweighted() {
    let network = launch(LaunchOptions {
        auto_relay: true,
        ..Default::default()
    })
    .await;
    let alice = fund(&network, "alice", 1_000);

    // Balanced 组合 [2000, 5000]：铸造 [200, 500]
    network.batcher.deposit(&alice, 1_000, 1).await.unwrap();
    fire(&network, BatchType::Deposit).await;
    network
        .batcher
        .distribute(&network.operator, 0)
        .await
        .unwrap();
    assert_eq!(network.ledger.balance_of(&network.tokens[0], &alice), 200);
    assert_eq!(network.ledger.balance_of(&network.tokens[1], &alice), 500);

    network.batcher.sell(&alice, vec![3_500, 1_800]).await.unwrap();
    fire(&network, BatchType::Sell).await;

    let snapshot = network.batcher.snapshot().await.unwrap();
    let batch = snapshot.batch(BatchType::Sell, 0).unwrap();
    assert_eq!(batch.totals, vec![70, 90]);
    assert_eq!(batch.result, vec![70, 90]);

    let allocation = network
        .batcher
        .retrieve(&network.operator, 0)
        .await
        .unwrap();
    assert_eq!(allocation.shares[&alice], 160);
    assert_eq!(network.ledger.balance_of(&network.base_asset, &alice), 160);

    network.shutdown().await;
}
