mod common;

use common::{
    Recorder, accept, answer_subscriptions, config, eventually, header, header_json, mem_manager,
    numbers,
};
use explorer_realtime::{
    ConnectionState, KindSet, ManagerState, RefreshError, SubscribeOptions, Update, UpdateKind,
};
use serde_json::json;
use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::time::timeout;

fn mempool(pending: u64) -> serde_json::Value {
    json!({ "pending": format!("{pending:#x}"), "queued": "0x0" })
}

#[tokio::test]
async fn delivers_blocks_and_caches_them() {
    let (manager, mut node) = mem_manager(config());
    let blocks = Recorder::default();
    let _sub = manager.subscribe(
        "block-list",
        blocks.handler(),
        SubscribeOptions::new().with_kind(UpdateKind::NewBlock),
    );
    assert_eq!(manager.connection_status().manager, ManagerState::Uninitialized);

    let mut session = accept(&mut node).await;
    let ids = answer_subscriptions(&mut session, 1, 0).await;
    eventually("ready", || manager.connection_status().manager == ManagerState::Ready).await;

    session.notify(&ids["newHeads"], header_json(1));
    session.notify(&ids["newHeads"], header_json(2));
    eventually("two blocks", || blocks.block_numbers() == vec![1, 2]).await;

    assert_eq!(numbers(&manager.cached_blocks()), vec![2, 1]);
    let status = manager.connection_status();
    assert_eq!(status.state, ConnectionState::Connected);
    assert!(status.last_update_at.is_some());
}

#[tokio::test]
async fn block_cache_keeps_newest_first() {
    let (manager, mut node) = mem_manager(config().with_block_cache_size(3));
    let seen = Recorder::default();
    let interest = KindSet::only(UpdateKind::NewBlock).with(UpdateKind::MempoolUpdate);
    let _sub =
        manager.subscribe("explorer", seen.handler(), SubscribeOptions::new().with_interest(interest));

    let mut session = accept(&mut node).await;
    let ids = answer_subscriptions(&mut session, 2, 0).await;
    for number in [10, 11, 12, 9] {
        session.notify(&ids["newHeads"], header_json(number));
    }
    // Frames are handled in order, so the mempool update marks the end.
    session.notify(&ids["mempoolStatus"], mempool(1));
    eventually("barrier", || seen.count(UpdateKind::MempoolUpdate) == 1).await;

    assert_eq!(numbers(&manager.cached_blocks()), vec![12, 11, 10]);
    assert_eq!(seen.block_numbers(), vec![10, 11, 12]);
}

#[tokio::test]
async fn interest_filters_delivery() {
    let (manager, mut node) = mem_manager(config());
    let blocks = Recorder::default();
    let stats = Recorder::default();
    let _blocks = manager.subscribe(
        "blocks",
        blocks.handler(),
        SubscribeOptions::new().with_kind(UpdateKind::NewBlock),
    );
    let _stats = manager.subscribe(
        "stats",
        stats.handler(),
        SubscribeOptions::new().with_kind(UpdateKind::MempoolUpdate),
    );

    let mut session = accept(&mut node).await;
    let ids = answer_subscriptions(&mut session, 2, 0).await;
    assert!(ids.contains_key("newHeads"));
    assert!(ids.contains_key("mempoolStatus"));

    session.notify(&ids["newHeads"], header_json(7));
    session.notify(&ids["mempoolStatus"], mempool(4));
    eventually("stats", || stats.count(UpdateKind::MempoolUpdate) == 1).await;

    assert_eq!(blocks.updates(), vec![Update::from(header(7))]);
    assert_eq!(stats.count(UpdateKind::NewBlock), 0);
    assert_eq!(manager.cached_mempool_stats().map(|s| s.pending), Some(4));
}

#[tokio::test]
async fn resubscribes_after_reconnect() {
    let (manager, mut node) = mem_manager(config());
    let blocks = Recorder::default();
    let status = Recorder::default();
    let _blocks = manager.subscribe(
        "blocks",
        blocks.handler(),
        SubscribeOptions::new().with_kind(UpdateKind::NewBlock),
    );
    let _status = manager.subscribe(
        "status",
        status.handler(),
        SubscribeOptions::new().with_kind(UpdateKind::ConnectionStatus),
    );

    let mut session = accept(&mut node).await;
    let first = answer_subscriptions(&mut session, 1, 1).await;
    session.notify(&first["newHeads"], header_json(1));
    eventually("first block", || blocks.block_numbers() == vec![1]).await;

    session.close();
    let mut session = accept(&mut node).await;
    // Not resumed until the new subscription is confirmed.
    eventually("degraded", || manager.connection_status().manager == ManagerState::Degraded)
        .await;
    assert_eq!(numbers(&manager.cached_blocks()), vec![1]);

    let second = answer_subscriptions(&mut session, 1, 2).await;
    eventually("ready again", || manager.connection_status().manager == ManagerState::Ready)
        .await;

    // The old subscription id belongs to the previous connection.
    session.notify(&first["newHeads"], header_json(2));
    session.notify(&second["newHeads"], header_json(3));
    eventually("third block", || blocks.block_numbers() == vec![1, 3]).await;
    assert_eq!(numbers(&manager.cached_blocks()), vec![3, 1]);

    let managers: Vec<_> = status.statuses().iter().map(|s| s.manager).collect();
    assert_eq!(managers.first(), Some(&ManagerState::Initializing));
    let degraded = managers.iter().position(|m| *m == ManagerState::Degraded).unwrap();
    assert!(managers[..degraded].contains(&ManagerState::Ready));
    assert_eq!(managers.last(), Some(&ManagerState::Ready));
    assert!(manager.connection_status().last_error.is_some());
}

#[tokio::test]
async fn failing_subscriber_is_isolated() {
    let (manager, mut node) = mem_manager(config());
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let _flaky = manager.subscribe(
        "flaky",
        move |_: &Update| -> eyre::Result<()> {
            match counter.fetch_add(1, Ordering::SeqCst) {
                0 => eyre::bail!("cannot handle the first update"),
                1 => panic!("cannot handle the second update"),
                _ => Ok(()),
            }
        },
        SubscribeOptions::new().with_kind(UpdateKind::MempoolUpdate),
    );
    let steady = Recorder::default();
    let _steady = manager.subscribe(
        "steady",
        steady.handler(),
        SubscribeOptions::new().with_kind(UpdateKind::MempoolUpdate),
    );

    let mut session = accept(&mut node).await;
    let ids = answer_subscriptions(&mut session, 1, 0).await;
    for pending in 1..=3 {
        session.notify(&ids["mempoolStatus"], mempool(pending));
    }

    eventually("three updates", || steady.count(UpdateKind::MempoolUpdate) == 3).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(manager.connection_status().manager, ManagerState::Ready);
}

#[tokio::test]
async fn unsubscribe_from_handler_is_immediate() {
    let (manager, mut node) = mem_manager(config());
    let slot: Arc<Mutex<Option<explorer_realtime::Subscription>>> = Default::default();
    let seen = Arc::new(AtomicUsize::new(0));

    let (inner_slot, inner_seen) = (slot.clone(), seen.clone());
    let sub = manager.subscribe(
        "once",
        move |_: &Update| -> eyre::Result<()> {
            inner_seen.fetch_add(1, Ordering::SeqCst);
            if let Some(sub) = inner_slot.lock().unwrap().take() {
                sub.unsubscribe();
            }
            Ok(())
        },
        SubscribeOptions::new().with_kind(UpdateKind::GasPriceUpdate),
    );
    *slot.lock().unwrap() = Some(sub);

    let mut session = accept(&mut node).await;
    let ids = answer_subscriptions(&mut session, 1, 0).await;
    let gas = |n: u64| json!({ "gasPrice": "0x1", "blockNumber": format!("{n:#x}") });
    session.notify(&ids["gasPrice"], gas(1));
    session.notify(&ids["gasPrice"], gas(2));

    // No interest remains, so the upstream subscription is dropped too.
    let request = timeout(Duration::from_secs(5), session.recv_request()).await.unwrap().unwrap();
    assert_eq!(request["method"], "eth_unsubscribe");
    assert_eq!(request["params"], json!([ids["gasPrice"]]));

    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert!(slot.lock().unwrap().is_none());
    // The second notification arrives on a released id.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(manager.cached_gas_price().map(|g| g.block_number), Some(1));
}

#[tokio::test]
async fn dropping_last_subscriber_releases_topics() {
    let (manager, mut node) = mem_manager(config());
    let keep = manager.subscribe(
        "blocks",
        Recorder::default().handler(),
        SubscribeOptions::new().with_kind(UpdateKind::NewBlock),
    );
    let everything = manager.subscribe("everything", Recorder::default().handler(), SubscribeOptions::new());
    assert!(everything.is_active());

    let mut session = accept(&mut node).await;
    let ids = answer_subscriptions(&mut session, 5, 0).await;

    drop(everything);
    let mut released = Vec::new();
    while let Ok(Some(request)) =
        timeout(Duration::from_millis(200), session.recv_request()).await
    {
        assert_eq!(request["method"], "eth_unsubscribe");
        released.push(request["params"][0].as_str().unwrap().to_string());
    }
    released.sort();

    // newHeads is still wanted by the other subscriber.
    let mut expected: Vec<_> =
        ids.iter().filter(|(topic, _)| *topic != "newHeads").map(|(_, id)| id.clone()).collect();
    expected.sort();
    assert_eq!(released, expected);
    assert!(keep.is_active());
}

#[tokio::test]
async fn same_id_replaces_subscriber() {
    let (manager, mut node) = mem_manager(config());
    let first = Recorder::default();
    let second = Recorder::default();
    let opts = || SubscribeOptions::new().with_kind(UpdateKind::NewBlock);
    let first_sub = manager.subscribe("list", first.handler(), opts());
    let _second_sub = manager.subscribe("list", second.handler(), opts());

    let mut session = accept(&mut node).await;
    let ids = answer_subscriptions(&mut session, 1, 0).await;
    session.notify(&ids["newHeads"], header_json(5));
    eventually("delivered", || second.block_numbers() == vec![5]).await;

    assert!(first.updates().is_empty());
    assert!(!first_sub.is_active());
}

#[tokio::test]
async fn malformed_frames_are_dropped() {
    let (manager, mut node) = mem_manager(config());
    let blocks = Recorder::default();
    let _sub = manager.subscribe(
        "blocks",
        blocks.handler(),
        SubscribeOptions::new().with_kind(UpdateKind::NewBlock),
    );

    let mut session = accept(&mut node).await;
    let ids = answer_subscriptions(&mut session, 1, 0).await;
    session.send_text("{not json");
    session.notify(&ids["newHeads"], json!({ "number": [] }));
    session.notify("unknown", header_json(1));
    session.notify(&ids["newHeads"], header_json(2));

    eventually("valid block", || blocks.block_numbers() == vec![2]).await;
    assert_eq!(manager.connection_status().state, ConnectionState::Connected);
}

#[tokio::test]
async fn rejected_kind_does_not_block_ready() {
    let (manager, mut node) = mem_manager(config());
    let _sub = manager.subscribe(
        "scheduled",
        Recorder::default().handler(),
        SubscribeOptions::new().with_kind(UpdateKind::ScheduledUpdate),
    );

    let mut session = accept(&mut node).await;
    let request = timeout(Duration::from_secs(5), session.recv_request()).await.unwrap().unwrap();
    assert_eq!(request["params"], json!(["scheduledTransactions"]));
    session.respond_error(&request["id"], -32602, "unsupported subscription");

    eventually("ready", || manager.connection_status().manager == ManagerState::Ready).await;
    let last_error = manager.connection_status().last_error.unwrap();
    assert!(last_error.contains("unsupported subscription"), "{last_error}");
}

#[tokio::test]
async fn reconnects_until_node_accepts() {
    let (manager, mut node) = mem_manager(config());
    node.refuse_next(3);
    let _sub = manager.subscribe(
        "blocks",
        Recorder::default().handler(),
        SubscribeOptions::new().with_kind(UpdateKind::NewBlock),
    );

    let mut session = accept(&mut node).await;
    answer_subscriptions(&mut session, 1, 0).await;
    eventually("ready", || manager.connection_status().manager == ManagerState::Ready).await;
}

#[tokio::test]
async fn gives_up_after_max_reconnects() {
    let (manager, node) = mem_manager(config().with_max_reconnects(2));
    node.refuse_next(usize::MAX);
    let _sub = manager.subscribe("blocks", Recorder::default().handler(), SubscribeOptions::new());

    eventually("failed", || manager.connection_status().state == ConnectionState::Failed).await;
    assert_eq!(manager.connection_status().manager, ManagerState::Initializing);
}

#[tokio::test]
async fn shutdown_stops_everything() {
    let (manager, mut node) = mem_manager(config());
    let blocks = Recorder::default();
    let sub = manager.subscribe(
        "blocks",
        blocks.handler(),
        SubscribeOptions::new().with_kind(UpdateKind::NewBlock),
    );

    let mut session = accept(&mut node).await;
    let ids = answer_subscriptions(&mut session, 1, 0).await;
    session.notify(&ids["newHeads"], header_json(1));
    eventually("block", || blocks.block_numbers() == vec![1]).await;

    manager.shutdown();
    timeout(Duration::from_secs(5), manager.stopped()).await.unwrap();
    assert!(manager.is_stopped());
    assert!(!sub.is_active());

    let status = manager.connection_status();
    assert_eq!(status.manager, ManagerState::ShuttingDown);
    assert_eq!(status.state, ConnectionState::Disconnected);
    assert_eq!(numbers(&manager.cached_blocks()), vec![1]);

    assert!(matches!(
        manager.force_refresh(UpdateKind::NewBlock).await,
        Err(RefreshError::Stopped)
    ));
    let late = manager.subscribe("late", Recorder::default().handler(), SubscribeOptions::new());
    assert!(!late.is_active());
}

#[tokio::test]
async fn throttled_subscriber_gets_latest() {
    let (manager, mut node) = mem_manager(config());
    let stats = Recorder::default();
    let _sub = manager.subscribe(
        "stats",
        stats.handler(),
        SubscribeOptions::new()
            .with_kind(UpdateKind::MempoolUpdate)
            .with_throttle(UpdateKind::MempoolUpdate, Duration::from_millis(300)),
    );

    let mut session = accept(&mut node).await;
    let ids = answer_subscriptions(&mut session, 1, 0).await;
    for pending in 1..=3 {
        session.notify(&ids["mempoolStatus"], mempool(pending));
    }

    eventually("flush", || stats.count(UpdateKind::MempoolUpdate) == 1).await;
    tokio::time::sleep(Duration::from_millis(400)).await;
    let delivered: Vec<_> =
        stats.updates().iter().filter_map(|u| u.as_mempool().map(|m| m.pending)).collect();
    assert_eq!(delivered, vec![3]);
}

#[tokio::test]
async fn unbounded_throttle_does_not_stall_others() {
    let (manager, mut node) = mem_manager(config());
    let parked = Recorder::default();
    let steady = Recorder::default();
    let _parked = manager.subscribe(
        "once",
        parked.handler(),
        SubscribeOptions::new()
            .with_kind(UpdateKind::MempoolUpdate)
            .with_throttle(UpdateKind::MempoolUpdate, Duration::MAX),
    );
    let _steady = manager.subscribe(
        "steady",
        steady.handler(),
        SubscribeOptions::new().with_kind(UpdateKind::MempoolUpdate),
    );

    let mut session = accept(&mut node).await;
    let ids = answer_subscriptions(&mut session, 1, 0).await;
    session.notify(&ids["mempoolStatus"], mempool(1));
    session.notify(&ids["mempoolStatus"], mempool(2));

    eventually("both updates", || steady.count(UpdateKind::MempoolUpdate) == 2).await;
    assert!(parked.updates().is_empty());
    assert!(!manager.is_stopped());
    assert_eq!(manager.connection_status().manager, ManagerState::Ready);
}

#[tokio::test]
async fn subscribe_then_unsubscribe_leaves_manager_idle() {
    let (manager, mut node) = mem_manager(config());
    let before = manager.connection_status();

    let sub = manager.subscribe("brief", Recorder::default().handler(), SubscribeOptions::new());
    sub.unsubscribe();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(manager.connection_status(), before);
    assert_eq!(before.manager, ManagerState::Uninitialized);
    assert_eq!(before.state, ConnectionState::Disconnected);
    assert!(manager.cached_blocks().is_empty());
    assert!(timeout(Duration::from_millis(50), node.accept()).await.is_err());
}
