//! Connection Pool Behavior Tests
//!
//! Covers:
//! - Per-endpoint limits and FIFO queueing
//! - Idle eviction and timer re-arming
//! - Dead connection handling on checkin and reuse
//! - Bind address matching and rebind
//! - Connector failures and abandoned checkouts
//!
//! Uses a MockConnector so no network I/O is involved.

use sockpool::base::neterror::NetError;
use sockpool::socket::connectjob::{Connect, Connecting};
use sockpool::socket::endpoint::Endpoint;
use sockpool::socket::error::PoolError;
use sockpool::socket::options::{BindAddress, OptionOverrides, PoolConfig, PoolOptions};
use sockpool::socket::client::PoolableConnection;
use sockpool::socket::pool::ClientSocketPool;

use futures::poll;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

#[derive(Debug)]
struct MockConnection {
    serial: usize,
    dead: Arc<AtomicBool>,
    bind: BindAddress,
}

impl MockConnection {
    fn kill(&self) {
        self.dead.store(true, Ordering::SeqCst);
    }

    fn kill_switch(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.dead)
    }
}

impl PoolableConnection for MockConnection {
    fn is_dead(&self) -> bool {
        self.dead.load(Ordering::SeqCst)
    }

    fn bind_address(&self) -> BindAddress {
        self.bind
    }
}

#[derive(Clone, Default)]
struct MockConnector {
    calls: Arc<AtomicUsize>,
    failures: Arc<AtomicUsize>,
    gate: Option<Arc<Semaphore>>,
    last_options: Arc<Mutex<Option<PoolOptions>>>,
}

impl MockConnector {
    /// Connects only complete as permits are released with `open`.
    fn gated() -> Self {
        Self { gate: Some(Arc::new(Semaphore::new(0))), ..Self::default() }
    }

    fn open(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn last_options(&self) -> Option<PoolOptions> {
        self.last_options.lock().unwrap().clone()
    }
}

impl Connect for MockConnector {
    type Connection = MockConnection;

    fn connect(&self, _endpoint: &Endpoint, options: &PoolOptions) -> Connecting<MockConnection> {
        let serial = self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_options.lock().unwrap() = Some(options.clone());
        let fail = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let gate = self.gate.clone();
        let bind = options.bind_address;

        Box::pin(async move {
            if let Some(gate) = gate {
                gate.acquire().await.map_err(|_| NetError::ConnectionAborted)?.forget();
            }
            if fail {
                return Err(NetError::ConnectionRefused);
            }
            Ok(MockConnection { serial, dead: Arc::new(AtomicBool::new(false)), bind })
        })
    }
}

/// Let spawned connect tasks and timer tasks run.
async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

async fn advance(ms: u64) {
    tokio::time::advance(Duration::from_millis(ms)).await;
    settle().await;
}

fn limit(n: i64) -> OptionOverrides {
    OptionOverrides::new().host_connection_limit(n)
}

fn addr(s: &str) -> SocketAddr {
    s.parse().unwrap()
}

#[tokio::test]
async fn test_limit_one_queues_second_checkout() {
    let connector = MockConnector::default();
    let pool = ClientSocketPool::with_connector(connector.clone());
    let overrides = limit(1);

    let first = pool.checkout("a:1", &overrides).await.unwrap();
    let first_id = first.id();

    let mut second = Box::pin(pool.checkout("a:1", &overrides));
    assert!(poll!(&mut second).is_pending());
    assert_eq!(pool.queued_request_count("a:1"), 1);

    pool.checkin(first).unwrap();
    let second = second.await.unwrap();
    assert_eq!(second.id(), first_id);
    assert_eq!(connector.calls(), 1);
    assert_eq!(pool.queued_request_count("a:1"), 0);
}

#[tokio::test]
async fn test_waiters_served_in_arrival_order() {
    let pool = ClientSocketPool::with_connector(MockConnector::default());
    let overrides = limit(1);

    let conn = pool.checkout("a:1", &overrides).await.unwrap();
    let mut w1 = Box::pin(pool.checkout("a:1", &overrides));
    let mut w2 = Box::pin(pool.checkout("a:1", &overrides));
    assert!(poll!(&mut w1).is_pending());
    assert!(poll!(&mut w2).is_pending());

    pool.checkin(conn).unwrap();
    assert!(poll!(&mut w2).is_pending());
    let conn = w1.await.unwrap();

    pool.checkin(conn).unwrap();
    assert!(w2.await.is_ok());
}

#[tokio::test]
async fn test_waiters_served_in_call_order_not_poll_order() {
    let pool = ClientSocketPool::with_connector(MockConnector::default());
    let overrides = limit(1);

    let conn = pool.checkout("a:1", &overrides).await.unwrap();
    let id = conn.id();
    let mut earlier = Box::pin(pool.checkout("a:1", &overrides));
    let mut later = Box::pin(pool.checkout("a:1", &overrides));
    assert_eq!(pool.queued_request_count("a:1"), 2);

    // Polling the later call first does not let it jump the queue.
    assert!(poll!(&mut later).is_pending());
    pool.checkin(conn).unwrap();
    assert!(poll!(&mut later).is_pending());
    assert_eq!(earlier.await.unwrap().id(), id);
}

#[tokio::test]
async fn test_checkout_does_not_borrow_overrides() {
    let pool = ClientSocketPool::with_connector(MockConnector::default());

    let checkout = {
        let overrides = OptionOverrides::new().host_connection_limit(1);
        pool.checkout("a:1", &overrides)
    };
    let handle = tokio::spawn(checkout);
    assert!(handle.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_unpolled_reuse_returns_connection_on_drop() {
    let connector = MockConnector::default();
    let pool = ClientSocketPool::with_connector(connector.clone());

    let conn = pool.checkout("a:1", &OptionOverrides::new()).await.unwrap();
    let id = conn.id();
    pool.checkin(conn).unwrap();

    let unused = pool.checkout("a:1", &OptionOverrides::new());
    assert_eq!(pool.active_connection_count("a:1"), 1);
    drop(unused);
    assert_eq!(pool.idle_connection_count("a:1"), 1);

    assert_eq!(pool.checkout("a:1", &OptionOverrides::new()).await.unwrap().id(), id);
    assert_eq!(connector.calls(), 1);
}

#[tokio::test]
async fn test_unclaimed_delivery_returns_connection_on_drop() {
    let pool = ClientSocketPool::with_connector(MockConnector::default());
    let overrides = limit(1);

    let conn = pool.checkout("a:1", &overrides).await.unwrap();
    let waiter = pool.checkout("a:1", &overrides);
    pool.checkin(conn).unwrap();
    // Handed to the waiter, which is dropped without being polled.
    assert_eq!(pool.active_connection_count("a:1"), 1);

    drop(waiter);
    assert_eq!(pool.idle_connection_count("a:1"), 1);
    assert_eq!(pool.active_connection_count("a:1"), 0);
}

#[tokio::test]
async fn test_limit_two_third_request_reuses_first_connection() {
    let connector = MockConnector::default();
    let pool = ClientSocketPool::with_connector(connector.clone());
    let overrides = limit(2);

    let a = pool.checkout("h:80", &overrides).await.unwrap();
    let b = pool.checkout("h:80", &overrides).await.unwrap();
    assert_ne!(a.id(), b.id());

    let mut c = Box::pin(pool.checkout("h:80", &overrides));
    assert!(poll!(&mut c).is_pending());

    let a_id = a.id();
    pool.checkin(a).unwrap();
    let c = c.await.unwrap();
    assert_eq!(c.id(), a_id);
    assert_eq!(connector.calls(), 2);
    assert_eq!(pool.active_connection_count("h:80"), 2);
    drop(b);
}

#[tokio::test]
async fn test_limits_are_per_endpoint() {
    let connector = MockConnector::default();
    let pool = ClientSocketPool::with_connector(connector.clone());
    let overrides = limit(1);

    let _a = pool.checkout("a:1", &overrides).await.unwrap();
    let _b = pool.checkout("b:1", &overrides).await.unwrap();
    assert_eq!(connector.calls(), 2);
    assert_eq!(pool.total_connection_count(), 2);
}

#[tokio::test]
async fn test_endpoint_keys_ignore_case() {
    let connector = MockConnector::default();
    let pool = ClientSocketPool::with_connector(connector.clone());

    let conn = pool.checkout("Example.COM:80", &OptionOverrides::new()).await.unwrap();
    let id = conn.id();
    pool.checkin(conn).unwrap();

    let conn = pool.checkout("example.com:80", &OptionOverrides::new()).await.unwrap();
    assert_eq!(conn.id(), id);
    assert_eq!(connector.calls(), 1);
}

#[tokio::test]
async fn test_unlimited_pool_never_queues() {
    let connector = MockConnector::default();
    let pool = ClientSocketPool::with_connector(connector.clone());
    let overrides = limit(0);

    let mut held = Vec::new();
    for _ in 0..20 {
        held.push(pool.checkout("a:1", &overrides).await.unwrap());
    }
    assert_eq!(connector.calls(), 20);
    assert_eq!(pool.queued_request_count("a:1"), 0);
}

#[tokio::test]
async fn test_pending_connects_count_against_limit() {
    let connector = MockConnector::gated();
    let pool = ClientSocketPool::with_connector(connector.clone());
    let overrides = limit(3);

    let mut checkouts: Vec<_> = (0..10).map(|_| Box::pin(pool.checkout("a:1", &overrides))).collect();
    for checkout in &mut checkouts {
        assert!(poll!(checkout).is_pending());
    }
    assert_eq!(pool.pending_connect_count("a:1"), 3);
    assert_eq!(pool.queued_request_count("a:1"), 7);

    connector.open(3);
    settle().await;
    assert_eq!(pool.pending_connect_count("a:1"), 0);
    assert_eq!(pool.active_connection_count("a:1"), 3);
    assert_eq!(pool.queued_request_count("a:1"), 7);
    assert_eq!(connector.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_idle_connection_evicted_after_timeout() {
    let connector = MockConnector::default();
    let pool = ClientSocketPool::with_connector(connector.clone());
    let overrides = limit(1).idle_timeout(Duration::from_millis(50));

    let conn = pool.checkout("a:1", &overrides).await.unwrap();
    pool.checkin(conn).unwrap();

    advance(40).await;
    assert_eq!(pool.idle_connection_count("a:1"), 1);

    advance(20).await;
    assert_eq!(pool.idle_connection_count("a:1"), 0);
    assert_eq!(pool.total_connection_count(), 0);

    let conn = pool.checkout("a:1", &overrides).await.unwrap();
    assert_eq!(conn.serial, 1);
    assert_eq!(connector.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_reclaimed_connection_restarts_idle_timer() {
    let pool = ClientSocketPool::with_connector(MockConnector::default());
    let overrides = OptionOverrides::new().idle_timeout(Duration::from_millis(50));

    let conn = pool.checkout("a:1", &overrides).await.unwrap();
    pool.checkin(conn).unwrap();
    advance(30).await;

    let conn = pool.checkout("a:1", &overrides).await.unwrap();
    advance(30).await;
    assert_eq!(pool.active_connection_count("a:1"), 1);

    pool.checkin(conn).unwrap();
    advance(30).await;
    assert_eq!(pool.idle_connection_count("a:1"), 1);

    advance(30).await;
    assert_eq!(pool.total_connection_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_zero_idle_timeout_disables_eviction() {
    let pool = ClientSocketPool::with_connector(MockConnector::default());
    pool.set_option("idle-timeout-ms", 0).unwrap();

    let conn = pool.checkout("a:1", &OptionOverrides::new()).await.unwrap();
    pool.checkin(conn).unwrap();

    advance(3_600_000).await;
    assert_eq!(pool.idle_connection_count("a:1"), 1);
}

#[tokio::test]
async fn test_dead_connection_discarded_on_checkin() {
    let connector = MockConnector::default();
    let pool = ClientSocketPool::with_connector(connector.clone());

    let conn = pool.checkout("a:1", &OptionOverrides::new()).await.unwrap();
    conn.kill();
    pool.checkin(conn).unwrap();
    assert_eq!(pool.total_connection_count(), 0);

    let conn = pool.checkout("a:1", &OptionOverrides::new()).await.unwrap();
    assert_eq!(conn.serial, 1);
}

#[tokio::test]
async fn test_dead_idle_connection_skipped_on_checkout() {
    let connector = MockConnector::default();
    let pool = ClientSocketPool::with_connector(connector.clone());

    let conn = pool.checkout("a:1", &OptionOverrides::new()).await.unwrap();
    let dead_id = conn.id();
    let kill = conn.kill_switch();
    pool.checkin(conn).unwrap();
    kill.store(true, Ordering::SeqCst);

    let conn = pool.checkout("a:1", &OptionOverrides::new()).await.unwrap();
    assert_ne!(conn.id(), dead_id);
    assert_eq!(connector.calls(), 2);
    assert_eq!(pool.total_connection_count(), 1);
}

#[tokio::test]
async fn test_dead_checkin_lets_waiter_connect() {
    let connector = MockConnector::default();
    let pool = ClientSocketPool::with_connector(connector.clone());
    let overrides = limit(1);

    let conn = pool.checkout("a:1", &overrides).await.unwrap();
    let mut waiter = Box::pin(pool.checkout("a:1", &overrides));
    assert!(poll!(&mut waiter).is_pending());

    conn.kill();
    pool.checkin(conn).unwrap();
    let conn = waiter.await.unwrap();
    assert_eq!(conn.serial, 1);
}

#[tokio::test]
async fn test_checkin_of_unknown_connection_fails() {
    let pool_a = ClientSocketPool::with_connector(MockConnector::default());
    let pool_b = ClientSocketPool::with_connector(MockConnector::default());

    let conn = pool_a.checkout("a:1", &OptionOverrides::new()).await.unwrap();
    let id = conn.id();
    assert_eq!(pool_b.checkin(conn), Err(PoolError::UnknownConnection(id)));
    assert_eq!(pool_b.total_connection_count(), 0);
}

#[tokio::test]
async fn test_clear_of_unknown_connection_is_noop() {
    let pool_a = ClientSocketPool::with_connector(MockConnector::default());
    let pool_b = ClientSocketPool::with_connector(MockConnector::default());

    let conn = pool_a.checkout("a:1", &OptionOverrides::new()).await.unwrap();
    pool_b.clear(conn);
    assert_eq!(pool_a.total_connection_count(), 1);
    assert_eq!(pool_b.total_connection_count(), 0);
}

#[tokio::test]
async fn test_clear_frees_slot_for_waiter() {
    let connector = MockConnector::default();
    let pool = ClientSocketPool::with_connector(connector.clone());
    let overrides = limit(1);

    let conn = pool.checkout("a:1", &overrides).await.unwrap();
    let mut waiter = Box::pin(pool.checkout("a:1", &overrides));
    assert!(poll!(&mut waiter).is_pending());

    pool.clear(conn);
    let conn = waiter.await.unwrap();
    assert_eq!(conn.serial, 1);
    assert_eq!(pool.total_connection_count(), 1);
}

#[tokio::test]
async fn test_bind_mismatch_opens_connection_past_limit() {
    let connector = MockConnector::default();
    let pool = ClientSocketPool::with_connector(connector.clone());
    let x = limit(1).bind_address(addr("10.0.0.1:0"));
    let y = limit(1).bind_address(addr("10.0.0.2:0"));

    let conn = pool.checkout("a:1", &x).await.unwrap();
    pool.checkin(conn).unwrap();

    let conn = pool.checkout("a:1", &y).await.unwrap();
    assert_eq!(conn.bind, BindAddress::Addr(addr("10.0.0.2:0")));
    assert_eq!(connector.calls(), 2);
    assert_eq!(pool.total_connection_count(), 2);
}

#[tokio::test]
async fn test_bound_connection_not_reused_for_unbound_request() {
    let connector = MockConnector::default();
    let pool = ClientSocketPool::with_connector(connector.clone());

    let conn = pool
        .checkout("a:1", &limit(1).bind_address(addr("10.0.0.1:0")))
        .await
        .unwrap();
    pool.checkin(conn).unwrap();

    let conn = pool.checkout("a:1", &limit(1)).await.unwrap();
    assert!(conn.bind.is_any());
    assert_eq!(connector.calls(), 2);
}

#[tokio::test]
async fn test_unbound_connection_reused_for_bound_request() {
    let connector = MockConnector::default();
    let pool = ClientSocketPool::with_connector(connector.clone());

    let conn = pool.checkout("a:1", &OptionOverrides::new()).await.unwrap();
    let id = conn.id();
    pool.checkin(conn).unwrap();

    let conn = pool
        .checkout("a:1", &OptionOverrides::new().bind_address(addr("10.0.0.1:0")))
        .await
        .unwrap();
    assert_eq!(conn.id(), id);
    assert_eq!(connector.calls(), 1);
}

#[tokio::test]
async fn test_matching_bind_reuses_connection() {
    let connector = MockConnector::default();
    let pool = ClientSocketPool::with_connector(connector.clone());
    let x = OptionOverrides::new().bind_address(addr("10.0.0.1:0"));

    let conn = pool.checkout("a:1", &x).await.unwrap();
    let id = conn.id();
    pool.checkin(conn).unwrap();

    assert_eq!(pool.checkout("a:1", &x).await.unwrap().id(), id);
    assert_eq!(connector.calls(), 1);
}

#[tokio::test]
async fn test_connector_failure_reported_and_slot_released() {
    let connector = MockConnector::default();
    let pool = ClientSocketPool::with_connector(connector.clone());
    connector.fail_next(1);

    let err = pool.checkout("a:1", &limit(1)).await.unwrap_err();
    assert_eq!(err, NetError::ConnectionRefused);
    assert_eq!(pool.pending_connect_count("a:1"), 0);
    assert_eq!(pool.total_connection_count(), 0);

    assert!(pool.checkout("a:1", &limit(1)).await.is_ok());
}

#[tokio::test]
async fn test_connector_failure_serves_next_waiter() {
    let connector = MockConnector::gated();
    let pool = ClientSocketPool::with_connector(connector.clone());
    let overrides = limit(1);
    connector.fail_next(1);

    let mut first = Box::pin(pool.checkout("a:1", &overrides));
    let mut second = Box::pin(pool.checkout("a:1", &overrides));
    assert!(poll!(&mut first).is_pending());
    assert!(poll!(&mut second).is_pending());
    assert_eq!(pool.pending_connect_count("a:1"), 1);
    assert_eq!(pool.queued_request_count("a:1"), 1);

    connector.open(1);
    assert_eq!(first.await.unwrap_err(), NetError::ConnectionRefused);
    settle().await;
    assert_eq!(connector.calls(), 2);
    assert_eq!(pool.queued_request_count("a:1"), 0);

    connector.open(1);
    assert!(second.await.is_ok());
    assert_eq!(pool.pending_connect_count("a:1"), 0);
}

#[tokio::test]
async fn test_abandoned_waiter_is_skipped() {
    let pool = ClientSocketPool::with_connector(MockConnector::default());
    let overrides = limit(1);

    let conn = pool.checkout("a:1", &overrides).await.unwrap();
    let id = conn.id();

    let mut abandoned = Box::pin(pool.checkout("a:1", &overrides));
    assert!(poll!(&mut abandoned).is_pending());
    let mut waiter = Box::pin(pool.checkout("a:1", &overrides));
    assert!(poll!(&mut waiter).is_pending());

    drop(abandoned);
    assert_eq!(pool.queued_request_count("a:1"), 1);

    pool.checkin(conn).unwrap();
    assert_eq!(waiter.await.unwrap().id(), id);
}

#[tokio::test]
async fn test_abandoned_connect_keeps_connection_idle() {
    let connector = MockConnector::gated();
    let pool = ClientSocketPool::with_connector(connector.clone());

    let mut checkout = Box::pin(pool.checkout("a:1", &OptionOverrides::new()));
    assert!(poll!(&mut checkout).is_pending());
    drop(checkout);

    connector.open(1);
    settle().await;
    assert_eq!(pool.idle_connection_count("a:1"), 1);
    assert_eq!(pool.pending_connect_count("a:1"), 0);

    assert!(pool.checkout("a:1", &OptionOverrides::new()).await.is_ok());
    assert_eq!(connector.calls(), 1);
}

#[tokio::test]
async fn test_close_idle_connections() {
    let pool = ClientSocketPool::with_connector(MockConnector::default());

    let a = pool.checkout("a:1", &OptionOverrides::new()).await.unwrap();
    let b = pool.checkout("a:1", &OptionOverrides::new()).await.unwrap();
    let c = pool.checkout("b:1", &OptionOverrides::new()).await.unwrap();
    pool.checkin(a).unwrap();
    pool.checkin(c).unwrap();

    pool.close_idle_connections();
    assert_eq!(pool.total_connection_count(), 1);
    assert_eq!(pool.active_connection_count("a:1"), 1);

    pool.checkin(b).unwrap();
    assert_eq!(pool.idle_connection_count("a:1"), 1);
}

#[tokio::test]
async fn test_set_option_changes_defaults() {
    let connector = MockConnector::default();
    let pool = ClientSocketPool::with_connector(connector.clone());
    pool.set_option("host-connection-limit", 1).unwrap();
    assert_eq!(pool.options().host_connection_limit, 1);

    let _conn = pool.checkout("a:1", &OptionOverrides::new()).await.unwrap();
    let mut queued = Box::pin(pool.checkout("a:1", &OptionOverrides::new()));
    assert!(poll!(&mut queued).is_pending());
    assert_eq!(connector.calls(), 1);

    // Overrides apply to one checkout only.
    assert!(pool.checkout("a:1", &limit(2)).await.is_ok());
    assert_eq!(pool.options().host_connection_limit, 1);
}

#[tokio::test]
async fn test_connect_timeout_handed_to_connector() {
    let connector = MockConnector::default();
    let pool = ClientSocketPool::with_connector(connector.clone());

    pool.set_option("connect-timeout-ms", 1500).unwrap();
    let _a = pool.checkout("a:1", &OptionOverrides::new()).await.unwrap();
    assert_eq!(connector.last_options().unwrap().connect_timeout, Some(Duration::from_millis(1500)));

    pool.set_option("connect-timeout-ms", -1).unwrap();
    let _b = pool.checkout("a:1", &OptionOverrides::new()).await.unwrap();
    assert_eq!(connector.last_options().unwrap().connect_timeout, None);
}

#[test]
fn test_set_option_rejects_bad_input() {
    let pool = ClientSocketPool::with_connector(MockConnector::default());

    assert_eq!(
        pool.set_option("max-sockets", 4),
        Err(PoolError::UnknownOption("max-sockets".to_string()))
    );
    assert!(matches!(
        pool.set_option("bind-address", "not an address"),
        Err(PoolError::InvalidOptionValue { .. })
    ));
    assert_eq!(pool.options(), PoolOptions::default());
}

#[tokio::test]
async fn test_pool_built_from_config() {
    let config = PoolConfig::from_json(r#"{ "host-connection-limit": 1, "idle-timeout-ms": 0 }"#).unwrap();
    let pool = ClientSocketPool::builder(MockConnector::default())
        .config(&config)
        .unwrap()
        .build();

    let options = pool.options();
    assert_eq!(options.host_connection_limit, 1);
    assert_eq!(options.idle_timeout, None);

    pool.configure(&PoolConfig { host_connection_limit: Some(3), ..PoolConfig::default() })
        .unwrap();
    assert_eq!(pool.options().host_connection_limit, 3);
    assert_eq!(pool.options().idle_timeout, None);
}
