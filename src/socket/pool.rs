//! Endpoint-keyed client socket pool.
//!
//! Connections are grouped by [`Endpoint`]. Each endpoint has a set of
//! established entries, a count of in-flight connects, and a FIFO queue of
//! checkouts waiting for capacity. All bookkeeping lives in one `PoolState`
//! whose lock is only held for synchronous steps, never across an `.await`,
//! so every transition below is atomic with respect to the others.
//!
//! An entry is either checked out (the caller owns the connection through a
//! [`PooledConnection`]) or idle (the pool owns it and an idle timer may be
//! armed):
//!
//! ```text
//!   connect ok ──> CheckedOut ──checkin──> Idle ──timer──> removed
//!                      ^                    │
//!                      └──── checkout ──────┘
//! ```

use crate::base::neterror::NetError;
use crate::socket::client::{ClientSocket, PoolableConnection};
use crate::socket::connectjob::{Connect, TcpConnector};
use crate::socket::endpoint::Endpoint;
use crate::socket::error::PoolError;
use crate::socket::options::{OptionOverrides, OptionValue, PoolConfig, PoolOption, PoolOptions};
use crate::socket::scheduler::{Scheduler, TimerCallback, TimerId, TokioScheduler};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Opaque identity of a pooled connection, unique for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ConnectionId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A connection checked out of the pool.
///
/// Hand it back with [`ClientSocketPool::checkin`] when the request is done,
/// or [`ClientSocketPool::clear`] to discard it. Dropping it without either
/// keeps its slot counted against the endpoint's limit.
#[derive(Debug)]
pub struct PooledConnection<C> {
    id: ConnectionId,
    endpoint: Endpoint,
    conn: C,
}

impl<C> PooledConnection<C> {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

impl<C> Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.conn
    }
}

impl<C> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.conn
    }
}

type Delivery<C> = Result<PooledConnection<C>, NetError>;

/// A checkout waiting for capacity or a freed connection.
struct Waiter<C> {
    options: PoolOptions,
    sender: oneshot::Sender<Delivery<C>>,
}

impl<C> Waiter<C> {
    /// The caller dropped its checkout future.
    fn is_abandoned(&self) -> bool {
        self.sender.is_closed()
    }
}

enum EntryState<C> {
    CheckedOut,
    Idle(C),
}

struct IdleTimer {
    id: TimerId,
    delay: Duration,
}

/// Bookkeeping for one established connection.
struct PoolEntry<C> {
    id: ConnectionId,
    endpoint: Endpoint,
    state: EntryState<C>,
    /// Idle timeout of the checkout that last held this entry.
    idle_timeout: Option<Duration>,
    /// Created on first checkin, then disabled and re-enabled.
    idle_timer: Option<IdleTimer>,
    /// When the entry last became idle.
    idle_since: Instant,
}

impl<C> PoolEntry<C> {
    fn is_idle(&self) -> bool {
        matches!(self.state, EntryState::Idle(_))
    }

    /// Idle for at least the idle timeout. A timer that fired for an earlier
    /// idle period fails this check.
    fn is_expired(&self) -> bool {
        self.is_idle()
            && self.idle_timeout.is_some_and(|timeout| self.idle_since.elapsed() >= timeout)
    }

    fn set_idle(&mut self, conn: C) {
        self.state = EntryState::Idle(conn);
        self.idle_since = Instant::now();
    }

    /// Idle -> CheckedOut. The timer is disabled, not cancelled.
    fn claim(&mut self, options: &PoolOptions, scheduler: &dyn Scheduler) -> Option<C> {
        match std::mem::replace(&mut self.state, EntryState::CheckedOut) {
            EntryState::Idle(conn) => {
                if let Some(timer) = &self.idle_timer {
                    scheduler.disable(timer.id);
                }
                self.idle_timeout = options.idle_timeout;
                Some(conn)
            }
            EntryState::CheckedOut => None,
        }
    }
}

/// Outcome of searching an endpoint's entries for a reusable connection.
struct ReuseScan<C> {
    claimed: Option<PooledConnection<C>>,
    /// Only idle connections bound to some other local address were found.
    rebind_required: bool,
}

struct PoolState<C> {
    defaults: PoolOptions,
    /// Per endpoint, in creation order.
    entries: HashMap<Endpoint, BTreeMap<ConnectionId, PoolEntry<C>>>,
    /// Reverse index; holds exactly the ids present in `entries`.
    endpoint_by_id: HashMap<ConnectionId, Endpoint>,
    waiters: HashMap<Endpoint, VecDeque<Waiter<C>>>,
    /// In-flight connects. Keys are removed at zero.
    pending: HashMap<Endpoint, usize>,
}

impl<C: PoolableConnection> PoolState<C> {
    fn new(defaults: PoolOptions) -> Self {
        Self {
            defaults,
            entries: HashMap::new(),
            endpoint_by_id: HashMap::new(),
            waiters: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    fn established_count(&self, endpoint: &Endpoint) -> usize {
        self.entries.get(endpoint).map_or(0, BTreeMap::len)
    }

    fn pending_count(&self, endpoint: &Endpoint) -> usize {
        self.pending.get(endpoint).copied().unwrap_or(0)
    }

    fn allows_new_connection(&self, endpoint: &Endpoint, options: &PoolOptions) -> bool {
        options.is_unlimited()
            || self.pending_count(endpoint) + self.established_count(endpoint)
                < options.host_connection_limit
    }

    fn begin_connect(&mut self, endpoint: &Endpoint) {
        *self.pending.entry(endpoint.clone()).or_insert(0) += 1;
    }

    fn end_connect(&mut self, endpoint: &Endpoint) {
        if let Some(count) = self.pending.get_mut(endpoint) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.pending.remove(endpoint);
            }
        }
    }

    fn entry(&self, endpoint: &Endpoint, id: ConnectionId) -> Option<&PoolEntry<C>> {
        self.entries.get(endpoint)?.get(&id)
    }

    fn entry_mut(&mut self, endpoint: &Endpoint, id: ConnectionId) -> Option<&mut PoolEntry<C>> {
        self.entries.get_mut(endpoint)?.get_mut(&id)
    }

    /// Track a freshly connected, checked-out connection.
    fn register(&mut self, endpoint: &Endpoint, options: &PoolOptions) -> ConnectionId {
        let id = ConnectionId::next();
        let entry = PoolEntry {
            id,
            endpoint: endpoint.clone(),
            state: EntryState::CheckedOut,
            idle_timeout: options.idle_timeout,
            idle_timer: None,
            idle_since: Instant::now(),
        };
        self.entries.entry(endpoint.clone()).or_default().insert(id, entry);
        self.endpoint_by_id.insert(id, endpoint.clone());
        id
    }

    /// Drop an entry from both indexes, cancelling its timer. No waiter is
    /// woken here.
    fn remove_entry(
        &mut self,
        endpoint: &Endpoint,
        id: ConnectionId,
        scheduler: &dyn Scheduler,
    ) -> Option<PoolEntry<C>> {
        let entries = self.entries.get_mut(endpoint)?;
        let entry = entries.remove(&id)?;
        if entries.is_empty() {
            self.entries.remove(endpoint);
        }
        self.endpoint_by_id.remove(&id);
        if let Some(timer) = &entry.idle_timer {
            scheduler.cancel(timer.id);
        }
        tracing::debug!(endpoint = %entry.endpoint, id = %entry.id, "connection removed from pool");
        Some(entry)
    }

    /// Find an idle, live connection whose bind address suits `options`.
    ///
    /// Dead idle connections met on the way are removed. An unbound
    /// connection suits any request; a bound one only an identical request.
    fn scan(
        &mut self,
        endpoint: &Endpoint,
        options: &PoolOptions,
        scheduler: &dyn Scheduler,
    ) -> ReuseScan<C> {
        let mut dead = Vec::new();
        let mut claimed = None;
        let mut rebind_required = false;

        if let Some(entries) = self.entries.get_mut(endpoint) {
            for (id, entry) in entries.iter_mut() {
                let EntryState::Idle(conn) = &entry.state else {
                    continue;
                };
                if conn.is_dead() {
                    dead.push(*id);
                    continue;
                }
                let bound = conn.bind_address();
                if bound.is_any() || bound == options.bind_address {
                    if let Some(conn) = entry.claim(options, scheduler) {
                        claimed = Some((*id, conn));
                        break;
                    }
                } else {
                    rebind_required = true;
                }
            }
        }

        for id in dead {
            tracing::debug!(endpoint = %endpoint, id = %id, "discarding dead idle connection");
            self.remove_entry(endpoint, id, scheduler);
        }

        match claimed {
            Some((id, conn)) => ReuseScan {
                claimed: Some(PooledConnection { id, endpoint: endpoint.clone(), conn }),
                rebind_required: false,
            },
            None => ReuseScan { claimed: None, rebind_required },
        }
    }

    fn has_waiters(&self, endpoint: &Endpoint) -> bool {
        self.waiters.get(endpoint).is_some_and(|queue| !queue.is_empty())
    }

    /// Options of the oldest live waiter, discarding abandoned ones ahead of it.
    fn head_waiter_options(&mut self, endpoint: &Endpoint) -> Option<PoolOptions> {
        let queue = self.waiters.get_mut(endpoint)?;
        while queue.front().is_some_and(Waiter::is_abandoned) {
            queue.pop_front();
            tracing::trace!(endpoint = %endpoint, "dropping abandoned checkout");
        }
        let head = queue.front().map(|waiter| waiter.options.clone());
        if head.is_none() {
            self.waiters.remove(endpoint);
        }
        head
    }

    fn pop_waiter(&mut self, endpoint: &Endpoint) -> Option<Waiter<C>> {
        let queue = self.waiters.get_mut(endpoint)?;
        let waiter = queue.pop_front();
        if queue.is_empty() {
            self.waiters.remove(endpoint);
        }
        waiter
    }
}

/// Future returned by [`ClientSocketPool::checkout`].
///
/// Dropping it before completion hands any connection already assigned to
/// it back to the pool.
#[must_use = "futures do nothing unless polled"]
pub struct Checkout<C: PoolableConnection> {
    pool: ClientSocketPool<C>,
    state: CheckoutState<C>,
}

enum CheckoutState<C> {
    Reused(Option<PooledConnection<C>>),
    Waiting(oneshot::Receiver<Delivery<C>>),
}

impl<C: PoolableConnection> Unpin for Checkout<C> {}

impl<C: PoolableConnection> Future for Checkout<C> {
    type Output = Result<PooledConnection<C>, NetError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            CheckoutState::Reused(conn) => Poll::Ready(conn.take().ok_or(NetError::ConnectionAborted)),
            CheckoutState::Waiting(receiver) => Pin::new(receiver)
                .poll(cx)
                .map(|delivery| delivery.unwrap_or(Err(NetError::ConnectionAborted))),
        }
    }
}

impl<C: PoolableConnection> Drop for Checkout<C> {
    fn drop(&mut self) {
        let conn = match &mut self.state {
            CheckoutState::Reused(conn) => conn.take(),
            CheckoutState::Waiting(receiver) => {
                // Anything sent after close() bounces back to the pool.
                receiver.close();
                receiver.try_recv().ok().and_then(Result::ok)
            }
        };
        if let Some(conn) = conn {
            tracing::debug!(endpoint = %conn.endpoint, id = %conn.id, "checkout dropped before use, returning connection");
            let _ = self.pool.checkin(conn);
        }
    }
}

impl<C: PoolableConnection> fmt::Debug for Checkout<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            CheckoutState::Reused(_) => "reused",
            CheckoutState::Waiting(_) => "waiting",
        };
        f.debug_struct("Checkout").field("state", &state).finish()
    }
}

struct PoolInner<C> {
    state: Mutex<PoolState<C>>,
    connector: Arc<dyn Connect<Connection = C>>,
    scheduler: Arc<dyn Scheduler>,
}

impl<C> PoolInner<C> {
    fn lock(&self) -> MutexGuard<'_, PoolState<C>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<C> Drop for PoolInner<C> {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        for entry in state.entries.values().flat_map(BTreeMap::values) {
            if let Some(timer) = &entry.idle_timer {
                self.scheduler.cancel(timer.id);
            }
        }
    }
}

/// Manages a pool of connections, enforcing per-endpoint limits.
/// Requests beyond the limit are queued and served in arrival order.
///
/// Must be used from within a Tokio runtime: new connections are driven on
/// spawned tasks.
///
/// ```rust,ignore
/// use sockpool::socket::options::OptionOverrides;
/// use sockpool::socket::pool::ClientSocketPool;
///
/// let pool = ClientSocketPool::new();
/// let socket = pool.checkout("example.com:80", &OptionOverrides::new()).await?;
/// // ... write a request, read the response ...
/// pool.checkin(socket)?;
/// ```
pub struct ClientSocketPool<C = ClientSocket> {
    inner: Arc<PoolInner<C>>,
}

impl<C> Clone for ClientSocketPool<C> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl ClientSocketPool<ClientSocket> {
    /// Pool over plain TCP / Unix-domain sockets with default options.
    pub fn new() -> Self {
        Self::with_connector(TcpConnector::new())
    }
}

impl Default for ClientSocketPool<ClientSocket> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: PoolableConnection> ClientSocketPool<C> {
    /// Pool over a custom connector, with default options and a
    /// [`TokioScheduler`].
    pub fn with_connector<K>(connector: K) -> Self
    where
        K: Connect<Connection = C>,
    {
        Self::builder(connector).build()
    }

    pub fn builder<K>(connector: K) -> ClientSocketPoolBuilder<C>
    where
        K: Connect<Connection = C>,
    {
        ClientSocketPoolBuilder {
            connector: Arc::new(connector),
            scheduler: None,
            options: PoolOptions::default(),
        }
    }

    /// Check out a connection to `endpoint`.
    ///
    /// The reuse scan, limit check and queueing happen in this call, so
    /// requests for the same endpoint are served in call order whenever the
    /// returned futures are polled. The future resolves immediately when an
    /// idle connection was reused. Otherwise a new connection is opened if
    /// the endpoint is under its limit (or the requested bind address matches
    /// no idle connection), else the request queues behind earlier ones.
    ///
    /// Connector failures are returned as-is. Dropping the returned future
    /// abandons the request without leaking a connection.
    pub fn checkout(&self, endpoint: impl Into<Endpoint>, overrides: &OptionOverrides) -> Checkout<C> {
        let endpoint = endpoint.into();
        let mut state = self.inner.lock();
        let options = state.defaults.merge(overrides);
        let scan = state.scan(&endpoint, &options, &*self.inner.scheduler);

        if let Some(conn) = scan.claimed {
            tracing::trace!(endpoint = %endpoint, id = %conn.id, "reusing idle connection");
            return Checkout { pool: self.clone(), state: CheckoutState::Reused(Some(conn)) };
        }

        let (sender, receiver) = oneshot::channel();
        if scan.rebind_required || state.allows_new_connection(&endpoint, &options) {
            if scan.rebind_required {
                tracing::debug!(endpoint = %endpoint, bind = %options.bind_address, "no idle connection matches bind address");
            }
            self.start_connect(&mut state, endpoint, options, sender);
        } else {
            let queue = state.waiters.entry(endpoint.clone()).or_default();
            queue.push_back(Waiter { options, sender });
            tracing::debug!(endpoint = %endpoint, queued = queue.len(), "connection limit reached, queuing checkout");
        }
        Checkout { pool: self.clone(), state: CheckoutState::Waiting(receiver) }
    }

    /// Return a checked-out connection to the pool.
    ///
    /// Dead connections are discarded. A live one goes to the oldest queued
    /// checkout for its endpoint, or idles until its idle timeout.
    pub fn checkin(&self, conn: PooledConnection<C>) -> Result<(), PoolError> {
        let mut state = self.inner.lock();
        if !state.endpoint_by_id.contains_key(&conn.id) {
            return Err(PoolError::UnknownConnection(conn.id));
        }
        self.release(&mut state, conn);
        Ok(())
    }

    /// Discard a checked-out connection. No-op for connections the pool does
    /// not track.
    pub fn clear(&self, conn: PooledConnection<C>) {
        let PooledConnection { id, endpoint, conn } = conn;
        drop(conn);

        let mut state = self.inner.lock();
        if state.endpoint_by_id.contains_key(&id) {
            tracing::debug!(endpoint = %endpoint, id = %id, "clearing connection");
            self.unload(&mut state, &endpoint, id);
        }
    }

    /// Set a default option by key. See [`PoolOption`] for recognized keys.
    pub fn set_option(&self, key: &str, value: impl Into<OptionValue>) -> Result<(), PoolError> {
        let option = key.parse::<PoolOption>()?;
        let value = value.into();
        self.inner.lock().defaults.set(option, &value)?;
        tracing::debug!(option = %option, value = %value, "pool option updated");
        Ok(())
    }

    /// Apply every key of `config` to the defaults.
    pub fn configure(&self, config: &PoolConfig) -> Result<(), PoolError> {
        let mut state = self.inner.lock();
        let mut defaults = state.defaults.clone();
        config.apply_to(&mut defaults)?;
        state.defaults = defaults;
        Ok(())
    }

    /// Current default options.
    pub fn options(&self) -> PoolOptions {
        self.inner.lock().defaults.clone()
    }

    /// Get number of idle connections for an endpoint.
    pub fn idle_connection_count(&self, endpoint: impl Into<Endpoint>) -> usize {
        let endpoint = endpoint.into();
        let state = self.inner.lock();
        state
            .entries
            .get(&endpoint)
            .map_or(0, |entries| entries.values().filter(|entry| entry.is_idle()).count())
    }

    /// Get number of checked-out connections for an endpoint.
    pub fn active_connection_count(&self, endpoint: impl Into<Endpoint>) -> usize {
        let endpoint = endpoint.into();
        let state = self.inner.lock();
        state
            .entries
            .get(&endpoint)
            .map_or(0, |entries| entries.values().filter(|entry| !entry.is_idle()).count())
    }

    /// Get number of connects in flight for an endpoint.
    pub fn pending_connect_count(&self, endpoint: impl Into<Endpoint>) -> usize {
        self.inner.lock().pending_count(&endpoint.into())
    }

    /// Get number of checkouts queued for an endpoint.
    pub fn queued_request_count(&self, endpoint: impl Into<Endpoint>) -> usize {
        let endpoint = endpoint.into();
        let state = self.inner.lock();
        state.waiters.get(&endpoint).map_or(0, |queue| {
            queue.iter().filter(|waiter| !waiter.is_abandoned()).count()
        })
    }

    /// Get total tracked connection count, idle and checked out.
    pub fn total_connection_count(&self) -> usize {
        self.inner.lock().endpoint_by_id.len()
    }

    /// Close every idle connection. Checked-out connections are untouched.
    pub fn close_idle_connections(&self) {
        let mut state = self.inner.lock();
        let idle: Vec<(Endpoint, ConnectionId)> = state
            .entries
            .iter()
            .flat_map(|(endpoint, entries)| {
                entries
                    .values()
                    .filter(|entry| entry.is_idle())
                    .map(move |entry| (endpoint.clone(), entry.id))
            })
            .collect();

        tracing::debug!(count = idle.len(), "closing idle connections");
        for (endpoint, id) in idle {
            self.unload(&mut state, &endpoint, id);
        }
    }

    fn start_connect(
        &self,
        state: &mut PoolState<C>,
        endpoint: Endpoint,
        options: PoolOptions,
        sender: oneshot::Sender<Delivery<C>>,
    ) {
        state.begin_connect(&endpoint);
        tracing::debug!(endpoint = %endpoint, pending = state.pending_count(&endpoint), "opening new connection");

        // The connector runs on the task, outside the state lock.
        let pool = self.clone();
        tokio::spawn(async move {
            let result = pool.inner.connector.connect(&endpoint, &options).await;
            pool.finish_connect(endpoint, options, result, sender);
        });
    }

    fn finish_connect(
        &self,
        endpoint: Endpoint,
        options: PoolOptions,
        result: Result<C, NetError>,
        sender: oneshot::Sender<Delivery<C>>,
    ) {
        let mut state = self.inner.lock();
        state.end_connect(&endpoint);

        match result {
            Ok(conn) => {
                let id = state.register(&endpoint, &options);
                tracing::debug!(endpoint = %endpoint, id = %id, "connection established");
                self.deliver(&mut state, sender, PooledConnection { id, endpoint, conn });
            }
            Err(error) => {
                tracing::warn!(endpoint = %endpoint, %error, "connect failed");
                let _ = sender.send(Err(error));
                // The failed attempt no longer holds a slot.
                if state.has_waiters(&endpoint) {
                    self.serve_waiter(&mut state, &endpoint);
                }
            }
        }
    }

    /// Hand a connection to a requester, taking it back if the requester is
    /// gone.
    fn deliver(
        &self,
        state: &mut PoolState<C>,
        sender: oneshot::Sender<Delivery<C>>,
        conn: PooledConnection<C>,
    ) {
        if let Err(Ok(conn)) = sender.send(Ok(conn)) {
            tracing::debug!(endpoint = %conn.endpoint, id = %conn.id, "checkout abandoned, keeping connection");
            self.release(state, conn);
        }
    }

    /// Checkin of a tracked connection.
    fn release(&self, state: &mut PoolState<C>, conn: PooledConnection<C>) {
        let PooledConnection { id, endpoint, conn } = conn;
        if conn.is_dead() {
            tracing::debug!(endpoint = %endpoint, id = %id, "discarding dead connection on checkin");
            drop(conn);
            self.unload(state, &endpoint, id);
            return;
        }

        let Some(entry) = state.entry_mut(&endpoint, id) else {
            return;
        };
        entry.set_idle(conn);

        if state.has_waiters(&endpoint) {
            self.serve_waiter(state, &endpoint);
        }
        self.arm_idle_timer(state, &endpoint, id);
    }

    /// Remove a tracked entry, then let the head waiter use the freed slot.
    fn unload(&self, state: &mut PoolState<C>, endpoint: &Endpoint, id: ConnectionId) {
        if state.remove_entry(endpoint, id, &*self.inner.scheduler).is_none() {
            return;
        }
        if state.has_waiters(endpoint) {
            self.serve_waiter(state, endpoint);
        }
    }

    /// Try to satisfy the oldest queued checkout for `endpoint`. Leaves it
    /// queued if there is still neither a reusable connection nor room.
    fn serve_waiter(&self, state: &mut PoolState<C>, endpoint: &Endpoint) {
        let Some(options) = state.head_waiter_options(endpoint) else {
            return;
        };
        let scan = state.scan(endpoint, &options, &*self.inner.scheduler);
        let admitted = scan.claimed.is_some()
            || scan.rebind_required
            || state.allows_new_connection(endpoint, &options);
        if !admitted {
            tracing::trace!(endpoint = %endpoint, "head waiter still blocked");
            return;
        }

        let Some(waiter) = state.pop_waiter(endpoint) else {
            if let Some(conn) = scan.claimed {
                self.release(state, conn);
            }
            return;
        };
        match scan.claimed {
            Some(conn) => {
                tracing::trace!(endpoint = %endpoint, id = %conn.id, "handing connection to queued checkout");
                self.deliver(state, waiter.sender, conn);
            }
            None => self.start_connect(state, endpoint.clone(), waiter.options, waiter.sender),
        }
    }

    /// Idle -> timer armed. Reuses the entry's timer when the delay is
    /// unchanged.
    fn arm_idle_timer(&self, state: &mut PoolState<C>, endpoint: &Endpoint, id: ConnectionId) {
        let scheduler = &*self.inner.scheduler;
        let Some(entry) = state.entry_mut(endpoint, id) else {
            return;
        };
        if !entry.is_idle() {
            return;
        }
        let Some(delay) = entry.idle_timeout else {
            return;
        };

        match &entry.idle_timer {
            Some(timer) if timer.delay == delay => scheduler.enable(timer.id),
            _ => {
                if let Some(stale) = entry.idle_timer.take() {
                    scheduler.cancel(stale.id);
                }
                let timer = scheduler.schedule_once(delay, self.idle_callback(id));
                entry.idle_timer = Some(IdleTimer { id: timer, delay });
            }
        }
    }

    fn idle_callback(&self, id: ConnectionId) -> TimerCallback {
        let pool = Arc::downgrade(&self.inner);
        Arc::new(move || {
            if let Some(inner) = pool.upgrade() {
                ClientSocketPool { inner }.evict_idle(id);
            }
        })
    }

    /// Idle timer expiry. Liveness is not re-checked; only an entry that has
    /// been idle for its full timeout is removed.
    fn evict_idle(&self, id: ConnectionId) {
        let mut state = self.inner.lock();
        let Some(endpoint) = state.endpoint_by_id.get(&id).cloned() else {
            return;
        };
        if !state.entry(&endpoint, id).is_some_and(PoolEntry::is_expired) {
            tracing::trace!(endpoint = %endpoint, id = %id, "stale idle timer ignored");
            return;
        }
        tracing::debug!(endpoint = %endpoint, id = %id, "evicting idle connection");
        self.unload(&mut state, &endpoint, id);
    }
}

impl<C> fmt::Debug for ClientSocketPool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("ClientSocketPool")
            .field("defaults", &state.defaults)
            .field("connections", &state.endpoint_by_id.len())
            .field("pending", &state.pending.values().sum::<usize>())
            .field("queued", &state.waiters.values().map(VecDeque::len).sum::<usize>())
            .finish()
    }
}

/// Builder for [`ClientSocketPool`].
pub struct ClientSocketPoolBuilder<C> {
    connector: Arc<dyn Connect<Connection = C>>,
    scheduler: Option<Arc<dyn Scheduler>>,
    options: PoolOptions,
}

impl<C: PoolableConnection> ClientSocketPoolBuilder<C> {
    /// Timer service for idle eviction. Defaults to [`TokioScheduler`].
    pub fn scheduler(mut self, scheduler: impl Scheduler + 'static) -> Self {
        self.scheduler = Some(Arc::new(scheduler));
        self
    }

    /// Default options for checkouts.
    pub fn options(mut self, options: PoolOptions) -> Self {
        self.options = options;
        self
    }

    /// Apply a configuration over the current default options.
    pub fn config(mut self, config: &PoolConfig) -> Result<Self, PoolError> {
        config.apply_to(&mut self.options)?;
        Ok(self)
    }

    pub fn build(self) -> ClientSocketPool<C> {
        let scheduler = self.scheduler.unwrap_or_else(|| Arc::new(TokioScheduler::new()));
        ClientSocketPool {
            inner: Arc::new(PoolInner {
                state: Mutex::new(PoolState::new(self.options)),
                connector: self.connector,
                scheduler,
            }),
        }
    }
}
