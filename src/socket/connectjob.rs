use crate::base::context::IoResultExt;
use crate::base::neterror::NetError;
use crate::socket::client::{ClientSocket, PoolableConnection, SocketType};
use crate::socket::endpoint::Endpoint;
use crate::socket::options::{BindAddress, PoolOptions};
use futures::future::BoxFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpSocket, TcpStream};

/// Alias for the future a connector returns.
pub type Connecting<C> = BoxFuture<'static, Result<C, NetError>>;

/// Opens new transport connections for the pool.
///
/// Equivalent to Chromium's `ConnectJob` factory. The future must not borrow
/// the connector; the pool drives it on a spawned task. `connect` itself is
/// called on that task too, never under the pool's lock, so it may query the
/// pool. Errors are handed to the checkout caller untouched.
pub trait Connect: Send + Sync + 'static {
    type Connection: PoolableConnection;

    fn connect(&self, endpoint: &Endpoint, options: &PoolOptions) -> Connecting<Self::Connection>;
}

impl<T: Connect + ?Sized> Connect for Arc<T> {
    type Connection = T::Connection;

    fn connect(&self, endpoint: &Endpoint, options: &PoolOptions) -> Connecting<Self::Connection> {
        (**self).connect(endpoint, options)
    }
}

/// Manages the connection process: DNS -> TCP, or a Unix-domain connect for
/// `unix://` endpoints.
///
/// Honors `connect_timeout` for the whole attempt and binds to the requested
/// local address when one is set.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl TcpConnector {
    pub fn new() -> Self {
        Self
    }

    async fn connect_tcp(endpoint: Endpoint, bind: BindAddress) -> Result<TcpStream, NetError> {
        // 1. DNS Resolution
        let addrs: Vec<SocketAddr> =
            tokio::net::lookup_host(endpoint.as_str()).await.dns_context(&endpoint)?.collect();

        if addrs.is_empty() {
            return Err(NetError::NameNotResolved);
        }

        // 2. TCP Connect, first reachable address wins
        let mut last_error = NetError::AddressUnreachable;
        for addr in addrs {
            let Some(socket) = Self::open_socket(&endpoint, addr, bind)? else {
                continue;
            };
            match socket.connect(addr).await.connect_context(&endpoint) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_error = e,
            }
        }
        Err(last_error)
    }

    /// Create a socket for `addr`, bound as requested. Returns `None` when the
    /// bind address belongs to the other address family.
    fn open_socket(
        endpoint: &Endpoint,
        addr: SocketAddr,
        bind: BindAddress,
    ) -> Result<Option<TcpSocket>, NetError> {
        if let BindAddress::Addr(local) = bind {
            if local.is_ipv4() != addr.is_ipv4() {
                return Ok(None);
            }
        }

        let socket = (if addr.is_ipv4() { TcpSocket::new_v4() } else { TcpSocket::new_v6() })
            .connect_context(endpoint)?;
        if let BindAddress::Addr(local) = bind {
            socket.bind(local).connect_context(endpoint)?;
        }
        Ok(Some(socket))
    }

    #[cfg(unix)]
    async fn connect_unix(endpoint: Endpoint) -> Result<SocketType, NetError> {
        let path = endpoint.unix_path().ok_or(NetError::InvalidUrl)?;
        let stream = tokio::net::UnixStream::connect(path).await.connect_context(&endpoint)?;
        Ok(SocketType::Unix(stream))
    }

    #[cfg(not(unix))]
    async fn connect_unix(_endpoint: Endpoint) -> Result<SocketType, NetError> {
        Err(NetError::UnknownUrlScheme)
    }

    async fn establish(endpoint: Endpoint, bind: BindAddress) -> Result<SocketType, NetError> {
        if endpoint.is_unix() {
            Self::connect_unix(endpoint).await
        } else {
            Self::connect_tcp(endpoint, bind).await.map(SocketType::Tcp)
        }
    }
}

impl Connect for TcpConnector {
    type Connection = ClientSocket;

    fn connect(&self, endpoint: &Endpoint, options: &PoolOptions) -> Connecting<ClientSocket> {
        let endpoint = endpoint.clone();
        let bind = options.bind_address;
        let timeout = options.connect_timeout;

        Box::pin(async move {
            tracing::debug!(endpoint = %endpoint, bind = %bind, "connecting");
            let attempt = Self::establish(endpoint.clone(), bind);
            let socket = match timeout {
                Some(limit) => tokio::time::timeout(limit, attempt).await.map_err(|_| {
                    tracing::debug!(endpoint = %endpoint, ?limit, "connect timed out");
                    NetError::ConnectionTimedOut
                })??,
                None => attempt.await?,
            };
            Ok::<_, NetError>(ClientSocket::new(socket, bind))
        })
    }
}
