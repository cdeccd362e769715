use crate::base::neterror::NetError;
use crate::socket::options::BindAddress;
use std::io::ErrorKind;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;

/// What the pool needs to know about a connection it manages.
///
/// Both checks must be cheap and synchronous; the pool calls them while
/// scanning idle connections.
pub trait PoolableConnection: Send + 'static {
    /// Returns true if the connection can no longer carry a request.
    fn is_dead(&self) -> bool;

    /// Local address the connection was asked to bind to.
    fn bind_address(&self) -> BindAddress;
}

/// Transport under a [`ClientSocket`].
#[derive(Debug)]
pub enum SocketType {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

/// Result of a non-blocking read probe on an idle socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Probe {
    Idle,
    Closed,
    DataPending,
}

impl Probe {
    fn from_read(result: std::io::Result<usize>) -> Self {
        match result {
            Ok(0) => Probe::Closed,      // EOF - peer closed
            Ok(_) => Probe::DataPending, // Unsolicited bytes on an idle socket
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => Probe::Idle,
            Err(_) => Probe::Closed,
        }
    }
}

impl SocketType {
    /// Probe the socket without blocking.
    ///
    /// A byte read here is discarded, so a socket reporting `DataPending` is
    /// no longer usable for a fresh request.
    fn probe(&self) -> Probe {
        let mut buf = [0u8; 1];
        match self {
            SocketType::Tcp(s) => {
                // peer_addr() returns Err if socket is disconnected
                if s.peer_addr().is_err() {
                    return Probe::Closed;
                }
                Probe::from_read(s.try_read(&mut buf))
            }
            #[cfg(unix)]
            SocketType::Unix(s) => Probe::from_read(s.try_read(&mut buf)),
        }
    }
}

impl AsyncRead for SocketType {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            SocketType::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(unix)]
            SocketType::Unix(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for SocketType {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            SocketType::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(unix)]
            SocketType::Unix(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            SocketType::Tcp(s) => Pin::new(s).poll_flush(cx),
            #[cfg(unix)]
            SocketType::Unix(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            SocketType::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(unix)]
            SocketType::Unix(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

/// A socket opened by [`TcpConnector`](crate::socket::connectjob::TcpConnector),
/// remembering the bind address it was opened with.
///
/// The requested address is kept rather than `local_addr()`, since a
/// request for port 0 binds to an ephemeral port.
#[derive(Debug)]
pub struct ClientSocket {
    inner: SocketType,
    bind_address: BindAddress,
}

impl ClientSocket {
    pub fn new(socket: SocketType, bind_address: BindAddress) -> Self {
        Self { inner: socket, bind_address }
    }

    /// Check if the socket is usable for a new request.
    /// Follows Chromium's IdleSocket::IsUsable() pattern.
    pub fn is_usable(&self) -> Result<(), NetError> {
        match self.inner.probe() {
            Probe::Idle => Ok(()),
            Probe::Closed => Err(NetError::SocketRemoteClosed),
            Probe::DataPending => Err(NetError::DataReceivedUnexpectedly),
        }
    }

    /// Get a reference to the inner socket.
    pub fn inner(&self) -> &SocketType {
        &self.inner
    }

    /// Get a mutable reference to the inner socket.
    pub fn inner_mut(&mut self) -> &mut SocketType {
        &mut self.inner
    }

    /// Consume and return the inner socket.
    pub fn into_inner(self) -> SocketType {
        self.inner
    }
}

impl PoolableConnection for ClientSocket {
    fn is_dead(&self) -> bool {
        self.is_usable().is_err()
    }

    fn bind_address(&self) -> BindAddress {
        self.bind_address
    }
}

impl AsyncRead for ClientSocket {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for ClientSocket {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    async fn pair() -> (ClientSocket, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, server) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (ClientSocket::new(SocketType::Tcp(client.unwrap()), BindAddress::Any), server.unwrap().0)
    }

    #[tokio::test]
    async fn test_fresh_socket_is_usable() {
        let (client, _server) = pair().await;
        assert_eq!(client.is_usable(), Ok(()));
        assert!(!client.is_dead());
    }

    #[tokio::test]
    async fn test_closed_peer_is_dead() {
        let (client, server) = pair().await;
        drop(server);
        // Give the FIN time to arrive.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(client.is_usable(), Err(NetError::SocketRemoteClosed));
        assert!(client.is_dead());
    }

    #[tokio::test]
    async fn test_unsolicited_data_is_dead() {
        let (client, mut server) = pair().await;
        server.write_all(b"x").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(client.is_usable(), Err(NetError::DataReceivedUnexpectedly));
    }

    #[tokio::test]
    async fn test_bind_address_is_requested_one() {
        let (client, _server) = pair().await;
        assert!(client.bind_address().is_any());

        let socket = client.into_inner();
        let bound = BindAddress::Addr("127.0.0.1:0".parse().unwrap());
        let client = ClientSocket::new(socket, bound);
        assert_eq!(client.bind_address(), bound);
    }
}
