//! Ergonomic error context helpers.
//!
//! Provides an extension trait for converting IO errors raised while
//! connecting into `NetError` codes, logging the endpoint they concern.

use crate::base::neterror::NetError;
use crate::socket::endpoint::Endpoint;
use std::io::{self, ErrorKind};

/// Extension trait for adding context to IO Results.
pub trait IoResultExt<T> {
    /// Convert an IO error raised while connecting to `endpoint`.
    ///
    /// # Example
    /// ```ignore
    /// use sockpool::base::context::IoResultExt;
    ///
    /// let stream = TcpStream::connect(addr).await.connect_context(&endpoint)?;
    /// ```
    fn connect_context(self, endpoint: &Endpoint) -> Result<T, NetError>;

    /// Convert an IO error raised while resolving `endpoint`.
    fn dns_context(self, endpoint: &Endpoint) -> Result<T, NetError>;
}

impl<T> IoResultExt<T> for Result<T, io::Error> {
    fn connect_context(self, endpoint: &Endpoint) -> Result<T, NetError> {
        self.map_err(|e| {
            tracing::debug!(endpoint = %endpoint, error = %e, "connect failed");
            net_error_from_io(&e)
        })
    }

    fn dns_context(self, endpoint: &Endpoint) -> Result<T, NetError> {
        self.map_err(|e| {
            tracing::debug!(endpoint = %endpoint, error = %e, "name resolution failed");
            NetError::NameNotResolved
        })
    }
}

/// Map an IO error onto the closest net error code.
pub fn net_error_from_io(error: &io::Error) -> NetError {
    match error.kind() {
        ErrorKind::ConnectionRefused => NetError::ConnectionRefused,
        ErrorKind::ConnectionReset => NetError::ConnectionReset,
        ErrorKind::ConnectionAborted => NetError::ConnectionAborted,
        ErrorKind::NotConnected => NetError::SocketNotConnected,
        ErrorKind::AddrInUse => NetError::AddressInUse,
        ErrorKind::AddrNotAvailable => NetError::AddressInvalid,
        ErrorKind::TimedOut => NetError::ConnectionTimedOut,
        ErrorKind::PermissionDenied => NetError::NetworkAccessDenied,
        ErrorKind::UnexpectedEof => NetError::ConnectionClosed,
        ErrorKind::NotFound => NetError::AddressUnreachable,
        _ => NetError::ConnectionFailed,
    }
}
