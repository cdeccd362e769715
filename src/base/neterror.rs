use thiserror::Error;

/// Transport-level failures reported by connectors.
///
/// Codes follow Chromium's `net_error_list.h` so they stay stable across
/// connector implementations.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum NetError {
    // Connection Errors
    #[error("Connection closed (TCP FIN)")]
    ConnectionClosed,
    #[error("Connection reset (TCP RST)")]
    ConnectionReset,
    #[error("Connection refused")]
    ConnectionRefused,
    #[error("Connection aborted")]
    ConnectionAborted,
    #[error("Connection failed")]
    ConnectionFailed,
    #[error("Name not resolved")]
    NameNotResolved,
    #[error("Internet disconnected")]
    InternetDisconnected,
    #[error("Socket not connected")]
    SocketNotConnected,
    #[error("Address invalid")]
    AddressInvalid,
    #[error("Address unreachable")]
    AddressUnreachable,
    #[error("Connection timed out")]
    ConnectionTimedOut,
    #[error("Network access denied")]
    NetworkAccessDenied,
    #[error("Address in use")]
    AddressInUse,
    #[error("No buffer space")]
    NoBufferSpace,

    #[error("Invalid URL")]
    InvalidUrl,
    #[error("Unknown URL scheme")]
    UnknownUrlScheme,

    // Custom codes (outside Chromium's ranges)
    #[error("Socket closed by remote")]
    SocketRemoteClosed,
    #[error("Data received unexpectedly on idle socket")]
    DataReceivedUnexpectedly,

    #[error("Unknown error code: {0}")]
    Unknown(i32),
}

impl NetError {
    pub fn as_i32(&self) -> i32 {
        match self {
            NetError::ConnectionClosed => -100,
            NetError::ConnectionReset => -101,
            NetError::ConnectionRefused => -102,
            NetError::ConnectionAborted => -103,
            NetError::ConnectionFailed => -104,
            NetError::NameNotResolved => -105,
            NetError::InternetDisconnected => -106,
            NetError::AddressInvalid => -108,
            NetError::AddressUnreachable => -109,
            NetError::SocketNotConnected => -112,
            NetError::ConnectionTimedOut => -118,
            NetError::NetworkAccessDenied => -138,
            NetError::AddressInUse => -147,
            NetError::NoBufferSpace => -176,

            NetError::InvalidUrl => -300,
            NetError::UnknownUrlScheme => -302,

            NetError::SocketRemoteClosed => -10001,
            NetError::DataReceivedUnexpectedly => -10002,
            NetError::Unknown(code) => *code,
        }
    }
}

impl From<i32> for NetError {
    fn from(code: i32) -> Self {
        match code {
            -100 => NetError::ConnectionClosed,
            -101 => NetError::ConnectionReset,
            -102 => NetError::ConnectionRefused,
            -103 => NetError::ConnectionAborted,
            -104 => NetError::ConnectionFailed,
            -105 => NetError::NameNotResolved,
            -106 => NetError::InternetDisconnected,
            -108 => NetError::AddressInvalid,
            -109 => NetError::AddressUnreachable,
            -112 => NetError::SocketNotConnected,
            -118 => NetError::ConnectionTimedOut,
            -138 => NetError::NetworkAccessDenied,
            -147 => NetError::AddressInUse,
            -176 => NetError::NoBufferSpace,
            -300 => NetError::InvalidUrl,
            -302 => NetError::UnknownUrlScheme,
            -10001 => NetError::SocketRemoteClosed,
            -10002 => NetError::DataReceivedUnexpectedly,
            _ => NetError::Unknown(code),
        }
    }
}
