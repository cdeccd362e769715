//! Pool API misuse errors.
//!
//! Transport failures travel as [`NetError`](crate::base::neterror::NetError)
//! through `checkout`; the variants here signal a caller handing the pool
//! something it does not recognize.

use crate::socket::pool::ConnectionId;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The connection was never issued by this pool or was already discarded.
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    #[error("Unknown option: {0}")]
    UnknownOption(String),

    #[error("Invalid value for option {key}: {value}")]
    InvalidOptionValue { key: String, value: String },

    #[error("Invalid pool configuration: {0}")]
    Config(String),
}

impl PoolError {
    pub(crate) fn invalid_value(key: &str, value: impl ToString) -> Self {
        PoolError::InvalidOptionValue { key: key.to_string(), value: value.to_string() }
    }
}
