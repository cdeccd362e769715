//! Pool options: defaults, per-checkout overrides, and string-keyed setters.
//!
//! | Key | Default | Effect |
//! |-----|---------|--------|
//! | `host-connection-limit` | 8 | established + pending per endpoint, `<= 0` is unlimited |
//! | `idle-timeout-ms` | 10000 | idle lifetime, `<= 0` disables eviction |
//! | `connect-timeout-ms` | 30000 | handed to the connector |
//! | `bind-address` | `""` | local address to bind, `""` means any |

use crate::socket::error::PoolError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_HOST_CONNECTION_LIMIT: usize = 8;
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_millis(10_000);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Local address a connection is bound to, or should be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BindAddress {
    /// No preference; the OS picks the source address.
    #[default]
    Any,
    Addr(SocketAddr),
}

impl BindAddress {
    pub fn is_any(&self) -> bool {
        matches!(self, BindAddress::Any)
    }

    pub fn addr(&self) -> Option<SocketAddr> {
        match self {
            BindAddress::Any => None,
            BindAddress::Addr(addr) => Some(*addr),
        }
    }
}

impl FromStr for BindAddress {
    type Err = std::net::AddrParseError;

    /// Accepts `""` (any), a bare IP (port 0), or `ip:port`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(BindAddress::Any);
        }
        if let Ok(ip) = s.parse::<IpAddr>() {
            return Ok(BindAddress::Addr(SocketAddr::new(ip, 0)));
        }
        s.parse::<SocketAddr>().map(BindAddress::Addr)
    }
}

impl fmt::Display for BindAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindAddress::Any => Ok(()),
            BindAddress::Addr(addr) => write!(f, "{}", addr),
        }
    }
}

impl From<SocketAddr> for BindAddress {
    fn from(addr: SocketAddr) -> Self {
        BindAddress::Addr(addr)
    }
}

impl From<IpAddr> for BindAddress {
    fn from(ip: IpAddr) -> Self {
        BindAddress::Addr(SocketAddr::new(ip, 0))
    }
}

/// Recognized option keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolOption {
    HostConnectionLimit,
    IdleTimeoutMs,
    ConnectTimeoutMs,
    BindAddress,
}

impl PoolOption {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolOption::HostConnectionLimit => "host-connection-limit",
            PoolOption::IdleTimeoutMs => "idle-timeout-ms",
            PoolOption::ConnectTimeoutMs => "connect-timeout-ms",
            PoolOption::BindAddress => "bind-address",
        }
    }
}

impl FromStr for PoolOption {
    type Err = PoolError;

    fn from_str(key: &str) -> Result<Self, Self::Err> {
        match key {
            "host-connection-limit" => Ok(PoolOption::HostConnectionLimit),
            "idle-timeout-ms" => Ok(PoolOption::IdleTimeoutMs),
            "connect-timeout-ms" => Ok(PoolOption::ConnectTimeoutMs),
            "bind-address" => Ok(PoolOption::BindAddress),
            _ => Err(PoolError::UnknownOption(key.to_string())),
        }
    }
}

impl fmt::Display for PoolOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Untyped option value, coerced to the key's type on assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    Int(i64),
    Str(String),
}

impl OptionValue {
    fn to_int(&self, key: PoolOption) -> Result<i64, PoolError> {
        match self {
            OptionValue::Int(v) => Ok(*v),
            OptionValue::Str(s) => {
                s.trim().parse::<i64>().map_err(|_| PoolError::invalid_value(key.as_str(), s))
            }
        }
    }

    fn to_bind_address(&self, key: PoolOption) -> Result<BindAddress, PoolError> {
        match self {
            OptionValue::Str(s) => {
                s.parse::<BindAddress>().map_err(|_| PoolError::invalid_value(key.as_str(), s))
            }
            OptionValue::Int(v) => Err(PoolError::invalid_value(key.as_str(), v)),
        }
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Int(v) => write!(f, "{}", v),
            OptionValue::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for OptionValue {
    fn from(v: i64) -> Self {
        OptionValue::Int(v)
    }
}

impl From<i32> for OptionValue {
    fn from(v: i32) -> Self {
        OptionValue::Int(v.into())
    }
}

impl From<u32> for OptionValue {
    fn from(v: u32) -> Self {
        OptionValue::Int(v.into())
    }
}

impl From<usize> for OptionValue {
    fn from(v: usize) -> Self {
        OptionValue::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<Duration> for OptionValue {
    fn from(v: Duration) -> Self {
        OptionValue::Int(i64::try_from(v.as_millis()).unwrap_or(i64::MAX))
    }
}

impl From<&str> for OptionValue {
    fn from(v: &str) -> Self {
        OptionValue::Str(v.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(v: String) -> Self {
        OptionValue::Str(v)
    }
}

impl From<SocketAddr> for OptionValue {
    fn from(v: SocketAddr) -> Self {
        OptionValue::Str(v.to_string())
    }
}

fn limit_from_int(v: i64) -> usize {
    usize::try_from(v).unwrap_or(0)
}

fn timeout_from_ms(ms: i64) -> Option<Duration> {
    u64::try_from(ms).ok().filter(|ms| *ms > 0).map(Duration::from_millis)
}

fn ms_from_timeout(timeout: Option<Duration>) -> i64 {
    timeout.map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}

/// Effective options for a checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolOptions {
    /// Max established + pending connections per endpoint. `0` is unlimited.
    pub host_connection_limit: usize,
    /// How long an unused connection stays pooled. `None` disables eviction.
    pub idle_timeout: Option<Duration>,
    /// Passed through to the connector, which owns its meaning. The pool
    /// only normalizes the `connect-timeout-ms` integer: a value `<= 0`
    /// becomes `None` (no timeout), anything else that many milliseconds.
    pub connect_timeout: Option<Duration>,
    pub bind_address: BindAddress,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            host_connection_limit: DEFAULT_HOST_CONNECTION_LIMIT,
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            bind_address: BindAddress::Any,
        }
    }
}

impl PoolOptions {
    /// Layer per-call overrides over these defaults.
    pub fn merge(&self, overrides: &OptionOverrides) -> PoolOptions {
        PoolOptions {
            host_connection_limit: overrides
                .host_connection_limit
                .unwrap_or(self.host_connection_limit),
            idle_timeout: overrides.idle_timeout.unwrap_or(self.idle_timeout),
            connect_timeout: overrides.connect_timeout.unwrap_or(self.connect_timeout),
            bind_address: overrides.bind_address.unwrap_or(self.bind_address),
        }
    }

    /// Assign an option by key, coercing the value to the key's type.
    pub fn set(&mut self, key: PoolOption, value: &OptionValue) -> Result<(), PoolError> {
        match key {
            PoolOption::HostConnectionLimit => {
                self.host_connection_limit = limit_from_int(value.to_int(key)?);
            }
            PoolOption::IdleTimeoutMs => {
                self.idle_timeout = timeout_from_ms(value.to_int(key)?);
            }
            PoolOption::ConnectTimeoutMs => {
                self.connect_timeout = timeout_from_ms(value.to_int(key)?);
            }
            PoolOption::BindAddress => {
                self.bind_address = value.to_bind_address(key)?;
            }
        }
        Ok(())
    }

    pub fn is_unlimited(&self) -> bool {
        self.host_connection_limit == 0
    }
}

/// Per-checkout option overrides. Unset fields fall back to pool defaults.
///
/// ```
/// use sockpool::socket::options::OptionOverrides;
/// use std::time::Duration;
///
/// let overrides = OptionOverrides::new()
///     .host_connection_limit(2)
///     .idle_timeout(Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionOverrides {
    host_connection_limit: Option<usize>,
    idle_timeout: Option<Option<Duration>>,
    connect_timeout: Option<Option<Duration>>,
    bind_address: Option<BindAddress>,
}

impl OptionOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// `<= 0` means unlimited.
    pub fn host_connection_limit(mut self, limit: i64) -> Self {
        self.host_connection_limit = Some(limit_from_int(limit));
        self
    }

    /// A zero duration disables idle eviction for connections this checkout
    /// creates or claims.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(Some(timeout).filter(|d| !d.is_zero()));
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(Some(timeout).filter(|d| !d.is_zero()));
        self
    }

    pub fn bind_address(mut self, addr: impl Into<BindAddress>) -> Self {
        self.bind_address = Some(addr.into());
        self
    }

    /// Assign an override by key, with the same coercion as
    /// [`PoolOptions::set`].
    pub fn set(mut self, key: &str, value: impl Into<OptionValue>) -> Result<Self, PoolError> {
        let option = key.parse::<PoolOption>()?;
        let value = value.into();
        match option {
            PoolOption::HostConnectionLimit => {
                self.host_connection_limit = Some(limit_from_int(value.to_int(option)?));
            }
            PoolOption::IdleTimeoutMs => {
                self.idle_timeout = Some(timeout_from_ms(value.to_int(option)?));
            }
            PoolOption::ConnectTimeoutMs => {
                self.connect_timeout = Some(timeout_from_ms(value.to_int(option)?));
            }
            PoolOption::BindAddress => {
                self.bind_address = Some(value.to_bind_address(option)?);
            }
        }
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Serializable pool configuration, keyed like [`PoolOption`].
///
/// ```
/// use sockpool::socket::options::PoolConfig;
///
/// let config = PoolConfig::from_json(r#"{ "host-connection-limit": 4 }"#).unwrap();
/// let options = config.into_options().unwrap();
/// assert_eq!(options.host_connection_limit, 4);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PoolConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_connection_limit: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_timeout_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,
}

impl PoolConfig {
    pub fn from_json(json: &str) -> Result<Self, PoolError> {
        serde_json::from_str(json).map_err(|e| PoolError::Config(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, PoolError> {
        serde_json::to_string_pretty(self).map_err(|e| PoolError::Config(e.to_string()))
    }

    /// Apply the keys present in this config over `options`.
    pub fn apply_to(&self, options: &mut PoolOptions) -> Result<(), PoolError> {
        if let Some(limit) = self.host_connection_limit {
            options.set(PoolOption::HostConnectionLimit, &limit.into())?;
        }
        if let Some(ms) = self.idle_timeout_ms {
            options.set(PoolOption::IdleTimeoutMs, &ms.into())?;
        }
        if let Some(ms) = self.connect_timeout_ms {
            options.set(PoolOption::ConnectTimeoutMs, &ms.into())?;
        }
        if let Some(addr) = &self.bind_address {
            options.set(PoolOption::BindAddress, &addr.as_str().into())?;
        }
        Ok(())
    }

    /// Defaults with this config applied.
    pub fn into_options(self) -> Result<PoolOptions, PoolError> {
        let mut options = PoolOptions::default();
        self.apply_to(&mut options)?;
        Ok(options)
    }
}

impl From<&PoolOptions> for PoolConfig {
    fn from(options: &PoolOptions) -> Self {
        Self {
            host_connection_limit: Some(
                i64::try_from(options.host_connection_limit).unwrap_or(i64::MAX),
            ),
            idle_timeout_ms: Some(ms_from_timeout(options.idle_timeout)),
            connect_timeout_ms: Some(ms_from_timeout(options.connect_timeout)),
            bind_address: Some(options.bind_address.to_string()),
        }
    }
}
