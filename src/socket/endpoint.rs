//! Endpoint keys for pool grouping.
//!
//! An endpoint is the authority a connection targets: `host:port` for TCP,
//! or a `unix://` path for local-domain sockets.

use std::fmt;
use std::path::Path;
use url::Url;

const UNIX_SCHEME: &str = "unix://";

/// Normalized key identifying a remote target.
///
/// TCP authorities are ASCII lower-cased so `Example.COM:80` and
/// `example.com:80` share connections. Local-domain paths are kept verbatim
/// since file systems are case-sensitive.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
    key: Box<str>,
}

impl Endpoint {
    /// Normalize an authority string into an endpoint key.
    pub fn new(authority: impl AsRef<str>) -> Self {
        let authority = authority.as_ref();
        let key = if is_unix(authority) {
            authority.to_string()
        } else {
            authority.to_ascii_lowercase()
        };
        Self { key: key.into_boxed_str() }
    }

    /// Build a `host:port` endpoint from a URL, filling in the scheme's
    /// default port. Returns `None` for URLs without a host or known port.
    pub fn from_url(url: &Url) -> Option<Self> {
        let host = url.host_str()?;
        let port = url.port_or_known_default()?;
        Some(Self::new(format!("{}:{}", host, port)))
    }

    /// View the key as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.key
    }

    /// Whether this endpoint names a local-domain socket.
    pub fn is_unix(&self) -> bool {
        is_unix(&self.key)
    }

    /// Socket path of a local-domain endpoint.
    pub fn unix_path(&self) -> Option<&Path> {
        self.is_unix().then(|| Path::new(&self.key[UNIX_SCHEME.len()..]))
    }
}

fn is_unix(authority: &str) -> bool {
    authority
        .get(..UNIX_SCHEME.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(UNIX_SCHEME))
}

impl From<&str> for Endpoint {
    fn from(value: &str) -> Self {
        Endpoint::new(value)
    }
}

impl From<String> for Endpoint {
    fn from(value: String) -> Self {
        Endpoint::new(value)
    }
}

impl From<&String> for Endpoint {
    fn from(value: &String) -> Self {
        Endpoint::new(value)
    }
}

impl From<&Endpoint> for Endpoint {
    fn from(value: &Endpoint) -> Self {
        value.clone()
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.key, f)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.key, f)
    }
}
