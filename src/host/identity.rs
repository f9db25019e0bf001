//! Host identity: the key that selects a connection pool.

use std::fmt;

use url::Url;

use crate::error::{TransportError, TransportResult};

/// (scheme, host, port, proxy) tuple identifying one connection pool.
///
/// Two requests with equal keys share connections.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostKey {
    scheme: String,
    host: String,
    port: u16,
    proxy: Option<String>,
}

impl HostKey {
    pub fn new(scheme: &str, host: &str, port: u16) -> Self {
        Self {
            scheme: scheme.to_ascii_lowercase(),
            host: host.to_ascii_lowercase(),
            port,
            proxy: None,
        }
    }

    /// Derive the key for a request URL.
    pub fn from_url(url: &Url) -> TransportResult<Self> {
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(TransportError::InvalidUrl(format!(
                    "unsupported scheme {other:?} in {url}"
                )))
            }
        }
        let host = url
            .host_str()
            .ok_or_else(|| TransportError::InvalidUrl(format!("missing host in {url}")))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| TransportError::InvalidUrl(format!("missing port in {url}")))?;
        Ok(Self::new(url.scheme(), host, port))
    }

    /// Route this host's connections through a proxy address.
    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn proxy(&self) -> Option<&str> {
        self.proxy.as_deref()
    }

    pub fn is_secure(&self) -> bool {
        self.scheme == "https"
    }

    /// Value for the `Host` request header; the port is omitted when it is the scheme default.
    pub fn authority(&self) -> String {
        let default_port = if self.is_secure() { 443 } else { 80 };
        if self.port == default_port {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// `host:port` to dial, which is the proxy when one is set.
    pub fn dial_address(&self) -> String {
        match &self.proxy {
            Some(proxy) => proxy.clone(),
            None => format!("{}:{}", self.host, self.port),
        }
    }
}

impl fmt::Display for HostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)?;
        if let Some(proxy) = &self.proxy {
            write!(f, " via {proxy}")?;
        }
        Ok(())
    }
}
