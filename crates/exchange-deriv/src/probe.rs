//! Network reachability check run before every reconnection attempt.

use crate::error::DerivError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;
use url::Url;

/// Answers whether the broker host is reachable right now.
#[async_trait]
pub trait NetworkProbe: Send + Sync {
    async fn is_reachable(&self) -> bool;
}

/// Plain TCP connect to the broker's host and port with a short timeout.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    host: String,
    port: u16,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
        }
    }

    /// Probe targeting the host and port of a `ws://` or `wss://` endpoint.
    ///
    /// # Errors
    ///
    /// Returns `DerivError::InvalidUrl` if the URL cannot be parsed or has no host.
    pub fn for_endpoint(url: &str, timeout: Duration) -> Result<Self, DerivError> {
        let parsed = Url::parse(url).map_err(|e| DerivError::invalid_url(url, e.to_string()))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| DerivError::invalid_url(url, "missing host"))?;
        let port = parsed.port_or_known_default().unwrap_or(443);
        Ok(Self::new(host, port, timeout))
    }

    #[must_use]
    pub fn target(&self) -> (&str, u16) {
        (&self.host, self.port)
    }
}

#[async_trait]
impl NetworkProbe for TcpProbe {
    async fn is_reachable(&self) -> bool {
        let attempt = TcpStream::connect((self.host.as_str(), self.port));
        let reachable = matches!(tokio::time::timeout(self.timeout, attempt).await, Ok(Ok(_)));
        debug!(host = %self.host, port = self.port, reachable, "Network probe");
        reachable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_endpoint_defaults_to_tls_port() {
        let probe = TcpProbe::for_endpoint(
            "wss://ws.derivws.com/websockets/v3?app_id=1089",
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(probe.target(), ("ws.derivws.com", 443));
    }

    #[test]
    fn test_rejects_garbage_url() {
        assert!(TcpProbe::for_endpoint("not a url", Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn test_probe_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let probe = TcpProbe::new("127.0.0.1", port, Duration::from_secs(1));
        assert!(probe.is_reachable().await);

        drop(listener);
        assert!(!probe.is_reachable().await);
    }
}
