//! Network readiness probe for a locally launched engine.

use std::time::Duration;

use tokio::net::TcpStream;

/// How readiness is judged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProbeProtocol {
    /// A TCP connection can be established.
    Tcp,
    /// A TCP connection succeeds and `GET /` returns a success status.
    #[default]
    Http,
}

/// Polls `127.0.0.1:<port>` until it answers.
#[derive(Debug, Clone)]
pub struct PortProbe {
    port: u16,
    protocol: ProbeProtocol,
    interval: Duration,
    /// Reusable HTTP client for probes.
    http_client: reqwest::Client,
}

impl PortProbe {
    /// Create a probe for `port` that retries every `interval`.
    pub fn new(port: u16, protocol: ProbeProtocol, interval: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .no_proxy()
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            port,
            protocol,
            interval,
            http_client,
        }
    }

    /// Port being probed.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Single probe attempt.
    pub async fn is_ready(&self) -> bool {
        let addr = format!("127.0.0.1:{}", self.port);
        if !self.tcp_check(&addr).await {
            return false;
        }
        match self.protocol {
            ProbeProtocol::Tcp => true,
            ProbeProtocol::Http => self.http_check(&format!("http://{}/", addr)).await,
        }
    }

    /// Retry until the port answers. Never gives up on its own.
    pub async fn wait(&self) {
        tracing::info!("Waiting for localhost:{}", self.port);
        loop {
            if self.is_ready().await {
                tracing::debug!("localhost:{} is ready", self.port);
                return;
            }
            tokio::time::sleep(self.interval).await;
        }
    }

    async fn tcp_check(&self, addr: &str) -> bool {
        match tokio::time::timeout(Duration::from_secs(2), TcpStream::connect(addr)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                tracing::trace!("Probe {} not accepting connections: {}", addr, e);
                false
            }
            Err(_) => false, // Timeout
        }
    }

    async fn http_check(&self, url: &str) -> bool {
        match self.http_client.get(url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::trace!("Probe {} failed: {}", url, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    async fn free_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    async fn serve_status(status_line: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {}\r\ncontent-length: 2\r\nconnection: close\r\n\r\n{{}}",
                    status_line
                );
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
        port
    }

    #[tokio::test]
    async fn test_closed_port_is_not_ready() {
        let port = free_port().await;
        let probe = PortProbe::new(port, ProbeProtocol::Tcp, Duration::from_millis(10));
        assert!(!probe.is_ready().await);
    }

    #[tokio::test]
    async fn test_tcp_probe_accepts_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let probe = PortProbe::new(port, ProbeProtocol::Tcp, Duration::from_millis(10));
        assert!(probe.is_ready().await);
    }

    #[tokio::test]
    async fn test_http_probe_requires_success_status() {
        let ok = serve_status("200 OK").await;
        let unavailable = serve_status("503 Service Unavailable").await;

        let probe = PortProbe::new(ok, ProbeProtocol::Http, Duration::from_millis(10));
        assert!(probe.is_ready().await);

        let probe = PortProbe::new(unavailable, ProbeProtocol::Http, Duration::from_millis(10));
        assert!(!probe.is_ready().await);
    }

    #[tokio::test]
    async fn test_wait_returns_once_port_opens() {
        let port = free_port().await;
        let probe = PortProbe::new(port, ProbeProtocol::Tcp, Duration::from_millis(20));

        let opener = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            TcpListener::bind(("127.0.0.1", port)).await.unwrap()
        });

        tokio::time::timeout(Duration::from_secs(5), probe.wait())
            .await
            .expect("probe should see the port open");
        drop(opener.await.unwrap());
    }
}
