//! Stable-port services.
//!
//! The MCP proxy and the CDP bridge both bind a stable port and forward
//! connections to a backend endpoint. They are bound before the backend
//! launches and stay bound across backend restarts, so external clients
//! never observe an address change; only the forwarding target moves.
//!
//! The forwarding transport here is intentionally plain TCP relaying; the
//! protocol-aware internals live in the server itself.

use async_trait::async_trait;
use bos_common::{ServerError, ServerResult};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A stable-port forwarding service.
#[async_trait]
pub trait ServerProxy: Send + Sync {
    /// Bind `listen_port` and start forwarding to `backend_port`.
    /// `allow_remote` widens the bind address beyond loopback.
    async fn start(
        &mut self,
        listen_port: u16,
        backend_port: u16,
        allow_remote: bool,
    ) -> ServerResult<()>;

    /// Retarget forwarding to a new backend port. Existing connections keep
    /// their old target; new connections use the new one.
    fn set_backend_port(&self, backend_port: u16);

    /// Stop accepting and release the port.
    async fn stop(&mut self);
}

/// Default proxy: TCP accept loop with per-connection bidirectional copy.
#[derive(Default)]
pub struct TcpServerProxy {
    backend_port: Arc<AtomicU16>,
    accept_task: Option<JoinHandle<()>>,
}

impl TcpServerProxy {
    pub fn new() -> Self {
        Self::default()
    }

    async fn accept_loop(listener: TcpListener, backend_port: Arc<AtomicU16>) {
        loop {
            let (inbound, peer) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("Proxy accept failed: {}", e);
                    continue;
                }
            };

            let port = backend_port.load(Ordering::Acquire);
            tokio::spawn(async move {
                if let Err(e) = Self::forward(inbound, port).await {
                    debug!("Proxy connection from {} ended: {}", peer, e);
                }
            });
        }
    }

    async fn forward(mut inbound: TcpStream, backend_port: u16) -> std::io::Result<()> {
        let mut outbound = TcpStream::connect(("127.0.0.1", backend_port)).await?;
        tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await?;
        Ok(())
    }
}

#[async_trait]
impl ServerProxy for TcpServerProxy {
    async fn start(
        &mut self,
        listen_port: u16,
        backend_port: u16,
        allow_remote: bool,
    ) -> ServerResult<()> {
        if self.accept_task.is_some() {
            return Err(ServerError::proxy("proxy already started"));
        }

        let bind_addr = if allow_remote { "0.0.0.0" } else { "127.0.0.1" };
        let listener = TcpListener::bind((bind_addr, listen_port))
            .await
            .map_err(|e| {
                ServerError::proxy(format!("bind {}:{} failed: {}", bind_addr, listen_port, e))
            })?;

        info!(
            "Proxy listening on {}:{} -> 127.0.0.1:{}",
            bind_addr, listen_port, backend_port
        );

        self.backend_port.store(backend_port, Ordering::Release);
        let backend = Arc::clone(&self.backend_port);
        self.accept_task = Some(tokio::spawn(Self::accept_loop(listener, backend)));
        Ok(())
    }

    fn set_backend_port(&self, backend_port: u16) {
        self.backend_port.store(backend_port, Ordering::Release);
        debug!("Proxy retargeted to backend port {}", backend_port);
    }

    async fn stop(&mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
            let _ = task.await;
            debug!("Proxy stopped");
        }
    }
}

impl Drop for TcpServerProxy {
    fn drop(&mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::find_available_port;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn echo_backend() -> (u16, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let task = tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 256];
                    while let Ok(n) = stream.read(&mut buf).await {
                        if n == 0 || stream.write_all(&buf[..n]).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });
        (port, task)
    }

    #[tokio::test]
    async fn test_forwards_bytes() {
        let (backend_port, _backend) = echo_backend().await;
        let listen_port = find_available_port().unwrap();

        let mut proxy = TcpServerProxy::new();
        proxy.start(listen_port, backend_port, false).await.unwrap();

        let mut client = TcpStream::connect(("127.0.0.1", listen_port)).await.unwrap();
        client.write_all(b"ping").await.unwrap();

        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        proxy.stop().await;
    }

    #[tokio::test]
    async fn test_retarget_applies_to_new_connections() {
        let (first_port, _first) = echo_backend().await;
        let listen_port = find_available_port().unwrap();

        let mut proxy = TcpServerProxy::new();
        proxy.start(listen_port, first_port, false).await.unwrap();

        // Second backend prefixes replies so the target is distinguishable.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let second_port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 256];
                if let Ok(n) = stream.read(&mut buf).await {
                    let mut reply = b"v2:".to_vec();
                    reply.extend_from_slice(&buf[..n]);
                    let _ = stream.write_all(&reply).await;
                }
            }
        });

        proxy.set_backend_port(second_port);

        let mut client = TcpStream::connect(("127.0.0.1", listen_port)).await.unwrap();
        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 7];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"v2:ping");

        proxy.stop().await;
    }

    #[tokio::test]
    async fn test_stable_port_survives_stop_of_backend() {
        let (backend_port, backend) = echo_backend().await;
        let listen_port = find_available_port().unwrap();

        let mut proxy = TcpServerProxy::new();
        proxy.start(listen_port, backend_port, false).await.unwrap();

        backend.abort();

        // The proxy port is still accepting even though the backend is gone.
        let client = TcpStream::connect(("127.0.0.1", listen_port)).await;
        assert!(client.is_ok());

        proxy.stop().await;
    }

    #[tokio::test]
    async fn test_double_start_rejected() {
        let listen_port = find_available_port().unwrap();
        let mut proxy = TcpServerProxy::new();
        proxy.start(listen_port, 1, false).await.unwrap();
        assert!(proxy.start(listen_port, 1, false).await.is_err());
        proxy.stop().await;
    }
}
