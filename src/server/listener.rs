//! Broker server listener
//!
//! Handles the TCP accept loop and spawns one worker per connection.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};

use crate::broker::Broker;
use crate::server::config::ServerConfig;
use crate::server::connection::Connection;

/// TCP front end of a [`Broker`]
pub struct BrokerServer {
    config: ServerConfig,
    broker: Arc<Broker>,
    next_connection_id: AtomicU64,
    connection_semaphore: Option<Arc<Semaphore>>,
    shutdown_tx: watch::Sender<bool>,
}

impl BrokerServer {
    /// Create a new server in front of a broker
    pub fn new(config: ServerConfig, broker: Arc<Broker>) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            config,
            broker,
            next_connection_id: AtomicU64::new(1),
            connection_semaphore,
            shutdown_tx,
        }
    }

    /// Get a reference to the broker
    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }

    /// Run the server
    ///
    /// This method blocks until the server is shut down.
    pub async fn run(&self) -> io::Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` resolves
    ///
    /// On shutdown every connection is closed and every session torn down.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()>,
    {
        let addr = listener.local_addr()?;
        tracing::info!(
            addr = %addr,
            service = %self.config.service_name,
            "Device broker listening"
        );

        let pump = self.broker.spawn_signal_pump();

        let result = tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = self.accept_loop(&listener) => result,
        };

        self.shutdown_tx.send_replace(true);
        let closed = self.broker.shutdown().await;
        if let Some(pump) = pump {
            pump.abort();
        }

        tracing::info!(sessions = closed, service = %self.config.service_name, "Device broker stopped");
        result
    }

    async fn accept_loop(&self, listener: &TcpListener) -> io::Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    self.handle_connection(socket, peer_addr);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        // Check connection limit
        let permit = if let Some(ref sem) = self.connection_semaphore {
            match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                    return;
                }
            }
        } else {
            None
        };

        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            connection = connection_id,
            peer = %peer_addr,
            "New connection"
        );

        if let Err(e) = self.configure_socket(&socket) {
            tracing::error!(error = %e, "Failed to configure socket");
            return;
        }

        let broker = Arc::clone(&self.broker);
        let shutdown = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let _permit = permit;
            let mut connection = Connection::new(connection_id, socket, broker, shutdown);

            if let Err(e) = connection.run().await {
                tracing::debug!(
                    connection = connection_id,
                    error = %e,
                    "Connection error"
                );
            }

            tracing::debug!(connection = connection_id, "Connection closed");
        });
    }

    fn configure_socket(&self, socket: &TcpStream) -> io::Result<()> {
        if self.config.tcp_nodelay {
            socket.set_nodelay(true)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::{SinkExt, StreamExt};
    use tokio_util::codec::Framed;

    use super::*;
    use crate::protocol::{ClientCodec, ClientFrame, Request, Response, ServerFrame};

    #[tokio::test]
    async fn test_serve_and_shutdown() {
        let broker = Arc::new(Broker::new());
        let server = Arc::new(BrokerServer::new(ServerConfig::default(), Arc::clone(&broker)));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let task = {
            let server = Arc::clone(&server);
            tokio::spawn(async move {
                server
                    .serve(listener, async {
                        let _ = stop_rx.await;
                    })
                    .await
            })
        };

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut framed = Framed::new(stream, ClientCodec::new());
        framed
            .send(ClientFrame {
                id: 1,
                request: Request::Connect { pid: 9 },
            })
            .await
            .unwrap();
        let reply = framed.next().await.unwrap().unwrap();
        assert!(matches!(
            reply,
            ServerFrame::Reply {
                id: 1,
                result: Ok(Response::Connected { .. })
            }
        ));
        assert_eq!(broker.stats().await.sessions, 1);

        stop_tx.send(()).unwrap();
        task.await.unwrap().unwrap();

        assert_eq!(broker.stats().await.sessions, 0);
        let closed = tokio::time::timeout(Duration::from_secs(2), framed.next())
            .await
            .unwrap();
        assert!(closed.is_none() || matches!(closed, Some(Err(_))));
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let broker = Arc::new(Broker::new());
        let server = Arc::new(BrokerServer::new(
            ServerConfig::default().max_connections(1),
            broker,
        ));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let task = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.serve(listener, std::future::pending()).await })
        };

        let first = TcpStream::connect(addr).await.unwrap();
        let mut first = Framed::new(first, ClientCodec::new());
        first
            .send(ClientFrame {
                id: 1,
                request: Request::Connect { pid: 1 },
            })
            .await
            .unwrap();
        first.next().await.unwrap().unwrap();

        // Second connection is accepted by the OS, then dropped by the server
        let second = TcpStream::connect(addr).await.unwrap();
        let mut second = Framed::new(second, ClientCodec::new());
        let _ = second
            .send(ClientFrame {
                id: 1,
                request: Request::Connect { pid: 2 },
            })
            .await;
        let reply = tokio::time::timeout(Duration::from_secs(2), second.next())
            .await
            .unwrap();
        assert!(reply.is_none() || matches!(reply, Some(Err(_))));

        task.abort();
    }
}
