//! TCP RPC server.
//!
//! Accepts connections and serves each one on its own task. Every connection
//! has its own response sequencer, so ordering is enforced per connection;
//! all connections share one bounded worker pool and the service registry.
//!
//! # Shutdown
//!
//! `RpcServerHandle::shutdown` stops the accept loop, tells every connection
//! reader to stop, and closes the worker pool. Jobs already queued are still
//! processed; nothing waits on a peer.

mod connection;
mod pool;
mod sequencer;

pub use pool::{process, Job, WorkerPool};
pub use sequencer::{Reservation, ResponseSequencer};

use crate::config::ServerConfig;
use crate::registry::ServiceRegistry;
use crate::Result;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info};

/// Handle to a running server. Dropping shuts the server down.
pub struct RpcServerHandle {
    pub addr: SocketAddr,
    pub port: u16,
    pool: Arc<WorkerPool>,
    active_connections: Arc<AtomicUsize>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    conn_shutdown_tx: watch::Sender<bool>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl RpcServerHandle {
    /// Get the address the server is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Number of connections currently being served.
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Jobs waiting for a worker.
    pub fn backlog_depth(&self) -> usize {
        self.pool.backlog_depth()
    }

    /// Stop accepting connections and work.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.conn_shutdown_tx.send(true);
        self.pool.shutdown();
    }

    /// Shut down, then wait for the accept loop and every worker to finish.
    pub async fn wait(mut self) {
        self.shutdown();
        if let Some(handle) = self.task_handle.take() {
            let _ = handle.await;
        }
        self.pool.join().await;
    }
}

impl Drop for RpcServerHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

/// RPC server entry point.
pub struct RpcServer;

impl RpcServer {
    /// Bind `addr` and start serving `registry` in background tasks.
    ///
    /// Port 0 lets the OS pick; the handle reports the actual address.
    pub async fn start(
        addr: SocketAddr,
        registry: Arc<ServiceRegistry>,
        config: ServerConfig,
    ) -> Result<RpcServerHandle> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;

        info!(
            "RPC server listening on {} with {} services",
            addr,
            registry.len()
        );

        let pool = WorkerPool::start(registry, &config);
        let max_in_flight = config.max_in_flight;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (conn_shutdown_tx, conn_shutdown_rx) = watch::channel(false);
        let active_connections = Arc::new(AtomicUsize::new(0));

        let task_handle = tokio::spawn(Self::accept_loop(
            listener,
            Arc::clone(&pool),
            max_in_flight,
            shutdown_rx,
            conn_shutdown_rx,
            Arc::clone(&active_connections),
        ));

        Ok(RpcServerHandle {
            addr,
            port: addr.port(),
            pool,
            active_connections,
            shutdown_tx: Some(shutdown_tx),
            conn_shutdown_tx,
            task_handle: Some(task_handle),
        })
    }

    async fn accept_loop(
        listener: TcpListener,
        pool: Arc<WorkerPool>,
        max_in_flight: usize,
        mut shutdown_rx: oneshot::Receiver<()>,
        conn_shutdown_rx: watch::Receiver<bool>,
        active_connections: Arc<AtomicUsize>,
    ) {
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("RPC server shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            info!("Accepted connection from {}", peer_addr);
                            if let Err(e) = stream.set_nodelay(true) {
                                debug!("Unable to set TCP_NODELAY for {}: {}", peer_addr, e);
                            }

                            active_connections.fetch_add(1, Ordering::Relaxed);
                            let pool = Arc::clone(&pool);
                            let conns = Arc::clone(&active_connections);
                            let mut conn_shutdown = conn_shutdown_rx.clone();

                            tokio::spawn(async move {
                                if let Err(e) = connection::serve_connection(
                                    stream,
                                    peer_addr,
                                    pool,
                                    max_in_flight,
                                    &mut conn_shutdown,
                                )
                                .await
                                {
                                    error!("Connection {} ended: {}", peer_addr, e);
                                }
                                conns.fetch_sub(1, Ordering::Relaxed);
                            });
                        }
                        Err(e) => {
                            error!("Unable to accept a connection: {}", e);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{decode_frame, encode_frame, read_frame, write_frame, Frame, Request};
    use crate::registry::Service;
    use crate::value::Value;
    use tokio::net::TcpStream;

    fn registry() -> Arc<ServiceRegistry> {
        Arc::new(
            ServiceRegistry::builder()
                .register(Service::new("math").method("add", |a: i64, b: i64| a + b))
                .build(),
        )
    }

    async fn start() -> RpcServerHandle {
        RpcServer::start(
            "127.0.0.1:0".parse().unwrap(),
            registry(),
            ServerConfig::default().with_workers(2),
        )
        .await
        .unwrap()
    }

    async fn send(stream: &mut TcpStream, frame: Frame) {
        let bytes = encode_frame(&frame).unwrap();
        write_frame(stream, &bytes).await.unwrap();
    }

    async fn receive(stream: &mut TcpStream) -> Frame {
        let payload = read_frame(stream).await.unwrap().unwrap();
        decode_frame(&payload).unwrap()
    }

    #[tokio::test]
    async fn test_server_start_and_shutdown() {
        let mut handle = start().await;
        assert!(handle.port > 0);
        assert_eq!(handle.addr.ip(), std::net::Ipv4Addr::LOCALHOST);
        handle.shutdown();
    }

    #[tokio::test]
    async fn test_server_add_roundtrip() {
        let handle = start().await;
        let mut stream = TcpStream::connect(handle.addr()).await.unwrap();

        let request = Request::new(1, "math", "add", vec![Value::Int(2), Value::Int(3)]);
        send(&mut stream, Frame::Request(request)).await;

        match receive(&mut stream).await {
            Frame::Response(response) => {
                assert_eq!(response.id, 1);
                assert_eq!(response.result, Some(Value::Int(5)));
                assert!(response.error.is_none());
            }
            other => panic!("Expected a response, got: {:?}", other),
        }
        handle.wait().await;
    }

    #[tokio::test]
    async fn test_server_reports_unknown_service_and_keeps_connection() {
        let handle = start().await;
        let mut stream = TcpStream::connect(handle.addr()).await.unwrap();

        send(&mut stream, Frame::Request(Request::new(1, "ghost", "m", vec![]))).await;
        send(
            &mut stream,
            Frame::Request(Request::new(2, "math", "add", vec![Value::Int(1), Value::Int(1)])),
        )
        .await;

        let Frame::Response(first) = receive(&mut stream).await else {
            panic!("Expected a response frame");
        };
        assert_eq!(first.id, 1);
        assert!(first.error.unwrap().message.contains("ghost"));

        let Frame::Response(second) = receive(&mut stream).await else {
            panic!("Expected a response frame");
        };
        assert_eq!(second.id, 2);
        assert_eq!(second.result, Some(Value::Int(2)));
    }

    async fn wait_for_connections(handle: &RpcServerHandle, expected: usize) -> bool {
        for _ in 0..50 {
            if handle.active_connections() == expected {
                return true;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_server_counts_active_connections() {
        let handle = start().await;
        assert_eq!(handle.active_connections(), 0);

        let first = TcpStream::connect(handle.addr()).await.unwrap();
        let second = TcpStream::connect(handle.addr()).await.unwrap();
        assert!(wait_for_connections(&handle, 2).await);

        drop(first);
        assert!(wait_for_connections(&handle, 1).await);
        drop(second);
        assert!(wait_for_connections(&handle, 0).await);
    }

    #[tokio::test]
    async fn test_server_closes_connection_on_malformed_frame() {
        let handle = start().await;
        let mut stream = TcpStream::connect(handle.addr()).await.unwrap();

        let payload = b"not valid json";
        let mut frame = (payload.len() as u32).to_be_bytes().to_vec();
        frame.extend_from_slice(payload);
        write_frame(&mut stream, &frame).await.unwrap();

        // The server drops the connection: the next read sees EOF or a reset.
        let result = read_frame(&mut stream).await;
        assert!(!matches!(result, Ok(Some(_))));
        drop(handle);
    }
}
