//! TCP RPC client.
//!
//! One `RpcClient` owns one connection and may be shared by any number of
//! concurrent callers. The connection is a single ordered stream without
//! request ids in the framing layer's control, so the client has to make sure
//! every caller reads exactly the response to its own request:
//!
//! 1. Under the send lock a caller writes its request and takes the next
//!    ticket. Tickets are therefore handed out in the order requests hit the
//!    wire, and a failed write takes no ticket.
//! 2. Callers then wait until the "now serving" counter equals their ticket,
//!    read one frame under the receive lock, advance the counter and wake the
//!    others. The server answers in request order, so the frame read on a
//!    caller's turn is its own response.
//!
//! # Cancellation
//!
//! The send/receive exchange runs on its own task. A caller that gives up
//! (deadline, or its future is dropped) leaves that task running, so its
//! ticket is still served and its response is consumed and discarded.
//!
//! # Failure
//!
//! A read, decode or id-mismatch failure leaves the stream at an unknown
//! position. The connection is then marked broken: the read half is dropped,
//! every caller still waiting gets a transport error on its turn, and later
//! sends fail without taking a ticket.

use crate::config::ClientConfig;
use crate::protocol::{decode_frame, encode_frame, read_frame, write_frame, Frame, Request, Response};
use crate::value::Value;
use crate::{Result, RpcError};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info};

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-wide unique, increasing request id.
fn next_request_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::SeqCst)
}

struct ClientInner {
    /// Send lock. `None` once the client has been closed.
    writer: Mutex<Option<OwnedWriteHalf>>,
    /// Receive lock. `None` once the connection is broken or fully closed.
    reader: Mutex<Option<OwnedReadHalf>>,
    /// Set on the first failure that desynchronises the stream.
    broken: AtomicBool,
    /// Set by `close`; the read half is released once no ticket is left.
    closing: AtomicBool,
    /// Tickets handed out so far; the next caller to send gets this value.
    admitted: AtomicU64,
    /// Ticket whose turn it is to read.
    serving: watch::Sender<u64>,
}

/// Client connected to one RPC server.
pub struct RpcClient {
    inner: Arc<ClientInner>,
    addr: SocketAddr,
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("addr", &self.addr)
            .field("admitted", &self.inner.admitted.load(Ordering::SeqCst))
            .field("serving", &*self.inner.serving.borrow())
            .finish()
    }
}

impl RpcClient {
    /// Connect to a server.
    ///
    /// Uses the configured connection timeout from `ClientConfig`.
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        info!("Connecting to {}...", addr);

        let stream = tokio::time::timeout(ClientConfig::CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                RpcError::transport(format!(
                    "connecting to {} timed out after {:?}",
                    addr,
                    ClientConfig::CONNECT_TIMEOUT
                ))
            })??;

        Ok(Self::from_stream(stream, addr))
    }

    /// Resolve `host:port` and connect to the first address that accepts.
    pub async fn connect_host(host: &str, port: u16) -> Result<Self> {
        let addrs = tokio::net::lookup_host((host, port)).await?;
        let mut last_error = RpcError::transport(format!("{} did not resolve", host));
        for addr in addrs {
            match Self::connect(addr).await {
                Ok(client) => return Ok(client),
                Err(e) => last_error = e,
            }
        }
        Err(last_error)
    }

    fn from_stream(stream: TcpStream, addr: SocketAddr) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Unable to set TCP_NODELAY: {}", e);
        }
        let (reader, writer) = stream.into_split();
        let (serving, _) = watch::channel(0u64);

        debug!("Client connected to {}", addr);

        Self {
            inner: Arc::new(ClientInner {
                writer: Mutex::new(Some(writer)),
                reader: Mutex::new(Some(reader)),
                broken: AtomicBool::new(false),
                closing: AtomicBool::new(false),
                admitted: AtomicU64::new(0),
                serving,
            }),
            addr,
        }
    }

    /// Call `service.method(params)` and wait for its result.
    ///
    /// `Ok(None)` means the method returned nothing. A fault reported by the
    /// server is returned as `RpcError::Remote`.
    pub async fn call(
        &self,
        service: &str,
        method: &str,
        params: Vec<Value>,
    ) -> Result<Option<Value>> {
        self.call_with_deadline(service, method, params, None).await
    }

    /// Like `call`, but give up after `deadline`. `None` waits indefinitely.
    ///
    /// The deadline is also sent to the server as the processing deadline. A
    /// call that gives up may still run remotely.
    pub async fn call_with_deadline(
        &self,
        service: &str,
        method: &str,
        params: Vec<Value>,
        deadline: Option<Duration>,
    ) -> Result<Option<Value>> {
        let request = Request::new(next_request_id(), service, method, params).with_deadline(deadline);
        let id = request.id;

        let inner = Arc::clone(&self.inner);
        let exchange = tokio::spawn(async move { inner.exchange(request).await });

        let joined = match deadline {
            Some(limit) => match tokio::time::timeout(limit, exchange).await {
                Ok(joined) => joined,
                Err(_) => {
                    debug!("Request {} gave up after {:?}", id, limit);
                    return Err(RpcError::DeadlineExceeded(limit));
                }
            },
            None => exchange.await,
        };

        let response = joined
            .map_err(|e| RpcError::transport(format!("call task for request {} failed: {}", id, e)))??;
        debug!("Got response {} for request id {}", response, id);
        response.into_result()
    }

    /// Close the connection. Later calls fail with `RpcError::Closed`.
    ///
    /// The write direction is shut down at once. The read half is dropped as
    /// soon as every call already sent has read its response, which closes the
    /// socket. Calls in flight while closing may fail with a transport error.
    pub async fn close(&self) -> Result<()> {
        let shutdown = {
            let mut writer = self.inner.writer.lock().await;
            self.inner.closing.store(true, Ordering::SeqCst);
            match writer.take() {
                Some(mut stream) => {
                    info!("Closing connection to {}", self.addr);
                    stream.shutdown().await
                }
                None => Ok(()),
            }
        };
        self.inner.release_reader_if_drained().await;
        shutdown?;
        Ok(())
    }

    /// Whether an earlier failure made this connection unusable.
    pub fn is_broken(&self) -> bool {
        self.inner.broken.load(Ordering::SeqCst)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl ClientInner {
    async fn exchange(&self, request: Request) -> Result<Response> {
        let ticket = self.send(&request).await?;
        self.receive(ticket, request.id).await
    }

    /// Write the request and take a ticket. Fails without taking one.
    async fn send(&self, request: &Request) -> Result<u64> {
        let frame = encode_frame(&Frame::Request(request.clone()))?;

        let mut writer = self.writer.lock().await;
        if writer.is_none() {
            return Err(RpcError::Closed);
        }
        if self.broken.load(Ordering::SeqCst) {
            writer.take();
            return Err(RpcError::transport("connection is broken by an earlier failure"));
        }
        let stream = writer.as_mut().ok_or(RpcError::Closed)?;

        debug!("Sending a request {} to the server", request);
        if let Err(e) = write_frame(stream, &frame).await {
            error!("Couldn't send a request {} to the server: {}", request, e);
            // A partial frame may be on the wire.
            self.broken.store(true, Ordering::SeqCst);
            writer.take();
            return Err(e);
        }

        Ok(self.admitted.fetch_add(1, Ordering::SeqCst))
    }

    /// Wait for `ticket`'s turn, read one response, pass the turn on.
    async fn receive(&self, ticket: u64, id: u64) -> Result<Response> {
        let mut turn = self.serving.subscribe();
        // The sender lives in `self`, so this only returns once it is our turn.
        let _ = turn.wait_for(|serving| *serving == ticket).await;

        let result = {
            let mut reader = self.reader.lock().await;
            let result = match reader.as_mut() {
                Some(stream) => read_response(stream, id).await,
                None => Err(RpcError::transport("connection is no longer readable")),
            };
            if let Err(e) = &result {
                if reader.take().is_some() {
                    error!("Connection broken while reading ticket {}: {}", ticket, e);
                }
                self.broken.store(true, Ordering::SeqCst);
            }
            result
        };
        // Advanced on every path so later tickets are never stranded.
        self.serving.send_modify(|serving| *serving += 1);
        self.release_reader_if_drained().await;

        result
    }

    /// Drop the read half once closing and no sent call awaits a response.
    async fn release_reader_if_drained(&self) {
        if !self.closing.load(Ordering::SeqCst) || !self.drained() {
            return;
        }
        // Re-checked under the lock; a reader holding it still has a ticket.
        let mut reader = self.reader.lock().await;
        if self.drained() && reader.take().is_some() {
            debug!("Read half released after close");
        }
    }

    fn drained(&self) -> bool {
        *self.serving.borrow() == self.admitted.load(Ordering::SeqCst)
    }
}

/// Read the next frame and check that it answers request `id`.
async fn read_response(reader: &mut OwnedReadHalf, id: u64) -> Result<Response> {
    let payload = read_frame(reader)
        .await?
        .ok_or_else(|| RpcError::transport("server closed the connection"))?;

    let response = match decode_frame(&payload)? {
        Frame::Response(response) => response,
        Frame::Request(request) => {
            return Err(RpcError::malformed(format!(
                "unexpected request frame {} from server",
                request
            )))
        }
    };

    if response.id != id {
        return Err(RpcError::malformed(format!(
            "response {} does not match request {}",
            response.id, id
        )));
    }
    Ok(response)
}
