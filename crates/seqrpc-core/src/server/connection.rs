//! One accepted client connection.
//!
//! The read half is consumed by a single sequential loop: each decoded request
//! gets its output slot reserved before it is handed to the worker pool. The
//! write half belongs to a writer task that drains the sequencer's released
//! responses onto the socket in order.
//!
//! A per-connection semaphore bounds the requests read but not yet written.
//! At the limit the reader stops consuming the socket, so a peer that never
//! reads its responses stalls itself instead of growing server memory.

use super::pool::{Job, WorkerPool};
use super::sequencer::ResponseSequencer;
use crate::protocol::{
    decode_frame, encode_frame, read_frame, write_frame, Fault, Frame, Response,
};
use crate::{Result, RpcError};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Semaphore};
use tracing::{debug, error, info, warn};

/// Serve one connection until EOF, a connection-fatal error, or shutdown.
///
/// Requests already handed to the pool are not cancelled when this returns;
/// their responses are written if the peer is still reading.
pub async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    pool: Arc<WorkerPool>,
    max_in_flight: usize,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> Result<()> {
    let (mut reader, writer) = stream.into_split();
    let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
    let sequencer = ResponseSequencer::new(outbox_tx);
    let in_flight = Arc::new(Semaphore::new(max_in_flight.max(1)));

    tokio::spawn(write_responses(writer, outbox_rx, Arc::clone(&in_flight), peer));

    loop {
        // Returned by the writer once this request's response leaves the outbox.
        tokio::select! {
            permit = in_flight.acquire() => {
                permit
                    .map_err(|_| RpcError::transport("response writer is gone"))?
                    .forget();
            }
            _ = shutdown_rx.changed() => {
                debug!("Closing connection {} for shutdown", peer);
                return Ok(());
            }
        }

        let frame = tokio::select! {
            result = read_frame(&mut reader) => {
                match result? {
                    Some(f) => f,
                    None => {
                        info!("Client {} disconnected", peer);
                        return Ok(());
                    }
                }
            }
            _ = shutdown_rx.changed() => {
                debug!("Closing connection {} for shutdown", peer);
                return Ok(());
            }
        };

        let request = match decode_frame(&frame)? {
            Frame::Request(request) => request,
            Frame::Response(response) => {
                return Err(RpcError::malformed(format!(
                    "unexpected response frame {} from client",
                    response
                )));
            }
        };

        debug!("Received a request from {}: {}", peer, request);
        let reservation = sequencer.reserve(request.id);

        if let Err(e) = pool.submit(Job { request, reservation }).await {
            // The dropped job has already answered with a transport fault.
            warn!("Request from {} not processed: {}", peer, e);
        }
    }
}

/// Write released responses in order until every sender is gone.
///
/// A failed write is logged and not retried; remaining responses are drained
/// and discarded so the sequencer never blocks on a dead peer.
async fn write_responses(
    mut writer: OwnedWriteHalf,
    mut outbox: mpsc::UnboundedReceiver<Response>,
    in_flight: Arc<Semaphore>,
    peer: SocketAddr,
) {
    let mut broken = false;

    while let Some(response) = outbox.recv().await {
        let _slot = InFlightSlot(&in_flight);
        if broken {
            debug!("Discarding response {} for closed connection {}", response.id, peer);
            continue;
        }

        let bytes = match encode_frame(&Frame::Response(response.clone())) {
            Ok(bytes) => bytes,
            Err(e) => {
                // The caller still needs exactly one response for this id.
                warn!("Unable to encode response {}: {}", response, e);
                let fallback = Response::failure(
                    response.id,
                    Fault::invocation(format!("result could not be encoded: {}", e)),
                );
                match encode_frame(&Frame::Response(fallback)) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        error!("Unable to encode fallback response {}: {}", response.id, e);
                        broken = true;
                        continue;
                    }
                }
            }
        };

        match write_frame(&mut writer, &bytes).await {
            Ok(()) => debug!("Sent response {} to {}", response, peer),
            Err(e) => {
                error!("Unable to send response {} to {}: {}", response, peer, e);
                broken = true;
            }
        }
    }

    debug!("Writer for {} finished", peer);
}

/// Gives one in-flight permit back when a response has been handled.
struct InFlightSlot<'a>(&'a Semaphore);

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        self.0.add_permits(1);
    }
}
