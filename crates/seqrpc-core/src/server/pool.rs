//! Bounded worker pool that processes requests.
//!
//! Connection readers submit `Job`s into a bounded backlog; a fixed number of
//! worker tasks take jobs from it, dispatch them through the service registry
//! and hand the outcome to the job's reservation. A full backlog makes
//! `submit` wait, which stalls the submitting connection's reader rather than
//! growing without limit.

use super::sequencer::Reservation;
use crate::config::ServerConfig;
use crate::protocol::{Fault, Outcome, Request};
use crate::registry::ServiceRegistry;
use crate::{Result, RpcError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// A request together with the output slot reserved for it.
#[derive(Debug)]
pub struct Job {
    pub request: Request,
    pub reservation: Reservation,
}

/// Fixed-size pool of request-processing workers.
pub struct WorkerPool {
    sender: RwLock<Option<mpsc::Sender<Job>>>,
    depth: Arc<AtomicUsize>,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Start `config.workers` workers on the current tokio runtime.
    pub fn start(registry: Arc<ServiceRegistry>, config: &ServerConfig) -> Arc<Self> {
        let (sender, receiver) = mpsc::channel::<Job>(config.backlog.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let depth = Arc::new(AtomicUsize::new(0));
        let worker_count = config.workers.max(1);

        let workers = (0..worker_count)
            .map(|index| {
                tokio::spawn(worker_loop(
                    index,
                    Arc::clone(&receiver),
                    Arc::clone(&registry),
                    Arc::clone(&depth),
                    config.request_deadline,
                ))
            })
            .collect();

        info!(
            "Worker pool started: {} workers, backlog {}",
            worker_count, config.backlog
        );

        Arc::new(Self {
            sender: RwLock::new(Some(sender)),
            depth,
            workers: std::sync::Mutex::new(workers),
        })
    }

    /// Queue a job, waiting while the backlog is full.
    ///
    /// Fails with `PoolClosed` after `shutdown`; the job is dropped, which
    /// completes its reservation with a transport fault.
    pub async fn submit(&self, job: Job) -> Result<()> {
        let sender = self
            .sender
            .read()
            .ok()
            .and_then(|guard| guard.clone())
            .ok_or(RpcError::PoolClosed)?;

        let depth = self.depth.fetch_add(1, Ordering::SeqCst) + 1;
        trace!("Submitting request {} (backlog depth {})", job.request.id, depth);

        if sender.send(job).await.is_err() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            return Err(RpcError::PoolClosed);
        }
        Ok(())
    }

    /// Jobs submitted but not yet picked up by a worker.
    pub fn backlog_depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.read().map(|guard| guard.is_none()).unwrap_or(true)
    }

    /// Stop accepting jobs. Workers finish the backlog, then exit.
    pub fn shutdown(&self) {
        if let Ok(mut guard) = self.sender.write() {
            if guard.take().is_some() {
                info!("Worker pool shutting down");
            }
        }
    }

    /// Shut down and wait for every worker to exit.
    pub async fn join(&self) {
        self.shutdown();
        let workers = match self.workers.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(_) => return,
        };
        for worker in workers {
            if let Err(e) = worker.await {
                warn!("Worker ended abnormally: {}", e);
            }
        }
    }
}

async fn worker_loop(
    index: usize,
    receiver: Arc<Mutex<mpsc::Receiver<Job>>>,
    registry: Arc<ServiceRegistry>,
    depth: Arc<AtomicUsize>,
    deadline: Option<Duration>,
) {
    loop {
        let job = { receiver.lock().await.recv().await };
        let Some(Job {
            request,
            reservation,
        }) = job
        else {
            break;
        };
        depth.fetch_sub(1, Ordering::SeqCst);

        debug!("Worker {} processing {}", index, request);
        let outcome = process(&registry, request, deadline).await;
        reservation.complete(outcome);
    }
    debug!("Worker {} stopped", index);
}

/// Effective processing deadline: the tighter of the caller's and the server's.
fn effective_deadline(request: &Request, server: Option<Duration>) -> Option<Duration> {
    match (request.deadline(), server) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// Resolve and invoke the method a request targets.
///
/// Every failure is turned into a `Fault`; nothing here can take a worker down.
pub async fn process(registry: &ServiceRegistry, request: Request, deadline: Option<Duration>) -> Outcome {
    let invoker = match registry.resolve(&request) {
        Ok(invoker) => invoker,
        Err(fault) => {
            warn!("Rejecting {}: {}", request, fault);
            return Err(fault);
        }
    };

    let limit = effective_deadline(&request, deadline);
    let id = request.id;
    let params = request.params;
    let call = tokio::task::spawn_blocking(move || invoker.invoke(&params));

    let joined = match limit {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!("Request {} exceeded its deadline of {:?}", id, limit);
                return Err(Fault::deadline(limit));
            }
        },
        None => call.await,
    };

    match joined {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(message)) => {
            debug!("Request {} failed: {}", id, message);
            Err(Fault::invocation(message))
        }
        Err(e) if e.is_panic() => {
            warn!("Request {} panicked", id);
            Err(Fault::invocation("method panicked"))
        }
        Err(e) => Err(Fault::invocation(format!("method did not complete: {}", e))),
    }
}
