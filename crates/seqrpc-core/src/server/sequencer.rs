//! Per-connection response sequencer.
//!
//! Responses must leave a connection in the order their requests arrived, even
//! though workers finish them in any order. The connection reader reserves a
//! placeholder for each request before it is processed; workers fill
//! placeholders as they finish; the longest filled prefix of the queue is
//! released to the connection's writer after every completion. This is a
//! reorder buffer: a finished response waits in its slot, never in a worker.
//!
//! A `Reservation` that is dropped without being completed (its job was
//! rejected by the pool, or lost at shutdown) completes itself with a
//! transport fault so later responses are never held back.

use crate::protocol::{Fault, Outcome, Response};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, warn};

struct Slot {
    response: Response,
    filled: bool,
}

struct SequencerState {
    /// Reserved slots not yet released, in reservation order.
    slots: VecDeque<Slot>,
    /// Position of `slots[0]` in the overall reservation sequence.
    head: u64,
    /// Position the next reservation receives.
    next: u64,
}

/// Releases completed responses in reservation order.
pub struct ResponseSequencer {
    state: Mutex<SequencerState>,
    outbox: mpsc::UnboundedSender<Response>,
}

impl ResponseSequencer {
    /// Create a sequencer releasing responses into `outbox`.
    pub fn new(outbox: mpsc::UnboundedSender<Response>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SequencerState {
                slots: VecDeque::new(),
                head: 0,
                next: 0,
            }),
            outbox,
        })
    }

    fn lock(&self) -> MutexGuard<'_, SequencerState> {
        // Every mutation under the lock is single-step, so a poisoned queue is
        // still consistent.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reserve the next output position for request `id`.
    pub fn reserve(self: &Arc<Self>, id: u64) -> Reservation {
        let mut state = self.lock();
        let position = state.next;
        state.next += 1;
        state.slots.push_back(Slot {
            response: Response::placeholder(id),
            filled: false,
        });

        Reservation {
            sequencer: Arc::clone(self),
            id,
            position,
            completed: false,
        }
    }

    /// Fill the slot at `position` and release every response that is now
    /// at the head of the queue.
    fn complete(&self, position: u64, outcome: Outcome) {
        let mut state = self.lock();

        let Some(index) = position.checked_sub(state.head) else {
            warn!("Slot {} completed after release", position);
            return;
        };
        let Some(slot) = state.slots.get_mut(index as usize) else {
            warn!("Slot {} was never reserved", position);
            return;
        };
        if slot.filled {
            warn!("Slot {} completed twice", position);
            return;
        }
        slot.response.fill(outcome);
        slot.filled = true;

        while state.slots.front().is_some_and(|slot| slot.filled) {
            if let Some(slot) = state.slots.pop_front() {
                state.head += 1;
                debug!("Releasing response {}", slot.response);
                // Sent under the lock so the channel sees release order.
                if self.outbox.send(slot.response).is_err() {
                    debug!("Connection writer is gone; dropping released response");
                }
            }
        }
    }

    /// Number of reserved responses not yet released.
    pub fn pending(&self) -> usize {
        self.lock().slots.len()
    }
}

/// A reserved output position, bound to one request.
///
/// Travels with its request to the worker that processes it.
pub struct Reservation {
    sequencer: Arc<ResponseSequencer>,
    id: u64,
    position: u64,
    completed: bool,
}

impl Reservation {
    /// Id of the request this reservation belongs to.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Fill the reserved response with the processing outcome.
    pub fn complete(mut self, outcome: Outcome) {
        self.completed = true;
        self.sequencer.complete(self.position, outcome);
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.completed {
            warn!("Request {} abandoned before completion", self.id);
            self.sequencer.complete(
                self.position,
                Err(Fault::transport(format!(
                    "request {} was abandoned before it could be processed",
                    self.id
                ))),
            );
        }
    }
}

impl std::fmt::Debug for Reservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation")
            .field("id", &self.id)
            .field("position", &self.position)
            .finish()
    }
}
