#![forbid(unsafe_code)]

//! Correlated return slots for synchronous evaluate requests.
//!
//! Each outstanding request owns a one-shot channel keyed by its
//! [`RequestId`]. Replies carrying an id go to that request; uncorrelated
//! replies go to the oldest outstanding request. Closing the slots (the
//! transport died) disconnects every waiter, which then observes
//! [`BridgeError::TransportClosed`].

use std::collections::BTreeMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chartbridge_core::{BridgeError, Reply, RequestId, Result, ScriptError};

type Outcome = std::result::Result<String, ScriptError>;

#[derive(Default)]
struct SlotTable {
    waiting: BTreeMap<RequestId, SyncSender<Outcome>>,
    closed: bool,
}

/// Table of outstanding requests. Cheap to clone; clones share the table.
#[derive(Clone, Default)]
pub struct ReturnSlots {
    table: Arc<Mutex<SlotTable>>,
}

impl ReturnSlots {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SlotTable> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Open a slot for `id`. Fails once the slots are closed.
    pub fn open(&self, id: RequestId) -> Result<PendingReturn> {
        let mut table = self.lock();
        if table.closed {
            return Err(BridgeError::TransportClosed);
        }
        let (tx, rx) = mpsc::sync_channel(1);
        table.waiting.insert(id, tx);
        tracing::trace!(request_id = %id, outstanding = table.waiting.len(), "return slot opened");
        Ok(PendingReturn {
            id,
            rx,
            slots: self.clone(),
        })
    }

    /// Route a reply to its waiter. Returns `false` if nobody was waiting.
    pub fn deliver(&self, reply: Reply) -> bool {
        self.complete(reply.request, Ok(reply.value))
    }

    /// Fail a request with a script error. `None` targets the oldest request.
    pub fn fail(&self, request: Option<RequestId>, error: ScriptError) -> bool {
        self.complete(request, Err(error))
    }

    fn complete(&self, request: Option<RequestId>, outcome: Outcome) -> bool {
        let sender = {
            let mut table = self.lock();
            match request {
                Some(id) => table.waiting.remove(&id).map(|tx| (id, tx)),
                None => table.waiting.pop_first(),
            }
        };
        let Some((id, tx)) = sender else {
            tracing::warn!(request_id = ?request, "reply with no waiting request dropped");
            return false;
        };
        // The waiter may have timed out and dropped its receiver.
        let delivered = tx.try_send(outcome).is_ok();
        tracing::trace!(request_id = %id, delivered, "reply routed");
        delivered
    }

    /// Disconnect every waiter and refuse new requests.
    pub fn close_all(&self) {
        let mut table = self.lock();
        table.closed = true;
        let dropped = table.waiting.len();
        table.waiting.clear();
        if dropped > 0 {
            tracing::debug!(dropped, "return slots closed with requests outstanding");
        }
    }

    /// Whether [`close_all`](Self::close_all) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of outstanding requests.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.lock().waiting.len()
    }

    fn cancel(&self, id: RequestId) {
        self.lock().waiting.remove(&id);
    }
}

impl std::fmt::Debug for ReturnSlots {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.lock();
        f.debug_struct("ReturnSlots")
            .field("outstanding", &table.waiting.len())
            .field("closed", &table.closed)
            .finish()
    }
}

/// Receiving end of one request. Dropping it cancels the slot.
#[derive(Debug)]
pub struct PendingReturn {
    id: RequestId,
    rx: Receiver<Outcome>,
    slots: ReturnSlots,
}

impl PendingReturn {
    /// Correlation id of this request.
    #[must_use]
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Block until the reply arrives, the transport closes, or `timeout`.
    pub fn wait(self, timeout: Duration) -> Result<String> {
        match self.rx.recv_timeout(timeout) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(script_error)) => Err(BridgeError::Script(script_error)),
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(request_id = %self.id, ?timeout, "evaluate request timed out");
                Err(BridgeError::Timeout {
                    waiting_for: "evaluate reply",
                    after: timeout,
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(BridgeError::TransportClosed),
        }
    }
}

impl Drop for PendingReturn {
    fn drop(&mut self) {
        self.slots.cancel(self.id);
    }
}
