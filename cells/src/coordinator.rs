// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Request/reply coordinator
//!
//! The `coordinator` module tracks outstanding requests keyed by message
//! id, applies deadlines through one shared timer task, and delivers
//! replies or timeout failures back to the originator. The pending table
//! holds a single promise per request; blocking waits and async callbacks
//! are both sugar over it, so the at-most-one-completion invariant lives
//! in exactly one place: removal from the table.
//!

use crate::{BoxPayload, Envelope, Error};

use futures::{StreamExt, future::BoxFuture};

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::time::DelayQueue;

use tracing::{debug, error, warn};

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Outcome of a request: the reply payload or the failure that ended it.
pub type ReplyResult = Result<BoxPayload, Error>;

/// Callback attached to an asynchronous send, invoked exactly once with
/// the reply, the timeout, or the cancellation.
pub type ReplyCallback =
    Box<dyn FnOnce(ReplyResult) -> BoxFuture<'static, ()> + Send>;

/// Ids the coordinator remembers after completion, so a second reply for
/// an already answered request can be told apart from a plain late reply.
const RECENT_CAPACITY: usize = 1024;

type PendingTable = HashMap<u64, oneshot::Sender<ReplyResult>>;

enum TimerCmd {
    Register { id: u64, deadline: Instant },
    Cancel { id: u64 },
}

/// Per-domain request/reply bookkeeping.
///
/// State machine per outstanding request: WAITING until exactly one of
/// {reply delivered, timeout fired, explicit cancel} removes the entry;
/// the removal under the table lock is the single irreversible
/// transition, so the promise can never complete twice.
#[derive(Clone)]
pub(crate) struct ReplyCoordinator {
    pending: Arc<Mutex<PendingTable>>,
    recent: Arc<Mutex<RecentIds>>,
    timer: mpsc::UnboundedSender<TimerCmd>,
}

impl ReplyCoordinator {
    /// Creates the coordinator and spawns its shared timer task.
    pub(crate) fn new() -> Self {
        let pending: Arc<Mutex<PendingTable>> =
            Arc::new(Mutex::new(HashMap::new()));
        let recent = Arc::new(Mutex::new(RecentIds::new(RECENT_CAPACITY)));
        let (timer, commands) = mpsc::unbounded_channel();

        // The task owns no sender, so it ends when the last coordinator
        // clone drops.
        tokio::spawn(run_timer(pending.clone(), recent.clone(), commands));
        ReplyCoordinator {
            pending,
            recent,
            timer,
        }
    }

    /// Registers a pending request and arms its deadline.
    pub(crate) fn register(
        &self,
        id: u64,
        timeout: Duration,
    ) -> oneshot::Receiver<ReplyResult> {
        let (sender, receiver) = oneshot::channel();
        lock(&self.pending).insert(id, sender);
        let deadline = Instant::now() + timeout;
        if self.timer.send(TimerCmd::Register { id, deadline }).is_err() {
            warn!("Timer task is gone, request {} will not time out.", id);
        }
        receiver
    }

    /// Completes a pending request with something other than a reply
    /// (routing failure, cancellation), if it is still waiting.
    ///
    /// Returns true when this call performed the terminal transition.
    pub(crate) fn complete(&self, id: u64, result: ReplyResult) -> bool {
        self.settle(id, result, false)
    }

    fn settle(&self, id: u64, result: ReplyResult, answered: bool) -> bool {
        let Some(sender) = lock(&self.pending).remove(&id) else {
            return false;
        };
        lock(&self.recent).push(id, answered);
        let _ = self.timer.send(TimerCmd::Cancel { id });
        // The receiver may already be dropped; nothing left to notify.
        let _ = sender.send(result);
        true
    }

    /// Cancels a pending request. The waiting side observes
    /// `Error::Cancelled`; a reply arriving later is discarded.
    pub(crate) fn cancel(&self, id: u64) -> bool {
        self.complete(id, Err(Error::Cancelled(id)))
    }

    /// Hands an inbound reply envelope to the matching pending request.
    ///
    /// A reply whose request already completed is dropped: loudly when
    /// the id was answered before (a protocol bug in some handler),
    /// quietly when the request timed out or was cancelled first.
    pub(crate) fn accept_reply(&self, envelope: Envelope) {
        let id = envelope.id();
        let result = match envelope.failure() {
            Some(failure) => Err(failure.clone()),
            None => Ok(envelope.into_payload()),
        };
        if self.settle(id, result, true) {
            return;
        }
        // Answered before: a second reply is a protocol bug somewhere.
        // Timed out or cancelled before: merely late, normal churn.
        if lock(&self.recent).was_answered(id) {
            error!(
                "Dropping duplicate reply for message {}: {}",
                id,
                Error::DuplicateReply(id)
            );
        } else {
            debug!("Discarding late or unsolicited reply for message {}.", id);
        }
    }

    /// True while a request is still waiting. Test observability hook.
    #[cfg(test)]
    pub(crate) fn is_pending(&self, id: u64) -> bool {
        lock(&self.pending).contains_key(&id)
    }
}

/// Timer loop shared by every deadline of one coordinator. A single delay
/// queue monitors all in-flight requests, so the cost of many outstanding
/// requests stays sub-linear in wasted tasks.
async fn run_timer(
    pending: Arc<Mutex<PendingTable>>,
    recent: Arc<Mutex<RecentIds>>,
    mut commands: mpsc::UnboundedReceiver<TimerCmd>,
) {
    let mut queue: DelayQueue<u64> = DelayQueue::new();
    let mut keys = HashMap::new();
    loop {
        tokio::select! {
            cmd = commands.recv() => match cmd {
                Some(TimerCmd::Register { id, deadline }) => {
                    keys.insert(id, queue.insert_at(id, deadline));
                }
                Some(TimerCmd::Cancel { id }) => {
                    if let Some(key) = keys.remove(&id) {
                        queue.remove(&key);
                    }
                }
                None => break,
            },
            Some(expired) = queue.next(), if !queue.is_empty() => {
                let id = expired.into_inner();
                keys.remove(&id);
                if let Some(sender) = lock(&pending).remove(&id) {
                    lock(&recent).push(id, false);
                    debug!("Request {} timed out.", id);
                    let _ = sender.send(Err(Error::RequestTimeout(id)));
                }
            }
        }
    }
}

/// Handle to an outstanding asynchronous request.
pub struct PendingHandle {
    id: u64,
    coordinator: ReplyCoordinator,
}

impl PendingHandle {
    pub(crate) fn new(id: u64, coordinator: ReplyCoordinator) -> Self {
        PendingHandle { id, coordinator }
    }

    /// The message id of the request.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Cancels the request if it is still waiting. Cancellation is
    /// cooperative: bookkeeping is removed, but a handler already
    /// executing on the target cell is not interrupted.
    ///
    /// Returns true when this call performed the cancellation.
    pub fn cancel(&self) -> bool {
        self.coordinator.cancel(self.id)
    }
}

/// Fixed-capacity memory of settled request ids, tagged with whether the
/// request was answered by a real reply.
struct RecentIds {
    settled: HashMap<u64, bool>,
    order: VecDeque<u64>,
    capacity: usize,
}

impl RecentIds {
    fn new(capacity: usize) -> Self {
        RecentIds {
            settled: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    fn push(&mut self, id: u64, answered: bool) {
        if self.settled.insert(id, answered).is_none() {
            self.order.push_back(id);
            if self.order.len() > self.capacity {
                if let Some(evicted) = self.order.pop_front() {
                    self.settled.remove(&evicted);
                }
            }
        }
    }

    fn was_answered(&self, id: u64) -> bool {
        self.settled.get(&id).copied().unwrap_or(false)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
