// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Cell domain
//!
//! The `domain` module provides the routing container cells live in: a
//! named registry of cells, the per-domain envelope router, the
//! request/reply coordinator, and the transports reaching other domains.
//!

use crate::{
    BoxPayload, CellPath, Envelope, Error,
    cdc::SessionGenerator,
    cell::{
        Cell, CellConfig, CellEndpoint, CellState, SharedState, read_state,
    },
    coordinator::{PendingHandle, ReplyCallback, ReplyCoordinator},
    inbox::{InboxSender, PushError, StopSender, inbox, stop_channel},
    path::PathHop,
    runner::CellRunner,
    transport::Transport,
};

use tokio::sync::{RwLock, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use tracing::{debug, error, warn};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::CellAddress;

/// Reserved cell name stamped as a source hop when a domain forwards an
/// envelope to another domain.
const GATEWAY_CELL: &str = "_gateway";

/// Reserved cell name stamped as the source of sends made directly
/// through a `DomainRef`, outside any cell.
const ENDPOINT_CELL: &str = "_endpoint";

/// Factory for a domain and its runner.
pub struct CellDomain;

impl CellDomain {
    /// Creates a domain. Returns the cloneable handle used to register
    /// cells and send envelopes, plus the runner that must be driven (or
    /// spawned) to observe domain shutdown.
    ///
    /// Cancelling `token` stops every cell, waiting for each to drain,
    /// and then ends the runner.
    pub fn create(
        name: &str,
        token: CancellationToken,
    ) -> (DomainRef, DomainRunner) {
        let (event_sender, event_receiver) = mpsc::channel(100);
        let domain = DomainRef::new(name, event_sender, token);
        let runner = DomainRunner { event_receiver };
        (domain, runner)
    }
}

/// Domain lifecycle events observed by the runner.
#[derive(Clone, Debug)]
pub enum DomainEvent {
    StopDomain,
}

pub(crate) struct CellEntry {
    sender: InboxSender,
    state: SharedState,
    stop: StopSender,
}

/// Cloneable handle to a domain.
#[derive(Clone)]
pub struct DomainRef {
    name: Arc<String>,
    registry: Arc<RwLock<HashMap<String, CellEntry>>>,
    transports: Arc<RwLock<HashMap<String, Arc<dyn Transport>>>>,
    coordinator: ReplyCoordinator,
    ids: Arc<AtomicU64>,
    sessions: Arc<SessionGenerator>,
    token: CancellationToken,
}

impl DomainRef {
    fn new(
        name: &str,
        event_sender: mpsc::Sender<DomainEvent>,
        token: CancellationToken,
    ) -> Self {
        let registry: Arc<RwLock<HashMap<String, CellEntry>>> =
            Arc::new(RwLock::new(HashMap::new()));

        let watcher_registry = registry.clone();
        let watcher_token = token.clone();
        tokio::spawn(async move {
            watcher_token.cancelled().await;
            debug!("Stopping cell domain.");
            let stops: Vec<StopSender> = watcher_registry
                .read()
                .await
                .values()
                .map(|entry| entry.stop.clone())
                .collect();
            for stop in stops {
                let (ack_sender, ack_receiver) = oneshot::channel();
                if stop.send(Some(ack_sender)).await.is_ok() {
                    let _ = ack_receiver.await;
                }
            }
            let _ = event_sender.send(DomainEvent::StopDomain).await;
        });

        DomainRef {
            name: Arc::new(name.to_owned()),
            registry,
            transports: Arc::new(RwLock::new(HashMap::new())),
            coordinator: ReplyCoordinator::new(),
            ids: Arc::new(AtomicU64::new(1)),
            sessions: Arc::new(SessionGenerator::new(name)),
            token,
        }
    }

    /// The domain's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Builds an envelope with the next domain-unique id. The source list
    /// starts empty; send methods stamp it.
    pub fn new_envelope(
        &self,
        destination: CellPath,
        payload: BoxPayload,
        ttl: Duration,
    ) -> Envelope {
        let id = self.ids.fetch_add(1, Ordering::Relaxed);
        Envelope::new(id, destination, payload, ttl)
    }

    /// Issues a fresh session id, `"<domain>-<counter>"`.
    pub fn new_session(&self) -> String {
        self.sessions.next()
    }

    /// Registers a cell under a unique name and waits for its `starting`
    /// hook.
    ///
    /// # Errors
    ///
    /// `Error::MalformedAddress` for an invalid name,
    /// `Error::DuplicateName` when the name is taken, and `Error::Start`
    /// when the `starting` hook fails.
    pub async fn register<C: Cell>(
        &self,
        name: &str,
        cell: C,
        config: CellConfig,
    ) -> Result<CellEndpoint, Error> {
        let address = CellAddress::new(name, &self.name)?;
        let (sender, receiver) = inbox(&config.mailbox);
        let (stop_sender, stop_receiver) = stop_channel();
        let state: SharedState = Arc::new(Mutex::new(CellState::Starting));
        {
            let mut registry = self.registry.write().await;
            if registry.contains_key(name) {
                error!("Cell {} already exists in domain {}.", name, self.name);
                return Err(Error::DuplicateName(name.to_owned()));
            }
            registry.insert(
                name.to_owned(),
                CellEntry {
                    sender,
                    state: state.clone(),
                    stop: stop_sender.clone(),
                },
            );
        }

        let runner = CellRunner::create(
            address.clone(),
            cell,
            receiver,
            stop_receiver,
            state,
            config.drain,
            self.clone(),
        );
        let (ready_sender, ready_receiver) = oneshot::channel();
        tokio::spawn(async move {
            runner.init(ready_sender).await;
        });
        match ready_receiver.await {
            Ok(Ok(())) => {
                Ok(CellEndpoint::new(address, self.clone(), stop_sender))
            }
            Ok(Err(err)) => Err(err),
            Err(_) => {
                Err(Error::Start(format!("Runner of {} went away.", address)))
            }
        }
    }

    pub(crate) async fn deregister(&self, name: &str) {
        self.registry.write().await.remove(name);
    }

    /// Stops one cell and waits until it is dead. Unknown names are a
    /// no-op.
    pub async fn stop_cell(&self, name: &str) {
        let stop = {
            self.registry
                .read()
                .await
                .get(name)
                .map(|entry| entry.stop.clone())
        };
        if let Some(stop) = stop {
            let (ack_sender, ack_receiver) = oneshot::channel();
            if stop.send(Some(ack_sender)).await.is_ok() {
                let _ = ack_receiver.await;
            }
        }
    }

    /// Requests domain shutdown: every cell is stopped, then the runner
    /// observes `DomainEvent::StopDomain`.
    pub fn stop_domain(&self) {
        self.token.cancel();
    }

    /// The lifecycle state of a registered cell, if present.
    pub async fn state_of(&self, name: &str) -> Option<CellState> {
        self.registry
            .read()
            .await
            .get(name)
            .map(|entry| read_state(&entry.state))
    }

    /// Registers the transport reaching `domain`. Replaces any previous
    /// transport for that domain.
    pub async fn add_transport(
        &self,
        domain: &str,
        transport: Arc<dyn Transport>,
    ) {
        self.transports
            .write()
            .await
            .insert(domain.to_owned(), transport);
    }

    /// Fire-and-forget send from outside any cell.
    pub async fn send(
        &self,
        destination: CellPath,
        payload: BoxPayload,
        ttl: Duration,
    ) -> Result<(), Error> {
        let mut envelope = self.new_envelope(destination, payload, ttl);
        envelope.push_source(self.endpoint_address());
        self.deliver(envelope).await
    }

    /// Sends a request from outside any cell and awaits the reply.
    ///
    /// The timeout doubles as the envelope's time-to-live, so a request
    /// that can no longer be answered in time is dropped in transit
    /// instead of wasting the handler's work.
    pub async fn send_and_wait(
        &self,
        destination: CellPath,
        payload: BoxPayload,
        timeout: Duration,
    ) -> Result<BoxPayload, Error> {
        let mut envelope = self.new_envelope(destination, payload, timeout);
        envelope.push_source(self.endpoint_address());
        self.wait_for_reply(envelope, timeout).await
    }

    /// Sends a request from outside any cell with a reply callback.
    pub async fn send_async(
        &self,
        destination: CellPath,
        payload: BoxPayload,
        timeout: Duration,
        callback: ReplyCallback,
    ) -> PendingHandle {
        let mut envelope = self.new_envelope(destination, payload, timeout);
        envelope.push_source(self.endpoint_address());
        self.callback_for_reply(envelope, timeout, callback).await
    }

    /// Registers the pending request, then routes the envelope. A routing
    /// failure completes the request immediately with that failure, so
    /// the caller never waits out the timeout for an error already known.
    pub(crate) async fn wait_for_reply(
        &self,
        mut envelope: Envelope,
        timeout: Duration,
    ) -> Result<BoxPayload, Error> {
        envelope.mark_expects_reply();
        if envelope.source().is_empty() {
            envelope.push_source(self.endpoint_address());
        }
        let id = envelope.id();
        let receiver = self.coordinator.register(id, timeout);
        if let Err(err) = self.deliver(envelope).await {
            self.coordinator.complete(id, Err(err.clone()));
            return Err(err);
        }
        match receiver.await {
            Ok(result) => result,
            Err(_) => Err(Error::Send(format!(
                "Reply channel for request {} closed.",
                id
            ))),
        }
    }

    pub(crate) async fn callback_for_reply(
        &self,
        mut envelope: Envelope,
        timeout: Duration,
        callback: ReplyCallback,
    ) -> PendingHandle {
        envelope.mark_expects_reply();
        if envelope.source().is_empty() {
            envelope.push_source(self.endpoint_address());
        }
        let id = envelope.id();
        let receiver = self.coordinator.register(id, timeout);
        tokio::spawn(async move {
            let result = match receiver.await {
                Ok(result) => result,
                Err(_) => Err(Error::Send(format!(
                    "Reply channel for request {} closed.",
                    id
                ))),
            };
            callback(result).await;
        });
        if let Err(err) = self.deliver(envelope).await {
            self.coordinator.complete(id, Err(err));
        }
        PendingHandle::new(id, self.coordinator.clone())
    }

    /// Routes an envelope one or more hops forward.
    ///
    /// Hops resolving in this domain are waypoints and only move the
    /// cursor; the first hop naming another domain hands the envelope to
    /// that domain's transport; an exhausted path is final delivery into
    /// a local inbox, or into the reply coordinator for replies.
    pub async fn deliver(&self, mut envelope: Envelope) -> Result<(), Error> {
        envelope.stamp_deadline(Instant::now());
        loop {
            if envelope.is_expired(Instant::now()) {
                let err = Error::TimedOutInTransit(envelope.id());
                debug!("Dropping envelope in domain {}: {}", self.name, err);
                return Err(err);
            }
            if envelope.destination().is_exhausted() {
                return self.deliver_final(envelope).await;
            }
            let hop = envelope.destination().current_hop()?.clone();
            if hop.address().resolves_in(&self.name) {
                envelope.destination_mut().advance();
                continue;
            }
            return self.forward(envelope, &hop).await;
        }
    }

    /// Ingress for envelopes arriving over a transport. Failures cannot
    /// surface to the remote caller through a return value, so when the
    /// envelope expects a reply a failure reply is routed back instead;
    /// otherwise the envelope is dead-lettered with a log line.
    pub async fn deliver_remote(&self, envelope: Envelope) {
        let stub = (envelope.expects_reply() && !envelope.is_reply())
            .then(|| envelope.reply_stub());
        let Err(err) = self.deliver(envelope).await else {
            return;
        };
        match stub {
            Some(stub) => {
                let id = stub.id();
                match stub.into_failure_reply(err) {
                    Ok(reply) => {
                        if let Err(err) = self.deliver(reply).await {
                            warn!(
                                "Failure reply for envelope {} is \
                                 undeliverable: {}",
                                id, err
                            );
                        }
                    }
                    Err(err) => {
                        warn!("Cannot answer envelope {}: {}", id, err);
                    }
                }
            }
            None => {
                warn!("Dead letter in domain {}: {}", self.name, err);
            }
        }
    }

    /// Final delivery into a local inbox. Candidates at the final hop are
    /// tried in order; a candidate is skipped when it is absent, dead, or
    /// its bounded inbox is full. Replies go to the coordinator, never to
    /// a handler.
    async fn deliver_final(&self, envelope: Envelope) -> Result<(), Error> {
        if envelope.is_reply() {
            self.coordinator.accept_reply(envelope);
            return Ok(());
        }
        let hop = envelope.destination().final_hop().clone();
        let mut envelope = envelope;
        let mut full_candidate = None;
        for candidate in hop.candidates() {
            if !candidate.resolves_in(&self.name) {
                debug!(
                    "Skipping candidate {} outside domain {}.",
                    candidate, self.name
                );
                continue;
            }
            let sender = {
                self.registry.read().await.get(candidate.cell()).and_then(
                    |entry| {
                        if read_state(&entry.state) == CellState::Dead {
                            None
                        } else {
                            Some(entry.sender.clone())
                        }
                    },
                )
            };
            let Some(sender) = sender else {
                continue;
            };
            match sender.try_push(envelope) {
                Ok(()) => return Ok(()),
                Err(PushError::Full(returned)) => {
                    full_candidate = Some(candidate.cell().to_owned());
                    envelope = returned;
                }
                Err(PushError::Closed(returned)) => {
                    envelope = returned;
                }
            }
        }
        let err = match full_candidate {
            Some(cell) => Error::MailboxFull(cell),
            None => Error::NoRoute(hop.address().to_string()),
        };
        warn!("Delivery failed in domain {}: {}", self.name, err);
        Err(err)
    }

    /// Hands the envelope to the transport of the first candidate domain
    /// that has one registered. The gateway hop is stamped before the
    /// handoff so replies route back through this domain.
    async fn forward(
        &self,
        mut envelope: Envelope,
        hop: &PathHop,
    ) -> Result<(), Error> {
        let gateway = CellAddress::new_unchecked(GATEWAY_CELL, &self.name);
        envelope.push_source(gateway);
        envelope.destination_mut().advance();

        let mut selected = None;
        for candidate in hop.candidates() {
            let transport = {
                self.transports.read().await.get(candidate.domain()).cloned()
            };
            if let Some(transport) = transport {
                selected = Some((candidate.domain().to_owned(), transport));
                break;
            }
        }
        let Some((target, transport)) = selected else {
            let err = Error::NoRoute(format!(
                "{} (no transport from {})",
                hop.address(),
                self.name
            ));
            warn!("{}", err);
            return Err(err);
        };
        debug!(
            "Forwarding envelope {} from domain {} to domain {}.",
            envelope.id(),
            self.name,
            target
        );
        transport.transmit(&target, envelope).await.map_err(|err| {
            warn!("Transport to domain {} failed: {}", target, err);
            Error::NoRoute(format!("{} ({})", hop.address(), err))
        })
    }

    fn endpoint_address(&self) -> CellAddress {
        CellAddress::new_unchecked(ENDPOINT_CELL, &self.name)
    }
}

/// Drives a domain until it stops.
pub struct DomainRunner {
    event_receiver: mpsc::Receiver<DomainEvent>,
}

impl DomainRunner {
    /// Runs until the domain's cancellation token fires and every cell
    /// has drained.
    pub async fn run(&mut self) {
        debug!("Running cell domain.");
        while let Some(event) = self.event_receiver.recv().await {
            match event {
                DomainEvent::StopDomain => {
                    debug!("Cell domain stopped.");
                    break;
                }
            }
        }
    }
}
