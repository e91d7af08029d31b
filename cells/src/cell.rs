// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Cell
//!
//! The `cell` module provides the `Cell` trait implemented by message
//! handlers, the configuration a cell is registered with, the context
//! handed to its lifecycle and message hooks, and the endpoint handle a
//! registration returns.
//!

use crate::{
    BoxPayload, Cdc, CellAddress, CellPath, Envelope, Error,
    coordinator::{PendingHandle, ReplyCallback},
    domain::DomainRef,
    inbox::StopSender,
};

use async_trait::async_trait;

use serde::{Deserialize, Serialize};

use tokio::sync::oneshot;

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// A named message handler living in a domain.
///
/// One envelope at a time is dispatched to `on_message`; the runner owns
/// the cell, so handlers take `&mut self` and need no internal locking.
///
/// ```ignore
/// use cells::{Cell, CellContext, Envelope, Error};
///
/// struct Echo;
///
/// #[async_trait::async_trait]
/// impl Cell for Echo {
///     async fn on_message(
///         &mut self,
///         envelope: &Envelope,
///         _ctx: &mut CellContext,
///     ) -> Result<Option<cells::BoxPayload>, Error> {
///         let text = envelope.peek::<String>().cloned().unwrap_or_default();
///         Ok(Some(Box::new(text)))
///     }
/// }
/// ```
#[async_trait]
pub trait Cell: Send + Sync + Sized + 'static {
    /// Called once before the cell receives envelopes. Returning an error
    /// aborts the registration.
    async fn starting(&mut self, _ctx: &mut CellContext) -> Result<(), Error> {
        Ok(())
    }

    /// Handles one envelope. Returning `Ok(Some(payload))` answers a
    /// request that expects a reply; returning `Ok(None)` answers nothing.
    /// An `Err` is logged, converted into a failure reply when one is
    /// owed, and leaves the cell running.
    async fn on_message(
        &mut self,
        envelope: &Envelope,
        ctx: &mut CellContext,
    ) -> Result<Option<BoxPayload>, Error>;

    /// Called once after the last envelope, before the cell is removed
    /// from its domain.
    async fn stopped(&mut self, _ctx: &mut CellContext) -> Result<(), Error> {
        Ok(())
    }
}

/// Lifecycle state of a registered cell.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum CellState {
    /// Registered, `starting` hook not finished yet.
    Starting,
    /// Accepting envelopes.
    Running,
    /// Stop requested, draining the inbox.
    Stopping,
    /// Terminal. A dead cell never accepts an envelope again.
    Dead,
}

pub(crate) type SharedState = Arc<Mutex<CellState>>;

pub(crate) fn read_state(state: &SharedState) -> CellState {
    *state.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write_state(state: &SharedState, next: CellState) {
    *state.lock().unwrap_or_else(PoisonError::into_inner) = next;
}

/// Inbox sizing for a cell.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum MailboxPolicy {
    /// Never rejects a push.
    #[default]
    Unbounded,
    /// Rejects pushes beyond `capacity`; the router reports
    /// `Error::MailboxFull` when no alternative accepts the envelope.
    Bounded { capacity: usize },
}

/// What happens to envelopes still queued when a cell stops.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum DrainPolicy {
    /// Queued envelopes are dropped.
    #[default]
    Discard,
    /// Queued envelopes that expect a reply are answered with a
    /// `NoRoute` failure so their senders fail fast instead of timing out.
    RejectWithError,
}

/// Per-cell registration options.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct CellConfig {
    pub mailbox: MailboxPolicy,
    pub drain: DrainPolicy,
}

/// Execution context handed to a cell's hooks.
///
/// Carries the cell's identity, a handle to its domain, and the cell's
/// diagnostic context slot. The runner installs the inbound envelope's
/// diagnostic snapshot before each dispatch and clears the slot after.
pub struct CellContext {
    address: CellAddress,
    domain: DomainRef,
    cdc: Cdc,
}

impl CellContext {
    pub(crate) fn new(address: CellAddress, domain: DomainRef) -> Self {
        let mut cdc = Cdc::new();
        cdc.set_identity(address.cell(), address.domain());
        CellContext {
            address,
            domain,
            cdc,
        }
    }

    /// The name of this cell.
    pub fn cell_name(&self) -> &str {
        self.address.cell()
    }

    /// The name of the domain this cell lives in.
    pub fn domain_name(&self) -> &str {
        self.address.domain()
    }

    /// This cell's full address.
    pub fn address(&self) -> &CellAddress {
        &self.address
    }

    /// The domain handle, for registration and transport management.
    pub fn domain(&self) -> &DomainRef {
        &self.domain
    }

    /// The diagnostic context of the envelope being dispatched.
    pub fn cdc(&self) -> &Cdc {
        &self.cdc
    }

    pub fn cdc_mut(&mut self) -> &mut Cdc {
        &mut self.cdc
    }

    /// Builds an envelope originating from this cell: the cell's address
    /// is the first source hop and the current diagnostic context rides
    /// along as a snapshot.
    pub fn new_envelope(
        &self,
        destination: CellPath,
        payload: BoxPayload,
        ttl: Duration,
    ) -> Envelope {
        let mut envelope = self.domain.new_envelope(destination, payload, ttl);
        envelope.push_source(self.address.clone());
        if let Some(session) = self.cdc.session() {
            envelope.set_session(session.to_owned());
        }
        envelope.attach_cdc(self.cdc.capture());
        envelope
    }

    /// Fire-and-forget send.
    ///
    /// # Errors
    ///
    /// Routing failures are reported immediately, `Error::NoRoute` and
    /// `Error::MailboxFull` among them.
    pub async fn send(&self, envelope: Envelope) -> Result<(), Error> {
        self.domain.deliver(envelope).await
    }

    /// Sends a request and blocks this cell until the reply, a timeout,
    /// or a routing failure.
    ///
    /// The target must be another cell: a cell that sends a blocking
    /// request to itself deadlocks until the timeout, since its own
    /// runner is the one waiting.
    pub async fn send_and_wait(
        &self,
        destination: CellPath,
        payload: BoxPayload,
        timeout: Duration,
    ) -> Result<BoxPayload, Error> {
        let envelope = self.new_envelope(destination, payload, timeout);
        self.domain.wait_for_reply(envelope, timeout).await
    }

    /// Sends a request and registers a callback invoked exactly once with
    /// the reply, the timeout, or the cancellation. The cell keeps
    /// processing envelopes meanwhile.
    pub async fn send_async(
        &self,
        destination: CellPath,
        payload: BoxPayload,
        timeout: Duration,
        callback: ReplyCallback,
    ) -> PendingHandle {
        let envelope = self.new_envelope(destination, payload, timeout);
        self.domain
            .callback_for_reply(envelope, timeout, callback)
            .await
    }
}

/// Handle to a registered cell, returned by `DomainRef::register`.
///
/// Cloneable; sends made through the endpoint carry the cell's address as
/// their source, and `stop` shuts the cell down.
#[derive(Clone)]
pub struct CellEndpoint {
    address: CellAddress,
    domain: DomainRef,
    stop: StopSender,
}

impl CellEndpoint {
    pub(crate) fn new(
        address: CellAddress,
        domain: DomainRef,
        stop: StopSender,
    ) -> Self {
        CellEndpoint {
            address,
            domain,
            stop,
        }
    }

    /// The name of the cell behind this endpoint.
    pub fn cell_name(&self) -> &str {
        self.address.cell()
    }

    /// The name of the domain the cell lives in.
    pub fn domain_name(&self) -> &str {
        self.address.domain()
    }

    /// The cell's full address.
    pub fn address(&self) -> &CellAddress {
        &self.address
    }

    /// The domain handle.
    pub fn domain(&self) -> &DomainRef {
        &self.domain
    }

    /// Builds an envelope whose source is the cell behind this endpoint.
    pub fn new_envelope(
        &self,
        destination: CellPath,
        payload: BoxPayload,
        ttl: Duration,
    ) -> Envelope {
        let mut envelope = self.domain.new_envelope(destination, payload, ttl);
        envelope.push_source(self.address.clone());
        envelope
    }

    /// Fire-and-forget send on behalf of the cell.
    pub async fn send(&self, envelope: Envelope) -> Result<(), Error> {
        self.domain.deliver(envelope).await
    }

    /// Sends a request on behalf of the cell and awaits the reply.
    pub async fn send_and_wait(
        &self,
        destination: CellPath,
        payload: BoxPayload,
        timeout: Duration,
    ) -> Result<BoxPayload, Error> {
        let envelope = self.new_envelope(destination, payload, timeout);
        self.domain.wait_for_reply(envelope, timeout).await
    }

    /// Sends a request on behalf of the cell with a reply callback.
    pub async fn send_async(
        &self,
        destination: CellPath,
        payload: BoxPayload,
        timeout: Duration,
        callback: ReplyCallback,
    ) -> PendingHandle {
        let envelope = self.new_envelope(destination, payload, timeout);
        self.domain
            .callback_for_reply(envelope, timeout, callback)
            .await
    }

    /// Stops the cell and waits until it is dead. Idempotent: stopping an
    /// already dead cell returns immediately.
    pub async fn stop(&self) {
        let (ack_sender, ack_receiver) = oneshot::channel();
        if self.stop.send(Some(ack_sender)).await.is_ok() {
            let _ = ack_receiver.await;
        }
    }
}
