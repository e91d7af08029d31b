// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Envelope
//!
//! The `envelope` module provides the routed message wrapper: addressing
//! metadata, a domain-unique id, an opaque payload, and the time-to-live
//! bookkeeping. Envelopes are created by a sender, mutated only by the
//! routing layer (cursor advance, source accumulation), and consumed
//! exactly once by the destination cell's handler.
//!

use crate::{CellAddress, CellPath, Error, cdc::CdcSnapshot};

use std::any::{Any, type_name};
use std::fmt;
use std::time::{Duration, Instant};

/// Opaque typed payload carried by an envelope.
///
/// Implemented for every `Any + Send + Sync + Debug` type through a
/// blanket impl; handlers recover the concrete type with [`downcast`]
/// or [`Envelope::peek`].
pub trait Payload: Any + Send + Sync + fmt::Debug {
    /// Borrow the payload as `Any` for by-reference downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Convert the boxed payload into `Any` for by-value downcasting.
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync + fmt::Debug> Payload for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync> {
        self
    }
}

/// Boxed payload, the form envelopes carry.
pub type BoxPayload = Box<dyn Payload>;

/// Recovers the concrete type of a payload.
///
/// # Errors
///
/// Returns `Error::Payload` when the payload is not a `T`.
pub fn downcast<T: Any>(payload: BoxPayload) -> Result<T, Error> {
    payload
        .into_any()
        .downcast::<T>()
        .map(|boxed| *boxed)
        .map_err(|_| Error::Payload(type_name::<T>().to_owned()))
}

/// The routed message wrapper.
///
/// The `source` list is the reverse route taken so far: the sender stamps
/// its own address at send time and every domain that forwards the
/// envelope appends one hop, so a reply can be routed back exactly by
/// reversing it. The id is unique for the lifetime of the originating
/// domain and is the correlation key for request/reply matching.
#[derive(Debug)]
pub struct Envelope {
    id: u64,
    source: Vec<CellAddress>,
    destination: CellPath,
    payload: BoxPayload,
    ttl: Duration,
    deadline: Option<Instant>,
    is_reply: bool,
    expects_reply: bool,
    failure: Option<Error>,
    session: Option<String>,
    cdc: Option<CdcSnapshot>,
}

impl Envelope {
    /// Creates a fresh envelope. Ids are assigned by the domain; use
    /// `DomainRef::new_envelope` or a context/endpoint send method.
    pub(crate) fn new(
        id: u64,
        destination: CellPath,
        payload: BoxPayload,
        ttl: Duration,
    ) -> Self {
        Envelope {
            id,
            source: Vec::new(),
            destination,
            payload,
            ttl,
            deadline: None,
            is_reply: false,
            expects_reply: false,
            failure: None,
            session: None,
            cdc: None,
        }
    }

    /// Derives the reply to `original`: same id, destination equal to the
    /// original's source path reversed.
    ///
    /// # Errors
    ///
    /// Returns `Error::EmptyPath` if the original accumulated no source
    /// hops, since no return route exists.
    pub fn reply_to(
        original: &Envelope,
        payload: BoxPayload,
    ) -> Result<Envelope, Error> {
        let mut reply = Envelope::new(
            original.id,
            return_path(&original.source)?,
            payload,
            original.ttl,
        );
        reply.is_reply = true;
        reply.session = original.session.clone();
        Ok(reply)
    }

    /// Derives an error reply to `original`, carrying `failure` instead
    /// of a payload.
    pub fn failure_reply(
        original: &Envelope,
        failure: Error,
    ) -> Result<Envelope, Error> {
        let mut reply = Envelope::reply_to(original, Box::new(()))?;
        reply.failure = Some(failure);
        Ok(reply)
    }

    /// The unique message id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The reverse route accumulated so far.
    pub fn source(&self) -> &[CellAddress] {
        &self.source
    }

    /// The destination path.
    pub fn destination(&self) -> &CellPath {
        &self.destination
    }

    pub(crate) fn destination_mut(&mut self) -> &mut CellPath {
        &mut self.destination
    }

    /// Borrow the payload.
    pub fn payload(&self) -> &dyn Payload {
        self.payload.as_ref()
    }

    /// Borrow the payload as a concrete type, if it is one.
    pub fn peek<T: Any>(&self) -> Option<&T> {
        // Dispatch through the trait object; calling as_any on the box
        // itself would downcast against the box's own type.
        self.payload.as_ref().as_any().downcast_ref::<T>()
    }

    /// Consume the envelope, yielding its payload.
    pub fn into_payload(self) -> BoxPayload {
        self.payload
    }

    /// The time-to-live the sender requested.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// True for reply envelopes.
    pub fn is_reply(&self) -> bool {
        self.is_reply
    }

    /// True when the sender is waiting for an answer.
    pub fn expects_reply(&self) -> bool {
        self.expects_reply
    }

    pub(crate) fn mark_expects_reply(&mut self) {
        self.expects_reply = true;
    }

    /// The failure carried by an error reply, if any.
    pub fn failure(&self) -> Option<&Error> {
        self.failure.as_ref()
    }

    /// The session id propagated with the envelope, if any.
    pub fn session(&self) -> Option<&str> {
        self.session.as_deref()
    }

    /// Attaches a session id for diagnostic propagation.
    pub fn set_session(&mut self, session: impl Into<String>) {
        self.session = Some(session.into());
    }

    /// Attaches a diagnostic context snapshot captured at send time.
    pub fn attach_cdc(&mut self, snapshot: CdcSnapshot) {
        self.cdc = Some(snapshot);
    }

    pub(crate) fn take_cdc(&mut self) -> Option<CdcSnapshot> {
        self.cdc.take()
    }

    /// Appends one hop to the reverse route. Called by the sender with
    /// its own address and by each forwarding domain.
    pub(crate) fn push_source(&mut self, address: CellAddress) {
        self.source.push(address);
    }

    /// Converts the relative ttl into an absolute deadline. Done when the
    /// router first accepts the envelope, not at construction, so queuing
    /// delay before the send does not skew the clock.
    pub(crate) fn stamp_deadline(&mut self, now: Instant) {
        if self.deadline.is_none() {
            self.deadline = Some(now + self.ttl);
        }
    }

    /// True once the deadline has passed. Envelopes found expired at any
    /// hop are dropped, never delivered.
    pub(crate) fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }

    /// The minimal state needed to answer this envelope after it has
    /// been consumed elsewhere.
    pub(crate) fn reply_stub(&self) -> ReplyStub {
        ReplyStub {
            id: self.id,
            source: self.source.clone(),
            ttl: self.ttl,
            session: self.session.clone(),
        }
    }
}

/// Enough of an envelope to synthesize a failure reply once the original
/// has been moved into the delivery machinery.
#[derive(Clone, Debug)]
pub(crate) struct ReplyStub {
    id: u64,
    source: Vec<CellAddress>,
    ttl: Duration,
    session: Option<String>,
}

impl ReplyStub {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn into_failure_reply(
        self,
        failure: Error,
    ) -> Result<Envelope, Error> {
        let mut reply = Envelope::new(
            self.id,
            return_path(&self.source)?,
            Box::new(()),
            self.ttl,
        );
        reply.is_reply = true;
        reply.session = self.session;
        reply.failure = Some(failure);
        Ok(reply)
    }
}

fn return_path(source: &[CellAddress]) -> Result<CellPath, Error> {
    if source.is_empty() {
        return Err(Error::EmptyPath);
    }
    let hops = source
        .iter()
        .rev()
        .cloned()
        .map(crate::PathHop::new)
        .collect();
    CellPath::of(hops)
}
