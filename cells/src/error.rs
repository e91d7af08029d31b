// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Errors module
//!

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for the cells messaging runtime.
///
/// Each variant maps to one failure category of the runtime so that callers
/// can implement differentiated retry policy: timing errors are part of
/// normal control flow, addressing errors are caller bugs and must not be
/// retried.
#[derive(Clone, Debug, Error, PartialEq, Serialize, Deserialize)]
pub enum Error {
    /// A cell address could not be parsed or validated.
    #[error("Malformed cell address: {0}.")]
    MalformedAddress(String),
    /// A cell path was constructed with zero hops.
    #[error("A cell path needs at least one hop.")]
    EmptyPath,
    /// The path cursor has passed the last hop.
    #[error("Path is exhausted, no current hop.")]
    PathExhausted,
    /// No cell or transport could accept the envelope at its next hop.
    #[error("No route to cell {0}.")]
    NoRoute(String),
    /// A bounded inbox rejected the envelope.
    #[error("Mailbox of cell {0} is full.")]
    MailboxFull(String),
    /// No reply arrived before the request deadline.
    #[error("Request {0} timed out waiting for a reply.")]
    RequestTimeout(u64),
    /// The envelope's time-to-live expired before it reached its destination.
    #[error("Envelope {0} expired in transit.")]
    TimedOutInTransit(u64),
    /// A cell with the same name is already registered in this domain.
    #[error("Cell {0} already exists in this domain.")]
    DuplicateName(String),
    /// A second reply was produced for an already answered request.
    #[error("A reply for message {0} was already delivered.")]
    DuplicateReply(u64),
    /// The destination cell's handler failed while processing the request.
    #[error("Handler failed: {0}")]
    Handler(String),
    /// The cross-domain transport could not deliver the envelope.
    #[error("Transport error: {0}")]
    Transport(String),
    /// The pending request was cancelled by its originator.
    #[error("Request {0} was cancelled.")]
    Cancelled(u64),
    /// A cell failed its one-time initialization and never reached RUNNING.
    #[error("Cell failed to start: {0}")]
    Start(String),
    /// A reply payload had an unexpected concrete type.
    #[error("Unexpected payload: {0}.")]
    Payload(String),
    /// An envelope could not be handed over to the runtime.
    #[error("An error occurred while sending an envelope: {0}.")]
    Send(String),
    /// An error occurred while stopping a cell.
    #[error("An error occurred while stopping a cell.")]
    Stop,
}
