// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Inbox plumbing
//!
//! Channel types behind a cell's inbox. The router pushes envelopes in
//! without blocking; a bounded inbox that is full rejects the push so the
//! router can fall back to an alternative or surface `MailboxFull`.
//!

use crate::{Envelope, cell::MailboxPolicy};

use tokio::sync::{mpsc, oneshot};

/// Sender half of a cell's inbox.
#[derive(Clone)]
pub(crate) enum InboxSender {
    Bounded(mpsc::Sender<Envelope>),
    Unbounded(mpsc::UnboundedSender<Envelope>),
}

/// A rejected push, handing the envelope back to the router.
pub(crate) enum PushError {
    Full(Envelope),
    Closed(Envelope),
}

impl InboxSender {
    /// Non-blocking push. Bounded inboxes at capacity return
    /// `PushError::Full`; a closed inbox (cell stopping) returns
    /// `PushError::Closed`.
    pub(crate) fn try_push(&self, envelope: Envelope) -> Result<(), PushError> {
        match self {
            InboxSender::Bounded(sender) => {
                sender.try_send(envelope).map_err(|err| match err {
                    mpsc::error::TrySendError::Full(envelope) => {
                        PushError::Full(envelope)
                    }
                    mpsc::error::TrySendError::Closed(envelope) => {
                        PushError::Closed(envelope)
                    }
                })
            }
            InboxSender::Unbounded(sender) => sender
                .send(envelope)
                .map_err(|err| PushError::Closed(err.0)),
        }
    }
}

/// Receiver half of a cell's inbox, consumed by the cell's runner.
pub(crate) enum InboxReceiver {
    Bounded(mpsc::Receiver<Envelope>),
    Unbounded(mpsc::UnboundedReceiver<Envelope>),
}

impl InboxReceiver {
    pub(crate) async fn recv(&mut self) -> Option<Envelope> {
        match self {
            InboxReceiver::Bounded(receiver) => receiver.recv().await,
            InboxReceiver::Unbounded(receiver) => receiver.recv().await,
        }
    }

    /// Non-blocking pop, used while draining a stopping cell.
    pub(crate) fn try_recv(&mut self) -> Option<Envelope> {
        match self {
            InboxReceiver::Bounded(receiver) => receiver.try_recv().ok(),
            InboxReceiver::Unbounded(receiver) => receiver.try_recv().ok(),
        }
    }

    /// Closes the inbox so further pushes fail while queued envelopes
    /// stay drainable.
    pub(crate) fn close(&mut self) {
        match self {
            InboxReceiver::Bounded(receiver) => receiver.close(),
            InboxReceiver::Unbounded(receiver) => receiver.close(),
        }
    }
}

/// Creates the inbox pair dictated by the cell's mailbox policy.
pub(crate) fn inbox(policy: &MailboxPolicy) -> (InboxSender, InboxReceiver) {
    match policy {
        MailboxPolicy::Unbounded => {
            let (sender, receiver) = mpsc::unbounded_channel();
            (
                InboxSender::Unbounded(sender),
                InboxReceiver::Unbounded(receiver),
            )
        }
        MailboxPolicy::Bounded { capacity } => {
            let (sender, receiver) = mpsc::channel((*capacity).max(1));
            (
                InboxSender::Bounded(sender),
                InboxReceiver::Bounded(receiver),
            )
        }
    }
}

/// Stop signal sender. The optional oneshot lets the requester await
/// shutdown confirmation.
pub(crate) type StopSender = mpsc::Sender<Option<oneshot::Sender<()>>>;

/// Stop signal receiver, owned by the cell's runner.
pub(crate) type StopReceiver = mpsc::Receiver<Option<oneshot::Sender<()>>>;

pub(crate) fn stop_channel() -> (StopSender, StopReceiver) {
    mpsc::channel(8)
}
