// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Cell runner
//!
//! The `runner` module drives a cell's lifecycle: the `starting` hook,
//! the envelope loop, and the drain-and-stop sequence. Each runner owns
//! its cell exclusively, so handlers run one envelope at a time in inbox
//! order.
//!

use crate::{
    Envelope, Error,
    cell::{
        Cell, CellContext, CellState, DrainPolicy, SharedState, write_state,
    },
    domain::DomainRef,
    inbox::{InboxReceiver, StopReceiver},
};

use tokio::select;
use tokio::sync::oneshot;

use tracing::{debug, error, warn};

use std::time::Instant;

use crate::CellAddress;

pub(crate) struct CellRunner<C: Cell> {
    address: CellAddress,
    cell: C,
    inbox: InboxReceiver,
    stop_receiver: StopReceiver,
    state: SharedState,
    drain: DrainPolicy,
    domain: DomainRef,
    pending_ack: Option<oneshot::Sender<()>>,
}

impl<C: Cell> CellRunner<C> {
    pub(crate) fn create(
        address: CellAddress,
        cell: C,
        inbox: InboxReceiver,
        stop_receiver: StopReceiver,
        state: SharedState,
        drain: DrainPolicy,
        domain: DomainRef,
    ) -> Self {
        CellRunner {
            address,
            cell,
            inbox,
            stop_receiver,
            state,
            drain,
            domain,
            pending_ack: None,
        }
    }

    /// Runs the full lifecycle. The `ready` channel reports whether the
    /// `starting` hook succeeded, so registration can fail synchronously.
    pub(crate) async fn init(
        mut self,
        ready: oneshot::Sender<Result<(), Error>>,
    ) {
        debug!("Initializing runner for cell {}.", self.address);
        let mut ctx =
            CellContext::new(self.address.clone(), self.domain.clone());
        match self.cell.starting(&mut ctx).await {
            Ok(()) => {
                write_state(&self.state, CellState::Running);
                debug!("Cell {} is running.", self.address);
                if ready.send(Ok(())).is_err() {
                    warn!(
                        "Nobody is waiting for cell {} to start.",
                        self.address
                    );
                }
            }
            Err(err) => {
                error!("Cell {} failed to start: {}", self.address, err);
                write_state(&self.state, CellState::Dead);
                self.domain.deregister(self.address.cell()).await;
                let _ = ready.send(Err(Error::Start(err.to_string())));
                return;
            }
        }

        self.run(&mut ctx).await;

        self.inbox.close();
        self.drain_inbox().await;
        if let Err(err) = self.cell.stopped(&mut ctx).await {
            error!("Cell {} failed to stop cleanly: {}", self.address, err);
        }
        write_state(&self.state, CellState::Dead);
        self.domain.deregister(self.address.cell()).await;
        if let Some(ack) = self.pending_ack.take() {
            let _ = ack.send(());
        }
        debug!("Cell {} is dead.", self.address);
    }

    async fn run(&mut self, ctx: &mut CellContext) {
        loop {
            select! {
                // Stop signals take priority over queued envelopes; the
                // drain policy decides what happens to the rest.
                biased;
                stop = self.stop_receiver.recv() => {
                    debug!("Stopping cell {}.", self.address);
                    write_state(&self.state, CellState::Stopping);
                    if let Some(ack) = stop.flatten() {
                        self.pending_ack = Some(ack);
                    }
                    break;
                }
                envelope = self.inbox.recv() => match envelope {
                    Some(envelope) => self.dispatch(envelope, ctx).await,
                    None => {
                        write_state(&self.state, CellState::Stopping);
                        break;
                    }
                }
            }
        }
    }

    /// Dispatches one envelope: install its diagnostic context, invoke
    /// the handler, route the reply when one is owed, clear the context.
    /// Handler failures never take the cell down.
    async fn dispatch(&mut self, mut envelope: Envelope, ctx: &mut CellContext) {
        if envelope.is_expired(Instant::now()) {
            debug!(
                "Dropping envelope at {}: {}",
                self.address,
                Error::TimedOutInTransit(envelope.id())
            );
            return;
        }

        match envelope.take_cdc() {
            Some(snapshot) => ctx.cdc_mut().restore_owned(snapshot),
            None => {
                ctx.cdc_mut().clear();
                ctx.cdc_mut()
                    .set_identity(self.address.cell(), self.address.domain());
            }
        }
        if let Some(session) = envelope.session() {
            ctx.cdc_mut().set_session(session.to_owned());
        }

        let owes_reply = envelope.expects_reply() && !envelope.is_reply();
        match self.cell.on_message(&envelope, ctx).await {
            Ok(Some(payload)) if owes_reply => {
                self.route_reply(Envelope::reply_to(&envelope, payload)).await;
            }
            Ok(Some(_)) => {
                debug!(
                    "Cell {} answered envelope {} that expects no reply.",
                    self.address,
                    envelope.id()
                );
            }
            Ok(None) => {}
            Err(err) => {
                error!(
                    "Handler of cell {} failed on envelope {}: {}",
                    self.address,
                    envelope.id(),
                    err
                );
                if owes_reply {
                    self.route_reply(Envelope::failure_reply(
                        &envelope,
                        Error::Handler(err.to_string()),
                    ))
                    .await;
                }
            }
        }
        ctx.cdc_mut().clear();
    }

    async fn route_reply(&self, reply: Result<Envelope, Error>) {
        match reply {
            Ok(reply) => {
                if let Err(err) = self.domain.deliver(reply).await {
                    warn!(
                        "Reply from cell {} is undeliverable: {}",
                        self.address, err
                    );
                }
            }
            Err(err) => {
                warn!("Cell {} cannot derive a reply: {}", self.address, err);
            }
        }
    }

    /// Empties the inbox of a stopping cell per its drain policy.
    async fn drain_inbox(&mut self) {
        while let Some(envelope) = self.inbox.try_recv() {
            match self.drain {
                DrainPolicy::Discard => {
                    debug!(
                        "Discarding queued envelope {} at stopping cell {}.",
                        envelope.id(),
                        self.address
                    );
                }
                DrainPolicy::RejectWithError => {
                    if envelope.expects_reply() && !envelope.is_reply() {
                        self.route_reply(Envelope::failure_reply(
                            &envelope,
                            Error::NoRoute(self.address.to_string()),
                        ))
                        .await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::{
        BoxPayload, CellPath, cell::CellConfig, domain::CellDomain, downcast,
    };

    use async_trait::async_trait;

    use tokio_util::sync::CancellationToken;

    use tracing_test::traced_test;

    use std::time::Duration;

    struct Flaky;

    #[async_trait]
    impl Cell for Flaky {
        async fn on_message(
            &mut self,
            envelope: &Envelope,
            _ctx: &mut CellContext,
        ) -> Result<Option<BoxPayload>, Error> {
            let text = envelope.peek::<String>().cloned().unwrap_or_default();
            if text == "boom" {
                return Err(Error::Handler("boom".to_owned()));
            }
            Ok(Some(Box::new(text)))
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn handler_failure_is_logged_and_answered() {
        let (domain, mut runner) =
            CellDomain::create("core", CancellationToken::new());
        tokio::spawn(async move { runner.run().await });
        domain
            .register("flaky", Flaky, CellConfig::default())
            .await
            .unwrap();

        let result = domain
            .send_and_wait(
                CellPath::parse("flaky@core").unwrap(),
                Box::new("boom".to_owned()),
                Duration::from_secs(2),
            )
            .await;
        assert!(matches!(result, Err(Error::Handler(_))));
        assert!(logs_contain("Handler of cell flaky@core failed"));

        // The failure stayed in the handler; the cell still serves.
        let reply = domain
            .send_and_wait(
                CellPath::parse("flaky@core").unwrap(),
                Box::new("fine".to_owned()),
                Duration::from_secs(2),
            )
            .await
            .unwrap();
        assert_eq!(downcast::<String>(reply).unwrap(), "fine");
    }
}
