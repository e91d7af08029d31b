// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Transport
//!
//! The `transport` module provides the seam between domains: a trait the
//! router calls to hand an envelope to another domain, and an in-process
//! implementation linking two domains directly.
//!

use crate::{Envelope, Error, domain::DomainRef};

use async_trait::async_trait;

use std::sync::Arc;

/// Carries envelopes from one domain to another.
///
/// `transmit` consumes the envelope; a transport that accepts it owns
/// delivery from there. Failures surface as errors to the sending router,
/// which reports them as `Error::NoRoute`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn transmit(
        &self,
        domain: &str,
        envelope: Envelope,
    ) -> Result<(), Error>;
}

/// In-process transport handing envelopes straight to a peer domain's
/// router. Useful in tests and wherever several domains share a process.
pub struct LoopbackTransport {
    peer: DomainRef,
}

impl LoopbackTransport {
    pub fn new(peer: DomainRef) -> Self {
        LoopbackTransport { peer }
    }

    /// Links two domains in both directions.
    pub async fn connect(a: &DomainRef, b: &DomainRef) {
        a.add_transport(b.name(), Arc::new(LoopbackTransport::new(b.clone())))
            .await;
        b.add_transport(a.name(), Arc::new(LoopbackTransport::new(a.clone())))
            .await;
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn transmit(
        &self,
        domain: &str,
        envelope: Envelope,
    ) -> Result<(), Error> {
        if domain != self.peer.name() {
            return Err(Error::Transport(format!(
                "Domain {} is not reachable through this link.",
                domain
            )));
        }
        self.peer.deliver_remote(envelope).await;
        Ok(())
    }
}
