// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Cells messaging runtime
//!
//! A lightweight runtime of named message handlers, the cells, living in
//! routing containers, the domains. Envelopes travel along explicit hop
//! paths, across domains through pluggable transports, and every request
//! resolves exactly once: with a reply, a timeout, or a cancellation.
//!
//! ```ignore
//! use cells::{
//!     Cell, CellConfig, CellContext, CellDomain, CellPath, Envelope, Error,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! struct Echo;
//!
//! #[async_trait::async_trait]
//! impl Cell for Echo {
//!     async fn on_message(
//!         &mut self,
//!         envelope: &Envelope,
//!         _ctx: &mut CellContext,
//!     ) -> Result<Option<cells::BoxPayload>, Error> {
//!         let text = envelope.peek::<String>().cloned().unwrap_or_default();
//!         Ok(Some(Box::new(text)))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let token = CancellationToken::new();
//!     let (domain, mut runner) = CellDomain::create("core", token);
//!     tokio::spawn(async move { runner.run().await });
//!
//!     domain.register("echo", Echo, CellConfig::default()).await?;
//!     let reply = domain
//!         .send_and_wait(
//!             CellPath::parse("echo@core")?,
//!             Box::new("hello".to_owned()),
//!             std::time::Duration::from_secs(1),
//!         )
//!         .await?;
//!     assert_eq!(cells::downcast::<String>(reply)?, "hello");
//!
//!     domain.stop_domain();
//!     Ok(())
//! }
//! ```
//!

mod address;
mod cdc;
mod cell;
mod coordinator;
mod domain;
mod envelope;
mod error;
mod inbox;
mod path;
mod runner;
mod transport;

pub use address::{CellAddress, LOCAL_DOMAIN};
pub use cdc::{Cdc, CdcSnapshot, SessionGenerator};
pub use cell::{
    Cell, CellConfig, CellContext, CellEndpoint, CellState, DrainPolicy,
    MailboxPolicy,
};
pub use coordinator::{PendingHandle, ReplyCallback, ReplyResult};
pub use domain::{CellDomain, DomainEvent, DomainRef, DomainRunner};
pub use envelope::{BoxPayload, Envelope, Payload, downcast};
pub use error::Error;
pub use path::{CellPath, PathHop};
pub use transport::{LoopbackTransport, Transport};
