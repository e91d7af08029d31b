// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Diagnostic context
//!
//! The `cdc` module provides the per-worker diagnostic context: domain,
//! cell name, session id, and a nested description stack. The context is
//! an explicit slot owned by each cell's processing loop, never hidden
//! thread-local state, so it can be captured at a send boundary, restored
//! on the worker that dispatches the message, and cleared afterwards.
//!

use serde::{Deserialize, Serialize};

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Immutable capture of a diagnostic context, taken at a call boundary
/// and carried across a handoff point (usually inside an envelope).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CdcSnapshot {
    domain: Option<String>,
    cell: Option<String>,
    session: Option<String>,
    descriptions: Vec<String>,
}

impl CdcSnapshot {
    /// The captured domain name, if any.
    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    /// The captured cell name, if any.
    pub fn cell(&self) -> Option<&str> {
        self.cell.as_deref()
    }

    /// The captured session id, if any.
    pub fn session(&self) -> Option<&str> {
        self.session.as_deref()
    }
}

/// Per-worker diagnostic context slot.
///
/// A `Cdc` belongs to exactly one logical worker. Before executing work on
/// behalf of another call chain the worker restores a snapshot into its
/// slot; after the work completes (on every exit path) it clears the slot
/// so no context leaks into the next task.
///
/// Restoring is split into two methods instead of an `allow_reuse` flag:
/// [`Cdc::restore_owned`] consumes the snapshot, so single use is enforced
/// by move semantics; [`Cdc::restore_shared`] deep-copies it, which is the
/// safe choice when the same snapshot fans out to several workers.
#[derive(Debug, Default)]
pub struct Cdc {
    domain: Option<String>,
    cell: Option<String>,
    session: Option<String>,
    descriptions: Vec<String>,
}

impl Cdc {
    /// Creates an empty context slot.
    pub fn new() -> Self {
        Cdc::default()
    }

    /// Snapshots the current ambient state into an immutable value.
    pub fn capture(&self) -> CdcSnapshot {
        CdcSnapshot {
            domain: self.domain.clone(),
            cell: self.cell.clone(),
            session: self.session.clone(),
            descriptions: self.descriptions.clone(),
        }
    }

    /// Installs a snapshot, consuming it. Cheap: no copies are taken, and
    /// the move makes accidental reuse a compile error.
    pub fn restore_owned(&mut self, snapshot: CdcSnapshot) {
        self.domain = snapshot.domain;
        self.cell = snapshot.cell;
        self.session = snapshot.session;
        self.descriptions = snapshot.descriptions;
    }

    /// Installs a deep copy of a snapshot that remains reusable by other
    /// workers.
    pub fn restore_shared(&mut self, snapshot: &CdcSnapshot) {
        self.restore_owned(snapshot.clone());
    }

    /// Removes all ambient fields. Idempotent; callers clear on every
    /// exit path of a handoff boundary, including exceptional ones.
    pub fn clear(&mut self) {
        self.domain = None;
        self.cell = None;
        self.session = None;
        self.descriptions.clear();
    }

    /// Tags the context with the identity of the executing cell. Used to
    /// establish a fresh context when an envelope carries none.
    pub fn set_identity(&mut self, cell: &str, domain: &str) {
        self.cell = Some(cell.to_owned());
        self.domain = Some(domain.to_owned());
    }

    /// Sets the session id for the current call chain.
    pub fn set_session(&mut self, session: impl Into<String>) {
        self.session = Some(session.into());
    }

    /// The ambient domain name, exposed read-only for logging.
    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    /// The ambient cell name, exposed read-only for logging.
    pub fn cell(&self) -> Option<&str> {
        self.cell.as_deref()
    }

    /// The ambient session id, exposed read-only for logging.
    pub fn session(&self) -> Option<&str> {
        self.session.as_deref()
    }

    /// Pushes a nested description onto the context stack.
    pub fn push_description(&mut self, description: impl Into<String>) {
        self.descriptions.push(description.into());
    }

    /// Pops the innermost description, if any.
    pub fn pop_description(&mut self) -> Option<String> {
        self.descriptions.pop()
    }

    /// The nested description stack, outermost first.
    pub fn descriptions(&self) -> &[String] {
        &self.descriptions
    }
}

/// Process-scoped session id generator.
///
/// Combines a caller-supplied prefix with a time-seeded monotonic counter,
/// yielding ids unique within one process; distinct prefixes per process
/// extend that across a fleet. The generator is an explicit object owned
/// by the domain, not a static.
#[derive(Debug)]
pub struct SessionGenerator {
    prefix: String,
    counter: AtomicU64,
}

impl SessionGenerator {
    /// Creates a generator with the given prefix, seeding the counter
    /// from the wall clock so restarted processes do not reissue ids.
    pub fn new(prefix: &str) -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        SessionGenerator {
            prefix: prefix.to_owned(),
            counter: AtomicU64::new(seed),
        }
    }

    /// Returns the next session id, `"<prefix>-<counter>"`.
    pub fn next(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}-{:x}", self.prefix, n)
    }
}
