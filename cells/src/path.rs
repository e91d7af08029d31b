// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Cell path
//!
//! The `path` module provides the `CellPath` type: the ordered route of
//! hops an envelope traverses to reach its destination. The hop list is
//! immutable after construction; only the cursor moves while the router
//! traverses the path.
//!

use crate::{CellAddress, Error};

use serde::{Deserialize, Serialize};

use std::fmt::{self, Formatter};
use std::str::FromStr;

/// One position in a cell path: a primary address plus optional
/// alternatives the router may fall back to, in order, when the primary
/// does not accept delivery.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PathHop {
    address: CellAddress,
    alternatives: Vec<CellAddress>,
}

impl PathHop {
    /// Creates a hop with no alternatives.
    pub fn new(address: CellAddress) -> Self {
        PathHop {
            address,
            alternatives: Vec::new(),
        }
    }

    /// Creates a hop with failover alternatives, tried in the given order.
    pub fn with_alternatives(
        address: CellAddress,
        alternatives: Vec<CellAddress>,
    ) -> Self {
        PathHop {
            address,
            alternatives,
        }
    }

    /// The primary address at this hop.
    pub fn address(&self) -> &CellAddress {
        &self.address
    }

    /// The failover alternatives at this hop.
    pub fn alternatives(&self) -> &[CellAddress] {
        &self.alternatives
    }

    /// The primary address followed by the alternatives, in delivery order.
    pub fn candidates(&self) -> impl Iterator<Item = &CellAddress> {
        std::iter::once(&self.address).chain(self.alternatives.iter())
    }
}

/// Ordered, non-empty route of hops with a traversal cursor.
///
/// While the cursor is within the hop list the path is "open"; once it
/// passes the last hop the path is exhausted and the envelope has reached
/// its final destination. The text form separates hops with `:` and
/// alternatives within a hop with `,`:
///
/// ```ignore
/// use cells::CellPath;
///
/// let path: CellPath = "relay@doors:pool-1@core,pool-2@core".parse()?;
/// assert_eq!(path.len(), 2);
/// ```
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct CellPath {
    hops: Vec<PathHop>,
    cursor: usize,
}

impl CellPath {
    /// Creates a path from an ordered hop list, cursor at the first hop.
    ///
    /// # Errors
    ///
    /// Returns `Error::EmptyPath` if zero hops are given.
    pub fn of(hops: Vec<PathHop>) -> Result<Self, Error> {
        if hops.is_empty() {
            Err(Error::EmptyPath)
        } else {
            Ok(CellPath { hops, cursor: 0 })
        }
    }

    /// Creates a single-hop path to the given address.
    pub fn to(address: CellAddress) -> Self {
        CellPath {
            hops: vec![PathHop::new(address)],
            cursor: 0,
        }
    }

    /// Parses a `:`-separated hop chain; `,` separates alternatives
    /// within one hop, the first entry being the primary.
    pub fn parse(text: &str) -> Result<Self, Error> {
        let mut hops = Vec::new();
        for hop in text.split(':') {
            let mut candidates = hop.split(',');
            let primary = CellAddress::parse(
                candidates.next().unwrap_or_default(),
            )?;
            let alternatives = candidates
                .map(CellAddress::parse)
                .collect::<Result<Vec<_>, _>>()?;
            hops.push(PathHop::with_alternatives(primary, alternatives));
        }
        CellPath::of(hops)
    }

    /// The hop at the cursor.
    ///
    /// # Errors
    ///
    /// Returns `Error::PathExhausted` once the cursor has passed the last
    /// hop. Callers are expected to check `is_exhausted()` first.
    pub fn current_hop(&self) -> Result<&PathHop, Error> {
        self.hops.get(self.cursor).ok_or(Error::PathExhausted)
    }

    /// Moves the cursor one hop forward. A no-op past the end.
    pub fn advance(&mut self) {
        if self.cursor < self.hops.len() {
            self.cursor += 1;
        }
    }

    /// Moves the cursor one hop back. A no-op at the first hop.
    pub fn revert(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    /// True once the cursor has passed the last hop.
    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.hops.len()
    }

    /// True while the cursor sits on the last hop.
    pub fn is_final_hop(&self) -> bool {
        self.cursor + 1 == self.hops.len()
    }

    /// Number of hops in the path.
    pub fn len(&self) -> usize {
        self.hops.len()
    }

    /// True for the degenerate zero-hop case, which `of` never produces.
    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    /// Current cursor position.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// The last hop of the path, naming the final destination.
    pub fn final_hop(&self) -> &PathHop {
        // The constructor guarantees at least one hop.
        &self.hops[self.hops.len() - 1]
    }

    /// A new path with the hop list reversed and the cursor reset to the
    /// first hop. Alternatives are dropped: a return route is exact.
    pub fn reverse(&self) -> CellPath {
        let hops = self
            .hops
            .iter()
            .rev()
            .map(|hop| PathHop::new(hop.address().clone()))
            .collect();
        CellPath { hops, cursor: 0 }
    }

    /// The primary addresses of all hops, in path order.
    pub fn addresses(&self) -> impl Iterator<Item = &CellAddress> {
        self.hops.iter().map(PathHop::address)
    }
}

impl FromStr for CellPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CellPath::parse(s)
    }
}

impl fmt::Display for CellPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (i, hop) in self.hops.iter().enumerate() {
            if i > 0 {
                write!(f, ":")?;
            }
            write!(f, "{}", hop.address())?;
            for alternative in hop.alternatives() {
                write!(f, ",{}", alternative)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    fn address(text: &str) -> CellAddress {
        CellAddress::parse(text).unwrap()
    }

    #[test]
    fn of_rejects_empty_hop_list() {
        assert_eq!(CellPath::of(vec![]), Err(Error::EmptyPath));
    }

    #[test]
    fn parse_hop_chain() {
        let path = CellPath::parse("relay@doors:echo@core").unwrap();
        assert_eq!(path.len(), 2);
        assert_eq!(path.current_hop().unwrap().address(), &address("relay@doors"));
        assert_eq!(path.final_hop().address(), &address("echo@core"));
    }

    #[test]
    fn parse_alternatives() {
        let path = CellPath::parse("pool-1@core,pool-2@core,pool-3@core").unwrap();
        let hop = path.current_hop().unwrap();
        assert_eq!(hop.address(), &address("pool-1@core"));
        assert_eq!(
            hop.alternatives(),
            &[address("pool-2@core"), address("pool-3@core")]
        );
        assert_eq!(hop.candidates().count(), 3);
    }

    #[test]
    fn parse_bad_hop_fails() {
        assert!(CellPath::parse("relay@doors:").is_err());
        assert!(CellPath::parse("").is_err());
    }

    #[test]
    fn advance_to_exhaustion() {
        let mut path = CellPath::parse("a@x:b@y:c@z").unwrap();
        for hop in 0..path.len() {
            assert!(!path.is_exhausted());
            assert_eq!(path.is_final_hop(), hop == 2);
            assert!(path.current_hop().is_ok());
            path.advance();
        }
        assert!(path.is_exhausted());
        assert!(!path.is_final_hop());
        assert_eq!(path.current_hop(), Err(Error::PathExhausted));
        // Advancing past the end stays a no-op.
        path.advance();
        assert_eq!(path.cursor(), 3);
    }

    #[test]
    fn revert_moves_cursor_back() {
        let mut path = CellPath::parse("a@x:b@y").unwrap();
        path.advance();
        path.revert();
        assert_eq!(path.cursor(), 0);
        path.revert();
        assert_eq!(path.cursor(), 0);
    }

    #[test]
    fn reverse_flips_hops_and_resets_cursor() {
        let mut path = CellPath::parse("a@x:b@y:c@z").unwrap();
        path.advance();
        path.advance();
        let reversed = path.reverse();
        assert_eq!(reversed.cursor(), 0);
        let addresses: Vec<_> = reversed.addresses().cloned().collect();
        assert_eq!(
            addresses,
            vec![address("c@z"), address("b@y"), address("a@x")]
        );
    }

    #[test]
    fn display_round_trip() {
        let path = CellPath::parse("relay@doors:pool-1@core,pool-2@core").unwrap();
        let parsed = CellPath::parse(&path.to_string()).unwrap();
        assert_eq!(path, parsed);
    }
}
