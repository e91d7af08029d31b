// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Cell address
//!
//! The `address` module provides the `CellAddress` type. A `CellAddress`
//! names a single cell inside a domain and serializes to the canonical
//! `"cell@domain"` text form.
//!

use crate::Error;

use serde::{Deserialize, Serialize};

use std::fmt::{self, Formatter};
use std::str::FromStr;

/// Well-known wildcard domain that resolves to the current process.
pub const LOCAL_DOMAIN: &str = "local";

/// Address of a cell: a cell name qualified by the domain hosting it.
///
/// Addresses are immutable values. Two addresses are equal iff both the
/// cell name and the domain name match. The text form is `"cell@domain"`;
/// a bare cell name implies the [`LOCAL_DOMAIN`].
///
/// ```ignore
/// use cells::CellAddress;
///
/// let addr = CellAddress::parse("echo@core")?;
/// assert_eq!(addr.cell(), "echo");
/// assert_eq!(addr.domain(), "core");
/// assert_eq!(addr.to_string(), "echo@core");
///
/// let local = CellAddress::parse("echo")?;
/// assert_eq!(local.domain(), "local");
/// ```
#[derive(
    Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct CellAddress {
    /// Name of the cell, unique within its domain.
    cell: String,
    /// Name of the domain hosting the cell.
    domain: String,
}

impl CellAddress {
    /// Creates an address from a cell name and a domain name.
    ///
    /// # Errors
    ///
    /// Returns `Error::MalformedAddress` if either name is empty or
    /// contains one of the reserved separator characters (`@`, `:`, `,`).
    pub fn new(cell: &str, domain: &str) -> Result<Self, Error> {
        validate_name(cell)?;
        validate_name(domain)?;
        Ok(CellAddress {
            cell: cell.to_owned(),
            domain: domain.to_owned(),
        })
    }

    /// Creates an address in the local domain.
    pub fn local(cell: &str) -> Result<Self, Error> {
        CellAddress::new(cell, LOCAL_DOMAIN)
    }

    /// Parses `"cell@domain"` or `"cell"` (domain defaults to local).
    ///
    /// # Errors
    ///
    /// Returns `Error::MalformedAddress` on an empty cell name, an empty
    /// domain after `@`, or more than one `@`.
    pub fn parse(text: &str) -> Result<Self, Error> {
        let mut parts = text.split('@');
        let cell = parts.next().unwrap_or_default();
        let domain = parts.next();
        if parts.next().is_some() {
            return Err(Error::MalformedAddress(text.to_owned()));
        }
        match domain {
            Some(domain) => CellAddress::new(cell, domain),
            None => CellAddress::local(cell),
        }
        .map_err(|_| Error::MalformedAddress(text.to_owned()))
    }

    /// Bypasses validation for names minted by the runtime itself.
    pub(crate) fn new_unchecked(cell: &str, domain: &str) -> Self {
        CellAddress {
            cell: cell.to_owned(),
            domain: domain.to_owned(),
        }
    }

    /// The cell name.
    pub fn cell(&self) -> &str {
        &self.cell
    }

    /// The domain name.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// True if the domain is the wildcard local domain.
    pub fn is_local(&self) -> bool {
        self.domain == LOCAL_DOMAIN
    }

    /// True if this address resolves inside the named domain, either by
    /// exact match or through the local wildcard.
    pub fn resolves_in(&self, domain: &str) -> bool {
        self.domain == domain || self.is_local()
    }
}

fn validate_name(name: &str) -> Result<(), Error> {
    if name.is_empty()
        || name.contains('@')
        || name.contains(':')
        || name.contains(',')
    {
        Err(Error::MalformedAddress(name.to_owned()))
    } else {
        Ok(())
    }
}

impl fmt::Display for CellAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.cell, self.domain)
    }
}

impl FromStr for CellAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CellAddress::parse(s)
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn parse_qualified() {
        let address = CellAddress::parse("echo@core").unwrap();
        assert_eq!(address.cell(), "echo");
        assert_eq!(address.domain(), "core");
        assert!(!address.is_local());
    }

    #[test]
    fn parse_bare_name_defaults_to_local() {
        let address = CellAddress::parse("echo").unwrap();
        assert_eq!(address.cell(), "echo");
        assert_eq!(address.domain(), LOCAL_DOMAIN);
        assert!(address.is_local());
    }

    #[test]
    fn parse_empty_name_fails() {
        assert_eq!(
            CellAddress::parse(""),
            Err(Error::MalformedAddress("".to_owned()))
        );
        assert_eq!(
            CellAddress::parse("@core"),
            Err(Error::MalformedAddress("@core".to_owned()))
        );
        assert_eq!(
            CellAddress::parse("echo@"),
            Err(Error::MalformedAddress("echo@".to_owned()))
        );
    }

    #[test]
    fn parse_double_at_fails() {
        assert!(CellAddress::parse("a@b@c").is_err());
    }

    #[test]
    fn display_round_trip() {
        let address = CellAddress::parse("pool-1@doors").unwrap();
        let parsed: CellAddress = address.to_string().parse().unwrap();
        assert_eq!(address, parsed);
    }

    #[test]
    fn equality_needs_both_fields() {
        let a = CellAddress::new("echo", "core").unwrap();
        let b = CellAddress::new("echo", "doors").unwrap();
        let c = CellAddress::new("echo", "core").unwrap();
        assert_ne!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn resolves_in_matches_wildcard() {
        let local = CellAddress::local("echo").unwrap();
        let exact = CellAddress::new("echo", "core").unwrap();
        assert!(local.resolves_in("core"));
        assert!(exact.resolves_in("core"));
        assert!(!exact.resolves_in("doors"));
    }
}
