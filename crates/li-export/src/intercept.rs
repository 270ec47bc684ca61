//! Component C — Intercept State Table.
//!
//! Per-LIID authorisation metadata and per-CIN sequence counters. Owned
//! exclusively by the exporter loop; never touched from another thread.

use std::collections::HashMap;
use std::fmt;

use crate::error::InterceptTableError;

/// Lawful Intercept Identifier — a warrant's opaque, printable key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Liid(pub String);

impl fmt::Display for Liid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Liid {
    fn from(s: &str) -> Self {
        Liid(s.to_string())
    }
}

impl From<String> for Liid {
    fn from(s: String) -> Self {
        Liid(s)
    }
}

/// Per (LIID, CIN) monotone counters. Incremented only after the encoder
/// has confirmed a successful encode of that record kind.
#[derive(Debug, Clone, Copy, Default)]
pub struct CinSeqno {
    pub cin: u32,
    pub iri_seqno: u64,
    pub cc_seqno: u64,
}

impl CinSeqno {
    pub fn new(cin: u32) -> Self {
        CinSeqno {
            cin,
            iri_seqno: 0,
            cc_seqno: 0,
        }
    }
}

/// A warrant's authorisation metadata, as announced by the provisioner.
#[derive(Debug, Clone)]
pub struct InterceptDetails {
    pub liid: Liid,
    pub authcc: String,
    pub delivcc: String,
}

/// Full per-intercept state: authorisation details plus every CIN's
/// sequence counters observed so far.
#[derive(Debug, Clone)]
pub struct Intercept {
    pub details: InterceptDetails,
    pub cins: HashMap<u32, CinSeqno>,
}

impl Intercept {
    fn new(details: InterceptDetails) -> Self {
        Intercept {
            details,
            cins: HashMap::new(),
        }
    }
}

/// The exporter's table of live intercepts, keyed by LIID.
#[derive(Debug, Default)]
pub struct InterceptTable {
    intercepts: HashMap<Liid, Intercept>,
}

impl InterceptTable {
    pub fn new() -> Self {
        InterceptTable {
            intercepts: HashMap::new(),
        }
    }

    /// `INTERCEPT_DETAILS`: create, or replace in place preserving the
    /// existing CIN sequence counters (reconfiguration must not reset
    /// numbering).
    pub fn add(&mut self, details: InterceptDetails) {
        match self.intercepts.get_mut(&details.liid) {
            Some(existing) => {
                existing.details = details;
            }
            None => {
                let liid = details.liid.clone();
                self.intercepts.insert(liid, Intercept::new(details));
            }
        }
    }

    /// `INTERCEPT_OVER`: remove the entry, freeing authorisation and all
    /// sequence counters. Missing LIID is reported but not fatal to the
    /// caller.
    pub fn end(&mut self, liid: &Liid) -> Result<(), InterceptTableError> {
        self.intercepts
            .remove(liid)
            .map(|_| ())
            .ok_or_else(|| InterceptTableError::UnknownLiid(liid.clone()))
    }

    pub fn get(&self, liid: &Liid) -> Option<&Intercept> {
        self.intercepts.get(liid)
    }

    /// Returns the sequence counter for this (LIID, CIN), lazily creating
    /// the counter (not the intercept itself — the LIID must already be
    /// known) at zero.
    pub fn get_or_create_counter(
        &mut self,
        liid: &Liid,
        cin: u32,
    ) -> Result<&mut CinSeqno, InterceptTableError> {
        let intercept = self
            .intercepts
            .get_mut(liid)
            .ok_or_else(|| InterceptTableError::UnknownLiid(liid.clone()))?;
        Ok(intercept.cins.entry(cin).or_insert_with(|| CinSeqno::new(cin)))
    }

    pub fn len(&self) -> usize {
        self.intercepts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intercepts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn details(liid: &str, authcc: &str) -> InterceptDetails {
        InterceptDetails {
            liid: Liid::from(liid),
            authcc: authcc.to_string(),
            delivcc: authcc.to_string(),
        }
    }

    #[test]
    fn add_creates_new_intercept() {
        let mut table = InterceptTable::new();
        table.add(details("X", "NZ"));
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(&Liid::from("X")).unwrap().details.authcc, "NZ");
    }

    #[test]
    fn add_preserves_cin_counters_on_replacement() {
        let mut table = InterceptTable::new();
        table.add(details("Z", "US"));
        {
            let seq = table.get_or_create_counter(&Liid::from("Z"), 1).unwrap();
            seq.cc_seqno = 3;
        }
        table.add(details("Z", "GB"));
        let intercept = table.get(&Liid::from("Z")).unwrap();
        assert_eq!(intercept.details.authcc, "GB");
        assert_eq!(intercept.cins.get(&1).unwrap().cc_seqno, 3);
    }

    #[test]
    fn end_removes_intercept_and_counters() {
        let mut table = InterceptTable::new();
        table.add(details("Y", "NZ"));
        table.get_or_create_counter(&Liid::from("Y"), 1).unwrap();
        table.end(&Liid::from("Y")).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn end_unknown_liid_is_reported_not_fatal() {
        let mut table = InterceptTable::new();
        let err = table.end(&Liid::from("missing")).unwrap_err();
        assert!(matches!(err, InterceptTableError::UnknownLiid(_)));
    }

    #[test]
    fn get_or_create_counter_fails_for_unknown_liid() {
        let mut table = InterceptTable::new();
        let err = table
            .get_or_create_counter(&Liid::from("ghost"), 1)
            .unwrap_err();
        assert!(matches!(err, InterceptTableError::UnknownLiid(_)));
    }

    #[test]
    fn counters_start_at_zero_and_are_per_cin() {
        let mut table = InterceptTable::new();
        table.add(details("X", "NZ"));
        let a = table.get_or_create_counter(&Liid::from("X"), 7).unwrap();
        assert_eq!(a.iri_seqno, 0);
        assert_eq!(a.cc_seqno, 0);
        a.cc_seqno += 1;
        let b = table.get_or_create_counter(&Liid::from("X"), 8).unwrap();
        assert_eq!(b.cc_seqno, 0);
    }
}
