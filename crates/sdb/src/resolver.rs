//! Turning a typed query into one record

use crate::matcher;
use crate::record::Record;
use std::collections::HashSet;
use std::fmt;

/// Indices of records matching `term`, best match first. Records that do
/// not match are dropped; equal scores keep their stored order.
pub fn search_rank(term: &str, records: &[Record]) -> Vec<usize> {
    let mut scored: Vec<(f64, usize)> = records
        .iter()
        .enumerate()
        .map(|(i, r)| (matcher::score(term, &r.search_surface()), i))
        .filter(|(score, _)| *score > 0.0)
        .collect();

    // stable: ties stay in insertion order
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.into_iter().map(|(_, i)| i).collect()
}

/// Records matching `term`, best match first
pub fn search<'a>(term: &str, records: &'a [Record]) -> Vec<&'a Record> {
    search_rank(term, records)
        .into_iter()
        .map(|i| &records[i])
        .collect()
}

/// The shortest label that tells candidates apart
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DisplayKey {
    Domain(String),
    DomainUser(String, String),
    DomainUserNotes(String, String, String),
    /// Nothing short of the whole record distinguishes it
    Full(Record),
}

impl fmt::Display for DisplayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayKey::Domain(domain) => write!(f, "{}", domain),
            DisplayKey::DomainUser(domain, user) => write!(f, "{}@{}", user, domain),
            DisplayKey::DomainUserNotes(domain, user, notes) => {
                write!(f, "{}@{}: {}", user, domain, notes)
            }
            DisplayKey::Full(record) => write!(f, "{}", record.pretty()),
        }
    }
}

/// Pick the first projection (domain; domain+username;
/// domain+username+notes) under which every candidate is unique. Identical
/// candidates come back as [`DisplayKey::Full`] for the caller to sort out.
pub fn disambiguate(records: &[&Record]) -> Vec<DisplayKey> {
    let projections: [fn(&Record) -> DisplayKey; 3] = [
        |r| DisplayKey::Domain(r.domain.clone()),
        |r| DisplayKey::DomainUser(r.domain.clone(), r.username.clone()),
        |r| DisplayKey::DomainUserNotes(r.domain.clone(), r.username.clone(), r.notes.clone()),
    ];

    for project in projections {
        let keys: Vec<DisplayKey> = records.iter().map(|r| project(r)).collect();
        let mut seen = HashSet::with_capacity(keys.len());
        if keys.iter().all(|k| seen.insert(k)) {
            return keys;
        }
    }
    records.iter().map(|r| DisplayKey::Full((*r).clone())).collect()
}

/// Outcome of resolving a query
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    NoMatch,
    /// Index of the single hit
    One(usize),
    /// Ranked hits with the labels to offer for a numbered choice
    Ambiguous(Vec<(usize, DisplayKey)>),
}

pub fn resolve(term: &str, records: &[Record]) -> Resolution {
    let hits = search_rank(term, records);
    match hits.len() {
        0 => Resolution::NoMatch,
        1 => Resolution::One(hits[0]),
        _ => {
            let candidates: Vec<&Record> = hits.iter().map(|&i| &records[i]).collect();
            let keys = disambiguate(&candidates);
            Resolution::Ambiguous(hits.into_iter().zip(keys).collect())
        }
    }
}
