//! Credential records

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// One credential entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Record {
    pub domain: String,
    pub username: String,
    pub password: String,
    pub notes: String,
}

impl Record {
    pub fn new(
        domain: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        notes: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            username: username.into(),
            password: password.into(),
            notes: notes.into(),
        }
    }

    /// The text fuzzy search runs against. The password is never part of it.
    pub fn search_surface(&self) -> String {
        let mut surface =
            String::with_capacity(self.domain.len() + self.username.len() + self.notes.len());
        surface.push_str(&self.domain);
        surface.push_str(&self.username);
        surface.push_str(&self.notes);
        surface
    }

    /// Summary line: `username@domain`, plus `: notes` when there are notes
    pub fn pretty(&self) -> String {
        let mut s = format!("{}@{}", self.username, self.domain);
        if !self.notes.is_empty() {
            s.push_str(": ");
            s.push_str(&self.notes);
        }
        s
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pretty())
    }
}

/// Ordered records as stored on disk
pub type RecordSet = Vec<Record>;

/// True when no two records are structurally identical
pub fn is_unique(records: &[Record]) -> bool {
    let mut seen = HashSet::with_capacity(records.len());
    records.iter().all(|r| seen.insert(r))
}
