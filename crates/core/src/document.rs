//! Human-readable, year-scoped document numbers (`PO-2024-001`, `INV-2024-014`).

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Which document series a number belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Purchase,
    Invoice,
}

impl DocumentKind {
    pub fn prefix(self) -> &'static str {
        match self {
            DocumentKind::Purchase => "PO",
            DocumentKind::Invoice => "INV",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DocumentKind::Purchase => "purchase",
            DocumentKind::Invoice => "invoice",
        }
    }
}

/// A formatted document number: `{prefix}-{year}-{seq:03}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentNumber {
    kind: DocumentKind,
    year: i32,
    sequence: u32,
}

impl DocumentNumber {
    pub fn new(kind: DocumentKind, year: i32, sequence: u32) -> Result<Self, DomainError> {
        if sequence == 0 {
            return Err(DomainError::validation("document sequence starts at 1"));
        }
        if !(1000..=9999).contains(&year) {
            return Err(DomainError::validation(format!("invalid document year {year}")));
        }
        Ok(Self {
            kind,
            year,
            sequence,
        })
    }

    pub fn kind(&self) -> DocumentKind {
        self.kind
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }
}

impl fmt::Display for DocumentNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{:03}", self.kind.prefix(), self.year, self.sequence)
    }
}

impl FromStr for DocumentNumber {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DomainError::invalid_id(format!("document number: {s:?}"));
        let mut parts = s.splitn(3, '-');
        let kind = match parts.next() {
            Some("PO") => DocumentKind::Purchase,
            Some("INV") => DocumentKind::Invoice,
            _ => return Err(invalid()),
        };
        let year: i32 = parts.next().and_then(|y| y.parse().ok()).ok_or_else(invalid)?;
        let sequence: u32 = parts.next().and_then(|n| n.parse().ok()).ok_or_else(invalid)?;
        DocumentNumber::new(kind, year, sequence).map_err(|_| invalid())
    }
}
