//! Batch keys: the tuple of matching-column values a row is grouped by.

use std::fmt::Write as _;

/// One component of a batch key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyPart {
    /// The row's value for the column.
    Value(String),
    /// The row has no such column. Matches other missing parts only.
    Missing,
    /// The row has no such column and matches nothing. The id is unique per row.
    Unmatched(u64),
    /// The row has no such column and matches any value.
    Wildcard,
}

impl KeyPart {
    /// Row-unique id used for `Unmatched` parts.
    pub fn row_id(slot_index: usize, row: usize) -> u64 {
        ((slot_index as u64) << 32) | (row as u64 & 0xFFFF_FFFF)
    }
}

/// Ordered tuple of key parts, one per matching column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct BatchKey(Vec<KeyPart>);

impl BatchKey {
    pub fn new(parts: Vec<KeyPart>) -> Self {
        Self(parts)
    }

    /// The key shared by every row when nothing is matched.
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn has_wildcard(&self) -> bool {
        self.0.iter().any(|p| matches!(p, KeyPart::Wildcard))
    }

    /// Whether a wildcard key can join the group of `concrete`.
    ///
    /// Every non-wildcard part must be equal, and `concrete` itself must not
    /// contain wildcards.
    pub fn accepts(&self, concrete: &BatchKey) -> bool {
        self.0.len() == concrete.0.len()
            && !concrete.has_wildcard()
            && self
                .0
                .iter()
                .zip(&concrete.0)
                .all(|(mine, theirs)| matches!(mine, KeyPart::Wildcard) || mine == theirs)
    }

    /// The most specific key matched by both `self` and `other`.
    ///
    /// A wildcard part takes the other key's part. `None` when two
    /// non-wildcard parts differ or the lengths differ.
    pub fn unify(&self, other: &BatchKey) -> Option<BatchKey> {
        if self.0.len() != other.0.len() {
            return None;
        }
        self.0
            .iter()
            .zip(&other.0)
            .map(|(mine, theirs)| match (mine, theirs) {
                (KeyPart::Wildcard, part) | (part, KeyPart::Wildcard) => Some(part.clone()),
                (mine, theirs) if mine == theirs => Some(mine.clone()),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()
            .map(BatchKey)
    }

    /// Human readable form, e.g. `(Sample="A", Note=<missing>)`.
    pub fn describe(&self, columns: &[String]) -> String {
        let mut out = String::from("(");
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            match columns.get(i) {
                Some(column) => {
                    let _ = write!(out, "{}=", column);
                }
                None => out.push_str("row="),
            }
            let _ = match part {
                KeyPart::Value(v) => write!(out, "{:?}", v),
                KeyPart::Missing => write!(out, "<missing>"),
                KeyPart::Unmatched(id) => write!(out, "<unmatched {}:{}>", id >> 32, id & 0xFFFF_FFFF),
                KeyPart::Wildcard => write!(out, "*"),
            };
        }
        out.push(')');
        out
    }
}
