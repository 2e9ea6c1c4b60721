//! Text and data annotations attached to slot rows.
//!
//! An [`Annotation`] is an immutable name/value pair. Rows keep their
//! annotations in an [`AnnotationSet`] behind an `Arc`; anything that changes a
//! set works on a copy, so a merge never affects the row it was read from.
//!
//! Names are compared exactly: no case folding and no whitespace trimming.

pub mod merge;

pub use merge::{DataAnnotationMergeStrategy, MergeStrategy};

use crate::error::{EngineError, EngineResult};
use crate::slot::DataRef;
use indexmap::IndexMap;
use std::fmt;

/// A named string value attached to a row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Annotation {
    name: String,
    value: String,
}

impl Annotation {
    /// Create an annotation. Fails if `name` is empty.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> EngineResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(EngineError::AnnotationNameEmpty);
        }
        Ok(Self {
            name,
            value: value.into(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// A new annotation with the same name and another value.
    pub fn with_value(&self, value: impl Into<String>) -> Self {
        Self {
            name: self.name.clone(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={:?}", self.name, self.value)
    }
}

/// Insertion-ordered set of annotations with unique names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnotationSet {
    entries: IndexMap<String, Annotation>,
}

impl AnnotationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from name/value pairs (last write wins).
    pub fn from_pairs<I, K, V>(pairs: I) -> EngineResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut set = Self::new();
        for (name, value) in pairs {
            set.insert(Annotation::new(name, value)?);
        }
        Ok(set)
    }

    /// Insert an annotation, replacing any annotation with the same name.
    /// A replaced entry keeps its position.
    pub fn insert(&mut self, annotation: Annotation) -> Option<Annotation> {
        self.entries.insert(annotation.name.clone(), annotation)
    }

    pub fn get(&self, name: &str) -> Option<&Annotation> {
        self.entries.get(name)
    }

    /// Value of the annotation called `name`, if present.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(|a| a.value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Remove an annotation, preserving the order of the others.
    pub fn remove(&mut self, name: &str) -> Option<Annotation> {
        self.entries.shift_remove(name)
    }

    /// Rename an annotation in place. Returns `false` if `from` is absent.
    /// An existing annotation called `to` is replaced.
    pub fn rename(&mut self, from: &str, to: impl Into<String>) -> EngineResult<bool> {
        let to = to.into();
        if to.is_empty() {
            return Err(EngineError::AnnotationNameEmpty);
        }
        let Some((index, _, old)) = self.entries.shift_remove_full(from) else {
            return Ok(false);
        };
        self.entries.shift_remove(&to);
        let renamed = Annotation {
            name: to.clone(),
            value: old.value,
        };
        let position = index.min(self.entries.len());
        self.entries.shift_insert(position, to, renamed);
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Annotation> {
        self.entries.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Merge one annotation into the set using `strategy` on a name collision.
    pub fn merge_in(&mut self, incoming: Annotation, strategy: MergeStrategy) {
        match self.entries.get_mut(&incoming.name) {
            Some(existing) => {
                let value = strategy.merge(&existing.value, &incoming.value);
                if value != existing.value {
                    *existing = existing.with_value(value);
                }
            }
            None => {
                self.entries.insert(incoming.name.clone(), incoming);
            }
        }
    }

    /// Merge annotations one after another, in iteration order.
    pub fn merge_all<I>(&mut self, incoming: I, strategy: MergeStrategy)
    where
        I: IntoIterator<Item = Annotation>,
    {
        for annotation in incoming {
            self.merge_in(annotation, strategy);
        }
    }

    /// A new set holding `self` merged with `other`.
    pub fn merged(&self, other: &AnnotationSet, strategy: MergeStrategy) -> AnnotationSet {
        let mut result = self.clone();
        result.merge_all(other.iter().cloned(), strategy);
        result
    }
}

impl FromIterator<Annotation> for AnnotationSet {
    fn from_iter<T: IntoIterator<Item = Annotation>>(iter: T) -> Self {
        let mut set = Self::new();
        for annotation in iter {
            set.insert(annotation);
        }
        set
    }
}

impl<'a> IntoIterator for &'a AnnotationSet {
    type Item = &'a Annotation;
    type IntoIter = indexmap::map::Values<'a, String, Annotation>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.values()
    }
}

/// Insertion-ordered map of named secondary payloads.
#[derive(Debug, Clone, Default)]
pub struct DataAnnotationSet {
    entries: IndexMap<String, DataRef>,
}

impl DataAnnotationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a data annotation, replacing any entry with the same name.
    pub fn insert(&mut self, name: impl Into<String>, data: DataRef) -> EngineResult<Option<DataRef>> {
        let name = name.into();
        if name.is_empty() {
            return Err(EngineError::AnnotationNameEmpty);
        }
        Ok(self.entries.insert(name, data))
    }

    pub fn get(&self, name: &str) -> Option<&DataRef> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<DataRef> {
        self.entries.shift_remove(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DataRef)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Merge one data annotation using `strategy` on a name collision.
    /// Empty names are ignored, they cannot be constructed through `insert`.
    pub fn merge_in(&mut self, name: &str, incoming: &DataRef, strategy: DataAnnotationMergeStrategy) {
        if name.is_empty() {
            return;
        }
        match self.entries.get_mut(name) {
            Some(existing) => {
                *existing = strategy.merge(existing, incoming);
            }
            None => {
                self.entries.insert(name.to_string(), incoming.clone());
            }
        }
    }

    pub fn merge_all<'a, I>(&mut self, incoming: I, strategy: DataAnnotationMergeStrategy)
    where
        I: IntoIterator<Item = (&'a str, &'a DataRef)>,
    {
        for (name, data) in incoming {
            self.merge_in(name, data, strategy);
        }
    }
}

/// Two sets are equal when they hold the same names bound to the same payloads.
impl PartialEq for DataAnnotationSet {
    fn eq(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len()
            && self
                .entries
                .iter()
                .all(|(name, data)| other.entries.get(name).is_some_and(|o| o.ptr_eq(data)))
    }
}
