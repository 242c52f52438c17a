//! Grouping of flat records by dotted path segments.

use std::collections::BTreeMap;

use crate::TensorRecord;

/// Separator between the segments of a record name.
pub const PATH_SEPARATOR: char = '.';

/// A record together with its name split into path segments.
///
/// The segments usually come from [`TensorRecord::name`], but may come from a remapped name.
#[derive(Debug, Clone)]
pub struct FlatRecord<R> {
    record: R,
    segments: Vec<String>,
}

impl<R: TensorRecord> FlatRecord<R> {
    /// Split the record's own name.
    pub fn new(record: R) -> Self {
        let segments = split_path(record.name());
        Self { record, segments }
    }

    /// Use `name` instead of the record's own name to place it in the tree.
    pub fn with_name(record: R, name: &str) -> Self {
        Self {
            record,
            segments: split_path(name),
        }
    }
}

impl<R> FlatRecord<R> {
    /// The wrapped record.
    pub fn record(&self) -> &R {
        &self.record
    }

    /// All path segments, before any descent.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The dotted path used to place the record.
    pub fn path(&self) -> String {
        self.segments.join(".")
    }
}

fn split_path(name: &str) -> Vec<String> {
    name.split(PATH_SEPARATOR).map(str::to_string).collect()
}

/// A record seen from some position in the tree.
///
/// The remaining segments are always a suffix of the record's segments; every descent
/// consumes exactly one.
#[derive(Debug)]
pub struct PathEntry<'a, R> {
    record: &'a FlatRecord<R>,
    depth: usize,
}

impl<R> Clone for PathEntry<'_, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R> Copy for PathEntry<'_, R> {}

impl<'a, R> PathEntry<'a, R> {
    /// Entry at the root of the tree.
    pub fn root(record: &'a FlatRecord<R>) -> Self {
        Self { record, depth: 0 }
    }

    /// The underlying record.
    pub fn record(&self) -> &'a R {
        &self.record.record
    }

    /// The flat record this entry points into.
    pub fn flat(&self) -> &'a FlatRecord<R> {
        self.record
    }

    /// Segments not consumed yet.
    pub fn remaining(&self) -> &'a [String] {
        &self.record.segments[self.depth..]
    }

    /// The next unconsumed segment, if any.
    pub fn next_segment(&self) -> Option<&'a str> {
        self.remaining().first().map(String::as_str)
    }

    /// Whether every segment has been consumed.
    pub fn is_leaf(&self) -> bool {
        self.depth >= self.record.segments.len()
    }

    fn descend(self) -> Self {
        Self {
            record: self.record,
            depth: self.depth + 1,
        }
    }
}

/// A set of entries sharing the same tree position.
#[derive(Debug)]
pub struct PathIndex<'a, R> {
    entries: Vec<PathEntry<'a, R>>,
}

impl<R> Clone for PathIndex<'_, R> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<R> Default for PathIndex<'_, R> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<'a, R> PathIndex<'a, R> {
    /// Index over all records, with their full paths.
    pub fn new(records: &'a [FlatRecord<R>]) -> Self {
        Self {
            entries: records.iter().map(PathEntry::root).collect(),
        }
    }

    /// Index over the given entries.
    pub fn from_entries(entries: Vec<PathEntry<'a, R>>) -> Self {
        Self { entries }
    }

    /// Entries at this position, in source order.
    pub fn entries(&self) -> &[PathEntry<'a, R>] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entry is left.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries whose next segment is `name`, with that segment consumed.
    ///
    /// Entries with no segment left never match.
    pub fn select(&self, name: &str) -> Self {
        let entries = self
            .entries
            .iter()
            .filter(|entry| entry.next_segment() == Some(name))
            .map(|entry| entry.descend())
            .collect();

        Self { entries }
    }

    /// Groups the entries by their next segment, consuming it.
    ///
    /// Entries with no segment left are not part of any group.
    pub fn group_by_next(&self) -> BTreeMap<&'a str, Self> {
        let mut groups: BTreeMap<&'a str, Self> = BTreeMap::new();

        for entry in &self.entries {
            if let Some(segment) = entry.next_segment() {
                groups
                    .entry(segment)
                    .or_default()
                    .entries
                    .push(entry.descend());
            }
        }

        groups
    }

    /// Distinct next segments, sorted.
    pub fn next_segments(&self) -> Vec<&'a str> {
        let mut segments: Vec<&'a str> = self
            .entries
            .iter()
            .filter_map(PathEntry::next_segment)
            .collect();
        segments.sort_unstable();
        segments.dedup();
        segments
    }

    /// Entries with no segment left.
    pub fn leaves(&self) -> Vec<PathEntry<'a, R>> {
        self.entries
            .iter()
            .filter(|entry| entry.is_leaf())
            .copied()
            .collect()
    }

    /// Merge the entries of `other` into this index.
    pub fn extend(&mut self, other: Self) {
        self.entries.extend(other.entries);
    }
}
