//! Lazy, navigable views over a flat set of tensor records.
//!
//! A [`StructuredView`] is a set of records sharing a tree position. The same view can be
//! read as a struct ([`StructuredView::field`]), as a sequence
//! ([`StructuredView::to_sequence`]) or as a leaf ([`StructuredView::materialize`]). Each
//! operation is checked independently; [`StructuredView::classify`] reports which of them
//! can succeed without trying them.
//!
//! Navigation never touches tensor data. Bytes are only read by `materialize`.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::gate::StreamLock;
use crate::materialize::{FloatArray, LeafMaterializer};
use crate::path::PathIndex;
use crate::{Error, TensorRecord};

/// Which operations a view supports, given its current entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ViewShape {
    /// A single record ends here and nothing continues, `materialize` succeeds up to I/O
    /// and size checks.
    pub leaf: bool,
    /// Every record continues with a numeric segment, `to_sequence` succeeds.
    pub sequence: bool,
    /// At least one record continues, some `field` lookup succeeds.
    pub structure: bool,
}

/// A position in the tree reconstructed from dotted record names.
#[derive(Debug)]
pub struct StructuredView<'a, R, L = Mutex<()>> {
    index: PathIndex<'a, R>,
    path: String,
    materializer: LeafMaterializer<'a, L>,
}

impl<R, L> Clone for StructuredView<'_, R, L> {
    fn clone(&self) -> Self {
        Self {
            index: self.index.clone(),
            path: self.path.clone(),
            materializer: self.materializer,
        }
    }
}

impl<'a, R: TensorRecord, L: StreamLock> StructuredView<'a, R, L> {
    /// Root view over `index`.
    pub fn new(index: PathIndex<'a, R>, materializer: LeafMaterializer<'a, L>) -> Self {
        Self {
            index,
            path: String::new(),
            materializer,
        }
    }

    fn child(&self, index: PathIndex<'a, R>, segment: &str) -> Self {
        let path = if self.path.is_empty() {
            segment.to_string()
        } else {
            format!("{}.{}", self.path, segment)
        };

        Self {
            index,
            path,
            materializer: self.materializer,
        }
    }

    /// Dotted path consumed to reach this view, empty at the root.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Entries at this position.
    pub fn index(&self) -> &PathIndex<'a, R> {
        &self.index
    }

    /// Number of records under this position.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether no record is left.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Distinct names that [`field`](Self::field) accepts here.
    pub fn field_names(&self) -> Vec<&'a str> {
        self.index.next_segments()
    }

    /// Select the struct field `name`.
    pub fn field(&self, name: &str) -> Result<Self, Error> {
        log::trace!("Selecting field '{}' under '{}'", name, self.path);

        let index = self.index.select(name);
        if index.is_empty() {
            return Err(Error::NoSuchField {
                path: self.path.clone(),
                name: name.to_string(),
                available: self
                    .field_names()
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
            });
        }

        Ok(self.child(index, name))
    }

    /// Follow a dotted path, one field at a time.
    pub fn at_path(&self, path: &str) -> Result<Self, Error> {
        path.split(crate::path::PATH_SEPARATOR)
            .try_fold(self.clone(), |view, name| view.field(name))
    }

    /// Read this position as a sequence indexed by base-10 segments.
    pub fn to_sequence(&self) -> Result<SequenceView<'a, R, L>, Error> {
        if let Some(entry) = self.index.leaves().first() {
            return Err(Error::MalformedIndex {
                path: self.path.clone(),
                segment: None,
                reason: format!("element '{}' has no value", entry.flat().path()),
            });
        }

        let mut elements: BTreeMap<usize, PathIndex<'a, R>> = BTreeMap::new();
        for (segment, group) in self.index.group_by_next() {
            let position = segment
                .parse::<usize>()
                .map_err(|err| Error::MalformedIndex {
                    path: self.path.clone(),
                    segment: Some(segment.to_string()),
                    reason: err.to_string(),
                })?;
            elements.entry(position).or_default().extend(group);
        }

        Ok(SequenceView {
            elements,
            parent: self.clone(),
        })
    }

    /// Decode the single record at this position.
    ///
    /// The view must hold exactly one entry, with no segment left. Records continuing below
    /// this position make it ambiguous even when one of them ends here.
    pub fn materialize(&self) -> Result<FloatArray, Error> {
        let entries = self.index.entries();

        match entries {
            [entry] if entry.is_leaf() => self.materializer.materialize(entry.record()),
            _ if !entries.iter().any(|entry| entry.is_leaf()) => Err(Error::EmptyLeaf {
                path: self.path.clone(),
            }),
            _ => Err(Error::AmbiguousLeaf {
                path: self.path.clone(),
                names: entries
                    .iter()
                    .map(|entry| entry.record().name().to_string())
                    .collect(),
            }),
        }
    }

    /// Report which operations can succeed on this view.
    pub fn classify(&self) -> ViewShape {
        let entries = self.index.entries();

        ViewShape {
            leaf: matches!(entries, [entry] if entry.is_leaf()),
            sequence: !entries.is_empty()
                && entries.iter().all(|entry| {
                    entry
                        .next_segment()
                        .is_some_and(|segment| segment.parse::<usize>().is_ok())
                }),
            structure: entries.iter().any(|entry| !entry.is_leaf()),
        }
    }
}

/// A view read as a sequence.
///
/// The length is the number of distinct indices present. Indices are not required to be
/// contiguous; [`SequenceView::is_contiguous`] tells whether they are.
#[derive(Debug)]
pub struct SequenceView<'a, R, L = Mutex<()>> {
    elements: BTreeMap<usize, PathIndex<'a, R>>,
    parent: StructuredView<'a, R, L>,
}

impl<'a, R: TensorRecord, L: StreamLock> SequenceView<'a, R, L> {
    /// Number of distinct indices.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Whether the sequence has no element.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Indices present, in increasing order.
    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.elements.keys().copied()
    }

    /// Whether the indices are exactly `0..len`.
    pub fn is_contiguous(&self) -> bool {
        self.indices()
            .enumerate()
            .all(|(position, index)| position == index)
    }

    /// The element at `index`.
    pub fn element_at(&self, index: usize) -> Result<StructuredView<'a, R, L>, Error> {
        let group = self
            .elements
            .get(&index)
            .ok_or_else(|| Error::NoSuchIndex {
                path: self.parent.path.clone(),
                index,
                len: self.len(),
            })?;

        Ok(self.parent.child(group.clone(), &index.to_string()))
    }
}
