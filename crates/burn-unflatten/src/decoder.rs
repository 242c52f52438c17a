use std::sync::Mutex;

use serde::de::DeserializeOwned;

use crate::de::Deserializer;
use crate::gate::{ReaderGate, StreamLock};
use crate::materialize::LeafMaterializer;
use crate::path::{FlatRecord, PathIndex};
use crate::remap::KeyRemapper;
use crate::view::StructuredView;
use crate::{Error, TensorRecord, TensorSource};

/// Decodes a [`TensorSource`] into any `Deserialize` type.
///
/// # Examples
///
/// ```
/// use burn_unflatten::{Decoder, FloatArray, KeyRemapper, MemoryRecord};
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct Layer {
///     weight: FloatArray,
/// }
///
/// #[derive(Deserialize)]
/// struct Model {
///     layers: Vec<Layer>,
/// }
///
/// let source = vec![
///     MemoryRecord::from_f32("blk.0.weight", vec![2], &[1.0, 2.0]),
///     MemoryRecord::from_f32("blk.1.weight", vec![2], &[3.0, 4.0]),
/// ];
///
/// let remapper = KeyRemapper::new().add_pattern(r"^blk\.", "layers.")?;
/// let model: Model = Decoder::new().with_remapper(remapper).decode(&source)?;
///
/// assert_eq!(model.layers.len(), 2);
/// assert_eq!(model.layers[1].weight.to_vec(), vec![3.0, 4.0]);
/// # Ok::<(), burn_unflatten::Error>(())
/// ```
#[derive(Debug, Default)]
pub struct Decoder<L = Mutex<()>> {
    gate: ReaderGate<L>,
    remapper: KeyRemapper,
    allow_missing_fields: bool,
}

impl Decoder {
    /// Create a decoder with a mutex backed gate, no remapping and strict fields.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<L: StreamLock> Decoder<L> {
    /// Read tensors through `gate` instead of the default one.
    pub fn with_gate<M: StreamLock>(self, gate: ReaderGate<M>) -> Decoder<M> {
        Decoder {
            gate,
            remapper: self.remapper,
            allow_missing_fields: self.allow_missing_fields,
        }
    }

    /// Rewrite record names before building the tree.
    pub fn with_remapper(mut self, remapper: KeyRemapper) -> Self {
        self.remapper = remapper;
        self
    }

    /// Let struct fields without matching records fall back to their serde default.
    pub fn allow_missing_fields(mut self, allow: bool) -> Self {
        self.allow_missing_fields = allow;
        self
    }

    /// The gate serializing tensor reads.
    pub fn gate(&self) -> &ReaderGate<L> {
        &self.gate
    }

    /// Enumerate the source and split every (remapped) name into path segments.
    pub fn flatten<S>(&self, source: &S) -> Result<Vec<FlatRecord<S::Record>>, Error>
    where
        S: TensorSource + ?Sized,
    {
        let records = source.records()?;

        Ok(records
            .into_iter()
            .map(|record| {
                if self.remapper.is_empty() {
                    return FlatRecord::new(record);
                }

                let name = self.remapper.remap(record.name()).into_owned();
                if name != record.name() {
                    log::debug!("Remapped tensor '{}' to '{}'", record.name(), name);
                }
                FlatRecord::with_name(record, &name)
            })
            .collect())
    }

    /// Root view over flattened records, reading leaves through this decoder's gate.
    pub fn root<'a, R: TensorRecord>(
        &'a self,
        records: &'a [FlatRecord<R>],
    ) -> StructuredView<'a, R, L> {
        StructuredView::new(PathIndex::new(records), LeafMaterializer::new(&self.gate))
    }

    /// Decode the whole source into `T`.
    ///
    /// Only the leaves `T` asks for are read. The first failure aborts the decode.
    pub fn decode<T, S>(&self, source: &S) -> Result<T, Error>
    where
        T: DeserializeOwned,
        S: TensorSource + ?Sized,
    {
        let records = self.flatten(source)?;
        log::debug!("Decoding {} tensor records", records.len());

        let root = self.root(&records);
        T::deserialize(Deserializer::new(root, self.allow_missing_fields))
    }
}

/// Decode `source` into `T` with the default [`Decoder`].
pub fn decode<T, S>(source: &S) -> Result<T, Error>
where
    T: DeserializeOwned,
    S: TensorSource + ?Sized,
{
    Decoder::new().decode(source)
}
