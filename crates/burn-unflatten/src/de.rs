//! Serde integration: any `Deserialize` type can be filled from a [`StructuredView`].
//!
//! Structs look up their declared fields, sequences and tuples walk indices `0..len`, maps
//! enumerate the next path segments, and [`FloatArray`] leaves trigger the only read of
//! tensor bytes. Fields the destination type does not declare are never materialized.

use core::fmt;

use serde::de::value::{SeqDeserializer, StrDeserializer};
use serde::de::{self, DeserializeSeed, IntoDeserializer, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer as _, Serialize, forward_to_deserialize_any};

use crate::gate::StreamLock;
use crate::materialize::FloatArray;
use crate::view::{SequenceView, StructuredView};
use crate::{Error, TensorRecord};

/// Newtype name [`FloatArray`] uses to ask for a leaf.
pub(crate) const FLOAT_ARRAY_TOKEN: &str = "$burn_unflatten::FloatArray";

/// A serde deserializer over a [`StructuredView`].
pub struct Deserializer<'a, R, L> {
    view: StructuredView<'a, R, L>,
    allow_missing_fields: bool,
}

impl<'a, R: TensorRecord, L: StreamLock> Deserializer<'a, R, L> {
    /// Create a deserializer.
    ///
    /// When `allow_missing_fields` is true, struct fields without any matching record are
    /// left to the destination type (`Option` becomes `None`, `#[serde(default)]` applies).
    /// Otherwise the lookup error is returned.
    pub fn new(view: StructuredView<'a, R, L>, allow_missing_fields: bool) -> Self {
        Self {
            view,
            allow_missing_fields,
        }
    }

    fn nested(&self, view: StructuredView<'a, R, L>) -> Self {
        Self::new(view, self.allow_missing_fields)
    }
}

impl<'de, R: TensorRecord, L: StreamLock> de::Deserializer<'de> for Deserializer<'_, R, L> {
    type Error = Error;

    fn deserialize_any<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        let shape = self.view.classify();

        if shape.structure {
            if shape.sequence {
                self.deserialize_seq(visitor)
            } else {
                self.deserialize_map(visitor)
            }
        } else {
            // Surfaces empty or ambiguous leaves as errors.
            let array = self.view.materialize()?;
            ArrayDeserializer::new(array).deserialize_any(visitor)
        }
    }

    fn deserialize_struct<V>(
        self,
        _name: &'static str,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        visitor.visit_map(FieldAccess {
            keys: fields.iter().copied().collect::<Vec<_>>().into_iter(),
            pending: None,
            strict: !self.allow_missing_fields,
            de: self,
        })
    }

    fn deserialize_map<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        visitor.visit_map(FieldAccess {
            keys: self.view.field_names().into_iter(),
            pending: None,
            strict: true,
            de: self,
        })
    }

    fn deserialize_seq<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        let sequence = self.view.to_sequence()?;

        visitor.visit_seq(ElementAccess {
            sequence,
            position: 0,
            de: &self,
        })
    }

    fn deserialize_tuple<V>(self, _len: usize, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        self.deserialize_seq(visitor)
    }

    fn deserialize_tuple_struct<V>(
        self,
        _name: &'static str,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        self.deserialize_seq(visitor)
    }

    fn deserialize_newtype_struct<V>(
        self,
        name: &'static str,
        visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        if name == FLOAT_ARRAY_TOKEN {
            let array = self.view.materialize()?;
            visitor.visit_newtype_struct(ArrayDeserializer::new(array))
        } else {
            visitor.visit_newtype_struct(self)
        }
    }

    fn deserialize_option<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        visitor.visit_some(self)
    }

    fn deserialize_ignored_any<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        visitor.visit_unit()
    }

    forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf unit unit_struct enum identifier
    }
}

/// Map access over struct fields or over the distinct next segments.
struct FieldAccess<'a, R, L> {
    keys: std::vec::IntoIter<&'a str>,
    pending: Option<StructuredView<'a, R, L>>,
    strict: bool,
    de: Deserializer<'a, R, L>,
}

impl<'de, R: TensorRecord, L: StreamLock> MapAccess<'de> for FieldAccess<'_, R, L> {
    type Error = Error;

    fn next_key_seed<K>(&mut self, seed: K) -> Result<Option<K::Value>, Self::Error>
    where
        K: DeserializeSeed<'de>,
    {
        for key in self.keys.by_ref() {
            match self.de.view.field(key) {
                Ok(view) => {
                    self.pending = Some(view);
                    let key: StrDeserializer<'_, Error> = key.into_deserializer();
                    return seed.deserialize(key).map(Some);
                }
                Err(Error::NoSuchField { .. }) if !self.strict => {
                    log::debug!(
                        "Field '{}' not found under '{}', leaving it to its default",
                        key,
                        self.de.view.path()
                    );
                }
                Err(err) => return Err(err),
            }
        }

        Ok(None)
    }

    fn next_value_seed<V>(&mut self, seed: V) -> Result<V::Value, Self::Error>
    where
        V: DeserializeSeed<'de>,
    {
        let view = self
            .pending
            .take()
            .ok_or_else(|| Error::Serde("map value requested before its key".to_string()))?;

        seed.deserialize(self.de.nested(view))
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.keys.len())
    }
}

/// Sequence access walking indices `0..len`.
struct ElementAccess<'s, 'a, R, L> {
    sequence: SequenceView<'a, R, L>,
    position: usize,
    de: &'s Deserializer<'a, R, L>,
}

impl<'de, R: TensorRecord, L: StreamLock> SeqAccess<'de> for ElementAccess<'_, '_, R, L> {
    type Error = Error;

    fn next_element_seed<T>(&mut self, seed: T) -> Result<Option<T::Value>, Self::Error>
    where
        T: DeserializeSeed<'de>,
    {
        if self.position >= self.sequence.len() {
            return Ok(None);
        }

        // A gap in the indices fails here with `NoSuchIndex`.
        let view = self.sequence.element_at(self.position)?;
        self.position += 1;

        seed.deserialize(self.de.nested(view)).map(Some)
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.sequence.len() - self.position)
    }
}

/// Presents a decoded array as the pair `(shape, values)`.
struct ArrayDeserializer {
    shape: Option<Vec<usize>>,
    values: Option<Vec<f32>>,
}

impl ArrayDeserializer {
    fn new(array: FloatArray) -> Self {
        let shape = array.shape().to_vec();
        let values = array.into_array().into_iter().collect();

        Self {
            shape: Some(shape),
            values: Some(values),
        }
    }
}

impl<'de> de::Deserializer<'de> for ArrayDeserializer {
    type Error = Error;

    fn deserialize_any<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        visitor.visit_seq(self)
    }

    forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf option unit unit_struct newtype_struct seq tuple
        tuple_struct map struct enum identifier ignored_any
    }
}

impl<'de> SeqAccess<'de> for ArrayDeserializer {
    type Error = Error;

    fn next_element_seed<T>(&mut self, seed: T) -> Result<Option<T::Value>, Self::Error>
    where
        T: DeserializeSeed<'de>,
    {
        if let Some(shape) = self.shape.take() {
            let shape: SeqDeserializer<_, Error> = SeqDeserializer::new(shape.into_iter());
            return seed.deserialize(shape).map(Some);
        }

        if let Some(values) = self.values.take() {
            let values: SeqDeserializer<_, Error> = SeqDeserializer::new(values.into_iter());
            return seed.deserialize(values).map(Some);
        }

        Ok(None)
    }

    fn size_hint(&self) -> Option<usize> {
        Some(usize::from(self.shape.is_some()) + usize::from(self.values.is_some()))
    }
}

impl<'de> Deserialize<'de> for FloatArray {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        deserializer.deserialize_newtype_struct(FLOAT_ARRAY_TOKEN, FloatArrayVisitor)
    }
}

impl Serialize for FloatArray {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_newtype_struct(FLOAT_ARRAY_TOKEN, &(self.shape(), self.to_vec()))
    }
}

struct FloatArrayVisitor;

impl<'de> Visitor<'de> for FloatArrayVisitor {
    type Value = FloatArray;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a tensor as (shape, values)")
    }

    fn visit_newtype_struct<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        deserializer.deserialize_tuple(2, self)
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let shape: Vec<usize> = seq
            .next_element()?
            .ok_or_else(|| de::Error::invalid_length(0, &self))?;
        let values: Vec<f32> = seq
            .next_element()?
            .ok_or_else(|| de::Error::invalid_length(1, &self))?;
        let len = values.len();

        FloatArray::from_shape_vec(shape, values).ok_or_else(|| {
            de::Error::custom(format!("{len} values do not fit the declared shape"))
        })
    }
}
