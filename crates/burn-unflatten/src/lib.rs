#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Lazily decode flat, dotted tensor records into nested structures.
//!
//! Tensor containers usually store weights as a flat list of named records such as
//! `layers.3.attention.weight`. This crate rebuilds the hierarchy encoded in those names and
//! fills any `serde::Deserialize` type from it:
//!
//! - [`path`] groups records by their next unconsumed path segment;
//! - [`StructuredView`] navigates the tree as a struct, a sequence or a leaf;
//! - [`LeafMaterializer`] reads one record and decodes it into a [`FloatArray`];
//! - [`ReaderGate`] guarantees that only one tensor stream is open at a time;
//! - [`Decoder`] ties everything to serde.
//!
//! Tensor bytes are only read for the leaves the destination type asks for.

#[macro_use]
extern crate derive_new;

mod de;
mod decoder;
mod error;
mod gate;
mod materialize;
pub mod path;
mod remap;
mod source;
mod view;

pub use de::Deserializer;
pub use decoder::{Decoder, decode};
pub use error::Error;
pub use gate::{GatedStream, ReaderGate, StreamLock};
pub use materialize::{F32_ELEMENT_SIZE, FloatArray, LeafMaterializer};
pub use path::{FlatRecord, PathEntry, PathIndex};
pub use remap::KeyRemapper;
pub use source::{
    DType, FileRecord, FileSource, MemoryRecord, TensorEntry, TensorRecord, TensorSource,
};
pub use view::{SequenceView, StructuredView, ViewShape};

#[cfg(test)]
mod tests;
