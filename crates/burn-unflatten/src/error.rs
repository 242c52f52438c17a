use crate::source::DType;

/// Errors produced while navigating or materializing a flat tensor set.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A struct field lookup matched no record.
    #[error("no field named {name:?} under {path:?} (available: {available:?})")]
    NoSuchField {
        /// Dotted path consumed so far.
        path: String,
        /// Requested field name.
        name: String,
        /// Distinct next segments present at this position.
        available: Vec<String>,
    },

    /// A segment could not be used as a sequence index.
    #[error("cannot build sequence under {path:?} from segment {segment:?}: {reason}")]
    MalformedIndex {
        /// Dotted path consumed so far.
        path: String,
        /// Offending segment, `None` when an element has no segment left.
        segment: Option<String>,
        /// Why the segment was rejected.
        reason: String,
    },

    /// A sequence has no element at the requested index.
    #[error("no element at index {index} under {path:?} (length {len})")]
    NoSuchIndex {
        /// Dotted path consumed so far.
        path: String,
        /// Requested index.
        index: usize,
        /// Number of distinct indices present.
        len: usize,
    },

    /// No record is left to materialize.
    #[error("empty leaf at {path:?}")]
    EmptyLeaf {
        /// Dotted path consumed so far.
        path: String,
    },

    /// A leaf was requested where several records share the position.
    #[error("not a leaf at {path:?}: {} records share this position ({names:?})", .names.len())]
    AmbiguousLeaf {
        /// Dotted path consumed so far.
        path: String,
        /// Names of the competing records.
        names: Vec<String>,
    },

    /// The stream ended before the declared byte size was read.
    #[error("not enough bytes read for tensor {name:?}: got {actual} but want {expected}")]
    ShortRead {
        /// Record name.
        name: String,
        /// Declared byte size.
        expected: u64,
        /// Bytes actually read.
        actual: u64,
    },

    /// The declared dimensions disagree with the declared byte size.
    #[error(
        "mismatch for tensor {name:?} between the axes ({axes:?}={elements} elements) and the size of the buffer ({byte_size}/{element_size}={buffer_elements} elements)"
    )]
    SizeMismatch {
        /// Record name.
        name: String,
        /// Axes in major-to-minor order.
        axes: Vec<usize>,
        /// Element count implied by the axes.
        elements: usize,
        /// Declared byte size.
        byte_size: u64,
        /// Width of one element in bytes.
        element_size: usize,
        /// Element count implied by the byte size.
        buffer_elements: u64,
    },

    /// The record stores elements this crate cannot decode.
    #[error("unsupported element type {dtype} for tensor {name:?}, only f32 is supported")]
    UnsupportedDType {
        /// Record name.
        name: String,
        /// Stored element type.
        dtype: DType,
    },

    /// A key remapping pattern failed to compile.
    #[error("invalid key remapping pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// I/O error from the underlying stream.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The tensor source failed to enumerate its records.
    #[error("tensor source error: {0}")]
    Source(String),

    /// Error raised by the destination type while deserializing.
    #[error("serde error: {0}")]
    Serde(String),
}

impl serde::de::Error for Error {
    fn custom<T: core::fmt::Display>(msg: T) -> Self {
        Error::Serde(msg.to_string())
    }
}
