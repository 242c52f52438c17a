use std::io::Read;
use std::sync::Mutex;

use ndarray::{ArrayD, IxDyn};

use crate::gate::{ReaderGate, StreamLock};
use crate::{DType, Error, TensorRecord};

/// Width in bytes of one `f32` element.
pub const F32_ELEMENT_SIZE: usize = 4;

/// Upper bound of the buffer reserved up front; larger tensors grow it as bytes arrive.
const INITIAL_READ_CAPACITY: u64 = 1 << 20;

/// A decoded `f32` tensor, axes in major-to-minor order.
#[derive(Debug, Clone, PartialEq)]
pub struct FloatArray {
    array: ArrayD<f32>,
}

impl FloatArray {
    /// Build an array from its axes (major-to-minor) and row-major values.
    pub fn from_shape_vec(axes: Vec<usize>, values: Vec<f32>) -> Option<Self> {
        ArrayD::from_shape_vec(IxDyn(&axes), values)
            .ok()
            .map(Self::from)
    }

    /// Axes, outermost first.
    pub fn shape(&self) -> &[usize] {
        self.array.shape()
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.array.len()
    }

    /// Whether the array holds no element.
    pub fn is_empty(&self) -> bool {
        self.array.is_empty()
    }

    /// Values in row-major order.
    pub fn to_vec(&self) -> Vec<f32> {
        self.array.iter().copied().collect()
    }

    /// Borrow the underlying array.
    pub fn array(&self) -> &ArrayD<f32> {
        &self.array
    }

    /// Take the underlying array.
    pub fn into_array(self) -> ArrayD<f32> {
        self.array
    }
}

impl From<ArrayD<f32>> for FloatArray {
    fn from(array: ArrayD<f32>) -> Self {
        Self { array }
    }
}

/// Turns one record into a [`FloatArray`], reading its bytes through a [`ReaderGate`].
#[derive(Debug)]
pub struct LeafMaterializer<'g, L = Mutex<()>> {
    gate: &'g ReaderGate<L>,
}

impl<L> Clone for LeafMaterializer<'_, L> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<L> Copy for LeafMaterializer<'_, L> {}

impl<'g, L: StreamLock> LeafMaterializer<'g, L> {
    /// Create a materializer reading through `gate`.
    pub fn new(gate: &'g ReaderGate<L>) -> Self {
        Self { gate }
    }

    /// Read and decode the record.
    ///
    /// The declared dimensions are validated against the declared byte size before the
    /// stream is opened, so a record that is both mis-sized and truncated reports
    /// [`Error::SizeMismatch`] and never touches the stream. Dimensions are stored
    /// minor-to-major and returned major-to-minor.
    pub fn materialize<R>(&self, record: &R) -> Result<FloatArray, Error>
    where
        R: TensorRecord + ?Sized,
    {
        let name = record.name();
        let dtype = record.dtype();
        if dtype != DType::F32 {
            return Err(Error::UnsupportedDType {
                name: name.to_string(),
                dtype,
            });
        }

        let byte_size = record.byte_size();
        let axes = reversed_axes(record.dimensions());
        let elements = element_count(&axes);

        let matches = elements
            .and_then(|count| count.checked_mul(F32_ELEMENT_SIZE))
            .is_some_and(|bytes| bytes as u64 == byte_size);
        if !matches {
            return Err(Error::SizeMismatch {
                name: name.to_string(),
                axes,
                elements: elements.unwrap_or(usize::MAX),
                byte_size,
                element_size: F32_ELEMENT_SIZE,
                buffer_elements: byte_size / F32_ELEMENT_SIZE as u64,
            });
        }

        let bytes = self.read(record)?;
        let values: Vec<f32> = bytemuck::pod_collect_to_vec(&bytes);

        log::trace!(
            "Materialized tensor '{}' with axes {:?} ({} bytes)",
            name,
            axes,
            byte_size
        );

        let array = ArrayD::from_shape_vec(IxDyn(&axes), values)
            .map_err(|err| Error::Source(format!("tensor '{name}': {err}")))?;

        Ok(FloatArray::from(array))
    }

    fn read<R>(&self, record: &R) -> Result<Vec<u8>, Error>
    where
        R: TensorRecord + ?Sized,
    {
        let expected = record.byte_size();
        // The declared size is untrusted until the bytes are actually there.
        let capacity = expected.min(INITIAL_READ_CAPACITY) as usize;
        let mut bytes = Vec::with_capacity(capacity);

        let mut stream = self.gate.open_exclusive(record)?;
        let read = stream.by_ref().take(expected).read_to_end(&mut bytes);
        stream.close();
        read?;

        let actual = bytes.len() as u64;
        if actual < expected {
            return Err(Error::ShortRead {
                name: record.name().to_string(),
                expected,
                actual,
            });
        }

        Ok(bytes)
    }
}

/// Converts minor-to-major dimensions into major-to-minor axes.
fn reversed_axes(dimensions: &[u64]) -> Vec<usize> {
    dimensions
        .iter()
        .rev()
        .map(|&dim| usize::try_from(dim).unwrap_or(usize::MAX))
        .collect()
}

fn element_count(axes: &[usize]) -> Option<usize> {
    axes.iter()
        .try_fold(1usize, |count, &axis| count.checked_mul(axis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryRecord;
    use rstest::rstest;

    fn materialize(record: &MemoryRecord) -> Result<FloatArray, Error> {
        let gate = ReaderGate::new();
        LeafMaterializer::new(&gate).materialize(record)
    }

    #[test]
    fn axes_are_reversed() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let record = MemoryRecord::from_f32("w", vec![3, 2], &values);

        let array = materialize(&record).unwrap();

        assert_eq!(array.shape(), &[2, 3]);
        assert_eq!(array.to_vec(), values.to_vec());
        assert_eq!(array.array()[IxDyn(&[1, 0])], 4.0);
    }

    #[test]
    fn scalar_has_no_axes() {
        let record = MemoryRecord::from_f32("s", vec![], &[7.5]);

        let array = materialize(&record).unwrap();

        assert_eq!(array.shape(), &[] as &[usize]);
        assert_eq!(array.to_vec(), vec![7.5]);
    }

    #[test]
    fn size_mismatch_reports_both_counts() {
        let record = MemoryRecord::from_bytes("w", vec![3, 2], vec![0u8; 20]);

        match materialize(&record) {
            Err(Error::SizeMismatch {
                axes,
                elements,
                byte_size,
                element_size,
                buffer_elements,
                ..
            }) => {
                assert_eq!(axes, vec![2, 3]);
                assert_eq!(elements, 6);
                assert_eq!(byte_size, 20);
                assert_eq!(element_size, 4);
                assert_eq!(buffer_elements, 5);
            }
            other => panic!("expected a size mismatch, got {other:?}"),
        }
    }

    #[rstest]
    #[case::trailing_bytes(vec![2], 10)]
    #[case::too_large(vec![2, 2], 8)]
    #[case::overflow(vec![u64::MAX, 2], 8)]
    fn size_check_is_byte_exact(#[case] dimensions: Vec<u64>, #[case] bytes: usize) {
        let record = MemoryRecord::from_bytes("w", dimensions, vec![0u8; bytes]);

        assert!(matches!(
            materialize(&record),
            Err(Error::SizeMismatch { .. })
        ));
    }

    #[test]
    fn short_stream_is_reported() {
        // Declares three elements but only stores two.
        let record = MemoryRecord::from_f32("w", vec![3], &[1.0, 2.0]).with_byte_size(12);

        let gate = ReaderGate::new();
        let result = LeafMaterializer::new(&gate).materialize(&record);

        match result {
            Err(Error::ShortRead {
                expected, actual, ..
            }) => {
                assert_eq!(expected, 12);
                assert_eq!(actual, 8);
            }
            other => panic!("expected a short read, got {other:?}"),
        }
        assert!(gate.lock().try_lock().is_ok());
    }

    #[test]
    fn huge_declared_size_over_small_buffer_is_a_short_read() {
        let elements = 1u64 << 42;
        let record = MemoryRecord::from_f32("w", vec![elements], &[1.0, 2.0, 3.0, 4.0])
            .with_byte_size(elements * 4);

        match materialize(&record) {
            Err(Error::ShortRead {
                expected, actual, ..
            }) => {
                assert_eq!(expected, 1 << 44);
                assert_eq!(actual, 16);
            }
            other => panic!("expected a short read, got {other:?}"),
        }
    }

    #[test]
    fn size_is_checked_before_reading() {
        // Mis-sized and truncated at once: the stream is never opened.
        let record = MemoryRecord::from_f32("w", vec![3], &[1.0]).with_byte_size(10);

        assert!(matches!(
            materialize(&record),
            Err(Error::SizeMismatch {
                elements: 3,
                byte_size: 10,
                ..
            })
        ));
    }

    #[test]
    fn non_f32_records_are_rejected() {
        let record = MemoryRecord::from_bytes("w", vec![2], vec![0u8; 4]).with_dtype(DType::F16);

        assert!(matches!(
            materialize(&record),
            Err(Error::UnsupportedDType {
                dtype: DType::F16,
                ..
            })
        ));
    }
}
