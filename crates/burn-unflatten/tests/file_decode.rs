use std::io::Write;

use burn_unflatten::{
    DType, Decoder, Error, FileSource, FloatArray, KeyRemapper, TensorEntry, decode,
};
use serde::Deserialize;
use tempfile::NamedTempFile;

#[derive(Debug, Deserialize)]
struct Linear {
    weight: FloatArray,
    bias: FloatArray,
}

#[derive(Debug, Deserialize)]
struct Block {
    attn_q: Linear,
    ffn_norm: FloatArray,
}

#[derive(Debug, Deserialize)]
struct Model {
    token_embd: FloatArray,
    layers: Vec<Block>,
}

/// Writes the tensors one after another and returns their index.
fn write_file(tensors: &[(&str, Vec<u64>, Vec<f32>)]) -> (NamedTempFile, Vec<TensorEntry>) {
    let mut file = NamedTempFile::new().unwrap();
    let mut entries = Vec::new();
    let mut offset = 0;

    for (name, dimensions, values) in tensors {
        let bytes = bytemuck::cast_slice::<f32, u8>(values);
        file.write_all(bytes).unwrap();
        entries.push(TensorEntry::new(
            name.to_string(),
            offset,
            bytes.len() as u64,
            dimensions.clone(),
            DType::F32,
        ));
        offset += bytes.len() as u64;
    }
    file.flush().unwrap();

    (file, entries)
}

fn model_file() -> (NamedTempFile, Vec<TensorEntry>) {
    write_file(&[
        ("token_embd", vec![3, 2], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]),
        ("blk.0.attn_q.weight", vec![2, 2], vec![0.5, 0.0, 0.0, 0.5]),
        ("blk.0.attn_q.bias", vec![2], vec![0.1, 0.2]),
        ("blk.0.ffn_norm", vec![2], vec![1.0, 1.0]),
        ("blk.1.attn_q.weight", vec![2, 2], vec![1.5, 0.0, 0.0, 1.5]),
        ("blk.1.attn_q.bias", vec![2], vec![0.3, 0.4]),
        ("blk.1.ffn_norm", vec![2], vec![2.0, 2.0]),
        ("output_norm", vec![2], vec![9.0, 9.0]),
    ])
}

#[test]
fn decode_model_from_file() {
    let (file, entries) = model_file();
    let source = FileSource::open(file.path(), entries).unwrap();
    let remapper = KeyRemapper::new().add_pattern(r"^blk\.", "layers.").unwrap();

    let model: Model = Decoder::new()
        .with_remapper(remapper)
        .decode(&source)
        .unwrap();

    assert_eq!(model.token_embd.shape(), &[2, 3]);
    assert_eq!(model.token_embd.to_vec(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    assert_eq!(model.layers.len(), 2);
    assert_eq!(model.layers[0].attn_q.bias.to_vec(), vec![0.1, 0.2]);
    assert_eq!(
        model.layers[1].attn_q.weight.to_vec(),
        vec![1.5, 0.0, 0.0, 1.5]
    );
    assert_eq!(model.layers[1].ffn_norm.to_vec(), vec![2.0, 2.0]);
}

#[test]
fn names_must_match_without_remapping() {
    let (file, entries) = model_file();
    let source = FileSource::open(file.path(), entries).unwrap();

    let result: Result<Model, _> = decode(&source);

    match result {
        Err(Error::NoSuchField {
            name, available, ..
        }) => {
            assert_eq!(name, "layers");
            assert!(available.contains(&"blk".to_string()));
        }
        other => panic!("expected a missing field, got {other:?}"),
    }
}

#[test]
fn unreferenced_entries_are_not_read() {
    #[derive(Debug, Deserialize)]
    struct Embedding {
        token_embd: FloatArray,
    }

    let (file, mut entries) = model_file();
    // Points past the end of the file, reading it would fail.
    entries.push(TensorEntry::new(
        "rope_freqs".to_string(),
        1 << 20,
        16,
        vec![4],
        DType::F32,
    ));
    let source = FileSource::open(file.path(), entries).unwrap();

    let decoded: Embedding = decode(&source).unwrap();
    assert_eq!(decoded.token_embd.len(), 6);
}

#[test]
fn truncated_tensor_is_a_short_read() {
    #[derive(Debug, Deserialize)]
    #[allow(dead_code)]
    struct Freqs {
        rope_freqs: FloatArray,
    }

    let (file, mut entries) = write_file(&[("rope_freqs", vec![2], vec![1.0, 2.0])]);
    entries[0].byte_size = 16;
    entries[0].dimensions = vec![4];
    let source = FileSource::open(file.path(), entries).unwrap();

    let result: Result<Freqs, _> = decode(&source);

    assert!(matches!(
        result,
        Err(Error::ShortRead {
            expected: 16,
            actual: 8,
            ..
        })
    ));
}

#[test]
fn oversized_declared_tensor_is_a_short_read() {
    #[derive(Debug, Deserialize)]
    #[allow(dead_code)]
    struct Single {
        weight: FloatArray,
    }

    let (file, mut entries) = write_file(&[("weight", vec![4], vec![1.0, 2.0, 3.0, 4.0])]);
    entries[0].dimensions = vec![1 << 42];
    entries[0].byte_size = 1 << 44;
    let source = FileSource::open(file.path(), entries).unwrap();

    let result: Result<Single, _> = decode(&source);

    assert!(matches!(
        result,
        Err(Error::ShortRead {
            expected: 17_592_186_044_416,
            actual: 16,
            ..
        })
    ));
}

#[test]
fn non_f32_tensor_is_rejected() {
    #[derive(Debug, Deserialize)]
    #[allow(dead_code)]
    struct Quantized {
        weight: FloatArray,
    }

    let (file, mut entries) = write_file(&[("weight", vec![2], vec![1.0, 2.0])]);
    entries[0].dtype = DType::Other(12);
    let source = FileSource::open(file.path(), entries).unwrap();

    let result: Result<Quantized, _> = decode(&source);

    match result {
        Err(err @ Error::UnsupportedDType { .. }) => {
            assert!(err.to_string().contains("type#12"));
        }
        other => panic!("expected an unsupported dtype, got {other:?}"),
    }
}
