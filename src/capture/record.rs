//! Capture records: one full snapshot of a node's observed tensors.
//!
//! A record stores complete input/output tensors with no truncation. The
//! JSON-facing projection ([`StreamRecord`]) renders tensors as nested
//! numeric arrays for the live stream and clipboard export.

use candle_core::{DType, Device, Tensor};
use serde::Serialize;

use crate::error::Result;

/// Summary statistics over an entire flattened tensor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TensorStats {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

/// Full snapshot of one node's observed input/output for one run.
///
/// Immutable once stored in the cache; `stats` is always derived from
/// `output_value` at the moment of capture.
#[derive(Debug, Clone)]
pub struct CaptureRecord {
    /// Stable identifier, unique within a run; the node's structural name
    /// with unsafe characters normalized.
    pub id: String,
    /// Original human-readable name (may contain structural separators).
    pub display_name: String,
    /// Operation/module type tag.
    pub kind: String,
    pub param_count: usize,
    pub trainable_param_count: usize,
    /// First captured input tensor; empty when not capturable.
    pub input_value: Tensor,
    /// First captured output tensor.
    pub output_value: Tensor,
    pub input_shape: Vec<usize>,
    pub output_shape: Vec<usize>,
    pub stats: TensorStats,
}

impl CaptureRecord {
    /// Build the JSON-serializable projection streamed to viewers.
    pub fn to_stream_record(&self) -> Result<StreamRecord> {
        Ok(StreamRecord {
            layer_id: self.id.clone(),
            name: self.display_name.clone(),
            kind: self.kind.clone(),
            param_count: self.param_count,
            trainable_params: self.trainable_param_count,
            input_tensor: tensor_to_json(&self.input_value)?,
            output_tensor: tensor_to_json(&self.output_value)?,
            input_shape: self.input_shape.clone(),
            output_shape: self.output_shape.clone(),
            stats: self.stats,
        })
    }
}

/// Wire projection of a [`CaptureRecord`], tensors as nested arrays.
#[derive(Debug, Clone, Serialize)]
pub struct StreamRecord {
    pub layer_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub param_count: usize,
    pub trainable_params: usize,
    pub input_tensor: serde_json::Value,
    pub output_tensor: serde_json::Value,
    pub input_shape: Vec<usize>,
    pub output_shape: Vec<usize>,
    pub stats: TensorStats,
}

/// Turn a structural name into a safe node id: every byte outside
/// `[A-Za-z0-9_]` becomes `_`, surrounding underscores are trimmed.
pub fn normalize_id(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    replaced.trim_matches('_').to_string()
}

/// A rank-1 tensor with zero elements, used when an input is not capturable.
pub fn empty_tensor() -> Result<Tensor> {
    Ok(Tensor::from_vec(Vec::<f32>::new(), (0,), &Device::Cpu)?)
}

/// Flatten a tensor into an `f32` vector on the CPU.
pub fn flatten_to_vec(tensor: &Tensor) -> Result<Vec<f32>> {
    let tensor = if tensor.dtype() == DType::F32 {
        tensor.clone()
    } else {
        tensor.to_dtype(DType::F32)?
    };
    if tensor.elem_count() == 0 {
        return Ok(Vec::new());
    }
    Ok(tensor.flatten_all()?.to_vec1::<f32>()?)
}

/// Compute mean/std/min/max over every element of a tensor.
///
/// Empty tensors yield all zeros. NaN/Inf are not rejected: they propagate
/// into the stats exactly as the arithmetic produces them (min/max follow
/// the same contamination rule as the mean).
pub fn compute_stats(tensor: &Tensor) -> Result<TensorStats> {
    let flat = flatten_to_vec(tensor)?;
    if flat.is_empty() {
        return Ok(TensorStats::default());
    }

    let n = flat.len() as f64;
    let mut sum = 0.0f64;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for &v in &flat {
        let v = v as f64;
        sum += v;
        min = if min.is_nan() || v.is_nan() { f64::NAN } else { min.min(v) };
        max = if max.is_nan() || v.is_nan() { f64::NAN } else { max.max(v) };
    }
    let mean = sum / n;
    let variance = flat
        .iter()
        .map(|&v| {
            let d = v as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;

    Ok(TensorStats {
        mean,
        std: variance.sqrt(),
        min,
        max,
    })
}

/// Render a tensor as nested JSON arrays matching its shape.
///
/// Non-finite values serialize as JSON null (JSON has no NaN/Inf literal).
pub fn tensor_to_json(tensor: &Tensor) -> Result<serde_json::Value> {
    let flat = flatten_to_vec(tensor)?;
    Ok(nest_values(&flat, tensor.dims()))
}

fn nest_values(data: &[f32], dims: &[usize]) -> serde_json::Value {
    match dims {
        [] => data
            .first()
            .map(|&v| serde_json::Value::from(v as f64))
            .unwrap_or(serde_json::Value::Null),
        [_] => serde_json::Value::Array(
            data.iter()
                .map(|&v| serde_json::Value::from(v as f64))
                .collect(),
        ),
        [first, rest @ ..] => {
            let stride: usize = rest.iter().product();
            serde_json::Value::Array(
                (0..*first)
                    .map(|i| nest_values(&data[i * stride..(i + 1) * stride], rest))
                    .collect(),
            )
        }
    }
}
