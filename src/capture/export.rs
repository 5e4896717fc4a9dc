//! Export surface over cached records: plain-text rendering and size
//! estimates. Exports always contain the full tensors, never a truncated
//! view.

use crate::capture::record::{flatten_to_vec, CaptureRecord};
use crate::error::Result;

/// Estimated export size in bytes: every element costs roughly 24 bytes
/// once rendered as decimal text with separators.
pub fn estimate_bytes(record: &CaptureRecord) -> u64 {
    let elements = record.input_value.elem_count() + record.output_value.elem_count();
    (elements as u64) * 24
}

/// Human-readable size at binary (1024) thresholds.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * 1024;
    const GB: u64 = 1024 * 1024 * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Render one record as a fixed-header plain-text block: metadata, the four
/// stats to 8 decimal places, then both tensors one line per leading-axis
/// slice.
pub fn render_record(record: &CaptureRecord) -> Result<String> {
    let mut lines = vec![
        "=====================================".to_string(),
        "STRATA LAYER EXPORT".to_string(),
        "=====================================".to_string(),
        format!("Layer:        {}", record.display_name),
        format!("Type:         {}", record.kind),
        format!("Param Count:  {}", record.param_count),
        format!("Input Shape:  {:?}", record.input_shape),
        format!("Output Shape: {:?}", record.output_shape),
        "-------------------------------------".to_string(),
        "STATISTICS".to_string(),
        format!("Mean:  {:.8}", record.stats.mean),
        format!("Std:   {:.8}", record.stats.std),
        format!("Min:   {:.8}", record.stats.min),
        format!("Max:   {:.8}", record.stats.max),
        "-------------------------------------".to_string(),
        "INPUT TENSOR (full data, no truncation)".to_string(),
    ];
    append_tensor_lines(&mut lines, record.input_value.dims(), &record.input_value)?;
    lines.push("-------------------------------------".to_string());
    lines.push("OUTPUT TENSOR (full data, no truncation)".to_string());
    append_tensor_lines(&mut lines, record.output_value.dims(), &record.output_value)?;
    lines.push("=====================================".to_string());
    Ok(lines.join("\n"))
}

fn append_tensor_lines(
    lines: &mut Vec<String>,
    dims: &[usize],
    tensor: &candle_core::Tensor,
) -> Result<()> {
    let flat = flatten_to_vec(tensor)?;
    if flat.is_empty() {
        lines.push("[]".to_string());
        return Ok(());
    }
    match dims {
        [] => lines.push(format_slice(&flat, &[])),
        [leading, rest @ ..] => {
            let stride: usize = rest.iter().product();
            for i in 0..*leading {
                lines.push(format_slice(&flat[i * stride..(i + 1) * stride], rest));
            }
        }
    }
    Ok(())
}

fn format_slice(data: &[f32], dims: &[usize]) -> String {
    match dims {
        [] => {
            // Scalar slice (rank-0 tensor or innermost element).
            data.first().map(|v| v.to_string()).unwrap_or_default()
        }
        [_] => {
            let inner: Vec<String> = data.iter().map(|v| v.to_string()).collect();
            format!("[{}]", inner.join(", "))
        }
        [first, rest @ ..] => {
            let stride: usize = rest.iter().product();
            let inner: Vec<String> = (0..*first)
                .map(|i| format_slice(&data[i * stride..(i + 1) * stride], rest))
                .collect();
            format!("[{}]", inner.join(", "))
        }
    }
}
