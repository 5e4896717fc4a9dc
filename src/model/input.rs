//! Convert user-supplied input strings into model-ready tensors.
//!
//! Three hints are understood: `tensor` (comma-separated floats), `image`
//! (base64-encoded image bytes, resized and normalized with the ImageNet
//! statistics), and `text` (tokenized with a configured tokenizer file).
//! Unknown hints fall back to float parsing with a clear error.

use std::path::Path;
use std::sync::Arc;

use base64::engine::general_purpose;
use base64::Engine as _;
use candle_core::{Device, Tensor};
use tokenizers::Tokenizer;

use crate::error::{Result, StrataError};

use super::PreparedInput;

const IMAGE_SIDE: usize = 224;
const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Load the tokenizer used by the `text` input hint.
pub fn load_tokenizer(path: &Path) -> Result<Arc<Tokenizer>> {
    if !path.exists() {
        return Err(StrataError::NotFound(format!(
            "no tokenizer file at {}",
            path.display()
        )));
    }
    let tokenizer = Tokenizer::from_file(path)
        .map_err(|e| StrataError::InvalidInput(format!("could not load tokenizer: {e}")))?;
    Ok(Arc::new(tokenizer))
}

/// Turn a string and a hint into data a model can consume.
pub fn prepare_input(
    input_data: &str,
    input_hint: &str,
    tokenizer: Option<&Tokenizer>,
) -> Result<PreparedInput> {
    let hint = input_hint.trim().to_lowercase();
    let hint = if hint.is_empty() { "tensor".to_string() } else { hint };

    match hint.as_str() {
        "image" => prepare_image(input_data),
        "text" => prepare_text(input_data, tokenizer),
        "tensor" => prepare_tensor(input_data),
        _ => prepare_tensor(input_data).map_err(|_| {
            StrataError::InvalidInput(
                "unsupported input hint; use 'image', 'text', or 'tensor', or provide \
                 comma-separated numbers for raw tensor input"
                    .to_string(),
            )
        }),
    }
}

/// Parse comma-separated floats into a `(1, n)` tensor.
fn prepare_tensor(input_data: &str) -> Result<PreparedInput> {
    let values = input_data
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<f32>().map_err(|_| {
                StrataError::InvalidInput(format!("could not parse number: {part:?}"))
            })
        })
        .collect::<Result<Vec<f32>>>()?;
    if values.is_empty() {
        return Err(StrataError::InvalidInput("no numbers provided".to_string()));
    }
    let n = values.len();
    Ok(PreparedInput::Tensor(Tensor::from_vec(
        values,
        (1, n),
        &Device::Cpu,
    )?))
}

/// Decode base64 image bytes into a normalized `(1, 3, 224, 224)` tensor.
fn prepare_image(input_data: &str) -> Result<PreparedInput> {
    let raw = general_purpose::STANDARD
        .decode(input_data.trim().as_bytes())
        .map_err(|e| StrataError::InvalidInput(format!("invalid base64 image data: {e}")))?;
    let img = image::load_from_memory(&raw)
        .map_err(|e| StrataError::InvalidInput(format!("could not load image: {e}")))?;
    let rgb = img
        .resize_exact(
            IMAGE_SIDE as u32,
            IMAGE_SIDE as u32,
            image::imageops::FilterType::Triangle,
        )
        .to_rgb8();

    // CHW layout, normalized per channel.
    let mut data = vec![0.0f32; 3 * IMAGE_SIDE * IMAGE_SIDE];
    for (x, y, pixel) in rgb.enumerate_pixels() {
        let idx = y as usize * IMAGE_SIDE + x as usize;
        for c in 0..3 {
            let v = pixel[c] as f32 / 255.0;
            data[c * IMAGE_SIDE * IMAGE_SIDE + idx] = (v - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
        }
    }
    Ok(PreparedInput::Tensor(Tensor::from_vec(
        data,
        (1, 3, IMAGE_SIDE, IMAGE_SIDE),
        &Device::Cpu,
    )?))
}

/// Tokenize text into named `input_ids` / `attention_mask` tensors.
fn prepare_text(input_data: &str, tokenizer: Option<&Tokenizer>) -> Result<PreparedInput> {
    let tokenizer = tokenizer.ok_or_else(|| {
        StrataError::InvalidInput(
            "text input requires a tokenizer; start the server with --tokenizer".to_string(),
        )
    })?;
    let encoding = tokenizer
        .encode(input_data, true)
        .map_err(|e| StrataError::InvalidInput(format!("tokenization failed: {e}")))?;

    let ids: Vec<f32> = encoding.get_ids().iter().map(|&id| id as f32).collect();
    let mask: Vec<f32> = encoding
        .get_attention_mask()
        .iter()
        .map(|&m| m as f32)
        .collect();
    if ids.is_empty() {
        return Err(StrataError::InvalidInput(
            "tokenization produced no tokens".to_string(),
        ));
    }
    let n = ids.len();
    Ok(PreparedInput::Named(vec![
        (
            "input_ids".to_string(),
            Tensor::from_vec(ids, (1, n), &Device::Cpu)?,
        ),
        (
            "attention_mask".to_string(),
            Tensor::from_vec(mask, (1, n), &Device::Cpu)?,
        ),
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tensor_hint_parses_comma_separated_floats() {
        let prepared = prepare_input("1.5, 2.0,3", "tensor", None).unwrap();
        match prepared {
            PreparedInput::Tensor(t) => {
                assert_eq!(t.dims(), &[1, 3]);
                assert_eq!(
                    t.flatten_all().unwrap().to_vec1::<f32>().unwrap(),
                    vec![1.5, 2.0, 3.0]
                );
            }
            other => panic!("expected tensor, got {:?}", other),
        }
    }

    #[test]
    fn empty_hint_defaults_to_tensor_parsing() {
        let prepared = prepare_input("4", "", None).unwrap();
        assert!(matches!(prepared, PreparedInput::Tensor(_)));
    }

    #[test]
    fn empty_numeric_list_is_invalid_input() {
        let err = prepare_input("  , ,", "tensor", None).unwrap_err();
        assert!(matches!(err, StrataError::InvalidInput(_)));
    }

    #[test]
    fn garbage_number_is_invalid_input() {
        let err = prepare_input("1.0, banana", "tensor", None).unwrap_err();
        assert!(matches!(err, StrataError::InvalidInput(_)));
    }

    #[test]
    fn unknown_hint_with_parseable_numbers_falls_back() {
        let prepared = prepare_input("1,2", "mystery", None).unwrap();
        assert!(matches!(prepared, PreparedInput::Tensor(_)));
    }

    #[test]
    fn unknown_hint_without_numbers_reports_hint_error() {
        let err = prepare_input("not numbers", "mystery", None).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("unsupported input hint"), "got: {msg}");
    }

    #[test]
    fn corrupt_base64_image_is_invalid_input() {
        let err = prepare_input("!!not-base64!!", "image", None).unwrap_err();
        assert!(matches!(err, StrataError::InvalidInput(_)));
    }

    #[test]
    fn valid_base64_but_not_an_image_is_invalid_input() {
        let encoded = general_purpose::STANDARD.encode(b"plain text, not an image");
        let err = prepare_input(&encoded, "image", None).unwrap_err();
        assert!(matches!(err, StrataError::InvalidInput(_)));
    }

    #[test]
    fn text_without_tokenizer_is_invalid_input() {
        let err = prepare_input("hello world", "text", None).unwrap_err();
        assert!(matches!(err, StrataError::InvalidInput(_)));
    }
}
