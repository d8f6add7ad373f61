//! `data:` URIs for embedding a PNG in a JSON response.
//!
//! The upload endpoint that this mirrors answered with
//! `{"processed_image": "data:image/png;base64,..."}`.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use pointmask_pipeline::CompositeResult;

use crate::png::{ExportError, encode_png};

/// Wrap already encoded PNG bytes in a `data:image/png;base64,` URI.
#[must_use]
pub fn to_data_uri(png: &[u8]) -> String {
    format!("data:image/png;base64,{}", STANDARD.encode(png))
}

/// Encode the blended preview of `result` as a PNG data URI.
///
/// # Errors
///
/// Returns [`ExportError::Png`] if PNG encoding fails.
pub fn composite_data_uri(result: &CompositeResult) -> Result<String, ExportError> {
    Ok(to_data_uri(&encode_png(&result.blended)?))
}
