//! Record and error types for the image/mask repository.

use std::fmt;
use std::time::SystemTime;

use pointmask_pipeline::PromptSet;
use serde::{Deserialize, Serialize};

/// Directory prefix of stored image file references.
pub const UPLOAD_DIR: &str = "uploads";

/// Longest accepted mask label, in characters.
pub const MAX_LABEL_LEN: usize = 100;

/// Identifier of a stored image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageId(pub u64);

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a stored mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MaskId(pub u64);

impl fmt::Display for MaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An uploaded image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageRecord {
    /// Record identifier.
    pub id: ImageId,
    /// Stored file reference, `uploads/<name>`.
    pub file: String,
    /// When the image was stored.
    pub uploaded_at: SystemTime,
    /// The uploaded bytes, as received.
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

/// A mask produced for an image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaskRecord {
    /// Record identifier.
    pub id: MaskId,
    /// The image this mask belongs to.
    pub image_id: ImageId,
    /// The prompt that produced the mask.
    pub coordinates: PromptSet,
    /// Free-form label, at most [`MAX_LABEL_LEN`] characters.
    pub label: String,
    /// Score of the persisted candidate.
    pub confidence: f32,
}

impl MaskRecord {
    /// The coordinates as the JSON document stored with the mask.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialize`] if the prompt cannot be encoded.
    pub fn coordinates_json(&self) -> Result<serde_json::Value, StoreError> {
        Ok(serde_json::to_value(&self.coordinates)?)
    }
}

/// Errors from the repository.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No image with this id exists.
    #[error("image {0} not found")]
    ImageNotFound(ImageId),

    /// Uploaded file is empty.
    #[error("uploaded file is empty")]
    EmptyFile,

    /// Uploaded bytes are not in a recognized image format.
    #[error("uploaded file is not a supported image: {0}")]
    UnsupportedFormat(#[from] image::ImageError),

    /// Label exceeds [`MAX_LABEL_LEN`] characters.
    #[error("label is {len} characters, at most {max} allowed")]
    LabelTooLong {
        /// Length of the rejected label, in characters.
        len: usize,
        /// The limit.
        max: usize,
    },

    /// Coordinates could not be encoded as JSON.
    #[error("failed to encode coordinates: {0}")]
    Serialize(#[from] serde_json::Error),
}
