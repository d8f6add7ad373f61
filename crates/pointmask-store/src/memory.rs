//! The repository trait and its in-memory implementation.

use std::collections::BTreeMap;
use std::time::SystemTime;

use pointmask_pipeline::{CompositeResult, PromptSet};

use crate::types::{
    ImageId, ImageRecord, MAX_LABEL_LEN, MaskId, MaskRecord, StoreError, UPLOAD_DIR,
};

/// Persistence for uploaded images and the masks made from them.
///
/// Masks belong to exactly one image and are removed only when that
/// image is deleted.
pub trait Repository {
    /// Store an uploaded image file.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::EmptyFile`] or
    /// [`StoreError::UnsupportedFormat`] if `file_bytes` is not an image.
    fn create_image(&mut self, file_bytes: Vec<u8>) -> Result<ImageRecord, StoreError>;

    /// Store a mask for an existing image.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ImageNotFound`] if `image_id` is unknown and
    /// [`StoreError::LabelTooLong`] if `label` is over the limit.
    fn create_mask(
        &mut self,
        image_id: ImageId,
        coordinates: PromptSet,
        label: &str,
        confidence: f32,
    ) -> Result<MaskRecord, StoreError>;

    /// Every stored image, oldest first.
    fn list_images(&self) -> Vec<ImageRecord>;

    /// Look up one image.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ImageNotFound`] if `id` is unknown.
    fn get_image(&self, id: ImageId) -> Result<ImageRecord, StoreError>;

    /// Masks of one image, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ImageNotFound`] if `image_id` is unknown.
    fn masks_for(&self, image_id: ImageId) -> Result<Vec<MaskRecord>, StoreError>;

    /// Delete an image and all of its masks.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ImageNotFound`] if `id` is unknown.
    fn delete_image(&mut self, id: ImageId) -> Result<(), StoreError>;
}

/// Persist the selected mask of a pipeline run, with its score as the
/// confidence and its prompt as the coordinates.
///
/// # Errors
///
/// Same as [`Repository::create_mask`].
pub fn save_mask<R: Repository + ?Sized>(
    repository: &mut R,
    image_id: ImageId,
    result: &CompositeResult,
    label: &str,
) -> Result<MaskRecord, StoreError> {
    repository.create_mask(
        image_id,
        result.prompts.clone(),
        label,
        result.selected.score(),
    )
}

/// Repository kept in process memory.
#[derive(Debug)]
pub struct MemoryRepository {
    images: BTreeMap<ImageId, ImageRecord>,
    masks: BTreeMap<MaskId, MaskRecord>,
    next_image: u64,
    next_mask: u64,
    clock: fn() -> SystemTime,
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRepository {
    /// An empty repository stamped with the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(SystemTime::now)
    }

    /// An empty repository that reads upload times from `clock`.
    #[must_use]
    pub fn with_clock(clock: fn() -> SystemTime) -> Self {
        Self {
            images: BTreeMap::new(),
            masks: BTreeMap::new(),
            next_image: 1,
            next_mask: 1,
            clock,
        }
    }

    fn require_image(&self, id: ImageId) -> Result<&ImageRecord, StoreError> {
        self.images.get(&id).ok_or(StoreError::ImageNotFound(id))
    }
}

impl Repository for MemoryRepository {
    fn create_image(&mut self, file_bytes: Vec<u8>) -> Result<ImageRecord, StoreError> {
        if file_bytes.is_empty() {
            return Err(StoreError::EmptyFile);
        }
        let format = image::guess_format(&file_bytes)?;
        let extension = format.extensions_str().first().copied().unwrap_or("bin");

        let id = ImageId(self.next_image);
        self.next_image += 1;

        let record = ImageRecord {
            id,
            file: format!("{UPLOAD_DIR}/image_{id}.{extension}"),
            uploaded_at: (self.clock)(),
            bytes: file_bytes,
        };
        tracing::debug!(%id, file = %record.file, "stored image");
        self.images.insert(id, record.clone());
        Ok(record)
    }

    fn create_mask(
        &mut self,
        image_id: ImageId,
        coordinates: PromptSet,
        label: &str,
        confidence: f32,
    ) -> Result<MaskRecord, StoreError> {
        self.require_image(image_id)?;
        let len = label.chars().count();
        if len > MAX_LABEL_LEN {
            return Err(StoreError::LabelTooLong {
                len,
                max: MAX_LABEL_LEN,
            });
        }

        let id = MaskId(self.next_mask);
        self.next_mask += 1;

        let record = MaskRecord {
            id,
            image_id,
            coordinates,
            label: label.to_owned(),
            confidence,
        };
        tracing::debug!(%id, %image_id, confidence, "stored mask");
        self.masks.insert(id, record.clone());
        Ok(record)
    }

    fn list_images(&self) -> Vec<ImageRecord> {
        self.images.values().cloned().collect()
    }

    fn get_image(&self, id: ImageId) -> Result<ImageRecord, StoreError> {
        self.require_image(id).cloned()
    }

    fn masks_for(&self, image_id: ImageId) -> Result<Vec<MaskRecord>, StoreError> {
        self.require_image(image_id)?;
        Ok(self
            .masks
            .values()
            .filter(|m| m.image_id == image_id)
            .cloned()
            .collect())
    }

    fn delete_image(&mut self, id: ImageId) -> Result<(), StoreError> {
        self.images
            .remove(&id)
            .ok_or(StoreError::ImageNotFound(id))?;
        let before = self.masks.len();
        self.masks.retain(|_, m| m.image_id != id);
        tracing::debug!(%id, masks_removed = before - self.masks.len(), "deleted image");
        Ok(())
    }
}
