//! pointmask-store: image and mask records.
//!
//! Keeps uploaded images and the masks made from them. Every mask points
//! at exactly one image; deleting the image deletes its masks.
//! [`MemoryRepository`] holds everything in process memory behind the
//! [`Repository`] trait, so a database-backed store can replace it.

pub mod memory;
pub mod types;

pub use memory::{MemoryRepository, Repository, save_mask};
pub use types::{ImageId, ImageRecord, MAX_LABEL_LEN, MaskId, MaskRecord, StoreError, UPLOAD_DIR};
