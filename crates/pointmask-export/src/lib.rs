//! pointmask-export: Pure format serializers (sans-IO)
//!
//! Turns pipeline results into bytes a client can use: PNG files for the
//! blended preview and the mask, and `data:` URIs for embedding the
//! preview in a JSON response.

pub mod data_uri;
pub mod png;

pub use data_uri::{composite_data_uri, to_data_uri};
pub use png::{ExportError, encode_mask_png, encode_png};
