//! Fleet configuration model
//!
//! Host → Camera → Detector records and the device document format they are
//! read from and written to.

pub mod document;
mod types;

pub use document::{mask_secrets, parse_document, to_document, SECRET_MASK};
pub use types::*;
