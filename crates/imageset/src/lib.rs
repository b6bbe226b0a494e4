//! Parquet I/O for labeled image datasets.
//!
//! Provides the record and shape types for classification images and
//! reads/writes them as Parquet files for contrastive training.

pub mod reader;
pub mod types;
pub mod writer;

pub use reader::ImageReader;
pub use types::{DatasetSummary, ImageRecord, ImageShape};
pub use writer::ImageWriter;
