//! Data types for labeled images and dataset statistics.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single labeled image stored as CHW row-major `f32` pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Integer class index in `[0, num_classes)`.
    pub label: u32,
    /// Pixel values, `channels * height * width` long.
    pub pixels: Vec<f32>,
}

impl ImageRecord {
    pub fn new(label: u32, pixels: Vec<f32>) -> Self {
        Self { label, pixels }
    }
}

/// Shape of every image in a dataset (channels, height, width).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageShape {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl ImageShape {
    pub fn new(channels: usize, height: usize, width: usize) -> Self {
        Self {
            channels,
            height,
            width,
        }
    }

    /// Square image with the given side length.
    pub fn square(channels: usize, side: usize) -> Self {
        Self::new(channels, side, side)
    }

    /// Number of `f32` values one image of this shape occupies.
    pub fn num_values(&self) -> usize {
        self.channels * self.height * self.width
    }

    /// Check that a record's pixel buffer matches this shape.
    pub fn validate(&self, record: &ImageRecord) -> anyhow::Result<()> {
        if record.pixels.len() != self.num_values() {
            anyhow::bail!(
                "Image with label {} has {} pixel values, expected {} for shape {self}",
                record.label,
                record.pixels.len(),
                self.num_values()
            );
        }
        Ok(())
    }
}

impl fmt::Display for ImageShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.channels, self.height, self.width)
    }
}

/// Summary statistics over an image Parquet file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetSummary {
    /// Total number of images.
    pub total_records: usize,
    /// Number of images per class label, sorted by label.
    pub per_class: BTreeMap<u32, usize>,
    /// Pixel vector length shared by all records (0 for an empty file).
    pub pixel_len: usize,
}

impl DatasetSummary {
    /// Build a summary from records. Fails on inconsistent pixel lengths.
    pub fn from_records(records: &[ImageRecord]) -> anyhow::Result<Self> {
        let mut per_class = BTreeMap::new();
        let mut pixel_len: Option<usize> = None;

        for (i, record) in records.iter().enumerate() {
            *per_class.entry(record.label).or_insert(0) += 1;
            match pixel_len {
                None => pixel_len = Some(record.pixels.len()),
                Some(len) if len != record.pixels.len() => {
                    anyhow::bail!(
                        "Record {i} has {} pixel values, earlier records have {len}",
                        record.pixels.len()
                    );
                }
                Some(_) => {}
            }
        }

        Ok(Self {
            total_records: records.len(),
            per_class,
            pixel_len: pixel_len.unwrap_or(0),
        })
    }

    /// Number of distinct labels present.
    pub fn num_classes_seen(&self) -> usize {
        self.per_class.len()
    }

    /// Largest label present plus one, i.e. the smallest valid `num_classes`.
    pub fn min_num_classes(&self) -> usize {
        self.per_class
            .keys()
            .next_back()
            .map(|&label| label as usize + 1)
            .unwrap_or(0)
    }
}
