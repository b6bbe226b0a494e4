//! Batch source over labeled image records.
//!
//! Reads image Parquet files via the `imageset` crate and cuts them into
//! fixed-size tensor batches. The last batch of a pass keeps whatever
//! records remain. With a shuffle seed, every pass visits the records in a
//! new order that is still reproducible from the seed. Queue refreshes read
//! single batches by index and do not consume passes.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use burn::prelude::*;
use imageset::{ImageReader, ImageRecord, ImageShape};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::error::SupConError;
use crate::model::bridge::{images_to_tensor, labels_to_tensor};
use crate::training::source::{BatchSource, LabeledBatch};

/// Image records served as `(images, labels)` tensor batches.
pub struct ImageBatchSource<B: Backend> {
    records: Vec<ImageRecord>,
    shape: ImageShape,
    batch_size: usize,
    device: B::Device,
    shuffle_seed: Option<u64>,
    passes: AtomicU64,
}

impl<B: Backend> ImageBatchSource<B> {
    /// Build a source from in-memory records.
    ///
    /// # Errors
    /// - [`SupConError::InvalidConfig`] if `batch_size` is zero
    /// - [`SupConError::DimensionMismatch`] if a record does not match `shape`
    pub fn new(
        records: Vec<ImageRecord>,
        shape: ImageShape,
        batch_size: usize,
        device: &B::Device,
    ) -> Result<Self, SupConError> {
        if batch_size == 0 {
            return Err(SupConError::InvalidConfig("batch_size must be positive".into()));
        }
        for (i, record) in records.iter().enumerate() {
            shape
                .validate(record)
                .map_err(|e| SupConError::DimensionMismatch {
                    expected: format!("{} pixel values ({shape})", shape.num_values()),
                    found: format!("record {i}: {e}"),
                })?;
        }

        Ok(Self {
            records,
            shape,
            batch_size,
            device: device.clone(),
            shuffle_seed: None,
            passes: AtomicU64::new(0),
        })
    }

    /// Load records from one or more image Parquet files.
    pub fn from_parquet(
        paths: &[PathBuf],
        shape: ImageShape,
        batch_size: usize,
        device: &B::Device,
    ) -> anyhow::Result<Self> {
        let records = ImageReader::read_multiple(paths)?;
        tracing::info!(
            records = records.len(),
            files = paths.len(),
            shape = %shape,
            "Loaded image records"
        );
        Ok(Self::new(records, shape, batch_size, device)?)
    }

    /// Reorder records at the start of every pass, seeded by `seed` and the pass number.
    pub fn with_shuffle(mut self, seed: u64) -> Self {
        self.shuffle_seed = Some(seed);
        self
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Largest label present plus one, or 0 for an empty source.
    pub fn min_num_classes(&self) -> usize {
        self.records
            .iter()
            .map(|r| r.label as usize + 1)
            .max()
            .unwrap_or(0)
    }

    fn pass_order(&self, pass: u64) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.records.len()).collect();
        if let Some(seed) = self.shuffle_seed {
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(pass));
            order.shuffle(&mut rng);
        }
        order
    }

    fn make_batch(&self, indices: &[usize]) -> LabeledBatch<B> {
        let pixels: Vec<&[f32]> = indices
            .iter()
            .map(|&i| self.records[i].pixels.as_slice())
            .collect();
        let labels: Vec<usize> = indices
            .iter()
            .map(|&i| self.records[i].label as usize)
            .collect();
        LabeledBatch::new(
            images_to_tensor(&pixels, self.shape, &self.device),
            labels_to_tensor(&labels, &self.device),
        )
    }
}

impl<B: Backend> BatchSource<B> for ImageBatchSource<B> {
    fn iter(&self) -> Box<dyn Iterator<Item = LabeledBatch<B>> + '_> {
        let order = self.pass_order(self.passes.fetch_add(1, Ordering::Relaxed));
        let batch_size = self.batch_size;
        let total = order.len();
        Box::new((0..total).step_by(batch_size).map(move |start| {
            let end = (start + batch_size).min(total);
            self.make_batch(&order[start..end])
        }))
    }

    fn num_batches(&self) -> usize {
        self.records.len().div_ceil(self.batch_size)
    }

    fn batch_at(&self, index: usize) -> Option<LabeledBatch<B>> {
        let n = self.num_batches();
        if n == 0 {
            return None;
        }
        let order = self.pass_order((index / n) as u64);
        let start = (index % n) * self.batch_size;
        let end = (start + self.batch_size).min(order.len());
        Some(self.make_batch(&order[start..end]))
    }
}
