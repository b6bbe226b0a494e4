//! Labeled image batches and the sources that replay them.

use burn::prelude::*;

/// One batch of images with their class indices.
#[derive(Debug, Clone)]
pub struct LabeledBatch<B: Backend> {
    /// Shape `(batch, channels, H, W)`.
    pub images: Tensor<B, 4>,
    /// Shape `(batch,)`, values in `[0, num_classes)`.
    pub labels: Tensor<B, 1, Int>,
}

impl<B: Backend> LabeledBatch<B> {
    pub fn new(images: Tensor<B, 4>, labels: Tensor<B, 1, Int>) -> Self {
        Self { images, labels }
    }
}

/// A finite, re-iterable stream of labeled batches.
///
/// Every call to [`BatchSource::iter`] starts a fresh pass from the beginning.
pub trait BatchSource<B: Backend> {
    fn iter(&self) -> Box<dyn Iterator<Item = LabeledBatch<B>> + '_>;

    /// Number of batches one pass yields.
    fn num_batches(&self) -> usize;

    /// Batch `index` of an endless run of passes: position
    /// `index % num_batches` of pass `index / num_batches`.
    ///
    /// Returns `None` only for a source with no batches.
    fn batch_at(&self, index: usize) -> Option<LabeledBatch<B>> {
        match self.num_batches() {
            0 => None,
            n => self.iter().nth(index % n),
        }
    }
}

/// Pre-built batches replayed in order.
#[derive(Debug, Clone)]
pub struct InMemorySource<B: Backend> {
    batches: Vec<LabeledBatch<B>>,
}

impl<B: Backend> InMemorySource<B> {
    pub fn new(batches: Vec<LabeledBatch<B>>) -> Self {
        Self { batches }
    }
}

impl<B: Backend> BatchSource<B> for InMemorySource<B> {
    fn iter(&self) -> Box<dyn Iterator<Item = LabeledBatch<B>> + '_> {
        Box::new(self.batches.iter().cloned())
    }

    fn num_batches(&self) -> usize {
        self.batches.len()
    }

    fn batch_at(&self, index: usize) -> Option<LabeledBatch<B>> {
        match self.batches.len() {
            0 => None,
            n => self.batches.get(index % n).cloned(),
        }
    }
}
