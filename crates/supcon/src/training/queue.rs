//! Class-indexed FIFO memory bank of teacher embeddings.
//!
//! Every call to [`MemoryQueue::push_batch`] appends exactly one entry to
//! every class slot (`None` when the batch had no sample of that class), so
//! all slots share the same depth and FIFO rotation keeps that depth constant.

use std::collections::VecDeque;

use burn::prelude::*;
use burn::tensor::TensorData;

use crate::error::SupConError;

/// Memory queue mapping each class index to the embeddings it received from
/// the most recent teacher batches, oldest first.
///
/// Lives on a non-autodiff backend: queued embeddings are constants.
#[derive(Debug, Clone)]
pub struct MemoryQueue<B: Backend> {
    slots: Vec<VecDeque<Option<Tensor<B, 2>>>>,
    embed_dim: usize,
}

impl<B: Backend> MemoryQueue<B> {
    /// Create an empty queue with a slot for every class in `0..num_classes`.
    pub fn new(num_classes: usize, embed_dim: usize) -> Self {
        Self {
            slots: (0..num_classes).map(|_| VecDeque::new()).collect(),
            embed_dim,
        }
    }

    /// Drop all entries, keeping every class slot.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            slot.clear();
        }
    }

    pub fn num_classes(&self) -> usize {
        self.slots.len()
    }

    pub fn embed_dim(&self) -> usize {
        self.embed_dim
    }

    /// Number of enqueued batches (identical for every class slot).
    pub fn depth(&self) -> usize {
        self.slots.first().map(VecDeque::len).unwrap_or(0)
    }

    /// Number of embeddings currently held for `class`.
    pub fn class_len(&self, class: usize) -> usize {
        self.slots.get(class).map(slot_rows).unwrap_or(0)
    }

    /// Total number of embeddings across all classes.
    pub fn len(&self) -> usize {
        self.slots.iter().map(slot_rows).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of the labels `flatten` would produce: `Σ class * class_len(class)`.
    pub fn label_sum(&self) -> f64 {
        self.slots
            .iter()
            .enumerate()
            .map(|(class, slot)| class as f64 * slot_rows(slot) as f64)
            .sum()
    }

    /// Partition one batch of teacher embeddings by label and append one
    /// entry to every class slot.
    ///
    /// `embeddings` has shape `(N, embed_dim)`, `labels` has length `N`.
    /// Nothing is appended when validation fails.
    pub fn push_batch(
        &mut self,
        embeddings: Tensor<B, 2>,
        labels: &[i64],
    ) -> Result<(), SupConError> {
        let [rows, dim] = embeddings.dims();
        if rows != labels.len() {
            return Err(SupConError::DimensionMismatch {
                expected: format!("{} embeddings (one per label)", labels.len()),
                found: format!("{rows} embeddings"),
            });
        }
        if dim != self.embed_dim {
            return Err(SupConError::DimensionMismatch {
                expected: format!("embedding dim {}", self.embed_dim),
                found: format!("embedding dim {dim}"),
            });
        }

        let num_classes = self.num_classes();
        let mut members: Vec<Vec<i64>> = vec![Vec::new(); num_classes];
        for (row, &label) in labels.iter().enumerate() {
            if label < 0 || label as usize >= num_classes {
                return Err(SupConError::LabelOutOfRange { label, num_classes });
            }
            members[label as usize].push(row as i64);
        }

        let device = embeddings.device();
        for (slot, rows) in self.slots.iter_mut().zip(members) {
            let entry = if rows.is_empty() {
                None
            } else if rows.len() == labels.len() {
                Some(embeddings.clone())
            } else {
                let n = rows.len();
                let indices = Tensor::<B, 1, Int>::from_data(TensorData::new(rows, [n]), &device);
                Some(embeddings.clone().select(0, indices))
            };
            slot.push_back(entry);
        }

        Ok(())
    }

    /// Remove the `size` oldest entries from every class slot.
    ///
    /// All-or-nothing: fails with [`SupConError::QueueUnderflow`] without
    /// touching the queue if any slot holds fewer than `size` entries.
    pub fn dequeue(&mut self, size: usize) -> Result<(), SupConError> {
        for (class, slot) in self.slots.iter().enumerate() {
            if slot.len() < size {
                return Err(SupConError::QueueUnderflow {
                    class,
                    requested: size,
                    available: slot.len(),
                });
            }
        }
        for slot in &mut self.slots {
            slot.drain(..size);
        }
        Ok(())
    }

    /// Concatenate the whole queue into one comparison set.
    ///
    /// Returns embeddings `(N2, embed_dim)` and labels `(N2,)`, grouped
    /// contiguously by class in ascending order, oldest entries first within
    /// a class. Classes with no queued samples contribute nothing.
    pub fn flatten(&self) -> Result<(Tensor<B, 2>, Tensor<B, 1, Int>), SupConError> {
        let mut parts = Vec::new();
        let mut labels: Vec<i64> = Vec::new();

        for (class, slot) in self.slots.iter().enumerate() {
            for entry in slot.iter().flatten() {
                let [rows, _] = entry.dims();
                labels.extend(std::iter::repeat(class as i64).take(rows));
                parts.push(entry.clone());
            }
        }

        if parts.is_empty() {
            return Err(SupConError::EmptyQueue);
        }

        let device = parts[0].device();
        let n = labels.len();
        let embeddings = Tensor::cat(parts, 0);
        let labels = Tensor::<B, 1, Int>::from_data(TensorData::new(labels, [n]), &device);
        Ok((embeddings, labels))
    }

    /// Oldest entry of a class slot, `None` if the slot is empty or the oldest
    /// batch had no sample of that class.
    pub fn oldest(&self, class: usize) -> Option<&Tensor<B, 2>> {
        self.slots.get(class)?.front()?.as_ref()
    }
}

fn slot_rows<B: Backend>(slot: &VecDeque<Option<Tensor<B, 2>>>) -> usize {
    slot.iter().flatten().map(|t| t.dims()[0]).sum()
}
