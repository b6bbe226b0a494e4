//! Momentum teacher/student training session.
//!
//! Ties together the encoders, memory queue, contrastive loss, gradient
//! clipping and momentum update into a training loop using AdamW with a
//! constant learning rate. The student lives on the autodiff backend `B`;
//! the teacher and the queue live on `B::InnerBackend` and never track
//! gradients.

use std::path::{Path, PathBuf};
use std::time::Instant;

use burn::module::AutodiffModule;
use burn::optim::{AdamWConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder};
use burn::tensor::backend::AutodiffBackend;
use indicatif::{ProgressBar, ProgressStyle};

use crate::error::SupConError;
use crate::model::bridge::{tensor_to_f64, tensor_to_labels};
use crate::model::encoder::{Encoder, EncoderConfig};
use crate::training::clipping::clip_gradient_values;
use crate::training::loss::{label_mask_weight, supervised_contrastive_loss};
use crate::training::metrics::{EpochMetrics, RunningAvg};
use crate::training::momentum::momentum_update;
use crate::training::queue::MemoryQueue;
use crate::training::source::{BatchSource, LabeledBatch};

const STUDENT_FILE: &str = "student";
const TEACHER_FILE: &str = "teacher";
const OPTIMIZER_FILE: &str = "optimizer";
const META_FILE: &str = "meta.json";

/// Metadata saved alongside each checkpoint for resuming training.
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq)]
pub struct CheckpointMeta {
    /// Last completed epoch.
    pub epoch: usize,
    pub trained_steps: u64,
    pub skipped_steps: u64,
}

/// Configuration for supervised contrastive training.
#[derive(Config, Debug)]
pub struct SupConTrainingConfig {
    /// Number of classes; labels must lie in `[0, num_classes)`.
    #[config(default = 60)]
    pub num_classes: usize,
    /// Constant learning rate for AdamW.
    #[config(default = 1e-4)]
    pub lr: f64,
    /// Weight decay for AdamW.
    #[config(default = 0.0)]
    pub weight_decay: f64,
    /// Softmax temperature of the contrastive loss.
    #[config(default = 1.0)]
    pub temperature: f64,
    /// Teacher momentum `m` in `t = m * t + (1 - m) * s`.
    #[config(default = 0.9)]
    pub momentum: f64,
    /// Number of teacher batches kept in the memory queue.
    #[config(default = 10)]
    pub queue_size: usize,
    /// Gradient elements are clamped to `[-grad_clip_value, grad_clip_value]`.
    #[config(default = 0.1)]
    pub grad_clip_value: f64,
    /// Total epochs to train, counted across resumed runs: a session restored
    /// from a checkpoint of epoch `k` trains epochs `k + 1..=total_epochs`.
    #[config(default = 10)]
    pub total_epochs: usize,
    /// Steps between progress bar updates. 0 disables them.
    #[config(default = 10)]
    pub log_interval: usize,
    /// Directory for saving and loading checkpoints.
    #[config(default = "String::from(\"checkpoints/supcon\")")]
    pub checkpoint_dir: String,
}

impl SupConTrainingConfig {
    /// Reject values the training loop cannot run with.
    pub fn validate(&self) -> Result<(), SupConError> {
        let invalid = |msg: String| Err(SupConError::InvalidConfig(msg));
        if self.num_classes == 0 {
            return invalid("num_classes must be positive".into());
        }
        if !(self.lr.is_finite() && self.lr > 0.0) {
            return invalid(format!("lr must be positive, got {}", self.lr));
        }
        if !(self.weight_decay.is_finite() && self.weight_decay >= 0.0) {
            return invalid(format!(
                "weight_decay must be non-negative, got {}",
                self.weight_decay
            ));
        }
        if !(self.temperature.is_finite() && self.temperature > 0.0) {
            return invalid(format!("temperature must be positive, got {}", self.temperature));
        }
        if !(0.0..=1.0).contains(&self.momentum) {
            return invalid(format!("momentum must be in [0, 1], got {}", self.momentum));
        }
        // Every step dequeues one batch per class.
        if self.queue_size == 0 {
            return invalid("queue_size must be at least 1".into());
        }
        if !(self.grad_clip_value.is_finite() && self.grad_clip_value > 0.0) {
            return invalid(format!(
                "grad_clip_value must be positive, got {}",
                self.grad_clip_value
            ));
        }
        Ok(())
    }

    /// AdamW optimizer configuration. Gradient clipping is applied by the
    /// session, not by the optimizer.
    pub fn optimizer(&self) -> AdamWConfig {
        AdamWConfig::new().with_weight_decay(self.weight_decay as f32)
    }
}

/// Result of a single training step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepOutcome {
    /// The student was updated, the queue rotated and the teacher synchronized.
    Trained { loss: f64 },
    /// The label mask carried zero weight. The queue still rotated; the
    /// student and the teacher are unchanged.
    Skipped,
}

/// Owned training state: student, teacher, memory queue and optimizer.
pub struct TrainingSession<B: AutodiffBackend, O: Optimizer<Encoder<B>, B>> {
    config: SupConTrainingConfig,
    student: Encoder<B>,
    teacher: Encoder<B::InnerBackend>,
    queue: MemoryQueue<B::InnerBackend>,
    optimizer: O,
    device: B::Device,
    epochs_completed: usize,
    trained_steps: u64,
    skipped_steps: u64,
    /// Index passed to [`BatchSource::batch_at`] for the next queue refresh.
    refresh_cursor: usize,
}

impl<B: AutodiffBackend, O: Optimizer<Encoder<B>, B>> TrainingSession<B, O> {
    /// Build student and teacher from `encoder_config`, copy the student into
    /// the teacher, then load any checkpoint found in `config.checkpoint_dir`.
    ///
    /// The queue starts empty; [`Self::fit`] fills it, or call
    /// [`Self::initialize_queue`] before driving [`Self::train_step`] manually.
    pub fn new(
        config: SupConTrainingConfig,
        encoder_config: &EncoderConfig,
        optimizer: O,
        device: &B::Device,
    ) -> Result<Self, SupConError> {
        config.validate()?;

        let student = encoder_config.init::<B>(device);
        let teacher = momentum_update(
            &student.valid(),
            encoder_config.init::<B::InnerBackend>(device),
            0.0,
        )?;
        let queue = MemoryQueue::new(config.num_classes, encoder_config.d_embed);

        Self {
            config,
            student,
            teacher,
            queue,
            optimizer,
            device: device.clone(),
            epochs_completed: 0,
            trained_steps: 0,
            skipped_steps: 0,
            refresh_cursor: 0,
        }
        .restore_checkpoint()
    }

    fn restore_checkpoint(mut self) -> Result<Self, SupConError> {
        let dir = PathBuf::from(&self.config.checkpoint_dir);
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();

        let path = dir.join(format!("{STUDENT_FILE}.mpk"));
        if path.exists() {
            self.student = self
                .student
                .load_file(dir.join(STUDENT_FILE), &recorder, &self.device)
                .map_err(|e| load_error(&path, e))?;
            tracing::info!(path = %path.display(), "Loaded student checkpoint");
        } else {
            tracing::debug!(path = %path.display(), "No student checkpoint");
        }

        let path = dir.join(format!("{TEACHER_FILE}.mpk"));
        if path.exists() {
            self.teacher = self
                .teacher
                .load_file(dir.join(TEACHER_FILE), &recorder, &self.device)
                .map_err(|e| load_error(&path, e))?;
            tracing::info!(path = %path.display(), "Loaded teacher checkpoint");
        } else {
            tracing::debug!(path = %path.display(), "No teacher checkpoint");
        }

        let path = dir.join(format!("{OPTIMIZER_FILE}.mpk"));
        if path.exists() {
            let record: O::Record =
                Recorder::<B>::load(&recorder, dir.join(OPTIMIZER_FILE), &self.device)
                    .map_err(|e| load_error(&path, e))?;
            self.optimizer = self.optimizer.load_record(record);
            tracing::info!(path = %path.display(), "Restored optimizer state");
        } else {
            tracing::debug!(path = %path.display(), "No optimizer checkpoint");
        }

        let path = dir.join(META_FILE);
        if path.exists() {
            let meta: CheckpointMeta = serde_json::from_reader(std::fs::File::open(&path)?)?;
            self.epochs_completed = meta.epoch;
            self.trained_steps = meta.trained_steps;
            self.skipped_steps = meta.skipped_steps;
            tracing::info!(
                epoch = meta.epoch,
                trained_steps = meta.trained_steps,
                skipped_steps = meta.skipped_steps,
                "Resuming from checkpoint"
            );
        } else {
            tracing::debug!(path = %path.display(), "No checkpoint metadata");
        }

        Ok(self)
    }

    pub fn config(&self) -> &SupConTrainingConfig {
        &self.config
    }

    pub fn student(&self) -> &Encoder<B> {
        &self.student
    }

    pub fn teacher(&self) -> &Encoder<B::InnerBackend> {
        &self.teacher
    }

    pub fn queue(&self) -> &MemoryQueue<B::InnerBackend> {
        &self.queue
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// Last epoch whose checkpoint was saved or restored.
    pub fn epochs_completed(&self) -> usize {
        self.epochs_completed
    }

    pub fn trained_steps(&self) -> u64 {
        self.trained_steps
    }

    pub fn skipped_steps(&self) -> u64 {
        self.skipped_steps
    }

    /// Empty the queue and fill it with the first `queue_size` batches of a
    /// fresh pass over `source`. Step-time refreshes continue from the batch
    /// after those.
    pub fn initialize_queue<S: BatchSource<B> + ?Sized>(
        &mut self,
        source: &S,
    ) -> Result<(), SupConError> {
        self.queue.clear();
        self.enqueue(source, self.config.queue_size)?;
        self.refresh_cursor = self.config.queue_size;
        tracing::info!(
            depth = self.queue.depth(),
            embeddings = self.queue.len(),
            classes = self.queue.num_classes(),
            "Memory queue initialized"
        );
        Ok(())
    }

    /// Run the first `size` batches of a fresh pass over `source` through the
    /// teacher and append them to the queue.
    ///
    /// Nothing is appended unless all `size` batches were embedded.
    ///
    /// # Errors
    /// - [`SupConError::SourceExhausted`] if the pass yields fewer than `size` batches
    /// - [`SupConError::DeviceMismatch`] / [`SupConError::LabelOutOfRange`] for a bad batch
    pub fn enqueue<S: BatchSource<B> + ?Sized>(
        &mut self,
        source: &S,
        size: usize,
    ) -> Result<(), SupConError> {
        let mut pending = Vec::with_capacity(size);
        for batch in source.iter().take(size) {
            pending.push(self.embed_with_teacher(batch)?);
        }
        if pending.len() < size {
            return Err(SupConError::SourceExhausted {
                requested: size,
                produced: pending.len(),
            });
        }

        for (embeddings, labels) in pending {
            self.queue.push_batch(embeddings, &labels)?;
        }
        Ok(())
    }

    /// Drop the `size` oldest batches from every class slot.
    pub fn dequeue(&mut self, size: usize) -> Result<(), SupConError> {
        self.queue.dequeue(size)
    }

    /// Push the teacher embedding of the next refresh batch and drop the
    /// oldest batch. Refresh batches cycle through `source` across passes,
    /// starting after the batches [`Self::initialize_queue`] used.
    fn rotate_queue<S: BatchSource<B> + ?Sized>(&mut self, source: &S) -> Result<(), SupConError> {
        let batch = source
            .batch_at(self.refresh_cursor)
            .ok_or(SupConError::SourceExhausted {
                requested: 1,
                produced: 0,
            })?;
        let (embeddings, labels) = self.embed_with_teacher(batch)?;
        self.queue.push_batch(embeddings, &labels)?;
        self.queue.dequeue(1)?;
        self.refresh_cursor += 1;
        Ok(())
    }

    /// One optimization step on `batch`, followed by a queue rotation with the
    /// next refresh batch from `source` and a momentum update of the teacher.
    ///
    /// When the label mask of `batch` against the current queue sums to zero
    /// the step is skipped: no optimizer step and no momentum update, but the
    /// queue still rotates so a queue holding only class 0 cannot stall
    /// training.
    pub fn train_step<S: BatchSource<B> + ?Sized>(
        &mut self,
        source: &S,
        batch: LabeledBatch<B>,
    ) -> Result<StepOutcome, SupConError> {
        self.check_device(&batch)?;
        let labels = tensor_to_labels(batch.labels.clone());
        self.check_labels(&labels)?;
        if self.queue.is_empty() {
            return Err(SupConError::EmptyQueue);
        }

        let weight = label_mask_weight(&labels, self.queue.label_sum());
        if weight == 0.0 {
            self.skipped_steps += 1;
            tracing::warn!(
                step = self.trained_steps + self.skipped_steps,
                skipped_steps = self.skipped_steps,
                batch_size = labels.len(),
                "Step skipped (label mask sums to zero)"
            );
            self.rotate_queue(source)?;
            return Ok(StepOutcome::Skipped);
        }

        let (queue_embeddings, queue_labels) = self.queue.flatten()?;
        let embeddings = self.student.forward(batch.images);
        let loss = supervised_contrastive_loss(
            embeddings,
            batch.labels,
            Tensor::from_inner(queue_embeddings),
            Tensor::from_inner(queue_labels),
            self.config.temperature,
        );
        let loss_value = tensor_to_f64(loss.clone());

        let grads = GradientsParams::from_grads(loss.backward(), &self.student);
        let grads = clip_gradient_values(&self.student, grads, self.config.grad_clip_value);
        self.student = self.optimizer.step(self.config.lr, self.student.clone(), grads);

        self.rotate_queue(source)?;
        self.teacher = momentum_update(
            &self.student.valid(),
            self.teacher.clone(),
            self.config.momentum,
        )?;

        self.trained_steps += 1;
        Ok(StepOutcome::Trained { loss: loss_value })
    }

    /// One pass over `source`.
    pub fn train_epoch<S: BatchSource<B> + ?Sized>(
        &mut self,
        source: &S,
        epoch: usize,
    ) -> Result<EpochMetrics, SupConError> {
        let start = Instant::now();
        let pb = ProgressBar::new(source.num_batches() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} epoch {prefix} [{elapsed_precise}] \
                     [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
                )
                .expect("valid progress bar template")
                .progress_chars("=> "),
        );
        pb.set_prefix(epoch.to_string());

        let mut running = RunningAvg::new();
        let mut trained_steps = 0;
        let mut skipped_steps = 0;

        for (step, batch) in source.iter().enumerate() {
            match self.train_step(source, batch)? {
                StepOutcome::Trained { loss } => {
                    running.update(loss);
                    trained_steps += 1;
                }
                StepOutcome::Skipped => skipped_steps += 1,
            }
            pb.inc(1);
            if self.config.log_interval > 0 && (step + 1) % self.config.log_interval == 0 {
                pb.set_message(running.display());
            }
        }
        pb.finish_with_message(running.display());

        Ok(EpochMetrics {
            epoch,
            mean_loss: running.mean().unwrap_or(f64::NAN),
            trained_steps,
            skipped_steps,
            elapsed_secs: start.elapsed().as_secs_f64(),
        })
    }

    /// Fill the queue, then train from the epoch after the last checkpoint up
    /// to `total_epochs`, saving a checkpoint after every epoch.
    ///
    /// `total_epochs` counts epochs across resumed runs. A session already at
    /// `total_epochs` returns an empty history without touching the queue.
    pub fn fit<S: BatchSource<B> + ?Sized>(
        &mut self,
        source: &S,
    ) -> Result<Vec<EpochMetrics>, SupConError> {
        let first_epoch = self.epochs_completed + 1;
        if first_epoch > self.config.total_epochs {
            tracing::info!(
                epochs_completed = self.epochs_completed,
                total_epochs = self.config.total_epochs,
                "Nothing to train; raise total_epochs to continue from this checkpoint"
            );
            return Ok(Vec::new());
        }

        self.initialize_queue(source)?;
        tracing::info!(
            first_epoch,
            total_epochs = self.config.total_epochs,
            batches = source.num_batches(),
            lr = self.config.lr,
            temperature = self.config.temperature,
            momentum = self.config.momentum,
            "Starting training"
        );

        let train_start = Instant::now();
        let mut history = Vec::with_capacity(self.config.total_epochs + 1 - first_epoch);
        for epoch in first_epoch..=self.config.total_epochs {
            let metrics = self.train_epoch(source, epoch)?;
            let warnings = metrics.health_check();
            if !warnings.is_empty() {
                tracing::warn!(epoch, "Health check warnings: {:?}", warnings);
            }
            tracing::info!(
                epoch,
                loss = format!("{:.4}", metrics.mean_loss),
                trained_steps = metrics.trained_steps,
                skipped_steps = metrics.skipped_steps,
                elapsed_secs = format!("{:.1}", metrics.elapsed_secs),
                "Epoch finished"
            );
            self.save_checkpoint(epoch)?;
            history.push(metrics);
        }

        tracing::info!(
            trained_steps = self.trained_steps,
            skipped_steps = self.skipped_steps,
            elapsed_secs = format!("{:.1}", train_start.elapsed().as_secs_f64()),
            "Training complete"
        );
        Ok(history)
    }

    /// Overwrite the student, teacher, optimizer and metadata files in the
    /// checkpoint directory.
    pub fn save_checkpoint(&mut self, epoch: usize) -> Result<(), SupConError> {
        let dir = PathBuf::from(&self.config.checkpoint_dir);
        std::fs::create_dir_all(&dir)?;
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();

        self.student
            .clone()
            .save_file(dir.join(STUDENT_FILE), &recorder)
            .map_err(|e| save_error("student", epoch, e))?;
        self.teacher
            .clone()
            .save_file(dir.join(TEACHER_FILE), &recorder)
            .map_err(|e| save_error("teacher", epoch, e))?;
        Recorder::<B>::record(&recorder, self.optimizer.to_record(), dir.join(OPTIMIZER_FILE))
            .map_err(|e| save_error("optimizer", epoch, e))?;

        serde_json::to_writer_pretty(
            std::fs::File::create(dir.join(META_FILE))?,
            &CheckpointMeta {
                epoch,
                trained_steps: self.trained_steps,
                skipped_steps: self.skipped_steps,
            },
        )?;

        self.epochs_completed = epoch;
        tracing::info!(
            epoch,
            dir = %dir.display(),
            "Checkpoint saved (student + teacher + optimizer + meta)"
        );
        Ok(())
    }

    /// Validate `batch` and run it through the teacher.
    fn embed_with_teacher(
        &self,
        batch: LabeledBatch<B>,
    ) -> Result<(Tensor<B::InnerBackend, 2>, Vec<i64>), SupConError> {
        self.check_device(&batch)?;
        let labels = tensor_to_labels(batch.labels);
        self.check_labels(&labels)?;
        Ok((self.teacher.forward(batch.images.inner()), labels))
    }

    fn check_device(&self, batch: &LabeledBatch<B>) -> Result<(), SupConError> {
        let found = batch.images.device();
        if found != self.device {
            return Err(SupConError::DeviceMismatch {
                expected: format!("{:?}", self.device),
                found: format!("{found:?}"),
            });
        }
        Ok(())
    }

    fn check_labels(&self, labels: &[i64]) -> Result<(), SupConError> {
        let num_classes = self.config.num_classes;
        match labels.iter().find(|&&l| l < 0 || l as usize >= num_classes) {
            Some(&label) => Err(SupConError::LabelOutOfRange { label, num_classes }),
            None => Ok(()),
        }
    }
}

/// Load an encoder from a checkpoint file written by [`TrainingSession::save_checkpoint`].
///
/// Creates a fresh encoder from config, then loads saved weights on top.
pub fn load_encoder<B: Backend>(
    path: &Path,
    config: &EncoderConfig,
    device: &B::Device,
) -> Result<Encoder<B>, SupConError> {
    config
        .init::<B>(device)
        .load_file(path, &NamedMpkFileRecorder::<FullPrecisionSettings>::new(), device)
        .map_err(|e| load_error(path, e))
}

fn load_error(path: &Path, e: impl std::fmt::Display) -> SupConError {
    SupConError::Checkpoint(format!("Failed to load {}: {e}", path.display()))
}

fn save_error(what: &str, epoch: usize, e: impl std::fmt::Display) -> SupConError {
    SupConError::Checkpoint(format!("Failed to save {what} at epoch {epoch}: {e}"))
}
