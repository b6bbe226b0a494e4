/// Errors raised by queue maintenance, momentum updates and the training session.
#[derive(Debug, thiserror::Error)]
pub enum SupConError {
    /// A dequeue asked for more batches than a class slot holds.
    #[error("Queue underflow: class {class} holds {available} batches, {requested} requested")]
    QueueUnderflow {
        class: usize,
        requested: usize,
        available: usize,
    },

    /// The queue holds no embeddings for any class.
    #[error("Memory queue is empty")]
    EmptyQueue,

    /// A label outside `[0, num_classes)` was seen.
    #[error("Label {label} out of range for {num_classes} classes")]
    LabelOutOfRange { label: i64, num_classes: usize },

    /// The data source ended before producing the requested number of batches.
    #[error("Data source exhausted: {requested} batches requested, {produced} produced")]
    SourceExhausted { requested: usize, produced: usize },

    /// Tensor dimensions disagree with what the caller promised.
    #[error("Dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: String, found: String },

    /// Student and teacher parameters do not line up.
    #[error("Parameter mismatch at position {index}: student {student:?}, teacher {teacher:?}")]
    ParameterMismatch {
        index: usize,
        student: Vec<usize>,
        teacher: Vec<usize>,
    },

    /// A tensor lives on a different device than the session.
    #[error("Device mismatch: expected {expected}, found {found}")]
    DeviceMismatch { expected: String, found: String },

    /// A configuration value is out of its valid range.
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Saving or loading a burn record failed.
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
