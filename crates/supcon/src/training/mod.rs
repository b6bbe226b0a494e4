//! Supervised contrastive training: memory queue, momentum synchronization,
//! gradient clipping, the contrastive loss, batch sources, metrics and the
//! AdamW training session.

pub mod clipping;
pub mod data;
pub mod loss;
pub mod metrics;
pub mod momentum;
pub mod queue;
pub mod source;
pub mod trainer;

