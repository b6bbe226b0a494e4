//! Supervised contrastive training with a momentum teacher.
//!
//! A student encoder (convolutional backbone + projection head) is trained by
//! gradient descent against a class-indexed memory queue of embeddings that a
//! teacher encoder produces. The teacher is an exponential moving average of
//! the student and never receives gradients.

pub mod error;
pub mod model;
pub mod training;

pub use error::SupConError;
