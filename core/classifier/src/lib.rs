// gamedetect/core/classifier/src/lib.rs

//! Inference resource handle.
//!
//! A [`Classifier`] owns a loaded model together with its evaluation
//! context. Implementations are not required to be reentrant: every method
//! takes `&mut self`, and callers that share a handle must serialize access
//! themselves (see `gamedetect-service`).

pub mod command;
pub mod image;
pub mod labels;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub use command::{CommandClassifier, RunnerConfig};
pub use labels::Labels;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("failed to load model graph {path:?}: {reason}")]
    ModelLoad { path: PathBuf, reason: String },

    #[error("failed to load labels {path:?}: {reason}")]
    Labels { path: PathBuf, reason: String },

    #[error("invalid image: {0}")]
    InvalidImage(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("classifier is closed")]
    Closed,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Label produced for one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
    pub confidence: f32,
}

impl Prediction {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }
}

/// On-disk artifacts a handle is constructed from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelArtifacts {
    /// Serialized model graph
    pub graph_path: PathBuf,
    /// Newline separated label list, index aligned with the model output
    pub labels_path: PathBuf,
}

impl ModelArtifacts {
    pub fn new(graph_path: impl Into<PathBuf>, labels_path: impl Into<PathBuf>) -> Self {
        Self {
            graph_path: graph_path.into(),
            labels_path: labels_path.into(),
        }
    }
}

/// Capability contract for a loaded, stateful model.
pub trait Classifier: Send {
    /// Classify one encoded image.
    fn classify(&mut self, image: &[u8]) -> Result<Prediction, ClassifierError>;

    /// Release the model. Later `classify` calls must fail with
    /// [`ClassifierError::Closed`].
    fn close(&mut self) -> Result<(), ClassifierError>;
}

impl<C: Classifier + ?Sized> Classifier for Box<C> {
    fn classify(&mut self, image: &[u8]) -> Result<Prediction, ClassifierError> {
        (**self).classify(image)
    }

    fn close(&mut self) -> Result<(), ClassifierError> {
        (**self).close()
    }
}
