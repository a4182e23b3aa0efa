// gamedetect/core/service/src/error.rs

use gamedetect_classifier::ClassifierError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("failed to load inference resource: {0}")]
    ResourceLoad(#[source] ClassifierError),

    #[error("classification failed: {0}")]
    Classification(#[source] ClassifierError),

    #[error("failed to read self-test image {image}: {source}")]
    SelfTestRead {
        image: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to close inference resource: {0}")]
    ResourceClose(#[source] ClassifierError),

    #[error("classification timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to enumerate self-test corpus: {0}")]
    SelfTestCorpus(#[source] std::io::Error),
}

impl ServiceError {
    /// Underlying classifier error, if any
    pub fn classifier_error(&self) -> Option<&ClassifierError> {
        match self {
            ServiceError::ResourceLoad(e)
            | ServiceError::Classification(e)
            | ServiceError::ResourceClose(e) => Some(e),
            _ => None,
        }
    }

    /// True when the handle has already been released
    pub fn is_closed(&self) -> bool {
        matches!(self.classifier_error(), Some(ClassifierError::Closed))
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
