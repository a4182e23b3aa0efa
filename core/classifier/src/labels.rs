// gamedetect/core/classifier/src/labels.rs

use crate::{ClassifierError, Prediction};
use std::path::Path;

/// Ordered label list. Index `i` names output `i` of the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Labels {
    names: Vec<String>,
}

impl Labels {
    /// Load labels from a file with one label per line. Blank lines are ignored.
    pub fn load(path: &Path) -> Result<Self, ClassifierError> {
        let content = std::fs::read_to_string(path).map_err(|e| ClassifierError::Labels {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Self::parse(&content).ok_or_else(|| ClassifierError::Labels {
            path: path.to_path_buf(),
            reason: "no labels found".to_string(),
        })
    }

    /// Parse a label list, returning `None` when it is empty.
    pub fn parse(content: &str) -> Option<Self> {
        let names: Vec<String> = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();

        if names.is_empty() {
            None
        } else {
            Some(Self { names })
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    /// Pick the highest scoring label.
    ///
    /// The score vector must be index aligned with the label list. NaN
    /// scores never win.
    pub fn decode(&self, scores: &[f32]) -> Result<Prediction, ClassifierError> {
        if scores.len() != self.names.len() {
            return Err(ClassifierError::Inference(format!(
                "model produced {} scores for {} labels",
                scores.len(),
                self.names.len()
            )));
        }

        let best = scores
            .iter()
            .enumerate()
            .filter(|(_, score)| !score.is_nan())
            .max_by(|(_, a), (_, b)| a.total_cmp(b));

        match best {
            Some((index, score)) => Ok(Prediction::new(self.names[index].clone(), *score)),
            None => Err(ClassifierError::Inference(
                "model produced no usable scores".to_string(),
            )),
        }
    }
}
