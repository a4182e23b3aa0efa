// gamedetect/core/classifier/src/command.rs

//! Process-backed classifier: an external model runner scores one image per call.

use crate::image::detect_format;
use crate::labels::Labels;
use crate::{Classifier, ClassifierError, ModelArtifacts, Prediction};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::{debug, info, warn};

/// How to invoke the model runner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Runner executable. A bare name is resolved through `PATH` at call time.
    pub program: PathBuf,
    /// Arguments placed before `--graph <path> --labels <path>`
    #[serde(default)]
    pub args: Vec<String>,
}

impl RunnerConfig {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    fn is_path_like(&self) -> bool {
        self.program.components().count() > 1 || self.program.is_absolute()
    }
}

/// Classifier that pipes each image to an external runner process.
///
/// The runner receives the encoded image on stdin and prints one score per
/// label, either as a JSON array or whitespace separated.
pub struct CommandClassifier {
    runner: RunnerConfig,
    artifacts: ModelArtifacts,
    labels: Labels,
    closed: bool,
}

impl CommandClassifier {
    /// Validate the artifacts and runner and build the handle
    pub fn open(runner: RunnerConfig, artifacts: ModelArtifacts) -> Result<Self, ClassifierError> {
        let graph = &artifacts.graph_path;
        let metadata = std::fs::metadata(graph).map_err(|e| ClassifierError::ModelLoad {
            path: graph.clone(),
            reason: e.to_string(),
        })?;
        if !metadata.is_file() || metadata.len() == 0 {
            return Err(ClassifierError::ModelLoad {
                path: graph.clone(),
                reason: "graph is not a non-empty file".to_string(),
            });
        }

        let labels = Labels::load(&artifacts.labels_path)?;

        if runner.is_path_like() && !runner.program.exists() {
            return Err(ClassifierError::ModelLoad {
                path: graph.clone(),
                reason: format!("model runner not found at {:?}", runner.program),
            });
        }

        info!(
            "Loaded model graph {:?} ({} bytes) with {} labels",
            graph,
            metadata.len(),
            labels.len()
        );

        Ok(Self {
            runner,
            artifacts,
            labels,
            closed: false,
        })
    }

    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    pub fn artifacts(&self) -> &ModelArtifacts {
        &self.artifacts
    }

    fn run(&self, image: &[u8]) -> Result<Vec<f32>, ClassifierError> {
        let mut child = Command::new(&self.runner.program)
            .args(&self.runner.args)
            .arg("--graph")
            .arg(&self.artifacts.graph_path)
            .arg("--labels")
            .arg(&self.artifacts.labels_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                ClassifierError::Inference(format!(
                    "failed to start model runner {:?}: {}",
                    self.runner.program, e
                ))
            })?;

        // Feed stdin from a separate thread so a chatty runner cannot block on a full stdout pipe.
        let writer = child.stdin.take().map(|mut stdin| {
            let payload = image.to_vec();
            std::thread::spawn(move || stdin.write_all(&payload))
        });

        let output = child.wait_with_output()?;

        if let Some(writer) = writer {
            match writer.join() {
                Ok(Err(e)) => debug!("Model runner closed stdin early: {}", e),
                Err(_) => warn!("Model runner stdin writer panicked"),
                Ok(Ok(())) => {}
            }
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ClassifierError::Inference(format!(
                "model runner exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        parse_scores(&String::from_utf8_lossy(&output.stdout))
    }
}

impl Classifier for CommandClassifier {
    fn classify(&mut self, image: &[u8]) -> Result<Prediction, ClassifierError> {
        if self.closed {
            return Err(ClassifierError::Closed);
        }
        if image.is_empty() {
            return Err(ClassifierError::InvalidImage("empty image".to_string()));
        }
        let format = detect_format(image).ok_or_else(|| {
            ClassifierError::InvalidImage("unrecognised image format".to_string())
        })?;

        debug!("Classifying {} byte {} image", image.len(), format.as_str());

        let scores = self.run(image)?;
        self.labels.decode(&scores)
    }

    fn close(&mut self) -> Result<(), ClassifierError> {
        if !self.closed {
            self.closed = true;
            info!("Released model graph {:?}", self.artifacts.graph_path);
        }
        Ok(())
    }
}

/// Parse runner output: JSON array first, whitespace separated floats second
fn parse_scores(output: &str) -> Result<Vec<f32>, ClassifierError> {
    let trimmed = output.trim();

    if let Ok(scores) = serde_json::from_str::<Vec<f32>>(trimmed) {
        return Ok(scores);
    }

    let values: Result<Vec<f32>, _> = trimmed
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(str::parse::<f32>)
        .collect();

    match values {
        Ok(scores) if !scores.is_empty() => Ok(scores),
        _ => Err(ClassifierError::Inference(format!(
            "unparseable model runner output: {:?}",
            truncate(trimmed, 120)
        ))),
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
