// gamedetect/core/service/src/selftest.rs

//! Known-answer test corpus and the records a sweep produces.
//!
//! Each corpus entry is an encoded image whose file name carries the label
//! the model is expected to produce (`fortnite-2.jpg` expects `fortnite`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Source of labelled test images
#[async_trait]
pub trait Corpus: Send + Sync {
    /// Image identities in the order the sweep must visit them.
    async fn entries(&self) -> io::Result<Vec<String>>;

    /// Encoded bytes of one image.
    async fn read(&self, name: &str) -> io::Result<Vec<u8>>;
}

/// Corpus backed by a flat directory of image files.
///
/// Entry names are the lossy UTF-8 form of the file name; reads go through
/// the real path recorded at enumeration, so non-UTF-8 names stay readable.
#[derive(Debug)]
pub struct DirCorpus {
    root: PathBuf,
    paths: Mutex<HashMap<String, PathBuf>>,
}

impl DirCorpus {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            paths: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl Corpus for DirCorpus {
    async fn entries(&self) -> io::Result<Vec<String>> {
        let mut dir = fs::read_dir(&self.root).await?;
        let mut paths = HashMap::new();

        while let Some(entry) = dir.next_entry().await? {
            let file_name = entry.file_name();
            if file_name.to_string_lossy().starts_with('.') {
                continue;
            }
            let is_dir = entry.file_type().await.map(|t| t.is_dir());
            if is_subdirectory(&entry.path(), is_dir) {
                continue;
            }

            let mut name = file_name.to_string_lossy().into_owned();
            if paths.contains_key(&name) {
                name = format!("{:?}", file_name);
            }
            paths.insert(name, entry.path());
        }

        let mut names: Vec<String> = paths.keys().cloned().collect();
        names.sort();
        debug!("Enumerated {} self-test images in {:?}", names.len(), self.root);

        *self.paths.lock() = paths;
        Ok(names)
    }

    async fn read(&self, name: &str) -> io::Result<Vec<u8>> {
        let path = self
            .paths
            .lock()
            .get(name)
            .cloned()
            .unwrap_or_else(|| self.root.join(name));
        fs::read(path).await
    }
}

/// Symlinks are kept even when dangling, and so are entries that cannot be
/// stat'ed; the read step reports them.
fn is_subdirectory(path: &Path, is_dir: io::Result<bool>) -> bool {
    match is_dir {
        Ok(is_dir) => is_dir,
        Err(e) => {
            debug!("Cannot stat {:?}: {}", path, e);
            false
        }
    }
}

/// Label a test image is expected to classify as.
///
/// Uses the file stem with one trailing numeric disambiguator removed, so
/// `cat.jpg`, `cat-2.jpg` and `cat_10.png` all expect `cat`.
pub fn expected_label(name: &str) -> String {
    let stem = Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());

    if let Some(idx) = stem.rfind(|c: char| c == '-' || c == '_') {
        let (head, tail) = stem.split_at(idx);
        let digits = &tail[1..];
        if !head.is_empty() && !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
            return head.to_string();
        }
    }

    stem
}

/// Compare labels ignoring case and separator style.
pub fn labels_match(expected: &str, produced: &str) -> bool {
    normalize(expected) == normalize(produced)
}

fn normalize(label: &str) -> String {
    label
        .split(|c: char| c == '_' || c == '-' || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Pass,
    Fail,
    ReadError,
}

/// Outcome of classifying one known test image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelfTestResult {
    pub image: String,
    pub expected: String,
    pub label: Option<String>,
    pub confidence: Option<f32>,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SelfTestResult {
    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Pass
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelfTestSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub read_errors: usize,
}

impl SelfTestSummary {
    pub fn from_results(results: &[SelfTestResult]) -> Self {
        results.iter().fold(
            Self {
                total: results.len(),
                ..Self::default()
            },
            |mut summary, result| {
                match result.outcome {
                    Outcome::Pass => summary.passed += 1,
                    Outcome::Fail => summary.failed += 1,
                    Outcome::ReadError => summary.read_errors += 1,
                }
                summary
            },
        )
    }

    pub fn all_passed(&self) -> bool {
        self.passed == self.total
    }
}

/// Results of one complete sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelfTestReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub summary: SelfTestSummary,
    pub results: Vec<SelfTestResult>,
}

/// Progress of the self-test sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SweepStatus {
    Idle,
    Running { processed: usize, total: usize },
    Completed { summary: SelfTestSummary },
    Aborted { error: String },
}

impl SweepStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, SweepStatus::Completed { .. } | SweepStatus::Aborted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    #[test]
    fn test_expected_label() {
        assert_eq!(expected_label("cat.jpg"), "cat");
        assert_eq!(expected_label("fortnite-2.png"), "fortnite");
        assert_eq!(expected_label("rocket_league_10.jpeg"), "rocket_league");
        assert_eq!(expected_label("call-of-duty.jpg"), "call-of-duty");
        assert_eq!(expected_label("halo-3b.jpg"), "halo-3b");
        assert_eq!(expected_label("-7.jpg"), "-7");
        assert_eq!(expected_label("noext"), "noext");
    }

    #[test]
    fn test_labels_match() {
        assert!(labels_match("rocket_league", "Rocket League"));
        assert!(labels_match("call-of-duty", "call of  duty"));
        assert!(!labels_match("cat", "dog"));
        assert!(!labels_match("cat", ""));
    }

    #[test]
    fn test_summary_counts() {
        let result = |outcome| SelfTestResult {
            image: "x.jpg".to_string(),
            expected: "x".to_string(),
            label: None,
            confidence: None,
            outcome,
            error: None,
        };
        let results = vec![
            result(Outcome::Pass),
            result(Outcome::Pass),
            result(Outcome::Fail),
            result(Outcome::ReadError),
        ];

        let summary = SelfTestSummary::from_results(&results);
        assert_eq!(
            summary,
            SelfTestSummary {
                total: 4,
                passed: 2,
                failed: 1,
                read_errors: 1
            }
        );
        assert!(!summary.all_passed());
        assert!(SelfTestSummary::from_results(&[]).all_passed());
    }

    #[test]
    fn test_status_serialization() {
        let status = SweepStatus::Running {
            processed: 1,
            total: 3,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "running");
        assert_eq!(json["total"], 3);

        let json = serde_json::to_value(Outcome::ReadError).unwrap();
        assert_eq!(json, "read_error");
    }

    #[tokio::test]
    async fn test_dir_corpus_sorted_and_filtered() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("dog.jpg"), b"d").unwrap();
        std::fs::write(dir.path().join("cat.jpg"), b"c").unwrap();
        std::fs::write(dir.path().join(".gitkeep"), b"").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let corpus = DirCorpus::new(dir.path());
        assert_eq!(corpus.entries().await.unwrap(), vec!["cat.jpg", "dog.jpg"]);
        assert_eq!(corpus.read("cat.jpg").await.unwrap(), b"c");
        assert!(corpus.read("missing.jpg").await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dir_corpus_reads_non_utf8_names() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = TempDir::new().unwrap();
        let raw = OsStr::from_bytes(b"cat\xff.jpg");
        std::fs::write(dir.path().join(raw), b"meow").unwrap();

        let corpus = DirCorpus::new(dir.path());
        let entries = corpus.entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0], raw.to_string_lossy());
        assert_eq!(corpus.read(&entries[0]).await.unwrap(), b"meow");
    }

    #[test]
    fn test_unstattable_entry_is_kept() {
        let path = Path::new("/corpus/cat.jpg");
        assert!(is_subdirectory(path, Ok(true)));
        assert!(!is_subdirectory(path, Ok(false)));
        assert!(!is_subdirectory(
            path,
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "stat denied"))
        ));
    }

    #[tokio::test]
    async fn test_dir_corpus_missing_root() {
        let corpus = DirCorpus::new("/definitely/not/a/corpus");
        assert!(corpus.entries().await.is_err());
    }

    proptest! {
        #[test]
        fn prop_numbered_copies_share_label(label in "[a-z]{1,8}(_[a-z]{1,8})?", n in 0u32..1000) {
            prop_assert_eq!(expected_label(&format!("{}-{}.jpg", label, n)), label.clone());
            prop_assert_eq!(expected_label(&format!("{}.png", label)), label);
        }
    }
}
