// gamedetect/core/service/src/lib.rs

//! Coordination service for a single non-reentrant inference handle.
//!
//! Live classification requests and the background self-test sweep share
//! one [`Classifier`] behind one FIFO lock. The lock also guards the stored
//! self-test report, so a reader never observes a half-written sweep.

pub mod error;
pub mod selftest;

pub use error::{Result, ServiceError};
pub use selftest::{
    expected_label, labels_match, Corpus, DirCorpus, Outcome, SelfTestReport, SelfTestResult,
    SelfTestSummary, SweepStatus,
};

use chrono::Utc;
use gamedetect_classifier::{Classifier, ClassifierError, ModelArtifacts, Prediction};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Deployment settings consumed once at construction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceSettings {
    /// Deployment tag, e.g. `dev` or `production`
    pub environment: String,
    /// Canonical host name served in production
    pub domain: String,
    /// Upper bound on one classification, lock wait included
    pub classify_timeout: Option<Duration>,
}

impl ServiceSettings {
    pub fn new(environment: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            domain: domain.into(),
            classify_timeout: None,
        }
    }

    pub fn with_classify_timeout(mut self, timeout: Duration) -> Self {
        self.classify_timeout = Some(timeout);
        self
    }

    /// Any environment tag containing `prod` counts as production
    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase().contains("prod")
    }
}

/// Everything the coordination lock protects
struct State {
    handle: Option<Box<dyn Classifier>>,
    report: Option<SelfTestReport>,
}

/// Owns the inference handle and serializes every use of it
pub struct Service {
    settings: ServiceSettings,
    state: Arc<Mutex<State>>,
    status: watch::Sender<SweepStatus>,
}

impl Service {
    /// Load the inference handle through `load` and build the service.
    ///
    /// A loader failure is fatal and surfaces as [`ServiceError::ResourceLoad`].
    pub fn new<C, F>(settings: ServiceSettings, artifacts: &ModelArtifacts, load: F) -> Result<Self>
    where
        C: Classifier + 'static,
        F: FnOnce(&ModelArtifacts) -> std::result::Result<C, ClassifierError>,
    {
        let classifier = load(artifacts).map_err(|e| {
            error!("Failed to load model from {:?}: {}", artifacts.graph_path, e);
            ServiceError::ResourceLoad(e)
        })?;

        info!(
            environment = %settings.environment,
            domain = %settings.domain,
            "Inference resource loaded from {:?}",
            artifacts.graph_path
        );

        Ok(Self::with_classifier(settings, classifier))
    }

    /// Wrap an already loaded handle
    pub fn with_classifier(settings: ServiceSettings, classifier: impl Classifier + 'static) -> Self {
        let (status, _) = watch::channel(SweepStatus::Idle);
        Self {
            settings,
            state: Arc::new(Mutex::new(State {
                handle: Some(Box::new(classifier)),
                report: None,
            })),
            status,
        }
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    pub fn environment(&self) -> &str {
        &self.settings.environment
    }

    pub fn domain(&self) -> &str {
        &self.settings.domain
    }

    /// Classify one image under the coordination lock.
    ///
    /// Handle errors are returned as [`ServiceError::Classification`] and are
    /// never retried. With a configured timeout the caller gives up with
    /// [`ServiceError::Timeout`]; the lock is then held only until the
    /// in-flight call on the blocking pool returns.
    pub async fn classify(&self, image: Vec<u8>) -> Result<Prediction> {
        let result = match self.settings.classify_timeout {
            Some(limit) => tokio::time::timeout(limit, self.classify_exclusive(image))
                .await
                .map_err(|_| {
                    warn!("Classification timed out after {:?}", limit);
                    ServiceError::Timeout(limit)
                })?,
            None => self.classify_exclusive(image).await,
        };

        result.map_err(ServiceError::Classification)
    }

    /// Run one classify call with the lock held.
    ///
    /// The owned guard moves into the blocking closure and is released when
    /// the call returns or unwinds, whatever happens to the awaiting caller.
    async fn classify_exclusive(&self, image: Vec<u8>) -> std::result::Result<Prediction, ClassifierError> {
        let mut guard = self.state.clone().lock_owned().await;

        let task = tokio::task::spawn_blocking(move || match guard.handle.as_mut() {
            Some(handle) => handle.classify(&image),
            None => Err(ClassifierError::Closed),
        });

        task.await.unwrap_or_else(|e| {
            Err(ClassifierError::Inference(format!(
                "classifier task aborted: {}",
                e
            )))
        })
    }

    /// Release the inference handle.
    ///
    /// The first call closes the handle; later calls are no-ops. Any
    /// classification after close fails with a closed error.
    pub async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let Some(mut handle) = state.handle.take() else {
            debug!("Inference resource already closed");
            return Ok(());
        };
        drop(state);

        let closed = tokio::task::spawn_blocking(move || handle.close())
            .await
            .unwrap_or_else(|e| Err(ClassifierError::Inference(format!("close task aborted: {}", e))));

        match closed {
            Ok(()) => {
                info!("Inference resource released");
                Ok(())
            }
            Err(e) => {
                error!("Failed to release inference resource: {}", e);
                Err(ServiceError::ResourceClose(e))
            }
        }
    }

    /// Whether the handle has been released
    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.handle.is_none()
    }

    /// Run the sweep over `corpus` on a separate task.
    ///
    /// The returned handle resolves to the sweep outcome; completion is also
    /// observable through [`Service::subscribe_self_test`].
    pub fn spawn_self_test<P>(self: &Arc<Self>, corpus: P) -> JoinHandle<Result<SelfTestReport>>
    where
        P: Corpus + 'static,
    {
        // Mark the sweep as started before the task is scheduled so waiters never see `Idle`.
        self.status
            .send_replace(SweepStatus::Running { processed: 0, total: 0 });
        let service = Arc::clone(self);
        tokio::spawn(async move { service.run_self_test(&corpus).await })
    }

    /// Classify every corpus image once, in enumeration order.
    ///
    /// Unreadable images and failed classifications are recorded and the
    /// sweep moves on. Only a corpus that cannot be enumerated aborts it.
    pub async fn run_self_test(&self, corpus: &dyn Corpus) -> Result<SelfTestReport> {
        let started_at = Utc::now();

        let entries = match corpus.entries().await {
            Ok(entries) => entries,
            Err(e) => {
                error!("Self-test corpus unavailable: {}", e);
                self.status.send_replace(SweepStatus::Aborted {
                    error: e.to_string(),
                });
                return Err(ServiceError::SelfTestCorpus(e));
            }
        };

        let total = entries.len();
        info!("Starting self-test sweep over {} images", total);
        self.status.send_replace(SweepStatus::Running { processed: 0, total });

        let mut results = Vec::with_capacity(total);
        for (index, name) in entries.into_iter().enumerate() {
            let result = self.self_test_step(corpus, name).await;
            results.push(result);
            self.status.send_replace(SweepStatus::Running {
                processed: index + 1,
                total,
            });
        }

        let summary = SelfTestSummary::from_results(&results);
        let report = SelfTestReport {
            started_at,
            finished_at: Utc::now(),
            summary,
            results,
        };

        self.state.lock().await.report = Some(report.clone());
        self.status.send_replace(SweepStatus::Completed { summary });

        if summary.all_passed() {
            info!("Self-test passed: {}/{} images", summary.passed, summary.total);
        } else {
            warn!(
                passed = summary.passed,
                failed = summary.failed,
                read_errors = summary.read_errors,
                "Self-test finished with failures"
            );
        }

        Ok(report)
    }

    async fn self_test_step(&self, corpus: &dyn Corpus, image: String) -> SelfTestResult {
        let expected = expected_label(&image);

        let bytes = match corpus.read(&image).await {
            Ok(bytes) => bytes,
            Err(source) => {
                let err = ServiceError::SelfTestRead {
                    image: image.clone(),
                    source,
                };
                warn!("{}", err);
                return SelfTestResult {
                    image,
                    expected,
                    label: None,
                    confidence: None,
                    outcome: Outcome::ReadError,
                    error: Some(err.to_string()),
                };
            }
        };

        match self.classify_exclusive(bytes).await {
            Ok(prediction) => {
                let outcome = if labels_match(&expected, &prediction.label) {
                    Outcome::Pass
                } else {
                    Outcome::Fail
                };
                debug!(
                    "Self-test {}: expected {}, got {} ({:.3})",
                    image, expected, prediction.label, prediction.confidence
                );
                SelfTestResult {
                    image,
                    expected,
                    label: Some(prediction.label),
                    confidence: Some(prediction.confidence),
                    outcome,
                    error: None,
                }
            }
            Err(e) => {
                warn!("Self-test classification of {} failed: {}", image, e);
                SelfTestResult {
                    image,
                    expected,
                    label: None,
                    confidence: None,
                    outcome: Outcome::Fail,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Most recent completed sweep, if any
    pub async fn self_test_report(&self) -> Option<SelfTestReport> {
        self.state.lock().await.report.clone()
    }

    /// Results of the most recent completed sweep
    pub async fn self_test_results(&self) -> Vec<SelfTestResult> {
        self.self_test_report()
            .await
            .map(|report| report.results)
            .unwrap_or_default()
    }

    pub fn self_test_status(&self) -> SweepStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_self_test(&self) -> watch::Receiver<SweepStatus> {
        self.status.subscribe()
    }

    /// Wait until the current sweep completes or aborts.
    ///
    /// Returns immediately with the stored state when no sweep is running.
    pub async fn wait_for_self_test(&self) -> SweepStatus {
        let mut rx = self.status.subscribe();
        let status = match rx
            .wait_for(|status| status.is_finished() || *status == SweepStatus::Idle)
            .await
        {
            Ok(status) => status.clone(),
            Err(_) => self.self_test_status(),
        };
        status
    }
}
