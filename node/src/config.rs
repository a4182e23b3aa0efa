use gamedetect_api::ApiConfig;
use gamedetect_classifier::{ModelArtifacts, RunnerConfig};
use gamedetect_service::ServiceSettings;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Process configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Deployment configuration
    #[serde(default)]
    pub service: ServiceConfig,

    /// Model artifacts and runner
    #[serde(default)]
    pub model: ModelConfig,

    /// HTTP configuration
    #[serde(default)]
    pub http: HttpConfig,

    /// Startup self-test
    #[serde(default)]
    pub self_test: SelfTestConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Deployment tag; anything containing "prod" enables production mode
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Canonical domain production traffic is redirected to
    #[serde(default)]
    pub domain: String,

    /// Per-request classification bound in seconds (0 disables)
    #[serde(default)]
    pub classify_timeout_secs: u64,
}

fn default_environment() -> String {
    "dev".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            domain: String::new(),
            classify_timeout_secs: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Serialized model graph
    #[serde(default = "default_graph_path")]
    pub graph_path: PathBuf,

    /// Label list, one per line
    #[serde(default = "default_labels_path")]
    pub labels_path: PathBuf,

    /// Model runner executable
    #[serde(default = "default_runner")]
    pub runner: PathBuf,

    /// Extra runner arguments
    #[serde(default)]
    pub runner_args: Vec<String>,
}

fn default_graph_path() -> PathBuf {
    PathBuf::from("model/graph.pb")
}

fn default_labels_path() -> PathBuf {
    PathBuf::from("model/labels.txt")
}

fn default_runner() -> PathBuf {
    PathBuf::from("gamedetect-runner")
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            graph_path: default_graph_path(),
            labels_path: default_labels_path(),
            runner: default_runner(),
            runner_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Static asset directory
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,

    /// Upload size limit in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("static")
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024 // 10MB
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            static_dir: default_static_dir(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfTestConfig {
    /// Run the sweep at startup
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Directory of labelled test images
    #[serde(default = "default_corpus_dir")]
    pub corpus_dir: PathBuf,
}

fn default_true() -> bool {
    true
}

fn default_corpus_dir() -> PathBuf {
    PathBuf::from("static/test")
}

impl Default for SelfTestConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            corpus_dir: default_corpus_dir(),
        }
    }
}

impl AppConfig {
    /// Load from file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) -> anyhow::Result<()> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any variable source
    ///
    /// Recognised: GAMEDETECT_ENV, GAMEDETECT_DOMAIN, PORT, GAMEDETECT_GRAPH,
    /// GAMEDETECT_LABELS, GAMEDETECT_RUNNER.
    pub fn apply_vars<F>(&mut self, var: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(env) = var("GAMEDETECT_ENV") {
            self.service.environment = env;
        }
        if let Some(domain) = var("GAMEDETECT_DOMAIN") {
            self.service.domain = domain;
        }
        if let Some(port) = var("PORT") {
            let port: u16 = port
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid PORT {:?}: {}", port, e))?;
            self.http.listen_addr.set_port(port);
        }
        if let Some(graph) = var("GAMEDETECT_GRAPH") {
            self.model.graph_path = PathBuf::from(graph);
        }
        if let Some(labels) = var("GAMEDETECT_LABELS") {
            self.model.labels_path = PathBuf::from(labels);
        }
        if let Some(runner) = var("GAMEDETECT_RUNNER") {
            self.model.runner = PathBuf::from(runner);
        }
        Ok(())
    }

    /// Validate the configuration, failing closed in production
    pub fn validate(&self) -> Result<(), String> {
        if self.service_settings().is_production() && self.service.domain.trim().is_empty() {
            return Err(format!(
                "FAIL-CLOSED: environment {:?} is production but no canonical domain is configured. \
                 Set [service] domain or GAMEDETECT_DOMAIN.",
                self.service.environment
            ));
        }
        if self.http.max_upload_bytes == 0 {
            return Err("http.max_upload_bytes must be greater than zero".to_string());
        }
        Ok(())
    }

    pub fn service_settings(&self) -> ServiceSettings {
        let settings = ServiceSettings::new(&self.service.environment, &self.service.domain);
        match self.service.classify_timeout_secs {
            0 => settings,
            secs => settings.with_classify_timeout(Duration::from_secs(secs)),
        }
    }

    pub fn artifacts(&self) -> ModelArtifacts {
        ModelArtifacts::new(&self.model.graph_path, &self.model.labels_path)
    }

    pub fn runner(&self) -> RunnerConfig {
        RunnerConfig::new(&self.model.runner).with_args(self.model.runner_args.iter().cloned())
    }

    pub fn api_config(&self) -> ApiConfig {
        ApiConfig {
            listen_addr: self.http.listen_addr,
            static_dir: self.http.static_dir.clone(),
            test_corpus_dir: self
                .self_test
                .enabled
                .then(|| self.self_test.corpus_dir.clone()),
            max_upload_bytes: self.http.max_upload_bytes,
        }
    }
}
