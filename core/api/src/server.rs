// gamedetect/core/api/src/server.rs

use axum::{
    body::{Body, Bytes},
    extract::{FromRequest, Multipart, Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware,
    response::{Html, Json, Response},
    routing::get,
    Router,
};
use gamedetect_service::{DirCorpus, Service};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::metrics;
use crate::redirect::{enforce_canonical_host, remove_trailing_slash};
use crate::types::{ApiError, ClassifyResponse, HealthResponse, SelfTestResponse};

const INDEX_HTML: &str = include_str!("../static/index.html");

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub listen_addr: SocketAddr,
    /// Directory served for any path without a route
    pub static_dir: PathBuf,
    /// Known-answer corpus swept at startup; `None` skips the sweep
    pub test_corpus_dir: Option<PathBuf>,
    /// Largest accepted request body
    pub max_upload_bytes: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            static_dir: PathBuf::from("static"),
            test_corpus_dir: Some(PathBuf::from("static/test")),
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Server state for Axum handlers
#[derive(Clone)]
pub struct AppState {
    service: Arc<Service>,
}

/// Image classification HTTP server
pub struct ApiServer {
    service: Arc<Service>,
    config: ApiConfig,
}

impl ApiServer {
    pub fn new(service: Arc<Service>, config: ApiConfig) -> Self {
        Self { service, config }
    }

    /// Create the Axum router with all endpoints and middleware
    pub fn router(&self) -> Router {
        let state = AppState {
            service: self.service.clone(),
        };

        let router = Router::new()
            .route("/", get(index).post(classify))
            .route("/selftest", get(self_test))
            .route("/health", get(health_check))
            .route("/metrics", get(metrics_handler))
            .fallback_service(ServeDir::new(&self.config.static_dir))
            .layer(axum::extract::DefaultBodyLimit::max(self.config.max_upload_bytes))
            .layer(CompressionLayer::new())
            .layer(SetResponseHeaderLayer::if_not_present(
                header::X_XSS_PROTECTION,
                HeaderValue::from_static("1; mode=block"),
            ))
            .layer(SetResponseHeaderLayer::if_not_present(
                header::X_CONTENT_TYPE_OPTIONS,
                HeaderValue::from_static("nosniff"),
            ))
            .layer(SetResponseHeaderLayer::if_not_present(
                header::X_FRAME_OPTIONS,
                HeaderValue::from_static("SAMEORIGIN"),
            ))
            .layer(CatchPanicLayer::new())
            .layer(TraceLayer::new_for_http())
            .layer(middleware::from_fn(remove_trailing_slash))
            .with_state(state);

        let settings = self.service.settings();
        if settings.is_production() {
            let domain: Arc<str> = Arc::from(settings.domain.as_str());
            router
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn_with_state(domain, enforce_canonical_host))
        } else {
            router
        }
    }

    /// Start the self-test sweep and serve until the process exits
    pub async fn start(self) -> anyhow::Result<()> {
        self.start_with_shutdown(std::future::pending()).await
    }

    /// Start the self-test sweep and serve until `shutdown` resolves
    pub async fn start_with_shutdown<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        if let Some(dir) = &self.config.test_corpus_dir {
            let sweep = self.service.spawn_self_test(DirCorpus::new(dir));
            tokio::spawn(async move {
                match sweep.await {
                    Ok(Ok(report)) => metrics::update_self_test_metrics(&report.summary),
                    Ok(Err(e)) => warn!("Self-test sweep aborted: {}", e),
                    Err(e) => error!("Self-test task failed: {}", e),
                }
            });
        } else {
            info!("No self-test corpus configured, skipping sweep");
        }

        let app = self.router();

        info!(
            "Starting service on {} ({})",
            self.config.listen_addr,
            self.service.environment()
        );

        let listener = tokio::net::TcpListener::bind(self.config.listen_addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("HTTP server stopped");
        Ok(())
    }
}

/// GET / - upload form
async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// POST / - classify the uploaded image
async fn classify(
    State(state): State<AppState>,
    request: Request,
) -> Result<Json<ClassifyResponse>, ApiError> {
    let start = Instant::now();
    let image = read_image(request, &state).await?;
    let size = image.len();

    let result = state.service.classify(image).await;
    let elapsed = start.elapsed();

    match result {
        Ok(prediction) => {
            metrics::record_classification(elapsed.as_secs_f64(), "success");
            info!(
                label = %prediction.label,
                confidence = prediction.confidence,
                bytes = size,
                "Classified image in {}ms",
                elapsed.as_millis()
            );
            Ok(Json(prediction.into()))
        }
        Err(e) => {
            metrics::record_classification(elapsed.as_secs_f64(), "error");
            error!("Classification failed: {}", e);
            Err(e.into())
        }
    }
}

/// Image bytes from a raw body or a multipart form
async fn read_image(request: Request, state: &AppState) -> Result<Vec<u8>, ApiError> {
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("multipart/form-data"))
        .unwrap_or(false);

    let image = if is_multipart {
        let mut multipart = Multipart::from_request(request, state)
            .await
            .map_err(|e| rejection(e.status(), e.body_text()))?;
        image_from_multipart(&mut multipart).await?
    } else {
        Bytes::from_request(request, state)
            .await
            .map_err(|e| rejection(e.status(), e.body_text()))?
            .to_vec()
    };

    if image.is_empty() {
        return Err(ApiError::MissingImage);
    }
    Ok(image)
}

/// First field named `image` or `file`, else the first field carrying a file name
async fn image_from_multipart(multipart: &mut Multipart) -> Result<Vec<u8>, ApiError> {
    let mut fallback = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| rejection(e.status(), e.body_text()))?
    {
        let named = matches!(field.name(), Some("image") | Some("file"));
        let has_file = field.file_name().is_some();
        if !named && (!has_file || fallback.is_some()) {
            continue;
        }

        let bytes = field
            .bytes()
            .await
            .map_err(|e| rejection(e.status(), e.body_text()))?;
        if named {
            return Ok(bytes.to_vec());
        }
        fallback = Some(bytes.to_vec());
    }

    fallback.ok_or(ApiError::MissingImage)
}

fn rejection(status: StatusCode, message: String) -> ApiError {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge
    } else {
        ApiError::BadUpload(message)
    }
}

/// GET /selftest - sweep status and most recent report
async fn self_test(State(state): State<AppState>) -> Json<SelfTestResponse> {
    Json(SelfTestResponse {
        status: state.service.self_test_status(),
        report: state.service.self_test_report().await,
    })
}

/// GET /health
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        environment: state.service.environment().to_string(),
        self_test: state.service.self_test_status(),
    })
}

/// GET /metrics
async fn metrics_handler() -> Response<Body> {
    match metrics::encode() {
        Ok((content_type, buffer)) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from(buffer))
            .unwrap_or_default(),
        Err(e) => Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(Body::from(format!("Error encoding metrics: {}", e)))
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gamedetect_classifier::{Classifier, ClassifierError, Prediction};
    use gamedetect_service::{ServiceSettings, SweepStatus};
    use serde_json::Value;
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt as _;

    /// Answers with the image bytes as the label; `bad` is not an image
    struct EchoClassifier;

    impl Classifier for EchoClassifier {
        fn classify(&mut self, image: &[u8]) -> Result<Prediction, ClassifierError> {
            match image {
                b"bad" => Err(ClassifierError::InvalidImage("not an image".to_string())),
                _ => Ok(Prediction::new(String::from_utf8_lossy(image), 0.9)),
            }
        }

        fn close(&mut self) -> Result<(), ClassifierError> {
            Ok(())
        }
    }

    struct Fixture {
        server: ApiServer,
        service: Arc<Service>,
        _static_dir: TempDir,
    }

    fn fixture(environment: &str, max_upload_bytes: usize) -> Fixture {
        let static_dir = TempDir::new().unwrap();
        std::fs::write(static_dir.path().join("style.css"), "body { margin: 0 }").unwrap();

        let service = Arc::new(Service::with_classifier(
            ServiceSettings::new(environment, "gamedetect.io"),
            EchoClassifier,
        ));
        let config = ApiConfig {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            static_dir: static_dir.path().to_path_buf(),
            test_corpus_dir: None,
            max_upload_bytes,
        };

        Fixture {
            server: ApiServer::new(service.clone(), config),
            service,
            _static_dir: static_dir,
        }
    }

    fn post(body: impl Into<Body>) -> Request {
        Request::builder()
            .method("POST")
            .uri("/")
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(body.into())
            .unwrap()
    }

    fn get(uri: &str) -> Request {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_classify_raw_body() {
        let fx = fixture("dev", 4096);
        let response = fx.server.router().oneshot(post("fortnite")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["label"], "fortnite");
    }

    #[tokio::test]
    async fn test_classify_multipart_field() {
        let fx = fixture("dev", 4096);
        let boundary = "XBOUNDARYX";
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"note\"\r\n\r\nhello\r\n\
             --{b}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"shot.jpg\"\r\n\
             Content-Type: image/jpeg\r\n\r\nminecraft\r\n--{b}--\r\n",
            b = boundary
        );
        let request = Request::builder()
            .method("POST")
            .uri("/")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", boundary),
            )
            .body(Body::from(body))
            .unwrap();

        let response = fx.server.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["label"], "minecraft");
    }

    #[tokio::test]
    async fn test_classify_error_statuses() {
        let fx = fixture("dev", 4096);

        let response = fx.server.router().oneshot(post(Body::empty())).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(response).await["error"]["code"], "missing_image");

        let response = fx.server.router().oneshot(post("bad")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(response).await["error"]["type"], "invalid_image_error");


        fx.service.close().await.unwrap();
        let response = fx.server.router().oneshot(post("halo")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_upload_over_limit_is_rejected() {
        let fx = fixture("dev", 64);

        let response = fx.server.router().oneshot(post(vec![b'x'; 256])).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(json(response).await["error"]["code"], "payload_too_large");

        let response = fx.server.router().oneshot(post(vec![b'x'; 64])).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_index_static_and_headers() {
        let fx = fixture("dev", 4096);

        let response = fx.server.router().oneshot(get("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::X_CONTENT_TYPE_OPTIONS).unwrap(),
            "nosniff"
        );
        assert_eq!(
            response.headers().get(header::X_FRAME_OPTIONS).unwrap(),
            "SAMEORIGIN"
        );

        let response = fx.server.router().oneshot(get("/style.css")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = fx.server.router().oneshot(get("/missing.js")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_trailing_slash_redirects() {
        let fx = fixture("dev", 4096);

        let response = fx.server.router().oneshot(get("/health/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::PERMANENT_REDIRECT);
        assert_eq!(response.headers().get(header::LOCATION).unwrap(), "/health");

        let response = fx.server.router().oneshot(get("/style.css/?v=2")).await.unwrap();
        assert_eq!(response.status(), StatusCode::PERMANENT_REDIRECT);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "/style.css?v=2"
        );

        let response = fx.server.router().oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["self_test"]["state"], "idle");
    }

    #[tokio::test]
    async fn test_self_test_endpoint_reports_sweep() {
        let fx = fixture("dev", 4096);
        let corpus = TempDir::new().unwrap();
        std::fs::write(corpus.path().join("cat.jpg"), "cat").unwrap();
        std::fs::write(corpus.path().join("dog-1.jpg"), "bird").unwrap();

        fx.service
            .run_self_test(&DirCorpus::new(corpus.path()))
            .await
            .unwrap();
        assert!(matches!(
            fx.service.self_test_status(),
            SweepStatus::Completed { .. }
        ));

        let response = fx.server.router().oneshot(get("/selftest")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["status"]["state"], "completed");
        assert_eq!(body["status"]["summary"]["passed"], 1);
        assert_eq!(body["report"]["results"][0]["outcome"], "pass");
        assert_eq!(body["report"]["results"][1]["outcome"], "fail");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_start_sweeps_while_serving_and_shuts_down() {
        let fx = fixture("dev", 4096);
        let corpus = TempDir::new().unwrap();
        for name in ["cat", "dog", "bird"] {
            std::fs::write(corpus.path().join(format!("{}.jpg", name)), name).unwrap();
        }

        let server = ApiServer::new(
            fx.service.clone(),
            ApiConfig {
                listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
                static_dir: fx._static_dir.path().to_path_buf(),
                test_corpus_dir: Some(corpus.path().to_path_buf()),
                max_upload_bytes: 4096,
            },
        );

        let mut status = fx.service.subscribe_self_test();
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        let running = tokio::spawn(server.start_with_shutdown(async move {
            shutdown_rx.await.ok();
        }));

        tokio::time::timeout(Duration::from_secs(5), status.wait_for(SweepStatus::is_finished))
            .await
            .expect("sweep did not finish while serving")
            .unwrap();
        assert!(!running.is_finished());

        match fx.service.self_test_status() {
            SweepStatus::Completed { summary } => assert_eq!(summary.passed, 3),
            other => panic!("unexpected sweep status {:?}", other),
        }

        // Published once the sweep task hands back its report.
        let published = async {
            while metrics::SELF_TEST_RESULTS.with_label_values(&["pass"]).get() != 3.0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), published)
            .await
            .expect("self-test metrics were not published");

        shutdown_tx.send(()).unwrap();
        let served = tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .expect("server did not stop on shutdown")
            .unwrap();
        assert!(served.is_ok());
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let fx = fixture("dev", 4096);
        fx.server.router().oneshot(post("fortnite")).await.unwrap();

        let response = fx.server.router().oneshot(get("/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(String::from_utf8_lossy(&body).contains("gamedetect_classify_requests_total"));
    }

    #[tokio::test]
    async fn test_production_redirects_to_canonical_host() {
        let fx = fixture("production", 4096);

        let request = Request::builder()
            .uri("/style.css")
            .header(header::HOST, "www.gamedetect.io")
            .body(Body::empty())
            .unwrap();
        let response = fx.server.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PERMANENT_REDIRECT);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "https://gamedetect.io/style.css"
        );

        let request = Request::builder()
            .uri("/health")
            .header(header::HOST, "gamedetect.io")
            .header("x-forwarded-proto", "https")
            .body(Body::empty())
            .unwrap();
        let response = fx.server.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_dev_mode_does_not_redirect() {
        let fx = fixture("dev", 4096);
        let request = Request::builder()
            .uri("/health")
            .header(header::HOST, "localhost:8080")
            .body(Body::empty())
            .unwrap();
        let response = fx.server.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
