mod download;
mod error;
mod intake;
mod render;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use vidscan_analyzer::video::check_ffmpeg_available;
use vidscan_analyzer::{analyze_motion_file, load_detector, score_file, MotionReport, ObjectDetector};
use vidscan_common::config::Config;
use vidscan_common::naming;

use crate::error::ApiError;

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

type SharedDetector = Arc<Mutex<Box<dyn ObjectDetector>>>;

pub struct AppState {
    pub config: Config,
    /// One model instance; inference calls are serialised through the mutex.
    detector: Result<SharedDetector, String>,
    pub http: reqwest::Client,
}

impl AppState {
    fn detector(&self) -> Result<SharedDetector, ApiError> {
        self.detector
            .clone()
            .map_err(ApiError::DetectorUnavailable)
    }
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct FormatQuery {
    format: Option<String>,
}

impl FormatQuery {
    fn wants_html(&self) -> bool {
        self.format
            .as_deref()
            .is_some_and(|f| f.eq_ignore_ascii_case("html"))
    }
}

#[derive(Debug, Serialize)]
struct MotionResponse {
    job_id: String,
    #[serde(flatten)]
    report: MotionReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_url: Option<String>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /health
async fn health() -> &'static str {
    "ok"
}

/// POST /analyze?format=html, multipart `video` file or `video_url`
async fn analyze(
    State(state): State<Arc<AppState>>,
    Query(q): Query<FormatQuery>,
    multipart: Multipart,
) -> Response {
    let result = run_analysis(&state, multipart).await;
    match (result, q.wants_html()) {
        (Ok(report), false) => Json(report).into_response(),
        (Ok(report), true) => Html(render::score_fragment(&report)).into_response(),
        (Err(e), false) => e.into_response(),
        (Err(e), true) => {
            let status = e.status();
            error!(status = status.as_u16(), kind = e.kind(), error = %e, "analysis request failed");
            (status, Html(render::error_fragment(&e.to_string()))).into_response()
        }
    }
}

async fn run_analysis(
    state: &AppState,
    multipart: Multipart,
) -> Result<vidscan_analyzer::ScoreReport, ApiError> {
    let detector = state.detector()?;
    let input = intake::receive(state, multipart).await?;

    let ffmpeg = state.config.ffmpeg.clone();
    let path = input.path.clone();
    let report = tokio::task::spawn_blocking(move || {
        let mut guard = detector
            .lock()
            .map_err(|_| ApiError::Internal("detector lock poisoned".into()))?;
        score_file(&ffmpeg, &path, &mut **guard).map_err(ApiError::from)
    })
    .await??;

    info!(
        job_id = input.job_id,
        score = report.score,
        verdict = %report.verdict,
        "analysis complete"
    );
    Ok(report)
}

/// POST /motion, multipart `video` file or `video_url`
async fn motion(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let input = intake::receive(&state, multipart).await?;

    let output_name = naming::motion_output_name(&input.job_id);
    let output_path = Path::new(&state.config.server.output_dir).join(&output_name);

    let ffmpeg = state.config.ffmpeg.clone();
    let src = input.path.clone();
    let report = tokio::task::spawn_blocking(move || {
        analyze_motion_file(&ffmpeg, &src, &output_path)
    })
    .await?;

    if report.is_success() {
        info!(
            job_id = input.job_id,
            frames_analyzed = report.frames_analyzed,
            motion_detected = report.motion_detected,
            "motion annotation complete"
        );
        let body = MotionResponse {
            job_id: input.job_id.clone(),
            report,
            output_url: Some(format!("/outputs/{output_name}")),
        };
        return Ok(Json(body).into_response());
    }

    if let Some(e) = &report.error {
        error!(job_id = input.job_id, kind = e.kind, error = e.message, "motion annotation failed");
    }
    let body = MotionResponse {
        job_id: input.job_id.clone(),
        report,
        output_url: None,
    };
    Ok((StatusCode::UNPROCESSABLE_ENTITY, Json(body)).into_response())
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.server.max_upload_bytes();
    let outputs = ServeDir::new(&state.config.server.output_dir);

    Router::new()
        .route("/health", get(health))
        .route("/analyze", post(analyze))
        .route("/motion", post(motion))
        .nest_service("/outputs", outputs)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    for dir in [&config.server.upload_dir, &config.server.output_dir] {
        if let Err(e) = std::fs::create_dir_all(dir) {
            error!(error = %e, dir, "failed to create directory");
            std::process::exit(1);
        }
    }

    if !check_ffmpeg_available(&config.ffmpeg) {
        warn!(
            ffmpeg = config.ffmpeg.ffmpeg_path,
            "ffmpeg not found; every analysis will fail until it is installed"
        );
    }

    let detector = match load_detector(&config.detector) {
        Ok(d) => {
            info!(detector = d.name(), "detector ready");
            Ok(Arc::new(Mutex::new(d)))
        }
        Err(e) => {
            warn!(error = %e, "detector unavailable; /analyze will answer 503");
            Err(e.to_string())
        }
    };

    let http = match download::build_client(&config.download) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to build HTTP client");
            std::process::exit(1);
        }
    };

    let addr = format!("0.0.0.0:{}", config.server.port);
    let state = Arc::new(AppState {
        config,
        detector,
        http,
    });
    let app = router(state);

    info!(addr, "vidscan API server starting");

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap_or_else(|e| {
        eprintln!("Failed to bind to {addr}: {e}");
        std::process::exit(1);
    });
    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "server error");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_format_is_case_insensitive() {
        let q = FormatQuery {
            format: Some("HTML".into()),
        };
        assert!(q.wants_html());
        assert!(!FormatQuery::default().wants_html());
        let json = FormatQuery {
            format: Some("json".into()),
        };
        assert!(!json.wants_html());
    }

    #[test]
    fn motion_response_flattens_report() {
        let body = MotionResponse {
            job_id: "job".into(),
            report: MotionReport::success(4, true),
            output_url: Some("/outputs/job_motion.avi".into()),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["status"], "SUCCESS");
        assert_eq!(json["frames_analyzed"], 4);
        assert_eq!(json["output_url"], "/outputs/job_motion.avi");
    }

    #[test]
    fn missing_detector_is_service_unavailable() {
        let state = AppState {
            config: Config::default(),
            detector: Err("no model".into()),
            http: reqwest::Client::new(),
        };
        let err = state.detector().err().map(|e| e.status());
        assert_eq!(err, Some(StatusCode::SERVICE_UNAVAILABLE));
    }

    use axum::body::Body;
    use axum::http::{header, Request};
    use tower::ServiceExt;
    use vidscan_analyzer::detector::{DetectionSet, DetectorError};
    use vidscan_analyzer::video::Frame;

    const BOUNDARY: &str = "vidscan-test-boundary";

    enum Part<'a> {
        File(&'a [u8]),
        Text(&'a str, &'a str),
    }

    fn multipart_request(uri: &str, parts: &[Part<'_>]) -> Request<Body> {
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match part {
                Part::File(data) => {
                    body.extend_from_slice(
                        b"Content-Disposition: form-data; name=\"video\"; filename=\"clip.mp4\"\r\n\
Content-Type: application/octet-stream\r\n\r\n",
                    );
                    body.extend_from_slice(data);
                }
                Part::Text(name, value) => {
                    body.extend_from_slice(
                        format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}")
                            .as_bytes(),
                    );
                }
            }
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    struct NoBoxes;

    impl ObjectDetector for NoBoxes {
        fn detect(&mut self, _frame: &Frame) -> Result<Vec<DetectionSet>, DetectorError> {
            Ok(Vec::new())
        }
    }

    struct TestServer {
        dir: tempfile::TempDir,
        state: Arc<AppState>,
    }

    impl TestServer {
        fn new(detector: Option<Box<dyn ObjectDetector>>) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let mut config = Config::default();
            config.server.upload_dir = dir.path().join("uploads").to_string_lossy().into_owned();
            config.server.output_dir = dir.path().join("outputs").to_string_lossy().into_owned();
            config.ffmpeg.ffmpeg_path = "/nonexistent/ffmpeg".into();
            config.ffmpeg.ffprobe_path = "/nonexistent/ffprobe".into();
            std::fs::create_dir_all(&config.server.upload_dir).unwrap();
            std::fs::create_dir_all(&config.server.output_dir).unwrap();

            let detector = detector
                .map(|d| Arc::new(Mutex::new(d)))
                .ok_or_else(|| "no model".to_string());
            let state = Arc::new(AppState {
                config,
                detector,
                http: reqwest::Client::new(),
            });
            Self { dir, state }
        }

        async fn send(&self, request: Request<Body>) -> (StatusCode, Vec<u8>) {
            let response = router(self.state.clone()).oneshot(request).await.unwrap();
            let status = response.status();
            let body = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            (status, body.to_vec())
        }

        fn files_in(&self, sub: &str) -> usize {
            std::fs::read_dir(self.dir.path().join(sub)).unwrap().count()
        }
    }

    fn json(body: &[u8]) -> serde_json::Value {
        serde_json::from_slice(body).unwrap()
    }

    #[tokio::test]
    async fn health_is_ok() {
        let server = TestServer::new(None);
        let request = Request::get("/health").body(Body::empty()).unwrap();
        let (status, body) = server.send(request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"ok");
    }

    #[tokio::test]
    async fn upload_wins_over_url() {
        let server = TestServer::new(None);
        // The empty URL would be a 400 if it were considered at all.
        let request = multipart_request(
            "/motion",
            &[Part::Text("video_url", ""), Part::File(b"not really a video")],
        );
        let (status, body) = server.send(request).await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        let body = json(&body);
        assert_eq!(body["status"], "ERROR");
        assert_eq!(body["error"]["kind"], "decode_error");
        assert!(body.get("output_url").is_none());
        assert_eq!(server.files_in("uploads"), 0);
        assert_eq!(server.files_in("outputs"), 0);
    }

    #[tokio::test]
    async fn empty_upload_counts_as_missing() {
        let server = TestServer::new(None);
        let request = multipart_request("/motion", &[Part::File(b"")]);
        let (status, body) = server.send(request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let body = json(&body);
        assert_eq!(body["error"], "bad_request");
        assert_eq!(body["message"], intake::NO_INPUT);
        assert_eq!(server.files_in("uploads"), 0);
    }

    #[tokio::test]
    async fn empty_url_is_rejected() {
        let server = TestServer::new(None);
        let request = multipart_request("/motion", &[Part::Text("video_url", "   ")]);
        let (status, body) = server.send(request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json(&body)["message"], "URL is empty or invalid");
        assert_eq!(server.files_in("uploads"), 0);
    }

    #[tokio::test]
    async fn unrelated_fields_are_not_input() {
        let server = TestServer::new(None);
        let request = multipart_request("/motion", &[Part::Text("comment", "hello")]);
        let (status, body) = server.send(request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json(&body)["message"], "no video uploaded and no URL given");
    }

    #[tokio::test]
    async fn analyze_without_detector_is_unavailable() {
        let server = TestServer::new(None);
        let request = multipart_request("/analyze", &[Part::File(b"not really a video")]);
        let (status, body) = server.send(request).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json(&body)["error"], "detector_unavailable");
        assert_eq!(server.files_in("uploads"), 0);
    }

    #[tokio::test]
    async fn analyze_html_error_fragment() {
        let server = TestServer::new(Some(Box::new(NoBoxes) as Box<dyn ObjectDetector>));
        let request = multipart_request("/analyze?format=html", &[Part::Text("comment", "x")]);
        let (status, body) = server.send(request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let html = String::from_utf8(body).unwrap();
        assert!(html.starts_with("<h3>"));
        assert!(html.contains("no video uploaded and no URL given"));
    }

    #[tokio::test]
    async fn analyze_removes_scratch_upload() {
        let server = TestServer::new(Some(Box::new(NoBoxes) as Box<dyn ObjectDetector>));
        let request = multipart_request("/analyze", &[Part::File(b"not really a video")]);
        let (status, body) = server.send(request).await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json(&body)["error"], "decode_error");
        assert_eq!(server.files_in("uploads"), 0);
    }
}
