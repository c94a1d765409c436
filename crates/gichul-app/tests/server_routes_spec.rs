use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use gichul_app::config::Settings;
use gichul_app::server::{AppState, build_router};
use gichul_app::services::jobs::{JobConfig, JobManager};
use gichul_app::services::orchestrator::Orchestrator;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

fn router_with(settings: Settings) -> Router {
    let orchestrator = Arc::new(Orchestrator::new(settings.clone()));
    let jobs = JobManager::start(
        orchestrator.clone(),
        JobConfig {
            workers: 1,
            queue_depth: 2,
            upload_dir: std::env::temp_dir().join(format!("gichul-test-{}", uuid::Uuid::new_v4())),
            ..JobConfig::default()
        },
    );
    build_router(AppState::new(settings, orchestrator, jobs))
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body is readable")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("body is JSON")
}

fn multipart_body(boundary: &str, file_name: &str, content_type: &str, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(payload);
    body.extend_from_slice(
        format!(
            "\r\n--{boundary}\r\nContent-Disposition: form-data; name=\"model\"\r\n\r\npdftext+gemini-3-pro-preview\r\n--{boundary}--\r\n"
        )
        .as_bytes(),
    );
    body
}

#[tokio::test]
async fn health_reports_status_and_version() {
    let app = router_with(Settings::default());
    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/health")
                .body(Body::empty())
                .expect("request builds"),
        )
        .await
        .expect("handler responds");

    assert_eq!(response.status(), StatusCode::OK);
    let value = body_json(response).await;
    assert_eq!(value["status"], json!("ok"));
    assert!(value["version"].is_string());
}

#[tokio::test]
async fn models_lists_every_spec_with_pricing() {
    let app = router_with(Settings::default());
    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/api/models")
                .body(Body::empty())
                .expect("request builds"),
        )
        .await
        .expect("handler responds");

    assert_eq!(response.status(), StatusCode::OK);
    let value = body_json(response).await;
    let models = value["models"].as_array().expect("models array");
    assert!(
        models
            .iter()
            .any(|m| m["model_spec"] == json!("mineru+gemini-3-pro-preview"))
    );
    for model in models {
        assert!(model["input_price_per_1m"].as_f64().unwrap_or_default() > 0.0);
    }
}

#[tokio::test]
async fn validate_endpoint_reports_listening_out_of_range() {
    let app = router_with(Settings::default());
    let exam = json!({
        "exam_info": {"title": "검증 테스트", "total_questions": 1},
        "questions": [{
            "number": 18,
            "question_type": "듣기",
            "question_text": "대화를 듣고 알맞은 응답을 고르시오.",
            "passage": "",
            "choices": [
                {"number": 1, "text": "a"},
                {"number": 2, "text": "b"},
                {"number": 3, "text": "c"},
                {"number": 4, "text": "d"},
                {"number": 5, "text": "e"}
            ],
            "points": 2
        }]
    });

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/validate")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(exam.to_string()))
                .expect("request builds"),
        )
        .await
        .expect("handler responds");

    assert_eq!(response.status(), StatusCode::OK);
    let value = body_json(response).await;
    let errors = value["errors"].as_array().expect("errors array");
    assert!(
        errors.iter().any(|issue| issue["code"] == json!("V-LIST-001")),
        "{errors:?}"
    );
}

#[tokio::test]
async fn api_requires_key_when_configured() {
    let mut settings = Settings::default();
    settings.api_keys = Some("secret-key".to_string());
    let app = router_with(settings);

    let denied = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/api/models")
                .body(Body::empty())
                .expect("request builds"),
        )
        .await
        .expect("handler responds");
    assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);

    let allowed = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/api/models")
                .header("x-api-key", "secret-key")
                .body(Body::empty())
                .expect("request builds"),
        )
        .await
        .expect("handler responds");
    assert_eq!(allowed.status(), StatusCode::OK);

    let via_query = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/api/models?api_key=secret-key")
                .body(Body::empty())
                .expect("request builds"),
        )
        .await
        .expect("handler responds");
    assert_eq!(via_query.status(), StatusCode::OK);

    let health = router_with({
        let mut settings = Settings::default();
        settings.api_keys = Some("secret-key".to_string());
        settings
    })
    .oneshot(
        Request::builder()
            .method("GET")
            .uri("/health")
            .body(Body::empty())
            .expect("request builds"),
    )
    .await
    .expect("handler responds");
    assert_eq!(health.status(), StatusCode::OK, "health stays open");
}

#[tokio::test]
async fn rate_limit_trips_after_quota() {
    let mut settings = Settings::default();
    settings.rate_limit_per_minute = 1;
    let app = router_with(settings);

    let first = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/api/models")
                .body(Body::empty())
                .expect("request builds"),
        )
        .await
        .expect("handler responds");
    assert_eq!(first.status(), StatusCode::OK);

    let second = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/api/models")
                .body(Body::empty())
                .expect("request builds"),
        )
        .await
        .expect("handler responds");
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn non_pdf_upload_is_rejected_before_parsing() {
    let app = router_with(Settings::default());
    let boundary = "gichulboundary";
    let body = multipart_body(boundary, "notes.txt", "text/plain", b"hello");

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/parse")
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={boundary}"),
                )
                .body(Body::from(body))
                .expect("request builds"),
        )
        .await
        .expect("handler responds");

    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn oversized_upload_is_rejected_before_any_layer() {
    let mut settings = Settings::default();
    settings.max_file_size_mb = 1;
    let app = router_with(settings);

    let boundary = "gichulboundary";
    let oversized = vec![b'x'; 1024 * 1024 + 4096];
    let body = multipart_body(boundary, "exam.pdf", "application/pdf", &oversized);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/parse")
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={boundary}"),
                )
                .body(Body::from(body))
                .expect("request builds"),
        )
        .await
        .expect("handler responds");

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn unknown_model_is_a_bad_request() {
    let app = router_with(Settings::default());
    let boundary = "gichulboundary";
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"exam.pdf\"\r\nContent-Type: application/pdf\r\n\r\n%PDF-1.7\r\n--{boundary}\r\nContent-Disposition: form-data; name=\"model\"\r\n\r\ntesseract+gpt-2\r\n--{boundary}--\r\n"
        )
        .as_bytes(),
    );

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/parse")
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={boundary}"),
                )
                .body(Body::from(body))
                .expect("request builds"),
        )
        .await
        .expect("handler responds");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn missing_job_returns_not_found() {
    let app = router_with(Settings::default());
    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/api/jobs/00000000-0000-0000-0000-000000000000")
                .body(Body::empty())
                .expect("request builds"),
        )
        .await
        .expect("handler responds");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let value = body_json(response).await;
    assert!(value["detail"].as_str().unwrap_or_default().contains("not found"));
}
