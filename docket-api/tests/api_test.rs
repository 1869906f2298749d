use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;

use docket_api::router::{create_router, AppState};
use docket_core::{
    entities::ResultMetadata, DocumentProcessor, DocumentType, ExtractionResult, JobId,
    JobManager, JobManagerConfig, ProcessRequest, ProcessorError,
};

const BOUNDARY: &str = "docket-test-boundary";

struct EchoProcessor;

#[async_trait::async_trait]
impl DocumentProcessor for EchoProcessor {
    fn name(&self) -> &str {
        "echo"
    }

    fn supports(&self, _document_type: DocumentType) -> bool {
        true
    }

    async fn process(&self, req: ProcessRequest) -> Result<ExtractionResult, ProcessorError> {
        let text = String::from_utf8_lossy(&req.payload).into_owned();
        Ok(ExtractionResult {
            markdown_content: Some(format!("# {}\n\n{text}", req.filename)),
            text_content: text,
            metadata: ResultMetadata {
                processor: "echo".into(),
                original_format: req.document_type.to_string(),
                ..Default::default()
            },
            ..Default::default()
        })
    }
}

fn create_test_app(config: JobManagerConfig) -> (Router, JobManager) {
    let manager = JobManager::new(config, EchoProcessor);
    let app = create_router(AppState {
        manager: manager.clone(),
    });
    (app, manager)
}

enum Part<'a> {
    File(&'a str, &'a [u8]),
    Text(&'a str, &'a str),
}

fn upload_request(parts: &[Part<'_>]) -> Request<Body> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::File(filename, data) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
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
        .uri("/api/v1/documents/upload")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

async fn upload(app: &Router, filename: &str, data: &[u8]) -> JobId {
    let (status, json) = send(app, upload_request(&[Part::File(filename, data)])).await;
    assert_eq!(status, StatusCode::CREATED, "{json}");
    json["data"]["task_id"].as_str().unwrap().parse().unwrap()
}

#[tokio::test]
async fn health_check_reports_formats_and_stats() {
    let (app, _) = create_test_app(JobManagerConfig::default());

    let (status, json) = send(&app, get("/api/v1/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["status"], "healthy");
    let formats = json["data"]["supported_formats"].as_array().unwrap();
    assert!(formats.iter().any(|f| f == ".pdf"));
    assert!(formats.iter().any(|f| f == ".xml"));
    assert_eq!(json["data"]["jobs"]["max_concurrent_tasks"], 3);
}

#[tokio::test]
async fn root_lists_endpoints() {
    let (app, _) = create_test_app(JobManagerConfig::default());

    let (status, json) = send(&app, get("/")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["name"], "docket");
    assert!(!json["data"]["endpoints"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn uploaded_document_is_processed() {
    let (app, manager) = create_test_app(JobManagerConfig::default());

    let (status, json) = send(
        &app,
        upload_request(&[
            Part::Text("extraction_mode", "text_only"),
            Part::Text("extract_images", "false"),
            Part::File("report.pdf", b"quarterly numbers"),
        ]),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{json}");
    assert_eq!(json["data"]["filename"], "report.pdf");
    assert_eq!(json["data"]["file_size"], 17);
    assert_eq!(json["data"]["document_type"], "pdf");
    let state = json["data"]["status"].as_str().unwrap();
    assert!(state == "pending" || state == "running", "{state}");

    let task_id: JobId = json["data"]["task_id"].as_str().unwrap().parse().unwrap();
    manager.wait_for(task_id).await.unwrap();

    let (status, json) = send(&app, get(&format!("/api/v1/documents/tasks/{task_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["state"], "completed");
    assert_eq!(json["data"]["extraction_mode"], "text_only");
    assert_eq!(json["data"]["result"]["text_content"], "quarterly numbers");
    assert!(json["data"]["failure"].is_null());
}

#[tokio::test]
async fn unsupported_format_is_rejected() {
    let (app, manager) = create_test_app(JobManagerConfig::default());

    let (status, json) = send(&app, upload_request(&[Part::File("report.xyz", b"data")])).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);
    assert!(json["error"]
        .as_str()
        .unwrap()
        .contains("unsupported file format"));
    assert!(manager.is_empty());
}

#[tokio::test]
async fn empty_and_oversized_files_are_rejected() {
    let (app, manager) = create_test_app(JobManagerConfig::default().with_max_file_size(16));

    let (status, _) = send(&app, upload_request(&[Part::File("empty.txt", b"")])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, json) = send(&app, upload_request(&[Part::File("big.txt", &[b'a'; 32])])).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(json["success"], false);

    assert!(manager.is_empty());
}

#[tokio::test]
async fn malformed_uploads_are_rejected() {
    let (app, _) = create_test_app(JobManagerConfig::default());

    let (status, json) = send(&app, upload_request(&[Part::Text("ocr_language", "en")])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "No file provided");

    let (status, _) = send(
        &app,
        upload_request(&[
            Part::Text("extraction_mode", "html"),
            Part::File("a.txt", b"hello"),
        ]),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        upload_request(&[
            Part::Text("extract_tables", "maybe"),
            Part::File("a.txt", b"hello"),
        ]),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_and_malformed_task_ids() {
    let (app, _) = create_test_app(JobManagerConfig::default());

    let (status, json) = send(
        &app,
        get(&format!("/api/v1/documents/tasks/{}", JobId::new())),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["success"], false);

    let (status, _) = send(&app, get("/api/v1/documents/tasks/not-a-task")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn task_list_is_paginated_in_submission_order() {
    let (app, manager) = create_test_app(JobManagerConfig::default());
    let first = upload(&app, "one.txt", b"1").await;
    let second = upload(&app, "two.md", b"2").await;
    let third = upload(&app, "three.xml", b"<a/>").await;
    for id in [first, second, third] {
        manager.wait_for(id).await.unwrap();
    }

    let (status, json) = send(&app, get("/api/v1/documents/tasks?page=1&page_size=2")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["total"], 3);
    let jobs = json["data"]["jobs"].as_array().unwrap();
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0]["id"], first.to_string());
    assert_eq!(jobs[1]["id"], second.to_string());

    let (_, json) = send(&app, get("/api/v1/documents/tasks?page=2&page_size=2")).await;
    assert_eq!(json["data"]["jobs"][0]["id"], third.to_string());

    let (status, _) = send(&app, get("/api/v1/documents/tasks?page_size=101")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = send(&app, get("/api/v1/documents/tasks?page=0")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
