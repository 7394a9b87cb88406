use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedSender;
use tower::ServiceExt;

use media_grabber::downloader::DownloadService;
use media_grabber::downloader::core::{FetchRequest, MediaTool};
use media_grabber::downloader::error::DownloadError;
use media_grabber::downloader::models::{MediaInfo, OutputFormat, TaskStatus};
use media_grabber::downloader::store::MemoryTaskStore;
use media_grabber::downloader::watch::WatchSettings;
use media_grabber::parser::{ProgressEvent, SubmissionRules, UrlPolicy};
use media_grabber::server::{AppState, create_router};

/// 写出固定内容的下载器替身
struct StubTool {
    fail: bool,
}

#[async_trait]
impl MediaTool for StubTool {
    async fn probe(&self, _url: &str) -> Result<MediaInfo, DownloadError> {
        Ok(MediaInfo {
            title: "clip".to_string(),
            ext: "mp4".to_string(),
        })
    }

    async fn fetch(
        &self,
        request: &FetchRequest,
        events: UnboundedSender<ProgressEvent>,
    ) -> Result<(), DownloadError> {
        let _ = events.send(ProgressEvent::Downloading {
            progress: Some(0.5),
            eta: Some("00:01".to_string()),
            speed: None,
        });
        if self.fail {
            return Err(DownloadError::Transfer("ERROR: Video unavailable".to_string()));
        }
        let path = request
            .output_dir
            .join(format!("{}.{}", request.task_id, request.format.extension()));
        tokio::fs::write(path, b"media").await?;
        Ok(())
    }
}

struct Harness {
    router: Router,
    service: Arc<DownloadService>,
    dir: TempDir,
}

fn harness(fail: bool) -> Harness {
    let dir = TempDir::new().unwrap();
    let service = Arc::new(DownloadService::new(
        Arc::new(MemoryTaskStore::new()),
        Arc::new(StubTool { fail }),
        SubmissionRules::new(UrlPolicy::default(), OutputFormat::ALL.to_vec()),
        dir.path().to_path_buf(),
        WatchSettings {
            poll_interval: Duration::from_millis(20),
            cleanup_grace: Duration::from_millis(100),
        },
    ));
    Harness {
        router: create_router(AppState::new(service.clone())),
        service,
        dir,
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, body.to_vec())
}

fn form(body: &str) -> Request<Body> {
    Request::post("/download")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

async fn submit_ok(router: &Router, body: &str) -> String {
    let (status, _, bytes) = send(router, form(body)).await;
    assert_eq!(status, StatusCode::OK, "{}", String::from_utf8_lossy(&bytes));
    let json: Value = serde_json::from_slice(&bytes).unwrap();
    json["task_id"].as_str().unwrap().to_string()
}

async fn wait_for(service: &DownloadService, id: &str, status: TaskStatus) {
    for _ in 0..500 {
        if service.store().get(id).await.map(|t| t.status) == Some(status) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {} never reached {}", id, status);
}

/// 取出 SSE 响应中每条 `data:` 的 JSON
fn sse_records(body: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(body)
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| serde_json::from_str(data.trim()).unwrap())
        .collect()
}

#[tokio::test]
async fn health_reports_ok() {
    let h = harness(false);
    let (status, _, body) = send(&h.router, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn submission_without_url_is_rejected() {
    let h = harness(false);
    let (status, _, body) = send(&h.router, form("format=mp3")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"], "No URL provided.");
    assert!(h.service.store().ids().await.is_empty());
}

#[tokio::test]
async fn unsupported_source_and_format_are_rejected() {
    let h = harness(false);
    let (status, _, _) = send(&h.router, form("url=https%3A%2F%2Fvimeo.com%2F123")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, body) = send(
        &h.router,
        form("url=https%3A%2F%2Fyoutu.be%2Fabc&format=avi"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert!(json["error"].as_str().unwrap().contains("avi"));
    assert!(h.service.store().ids().await.is_empty());
}

#[tokio::test]
async fn json_submission_is_accepted() {
    let h = harness(false);
    let request = Request::post("/download")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"url":"https://youtu.be/abc","format":"mp3"}"#))
        .unwrap();
    let (status, _, body) = send(&h.router, request).await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    let id = json["task_id"].as_str().unwrap();
    assert!(h.service.store().get(id).await.is_some());
}

#[tokio::test]
async fn unknown_task_progress_is_a_single_error_record() {
    let h = harness(false);
    let (status, headers, body) = send(&h.router, get("/progress/nope")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(
        headers[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream")
    );
    let records = sse_records(&body);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["status"], "error");
    assert_eq!(records[0]["message"], "task not found");
}

#[tokio::test]
async fn unknown_task_file_is_not_found() {
    let h = harness(false);
    let (status, _, _) = send(&h.router, get("/file/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn completed_file_is_delivered_exactly_once() {
    let h = harness(false);
    let id = submit_ok(&h.router, "url=https%3A%2F%2Fyoutu.be%2Fabc").await;
    wait_for(&h.service, &id, TaskStatus::Complete).await;
    let path = h.dir.path().join(format!("{}.mp4", id));
    assert!(path.exists());

    let (status, headers, body) = send(&h.router, get(&format!("/file/{}", id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"media");
    assert_eq!(headers[header::CONTENT_TYPE], "video/mp4");
    let disposition = headers[header::CONTENT_DISPOSITION].to_str().unwrap();
    assert!(disposition.contains("clip.mp4"));

    let (status, _, _) = send(&h.router, get(&format!("/file/{}", id))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(h.service.store().get(&id).await.is_none());

    for _ in 0..100 {
        if !path.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!path.exists());
}

#[tokio::test]
async fn progress_stream_ends_with_terminal_record() {
    let h = harness(false);
    let id = submit_ok(&h.router, "url=https%3A%2F%2Fyoutu.be%2Fabc&format=flac").await;

    let (status, _, body) = send(&h.router, get(&format!("/progress/{}", id))).await;
    assert_eq!(status, StatusCode::OK);
    let records = sse_records(&body);
    let last = records.last().unwrap();
    assert_eq!(last["status"], "complete");
    assert_eq!(last["progress"], 1.0);
    assert_eq!(last["filename"], "clip.flac");

    // 宽限期后任务被清理，文件也随之删除
    assert!(h.service.store().get(&id).await.is_none());
    assert!(!h.dir.path().join(format!("{}.flac", id)).exists());
    let (status, _, _) = send(&h.router, get(&format!("/file/{}", id))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn failed_download_reports_excerpt_and_has_no_file() {
    let h = harness(true);
    let id = submit_ok(&h.router, "url=https%3A%2F%2Fyoutu.be%2Fabc").await;
    wait_for(&h.service, &id, TaskStatus::Error).await;

    let (status, _, _) = send(&h.router, get(&format!("/file/{}", id))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, _, body) = send(&h.router, get(&format!("/progress/{}", id))).await;
    let records = sse_records(&body);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["status"], "error");
    assert!(
        records[0]["message"]
            .as_str()
            .unwrap()
            .contains("Video unavailable")
    );
}
