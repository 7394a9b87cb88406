use std::path::{Path as FsPath, PathBuf};

use axum::{
    Form, Json,
    body::Body,
    extract::{FromRequest, Path, Request, State},
    http::{HeaderMap, HeaderValue, header},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_stream::{Stream, StreamExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use super::error::ApiError;
use super::state::AppState;
use crate::downloader::core::discard_artifact;

/// 提交表单，表单编码或 JSON 均可
#[derive(Debug, Default, Deserialize)]
pub struct SubmitForm {
    pub url: Option<String>,
    pub format: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub task_id: String,
}

/// POST /download
pub async fn submit(
    State(state): State<AppState>,
    request: Request,
) -> Result<Json<SubmitResponse>, ApiError> {
    let form = read_submission(request).await?;
    let url = form.url.unwrap_or_default();
    let task_id = state.service.submit(&url, form.format.as_deref()).await?;
    Ok(Json(SubmitResponse { task_id }))
}

async fn read_submission(request: Request) -> Result<SubmitForm, ApiError> {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    if content_type.starts_with("application/json") {
        let Json(form) = Json::<SubmitForm>::from_request(request, &())
            .await
            .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
        Ok(form)
    } else if content_type.starts_with("application/x-www-form-urlencoded") {
        let Form(form) = Form::<SubmitForm>::from_request(request, &())
            .await
            .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
        Ok(form)
    } else {
        // 无法识别的请求体等同于没有填写链接
        debug!("未识别的提交类型: {:?}", content_type);
        Ok(SubmitForm::default())
    }
}

/// GET /progress/{task_id}
pub async fn progress(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    debug!("进度订阅: {}", task_id);
    let records = state
        .service
        .watch(&task_id)
        .map(|record| Event::default().json_data(record));
    Sse::new(records).keep_alive(KeepAlive::default())
}

/// GET /file/{task_id}
pub async fn file(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Response, ApiError> {
    let Some(artifact) = state.service.take_artifact(&task_id).await else {
        return Err(ApiError::NotFound("file not found".to_string()));
    };

    let file = match tokio::fs::File::open(&artifact.path).await {
        Ok(file) => file,
        Err(e) => {
            warn!("文件无法打开 {:?}: {}", artifact.path, e);
            discard_artifact(&artifact.path).await;
            return Err(ApiError::NotFound("file not found".to_string()));
        }
    };
    let length = file.metadata().await.ok().map(|m| m.len());

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(content_type_for(&artifact.path)),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        content_disposition(&artifact.filename),
    );
    if let Some(length) = length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    }

    info!("发送文件: {} ({})", artifact.filename, artifact.task_id);
    // 响应体被丢弃时（发送完毕或连接中断）删除文件
    let guard = ArtifactGuard {
        path: artifact.path,
    };
    let chunks = ReaderStream::new(file).map(move |chunk| {
        let _held = &guard;
        chunk
    });

    Ok((headers, Body::from_stream(chunks)).into_response())
}

/// GET /health
pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

struct ArtifactGuard {
    path: PathBuf,
}

impl Drop for ArtifactGuard {
    fn drop(&mut self) {
        let path = std::mem::take(&mut self.path);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { discard_artifact(&path).await });
            }
            Err(_) => {
                if let Err(e) = std::fs::remove_file(&path) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!("删除文件失败 {:?}: {}", path, e);
                    }
                }
            }
        }
    }
}

fn content_type_for(path: &FsPath) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "opus" | "ogg" => "audio/ogg",
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        _ => "application/octet-stream",
    }
}

// ASCII 兜底名 + RFC 5987 的 UTF-8 名
fn content_disposition(filename: &str) -> HeaderValue {
    let fallback: String = filename
        .chars()
        .map(|c| {
            if c.is_ascii_graphic() && c != '"' && c != '\\' || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let value = format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        urlencoding::encode(filename)
    );
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}
