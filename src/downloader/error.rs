use std::path::PathBuf;

use thiserror::Error;

use crate::parser::errors::ParseError;

// 错误摘要的最大长度（字符数）
pub const MESSAGE_LIMIT: usize = 300;

#[derive(Debug, Error)]
pub enum DownloadError {
    // 提交校验失败，此时还没有任务
    #[error(transparent)]
    Rejected(#[from] ParseError),

    #[error("could not retrieve metadata: {0}")]
    Metadata(String),

    #[error("could not retrieve metadata: timed out after {0}s")]
    MetadataTimeout(u64),

    #[error("download failed: {0}")]
    Transfer(String),

    #[error("file not found after operation")]
    FileNotFound(PathBuf),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("task already exists: {0}")]
    TaskAlreadyExists(String),

    #[error("downloader could not be started: {0}")]
    Spawn(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("IO错误: {0}")]
    IoError(#[from] std::io::Error),
}

impl DownloadError {
    /// 写入任务 `message` 的文本：面向用户、长度受限、不带内部细节
    pub fn user_message(&self) -> String {
        match self {
            DownloadError::Rejected(err) => err.to_string(),
            DownloadError::Metadata(_) | DownloadError::MetadataTimeout(_) => {
                "could not retrieve metadata".to_string()
            }
            DownloadError::Transfer(excerpt) => truncate(excerpt, MESSAGE_LIMIT),
            DownloadError::FileNotFound(_) => "file not found after operation".to_string(),
            DownloadError::TaskNotFound(_) => "task not found".to_string(),
            DownloadError::TaskAlreadyExists(_)
            | DownloadError::Spawn(_)
            | DownloadError::Internal(_)
            | DownloadError::IoError(_) => "internal error".to_string(),
        }
    }
}

/// 按字符截断，超长时追加省略号
pub fn truncate(text: &str, limit: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(limit).collect();
    cut.push('…');
    cut
}
