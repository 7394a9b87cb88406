use thiserror::Error;

// 提交阶段的校验错误，任务创建之前就会返回给调用方
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("No URL provided.")]
    EmptyUrl,
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Unsupported source URL: {0}")]
    UnsupportedSource(String),
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("无效的URL匹配规则: {0}")]
    InvalidPattern(#[from] regex::Error),
}
