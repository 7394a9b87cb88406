use std::str::FromStr;

use errors::ParseError;

use crate::downloader::models::OutputFormat;

pub mod detector;
pub mod errors;
pub mod progress;

pub use detector::UrlPolicy;
pub use progress::{ProgressEvent, parse_progress_line};

/// 校验后的提交内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub url: url::Url,
    pub format: OutputFormat,
}

// 提交入口的校验规则：URL 白名单 + 格式白名单
#[derive(Debug, Clone)]
pub struct SubmissionRules {
    pub urls: UrlPolicy,
    pub formats: Vec<OutputFormat>,
}

impl SubmissionRules {
    pub fn new(urls: UrlPolicy, formats: Vec<OutputFormat>) -> Self {
        Self { urls, formats }
    }

    // 默认视频格式；视频不在白名单时退回第一个允许的格式
    pub fn default_format(&self) -> OutputFormat {
        if self.formats.contains(&OutputFormat::Mp4) {
            OutputFormat::Mp4
        } else {
            self.formats.first().copied().unwrap_or_default()
        }
    }

    pub fn check(&self, url: &str, format: Option<&str>) -> Result<Submission, ParseError> {
        let url = self.urls.validate(url)?;
        let format = match format.map(str::trim).filter(|f| !f.is_empty()) {
            None => self.default_format(),
            Some(tag) => {
                let format = OutputFormat::from_str(tag)?;
                if !self.formats.contains(&format) {
                    return Err(ParseError::UnsupportedFormat(tag.to_string()));
                }
                format
            }
        };
        Ok(Submission { url, format })
    }
}

impl Default for SubmissionRules {
    fn default() -> Self {
        Self::new(UrlPolicy::default(), OutputFormat::ALL.to_vec())
    }
}
