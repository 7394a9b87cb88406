use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::parser::errors::ParseError;

// --------------------------------------------------------------------
/// 任务状态，按生命周期先后排列
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Starting,
    Downloading,
    Processing,
    Complete,
    Error,
}

impl TaskStatus {
    // 状态序号，只允许向前推进；两个终止状态同级
    pub fn rank(self) -> u8 {
        match self {
            TaskStatus::Pending => 0,
            TaskStatus::Starting => 1,
            TaskStatus::Downloading => 2,
            TaskStatus::Processing => 3,
            TaskStatus::Complete | TaskStatus::Error => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Complete | TaskStatus::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Starting => "starting",
            TaskStatus::Downloading => "downloading",
            TaskStatus::Processing => "processing",
            TaskStatus::Complete => "complete",
            TaskStatus::Error => "error",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --------------------------------------------------------------------
/// 输出格式：一个视频容器，或若干音频编码
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Mp4,
    Mp3,
    M4a,
    Opus,
    Wav,
    Flac,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 6] = [
        OutputFormat::Mp4,
        OutputFormat::Mp3,
        OutputFormat::M4a,
        OutputFormat::Opus,
        OutputFormat::Wav,
        OutputFormat::Flac,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "mp4",
            OutputFormat::Mp3 => "mp3",
            OutputFormat::M4a => "m4a",
            OutputFormat::Opus => "opus",
            OutputFormat::Wav => "wav",
            OutputFormat::Flac => "flac",
        }
    }

    pub fn is_audio(self) -> bool {
        !matches!(self, OutputFormat::Mp4)
    }

    // 文件扩展名与格式标签一致
    pub fn extension(self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim().to_ascii_lowercase();
        OutputFormat::ALL
            .into_iter()
            .find(|f| f.as_str() == tag)
            .ok_or_else(|| ParseError::UnsupportedFormat(s.to_string()))
    }
}

// --------------------------------------------------------------------
/// 元数据探测的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaInfo {
    pub title: String,
    pub ext: String,
}

/// 推送给前端的进度记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressRecord {
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

impl ProgressRecord {
    pub fn not_found() -> Self {
        Self {
            status: TaskStatus::Error,
            progress: None,
            eta: None,
            speed: None,
            message: Some("task not found".to_string()),
            filename: None,
        }
    }
}
