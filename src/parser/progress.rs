//! 下载器输出行 -> 结构化进度事件。
//!
//! 下载器通过 `--progress-template` 每行打印一个 JSON 对象（进度字典）。
//! 这里只做纯解析，不碰任何 I/O；不完整或格式错误的行直接丢弃。

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};

use crate::downloader::models::TaskStatus;
use crate::downloader::task::TaskUpdate;

lazy_static! {
    static ref ANSI_ESCAPE: Regex = Regex::new(r"\x1b\[[0-9;]*m").unwrap();
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Downloading {
        progress: Option<f64>,
        eta: Option<String>,
        speed: Option<String>,
    },
    // 传输结束后的后处理（合并、音频转码等）
    Processing {
        step: Option<String>,
    },
}

impl From<ProgressEvent> for TaskUpdate {
    fn from(event: ProgressEvent) -> Self {
        match event {
            ProgressEvent::Downloading {
                progress,
                eta,
                speed,
            } => {
                let mut update = TaskUpdate::status(TaskStatus::Downloading);
                if let Some(progress) = progress {
                    update = update.with_progress(progress);
                }
                if let Some(eta) = eta {
                    update = update.with_eta(eta);
                }
                if let Some(speed) = speed {
                    update = update.with_speed(speed);
                }
                update
            }
            ProgressEvent::Processing { step } => {
                let message = match step {
                    Some(step) => format!("post-processing: {}", step),
                    None => "post-processing".to_string(),
                };
                TaskUpdate::status(TaskStatus::Processing).with_message(message)
            }
        }
    }
}

/// 解析一行输出。不是进度记录时返回 `None`。
pub fn parse_progress_line(line: &str) -> Option<ProgressEvent> {
    let line = line.trim();
    // 必须是一条完整的单行记录
    if !(line.starts_with('{') && line.ends_with('}')) {
        return None;
    }
    let record = match serde_json::from_str::<Value>(line) {
        Ok(Value::Object(map)) => map,
        _ => return None,
    };

    let status = text(&record, "status");
    let postprocessor = text(&record, "postprocessor");

    if postprocessor.is_some() || matches!(status.as_deref(), Some("started" | "processing")) {
        return Some(ProgressEvent::Processing {
            step: postprocessor,
        });
    }

    match status.as_deref() {
        Some("downloading") => Some(ProgressEvent::Downloading {
            progress: fraction(&record),
            eta: text(&record, "_eta_str")
                .filter(|s| s != "Unknown" && s != "NA")
                .or_else(|| number(&record, "eta").map(format_eta)),
            speed: text(&record, "_speed_str")
                .filter(|s| s != "Unknown" && s != "NA")
                .or_else(|| number(&record, "speed").map(format_speed)),
        }),
        Some("finished") => Some(ProgressEvent::Downloading {
            progress: Some(1.0),
            eta: None,
            speed: None,
        }),
        _ => None,
    }
}

fn fraction(record: &Map<String, Value>) -> Option<f64> {
    let downloaded = number(record, "downloaded_bytes");
    let total = number(record, "total_bytes").or_else(|| number(record, "total_bytes_estimate"));

    match (downloaded, total) {
        (Some(done), Some(total)) if total > 0.0 => Some((done / total).clamp(0.0, 1.0)),
        _ => text(record, "_percent_str")
            .and_then(|s| s.trim_end_matches('%').trim().parse::<f64>().ok())
            .map(|pct| (pct / 100.0).clamp(0.0, 1.0)),
    }
}

fn number(record: &Map<String, Value>, key: &str) -> Option<f64> {
    record
        .get(key)
        .and_then(Value::as_f64)
        .filter(|n| n.is_finite() && *n >= 0.0)
}

fn text(record: &Map<String, Value>, key: &str) -> Option<String> {
    let raw = record.get(key)?.as_str()?;
    let cleaned = ANSI_ESCAPE.replace_all(raw, "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

pub fn format_eta(seconds: f64) -> String {
    let total = seconds.round() as u64;
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{:02}:{:02}:{:02}", h, m, s)
    } else {
        format!("{:02}:{:02}", m, s)
    }
}

pub fn format_speed(bytes_per_sec: f64) -> String {
    const UNITS: [&str; 4] = ["B/s", "KiB/s", "MiB/s", "GiB/s"];
    let mut value = bytes_per_sec;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2}{}", value, UNITS[unit])
}
