use std::path::PathBuf;

use chrono::{DateTime, Utc};

use super::models::{ProgressRecord, TaskStatus};

/// 一次下载/转码请求及其可变状态
#[derive(Debug, Clone)]
pub struct Task {
    pub task_id: String,
    pub status: TaskStatus,
    pub progress: Option<f64>,
    pub eta: Option<String>,
    pub speed: Option<String>,
    pub message: Option<String>,
    pub filename: Option<String>,
    // 仅在 status == Complete 时存在
    pub filepath: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(task_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Pending,
            progress: None,
            eta: None,
            speed: None,
            message: None,
            filename: None,
            filepath: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 合并一次局部更新。终止状态之后的更新、以及状态倒退的更新都会被拒绝。
    pub fn apply(&mut self, update: TaskUpdate) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        if let Some(next) = update.status {
            if next.rank() < self.status.rank() {
                return false;
            }
            // 没有产物路径的完成更新不合法
            if next == TaskStatus::Complete && update.filepath.is_none() {
                return false;
            }
            if next != self.status {
                // 换阶段后旧的速度和剩余时间已经没有意义
                self.eta = None;
                self.speed = None;
            }
            self.status = next;
        }

        if let Some(progress) = update.progress {
            self.progress = Some(progress.clamp(0.0, 1.0));
        }
        if update.eta.is_some() {
            self.eta = update.eta;
        }
        if update.speed.is_some() {
            self.speed = update.speed;
        }
        if update.message.is_some() {
            self.message = update.message;
        }
        if update.filename.is_some() {
            self.filename = update.filename;
        }
        if self.status == TaskStatus::Complete {
            // 完成记录不再带处理阶段的说明
            self.message = None;
            self.filepath = update.filepath;
            self.progress = Some(1.0);
        }

        self.updated_at = Utc::now();
        true
    }

    pub fn record(&self) -> ProgressRecord {
        ProgressRecord {
            status: self.status,
            progress: self.progress,
            eta: self.eta.clone(),
            speed: self.speed.clone(),
            message: self.message.clone(),
            filename: self.filename.clone(),
        }
    }
}

/// 局部字段更新。`filepath` 只能通过 [`TaskUpdate::complete`] 设置。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    status: Option<TaskStatus>,
    progress: Option<f64>,
    eta: Option<String>,
    speed: Option<String>,
    message: Option<String>,
    filename: Option<String>,
    filepath: Option<PathBuf>,
}

impl TaskUpdate {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn progress_only() -> Self {
        Self::default()
    }

    pub fn complete(filepath: PathBuf, filename: impl Into<String>) -> Self {
        Self {
            status: Some(TaskStatus::Complete),
            filepath: Some(filepath),
            filename: Some(filename.into()),
            ..Default::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Some(TaskStatus::Error),
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_eta(mut self, eta: impl Into<String>) -> Self {
        self.eta = Some(eta.into());
        self
    }

    pub fn with_speed(mut self, speed: impl Into<String>) -> Self {
        self.speed = Some(speed.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn target_status(&self) -> Option<TaskStatus> {
        self.status
    }
}
