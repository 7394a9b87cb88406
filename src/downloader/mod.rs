use std::path::PathBuf;
use std::sync::Arc;

use futures::Stream;
use tracing::{debug, info};
use uuid::Uuid;

use self::core::{MediaTool, YtDlp};
use self::error::DownloadError;
use self::models::{ProgressRecord, TaskStatus};
use self::runner::{Job, TaskRunner};
use self::store::{MemoryTaskStore, TaskStore};
use self::watch::{WatchSettings, watch_task};

use crate::cli::AppConfig;
use crate::parser::SubmissionRules;

pub mod core;
pub mod error;
pub mod janitor;
pub mod models;
pub mod runner;
pub mod store;
pub mod task;
pub mod watch;

/// 已完成任务的产物，交给下载接口发送
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub task_id: String,
    pub path: PathBuf,
    pub filename: String,
}

/// 三个接口背后的协调层：提交、进度流、取文件
pub struct DownloadService {
    store: Arc<dyn TaskStore>,
    runner: TaskRunner,
    rules: SubmissionRules,
    watch: WatchSettings,
}

impl DownloadService {
    pub fn new(
        store: Arc<dyn TaskStore>,
        tool: Arc<dyn MediaTool>,
        rules: SubmissionRules,
        download_dir: PathBuf,
        watch: WatchSettings,
    ) -> Self {
        Self {
            runner: TaskRunner::new(Arc::clone(&store), tool, download_dir),
            store,
            rules,
            watch,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            Arc::new(MemoryTaskStore::new()),
            Arc::new(YtDlp::new(config.tool.clone())),
            config.rules.clone(),
            config.download_dir.clone(),
            config.watch,
        )
    }

    pub fn store(&self) -> Arc<dyn TaskStore> {
        Arc::clone(&self.store)
    }

    /// 校验输入、登记任务并在后台启动下载，立即返回任务ID
    pub async fn submit(&self, url: &str, format: Option<&str>) -> Result<String, DownloadError> {
        // 校验先于任何任务和子进程
        let submission = self.rules.check(url, format)?;

        let task_id = loop {
            let candidate = Uuid::new_v4().to_string();
            match self.store.create(&candidate).await {
                Ok(()) => break candidate,
                Err(DownloadError::TaskAlreadyExists(_)) => continue,
                Err(e) => return Err(e),
            }
        };

        info!(
            "新任务 {}: {} (格式: {})",
            task_id, submission.url, submission.format
        );
        self.runner.spawn(Job {
            task_id: task_id.clone(),
            url: submission.url.to_string(),
            format: submission.format,
        });
        Ok(task_id)
    }

    // 返回的流不借用 `self` 和 `task_id`，可以直接交给 SSE 响应
    pub fn watch(&self, task_id: &str) -> impl Stream<Item = ProgressRecord> + Send + 'static + use<> {
        watch_task(self.store(), task_id.to_string(), self.watch)
    }

    /// 领取已完成任务的产物。领取即从仓库删除，同一任务只会成功一次。
    pub async fn take_artifact(&self, task_id: &str) -> Option<Artifact> {
        // 失败的查询不能修改任务
        let task = self.store.get(task_id).await?;
        if task.status != TaskStatus::Complete {
            debug!("任务 {} 尚未完成 ({})，拒绝下载", task_id, task.status);
            return None;
        }

        // 与宽限期清理竞争：只有删除成功的一方继续
        let task = self.store.delete(task_id).await?;
        let path = task.filepath?;
        let filename = task.filename.unwrap_or_else(|| {
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "download".to_string())
        });
        Some(Artifact {
            task_id: task.task_id,
            path,
            filename,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::runner::tests::{FakeTool, FetchOutcome, ProbeOutcome};
    use crate::downloader::task::TaskUpdate;
    use crate::parser::UrlPolicy;
    use crate::parser::errors::ParseError;
    use futures::StreamExt;
    use std::collections::HashSet;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tempfile::TempDir;

    fn service(tool: FakeTool, dir: &TempDir) -> (DownloadService, Arc<FakeTool>) {
        let tool = Arc::new(tool);
        let rules = SubmissionRules::new(
            UrlPolicy::default()
                .with_extra([r"^https://example\.com/video/"])
                .unwrap(),
            models::OutputFormat::ALL.to_vec(),
        );
        let svc = DownloadService::new(
            Arc::new(MemoryTaskStore::new()),
            tool.clone(),
            rules,
            dir.path().to_path_buf(),
            WatchSettings {
                poll_interval: Duration::from_millis(20),
                cleanup_grace: Duration::from_millis(50),
            },
        );
        (svc, tool)
    }

    async fn wait_terminal(svc: &DownloadService, id: &str) -> task::Task {
        for _ in 0..500 {
            if let Some(task) = svc.store().get(id).await {
                if task.status.is_terminal() {
                    return task;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("任务 {} 没有到达终止状态", id);
    }

    #[tokio::test]
    async fn invalid_submission_creates_nothing() {
        let dir = TempDir::new().unwrap();
        let (svc, tool) = service(FakeTool::succeeding("mp4"), &dir);

        let err = svc.submit("https://evil.example.org/x", None).await.unwrap_err();
        assert!(matches!(err, DownloadError::Rejected(ParseError::UnsupportedSource(_))));
        let err = svc
            .submit("https://youtu.be/abc", Some("avi"))
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::Rejected(ParseError::UnsupportedFormat(_))));

        assert!(svc.store().ids().await.is_empty());
        assert_eq!(tool.fetch_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn submissions_get_unique_ids() {
        let dir = TempDir::new().unwrap();
        let (svc, _tool) = service(FakeTool::succeeding("mp4"), &dir);

        let mut ids = HashSet::new();
        for _ in 0..20 {
            let id = svc.submit("https://youtu.be/abc", None).await.unwrap();
            let first = Box::pin(svc.watch(&id)).next().await.unwrap();
            assert!(
                matches!(first.status, TaskStatus::Pending | TaskStatus::Starting),
                "新任务的第一条记录是 {}",
                first.status
            );
            assert!(ids.insert(id));
        }
    }

    #[tokio::test]
    async fn watch_stream_outlives_service_and_id() {
        let dir = TempDir::new().unwrap();
        let records = {
            let (svc, _tool) = service(FakeTool::succeeding("mp4"), &dir);
            let id = String::from("never-submitted");
            svc.watch(&id)
        };
        let records: Vec<_> = records.collect().await;
        assert_eq!(records, vec![ProgressRecord::not_found()]);
    }

    #[tokio::test]
    async fn end_to_end_artifact_is_handed_out_once() {
        let dir = TempDir::new().unwrap();
        let (svc, _tool) = service(FakeTool::succeeding("mp4"), &dir);

        let id = svc
            .submit("https://example.com/video/abc", None)
            .await
            .unwrap();
        let task = wait_terminal(&svc, &id).await;
        assert_eq!(task.status, TaskStatus::Complete);
        assert_eq!(task.filename.as_deref(), Some("clip.mp4"));

        let artifact = svc.take_artifact(&id).await.unwrap();
        assert_eq!(artifact.path, dir.path().join(format!("{}.mp4", id)));
        assert_eq!(artifact.filename, "clip.mp4");
        assert!(svc.take_artifact(&id).await.is_none());
        assert!(svc.store().get(&id).await.is_none());
    }

    #[tokio::test]
    async fn failed_task_never_yields_an_artifact() {
        let dir = TempDir::new().unwrap();
        let tool = FakeTool::new(
            ProbeOutcome::Info("clip", "mp4"),
            vec![],
            FetchOutcome::Exit("ERROR: Private video"),
        );
        let (svc, _tool) = service(tool, &dir);

        let id = svc.submit("https://youtu.be/abc", None).await.unwrap();
        wait_terminal(&svc, &id).await;

        assert!(svc.take_artifact(&id).await.is_none());
        assert!(svc.take_artifact(&id).await.is_none());
        // 失败的查询不会删除任务
        assert!(svc.store().get(&id).await.is_some());
    }

    #[tokio::test]
    async fn unfinished_task_is_not_claimed() {
        let dir = TempDir::new().unwrap();
        let (svc, _tool) = service(FakeTool::succeeding("mp4"), &dir);
        svc.store().create("manual").await.unwrap();
        svc.store()
            .update("manual", TaskUpdate::status(TaskStatus::Downloading))
            .await;

        assert!(svc.take_artifact("manual").await.is_none());
        assert!(svc.take_artifact("never-submitted").await.is_none());
        assert_eq!(
            svc.store().get("manual").await.unwrap().status,
            TaskStatus::Downloading
        );
    }

    #[tokio::test]
    async fn watch_reports_progress_then_terminal_record() {
        let dir = TempDir::new().unwrap();
        let (svc, _tool) = service(FakeTool::succeeding("mp4"), &dir);

        let id = svc.submit("https://youtu.be/abc", Some("mp4")).await.unwrap();
        let records: Vec<_> = svc.watch(&id).collect().await;

        assert!(!records.is_empty());
        assert!(
            records
                .windows(2)
                .all(|w| w[0].status.rank() <= w[1].status.rank())
        );
        assert_eq!(records.last().unwrap().status, TaskStatus::Complete);
        // 宽限期后任务和文件都被清理
        assert!(svc.store().get(&id).await.is_none());
        assert!(!dir.path().join(format!("{}.mp4", id)).exists());
    }
}
