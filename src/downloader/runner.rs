use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::core::{
    FetchRequest, MediaTool, discard_artifact, display_filename, locate_output,
    purge_task_files, with_extension_of,
};
use super::error::DownloadError;
use super::models::{OutputFormat, TaskStatus};
use super::store::TaskStore;
use super::task::TaskUpdate;
use crate::parser::progress::ProgressEvent;

/// 交给后台执行的一次下载
#[derive(Debug, Clone)]
pub struct Job {
    pub task_id: String,
    pub url: String,
    pub format: OutputFormat,
}

/// 单个任务的执行者。每个任务只有一个 runner 写入，进度只经由仓库对外可见。
#[derive(Clone)]
pub struct TaskRunner {
    store: Arc<dyn TaskStore>,
    tool: Arc<dyn MediaTool>,
    download_dir: PathBuf,
}

impl TaskRunner {
    pub fn new(store: Arc<dyn TaskStore>, tool: Arc<dyn MediaTool>, download_dir: PathBuf) -> Self {
        Self {
            store,
            tool,
            download_dir,
        }
    }

    pub fn spawn(&self, job: Job) -> JoinHandle<()> {
        let runner = self.clone();
        tokio::spawn(async move { runner.run(job).await })
    }

    /// 执行到终止状态为止。内部任何错误（包括 panic）都会记录为 `error`，不会让任务卡住。
    pub async fn run(&self, job: Job) {
        let task_id = job.task_id.clone();

        // 在独立的 tokio 任务里执行，panic 会变成 JoinError 而不是静默消失
        let worker = {
            let runner = self.clone();
            tokio::spawn(async move { runner.execute(job).await })
        };
        let outcome = match worker.await {
            Ok(result) => result,
            Err(join_err) if join_err.is_panic() => {
                Err(DownloadError::Internal("runner panicked".to_string()))
            }
            Err(join_err) => Err(DownloadError::Internal(join_err.to_string())),
        };

        match outcome {
            Ok(path) => info!("✅ 任务完成: {} -> {}", task_id, path.display()),
            Err(err) => {
                error!("❌ 任务失败: {}, 错误: {}", task_id, err);
                self.store
                    .update(&task_id, TaskUpdate::failed(err.user_message()))
                    .await;
                purge_task_files(&self.download_dir, &task_id).await;
            }
        }
    }

    async fn execute(&self, job: Job) -> Result<PathBuf, DownloadError> {
        let task_id = job.task_id.as_str();
        self.store
            .update(task_id, TaskUpdate::status(TaskStatus::Starting))
            .await;

        // 阶段一：元数据探测，失败即终止，不会启动传输
        let info = self.tool.probe(&job.url).await?;
        let ext = if job.format.is_audio() {
            job.format.extension()
        } else {
            info.ext.as_str()
        };
        let filename = display_filename(&info.title, ext);
        debug!("任务 {} 标题: {}", task_id, info.title);

        self.store
            .update(
                task_id,
                TaskUpdate::status(TaskStatus::Downloading)
                    .with_filename(filename.clone())
                    .with_progress(0.0),
            )
            .await;

        // 阶段二：传输，进度事件边读边写入仓库
        let request = FetchRequest {
            task_id: job.task_id.clone(),
            url: job.url.clone(),
            format: job.format,
            output_dir: self.download_dir.clone(),
        };
        let (tx, mut rx) = mpsc::unbounded_channel::<ProgressEvent>();
        let pump = async {
            while let Some(event) = rx.recv().await {
                self.store.update(task_id, event.into()).await;
            }
        };
        let (result, ()) = tokio::join!(self.tool.fetch(&request, tx), pump);
        result?;

        let path = locate_output(&self.download_dir, task_id).await?;
        let filename = with_extension_of(&filename, &path);

        if !self
            .store
            .update(task_id, TaskUpdate::complete(path.clone(), filename))
            .await
        {
            warn!("任务 {} 已不存在，丢弃产物", task_id);
            discard_artifact(&path).await;
            return Err(DownloadError::TaskNotFound(task_id.to_string()));
        }
        Ok(path)
    }
}
