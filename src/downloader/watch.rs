use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use futures::stream;
use tracing::debug;

use super::core::discard_artifact;
use super::models::ProgressRecord;
use super::store::TaskStore;

/// 进度轮询的节奏
#[derive(Debug, Clone, Copy)]
pub struct WatchSettings {
    pub poll_interval: Duration,
    // 终止后留给下载接口的时间，过后清理任务
    pub cleanup_grace: Duration,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            cleanup_grace: Duration::from_secs(5),
        }
    }
}

enum Phase {
    Polling { first: bool },
    Grace,
    Done,
}

struct WatchState {
    store: Arc<dyn TaskStore>,
    task_id: String,
    settings: WatchSettings,
    phase: Phase,
}

/// 定时读取仓库，生成任务状态序列；终止状态之后等待宽限期并清理。
///
/// 只读仓库，不向 runner 注册任何回调；消费方断开只会丢弃这个流。
pub fn watch_task(
    store: Arc<dyn TaskStore>,
    task_id: String,
    settings: WatchSettings,
) -> impl Stream<Item = ProgressRecord> + Send + 'static {
    let state = WatchState {
        store,
        task_id,
        settings,
        phase: Phase::Polling { first: true },
    };

    stream::unfold(state, |mut state| async move {
        loop {
            match state.phase {
                Phase::Polling { first } => {
                    if !first {
                        tokio::time::sleep(state.settings.poll_interval).await;
                    }
                    let Some(task) = state.store.get(&state.task_id).await else {
                        debug!("任务不存在: {}", state.task_id);
                        state.phase = Phase::Done;
                        return Some((ProgressRecord::not_found(), state));
                    };
                    state.phase = if task.status.is_terminal() {
                        Phase::Grace
                    } else {
                        Phase::Polling { first: false }
                    };
                    return Some((task.record(), state));
                }
                Phase::Grace => {
                    tokio::time::sleep(state.settings.cleanup_grace).await;
                    // 谁拿到被删除的任务，谁负责删除文件
                    if let Some(task) = state.store.delete(&state.task_id).await {
                        debug!("宽限期结束，清理任务: {}", state.task_id);
                        if let Some(path) = task.filepath {
                            discard_artifact(&path).await;
                        }
                    }
                    state.phase = Phase::Done;
                }
                Phase::Done => return None,
            }
        }
    })
}
