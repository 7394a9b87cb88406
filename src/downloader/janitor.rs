use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::core::discard_artifact;
use super::store::TaskStore;

/// 清理超过保留时间的终止任务，返回清理数量。未终止的任务不会被碰。
pub async fn sweep_once(store: &dyn TaskStore, ttl: Duration) -> usize {
    let Ok(ttl) = chrono::Duration::from_std(ttl) else {
        return 0;
    };
    let Some(cutoff) = Utc::now().checked_sub_signed(ttl) else {
        return 0;
    };

    let mut removed = 0;
    for task_id in store.ids().await {
        let expired = store
            .get(&task_id)
            .await
            .is_some_and(|t| t.status.is_terminal() && t.updated_at <= cutoff);
        if !expired {
            continue;
        }
        if let Some(task) = store.delete(&task_id).await {
            debug!("回收过期任务: {} ({})", task_id, task.status);
            if let Some(path) = task.filepath {
                discard_artifact(&path).await;
            }
            removed += 1;
        }
    }
    removed
}

// 兜底：进度流断开、文件也没人取时，任务和文件靠这里回收
pub fn spawn_janitor(store: Arc<dyn TaskStore>, ttl: Duration, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // 第一次 tick 立即返回，跳过
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = sweep_once(store.as_ref(), ttl).await;
            if removed > 0 {
                info!("🧹 已回收 {} 个过期任务", removed);
            }
        }
    })
}
