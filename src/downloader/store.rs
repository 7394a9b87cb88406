use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use super::error::DownloadError;
use super::task::{Task, TaskUpdate};

/// 任务仓库。读写方只通过这里共享状态，实现内部负责同步。
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// 插入一个 pending 任务，标识重复时报错
    async fn create(&self, task_id: &str) -> Result<(), DownloadError>;

    async fn get(&self, task_id: &str) -> Option<Task>;

    /// 合并局部更新，返回更新是否生效（任务不存在、已终止或状态倒退时为 false）
    async fn update(&self, task_id: &str, update: TaskUpdate) -> bool;

    /// 幂等删除，返回被移除的任务；拿到 `Some` 的调用方负责回收产物文件
    async fn delete(&self, task_id: &str) -> Option<Task>;

    async fn ids(&self) -> Vec<String>;
}

// 进程内实现：DashMap 按键分片加锁，同一键上的操作串行化
#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: DashMap<String, Task>, // task_id -> Task
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn create(&self, task_id: &str) -> Result<(), DownloadError> {
        match self.tasks.entry(task_id.to_string()) {
            Entry::Occupied(_) => Err(DownloadError::TaskAlreadyExists(task_id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(Task::new(task_id));
                debug!("任务已登记: {}", task_id);
                Ok(())
            }
        }
    }

    async fn get(&self, task_id: &str) -> Option<Task> {
        self.tasks.get(task_id).map(|task| task.value().clone())
    }

    async fn update(&self, task_id: &str, update: TaskUpdate) -> bool {
        // get_mut 持有分片写锁，整组字段一次性生效
        match self.tasks.get_mut(task_id) {
            Some(mut task) => {
                let applied = task.apply(update);
                if !applied {
                    debug!("忽略任务 {} 的过期更新 (当前状态: {})", task_id, task.status);
                }
                applied
            }
            None => false,
        }
    }

    async fn delete(&self, task_id: &str) -> Option<Task> {
        self.tasks.remove(task_id).map(|(_, task)| task)
    }

    async fn ids(&self) -> Vec<String> {
        self.tasks.iter().map(|entry| entry.key().clone()).collect()
    }
}
