use std::sync::Arc;

use crate::downloader::DownloadService;

/// 所有接口共享的状态，按请求克隆
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<DownloadService>,
}

impl AppState {
    pub fn new(service: Arc<DownloadService>) -> Self {
        Self { service }
    }
}
