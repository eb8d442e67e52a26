//! 下载管理器: 任务注册表 + FIFO 队列 + 有界并发派发
//!
//! 控制操作 (pause/resume/cancel) 一律返回 bool, 对不存在的任务
//! 或不匹配的状态静默返回 false, 从不向调用方抛错。

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;
use crate::core::error::{DownloadError, DownloadResult};
use crate::core::task::{
    download, DownloadTask, ReportedStatus, TaskKind, TaskSnapshot, TaskStatus,
};
use crate::utils::validator;

/// 派发循环的轮询间隔
const DISPATCH_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueInfo {
    pub queued: usize,
    pub active: usize,
    pub max_concurrent: usize,
}

#[derive(Debug, Default)]
struct ManagerState {
    registry: HashMap<Uuid, Arc<DownloadTask>>,
    queue: VecDeque<Uuid>,
    /// 正在被 worker 持有的任务
    running: HashSet<Uuid>,
    active: usize,
    shutdown: bool,
}

pub struct DownloadManager {
    config: Arc<Config>,
    client: reqwest::Client,
    state: Mutex<ManagerState>,
}

/// worker 结束 (包括 panic) 时释放并发槽位
struct SlotGuard {
    manager: Arc<DownloadManager>,
    id: Uuid,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let mut state = self.manager.state.lock().unwrap();
        state.active = state.active.saturating_sub(1);
        state.running.remove(&self.id);
    }
}

impl DownloadManager {
    /// 创建管理器并启动后台派发循环, 需要在 tokio 运行时内调用
    pub fn new(config: Config) -> DownloadResult<Arc<Self>> {
        config.validate()?;

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout))
            .read_timeout(Duration::from_secs(config.read_timeout))
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| DownloadError::Network(format!("无法创建 HTTP 客户端: {}", e)))?;

        let manager = Arc::new(Self {
            config: Arc::new(config),
            client,
            state: Mutex::new(ManagerState::default()),
        });

        let dispatcher = manager.clone();
        tokio::spawn(async move {
            dispatcher.dispatch_loop().await;
        });

        Ok(manager)
    }

    async fn dispatch_loop(self: Arc<Self>) {
        loop {
            if self.state.lock().unwrap().shutdown {
                break;
            }
            self.admit_ready();
            tokio::time::sleep(DISPATCH_INTERVAL).await;
        }
    }

    /// 在并发上限内从队首取任务派发
    fn admit_ready(self: &Arc<Self>) {
        let mut state = self.state.lock().unwrap();
        while state.active < self.config.max_concurrent_downloads {
            let Some(id) = state.queue.pop_front() else {
                break;
            };
            // 已取消的任务在出队时被丢弃
            let Some(task) = state.registry.get(&id).cloned() else {
                continue;
            };
            if task.flow.is_stopped() {
                task.set_status(TaskStatus::Stopped);
                continue;
            }

            state.active += 1;
            state.running.insert(id);

            let manager = self.clone();
            let client = self.client.clone();
            let config = self.config.clone();
            tokio::spawn(async move {
                let _slot = SlotGuard { manager, id };
                download::run(task, client, config).await;
            });
        }
    }

    /// 注册一个新任务并放入队尾, 返回任务 ID
    pub fn create_task(
        &self,
        url: &str,
        save_dir: Option<&Path>,
        kind: TaskKind,
    ) -> DownloadResult<Uuid> {
        let url = url.trim();
        if url.is_empty() {
            return Err(DownloadError::InvalidArgument("URL不能为空".to_string()));
        }
        if !validator::is_valid_url(url) {
            return Err(DownloadError::InvalidArgument(format!(
                "无效的下载地址: {}",
                url
            )));
        }

        let dir: PathBuf = match save_dir {
            Some(dir) => dir.to_path_buf(),
            None => PathBuf::from(&self.config.download_dir),
        };
        std::fs::create_dir_all(&dir)?;

        let id = Uuid::new_v4();
        let task = Arc::new(DownloadTask::new(id, url.to_string(), dir, kind));

        let mut state = self.state.lock().unwrap();
        if state.shutdown {
            return Err(DownloadError::InvalidArgument(
                "管理器已关闭".to_string(),
            ));
        }
        state.registry.insert(id, task);
        state.queue.push_back(id);
        info!("新建任务 {}: {}", id, url);
        Ok(id)
    }

    pub fn get_status(&self, id: Uuid) -> Option<TaskSnapshot> {
        let task = self.state.lock().unwrap().registry.get(&id).cloned();
        task.map(|t| t.snapshot())
    }

    pub fn list_tasks(&self) -> Vec<TaskSnapshot> {
        let tasks: Vec<_> = self
            .state
            .lock()
            .unwrap()
            .registry
            .values()
            .cloned()
            .collect();
        tasks.iter().map(|t| t.snapshot()).collect()
    }

    /// 暂停下载中的任务, 仅 Downloading 状态可暂停
    pub fn pause_task(&self, id: Uuid) -> bool {
        let Some(task) = self.state.lock().unwrap().registry.get(&id).cloned() else {
            return false;
        };
        if task.status() != TaskStatus::Downloading || task.flow.is_paused() {
            return false;
        }
        task.flow.pause();
        info!("任务 {} 已暂停", id);
        true
    }

    /// 恢复已暂停的任务
    ///
    /// 服务器不支持断点续传时任务转为失败并返回 false
    pub fn resume_task(&self, id: Uuid) -> bool {
        let mut state = self.state.lock().unwrap();
        let Some(task) = state.registry.get(&id).cloned() else {
            return false;
        };
        if task.reported_status() != ReportedStatus::Paused {
            return false;
        }
        if !task.supports_resume() {
            drop(state);
            warn!("任务 {} 无法恢复: 服务器不支持断点续传", id);
            task.set_error("服务器不支持断点续传".to_string());
            task.flow.stop();
            return false;
        }

        task.flow.resume();
        // worker 未持有任务时重新排队
        if !state.running.contains(&id) && !state.queue.contains(&id) {
            state.queue.push_back(id);
        }
        info!("任务 {} 已恢复", id);
        true
    }

    /// 取消任务: 出队, 通知 worker 停止, 移出注册表
    pub fn cancel_task(&self, id: Uuid) -> bool {
        let mut state = self.state.lock().unwrap();
        let Some(task) = state.registry.remove(&id) else {
            return false;
        };
        state.queue.retain(|queued| *queued != id);
        drop(state);

        task.flow.stop();
        if task.status() == TaskStatus::Queued {
            task.set_status(TaskStatus::Stopped);
        }
        info!("任务 {} 已取消", id);
        true
    }

    pub fn get_queue_info(&self) -> QueueInfo {
        let state = self.state.lock().unwrap();
        QueueInfo {
            queued: state.queue.len(),
            active: state.active,
            max_concurrent: self.config.max_concurrent_downloads,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 停止派发循环并通知所有任务停止
    pub fn shutdown(&self) {
        let mut state = self.state.lock().unwrap();
        state.shutdown = true;
        state.queue.clear();
        for task in state.registry.values() {
            task.flow.stop();
        }
        info!("下载管理器已关闭");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: &Path) -> Config {
        let mut config = Config::default();
        config.download_dir = dir.to_string_lossy().into_owned();
        config
    }

    #[tokio::test]
    async fn test_create_task_rejects_bad_urls() {
        let dir = std::env::temp_dir().join("imgdown_mgr_test1");
        let manager = DownloadManager::new(test_config(&dir)).unwrap();

        assert!(matches!(
            manager.create_task("", None, TaskKind::Any),
            Err(DownloadError::InvalidArgument(_))
        ));
        assert!(matches!(
            manager.create_task("   ", None, TaskKind::Any),
            Err(DownloadError::InvalidArgument(_))
        ));
        assert!(matches!(
            manager.create_task("ftp://example.com/a.jpg", None, TaskKind::Any),
            Err(DownloadError::InvalidArgument(_))
        ));

        manager.shutdown();
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_control_ops_on_unknown_id() {
        let dir = std::env::temp_dir().join("imgdown_mgr_test2");
        let manager = DownloadManager::new(test_config(&dir)).unwrap();

        let id = Uuid::new_v4();
        assert!(!manager.pause_task(id));
        assert!(!manager.resume_task(id));
        assert!(!manager.cancel_task(id));
        assert!(manager.get_status(id).is_none());

        manager.shutdown();
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_queue_info_reflects_registration() {
        let dir = std::env::temp_dir().join("imgdown_mgr_test3");
        let mut config = test_config(&dir);
        config.max_concurrent_downloads = 2;
        let manager = DownloadManager::new(config).unwrap();

        let info = manager.get_queue_info();
        assert_eq!(info.queued, 0);
        assert_eq!(info.active, 0);
        assert_eq!(info.max_concurrent, 2);

        manager.shutdown();
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_cancel_removes_from_registry() {
        let dir = std::env::temp_dir().join("imgdown_mgr_test4");
        let manager = DownloadManager::new(test_config(&dir)).unwrap();

        // 派发间隔内取消, 任务不应被执行
        let id = manager
            .create_task("http://127.0.0.1:1/never.jpg", None, TaskKind::Image)
            .unwrap();
        assert!(manager.cancel_task(id));
        assert!(manager.get_status(id).is_none());
        // 再次取消返回 false
        assert!(!manager.cancel_task(id));

        manager.shutdown();
        std::fs::remove_dir_all(&dir).ok();
    }
}
