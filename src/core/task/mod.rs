//! `task` 模块包含了与单个下载任务相关的所有逻辑
//!
//! 主要包括：
//! - `download`: 单流下载循环 (断点续传 + 重试)
//! - `chunk`: 大文件分块并行下载
//! - `util`: HEAD 探测, 扩展名推断, 分享链接改写

pub mod chunk;
pub mod download;
pub mod util;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::flow::FlowController;

pub use self::util::FileInfo;

/// 任务内部状态机, 只能向前推进, 终态不可退出
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Queued,
    Connecting,
    Downloading,
    Completed,
    Error,
    Stopped,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Error | TaskStatus::Stopped
        )
    }
}

/// 对外报告的状态, Paused 是派生状态而非存储状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportedStatus {
    Queued,
    Connecting,
    Downloading,
    Paused,
    Completed,
    Error,
    Stopped,
}

/// 任务类型决定响应内容的校验策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// 任意文件, 不做内容校验
    Any,
    /// 图片任务, 拒绝非图片扩展名
    Image,
}

#[derive(Debug)]
struct TaskState {
    status: TaskStatus,
    total_size: Option<u64>,
    extension: Option<String>,
    supports_resume: bool,
    error: Option<String>,
    retry_count: u32,
    last_retry: Option<DateTime<Utc>>,
    /// 并行分块阶段的进度表, 仅在分块下载期间为 Some
    chunk_progress: Option<HashMap<usize, u64>>,
}

/// 单个 URL 到本地文件的下载任务
///
/// 可变共享只有两处: 流控标志在 `FlowController` 内,
/// 其余状态都在任务自身的锁后面, 由持有任务的 worker 写入
#[derive(Debug)]
pub struct DownloadTask {
    pub id: Uuid,
    pub url: String,
    save_dir: PathBuf,
    kind: TaskKind,
    pub flow: FlowController,
    state: Mutex<TaskState>,
}

/// 提供给调用方轮询的任务快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: Uuid,
    pub url: String,
    pub status: ReportedStatus,
    pub downloaded_size: u64,
    pub total_size: Option<u64>,
    pub retry_count: u32,
    pub error: Option<String>,
    pub file_path: PathBuf,
}

impl DownloadTask {
    pub fn new(id: Uuid, url: String, save_dir: PathBuf, kind: TaskKind) -> Self {
        Self {
            id,
            url,
            save_dir,
            kind,
            flow: FlowController::new(),
            state: Mutex::new(TaskState {
                status: TaskStatus::Queued,
                total_size: None,
                extension: None,
                supports_resume: false,
                error: None,
                retry_count: 0,
                last_retry: None,
                chunk_progress: None,
            }),
        }
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn status(&self) -> TaskStatus {
        self.state.lock().unwrap().status
    }

    /// 状态只向前走, 进入终态后所有迁移请求被忽略
    pub fn set_status(&self, status: TaskStatus) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.status.is_terminal() {
            return false;
        }
        state.status = status;
        true
    }

    /// 派生对外状态: 运行中且被暂停时报告 Paused
    pub fn reported_status(&self) -> ReportedStatus {
        let status = self.status();
        match status {
            TaskStatus::Connecting | TaskStatus::Downloading if self.flow.is_paused() => {
                ReportedStatus::Paused
            }
            TaskStatus::Queued => ReportedStatus::Queued,
            TaskStatus::Connecting => ReportedStatus::Connecting,
            TaskStatus::Downloading => ReportedStatus::Downloading,
            TaskStatus::Completed => ReportedStatus::Completed,
            TaskStatus::Error => ReportedStatus::Error,
            TaskStatus::Stopped => ReportedStatus::Stopped,
        }
    }

    pub fn set_error(&self, message: String) {
        let mut state = self.state.lock().unwrap();
        if !state.status.is_terminal() {
            state.error = Some(message);
            state.status = TaskStatus::Error;
        }
    }

    pub fn error(&self) -> Option<String> {
        self.state.lock().unwrap().error.clone()
    }

    pub fn total_size(&self) -> Option<u64> {
        self.state.lock().unwrap().total_size
    }

    pub fn set_total_size(&self, size: u64) {
        self.state.lock().unwrap().total_size = Some(size);
    }

    pub fn supports_resume(&self) -> bool {
        self.state.lock().unwrap().supports_resume
    }

    pub fn set_supports_resume(&self, value: bool) {
        self.state.lock().unwrap().supports_resume = value;
    }

    pub fn retry_count(&self) -> u32 {
        self.state.lock().unwrap().retry_count
    }

    pub fn record_retry(&self, count: u32, at: DateTime<Utc>) {
        let mut state = self.state.lock().unwrap();
        state.retry_count = count;
        state.last_retry = Some(at);
    }

    pub fn extension(&self) -> Option<String> {
        self.state.lock().unwrap().extension.clone()
    }

    pub fn set_extension(&self, ext: Option<String>) {
        self.state.lock().unwrap().extension = ext;
    }

    /// 不含扩展名的目标路径, 文件名即任务 ID
    pub fn dest_stem(&self) -> PathBuf {
        self.save_dir.join(self.id.to_string())
    }

    /// 最终目标路径, 扩展名在首个响应到达后才确定
    pub fn dest_path(&self) -> PathBuf {
        let stem = self.dest_stem();
        match self.extension() {
            Some(ext) => stem.with_extension(ext),
            None => stem,
        }
    }

    /// 已下载字节数永远从磁盘读取, 进程崩溃后数字依然正确;
    /// 分块阶段例外, 此时汇总协调器的进度表
    pub fn downloaded_size(&self) -> u64 {
        {
            let state = self.state.lock().unwrap();
            if let Some(progress) = &state.chunk_progress {
                return progress.values().sum();
            }
        }
        file_size(&self.dest_path())
    }

    pub fn begin_chunk_phase(&self, workers: usize) {
        let mut state = self.state.lock().unwrap();
        state.chunk_progress = Some((0..workers).map(|i| (i, 0)).collect());
    }

    pub fn update_chunk_progress(&self, index: usize, bytes: u64) {
        let mut state = self.state.lock().unwrap();
        if let Some(progress) = &mut state.chunk_progress {
            progress.insert(index, bytes);
        }
    }

    pub fn end_chunk_phase(&self) {
        self.state.lock().unwrap().chunk_progress = None;
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id,
            url: self.url.clone(),
            status: self.reported_status(),
            downloaded_size: self.downloaded_size(),
            total_size: self.total_size(),
            retry_count: self.retry_count(),
            error: self.error(),
            file_path: self.dest_path(),
        }
    }
}

pub(crate) fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}
