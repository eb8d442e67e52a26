//! Core: 任务状态机、重试策略、流控、分块下载与任务调度

pub mod error;
pub mod flow;
pub mod manager;
pub mod retry;
pub mod task;

// 只导出主流程和其它模块实际用到的类型
pub use error::{DownloadError, DownloadResult};
pub use flow::FlowController;
pub use manager::{DownloadManager, QueueInfo};
pub use retry::RetryPolicy;
pub use task::{DownloadTask, ReportedStatus, TaskKind, TaskSnapshot, TaskStatus};
