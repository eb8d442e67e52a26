//! ImgDown: 图片下载子系统
//!
//! 对外提供 [`core::DownloadManager`]: 调用方提交 URL 与保存目录,
//! 之后轮询任务快照或发出暂停/恢复/取消指令。

pub mod cli;
pub mod config;
pub mod core;
pub mod ui;
pub mod utils;

pub use config::Config;
pub use core::{
    DownloadError, DownloadManager, DownloadResult, ReportedStatus, TaskKind, TaskSnapshot,
};
