use std::collections::HashMap;
use std::sync::Mutex;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use uuid::Uuid;

use crate::core::{ReportedStatus, TaskSnapshot};

/// 管理每个任务的进度条, 按任务 ID 索引
pub struct ProgressManager {
    multi: MultiProgress,
    bars: Mutex<HashMap<Uuid, ProgressBar>>,
}

impl ProgressManager {
    pub fn new() -> Self {
        ProgressManager {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
        }
    }

    fn bar_for(&self, snapshot: &TaskSnapshot) -> ProgressBar {
        let mut bars = self.bars.lock().unwrap();
        bars.entry(snapshot.id)
            .or_insert_with(|| {
                let pb = self.multi.add(ProgressBar::new(
                    snapshot.total_size.unwrap_or(0),
                ));
                pb.set_style(
                    ProgressStyle::with_template(
                        "{prefix:.bold} [{bar:30}] {bytes}/{total_bytes} {msg}",
                    )
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
                );
                pb.set_prefix(short_id(snapshot.id));
                pb
            })
            .clone()
    }

    /// 用最新快照刷新进度条, speed 由调用方根据两次快照计算
    pub fn update(&self, snapshot: &TaskSnapshot, speed: u64) {
        let pb = self.bar_for(snapshot);
        if let Some(total) = snapshot.total_size {
            pb.set_length(total);
        }
        pb.set_position(snapshot.downloaded_size);

        let status = match snapshot.status {
            ReportedStatus::Queued => "排队中".to_string(),
            ReportedStatus::Connecting => "连接中".to_string(),
            ReportedStatus::Paused => "已暂停".to_string(),
            ReportedStatus::Downloading => {
                format!("{} | ETA:{}", speed_str(speed), eta_str(snapshot, speed))
            }
            ReportedStatus::Completed => "完成".to_string(),
            ReportedStatus::Error => snapshot
                .error
                .clone()
                .unwrap_or_else(|| "失败".to_string()),
            ReportedStatus::Stopped => "已取消".to_string(),
        };
        pb.set_message(status);

        if matches!(
            snapshot.status,
            ReportedStatus::Completed | ReportedStatus::Error | ReportedStatus::Stopped
        ) {
            pb.finish();
        }
    }
}

impl Default for ProgressManager {
    fn default() -> Self {
        Self::new()
    }
}

fn short_id(id: Uuid) -> String {
    id.to_string().chars().take(8).collect()
}

fn speed_str(speed: u64) -> String {
    if speed > 1024 * 1024 {
        format!("{:.2} MB/s", speed as f64 / (1024.0 * 1024.0))
    } else if speed > 1024 {
        format!("{:.2} KB/s", speed as f64 / 1024.0)
    } else {
        format!("{} B/s", speed)
    }
}

fn eta_str(snapshot: &TaskSnapshot, speed: u64) -> String {
    let Some(total) = snapshot.total_size else {
        return "未知".to_string();
    };
    if speed == 0 || total <= snapshot.downloaded_size {
        return "未知".to_string();
    }
    let seconds = (total - snapshot.downloaded_size) / speed;
    if seconds > 3600 {
        format!("{}h{}m", seconds / 3600, (seconds % 3600) / 60)
    } else if seconds > 60 {
        format!("{}m{}s", seconds / 60, seconds % 60)
    } else {
        format!("{}s", seconds)
    }
}
