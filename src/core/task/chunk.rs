//! 大文件分块并行下载
//!
//! 每个分块写入独立的 `<目标文件>.chunk<i>` 临时文件, 全部成功后
//! 按序合并; 任何一个分块耗尽重试则中止所有分块并清理临时文件。
//! 分块进行到一半的进度不跨进程保留, 重启后整文件续传仍然可用。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use log::{debug, warn};
use reqwest::header::RANGE;
use reqwest::StatusCode;
use tokio::io::AsyncWriteExt;

use crate::config::Config;
use crate::core::error::{DownloadError, DownloadResult};
use crate::core::task::DownloadTask;

/// 单个分块的字节区间, 闭区间
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    pub index: usize,
    pub start: u64,
    pub end: u64,
}

impl ChunkRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// 把文件切成近似等长的区间
///
/// 分块数 W = min(max_workers, total / min_chunk_size + 1),
/// 余数并入最后一块
pub fn split_ranges(total: u64, max_workers: usize, min_chunk_size: u64) -> Vec<ChunkRange> {
    if total == 0 {
        return Vec::new();
    }
    let by_size = (total / min_chunk_size + 1) as usize;
    let workers = max_workers.min(by_size).max(1);
    let chunk_size = total / workers as u64;

    (0..workers)
        .map(|i| {
            let start = i as u64 * chunk_size;
            let end = if i == workers - 1 {
                total - 1
            } else {
                start + chunk_size - 1
            };
            ChunkRange { index: i, start, end }
        })
        .collect()
}

fn chunk_path(task: &DownloadTask, index: usize) -> std::path::PathBuf {
    let dest = task.dest_path();
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(".chunk{}", index));
    dest.with_file_name(name)
}

/// 并行下载整个文件并合并
pub async fn run_parallel(
    task: &Arc<DownloadTask>,
    client: &reqwest::Client,
    config: &Arc<Config>,
    url: &str,
    total: u64,
) -> DownloadResult<()> {
    let ranges = split_ranges(total, config.max_workers_per_download, config.min_chunk_size);
    debug!("任务 {} 分为 {} 块", task.id, ranges.len());

    task.begin_chunk_phase(ranges.len());
    let abort = Arc::new(AtomicBool::new(false));

    let mut handles = Vec::with_capacity(ranges.len());
    for range in &ranges {
        let task = task.clone();
        let client = client.clone();
        let config = config.clone();
        let url = url.to_string();
        let abort = abort.clone();
        let range = *range;
        handles.push(tokio::spawn(async move {
            download_chunk(&task, &client, &config, &url, range, &abort).await
        }));
    }

    let mut first_error: Option<DownloadError> = None;
    for handle in handles {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(DownloadError::ChunkFailure(format!("分块线程崩溃: {}", e))),
        };
        if let Err(e) = result {
            if first_error.is_none() {
                first_error = Some(e);
            }
        }
    }

    let outcome = match first_error {
        None => merge_chunks(task, &ranges).await,
        Some(e) => {
            cleanup_chunks(task, &ranges).await;
            if task.flow.is_stopped() {
                Err(e)
            } else {
                Err(DownloadError::ChunkFailure(format!("分块下载中止: {}", e)))
            }
        }
    };

    task.end_chunk_phase();
    outcome
}

/// 单个分块的重试循环
async fn download_chunk(
    task: &Arc<DownloadTask>,
    client: &reqwest::Client,
    config: &Arc<Config>,
    url: &str,
    range: ChunkRange,
    abort: &AtomicBool,
) -> DownloadResult<()> {
    let mut policy = config.retry_policy();

    loop {
        if abort.load(Ordering::SeqCst) {
            return Err(DownloadError::ChunkFailure(format!(
                "分块 {} 因其他分块失败而取消",
                range.index
            )));
        }
        if task.flow.wait_if_paused().await {
            return Err(DownloadError::ChunkFailure(format!(
                "分块 {} 已停止",
                range.index
            )));
        }

        match attempt_chunk(task, client, url, range, abort).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                if e.is_fatal() || !policy.should_retry(&e) {
                    warn!("任务 {} 分块 {} 耗尽重试: {}", task.id, range.index, e);
                    abort.store(true, Ordering::SeqCst);
                    return Err(e);
                }
                let delay = policy.next_delay();
                policy.record_attempt();
                warn!(
                    "任务 {} 分块 {} 第 {} 次重试: {}",
                    task.id,
                    range.index,
                    policy.attempts(),
                    e
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// 单次分块尝试, 每次都重写整个分块文件
async fn attempt_chunk(
    task: &Arc<DownloadTask>,
    client: &reqwest::Client,
    url: &str,
    range: ChunkRange,
    abort: &AtomicBool,
) -> DownloadResult<()> {
    let response = client
        .get(url)
        .header(RANGE, format!("bytes={}-{}", range.start, range.end))
        .send()
        .await
        .map_err(|e| DownloadError::Network(e.to_string()))?;

    let status = response.status();
    if status != StatusCode::PARTIAL_CONTENT {
        if !status.is_success() {
            return Err(DownloadError::HttpStatus(status.as_u16()));
        }
        // 探测说支持 Range 但实际返回 200, 当作网络抖动重试
        return Err(DownloadError::Network(format!(
            "服务器未接受 Range 请求, 返回 {}",
            status.as_u16()
        )));
    }

    let path = chunk_path(task, range.index);
    let mut file = tokio::fs::File::create(&path).await?;
    let mut written: u64 = 0;
    task.update_chunk_progress(range.index, 0);

    let mut stream = response.bytes_stream();
    while let Some(block) = stream.next().await {
        let block = block.map_err(|e| DownloadError::Network(e.to_string()))?;
        file.write_all(&block).await?;
        written += block.len() as u64;
        task.update_chunk_progress(range.index, written);

        if abort.load(Ordering::SeqCst) {
            return Err(DownloadError::ChunkFailure(format!(
                "分块 {} 因其他分块失败而取消",
                range.index
            )));
        }
        if task.flow.wait_if_paused().await {
            return Err(DownloadError::ChunkFailure(format!(
                "分块 {} 已停止",
                range.index
            )));
        }
    }
    file.flush().await?;

    if written != range.len() {
        task.update_chunk_progress(range.index, 0);
        return Err(DownloadError::Network(format!(
            "分块 {} 不完整: {} / {} 字节",
            range.index,
            written,
            range.len()
        )));
    }
    Ok(())
}

/// 按序把分块文件拼成目标文件, 然后删除分块文件
async fn merge_chunks(task: &Arc<DownloadTask>, ranges: &[ChunkRange]) -> DownloadResult<()> {
    let dest = task.dest_path();
    let mut out = tokio::fs::File::create(&dest).await?;

    for range in ranges {
        let path = chunk_path(task, range.index);
        let mut part = tokio::fs::File::open(&path).await?;
        tokio::io::copy(&mut part, &mut out).await?;
    }
    out.flush().await?;

    for range in ranges {
        tokio::fs::remove_file(chunk_path(task, range.index)).await.ok();
    }
    Ok(())
}

async fn cleanup_chunks(task: &Arc<DownloadTask>, ranges: &[ChunkRange]) {
    for range in ranges {
        tokio::fs::remove_file(chunk_path(task, range.index)).await.ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_ranges_cover_file() {
        let ranges = split_ranges(10 * 1024 * 1024, 4, 1024 * 1024);
        assert_eq!(ranges.len(), 4);
        assert_eq!(ranges[0].start, 0);
        assert_eq!(ranges[3].end, 10 * 1024 * 1024 - 1);
        // 区间连续无缝隙
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].end + 1, pair[1].start);
        }
        let total: u64 = ranges.iter().map(|r| r.len()).sum();
        assert_eq!(total, 10 * 1024 * 1024);
    }

    #[test]
    fn test_split_ranges_small_file_fewer_workers() {
        // 2.5MB 文件, 最小块 1MB, 最多 3 块
        let ranges = split_ranges(2_621_440, 8, 1024 * 1024);
        assert_eq!(ranges.len(), 3);
        let total: u64 = ranges.iter().map(|r| r.len()).sum();
        assert_eq!(total, 2_621_440);
    }

    #[test]
    fn test_split_ranges_remainder_in_last() {
        let ranges = split_ranges(1001, 2, 100);
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0].len(), 500);
        assert_eq!(ranges[1].len(), 501);
    }

    #[test]
    fn test_split_ranges_empty() {
        assert!(split_ranges(0, 4, 1024).is_empty());
    }
}
