//! 单流下载循环: 断点续传 + 指数退避重试

use std::sync::Arc;

use futures::StreamExt;
use log::{debug, info, warn};
use reqwest::header::RANGE;
use reqwest::StatusCode;
use tokio::io::AsyncWriteExt;

use crate::config::Config;
use crate::core::error::{DownloadError, DownloadResult};
use crate::core::task::{chunk, file_size, util, DownloadTask, TaskKind, TaskStatus};

enum Outcome {
    Completed,
    Stopped,
}

/// 把任务驱动到终态
///
/// 失败不向外传播, 调用方通过任务快照观察结果
pub async fn run(task: Arc<DownloadTask>, client: reqwest::Client, config: Arc<Config>) {
    // 入队后被取消的任务不会走到这里, 但 stop 与派发之间存在窗口
    if task.flow.is_stopped() {
        task.set_status(TaskStatus::Stopped);
        return;
    }
    task.set_status(TaskStatus::Connecting);

    let url = match util::direct_download_url(&task.url) {
        Ok(url) => url,
        Err(e) => {
            task.set_error(e.to_string());
            return;
        }
    };

    // HEAD 探测决定下载策略
    let info = util::probe(&client, &url).await;
    task.set_supports_resume(info.supports_range);
    if let Some(total) = info.total_size {
        task.set_total_size(total);
    }
    if task.extension().is_none() {
        task.set_extension(info.extension.clone());
    }

    // 大文件且支持 Range 且尚无断点时走分块并行
    if config.enable_parallel_chunks && info.supports_range {
        if let Some(total) = info.total_size {
            if total >= config.parallel_threshold && file_size(&task.dest_path()) == 0 {
                if let Err(e) = validate_kind(&task) {
                    task.set_error(e.to_string());
                    return;
                }
                info!("任务 {} 启用分块下载, 共 {} 字节", task.id, total);
                // 整个分块阶段都处于 Downloading, 暂停/恢复按块生效
                task.set_status(TaskStatus::Downloading);
                match chunk::run_parallel(&task, &client, &config, &url, total).await {
                    Ok(()) => {
                        task.set_status(TaskStatus::Completed);
                    }
                    Err(_) if task.flow.is_stopped() => {
                        task.set_status(TaskStatus::Stopped);
                    }
                    Err(e) => {
                        task.set_error(e.to_string());
                    }
                }
                return;
            }
        }
    }

    let mut policy = config.retry_policy();

    loop {
        if task.flow.wait_if_paused().await {
            task.set_status(TaskStatus::Stopped);
            return;
        }

        match attempt(&task, &client, &url).await {
            Ok(Outcome::Completed) => {
                info!("任务 {} 下载完成: {}", task.id, task.dest_path().display());
                task.set_status(TaskStatus::Completed);
                return;
            }
            Ok(Outcome::Stopped) => {
                task.set_status(TaskStatus::Stopped);
                return;
            }
            Err(e) => {
                if e.is_fatal() || !policy.should_retry(&e) {
                    warn!("任务 {} 失败: {}", task.id, e);
                    task.set_error(e.to_string());
                    return;
                }
                // 先取当前延迟再计数, 首次重试等 initial_delay
                let delay = policy.next_delay();
                policy.record_attempt();
                task.record_retry(policy.attempts(), chrono::Utc::now());
                warn!(
                    "任务 {} 第 {} 次重试, {:.1} 秒后继续: {}",
                    task.id,
                    policy.attempts(),
                    delay.as_secs_f64(),
                    e
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// 单次下载尝试, 按磁盘上已有的字节数续传
async fn attempt(
    task: &DownloadTask,
    client: &reqwest::Client,
    url: &str,
) -> DownloadResult<Outcome> {
    let offset = file_size(&task.dest_path());

    let mut request = client.get(url);
    if offset > 0 {
        request = request.header(RANGE, format!("bytes={}-", offset));
        debug!("任务 {} 从 {} 字节处续传", task.id, offset);
    }

    let response = request
        .send()
        .await
        .map_err(|e| DownloadError::Network(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(DownloadError::HttpStatus(status.as_u16()));
    }

    if task.extension().is_none() {
        task.set_extension(util::resolve_extension(
            response.headers(),
            response.url().as_str(),
        ));
    }
    validate_kind(task)?;

    // 206 表示续传被接受, 200 表示服务器从头重发, 静默重新开始
    let partial = status == StatusCode::PARTIAL_CONTENT;
    let append = offset > 0 && partial;
    if partial {
        task.set_supports_resume(true);
    }
    if let Some(len) = response.content_length() {
        let total = if append { offset + len } else { len };
        task.set_total_size(total);
    }

    task.set_status(TaskStatus::Downloading);

    let dest = task.dest_path();
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(append)
        .write(true)
        .truncate(!append)
        .open(&dest)
        .await?;

    let mut stream = response.bytes_stream();
    while let Some(block) = stream.next().await {
        let block = block.map_err(|e| DownloadError::Network(e.to_string()))?;
        file.write_all(&block).await?;

        // 每个数据块之间都是暂停点和取消点
        if task.flow.wait_if_paused().await {
            file.flush().await?;
            return Ok(Outcome::Stopped);
        }
    }
    file.flush().await?;

    let downloaded = file_size(&dest);
    match task.total_size() {
        // 服务器未报告大小时, 流自然结束即为完成
        None => Ok(Outcome::Completed),
        Some(total) if downloaded >= total => Ok(Outcome::Completed),
        Some(total) => Err(DownloadError::Network(format!(
            "连接提前关闭: 已下载 {} / {} 字节",
            downloaded, total
        ))),
    }
}

/// 图片任务拒绝非图片内容, 该失败不可重试
fn validate_kind(task: &DownloadTask) -> DownloadResult<()> {
    if task.kind() != TaskKind::Image {
        return Ok(());
    }
    match task.extension() {
        Some(ext) if util::is_image_extension(&ext) => Ok(()),
        Some(ext) => Err(DownloadError::ContentValidation(format!(
            "不是图片内容: .{}",
            ext
        ))),
        None => Err(DownloadError::ContentValidation(
            "无法识别图片类型".to_string(),
        )),
    }
}
