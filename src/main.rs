use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossterm::{
    cursor,
    event::{self, Event, KeyCode},
    execute, terminal,
};
use log::{info, LevelFilter};
use uuid::Uuid;

use imgdown::cli;
use imgdown::core::{DownloadManager, ReportedStatus, TaskKind};
use imgdown::ui::{self, ProgressManager};
use imgdown::utils::logger;

const PROGRESS_UPDATE_INTERVAL: Duration = Duration::from_millis(100);
const KEYBOARD_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logger::init(LevelFilter::Info);
    info!("程序启动");

    // 解析参数和配置
    let (args, config) = match cli::Args::parse_args() {
        Ok((args, config)) => (args, config),
        Err(e) => {
            eprintln!("参数解析失败: {}", e);
            std::process::exit(1);
        }
    };

    let urls = match args.get_urls() {
        Ok(urls) => urls,
        Err(e) => {
            eprintln!("获取URL列表失败: {}", e);
            std::process::exit(1);
        }
    };

    info!("解析到 {} 个URL, 下载目录: {}", urls.len(), config.download_dir);
    println!("配置加载成功");
    println!("{}", config.get_summary());

    // 创建下载管理器并提交所有任务
    let manager = DownloadManager::new(config)?;
    let kind = if args.any { TaskKind::Any } else { TaskKind::Image };
    let mut task_ids = Vec::new();
    for url in &urls {
        match manager.create_task(url, None, kind) {
            Ok(id) => {
                task_ids.push(id);
                ui::print_success(&format!("创建下载任务: {}", url));
            }
            Err(e) => {
                ui::print_error(&format!("创建下载任务失败: {} - {}", url, e));
            }
        }
    }

    if task_ids.is_empty() {
        eprintln!("没有可下载的任务");
        return Ok(());
    }

    println!("\n开始下载... (按 'p' 暂停, 'r' 恢复, 'c' 取消, 'q' 退出)");
    info!("开始下载 {} 个任务", task_ids.len());

    run_download_loop(&manager, &task_ids).await?;

    // --json: 以 JSON 输出最终任务快照, 方便脚本消费
    if args.json {
        let snapshots: Vec<_> = task_ids
            .iter()
            .filter_map(|id| manager.get_status(*id))
            .collect();
        println!("{}", serde_json::to_string_pretty(&snapshots)?);
    }

    manager.shutdown();
    Ok(())
}

/// 主循环：处理键盘输入和刷新进度, 所有任务到达终态后退出
async fn run_download_loop(
    manager: &Arc<DownloadManager>,
    task_ids: &[Uuid],
) -> anyhow::Result<()> {
    terminal::enable_raw_mode()?;
    execute!(std::io::stdout(), cursor::Hide)?;

    let progress = ProgressManager::new();
    let started = Instant::now();
    let mut last_update = Instant::now();
    let mut last_sizes: HashMap<Uuid, u64> = HashMap::new();
    let mut cancelled = false;

    loop {
        if let Ok(true) = event::poll(KEYBOARD_POLL_INTERVAL) {
            if let Ok(Event::Key(key_event)) = event::read() {
                match key_event.code {
                    KeyCode::Char('q') | KeyCode::Char('Q') => {
                        info!("用户主动退出下载");
                        break;
                    }
                    KeyCode::Char('p') | KeyCode::Char('P') => {
                        for id in task_ids {
                            manager.pause_task(*id);
                        }
                        info!("用户暂停所有下载任务");
                    }
                    KeyCode::Char('r') | KeyCode::Char('R') => {
                        for id in task_ids {
                            manager.resume_task(*id);
                        }
                        info!("用户恢复所有下载任务");
                    }
                    KeyCode::Char('c') | KeyCode::Char('C') => {
                        for id in task_ids {
                            manager.cancel_task(*id);
                        }
                        info!("用户取消所有下载任务");
                        cancelled = true;
                        break;
                    }
                    _ => {}
                }
            }
        }

        if last_update.elapsed() >= PROGRESS_UPDATE_INTERVAL {
            let elapsed = last_update.elapsed().as_secs_f64();
            let mut all_done = true;

            for id in task_ids {
                let Some(snapshot) = manager.get_status(*id) else {
                    continue;
                };
                let previous = last_sizes.insert(*id, snapshot.downloaded_size).unwrap_or(0);
                let speed = ((snapshot.downloaded_size.saturating_sub(previous)) as f64
                    / elapsed) as u64;
                progress.update(&snapshot, speed);

                if !matches!(
                    snapshot.status,
                    ReportedStatus::Completed | ReportedStatus::Error | ReportedStatus::Stopped
                ) {
                    all_done = false;
                }
            }

            if all_done {
                break;
            }
            last_update = Instant::now();
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    execute!(std::io::stdout(), cursor::Show)?;
    terminal::disable_raw_mode()?;

    // 汇总结果, 已取消的任务已移出注册表
    let mut summary = ui::DownloadSummary {
        total_tasks: task_ids.len(),
        total_size: 0,
        elapsed_time: started.elapsed(),
        success_count: 0,
        failed_count: 0,
        stopped_count: 0,
    };
    for id in task_ids {
        match manager.get_status(*id) {
            Some(snapshot) => {
                summary.total_size += snapshot.downloaded_size;
                match snapshot.status {
                    ReportedStatus::Completed => summary.success_count += 1,
                    ReportedStatus::Error => summary.failed_count += 1,
                    _ => summary.stopped_count += 1,
                }
            }
            None => summary.stopped_count += 1,
        }
    }
    if cancelled {
        summary.stopped_count = summary.total_tasks - summary.success_count - summary.failed_count;
    }
    println!("{}", summary);

    info!(
        "下载结束 - 成功: {}, 失败: {}",
        summary.success_count, summary.failed_count
    );
    Ok(())
}
