//! CLI: 命令行接口和参数解析模块
//!
//! ## 主要功能
//!
//! - 命令行参数解析和验证
//! - 配置文件路径管理
//! - URL 列表处理（命令行参数和文件）
//! - 平台特定的路径处理
//! - 配置文件编辑器集成
//!
//! ## 支持的命令
//!
//! - 基本下载：`imgdown <url>`
//! - 批量下载：`imgdown -f urls.txt`
//! - 编辑配置：`imgdown -e`
//! - 指定配置：`imgdown -c config.conf <url>`
//! - 任意文件：`imgdown --any <url>` (跳过图片校验)

use clap::Parser;
use std::env;
use std::fs;
use std::path::Path;

use crate::config::Config;
use crate::core::error::DownloadError;

/// 获取平台默认配置文件路径
pub fn default_config_path() -> String {
    #[cfg(target_os = "windows")]
    {
        let appdata = env::var("APPDATA").unwrap_or_else(|_| ".".to_string());
        format!("{}/imgdown/imgdown.conf", appdata)
    }
    #[cfg(target_os = "macos")]
    {
        let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        format!("{}/Library/Application Support/imgdown/imgdown.conf", home)
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        format!("{}/.config/imgdown/imgdown.conf", home)
    }
}

/// 打开配置文件编辑器
pub fn open_config_in_editor(config_path: &str) {
    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("notepad").arg(config_path).status().ok();
    }
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("open").arg("-e").arg(config_path).status().ok();
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        // 优先 xdg-open，否则 nano
        if std::process::Command::new("xdg-open").arg(config_path).status().is_err() {
            let _ = std::process::Command::new("nano").arg(config_path).status();
        }
    }
}

/// ImgDown 命令行参数
///
/// 示例用法：
///   imgdown https://example.com/photo.jpg
///   imgdown -f urls.txt
///   imgdown -e  # 编辑配置文件
///
/// 更多用法请加 --help 查看
#[derive(Parser, Debug, Clone)]
#[command(
    name = "imgdown",
    version = env!("CARGO_PKG_VERSION"),
    about = "一个用 Rust 编写的图片下载管理器",
    long_about = "支持断点续传、自动重试、暂停恢复与大文件分块并行下载的图片下载管理器。\n\n示例：\n  imgdown https://example.com/photo.jpg\n  imgdown -f urls.txt\n  imgdown -n 3 -d ./photos https://example.com/photo.jpg\n"
)]
pub struct Args {
    /// 要下载的URL列表（可同时指定多个）
    #[arg(required = false, help = "要下载的URL列表，可以同时指定多个URL。")]
    pub urls: Vec<String>,

    /// 包含URL列表的文件路径
    #[arg(short, long, help = "包含URL列表的文件路径，每行一个URL。")]
    pub file: Option<String>,

    /// 配置文件路径，默认为平台推荐路径
    #[arg(short = 'c', long, default_value_t = default_config_path(), help = "配置文件路径，默认为平台推荐路径。")]
    pub config: String,

    /// 编辑配置文件（-e 或 --edit）
    #[arg(short = 'e', long = "edit", help = "用系统默认编辑器打开配置文件并退出。")]
    pub edit_config: bool,

    /// 指定下载目录
    #[arg(long, short = 'd', default_value = "", help = "指定下载目录，覆盖配置文件中的设置。")]
    pub download_dir: String,

    /// 最大并发下载任务数
    #[arg(long, short = 'n', help = "最大并发下载任务数，覆盖配置文件中的设置。")]
    pub max_concurrent: Option<usize>,

    /// 单个任务的分块线程数
    #[arg(long, short = 't', help = "单个任务的分块线程数，覆盖配置文件中的设置。")]
    pub workers: Option<usize>,

    /// 禁用分块并行下载
    #[arg(long, help = "禁用大文件分块并行下载。")]
    pub no_parallel: bool,

    /// 按任意文件下载，跳过图片内容校验
    #[arg(long, help = "按任意文件下载，跳过图片内容校验。")]
    pub any: bool,

    /// 结束时以 JSON 输出任务快照
    #[arg(long, help = "结束时以 JSON 输出所有任务的最终快照。")]
    pub json: bool,
}

impl Args {
    /// 解析命令行参数并加载配置, 命令行优先于配置文件
    pub fn parse_args() -> Result<(Self, Config), DownloadError> {
        let args = Args::parse();

        // --edit 逻辑
        if args.edit_config {
            open_config_in_editor(&args.config);
            std::process::exit(0);
        }

        let mut config = Config::load(&args.config)?;
        config.merge_from_args(&args);
        config.validate()?;

        Ok((args, config))
    }

    /// 汇总命令行和URL文件中的下载地址
    pub fn get_urls(&self) -> Result<Vec<String>, DownloadError> {
        let mut urls = Vec::new();
        urls.extend_from_slice(&self.urls);

        if let Some(file_path) = &self.file {
            if !Path::new(file_path).exists() {
                return Err(DownloadError::InvalidArgument(format!(
                    "URL文件不存在: {}",
                    file_path
                )));
            }
            let content = fs::read_to_string(file_path)?;

            // 按行读取URL，忽略空行和注释
            for line in content.lines() {
                let line = line.trim();
                if !line.is_empty() && !line.starts_with('#') {
                    urls.push(line.to_string());
                }
            }
        }

        if urls.is_empty() {
            return Err(DownloadError::InvalidArgument(
                "未提供任何URL。请通过命令行参数或文件提供至少一个URL。".to_string(),
            ));
        }

        Ok(urls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_args_parsing() {
        let args = vec!["imgdown", "https://example.com/photo.jpg"];
        let result = Args::try_parse_from(args);
        assert!(result.is_ok());
    }

    #[test]
    fn test_args_override_flags() {
        let args = vec!["imgdown", "-n", "2", "--no-parallel", "https://example.com/a.png"];
        let args = Args::try_parse_from(args).unwrap();
        let mut config = Config::default();
        config.merge_from_args(&args);
        assert_eq!(config.max_concurrent_downloads, 2);
        assert!(!config.enable_parallel_chunks);
    }

    #[test]
    fn test_url_file_parsing() {
        let temp_url_file = std::env::temp_dir().join("imgdown_urls.txt");
        let content = "# 这是一个注释\nhttps://example.com/1.jpg\n\nhttps://example.com/2.jpg\n";
        fs::write(&temp_url_file, content).unwrap();

        let args = vec!["imgdown", "-f", temp_url_file.to_str().unwrap()];
        let args = Args::try_parse_from(args).unwrap();
        let urls = args.get_urls().unwrap();
        assert_eq!(urls.len(), 2);
        assert_eq!(urls[0], "https://example.com/1.jpg");
        assert_eq!(urls[1], "https://example.com/2.jpg");

        fs::remove_file(&temp_url_file).unwrap();
    }

    #[test]
    fn test_empty_urls_rejected() {
        let args = Args::try_parse_from(vec!["imgdown"]).unwrap();
        assert!(args.get_urls().is_err());
    }
}
