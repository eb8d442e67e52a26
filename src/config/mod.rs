use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::core::error::DownloadError;
use crate::core::retry::{RetryPolicy, DEFAULT_RETRYABLE_STATUS};

/// 配置结构体
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// 默认下载目录
    pub download_dir: String,
    /// 最大并发下载任务数
    pub max_concurrent_downloads: usize,
    /// 单个任务的最大分块线程数
    pub max_workers_per_download: usize,
    /// 是否启用大文件分块并行下载
    pub enable_parallel_chunks: bool,
    /// 触发分块下载的文件大小阈值（字节）
    pub parallel_threshold: u64,
    /// 每个分块的最小大小（字节）
    pub min_chunk_size: u64,
    /// 连接超时（秒）
    pub connect_timeout: u64,
    /// 读取超时（秒）
    pub read_timeout: u64,
    /// 最大重定向次数
    pub max_redirects: usize,
    /// User-Agent
    pub user_agent: String,
    /// 重试次数
    pub max_retries: u32,
    /// 首次重试延迟（秒）
    pub retry_initial_delay: f64,
    /// 最大重试延迟（秒）
    pub retry_max_delay: f64,
    /// 退避倍率
    pub retry_multiplier: f64,
    /// 可重试的 HTTP 状态码
    pub retryable_status: Vec<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            download_dir: "./downloads".to_string(),
            max_concurrent_downloads: 5,
            max_workers_per_download: 4,
            enable_parallel_chunks: true,
            parallel_threshold: 8 * 1024 * 1024, // 8MB 以上才分块
            min_chunk_size: 1024 * 1024,
            connect_timeout: 10,
            read_timeout: 30,
            max_redirects: 10,
            user_agent: "ImgDown/0.1".to_string(),
            max_retries: 3,
            retry_initial_delay: 1.0,
            retry_max_delay: 10.0,
            retry_multiplier: 2.0,
            retryable_status: DEFAULT_RETRYABLE_STATUS.to_vec(),
        }
    }
}

impl Config {
    /// 加载配置文件, 不存在或解析失败时落回默认配置并写回
    pub fn load(path: &str) -> Result<Self, DownloadError> {
        if Path::new(path).exists() {
            let content = fs::read_to_string(path)?;
            match toml::from_str(&content) {
                Ok(config) => Ok(config),
                Err(e) => {
                    eprintln!("配置文件格式错误: {}，将使用默认配置", e);
                    let config = Config::default();
                    config.save_with_tutorial(path)?;
                    Ok(config)
                }
            }
        } else {
            let config = Config::default();
            config.save_with_tutorial(path)?;
            Ok(config)
        }
    }

    /// 保存带教程的配置文件（唯一写入方法）
    pub fn save_with_tutorial(&self, path: &str) -> Result<(), DownloadError> {
        if let Some(parent) = Path::new(path).parent() {
            fs::create_dir_all(parent)?;
        }
        let config_content = toml::to_string_pretty(self)
            .map_err(|e| DownloadError::InvalidArgument(format!("无法序列化配置: {}", e)))?;
        let full_content = format!("{}\n\n{}", Config::generate_tutorial_content(), config_content);
        fs::write(path, full_content)?;
        Ok(())
    }

    /// 生成配置文件教程内容
    fn generate_tutorial_content() -> String {
        r#"# ImgDown 配置文件
# ====================
#
# 这是一个 TOML 格式的配置文件，用于配置 ImgDown 图片下载管理器的行为。
# 你可以根据需要修改这些设置，然后保存文件。
#
# 配置文件位置：
# - Windows: %APPDATA%/imgdown/imgdown.conf
# - macOS: ~/Library/Application Support/imgdown/imgdown.conf
# - Linux: ~/.config/imgdown/imgdown.conf
#
# 命令行参数会覆盖配置文件中的设置，优先级：命令行 > 配置文件 > 默认值
#
# 使用示例：
#   imgdown https://example.com/photo.jpg                  # 使用默认配置
#   imgdown -f urls.txt                                    # 批量下载
#   imgdown -n 3 https://example.com/photo.jpg             # 最多3个并发任务
#   imgdown -d /path/to/downloads https://example.com/a.png  # 指定下载目录

# ==================== 下载设置 ====================

# 默认下载目录，支持相对路径和绝对路径
# download_dir = "./downloads"

# 最大并发下载任务数
# 建议值：1-8，过多任务会互相抢占带宽
# max_concurrent_downloads = 5

# ==================== 分块下载 ====================

# 是否启用大文件分块并行下载
# enable_parallel_chunks = true

# 触发分块下载的文件大小阈值（字节）
# 只有支持 Range 请求且大于该值的文件才会分块
# parallel_threshold = 8388608

# 单个任务的最大分块线程数
# max_workers_per_download = 4

# 每个分块的最小大小（字节）
# min_chunk_size = 1048576

# ==================== 网络设置 ====================

# 连接超时与读取超时（秒）
# connect_timeout = 10
# read_timeout = 30

# 最大重定向次数
# max_redirects = 10

# User-Agent 字符串
# user_agent = "ImgDown/0.1"

# ==================== 重试设置 ====================

# 网络错误时的重试次数
# max_retries = 3

# 首次重试延迟（秒），之后按 retry_multiplier 指数增长
# 直到 retry_max_delay 封顶
# retry_initial_delay = 1.0
# retry_max_delay = 10.0
# retry_multiplier = 2.0

# 可重试的 HTTP 状态码，其余状态码直接判定失败
# retryable_status = [408, 429, 500, 502, 503, 504]

# ==================== 配置项说明 ====================
"#
        .to_string()
    }

    /// 校验配置合法性
    pub fn validate(&self) -> Result<(), DownloadError> {
        if self.download_dir.is_empty() {
            return Err(DownloadError::InvalidArgument("下载目录不能为空".to_string()));
        }

        if self.max_concurrent_downloads == 0 {
            return Err(DownloadError::InvalidArgument("并发下载数必须大于0".to_string()));
        }

        if self.max_workers_per_download == 0 {
            return Err(DownloadError::InvalidArgument("分块线程数必须大于0".to_string()));
        }

        if self.min_chunk_size == 0 {
            return Err(DownloadError::InvalidArgument("最小分块大小必须大于0".to_string()));
        }

        if self.connect_timeout == 0 || self.read_timeout == 0 {
            return Err(DownloadError::InvalidArgument("超时时间必须大于0".to_string()));
        }

        if self.retry_multiplier < 1.0 {
            return Err(DownloadError::InvalidArgument("退避倍率不能小于1".to_string()));
        }

        if self.retry_initial_delay <= 0.0 || self.retry_max_delay < self.retry_initial_delay {
            return Err(DownloadError::InvalidArgument("重试延迟配置不合法".to_string()));
        }

        Ok(())
    }

    /// 合并命令行参数到配置
    pub fn merge_from_args(&mut self, args: &crate::cli::Args) {
        if !args.download_dir.is_empty() {
            self.download_dir = args.download_dir.clone();
        }

        if let Some(concurrent) = args.max_concurrent {
            self.max_concurrent_downloads = concurrent;
        }

        if let Some(workers) = args.workers {
            self.max_workers_per_download = workers;
        }

        if args.no_parallel {
            self.enable_parallel_chunks = false;
        }
    }

    /// 按配置构造重试策略
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_secs_f64(self.retry_initial_delay),
            Duration::from_secs_f64(self.retry_max_delay),
            self.retry_multiplier,
            self.retryable_status.clone(),
        )
    }

    /// 获取配置摘要信息
    pub fn get_summary(&self) -> String {
        format!(
            "配置摘要:\n\
            - 下载目录: {}\n\
            - 并发任务数: {}\n\
            - 分块下载: {}\n\
            - 分块阈值: {} 字节\n\
            - 重试次数: {}\n\
            - 超时: 连接 {} 秒 / 读取 {} 秒",
            self.download_dir,
            self.max_concurrent_downloads,
            if self.enable_parallel_chunks { "启用" } else { "禁用" },
            self.parallel_threshold,
            self.max_retries,
            self.connect_timeout,
            self.read_timeout,
        )
    }
}
