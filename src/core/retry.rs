use std::time::Duration;
use chrono::{DateTime, Utc};

use crate::core::error::DownloadError;

/// 默认可重试的 HTTP 状态码
pub const DEFAULT_RETRYABLE_STATUS: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// 重试策略: 指数退避 + 抖动
///
/// 只负责"是否重试"和"等多久"的判定, 不负责等待本身,
/// 调用方根据 `next_delay` 自行 sleep
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: bool, // 抖动避免重试风暴
    pub retryable_status: Vec<u16>,
    attempt_count: u32,
    last_retry: Option<DateTime<Utc>>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: true,
            retryable_status: DEFAULT_RETRYABLE_STATUS.to_vec(),
            attempt_count: 0,
            last_retry: None,
        }
    }
}

impl RetryPolicy {
    pub fn new(
        max_retries: u32,
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: f64,
        retryable_status: Vec<u16>,
    ) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
            multiplier,
            jitter: true,
            retryable_status,
            attempt_count: 0,
            last_retry: None,
        }
    }

    /// 判断错误是否值得再试一次
    pub fn should_retry(&self, error: &DownloadError) -> bool {
        if self.attempt_count >= self.max_retries {
            return false;
        }
        match error {
            DownloadError::Network(_) => true,
            DownloadError::HttpStatus(code) => self.retryable_status.contains(code),
            _ => false,
        }
    }

    /// 当前退避延迟: min(initial * multiplier^attempts, max),
    /// 抖动为 [0.5, 1.5) 的乘性因子
    pub fn next_delay(&self) -> Duration {
        let delay_secs = self.initial_delay.as_secs_f64()
            * self.multiplier.powi(self.attempt_count as i32);
        let capped = delay_secs.min(self.max_delay.as_secs_f64());

        if self.jitter {
            let factor = 0.5 + rand::random::<f64>();
            Duration::from_secs_f64(capped * factor)
        } else {
            Duration::from_secs_f64(capped)
        }
    }

    /// 记录一次已消耗的尝试
    pub fn record_attempt(&mut self) {
        self.attempt_count += 1;
        self.last_retry = Some(Utc::now());
    }

    pub fn attempts(&self) -> u32 {
        self.attempt_count
    }

    pub fn last_retry(&self) -> Option<DateTime<Utc>> {
        self.last_retry
    }

    pub fn reset(&mut self) {
        self.attempt_count = 0;
        self.last_retry = None;
    }
}
