use thiserror::Error;
use std::io;

/// 下载子系统的错误分类
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("网络错误: {0}")]
    Network(String),

    #[error("HTTP状态错误: {0}")]
    HttpStatus(u16),

    #[error("内容校验失败: {0}")]
    ContentValidation(String),

    #[error("分块下载失败: {0}")]
    ChunkFailure(String),

    #[error("文件系统错误: {0}")]
    Filesystem(#[from] io::Error),

    #[error("无效的参数: {0}")]
    InvalidArgument(String),
}

impl DownloadError {
    /// 网络错误总是可重试, HTTP 状态错误由重试策略按状态码判定
    pub fn is_network(&self) -> bool {
        matches!(self, DownloadError::Network(_))
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            DownloadError::HttpStatus(code) => Some(*code),
            _ => None,
        }
    }

    /// 校验失败与文件系统错误不消耗重试次数, 直接终止任务
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DownloadError::ContentValidation(_) |
            DownloadError::Filesystem(_) |
            DownloadError::InvalidArgument(_)
        )
    }
}

impl From<reqwest::Error> for DownloadError {
    fn from(error: reqwest::Error) -> Self {
        match error.status() {
            Some(status) => DownloadError::HttpStatus(status.as_u16()),
            None => DownloadError::Network(error.to_string()),
        }
    }
}

impl From<String> for DownloadError {
    fn from(error: String) -> Self {
        DownloadError::Network(error)
    }
}

pub type DownloadResult<T> = Result<T, DownloadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let network = DownloadError::Network("connection reset".to_string());
        assert!(network.is_network());
        assert!(!network.is_fatal());

        let status = DownloadError::HttpStatus(503);
        assert_eq!(status.status_code(), Some(503));
        assert!(!status.is_network());
    }

    #[test]
    fn test_error_fatal() {
        let validation = DownloadError::ContentValidation("不是图片".to_string());
        assert!(validation.is_fatal());

        let io = DownloadError::from(io::Error::new(io::ErrorKind::PermissionDenied, "denied"));
        assert!(io.is_fatal());

        let arg = DownloadError::InvalidArgument("URL为空".to_string());
        assert!(arg.is_fatal());
    }

    #[test]
    fn test_error_display() {
        let status = DownloadError::HttpStatus(404);
        assert_eq!(status.to_string(), "HTTP状态错误: 404");
    }
}
