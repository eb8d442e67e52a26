use std::sync::OnceLock;

use base64::Engine;
use regex::Regex;
use reqwest::header::{HeaderMap, CONTENT_DISPOSITION, CONTENT_TYPE};

use crate::core::error::{DownloadError, DownloadResult};

/// 图片任务接受的扩展名
pub const IMAGE_EXTENSIONS: [&str; 15] = [
    "jpg", "jpeg", "jfif", "jpe", "png", "bmp", "dib", "gif", "tif", "tiff",
    "ico", "heif", "heic", "avif", "webp",
];

pub fn is_image_extension(ext: &str) -> bool {
    let ext = ext.to_ascii_lowercase();
    IMAGE_EXTENSIONS.contains(&ext.as_str())
}

/// HEAD 探测结果, 用于选择下载策略
#[derive(Debug, Clone, Default)]
pub struct FileInfo {
    pub total_size: Option<u64>,
    pub supports_range: bool,
    pub extension: Option<String>,
}

/// 先发 HEAD 请求获取文件大小和 Range 支持情况,
/// 探测失败不致命, 按单流下载处理
pub async fn probe(client: &reqwest::Client, url: &str) -> FileInfo {
    let response = match client.head(url).send().await {
        Ok(resp) if resp.status().is_success() => resp,
        _ => return FileInfo::default(),
    };

    let supports_range = response
        .headers()
        .get(reqwest::header::ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("bytes"))
        .unwrap_or(false);

    FileInfo {
        total_size: response.content_length(),
        supports_range,
        extension: resolve_extension(response.headers(), response.url().as_str()),
    }
}

fn filename_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"filename="?([^";]+)"?"#).unwrap())
}

/// 从响应推断文件扩展名
///
/// 顺序: Content-Disposition 文件名 -> Content-Type -> URL 路径,
/// 都取不到时返回 None, 文件名保持无扩展名
pub fn resolve_extension(headers: &HeaderMap, final_url: &str) -> Option<String> {
    if let Some(cd) = headers.get(CONTENT_DISPOSITION).and_then(|v| v.to_str().ok()) {
        if let Some(caps) = filename_pattern().captures(cd) {
            let filename = caps.get(1).map(|m| m.as_str()).unwrap_or("");
            if let Some((_, ext)) = filename.rsplit_once('.') {
                if !ext.is_empty() {
                    return Some(ext.to_ascii_lowercase());
                }
            }
        }
    }

    if let Some(ct) = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) {
        let mime = ct.split(';').next().unwrap_or("").trim();
        if let Some(ext) = mime_extension(mime) {
            return Some(ext.to_string());
        }
    }

    if let Ok(parsed) = url::Url::parse(final_url) {
        let path = parsed.path();
        if let Some((_, ext)) = path.rsplit_once('.') {
            if !ext.is_empty() && !ext.contains('/') {
                return Some(ext.to_ascii_lowercase());
            }
        }
    }

    None
}

/// 常见 MIME 类型到扩展名的映射
fn mime_extension(mime: &str) -> Option<&'static str> {
    match mime {
        "image/jpeg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/bmp" => Some("bmp"),
        "image/tiff" => Some("tiff"),
        "image/webp" => Some("webp"),
        "image/heif" => Some("heif"),
        "image/heic" => Some("heic"),
        "image/avif" => Some("avif"),
        "image/x-icon" | "image/vnd.microsoft.icon" => Some("ico"),
        "image/svg+xml" => Some("svg"),
        "text/html" => Some("html"),
        "text/plain" => Some("txt"),
        "application/pdf" => Some("pdf"),
        "application/zip" => Some("zip"),
        "application/octet-stream" => None,
        _ => None,
    }
}

/// 将 Google Drive / OneDrive 分享链接改写为直链
///
/// 其他链接原样返回; 无法提取 Drive 文件 ID 时报参数错误
pub fn direct_download_url(image_url: &str) -> DownloadResult<String> {
    if image_url.contains("drive.google.com") {
        let image_id = if let Some(rest) = image_url.split("/file/d/").nth(1) {
            rest.split('/').next()
        } else if let Some(rest) = image_url.split("id=").nth(1) {
            rest.split('&').next()
        } else {
            None
        };
        let image_id = image_id.filter(|id| !id.is_empty()).ok_or_else(|| {
            DownloadError::InvalidArgument(format!("无法提取 Google Drive 文件 ID: {}", image_url))
        })?;
        return Ok(format!(
            "https://drive.google.com/uc?export=download&id={}",
            image_id
        ));
    }

    if image_url.contains("1drv.ms") || image_url.contains("onedrive.live.com") {
        let token = base64::engine::general_purpose::STANDARD.encode(image_url.as_bytes());
        let token = token.trim_end_matches('=');
        return Ok(format!(
            "https://api.onedrive.com/v1.0/shares/u!{}/root/content",
            token
        ));
    }

    Ok(image_url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_extension_from_content_disposition() {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_DISPOSITION,
            HeaderValue::from_static(r#"attachment; filename="photo.PNG""#),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("image/jpeg"));
        assert_eq!(
            resolve_extension(&headers, "http://example.com/x"),
            Some("png".to_string())
        );
    }

    #[test]
    fn test_extension_from_content_type() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("image/jpeg; charset=utf-8"));
        assert_eq!(
            resolve_extension(&headers, "http://example.com/x"),
            Some("jpg".to_string())
        );
    }

    #[test]
    fn test_extension_from_url_path() {
        let headers = HeaderMap::new();
        assert_eq!(
            resolve_extension(&headers, "http://example.com/images/cat.webp?size=large"),
            Some("webp".to_string())
        );
        assert_eq!(resolve_extension(&headers, "http://example.com/images"), None);
    }

    #[test]
    fn test_image_extension_set() {
        assert!(is_image_extension("jpg"));
        assert!(is_image_extension("HEIC"));
        assert!(!is_image_extension("exe"));
        assert!(!is_image_extension("html"));
    }

    #[test]
    fn test_google_drive_rewrite() {
        let url = "https://drive.google.com/file/d/abc123/view?usp=sharing";
        assert_eq!(
            direct_download_url(url).unwrap(),
            "https://drive.google.com/uc?export=download&id=abc123"
        );

        let url = "https://drive.google.com/open?id=xyz789&foo=bar";
        assert_eq!(
            direct_download_url(url).unwrap(),
            "https://drive.google.com/uc?export=download&id=xyz789"
        );

        assert!(direct_download_url("https://drive.google.com/drive/home").is_err());
    }

    #[test]
    fn test_onedrive_rewrite() {
        let url = "https://1drv.ms/i/s!abc";
        let rewritten = direct_download_url(url).unwrap();
        assert!(rewritten.starts_with("https://api.onedrive.com/v1.0/shares/u!"));
        assert!(rewritten.ends_with("/root/content"));
        assert!(!rewritten.contains('='));
    }

    #[test]
    fn test_direct_url_passthrough() {
        let url = "https://example.com/a.jpg";
        assert_eq!(direct_download_url(url).unwrap(), url);
    }
}
