use url::Url;

/// 只接受 HTTP/HTTPS 下载地址
pub fn is_valid_url(input: &str) -> bool {
    match Url::parse(input) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.has_host(),
        Err(_) => false,
    }
}

pub fn validate_output_path(path: &str) -> bool {
    !path.trim().is_empty()
}
