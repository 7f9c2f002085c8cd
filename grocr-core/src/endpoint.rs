//! Server URL normalization.
//!
//! Users configure a single server URL; the realtime socket needs a `ws(s)`
//! scheme and the account API needs `http(s)`.

/// Builds the WebSocket URL for `path` on `server_url`.
pub fn ws_url(server_url: &str, path: &str) -> String {
    let base_url = if let Some(rest) = server_url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else if let Some(rest) = server_url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if !server_url.starts_with("ws://") && !server_url.starts_with("wss://") {
        format!("ws://{}", server_url)
    } else {
        server_url.to_string()
    };

    format!("{}{}", base_url.trim_end_matches('/'), path)
}

/// Builds the HTTP URL for `path` on `server_url`.
pub fn http_url(server_url: &str, path: &str) -> String {
    let base_url = if let Some(rest) = server_url.strip_prefix("ws://") {
        format!("http://{}", rest)
    } else if let Some(rest) = server_url.strip_prefix("wss://") {
        format!("https://{}", rest)
    } else if !server_url.starts_with("http://") && !server_url.starts_with("https://") {
        format!("http://{}", server_url)
    } else {
        server_url.to_string()
    };

    format!("{}{}", base_url.trim_end_matches('/'), path)
}
