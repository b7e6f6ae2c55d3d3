//! Host and Origin checks for the streaming mounts.
//!
//! DNS-rebinding protection: a browser page on a foreign origin must not be
//! able to drive a local MCP session.

use axum::extract::{Request, State};
use axum::http::header::{HOST, ORIGIN};
use axum::middleware::Next;
use axum::response::Response;
use tracing::debug;

use crate::AppState;
use crate::error::TransportError;

const LOOPBACK_HOSTS: &[&str] = &["localhost", "127.0.0.1", "[::1]"];

pub async fn require_trusted_host(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let allowed = state.config.allowed_host.as_str();
    let jsonrpc = request.uri().path().starts_with("/mcp");

    let host = request
        .headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| request.uri().authority().map(|a| a.as_str().to_string()));

    let rejection = match host.as_deref() {
        Some(host) if host_allowed(host, allowed) => {
            match request.headers().get(ORIGIN).map(|v| v.to_str()) {
                None => None,
                Some(Ok(origin)) if origin_allowed(origin, allowed) => None,
                Some(_) => Some(TransportError::InvalidOrigin),
            }
        }
        _ => Some(TransportError::InvalidHost),
    };

    match rejection {
        None => next.run(request).await,
        Some(error) => {
            debug!(host = ?host, error = %error, "Rejected streaming request");
            if jsonrpc {
                error.to_jsonrpc_response()
            } else {
                error.to_plain_response()
            }
        }
    }
}

/// Hostname without its port.
fn strip_port(authority: &str) -> &str {
    if authority.starts_with('[') {
        return match authority.find(']') {
            Some(end) => &authority[..=end],
            None => authority,
        };
    }
    match authority.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => authority,
    }
}

pub fn host_allowed(authority: &str, allowed_host: &str) -> bool {
    let host = strip_port(authority.trim());
    if !allowed_host.is_empty() && host.eq_ignore_ascii_case(allowed_host) {
        return true;
    }
    LOOPBACK_HOSTS.iter().any(|h| host.eq_ignore_ascii_case(h))
}

pub fn origin_allowed(origin: &str, allowed_host: &str) -> bool {
    let origin = origin.trim_end_matches('/');
    if !allowed_host.is_empty() && origin.eq_ignore_ascii_case(&format!("https://{allowed_host}"))
    {
        return true;
    }
    let Some(rest) = origin.strip_prefix("http://") else {
        return false;
    };
    matches!(strip_port(rest), "localhost" | "127.0.0.1")
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALLOWED: &str = "projects.example.org";

    #[test]
    fn test_host_allowed() {
        assert!(host_allowed("projects.example.org", ALLOWED));
        assert!(host_allowed("Projects.Example.org:443", ALLOWED));
        assert!(host_allowed("localhost:8000", ALLOWED));
        assert!(host_allowed("127.0.0.1", ALLOWED));
        assert!(host_allowed("[::1]:8000", ALLOWED));
        assert!(!host_allowed("evil.example.com", ALLOWED));
        assert!(!host_allowed("localhost.evil.com", ALLOWED));
    }

    #[test]
    fn test_origin_allowed() {
        assert!(origin_allowed("https://projects.example.org", ALLOWED));
        assert!(origin_allowed("http://localhost:3000", ALLOWED));
        assert!(origin_allowed("http://127.0.0.1", ALLOWED));
        assert!(!origin_allowed("http://projects.example.org", ALLOWED));
        assert!(!origin_allowed("https://evil.example.com", ALLOWED));
        assert!(!origin_allowed("http://localhost:abc", ALLOWED));
        assert!(!origin_allowed("http://localhost.evil.com", ALLOWED));
    }
}
