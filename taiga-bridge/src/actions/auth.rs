//! `X-Api-Key` authentication for the action proxy.
//!
//! Runs as route middleware, so a request is rejected before its body or
//! query string is looked at.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use taiga_bridge_core::BridgeError;

use super::envelope::ActionError;
use crate::AppState;

pub const API_KEY_HEADER: &str = "x-api-key";

pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ActionError> {
    let Some(expected) = state
        .config
        .action_api_key
        .as_deref()
        .filter(|k| !k.is_empty())
    else {
        return Err(BridgeError::ServiceMisconfigured {
            reason: "Proxy API key is not configured".to_string(),
        }
        .into());
    };

    let supplied = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| BridgeError::AuthenticationFailure {
            reason: "Missing X-Api-Key header".to_string(),
        })?;

    if !constant_time_eq(supplied, expected) {
        return Err(BridgeError::AuthenticationFailure {
            reason: "Invalid API key".to_string(),
        }
        .into());
    }

    Ok(next.run(request).await)
}

/// Compare without returning early on the first differing byte.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    let mut diff = u64::try_from(a.len() ^ b.len()).unwrap_or(u64::MAX);
    for i in 0..a.len().max(b.len()) {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff |= u64::from(x ^ y);
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("secret", "secret"));
        assert!(!constant_time_eq("secret", "secreT"));
        assert!(!constant_time_eq("secret", "secret2"));
        assert!(!constant_time_eq("", "secret"));
    }
}
