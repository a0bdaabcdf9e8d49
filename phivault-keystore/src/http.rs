//! Blocking HTTP plumbing shared by the cloud adapters.

use crate::error::KeyVaultError;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::StatusCode;
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) fn build_client(timeout: Duration) -> Result<Client, KeyVaultError> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(CONNECT_TIMEOUT.min(timeout))
        .user_agent(concat!("phivault-keystore/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| KeyVaultError::Misconfigured(format!("failed to build HTTP client: {}", e)))
}

/// A response that has been read to completion.
pub(crate) struct Reply {
    pub status: StatusCode,
    pub body: String,
}

impl Reply {
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, KeyVaultError> {
        serde_json::from_str(&self.body)
            .map_err(|e| KeyVaultError::InvalidResponse(format!("malformed JSON body: {}", e)))
    }
}

/// Send the request and read the body. Only transport failures are errors here.
pub(crate) fn send(request: RequestBuilder) -> Result<Reply, KeyVaultError> {
    let response = request.send().map_err(transport_error)?;
    let status = response.status();
    let body = response.text().map_err(transport_error)?;
    Ok(Reply { status, body })
}

/// Generic status mapping: 401/403, 404, everything else non-2xx.
pub(crate) fn check_status(reply: &Reply, key_id: Option<&str>) -> Result<(), KeyVaultError> {
    let status = reply.status;
    if status.is_success() {
        return Ok(());
    }
    Err(match (status, key_id) {
        (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN, _) => {
            KeyVaultError::Unauthorized(format!("HTTP {}", status.as_u16()))
        }
        (StatusCode::NOT_FOUND, Some(key_id)) => KeyVaultError::not_found(key_id),
        _ => KeyVaultError::InvalidResponse(format!(
            "HTTP {}: {}",
            status.as_u16(),
            truncate(&reply.body, 200)
        )),
    })
}

fn transport_error(e: reqwest::Error) -> KeyVaultError {
    if e.is_timeout() {
        KeyVaultError::Unreachable(format!("request timed out: {}", e))
    } else {
        KeyVaultError::Unreachable(e.to_string())
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
