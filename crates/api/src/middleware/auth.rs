//! Shared-password HTTP basic authentication.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use trainq_core::error::CoreError;

use crate::error::AppError;
use crate::state::AppState;

/// Reject requests whose basic-auth password does not match the configured one.
///
/// The username is ignored. Without a configured password every request
/// passes. Mount with `axum::middleware::from_fn_with_state` on the routes
/// that need protecting.
pub async fn require_basic_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(expected) = state.config.password.as_deref() else {
        return Ok(next.run(request).await);
    };

    match basic_auth_password(request.headers()) {
        Some(password) if password == expected => Ok(next.run(request).await),
        Some(_) => {
            tracing::debug!(path = %request.uri().path(), "Rejected wrong password");
            Err(CoreError::Unauthorized("Invalid credentials".into()).into())
        }
        None => Err(CoreError::Unauthorized("Missing basic auth credentials".into()).into()),
    }
}

/// The password part of a `Basic` authorization header, if well formed.
fn basic_auth_password(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = BASE64.decode(encoded.trim()).ok()?;
    let credentials = String::from_utf8(decoded).ok()?;
    let (_user, password) = credentials.split_once(':')?;
    Some(password.to_string())
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn extracts_password_and_ignores_user() {
        let value = format!("Basic {}", BASE64.encode("anyone:s3cret:with:colons"));
        assert_eq!(
            basic_auth_password(&headers(&value)).as_deref(),
            Some("s3cret:with:colons")
        );
    }

    #[test]
    fn rejects_malformed_headers() {
        assert_eq!(basic_auth_password(&HeaderMap::new()), None);
        assert_eq!(basic_auth_password(&headers("Bearer abc")), None);
        assert_eq!(basic_auth_password(&headers("Basic !!!")), None);
        let no_colon = format!("Basic {}", BASE64.encode("nocolon"));
        assert_eq!(basic_auth_password(&headers(&no_colon)), None);
    }
}
