use std::sync::Arc;

use {
    axum::{
        extract::{FromRequestParts, Query},
        http::{
            HeaderMap,
            header::{AUTHORIZATION, AsHeaderName},
            request::Parts,
        },
    },
    serde::Deserialize,
    tracing::{debug, warn},
    wagate_sessions::UserInfo,
};

use crate::{error::ApiError, state::GatewayState};

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Constant-time string comparison (prevents timing attacks).
fn safe_equal(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let diff = a
        .as_bytes()
        .iter()
        .zip(b.as_bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y));
    diff == 0
}

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Tenant token from the `token` header, falling back to `?token=`.
fn request_token(parts: &Parts) -> Option<String> {
    header_value(&parts.headers, "token").or_else(|| {
        Query::<TokenQuery>::try_from_uri(&parts.uri)
            .ok()
            .and_then(|Query(q)| q.token)
            .filter(|t| !t.is_empty())
    })
}

fn header_value(headers: &HeaderMap, name: impl AsHeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

// ── Extractors ───────────────────────────────────────────────────────────────

/// The authenticated tenant. Resolved from the cache, then the store.
#[derive(Debug, Clone)]
pub struct Tenant(pub UserInfo);

impl FromRequestParts<Arc<GatewayState>> for Tenant {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<GatewayState>,
    ) -> Result<Self, Self::Rejection> {
        let token = request_token(parts).ok_or_else(ApiError::unauthorized)?;

        if let Some(info) = state.cache().get(&token) {
            return Ok(Self(info));
        }

        debug!("looking up tenant in store");
        let record = state.store().get_by_token(&token).await.map_err(|e| {
            warn!(error = %e, "tenant lookup failed");
            ApiError::from(e)
        })?;
        let record = record.ok_or_else(ApiError::unauthorized)?;
        let info = UserInfo::from(&record);
        state.cache().insert(info.clone());
        Ok(Self(info))
    }
}

/// Guard for `/admin` routes: the `Authorization` header must equal the
/// configured admin token.
#[derive(Debug, Clone, Copy)]
pub struct Admin;

impl FromRequestParts<Arc<GatewayState>> for Admin {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<GatewayState>,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.admin_token() else {
            return Err(ApiError::unauthorized());
        };
        match header_value(&parts.headers, AUTHORIZATION) {
            Some(provided) if safe_equal(&provided, expected) => Ok(Self),
            _ => Err(ApiError::unauthorized()),
        }
    }
}

#[cfg(test)]
mod tests {
    use {super::*, axum::http::Request};

    fn parts(uri: &str, token_header: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri(uri);
        if let Some(t) = token_header {
            builder = builder.header("token", t);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn safe_equal_matches_only_identical() {
        assert!(safe_equal("secret", "secret"));
        assert!(!safe_equal("secret", "secreT"));
        assert!(!safe_equal("secret", "secrets"));
        assert!(safe_equal("", ""));
    }

    #[test]
    fn token_from_header_or_query() {
        assert_eq!(
            request_token(&parts("/session/status", Some("abc"))).as_deref(),
            Some("abc")
        );
        assert_eq!(
            request_token(&parts("/session/status?token=xyz", None)).as_deref(),
            Some("xyz")
        );
        assert_eq!(
            request_token(&parts("/session/status?token=xyz", Some("abc"))).as_deref(),
            Some("abc")
        );
        assert!(request_token(&parts("/session/status?token=", None)).is_none());
        assert!(request_token(&parts("/session/status", None)).is_none());
    }
}
