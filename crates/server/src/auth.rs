// crates/server/src/auth.rs
//! Bearer-token extraction for the progress endpoints.
//!
//! Token *issuance and validation* live in the auth service; this layer only
//! requires that a credential is present. The stream endpoint additionally
//! accepts `?token=` because `EventSource` cannot set request headers.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::error::ApiError;

/// The caller's credential, extracted from `Authorization: Bearer <token>`
/// or, failing that, from the `token` query parameter.
pub struct AuthToken(pub String);

impl<S> FromRequestParts<S> for AuthToken
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(token) = bearer_token(parts) {
            return Ok(AuthToken(token));
        }
        if let Some(token) = query_token(parts.uri.query().unwrap_or("")) {
            return Ok(AuthToken(token));
        }
        Err(ApiError::Unauthorized(
            "authentication token not found".to_string(),
        ))
    }
}

fn bearer_token(parts: &Parts) -> Option<String> {
    let header = parts.headers.get(axum::http::header::AUTHORIZATION)?;
    let value = header.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then(|| token.to_string())
}

fn query_token(query: &str) -> Option<String> {
    for pair in query.split('&') {
        if let Some(raw) = pair.strip_prefix("token=") {
            if raw.is_empty() {
                continue;
            }
            return match urlencoding::decode(raw) {
                Ok(decoded) => Some(decoded.into_owned()),
                Err(_) => Some(raw.to_string()),
            };
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts_for(uri: &str, auth_header: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri(uri);
        if let Some(value) = auth_header {
            builder = builder.header("Authorization", value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn accepts_bearer_header() {
        let mut parts = parts_for("/api/progress/1", Some("Bearer abc123"));
        let AuthToken(token) = AuthToken::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(token, "abc123");
    }

    #[tokio::test]
    async fn accepts_query_token() {
        let mut parts = parts_for("/api/progress/1/stream?token=abc%2F123", None);
        let AuthToken(token) = AuthToken::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(token, "abc/123");
    }

    #[tokio::test]
    async fn header_wins_over_query() {
        let mut parts = parts_for("/x?token=from-query", Some("Bearer from-header"));
        let AuthToken(token) = AuthToken::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(token, "from-header");
    }

    #[tokio::test]
    async fn missing_token_is_rejected() {
        let mut parts = parts_for("/api/progress/1", None);
        let err = AuthToken::from_request_parts(&mut parts, &()).await;
        assert!(matches!(err, Err(ApiError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn empty_tokens_are_rejected() {
        let mut parts = parts_for("/x?token=", Some("Bearer "));
        assert!(AuthToken::from_request_parts(&mut parts, &()).await.is_err());
    }
}
