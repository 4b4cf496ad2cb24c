//! Caller identity for `/api/v1` requests.
//!
//! In debug mode the caller is identified by the `X-User-Id` and
//! `X-User-Role` headers. In production mode both come from a verified JWT:
//! the user claim is required (default `sub`, configurable via
//! `CAUSA_JWT_USER_CLAIM`) and the role claim is optional.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{FromRequestParts, State};
use axum::http::header::{AUTHORIZATION, HeaderName};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde_json::{Map, Value};
use ulid::Ulid;

use crate::config::JwtConfig;
use crate::error::ApiError;
use crate::server::AppState;

/// Correlation header, read from the request and echoed on the response.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Role allowed to run maintenance routes.
pub const ADMIN_ROLE: &str = "admin";

const DEBUG_USER_HEADER: &str = "x-user-id";
const DEBUG_ROLE_HEADER: &str = "x-user-role";

/// Who is calling, and under which correlation id.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Authenticated caller.
    pub user_id: String,
    /// Caller role, when the credentials carry one.
    pub role: Option<String>,
    /// Correlation id for logs and error bodies.
    pub request_id: String,
}

impl RequestContext {
    /// Fails with 403 unless the caller holds the admin role.
    ///
    /// # Errors
    ///
    /// Returns a `FORBIDDEN` error for non-admin callers.
    pub fn require_admin(&self) -> Result<(), ApiError> {
        match self.role.as_deref() {
            Some(ADMIN_ROLE) => Ok(()),
            _ => Err(ApiError::forbidden("admin role required")
                .with_request_id(self.request_id.clone())),
        }
    }

    /// Converts `err` into an [`ApiError`] tagged with this request's id.
    pub fn error(&self, err: impl Into<ApiError>) -> ApiError {
        err.into().with_request_id(self.request_id.clone())
    }

    fn from_debug_headers(headers: &HeaderMap, request_id: String) -> Result<Self, ApiError> {
        let Some(user_id) = header_string(headers, DEBUG_USER_HEADER) else {
            return Err(ApiError::unauthorized("missing X-User-Id header (debug mode)")
                .with_request_id(request_id));
        };
        Ok(Self {
            user_id,
            role: header_string(headers, DEBUG_ROLE_HEADER),
            request_id,
        })
    }

    fn from_bearer(headers: &HeaderMap, jwt: &JwtConfig, request_id: String) -> Result<Self, ApiError> {
        let Some(token) = bearer_token(headers) else {
            return Err(ApiError::missing_auth().with_request_id(request_id));
        };
        let verifier = match TokenVerifier::from_config(jwt) {
            Ok(verifier) => verifier,
            Err(message) => return Err(ApiError::internal(message).with_request_id(request_id)),
        };
        match verifier.verify(&token) {
            Some((user_id, role)) => Ok(Self {
                user_id,
                role,
                request_id,
            }),
            None => Err(ApiError::invalid_token().with_request_id(request_id)),
        }
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for RequestContext {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        if let Some(cached) = parts.extensions.get::<Self>() {
            return Ok(cached.clone());
        }

        let request_id = header_string(&parts.headers, REQUEST_ID_HEADER)
            .unwrap_or_else(|| Ulid::new().to_string());
        let ctx = if state.config.debug {
            Self::from_debug_headers(&parts.headers, request_id)?
        } else {
            Self::from_bearer(&parts.headers, &state.config.jwt, request_id)?
        };

        parts.extensions.insert(ctx.clone());
        Ok(ctx)
    }
}

/// Decoding key plus validation rules for one configured JWT setup.
struct TokenVerifier<'a> {
    key: DecodingKey,
    validation: Validation,
    user_claim: &'a str,
    role_claim: &'a str,
}

impl<'a> TokenVerifier<'a> {
    fn from_config(jwt: &'a JwtConfig) -> Result<Self, String> {
        let (key, algorithm) = match (&jwt.hs256_secret, &jwt.rs256_public_key_pem) {
            (Some(_), Some(_)) => {
                return Err(
                    "jwt.hs256_secret and jwt.rs256_public_key_pem are mutually exclusive".into(),
                );
            }
            (None, None) => {
                return Err("a JWT key is required when debug=false".into());
            }
            (Some(secret), None) => (DecodingKey::from_secret(secret.as_bytes()), Algorithm::HS256),
            (None, Some(pem)) => {
                let key = DecodingKey::from_rsa_pem(pem.as_bytes())
                    .map_err(|e| format!("invalid jwt.rs256_public_key_pem: {e}"))?;
                (key, Algorithm::RS256)
            }
        };

        let mut validation = Validation::new(algorithm);
        validation.validate_nbf = true;
        if let Some(iss) = &jwt.issuer {
            validation.set_issuer(&[iss]);
        }
        if let Some(aud) = &jwt.audience {
            validation.set_audience(&[aud]);
        }

        Ok(Self {
            key,
            validation,
            user_claim: &jwt.user_claim,
            role_claim: &jwt.role_claim,
        })
    }

    /// Returns `(user, role)` for a valid token that names a user.
    fn verify(&self, token: &str) -> Option<(String, Option<String>)> {
        let data = jsonwebtoken::decode::<Map<String, Value>>(token, &self.key, &self.validation)
            .ok()?;
        let claim = |name: &str| {
            data.claims
                .get(name)
                .and_then(Value::as_str)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        let user = claim(self.user_claim)?;
        Some((user, claim(self.role_claim)))
    }
}

pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<String> {
    header_string(headers, AUTHORIZATION.as_str())?
        .strip_prefix("Bearer ")
        .map(str::to_string)
}

/// Reads a header as trimmed text; blank values count as absent.
pub(crate) fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    let value = headers.get(name)?.to_str().ok()?.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Resolves the caller before any `/api/v1` handler runs.
///
/// Rejections are returned directly. Successful responses carry the request
/// id in `x-request-id`.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let (mut parts, body) = req.into_parts();
    let request_id = match RequestContext::from_request_parts(&mut parts, &state).await {
        Ok(ctx) => ctx.request_id,
        Err(err) => return err.into_response(),
    };

    let mut response = next.run(Request::from_parts(parts, body)).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(role: Option<&str>) -> RequestContext {
        RequestContext {
            user_id: "user-a".to_string(),
            role: role.map(str::to_string),
            request_id: "req".to_string(),
        }
    }

    #[test]
    fn test_require_admin() {
        assert!(ctx(Some("admin")).require_admin().is_ok());
        let err = ctx(Some("member")).require_admin().unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::FORBIDDEN);
        assert!(ctx(None).require_admin().is_err());
    }

    #[test]
    fn test_bearer_token_requires_prefix() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(bearer_token(&headers).is_none());
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc.def"));
    }

    #[test]
    fn test_blank_header_is_absent() {
        let mut headers = HeaderMap::new();
        headers.insert(DEBUG_USER_HEADER, HeaderValue::from_static("  "));
        assert!(header_string(&headers, DEBUG_USER_HEADER).is_none());
    }

    #[test]
    fn test_verifier_requires_exactly_one_key() {
        let mut jwt = JwtConfig::default();
        assert!(TokenVerifier::from_config(&jwt).is_err());
        jwt.hs256_secret = Some("s".to_string());
        assert!(TokenVerifier::from_config(&jwt).is_ok());
        jwt.rs256_public_key_pem = Some("pem".to_string());
        assert!(TokenVerifier::from_config(&jwt).is_err());
    }

    #[test]
    fn test_verifier_rejects_garbage() {
        let jwt = JwtConfig {
            hs256_secret: Some("s".to_string()),
            ..JwtConfig::default()
        };
        let verifier = TokenVerifier::from_config(&jwt).unwrap();
        assert!(verifier.verify("not.a.jwt").is_none());
    }
}
