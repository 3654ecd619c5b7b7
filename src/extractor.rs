use axum::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Deserialize)]
struct Claims {
    #[serde(alias = "user_id")]
    sub: Uuid,
    tenant_id: Uuid,
    #[serde(default)]
    role: String,
    #[allow(dead_code)]
    exp: usize,
}

/// Caller identity for tenant-scoped billing requests.
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub role: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, String);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let from_cookie = parts
            .headers
            .get(axum::http::header::COOKIE)
            .and_then(|value| value.to_str().ok())
            .and_then(|cookies| {
                cookies.split(';').find_map(|c| {
                    c.trim()
                        .strip_prefix("auth_token=")
                        .map(|s| s.to_string())
                })
            });
        let token = from_cookie
            .or_else(|| {
                parts
                    .headers
                    .get(axum::http::header::AUTHORIZATION)
                    .and_then(|authz| authz.to_str().ok())
                    .and_then(|s| s.strip_prefix("Bearer ").map(|s| s.to_string()))
            })
            .ok_or((StatusCode::UNAUTHORIZED, "Missing token".into()))?;

        let secret = crate::config::JWT_SECRET.as_str();
        let decoded = decode::<Claims>(
            &token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| (StatusCode::UNAUTHORIZED, "Invalid token".into()))?;
        Ok(TenantContext {
            tenant_id: decoded.claims.tenant_id,
            user_id: decoded.claims.sub,
            role: decoded.claims.role,
        })
    }
}
