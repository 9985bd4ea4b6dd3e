use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::services::AppState;

/// The authenticated principal supplied by the external auth layer.
/// This service never validates credentials; it only verifies the
/// token signature and injects the claims.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JwtClaims {
    pub sub: String,   // user id
    pub role: String,  // student, teacher, admin
    pub email: String,
    #[serde(default)]
    pub grade: Option<i32>,
    #[serde(default)]
    pub other_grade: Option<i32>,
    #[serde(default)]
    pub program: Option<String>,
    #[serde(default)]
    pub school_id: Option<String>,
    pub exp: usize,
    pub iat: usize,
}

impl JwtClaims {
    pub fn is_staff(&self) -> bool {
        matches!(self.role.as_str(), "teacher" | "admin")
    }
}

#[derive(Debug)]
pub enum AuthError {
    InvalidToken,
    ExpiredToken,
    MissingToken,
    InvalidSignature,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::InvalidToken => write!(f, "Invalid token"),
            AuthError::ExpiredToken => write!(f, "Token expired"),
            AuthError::MissingToken => write!(f, "Missing authorization token"),
            AuthError::InvalidSignature => write!(f, "Invalid token signature"),
        }
    }
}

impl std::error::Error for AuthError {}

pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtService {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn generate_token(&self, claims: JwtClaims) -> Result<String, AuthError> {
        encode(&Header::default(), &claims, &self.encoding_key).map_err(|_| AuthError::InvalidToken)
    }

    pub fn validate_token(&self, token: &str) -> Result<JwtClaims, AuthError> {
        let validation = Validation::default();

        decode::<JwtClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                if e.to_string().contains("ExpiredSignature") {
                    AuthError::ExpiredToken
                } else if e.to_string().contains("InvalidSignature") {
                    AuthError::InvalidSignature
                } else {
                    AuthError::InvalidToken
                }
            })
    }
}

/// Middleware verifying the bearer token and storing the principal in
/// request extensions for handlers to use.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let jwt_service = JwtService::new(&state.config.jwt_secret);
    let claims = jwt_service.validate_token(token).map_err(|e| {
        tracing::warn!("JWT validation failed: {}", e);
        StatusCode::UNAUTHORIZED
    })?;

    tracing::debug!("Authenticated user: {} (role: {})", claims.sub, claims.role);

    request.extensions_mut().insert(claims);

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn claims() -> JwtClaims {
        let now = Utc::now().timestamp() as usize;
        JwtClaims {
            sub: "user-1".into(),
            role: "student".into(),
            email: "user@example.com".into(),
            grade: Some(7),
            other_grade: None,
            program: Some("science".into()),
            school_id: Some("school-1".into()),
            exp: now + 3600,
            iat: now,
        }
    }

    #[test]
    fn round_trips_token() {
        let service = JwtService::new("test-secret");
        let token = service.generate_token(claims()).unwrap();
        let decoded = service.validate_token(&token).unwrap();
        assert_eq!(decoded.sub, "user-1");
        assert_eq!(decoded.grade, Some(7));
    }

    #[test]
    fn rejects_wrong_signature() {
        let token = JwtService::new("secret-a").generate_token(claims()).unwrap();
        assert!(JwtService::new("secret-b").validate_token(&token).is_err());
    }
}
