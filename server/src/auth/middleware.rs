//! Authentication middleware.
//!
//! Bearer token extraction. When `AUTH_SECRET` is set the token must match
//! it; otherwise requests without a token are let through as anonymous.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use crate::error::AppError;
use crate::AppState;

/// Authenticated client extracted from request.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// The bearer token, or "anonymous"
    pub token: String,
}

impl AuthUser {
    pub fn is_anonymous(&self) -> bool {
        self.token == "anonymous"
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        authorize(auth_header, state.config.auth_secret.as_deref())
    }
}

fn authorize(header: Option<&str>, secret: Option<&str>) -> Result<AuthUser, AppError> {
    match header {
        Some(header) if header.starts_with("Bearer ") => {
            let token = header.trim_start_matches("Bearer ").trim();
            if token.is_empty() {
                return Err(AppError::Unauthorized("Empty bearer token"));
            }
            if let Some(secret) = secret {
                if token != secret {
                    return Err(AppError::Unauthorized("Invalid bearer token"));
                }
            }
            Ok(AuthUser {
                token: token.to_string(),
            })
        }
        Some(_) => Err(AppError::Unauthorized(
            "Invalid authorization header format",
        )),
        None if secret.is_none() => Ok(AuthUser {
            token: "anonymous".to_string(),
        }),
        None => Err(AppError::Unauthorized("Missing authorization header")),
    }
}
