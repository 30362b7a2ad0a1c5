// Copyright 2025 Memophor Labs
// SPDX-License-Identifier: Apache-2.0

//! Caller identity.
//!
//! Validates bearer tokens and turns their claims into a [`Caller`]. Requests
//! without an `Authorization` header are anonymous; a header carrying an
//! invalid token is rejected.

use axum::http::{header, HeaderMap};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Registrar,
    Admin,
}

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,       // Computing id
    pub exp: usize,        // Expiration time
    #[serde(default)]
    pub iat: usize,        // Issued at
    #[serde(default)]
    pub role: Role,
}

/// Who is making a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    Anonymous,
    User { compute_id: String, role: Role },
}

impl Caller {
    pub fn user(compute_id: impl Into<String>, role: Role) -> Self {
        Caller::User {
            compute_id: compute_id.into(),
            role,
        }
    }

    pub fn compute_id(&self) -> Option<&str> {
        match self {
            Caller::Anonymous => None,
            Caller::User { compute_id, .. } => Some(compute_id),
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Caller::User { role: Role::Admin, .. })
    }

    /// The caller's computing id, or `Unauthorized` for anonymous callers.
    pub fn require_signed_in(&self) -> Result<&str, AppError> {
        self.compute_id()
            .ok_or_else(|| AppError::unauthorized("sign in required"))
    }

    pub fn require_admin(&self) -> Result<&str, AppError> {
        let id = self.require_signed_in()?;
        if !self.is_admin() {
            return Err(AppError::forbidden("admin access required"));
        }
        Ok(id)
    }
}

impl From<Claims> for Caller {
    fn from(claims: Claims) -> Self {
        Caller::User {
            compute_id: claims.sub,
            role: claims.role,
        }
    }
}

/// Token validation
#[derive(Clone)]
pub struct IdentityVerifier {
    jwt_secret: Option<String>,
}

impl IdentityVerifier {
    pub fn new(jwt_secret: Option<String>) -> Self {
        Self { jwt_secret }
    }

    /// Validate JWT token
    pub fn validate_jwt(&self, token: &str) -> Result<Claims, AppError> {
        let secret = self
            .jwt_secret
            .as_ref()
            .ok_or_else(|| AppError::unauthorized("JWT validation not configured"))?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;

        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &validation,
        )
        .map_err(|e| AppError::unauthorized(format!("Invalid JWT: {}", e)))?;

        Ok(token_data.claims)
    }

    /// Resolve the caller of a request from its headers.
    pub fn caller(&self, headers: &HeaderMap) -> Result<Caller, AppError> {
        let Some(auth_header) = headers.get(header::AUTHORIZATION) else {
            return Ok(Caller::Anonymous);
        };

        let token = auth_header
            .to_str()
            .ok()
            .and_then(|h| extract_bearer_token(Some(h)))
            .ok_or_else(|| AppError::unauthorized("invalid Authorization header"))?;

        let claims = self.validate_jwt(&token)?;
        tracing::debug!(compute_id = %claims.sub, role = ?claims.role, "authenticated caller");
        Ok(claims.into())
    }
}

impl Default for IdentityVerifier {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Extract bearer token from Authorization header
pub fn extract_bearer_token(auth_header: Option<&str>) -> Option<String> {
    auth_header
        .and_then(|h| h.trim().strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty() && *t != "undefined")
        .map(|t| t.to_string())
}
