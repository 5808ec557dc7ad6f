//! # cb-auth-jwt
//!
//! HS256 JSON Web Token implementation of `IdentityProvider`.
//! Tokens must carry an `email` claim; every other claim is passed through
//! on the resulting `Principal`.

use async_trait::async_trait;
use cb_core::error::{AppError, Result};
use cb_core::models::Principal;
use cb_core::traits::IdentityProvider;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::debug;

pub struct JwtIdentity {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtIdentity {
    /// `issuer`, when set, must match the token's `iss` claim.
    pub fn new(secret: &SecretString, issuer: Option<&str>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        if let Some(issuer) = issuer {
            validation.set_issuer(&[issuer]);
        }
        Self {
            decoding_key: DecodingKey::from_secret(secret.expose_secret().as_bytes()),
            validation,
        }
    }
}

/// Accepts both a raw token and an `Authorization` header value.
fn strip_bearer(credential: &str) -> &str {
    let credential = credential.trim();
    credential
        .strip_prefix("Bearer ")
        .or_else(|| credential.strip_prefix("bearer "))
        .unwrap_or(credential)
        .trim()
}

#[async_trait]
impl IdentityProvider for JwtIdentity {
    async fn authenticate(&self, credential: &str) -> Result<Principal> {
        let token = strip_bearer(credential);
        if token.is_empty() {
            return Err(AppError::Unauthenticated);
        }

        let claims = decode::<Value>(token, &self.decoding_key, &self.validation)
            .map_err(|err| {
                debug!(error = %err, "rejected bearer token");
                AppError::Unauthenticated
            })?
            .claims;

        let email = claims
            .get("email")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|email| !email.is_empty())
            .ok_or(AppError::Unauthenticated)?
            .to_string();

        Ok(Principal { email, claims })
    }
}
