//! Passwords, session tokens and the request extractor that turns a
//! bearer token back into a user.

use std::sync::LazyLock;

use anyhow::Context;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use helpdesk_common::Actor;
use sha2::{Digest, Sha256};

use super::api::{ApiError, SharedState};
use super::models::User;
use crate::errors::{HelpdeskError, HelpdeskResult};

/// Hash a plain password with argon2id.
pub fn hash_password(password: &str) -> anyhow::Result<String> {
    use argon2::Argon2;
    use password_hash::rand_core::OsRng;
    use password_hash::{PasswordHasher, SaltString};

    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))
}

/// Verify a password against an argon2id hash. Malformed hashes never match.
pub fn verify_password(password: &str, hash: &str) -> bool {
    use argon2::Argon2;
    use password_hash::{PasswordHash, PasswordVerifier};

    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

// Verified against when a login names an unknown or inactive user, so a
// failed login costs the same whether or not the account exists.
static DUMMY_HASH: LazyLock<String> =
    LazyLock::new(|| hash_password("not-a-real-password").unwrap_or_default());

pub fn dummy_hash() -> &'static str {
    &DUMMY_HASH
}

/// `hash_password` on the blocking pool, away from the async workers and
/// the database lock.
pub async fn hash_password_async(password: String) -> HelpdeskResult<String> {
    let hash = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .context("Password hashing task panicked")??;
    Ok(hash)
}

pub async fn verify_password_async(password: String, hash: String) -> HelpdeskResult<bool> {
    let verified = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .context("Password check task panicked")?;
    Ok(verified)
}

/// A fresh opaque session token handed to the client.
pub fn new_session_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Sessions are stored by digest so a leaked database does not leak
/// usable tokens.
pub fn token_digest(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

/// Pull the token out of an `Authorization: Bearer <token>` header value.
pub fn extract_bearer(header: &str) -> Option<&str> {
    let (scheme, token) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// The authenticated caller of a request.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user: User,
    pub token_hash: String,
}

impl CurrentUser {
    pub fn actor(&self) -> Actor {
        Actor {
            id: self.user.id,
            username: self.user.username.clone(),
            role: self.user.role,
            is_staff: self.user.is_staff,
            client_id: self.user.client_id,
        }
    }
}

impl FromRequestParts<SharedState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(extract_bearer)
            .ok_or(HelpdeskError::Unauthorized)?;
        let token_hash = token_digest(token);

        let lookup = token_hash.clone();
        let user = state
            .db
            .call(move |db| Ok(db.find_session_user(&lookup)?))
            .await?
            .ok_or(HelpdeskError::Unauthorized)?;

        Ok(CurrentUser { user, token_hash })
    }
}
