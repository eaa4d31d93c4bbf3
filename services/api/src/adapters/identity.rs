//! services/api/src/adapters/identity.rs
//!
//! The `IdentityProvider` port backed by the same Postgres database: accounts
//! with argon2 password hashes, and opaque session tokens with an expiry.
//!
//! This device's current session token is kept in local storage, the way a
//! hosted auth client persists its session in the browser.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use custodyx_core::domain::{AuthEvent, AuthSession, AuthUser};
use custodyx_core::ports::{AuthError, AuthEventStream, IdentityProvider, KeyValueStore};
use custodyx_core::session::event_stream;
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Local storage key holding this device's session token.
pub const SESSION_TOKEN_KEY: &str = "custodyx.auth.token";

const MIN_PASSWORD_LEN: usize = 6;

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct AccountRecord {
    id: Uuid,
    email: String,
    password_hash: String,
}

#[derive(FromRow)]
struct SessionRecord {
    token: String,
    expires_at: DateTime<Utc>,
    user_id: Uuid,
    email: String,
}
impl SessionRecord {
    fn to_domain(self) -> AuthSession {
        AuthSession {
            access_token: self.token,
            user: AuthUser {
                id: self.user_id,
                email: Some(self.email),
            },
            expires_at: self.expires_at,
        }
    }
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

pub struct PgIdentityProvider {
    pool: PgPool,
    storage: Arc<dyn KeyValueStore>,
    session_ttl: Duration,
    events: broadcast::Sender<AuthEvent>,
}

impl PgIdentityProvider {
    pub fn new(pool: PgPool, storage: Arc<dyn KeyValueStore>, session_ttl: Duration) -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            pool,
            storage,
            session_ttl,
            events,
        }
    }

    fn publish(&self, event: AuthEvent) {
        // No subscribers is fine: nobody is listening yet.
        let _ = self.events.send(event);
    }

    fn stored_token(&self) -> Result<Option<String>, AuthError> {
        self.storage.get_item(SESSION_TOKEN_KEY).map_err(provider)
    }

    async fn open_session(&self, user_id: Uuid, email: String) -> Result<AuthSession, AuthError> {
        let token = Uuid::new_v4().to_string();
        let expires_at = Utc::now() + self.session_ttl;

        sqlx::query("INSERT INTO auth_sessions (token, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(&token)
            .bind(user_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to create auth session: {:?}", e);
                provider(e)
            })?;
        self.storage
            .set_item(SESSION_TOKEN_KEY, &token)
            .map_err(provider)?;

        let session = AuthSession {
            access_token: token,
            user: AuthUser {
                id: user_id,
                email: Some(email),
            },
            expires_at,
        };
        self.publish(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }
}

fn provider(e: impl ToString) -> AuthError {
    AuthError::Provider(e.to_string())
}

fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            error!("Failed to hash password: {:?}", e);
            provider("failed to hash password")
        })
}

fn verify_password(password: &str, stored: &str) -> Result<bool, AuthError> {
    let parsed = PasswordHash::new(stored).map_err(|e| {
        error!("Failed to parse password hash: {:?}", e);
        provider("stored credentials are unreadable")
    })?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

fn validate_sign_up(email: &str, password: &str) -> Result<(), AuthError> {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => {}
        _ => return Err(AuthError::InvalidInput("a valid email is required".to_string())),
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::InvalidInput(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

//=========================================================================================
// `IdentityProvider` Trait Implementation
//=========================================================================================

#[async_trait]
impl IdentityProvider for PgIdentityProvider {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: Option<Value>,
    ) -> Result<AuthSession, AuthError> {
        validate_sign_up(email, password)?;
        let email = normalize_email(email);
        let password_hash = hash_password(password)?;

        let user_id: Uuid = sqlx::query_scalar(
            "INSERT INTO auth_users (id, email, password_hash, metadata) VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(Uuid::new_v4())
        .bind(&email)
        .bind(&password_hash)
        .bind(metadata)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => AuthError::EmailTaken,
            other => {
                error!("Failed to create user: {:?}", other);
                provider(other)
            }
        })?;

        info!(%user_id, "Account created.");
        self.open_session(user_id, email).await
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, AuthError> {
        let account = sqlx::query_as::<_, AccountRecord>(
            "SELECT id, email, password_hash FROM auth_users WHERE email = $1",
        )
        .bind(normalize_email(email))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to get user: {:?}", e);
            provider(e)
        })?
        .ok_or(AuthError::InvalidCredentials)?;

        if !verify_password(password, &account.password_hash)? {
            return Err(AuthError::InvalidCredentials);
        }
        self.open_session(account.id, account.email).await
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        if let Some(token) = self.stored_token()? {
            sqlx::query("DELETE FROM auth_sessions WHERE token = $1")
                .bind(&token)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    error!("Failed to delete auth session: {:?}", e);
                    provider(e)
                })?;
            self.storage
                .remove_item(SESSION_TOKEN_KEY)
                .map_err(provider)?;
        }
        self.publish(AuthEvent::SignedOut);
        Ok(())
    }

    async fn get_session(&self) -> Result<Option<AuthSession>, AuthError> {
        let Some(token) = self.stored_token()? else {
            return Ok(None);
        };
        let record = sqlx::query_as::<_, SessionRecord>(
            "SELECT s.token, s.expires_at, u.id AS user_id, u.email \
             FROM auth_sessions s JOIN auth_users u ON u.id = s.user_id \
             WHERE s.token = $1 AND s.expires_at > now()",
        )
        .bind(&token)
        .fetch_optional(&self.pool)
        .await
        .map_err(provider)?;

        match record {
            Some(record) => Ok(Some(record.to_domain())),
            None => {
                warn!("Stored session is no longer valid; discarding it.");
                self.storage
                    .remove_item(SESSION_TOKEN_KEY)
                    .map_err(provider)?;
                Ok(None)
            }
        }
    }

    async fn refresh_session(&self) -> Result<AuthSession, AuthError> {
        let mut session = self
            .get_session()
            .await?
            .ok_or(AuthError::InvalidCredentials)?;
        let expires_at = Utc::now() + self.session_ttl;

        sqlx::query("UPDATE auth_sessions SET expires_at = $1 WHERE token = $2")
            .bind(expires_at)
            .bind(&session.access_token)
            .execute(&self.pool)
            .await
            .map_err(provider)?;

        session.expires_at = expires_at;
        self.publish(AuthEvent::TokenRefreshed(session.clone()));
        Ok(session)
    }

    fn subscribe(&self) -> AuthEventStream {
        event_stream(self.events.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_up_details_are_checked_before_touching_the_database() {
        assert!(validate_sign_up("parent@example.com", "hunter22").is_ok());
        assert!(matches!(
            validate_sign_up("parent.example.com", "hunter22"),
            Err(AuthError::InvalidInput(_))
        ));
        assert!(matches!(
            validate_sign_up("parent@example.com", "short"),
            Err(AuthError::InvalidInput(_))
        ));
    }

    #[test]
    fn password_hashes_verify_only_the_original_password() {
        let hash = hash_password("hunter22").unwrap();
        assert!(verify_password("hunter22", &hash).unwrap());
        assert!(!verify_password("hunter23", &hash).unwrap());
    }

    #[test]
    fn emails_are_matched_case_insensitively() {
        assert_eq!(normalize_email("  Parent@Example.COM "), "parent@example.com");
    }
}
