use std::sync::Arc;

use chrono::{Duration, Utc};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use colloquy_crypto::{TokenIssuer, refresh_fingerprint};
use colloquy_db::Database;
use colloquy_types::error::{AuthError, PersistenceError, ServiceError};

use crate::run_blocking;

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("refresh token is not recognised")]
    Invalid,
    #[error("refresh token has expired")]
    Expired,
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl From<RefreshError> for ServiceError {
    fn from(err: RefreshError) -> Self {
        match err {
            RefreshError::Invalid => AuthError::InvalidCredential.into(),
            RefreshError::Expired => AuthError::Expired.into(),
            RefreshError::Persistence(e) => e.into(),
        }
    }
}

/// Persisted, revocable refresh tokens.
///
/// Tokens are not rotated on use: the same token keeps minting access tokens
/// until it expires or is revoked. That is a known weakness of the contract
/// (a leaked token stays useful for its whole lifetime), kept as-is.
#[derive(Clone)]
pub struct RefreshTokenStore {
    db: Arc<Database>,
    issuer: TokenIssuer,
}

impl RefreshTokenStore {
    pub fn new(db: Arc<Database>, issuer: TokenIssuer) -> Self {
        Self { db, issuer }
    }

    pub async fn create(&self, user_id: Uuid, ttl: Duration) -> Result<String, PersistenceError> {
        let token = self.issuer.issue_refresh();
        let fingerprint = refresh_fingerprint(&token);
        let expires_at = Utc::now() + ttl;

        run_blocking(&self.db, move |db| {
            db.insert_refresh_token(&fingerprint, user_id, expires_at)
        })
        .await?;

        Ok(token)
    }

    /// Resolve a token to its user. An expired row is deleted on the way out,
    /// so it can never validate again.
    pub async fn validate(&self, token: &str) -> Result<Uuid, RefreshError> {
        let fingerprint = refresh_fingerprint(token);
        let lookup = fingerprint.clone();
        let row = run_blocking(&self.db, move |db| db.get_refresh_token(&lookup))
            .await?
            .ok_or(RefreshError::Invalid)?;

        if row.is_expired_at(Utc::now()) {
            debug!("Refresh token for user {} expired; deleting", row.user_id);
            run_blocking(&self.db, move |db| db.delete_refresh_token(&fingerprint)).await?;
            return Err(RefreshError::Expired);
        }

        Ok(row.user_id)
    }

    /// Idempotent.
    pub async fn revoke(&self, token: &str) -> Result<(), PersistenceError> {
        let fingerprint = refresh_fingerprint(token);
        run_blocking(&self.db, move |db| db.delete_refresh_token(&fingerprint)).await?;
        Ok(())
    }

    pub async fn purge_expired(&self) -> Result<usize, PersistenceError> {
        run_blocking(&self.db, |db| db.purge_expired_refresh_tokens(Utc::now())).await
    }
}
