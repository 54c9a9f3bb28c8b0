use std::sync::Arc;

use chrono::Duration;
use tracing::{error, info};
use uuid::Uuid;

use colloquy_crypto::{PasswordVault, TokenIssuer};
use colloquy_db::Database;
use colloquy_types::error::{AuthError, ConflictError, NotFoundError, ServiceError};
use colloquy_types::models::User;

use crate::refresh::RefreshTokenStore;
use crate::run_blocking;

pub fn access_ttl(remember: bool) -> Duration {
    if remember {
        Duration::days(7)
    } else {
        Duration::minutes(15)
    }
}

pub fn refresh_ttl() -> Duration {
    Duration::days(7)
}

/// Credentials handed out by register/login.
#[derive(Debug, Clone)]
pub struct Session {
    pub user: User,
    pub access_token: String,
    pub access_ttl: Duration,
    pub refresh_token: String,
    pub refresh_ttl: Duration,
}

/// Registration, login, and the access/refresh credential lifecycle.
#[derive(Clone)]
pub struct AccountService {
    db: Arc<Database>,
    vault: PasswordVault,
    issuer: TokenIssuer,
    refresh: RefreshTokenStore,
}

impl AccountService {
    pub fn new(db: Arc<Database>, issuer: TokenIssuer) -> Self {
        let refresh = RefreshTokenStore::new(db.clone(), issuer.clone());
        Self {
            db,
            vault: PasswordVault::new(),
            issuer,
            refresh,
        }
    }

    pub fn refresh_store(&self) -> &RefreshTokenStore {
        &self.refresh
    }

    pub async fn register(&self, email: &str, password: &str, remember: bool) -> Result<Session, ServiceError> {
        let email = normalize_email(email)?;
        if password.is_empty() {
            return Err(ServiceError::InvalidInput("password must not be empty".into()));
        }

        // Keep Argon2 off the async workers.
        let vault = self.vault.clone();
        let plaintext = password.to_string();
        let digest = tokio::task::spawn_blocking(move || vault.hash(&plaintext))
            .await
            .map_err(|e| ServiceError::Internal(e.to_string()))?
            .map_err(|e| {
                error!("Password hashing failed: {}", e);
                ServiceError::Internal(e.to_string())
            })?;

        let user_id = Uuid::new_v4();
        let created = run_blocking(&self.db, {
            let email = email.clone();
            move |db| db.create_user(user_id, &email, &digest)
        })
        .await?
        .ok_or(ConflictError::EmailTaken)?;

        info!("Registered user {}", created.id);
        self.open_session(created.to_user(), remember).await
    }

    /// Unknown email and wrong password are indistinguishable to the caller.
    pub async fn login(&self, email: &str, password: &str, remember: bool) -> Result<Session, ServiceError> {
        let email = normalize_email(email).map_err(|_| AuthError::InvalidCredential)?;

        let row = run_blocking(&self.db, move |db| db.get_user_by_email(&email))
            .await?
            .ok_or(AuthError::InvalidCredential)?;

        let vault = self.vault.clone();
        let plaintext = password.to_string();
        let digest = row.password_hash.clone();
        let verified = tokio::task::spawn_blocking(move || vault.verify(&plaintext, &digest))
            .await
            .map_err(|e| ServiceError::Internal(e.to_string()))?;
        if !verified {
            return Err(AuthError::InvalidCredential.into());
        }

        self.open_session(row.to_user(), remember).await
    }

    /// Mint a short-lived access token from a refresh token. The refresh
    /// token itself is left untouched.
    pub async fn refresh(&self, refresh_token: Option<&str>) -> Result<String, ServiceError> {
        let token = refresh_token.ok_or(AuthError::MissingCredential)?;
        let user_id = self.refresh.validate(token).await?;

        let row = run_blocking(&self.db, move |db| db.get_user_by_id(user_id))
            .await?
            .ok_or(AuthError::InvalidCredential)?;

        self.issue_access(&row.email, access_ttl(false))
    }

    /// Idempotent; a missing token is not an error.
    pub async fn logout(&self, refresh_token: Option<&str>) -> Result<(), ServiceError> {
        if let Some(token) = refresh_token {
            self.refresh.revoke(token).await?;
        }
        Ok(())
    }

    /// Resolve an access token to its user. Stateless apart from the user
    /// lookup: access tokens are never checked against a store.
    pub async fn authenticate(&self, access_token: Option<&str>) -> Result<User, ServiceError> {
        let token = access_token.ok_or(AuthError::MissingCredential)?;
        let claims = self.issuer.verify_access(token)?;

        let row = run_blocking(&self.db, move |db| db.get_user_by_email(&claims.sub))
            .await?
            .ok_or(NotFoundError::User)?;
        Ok(row.to_user())
    }

    async fn open_session(&self, user: User, remember: bool) -> Result<Session, ServiceError> {
        let access_ttl = access_ttl(remember);
        let access_token = self.issue_access(&user.email, access_ttl)?;
        let refresh_token = self.refresh.create(user.id, refresh_ttl()).await?;

        Ok(Session {
            user,
            access_token,
            access_ttl,
            refresh_token,
            refresh_ttl: refresh_ttl(),
        })
    }

    fn issue_access(&self, subject: &str, ttl: Duration) -> Result<String, ServiceError> {
        self.issuer.issue_access(subject, ttl).map_err(|e| {
            error!("Access token signing failed: {}", e);
            ServiceError::Internal(e.to_string())
        })
    }
}

fn normalize_email(raw: &str) -> Result<String, ServiceError> {
    let email = raw.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(ServiceError::InvalidInput("email address is not valid".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> (AccountService, TokenIssuer) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let issuer = TokenIssuer::new("test-secret");
        (AccountService::new(db, issuer.clone()), issuer)
    }

    #[tokio::test]
    async fn register_then_login() {
        let (accounts, issuer) = service();
        let registered = accounts.register("a@x.com", "pw", false).await.unwrap();
        assert_eq!(registered.user.email, "a@x.com");

        let session = accounts.login("A@X.com ", "pw", false).await.unwrap();
        assert_eq!(session.user.id, registered.user.id);
        assert_eq!(session.access_ttl, Duration::minutes(15));
        assert_eq!(session.refresh_ttl, Duration::days(7));

        let claims = issuer.verify_access(&session.access_token).unwrap();
        assert_eq!(claims.sub, "a@x.com");
    }

    #[tokio::test]
    async fn remember_extends_access_ttl() {
        let (accounts, issuer) = service();
        accounts.register("a@x.com", "pw", false).await.unwrap();

        let session = accounts.login("a@x.com", "pw", true).await.unwrap();
        assert_eq!(session.access_ttl, Duration::days(7));
        let claims = issuer.verify_access(&session.access_token).unwrap();
        assert_eq!(claims.exp - claims.iat, Duration::days(7).num_seconds());
    }

    #[tokio::test]
    async fn duplicate_email_is_a_conflict() {
        let (accounts, _) = service();
        accounts.register("a@x.com", "pw", false).await.unwrap();
        let err = accounts.register("a@x.com", "other", false).await.unwrap_err();
        assert_eq!(err, ServiceError::Conflict(ConflictError::EmailTaken));
    }

    #[tokio::test]
    async fn bad_input_is_rejected() {
        let (accounts, _) = service();
        assert!(matches!(
            accounts.register("not-an-email", "pw", false).await,
            Err(ServiceError::InvalidInput(_))
        ));
        assert!(matches!(
            accounts.register("a@x.com", "", false).await,
            Err(ServiceError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_user_look_the_same() {
        let (accounts, _) = service();
        accounts.register("a@x.com", "pw", false).await.unwrap();

        let wrong = accounts.login("a@x.com", "nope", false).await.unwrap_err();
        let unknown = accounts.login("b@x.com", "pw", false).await.unwrap_err();
        assert_eq!(wrong, ServiceError::Auth(AuthError::InvalidCredential));
        assert_eq!(unknown, wrong);
    }

    #[tokio::test]
    async fn refresh_works_until_logout() {
        let (accounts, issuer) = service();
        let session = accounts.register("a@x.com", "pw", true).await.unwrap();

        let first = accounts.refresh(Some(&session.refresh_token)).await.unwrap();
        let second = accounts.refresh(Some(&session.refresh_token)).await.unwrap();
        assert_eq!(issuer.verify_access(&first).unwrap().sub, "a@x.com");
        assert_eq!(issuer.verify_access(&second).unwrap().sub, "a@x.com");

        accounts.logout(Some(&session.refresh_token)).await.unwrap();
        accounts.logout(Some(&session.refresh_token)).await.unwrap();
        let err = accounts.refresh(Some(&session.refresh_token)).await.unwrap_err();
        assert_eq!(err, ServiceError::Auth(AuthError::InvalidCredential));
    }

    #[tokio::test]
    async fn refresh_without_token_is_missing_credential() {
        let (accounts, _) = service();
        let err = accounts.refresh(None).await.unwrap_err();
        assert_eq!(err, ServiceError::Auth(AuthError::MissingCredential));
    }

    #[tokio::test]
    async fn authenticate_checks_the_access_token() {
        let (accounts, issuer) = service();
        let session = accounts.register("a@x.com", "pw", false).await.unwrap();

        let user = accounts.authenticate(Some(&session.access_token)).await.unwrap();
        assert_eq!(user.id, session.user.id);

        assert_eq!(
            accounts.authenticate(None).await.unwrap_err(),
            ServiceError::Auth(AuthError::MissingCredential)
        );
        let expired = issuer.issue_access("a@x.com", Duration::minutes(-1)).unwrap();
        assert_eq!(
            accounts.authenticate(Some(&expired)).await.unwrap_err(),
            ServiceError::Auth(AuthError::Expired)
        );
        let ghost = issuer.issue_access("ghost@x.com", Duration::minutes(5)).unwrap();
        assert_eq!(
            accounts.authenticate(Some(&ghost)).await.unwrap_err(),
            ServiceError::NotFound(NotFoundError::User)
        );
    }
}
