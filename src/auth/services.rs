use std::sync::Arc;

use argon2::{password_hash::SaltString, Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use async_trait::async_trait;
use lazy_static::lazy_static;
use rand::rngs::OsRng;
use regex::Regex;
use time::OffsetDateTime;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{dto::SignupRequest, jwt::JwtKeys, RequestContext};
use crate::{
    db::{NewUser, Session, Store, User},
    error::{AppError, AppResult},
};

pub const MIN_USERNAME_LEN: usize = 3;
pub const MIN_PASSWORD_LEN: usize = 6;

/// A freshly created session and the token that refers to it.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub session_id: Uuid,
    pub expires_at: OffsetDateTime,
}

/// Credential checks and session lifecycle.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn verify_credentials(&self, username: &str, password: &str) -> AppResult<User>;
    async fn create_session(&self, user_id: Uuid) -> AppResult<IssuedSession>;
    /// Resolves a session token into the caller's identity.
    async fn current_user(&self, token: &str) -> AppResult<RequestContext>;
    async fn end_session(&self, ctx: &RequestContext) -> AppResult<()>;
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            anyhow::anyhow!(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

pub fn verify_password(plain: &str, hash: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| {
        error!(error = %e, "argon2 parse hash error");
        anyhow::anyhow!(e.to_string())
    })?;
    Ok(Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok())
}

fn invalid_credentials() -> AppError {
    AppError::unauthorized("Invalid credentials")
}

fn invalid_session() -> AppError {
    AppError::unauthorized("Invalid or expired session")
}

/// Server-side sessions addressed by signed tokens.
pub struct SessionAuthenticator {
    store: Arc<dyn Store>,
    keys: JwtKeys,
}

impl SessionAuthenticator {
    pub fn new(store: Arc<dyn Store>, keys: JwtKeys) -> Self {
        Self { store, keys }
    }
}

#[async_trait]
impl Authenticator for SessionAuthenticator {
    async fn verify_credentials(&self, username: &str, password: &str) -> AppResult<User> {
        let Some(user) = self.store.find_user_by_username(username.trim()).await? else {
            warn!(username, "signin unknown username");
            return Err(invalid_credentials());
        };

        match verify_password(password, &user.password_hash) {
            Ok(true) => Ok(user),
            Ok(false) => {
                warn!(user_id = %user.id, "signin invalid password");
                Err(invalid_credentials())
            }
            Err(e) => {
                error!(error = %e, user_id = %user.id, "stored password hash unreadable");
                Err(invalid_credentials())
            }
        }
    }

    async fn create_session(&self, user_id: Uuid) -> AppResult<IssuedSession> {
        let now = OffsetDateTime::now_utc();
        let session = Session {
            id: Uuid::new_v4(),
            user_id,
            created_at: now,
            expires_at: now + self.keys.session_ttl,
        };
        let token = self
            .keys
            .sign(user_id, session.id, session.created_at, session.expires_at)
            .map_err(|e| {
                error!(error = %e, "session token signing failed");
                AppError::Internal(format!("sign session token: {e}"))
            })?;
        self.store.insert_session(&session).await?;
        info!(user_id = %user_id, session_id = %session.id, "session created");
        Ok(IssuedSession {
            token,
            session_id: session.id,
            expires_at: session.expires_at,
        })
    }

    async fn current_user(&self, token: &str) -> AppResult<RequestContext> {
        let claims = self.keys.verify(token).map_err(|e| {
            warn!(error = %e, "invalid session token");
            invalid_session()
        })?;

        let Some(session) = self.store.find_session(claims.sid).await? else {
            warn!(session_id = %claims.sid, "session ended or unknown");
            return Err(invalid_session());
        };
        if session.user_id != claims.sub {
            warn!(session_id = %session.id, "session does not belong to token subject");
            return Err(invalid_session());
        }
        if session.expires_at <= OffsetDateTime::now_utc() {
            warn!(session_id = %session.id, "session expired");
            return Err(invalid_session());
        }

        Ok(RequestContext {
            user_id: session.user_id,
            session_id: session.id,
        })
    }

    async fn end_session(&self, ctx: &RequestContext) -> AppResult<()> {
        self.store.delete_session(ctx.session_id).await?;
        info!(user_id = %ctx.user_id, session_id = %ctx.session_id, "session ended");
        Ok(())
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Creates the account described by `req` and signs the new user in.
pub async fn register(
    store: &dyn Store,
    auth: &dyn Authenticator,
    req: SignupRequest,
) -> AppResult<(User, IssuedSession)> {
    let username = req.username.trim().to_string();
    if username.chars().count() < MIN_USERNAME_LEN || req.password.chars().count() < MIN_PASSWORD_LEN {
        warn!("signup rejected: credentials too short");
        return Err(AppError::validation(format!(
            "username must be at least {MIN_USERNAME_LEN} characters, password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    let email = non_blank(req.email).map(|e| e.to_lowercase());
    if let Some(email) = &email {
        if !is_valid_email(email) {
            warn!(email = %email, "signup rejected: invalid email");
            return Err(AppError::validation("Invalid email"));
        }
    }

    if store.find_user_by_username(&username).await?.is_some() {
        warn!(username = %username, "signup rejected: username taken");
        return Err(AppError::Conflict("username must be unique".into()));
    }

    let password_hash = hash_password(&req.password).map_err(|e| {
        error!(error = %e, "hash_password failed");
        AppError::Internal(format!("hash password: {e}"))
    })?;

    // the unique index still guards against a concurrent signup
    let user = store
        .insert_user(NewUser {
            username,
            password_hash,
            firstname: non_blank(req.firstname),
            lastname: non_blank(req.lastname),
            email,
        })
        .await?;
    info!(user_id = %user.id, username = %user.username, "user registered");

    let session = auth.create_session(user.id).await?;
    Ok((user, session))
}
