use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rand::distr::Alphanumeric;
use serde::Serialize;
use sqlx::{Pool, Sqlite};
use tracing::{instrument, warn};

use crate::db::{
    clean_expired_sessions, create_admin_session, get_admin_session, invalidate_admin_session,
};
use crate::error::AppError;

pub const TOKEN_LENGTH: usize = 43;

#[derive(Debug, Clone, Serialize)]
pub struct AdminSession {
    pub id: i64,
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
pub struct DbAdminSession {
    pub id: i64,
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<DbAdminSession> for AdminSession {
    fn from(session: DbAdminSession) -> Self {
        Self {
            id: session.id,
            token: session.token,
            created_at: session.created_at,
            expires_at: session.expires_at,
        }
    }
}

impl AdminSession {
    pub fn is_valid(&self) -> bool {
        self.expires_at > Utc::now()
    }

    pub fn generate_token() -> String {
        rand::rng()
            .sample_iter(&Alphanumeric)
            .take(TOKEN_LENGTH)
            .map(char::from)
            .collect()
    }
}

/// Issued admin tokens. Shared by every request through Rocket state, so
/// implementations must be safe to call concurrently.
#[rocket::async_trait]
pub trait SessionStore: Send + Sync {
    async fn issue(&self) -> Result<AdminSession, AppError>;

    /// `Ok(false)` for unknown and expired tokens alike.
    async fn validate(&self, token: &str) -> Result<bool, AppError>;

    async fn revoke(&self, token: &str) -> Result<(), AppError>;

    async fn purge_expired(&self) -> Result<u64, AppError>;
}

pub struct SqliteSessionStore {
    pool: Pool<Sqlite>,
    ttl: Duration,
}

impl SqliteSessionStore {
    pub fn new(pool: Pool<Sqlite>, ttl: Duration) -> Self {
        Self { pool, ttl }
    }
}

#[rocket::async_trait]
impl SessionStore for SqliteSessionStore {
    #[instrument(skip(self))]
    async fn issue(&self) -> Result<AdminSession, AppError> {
        let token = AdminSession::generate_token();
        let expires_at = Utc::now() + self.ttl;

        create_admin_session(&self.pool, &token, expires_at).await?;
        get_admin_session(&self.pool, &token).await
    }

    #[instrument(skip(self, token))]
    async fn validate(&self, token: &str) -> Result<bool, AppError> {
        match get_admin_session(&self.pool, token).await {
            Ok(session) => {
                if !session.is_valid() {
                    warn!(session_id = session.id, "Admin session expired");
                }
                Ok(session.is_valid())
            }
            Err(AppError::Authentication(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self, token))]
    async fn revoke(&self, token: &str) -> Result<(), AppError> {
        invalidate_admin_session(&self.pool, token).await
    }

    #[instrument(skip(self))]
    async fn purge_expired(&self) -> Result<u64, AppError> {
        clean_expired_sessions(&self.pool).await
    }
}
