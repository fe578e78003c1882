use bcrypt::{DEFAULT_COST, hash, verify};
use tracing::warn;

use crate::config::{AdminSecret, DEFAULT_ADMIN_PASSWORD};
use crate::error::AppError;

/// The single administrator password, held only as a bcrypt hash.
#[derive(Debug, Clone)]
pub struct AdminCredentials {
    password_hash: String,
}

impl AdminCredentials {
    pub fn from_hash(password_hash: &str) -> Self {
        Self {
            password_hash: password_hash.to_string(),
        }
    }

    pub fn from_password(password: &str, cost: u32) -> Result<Self, AppError> {
        Ok(Self {
            password_hash: hash(password, cost)?,
        })
    }

    pub fn from_secret(secret: &AdminSecret) -> Result<Self, AppError> {
        match secret {
            AdminSecret::Hash(password_hash) => Ok(Self::from_hash(password_hash)),
            AdminSecret::Plain(password) => {
                if password == DEFAULT_ADMIN_PASSWORD {
                    warn!("Using the default admin password; set ADMIN_PASSWORD_HASH in production");
                }
                Self::from_password(password, DEFAULT_COST)
            }
        }
    }

    /// A malformed stored hash counts as a mismatch.
    pub fn verify(&self, password: &str) -> bool {
        match verify(password, &self.password_hash) {
            Ok(matches) => matches,
            Err(e) => {
                warn!(error = %e, "Failed to verify admin password");
                false
            }
        }
    }
}
