//! User management
//!
//! Accounts, credentials, and API keys. The API key is the opaque credential
//! the gateway resolves callers by; it is generated server-side and can be
//! regenerated, which immediately invalidates the old one. Deleting a user
//! cascades through every cache plane derived from the user.

use std::sync::Arc;

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use uuid::Uuid;

use crate::cache::{CacheManager, keys};
use crate::core_types::UserId;
use crate::errors::LedgerError;
use crate::models::{AuditAction, EntityType, Role, User};
use crate::persistence::{AuditLogRepository, NewAuditLog, NewUser, UserRepository};

fn internal(msg: String) -> LedgerError {
    LedgerError::Storage(sqlx::Error::Protocol(msg))
}

#[derive(Debug, Default, Clone)]
pub struct UserUpdate {
    pub username: Option<String>,
    pub email: Option<String>,
}

pub struct UserService {
    repo: Arc<dyn UserRepository>,
    audit: Arc<dyn AuditLogRepository>,
    cache: Option<CacheManager>,
}

impl UserService {
    pub fn new(repo: Arc<dyn UserRepository>, audit: Arc<dyn AuditLogRepository>) -> Self {
        Self {
            repo,
            audit,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: CacheManager) -> Self {
        self.cache = Some(cache);
        self
    }

    pub async fn create_user(
        &self,
        username: &str,
        email: &str,
        password: &str,
        role: Role,
    ) -> Result<User, LedgerError> {
        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| internal(format!("password hashing failed: {}", e)))?
            .to_string();

        let user = self
            .repo
            .create(&NewUser {
                username: username.to_string(),
                email: email.to_string(),
                password_hash,
                role,
                api_key: generate_api_key(),
            })
            .await?;

        self.emit_audit(user.id, AuditAction::Create, format!("user {} created", user.username))
            .await;

        tracing::info!(user_id = user.id, username, "User created");
        Ok(user)
    }

    /// Verify username/password. `None` means the credentials do not match;
    /// the adapter decides the transport response.
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<User>, LedgerError> {
        let Some(user) = self.repo.find_by_username(username).await? else {
            return Ok(None);
        };

        let parsed = PasswordHash::new(&user.password_hash)
            .map_err(|e| internal(format!("stored password hash invalid: {}", e)))?;

        match Argon2::default().verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(Some(user)),
            Err(_) => Ok(None),
        }
    }

    pub async fn get_by_api_key(&self, api_key: &str) -> Result<Option<User>, LedgerError> {
        self.repo.find_by_api_key(api_key).await
    }

    pub async fn get_user(&self, id: UserId) -> Result<User, LedgerError> {
        self.repo
            .find_by_id(id)
            .await?
            .ok_or(LedgerError::UserNotFound(id))
    }

    /// Replace the API key; the previous key stops authenticating.
    pub async fn regenerate_api_key(&self, id: UserId) -> Result<String, LedgerError> {
        let user = self.get_user(id).await?;

        let api_key = generate_api_key();
        self.repo.set_api_key(id, &api_key).await?;

        self.invalidate_user_cache(&user).await;
        self.emit_audit(id, AuditAction::Update, "api key regenerated".to_string())
            .await;

        Ok(api_key)
    }

    pub async fn update_user(&self, id: UserId, update: UserUpdate) -> Result<User, LedgerError> {
        let mut user = self.get_user(id).await?;
        let stale = user.clone();

        if let Some(username) = update.username {
            user.username = username;
        }
        if let Some(email) = update.email {
            user.email = email;
        }

        self.repo.update(&user).await?;
        self.invalidate_user_cache(&stale).await;
        self.emit_audit(id, AuditAction::Update, format!("user {} updated", id))
            .await;

        self.get_user(id).await
    }

    pub async fn delete_user(&self, id: UserId) -> Result<(), LedgerError> {
        let user = self.get_user(id).await?;

        self.repo.delete(id).await?;
        self.invalidate_user_cache(&user).await;
        self.emit_audit(id, AuditAction::Delete, format!("user {} deleted", user.username))
            .await;

        tracing::info!(user_id = id, "User deleted");
        Ok(())
    }

    async fn invalidate_user_cache(&self, user: &User) {
        if let Some(cache) = &self.cache {
            cache
                .invalidate(&keys::user_invalidation_keys(
                    user.id,
                    &user.username,
                    &user.email,
                ))
                .await;
        }
    }

    async fn emit_audit(&self, user_id: UserId, action: AuditAction, details: String) {
        if let Err(err) = self
            .audit
            .create(&NewAuditLog {
                entity_type: EntityType::User,
                entity_id: user_id,
                action,
                details,
            })
            .await
        {
            tracing::error!(user_id, error = %err, "Audit log write failed");
        }
    }
}

fn generate_api_key() -> String {
    format!("pf_{}", Uuid::new_v4().simple())
}
