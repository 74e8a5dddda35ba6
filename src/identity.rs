//! Identity provider
//!
//! Authenticates a connection from a bearer token and exposes the user
//! directory the matcher draws candidates from.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{AppError, ChatError};
use crate::types::UserId;

/// An authenticated user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub display_name: String,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve a credential token to a user
    async fn authenticate(&self, token: &str) -> Result<User, ChatError>;

    async fn get_user(&self, user_id: UserId) -> Result<Option<User>, ChatError>;

    /// Up to `limit` users other than `exclude`, in a stable order
    async fn candidates(&self, exclude: UserId, limit: usize) -> Result<Vec<User>, ChatError>;
}

/// Token claims
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    /// Subject (user ID)
    sub: String,
    iat: i64,
    exp: i64,
}

const TOKEN_ALGORITHM: Algorithm = Algorithm::HS256;

/// HS256 token verifier over an in-memory user directory
pub struct TokenIdentity {
    users: BTreeMap<UserId, User>,
    encoding: EncodingKey,
    decoding: DecodingKey,
    token_ttl: Duration,
}

impl TokenIdentity {
    pub fn new(secret: &str, token_ttl: Duration, users: impl IntoIterator<Item = User>) -> Self {
        Self {
            users: users.into_iter().map(|u| (u.id, u)).collect(),
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            token_ttl,
        }
    }

    /// Build from a JSON user directory file
    pub fn from_file(secret: &str, token_ttl: Duration, path: &Path) -> Result<Self, AppError> {
        let users = load_users(path)?;
        info!("Loaded {} users from {}", users.len(), path.display());
        Ok(Self::new(secret, token_ttl, users))
    }

    /// Issue a token for a known user
    pub fn issue_token(&self, user_id: UserId) -> Result<String, AppError> {
        if !self.users.contains_key(&user_id) {
            return Err(AppError::Config(format!("unknown user {user_id}")));
        }
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            iat: now.timestamp(),
            exp: (now + self.token_ttl).timestamp(),
        };
        Ok(encode(&Header::new(TOKEN_ALGORITHM), &claims, &self.encoding)?)
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }
}

#[async_trait]
impl IdentityProvider for TokenIdentity {
    async fn authenticate(&self, token: &str) -> Result<User, ChatError> {
        let token = token.strip_prefix("Bearer ").unwrap_or(token);
        let validation = Validation::new(TOKEN_ALGORITHM);

        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            debug!("Token rejected: {}", e);
            ChatError::Unauthenticated
        })?;

        let user_id: UserId = data
            .claims
            .sub
            .parse()
            .map_err(|_| ChatError::Unauthenticated)?;

        // Token may outlive the user
        self.users
            .get(&user_id)
            .cloned()
            .ok_or(ChatError::Unauthenticated)
    }

    async fn get_user(&self, user_id: UserId) -> Result<Option<User>, ChatError> {
        Ok(self.users.get(&user_id).cloned())
    }

    async fn candidates(&self, exclude: UserId, limit: usize) -> Result<Vec<User>, ChatError> {
        Ok(self
            .users
            .values()
            .filter(|u| u.id != exclude)
            .take(limit)
            .cloned()
            .collect())
    }
}

/// Read a `[{"id": ..., "display_name": ...}]` directory file
pub fn load_users(path: &Path) -> Result<Vec<User>, AppError> {
    let raw = std::fs::read_to_string(path)?;
    let users: Vec<User> = serde_json::from_str(&raw)?;

    if let Some(user) = users.iter().find(|u| u.display_name.trim().is_empty()) {
        return Err(AppError::Config(format!(
            "user {} has an empty display name",
            user.id
        )));
    }
    Ok(users)
}
