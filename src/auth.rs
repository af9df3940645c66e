//! Identity adapter
//!
//! Resolves bearer tokens to users and holds the one ownership rule every
//! conversation access goes through.

use crate::db::Conversation;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;

const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// An authenticated user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Identity {
    #[allow(dead_code)] // Used in tests
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: None,
            created_at: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Identity provider unreachable: {0}")]
    Transport(String),
    #[error("Identity provider returned {status}: {message}")]
    Provider { status: u16, message: String },
}

/// Access to the hosted authentication service
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// The user a token belongs to, `None` for unknown or expired tokens
    async fn current_user(&self, token: &str) -> Result<Option<Identity>, AuthError>;

    /// End the session behind a token
    async fn sign_out(&self, token: &str) -> Result<(), AuthError>;
}

/// The ownership rule: a conversation is accessible only to its owner.
pub fn authorize(user_id: &str, conversation: &Conversation) -> bool {
    conversation.owner_id == user_id
}

// ============================================================================
// Hosted provider
// ============================================================================

/// GoTrue-compatible auth service (`/user`, `/logout`)
pub struct HttpIdentityProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserPayload {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

impl From<UserPayload> for Identity {
    fn from(p: UserPayload) -> Self {
        Identity {
            user_id: p.id,
            email: p.email,
            created_at: p.created_at,
        }
    }
}

impl HttpIdentityProvider {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self, AuthError> {
        let client = Client::builder()
            .timeout(AUTH_TIMEOUT)
            .build()
            .map_err(|e| AuthError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str, token: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{path}", self.base_url))
            .bearer_auth(token);
        match &self.api_key {
            Some(key) => builder.header("apikey", key),
            None => builder,
        }
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn current_user(&self, token: &str) -> Result<Option<Identity>, AuthError> {
        let response = self
            .request(reqwest::Method::GET, "/user", token)
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Ok(None),
            status if status.is_success() => {
                let payload: UserPayload = response
                    .json()
                    .await
                    .map_err(|e| AuthError::Transport(e.to_string()))?;
                Ok(Some(payload.into()))
            }
            status => Err(AuthError::Provider {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            }),
        }
    }

    async fn sign_out(&self, token: &str) -> Result<(), AuthError> {
        let response = self
            .request(reqwest::Method::POST, "/logout", token)
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        let status = response.status();
        // An already-invalid token is as signed out as it gets
        if status.is_success()
            || status == StatusCode::UNAUTHORIZED
            || status == StatusCode::FORBIDDEN
        {
            Ok(())
        } else {
            Err(AuthError::Provider {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            })
        }
    }
}

// ============================================================================
// Static provider
// ============================================================================

/// Fixed token table for local development and tests
#[derive(Default)]
pub struct StaticIdentityProvider {
    tokens: RwLock<HashMap<String, Identity>>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_token(self, token: impl Into<String>, identity: Identity) -> Self {
        self.tokens
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token.into(), identity);
        self
    }

    /// Parse `token=user[:email]` entries separated by commas
    pub fn from_token_list(list: &str) -> Self {
        list.split(',')
            .filter_map(|entry| {
                let (token, user) = entry.trim().split_once('=')?;
                let (user_id, email) = match user.split_once(':') {
                    Some((id, email)) => (id, Some(email.to_string())),
                    None => (user, None),
                };
                if token.is_empty() || user_id.is_empty() {
                    return None;
                }
                Some((
                    token.to_string(),
                    Identity {
                        user_id: user_id.to_string(),
                        email,
                        created_at: None,
                    },
                ))
            })
            .fold(Self::new(), |provider, (token, identity)| {
                provider.with_token(token, identity)
            })
    }

    pub fn token_count(&self) -> usize {
        self.tokens.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn current_user(&self, token: &str) -> Result<Option<Identity>, AuthError> {
        Ok(self
            .tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(token)
            .cloned())
    }

    async fn sign_out(&self, token: &str) -> Result<(), AuthError> {
        self.tokens
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(token);
        Ok(())
    }
}
