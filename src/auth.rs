//! Session identity resolution and channel-join policy.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use utoipa::ToSchema;

use crate::broadcast::Topic;

/// Role attached to an authenticated user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Dispatcher,
    Driver,
    Parent,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Role::Admin),
            "dispatcher" => Some(Role::Dispatcher),
            "driver" => Some(Role::Driver),
            "parent" => Some(Role::Parent),
            _ => None,
        }
    }
}

/// Resolved identity of a session
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Identity {
    pub user_id: i64,
    pub role: Role,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid or expired token")]
    InvalidToken,
    #[error("store unavailable: {0}")]
    Dependency(#[from] sqlx::Error),
}

#[derive(Debug, sqlx::FromRow)]
struct TokenRow {
    user_id: i64,
    role: String,
}

/// Resolve a bearer token to a user identity.
pub async fn resolve_token(pool: &SqlitePool, token: &str) -> Result<Identity, AuthError> {
    let row: Option<TokenRow> =
        sqlx::query_as("SELECT user_id, role FROM api_tokens WHERE token = ?")
            .bind(token)
            .fetch_optional(pool)
            .await?;
    let row = row.ok_or(AuthError::InvalidToken)?;
    let role = Role::parse(&row.role).ok_or(AuthError::InvalidToken)?;
    Ok(Identity {
        user_id: row.user_id,
        role,
    })
}

/// Whether a session may join a broadcast topic.
///
/// Vehicle channels are open to every session, including anonymous ones
/// when the deployment allows them. User channels belong to the named user;
/// admins and dispatchers may join any of them.
pub fn can_join(identity: Option<&Identity>, topic: &Topic, allow_anonymous: bool) -> bool {
    match topic {
        Topic::Vehicle(_) => identity.is_some() || allow_anonymous,
        Topic::User(user_id) => match identity {
            Some(id) => {
                id.user_id == *user_id || matches!(id.role, Role::Admin | Role::Dispatcher)
            }
            None => false,
        },
    }
}
