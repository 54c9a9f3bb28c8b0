//! Database row types. These map directly to SQLite rows and are converted
//! into `colloquy-types` models at the query boundary.

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use colloquy_types::models::{Conversation, Turn, User};

use crate::parse_timestamp;

/// A user together with the stored password digest.
#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

impl UserRow {
    pub fn to_user(&self) -> User {
        User {
            id: self.id,
            email: self.email.clone(),
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RefreshTokenRow {
    pub token_hash: String,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl RefreshTokenRow {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

pub(crate) struct RawUser {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    pub created_at: String,
}

impl RawUser {
    pub fn into_row(self) -> Result<UserRow> {
        Ok(UserRow {
            id: self
                .id
                .parse()
                .map_err(|e| anyhow!("corrupt user id '{}': {}", self.id, e))?,
            email: self.email,
            password_hash: self.password_hash,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

pub(crate) struct RawRefreshToken {
    pub token_hash: String,
    pub user_id: String,
    pub expires_at: String,
    pub created_at: String,
}

impl RawRefreshToken {
    pub fn into_row(self) -> Result<RefreshTokenRow> {
        Ok(RefreshTokenRow {
            user_id: self
                .user_id
                .parse()
                .map_err(|e| anyhow!("corrupt user id on refresh token: {}", e))?,
            token_hash: self.token_hash,
            expires_at: parse_timestamp(&self.expires_at)?,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

pub(crate) struct RawConversation {
    pub id: i64,
    pub owner_id: String,
    pub created_at: String,
}

impl RawConversation {
    pub fn into_conversation(self) -> Result<Conversation> {
        Ok(Conversation {
            id: self.id,
            owner_id: self
                .owner_id
                .parse()
                .map_err(|e| anyhow!("corrupt owner id on conversation {}: {}", self.id, e))?,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

pub(crate) struct RawTurn {
    pub id: i64,
    pub conversation_id: i64,
    pub role: String,
    pub content: String,
    pub created_at: String,
}

impl RawTurn {
    pub fn into_turn(self) -> Result<Turn> {
        Ok(Turn {
            id: self.id,
            conversation_id: self.conversation_id,
            role: self.role.parse().map_err(|e: String| anyhow!(e))?,
            content: self.content,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}
