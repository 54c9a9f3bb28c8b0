use anyhow::Result;
use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use colloquy_types::error::PersistenceError;
use colloquy_types::models::{Conversation, Role, Turn};

use crate::models::{RawConversation, RawRefreshToken, RawTurn, RawUser, RefreshTokenRow, UserRow};
use crate::{Database, format_timestamp, parse_timestamp};

impl Database {
    // -- Users --

    /// Insert a user. Returns `None` when the email is already registered.
    pub fn create_user(
        &self,
        id: Uuid,
        email: &str,
        password_hash: &str,
    ) -> Result<Option<UserRow>, PersistenceError> {
        let created_at = now();
        self.with_tx(|tx| {
            if query_user_by_email(tx, email)?.is_some() {
                return Ok(None);
            }

            tx.execute(
                "INSERT INTO users (id, email, password_hash, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![id.to_string(), email, password_hash, format_timestamp(created_at)],
            )?;

            Ok(Some(UserRow {
                id,
                email: email.to_string(),
                password_hash: password_hash.to_string(),
                created_at,
            }))
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>, PersistenceError> {
        self.with_tx(|tx| query_user_by_email(tx, email))
    }

    pub fn get_user_by_id(&self, id: Uuid) -> Result<Option<UserRow>, PersistenceError> {
        self.with_tx(|tx| {
            let raw = tx
                .query_row(
                    "SELECT id, email, password_hash, created_at FROM users WHERE id = ?1",
                    [id.to_string()],
                    map_user,
                )
                .optional()?;
            raw.map(RawUser::into_row).transpose()
        })
    }

    // -- Refresh tokens --

    pub fn insert_refresh_token(
        &self,
        token_hash: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        let created_at = now();
        self.with_tx(|tx| {
            tx.execute(
                "INSERT INTO refresh_tokens (token_hash, user_id, expires_at, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    token_hash,
                    user_id.to_string(),
                    format_timestamp(expires_at),
                    format_timestamp(created_at)
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_refresh_token(&self, token_hash: &str) -> Result<Option<RefreshTokenRow>, PersistenceError> {
        self.with_tx(|tx| {
            let raw = tx
                .query_row(
                    "SELECT token_hash, user_id, expires_at, created_at
                     FROM refresh_tokens WHERE token_hash = ?1",
                    [token_hash],
                    |row| {
                        Ok(RawRefreshToken {
                            token_hash: row.get(0)?,
                            user_id: row.get(1)?,
                            expires_at: row.get(2)?,
                            created_at: row.get(3)?,
                        })
                    },
                )
                .optional()?;
            raw.map(RawRefreshToken::into_row).transpose()
        })
    }

    /// Returns whether a row was removed.
    pub fn delete_refresh_token(&self, token_hash: &str) -> Result<bool, PersistenceError> {
        self.with_tx(|tx| {
            let removed = tx.execute("DELETE FROM refresh_tokens WHERE token_hash = ?1", [token_hash])?;
            Ok(removed > 0)
        })
    }

    pub fn purge_expired_refresh_tokens(&self, now: DateTime<Utc>) -> Result<usize, PersistenceError> {
        self.with_tx(|tx| {
            let removed = tx.execute(
                "DELETE FROM refresh_tokens WHERE expires_at <= ?1",
                [format_timestamp(now)],
            )?;
            Ok(removed)
        })
    }

    // -- Conversations --

    /// Create a conversation and its first user turn in one transaction.
    pub fn create_conversation(
        &self,
        owner_id: Uuid,
        first_message: &str,
        window_capacity: usize,
    ) -> Result<(Conversation, Turn), PersistenceError> {
        let (conversation, turn, ()) =
            self.create_conversation_claimed(owner_id, first_message, window_capacity, |_| Some(()))?;
        Ok((conversation, turn))
    }

    /// Like `create_conversation`, but `claim` runs with the new id before
    /// the commit, while no other connection can see the row yet. Returning
    /// `None` from `claim` rolls the whole creation back.
    pub fn create_conversation_claimed<C, G>(
        &self,
        owner_id: Uuid,
        first_message: &str,
        window_capacity: usize,
        claim: C,
    ) -> Result<(Conversation, Turn, G), PersistenceError>
    where
        C: FnOnce(i64) -> Option<G>,
    {
        let created_at = now();
        self.with_tx(|tx| {
            tx.execute(
                "INSERT INTO conversations (owner_id, created_at) VALUES (?1, ?2)",
                params![owner_id.to_string(), format_timestamp(created_at)],
            )?;
            let conversation = Conversation {
                id: tx.last_insert_rowid(),
                owner_id,
                created_at,
            };

            let turn = insert_turn(tx, conversation.id, Role::User, first_message, window_capacity)?;
            let claimed = claim(conversation.id)
                .ok_or_else(|| anyhow::anyhow!("conversation {} could not be claimed", conversation.id))?;
            Ok((conversation, turn, claimed))
        })
    }

    pub fn get_conversation(&self, id: i64) -> Result<Option<Conversation>, PersistenceError> {
        self.with_tx(|tx| {
            let raw = tx
                .query_row(
                    "SELECT id, owner_id, created_at FROM conversations WHERE id = ?1",
                    [id],
                    |row| {
                        Ok(RawConversation {
                            id: row.get(0)?,
                            owner_id: row.get(1)?,
                            created_at: row.get(2)?,
                        })
                    },
                )
                .optional()?;
            raw.map(RawConversation::into_conversation).transpose()
        })
    }

    // -- Turns --

    /// Append a turn to the transcript and slide the conversation's history
    /// window so it keeps at most `window_capacity` entries.
    pub fn append_turn(
        &self,
        conversation_id: i64,
        role: Role,
        content: &str,
        window_capacity: usize,
    ) -> Result<Turn, PersistenceError> {
        self.with_tx(|tx| insert_turn(tx, conversation_id, role, content, window_capacity))
    }

    /// Full transcript, oldest first.
    pub fn list_turns(&self, conversation_id: i64) -> Result<Vec<Turn>, PersistenceError> {
        self.with_tx(|tx| {
            let mut stmt = tx.prepare(
                "SELECT id, conversation_id, role, content, created_at
                 FROM turns
                 WHERE conversation_id = ?1
                 ORDER BY created_at, id",
            )?;
            collect_turns(stmt.query_map([conversation_id], map_turn)?)
        })
    }

    /// The persisted history window, oldest first.
    pub fn window_turns(&self, conversation_id: i64) -> Result<Vec<Turn>, PersistenceError> {
        self.with_tx(|tx| {
            let mut stmt = tx.prepare(
                "SELECT t.id, t.conversation_id, t.role, t.content, t.created_at
                 FROM history_window w
                 JOIN turns t ON t.id = w.turn_id
                 WHERE w.conversation_id = ?1
                 ORDER BY t.created_at, t.id",
            )?;
            collect_turns(stmt.query_map([conversation_id], map_turn)?)
        })
    }
}

/// Timestamps are stored at microsecond precision; truncate up front so the
/// values handed back match what a later read returns.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn insert_turn(
    conn: &Connection,
    conversation_id: i64,
    role: Role,
    content: &str,
    window_capacity: usize,
) -> Result<Turn> {
    // Never stamp a turn earlier than its predecessor, even if the wall clock
    // stepped backwards. Ties are broken by id.
    let last: Option<String> = conn.query_row(
        "SELECT MAX(created_at) FROM turns WHERE conversation_id = ?1",
        [conversation_id],
        |row| row.get(0),
    )?;
    let created_at = match last {
        Some(raw) => now().max(parse_timestamp(&raw)?),
        None => now(),
    };

    conn.execute(
        "INSERT INTO turns (conversation_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![conversation_id, role.as_str(), content, format_timestamp(created_at)],
    )?;
    let id = conn.last_insert_rowid();

    conn.execute(
        "INSERT INTO history_window (conversation_id, turn_id) VALUES (?1, ?2)",
        params![conversation_id, id],
    )?;
    conn.execute(
        "DELETE FROM history_window
         WHERE conversation_id = ?1
           AND turn_id NOT IN (
               SELECT turn_id FROM history_window
               WHERE conversation_id = ?1
               ORDER BY turn_id DESC
               LIMIT ?2
           )",
        params![conversation_id, window_capacity as i64],
    )?;

    Ok(Turn {
        id,
        conversation_id,
        role,
        content: content.to_string(),
        created_at,
    })
}

fn query_user_by_email(conn: &Connection, email: &str) -> Result<Option<UserRow>> {
    let raw = conn
        .query_row(
            "SELECT id, email, password_hash, created_at FROM users WHERE email = ?1",
            [email],
            map_user,
        )
        .optional()?;
    raw.map(RawUser::into_row).transpose()
}

fn map_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawUser> {
    Ok(RawUser {
        id: row.get(0)?,
        email: row.get(1)?,
        password_hash: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn map_turn(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawTurn> {
    Ok(RawTurn {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        role: row.get(2)?,
        content: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn collect_turns<I>(rows: I) -> Result<Vec<Turn>>
where
    I: Iterator<Item = rusqlite::Result<RawTurn>>,
{
    rows.map(|raw| raw?.into_turn()).collect()
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    const WINDOW: usize = 8;

    fn db_with_user() -> (Database, Uuid) {
        let db = Database::open_in_memory().unwrap();
        let user_id = Uuid::new_v4();
        db.create_user(user_id, "a@x.com", "digest").unwrap().unwrap();
        (db, user_id)
    }

    #[test]
    fn duplicate_email_is_reported_as_none() {
        let (db, _) = db_with_user();
        let second = db.create_user(Uuid::new_v4(), "a@x.com", "other").unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn user_lookup_by_id_and_email_agree() {
        let (db, user_id) = db_with_user();
        let by_email = db.get_user_by_email("a@x.com").unwrap().unwrap();
        let by_id = db.get_user_by_id(user_id).unwrap().unwrap();
        assert_eq!(by_email.id, by_id.id);
        assert_eq!(by_id.password_hash, "digest");
        assert!(db.get_user_by_email("b@x.com").unwrap().is_none());
    }

    #[test]
    fn transcript_is_ordered_and_window_is_a_capped_suffix() {
        let (db, user_id) = db_with_user();
        let (conversation, _) = db.create_conversation(user_id, "turn 0", WINDOW).unwrap();

        for i in 1..20 {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            db.append_turn(conversation.id, role, &format!("turn {i}"), WINDOW)
                .unwrap();
        }

        let transcript = db.list_turns(conversation.id).unwrap();
        assert_eq!(transcript.len(), 20);
        for (i, turn) in transcript.iter().enumerate() {
            assert_eq!(turn.content, format!("turn {i}"));
        }
        for pair in transcript.windows(2) {
            assert!((pair[0].created_at, pair[0].id) < (pair[1].created_at, pair[1].id));
        }

        let window = db.window_turns(conversation.id).unwrap();
        assert_eq!(window.len(), WINDOW);
        assert_eq!(window.as_slice(), &transcript[transcript.len() - WINDOW..]);
    }

    #[test]
    fn windows_are_kept_per_conversation() {
        let (db, user_id) = db_with_user();
        let (first, _) = db.create_conversation(user_id, "first", WINDOW).unwrap();
        let (second, _) = db.create_conversation(user_id, "second", WINDOW).unwrap();
        for i in 0..10 {
            db.append_turn(first.id, Role::Assistant, &format!("a{i}"), WINDOW)
                .unwrap();
        }

        let window = db.window_turns(second.id).unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].content, "second");
    }

    #[test]
    fn failed_create_leaves_no_partial_rows() {
        let db = Database::open_in_memory().unwrap();
        // Unknown owner violates the foreign key.
        let result = db.create_conversation(Uuid::new_v4(), "hi", WINDOW);
        assert!(matches!(result, Err(PersistenceError::CommitFailure(_))));
        assert!(db.get_conversation(1).unwrap().is_none());
        assert!(db.list_turns(1).unwrap().is_empty());
    }

    #[test]
    fn refused_claim_rolls_creation_back() {
        let (db, user_id) = db_with_user();
        let mut seen = None;
        let result = db.create_conversation_claimed(user_id, "hi", WINDOW, |id| {
            seen = Some(id);
            None::<()>
        });

        assert!(matches!(result, Err(PersistenceError::CommitFailure(_))));
        let id = seen.unwrap();
        assert!(db.get_conversation(id).unwrap().is_none());
        assert!(db.list_turns(id).unwrap().is_empty());

        let (conversation, turn, claimed) = db
            .create_conversation_claimed(user_id, "hi", WINDOW, |id| Some(id * 10))
            .unwrap();
        assert_eq!(claimed, conversation.id * 10);
        assert_eq!(turn.conversation_id, conversation.id);
    }

    #[test]
    fn append_to_missing_conversation_fails() {
        let (db, _) = db_with_user();
        let result = db.append_turn(42, Role::User, "hello", WINDOW);
        assert!(result.is_err());
        assert!(db.list_turns(42).unwrap().is_empty());
    }

    #[test]
    fn refresh_tokens_round_trip_and_purge() {
        let (db, user_id) = db_with_user();
        let now = Utc::now();
        db.insert_refresh_token("live", user_id, now + Duration::days(7))
            .unwrap();
        db.insert_refresh_token("stale", user_id, now - Duration::minutes(1))
            .unwrap();

        let live = db.get_refresh_token("live").unwrap().unwrap();
        assert_eq!(live.user_id, user_id);
        assert!(!live.is_expired_at(now));

        assert_eq!(db.purge_expired_refresh_tokens(now).unwrap(), 1);
        assert!(db.get_refresh_token("stale").unwrap().is_none());

        assert!(db.delete_refresh_token("live").unwrap());
        assert!(!db.delete_refresh_token("live").unwrap());
    }

    #[test]
    fn window_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("colloquy.db");

        let conversation_id = {
            let db = Database::open(&path).unwrap();
            let user_id = Uuid::new_v4();
            db.create_user(user_id, "a@x.com", "digest").unwrap();
            let (conversation, _) = db.create_conversation(user_id, "hi", WINDOW).unwrap();
            db.append_turn(conversation.id, Role::Assistant, "hello", WINDOW)
                .unwrap();
            conversation.id
        };

        let db = Database::open(&path).unwrap();
        let window = db.window_turns(conversation_id).unwrap();
        let contents: Vec<&str> = window.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, ["hi", "hello"]);
    }
}
