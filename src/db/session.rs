//! Session and message repository

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::DbPool;
use crate::{Error, Result};

/// Name given to the session created on first launch
pub const DEFAULT_SESSION_NAME: &str = "Default conversation";

/// A conversation session
#[derive(Debug, Clone)]
pub struct Session {
    pub id: i64,
    pub name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A message in a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Milliseconds since the Unix epoch; shared by both messages of a turn
    pub timestamp_ms: i64,
    pub uuid: String,
}

impl ChatMessage {
    /// Build a message stamped now with a fresh identity
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self::with_timestamp(role, content, Utc::now().timestamp_millis())
    }

    /// Build a message with an explicit turn timestamp
    #[must_use]
    pub fn with_timestamp(role: Role, content: impl Into<String>, timestamp_ms: i64) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp_ms,
            uuid: Uuid::new_v4().to_string(),
        }
    }
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// Session repository
#[derive(Clone)]
pub struct SessionRepo {
    pool: DbPool,
}

impl SessionRepo {
    /// Create a new session repository
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Return the active session, creating the default one on first launch
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn find_or_create_active(&self) -> Result<Session> {
        let conn = self.pool.get().map_err(|e| Error::Storage(e.to_string()))?;

        let existing: Option<Session> = conn
            .query_row(
                "SELECT id, name, is_active, created_at, updated_at
                 FROM sessions WHERE is_active = 1 ORDER BY updated_at DESC LIMIT 1",
                [],
                map_session,
            )
            .ok();

        if let Some(session) = existing {
            return Ok(session);
        }

        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO sessions (name, is_active, created_at, updated_at)
             VALUES (?1, 1, ?2, ?2)",
            rusqlite::params![DEFAULT_SESSION_NAME, now],
        )?;

        let id = conn.last_insert_rowid();
        conn.query_row(
            "SELECT id, name, is_active, created_at, updated_at FROM sessions WHERE id = ?1",
            [id],
            map_session,
        )
        .map_err(Error::from)
    }

    /// Insert a message into a session
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn add_message(&self, session_id: i64, message: &ChatMessage) -> Result<()> {
        let conn = self.pool.get().map_err(|e| Error::Storage(e.to_string()))?;

        conn.execute(
            "INSERT OR REPLACE INTO messages (uuid, session_id, role, content, timestamp_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                message.uuid,
                session_id,
                message.role.as_str(),
                message.content,
                message.timestamp_ms,
            ],
        )?;

        conn.execute(
            "UPDATE sessions SET updated_at = ?1 WHERE id = ?2",
            rusqlite::params![Utc::now().to_rfc3339(), session_id],
        )?;

        Ok(())
    }

    /// Load all messages of a session in timestamp order
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn messages(&self, session_id: i64) -> Result<Vec<ChatMessage>> {
        let conn = self.pool.get().map_err(|e| Error::Storage(e.to_string()))?;

        let mut stmt = conn.prepare(
            "SELECT uuid, role, content, timestamp_ms
             FROM messages WHERE session_id = ?1 ORDER BY timestamp_ms ASC, rowid ASC",
        )?;

        let rows = stmt.query_map([session_id], |row| {
            let role: String = row.get(1)?;
            Ok(ChatMessage {
                uuid: row.get(0)?,
                role: Role::from_str(&role).unwrap_or(Role::User),
                content: row.get(2)?,
                timestamp_ms: row.get(3)?,
            })
        })?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Delete all messages of a session
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn clear_messages(&self, session_id: i64) -> Result<()> {
        let conn = self.pool.get().map_err(|e| Error::Storage(e.to_string()))?;
        conn.execute("DELETE FROM messages WHERE session_id = ?1", [session_id])?;
        Ok(())
    }
}

fn map_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        name: row.get(1)?,
        is_active: row.get::<_, i64>(2)? != 0,
        created_at: parse_datetime(&row.get::<_, String>(3)?),
        updated_at: parse_datetime(&row.get::<_, String>(4)?),
    })
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory;

    #[test]
    fn find_or_create_active_is_stable() {
        let pool = init_memory().unwrap();
        let repo = SessionRepo::new(pool);

        let first = repo.find_or_create_active().unwrap();
        let second = repo.find_or_create_active().unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.name, DEFAULT_SESSION_NAME);
        assert!(first.is_active);
    }

    #[test]
    fn messages_round_trip_in_order() {
        let pool = init_memory().unwrap();
        let repo = SessionRepo::new(pool);
        let session = repo.find_or_create_active().unwrap();

        let user = ChatMessage::with_timestamp(Role::User, "hello", 1_000);
        let reply = ChatMessage::with_timestamp(Role::Assistant, "hi there", 1_000);
        repo.add_message(session.id, &user).unwrap();
        repo.add_message(session.id, &reply).unwrap();

        let loaded = repo.messages(session.id).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].role, Role::User);
        assert_eq!(loaded[1].role, Role::Assistant);
        assert_eq!(loaded[0].timestamp_ms, loaded[1].timestamp_ms);
    }

    #[test]
    fn clear_messages_empties_session() {
        let pool = init_memory().unwrap();
        let repo = SessionRepo::new(pool);
        let session = repo.find_or_create_active().unwrap();

        repo.add_message(session.id, &ChatMessage::new(Role::User, "x"))
            .unwrap();
        repo.clear_messages(session.id).unwrap();

        assert!(repo.messages(session.id).unwrap().is_empty());
    }
}
