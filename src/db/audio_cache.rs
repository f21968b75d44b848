//! Synthesized speech cache keyed by turn timestamp
//!
//! One reply has one timestamp, so replaying a message never re-synthesizes it.

use super::DbPool;
use crate::{Error, Result};

/// Audio cache repository
#[derive(Clone)]
pub struct AudioCacheRepo {
    pool: DbPool,
}

impl AudioCacheRepo {
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Look up cached audio for a turn timestamp
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn get(&self, timestamp_ms: i64) -> Result<Option<Vec<u8>>> {
        let conn = self.pool.get().map_err(|e| Error::Storage(e.to_string()))?;

        let audio = conn
            .query_row(
                "SELECT audio FROM audio_cache WHERE timestamp_ms = ?1",
                [timestamp_ms],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(Error::from(other)),
            })?;

        Ok(audio)
    }

    /// Store audio for a turn timestamp; last write wins
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn put(&self, timestamp_ms: i64, audio: &[u8]) -> Result<()> {
        let conn = self.pool.get().map_err(|e| Error::Storage(e.to_string()))?;
        conn.execute(
            "INSERT OR REPLACE INTO audio_cache (timestamp_ms, audio) VALUES (?1, ?2)",
            rusqlite::params![timestamp_ms, audio],
        )?;
        Ok(())
    }
}
