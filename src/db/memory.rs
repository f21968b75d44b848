//! Long-term memory repository
//!
//! Archived conversations are distilled into scored memory rows that seed the
//! system prompt of later turns.

use chrono::Utc;

use super::DbPool;
use crate::{Error, Result};

/// A long-term memory entry
#[derive(Debug, Clone)]
pub struct Memory {
    pub id: i64,
    pub content: String,
    pub summary: String,
    pub timestamp_ms: i64,
    /// 1..=15; higher means more likely to be recalled
    pub importance: u32,
    /// Comma-separated topic tags
    pub tags: String,
}

/// Memory repository
#[derive(Clone)]
pub struct MemoryRepo {
    pool: DbPool,
}

impl MemoryRepo {
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Persist a distilled memory
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn add(&self, content: &str, summary: &str, importance: u32, tags: &str) -> Result<i64> {
        let conn = self.pool.get().map_err(|e| Error::Storage(e.to_string()))?;
        conn.execute(
            "INSERT INTO memories (content, summary, timestamp_ms, importance, tags)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                content,
                summary,
                Utc::now().timestamp_millis(),
                importance,
                tags,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Most relevant memories for a query, scored by keyword hits then importance
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn retrieve_relevant(&self, query: &str, limit: usize) -> Result<Vec<Memory>> {
        let conn = self.pool.get().map_err(|e| Error::Storage(e.to_string()))?;

        let mut stmt = conn.prepare(
            "SELECT id, content, summary, timestamp_ms, importance, tags
             FROM memories ORDER BY importance DESC, timestamp_ms DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Memory {
                id: row.get(0)?,
                content: row.get(1)?,
                summary: row.get(2)?,
                timestamp_ms: row.get(3)?,
                importance: row.get(4)?,
                tags: row.get(5)?,
            })
        })?;

        let keywords: Vec<String> = query
            .split_whitespace()
            .filter(|w| w.chars().count() > 2)
            .map(str::to_lowercase)
            .collect();

        let mut scored: Vec<(usize, Memory)> = Vec::new();
        for row in rows {
            let memory = row?;
            let haystack = format!("{} {} {}", memory.summary, memory.content, memory.tags)
                .to_lowercase();
            let hits = keywords.iter().filter(|k| haystack.contains(k.as_str())).count();
            scored.push((hits, memory));
        }

        // Keyword hits dominate; repository order already breaks ties by importance
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(scored.into_iter().take(limit).map(|(_, m)| m).collect())
    }

    /// Number of stored memories
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn count(&self) -> Result<i64> {
        let conn = self.pool.get().map_err(|e| Error::Storage(e.to_string()))?;
        conn.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))
            .map_err(Error::from)
    }
}
