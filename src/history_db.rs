//! Listening history backed by SQLite.
//!
//! One row per observed play. `(track_id, played_at_utc)` identifies a play;
//! inserts check it in the same statement so re-submitting a batch is a no-op.
//! Rows are never deleted and only the two artwork columns are ever updated,
//! and then only from NULL to a value.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, Transaction};
use std::path::Path;

/// Source tag for rows ingested from the recently-played feed
pub const SOURCE_RECENTLY_PLAYED: &str = "recently_played";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS listening_history (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    track_id         TEXT NOT NULL,
    track_name       TEXT NOT NULL,
    artist_id        TEXT,
    artist_name      TEXT NOT NULL,
    primary_genre    TEXT,
    album_name       TEXT NOT NULL,
    album_image_url  TEXT,
    artist_image_url TEXT,
    played_at_utc    TEXT NOT NULL,
    duration_ms      INTEGER NOT NULL CHECK (duration_ms >= 0),
    source           TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_listening_history_play
    ON listening_history(track_id, played_at_utc);
";

/// One persisted play
#[derive(Debug, Clone, PartialEq)]
pub struct ListeningEvent {
    pub track_id: String,
    pub track_name: String,
    pub artist_id: String,
    pub artist_name: String,
    pub primary_genre: Option<String>,
    pub album_name: String,
    pub album_image_url: Option<String>,
    pub artist_image_url: Option<String>,
    /// UTC, stored without offset
    pub played_at_utc: NaiveDateTime,
    pub duration_ms: i64,
    pub source: String,
}

/// A track with at least one play missing artwork
#[derive(Debug, Clone, PartialEq)]
pub struct ArtworkCandidate {
    pub track_id: String,
    pub track_name: String,
    pub artist_id: Option<String>,
}

pub struct HistoryDb {
    conn: Connection,
}

impl HistoryDb {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database directory {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open history database {}", path.display()))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = NORMAL;",
        )?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("Failed to create listening_history schema")?;
        Ok(Self { conn })
    }

    /// Start a unit of work. Nothing written through the batch is durable
    /// until [`HistoryBatch::commit`]; dropping it rolls back.
    pub fn begin_batch(&mut self) -> Result<HistoryBatch<'_>> {
        let txn = self
            .conn
            .transaction()
            .context("Failed to begin transaction")?;
        Ok(HistoryBatch { txn })
    }

    /// Distinct tracks that still miss album or artist artwork
    pub fn tracks_missing_artwork(&self) -> Result<Vec<ArtworkCandidate>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT track_id, track_name, artist_id
             FROM listening_history
             WHERE track_id IS NOT NULL
               AND (album_image_url IS NULL OR artist_image_url IS NULL)
             ORDER BY track_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ArtworkCandidate {
                track_id: row.get(0)?,
                track_name: row.get(1)?,
                artist_id: row.get(2)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to query tracks missing artwork")
    }

    pub fn count_plays(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM listening_history", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    #[cfg(test)]
    pub(crate) fn count_plays_of(&self, track_id: &str) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM listening_history WHERE track_id = ?1",
            params![track_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Most recent plays, newest first
    pub fn get_recent(&self, limit: usize) -> Result<Vec<ListeningEvent>> {
        let mut stmt = self.conn.prepare(
            "SELECT track_id, track_name, artist_id, artist_name, primary_genre, album_name,
                    album_image_url, artist_image_url, played_at_utc, duration_ms, source
             FROM listening_history
             ORDER BY played_at_utc DESC, id DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], row_to_event)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read recent plays")
    }

    #[cfg(test)]
    pub(crate) fn get_play(
        &self,
        track_id: &str,
        played_at_utc: NaiveDateTime,
    ) -> Result<Option<ListeningEvent>> {
        use rusqlite::OptionalExtension;

        self.conn
            .query_row(
                "SELECT track_id, track_name, artist_id, artist_name, primary_genre, album_name,
                        album_image_url, artist_image_url, played_at_utc, duration_ms, source
                 FROM listening_history
                 WHERE track_id = ?1 AND played_at_utc = ?2",
                params![track_id, played_at_utc],
                row_to_event,
            )
            .optional()
            .context("Failed to read play")
    }

    #[cfg(test)]
    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<ListeningEvent> {
    Ok(ListeningEvent {
        track_id: row.get(0)?,
        track_name: row.get(1)?,
        artist_id: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        artist_name: row.get(3)?,
        primary_genre: row.get(4)?,
        album_name: row.get(5)?,
        album_image_url: row.get(6)?,
        artist_image_url: row.get(7)?,
        played_at_utc: row.get(8)?,
        duration_ms: row.get(9)?,
        source: row.get(10)?,
    })
}

/// Writes made within one sync cycle or backfill run
pub struct HistoryBatch<'a> {
    txn: Transaction<'a>,
}

impl HistoryBatch<'_> {
    /// Insert the play unless `(track_id, played_at_utc)` is already stored.
    /// Returns whether a row was written.
    pub fn insert_if_absent(&self, event: &ListeningEvent) -> Result<bool> {
        let mut stmt = self.txn.prepare_cached(
            "INSERT INTO listening_history (
                 track_id, track_name, artist_id, artist_name, primary_genre, album_name,
                 album_image_url, artist_image_url, played_at_utc, duration_ms, source
             )
             SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11
             WHERE NOT EXISTS (
                 SELECT 1 FROM listening_history
                 WHERE track_id = ?1 AND played_at_utc = ?9
             )",
        )?;
        let changed = stmt
            .execute(params![
                event.track_id,
                event.track_name,
                event.artist_id,
                event.artist_name,
                event.primary_genre,
                event.album_name,
                event.album_image_url,
                event.artist_image_url,
                event.played_at_utc,
                event.duration_ms,
                event.source,
            ])
            .with_context(|| format!("Failed to insert play of track {}", event.track_id))?;
        Ok(changed > 0)
    }

    /// Fill NULL artwork on every play of `track_id`; existing URLs are kept.
    /// Returns the number of rows touched.
    pub fn merge_artwork(
        &self,
        track_id: &str,
        album_image_url: Option<&str>,
        artist_image_url: Option<&str>,
    ) -> Result<usize> {
        let changed = self
            .txn
            .execute(
                "UPDATE listening_history
                 SET album_image_url = COALESCE(album_image_url, ?1),
                     artist_image_url = COALESCE(artist_image_url, ?2)
                 WHERE track_id = ?3
                   AND ((album_image_url IS NULL AND ?1 IS NOT NULL)
                     OR (artist_image_url IS NULL AND ?2 IS NOT NULL))",
                params![album_image_url, artist_image_url, track_id],
            )
            .with_context(|| format!("Failed to merge artwork for track {}", track_id))?;
        Ok(changed)
    }

    pub fn commit(self) -> Result<()> {
        self.txn.commit().context("Failed to commit history batch")
    }
}
