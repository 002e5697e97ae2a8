//! Raw feed item → internal play record.
//!
//! Only the first listed artist is kept; featured artists are dropped.

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::service::PlayHistoryItem;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum NormalizeError {
    #[error("malformed played_at timestamp {0:?}")]
    MalformedTimestamp(String),
    #[error("track {0:?} has no catalog id")]
    MissingTrackId(String),
    #[error("track {0:?} lists no artist")]
    MissingArtist(String),
}

/// A play mapped onto the row shape, before artist enrichment.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedPlay {
    pub track_id: String,
    pub track_name: String,
    pub artist_id: String,
    pub artist_name: String,
    pub album_name: String,
    pub album_image_url: Option<String>,
    pub played_at_utc: NaiveDateTime,
    pub duration_ms: i64,
}

/// Parse `2025-12-03T09:12:34.567Z` (or any RFC 3339 offset) into a naive
/// UTC instant, matching how the store keeps timestamps.
pub fn parse_played_at(raw: &str) -> Result<NaiveDateTime, NormalizeError> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|dt| dt.with_timezone(&Utc).naive_utc())
        .map_err(|_| NormalizeError::MalformedTimestamp(raw.to_string()))
}

pub fn normalize(item: &PlayHistoryItem) -> Result<NormalizedPlay, NormalizeError> {
    let played_at_utc = parse_played_at(&item.played_at)?;
    let track = &item.track;

    let track_id = track
        .id
        .clone()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| NormalizeError::MissingTrackId(track.name.clone()))?;

    let artist = track
        .artists
        .first()
        .ok_or_else(|| NormalizeError::MissingArtist(track.name.clone()))?;
    let artist_id = artist
        .id
        .clone()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| NormalizeError::MissingArtist(track.name.clone()))?;

    let album_name = track
        .album
        .as_ref()
        .map(|album| album.name.clone())
        .unwrap_or_default();

    Ok(NormalizedPlay {
        track_id,
        track_name: track.name.clone(),
        artist_id,
        artist_name: artist.name.clone(),
        album_name,
        album_image_url: track.album_image_url(),
        played_at_utc,
        duration_ms: track.duration_ms.unwrap_or(0).min(i64::MAX as u64) as i64,
    })
}
