//! One-shot artwork backfill for plays stored without album or artist images.
//!
//! Each candidate track gets an independent track lookup (album image) and,
//! when an artist id is known, an artist lookup (artist image). Whatever was
//! found is merged into every play of that track, filling NULLs only. All
//! patches are committed together at the end; re-running is always safe.

use anyhow::Result;

use crate::history_db::HistoryDb;
use crate::service::PlayFeed;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillReport {
    /// Distinct tracks with missing artwork
    pub candidates: usize,
    /// Tracks for which at least one image was found and merged
    pub updated_tracks: usize,
    /// Rows whose artwork changed
    pub rows_patched: usize,
    /// Tracks where neither lookup produced an image
    pub skipped: usize,
}

pub async fn run_backfill<F>(feed: &mut F, db: &mut HistoryDb) -> Result<BackfillReport>
where
    F: PlayFeed + ?Sized,
{
    let candidates = db.tracks_missing_artwork()?;
    let mut report = BackfillReport {
        candidates: candidates.len(),
        ..BackfillReport::default()
    };
    tracing::info!(tracks = candidates.len(), "Found tracks to backfill");

    if candidates.is_empty() {
        tracing::info!("Nothing to backfill");
        return Ok(report);
    }

    let batch = db.begin_batch()?;

    for candidate in &candidates {
        tracing::debug!(track_id = %candidate.track_id, track = %candidate.track_name, "Processing");

        let album_image_url = match feed.track(&candidate.track_id).await {
            Ok(track) => track.album_image_url(),
            Err(e) => {
                tracing::warn!(track_id = %candidate.track_id, "Failed to fetch track: {:#}", e);
                None
            }
        };

        let artist_id = candidate.artist_id.as_deref().filter(|id| !id.is_empty());
        let artist_image_url = match artist_id {
            Some(artist_id) => match feed.artist(artist_id).await {
                Ok(artist) => artist.image_url(),
                Err(e) => {
                    tracing::warn!(artist_id, "Failed to fetch artist: {:#}", e);
                    None
                }
            },
            None => None,
        };

        if album_image_url.is_none() && artist_image_url.is_none() {
            tracing::debug!(track_id = %candidate.track_id, "No images found, skipping update");
            report.skipped += 1;
            continue;
        }

        let patched = batch.merge_artwork(
            &candidate.track_id,
            album_image_url.as_deref(),
            artist_image_url.as_deref(),
        )?;
        report.updated_tracks += 1;
        report.rows_patched += patched;
        tracing::debug!(track = %candidate.track_name, rows = patched, "Updated rows for track");
    }

    batch.commit()?;

    tracing::info!(
        candidates = report.candidates,
        updated_tracks = report.updated_tracks,
        rows_patched = report.rows_patched,
        skipped = report.skipped,
        "Backfill complete"
    );
    Ok(report)
}
