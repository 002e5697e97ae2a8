//! One incremental sync pass over the recently-played feed.

use anyhow::{Context, Result};

use crate::enrichment::ArtistCache;
use crate::history_db::{HistoryDb, ListeningEvent, SOURCE_RECENTLY_PLAYED};
use crate::normalize::{normalize, parse_played_at, NormalizedPlay};
use crate::service::{FeedEntry, PlayFeed};

/// Page size requested from the feed; the API maximum
pub const RECENTLY_PLAYED_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Items returned by the feed
    pub fetched: usize,
    /// Items handed to the writer, duplicates included
    pub attempted: usize,
    /// Rows actually written
    pub inserted: usize,
    /// Items dropped as undecodable or during normalization
    pub skipped: usize,
}

/// Fetch, normalize, enrich and store one page of recent plays.
///
/// Bad items are logged and skipped. Store errors abort the cycle and the
/// uncommitted batch rolls back, so a cycle is all-or-nothing at commit.
pub async fn run_cycle<F>(feed: &mut F, db: &mut HistoryDb) -> Result<CycleReport>
where
    F: PlayFeed + ?Sized,
{
    tracing::debug!("Fetching recently played");
    let mut items = feed
        .recently_played(RECENTLY_PLAYED_LIMIT)
        .await
        .context("Failed to fetch recently played")?;

    let mut report = CycleReport {
        fetched: items.len(),
        ..CycleReport::default()
    };

    if items.is_empty() {
        tracing::info!("No items returned from the feed");
        return Ok(report);
    }

    // Oldest first. Undecodable entries and unparseable timestamps sort to
    // the front and get skipped below.
    items.sort_by_cached_key(|entry| entry.played_at().and_then(|at| parse_played_at(at).ok()));

    let mut artists = ArtistCache::new();
    let batch = db.begin_batch()?;

    for entry in &items {
        let item = match entry {
            FeedEntry::Play(item) => item,
            FeedEntry::Malformed(e) => {
                tracing::warn!("Skipping undecodable feed item: {}", e);
                report.skipped += 1;
                continue;
            }
        };

        let play = match normalize(item) {
            Ok(play) => play,
            Err(e) => {
                tracing::warn!(played_at = %item.played_at, "Skipping play: {}", e);
                report.skipped += 1;
                continue;
            }
        };

        let artist = artists.lookup_or_fetch(feed, &play.artist_id).await;
        let event = listening_event(play, artist.primary_genre, artist.image_url);

        let inserted = batch.insert_if_absent(&event)?;
        report.attempted += 1;
        if inserted {
            report.inserted += 1;
        }

        tracing::debug!(
            track = %event.track_name,
            artist = %event.artist_name,
            genre = event.primary_genre.as_deref().unwrap_or("-"),
            played_at = %event.played_at_utc,
            inserted,
            "Seen play"
        );
    }

    batch.commit()?;

    tracing::info!(
        fetched = report.fetched,
        processed = report.attempted,
        inserted = report.inserted,
        skipped = report.skipped,
        artist_lookups = artists.lookups(),
        "Sync complete"
    );
    Ok(report)
}

fn listening_event(
    play: NormalizedPlay,
    primary_genre: Option<String>,
    artist_image_url: Option<String>,
) -> ListeningEvent {
    ListeningEvent {
        track_id: play.track_id,
        track_name: play.track_name,
        artist_id: play.artist_id,
        artist_name: play.artist_name,
        primary_genre,
        album_name: play.album_name,
        album_image_url: play.album_image_url,
        artist_image_url,
        played_at_utc: play.played_at_utc,
        duration_ms: play.duration_ms,
        source: SOURCE_RECENTLY_PLAYED.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::fake::{play, FakeFeed};

    fn two_plays_of_t1() -> FakeFeed {
        let mut feed = FakeFeed::with_plays(vec![
            play("T1", "A1", "2025-01-01T00:05:00Z"),
            play("T1", "A1", "2025-01-01T00:00:00Z"),
        ]);
        feed.add_artist("A1", &["post-rock", "ambient"], Some("http://artist/a1"));
        feed
    }

    #[tokio::test]
    async fn test_rerun_inserts_nothing_new() {
        let mut feed = two_plays_of_t1();
        let mut db = HistoryDb::open_in_memory().unwrap();

        let first = run_cycle(&mut feed, &mut db).await.unwrap();
        assert_eq!(first.attempted, 2);
        assert_eq!(first.inserted, 2);
        assert_eq!(db.count_plays_of("T1").unwrap(), 2);

        let second = run_cycle(&mut feed, &mut db).await.unwrap();
        assert_eq!(second.attempted, 2);
        assert_eq!(second.inserted, 0);
        assert_eq!(db.count_plays_of("T1").unwrap(), 2);
    }

    #[tokio::test]
    async fn test_rows_are_enriched() {
        let mut feed = two_plays_of_t1();
        let mut db = HistoryDb::open_in_memory().unwrap();

        run_cycle(&mut feed, &mut db).await.unwrap();

        let played_at = parse_played_at("2025-01-01T00:00:00Z").unwrap();
        let row = db.get_play("T1", played_at).unwrap().unwrap();
        assert_eq!(row.primary_genre.as_deref(), Some("post-rock"));
        assert_eq!(row.artist_image_url.as_deref(), Some("http://artist/a1"));
        assert_eq!(row.album_image_url.as_deref(), Some("http://album/large"));
        assert_eq!(row.source, "recently_played");
        assert_eq!(row.duration_ms, 180_000);
    }

    #[tokio::test]
    async fn test_inserts_in_chronological_order() {
        let mut feed = FakeFeed::with_plays(vec![
            play("T3", "A1", "2025-01-01T00:10:00Z"),
            play("T1", "A1", "2025-01-01T00:00:00Z"),
            play("T2", "A1", "2025-01-01T00:05:00Z"),
        ]);
        let mut db = HistoryDb::open_in_memory().unwrap();

        run_cycle(&mut feed, &mut db).await.unwrap();

        let mut stmt = db
            .conn()
            .prepare("SELECT track_id FROM listening_history ORDER BY id")
            .unwrap();
        let order: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert_eq!(order, vec!["T1", "T2", "T3"]);
    }

    #[tokio::test]
    async fn test_one_artist_lookup_per_artist_per_cycle() {
        let mut feed = FakeFeed::with_plays(vec![
            play("T1", "A1", "2025-01-01T00:00:00Z"),
            play("T2", "A1", "2025-01-01T00:04:00Z"),
            play("T3", "A2", "2025-01-01T00:08:00Z"),
            play("T4", "A1", "2025-01-01T00:12:00Z"),
            play("T5", "A2", "2025-01-01T00:16:00Z"),
        ]);
        feed.failing_artists.insert("A2".to_string());
        let mut db = HistoryDb::open_in_memory().unwrap();

        let report = run_cycle(&mut feed, &mut db).await.unwrap();
        assert_eq!(report.inserted, 5);
        assert_eq!(feed.artist_calls.len(), 2);

        // The cache does not outlive the cycle.
        run_cycle(&mut feed, &mut db).await.unwrap();
        assert_eq!(feed.artist_calls.len(), 4);
    }

    #[tokio::test]
    async fn test_malformed_item_is_skipped_and_rest_processed() {
        let mut feed = FakeFeed::with_plays(vec![
            play("T1", "A1", "2025-01-01T00:00:00Z"),
            play("T2", "A1", "2025-01-01T00:01:00Z"),
            play("T3", "A1", "2025-01-01 whenever"),
            play("T4", "A1", "2025-01-01T00:03:00Z"),
            play("T5", "A1", "2025-01-01T00:04:00Z"),
        ]);
        let mut db = HistoryDb::open_in_memory().unwrap();

        let report = run_cycle(&mut feed, &mut db).await.unwrap();

        assert_eq!(report.fetched, 5);
        assert_eq!(report.attempted, 4);
        assert_eq!(report.inserted, 4);
        assert_eq!(report.skipped, 1);
        assert_eq!(db.count_plays_of("T3").unwrap(), 0);
        for id in ["T1", "T2", "T4", "T5"] {
            assert_eq!(db.count_plays_of(id).unwrap(), 1);
        }
    }

    #[tokio::test]
    async fn test_undecodable_items_are_skipped_and_rest_inserted() {
        let mut feed = FakeFeed::from_page(
            r#"{"items": [
                {"track": {"id": "T2", "name": "Two", "artists": [{"id": "A1", "name": "X"}]},
                 "played_at": "2025-01-01T00:02:00Z"},
                {"track": null, "played_at": "2025-01-01T00:01:00Z"},
                {"track": {"id": "T9", "artists": []}, "played_at": "2025-01-01T00:03:00Z"},
                {"track": {"id": "T1", "name": "One", "artists": [{"id": "A1", "name": "X"}]},
                 "played_at": "2025-01-01T00:00:00Z"}
            ]}"#,
        );
        let mut db = HistoryDb::open_in_memory().unwrap();

        let report = run_cycle(&mut feed, &mut db).await.unwrap();

        assert_eq!(report.fetched, 4);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.inserted, 2);
        assert_eq!(db.count_plays_of("T1").unwrap(), 1);
        assert_eq!(db.count_plays_of("T2").unwrap(), 1);
        assert_eq!(db.count_plays_of("T9").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_artist_failure_leaves_fields_null() {
        let mut feed = FakeFeed::with_plays(vec![play("T1", "A1", "2025-01-01T00:00:00Z")]);
        feed.failing_artists.insert("A1".to_string());
        let mut db = HistoryDb::open_in_memory().unwrap();

        let report = run_cycle(&mut feed, &mut db).await.unwrap();
        assert_eq!(report.inserted, 1);

        let row = &db.get_recent(1).unwrap()[0];
        assert!(row.primary_genre.is_none());
        assert!(row.artist_image_url.is_none());
    }

    #[tokio::test]
    async fn test_empty_feed_is_a_noop() {
        let mut feed = FakeFeed::default();
        let mut db = HistoryDb::open_in_memory().unwrap();

        let report = run_cycle(&mut feed, &mut db).await.unwrap();
        assert_eq!(report, CycleReport::default());
        assert_eq!(db.count_plays().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_feed_error_propagates() {
        let mut feed = FakeFeed::default();
        feed.fail_feed = true;
        let mut db = HistoryDb::open_in_memory().unwrap();

        assert!(run_cycle(&mut feed, &mut db).await.is_err());
    }

    #[tokio::test]
    async fn test_out_of_order_batches_never_duplicate() {
        let mut db = HistoryDb::open_in_memory().unwrap();

        let mut newer = FakeFeed::with_plays(vec![
            play("T1", "A1", "2025-01-01T00:10:00Z"),
            play("T2", "A1", "2025-01-01T00:20:00Z"),
        ]);
        run_cycle(&mut newer, &mut db).await.unwrap();

        let mut overlapping = FakeFeed::with_plays(vec![
            play("T2", "A1", "2025-01-01T00:20:00Z"),
            play("T0", "A1", "2025-01-01T00:00:00Z"),
            play("T1", "A1", "2025-01-01T00:10:00Z"),
        ]);
        let report = run_cycle(&mut overlapping, &mut db).await.unwrap();

        assert_eq!(report.inserted, 1);
        assert_eq!(db.count_plays().unwrap(), 3);
    }
}
