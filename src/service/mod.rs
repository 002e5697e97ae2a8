pub mod spotify;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer};

/// An image published for an album or an artist.
///
/// Spotify returns image lists ordered largest first.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Image {
    pub url: String,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub width: Option<u32>,
}

/// Artist reference as embedded in a track object (no genres or images)
#[derive(Debug, Clone, Deserialize)]
pub struct ArtistRef {
    pub id: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlbumRef {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub images: Vec<Image>,
}

/// Track object as returned by the recently-played and track endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct TrackObject {
    /// `None` for local files, which have no catalog id
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub album: Option<AlbumRef>,
    #[serde(default)]
    pub artists: Vec<ArtistRef>,
}

/// One entry of the recently-played feed
#[derive(Debug, Clone, Deserialize)]
pub struct PlayHistoryItem {
    pub track: TrackObject,
    /// ISO-8601 timestamp with a `Z` suffix, e.g. `2025-12-03T09:12:34.567Z`
    pub played_at: String,
}

/// One feed entry, decoded on its own so a bad item cannot sink the page
#[derive(Debug, Clone)]
pub enum FeedEntry {
    Play(PlayHistoryItem),
    /// Item that did not match the play shape, with the decode error
    Malformed(String),
}

impl FeedEntry {
    pub fn played_at(&self) -> Option<&str> {
        match self {
            FeedEntry::Play(item) => Some(&item.played_at),
            FeedEntry::Malformed(_) => None,
        }
    }
}

impl From<PlayHistoryItem> for FeedEntry {
    fn from(item: PlayHistoryItem) -> Self {
        FeedEntry::Play(item)
    }
}

impl<'de> Deserialize<'de> for FeedEntry {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(match PlayHistoryItem::deserialize(&value) {
            Ok(item) => FeedEntry::Play(item),
            Err(e) => FeedEntry::Malformed(e.to_string()),
        })
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct RecentlyPlayedResponse {
    #[serde(default)]
    pub items: Vec<FeedEntry>,
}

/// Full artist object (the part of it we read)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArtistDetails {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub images: Vec<Image>,
}

impl ArtistDetails {
    pub fn primary_genre(&self) -> Option<String> {
        self.genres.first().cloned()
    }

    pub fn image_url(&self) -> Option<String> {
        first_image_url(&self.images)
    }
}

impl TrackObject {
    /// Representative album artwork (largest image)
    pub fn album_image_url(&self) -> Option<String> {
        self.album.as_ref().and_then(|album| first_image_url(&album.images))
    }
}

pub fn first_image_url(images: &[Image]) -> Option<String> {
    images.first().map(|image| image.url.clone())
}

/// The listening-history feed consumed by the sync engine.
///
/// Implementations are free to keep session state (access tokens), hence
/// `&mut self` on every call.
#[async_trait]
pub trait PlayFeed: Send {
    /// Most recent plays, newest first, at most `limit` of them
    async fn recently_played(&mut self, limit: usize) -> Result<Vec<FeedEntry>>;

    /// Artist detail: genre tags and images
    async fn artist(&mut self, artist_id: &str) -> Result<ArtistDetails>;

    /// Track detail: album and album images
    async fn track(&mut self, track_id: &str) -> Result<TrackObject>;
}

pub use spotify::SpotifyClient;


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_recently_played_payload() {
        let json = r#"{
            "items": [{
                "track": {
                    "id": "T1",
                    "name": "Song",
                    "duration_ms": 215000,
                    "album": {
                        "name": "Record",
                        "images": [
                            {"url": "http://img/640", "height": 640, "width": 640},
                            {"url": "http://img/300", "height": 300, "width": 300}
                        ]
                    },
                    "artists": [
                        {"id": "A1", "name": "First"},
                        {"id": "A2", "name": "Second"}
                    ]
                },
                "played_at": "2025-01-01T00:00:00.123Z"
            }],
            "next": null,
            "limit": 50
        }"#;

        let response: RecentlyPlayedResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.items.len(), 1);
        let item = match &response.items[0] {
            FeedEntry::Play(item) => item,
            FeedEntry::Malformed(e) => panic!("unexpected malformed entry: {}", e),
        };
        assert_eq!(item.track.id.as_deref(), Some("T1"));
        assert_eq!(item.track.artists.len(), 2);
        assert_eq!(item.track.album_image_url().as_deref(), Some("http://img/640"));
        assert_eq!(item.played_at, "2025-01-01T00:00:00.123Z");
    }

    #[test]
    fn test_bad_items_do_not_sink_the_page() {
        let json = r#"{
            "items": [
                {"track": {"id": "T1", "name": "Fine", "artists": [{"id": "A1", "name": "X"}]},
                 "played_at": "2025-01-01T00:00:00Z"},
                {"track": null, "played_at": "2025-01-01T00:01:00Z"},
                {"track": {"id": "T2", "artists": []}, "played_at": "2025-01-01T00:02:00Z"},
                "not even an object"
            ]
        }"#;

        let response: RecentlyPlayedResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.items.len(), 4);
        assert_eq!(response.items[0].played_at(), Some("2025-01-01T00:00:00Z"));
        assert!(matches!(response.items[0], FeedEntry::Play(_)));
        assert!(matches!(response.items[1], FeedEntry::Malformed(_)));
        match &response.items[2] {
            FeedEntry::Malformed(e) => assert!(e.contains("name"), "{}", e),
            FeedEntry::Play(_) => panic!("track without a name decoded"),
        }
        assert!(response.items[3].played_at().is_none());
    }

    #[test]
    fn test_local_file_track_has_no_id() {
        let json = r#"{"id": null, "name": "rip.mp3", "artists": [{"id": null, "name": "Me"}]}"#;
        let track: TrackObject = serde_json::from_str(json).unwrap();
        assert!(track.id.is_none());
        assert!(track.album_image_url().is_none());
        assert!(track.duration_ms.is_none());
    }

    #[test]
    fn test_artist_primary_genre_and_image() {
        let json = r#"{
            "id": "A1",
            "name": "Band",
            "genres": ["shoegaze", "dream pop"],
            "images": [{"url": "http://artist/big"}]
        }"#;
        let artist: ArtistDetails = serde_json::from_str(json).unwrap();
        assert_eq!(artist.primary_genre().as_deref(), Some("shoegaze"));
        assert_eq!(artist.image_url().as_deref(), Some("http://artist/big"));

        let bare: ArtistDetails = serde_json::from_str(r#"{"id": "A2", "name": "Quiet"}"#).unwrap();
        assert!(bare.primary_genre().is_none());
        assert!(bare.image_url().is_none());
    }
}
