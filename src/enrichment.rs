use std::collections::HashMap;

use crate::service::PlayFeed;

/// Genre and artwork resolved for one artist
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArtistInfo {
    pub primary_genre: Option<String>,
    pub image_url: Option<String>,
}

/// Artist lookups memoized for the duration of one sync cycle.
///
/// Failed lookups are cached as empty so each artist costs at most one
/// external call per cycle.
#[derive(Debug, Default)]
pub struct ArtistCache {
    entries: HashMap<String, ArtistInfo>,
    lookups: usize,
}

impl ArtistCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lookup_or_fetch<F>(&mut self, feed: &mut F, artist_id: &str) -> ArtistInfo
    where
        F: PlayFeed + ?Sized,
    {
        if let Some(info) = self.entries.get(artist_id) {
            return info.clone();
        }

        self.lookups += 1;
        let info = match feed.artist(artist_id).await {
            Ok(artist) => ArtistInfo {
                primary_genre: artist.primary_genre(),
                image_url: artist.image_url(),
            },
            Err(e) => {
                tracing::warn!(artist_id, "Failed to fetch artist info: {:#}", e);
                ArtistInfo::default()
            }
        };

        self.entries.insert(artist_id.to_string(), info.clone());
        info
    }

    /// External calls made so far
    pub fn lookups(&self) -> usize {
        self.lookups
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
