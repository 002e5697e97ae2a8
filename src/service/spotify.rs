use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::{Client as HttpClient, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{ArtistDetails, FeedEntry, PlayFeed, RecentlyPlayedResponse, TrackObject};
use crate::config::SpotifyConfig;

const REQUEST_TIMEOUT_SECS: u64 = 30;
const TOKEN_EXPIRY_MARGIN_MINUTES: i64 = 5;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
    /// Spotify may rotate the refresh token on use
    refresh_token: Option<String>,
}

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - Duration::minutes(TOKEN_EXPIRY_MARGIN_MINUTES) < now
    }
}

/// Spotify Web API client authenticated with a long-lived refresh token.
///
/// Access tokens are fetched lazily and reused until five minutes before
/// they expire. A 401 drops the cached token and retries the request once.
pub struct SpotifyClient {
    http_client: HttpClient,
    client_id: String,
    client_secret: String,
    refresh_token: String,
    api_base: String,
    token_url: String,
    token: Option<AccessToken>,
}

impl SpotifyClient {
    pub fn new(config: &SpotifyConfig) -> Result<Self> {
        let http_client = HttpClient::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http_client,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            refresh_token: config.refresh_token.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token_url: config.token_url.clone(),
            token: None,
        })
    }

    fn endpoint_url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }

    async fn access_token(&mut self) -> Result<String> {
        if let Some(ref token) = self.token {
            if !token.is_expired(Utc::now()) {
                return Ok(token.value.clone());
            }
        }
        self.refresh_access_token().await
    }

    async fn refresh_access_token(&mut self) -> Result<String> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", self.refresh_token.as_str()),
        ];

        let response = self
            .http_client
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&params)
            .send()
            .await
            .context("Token refresh request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "Failed to refresh token. Status: {} - {}",
                status,
                body
            ));
        }

        let token: TokenResponse = response
            .json()
            .await
            .context("Failed to parse token response")?;

        if let Some(rotated) = token.refresh_token {
            tracing::debug!("Spotify rotated the refresh token");
            self.refresh_token = rotated;
        }

        let access = AccessToken {
            value: token.access_token,
            expires_at: Utc::now() + Duration::seconds(token.expires_in),
        };
        tracing::debug!(expires_at = %access.expires_at, "Access token refreshed");
        let value = access.value.clone();
        self.token = Some(access);
        Ok(value)
    }

    async fn get_json<T: DeserializeOwned>(
        &mut self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = self.endpoint_url(path);

        for attempt in 0..2 {
            let token = self.access_token().await?;
            let response = self
                .http_client
                .get(&url)
                .bearer_auth(&token)
                .query(query)
                .send()
                .await
                .with_context(|| format!("Request to {} failed", url))?;

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED && attempt == 0 {
                tracing::debug!(%url, "Access token rejected, refreshing");
                self.token = None;
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(anyhow!("GET {} returned {} - {}", url, status, body));
            }

            return response
                .json::<T>()
                .await
                .with_context(|| format!("Failed to decode response from {}", url));
        }

        Err(anyhow!("GET {} rejected a freshly refreshed token", url))
    }
}

#[async_trait]
impl PlayFeed for SpotifyClient {
    async fn recently_played(&mut self, limit: usize) -> Result<Vec<FeedEntry>> {
        let response: RecentlyPlayedResponse = self
            .get_json("me/player/recently-played", &[("limit", limit.to_string())])
            .await?;
        Ok(response.items)
    }

    async fn artist(&mut self, artist_id: &str) -> Result<ArtistDetails> {
        self.get_json(&format!("artists/{}", artist_id), &[]).await
    }

    async fn track(&mut self, track_id: &str) -> Result<TrackObject> {
        self.get_json(&format!("tracks/{}", track_id), &[]).await
    }
}
