//! Spotify Web API backend.

use async_trait::async_trait;
use nowplaying_proto::config::SpotifyConfig;
use nowplaying_proto::library::{PlaylistPage, PlaylistSummary, SearchHit, SearchKind, SearchResults};
use nowplaying_proto::playback::{RawPlayback, TransportAction};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{http_client, tokens, PlaybackSource};
use crate::error::SourceError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpotifyTokens {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    /// Spotify only sometimes rotates the refresh token.
    refresh_token: Option<String>,
}

pub struct SpotifySource {
    http: reqwest::Client,
    config: SpotifyConfig,
    tokens: RwLock<Option<SpotifyTokens>>,
}

impl SpotifySource {
    pub fn new(config: SpotifyConfig) -> anyhow::Result<Self> {
        Ok(Self {
            http: http_client()?,
            config,
            tokens: RwLock::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_base.trim_end_matches('/'), path)
    }

    async fn access_token(&self) -> Result<String, SourceError> {
        self.tokens
            .read()
            .await
            .as_ref()
            .map(|t| t.access_token.clone())
            .ok_or_else(|| SourceError::NeedsAuth(self.name().to_string()))
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        token: &str,
    ) -> reqwest::Result<reqwest::Response> {
        let mut req = self.http.request(method.clone(), self.url(path)).bearer_auth(token);
        if !query.is_empty() {
            req = req.query(query);
        }
        if method == Method::PUT || method == Method::POST {
            // Spotify rejects body-less PUT/POST without a length header
            req = req.header(reqwest::header::CONTENT_LENGTH, 0);
        }
        req.send().await
    }

    async fn request(&self, method: Method, path: &str) -> Result<reqwest::Response, SourceError> {
        self.request_with(method, path, &[]).await
    }

    /// One API call.  A 401 gets exactly one token refresh and retry.
    async fn request_with(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<reqwest::Response, SourceError> {
        debug!("Spotify request: {} /{}", method, path);
        let token = self.access_token().await?;
        let mut response = self.send(method.clone(), path, query, &token).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            info!("Spotify token expired, refreshing");
            self.refresh().await?;
            let token = self.access_token().await?;
            response = self.send(method, path, query, &token).await?;
            if response.status() == StatusCode::UNAUTHORIZED {
                return Err(SourceError::NeedsAuth(self.name().to_string()));
            }
        }

        check_status(response).await
    }

    async fn refresh(&self) -> Result<(), SourceError> {
        let refresh_token = match self.tokens.read().await.as_ref() {
            Some(t) => t.refresh_token.clone(),
            None => return Err(SourceError::NeedsAuth(self.name().to_string())),
        };
        if self.config.client_id.is_empty() || self.config.client_secret.is_empty() {
            warn!("Spotify client_id/client_secret missing from config, cannot refresh");
            return Err(SourceError::NeedsAuth(self.name().to_string()));
        }

        let url = format!(
            "{}/api/token",
            self.config.accounts_base.trim_end_matches('/')
        );
        let response = self
            .http
            .post(url)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if body.contains("invalid_grant") {
                warn!("Spotify refresh token rejected, clearing stored tokens");
                *self.tokens.write().await = None;
                if let Err(e) = tokens::clear(&self.config.token_file) {
                    warn!("Failed to clear Spotify token file: {}", e);
                }
                return Err(SourceError::NeedsAuth(self.name().to_string()));
            }
            return Err(SourceError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let refreshed: RefreshResponse = response.json().await?;
        let updated = SpotifyTokens {
            access_token: refreshed.access_token,
            refresh_token: refreshed.refresh_token.unwrap_or(refresh_token),
        };
        if let Err(e) = tokens::save(&self.config.token_file, &updated) {
            warn!("Failed to persist refreshed Spotify tokens: {}", e);
        }
        *self.tokens.write().await = Some(updated);
        info!("Spotify token refreshed");
        Ok(())
    }
}

#[async_trait]
impl PlaybackSource for SpotifySource {
    fn name(&self) -> &'static str {
        "spotify"
    }

    async fn is_authenticated(&self) -> bool {
        self.tokens.read().await.is_some()
    }

    async fn initialize_authentication(&self) -> bool {
        if self.tokens.read().await.is_none() {
            match tokens::load::<SpotifyTokens>(&self.config.token_file) {
                Ok(Some(stored)) => *self.tokens.write().await = Some(stored),
                Ok(None) => {
                    warn!(
                        "No Spotify tokens at {:?}; authorize the plugin first",
                        self.config.token_file
                    );
                    return false;
                }
                Err(e) => {
                    warn!("Unreadable Spotify token file: {}", e);
                    return false;
                }
            }
        }

        match self.request(Method::GET, "me").await {
            Ok(_) => {
                info!("Spotify authenticated");
                true
            }
            Err(SourceError::NeedsAuth(_)) => {
                *self.tokens.write().await = None;
                false
            }
            Err(e) => {
                // Keep the tokens; the next cycle retries the call itself.
                warn!("Spotify validation failed: {}", e);
                true
            }
        }
    }

    async fn fetch_current_playback(&self) -> Result<Option<RawPlayback>, SourceError> {
        let response = self.request(Method::GET, "me/player").await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let body: Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                warn!("Spotify player payload unreadable: {}", e);
                return Ok(None);
            }
        };
        Ok(map_player(&body))
    }

    async fn check_liked(&self, track_id: &str) -> Result<Option<bool>, SourceError> {
        let path = format!("me/tracks/contains?ids={}", track_id);
        let body: Value = self.request(Method::GET, &path).await?.json().await?;
        Ok(body.get(0).and_then(Value::as_bool))
    }

    async fn set_liked(&self, track_id: &str, liked: bool) -> Result<(), SourceError> {
        let method = if liked { Method::PUT } else { Method::DELETE };
        self.request(method, &format!("me/tracks?ids={}", track_id))
            .await?;
        Ok(())
    }

    async fn control_transport(&self, action: TransportAction) -> Result<(), SourceError> {
        match action {
            TransportAction::Play | TransportAction::Pause => {
                self.request(Method::PUT, &format!("me/player/{}", action.as_str()))
                    .await?;
            }
            TransportAction::Next | TransportAction::Previous => {
                self.request(Method::POST, &format!("me/player/{}", action.as_str()))
                    .await?;
            }
            TransportAction::SetVolume(percent) => {
                let query = [("volume_percent", percent.min(100).to_string())];
                self.request_with(Method::PUT, "me/player/volume", &query)
                    .await?;
            }
        }
        Ok(())
    }

    async fn user_playlists(&self, limit: u32, offset: u32) -> Result<PlaylistPage, SourceError> {
        let query = [("limit", limit.to_string()), ("offset", offset.to_string())];
        let body: Value = self
            .request_with(Method::GET, "me/playlists", &query)
            .await?
            .json()
            .await?;
        Ok(map_playlists(&body, offset))
    }

    async fn search(
        &self,
        query: &str,
        kinds: &[SearchKind],
        limit: u32,
        offset: u32,
    ) -> Result<SearchResults, SourceError> {
        let types: Vec<&str> = kinds.iter().map(|k| k.as_str()).collect();
        let params = [
            ("q", query.to_string()),
            ("type", types.join(",")),
            ("limit", limit.to_string()),
            ("offset", offset.to_string()),
        ];
        let body: Value = self
            .request_with(Method::GET, "search", &params)
            .await?
            .json()
            .await?;
        Ok(map_search(&body))
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, SourceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SourceError::Http {
        status: status.as_u16(),
        body,
    })
}

/// Map a `GET /me/player` body.  Anything without a playable item is
/// treated as nothing playing.
pub fn map_player(body: &Value) -> Option<RawPlayback> {
    let item = body.get("item").filter(|v| !v.is_null())?;
    let Some(track_id) = item.get("id").and_then(Value::as_str) else {
        warn!("Spotify item without an id, ignoring");
        return None;
    };

    let artist_names = item
        .get("artists")
        .and_then(Value::as_array)
        .map(|artists| {
            artists
                .iter()
                .filter_map(|a| a.get("name").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let album_art_url = item
        .pointer("/album/images/0/url")
        .and_then(Value::as_str)
        .map(str::to_string);

    Some(RawPlayback {
        track_id: track_id.to_string(),
        title: item
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        artist_names,
        album_art_url,
        is_playing: body
            .get("is_playing")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        progress_ms: body.get("progress_ms").and_then(Value::as_u64).unwrap_or(0),
        duration_ms: item.get("duration_ms").and_then(Value::as_u64).unwrap_or(0),
    })
}

fn str_at(v: &Value, pointer: &str) -> Option<String> {
    v.pointer(pointer).and_then(Value::as_str).map(str::to_string)
}

fn joined_artists(v: &Value) -> Option<String> {
    let names: Vec<&str> = v
        .get("artists")?
        .as_array()?
        .iter()
        .filter_map(|a| a.get("name").and_then(Value::as_str))
        .collect();
    (!names.is_empty()).then(|| names.join(", "))
}

/// Map a `GET /me/playlists` page.  Entries without an id are skipped.
pub fn map_playlists(body: &Value, offset: u32) -> PlaylistPage {
    let items = body
        .get("items")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|p| {
                    Some(PlaylistSummary {
                        id: str_at(p, "/id")?,
                        name: str_at(p, "/name").unwrap_or_default(),
                        owner: str_at(p, "/owner/display_name"),
                        track_count: p
                            .pointer("/tracks/total")
                            .and_then(Value::as_u64)
                            .unwrap_or(0) as u32,
                        image_url: str_at(p, "/images/0/url"),
                        uri: str_at(p, "/uri"),
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    PlaylistPage {
        items,
        total: body.get("total").and_then(Value::as_u64).unwrap_or(0) as u32,
        offset: body
            .get("offset")
            .and_then(Value::as_u64)
            .map(|o| o as u32)
            .unwrap_or(offset),
    }
}

fn search_hits(
    body: &Value,
    section: &str,
    image: &str,
    subtitle: fn(&Value) -> Option<String>,
) -> Vec<SearchHit> {
    body.pointer(&format!("/{}/items", section))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter(|v| !v.is_null())
                .filter_map(|v| {
                    Some(SearchHit {
                        id: str_at(v, "/id")?,
                        name: str_at(v, "/name").unwrap_or_default(),
                        subtitle: subtitle(v),
                        image_url: str_at(v, image),
                        uri: str_at(v, "/uri"),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Map a `GET /search` body.  Spotify pads result lists with nulls.
pub fn map_search(body: &Value) -> SearchResults {
    SearchResults {
        tracks: search_hits(body, "tracks", "/album/images/0/url", joined_artists),
        albums: search_hits(body, "albums", "/images/0/url", joined_artists),
        artists: search_hits(body, "artists", "/images/0/url", |_| None),
        playlists: search_hits(body, "playlists", "/images/0/url", |v| {
            str_at(v, "/owner/display_name")
        }),
    }
}
