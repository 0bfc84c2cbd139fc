//! YouTube Music Desktop companion server backend.
//!
//! Polling goes through the REST API.  The realtime feed is Socket.IO v4
//! spoken directly over a websocket: we only need the connect handshake,
//! `state-update` events and ping/pong.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use nowplaying_proto::config::YtmdConfig;
use nowplaying_proto::library::{PlaylistPage, PlaylistSummary};
use nowplaying_proto::playback::{RawPlayback, TransportAction};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{http_client, tokens, PlaybackSource, PushEvent};
use crate::error::SourceError;

const NAMESPACE: &str = "/api/v1/realtime";
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const AUTH_APPROVAL_TIMEOUT: Duration = Duration::from_secs(30);
const DISPLAY_NAME: &str = "YouTube Music Desktop";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredToken {
    token: String,
}

pub struct YtmdSource {
    http: reqwest::Client,
    config: YtmdConfig,
    token: Arc<RwLock<Option<String>>>,
    /// Like status seen with the latest state, keyed by video id.
    last_like: Mutex<Option<(String, bool)>>,
}

impl YtmdSource {
    pub fn new(config: YtmdConfig) -> anyhow::Result<Self> {
        Ok(Self {
            http: http_client()?,
            config,
            token: Arc::new(RwLock::new(None)),
            last_like: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "http://{}:{}/api/v1/{}",
            self.config.host, self.config.port, path
        )
    }

    async fn token(&self) -> Result<String, SourceError> {
        self.token
            .read()
            .await
            .clone()
            .ok_or_else(|| SourceError::NeedsAuth(self.name().to_string()))
    }

    fn remember_like(&self, video_id: &str, liked: Option<bool>) {
        if let Ok(mut guard) = self.last_like.lock() {
            *guard = liked.map(|l| (video_id.to_string(), l));
        }
    }

    fn cached_like(&self, video_id: &str) -> Option<bool> {
        let guard = self.last_like.lock().ok()?;
        match guard.as_ref() {
            Some((id, liked)) if id == video_id => Some(*liked),
            _ => None,
        }
    }

    async fn get(&self, path: &str) -> Result<Value, SourceError> {
        let token = self.token().await?;
        let response = self
            .http
            .get(self.url(path))
            .header(reqwest::header::AUTHORIZATION, token)
            .send()
            .await
            .map_err(unreachable_as_not_connected)?;
        let response = check_status(self.name(), response).await?;
        Ok(response.json().await?)
    }

    async fn get_state(&self) -> Result<Value, SourceError> {
        self.get("state").await
    }

    async fn command(&self, command: &str, data: Option<Value>) -> Result<(), SourceError> {
        let token = self.token().await?;
        debug!("YTMD command: {}", command);
        let mut body = json!({ "command": command });
        if let Some(data) = data {
            body["data"] = data;
        }
        let response = self
            .http
            .post(self.url("command"))
            .header(reqwest::header::AUTHORIZATION, token)
            .json(&body)
            .send()
            .await
            .map_err(unreachable_as_not_connected)?;
        check_status(self.name(), response).await?;
        Ok(())
    }

    /// Companion authorization: request a code, then wait for the user to
    /// approve it inside YTMD.
    async fn request_token(&self) -> Result<String, SourceError> {
        let code: Value = self
            .http
            .post(self.url("auth/requestcode"))
            .json(&json!({
                "appId": self.config.app_id,
                "appName": "Now Playing Keys",
                "appVersion": env!("CARGO_PKG_VERSION"),
            }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let code = code
            .get("code")
            .and_then(Value::as_str)
            .ok_or_else(|| SourceError::Malformed("requestcode without code".into()))?;
        info!("Approve code {} in YouTube Music Desktop to connect", code);

        let granted: Value = self
            .http
            .post(self.url("auth/request"))
            .timeout(AUTH_APPROVAL_TIMEOUT)
            .json(&json!({ "appId": self.config.app_id, "code": code }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        granted
            .get("token")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| SourceError::Malformed("auth response without token".into()))
    }
}

#[async_trait]
impl PlaybackSource for YtmdSource {
    fn name(&self) -> &'static str {
        "ytmd"
    }

    async fn is_authenticated(&self) -> bool {
        self.token.read().await.is_some()
    }

    async fn initialize_authentication(&self) -> bool {
        if self.token.read().await.is_none() {
            let stored = match tokens::load::<StoredToken>(&self.config.token_file) {
                Ok(stored) => stored,
                Err(e) => {
                    warn!("Unreadable YTMD token file: {}", e);
                    None
                }
            };
            let token = match stored {
                Some(s) => s.token,
                None => match self.request_token().await {
                    Ok(token) => {
                        if let Err(e) =
                            tokens::save(&self.config.token_file, &StoredToken { token: token.clone() })
                        {
                            warn!("Failed to persist YTMD token: {}", e);
                        }
                        token
                    }
                    Err(e) => {
                        warn!("YTMD authorization failed: {}", e);
                        return false;
                    }
                },
            };
            *self.token.write().await = Some(token);
        }

        match self.get_state().await {
            Ok(_) => {
                info!("YTMD authenticated");
                true
            }
            Err(SourceError::NeedsAuth(_)) => {
                warn!("YTMD rejected the stored token");
                *self.token.write().await = None;
                if let Err(e) = tokens::clear(&self.config.token_file) {
                    warn!("Failed to clear YTMD token file: {}", e);
                }
                false
            }
            Err(e) => {
                warn!("YTMD not reachable: {}", e);
                false
            }
        }
    }

    async fn fetch_current_playback(&self) -> Result<Option<RawPlayback>, SourceError> {
        let state = self.get_state().await?;
        match map_state(&state) {
            Some((raw, liked)) => {
                self.remember_like(&raw.track_id, liked);
                Ok(Some(raw))
            }
            None => Ok(None),
        }
    }

    async fn check_liked(&self, track_id: &str) -> Result<Option<bool>, SourceError> {
        if let Some(liked) = self.cached_like(track_id) {
            return Ok(Some(liked));
        }
        let state = self.get_state().await?;
        Ok(match map_state(&state) {
            Some((raw, liked)) if raw.track_id == track_id => {
                self.remember_like(&raw.track_id, liked);
                liked
            }
            _ => None,
        })
    }

    async fn set_liked(&self, track_id: &str, liked: bool) -> Result<(), SourceError> {
        // YTMD only offers a toggle.
        if self.cached_like(track_id) == Some(liked) {
            return Ok(());
        }
        self.command("toggleLike", None).await?;
        self.remember_like(track_id, Some(liked));
        Ok(())
    }

    async fn control_transport(&self, action: TransportAction) -> Result<(), SourceError> {
        match action {
            TransportAction::SetVolume(percent) => {
                self.command("setVolume", Some(json!(percent.min(100)))).await
            }
            _ => self.command(action.as_str(), None).await,
        }
    }

    /// The companion returns every playlist at once; paging happens here.
    async fn user_playlists(&self, limit: u32, offset: u32) -> Result<PlaylistPage, SourceError> {
        let body = self.get("playlists").await?;
        Ok(map_playlists(&body, limit, offset))
    }

    fn subscribe_state_changes(
        &self,
        cancel: CancellationToken,
    ) -> Option<mpsc::Receiver<PushEvent>> {
        if !self.config.realtime {
            return None;
        }
        let (tx, rx) = mpsc::channel(32);
        let url = format!(
            "ws://{}:{}/socket.io/?EIO=4&transport=websocket",
            self.config.host, self.config.port
        );
        tokio::spawn(run_realtime(url, self.token.clone(), tx, cancel));
        Some(rx)
    }
}

fn unreachable_as_not_connected(e: reqwest::Error) -> SourceError {
    if e.is_connect() {
        SourceError::NotConnected(DISPLAY_NAME.to_string())
    } else {
        e.into()
    }
}

/// Slice the companion's `[{ id, title }]` playlist list into a page.
pub fn map_playlists(body: &Value, limit: u32, offset: u32) -> PlaylistPage {
    let all: Vec<PlaylistSummary> = body
        .as_array()
        .map(|list| {
            list.iter()
                .filter_map(|p| {
                    Some(PlaylistSummary {
                        id: p.get("id")?.as_str()?.to_string(),
                        name: p
                            .get("title")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        owner: None,
                        track_count: 0,
                        image_url: None,
                        uri: None,
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    PlaylistPage {
        total: all.len() as u32,
        items: all
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect(),
        offset,
    }
}

async fn check_status(
    name: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, SourceError> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(SourceError::NeedsAuth(name.to_string()));
    }
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SourceError::Http {
        status: status.as_u16(),
        body,
    })
}

/// Map a companion state document to a playback reading plus the like
/// status it carries.  No video means nothing playing.
pub fn map_state(state: &Value) -> Option<(RawPlayback, Option<bool>)> {
    let video = state.get("video").filter(|v| !v.is_null())?;
    let Some(id) = video.get("id").and_then(Value::as_str) else {
        warn!("YTMD video without an id, ignoring");
        return None;
    };

    let seconds_to_ms = |v: Option<&Value>| {
        v.and_then(Value::as_f64)
            .map(|s| (s.max(0.0) * 1000.0) as u64)
            .unwrap_or(0)
    };

    // Thumbnails are listed smallest first.
    let album_art_url = video
        .get("thumbnails")
        .and_then(Value::as_array)
        .and_then(|t| t.last())
        .and_then(|t| t.get("url"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let artist_names = video
        .get("author")
        .and_then(Value::as_str)
        .map(|a| vec![a.to_string()])
        .unwrap_or_default();

    let liked = video
        .get("likeStatus")
        .and_then(Value::as_i64)
        .map(|s| s == 2);

    let raw = RawPlayback {
        track_id: id.to_string(),
        title: video
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        artist_names,
        album_art_url,
        is_playing: state.pointer("/player/trackState").and_then(Value::as_i64) == Some(1),
        progress_ms: seconds_to_ms(state.pointer("/player/videoProgress")),
        duration_ms: seconds_to_ms(video.get("durationSeconds")),
    };
    Some((raw, liked))
}

// ── Realtime socket ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum SocketFrame {
    /// Engine.IO open packet.
    Open,
    Ping,
    /// Namespace connect acknowledged.
    Connected,
    ConnectError(String),
    StateUpdate(Value),
    Other,
}

pub fn parse_frame(text: &str) -> SocketFrame {
    if text.starts_with('0') {
        return SocketFrame::Open;
    }
    if text == "2" {
        return SocketFrame::Ping;
    }
    let ns_prefix = |packet: &str| format!("{}{},", packet, NAMESPACE);

    if let Some(rest) = text.strip_prefix(&ns_prefix("40")) {
        debug!("Realtime namespace connected: {}", rest);
        return SocketFrame::Connected;
    }
    if let Some(rest) = text.strip_prefix(&ns_prefix("44")) {
        let message = serde_json::from_str::<Value>(rest)
            .ok()
            .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| rest.to_string());
        return SocketFrame::ConnectError(message);
    }
    if let Some(rest) = text.strip_prefix(&ns_prefix("42")) {
        if let Ok(Value::Array(mut parts)) = serde_json::from_str::<Value>(rest) {
            if parts.len() >= 2 && parts[0] == "state-update" {
                return SocketFrame::StateUpdate(parts.swap_remove(1));
            }
        }
    }
    SocketFrame::Other
}

fn connect_packet(token: &str) -> String {
    format!("40{},{}", NAMESPACE, json!({ "token": token }))
}

async fn run_realtime(
    url: String,
    token: Arc<RwLock<Option<String>>>,
    tx: mpsc::Sender<PushEvent>,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            break;
        }

        let current = token.read().await.clone();
        match current {
            Some(t) => match realtime_session(&url, &t, &tx, &cancel).await {
                Ok(()) => debug!("Realtime session ended"),
                Err(e) => warn!("Realtime socket error: {}", e),
            },
            None => debug!("Realtime waiting for YTMD authorization"),
        }
        let _ = tx.send(PushEvent::Disconnected).await;

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
        }
    }
    info!("Realtime socket stopped");
}

async fn realtime_session(
    url: &str,
    token: &str,
    tx: &mpsc::Sender<PushEvent>,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let (ws, _) = tokio_tungstenite::connect_async(url).await?;
    let (mut sink, mut stream) = ws.split();

    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.close().await;
                return Ok(());
            }
            msg = stream.next() => msg,
        };
        let text = match msg {
            Some(Ok(WsMessage::Text(text))) => text,
            Some(Ok(WsMessage::Close(_))) | None => return Ok(()),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
        };

        match parse_frame(&text) {
            SocketFrame::Open => sink.send(WsMessage::Text(connect_packet(token))).await?,
            SocketFrame::Ping => sink.send(WsMessage::Text("3".into())).await?,
            SocketFrame::Connected => {
                info!("YTMD realtime connected");
                if tx.send(PushEvent::Connected).await.is_err() {
                    return Ok(());
                }
            }
            SocketFrame::ConnectError(message) => {
                anyhow::bail!("realtime connect refused: {}", message);
            }
            SocketFrame::StateUpdate(state) => {
                let raw = map_state(&state).map(|(raw, _)| raw);
                if tx.send(PushEvent::State(raw)).await.is_err() {
                    return Ok(());
                }
            }
            SocketFrame::Other => {}
        }
    }
}
