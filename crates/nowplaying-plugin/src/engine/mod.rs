//! The single owner of all mutable plugin state.
//!
//! Every input (host messages, timer ticks, finished network calls, push
//! updates) arrives as an [`EngineEvent`] on one channel and is handled to
//! completion before the next one is looked at.  Handlers never await:
//! anything that has to wait runs in a spawned task that reports back with
//! another event, and that event re-checks the registry before touching a
//! key.

mod lifecycle;
mod reconcile;

use nowplaying_proto::config::TimingConfig;
use nowplaying_proto::keys::{KeyConfig, KeyKind, LikeConfig, NowPlayingConfig};
use nowplaying_proto::playback::{RawPlayback, TransportAction};
use nowplaying_proto::protocol::{HostEvent, PluginCommand, UiResponse};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::artwork::ArtworkFetcher;
use crate::backend::{PlaybackSource, PushEvent};
use crate::clock::Clock;
use crate::interpolate::{estimate_progress, InterpolationState};
use crate::registry::{KeyId, KeyRegistry};
use crate::render::{
    like_fallback_text, now_playing_fallback_text, LikeBadge, NowPlayingContent,
    NowPlayingFrame, Renderer, TrackFrame,
};
use crate::song_end::SongEndScheduler;
use crate::store::PlaybackStateStore;
use crate::timers::{self, TimerHandle};

/// Result of one authoritative fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Snapshot(Option<RawPlayback>),
    NeedsAuth,
    Failed(String),
}

#[derive(Debug)]
pub enum EngineEvent {
    Host(HostEvent),
    /// The host connection dropped; every device is gone with it.
    HostDisconnected,

    FetchTick(KeyId),
    InterpolationTick(KeyId),
    /// Carries the id of the song-end timer that fired.
    SongEnd(u64),

    FetchCompleted {
        key: KeyId,
        arm_timers: bool,
        outcome: FetchOutcome,
    },
    LikeResolved {
        track_id: String,
        liked: Option<bool>,
    },
    LikeToggled {
        track_id: String,
        liked: bool,
        result: Result<(), String>,
    },
    /// A play/pause press has been sent and given time to take effect.
    InteractionSettled(KeyId),
    UiControlDone {
        request_id: u64,
        action: TransportAction,
        result: Result<(), (String, bool)>,
    },
    /// A settings-UI query that finished off-loop.
    UiReply {
        request_id: u64,
        response: UiResponse,
    },

    PushState(Option<RawPlayback>),
    PushConnection(bool),
    PushFlush,

    ArtworkFetched {
        url: String,
        bytes: Option<Vec<u8>>,
    },

    Shutdown,
}

impl From<PushEvent> for EngineEvent {
    fn from(event: PushEvent) -> Self {
        match event {
            PushEvent::Connected => Self::PushConnection(true),
            PushEvent::Disconnected => Self::PushConnection(false),
            PushEvent::State(raw) => Self::PushState(raw),
        }
    }
}

pub struct Engine {
    registry: KeyRegistry,
    store: PlaybackStateStore,
    song_end: SongEndScheduler,
    source: Arc<dyn PlaybackSource>,
    renderer: Box<dyn Renderer>,
    artwork: Option<ArtworkFetcher>,
    artwork_in_flight: HashSet<String>,
    clock: Arc<dyn Clock>,
    timing: TimingConfig,
    events: mpsc::Sender<EngineEvent>,
    host: broadcast::Sender<PluginCommand>,
    push_connected: bool,
    /// Latest push state waiting for the throttle window to close.
    pending_push: Option<Option<RawPlayback>>,
    push_flush: Option<TimerHandle>,
}

impl Engine {
    pub fn new(
        source: Arc<dyn PlaybackSource>,
        renderer: Box<dyn Renderer>,
        clock: Arc<dyn Clock>,
        timing: TimingConfig,
        events: mpsc::Sender<EngineEvent>,
        host: broadcast::Sender<PluginCommand>,
    ) -> Self {
        Self {
            registry: KeyRegistry::new(),
            store: PlaybackStateStore::new(),
            song_end: SongEndScheduler::new(timing.song_end_buffer_ms),
            source,
            renderer,
            artwork: None,
            artwork_in_flight: HashSet::new(),
            clock,
            timing,
            events,
            host,
            push_connected: false,
            pending_push: None,
            push_flush: None,
        }
    }

    /// Download album art for the renderer when it asks for it.
    pub fn with_artwork(mut self, fetcher: ArtworkFetcher) -> Self {
        self.artwork = Some(fetcher);
        self
    }

    pub fn registry(&self) -> &KeyRegistry {
        &self.registry
    }

    pub fn store(&self) -> &PlaybackStateStore {
        &self.store
    }

    pub fn push_connected(&self) -> bool {
        self.push_connected
    }

    pub async fn run(mut self, mut rx: mpsc::Receiver<EngineEvent>) -> anyhow::Result<()> {
        info!("Engine running ({} backend)", self.source.name());
        while let Some(event) = rx.recv().await {
            if !self.handle_event(event) {
                break;
            }
        }
        self.shutdown();
        Ok(())
    }

    /// Handle one event to completion.  Returns `false` on shutdown.
    pub fn handle_event(&mut self, event: EngineEvent) -> bool {
        match event {
            EngineEvent::Host(host_event) => self.on_host_event(host_event),
            EngineEvent::HostDisconnected => self.on_host_disconnected(),
            EngineEvent::FetchTick(key) => self.on_fetch_tick(&key),
            EngineEvent::InterpolationTick(key) => self.on_interpolation_tick(&key),
            EngineEvent::SongEnd(timer_id) => self.on_song_end(timer_id),
            EngineEvent::FetchCompleted {
                key,
                arm_timers,
                outcome,
            } => self.on_fetch_completed(&key, arm_timers, outcome),
            EngineEvent::LikeResolved { track_id, liked } => {
                self.on_like_resolved(&track_id, liked)
            }
            EngineEvent::LikeToggled {
                track_id,
                liked,
                result,
            } => self.on_like_toggled(&track_id, liked, result),
            EngineEvent::InteractionSettled(key) => self.on_interaction_settled(&key),
            EngineEvent::UiControlDone {
                request_id,
                action,
                result,
            } => self.on_ui_control_done(request_id, action, result),
            EngineEvent::UiReply {
                request_id,
                response,
            } => self.on_ui_reply(request_id, response),
            EngineEvent::PushState(raw) => self.on_push_state(raw),
            EngineEvent::PushConnection(connected) => self.on_push_connection(connected),
            EngineEvent::PushFlush => self.on_push_flush(),
            EngineEvent::ArtworkFetched { url, bytes } => self.on_artwork_fetched(url, bytes),
            EngineEvent::Shutdown => return false,
        }
        true
    }

    fn shutdown(&mut self) {
        let stopped = self.registry.deactivate_all();
        self.song_end.disarm(&mut self.store);
        self.push_flush = None;
        info!("Engine stopped, {} keys deactivated", stopped.len());
    }

    // ── Timers ──────────────────────────────────────────────────────────────

    fn on_interpolation_tick(&mut self, key: &KeyId) {
        if !self.registry.is_active(key) {
            self.registry.deactivate(key);
            return;
        }
        self.render_key(key);
    }

    /// (Re)start the fetch and interpolation timers of a now-playing key.
    /// Installing the new pair drops, and so cancels, the old one.
    fn arm_key_timers(&mut self, key: &KeyId) {
        let Some(entry) = self.registry.get_active(key) else {
            return;
        };
        let KeyConfig::NowPlaying(cfg) = &entry.config else {
            return;
        };
        let fetch_key = key.clone();
        let fetch = timers::every(
            Duration::from_millis(cfg.update_interval_ms),
            self.events.clone(),
            move || EngineEvent::FetchTick(fetch_key.clone()),
        );
        let tick_key = key.clone();
        let interpolation = timers::every(
            Duration::from_millis(cfg.interpolation_interval_ms),
            self.events.clone(),
            move || EngineEvent::InterpolationTick(tick_key.clone()),
        );
        debug!(
            "Timers armed for {} (fetch {}ms, interpolation {}ms)",
            key, cfg.update_interval_ms, cfg.interpolation_interval_ms
        );
        self.registry.set_timers(key, fetch, interpolation);
    }

    /// Disarm the song-end timer once no now-playing key is left to refresh.
    fn disarm_song_end_if_idle(&mut self) {
        if self.registry.active_of_kind(KeyKind::NowPlaying).is_empty() {
            self.song_end.disarm(&mut self.store);
        }
    }

    // ── Drawing ─────────────────────────────────────────────────────────────

    fn render_key(&mut self, key: &KeyId) {
        let Some(entry) = self.registry.get_active(key) else {
            return;
        };
        let width = entry.width;
        match entry.config.clone() {
            KeyConfig::NowPlaying(style) => {
                let content = self.now_playing_content(&entry.interpolation);
                self.draw_now_playing(key, width, &style, content);
            }
            KeyConfig::Like(style) => self.draw_like(key, width, &style),
            KeyConfig::Counter(_) => {
                let text = match entry.counter {
                    Some(n) => format!("Count: {}", n),
                    None => "Click Me!".to_string(),
                };
                self.draw_text(key, text);
            }
        }
    }

    fn now_playing_content(&self, state: &InterpolationState) -> NowPlayingContent {
        if !state.is_synced() {
            return NowPlayingContent::Loading;
        }
        let Some(track) = &state.track else {
            return NowPlayingContent::NothingPlaying;
        };
        let is_playing = self.store.snapshot().is_playing;
        NowPlayingContent::Track(TrackFrame {
            title: track.title.clone(),
            artist: track.artist.clone(),
            album_art_url: track.album_art_url.clone(),
            is_playing,
            progress_ms: estimate_progress(state, is_playing, self.clock.now_ms()),
            duration_ms: state.duration_ms,
        })
    }

    fn draw_now_playing(
        &mut self,
        key: &KeyId,
        width: u32,
        style: &NowPlayingConfig,
        content: NowPlayingContent,
    ) {
        if let NowPlayingContent::Track(TrackFrame {
            album_art_url: Some(url),
            ..
        }) = &content
        {
            self.request_artwork(url);
        }
        let frame = NowPlayingFrame {
            width,
            content,
            style,
        };
        match self.renderer.render_now_playing(&frame) {
            Ok(image) => self.send_draw(
                key,
                PluginCommand::DrawImage {
                    device_id: key.device_id.clone(),
                    key_uid: key.key_uid.clone(),
                    image: image.0,
                },
            ),
            Err(e) => {
                debug!("Render failed for {}: {}", key, e);
                self.draw_text(key, now_playing_fallback_text(&frame.content));
            }
        }
    }

    fn draw_like(&mut self, key: &KeyId, width: u32, style: &LikeConfig) {
        let snapshot = self.store.snapshot();
        let badge = LikeBadge {
            width,
            has_track: snapshot.track_id.is_some(),
            is_liked: snapshot.is_liked,
            style,
        };
        match self.renderer.render_like_badge(&badge) {
            Ok(image) => self.send_draw(
                key,
                PluginCommand::DrawImage {
                    device_id: key.device_id.clone(),
                    key_uid: key.key_uid.clone(),
                    image: image.0,
                },
            ),
            Err(e) => {
                debug!("Like badge render failed for {}: {}", key, e);
                let text = like_fallback_text(&badge);
                self.draw_text(key, text);
            }
        }
    }

    fn draw_text(&mut self, key: &KeyId, text: String) {
        self.send_draw(
            key,
            PluginCommand::DrawText {
                device_id: key.device_id.clone(),
                key_uid: key.key_uid.clone(),
                text,
            },
        );
    }

    fn send_draw(&self, key: &KeyId, cmd: PluginCommand) {
        if !self.registry.is_active(key) {
            debug!("Skipping draw to inactive key {}", key);
            return;
        }
        let _ = self.host.send(cmd);
    }

    fn redraw_like_keys(&mut self) {
        for key in self.registry.active_of_kind(KeyKind::Like) {
            self.render_key(&key);
        }
    }

    // ── Artwork ─────────────────────────────────────────────────────────────

    fn request_artwork(&mut self, url: &str) {
        let Some(fetcher) = self.artwork.clone() else {
            return;
        };
        if !self.renderer.wants_artwork(url) || self.artwork_in_flight.contains(url) {
            return;
        }
        self.artwork_in_flight.insert(url.to_string());
        let tx = self.events.clone();
        let url = url.to_string();
        tokio::spawn(async move {
            let bytes = match fetcher.fetch(&url).await {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    warn!("Artwork download failed for {}: {}", url, e);
                    None
                }
            };
            let _ = tx.send(EngineEvent::ArtworkFetched { url, bytes }).await;
        });
    }

    fn on_artwork_fetched(&mut self, url: String, bytes: Option<Vec<u8>>) {
        self.artwork_in_flight.remove(&url);
        self.renderer.accept_artwork(&url, bytes.as_deref());
        let showing: Vec<KeyId> = self
            .registry
            .active_of_kind(KeyKind::NowPlaying)
            .into_iter()
            .filter(|key| {
                self.registry
                    .get(key)
                    .and_then(|e| e.interpolation.track.as_ref())
                    .and_then(|t| t.album_art_url.as_deref())
                    == Some(url.as_str())
            })
            .collect();
        for key in showing {
            self.render_key(&key);
        }
    }
}

/// Forward a backend push channel into the engine.
pub fn forward_push(
    mut push_rx: mpsc::Receiver<PushEvent>,
    events: mpsc::Sender<EngineEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = push_rx.recv().await {
            if events.send(event.into()).await.is_err() {
                break;
            }
        }
        debug!("Push channel closed");
    })
}
