#![allow(dead_code)]

use async_trait::async_trait;
use nowplaying_plugin::backend::PlaybackSource;
use nowplaying_plugin::clock::ManualClock;
use nowplaying_plugin::engine::{Engine, EngineEvent};
use nowplaying_plugin::error::{RenderError, SourceError};
use nowplaying_plugin::registry::KeyId;
use nowplaying_plugin::render::{ImageHandle, LikeBadge, NowPlayingContent, NowPlayingFrame, Renderer};
use nowplaying_proto::config::TimingConfig;
use nowplaying_proto::library::{PlaylistPage, PlaylistSummary, SearchHit, SearchKind, SearchResults};
use nowplaying_proto::playback::{RawPlayback, TransportAction};
use nowplaying_proto::protocol::{HostEvent, HostKey, Interaction, PluginCommand};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Notify};

pub const DEVICE: &str = "SN-1";
pub const NOW_PLAYING_CID: &str = "com.energy.spotify_integration.nowplaying";
pub const LIKE_CID: &str = "com.energy.spotify_integration.like";
pub const COUNTER_CID: &str = "com.energy.spotify_integration.counter";
pub const T0: u64 = 1_700_000_000_000;

// ── Fake playback source ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum Script {
    Playback(Option<RawPlayback>),
    NetworkDown,
    AuthRejected,
}

pub struct FakeSource {
    pub script: Mutex<Script>,
    pub authenticated: AtomicBool,
    pub auth_succeeds: AtomicBool,
    pub liked: Mutex<HashMap<String, bool>>,
    pub fetch_calls: AtomicUsize,
    pub like_checks: AtomicUsize,
    pub transport: Mutex<Vec<TransportAction>>,
    pub set_liked_calls: Mutex<Vec<(String, bool)>>,
    /// Playlist and search calls, as `"playlists 50/0"` or
    /// `"search q=.. track,album 10/0"`.
    pub library_calls: Mutex<Vec<String>>,
    /// While set, like lookups wait for `like_gate`.
    pub gate_likes: AtomicBool,
    pub like_gate: Notify,
}

impl FakeSource {
    pub fn new(script: Script) -> Self {
        Self {
            script: Mutex::new(script),
            authenticated: AtomicBool::new(true),
            auth_succeeds: AtomicBool::new(true),
            liked: Mutex::new(HashMap::new()),
            fetch_calls: AtomicUsize::new(0),
            like_checks: AtomicUsize::new(0),
            transport: Mutex::new(Vec::new()),
            set_liked_calls: Mutex::new(Vec::new()),
            library_calls: Mutex::new(Vec::new()),
            gate_likes: AtomicBool::new(false),
            like_gate: Notify::new(),
        }
    }

    pub fn playing(track: &str, progress_ms: u64, duration_ms: u64) -> Self {
        Self::new(Script::Playback(Some(track_raw(track, progress_ms, duration_ms, true))))
    }

    pub fn set_script(&self, script: Script) {
        *self.script.lock().unwrap() = script;
    }

    pub fn mark_liked(&self, track: &str, liked: bool) {
        self.liked.lock().unwrap().insert(track.to_string(), liked);
    }

    pub fn library_calls(&self) -> Vec<String> {
        self.library_calls.lock().unwrap().clone()
    }

    pub fn fetches(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

pub fn track_raw(track: &str, progress_ms: u64, duration_ms: u64, is_playing: bool) -> RawPlayback {
    RawPlayback {
        track_id: track.to_string(),
        title: format!("Song {}", track),
        artist_names: vec![format!("Artist {}", track)],
        album_art_url: None,
        is_playing,
        progress_ms,
        duration_ms,
    }
}

#[async_trait]
impl PlaybackSource for FakeSource {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    async fn initialize_authentication(&self) -> bool {
        let ok = self.auth_succeeds.load(Ordering::SeqCst);
        self.authenticated.store(ok, Ordering::SeqCst);
        ok
    }

    async fn fetch_current_playback(&self) -> Result<Option<RawPlayback>, SourceError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let script = self.script.lock().unwrap().clone();
        match script {
            Script::Playback(raw) => Ok(raw),
            Script::NetworkDown => Err(SourceError::Network("connection reset".into())),
            Script::AuthRejected => Err(SourceError::NeedsAuth("fake".into())),
        }
    }

    async fn check_liked(&self, track_id: &str) -> Result<Option<bool>, SourceError> {
        self.like_checks.fetch_add(1, Ordering::SeqCst);
        if self.gate_likes.load(Ordering::SeqCst) {
            self.like_gate.notified().await;
        }
        Ok(self.liked.lock().unwrap().get(track_id).copied())
    }

    async fn set_liked(&self, track_id: &str, liked: bool) -> Result<(), SourceError> {
        self.set_liked_calls
            .lock()
            .unwrap()
            .push((track_id.to_string(), liked));
        self.mark_liked(track_id, liked);
        Ok(())
    }

    async fn control_transport(&self, action: TransportAction) -> Result<(), SourceError> {
        self.transport.lock().unwrap().push(action);
        Ok(())
    }

    async fn user_playlists(&self, limit: u32, offset: u32) -> Result<PlaylistPage, SourceError> {
        self.library_calls
            .lock()
            .unwrap()
            .push(format!("playlists {}/{}", limit, offset));
        Ok(PlaylistPage {
            items: vec![PlaylistSummary {
                id: "pl-1".into(),
                name: "Mix".into(),
                owner: Some("me".into()),
                track_count: 12,
                image_url: None,
                uri: None,
            }],
            total: 1,
            offset,
        })
    }

    async fn search(
        &self,
        query: &str,
        kinds: &[SearchKind],
        limit: u32,
        offset: u32,
    ) -> Result<SearchResults, SourceError> {
        let kinds: Vec<&str> = kinds.iter().map(|k| k.as_str()).collect();
        self.library_calls.lock().unwrap().push(format!(
            "search q={} {} {}/{}",
            query,
            kinds.join(","),
            limit,
            offset
        ));
        Ok(SearchResults {
            tracks: vec![SearchHit {
                id: "t-1".into(),
                name: format!("Song {}", query),
                subtitle: None,
                image_url: None,
                uri: None,
            }],
            ..SearchResults::default()
        })
    }
}

// ── Recording renderer ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Rendered {
    NowPlaying { width: u32, content: NowPlayingContent },
    Like { has_track: bool, is_liked: Option<bool> },
}

#[derive(Clone, Default)]
pub struct RecordingRenderer {
    pub frames: Arc<Mutex<Vec<Rendered>>>,
    pub fail: Arc<AtomicBool>,
}

impl Renderer for RecordingRenderer {
    fn render_now_playing(
        &mut self,
        frame: &NowPlayingFrame<'_>,
    ) -> Result<ImageHandle, RenderError> {
        self.frames.lock().unwrap().push(Rendered::NowPlaying {
            width: frame.width,
            content: frame.content.clone(),
        });
        if self.fail.load(Ordering::SeqCst) {
            return Err(RenderError::Degenerate {
                width: frame.width,
                height: 0,
            });
        }
        Ok(ImageHandle(format!("np:{:?}", frame.content)))
    }

    fn render_like_badge(&mut self, badge: &LikeBadge<'_>) -> Result<ImageHandle, RenderError> {
        self.frames.lock().unwrap().push(Rendered::Like {
            has_track: badge.has_track,
            is_liked: badge.is_liked,
        });
        if self.fail.load(Ordering::SeqCst) {
            return Err(RenderError::Degenerate {
                width: badge.width,
                height: 0,
            });
        }
        Ok(ImageHandle(format!("like:{:?}", badge.is_liked)))
    }
}

// ── Harness ──────────────────────────────────────────────────────────────────

/// Long enough that no periodic timer fires during a test; firings are
/// simulated by handing the engine tick events directly.
pub fn test_timing() -> TimingConfig {
    TimingConfig {
        fetch_interval_ms: 60_000,
        interpolation_interval_ms: 60_000,
        song_end_buffer_ms: 200,
        push_debounce_ms: 10,
        interaction_settle_ms: 0,
    }
}

pub struct Harness {
    pub engine: Engine,
    pub rx: mpsc::Receiver<EngineEvent>,
    pub host_rx: broadcast::Receiver<PluginCommand>,
    pub source: Arc<FakeSource>,
    pub renderer: RecordingRenderer,
    pub clock: ManualClock,
}

impl Harness {
    pub fn new(source: FakeSource) -> Self {
        let (tx, rx) = mpsc::channel(256);
        let (host_tx, host_rx) = broadcast::channel(1024);
        let source = Arc::new(source);
        let renderer = RecordingRenderer::default();
        let clock = ManualClock::new(T0);
        let engine = Engine::new(
            source.clone(),
            Box::new(renderer.clone()),
            Arc::new(clock.clone()),
            test_timing(),
            tx,
            host_tx,
        );
        Self {
            engine,
            rx,
            host_rx,
            source,
            renderer,
            clock,
        }
    }

    /// Handle `event`, then everything it causes.
    pub async fn send(&mut self, event: EngineEvent) {
        self.engine.handle_event(event);
        self.pump().await;
    }

    /// Process queued events until the engine has been idle for 50ms.
    pub async fn pump(&mut self) {
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_millis(50), self.rx.recv()).await
        {
            self.engine.handle_event(event);
        }
    }

    pub async fn keys_present(&mut self, keys: &[(&str, &str)]) {
        let keys = keys.iter().map(|(uid, cid)| host_key(uid, cid)).collect();
        self.send(EngineEvent::Host(HostEvent::KeysPresent {
            device_id: DEVICE.to_string(),
            keys,
        }))
        .await;
    }

    pub async fn click(&mut self, uid: &str, cid: &str) {
        self.send(EngineEvent::Host(HostEvent::KeyInteraction {
            device_id: DEVICE.to_string(),
            key: host_key(uid, cid),
            interaction: Interaction {
                evt: "click".to_string(),
                state: None,
            },
        }))
        .await;
    }

    /// Drain every command sent to the host so far.
    pub fn host_commands(&mut self) -> Vec<PluginCommand> {
        let mut out = Vec::new();
        while let Ok(cmd) = self.host_rx.try_recv() {
            out.push(cmd);
        }
        out
    }

    pub fn draws_to(&mut self, uid: &str) -> Vec<PluginCommand> {
        self.host_commands()
            .into_iter()
            .filter(|c| c.draw_target() == Some((DEVICE, uid)))
            .collect()
    }

    pub fn frames(&self) -> Vec<Rendered> {
        self.renderer.frames.lock().unwrap().clone()
    }

    pub fn clear_frames(&self) {
        self.renderer.frames.lock().unwrap().clear();
    }

    pub fn last_now_playing(&self) -> Option<NowPlayingContent> {
        self.frames().into_iter().rev().find_map(|f| match f {
            Rendered::NowPlaying { content, .. } => Some(content),
            _ => None,
        })
    }

    pub fn like_frames(&self) -> Vec<(bool, Option<bool>)> {
        self.frames()
            .into_iter()
            .filter_map(|f| match f {
                Rendered::Like { has_track, is_liked } => Some((has_track, is_liked)),
                _ => None,
            })
            .collect()
    }
}

pub fn key(uid: &str) -> KeyId {
    KeyId::new(DEVICE, uid)
}

pub fn host_key(uid: &str, cid: &str) -> HostKey {
    HostKey {
        uid: uid.to_string(),
        cid: cid.to_string(),
        width: None,
        data: Value::Null,
    }
}
