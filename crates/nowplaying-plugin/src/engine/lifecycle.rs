//! Host-driven key lifecycle: keys appearing and disappearing, presses,
//! draw failures and settings-UI requests.

use nowplaying_proto::keys::{KeyConfig, KeyKind};
use nowplaying_proto::library::{
    page_limit, SearchKind, DEFAULT_PLAYLIST_LIMIT, DEFAULT_SEARCH_LIMIT,
};
use nowplaying_proto::playback::TransportAction;
use nowplaying_proto::protocol::{
    DeviceInfo, HostEvent, HostKey, Interaction, PluginCommand, UiRequest, UiResponse,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{Engine, EngineEvent};
use crate::backend::PlaybackSource;
use crate::registry::{KeyId, Registration};
use crate::render::NowPlayingContent;

/// Draw errors that mean the key or its device no longer exists.
const GONE_MARKERS: [&str; 2] = ["not connected", "not alive"];

/// Settings-UI reads that need the backend.
#[derive(Debug, Clone, PartialEq)]
enum UiQuery {
    Playlists {
        limit: u32,
        offset: u32,
    },
    Search {
        query: String,
        kinds: Vec<SearchKind>,
        limit: u32,
        offset: u32,
    },
}

impl Engine {
    pub(super) fn on_host_event(&mut self, event: HostEvent) {
        match event {
            HostEvent::KeysPresent { device_id, keys } => self.on_keys_present(&device_id, &keys),
            HostEvent::KeyInteraction {
                device_id,
                key,
                interaction,
            } => self.on_key_interaction(&device_id, &key, &interaction),
            HostEvent::DeviceStatus { devices } => self.on_device_status(&devices),
            HostEvent::DrawFailed {
                device_id,
                key_uid,
                error,
            } => self.on_draw_failed(KeyId::new(device_id, key_uid), &error),
            HostEvent::UiRequest {
                request_id,
                request,
            } => self.on_ui_request(request_id, request),
        }
    }

    /// The host's full list of keys for one device.  Missing keys are
    /// deactivated, known ones reaffirmed, unseen ones started.
    pub fn on_keys_present(&mut self, device_id: &str, keys: &[HostKey]) {
        let present: HashSet<KeyId> = keys
            .iter()
            .map(|k| KeyId::new(device_id, k.uid.clone()))
            .collect();

        for id in self.registry.active_ids() {
            if id.device_id == device_id && !present.contains(&id) {
                info!("Key {} no longer present", id);
                self.registry.deactivate(&id);
            }
        }

        for key in keys {
            self.register_key(device_id, key);
        }
        self.disarm_song_end_if_idle();
    }

    fn register_key(&mut self, device_id: &str, key: &HostKey) -> Option<Registration> {
        let Some(kind) = KeyKind::from_cid(&key.cid) else {
            debug!("Ignoring key {} with unknown cid {}", key.uid, key.cid);
            return None;
        };
        let id = KeyId::new(device_id, key.uid.clone());
        let config = KeyConfig::from_host(kind, &key.data, &self.timing);
        let width = key.width.unwrap_or_else(|| kind.default_width());

        let registration = self.registry.register(id.clone(), width, config);
        match registration {
            Registration::Reaffirmed => debug!("Key {} reaffirmed", id),
            Registration::New => {
                info!("Key {} registered as {:?}", id, kind);
                match kind {
                    KeyKind::NowPlaying => {
                        self.draw_status(&id, NowPlayingContent::Loading);
                        self.reconcile(&id, true);
                    }
                    KeyKind::Like | KeyKind::Counter => self.render_key(&id),
                }
            }
        }
        Some(registration)
    }

    pub fn on_device_status(&mut self, devices: &[DeviceInfo]) {
        let connected: HashSet<&str> = devices.iter().map(|d| d.serial_number.as_str()).collect();
        for device_id in self.registry.active_devices() {
            if !connected.contains(device_id.as_str()) {
                let gone = self.registry.deactivate_device(&device_id);
                info!("Device {} disconnected, {} keys deactivated", device_id, gone.len());
            }
        }
        self.disarm_song_end_if_idle();
    }

    pub(super) fn on_host_disconnected(&mut self) {
        let gone = self.registry.deactivate_all();
        if !gone.is_empty() {
            info!("Host disconnected, {} keys deactivated", gone.len());
        }
        self.song_end.disarm(&mut self.store);
        self.push_flush = None;
        self.pending_push = None;
    }

    pub fn on_key_interaction(&mut self, device_id: &str, key: &HostKey, interaction: &Interaction) {
        let id = KeyId::new(device_id, key.uid.clone());
        if !self.registry.is_active(&id) {
            info!("Interaction on inactive key {}, registering", id);
            if self.register_key(device_id, key).is_none() {
                return;
            }
        }
        let Some(kind) = self.registry.get(&id).map(|e| e.kind()) else {
            return;
        };

        match kind {
            KeyKind::NowPlaying if interaction.is_click() => self.toggle_play_pause(id),
            KeyKind::NowPlaying => self.reconcile(&id, false),
            KeyKind::Like if interaction.is_click() => self.toggle_like(),
            KeyKind::Counter if interaction.is_click() => self.bump_counter(&id),
            _ => debug!("Ignoring {} on {}", interaction.evt, id),
        }
    }

    fn toggle_play_pause(&mut self, key: KeyId) {
        let source = self.source.clone();
        let tx = self.events.clone();
        let settle = Duration::from_millis(self.timing.interaction_settle_ms);
        tokio::spawn(async move {
            match source.fetch_current_playback().await {
                Ok(Some(raw)) => {
                    let action = if raw.is_playing {
                        TransportAction::Pause
                    } else {
                        TransportAction::Play
                    };
                    if let Err(e) = source.control_transport(action).await {
                        warn!("{} failed: {}", action.as_str(), e);
                    }
                }
                Ok(None) => debug!("Nothing loaded, play/pause ignored"),
                Err(e) => warn!("Could not read playback for play/pause: {}", e),
            }
            tokio::time::sleep(settle).await;
            let _ = tx.send(EngineEvent::InteractionSettled(key)).await;
        });
    }

    pub(super) fn on_interaction_settled(&mut self, key: &KeyId) {
        // A key that lost its timers gets them back here.
        let arm = !self.registry.has_timers(key);
        self.reconcile(key, arm);
    }

    fn toggle_like(&mut self) {
        let snapshot = self.store.snapshot();
        let (Some(track_id), Some(liked)) = (snapshot.track_id.clone(), snapshot.is_liked) else {
            warn!("Like pressed without a track or known like status, ignoring");
            return;
        };
        let source = self.source.clone();
        let tx = self.events.clone();
        tokio::spawn(async move {
            let target = !liked;
            let result = source
                .set_liked(&track_id, target)
                .await
                .map_err(|e| e.to_string());
            let _ = tx
                .send(EngineEvent::LikeToggled {
                    track_id,
                    liked: target,
                    result,
                })
                .await;
        });
    }

    fn bump_counter(&mut self, key: &KeyId) {
        let Some(entry) = self.registry.get_active_mut(key) else {
            return;
        };
        let KeyConfig::Counter(cfg) = &entry.config else {
            return;
        };
        let current = entry.counter.unwrap_or(cfg.range_min);
        entry.counter = Some(cfg.next(current));
        self.render_key(key);
    }

    pub fn on_draw_failed(&mut self, key: KeyId, error: &str) {
        let lowered = error.to_lowercase();
        if GONE_MARKERS.iter().any(|m| lowered.contains(m)) {
            warn!("Key {} is gone ({}), deactivating", key, error);
            self.registry.deactivate(&key);
            self.disarm_song_end_if_idle();
        } else {
            warn!("Draw to {} failed: {}", key, error);
        }
    }

    // ── Settings UI ─────────────────────────────────────────────────────────

    fn on_ui_request(&mut self, request_id: u64, request: UiRequest) {
        match request {
            UiRequest::GetPlayback => {
                let playback = self.store.view(self.clock.now_ms());
                self.respond(request_id, UiResponse::Playback { playback });
            }
            UiRequest::Control { action } => {
                let source = self.source.clone();
                let tx = self.events.clone();
                let settle = Duration::from_millis(self.timing.interaction_settle_ms);
                tokio::spawn(async move {
                    let result = source
                        .control_transport(action)
                        .await
                        .map_err(|e| (e.to_string(), e.is_auth()));
                    if result.is_ok() {
                        tokio::time::sleep(settle).await;
                    }
                    let _ = tx
                        .send(EngineEvent::UiControlDone {
                            request_id,
                            action,
                            result,
                        })
                        .await;
                });
            }
            UiRequest::Refresh => {
                self.refresh_all();
                self.respond(
                    request_id,
                    UiResponse::Ok {
                        message: "Refreshing".to_string(),
                    },
                );
            }
            UiRequest::Playlists { limit, offset } => self.spawn_ui_query(
                request_id,
                UiQuery::Playlists {
                    limit: page_limit(limit, DEFAULT_PLAYLIST_LIMIT),
                    offset: offset.unwrap_or(0),
                },
            ),
            UiRequest::Search {
                query,
                types,
                limit,
                offset,
            } => {
                let query = query.trim().to_string();
                if query.is_empty() {
                    self.respond(
                        request_id,
                        UiResponse::Error {
                            message: "Query required".to_string(),
                            needs_auth: false,
                        },
                    );
                    return;
                }
                let kinds = if types.is_empty() {
                    SearchKind::defaults()
                } else {
                    types
                };
                self.spawn_ui_query(
                    request_id,
                    UiQuery::Search {
                        query,
                        kinds,
                        limit: page_limit(limit, DEFAULT_SEARCH_LIMIT),
                        offset: offset.unwrap_or(0),
                    },
                );
            }
        }
    }

    fn spawn_ui_query(&self, request_id: u64, query: UiQuery) {
        let source = self.source.clone();
        let tx = self.events.clone();
        tokio::spawn(async move {
            let response = run_ui_query(source, query).await;
            let _ = tx
                .send(EngineEvent::UiReply {
                    request_id,
                    response,
                })
                .await;
        });
    }

    pub(super) fn on_ui_reply(&mut self, request_id: u64, response: UiResponse) {
        if let UiResponse::Error { message, .. } = &response {
            warn!("UI request {} failed: {}", request_id, message);
        }
        self.respond(request_id, response);
    }

    pub(super) fn on_ui_control_done(
        &mut self,
        request_id: u64,
        action: TransportAction,
        result: Result<(), (String, bool)>,
    ) {
        match result {
            Ok(()) => {
                self.refresh_all();
                self.respond(
                    request_id,
                    UiResponse::Ok {
                        message: format!("{} sent", action.as_str()),
                    },
                );
            }
            Err((message, needs_auth)) => {
                warn!("UI {} failed: {}", action.as_str(), message);
                self.respond(
                    request_id,
                    UiResponse::Error {
                        message,
                        needs_auth,
                    },
                );
            }
        }
    }

    /// Reconcile every now-playing key and redraw like keys.
    fn refresh_all(&mut self) {
        for key in self.registry.active_of_kind(KeyKind::NowPlaying) {
            let arm = !self.registry.has_timers(&key);
            self.reconcile(&key, arm);
        }
        self.redraw_like_keys();
    }

    fn respond(&self, request_id: u64, response: UiResponse) {
        let _ = self.host.send(PluginCommand::UiResponse {
            request_id,
            response,
        });
    }
}

async fn run_ui_query(source: Arc<dyn PlaybackSource>, query: UiQuery) -> UiResponse {
    if !source.is_authenticated().await && !source.initialize_authentication().await {
        return UiResponse::Error {
            message: "Auth required".to_string(),
            needs_auth: true,
        };
    }
    let result = match query {
        UiQuery::Playlists { limit, offset } => source
            .user_playlists(limit, offset)
            .await
            .map(|playlists| UiResponse::Playlists { playlists }),
        UiQuery::Search {
            query,
            kinds,
            limit,
            offset,
        } => source
            .search(&query, &kinds, limit, offset)
            .await
            .map(|results| UiResponse::Search { results }),
    };
    result.unwrap_or_else(|e| UiResponse::Error {
        message: e.to_string(),
        needs_auth: e.is_auth(),
    })
}
