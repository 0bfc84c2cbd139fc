//! Fetching authoritative state and fanning it out to keys.

use nowplaying_proto::keys::{KeyConfig, KeyKind};
use nowplaying_proto::playback::RawPlayback;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use super::{Engine, EngineEvent, FetchOutcome};
use crate::backend::PlaybackSource;
use crate::registry::KeyId;
use crate::render::NowPlayingContent;
use crate::store::SnapshotDiff;
use crate::timers;

impl Engine {
    /// Start a reconciliation for one key.  The fetch runs off-loop and
    /// lands in [`Engine::on_fetch_completed`].
    pub fn reconcile(&mut self, key: &KeyId, arm_timers: bool) {
        if !self.registry.is_active(key) {
            self.registry.deactivate(key);
            debug!("Reconcile for inactive key {} ignored", key);
            return;
        }
        let source = self.source.clone();
        let tx = self.events.clone();
        let key = key.clone();
        tokio::spawn(async move {
            let outcome = fetch_authoritative(source.as_ref()).await;
            let _ = tx
                .send(EngineEvent::FetchCompleted {
                    key,
                    arm_timers,
                    outcome,
                })
                .await;
        });
    }

    pub(super) fn on_fetch_tick(&mut self, key: &KeyId) {
        if !self.registry.is_active(key) {
            self.registry.deactivate(key);
            return;
        }
        if self.push_connected {
            trace!("Push channel live, skipping poll for {}", key);
            return;
        }
        self.reconcile(key, false);
    }

    pub(super) fn on_fetch_completed(&mut self, key: &KeyId, arm_timers: bool, outcome: FetchOutcome) {
        // The key may have gone away while the fetch was in flight.
        if !self.registry.is_active(key) {
            self.registry.deactivate(key);
            debug!("Fetch result for inactive key {} dropped", key);
            return;
        }

        match outcome {
            FetchOutcome::Snapshot(raw) => {
                let diff = self.apply_authoritative(raw.as_ref());
                self.sync_key(key);
                if arm_timers {
                    self.arm_key_timers(key);
                }
                self.render_key(key);
                self.after_snapshot(&diff);
            }
            FetchOutcome::NeedsAuth => {
                warn!("{} needs authentication", self.source.name());
                if arm_timers {
                    self.arm_key_timers(key);
                }
                self.draw_status(key, NowPlayingContent::NeedsAuth);
            }
            FetchOutcome::Failed(reason) => {
                warn!("Playback fetch for {} failed: {}", key, reason);
                if arm_timers {
                    self.arm_key_timers(key);
                }
                let synced = self
                    .registry
                    .get(key)
                    .map(|e| e.interpolation.is_synced())
                    .unwrap_or(false);
                if synced {
                    self.render_key(key);
                } else {
                    self.draw_status(key, NowPlayingContent::Error);
                }
            }
        }
    }

    /// Write a reading into the store and kick off its like lookup.
    fn apply_authoritative(&mut self, raw: Option<&RawPlayback>) -> SnapshotDiff {
        let diff = self.store.apply_snapshot(raw, self.clock.now_ms());
        if let Some(track_id) = diff.like_check.clone() {
            self.spawn_like_lookup(track_id);
        }
        diff
    }

    /// Copy the store's anchor into a key.
    fn sync_key(&mut self, key: &KeyId) {
        let state = self.store.interpolation_state();
        if let Some(entry) = self.registry.get_active_mut(key) {
            entry.interpolation = state;
        }
    }

    fn after_snapshot(&mut self, diff: &SnapshotDiff) {
        if diff.timing_changed() {
            self.rearm_song_end();
        }
        if diff.like_view_changed() {
            self.redraw_like_keys();
        }
    }

    fn rearm_song_end(&mut self) {
        if self.registry.active_of_kind(KeyKind::NowPlaying).is_empty() {
            self.song_end.disarm(&mut self.store);
            return;
        }
        let progress = self.store.estimated_progress(self.clock.now_ms());
        let snapshot = self.store.snapshot();
        let (duration, playing) = (snapshot.duration_ms, snapshot.is_playing);
        self.song_end.arm(
            &mut self.store,
            progress,
            duration,
            playing,
            &self.events,
            EngineEvent::SongEnd,
        );
    }

    pub(super) fn draw_status(&mut self, key: &KeyId, content: NowPlayingContent) {
        let Some(entry) = self.registry.get_active(key) else {
            return;
        };
        let width = entry.width;
        if let KeyConfig::NowPlaying(style) = entry.config.clone() {
            self.draw_now_playing(key, width, &style, content);
        }
    }

    // ── Song end ────────────────────────────────────────────────────────────

    pub(super) fn on_song_end(&mut self, timer_id: u64) {
        if !self.song_end.fired(&mut self.store, timer_id) {
            debug!("Stale song-end timer {} ignored", timer_id);
            return;
        }
        let keys = self.registry.active_of_kind(KeyKind::NowPlaying);
        debug!("Song end reached, refreshing {} keys", keys.len());
        for key in keys {
            self.reconcile(&key, false);
        }
    }

    // ── Like status ─────────────────────────────────────────────────────────

    fn spawn_like_lookup(&self, track_id: String) {
        let source = self.source.clone();
        let tx = self.events.clone();
        tokio::spawn(async move {
            let liked = match source.check_liked(&track_id).await {
                Ok(liked) => liked,
                Err(e) => {
                    warn!("Like lookup for {} failed: {}", track_id, e);
                    None
                }
            };
            let _ = tx.send(EngineEvent::LikeResolved { track_id, liked }).await;
        });
    }

    pub(super) fn on_like_resolved(&mut self, track_id: &str, liked: Option<bool>) {
        if self.store.apply_like_status(track_id, liked) {
            self.redraw_like_keys();
        }
    }

    pub(super) fn on_like_toggled(&mut self, track_id: &str, liked: bool, result: Result<(), String>) {
        match result {
            Ok(()) => {
                info!("Track {} {}", track_id, if liked { "liked" } else { "unliked" });
                if self.store.apply_like_status(track_id, Some(liked)) {
                    self.redraw_like_keys();
                }
            }
            Err(e) => {
                warn!("Failed to update like status for {}: {}", track_id, e);
                self.redraw_like_keys();
            }
        }
    }

    // ── Push channel ────────────────────────────────────────────────────────

    /// Push states are throttled: the first one opens a window, later ones
    /// replace it, and the newest is applied when the window closes.
    pub(super) fn on_push_state(&mut self, raw: Option<RawPlayback>) {
        self.pending_push = Some(raw);
        if self.push_flush.is_none() {
            self.push_flush = Some(timers::once(
                Duration::from_millis(self.timing.push_debounce_ms),
                self.events.clone(),
                EngineEvent::PushFlush,
            ));
        }
    }

    pub(super) fn on_push_flush(&mut self) {
        self.push_flush = None;
        let Some(raw) = self.pending_push.take() else {
            return;
        };
        let diff = self.apply_authoritative(raw.as_ref());
        let keys = self.registry.active_of_kind(KeyKind::NowPlaying);
        for key in &keys {
            self.sync_key(key);
        }
        for key in &keys {
            self.render_key(key);
        }
        self.after_snapshot(&diff);
    }

    pub(super) fn on_push_connection(&mut self, connected: bool) {
        if self.push_connected == connected {
            return;
        }
        self.push_connected = connected;
        if connected {
            info!("Push channel connected, polling suspended");
        } else {
            info!("Push channel lost, polling resumed");
        }
    }
}

async fn fetch_authoritative(source: &dyn PlaybackSource) -> FetchOutcome {
    if !source.is_authenticated().await && !source.initialize_authentication().await {
        return FetchOutcome::NeedsAuth;
    }
    match source.fetch_current_playback().await {
        Ok(raw) => FetchOutcome::Snapshot(raw),
        Err(e) if e.is_auth() => FetchOutcome::NeedsAuth,
        Err(e) => FetchOutcome::Failed(e.to_string()),
    }
}
