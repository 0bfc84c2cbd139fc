//! The single authoritative playback record.
//!
//! Only the reconciliation path writes here, through [`PlaybackStateStore::apply_snapshot`]
//! and [`PlaybackStateStore::apply_like_status`].  Everything else reads.

use nowplaying_proto::playback::{PlaybackView, RawPlayback};
use tracing::debug;

use crate::interpolate::{estimate_progress, InterpolationState, TrackDetails};
use crate::timers::TimerHandle;

/// Observed-vs-expected progress divergence that counts as a seek.
pub const SEEK_THRESHOLD_MS: i64 = 1000;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackSnapshot {
    pub track_id: Option<String>,
    pub track: Option<TrackDetails>,
    pub is_active: bool,
    pub is_playing: bool,
    pub progress_at_last_update: u64,
    pub last_api_update_time: u64,
    pub duration_ms: u64,
    pub is_liked: Option<bool>,
    pub last_checked_track_id: Option<String>,
}

/// What changed in one [`PlaybackStateStore::apply_snapshot`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotDiff {
    pub track_changed: bool,
    pub liked_status_changed: bool,
    pub seek_occurred: bool,
    pub play_state_changed: bool,
    pub duration_changed: bool,
    /// Set when this is the first snapshot for a track: the caller should
    /// look up its like status.  Issued at most once per distinct track.
    pub like_check: Option<String>,
}

impl SnapshotDiff {
    /// Whether the song-end timer needs re-sizing.
    pub fn timing_changed(&self) -> bool {
        self.track_changed || self.seek_occurred || self.play_state_changed || self.duration_changed
    }

    pub fn like_view_changed(&self) -> bool {
        self.track_changed || self.liked_status_changed
    }
}

#[derive(Default)]
pub struct PlaybackStateStore {
    snapshot: PlaybackSnapshot,
    song_end: Option<TimerHandle>,
}

impl PlaybackStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> &PlaybackSnapshot {
        &self.snapshot
    }

    /// Fold one authoritative reading (or "nothing playing") into the record.
    pub fn apply_snapshot(&mut self, raw: Option<&RawPlayback>, now_ms: u64) -> SnapshotDiff {
        let prev = self.snapshot.clone();
        let s = &mut self.snapshot;

        match raw {
            Some(raw) => {
                s.track_id = Some(raw.track_id.clone());
                s.track = Some(TrackDetails::from(raw));
                s.is_active = true;
                s.is_playing = raw.is_playing;
                s.duration_ms = raw.duration_ms;
                s.progress_at_last_update = if raw.duration_ms > 0 {
                    raw.progress_ms.min(raw.duration_ms)
                } else {
                    raw.progress_ms
                };
            }
            None => {
                s.track_id = None;
                s.track = None;
                s.is_active = false;
                s.is_playing = false;
                s.duration_ms = 0;
                s.progress_at_last_update = 0;
            }
        }
        s.last_api_update_time = now_ms;

        let track_changed = prev.track_id != s.track_id;
        if track_changed {
            s.is_liked = None;
        }
        if !s.is_active {
            s.is_liked = None;
            s.last_checked_track_id = None;
        }

        let seek_occurred = !track_changed
            && prev.is_playing
            && s.is_playing
            && prev.last_api_update_time > 0
            && is_seek(
                prev.progress_at_last_update,
                prev.last_api_update_time,
                s.progress_at_last_update,
                now_ms,
            );

        let like_check = match &s.track_id {
            Some(id) if s.last_checked_track_id.as_ref() != Some(id) => {
                s.last_checked_track_id = Some(id.clone());
                Some(id.clone())
            }
            _ => None,
        };

        let diff = SnapshotDiff {
            track_changed,
            liked_status_changed: prev.is_liked != s.is_liked,
            seek_occurred,
            play_state_changed: prev.is_playing != s.is_playing,
            duration_changed: prev.duration_ms != s.duration_ms,
            like_check,
        };
        if diff != SnapshotDiff::default() {
            debug!("Snapshot applied: {:?}", diff);
        }
        diff
    }

    /// Record a like status for `track_id`.  Ignored when the track is no
    /// longer current.  Returns whether the stored status changed.
    pub fn apply_like_status(&mut self, track_id: &str, liked: Option<bool>) -> bool {
        if self.snapshot.track_id.as_deref() != Some(track_id) {
            debug!("Dropping like status for stale track {}", track_id);
            return false;
        }
        let changed = self.snapshot.is_liked != liked;
        self.snapshot.is_liked = liked;
        changed
    }

    /// The part of the record a now-playing key mirrors.
    pub fn interpolation_state(&self) -> InterpolationState {
        InterpolationState {
            track: self.snapshot.track.clone(),
            last_api_update_time: self.snapshot.last_api_update_time,
            progress_at_last_update: self.snapshot.progress_at_last_update,
            duration_ms: self.snapshot.duration_ms,
        }
    }

    pub fn estimated_progress(&self, now_ms: u64) -> u64 {
        estimate_progress(&self.interpolation_state(), self.snapshot.is_playing, now_ms)
    }

    pub fn view(&self, now_ms: u64) -> PlaybackView {
        let s = &self.snapshot;
        PlaybackView {
            track_id: s.track_id.clone(),
            title: s.track.as_ref().map(|t| t.title.clone()),
            artist: s.track.as_ref().map(|t| t.artist.clone()),
            album_art_url: s.track.as_ref().and_then(|t| t.album_art_url.clone()),
            is_active: s.is_active,
            is_playing: s.is_playing,
            progress_ms: self.estimated_progress(now_ms),
            duration_ms: s.duration_ms,
            is_liked: s.is_liked,
        }
    }

    pub fn song_end_armed(&self) -> bool {
        self.song_end.is_some()
    }

    pub fn song_end_timer_id(&self) -> Option<u64> {
        self.song_end.as_ref().map(|t| t.id())
    }

    /// Only the song-end scheduler touches the slot.
    pub(crate) fn song_end_slot(&mut self) -> &mut Option<TimerHandle> {
        &mut self.song_end
    }
}

fn is_seek(old_progress: u64, old_time: u64, new_progress: u64, now_ms: u64) -> bool {
    let observed = new_progress as i64 - old_progress as i64;
    let elapsed = now_ms as i64 - old_time as i64;
    (observed - elapsed).abs() > SEEK_THRESHOLD_MS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(track: &str, progress: u64, playing: bool) -> RawPlayback {
        RawPlayback {
            track_id: track.to_string(),
            title: format!("Title {}", track),
            artist_names: vec!["Artist".into()],
            album_art_url: None,
            is_playing: playing,
            progress_ms: progress,
            duration_ms: 200_000,
        }
    }

    #[test]
    fn test_first_snapshot() {
        let mut store = PlaybackStateStore::new();
        let diff = store.apply_snapshot(Some(&raw("x", 0, true)), 1_000);
        assert!(diff.track_changed);
        assert!(diff.play_state_changed);
        assert!(diff.duration_changed);
        assert!(!diff.seek_occurred);
        assert_eq!(diff.like_check.as_deref(), Some("x"));
        assert!(store.snapshot().is_active);
        assert_eq!(store.snapshot().last_api_update_time, 1_000);
    }

    #[test]
    fn test_seek_detected() {
        let mut store = PlaybackStateStore::new();
        store.apply_snapshot(Some(&raw("x", 10_000, true)), 100_000);
        let diff = store.apply_snapshot(Some(&raw("x", 90_000, true)), 104_000);
        assert!(diff.seek_occurred);
        assert!(!diff.track_changed);
    }

    #[test]
    fn test_natural_drift_is_not_a_seek() {
        let mut store = PlaybackStateStore::new();
        store.apply_snapshot(Some(&raw("x", 10_000, true)), 100_000);
        let diff = store.apply_snapshot(Some(&raw("x", 14_900, true)), 104_000);
        assert!(!diff.seek_occurred);
        assert_eq!(diff, SnapshotDiff::default());
    }

    #[test]
    fn test_no_seek_across_pause() {
        let mut store = PlaybackStateStore::new();
        store.apply_snapshot(Some(&raw("x", 10_000, false)), 100_000);
        let diff = store.apply_snapshot(Some(&raw("x", 90_000, true)), 104_000);
        assert!(!diff.seek_occurred);
        assert!(diff.play_state_changed);
    }

    #[test]
    fn test_track_change_resets_like() {
        let mut store = PlaybackStateStore::new();
        store.apply_snapshot(Some(&raw("x", 0, true)), 1_000);
        assert!(store.apply_like_status("x", Some(true)));
        let diff = store.apply_snapshot(Some(&raw("y", 0, true)), 2_000);
        assert!(diff.track_changed);
        assert!(diff.liked_status_changed);
        assert_eq!(store.snapshot().is_liked, None);
        assert_eq!(diff.like_check.as_deref(), Some("y"));
    }

    #[test]
    fn test_like_lookup_once_per_track() {
        let mut store = PlaybackStateStore::new();
        let first = store.apply_snapshot(Some(&raw("x", 0, true)), 1_000);
        let second = store.apply_snapshot(Some(&raw("x", 4_000, true)), 5_000);
        assert!(first.like_check.is_some());
        assert!(second.like_check.is_none());
    }

    #[test]
    fn test_stale_like_status_ignored() {
        let mut store = PlaybackStateStore::new();
        store.apply_snapshot(Some(&raw("y", 0, true)), 1_000);
        assert!(!store.apply_like_status("x", Some(true)));
        assert_eq!(store.snapshot().is_liked, None);
    }

    #[test]
    fn test_going_inactive_resets_like_bookkeeping() {
        let mut store = PlaybackStateStore::new();
        store.apply_snapshot(Some(&raw("x", 0, true)), 1_000);
        store.apply_like_status("x", Some(false));
        let diff = store.apply_snapshot(None, 2_000);
        assert!(diff.track_changed);
        assert!(diff.play_state_changed);
        let s = store.snapshot();
        assert!(!s.is_active);
        assert_eq!(s.is_liked, None);
        assert_eq!(s.last_checked_track_id, None);

        // Same track coming back is looked up again.
        let diff = store.apply_snapshot(Some(&raw("x", 0, true)), 3_000);
        assert_eq!(diff.like_check.as_deref(), Some("x"));
    }

    #[test]
    fn test_progress_clamped_to_duration() {
        let mut store = PlaybackStateStore::new();
        store.apply_snapshot(Some(&raw("x", 250_000, false)), 1_000);
        assert_eq!(store.snapshot().progress_at_last_update, 200_000);
    }

    #[test]
    fn test_view_interpolates() {
        let mut store = PlaybackStateStore::new();
        store.apply_snapshot(Some(&raw("x", 1_000, true)), 10_000);
        let view = store.view(12_000);
        assert_eq!(view.progress_ms, 3_000);
        assert_eq!(view.title.as_deref(), Some("Title x"));
        assert_eq!(view.artist.as_deref(), Some("Artist"));
    }
}
