//! Local progress estimation between authoritative fetches.

use nowplaying_proto::playback::RawPlayback;

/// What a key needs to know about the current track to draw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackDetails {
    pub track_id: String,
    pub title: String,
    pub artist: String,
    pub album_art_url: Option<String>,
}

impl From<&RawPlayback> for TrackDetails {
    fn from(raw: &RawPlayback) -> Self {
        Self {
            track_id: raw.track_id.clone(),
            title: raw.title.clone(),
            artist: raw.artists_joined(),
            album_art_url: raw.album_art_url.clone(),
        }
    }
}

/// The anchor a key interpolates from.  Copied out of the playback store
/// after every reconciliation; never written anywhere else.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterpolationState {
    pub track: Option<TrackDetails>,
    pub last_api_update_time: u64,
    pub progress_at_last_update: u64,
    pub duration_ms: u64,
}

impl InterpolationState {
    /// True once at least one authoritative reading has been copied in.
    pub fn is_synced(&self) -> bool {
        self.last_api_update_time > 0
    }
}

/// Estimated progress at `now_ms`.
///
/// Paused playback freezes the clock at the last reported position.  While
/// playing, wall-clock time since the last update is added and the result is
/// clamped to the track length.  Without a known duration or update time the
/// estimate is 0.
pub fn estimate_progress(state: &InterpolationState, is_playing: bool, now_ms: u64) -> u64 {
    if !is_playing {
        return state.progress_at_last_update;
    }
    if state.duration_ms == 0 || state.last_api_update_time == 0 {
        return 0;
    }
    let elapsed = now_ms as i128 - state.last_api_update_time as i128;
    let estimate = state.progress_at_last_update as i128 + elapsed;
    estimate.clamp(0, state.duration_ms as i128) as u64
}

/// `m:ss` for the progress clock.
pub fn format_clock(ms: u64) -> String {
    let total_secs = ms / 1000;
    format!("{}:{:02}", total_secs / 60, total_secs % 60)
}
