use serde::{Deserialize, Serialize};

/// One authoritative reading from a playback backend, already mapped out of
/// the backend's own payload shape.  `None` at the call site means nothing
/// is loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPlayback {
    pub track_id: String,
    pub title: String,
    #[serde(default)]
    pub artist_names: Vec<String>,
    #[serde(default)]
    pub album_art_url: Option<String>,
    pub is_playing: bool,
    pub progress_ms: u64,
    pub duration_ms: u64,
}

impl RawPlayback {
    pub fn artists_joined(&self) -> String {
        self.artist_names.join(", ")
    }
}

/// On the wire: `"play"`, `"next"`, ... or `{"set-volume": 40}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportAction {
    Play,
    Pause,
    Next,
    Previous,
    /// Percent, clamped to 100 by the backends.
    SetVolume(u8),
}

impl TransportAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Play => "play",
            Self::Pause => "pause",
            Self::Next => "next",
            Self::Previous => "previous",
            Self::SetVolume(_) => "set-volume",
        }
    }
}

/// Read-only summary of the plugin's current playback record, handed to the
/// host's settings UI.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackView {
    pub track_id: Option<String>,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album_art_url: Option<String>,
    pub is_active: bool,
    pub is_playing: bool,
    pub progress_ms: u64,
    pub duration_ms: u64,
    pub is_liked: Option<bool>,
}
