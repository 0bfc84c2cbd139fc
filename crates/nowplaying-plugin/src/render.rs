//! Seam between the engine and whatever turns display parameters into a
//! key image.  When a renderer fails the engine draws the fallback text
//! instead.

use nowplaying_proto::keys::{LikeConfig, NowPlayingConfig};

use crate::error::RenderError;
use crate::interpolate::format_clock;

/// An encoded image ready to hand to the host, `data:image/png;base64,...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageHandle(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackFrame {
    pub title: String,
    pub artist: String,
    pub album_art_url: Option<String>,
    pub is_playing: bool,
    pub progress_ms: u64,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NowPlayingContent {
    Loading,
    NothingPlaying,
    NeedsAuth,
    Error,
    Track(TrackFrame),
}

#[derive(Debug, Clone)]
pub struct NowPlayingFrame<'a> {
    pub width: u32,
    pub content: NowPlayingContent,
    pub style: &'a NowPlayingConfig,
}

#[derive(Debug, Clone)]
pub struct LikeBadge<'a> {
    pub width: u32,
    pub has_track: bool,
    pub is_liked: Option<bool>,
    pub style: &'a LikeConfig,
}

pub trait Renderer: Send {
    fn render_now_playing(&mut self, frame: &NowPlayingFrame<'_>)
        -> Result<ImageHandle, RenderError>;

    fn render_like_badge(&mut self, badge: &LikeBadge<'_>) -> Result<ImageHandle, RenderError>;

    /// Whether the renderer wants the bytes behind `url` fetched for it.
    fn wants_artwork(&self, _url: &str) -> bool {
        false
    }

    /// Downloaded artwork, or `None` when the download failed.
    fn accept_artwork(&mut self, _url: &str, _bytes: Option<&[u8]>) {}
}

pub fn now_playing_fallback_text(content: &NowPlayingContent) -> String {
    match content {
        NowPlayingContent::Loading => "Loading...".to_string(),
        NowPlayingContent::NothingPlaying => "Nothing playing".to_string(),
        NowPlayingContent::NeedsAuth => "Auth needed".to_string(),
        NowPlayingContent::Error => "Error".to_string(),
        NowPlayingContent::Track(t) => {
            let glyph = if t.is_playing { '▶' } else { '⏸' };
            if t.artist.is_empty() {
                format!("{} {}", t.title, glyph)
            } else {
                format!("{} - {} {}", t.title, t.artist, glyph)
            }
        }
    }
}

pub fn like_fallback_text(badge: &LikeBadge<'_>) -> String {
    if !badge.has_track {
        return "-".to_string();
    }
    match badge.is_liked {
        Some(true) => "♥".to_string(),
        Some(false) => "♡".to_string(),
        None => "?".to_string(),
    }
}

/// `1:05 / 3:20`
pub fn clock_line(progress_ms: u64, duration_ms: u64) -> String {
    format!("{} / {}", format_clock(progress_ms), format_clock(duration_ms))
}
