//! Playback backends.  Both speak the same [`PlaybackSource`] contract so
//! the engine never knows which one it is talking to.

pub mod spotify;
pub mod tokens;
pub mod ytmd;

use async_trait::async_trait;
use nowplaying_proto::config::{BackendKind, Config};
use nowplaying_proto::library::{PlaylistPage, SearchKind, SearchResults};
use nowplaying_proto::playback::{RawPlayback, TransportAction};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::SourceError;

/// Messages from a backend's push channel.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    Connected,
    Disconnected,
    State(Option<RawPlayback>),
}

#[async_trait]
pub trait PlaybackSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn is_authenticated(&self) -> bool;

    /// Silent login from stored credentials, refreshing them if needed.
    async fn initialize_authentication(&self) -> bool;

    /// `Ok(None)` when nothing is loaded.
    async fn fetch_current_playback(&self) -> Result<Option<RawPlayback>, SourceError>;

    /// `Ok(None)` when the status cannot be determined.
    async fn check_liked(&self, track_id: &str) -> Result<Option<bool>, SourceError>;

    async fn set_liked(&self, track_id: &str, liked: bool) -> Result<(), SourceError>;

    async fn control_transport(&self, action: TransportAction) -> Result<(), SourceError>;

    async fn user_playlists(&self, _limit: u32, _offset: u32) -> Result<PlaylistPage, SourceError> {
        Err(SourceError::Unsupported {
            backend: self.name(),
            feature: "playlists",
        })
    }

    async fn search(
        &self,
        _query: &str,
        _kinds: &[SearchKind],
        _limit: u32,
        _offset: u32,
    ) -> Result<SearchResults, SourceError> {
        Err(SourceError::Unsupported {
            backend: self.name(),
            feature: "search",
        })
    }

    /// Start the backend's push channel, if it has one.  The channel closes
    /// once `cancel` fires.
    fn subscribe_state_changes(
        &self,
        _cancel: CancellationToken,
    ) -> Option<mpsc::Receiver<PushEvent>> {
        None
    }
}

pub fn build_source(config: &Config) -> anyhow::Result<Arc<dyn PlaybackSource>> {
    let source: Arc<dyn PlaybackSource> = match config.backend.kind {
        BackendKind::Spotify => Arc::new(spotify::SpotifySource::new(config.spotify.clone())?),
        BackendKind::Ytmd => Arc::new(ytmd::YtmdSource::new(config.ytmd.clone())?),
    };
    Ok(source)
}

/// Shared client settings for both backends.
pub(crate) fn http_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("nowplaying-plugin/", env!("CARGO_PKG_VERSION")))
        .timeout(std::time::Duration::from_secs(10))
        .build()
}
