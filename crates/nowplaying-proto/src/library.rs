use serde::{Deserialize, Serialize};

/// Page size used when the settings UI does not ask for one.
pub const DEFAULT_PLAYLIST_LIMIT: u32 = 50;
pub const DEFAULT_SEARCH_LIMIT: u32 = 10;
/// Largest page the backends will return.
pub const MAX_PAGE_LIMIT: u32 = 50;

/// Clamp a requested page size into `1..=MAX_PAGE_LIMIT`.
pub fn page_limit(requested: Option<u32>, default: u32) -> u32 {
    requested.unwrap_or(default).clamp(1, MAX_PAGE_LIMIT)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistSummary {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub track_count: u32,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistPage {
    pub items: Vec<PlaylistSummary>,
    /// Playlists the user has in total, not just on this page.
    pub total: u32,
    pub offset: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchKind {
    Track,
    Album,
    Artist,
    Playlist,
}

impl SearchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Track => "track",
            Self::Album => "album",
            Self::Artist => "artist",
            Self::Playlist => "playlist",
        }
    }

    /// Searched when the request names no kinds.
    pub fn defaults() -> Vec<Self> {
        vec![Self::Track, Self::Album, Self::Playlist]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub id: String,
    pub name: String,
    /// Artists for tracks and albums, owner for playlists.
    #[serde(default)]
    pub subtitle: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SearchResults {
    #[serde(default)]
    pub tracks: Vec<SearchHit>,
    #[serde(default)]
    pub albums: Vec<SearchHit>,
    #[serde(default)]
    pub artists: Vec<SearchHit>,
    #[serde(default)]
    pub playlists: Vec<SearchHit>,
}
