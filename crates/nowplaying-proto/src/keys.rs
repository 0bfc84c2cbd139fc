//! Per-key configuration.
//!
//! The host hands every key over with a free-form `data` bag holding the
//! user's saved preferences.  That bag is read exactly once, when the key
//! registers, into one of the typed configs below.  Missing or malformed
//! fields fall back to defaults so a bad preference never blocks a key.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::warn;

use crate::config::TimingConfig;

/// Which widget a key shows, derived from the last segment of its `cid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyKind {
    NowPlaying,
    Like,
    Counter,
}

impl KeyKind {
    /// `com.vendor.plugin.nowplaying` → `NowPlaying`.
    pub fn from_cid(cid: &str) -> Option<Self> {
        match cid.rsplit('.').next()? {
            "nowplaying" => Some(Self::NowPlaying),
            "like" => Some(Self::Like),
            "counter" => Some(Self::Counter),
            _ => None,
        }
    }

    pub fn default_width(&self) -> u32 {
        match self {
            Self::NowPlaying => 360,
            Self::Like | Self::Counter => 80,
        }
    }
}

/// `#RRGGBB` colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rgb(pub [u8; 3]);

impl Rgb {
    pub const SPOTIFY_GREEN: Rgb = Rgb([0x1d, 0xb9, 0x54]);
    pub const WHITE: Rgb = Rgb([0xff, 0xff, 0xff]);

    pub fn parse(s: &str) -> Option<Self> {
        let hex = s.trim().strip_prefix('#')?;
        if hex.len() != 6 || !hex.is_ascii() {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
        Some(Self([channel(0)?, channel(2)?, channel(4)?]))
    }
}

impl TryFrom<String> for Rgb {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("invalid colour '{}'", value))
    }
}

impl From<Rgb> for String {
    fn from(value: Rgb) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, g, b] = self.0;
        write!(f, "#{:02X}{:02X}{:02X}", r, g, b)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NowPlayingConfig {
    pub update_interval_ms: u64,
    pub interpolation_interval_ms: u64,
    pub show_artist: bool,
    pub show_progress: bool,
    pub show_title: bool,
    pub show_play_pause: bool,
    pub show_time: bool,
    pub progress_color: Rgb,
    pub title_font_size: u32,
    pub artist_font_size: u32,
    pub time_font_size: u32,
}

impl NowPlayingConfig {
    pub fn defaults(timing: &TimingConfig) -> Self {
        Self {
            update_interval_ms: timing.fetch_interval_ms,
            interpolation_interval_ms: timing.interpolation_interval_ms,
            show_artist: true,
            show_progress: true,
            show_title: true,
            show_play_pause: true,
            show_time: true,
            progress_color: Rgb::SPOTIFY_GREEN,
            title_font_size: 18,
            artist_font_size: 14,
            time_font_size: 10,
        }
    }

    pub fn from_data(data: &Value, timing: &TimingConfig) -> Self {
        let d = Self::defaults(timing);
        let bag = DataBag(data);
        Self {
            update_interval_ms: bag
                .millis("updateInterval", d.update_interval_ms)
                .max(MIN_INTERVAL_MS),
            interpolation_interval_ms: bag
                .millis("interpolationInterval", d.interpolation_interval_ms)
                .max(MIN_INTERVAL_MS),
            show_artist: bag.flag("showArtist", d.show_artist),
            show_progress: bag.flag("showProgress", d.show_progress),
            show_title: bag.flag("showTitle", d.show_title),
            show_play_pause: bag.flag("showPlayPause", d.show_play_pause),
            show_time: bag.flag("showTime", d.show_time),
            progress_color: bag.color("progressColor", d.progress_color),
            title_font_size: bag.font_size("titleFontSize", d.title_font_size),
            artist_font_size: bag.font_size("artistFontSize", d.artist_font_size),
            time_font_size: bag.font_size("timeFontSize", d.time_font_size),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LikeConfig {
    pub show_status_text: bool,
    pub liked_color: Rgb,
    pub unliked_color: Rgb,
}

impl Default for LikeConfig {
    fn default() -> Self {
        Self {
            show_status_text: false,
            liked_color: Rgb::SPOTIFY_GREEN,
            unliked_color: Rgb::WHITE,
        }
    }
}

impl LikeConfig {
    pub fn from_data(data: &Value) -> Self {
        let d = Self::default();
        let bag = DataBag(data);
        Self {
            show_status_text: bag.flag("showStatusText", d.show_status_text),
            liked_color: bag.color("likedColor", d.liked_color),
            unliked_color: bag.color("unlikedColor", d.unliked_color),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterConfig {
    pub range_min: i64,
    pub range_max: i64,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            range_min: 0,
            range_max: 10,
        }
    }
}

impl CounterConfig {
    pub fn from_data(data: &Value) -> Self {
        let d = Self::default();
        let bag = DataBag(data);
        let range_min = bag.integer("rangeMin", d.range_min);
        let range_max = bag.integer("rangeMax", d.range_max);
        if range_max < range_min {
            warn!(
                "counter rangeMax {} below rangeMin {}, using defaults",
                range_max, range_min
            );
            return d;
        }
        Self {
            range_min,
            range_max,
        }
    }

    /// Next value after a click, wrapping past the top of the range.
    pub fn next(&self, current: i64) -> i64 {
        let next = current.saturating_add(1);
        if next > self.range_max {
            self.range_min
        } else {
            next
        }
    }
}

/// Typed configuration for one key, fixed at registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum KeyConfig {
    NowPlaying(NowPlayingConfig),
    Like(LikeConfig),
    Counter(CounterConfig),
}

impl KeyConfig {
    pub fn from_host(kind: KeyKind, data: &Value, timing: &TimingConfig) -> Self {
        match kind {
            KeyKind::NowPlaying => Self::NowPlaying(NowPlayingConfig::from_data(data, timing)),
            KeyKind::Like => Self::Like(LikeConfig::from_data(data)),
            KeyKind::Counter => Self::Counter(CounterConfig::from_data(data)),
        }
    }

    pub fn kind(&self) -> KeyKind {
        match self {
            Self::NowPlaying(_) => KeyKind::NowPlaying,
            Self::Like(_) => KeyKind::Like,
            Self::Counter(_) => KeyKind::Counter,
        }
    }
}

const MIN_INTERVAL_MS: u64 = 100;

/// Lenient accessors over the host's data bag.  Hosts store numbers as
/// strings often enough that both forms are accepted.
struct DataBag<'a>(&'a Value);

impl DataBag<'_> {
    fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field).filter(|v| !v.is_null())
    }

    fn flag(&self, field: &str, default: bool) -> bool {
        match self.get(field) {
            None => default,
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) if s == "true" => true,
            Some(Value::String(s)) if s == "false" => false,
            Some(other) => {
                warn!("key data {}={} is not a boolean, using {}", field, other, default);
                default
            }
        }
    }

    fn integer(&self, field: &str, default: i64) -> i64 {
        match self.get(field) {
            None => default,
            Some(Value::Number(n)) => n.as_i64().unwrap_or(default),
            Some(Value::String(s)) => s.trim().parse().unwrap_or_else(|_| {
                warn!("key data {}='{}' is not an integer, using {}", field, s, default);
                default
            }),
            Some(other) => {
                warn!("key data {}={} is not an integer, using {}", field, other, default);
                default
            }
        }
    }

    fn millis(&self, field: &str, default: u64) -> u64 {
        let value = self.integer(field, default as i64);
        if value <= 0 {
            default
        } else {
            value as u64
        }
    }

    fn font_size(&self, field: &str, default: u32) -> u32 {
        let value = self.integer(field, default as i64);
        if (1..=96).contains(&value) {
            value as u32
        } else {
            default
        }
    }

    fn color(&self, field: &str, default: Rgb) -> Rgb {
        match self.get(field) {
            None => default,
            Some(Value::String(s)) => Rgb::parse(s).unwrap_or_else(|| {
                warn!("key data {}='{}' is not a #RRGGBB colour, using {}", field, s, default);
                default
            }),
            Some(other) => {
                warn!("key data {}={} is not a colour, using {}", field, other, default);
                default
            }
        }
    }
}
