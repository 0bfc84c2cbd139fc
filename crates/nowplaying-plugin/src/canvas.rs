//! Default renderer: draws key images with an 8x8 bitmap font and encodes
//! them as PNG data URLs.

use base64::Engine as _;
use font8x8::UnicodeFonts;
use image::imageops::FilterType;
use image::{ImageFormat, Rgba, RgbaImage};
use nowplaying_proto::keys::Rgb;
use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use tracing::{debug, warn};

use crate::error::RenderError;
use crate::render::{
    clock_line, now_playing_fallback_text, ImageHandle, LikeBadge, NowPlayingContent,
    NowPlayingFrame, Renderer, TrackFrame,
};

pub const KEY_HEIGHT: u32 = 60;
const ART_CACHE_LIMIT: usize = 16;
const PAD: u32 = 6;

const BACKGROUND: Rgba<u8> = Rgba([18, 18, 18, 255]);
const PLACEHOLDER: Rgba<u8> = Rgba([48, 48, 48, 255]);
const TEXT: Rgba<u8> = Rgba([255, 255, 255, 255]);
const TEXT_DIM: Rgba<u8> = Rgba([170, 170, 170, 255]);
const TRACK: Rgba<u8> = Rgba([70, 70, 70, 255]);
const UNKNOWN: Rgba<u8> = Rgba([110, 110, 110, 255]);

#[derive(Default)]
pub struct CanvasRenderer {
    /// `None` marks a URL whose download or decode failed.
    artwork: HashMap<String, Option<RgbaImage>>,
    order: VecDeque<String>,
}

impl CanvasRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    fn cached_art(&self, url: Option<&str>) -> Option<&RgbaImage> {
        self.artwork.get(url?)?.as_ref()
    }

    fn draw_track(&self, img: &mut RgbaImage, frame: &NowPlayingFrame<'_>, track: &TrackFrame) {
        let style = frame.style;
        let (w, h) = img.dimensions();

        let art = KEY_HEIGHT.min(h);
        match self.cached_art(track.album_art_url.as_deref()) {
            Some(cover) => image::imageops::overlay(img, cover, 0, 0),
            None => fill_rect(img, 0, 0, art, art, PLACEHOLDER),
        }

        let left = art + PAD;
        let glyph_w = if style.show_play_pause { 12 + PAD } else { 0 };
        let text_w = w.saturating_sub(left + PAD + glyph_w);

        let mut y = 4;
        if style.show_title {
            let scale = font_scale(style.title_font_size);
            draw_text(img, left, y, &fit(&track.title, text_w, scale), scale, TEXT);
            y += 8 * scale + 3;
        }
        if style.show_artist && !track.artist.is_empty() {
            let scale = font_scale(style.artist_font_size);
            draw_text(img, left, y, &fit(&track.artist, text_w, scale), scale, TEXT_DIM);
        }

        if style.show_play_pause {
            draw_transport_glyph(img, w.saturating_sub(PAD + 12), 4, track.is_playing);
        }

        let bar_y = h.saturating_sub(16);
        let bar_w = w.saturating_sub(left + PAD);
        if style.show_progress && bar_w > 0 {
            fill_rect(img, left, bar_y, bar_w, 3, TRACK);
            if track.duration_ms > 0 {
                let done = (bar_w as u64 * track.progress_ms.min(track.duration_ms)
                    / track.duration_ms) as u32;
                fill_rect(img, left, bar_y, done, 3, rgba(style.progress_color));
            }
        }
        if style.show_time {
            let scale = font_scale(style.time_font_size);
            let line = clock_line(track.progress_ms, track.duration_ms);
            let line_w = text_width(&line, scale);
            let x = w.saturating_sub(PAD + line_w).max(left);
            draw_text(img, x, bar_y + 5, &line, scale, TEXT_DIM);
        }
    }
}

impl Renderer for CanvasRenderer {
    fn render_now_playing(
        &mut self,
        frame: &NowPlayingFrame<'_>,
    ) -> Result<ImageHandle, RenderError> {
        let mut img = blank(frame.width, KEY_HEIGHT)?;
        match &frame.content {
            NowPlayingContent::Track(track) => self.draw_track(&mut img, frame, track),
            other => draw_centered(&mut img, &now_playing_fallback_text(other), 2, TEXT),
        }
        encode_png(img)
    }

    fn render_like_badge(&mut self, badge: &LikeBadge<'_>) -> Result<ImageHandle, RenderError> {
        let mut img = blank(badge.width, KEY_HEIGHT)?;
        if !badge.has_track {
            draw_centered(&mut img, "-", 2, TEXT_DIM);
            return encode_png(img);
        }

        let (w, h) = img.dimensions();
        let label_h = if badge.style.show_status_text { 12 } else { 0 };
        let size = w.min(h - label_h).saturating_sub(2 * PAD).max(8);
        let x0 = (w - size) / 2;
        let y0 = (h - label_h - size) / 2;
        let (color, filled) = match badge.is_liked {
            Some(true) => (rgba(badge.style.liked_color), true),
            Some(false) => (rgba(badge.style.unliked_color), false),
            None => (UNKNOWN, true),
        };
        draw_heart(&mut img, x0, y0, size, color, filled);

        if badge.style.show_status_text {
            let label = match badge.is_liked {
                Some(true) => "LIKED",
                Some(false) => "LIKE",
                None => "?",
            };
            let lw = text_width(label, 1);
            draw_text(&mut img, w.saturating_sub(lw) / 2, h - 10, label, 1, TEXT_DIM);
        }
        encode_png(img)
    }

    fn wants_artwork(&self, url: &str) -> bool {
        !self.artwork.contains_key(url)
    }

    fn accept_artwork(&mut self, url: &str, bytes: Option<&[u8]>) {
        let decoded = bytes.and_then(|b| match image::load_from_memory(b) {
            Ok(img) => Some(image::imageops::resize(
                &img.to_rgba8(),
                KEY_HEIGHT,
                KEY_HEIGHT,
                FilterType::Triangle,
            )),
            Err(e) => {
                warn!("Failed to decode artwork {}: {}", url, e);
                None
            }
        });
        debug!("Artwork cached for {} (ok={})", url, decoded.is_some());

        if self.artwork.insert(url.to_string(), decoded).is_none() {
            self.order.push_back(url.to_string());
        }
        while self.order.len() > ART_CACHE_LIMIT {
            if let Some(old) = self.order.pop_front() {
                self.artwork.remove(&old);
            }
        }
    }
}

// ── Drawing helpers ──────────────────────────────────────────────────────────

fn blank(width: u32, height: u32) -> Result<RgbaImage, RenderError> {
    if width < 16 || height < 16 {
        return Err(RenderError::Degenerate { width, height });
    }
    Ok(RgbaImage::from_pixel(width, height, BACKGROUND))
}

fn encode_png(img: RgbaImage) -> Result<ImageHandle, RenderError> {
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgba8(img).write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    let b64 = base64::engine::general_purpose::STANDARD.encode(&bytes);
    Ok(ImageHandle(format!("data:image/png;base64,{}", b64)))
}

fn rgba(c: Rgb) -> Rgba<u8> {
    let [r, g, b] = c.0;
    Rgba([r, g, b, 255])
}

/// Font sizes are nominal points; the bitmap font only scales by whole steps.
fn font_scale(size: u32) -> u32 {
    (size / 8).clamp(1, 4)
}

fn text_width(text: &str, scale: u32) -> u32 {
    text.chars().count() as u32 * 9 * scale
}

/// Truncate with "..." so `text` fits in `max_w` pixels.
fn fit(text: &str, max_w: u32, scale: u32) -> String {
    let max_chars = (max_w / (9 * scale)) as usize;
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_chars {
        return text.to_string();
    }
    if max_chars <= 3 {
        return chars.into_iter().take(max_chars).collect();
    }
    chars.into_iter().take(max_chars - 3).collect::<String>() + "..."
}

fn fill_rect(img: &mut RgbaImage, x: u32, y: u32, w: u32, h: u32, color: Rgba<u8>) {
    for py in y..(y + h).min(img.height()) {
        for px in x..(x + w).min(img.width()) {
            img.put_pixel(px, py, color);
        }
    }
}

fn draw_text(img: &mut RgbaImage, x: u32, y: u32, text: &str, scale: u32, color: Rgba<u8>) {
    let mut cursor_x = x;
    for ch in text.chars() {
        let glyph = font8x8::BASIC_FONTS.get(ch).unwrap_or([0u8; 8]);
        for (row, bits) in glyph.iter().enumerate() {
            for col in 0..8u32 {
                // LSB is the leftmost column
                if (bits >> col) & 1 == 1 {
                    fill_rect(
                        img,
                        cursor_x + col * scale,
                        y + row as u32 * scale,
                        scale,
                        scale,
                        color,
                    );
                }
            }
        }
        cursor_x += 9 * scale;
        if cursor_x >= img.width() {
            break;
        }
    }
}

fn draw_centered(img: &mut RgbaImage, text: &str, scale: u32, color: Rgba<u8>) {
    let (w, h) = img.dimensions();
    let scale = if text_width(text, scale) > w { 1 } else { scale };
    let text = fit(text, w, scale);
    let x = w.saturating_sub(text_width(&text, scale)) / 2;
    let y = h.saturating_sub(8 * scale) / 2;
    draw_text(img, x, y, &text, scale, color);
}

/// 12x12 play triangle or pause bars.
fn draw_transport_glyph(img: &mut RgbaImage, x: u32, y: u32, is_playing: bool) {
    if is_playing {
        fill_rect(img, x + 2, y, 3, 12, TEXT);
        fill_rect(img, x + 7, y, 3, 12, TEXT);
    } else {
        for row in 0..12u32 {
            let reach = if row < 6 { row + 1 } else { 12 - row };
            fill_rect(img, x + 2, y + row, reach * 2, 1, TEXT);
        }
    }
}

/// Heart from the implicit curve (x²+y²-1)³ - x²y³ ≤ 0.
fn draw_heart(img: &mut RgbaImage, x0: u32, y0: u32, size: u32, color: Rgba<u8>, filled: bool) {
    let inside = |u: f32, v: f32| {
        let a = u * u + v * v - 1.0;
        a * a * a - u * u * v * v * v <= 0.0
    };
    let half = size as f32 / 2.0;
    let stroke = (size as f32 / 10.0).max(1.5) / half * 1.3;
    for py in 0..size {
        for px in 0..size {
            let u = (px as f32 + 0.5 - half) / half * 1.3;
            let v = -((py as f32 + 0.5 - half) / half * 1.3) + 0.2;
            if !inside(u, v) {
                continue;
            }
            let edge = !inside(u * (1.0 + stroke), (v - 0.2) * (1.0 + stroke) + 0.2);
            if filled || edge {
                let (x, y) = (x0 + px, y0 + py);
                if x < img.width() && y < img.height() {
                    img.put_pixel(x, y, color);
                }
            }
        }
    }
}
