pub mod config;
pub mod keys;
pub mod library;
pub mod platform;
pub mod playback;
pub mod protocol;
