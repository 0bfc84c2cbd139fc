pub mod artwork;
pub mod backend;
pub mod canvas;
pub mod clock;
pub mod engine;
pub mod error;
pub mod host;
pub mod interpolate;
pub mod logging;
pub mod registry;
pub mod render;
pub mod song_end;
pub mod store;
pub mod timers;
