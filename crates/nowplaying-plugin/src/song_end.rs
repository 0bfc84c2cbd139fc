//! One-shot refresh just after the current track should have finished.

use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use crate::store::PlaybackStateStore;
use crate::timers;

/// Delay until the song-end refresh, or `None` when nothing should be armed.
pub fn song_end_delay(
    progress_ms: u64,
    duration_ms: u64,
    is_playing: bool,
    buffer_ms: u64,
) -> Option<Duration> {
    if !is_playing || duration_ms == 0 {
        return None;
    }
    let remaining = duration_ms.saturating_sub(progress_ms);
    Some(Duration::from_millis(remaining + buffer_ms))
}

pub struct SongEndScheduler {
    buffer_ms: u64,
}

impl SongEndScheduler {
    pub fn new(buffer_ms: u64) -> Self {
        Self { buffer_ms }
    }

    /// Replace any pending song-end timer.  The event is built from the
    /// new timer's id.  Returns the scheduled delay.
    pub fn arm<E, F>(
        &self,
        store: &mut PlaybackStateStore,
        progress_ms: u64,
        duration_ms: u64,
        is_playing: bool,
        tx: &mpsc::Sender<E>,
        make_event: F,
    ) -> Option<Duration>
    where
        E: Send + 'static,
        F: FnOnce(u64) -> E,
    {
        let slot = store.song_end_slot();
        // Dropping the old handle aborts it.
        slot.take();

        let delay = song_end_delay(progress_ms, duration_ms, is_playing, self.buffer_ms)?;
        debug!("Song end armed in {:?}", delay);
        *slot = Some(timers::once_tagged(delay, tx.clone(), make_event));
        Some(delay)
    }

    pub fn disarm(&self, store: &mut PlaybackStateStore) {
        if store.song_end_slot().take().is_some() {
            debug!("Song end disarmed");
        }
    }

    /// Forget the handle of timer `id`, which has just fired.  Returns
    /// `false` when `id` is no longer the armed timer: its event was already
    /// queued when a rearm or disarm replaced it.
    pub fn fired(&self, store: &mut PlaybackStateStore, id: u64) -> bool {
        let slot = store.song_end_slot();
        if slot.as_ref().map(|t| t.id()) != Some(id) {
            return false;
        }
        slot.take();
        true
    }
}
