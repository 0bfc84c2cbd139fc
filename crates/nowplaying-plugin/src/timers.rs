//! Timers are plain tokio tasks that post an event into the engine loop.
//!
//! A [`TimerHandle`] owns its task: dropping or replacing the handle aborts
//! the task, so a key can never hold two live timers of the same kind.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
pub struct TimerHandle {
    id: u64,
    task: JoinHandle<()>,
}

impl TimerHandle {
    pub fn id(&self) -> u64 {
        self.id
    }
}

fn next_id() -> u64 {
    NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed)
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Post `make_event()` every `period`, first firing one period from now.
pub fn every<E, F>(period: Duration, tx: mpsc::Sender<E>, make_event: F) -> TimerHandle
where
    E: Send + 'static,
    F: Fn() -> E + Send + 'static,
{
    let period = period.max(Duration::from_millis(1));
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if tx.send(make_event()).await.is_err() {
                break;
            }
        }
    });
    TimerHandle { id: next_id(), task }
}

/// Post `event` once after `delay`.
pub fn once<E>(delay: Duration, tx: mpsc::Sender<E>, event: E) -> TimerHandle
where
    E: Send + 'static,
{
    once_tagged(delay, tx, |_| event)
}

/// Like [`once`], with the event built from the handle's id so the
/// receiver can tell which timer it came from.
pub fn once_tagged<E, F>(delay: Duration, tx: mpsc::Sender<E>, make_event: F) -> TimerHandle
where
    E: Send + 'static,
    F: FnOnce(u64) -> E,
{
    let id = next_id();
    let event = make_event(id);
    let task = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = tx.send(event).await;
    });
    TimerHandle { id, task }
}
