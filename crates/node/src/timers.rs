//! Timer management for the production runner.
//!
//! Each armed timer is a tokio task that sleeps and then pushes the
//! matching event onto the dedicated timer channel. Re-arming a live
//! timer replaces it.

use arbor_core::{Event, TimerId};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

fn timer_event(id: TimerId) -> Event {
    match id {
        TimerId::FetchTick => Event::FetchTick,
        TimerId::Stats => Event::StatsTick,
    }
}

/// Arms and cancels the engine's timers.
pub struct TimerManager {
    timers: HashMap<TimerId, JoinHandle<()>>,
    event_tx: mpsc::Sender<Event>,
}

impl TimerManager {
    pub fn new(event_tx: mpsc::Sender<Event>) -> Self {
        TimerManager {
            timers: HashMap::new(),
            event_tx,
        }
    }

    /// Arm a timer, replacing any live timer with the same id.
    pub fn set_timer(&mut self, id: TimerId, duration: Duration) {
        self.cancel_timer(id);
        let event_tx = self.event_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            trace!(?id, "timer fired");
            let _ = event_tx.send(timer_event(id)).await;
        });
        self.timers.insert(id, handle);
    }

    pub fn cancel_timer(&mut self, id: TimerId) {
        if let Some(handle) = self.timers.remove(&id) {
            handle.abort();
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, handle) in self.timers.drain() {
            handle.abort();
        }
    }

    pub fn active_count(&self) -> usize {
        self.timers.len()
    }
}

impl Drop for TimerManager {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn timer_fires_with_matching_event() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut timers = TimerManager::new(tx);
        timers.set_timer(TimerId::FetchTick, Duration::from_millis(5));

        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timeout")
            .expect("channel open");
        assert!(matches!(event, Event::FetchTick));
    }

    #[tokio::test]
    async fn cancelled_timer_stays_quiet() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut timers = TimerManager::new(tx);
        timers.set_timer(TimerId::Stats, Duration::from_millis(20));
        timers.cancel_timer(TimerId::Stats);
        assert_eq!(timers.active_count(), 0);

        let quiet = tokio::time::timeout(Duration::from_millis(80), rx.recv()).await;
        assert!(quiet.is_err());
    }

    #[tokio::test]
    async fn rearming_replaces_the_pending_timer() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut timers = TimerManager::new(tx);
        timers.set_timer(TimerId::Stats, Duration::from_secs(30));
        timers.set_timer(TimerId::Stats, Duration::from_millis(5));
        assert_eq!(timers.active_count(), 1);

        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timeout")
            .expect("channel open");
        assert!(matches!(event, Event::StatsTick));
    }
}
