use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::store::RoomStore;
use super::sync::RoomSync;

/// Decides which progress values are worth sending: two decimals, changes only.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProgressTracker {
    last_published: f64,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            last_published: -1.0,
        }
    }

    pub fn round(progress: f64) -> f64 {
        if !progress.is_finite() {
            return 0.0;
        }
        (progress.clamp(0.0, 1.0) * 100.0).round() / 100.0
    }

    /// The rounded value when it differs from the last one published.
    pub fn pending(&self, progress: f64) -> Option<f64> {
        let rounded = Self::round(progress);
        (rounded != self.last_published).then_some(rounded)
    }

    /// Records a value the store accepted. Failed writes are never marked, so
    /// the next tick sends them again.
    pub fn mark_published(&mut self, value: f64) {
        self.last_published = value;
    }

    pub fn reset(&mut self) {
        self.last_published = -1.0;
    }
}

/// Background task that pushes the local player's progress to the room.
#[derive(Debug)]
pub struct ProgressPublisher {
    handle: JoinHandle<()>,
}

impl ProgressPublisher {
    pub fn spawn<S: RoomStore>(
        sync: RoomSync<S>,
        code: String,
        player_id: String,
        mut progress: watch::Receiver<f64>,
        period: Duration,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut tracker = ProgressTracker::new();
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if progress.has_changed().is_err() {
                    break;
                }
                let current = *progress.borrow_and_update();
                let Some(value) = tracker.pending(current) else {
                    continue;
                };
                match sync.set_player_progress(&code, &player_id, value).await {
                    Ok(()) => tracker.mark_published(value),
                    Err(err) => {
                        tracing::debug!(room = %code, player = %player_id, error = %err, "[progress] publish failed");
                    }
                }
            }
        });
        Self { handle }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    pub fn stop(self) {}
}

impl Drop for ProgressPublisher {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::room::store::MemoryRoomStore;

    #[test]
    fn tracker_rounds_and_skips_repeats() {
        let mut tracker = ProgressTracker::new();
        assert_eq!(tracker.pending(0.0), Some(0.0));
        tracker.mark_published(0.0);
        assert_eq!(tracker.pending(0.001), None);
        assert_eq!(tracker.pending(0.333), Some(0.33));
        tracker.mark_published(0.33);
        assert_eq!(tracker.pending(0.334), None);
        assert_eq!(tracker.pending(0.999), Some(1.0));
        assert_eq!(tracker.pending(f64::NAN), Some(0.0));
        tracker.reset();
        assert_eq!(tracker.pending(0.0), Some(0.0));
    }

    #[test]
    fn unmarked_value_stays_pending() {
        let tracker = ProgressTracker::new();
        assert_eq!(tracker.pending(0.5), Some(0.5));
        assert_eq!(tracker.pending(0.5), Some(0.5));
    }

    #[tokio::test]
    async fn publisher_sends_rounded_progress_until_stopped() {
        let sync = RoomSync::new(Arc::new(MemoryRoomStore::new()));
        let code = sync.create_room("A", "Alice").await.expect("create");
        let (tx, rx) = watch::channel(0.0);
        let publisher =
            ProgressPublisher::spawn(sync.clone(), code.clone(), "A".to_string(), rx, Duration::from_millis(10));

        tx.send(0.456).expect("send");
        tokio::time::sleep(Duration::from_millis(80)).await;
        let room = sync.get_room(&code).await.expect("room");
        assert_eq!(room.player("A").map(|p| p.progress), Some(0.46));

        assert!(publisher.is_running());
        publisher.stop();
        tx.send(0.9).expect("send");
        tokio::time::sleep(Duration::from_millis(50)).await;
        let room = sync.get_room(&code).await.expect("room");
        assert_eq!(room.player("A").map(|p| p.progress), Some(0.46));
    }

    #[tokio::test]
    async fn publisher_survives_store_outage() {
        let store = Arc::new(MemoryRoomStore::new());
        let sync = RoomSync::new(Arc::clone(&store));
        let code = sync.create_room("A", "Alice").await.expect("create");
        let (tx, rx) = watch::channel(0.0);
        let publisher =
            ProgressPublisher::spawn(sync.clone(), code.clone(), "A".to_string(), rx, Duration::from_millis(10));

        store.set_available(false);
        tx.send(0.2).expect("send");
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(publisher.is_running());

        store.set_available(true);
        tx.send(0.7).expect("send");
        tokio::time::sleep(Duration::from_millis(60)).await;
        let room = sync.get_room(&code).await.expect("room");
        assert_eq!(room.player("A").map(|p| p.progress), Some(0.7));
    }

    #[tokio::test]
    async fn unchanged_progress_is_resent_after_an_outage() {
        let store = Arc::new(MemoryRoomStore::new());
        let sync = RoomSync::new(Arc::clone(&store));
        let code = sync.create_room("A", "Alice").await.expect("create");
        let (tx, rx) = watch::channel(0.0);
        let _publisher =
            ProgressPublisher::spawn(sync.clone(), code.clone(), "A".to_string(), rx, Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(30)).await;

        store.set_available(false);
        tx.send(0.5).expect("send");
        tokio::time::sleep(Duration::from_millis(40)).await;

        store.set_available(true);
        tokio::time::sleep(Duration::from_millis(100)).await;
        let room = sync.get_room(&code).await.expect("room");
        assert_eq!(room.player("A").map(|p| p.progress), Some(0.5));
    }
}
