//! Routes daemon push events to monitors.

use dashmap::DashMap;
use tokio::sync::mpsc;

use super::Event;
use crate::model::DownloadStatus;

/// Status change pushed by the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    /// Job the event is about.
    pub gid: String,
    /// Status implied by the event.
    pub status: DownloadStatus,
}

/// gid to monitor channel registry.
#[derive(Debug, Default)]
pub struct Notifier {
    subscribers: DashMap<String, mpsc::Sender<StatusEvent>>,
}

impl Notifier {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes events for `gid` to `target`, replacing any previous
    /// subscriber.
    pub fn subscribe(&self, gid: &str, target: mpsc::Sender<StatusEvent>) {
        self.subscribers.insert(gid.to_string(), target);
    }

    /// Stops routing events for `gid`.
    pub fn unsubscribe(&self, gid: &str) {
        self.subscribers.remove(gid);
    }

    /// Re-keys a subscription after the daemon replaced a job.
    pub fn resubscribe(&self, from: &str, to: &str) {
        if let Some((_, target)) = self.subscribers.remove(from) {
            self.subscribers.insert(to.to_string(), target);
        }
    }

    /// Whether anyone listens for `gid`.
    #[must_use]
    pub fn is_subscribed(&self, gid: &str) -> bool {
        self.subscribers.contains_key(gid)
    }

    /// Delivers `status` for every event with a subscriber. A monitor with
    /// a full queue already has a wake-up pending, so the event is dropped.
    pub fn notify(&self, events: &[Event], status: DownloadStatus) {
        for event in events {
            let Some(target) = self.subscribers.get(&event.gid) else {
                continue;
            };
            let delivered = target.try_send(StatusEvent {
                gid: event.gid.clone(),
                status,
            });
            if let Err(e) = delivered {
                tracing::debug!(gid = %event.gid, error = %e, "status event dropped");
            }
        }
    }

    /// `aria2.onDownloadStart`.
    pub fn on_download_start(&self, events: &[Event]) {
        self.notify(events, DownloadStatus::Downloading);
    }

    /// `aria2.onDownloadPause`.
    pub fn on_download_pause(&self, events: &[Event]) {
        self.notify(events, DownloadStatus::Paused);
    }

    /// `aria2.onDownloadStop`.
    pub fn on_download_stop(&self, events: &[Event]) {
        self.notify(events, DownloadStatus::Canceled);
    }

    /// `aria2.onDownloadComplete`.
    pub fn on_download_complete(&self, events: &[Event]) {
        self.notify(events, DownloadStatus::Complete);
    }

    /// `aria2.onDownloadError`.
    pub fn on_download_error(&self, events: &[Event]) {
        self.notify(events, DownloadStatus::Error);
    }

    /// `aria2.onBtDownloadComplete`.
    pub fn on_bt_download_complete(&self, events: &[Event]) {
        self.notify(events, DownloadStatus::Complete);
    }

    /// Dispatches a daemon notification by its method name. Returns false
    /// for unknown methods.
    pub fn dispatch(&self, method: &str, events: &[Event]) -> bool {
        match method {
            "aria2.onDownloadStart" => self.on_download_start(events),
            "aria2.onDownloadPause" => self.on_download_pause(events),
            "aria2.onDownloadStop" => self.on_download_stop(events),
            "aria2.onDownloadComplete" => self.on_download_complete(events),
            "aria2.onDownloadError" => self.on_download_error(events),
            "aria2.onBtDownloadComplete" => self.on_bt_download_complete(events),
            _ => return false,
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events(gids: &[&str]) -> Vec<Event> {
        gids.iter().map(|g| Event { gid: (*g).to_string() }).collect()
    }

    #[tokio::test]
    async fn test_routes_by_gid() {
        let notifier = Notifier::new();
        let (tx, mut rx) = mpsc::channel(4);
        notifier.subscribe("a", tx);

        notifier.on_download_complete(&events(&["a", "b"]));

        let event = rx.recv().await.expect("event");
        assert_eq!(event, StatusEvent { gid: "a".to_string(), status: DownloadStatus::Complete });
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let notifier = Notifier::new();
        let (tx, mut rx) = mpsc::channel(4);
        notifier.subscribe("a", tx);
        notifier.unsubscribe("a");

        notifier.on_download_start(&events(&["a"]));
        assert!(rx.try_recv().is_err());
        assert!(!notifier.is_subscribed("a"));
    }

    #[tokio::test]
    async fn test_resubscribe_moves_channel() {
        let notifier = Notifier::new();
        let (tx, mut rx) = mpsc::channel(4);
        notifier.subscribe("magnet", tx);
        notifier.resubscribe("magnet", "torrent");

        notifier.on_download_error(&events(&["magnet", "torrent"]));

        assert_eq!(rx.recv().await.map(|e| e.gid), Some("torrent".to_string()));
        assert!(!notifier.is_subscribed("magnet"));
    }

    #[test]
    fn test_full_queue_drops_event() {
        let notifier = Notifier::new();
        let (tx, _rx) = mpsc::channel(1);
        notifier.subscribe("a", tx);

        notifier.on_download_pause(&events(&["a"]));
        notifier.on_download_pause(&events(&["a"]));
    }

    #[test]
    fn test_dispatch_rejects_unknown_method() {
        let notifier = Notifier::new();
        assert!(notifier.dispatch("aria2.onDownloadStart", &events(&["x"])));
        assert!(!notifier.dispatch("aria2.onSomething", &events(&["x"])));
    }
}
