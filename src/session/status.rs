//! Viewer status signal
//!
//! A single current value with replay-on-subscribe semantics. Observers are
//! notified synchronously, in subscription order, outside the state lock.
//! Deliveries (publish fan-out and the replay to a new observer) are
//! serialized, so a new observer never sees an older value after a newer one.

use futures::Stream;
use log::debug;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Lifecycle phase seen by viewers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VideoStatus {
    Loading,
    Playing,
    #[default]
    Stopped,
}

impl VideoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::Loading => "loading",
            VideoStatus::Playing => "playing",
            VideoStatus::Stopped => "stopped",
        }
    }
}

type Observer = Arc<dyn Fn(VideoStatus) + Send + Sync>;

struct SignalInner {
    current: VideoStatus,
    next_id: u64,
    observers: Vec<(u64, Observer)>,
}

/// Observable status value, initially `Stopped`
#[derive(Clone)]
pub struct StatusSignal {
    inner: Arc<Mutex<SignalInner>>,
    /// Held across update+notify and register+replay. Observers must not publish.
    delivery: Arc<Mutex<()>>,
}

impl StatusSignal {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SignalInner {
                current: VideoStatus::Stopped,
                next_id: 0,
                observers: Vec::new(),
            })),
            delivery: Arc::new(Mutex::new(())),
        }
    }

    pub fn current(&self) -> VideoStatus {
        self.inner.lock().current
    }

    /// Set a new value and notify every observer
    pub fn publish(&self, status: VideoStatus) {
        let _delivery = self.delivery.lock();
        let observers: Vec<Observer> = {
            let mut inner = self.inner.lock();
            if inner.current != status {
                debug!("Status change: {:?} -> {:?}", inner.current, status);
            }
            inner.current = status;
            inner.observers.iter().map(|(_, o)| o.clone()).collect()
        };

        for observer in observers {
            observer(status);
        }
    }

    /// Register a callback; it is invoked immediately with the current value.
    ///
    /// The callback stays registered until the returned guard is dropped.
    pub fn observe<F>(&self, observer: F) -> StatusSubscription
    where
        F: Fn(VideoStatus) + Send + Sync + 'static,
    {
        let observer: Observer = Arc::new(observer);
        let _delivery = self.delivery.lock();
        let (id, current) = {
            let mut inner = self.inner.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.observers.push((id, observer.clone()));
            (id, inner.current)
        };
        observer(current);

        StatusSubscription {
            id,
            signal: Arc::downgrade(&self.inner),
        }
    }

    /// Subscribe as an async stream; the first item is the current value
    pub fn subscribe(&self) -> StatusStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.observe(move |status| {
            let _ = tx.send(status);
        });
        StatusStream { rx, _subscription: subscription }
    }

    pub fn observer_count(&self) -> usize {
        self.inner.lock().observers.len()
    }
}

impl Default for StatusSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Registration guard; dropping it removes the observer
pub struct StatusSubscription {
    id: u64,
    signal: Weak<Mutex<SignalInner>>,
}

impl Drop for StatusSubscription {
    fn drop(&mut self) {
        if let Some(inner) = self.signal.upgrade() {
            inner.lock().observers.retain(|(id, _)| *id != self.id);
        }
    }
}

/// Async view of the status signal
pub struct StatusStream {
    rx: mpsc::UnboundedReceiver<VideoStatus>,
    _subscription: StatusSubscription,
}

impl StatusStream {
    pub async fn recv(&mut self) -> Option<VideoStatus> {
        self.rx.recv().await
    }

    /// Wait until `status` is observed
    pub async fn wait_for(&mut self, status: VideoStatus) -> bool {
        while let Some(s) = self.rx.recv().await {
            if s == status {
                return true;
            }
        }
        false
    }
}

impl Stream for StatusStream {
    type Item = VideoStatus;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_value_is_replayed() {
        let signal = StatusSignal::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = signal.observe(move |s| sink.lock().push(s));
        assert_eq!(*seen.lock(), vec![VideoStatus::Stopped]);
    }

    #[test]
    fn test_observers_notified_in_subscription_order() {
        let signal = StatusSignal::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let a = order.clone();
        let _first = signal.observe(move |s| a.lock().push(("first", s)));
        let b = order.clone();
        let _second = signal.observe(move |s| b.lock().push(("second", s)));
        order.lock().clear();

        signal.publish(VideoStatus::Loading);
        assert_eq!(
            *order.lock(),
            vec![("first", VideoStatus::Loading), ("second", VideoStatus::Loading)]
        );
        assert_eq!(signal.current(), VideoStatus::Loading);
    }

    #[test]
    fn test_late_observer_gets_latest_value() {
        let signal = StatusSignal::new();
        signal.publish(VideoStatus::Loading);
        signal.publish(VideoStatus::Playing);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = signal.observe(move |s| sink.lock().push(s));
        assert_eq!(*seen.lock(), vec![VideoStatus::Playing]);
    }

    #[test]
    fn test_dropping_subscription_unsubscribes() {
        let signal = StatusSignal::new();
        let sub = signal.observe(|_| {});
        assert_eq!(signal.observer_count(), 1);
        drop(sub);
        assert_eq!(signal.observer_count(), 0);
        signal.publish(VideoStatus::Loading);
    }

    #[tokio::test]
    async fn test_stream_replays_then_follows() {
        let signal = StatusSignal::new();
        let mut stream = signal.subscribe();
        signal.publish(VideoStatus::Loading);
        signal.publish(VideoStatus::Stopped);

        assert_eq!(stream.recv().await, Some(VideoStatus::Stopped));
        assert_eq!(stream.recv().await, Some(VideoStatus::Loading));
        assert_eq!(stream.recv().await, Some(VideoStatus::Stopped));
    }

    #[test]
    fn test_replay_never_older_than_current() {
        for _ in 0..500 {
            let signal = StatusSignal::new();
            let seen = Arc::new(Mutex::new(Vec::new()));

            let publisher = {
                let signal = signal.clone();
                std::thread::spawn(move || signal.publish(VideoStatus::Loading))
            };
            let sink = seen.clone();
            let _sub = signal.observe(move |s| sink.lock().push(s));
            publisher.join().unwrap();

            let seen = seen.lock();
            assert_eq!(seen.last(), Some(&signal.current()), "observed {:?}", *seen);
            assert!(seen.len() <= 2);
        }
    }

    #[test]
    fn test_observer_may_read_current() {
        let signal = StatusSignal::new();
        let reader = signal.clone();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = signal.observe(move |_| sink.lock().push(reader.current()));
        signal.publish(VideoStatus::Playing);
        assert_eq!(*seen.lock(), vec![VideoStatus::Stopped, VideoStatus::Playing]);
    }

    #[test]
    fn test_status_names() {
        assert_eq!(VideoStatus::Playing.as_str(), "playing");
        assert_eq!(serde_json::to_string(&VideoStatus::Loading).unwrap(), "\"loading\"");
    }
}
