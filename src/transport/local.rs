//! In-process pub/sub bus.
//!
//! `LocalBus` fans published messages out to every subscription whose glob
//! pattern matches the topic, mirroring the bus semantics the channel sees on
//! Redis: no persistence, no backlog for late subscribers, arrival order per
//! subscriber. `shutdown()` severs every subscription and refuses further
//! traffic, which is how tests simulate a lost connection.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use super::{Listener, TopicMessage, Transport};
use crate::error::{Result, RolloutError};

/// How long a listener waits on its queue before re-checking the stop flag.
const RECV_POLL: Duration = Duration::from_millis(10);

struct Subscriber {
    id: u64,
    pattern: String,
    tx: Sender<TopicMessage>,
}

struct BusInner {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
    open: AtomicBool,
}

/// Shared in-process bus. Clones refer to the same bus.
#[derive(Clone)]
pub struct LocalBus {
    inner: Arc<BusInner>,
}

impl LocalBus {
    /// Create an open bus with no subscribers.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
                open: AtomicBool::new(true),
            }),
        }
    }

    /// Open a transport handle onto this bus.
    pub fn transport(&self) -> LocalTransport {
        LocalTransport {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Sever every subscription and refuse further traffic.
    ///
    /// Listeners drain whatever was already queued for them, then observe
    /// the loss as a transport failure.
    pub fn shutdown(&self) {
        self.inner.open.store(false, Ordering::SeqCst);
        self.inner.subscribers.lock().clear();
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Publishing handle onto a [`LocalBus`].
pub struct LocalTransport {
    inner: Arc<BusInner>,
}

impl Transport for LocalTransport {
    type Listener = LocalListener;

    fn ping(&mut self) -> Result<()> {
        if self.inner.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RolloutError::Connection {
                addr: "local".to_string(),
                message: "bus is shut down".to_string(),
            })
        }
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<()> {
        if !self.inner.open.load(Ordering::SeqCst) {
            return Err(RolloutError::Transport {
                message: "bus is shut down".to_string(),
            });
        }
        let subscribers = self.inner.subscribers.lock();
        for sub in subscribers.iter() {
            if topic_matches(&sub.pattern, topic) {
                // Queues are unbounded; a failed send only means the
                // listener is already gone.
                let _ = sub.tx.send(TopicMessage {
                    topic: topic.to_string(),
                    payload: payload.to_vec(),
                });
            }
        }
        Ok(())
    }

    fn listener(&mut self, pattern: &str) -> Result<LocalListener> {
        if !self.inner.open.load(Ordering::SeqCst) {
            return Err(RolloutError::Connection {
                addr: "local".to_string(),
                message: "bus is shut down".to_string(),
            });
        }
        let (tx, rx) = crossbeam_channel::unbounded();
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner.subscribers.lock().push(Subscriber {
            id,
            pattern: pattern.to_string(),
            tx,
        });
        Ok(LocalListener {
            inner: Arc::clone(&self.inner),
            id,
            rx,
        })
    }
}

/// Receiving half of one local subscription.
pub struct LocalListener {
    inner: Arc<BusInner>,
    id: u64,
    rx: Receiver<TopicMessage>,
}

impl Listener for LocalListener {
    fn pump<F>(self, stop: &AtomicBool, mut on_message: F) -> Result<()>
    where
        F: FnMut(TopicMessage),
    {
        let result = loop {
            if stop.load(Ordering::SeqCst) {
                break Ok(());
            }
            match self.rx.recv_timeout(RECV_POLL) {
                Ok(msg) => on_message(msg),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    break Err(RolloutError::Transport {
                        message: "local bus shut down".to_string(),
                    });
                }
            }
        };
        // The subscription dies with its listener, whichever way the loop
        // ended.
        self.inner.subscribers.lock().retain(|s| s.id != self.id);
        result
    }
}

/// Redis-style glob match: '*' matches any run of characters (including
/// ':'), '?' matches exactly one.
fn topic_matches(pattern: &str, topic: &str) -> bool {
    fn step(pattern: &[u8], topic: &[u8]) -> bool {
        match pattern.split_first() {
            None => topic.is_empty(),
            Some((b'*', rest)) => (0..=topic.len()).any(|skip| step(rest, &topic[skip..])),
            Some((b'?', rest)) => !topic.is_empty() && step(rest, &topic[1..]),
            Some((&expected, rest)) => topic
                .split_first()
                .map_or(false, |(&actual, tail)| actual == expected && step(rest, tail)),
        }
    }
    step(pattern.as_bytes(), topic.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_topic_matches() {
        assert!(topic_matches("rollout:state:*", "rollout:state:4f2a"));
        assert!(topic_matches("rollout:state:*", "rollout:state:"));
        assert!(!topic_matches("rollout:state:*", "rollout:act:4f2a"));
        assert!(topic_matches("*", "anything:at:all"));
        assert!(topic_matches("a?c", "abc"));
        assert!(!topic_matches("a?c", "ac"));
        assert!(topic_matches("exact", "exact"));
        assert!(!topic_matches("exact", "exactly"));
    }

    #[test]
    fn test_publish_reaches_matching_listener() {
        let bus = LocalBus::new();
        let listener = bus.transport().listener("ns:state:*").unwrap();

        let mut publisher = bus.transport();
        publisher.publish("ns:state:a", b"one").unwrap();
        publisher.publish("ns:act:a", b"ignored").unwrap();
        publisher.publish("ns:state:b", b"two").unwrap();

        let stop = Arc::new(AtomicBool::new(false));
        let stop_for_thread = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            let mut seen = Vec::new();
            let result = listener.pump(&stop_for_thread, |msg| {
                seen.push(msg);
            });
            (result, seen)
        });

        thread::sleep(Duration::from_millis(50));
        stop.store(true, Ordering::SeqCst);
        let (result, seen) = handle.join().unwrap();

        assert!(result.is_ok());
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].topic, "ns:state:a");
        assert_eq!(seen[0].payload, b"one");
        assert_eq!(seen[1].topic, "ns:state:b");
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_shutdown_fails_pump_and_publish() {
        let bus = LocalBus::new();
        let listener = bus.transport().listener("ns:*").unwrap();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_for_thread = Arc::clone(&stop);
        let handle = thread::spawn(move || listener.pump(&stop_for_thread, |_| {}));

        bus.shutdown();
        let result = handle.join().unwrap();
        assert!(matches!(result, Err(RolloutError::Transport { .. })));

        let mut publisher = bus.transport();
        assert!(publisher.publish("ns:x", b"late").is_err());
        assert!(publisher.ping().is_err());
    }

    #[test]
    fn test_queued_messages_drain_before_disconnect() {
        let bus = LocalBus::new();
        let listener = bus.transport().listener("ns:*").unwrap();

        bus.transport().publish("ns:a", b"queued").unwrap();
        bus.shutdown();

        let stop = AtomicBool::new(false);
        let mut seen = Vec::new();
        let result = listener.pump(&stop, |msg| seen.push(msg));

        assert!(result.is_err());
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].payload, b"queued");
    }
}
