//! Inbound message demultiplexing by topic.
//!
//! Each text frame from the coordinator is parsed as an [`Envelope`] and
//! handed to the single handler registered for its topic.  Frames that do
//! not parse, or whose topic has no handler, are dropped and counted.  A bad
//! frame never ends the session.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, trace};
use zonelink_core::{Envelope, Topic};

/// A topic handler.  Called on the session's reader task; keep it short.
pub type TopicHandler = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// What [`MessageRouter::dispatch`] did with a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered(Topic),
    /// Parsed, but nobody listens on this topic.
    Unrouted(Topic),
    Malformed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    pub delivered: u64,
    pub unrouted: u64,
    pub malformed: u64,
}

/// At most one handler per topic.
#[derive(Default)]
pub struct MessageRouter {
    handlers: Mutex<HashMap<Topic, TopicHandler>>,
    delivered: AtomicU64,
    unrouted: AtomicU64,
    malformed: AtomicU64,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `topic`, replacing any previous one, or clears
    /// the topic when `handler` is `None`.
    pub fn listen(&self, topic: Topic, handler: Option<TopicHandler>) {
        let mut handlers = lock(&self.handlers);
        match handler {
            Some(handler) => {
                handlers.insert(topic, handler);
            }
            None => {
                handlers.remove(&topic);
            }
        }
    }

    pub fn is_listening(&self, topic: &Topic) -> bool {
        lock(&self.handlers).contains_key(topic)
    }

    /// Removes every handler.
    pub fn clear(&self) {
        lock(&self.handlers).clear();
    }

    /// Parses `text` and invokes the matching handler.
    ///
    /// The handler runs after the internal lock is released, so it may call
    /// [`listen`](Self::listen) itself.
    pub fn dispatch(&self, text: &str) -> DispatchOutcome {
        let envelope = match Envelope::from_json(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.malformed.fetch_add(1, Ordering::Relaxed);
                debug!("dropping inbound frame: {e}");
                return DispatchOutcome::Malformed;
            }
        };

        let topic = envelope.topic();
        let handler = lock(&self.handlers).get(&topic).cloned();
        match handler {
            Some(handler) => {
                handler(&envelope);
                self.delivered.fetch_add(1, Ordering::Relaxed);
                DispatchOutcome::Delivered(topic)
            }
            None => {
                self.unrouted.fetch_add(1, Ordering::Relaxed);
                trace!(%topic, "no handler for topic");
                DispatchOutcome::Unrouted(topic)
            }
        }
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            unrouted: self.unrouted.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    const VOLUME_EVENT: &str =
        r#"[{"namespace":"groupVolume:1","type":"groupVolume"},{"volume":20,"muted":false,"fixed":false}]"#;

    fn counting_handler() -> (TopicHandler, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let handler: TopicHandler = Arc::new(move |_env: &Envelope| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (handler, count)
    }

    #[test]
    fn test_dispatch_delivers_to_registered_topic() {
        // Arrange
        let router = MessageRouter::new();
        let seen = Arc::new(Mutex::new(None));
        let s = Arc::clone(&seen);
        router.listen(
            Topic::GroupVolume,
            Some(Arc::new(move |env: &Envelope| {
                *s.lock().unwrap() = Some(env.body["volume"].clone());
            })),
        );

        // Act
        let outcome = router.dispatch(VOLUME_EVENT);

        // Assert
        assert_eq!(outcome, DispatchOutcome::Delivered(Topic::GroupVolume));
        assert_eq!(*seen.lock().unwrap(), Some(serde_json::json!(20)));
    }

    #[test]
    fn test_listen_replaces_previous_handler() {
        let router = MessageRouter::new();
        let (first, first_count) = counting_handler();
        let (second, second_count) = counting_handler();
        router.listen(Topic::GroupVolume, Some(first));
        router.listen(Topic::GroupVolume, Some(second));

        router.dispatch(VOLUME_EVENT);

        assert_eq!(first_count.load(Ordering::SeqCst), 0);
        assert_eq!(second_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listen_without_handler_clears_topic() {
        let router = MessageRouter::new();
        let (handler, count) = counting_handler();
        router.listen(Topic::GroupVolume, Some(handler));
        router.listen(Topic::GroupVolume, None);

        assert_eq!(
            router.dispatch(VOLUME_EVENT),
            DispatchOutcome::Unrouted(Topic::GroupVolume)
        );
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!router.is_listening(&Topic::GroupVolume));
    }

    #[test]
    fn test_other_topics_are_unrouted() {
        let router = MessageRouter::new();
        let (handler, count) = counting_handler();
        router.listen(Topic::Playback, Some(handler));

        router.dispatch(VOLUME_EVENT);

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(router.stats().unrouted, 1);
    }

    #[test]
    fn test_malformed_frames_are_counted_and_dropped() {
        let router = MessageRouter::new();
        let (handler, count) = counting_handler();
        router.listen(Topic::GroupVolume, Some(handler));

        assert_eq!(router.dispatch("{not json"), DispatchOutcome::Malformed);
        assert_eq!(router.dispatch(r#"[{"type":"groupVolume"},{}]"#), DispatchOutcome::Malformed);

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(
            router.stats(),
            RouterStats {
                delivered: 0,
                unrouted: 0,
                malformed: 2
            }
        );
    }

    #[test]
    fn test_unknown_namespace_can_be_routed() {
        let router = MessageRouter::new();
        let (handler, count) = counting_handler();
        router.listen(Topic::from_namespace("audioClip:1"), Some(handler));

        router.dispatch(r#"[{"namespace":"audioClip:1","type":"audioClipStatus"},{}]"#);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clear_removes_all_handlers() {
        let router = MessageRouter::new();
        let (a, _) = counting_handler();
        let (b, _) = counting_handler();
        router.listen(Topic::GroupVolume, Some(a));
        router.listen(Topic::Playback, Some(b));

        router.clear();

        assert!(!router.is_listening(&Topic::GroupVolume));
        assert!(!router.is_listening(&Topic::Playback));
    }

    #[test]
    fn test_handler_may_unregister_itself() {
        let router = Arc::new(MessageRouter::new());
        let r = Arc::clone(&router);
        router.listen(
            Topic::GroupVolume,
            Some(Arc::new(move |_env: &Envelope| {
                r.listen(Topic::GroupVolume, None);
            })),
        );

        assert_eq!(
            router.dispatch(VOLUME_EVENT),
            DispatchOutcome::Delivered(Topic::GroupVolume)
        );
        assert!(!router.is_listening(&Topic::GroupVolume));
    }
}
