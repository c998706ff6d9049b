//! Routes one turn's response text to topic subscribers.
//!
//! A multiplexer lives for exactly one turn. Publication is push-based and
//! awaited: `publish` resolves only after every matching subscriber has
//! finished consuming the delta, in subscription order, so a slow subscriber
//! backpressures the turn rather than racing it.

use async_trait::async_trait;

/// Topic a bare `publish` targets.
pub const DEFAULT_TOPIC: &str = "Assistant";

/// Consumes the deltas published to one topic.
#[async_trait]
pub trait TopicHandler: Send {
    /// A delta of response text for this topic.
    async fn on_response(&mut self, delta: &str);

    /// The turn ended. Fires at most once per handler.
    async fn on_turn_complete(&mut self);
}

struct Subscription {
    topic: String,
    handler: Box<dyn TopicHandler>,
}

/// Per-turn topic fan-out. Not shared across turns; create a fresh one for
/// each request.
#[derive(Default)]
pub struct ResponseMultiplexer {
    subs: Vec<Subscription>,
    turn_complete: bool,
}

impl ResponseMultiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a handler to `topic`. Multiple handlers may share a topic;
    /// they are notified in subscription order.
    pub fn sub(&mut self, topic: impl Into<String>, handler: Box<dyn TopicHandler>) {
        self.subs.push(Subscription {
            topic: topic.into(),
            handler,
        });
    }

    /// Publish a delta to the default topic.
    pub async fn publish(&mut self, delta: &str) {
        self.publish_to(DEFAULT_TOPIC, delta).await;
    }

    /// Publish a delta to every subscriber of `topic`, awaiting each in
    /// subscription order. A topic with no subscribers discards the delta.
    pub async fn publish_to(&mut self, topic: &str, delta: &str) {
        let mut delivered = false;
        for sub in &mut self.subs {
            if sub.topic == topic {
                sub.handler.on_response(delta).await;
                delivered = true;
            }
        }
        if !delivered {
            tracing::debug!(topic, "discarding delta for topic with no subscribers");
        }
    }

    /// Notify every subscriber that the turn ended. Idempotent: only the
    /// first call notifies, and handlers subscribed afterwards are never
    /// notified.
    pub async fn notify_turn_complete(&mut self) {
        if self.turn_complete {
            return;
        }
        self.turn_complete = true;
        for sub in &mut self.subs {
            sub.handler.on_turn_complete().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Appends tagged entries to a log shared with the test body.
    struct LoggingHandler {
        tag: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl LoggingHandler {
        fn boxed(tag: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Box<dyn TopicHandler> {
            Box::new(Self {
                tag,
                log: Arc::clone(log),
            })
        }
    }

    #[async_trait]
    impl TopicHandler for LoggingHandler {
        async fn on_response(&mut self, delta: &str) {
            self.log.lock().unwrap().push(format!("{}:{delta}", self.tag));
        }

        async fn on_turn_complete(&mut self) {
            self.log.lock().unwrap().push(format!("{}:done", self.tag));
        }
    }

    #[tokio::test]
    async fn test_delivery_in_subscription_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut mux = ResponseMultiplexer::new();
        mux.sub(DEFAULT_TOPIC, LoggingHandler::boxed("s1", &log));
        mux.sub(DEFAULT_TOPIC, LoggingHandler::boxed("s2", &log));

        mux.publish("ab").await;
        mux.publish("c").await;

        assert_eq!(
            *log.lock().unwrap(),
            vec!["s1:ab", "s2:ab", "s1:c", "s2:c"]
        );
    }

    #[tokio::test]
    async fn test_topics_are_independent() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut mux = ResponseMultiplexer::new();
        mux.sub("code", LoggingHandler::boxed("code", &log));
        mux.sub(DEFAULT_TOPIC, LoggingHandler::boxed("chat", &log));

        mux.publish_to("code", "fn main() {}").await;
        mux.publish("hello").await;

        assert_eq!(*log.lock().unwrap(), vec!["code:fn main() {}", "chat:hello"]);
    }

    #[tokio::test]
    async fn test_unsubscribed_topic_discards() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut mux = ResponseMultiplexer::new();
        mux.sub(DEFAULT_TOPIC, LoggingHandler::boxed("s", &log));

        mux.publish_to("nobody-listens", "lost").await;

        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_turn_completion_fires_exactly_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut mux = ResponseMultiplexer::new();
        mux.sub(DEFAULT_TOPIC, LoggingHandler::boxed("s", &log));

        mux.notify_turn_complete().await;
        mux.notify_turn_complete().await;

        assert_eq!(*log.lock().unwrap(), vec!["s:done"]);
    }

    #[tokio::test]
    async fn test_late_subscriber_not_notified_of_completion() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut mux = ResponseMultiplexer::new();
        mux.sub(DEFAULT_TOPIC, LoggingHandler::boxed("early", &log));

        mux.notify_turn_complete().await;
        mux.sub(DEFAULT_TOPIC, LoggingHandler::boxed("late", &log));
        mux.notify_turn_complete().await;

        assert_eq!(*log.lock().unwrap(), vec!["early:done"]);
    }
}
