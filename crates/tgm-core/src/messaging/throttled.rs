use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use tokio::time::{sleep, Instant};

use crate::{
    domain::{DestinationId, Entity},
    messaging::{
        port::DestinationSender,
        types::OutboundMessage,
    },
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    /// Minimum spacing between *any* two sends (global flood control).
    pub global_min_interval: Duration,
    /// Minimum spacing between sends to the same chat.
    pub per_chat_min_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            global_min_interval: Duration::from_millis(40),      // ~25/sec
            per_chat_min_interval: Duration::from_millis(1050), // ~0.95/sec
        }
    }
}

#[derive(Debug)]
struct IntervalLimiter {
    interval: Duration,
    next: Instant,
}

impl IntervalLimiter {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now(),
        }
    }

    /// Reserve the next slot and return the wait duration required before executing.
    fn reserve(&mut self) -> Duration {
        let now = Instant::now();
        let start = if now >= self.next { now } else { self.next };
        self.next = start + self.interval;
        start.saturating_duration_since(now)
    }
}

/// DestinationSender decorator that spaces out sends.
///
/// Keeps bursts of matching messages under Telegram's flood limits so a
/// matched message is not lost to a 429.
pub struct ThrottledSender<S> {
    inner: S,
    cfg: ThrottleConfig,
    global: IntervalLimiter,
    per_chat: HashMap<i64, IntervalLimiter>,
}

impl<S: DestinationSender> ThrottledSender<S> {
    pub fn new(inner: S, cfg: ThrottleConfig) -> Self {
        Self {
            inner,
            cfg,
            global: IntervalLimiter::new(cfg.global_min_interval),
            per_chat: HashMap::new(),
        }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    async fn throttle_chat(&mut self, chat_id: i64) {
        let global_wait = self.global.reserve();
        let per_chat_min_interval = self.cfg.per_chat_min_interval;
        let chat_wait = self
            .per_chat
            .entry(chat_id)
            .or_insert_with(|| IntervalLimiter::new(per_chat_min_interval))
            .reserve();

        let wait = global_wait.max(chat_wait);
        if wait > Duration::from_millis(0) {
            sleep(wait).await;
        }
    }
}

#[async_trait]
impl<S: DestinationSender> DestinationSender for ThrottledSender<S> {
    async fn connect(&mut self) -> Result<Entity> {
        self.inner.connect().await
    }

    async fn resolve(&mut self, destination: &DestinationId) -> Result<Entity> {
        self.inner.resolve(destination).await
    }

    async fn send(&mut self, target: &Entity, msg: &OutboundMessage) -> Result<()> {
        self.throttle_chat(target.id().0).await;
        self.inner.send(target, msg).await
    }

    async fn disconnect(&mut self) {
        self.inner.disconnect().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ChatId;

    #[derive(Default)]
    struct CountingSender {
        sent: Vec<(i64, String)>,
    }

    #[async_trait]
    impl DestinationSender for CountingSender {
        async fn connect(&mut self) -> Result<Entity> {
            Ok(chat(1))
        }

        async fn resolve(&mut self, _destination: &DestinationId) -> Result<Entity> {
            Ok(chat(2))
        }

        async fn send(&mut self, target: &Entity, msg: &OutboundMessage) -> Result<()> {
            self.sent.push((target.id().0, msg.text.clone()));
            Ok(())
        }

        async fn disconnect(&mut self) {}
    }

    fn chat(id: i64) -> Entity {
        Entity::Channel {
            id: ChatId(id),
            title: None,
            username: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sends_to_one_chat_are_spaced() {
        let mut s = ThrottledSender::new(
            CountingSender::default(),
            ThrottleConfig {
                global_min_interval: Duration::from_millis(0),
                per_chat_min_interval: Duration::from_secs(1),
            },
        );
        let target = chat(-100);
        let msg = OutboundMessage {
            text: "hi".into(),
            copy_of: None,
        };

        let start = Instant::now();
        s.send(&target, &msg).await.unwrap();
        s.send(&target, &msg).await.unwrap();
        s.send(&target, &msg).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert_eq!(s.into_inner().sent.len(), 3);
    }
}
