use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use crate::{
    commands::parser::ParsedCommand, domain::ParticipantId, messaging::types::InboundEvent,
};

/// Whether the chain (and dispatch) should go on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// A stage run for every inbound event before dispatch.
///
/// `parsed` is `None` for events that are not commands.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, event: &InboundEvent, parsed: Option<&ParsedCommand>) -> Flow;
}

/// Ordered middleware stages; the first `Stop` ends the run.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    stages: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, stage: Arc<dyn Middleware>) {
        self.stages.push(stage);
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub async fn run(&self, event: &InboundEvent, parsed: Option<&ParsedCommand>) -> Flow {
        for stage in &self.stages {
            if stage.handle(event, parsed).await == Flow::Stop {
                return Flow::Stop;
            }
        }
        Flow::Continue
    }
}

// ============== Command rate limit (token bucket) ==============

#[derive(Clone, Debug)]
struct Bucket {
    tokens: f64,
    last_update: Instant,
}

/// Per-sender token bucket over commands. Plain messages are never limited.
pub struct CommandRateLimit {
    max_tokens: f64,
    refill_per_sec: f64,
    buckets: Mutex<HashMap<ParticipantId, Bucket>>,
}

impl CommandRateLimit {
    /// `requests` commands per `window`, refilled continuously.
    pub fn new(requests: u32, window: Duration) -> Self {
        let max_tokens = f64::from(requests);
        let window_secs = window.as_secs_f64().max(1e-9);
        Self {
            max_tokens,
            refill_per_sec: max_tokens / window_secs,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Take one token for `sender`; on refusal returns how long until one is available.
    pub fn check_at(&self, sender: &ParticipantId, now: Instant) -> Result<(), Duration> {
        let mut buckets = self.buckets.lock().unwrap_or_else(|p| p.into_inner());
        let bucket = buckets.entry(sender.clone()).or_insert_with(|| Bucket {
            tokens: self.max_tokens,
            last_update: now,
        });

        let elapsed = now.duration_since(bucket.last_update).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.max_tokens);
        bucket.last_update = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return Ok(());
        }

        let secs = (1.0 - bucket.tokens) / self.refill_per_sec;
        Err(Duration::from_secs_f64(secs.max(0.0)))
    }
}

#[async_trait]
impl Middleware for CommandRateLimit {
    async fn handle(&self, event: &InboundEvent, parsed: Option<&ParsedCommand>) -> Flow {
        let (Some(parsed), Some(sender)) = (parsed, event.sender.preferred()) else {
            return Flow::Continue;
        };
        match self.check_at(sender, Instant::now()) {
            Ok(()) => Flow::Continue,
            Err(retry_after) => {
                debug!(
                    chat_id = %event.chat_id,
                    %sender,
                    command = %parsed.token,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "command rate limited"
                );
                Flow::Stop
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChatId, MessageId, ParticipantIds, SenderType};
    use crate::messaging::types::InboundContent;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: AtomicUsize,
        flow: Flow,
    }

    impl Counting {
        fn new(flow: Flow) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                flow,
            })
        }
    }

    #[async_trait]
    impl Middleware for Counting {
        async fn handle(&self, _event: &InboundEvent, _parsed: Option<&ParsedCommand>) -> Flow {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.flow
        }
    }

    fn event() -> InboundEvent {
        InboundEvent {
            chat_id: ChatId::from("c"),
            sender: ParticipantIds::primary("1"),
            sender_type: SenderType::Individual,
            message_id: MessageId("m".to_string()),
            content: InboundContent::text("hi"),
            timestamp: Utc::now(),
            from_self: false,
        }
    }

    #[tokio::test]
    async fn stop_short_circuits_later_stages() {
        let first = Counting::new(Flow::Continue);
        let stopper = Counting::new(Flow::Stop);
        let last = Counting::new(Flow::Continue);

        let mut chain = MiddlewareChain::new();
        chain.push(first.clone());
        chain.push(stopper.clone());
        chain.push(last.clone());

        assert_eq!(chain.run(&event(), None).await, Flow::Stop);
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
        assert_eq!(stopper.calls.load(Ordering::SeqCst), 1);
        assert_eq!(last.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_chain_continues() {
        assert_eq!(MiddlewareChain::new().run(&event(), None).await, Flow::Continue);
    }

    #[test]
    fn bucket_refills_over_time() {
        let limit = CommandRateLimit::new(2, Duration::from_secs(4));
        let who = ParticipantId::from("1");
        let other = ParticipantId::from("2");
        let t0 = Instant::now();

        assert!(limit.check_at(&who, t0).is_ok());
        assert!(limit.check_at(&who, t0).is_ok());
        let wait = limit.check_at(&who, t0).unwrap_err();
        assert_eq!(wait, Duration::from_secs(2));
        assert!(limit.check_at(&other, t0).is_ok());

        assert!(limit.check_at(&who, t0 + Duration::from_secs(2)).is_ok());
    }

    #[tokio::test]
    async fn rate_limit_only_counts_commands() {
        let limit = CommandRateLimit::new(1, Duration::from_secs(60));
        let parsed = ParsedCommand {
            prefix: "!".to_string(),
            token: "ping".to_string(),
            args: Vec::new(),
            raw_args: String::new(),
        };

        assert_eq!(limit.handle(&event(), None).await, Flow::Continue);
        assert_eq!(limit.handle(&event(), Some(&parsed)).await, Flow::Continue);
        assert_eq!(limit.handle(&event(), None).await, Flow::Continue);
        assert_eq!(limit.handle(&event(), Some(&parsed)).await, Flow::Stop);
    }
}
