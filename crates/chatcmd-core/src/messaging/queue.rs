use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    domain::{ChatId, MessageRef},
    messaging::{
        port::Transport,
        types::{OutgoingPayload, SendOptions},
    },
    Error, Result,
};

#[derive(Clone, Copy, Debug)]
pub struct QueueConfig {
    /// Minimum spacing between the start of two consecutive transmissions.
    pub min_delay: Duration,
    /// Items allowed to be pending (queued or in transmission) at once.
    pub max_pending: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(500),
            max_pending: 100,
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

/// One outbound send, alive from `enqueue` until the drain loop transmits it.
struct QueueItem {
    destination: ChatId,
    payload: OutgoingPayload,
    options: SendOptions,
    enqueued_at: DateTime<Utc>,
    reply: oneshot::Sender<Result<MessageRef>>,
}

/// Handle to an enqueued item's eventual transport result.
#[derive(Debug)]
pub struct PendingDelivery {
    rx: oneshot::Receiver<Result<MessageRef>>,
}

impl PendingDelivery {
    /// Resolves once the drain loop has transmitted (or dropped) the item.
    pub async fn outcome(self) -> Result<MessageRef> {
        self.rx.await.unwrap_or(Err(Error::QueueClosed))
    }
}

struct QueueShared {
    tx: mpsc::UnboundedSender<QueueItem>,
    pending: Arc<AtomicUsize>,
    max_pending: usize,
    cancel: CancellationToken,
}

/// Serialized, rate-limited outbound channel for one transport connection.
///
/// A single drain task is the only caller of [`Transport::send`]. Handles are
/// cheap to clone; every conversation context on the connection shares one.
#[derive(Clone)]
pub struct DeliveryQueue {
    shared: Arc<QueueShared>,
}

impl DeliveryQueue {
    /// Start the drain task on the current tokio runtime.
    pub fn spawn(transport: Arc<dyn Transport>, cfg: QueueConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        tokio::spawn(drain(
            rx,
            transport,
            IntervalLimiter::new(cfg.min_delay),
            pending.clone(),
            cancel.clone(),
        ));

        Self {
            shared: Arc::new(QueueShared {
                tx,
                pending,
                max_pending: cfg.max_pending,
                cancel,
            }),
        }
    }

    /// Append a send to the queue without waiting for it.
    ///
    /// Fails immediately with [`Error::QueueOverflow`] when `max_pending`
    /// items are already pending.
    pub fn enqueue(
        &self,
        destination: ChatId,
        payload: OutgoingPayload,
        options: SendOptions,
    ) -> Result<PendingDelivery> {
        if self.shared.cancel.is_cancelled() {
            return Err(Error::QueueClosed);
        }

        let limit = self.shared.max_pending;
        let reserved = self
            .shared
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < limit).then_some(n + 1)
            });
        if reserved.is_err() {
            warn!(chat_id = %destination, limit, "delivery queue full; rejecting send");
            return Err(Error::QueueOverflow { limit });
        }

        let (reply, rx) = oneshot::channel();
        let item = QueueItem {
            destination,
            payload,
            options,
            enqueued_at: Utc::now(),
            reply,
        };
        if self.shared.tx.send(item).is_err() {
            self.shared.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::QueueClosed);
        }

        Ok(PendingDelivery { rx })
    }

    /// Items queued or in transmission.
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    /// Stop the drain loop. Items still queued are dropped, not flushed.
    pub fn close(&self) {
        self.shared.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }
}

async fn drain(
    mut rx: mpsc::UnboundedReceiver<QueueItem>,
    transport: Arc<dyn Transport>,
    mut limiter: IntervalLimiter,
    pending: Arc<AtomicUsize>,
    cancel: CancellationToken,
) {
    debug!("delivery queue started");
    loop {
        let item = tokio::select! {
            _ = cancel.cancelled() => break,
            item = rx.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };

        let wait = limiter.reserve();
        if !wait.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(wait) => {}
            }
        }

        let result = transport
            .send(&item.destination, &item.payload, &item.options)
            .await;
        if let Err(e) = &result {
            warn!(
                chat_id = %item.destination,
                kind = ?item.payload.kind(),
                queued_ms = (Utc::now() - item.enqueued_at).num_milliseconds(),
                error = %e,
                "delivery failed; item dropped"
            );
        }

        pending.fetch_sub(1, Ordering::SeqCst);
        let _ = item.reply.send(result);
    }
    debug!("delivery queue stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MessageId, ParticipantIds, SenderType};
    use crate::messaging::types::GroupMetadata;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::sync::Semaphore;

    #[derive(Default)]
    struct FakeTransport {
        sent: Mutex<Vec<(Instant, String)>>,
        fail_on: Option<String>,
        gate: Option<Arc<Semaphore>>,
    }

    impl FakeTransport {
        fn texts(&self) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|(_, t)| t.clone())
                .collect()
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn send(
            &self,
            destination: &ChatId,
            payload: &OutgoingPayload,
            _options: &SendOptions,
        ) -> Result<MessageRef> {
            if let Some(gate) = &self.gate {
                let _permit = gate.acquire().await;
            }
            let text = payload.as_text().unwrap_or_default().to_string();
            if self.fail_on.as_deref() == Some(text.as_str()) {
                return Err(Error::Transport("connection reset".to_string()));
            }
            let mut sent = self.sent.lock().unwrap();
            sent.push((Instant::now(), text));
            Ok(MessageRef {
                chat_id: destination.clone(),
                message_id: MessageId(sent.len().to_string()),
                sender: ParticipantIds::default(),
                sender_type: SenderType::Individual,
                from_self: true,
            })
        }

        async fn fetch_group_metadata(&self, _chat_id: &ChatId) -> Result<Option<GroupMetadata>> {
            Ok(None)
        }
    }

    fn enqueue_text(q: &DeliveryQueue, text: &str) -> Result<PendingDelivery> {
        q.enqueue(
            ChatId::from("chat"),
            OutgoingPayload::text(text),
            SendOptions::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_transmissions_respect_min_delay() {
        let transport = Arc::new(FakeTransport::default());
        let delay = Duration::from_millis(750);
        let q = DeliveryQueue::spawn(
            transport.clone(),
            QueueConfig {
                min_delay: delay,
                max_pending: 10,
            },
        );

        let pending: Vec<_> = ["a", "b", "c", "d"]
            .iter()
            .map(|t| enqueue_text(&q, t).unwrap())
            .collect();
        for p in pending {
            p.outcome().await.unwrap();
        }

        let sent = transport.sent.lock().unwrap().clone();
        assert_eq!(
            sent.iter().map(|(_, t)| t.as_str()).collect::<Vec<_>>(),
            vec!["a", "b", "c", "d"]
        );
        for pair in sent.windows(2) {
            assert!(pair[1].0.duration_since(pair[0].0) >= delay);
        }
    }

    #[tokio::test]
    async fn overflow_rejects_without_blocking() {
        let gate = Arc::new(Semaphore::new(0));
        let transport = Arc::new(FakeTransport {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let q = DeliveryQueue::spawn(
            transport.clone(),
            QueueConfig {
                min_delay: Duration::ZERO,
                max_pending: 3,
            },
        );

        let accepted: Vec<_> = (0..3)
            .map(|i| enqueue_text(&q, &format!("m{i}")).unwrap())
            .collect();
        let rejected = enqueue_text(&q, "m3");
        assert!(matches!(rejected, Err(Error::QueueOverflow { limit: 3 })));
        assert_eq!(q.pending(), 3);

        gate.add_permits(3);
        for p in accepted {
            p.outcome().await.unwrap();
        }
        assert_eq!(q.pending(), 0);
        assert!(enqueue_text(&q, "m4").is_ok());
    }

    #[tokio::test]
    async fn failed_send_is_reported_and_queue_moves_on() {
        let transport = Arc::new(FakeTransport {
            fail_on: Some("boom".to_string()),
            ..Default::default()
        });
        let q = DeliveryQueue::spawn(
            transport.clone(),
            QueueConfig {
                min_delay: Duration::ZERO,
                max_pending: 10,
            },
        );

        let first = enqueue_text(&q, "boom").unwrap();
        let second = enqueue_text(&q, "after").unwrap();

        assert!(matches!(first.outcome().await, Err(Error::Transport(_))));
        assert!(second.outcome().await.is_ok());
        assert_eq!(transport.texts(), vec!["after"]);
    }

    #[tokio::test]
    async fn closed_queue_rejects_and_drops_pending_items() {
        let transport = Arc::new(FakeTransport::default());
        let q = DeliveryQueue::spawn(
            transport.clone(),
            QueueConfig {
                min_delay: Duration::from_secs(30),
                max_pending: 10,
            },
        );

        enqueue_text(&q, "first").unwrap().outcome().await.unwrap();
        // Held back by the limiter until the close lands.
        let queued = enqueue_text(&q, "second").unwrap();
        q.close();

        assert!(q.is_closed());
        assert!(matches!(enqueue_text(&q, "third"), Err(Error::QueueClosed)));
        assert!(matches!(queued.outcome().await, Err(Error::QueueClosed)));
        assert_eq!(transport.texts(), vec!["first"]);
    }
}
