// src/notify/mod.rs

//! Subscriber Notifier.
//!
//! Subscribers are live connections (a dashboard socket, a terminal). After
//! each cycle every subscriber receives the full snapshot serialized as JSON.
//! A subscriber whose send fails or stalls is dropped on the spot and never
//! retried.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::state::Snapshot;

/// How long a single send may take before the subscriber counts as gone.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Future returned by [`Subscriber::send`].
pub type SendFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Transport-agnostic push target.
pub trait Subscriber: Send {
    fn send(&mut self, payload: Arc<str>) -> SendFuture<'_>;
}

/// Forwards payloads into a bounded channel. Fails once the receiver is gone.
pub struct ChannelSubscriber {
    tx: mpsc::Sender<Arc<str>>,
}

impl ChannelSubscriber {
    pub fn new(tx: mpsc::Sender<Arc<str>>) -> Self {
        Self { tx }
    }

    /// Convenience constructor returning the subscriber and its receiver.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

impl Subscriber for ChannelSubscriber {
    fn send(&mut self, payload: Arc<str>) -> SendFuture<'_> {
        Box::pin(async move {
            self.tx
                .send(payload)
                .await
                .map_err(|_| anyhow!("subscriber channel closed"))
        })
    }
}

/// Writes one JSON document per line to an async writer (stdout in `--once`).
pub struct WriterSubscriber<W> {
    writer: W,
}

impl<W> WriterSubscriber<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<W: AsyncWrite + Unpin + Send> Subscriber for WriterSubscriber<W> {
    fn send(&mut self, payload: Arc<str>) -> SendFuture<'_> {
        Box::pin(async move {
            self.writer
                .write_all(payload.as_bytes())
                .await
                .context("writing snapshot")?;
            self.writer.write_all(b"\n").await?;
            self.writer.flush().await?;
            Ok(())
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Outcome of one broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifyReport {
    pub delivered: usize,
    pub pruned: Vec<SubscriberId>,
}

pub struct Notifier {
    next_id: u64,
    send_timeout: Duration,
    subscribers: Vec<(SubscriberId, Box<dyn Subscriber>)>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(DEFAULT_SEND_TIMEOUT)
    }
}

impl Notifier {
    pub fn new(send_timeout: Duration) -> Self {
        Self {
            next_id: 0,
            send_timeout,
            subscribers: Vec::new(),
        }
    }

    pub fn subscribe(&mut self, subscriber: Box<dyn Subscriber>) -> SubscriberId {
        let id = SubscriberId(self.next_id);
        self.next_id += 1;
        self.subscribers.push((id, subscriber));
        debug!(subscriber = %id, total = self.subscribers.len(), "subscriber registered");
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sid, _)| *sid != id);
        before != self.subscribers.len()
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    pub fn clear(&mut self) {
        if !self.subscribers.is_empty() {
            debug!(count = self.subscribers.len(), "dropping all subscribers");
        }
        self.subscribers.clear();
    }

    /// Send `snapshot` to every subscriber, dropping the ones that fail.
    pub async fn notify(&mut self, snapshot: &Snapshot) -> Result<NotifyReport> {
        let mut report = NotifyReport::default();
        if self.subscribers.is_empty() {
            return Ok(report);
        }

        let payload: Arc<str> = serde_json::to_string(snapshot)
            .context("serializing snapshot")?
            .into();

        let mut kept = Vec::with_capacity(self.subscribers.len());
        for (id, mut subscriber) in self.subscribers.drain(..) {
            let send = subscriber.send(Arc::clone(&payload));
            let failure = match tokio::time::timeout(self.send_timeout, send).await {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => Some("send timed out".to_string()),
            };
            match failure {
                None => {
                    report.delivered += 1;
                    kept.push((id, subscriber));
                }
                Some(reason) => {
                    warn!(subscriber = %id, reason, "dropping subscriber");
                    report.pruned.push(id);
                }
            }
        }
        self.subscribers = kept;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::EntityStore;

    struct Failing;

    impl Subscriber for Failing {
        fn send(&mut self, _payload: Arc<str>) -> SendFuture<'_> {
            Box::pin(async { Err(anyhow!("connection reset")) })
        }
    }

    struct Stalled;

    impl Subscriber for Stalled {
        fn send(&mut self, _payload: Arc<str>) -> SendFuture<'_> {
            Box::pin(std::future::pending::<Result<()>>())
        }
    }

    fn snapshot() -> Snapshot {
        let mut store = EntityStore::new(vec!["week01".into()], "week01".into()).unwrap();
        store.register("S1");
        store.snapshot()
    }

    #[tokio::test]
    async fn failing_subscribers_are_pruned_and_not_retried() {
        let mut notifier = Notifier::default();
        let (ok, mut rx) = ChannelSubscriber::channel(4);
        let ok_id = notifier.subscribe(Box::new(ok));
        let bad_id = notifier.subscribe(Box::new(Failing));

        let report = notifier.notify(&snapshot()).await.unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(report.pruned, vec![bad_id]);
        assert_eq!(notifier.len(), 1);

        let payload = rx.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["period"], "week01");
        assert_eq!(value["entities"]["S1"]["grade_status"], "unknown");

        let report = notifier.notify(&snapshot()).await.unwrap();
        assert_eq!(report.delivered, 1);
        assert!(report.pruned.is_empty());
        assert!(notifier.unsubscribe(ok_id));
    }

    #[tokio::test]
    async fn closed_channel_counts_as_gone() {
        let mut notifier = Notifier::default();
        let (sub, rx) = ChannelSubscriber::channel(1);
        notifier.subscribe(Box::new(sub));
        drop(rx);

        let report = notifier.notify(&snapshot()).await.unwrap();
        assert_eq!(report.pruned.len(), 1);
        assert!(notifier.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_subscriber_times_out() {
        let mut notifier = Notifier::new(Duration::from_millis(100));
        notifier.subscribe(Box::new(Stalled));

        let report = notifier.notify(&snapshot()).await.unwrap();
        assert_eq!(report.delivered, 0);
        assert_eq!(report.pruned.len(), 1);
    }

    #[tokio::test]
    async fn writer_subscriber_emits_json_lines() {
        let mut notifier = Notifier::default();
        notifier.subscribe(Box::new(WriterSubscriber::new(Vec::<u8>::new())));
        let report = notifier.notify(&snapshot()).await.unwrap();
        assert_eq!(report.delivered, 1);
    }
}
