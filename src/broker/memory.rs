use crate::broker::{
    BrokerClient, BrokerError, InboundMessage, MessageId, Publisher, SubscribeOptions,
    Subscription,
};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use log::{debug, info, warn};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tokio::sync::{watch, Notify};
use tokio::time::Instant;

const REDELIVERY_CHECK_INTERVAL: Duration = Duration::from_millis(500);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Pub/sub broker living inside the process.
///
/// Every named subscription on a topic keeps its own backlog, consumers attached to the
/// same subscription share it. Delivered messages stay unacknowledged until acknowledged,
/// negatively acknowledged (back to the backlog) or expired by the ack timeout.
pub struct MemoryBroker {
    url: String,
    topics: DashMap<String, Arc<Topic>>,
    consumers: Mutex<Vec<Arc<MemorySubscription>>>,
    id_generator: AtomicU64,
    consumer_id_generator: AtomicU32,
    connected: AtomicBool,
    connection_close_attempts: AtomicU32,
    faults: Arc<Faults>,
}

#[derive(Default)]
struct Faults {
    unreachable: AtomicBool,
    failing_acks: AtomicBool,
    failing_connection_close: AtomicBool,
    failing_closes: DashSet<String>,
}

struct Topic {
    subscriptions: DashMap<String, Arc<Backlog>>,
}

impl Topic {
    fn new() -> Self {
        Topic {
            subscriptions: DashMap::new(),
        }
    }

    fn backlog(&self, subscription: &str) -> Arc<Backlog> {
        let backlog = self
            .subscriptions
            .entry(String::from(subscription))
            .or_insert_with(|| Arc::new(Backlog::new()));

        Arc::clone(backlog.value())
    }
}

impl MemoryBroker {
    pub fn new(url: &str) -> Self {
        MemoryBroker {
            url: String::from(url),
            topics: DashMap::new(),
            consumers: Mutex::new(Vec::new()),
            id_generator: AtomicU64::new(0),
            consumer_id_generator: AtomicU32::new(0),
            connected: AtomicBool::new(true),
            connection_close_attempts: AtomicU32::new(0),
            faults: Arc::new(Faults::default()),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    // fault injection

    pub fn set_unreachable(&self, unreachable: bool) {
        self.faults.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn set_failing_acks(&self, failing: bool) {
        self.faults.failing_acks.store(failing, Ordering::SeqCst);
    }

    pub fn set_failing_connection_close(&self, failing: bool) {
        self.faults
            .failing_connection_close
            .store(failing, Ordering::SeqCst);
    }

    pub fn fail_close(&self, subscription: &str) {
        self.faults.failing_closes.insert(String::from(subscription));
    }

    // inspection

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn connection_close_attempts(&self) -> u32 {
        self.connection_close_attempts.load(Ordering::SeqCst)
    }

    pub fn backlog_len(&self, topic: &str, subscription: &str) -> usize {
        match self.topics.get(topic) {
            Some(topic) => match topic.subscriptions.get(subscription) {
                Some(backlog) => backlog.len(),
                None => 0,
            },
            None => 0,
        }
    }

    pub fn publish(&self, topic: &str, key: &str, payload: Bytes) -> Result<MessageId, BrokerError> {
        if !self.is_connected() {
            return Err(BrokerError::Publish(String::from(topic)));
        }

        let id = MessageId::new(self.id_generator.fetch_add(1, Ordering::SeqCst));

        let topic_entry = self.topic(topic);

        let backlogs: Vec<Arc<Backlog>> = topic_entry
            .subscriptions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        // no subscription yet, the message is not retained
        if backlogs.is_empty() {
            debug!("message dropped, no subscriptions, topic={}, id={}", topic, id);
        }

        for backlog in backlogs {
            backlog.push_back(InboundMessage::new(id, key, Bytes::clone(&payload)));
        }

        Ok(id)
    }

    fn topic(&self, topic: &str) -> Arc<Topic> {
        let entry = self
            .topics
            .entry(String::from(topic))
            .or_insert_with(|| Arc::new(Topic::new()));

        Arc::clone(entry.value())
    }
}

#[async_trait]
impl BrokerClient for MemoryBroker {
    async fn subscribe(
        &self,
        options: SubscribeOptions,
    ) -> Result<Arc<dyn Subscription>, BrokerError> {
        if self.faults.unreachable.load(Ordering::SeqCst) || !self.is_connected() {
            return Err(BrokerError::Connection(self.url.clone()));
        }

        let backlog = self.topic(&options.topic).backlog(&options.subscription);

        let consumer_id = self.consumer_id_generator.fetch_add(1, Ordering::SeqCst);

        let subscription = Arc::new(MemorySubscription::start(
            consumer_id,
            options,
            backlog,
            Arc::clone(&self.faults),
        ));

        lock(&self.consumers).push(Arc::clone(&subscription));

        info!(
            "consumer[id={}] subscribed, topic={}, subscription={}",
            consumer_id,
            subscription.topic(),
            subscription.name()
        );

        Ok(subscription)
    }

    async fn close_connection(&self) -> Result<(), BrokerError> {
        self.connection_close_attempts.fetch_add(1, Ordering::SeqCst);

        if self.faults.failing_connection_close.load(Ordering::SeqCst) {
            return Err(BrokerError::ConnectionClose(self.url.clone()));
        }

        self.connected.store(false, Ordering::SeqCst);

        let consumers: Vec<Arc<MemorySubscription>> = lock(&self.consumers).drain(..).collect();

        for consumer in consumers {
            consumer.teardown();
        }

        info!("connection closed, url={}", self.url);

        Ok(())
    }
}

#[async_trait]
impl Publisher for MemoryBroker {
    async fn send(&self, topic: &str, key: &str, payload: Bytes) -> Result<MessageId, BrokerError> {
        self.publish(topic, key, payload)
    }
}

struct Backlog {
    messages: Mutex<VecDeque<InboundMessage>>,
    notify: Notify,
}

impl Backlog {
    fn new() -> Self {
        Backlog {
            messages: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    fn push_back(&self, message: InboundMessage) {
        lock(&self.messages).push_back(message);
        self.notify.notify_waiters();
    }

    fn push_front(&self, message: InboundMessage) {
        lock(&self.messages).push_front(message);
        self.notify.notify_waiters();
    }

    fn pop(&self) -> Option<InboundMessage> {
        lock(&self.messages).pop_front()
    }

    fn len(&self) -> usize {
        lock(&self.messages).len()
    }
}

// Messages sitting in the receiver queue have no deadline yet, the ack timeout
// starts when `receive` hands them out.
struct UnackedMessages {
    messages: Mutex<HashMap<MessageId, (InboundMessage, Option<Instant>)>>,
}

impl UnackedMessages {
    fn new() -> Self {
        UnackedMessages {
            messages: Mutex::new(HashMap::new()),
        }
    }

    fn queue(&self, message: &InboundMessage) {
        lock(&self.messages).insert(message.id, (InboundMessage::clone(message), None));
    }

    /// `false` when the message was already returned to the backlog.
    fn hand_out(&self, id: MessageId, expired_at: Instant) -> bool {
        match lock(&self.messages).get_mut(&id) {
            Some((_, deadline)) => {
                *deadline = Some(expired_at);
                true
            }
            None => false,
        }
    }

    fn remove(&self, id: MessageId) -> Option<InboundMessage> {
        lock(&self.messages).remove(&id).map(|(message, _)| message)
    }

    fn take_expired(&self, now: Instant) -> Vec<InboundMessage> {
        let mut guard = lock(&self.messages);

        let mut expired_ids: Vec<(MessageId, Instant)> = guard
            .iter()
            .filter_map(|(id, (_, deadline))| match deadline {
                Some(expired_at) if *expired_at <= now => Some((*id, *expired_at)),
                _ => None,
            })
            .collect();

        expired_ids.sort_by_key(|(id, expired_at)| (*expired_at, *id));

        expired_ids
            .into_iter()
            .filter_map(|(id, _)| guard.remove(&id).map(|(message, _)| message))
            .collect()
    }

    /// Every tracked message, flagged with whether it was handed out.
    fn drain(&self) -> Vec<(InboundMessage, bool)> {
        let mut messages: Vec<(InboundMessage, bool)> = lock(&self.messages)
            .drain()
            .map(|(_, (message, deadline))| (message, deadline.is_some()))
            .collect();

        messages.sort_by_key(|(message, _)| message.id);

        messages
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubscriptionStatus {
    Active,
    Paused,
    Closed,
}

pub struct MemorySubscription {
    consumer_id: u32,
    topic: String,
    name: String,
    backlog: Arc<Backlog>,
    unacked: Arc<UnackedMessages>,
    ack_timeout: Duration,
    status: watch::Sender<SubscriptionStatus>,
    receiver: tokio::sync::Mutex<Receiver<InboundMessage>>,
    faults: Arc<Faults>,
}

impl MemorySubscription {
    fn start(
        consumer_id: u32,
        options: SubscribeOptions,
        backlog: Arc<Backlog>,
        faults: Arc<Faults>,
    ) -> Self {
        let (queue_tx, queue_rx) = channel(options.receiver_queue_size.max(1));
        let (status, _) = watch::channel(SubscriptionStatus::Active);

        let unacked = Arc::new(UnackedMessages::new());

        tokio::spawn(Self::deliver(
            Arc::clone(&backlog),
            Arc::clone(&unacked),
            status.subscribe(),
            queue_tx,
        ));

        tokio::spawn(Self::restore_expired(
            consumer_id,
            Arc::clone(&backlog),
            Arc::clone(&unacked),
            status.subscribe(),
        ));

        MemorySubscription {
            consumer_id,
            topic: options.topic,
            name: options.subscription,
            backlog,
            unacked,
            ack_timeout: options.ack_timeout,
            status,
            receiver: tokio::sync::Mutex::new(queue_rx),
            faults,
        }
    }

    pub fn consumer_id(&self) -> u32 {
        self.consumer_id
    }

    pub fn is_closed(&self) -> bool {
        *self.status.borrow() == SubscriptionStatus::Closed
    }

    async fn deliver(
        backlog: Arc<Backlog>,
        unacked: Arc<UnackedMessages>,
        mut status: watch::Receiver<SubscriptionStatus>,
        queue: Sender<InboundMessage>,
    ) {
        loop {
            let notified = backlog.notify.notified();

            let current = *status.borrow_and_update();

            match current {
                SubscriptionStatus::Closed => break,
                SubscriptionStatus::Paused => {
                    if status.changed().await.is_err() {
                        break;
                    }
                }
                SubscriptionStatus::Active => {
                    let permit = tokio::select! {
                        permit = queue.reserve() => match permit {
                            Ok(permit) => permit,
                            Err(_) => break,
                        },
                        changed = status.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            continue;
                        }
                    };

                    // the status read lock is held until the message is tracked, a
                    // concurrent pause or close waits for it
                    let popped = {
                        let current = status.borrow();

                        if *current != SubscriptionStatus::Active {
                            continue;
                        }

                        let popped = backlog.pop();

                        if let Some(message) = &popped {
                            unacked.queue(message);
                        }

                        popped
                    };

                    match popped {
                        Some(message) => permit.send(message),
                        None => {
                            drop(permit);

                            tokio::select! {
                                _ = notified => {}
                                changed = status.changed() => {
                                    if changed.is_err() {
                                        break;
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    async fn restore_expired(
        consumer_id: u32,
        backlog: Arc<Backlog>,
        unacked: Arc<UnackedMessages>,
        mut status: watch::Receiver<SubscriptionStatus>,
    ) {
        let mut ticker = tokio::time::interval(REDELIVERY_CHECK_INTERVAL);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = status.wait_for(|s| *s == SubscriptionStatus::Closed) => break,
            }

            let expired = unacked.take_expired(Instant::now());

            for message in expired.into_iter().rev() {
                warn!(
                    "consumer[id={}] ack timeout expired, redelivering message_id={}",
                    consumer_id, message.id
                );

                backlog.push_front(message.redelivered());
            }
        }
    }

    fn teardown(&self) {
        let previous = self.status.send_replace(SubscriptionStatus::Closed);

        if previous == SubscriptionStatus::Closed {
            return;
        }

        let returned = self.unacked.drain();

        if !returned.is_empty() {
            debug!(
                "consumer[id={}] returning {} queued and unacknowledged messages to backlog",
                self.consumer_id,
                returned.len()
            );
        }

        for (message, handed_out) in returned.into_iter().rev() {
            if handed_out {
                self.backlog.push_front(message.redelivered());
            } else {
                self.backlog.push_front(message);
            }
        }
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn pause(&self) {
        self.status.send_if_modified(|status| {
            if *status == SubscriptionStatus::Active {
                *status = SubscriptionStatus::Paused;
                return true;
            }
            false
        });
    }

    async fn receive(&self) -> Option<InboundMessage> {
        let mut status = self.status.subscribe();
        let mut receiver = self.receiver.lock().await;

        loop {
            let message = tokio::select! {
                biased;
                _ = status.wait_for(|s| *s == SubscriptionStatus::Closed) => None,
                message = receiver.recv() => message,
            }?;

            if self
                .unacked
                .hand_out(message.id, Instant::now() + self.ack_timeout)
            {
                return Some(message);
            }

            // returned to the backlog by close, or acknowledged through an earlier copy
            if self.is_closed() {
                return None;
            }
        }
    }

    async fn acknowledge(&self, message: &InboundMessage) -> Result<(), BrokerError> {
        if self.faults.failing_acks.load(Ordering::SeqCst) || self.is_closed() {
            return Err(BrokerError::Ack(message.id.to_string()));
        }

        // an expired message may have been redelivered already, acking it is still valid
        self.unacked.remove(message.id);

        Ok(())
    }

    fn negative_acknowledge(&self, message: &InboundMessage) {
        if let Some(message) = self.unacked.remove(message.id) {
            self.backlog.push_front(message.redelivered());
        }
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if self.faults.failing_closes.contains(&self.name) {
            return Err(BrokerError::Close(self.name.clone()));
        }

        self.teardown();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::broker::{BrokerClient, BrokerError, MemoryBroker, SubscribeOptions};
    use bytes::Bytes;
    use std::time::Duration;

    fn options(subscription: &str, ack_timeout_ms: u64) -> SubscribeOptions {
        SubscribeOptions::new("herbs", subscription, 5, Duration::from_millis(ack_timeout_ms))
    }

    #[tokio::test]
    async fn publish_then_receive_and_ack() {
        let broker = MemoryBroker::new("memory://test");

        let subscription = broker.subscribe(options("sub1", 10_000)).await.unwrap();

        broker
            .publish("herbs", "verbena", Bytes::from_static(b"data"))
            .unwrap();

        let message = subscription.receive().await.unwrap();

        assert_eq!("verbena", message.key);
        assert_eq!(0, message.redelivery_count);
        assert!(subscription.acknowledge(&message).await.is_ok());
        assert_eq!(0, broker.backlog_len("herbs", "sub1"));
    }

    #[tokio::test]
    async fn negative_ack_redelivers_with_incremented_count() {
        let broker = MemoryBroker::new("memory://test");

        let subscription = broker.subscribe(options("sub1", 10_000)).await.unwrap();

        broker
            .publish("herbs", "comfrey", Bytes::from_static(b"data"))
            .unwrap();

        let message = subscription.receive().await.unwrap();
        subscription.negative_acknowledge(&message);

        let redelivered = subscription.receive().await.unwrap();

        assert_eq!(message.id, redelivered.id);
        assert_eq!(1, redelivered.redelivery_count);
    }

    #[tokio::test(start_paused = true)]
    async fn ack_timeout_redelivers() {
        let broker = MemoryBroker::new("memory://test");

        let subscription = broker.subscribe(options("sub1", 1_000)).await.unwrap();

        broker
            .publish("herbs", "sorrel", Bytes::from_static(b"data"))
            .unwrap();

        let message = subscription.receive().await.unwrap();

        let redelivered = subscription.receive().await.unwrap();

        assert_eq!(message.id, redelivered.id);
        assert_eq!(1, redelivered.redelivery_count);
    }

    #[tokio::test(start_paused = true)]
    async fn ack_timeout_starts_when_message_is_received() {
        let broker = MemoryBroker::new("memory://test");

        let subscription = broker
            .subscribe(SubscribeOptions::new(
                "herbs",
                "sub1",
                1,
                Duration::from_secs(1),
            ))
            .await
            .unwrap();

        for key in ["comfrey", "echinacea", "verbena"] {
            broker
                .publish("herbs", key, Bytes::from_static(b"data"))
                .unwrap();
        }

        let mut processed = Vec::new();

        // each message waits in the receiver queue longer than the ack timeout, but is
        // acknowledged within it once received
        while let Ok(Some(message)) =
            tokio::time::timeout(Duration::from_secs(3), subscription.receive()).await
        {
            processed.push((message.id.value(), message.redelivery_count));

            tokio::time::sleep(Duration::from_millis(800)).await;

            subscription.acknowledge(&message).await.unwrap();
        }

        assert_eq!(vec![(0, 0), (1, 0), (2, 0)], processed);
        assert_eq!(0, broker.backlog_len("herbs", "sub1"));
    }

    #[tokio::test(start_paused = true)]
    async fn late_ack_skips_queued_redelivery() {
        let broker = MemoryBroker::new("memory://test");

        let subscription = broker
            .subscribe(SubscribeOptions::new(
                "herbs",
                "sub1",
                1,
                Duration::from_secs(1),
            ))
            .await
            .unwrap();

        broker
            .publish("herbs", "comfrey", Bytes::from_static(b"data"))
            .unwrap();

        let late = subscription.receive().await.unwrap();

        tokio::time::sleep(Duration::from_millis(1_500)).await;

        assert!(subscription.acknowledge(&late).await.is_ok());

        broker
            .publish("herbs", "sorrel", Bytes::from_static(b"data"))
            .unwrap();

        let next = subscription.receive().await.unwrap();

        assert_eq!("sorrel", next.key);
        assert_eq!(0, next.redelivery_count);
    }

    #[tokio::test]
    async fn close_returns_queued_messages_without_counting_a_delivery() {
        let broker = MemoryBroker::new("memory://test");

        let subscription = broker.subscribe(options("sub1", 10_000)).await.unwrap();

        broker
            .publish("herbs", "comfrey", Bytes::from_static(b"data"))
            .unwrap();
        broker
            .publish("herbs", "sorrel", Bytes::from_static(b"data"))
            .unwrap();

        while broker.backlog_len("herbs", "sub1") > 0 {
            tokio::task::yield_now().await;
        }

        assert!(subscription.close().await.is_ok());
        assert_eq!(2, broker.backlog_len("herbs", "sub1"));

        let next = broker.subscribe(options("sub1", 10_000)).await.unwrap();

        let message = next.receive().await.unwrap();

        assert_eq!("comfrey", message.key);
        assert_eq!(0, message.redelivery_count);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_while_queue_is_full_stops_delivery() {
        let broker = MemoryBroker::new("memory://test");

        let subscription = broker
            .subscribe(SubscribeOptions::new(
                "herbs",
                "sub1",
                1,
                Duration::from_secs(10),
            ))
            .await
            .unwrap();

        broker
            .publish("herbs", "verbena", Bytes::from_static(b"data"))
            .unwrap();
        broker
            .publish("herbs", "sorrel", Bytes::from_static(b"data"))
            .unwrap();

        while broker.backlog_len("herbs", "sub1") > 1 {
            tokio::task::yield_now().await;
        }

        subscription.pause();

        let queued = subscription.receive().await.unwrap();

        assert_eq!("verbena", queued.key);

        let received =
            tokio::time::timeout(Duration::from_secs(5), subscription.receive()).await;

        assert!(received.is_err());
        assert_eq!(1, broker.backlog_len("herbs", "sub1"));
    }

    #[tokio::test(start_paused = true)]
    async fn paused_subscription_stops_delivery() {
        let broker = MemoryBroker::new("memory://test");

        let subscription = broker.subscribe(options("sub1", 10_000)).await.unwrap();
        subscription.pause();

        broker
            .publish("herbs", "echinacea", Bytes::from_static(b"data"))
            .unwrap();

        let received =
            tokio::time::timeout(Duration::from_secs(5), subscription.receive()).await;

        assert!(received.is_err());
        assert_eq!(1, broker.backlog_len("herbs", "sub1"));
    }

    #[tokio::test]
    async fn close_returns_unacked_messages_and_ends_receive() {
        let broker = MemoryBroker::new("memory://test");

        let subscription = broker.subscribe(options("sub1", 10_000)).await.unwrap();

        broker
            .publish("herbs", "verbena", Bytes::from_static(b"data"))
            .unwrap();

        let message = subscription.receive().await.unwrap();

        assert!(subscription.close().await.is_ok());
        assert!(subscription.receive().await.is_none());
        assert_eq!(1, broker.backlog_len("herbs", "sub1"));
        assert_eq!(
            Err(BrokerError::Ack(message.id.to_string())),
            subscription.acknowledge(&message).await
        );
    }

    #[tokio::test]
    async fn injected_close_failure_is_reported() {
        let broker = MemoryBroker::new("memory://test");
        broker.fail_close("sub1");

        let subscription = broker.subscribe(options("sub1", 10_000)).await.unwrap();

        assert_eq!(
            Err(BrokerError::Close(String::from("sub1"))),
            subscription.close().await
        );
    }

    #[tokio::test]
    async fn subscribe_fails_when_unreachable_or_closed() {
        let broker = MemoryBroker::new("memory://test");
        broker.set_unreachable(true);

        assert!(matches!(
            broker.subscribe(options("sub1", 10_000)).await,
            Err(BrokerError::Connection(_))
        ));

        broker.set_unreachable(false);
        broker.close_connection().await.unwrap();

        assert!(!broker.is_connected());
        assert!(matches!(
            broker.subscribe(options("sub1", 10_000)).await,
            Err(BrokerError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn shared_subscription_delivers_nacked_message_to_other_consumer() {
        let broker = MemoryBroker::new("memory://test");

        let first = broker.subscribe(options("shared", 10_000)).await.unwrap();

        broker
            .publish("herbs", "comfrey", Bytes::from_static(b"data"))
            .unwrap();

        let message = first.receive().await.unwrap();
        first.pause();

        let second = broker.subscribe(options("shared", 10_000)).await.unwrap();
        first.negative_acknowledge(&message);

        let redelivered = second.receive().await.unwrap();

        assert_eq!(message.id, redelivered.id);
    }
}
