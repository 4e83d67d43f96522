use crate::broker::{BrokerError, SubscribeOptions, Subscription};
use log::info;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub struct ConsumerHandle {
    pub id: u32,
    options: SubscribeOptions,
    subscription: Arc<dyn Subscription>,
    paused: AtomicBool,
    closed: AtomicBool,
    dispatcher: JoinHandle<()>,
}

impl ConsumerHandle {
    pub fn new(
        id: u32,
        options: SubscribeOptions,
        subscription: Arc<dyn Subscription>,
        dispatcher: JoinHandle<()>,
    ) -> Self {
        ConsumerHandle {
            id,
            options,
            subscription,
            paused: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            dispatcher,
        }
    }

    pub fn topic(&self) -> &str {
        &self.options.topic
    }

    pub fn subscription_name(&self) -> &str {
        &self.options.subscription
    }

    pub fn receiver_queue_size(&self) -> usize {
        self.options.receiver_queue_size
    }

    pub fn ack_timeout(&self) -> Duration {
        self.options.ack_timeout
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn is_dispatching(&self) -> bool {
        !self.dispatcher.is_finished()
    }

    pub fn pause(&self) {
        if self.paused.swap(true, Ordering::SeqCst) {
            return;
        }

        self.subscription.pause();

        info!(
            "consumer[id={}] paused, topic={}, subscription={}",
            self.id,
            self.topic(),
            self.subscription_name()
        );
    }

    /// Closes the subscription. Only the first call reaches the broker.
    pub async fn close(&self) -> Result<(), BrokerError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.subscription.close().await?;

        info!(
            "consumer[id={}] closed, topic={}, subscription={}",
            self.id,
            self.topic(),
            self.subscription_name()
        );

        Ok(())
    }
}
