use crate::broker::{BrokerClient, BrokerError, SubscribeOptions};
use crate::consumer::{ConsumerHandle, MessageDispatcher};
use crate::listener::MessageListener;
use log::{error, info};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseOutcome {
    pub consumer_id: u32,
    pub subscription: String,
    pub result: Result<(), BrokerError>,
}

pub struct ConsumerControlPlane {
    client: Arc<dyn BrokerClient>,
    consumers: Vec<ConsumerHandle>,
    id_generator: AtomicU32,
    client_closed: AtomicBool,
}

impl ConsumerControlPlane {
    pub fn new(client: Arc<dyn BrokerClient>) -> Self {
        ConsumerControlPlane {
            client,
            consumers: Vec::new(),
            id_generator: AtomicU32::new(0),
            client_closed: AtomicBool::new(false),
        }
    }

    pub async fn subscribe(
        &mut self,
        options: SubscribeOptions,
        listener: Arc<MessageListener>,
    ) -> Result<&ConsumerHandle, BrokerError> {
        let subscription = self.client.subscribe(options.clone()).await?;

        let consumer_id = self.id_generator.fetch_add(1, Ordering::SeqCst);

        let dispatcher = MessageDispatcher::start(
            consumer_id,
            Arc::clone(&subscription),
            listener,
            options.receiver_queue_size,
        );

        info!(
            "consumer[id={}] created, topic={}, subscription={}, receiver_queue_size={}, ack_timeout_ms={}",
            consumer_id,
            &options.topic,
            &options.subscription,
            options.receiver_queue_size,
            options.ack_timeout.as_millis()
        );

        self.consumers
            .push(ConsumerHandle::new(consumer_id, options, subscription, dispatcher));

        Ok(&self.consumers[self.consumers.len() - 1])
    }

    pub fn consumers(&self) -> &[ConsumerHandle] {
        &self.consumers
    }

    pub fn pause_all(&self) {
        for consumer in &self.consumers {
            consumer.pause();
        }
    }

    pub async fn close_all(&self) -> Vec<CloseOutcome> {
        let mut outcomes = Vec::with_capacity(self.consumers.len());

        for consumer in &self.consumers {
            let result = consumer.close().await;

            if let Err(err) = &result {
                error!(
                    "consumer[id={}] unable to close, subscription={}, err={}",
                    consumer.id,
                    consumer.subscription_name(),
                    err
                );
            }

            outcomes.push(CloseOutcome {
                consumer_id: consumer.id,
                subscription: String::from(consumer.subscription_name()),
                result,
            });
        }

        outcomes
    }

    /// Closes the broker connection, attempted once whatever happened to the handles.
    pub async fn close_client(&self) -> Result<(), BrokerError> {
        if self.client_closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Err(err) = self.client.close_connection().await {
            error!("unable to close broker client, err={}", err);

            return Err(err);
        }

        info!("broker client closed");

        Ok(())
    }
}
