use crate::broker::Subscription;
use crate::listener::MessageListener;
use log::{debug, warn};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Hands every message of a subscription to its own worker task.
pub struct MessageDispatcher;

impl MessageDispatcher {
    pub fn start(
        consumer_id: u32,
        subscription: Arc<dyn Subscription>,
        listener: Arc<MessageListener>,
        capacity: usize,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let permits = Arc::new(Semaphore::new(capacity.max(1)));

            loop {
                let permit = match Arc::clone(&permits).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };

                let message = match subscription.receive().await {
                    Some(message) => message,
                    None => break,
                };

                let subscription = Arc::clone(&subscription);
                let listener = Arc::clone(&listener);

                tokio::spawn(async move {
                    if let Err(err) = listener
                        .on_message_delivered(subscription.as_ref(), message)
                        .await
                    {
                        warn!("consumer[id={}] worker error: {}", consumer_id, err);
                    }

                    drop(permit);
                });
            }

            debug!(
                "consumer[id={}] dispatcher exited, subscription={}",
                consumer_id,
                subscription.name()
            );
        })
    }
}
