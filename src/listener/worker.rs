use crate::broker::{InboundMessage, MessageId, Subscription};
use crate::listener::{ListenerState, ListenerStatistics, UnitOfWork, WorkError};
use log::{error, info, warn};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Acknowledged,
    NegativelyAcknowledged,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ListenerError {
    #[error("message_id={0} processing interrupted, left for ack timeout redelivery")]
    Interrupted(MessageId),
}

/// Resolves every delivered message to an acknowledgment or a negative acknowledgment.
///
/// Admission is decided once, when the invocation starts. Work that was admitted runs to
/// completion even if the listener starts draining meanwhile.
pub struct MessageListener {
    state: ListenerState,
    work: Arc<dyn UnitOfWork>,
    statistics: Arc<ListenerStatistics>,
}

impl MessageListener {
    pub fn new(state: ListenerState, work: Arc<dyn UnitOfWork>) -> Self {
        MessageListener {
            state,
            work,
            statistics: Arc::new(ListenerStatistics::new()),
        }
    }

    pub fn state(&self) -> &ListenerState {
        &self.state
    }

    pub fn statistics(&self) -> Arc<ListenerStatistics> {
        Arc::clone(&self.statistics)
    }

    pub async fn on_message_delivered(
        &self,
        subscription: &dyn Subscription,
        message: InboundMessage,
    ) -> Result<Disposition, ListenerError> {
        info!(
            "received [key={}, message_id={}], subscription={}",
            &message.key,
            message.id,
            subscription.name()
        );

        if !self.state.is_accepting_new_work() {
            info!(
                "not accepting new messages, negative acking [key={}, message_id={}]",
                &message.key, message.id
            );

            subscription.negative_acknowledge(&message);
            self.statistics.rejected();

            return Ok(Disposition::NegativelyAcknowledged);
        }

        self.statistics.admitted();

        match self.work.process(&message).await {
            Ok(()) => {}
            Err(WorkError::Interrupted) => {
                error!(
                    "processing interrupted, did not finish [key={}, message_id={}]",
                    &message.key, message.id
                );

                self.statistics.interrupted();

                return Err(ListenerError::Interrupted(message.id));
            }
            Err(WorkError::Failed(reason)) => {
                warn!(
                    "processing failed [key={}, message_id={}], err={}",
                    &message.key, message.id, reason
                );

                subscription.negative_acknowledge(&message);
                self.statistics.failed();

                return Ok(Disposition::NegativelyAcknowledged);
            }
        }

        match subscription.acknowledge(&message).await {
            Ok(()) => {
                info!(
                    "successfully processed [key={}, message_id={}]",
                    &message.key, message.id
                );

                self.statistics.acknowledged();

                Ok(Disposition::Acknowledged)
            }
            Err(err) => {
                error!(
                    "acknowledge error [key={}, message_id={}], err={}",
                    &message.key, message.id, err
                );

                subscription.negative_acknowledge(&message);
                self.statistics.ack_fallback();

                Ok(Disposition::NegativelyAcknowledged)
            }
        }
    }
}
