use crate::broker::InboundMessage;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkError {
    #[error("processing interrupted")]
    Interrupted,
    #[error("processing failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait UnitOfWork: Send + Sync {
    async fn process(&self, message: &InboundMessage) -> Result<(), WorkError>;
}

/// Sleeps for a random duration in `(0, max_delay]`.
pub struct RandomDelayWork {
    max_delay: Duration,
    rng: Mutex<StdRng>,
}

impl RandomDelayWork {
    pub fn new(max_delay: Duration) -> Self {
        RandomDelayWork {
            max_delay,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn with_seed(max_delay: Duration, seed: u64) -> Self {
        RandomDelayWork {
            max_delay,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    async fn next_delay(&self) -> Duration {
        let max_nanos = u64::try_from(self.max_delay.as_nanos()).unwrap_or(u64::MAX);

        if max_nanos == 0 {
            return Duration::ZERO;
        }

        let mut rng = self.rng.lock().await;

        Duration::from_nanos(rng.gen_range(1..=max_nanos))
    }
}

#[async_trait]
impl UnitOfWork for RandomDelayWork {
    async fn process(&self, _: &InboundMessage) -> Result<(), WorkError> {
        let delay = self.next_delay().await;

        tokio::time::sleep(delay).await;

        Ok(())
    }
}
