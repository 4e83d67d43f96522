use crate::broker::Publisher;
use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use log::{error, info};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub const KEYS: [&str; 4] = ["comfrey", "echinacea", "verbena", "sorrel"];

pub struct MessageGenerator {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<u64>,
}

impl MessageGenerator {
    pub fn start(
        publisher: Arc<dyn Publisher>,
        topic: &str,
        send_interval: Duration,
        seed: Option<u64>,
    ) -> Self {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let topic = String::from(topic);

        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let handle = tokio::spawn(async move {
            let mut sent: u64 = 0;

            let mut ticker = tokio::time::interval(send_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            // first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = stop_rx.wait_for(|stopped| *stopped) => break,
                }

                let key = KEYS.choose(&mut rng).copied().unwrap_or(KEYS[0]);
                let payload = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

                match publisher.send(&topic, key, Bytes::from(payload)).await {
                    Ok(id) => {
                        sent += 1;
                        info!("sent [key={}, message_id={}], topic={}", key, id, &topic);
                    }
                    Err(err) => {
                        error!("error producing message, topic={}, err={}", &topic, err);
                    }
                }
            }

            info!("message generator stopped, topic={}, sent={}", &topic, sent);

            sent
        });

        MessageGenerator { stop_tx, handle }
    }

    /// Stops the schedule and waits for the task; returns the number of messages sent.
    pub async fn stop(self) -> u64 {
        self.stop_tx.send_replace(true);

        match self.handle.await {
            Ok(sent) => sent,
            Err(err) => {
                error!("message generator task failed, err={}", err);
                0
            }
        }
    }
}
