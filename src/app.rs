use crate::broker::{BrokerClient, BrokerError, MemoryBroker, SubscribeOptions};
use crate::config::AppConfig;
use crate::consumer::ConsumerControlPlane;
use crate::listener::{ListenerState, MessageListener, RandomDelayWork};
use crate::metrics::MetricsWriter;
use crate::producer::MessageGenerator;
use crate::shutdown::{ShutdownOrchestrator, ShutdownReport, WaitInterrupter};
use log::{error, info};
use std::sync::Arc;

pub struct ConsumerApp {
    broker: Arc<MemoryBroker>,
    subscription: String,
    listener: Option<Arc<MessageListener>>,
    orchestrator: Option<ShutdownOrchestrator>,
    generator: Option<MessageGenerator>,
}

impl ConsumerApp {
    pub async fn start(config: &AppConfig) -> Result<Self, BrokerError> {
        let broker = Arc::new(MemoryBroker::new(&config.broker.url));

        info!("connected to broker, url={}", broker.url());

        let mut listener = None;
        let mut orchestrator = None;

        if config.consumer.enabled {
            let work = match config.consumer.seed {
                Some(seed) => {
                    RandomDelayWork::with_seed(config.consumer.max_consume_delay(), seed)
                }
                None => RandomDelayWork::new(config.consumer.max_consume_delay()),
            };

            let state = ListenerState::new();
            let message_listener =
                Arc::new(MessageListener::new(state.clone(), Arc::new(work)));

            let mut control_plane = ConsumerControlPlane::new(broker.clone());

            for _ in 0..config.consumer.consumers {
                control_plane
                    .subscribe(
                        SubscribeOptions::new(
                            &config.consumer.topic,
                            &config.consumer.subscription,
                            config.consumer.receiver_queue_size,
                            config.consumer.ack_timeout(),
                        ),
                        Arc::clone(&message_listener),
                    )
                    .await?;
            }

            let mut shutdown_orchestrator =
                ShutdownOrchestrator::new(control_plane, state, config.shutdown.grace_period());
            shutdown_orchestrator.watch_statistics(message_listener.statistics());

            listener = Some(message_listener);
            orchestrator = Some(shutdown_orchestrator);
        }

        let generator = if config.producer.enabled {
            Some(MessageGenerator::start(
                broker.clone(),
                &config.consumer.topic,
                config.producer.send_interval(),
                config.consumer.seed,
            ))
        } else {
            None
        };

        Ok(ConsumerApp {
            broker,
            subscription: config.consumer.subscription.clone(),
            listener,
            orchestrator,
            generator,
        })
    }

    pub fn broker(&self) -> Arc<MemoryBroker> {
        Arc::clone(&self.broker)
    }

    pub fn interrupter(&self) -> Option<WaitInterrupter> {
        self.orchestrator
            .as_ref()
            .map(|orchestrator| orchestrator.interrupter())
    }

    pub async fn shutdown(self) -> Option<ShutdownReport> {
        if let Some(generator) = self.generator {
            generator.stop().await;
        }

        let report = match &self.orchestrator {
            Some(orchestrator) => orchestrator.on_termination_signal().await,
            None => {
                if let Err(err) = self.broker.close_connection().await {
                    error!("unable to close broker client, err={}", err);
                }
                None
            }
        };

        if let Some(listener) = &self.listener {
            let mut metrics = String::with_capacity(1024);

            let snapshot = listener.statistics().snapshot();

            match MetricsWriter::write(&mut metrics, &self.subscription, &snapshot) {
                Ok(()) => info!("final consumer metrics:\n{}", metrics),
                Err(err) => error!("unable to render metrics, err={}", err),
            }
        }

        report
    }
}
