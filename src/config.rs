use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "graceful-consumer.toml";

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub broker: BrokerConfig,
    pub consumer: ConsumerConfig,
    pub producer: ProducerConfig,
    pub shutdown: ShutdownConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub url: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        BrokerConfig {
            url: String::from("memory://local"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    pub enabled: bool,
    pub topic: String,
    pub subscription: String,
    pub consumers: usize,
    pub receiver_queue_size: usize,
    pub ack_timeout_ms: u64,
    pub max_consume_delay_ms: u64,
    pub seed: Option<u64>,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        ConsumerConfig {
            enabled: true,
            topic: String::from("herbs"),
            subscription: String::from("herbs-subscription"),
            consumers: 1,
            receiver_queue_size: 5,
            ack_timeout_ms: 10_000,
            max_consume_delay_ms: 5_000,
            seed: None,
        }
    }
}

impl ConsumerConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn max_consume_delay(&self) -> Duration {
        Duration::from_millis(self.max_consume_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    pub enabled: bool,
    pub send_interval_ms: u64,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        ProducerConfig {
            enabled: true,
            send_interval_ms: 1_000,
        }
    }
}

impl ProducerConfig {
    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    pub grace_period_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        ShutdownConfig {
            grace_period_ms: 10_000,
        }
    }
}

impl ShutdownConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

impl AppConfig {
    /// Loads `path` when given, otherwise `./graceful-consumer.toml` if present, otherwise defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let local_config = PathBuf::from(DEFAULT_CONFIG_PATH);

                if local_config.exists() {
                    Self::from_file(&local_config)?
                } else {
                    log::debug!("no config file found, using defaults");
                    Self::default()
                }
            }
        };

        config.validate()?;

        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        let config = Self::from_toml(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;

        log::info!("loaded config from {}", path.display());

        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.broker.url.starts_with("memory://") {
            bail!("unsupported broker url: {}", self.broker.url);
        }

        if self.consumer.consumers == 0 {
            bail!("consumer.consumers must be at least 1");
        }

        if self.consumer.receiver_queue_size == 0 {
            bail!("consumer.receiver_queue_size must be at least 1");
        }

        if self.consumer.topic.is_empty() || self.consumer.subscription.is_empty() {
            bail!("consumer.topic and consumer.subscription must not be empty");
        }

        if self.producer.enabled && self.producer.send_interval_ms == 0 {
            bail!("producer.send_interval_ms must be greater than 0");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::AppConfig;
    use std::time::Duration;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();

        assert!(config.validate().is_ok());
        assert_eq!(5, config.consumer.receiver_queue_size);
        assert_eq!(Duration::from_secs(10), config.consumer.ack_timeout());
        assert_eq!(Duration::from_secs(10), config.shutdown.grace_period());
    }

    #[test]
    fn parse_config_toml() {
        let toml = r#"
[consumer]
topic = "plants"
subscription = "plants-sub"
consumers = 2
receiver_queue_size = 8
max_consume_delay_ms = 1000
seed = 7

[producer]
enabled = false

[shutdown]
grace_period_ms = 2000
"#;

        let config = AppConfig::from_toml(toml).unwrap();

        assert_eq!("memory://local", config.broker.url);
        assert_eq!("plants", config.consumer.topic);
        assert_eq!("plants-sub", config.consumer.subscription);
        assert_eq!(2, config.consumer.consumers);
        assert_eq!(8, config.consumer.receiver_queue_size);
        assert_eq!(Duration::from_secs(1), config.consumer.max_consume_delay());
        assert_eq!(Some(7), config.consumer.seed);
        assert!(!config.producer.enabled);
        assert_eq!(Duration::from_secs(2), config.shutdown.grace_period());
    }

    #[test]
    fn rejects_zero_receiver_queue() {
        let config = AppConfig::from_toml("[consumer]\nreceiver_queue_size = 0\n").unwrap();

        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unknown_broker_scheme() {
        let config = AppConfig::from_toml("[broker]\nurl = \"pulsar://localhost:6650\"\n").unwrap();

        assert!(config.validate().is_err());
    }
}
