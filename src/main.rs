use anyhow::Context;
use env_logger::Env;
use graceful_consumer::app::ConsumerApp;
use graceful_consumer::config::AppConfig;
use log::{info, warn};
use std::path::PathBuf;
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(name = "graceful-consumer")]
pub struct Opt {
    /// Config file path (default: ./graceful-consumer.toml when present)
    #[structopt(short, long, parse(from_os_str))]
    pub config: Option<PathBuf>,
    /// Overrides shutdown.grace_period_ms
    #[structopt(short, long)]
    pub grace_period_ms: Option<u64>,
    /// Overrides consumer.max_consume_delay_ms
    #[structopt(short, long)]
    pub max_consume_delay_ms: Option<u64>,
    /// Do not start the message generator
    #[structopt(long)]
    pub no_producer: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    color_eyre::install().map_err(|err| anyhow::anyhow!("{}", err))?;

    init_logger();

    let options = Opt::from_args();

    let mut config = AppConfig::load(options.config.as_deref())?;

    if let Some(grace_period_ms) = options.grace_period_ms {
        config.shutdown.grace_period_ms = grace_period_ms;
    }

    if let Some(max_consume_delay_ms) = options.max_consume_delay_ms {
        config.consumer.max_consume_delay_ms = max_consume_delay_ms;
    }

    if options.no_producer {
        config.producer.enabled = false;
    }

    let app = ConsumerApp::start(&config)
        .await
        .context("failed to start consumers")?;

    wait_for_termination().await?;

    // a second signal cuts the grace period short
    let force_close = app.interrupter().map(|interrupter| {
        tokio::spawn(async move {
            if wait_for_termination().await.is_ok() {
                warn!("second termination signal received, skipping the rest of the grace period");
                interrupter.interrupt();
            }
        })
    });

    app.shutdown().await;

    if let Some(force_close) = force_close {
        force_close.abort();
    }

    info!("bye");

    Ok(())
}

fn init_logger() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
}

#[cfg(unix)]
async fn wait_for_termination() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate =
        signal(SignalKind::terminate()).context("failed to listen for SIGTERM")?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("failed to listen for ctrl-c")?,
        _ = terminate.recv() => {}
    }

    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_termination() -> anyhow::Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")
}
