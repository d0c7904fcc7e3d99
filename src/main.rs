use std::time::Duration;

use bytes::Bytes;
use clap::Parser;
use pubhub::{
    logging::{init_logging, LogFormat, LoggingConfig},
    Hub, HubConfig, Subscription,
};
use tracing::info;

/// Demo: exact and pattern subscribers on one hub.
#[derive(Debug, Parser)]
#[command(name = "pubhub", version, about)]
struct Args {
    /// Queue size for every topic and subscriber (overrides PUBHUB_QUEUE_SIZE).
    #[arg(long)]
    queue_size: Option<usize>,

    /// Log level: trace, debug, info, warn, error.
    #[arg(long, env = "PUBHUB_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log format: compact, pretty, json.
    #[arg(long, env = "PUBHUB_LOG_FORMAT", default_value_t = LogFormat::Compact)]
    log_format: LogFormat,
}

fn spawn_printer(
    name: &'static str,
    mut sub: Subscription<Bytes>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(msg) = sub.recv().await {
            println!(
                "{name:<10} TOPIC: {:<14} MSG: {}",
                msg.channel,
                String::from_utf8_lossy(&msg.payload)
            );
        }
        info!(subscriber = name, "stream closed");
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(LoggingConfig {
        level: args.log_level.clone(),
        format: args.log_format,
        ..Default::default()
    })
    .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;

    let mut config = HubConfig::load()?;
    if let Some(queue_size) = args.queue_size {
        config.queue_size = queue_size;
    }
    let hub: Hub<Bytes> = Hub::with_config(config)?;
    info!(config = ?hub.config(), "hub started");

    let sub11 = hub.subscribe("/some/topic/1")?;
    let sub12 = hub.subscribe("/some/topic/1")?;
    let sub2 = hub.subscribe("/some/topic/2")?;
    let sub3 = hub.psubscribe("/some/topic/*")?;
    let (id11, id12, id2, id3) = (sub11.id(), sub12.id(), sub2.id(), sub3.id());

    let printers = vec![
        spawn_printer("sub11", sub11),
        spawn_printer("sub12", sub12),
        spawn_printer("sub2", sub2),
        spawn_printer("sub3", sub3),
    ];

    for (i, topic) in ["/some/topic/1", "/some/topic/2", "/some/topic/3"]
        .iter()
        .cycle()
        .take(6)
        .enumerate()
    {
        let routed = hub
            .publish(topic, Bytes::from(format!("message {} !", i + 1)))
            .await?;
        info!(topic, routed, "published");
    }

    tokio::time::sleep(Duration::from_secs(1)).await;

    hub.unsubscribe("/some/topic/1", id11);
    hub.unsubscribe("/some/topic/1", id12);
    hub.unsubscribe("/some/topic/2", id2);
    hub.punsubscribe("/some/topic/*", id3);

    for printer in printers {
        printer.await?;
    }

    info!(stats = ?hub.stats(), "hub closing");
    hub.close();
    Ok(())
}
