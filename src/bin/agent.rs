use std::{net::SocketAddr, time::Duration};

use anyhow::Context;
use clap::Parser;
use heartwatch::{
    codec::{SharedKey, seal_random},
    message::{Heartbeat, MAX_NETWORK_INTERFACES},
    util::{get_hub, get_key},
};
use serde_json::{Map, Value, json};
use sysinfo::{Networks, System};
use tokio::net::UdpSocket;
use tracing::{debug, error, info, instrument, level_filters::LevelFilter};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Hub address (defaults to HEARTWATCH_HUB)
    #[arg(long, default_value_t = get_hub())]
    hub: SocketAddr,

    /// Seconds between heartbeats
    #[arg(short, long, default_value_t = 60)]
    interval: u64,

    /// Override the reported device name
    #[arg(short, long)]
    name: Option<String>,
}

fn init() {
    dotenv::dotenv().ok();

    let targets = filter::Targets::new()
        .with_targets(vec![
            ("heartwatch", LevelFilter::TRACE),
            ("heartwatch_agent", LevelFilter::TRACE),
        ])
        .with_default(LevelFilter::INFO);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(targets)
        .init();
}

fn network_interfaces() -> Vec<Value> {
    let networks = Networks::new_with_refreshed_list();
    networks
        .iter()
        .filter(|(name, _)| name.as_str() != "lo")
        .take(MAX_NETWORK_INTERFACES)
        .map(|(name, data)| {
            json!({
                "name": name,
                "mac": data.mac_address().to_string(),
                "addresses": data
                    .ip_networks()
                    .iter()
                    .map(|net| format!("{}/{}", net.addr, net.prefix))
                    .collect::<Vec<_>>(),
            })
        })
        .collect()
}

fn heartbeat(name: &str) -> Heartbeat {
    let mut extra = Map::new();
    if let Some(os) = System::long_os_version() {
        extra.insert("os".to_string(), Value::String(os));
    }
    if let Some(kernel) = System::kernel_version() {
        extra.insert("kernel".to_string(), Value::String(kernel));
    }

    Heartbeat {
        name: name.to_string(),
        timestamp: chrono::Utc::now().timestamp(),
        network_interfaces: network_interfaces(),
        extra,
    }
}

#[instrument(skip(socket, key))]
async fn send(
    socket: &UdpSocket,
    hub: SocketAddr,
    name: &str,
    key: &SharedKey,
) -> anyhow::Result<()> {
    let plaintext = serde_json::to_vec(&heartbeat(name))?;
    let packet = seal_random(&plaintext, key)?;
    let sent = socket
        .send_to(&packet, hub)
        .await
        .with_context(|| format!("failed to send heartbeat to {hub}"))?;
    debug!("sent {sent} bytes");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();
    let args = Args::parse();

    let encoded = get_key().context("HEARTWATCH_KEY is not set")?;
    let key = SharedKey::from_base64(&encoded).context("invalid HEARTWATCH_KEY")?;

    let name = args
        .name
        .or_else(System::host_name)
        .context("could not determine host name, pass --name")?;

    let bind: SocketAddr = if args.hub.is_ipv4() {
        "0.0.0.0:0".parse()?
    } else {
        "[::]:0".parse()?
    };
    let socket = UdpSocket::bind(bind).await?;

    info!(
        "sending heartbeats for `{name}` to {} every {}s",
        args.hub, args.interval
    );

    let mut interval = tokio::time::interval(Duration::from_secs(args.interval.max(1)));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = send(&socket, args.hub, &name, &key).await {
                    error!("{e:#}");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                return Ok(());
            }
        }
    }
}
