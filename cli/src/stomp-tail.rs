use anyhow::{Context, Result, bail};
use clap::Parser;
use lib_realtime::analytics::AnalyticsFeed;
use lib_realtime::configs::{ClientConfig, load_config};
use lib_realtime::stomp::{ConnectionState, StompMessage};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    name = "stomp-tail",
    version,
    about = "Subscribe to STOMP topics and print every message, reconnecting as needed"
)]
struct Args {
    /// Destinations to subscribe to, e.g. /topic/alerts
    topics: Vec<String>,

    /// Follow every analytics topic and print a running summary
    #[arg(long)]
    analytics: bool,

    /// Seconds between analytics summaries
    #[arg(long, default_value_t = 10)]
    summary_every: u64,

    /// Print message headers as well as bodies
    #[arg(long)]
    show_headers: bool,

    #[command(flatten)]
    client: ClientConfig,
}

fn print_message(message: &StompMessage, show_headers: bool) {
    println!("[{}] {}", message.destination, message.body_text());
    if show_headers {
        for (name, value) in &message.headers {
            println!("    {}: {}", name, value);
        }
    }
}

fn print_summary(feed: &AnalyticsFeed) {
    let snapshot = feed.snapshot();
    let data = serde_json::Value::Object(snapshot.analytics_data.clone());
    println!("--- analytics ---");
    println!("summary:         {}", data);
    println!("risk updates:    {} suppliers", snapshot.risk_updates.len());
    println!("recommendations: {}", snapshot.recommendations.len());
    if let Some(latest) = snapshot.real_time_updates.front() {
        println!("latest update:   {}", latest);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    if args.topics.is_empty() && !args.analytics {
        bail!("Nothing to follow: pass one or more topics or --analytics");
    }

    let config = load_config(args.client).context("Failed to load client configuration")?;
    lib_realtime::loggers::setup_logging("stomp-tail", &config.log_dir(), config.log_level())?;

    let client = config.build_client()?;
    log::info!("Following {} via {}", args.topics.join(", "), config.url());

    let show_headers = args.show_headers;
    for topic in &args.topics {
        if client
            .subscribe(topic, move |message| print_message(message, show_headers))
            .is_none()
        {
            log::warn!("Skipping invalid topic {:?}", topic);
        }
    }

    let feed = AnalyticsFeed::new();
    if args.analytics {
        feed.attach(&client);
    }

    let mut summary = tokio::time::interval(Duration::from_secs(args.summary_every.max(1)));
    let mut states = client.state_changes();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("Ctrl-C received, disconnecting.");
                break;
            }
            changed = states.changed() => {
                if changed.is_err() {
                    bail!("STOMP client stopped unexpectedly");
                }
                let status = states.borrow_and_update().clone();
                log::info!("Connection state: {} (reconnect attempts: {})", status.state, status.reconnect_attempts);
                if let ConnectionState::Error(message) = status.state {
                    bail!("Broker reported an error: {}", message);
                }
            }
            _ = summary.tick(), if args.analytics => print_summary(&feed),
        }
    }

    client.disconnect();
    let stopped = tokio::time::timeout(
        Duration::from_secs(2),
        client.wait_for(|status| status.state == ConnectionState::Disconnected),
    )
    .await;
    if stopped.is_err() {
        log::warn!("Timed out waiting for a clean disconnect");
    }
    Ok(())
}
