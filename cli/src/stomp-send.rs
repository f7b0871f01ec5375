use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use lib_realtime::configs::{ClientConfig, load_config};
use lib_realtime::stomp::ConnectionState;
use std::io::Read;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    name = "stomp-send",
    version,
    about = "Publish a message to a STOMP destination"
)]
struct Args {
    /// Destination, e.g. /app/alerts
    destination: String,

    /// Message body; read from stdin when omitted
    body: Option<String>,

    /// Validate the body as JSON and send it with content-type application/json
    #[arg(long)]
    json: bool,

    /// Extra message header, repeatable
    #[arg(long = "set", value_name = "NAME:VALUE")]
    message_headers: Vec<String>,

    /// Number of copies to send
    #[arg(long, default_value_t = 1)]
    count: u32,

    #[command(flatten)]
    client: ClientConfig,
}

fn parse_headers(raw: &[String]) -> Result<Vec<(String, String)>> {
    raw.iter()
        .map(|header| {
            let (name, value) = header
                .split_once(':')
                .ok_or_else(|| anyhow!("Invalid header '{}', expected NAME:VALUE", header))?;
            Ok((name.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config = load_config(args.client).context("Failed to load client configuration")?;
    lib_realtime::loggers::setup_logging("stomp-send", &config.log_dir(), config.log_level())?;

    let body = match args.body {
        Some(body) => body,
        None => {
            let mut body = String::new();
            std::io::stdin()
                .read_to_string(&mut body)
                .context("Failed to read message body from stdin")?;
            body
        }
    };
    let headers = parse_headers(&args.message_headers)?;

    let client = config.build_client()?;
    client.connect();

    let options = config.to_options()?;
    let status = tokio::time::timeout(
        options.connect_timeout() + Duration::from_secs(1),
        client.wait_for(|status| status.is_connected() || status.has_error()),
    )
    .await
    .map_err(|_| anyhow!("Could not connect to {} in time", config.url()))??;
    if let ConnectionState::Error(message) = status.state {
        bail!("Broker rejected the connection: {}", message);
    }

    for _ in 0..args.count.max(1) {
        if args.json {
            let payload: serde_json::Value =
                serde_json::from_str(&body).context("Body is not valid JSON")?;
            client.publish_json(&args.destination, &payload, headers.clone())?;
        } else {
            client.publish(&args.destination, body.clone(), headers.clone());
        }
    }
    log::info!("Queued {} message(s) for {}", args.count.max(1), args.destination);

    // Requests are applied in order, so the sends go out before DISCONNECT.
    client.disconnect();
    let _ = tokio::time::timeout(
        Duration::from_secs(2),
        client.wait_for(|status| status.state == ConnectionState::Disconnected),
    )
    .await;
    Ok(())
}
