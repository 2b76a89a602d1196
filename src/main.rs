//! mqttctl - command-line MQTT client entry point
//!
//! Argument collection and process-boundary concerns only: the session
//! controller returns a terminal result and the exit status is decided here.

use bytes::Bytes;
use clap::Parser;
use mqttctl::session::RumqttcEngine;
use mqttctl::{endpoint, ActionPlan, Credentials, SessionController};
use std::process;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info};
use uuid::Uuid;

/// Command-line MQTT client: subscribe and publish over TCP, TLS or WebSocket
#[derive(Parser)]
#[command(name = "mqttctl")]
#[command(about = "Subscribe and publish to an MQTT broker")]
#[command(version)]
struct Args {
    /// The server address, e.g. 192.168.0.1:1883 or wss://example.com:443
    server: String,

    /// The client ID to use for the connection (default: autogenerated)
    #[arg(short = 'c', long)]
    clientid: Option<String>,

    /// The user name to use for the connection
    #[arg(short = 'u', long)]
    username: Option<String>,

    /// The password to use for the connection
    #[arg(short = 'P', long)]
    password: Option<String>,

    /// Subscribe to a topic filter (repeatable)
    #[arg(short = 's', long = "subscribe", value_name = "topicfilter")]
    subscribe: Vec<String>,

    /// Publish to a topic (repeatable)
    #[arg(short = 'p', long = "publish", value_name = "topic")]
    publish: Vec<String>,

    /// Publish payload, paired with --publish by position (repeatable)
    #[arg(short = 'l', long = "payload", value_name = "payload")]
    payload: Vec<String>,

    /// Retain flag for publishes
    #[arg(short = 'r', long)]
    retain: bool,

    /// QoS for subscriptions and publishes
    #[arg(short = 'q', long, default_value_t = 1)]
    qos: u8,

    /// Use SSL for TCP connections (WebSocket connections take SSL from the
    /// URL scheme)
    #[arg(short = 'S', long)]
    ssl: bool,

    /// Ignore self signed certificate errors
    #[arg(short = 'A', long)]
    accept_self_signed_certificate: bool,

    /// Be more verbose
    #[arg(short = 'v', long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        "mqttctl=debug,rumqttc=warn"
    } else {
        "mqttctl=info,rumqttc=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    // Validate all input before any network activity.
    let payloads: Vec<Bytes> = args.payload.iter().map(|p| Bytes::from(p.clone())).collect();
    let plan = match ActionPlan::build(
        args.qos,
        &args.subscribe,
        &args.publish,
        &payloads,
        args.retain,
    ) {
        Ok(plan) => plan,
        Err(e) => {
            error!("{}", e);
            process::exit(e.exit_code());
        }
    };

    let target = match endpoint::resolve(&args.server, args.ssl) {
        Ok(target) => target,
        Err(e) => {
            error!("{}. Examples:", e);
            eprintln!("  192.168.0.1:1883");
            eprintln!("  example.com:1883");
            eprintln!("  ws://192.168.0.1:80");
            eprintln!("  wss://example.com:443");
            process::exit(e.exit_code());
        }
    };

    let credentials = Credentials {
        username: args.username,
        password: args.password,
    };
    let client_id = args
        .clientid
        .unwrap_or_else(|| format!("mqttctl-{}", Uuid::new_v4()));

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let engine = RumqttcEngine::new(client_id, events_tx);
    let controller = SessionController::new(
        engine,
        events_rx,
        plan,
        credentials,
        args.accept_self_signed_certificate,
    );

    info!("Connecting to server {}:{}", target.host, target.port);

    // Ctrl-C resolves the shutdown future; the controller closes the session
    // before returning so the broker sees a DISCONNECT.
    let shutdown = async {
        let _ = signal::ctrl_c().await;
    };
    if let Err(e) = controller.run(&target, shutdown).await {
        error!("{}", e);
        process::exit(e.exit_code());
    }
}
