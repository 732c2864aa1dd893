use std::error::Error;
use std::time::Duration;

use clap::Parser;

use probebus::component::Heartbeater;
use probebus::control::{ControlClient, ControlRouter, ControlServer};
use probebus::msg::{ControlMode, ENV_HEARTBEAT};
use probebus::pubsub::{CacheLogic, CachePolicy, Publisher, Subscriber};

#[derive(Parser)]
#[command(name = "probebus-router", version, about = "Control router for the probebus fabric")]
struct Cli {
    /// Client-facing reply url.
    #[arg(long = "router-url", default_value = "tcp://127.0.0.1:5560")]
    router_url: String,

    /// Url of the device controller's reply socket.
    #[arg(long = "device-url", required = true)]
    device_url: String,

    /// Url this router's state broadcasts bind.
    #[arg(long = "pub-url", default_value = "tcp://127.0.0.1:5561")]
    pub_url: String,

    /// Publisher urls to watch for component heartbeats (repeatable).
    #[arg(long = "hb-sub-url")]
    hb_sub_urls: Vec<String>,

    /// Initial control mode: manual or automated.
    #[arg(long = "mode", default_value = "manual")]
    mode: String,

    /// Identities granted administrator requests (repeatable).
    #[arg(long = "admin")]
    admins: Vec<String>,

    #[arg(long = "request-timeout-ms", default_value_t = 2000)]
    request_timeout_ms: u64,

    #[arg(long = "request-retries", default_value_t = 3)]
    request_retries: u32,

    #[arg(long = "poll-timeout-ms", default_value_t = 25)]
    poll_timeout_ms: u64,

    #[arg(long = "hb-period-s", default_value_t = 5.0)]
    hb_period_s: f64,
}

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let mode = match cli.mode.as_str() {
        "manual" => ControlMode::Manual,
        "automated" => ControlMode::Automated,
        other => return Err(format!("unknown mode {other:?}").into()),
    };

    let server = ControlServer::bind(&cli.router_url)?;
    let device = ControlClient::new(&cli.device_url, "router").with_timeouts(
        Duration::from_millis(cli.request_timeout_ms),
        cli.request_retries,
    );
    let publisher = Publisher::bind(&cli.pub_url)?;
    let heartbeats = if cli.hb_sub_urls.is_empty() {
        None
    } else {
        Some(Subscriber::connect(
            &cli.hb_sub_urls,
            &[ENV_HEARTBEAT.to_string()],
            CacheLogic::new(),
            CachePolicy::default(),
        )?)
    };

    let mut router = ControlRouter::new(server, device, publisher, heartbeats, mode, cli.admins);
    let mut heartbeater = Heartbeater::new("router", Duration::from_secs_f64(cli.hb_period_s));
    let poll_timeout = Duration::from_millis(cli.poll_timeout_ms);
    log::info!("router up on {}, device at {}", cli.router_url, cli.device_url);

    while !router.shutdown_requested() {
        router.poll(poll_timeout)?;
        heartbeater.beat_if_due(router.publisher_mut())?;
    }
    log::info!("experiment ended, router shutting down");
    Ok(())
}
