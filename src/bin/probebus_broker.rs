use std::error::Error;

use clap::Parser;

use probebus::msg::ENV_SCAN2D;
use probebus::pubsub::{CachePolicy, PubSubCache};
use probebus::wire;

#[derive(Parser)]
#[command(name = "probebus-broker", version, about = "Replay broker for the probebus fabric")]
struct Cli {
    /// Url subscribers connect to.
    #[arg(long = "bind-url", default_value = "tcp://127.0.0.1:5556")]
    bind_url: String,

    /// Upstream publisher urls (repeatable).
    #[arg(long = "sub-url", required = true)]
    sub_urls: Vec<String>,

    /// Default per-envelope history depth.
    #[arg(long = "cache-depth", default_value_t = 1)]
    cache_depth: usize,

    /// History depth for scan envelopes.
    #[arg(long = "scan-depth", default_value_t = 1)]
    scan_depth: usize,
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

    let mut policy = CachePolicy::new(cli.cache_depth);
    policy.set_depth(ENV_SCAN2D, cli.scan_depth);

    let mut broker = PubSubCache::bind(&cli.bind_url, &cli.sub_urls, policy)?;
    log::info!("broker up on {}, upstream {:?}", cli.bind_url, cli.sub_urls);

    loop {
        broker.poll()?;
        wire::park();
    }
}
