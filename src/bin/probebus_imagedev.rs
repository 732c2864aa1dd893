use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use probebus::component::Runner;
use probebus::config::{self, DeviceConfig};
use probebus::control::ControlServer;
use probebus::device::{DeviceController, ImageController};
use probebus::msg::{Point2d, Rect2d, Size2d, Size2u, ENV_KILL};
use probebus::pubsub::{CacheLogic, CachePolicy, Publisher, Subscriber};
use probebus::raster::Grid;

#[derive(Parser)]
#[command(
    name = "probebus-imagedev",
    version,
    about = "Image-backed simulated device controller"
)]
struct Cli {
    /// Reply url for forwarded control requests.
    #[arg(long = "server-url", default_value = "tcp://127.0.0.1:5562")]
    server_url: String,

    /// Url this device's publications bind.
    #[arg(long = "pub-url", default_value = "tcp://127.0.0.1:5555")]
    pub_url: String,

    /// Broker url to watch for the kill signal (optional).
    #[arg(long = "sub-url")]
    sub_url: Option<String>,

    /// Device config JSON; without one a synthetic source image is used.
    #[arg(long = "config")]
    config: Option<PathBuf>,
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

    let cfg: DeviceConfig = match &cli.config {
        Some(path) => config::load(path)?,
        None => serde_json::from_str("{}")?,
    };
    cfg.validate()?;

    let driver = match &cfg.image {
        Some(img) => {
            let roi = Rect2d::new(
                Point2d::new(img.physical_origin.0, img.physical_origin.1),
                Size2d::new(img.physical_size.0, img.physical_size.1),
            );
            let source = Grid::gradient(
                Size2u::new(img.shape.0, img.shape.1),
                roi,
                &img.physical_units,
            );
            ImageController::new(
                source,
                &img.channel,
                &img.data_units,
                Duration::from_secs_f64(img.scan_time_s),
                Duration::from_secs_f64(img.move_time_s),
            )
        }
        None => {
            let roi = Rect2d::new(Point2d::new(0.0, 0.0), Size2d::new(100.0, 100.0));
            let source = Grid::gradient(Size2u::new(128, 128), roi, "nm");
            ImageController::new(
                source,
                "topo",
                "m",
                Duration::from_secs_f64(1.0),
                Duration::from_secs_f64(0.2),
            )
        }
    };

    let server = ControlServer::bind(&cli.server_url)?;
    let publisher = Publisher::bind(&cli.pub_url)?;
    let subscriber = match &cli.sub_url {
        Some(url) => Some(Subscriber::connect(
            &[url.clone()],
            &[ENV_KILL.to_string()],
            CacheLogic::new(),
            CachePolicy::default(),
        )?),
        None => None,
    };

    let mut controller = DeviceController::new(
        "imagedev",
        Box::new(driver),
        server,
        publisher,
        subscriber,
        cfg.poll_timeout(),
    );
    log::info!("image device up on {}, publishing to {}", cli.server_url, cli.pub_url);

    let mut runner = Runner::new("imagedev", cfg.loop_sleep(), cfg.hb_period());
    runner.run(&mut controller);
    Ok(())
}
