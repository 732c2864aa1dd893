//! End-to-end scan through the image-backed device: state transitions are
//! published in order, and the produced scan is bilinear interpolation of
//! the source.

use std::time::{Duration, Instant};

use probebus::component::Runner;
use probebus::control::{ControlClient, ControlResponse, ControlServer};
use probebus::device::{DeviceController, ImageController};
use probebus::msg::{
    Msg, Point2d, Rect2d, ScanParameters2d, ScanState, Size2d, Size2u, SpatialAspects,
};
use probebus::pubsub::{CacheLogic, CachePolicy, Publisher, Subscriber};
use probebus::raster::Grid;

fn requested_params() -> ScanParameters2d {
    let mut params = ScanParameters2d::default();
    params.spatial = SpatialAspects {
        roi: Rect2d::new(Point2d::new(2.0, 2.0), Size2d::new(2.0, 2.0)),
        units: "nm".to_string(),
    };
    params.data.shape = Size2u::new(16, 16);
    params
}

fn observed_states(watcher: &Subscriber) -> Vec<ScanState> {
    watcher
        .cache()
        .get("ScanState")
        .map(|fifo| {
            fifo.iter()
                .filter_map(|m| match m {
                    Msg::ScanState(s) => Some(s.state),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

#[test]
fn scan_timing_and_interpolation() {
    // Source: 11x11 diagonal ramp over (0,0)-(10,10) nm, so the value at
    // physical (x, y) is exactly x + y.
    let source = Grid::gradient(
        Size2u::new(11, 11),
        Rect2d::new(Point2d::new(0.0, 0.0), Size2d::new(10.0, 10.0)),
        "nm",
    );
    let driver = ImageController::new(
        source,
        "topo",
        "m",
        Duration::from_millis(200),
        Duration::from_millis(100),
    );

    let server = ControlServer::bind("tcp://127.0.0.1:0").unwrap();
    let server_url = server.local_addr().unwrap().to_string();
    let publisher = Publisher::bind("tcp://127.0.0.1:0").unwrap();
    let pub_url = publisher.local_addr().unwrap().to_string();

    let mut controller = DeviceController::new(
        "imagedev",
        Box::new(driver),
        server,
        publisher,
        None,
        Duration::from_millis(5),
    );
    std::thread::spawn(move || {
        let mut runner = Runner::new(
            "imagedev",
            Duration::from_millis(2),
            Duration::from_secs(10),
        );
        runner.run(&mut controller);
    });

    let mut policy = CachePolicy::new(1);
    policy.set_depth("ScanState", 16);
    let mut watcher = Subscriber::connect(
        &[pub_url],
        &["ScanState".to_string(), "Scan2d".to_string()],
        CacheLogic::new(),
        policy,
    )
    .unwrap();
    std::thread::sleep(Duration::from_millis(100));

    let mut client =
        ControlClient::new(&server_url, "tester").with_timeouts(Duration::from_millis(500), 4);

    // Move phase: FREE -> MOVING -> FREE within ~move_time.
    assert_eq!(client.set_scan_params(requested_params()), ControlResponse::Success);
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        let _ = watcher.poll(Duration::from_millis(10)).unwrap();
        let states = observed_states(&watcher);
        if states == vec![ScanState::Moving, ScanState::Free] {
            break;
        }
        assert!(Instant::now() < deadline, "move transitions not seen: {states:?}");
    }

    // Scan phase: FREE -> SCANNING -> FREE, then the scan itself.
    assert_eq!(client.start_scan(), ControlResponse::Success);
    let deadline = Instant::now() + Duration::from_secs(2);
    let scan = loop {
        let _ = watcher.poll(Duration::from_millis(10)).unwrap();
        if let Some(Msg::Scan2d(scan)) = watcher.cache().latest("Scan2d_topo_2") {
            break scan.clone();
        }
        assert!(Instant::now() < deadline, "scan never published");
    };

    let states = observed_states(&watcher);
    assert_eq!(
        states,
        vec![
            ScanState::Moving,
            ScanState::Free,
            ScanState::Scanning,
            ScanState::Free
        ]
    );

    assert_eq!(scan.params.data.shape, Size2u::new(16, 16));
    assert_eq!(scan.values.len(), 256);
    assert!(scan.timestamp_ms.is_some());

    // Every sample equals the analytic bilinear value of the ramp.
    let xs = probebus::raster::linspace(2.0, 4.0, 16);
    let ys = probebus::raster::linspace(2.0, 4.0, 16);
    for (row, &y) in ys.iter().enumerate() {
        for (col, &x) in xs.iter().enumerate() {
            let expected = x + y;
            let got = scan.values[row * 16 + col];
            assert!(
                (got - expected).abs() < 1e-9,
                "sample ({col},{row}) = {got}, expected {expected}"
            );
        }
    }
}
