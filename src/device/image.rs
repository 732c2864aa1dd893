//! A simulated instrument backed by a single in-memory image.
//!
//! Scans run against a source grid spanning a fixed physical ROI: a
//! parameter change "moves" the tip for `move_time`, a scan "acquires" for
//! `scan_time` and then produces a `Scan2d` whose samples are bilinear
//! interpolation of the source over the requested grid. Useful for end-to-
//! end tests and demos without hardware.

use std::time::{Duration, Instant};

use crate::control::ControlResponse;
use crate::device::driver::DeviceDriver;
use crate::msg::{Rect2d, Scan2d, ScanParameters2d, ScanState};
use crate::raster::Grid;
use crate::units;

pub struct ImageController {
    source: Grid,
    channel: String,
    data_units: String,
    scan_time: Duration,
    move_time: Duration,

    state: ScanState,
    params: ScanParameters2d,
    scan: Option<Scan2d>,
    started: Option<Instant>,
}

impl ImageController {
    pub fn new(
        source: Grid,
        channel: &str,
        data_units: &str,
        scan_time: Duration,
        move_time: Duration,
    ) -> Self {
        Self {
            source,
            channel: channel.to_string(),
            data_units: data_units.to_string(),
            scan_time,
            move_time,
            state: ScanState::Free,
            params: ScanParameters2d::default(),
            scan: None,
            started: None,
        }
    }

    /// Advance the simulated motion/acquisition clock. Called from every
    /// poll so state settles without a dedicated loop of its own.
    fn settle(&mut self) {
        let Some(started) = self.started else { return };
        let duration = match self.state {
            ScanState::Scanning => self.scan_time,
            ScanState::Moving => self.move_time,
            _ => {
                self.started = None;
                return;
            }
        };
        if started.elapsed() < duration {
            return;
        }
        let finished_scan = self.state == ScanState::Scanning;
        self.started = None;
        self.state = ScanState::Free;
        if finished_scan {
            self.acquire();
        }
    }

    /// Interpolate the source over the requested grid and stamp the result.
    fn acquire(&mut self) {
        let roi = self.params.spatial.roi;
        let shape = self.params.data.shape;
        if shape.x == 0 || shape.y == 0 {
            log::warn!("scan finished with degenerate shape, nothing acquired");
            return;
        }
        let grid = self.source.interp(&roi, shape);
        let mut scan = grid.to_scan(&self.channel, &self.data_units);
        scan.params.name = self.params.name.clone();
        scan.timestamp_ms = epoch_ms();
        self.scan = Some(scan);
    }

    /// Express a requested ROI in the source's units.
    fn roi_in_source_units(&self, params: &ScanParameters2d) -> crate::Result<Rect2d> {
        let from = params.spatial.units.as_str();
        let to = self.source.units();
        let mut roi = params.spatial.roi;
        roi.top_left.x = units::convert(roi.top_left.x, from, to)?;
        roi.top_left.y = units::convert(roi.top_left.y, from, to)?;
        roi.size.x = units::convert(roi.size.x, from, to)?;
        roi.size.y = units::convert(roi.size.y, from, to)?;
        Ok(roi)
    }
}

fn epoch_ms() -> Option<u64> {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .ok()
        .map(|d| d.as_millis() as u64)
}

impl DeviceDriver for ImageController {
    fn poll_scan_state(&mut self) -> ScanState {
        self.settle();
        self.state
    }

    fn poll_scan_params(&mut self) -> ScanParameters2d {
        self.params.clone()
    }

    fn poll_scan(&mut self) -> Option<Scan2d> {
        self.settle();
        self.scan.clone()
    }

    fn on_start_scan(&mut self) -> ControlResponse {
        self.started = Some(Instant::now());
        self.state = ScanState::Scanning;
        ControlResponse::Success
    }

    fn on_stop_scan(&mut self) -> ControlResponse {
        self.started = None;
        self.state = ScanState::Free;
        ControlResponse::Success
    }

    fn on_set_scan_params(&mut self, params: &ScanParameters2d) -> ControlResponse {
        let roi = match self.roi_in_source_units(params) {
            Ok(roi) => roi,
            Err(err) => {
                log::warn!("rejecting scan parameters: {err}");
                return ControlResponse::RepFailure;
            }
        };
        let mut accepted = params.clone();
        accepted.spatial.roi = roi;
        accepted.spatial.units = self.source.units().to_string();

        self.params = accepted;
        self.started = Some(Instant::now());
        self.state = ScanState::Moving;
        ControlResponse::Success
    }

    // The image has no feedback loop; z-control stays unsupported and
    // `poll_zctrl_params` keeps its `None` default.
}
