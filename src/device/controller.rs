//! The device-facing process: reconciles requested actions with polled
//! device state and publishes every state transition.
//!
//! Per tick: answer at most one forwarded request (refusing everything but
//! the scan-safe allow-list while a scan runs), then poll the device and
//! publish whatever changed since the previous tick, in the order
//! state, then scan parameters, then scan payload, so an observer always
//! sees the `Scanning -> Free` transition before the scan it produced.

use std::time::Duration;

use crate::component::Component;
use crate::control::{ControlRequest, ControlResponse, ControlServer, RequestCode};
use crate::device::driver::DeviceDriver;
use crate::msg::{Msg, Scan2d, ScanParameters2d, ScanState, ScanStateMsg, ZCtrlParameters};
use crate::pubsub::{Publisher, Subscriber};
use crate::Result;

/// Requests accepted while the device is scanning.
const SCAN_SAFE_ALLOWLIST: [RequestCode; 1] = [RequestCode::StopScan];

pub struct DeviceController {
    name: String,
    driver: Box<dyn DeviceDriver>,
    server: ControlServer,
    publisher: Publisher,
    subscriber: Option<Subscriber>,
    poll_timeout: Duration,
    // Last published view of the device, for diffing against fresh polls.
    scan_state: ScanState,
    scan_params: ScanParameters2d,
    scan: Option<Scan2d>,
    zctrl: Option<ZCtrlParameters>,
}

impl DeviceController {
    pub fn new(
        name: &str,
        mut driver: Box<dyn DeviceDriver>,
        server: ControlServer,
        publisher: Publisher,
        subscriber: Option<Subscriber>,
        poll_timeout: Duration,
    ) -> Self {
        let scan_state = driver.poll_scan_state();
        let scan_params = driver.poll_scan_params();
        let scan = driver.poll_scan();
        let zctrl = driver.poll_zctrl_params();
        Self {
            name: name.to_string(),
            driver,
            server,
            publisher,
            subscriber,
            poll_timeout,
            scan_state,
            scan_params,
            scan,
            zctrl,
        }
    }

    fn handle_incoming_request(&mut self) -> Result<()> {
        let Some((caller, request)) = self.server.poll(self.poll_timeout)? else {
            return Ok(());
        };

        if self.scan_state == ScanState::Scanning
            && !SCAN_SAFE_ALLOWLIST.contains(&request.code())
        {
            log::debug!("refusing {:?} from {caller} mid-scan", request.code());
            return self.server.reply(ControlResponse::PerformingScan);
        }

        match request {
            ControlRequest::StartScan => {
                let rep = self.driver.on_start_scan();
                self.server.reply(rep)
            }
            ControlRequest::StopScan => {
                let rep = self.driver.on_stop_scan();
                self.server.reply(rep)
            }
            ControlRequest::SetScanParams(params) => {
                let rep = self.driver.on_set_scan_params(&params);
                self.server.reply(rep)
            }
            ControlRequest::SetZCtrlParams(params) => {
                let rep = self.driver.on_set_zctrl_params(&params);
                self.server.reply(rep)
            }
            ControlRequest::Param(param) => {
                let (rep, readback) = self.driver.on_request_param(&param);
                self.server.reply_with(rep, readback.as_ref())
            }
            // Lease and mode traffic belongs to the router, not the device.
            other => {
                log::warn!("request {:?} does not belong at the device", other.code());
                self.server.reply(ControlResponse::CmdNotSupported)
            }
        }
    }

    fn handle_polling_device(&mut self) -> Result<()> {
        let old_state = self.scan_state;
        let state = self.driver.poll_scan_state();
        if state != old_state {
            log::debug!("scan state {old_state:?} -> {state:?}");
            self.scan_state = state;
            self.publisher.send(&Msg::ScanState(ScanStateMsg { state }))?;
        }

        let params = self.driver.poll_scan_params();
        if params != self.scan_params {
            log::debug!("scan parameters changed");
            self.scan_params = params.clone();
            self.publisher.send(&Msg::ScanParameters2d(params))?;
        }

        // A scan can only have finished if we just left the scanning state.
        if old_state == ScanState::Scanning && state != ScanState::Scanning {
            let fresh = self.driver.poll_scan();
            if let Some(fresh) = fresh {
                if scan_is_new(self.scan.as_ref(), &fresh) {
                    log::debug!("new scan on channel {}", fresh.channel);
                    self.publisher.send(&Msg::Scan2d(fresh.clone()))?;
                    self.scan = Some(fresh);
                }
            }
        }

        if let Some(zctrl) = self.driver.poll_zctrl_params() {
            if self.zctrl.as_ref() != Some(&zctrl) {
                self.zctrl = Some(zctrl.clone());
                self.publisher.send(&Msg::ZCtrlParameters(zctrl))?;
            }
        }
        Ok(())
    }
}

/// Timestamps decide when both scans carry one; otherwise the raw sample
/// arrays are compared structurally.
fn scan_is_new(old: Option<&Scan2d>, fresh: &Scan2d) -> bool {
    match old {
        None => true,
        Some(old) => match (old.timestamp_ms, fresh.timestamp_ms) {
            (Some(a), Some(b)) => a != b,
            _ => old.values != fresh.values,
        },
    }
}

impl Component for DeviceController {
    fn name(&self) -> &str {
        &self.name
    }

    fn per_loop(&mut self) -> Result<()> {
        self.handle_incoming_request()?;
        self.handle_polling_device()
    }

    fn publisher_mut(&mut self) -> Option<&mut Publisher> {
        Some(&mut self.publisher)
    }

    fn subscriber_mut(&mut self) -> Option<&mut Subscriber> {
        self.subscriber.as_mut()
    }
}
