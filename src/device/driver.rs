//! The narrow boundary to device-specific code.
//!
//! A driver talks to one physical (or simulated) instrument. Handlers return
//! a `ControlResponse` directly: a fault is `RepFailure`, an operation the
//! hardware has no notion of is `CmdNotSupported`, never a structural
//! failure. Polling counterparts report the device's current view.

use crate::control::ControlResponse;
use crate::msg::{ParameterMsg, Scan2d, ScanParameters2d, ScanState, ZCtrlParameters};

pub trait DeviceDriver: Send {
    fn poll_scan_state(&mut self) -> ScanState;

    fn poll_scan_params(&mut self) -> ScanParameters2d;

    /// Latest completed scan, if any. The controller compares successive
    /// polls (timestamps first, sample data as fallback) to decide whether
    /// a new scan exists.
    fn poll_scan(&mut self) -> Option<Scan2d>;

    fn on_start_scan(&mut self) -> ControlResponse;

    fn on_stop_scan(&mut self) -> ControlResponse;

    fn on_set_scan_params(&mut self, params: &ScanParameters2d) -> ControlResponse;

    fn on_set_zctrl_params(&mut self, _params: &ZCtrlParameters) -> ControlResponse {
        ControlResponse::CmdNotSupported
    }

    fn poll_zctrl_params(&mut self) -> Option<ZCtrlParameters> {
        None
    }

    fn on_request_param(
        &mut self,
        _param: &ParameterMsg,
    ) -> (ControlResponse, Option<ParameterMsg>) {
        (ControlResponse::CmdNotSupported, None)
    }
}
