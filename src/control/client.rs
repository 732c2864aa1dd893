//! Request side of the control protocol: the "Lazy Pirate" pattern.
//!
//! The client sends a request and waits for the reply with a bounded
//! timeout. On timeout it assumes the socket is confused, discards it,
//! rebuilds a fresh connection carrying the *same* identity and resends.
//! The stable identity is what lets the router recognise a returning
//! crashed client and re-bind its lease instead of orphaning it.
//!
//! Requests are strictly serialised: a client never has two in flight.

use std::time::{Duration, Instant};

use crate::control::commands::{
    parse_response, serialize_request, ControlRequest, ControlResponse,
};
use crate::msg::{ControlMode, ExperimentProblem, ParameterMsg, ScanParameters2d, ZCtrlParameters};
use crate::wire::{park, Frame, FramedConn};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(2000);
pub const DEFAULT_REQUEST_RETRIES: u32 = 3;

pub struct ControlClient {
    url: String,
    identity: String,
    request_timeout: Duration,
    request_retries: u32,
    conn: Option<FramedConn>,
}

impl ControlClient {
    pub fn new(url: &str, identity: &str) -> Self {
        Self {
            url: url.to_string(),
            identity: identity.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            request_retries: DEFAULT_REQUEST_RETRIES,
            conn: None,
        }
    }

    pub fn with_timeouts(mut self, request_timeout: Duration, request_retries: u32) -> Self {
        self.request_timeout = request_timeout;
        self.request_retries = request_retries.max(1);
        self
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Send one request and return the parsed reply.
    ///
    /// Transport trouble never surfaces as an error. After the configured
    /// retries are exhausted the reply is `NoResponse`, exactly as if the
    /// server had stayed silent.
    pub fn request(&mut self, request: &ControlRequest) -> (ControlResponse, Option<ParameterMsg>) {
        let body = match serialize_request(request) {
            Ok(body) => body,
            Err(err) => {
                log::error!("could not serialize request: {err}");
                return (ControlResponse::RepFailure, None);
            }
        };

        let mut attempts_left = self.request_retries;
        loop {
            if self.send_once(&body) {
                if let Some(reply) = self.await_reply() {
                    match parse_response(request.code(), &reply) {
                        Ok(parsed) => return parsed,
                        Err(err) => {
                            log::warn!("unparseable reply, treating as lost: {err}");
                        }
                    }
                }
            }

            // Socket is confused: discard it outright (linger 0) so the
            // rebuilt one starts clean under the same identity.
            self.conn = None;
            attempts_left -= 1;
            if attempts_left == 0 {
                log::error!("server at {} seems to be offline", self.url);
                return (ControlResponse::NoResponse, None);
            }
            log::debug!("no response from {}, reconnecting", self.url);
        }
    }

    fn send_once(&mut self, body: &[u8]) -> bool {
        if self.conn.is_none() {
            match FramedConn::connect(&self.url) {
                Ok(conn) => self.conn = Some(conn),
                Err(err) => {
                    log::debug!("connect to {} failed: {err}", self.url);
                    return false;
                }
            }
        }
        let Some(conn) = self.conn.as_mut() else { return false };
        let frame = Frame::Request {
            client_id: self.identity.clone(),
            body: body.to_vec(),
        };
        match conn.send(&frame) {
            Ok(()) => true,
            Err(err) => {
                log::debug!("send to {} failed: {err}", self.url);
                false
            }
        }
    }

    fn await_reply(&mut self) -> Option<Vec<u8>> {
        let deadline = Instant::now() + self.request_timeout;
        let conn = self.conn.as_mut()?;
        loop {
            match conn.try_recv() {
                Ok(Some(Frame::Reply { body })) => return Some(body),
                Ok(Some(_)) => log::warn!("unexpected frame kind on control client, ignoring"),
                Ok(None) => {
                    if Instant::now() >= deadline {
                        return None;
                    }
                    park();
                }
                Err(err) => {
                    log::debug!("reply wait failed: {err}");
                    return None;
                }
            }
        }
    }

    // Typed request surface.

    pub fn request_control(&mut self, mode: ControlMode) -> ControlResponse {
        self.request(&ControlRequest::RequestCtrl(mode)).0
    }

    pub fn release_control(&mut self) -> ControlResponse {
        self.request(&ControlRequest::ReleaseCtrl).0
    }

    pub fn start_scan(&mut self) -> ControlResponse {
        self.request(&ControlRequest::StartScan).0
    }

    pub fn stop_scan(&mut self) -> ControlResponse {
        self.request(&ControlRequest::StopScan).0
    }

    pub fn set_scan_params(&mut self, params: ScanParameters2d) -> ControlResponse {
        self.request(&ControlRequest::SetScanParams(params)).0
    }

    pub fn set_zctrl_params(&mut self, params: ZCtrlParameters) -> ControlResponse {
        self.request(&ControlRequest::SetZCtrlParams(params)).0
    }

    pub fn request_parameter(
        &mut self,
        param: ParameterMsg,
    ) -> (ControlResponse, Option<ParameterMsg>) {
        self.request(&ControlRequest::Param(param))
    }

    pub fn add_experiment_problem(&mut self, problem: ExperimentProblem) -> ControlResponse {
        self.request(&ControlRequest::AddExpPrblm(problem)).0
    }

    pub fn remove_experiment_problem(&mut self, problem: ExperimentProblem) -> ControlResponse {
        self.request(&ControlRequest::RmvExpPrblm(problem)).0
    }
}

/// Administrator surface: mode changes and experiment shutdown.
///
/// Kept separate so ordinary clients cannot reach for these by accident;
/// the router still checks the identity against its admin list.
pub struct AdminControlClient {
    inner: ControlClient,
}

impl AdminControlClient {
    pub fn new(url: &str, identity: &str) -> Self {
        Self { inner: ControlClient::new(url, identity) }
    }

    pub fn from_client(inner: ControlClient) -> Self {
        Self { inner }
    }

    pub fn set_control_mode(&mut self, mode: ControlMode) -> ControlResponse {
        self.inner.request(&ControlRequest::SetControlMode(mode)).0
    }

    pub fn end_experiment(&mut self) -> ControlResponse {
        self.inner.request(&ControlRequest::EndExperiment).0
    }
}

impl std::ops::Deref for AdminControlClient {
    type Target = ControlClient;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl std::ops::DerefMut for AdminControlClient {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}
