//! Control router: lease, mode and problem-set policy.
//!
//! The router fronts the device controller. Every request runs through a
//! deterministic, side-effect-free policy decision first ([`RouterState`]),
//! and only then either mutates router state, gets forwarded to the device,
//! or is rejected with a specific response code. Any change to the
//! authoritative state (mode, lease, problem set) is broadcast as a
//! `ControlState` message so every component observes it.
//!
//! Lease lifecycle: created by `REQUEST_CTRL`, destroyed by `RELEASE_CTRL`,
//! by a mode change it no longer matches, or by loss of liveness of the
//! holder (heartbeat silence past twice the sender's period).

use std::collections::BTreeSet;
use std::time::Duration;

use crate::component::LivenessMonitor;
use crate::control::commands::{ControlRequest, ControlResponse};
use crate::control::{ControlClient, ControlServer};
use crate::msg::{
    ControlLease, ControlMode, ControlState, ExperimentProblem, KillSignal, Msg, ENV_HEARTBEAT,
};
use crate::pubsub::{Publisher, Subscriber};
use crate::Result;

/// What the transport shell should do with a request after the policy ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Answer directly with this response.
    Reply(ControlResponse),
    /// Forward to the device handler; its reply is the reply.
    Forward,
    /// Broadcast the kill signal, reply SUCCESS, then shut down.
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub decision: Decision,
    /// True when mode, lease or problem set changed and the new
    /// `ControlState` must be broadcast.
    pub state_changed: bool,
}

impl Outcome {
    fn reply(response: ControlResponse) -> Self {
        Self { decision: Decision::Reply(response), state_changed: false }
    }

    fn changed(response: ControlResponse) -> Self {
        Self { decision: Decision::Reply(response), state_changed: true }
    }
}

/// Pure policy state machine. No sockets, fully deterministic; the whole
/// control policy is unit-testable through [`RouterState::handle`].
pub struct RouterState {
    mode: ControlMode,
    /// Mode to restore when the problem set empties.
    prior_mode: ControlMode,
    /// Set when an administrator forced PROBLEM mode explicitly; an empty
    /// problem set then does not leave PROBLEM.
    pinned: bool,
    lease: Option<ControlLease>,
    problems: BTreeSet<ExperimentProblem>,
    admin_ids: Vec<String>,
}

impl RouterState {
    pub fn new(initial_mode: ControlMode, admin_ids: Vec<String>) -> Self {
        Self {
            mode: initial_mode,
            prior_mode: initial_mode,
            pinned: false,
            lease: None,
            problems: BTreeSet::new(),
            admin_ids,
        }
    }

    pub fn mode(&self) -> ControlMode {
        self.mode
    }

    pub fn lease(&self) -> Option<&ControlLease> {
        self.lease.as_ref()
    }

    pub fn control_state(&self) -> ControlState {
        ControlState {
            mode: self.mode,
            client_in_control: self.lease.as_ref().map(|l| l.holder.clone()),
            problems: self.problems.clone(),
        }
    }

    fn is_admin(&self, caller: &str) -> bool {
        self.admin_ids.iter().any(|id| id == caller)
    }

    /// Revoke the lease. Returns true when one existed.
    pub fn revoke_lease(&mut self) -> bool {
        self.lease.take().is_some()
    }

    pub fn handle(&mut self, caller: &str, request: &ControlRequest) -> Outcome {
        match request {
            ControlRequest::RequestCtrl(mode) => self.on_request_ctrl(caller, *mode),
            ControlRequest::ReleaseCtrl => self.on_release_ctrl(caller),
            ControlRequest::SetControlMode(mode) => self.on_set_mode(caller, *mode),
            ControlRequest::AddExpPrblm(problem) => self.on_add_problem(*problem),
            ControlRequest::RmvExpPrblm(problem) => self.on_remove_problem(*problem),
            ControlRequest::EndExperiment => {
                if self.is_admin(caller) {
                    Outcome { decision: Decision::Shutdown, state_changed: false }
                } else {
                    Outcome::reply(ControlResponse::CmdNotSupported)
                }
            }
            // Device-bound requests: only the lease holder may command.
            ControlRequest::StartScan
            | ControlRequest::StopScan
            | ControlRequest::SetScanParams(_)
            | ControlRequest::SetZCtrlParams(_)
            | ControlRequest::Param(_) => {
                match &self.lease {
                    Some(lease) if lease.holder == caller => {
                        Outcome { decision: Decision::Forward, state_changed: false }
                    }
                    _ => Outcome::reply(ControlResponse::NotInControl),
                }
            }
        }
    }

    fn on_request_ctrl(&mut self, caller: &str, mode: ControlMode) -> Outcome {
        if let Some(lease) = &self.lease {
            // A returning client re-requesting its own grant is the crash
            // recovery path: same identity, same mode, nothing to change.
            if lease.holder == caller && lease.granted_mode == mode {
                return Outcome::reply(ControlResponse::Success);
            }
            return Outcome::reply(ControlResponse::AlreadyUnderControl);
        }
        if self.mode != mode {
            return Outcome::reply(ControlResponse::WrongMode);
        }
        self.lease = Some(ControlLease { holder: caller.to_string(), granted_mode: mode });
        Outcome::changed(ControlResponse::Success)
    }

    fn on_release_ctrl(&mut self, caller: &str) -> Outcome {
        match &self.lease {
            Some(lease) if lease.holder == caller => {
                self.lease = None;
                Outcome::changed(ControlResponse::Success)
            }
            _ => Outcome::reply(ControlResponse::NotInControl),
        }
    }

    fn on_set_mode(&mut self, caller: &str, mode: ControlMode) -> Outcome {
        if !self.is_admin(caller) {
            return Outcome::reply(ControlResponse::CmdNotSupported);
        }
        if mode == ControlMode::Problem {
            self.pinned = true;
            self.mode = ControlMode::Problem;
        } else {
            self.pinned = false;
            self.prior_mode = mode;
            // Asserted problems keep the effective mode at PROBLEM; the
            // requested mode takes over once the set empties.
            self.mode = if self.problems.is_empty() { mode } else { ControlMode::Problem };
        }
        self.drop_mismatched_lease();
        Outcome::changed(ControlResponse::Success)
    }

    fn on_add_problem(&mut self, problem: ExperimentProblem) -> Outcome {
        let inserted = self.problems.insert(problem);
        if self.mode != ControlMode::Problem {
            self.prior_mode = self.mode;
            self.mode = ControlMode::Problem;
        }
        self.drop_mismatched_lease();
        if inserted {
            Outcome::changed(ControlResponse::Success)
        } else {
            Outcome::reply(ControlResponse::Success)
        }
    }

    fn on_remove_problem(&mut self, problem: ExperimentProblem) -> Outcome {
        let removed = self.problems.remove(&problem);
        if self.problems.is_empty() && self.mode == ControlMode::Problem && !self.pinned {
            self.mode = self.prior_mode;
            self.drop_mismatched_lease();
        }
        if removed {
            Outcome::changed(ControlResponse::Success)
        } else {
            Outcome::reply(ControlResponse::Success)
        }
    }

    fn drop_mismatched_lease(&mut self) {
        if let Some(lease) = &self.lease {
            if lease.granted_mode != self.mode {
                log::info!("revoking lease of {} after mode change", lease.holder);
                self.lease = None;
            }
        }
    }
}

/// Transport shell around [`RouterState`].
pub struct ControlRouter {
    server: ControlServer,
    device: ControlClient,
    publisher: Publisher,
    heartbeats: Option<Subscriber>,
    state: RouterState,
    liveness: LivenessMonitor,
    shutdown: bool,
}

impl ControlRouter {
    pub fn new(
        server: ControlServer,
        device: ControlClient,
        publisher: Publisher,
        heartbeats: Option<Subscriber>,
        initial_mode: ControlMode,
        admin_ids: Vec<String>,
    ) -> Self {
        Self {
            server,
            device,
            publisher,
            heartbeats,
            state: RouterState::new(initial_mode, admin_ids),
            liveness: LivenessMonitor::new(),
            shutdown: false,
        }
    }

    /// One router tick: revoke stale leases, then serve one request.
    pub fn poll(&mut self, timeout: Duration) -> Result<()> {
        self.check_liveness()?;

        let Some((caller, request)) = self.server.poll(timeout)? else {
            return Ok(());
        };
        log::debug!("request from {caller}: {request:?}");

        let outcome = self.state.handle(&caller, &request);
        match outcome.decision {
            Decision::Reply(response) => self.server.reply(response)?,
            Decision::Forward => {
                let (response, param) = self.device.request(&request);
                self.server.reply_with(response, param.as_ref())?;
            }
            Decision::Shutdown => {
                log::info!("experiment end requested by {caller}");
                self.publisher.send(&Msg::Kill(KillSignal {}))?;
                self.shutdown = true;
                self.server.reply(ControlResponse::Success)?;
            }
        }
        if outcome.state_changed {
            self.publish_state()?;
        }
        Ok(())
    }

    fn check_liveness(&mut self) -> Result<()> {
        let Some(heartbeats) = self.heartbeats.as_mut() else {
            return Ok(());
        };
        heartbeats.poll(Duration::ZERO)?;
        for (_, fifo) in heartbeats.cache().matching(ENV_HEARTBEAT) {
            if let Some(Msg::Heartbeat(beat)) = fifo.back() {
                self.liveness.observe(beat);
            }
        }

        let stale_holder = self
            .state
            .lease()
            .map(|lease| lease.holder.clone())
            .filter(|holder| self.liveness.is_stale(holder));
        if let Some(holder) = stale_holder {
            log::warn!("lease holder {holder} lost liveness, revoking lease");
            self.state.revoke_lease();
            self.publish_state()?;
        }
        Ok(())
    }

    fn publish_state(&mut self) -> Result<()> {
        self.publisher.send(&Msg::ControlState(self.state.control_state()))
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown
    }

    pub fn state(&self) -> &RouterState {
        &self.state
    }

    pub fn publisher_mut(&mut self) -> &mut Publisher {
        &mut self.publisher
    }
}
