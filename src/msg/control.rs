use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum ControlMode {
    #[default]
    Manual,
    Automated,
    /// Entered automatically while the problem set is non-empty, or pinned
    /// by an administrator.
    Problem,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum ExperimentProblem {
    TipShapeChanged,
    FeedbackIssue,
}

/// The right to command the device: holder identity plus the mode it was
/// granted under. At most one lease exists at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlLease {
    pub holder: String,
    pub granted_mode: ControlMode,
}

/// Authoritative control state, broadcast by the router on every change so
/// all components observe mode, lease holder and asserted problems.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlState {
    pub mode: ControlMode,
    pub client_in_control: Option<String>,
    pub problems: BTreeSet<ExperimentProblem>,
}

/// Generic get/set of a named device parameter.
///
/// With `value == None` the request reads the parameter; otherwise it writes
/// it. Either way the success reply carries a final read-back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterMsg {
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub units: Option<String>,
}

/// Z-controller feedback parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ZCtrlParameters {
    pub feedback_on: bool,
    pub proportional_gain: f64,
    pub integral_gain: f64,
}
