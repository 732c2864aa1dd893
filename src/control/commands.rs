//! Control request/reply codec.
//!
//! A request on the wire is `[request code][optional json payload]`; a reply
//! is `[response code][optional json payload]`. Replies carry no type tag,
//! so the caller must keep the request code it sent to parse the reply.
//! Only `Param` success replies carry a payload.

use serde::{Deserialize, Serialize};

use crate::msg::{ControlMode, ExperimentProblem, ParameterMsg, ScanParameters2d, ZCtrlParameters};
use crate::{Error, Result};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestCode {
    RequestCtrl = 1,
    ReleaseCtrl = 2,
    SetControlMode = 3,
    AddExpPrblm = 4,
    RmvExpPrblm = 5,
    StartScan = 6,
    StopScan = 7,
    SetScanParams = 8,
    SetZCtrlParams = 9,
    Param = 10,
    EndExperiment = 11,
}

impl RequestCode {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            1 => RequestCode::RequestCtrl,
            2 => RequestCode::ReleaseCtrl,
            3 => RequestCode::SetControlMode,
            4 => RequestCode::AddExpPrblm,
            5 => RequestCode::RmvExpPrblm,
            6 => RequestCode::StartScan,
            7 => RequestCode::StopScan,
            8 => RequestCode::SetScanParams,
            9 => RequestCode::SetZCtrlParams,
            10 => RequestCode::Param,
            11 => RequestCode::EndExperiment,
            _ => return None,
        })
    }
}

/// Every control operation, with its payload where one exists.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlRequest {
    RequestCtrl(ControlMode),
    ReleaseCtrl,
    SetControlMode(ControlMode),
    AddExpPrblm(ExperimentProblem),
    RmvExpPrblm(ExperimentProblem),
    StartScan,
    StopScan,
    SetScanParams(ScanParameters2d),
    SetZCtrlParams(ZCtrlParameters),
    Param(ParameterMsg),
    EndExperiment,
}

impl ControlRequest {
    pub fn code(&self) -> RequestCode {
        match self {
            ControlRequest::RequestCtrl(_) => RequestCode::RequestCtrl,
            ControlRequest::ReleaseCtrl => RequestCode::ReleaseCtrl,
            ControlRequest::SetControlMode(_) => RequestCode::SetControlMode,
            ControlRequest::AddExpPrblm(_) => RequestCode::AddExpPrblm,
            ControlRequest::RmvExpPrblm(_) => RequestCode::RmvExpPrblm,
            ControlRequest::StartScan => RequestCode::StartScan,
            ControlRequest::StopScan => RequestCode::StopScan,
            ControlRequest::SetScanParams(_) => RequestCode::SetScanParams,
            ControlRequest::SetZCtrlParams(_) => RequestCode::SetZCtrlParams,
            ControlRequest::Param(_) => RequestCode::Param,
            ControlRequest::EndExperiment => RequestCode::EndExperiment,
        }
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlResponse {
    Success = 0,
    NotInControl = 1,
    WrongMode = 2,
    AlreadyUnderControl = 3,
    PerformingScan = 4,
    CmdNotSupported = 5,
    NoResponse = 6,
    RepFailure = 7,
}

impl ControlResponse {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => ControlResponse::Success,
            1 => ControlResponse::NotInControl,
            2 => ControlResponse::WrongMode,
            3 => ControlResponse::AlreadyUnderControl,
            4 => ControlResponse::PerformingScan,
            5 => ControlResponse::CmdNotSupported,
            6 => ControlResponse::NoResponse,
            7 => ControlResponse::RepFailure,
            _ => return None,
        })
    }
}

pub fn serialize_request(request: &ControlRequest) -> Result<Vec<u8>> {
    let mut body = vec![request.code() as u8];
    match request {
        ControlRequest::RequestCtrl(mode) | ControlRequest::SetControlMode(mode) => {
            body.extend_from_slice(&serde_json::to_vec(mode)?);
        }
        ControlRequest::AddExpPrblm(problem) | ControlRequest::RmvExpPrblm(problem) => {
            body.extend_from_slice(&serde_json::to_vec(problem)?);
        }
        ControlRequest::SetScanParams(params) => {
            body.extend_from_slice(&serde_json::to_vec(params)?);
        }
        ControlRequest::SetZCtrlParams(params) => {
            body.extend_from_slice(&serde_json::to_vec(params)?);
        }
        ControlRequest::Param(param) => {
            body.extend_from_slice(&serde_json::to_vec(param)?);
        }
        ControlRequest::ReleaseCtrl
        | ControlRequest::StartScan
        | ControlRequest::StopScan
        | ControlRequest::EndExperiment => {}
    }
    Ok(body)
}

pub fn parse_request(body: &[u8]) -> Result<ControlRequest> {
    let (&code, payload) = body
        .split_first()
        .ok_or(Error::MalformedRequest("empty request body"))?;
    let code = RequestCode::from_u8(code).ok_or(Error::MalformedRequest("unknown request code"))?;
    let request = match code {
        RequestCode::RequestCtrl => ControlRequest::RequestCtrl(serde_json::from_slice(payload)?),
        RequestCode::ReleaseCtrl => ControlRequest::ReleaseCtrl,
        RequestCode::SetControlMode => {
            ControlRequest::SetControlMode(serde_json::from_slice(payload)?)
        }
        RequestCode::AddExpPrblm => ControlRequest::AddExpPrblm(serde_json::from_slice(payload)?),
        RequestCode::RmvExpPrblm => ControlRequest::RmvExpPrblm(serde_json::from_slice(payload)?),
        RequestCode::StartScan => ControlRequest::StartScan,
        RequestCode::StopScan => ControlRequest::StopScan,
        RequestCode::SetScanParams => {
            ControlRequest::SetScanParams(serde_json::from_slice(payload)?)
        }
        RequestCode::SetZCtrlParams => {
            ControlRequest::SetZCtrlParams(serde_json::from_slice(payload)?)
        }
        RequestCode::Param => ControlRequest::Param(serde_json::from_slice(payload)?),
        RequestCode::EndExperiment => ControlRequest::EndExperiment,
    };
    Ok(request)
}

pub fn serialize_response(
    response: ControlResponse,
    param: Option<&ParameterMsg>,
) -> Result<Vec<u8>> {
    let mut body = vec![response as u8];
    if let Some(param) = param {
        body.extend_from_slice(&serde_json::to_vec(param)?);
    }
    Ok(body)
}

/// Parse a reply to a request of `code`. Only `Param` successes carry a
/// payload; everything else is the bare response byte.
pub fn parse_response(
    code: RequestCode,
    body: &[u8],
) -> Result<(ControlResponse, Option<ParameterMsg>)> {
    let (&first, rest) = body
        .split_first()
        .ok_or(Error::MalformedRequest("empty reply body"))?;
    let response =
        ControlResponse::from_u8(first).ok_or(Error::MalformedRequest("unknown response code"))?;
    let param = if code == RequestCode::Param && response == ControlResponse::Success && !rest.is_empty()
    {
        Some(serde_json::from_slice(rest)?)
    } else {
        None
    };
    Ok((response, param))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trip() {
        let requests = [
            ControlRequest::RequestCtrl(ControlMode::Automated),
            ControlRequest::ReleaseCtrl,
            ControlRequest::SetControlMode(ControlMode::Problem),
            ControlRequest::AddExpPrblm(ExperimentProblem::TipShapeChanged),
            ControlRequest::RmvExpPrblm(ExperimentProblem::FeedbackIssue),
            ControlRequest::StartScan,
            ControlRequest::StopScan,
            ControlRequest::SetScanParams(ScanParameters2d::default()),
            ControlRequest::SetZCtrlParams(ZCtrlParameters::default()),
            ControlRequest::Param(ParameterMsg {
                name: "bias".into(),
                value: Some("0.5".into()),
                units: Some("V".into()),
            }),
            ControlRequest::EndExperiment,
        ];
        for request in requests {
            let body = serialize_request(&request).unwrap();
            assert_eq!(parse_request(&body).unwrap(), request);
        }
    }

    #[test]
    fn reply_needs_request_code_for_payload() {
        let param = ParameterMsg { name: "bias".into(), value: Some("0.5".into()), units: None };
        let body = serialize_response(ControlResponse::Success, Some(&param)).unwrap();

        let (rep, got) = parse_response(RequestCode::Param, &body).unwrap();
        assert_eq!(rep, ControlResponse::Success);
        assert_eq!(got, Some(param));

        // The same bytes parsed under a non-getter code ignore the payload.
        let (rep, got) = parse_response(RequestCode::StartScan, &body).unwrap();
        assert_eq!(rep, ControlResponse::Success);
        assert_eq!(got, None);
    }

    #[test]
    fn malformed_bodies_rejected() {
        assert!(parse_request(&[]).is_err());
        assert!(parse_request(&[200]).is_err());
        assert!(parse_response(RequestCode::StartScan, &[]).is_err());
        assert!(parse_response(RequestCode::StartScan, &[99]).is_err());
    }
}
