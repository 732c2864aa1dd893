use serde::{Deserialize, Serialize};

use super::geometry::{Rect2d, Size2u};

/// Where in the sample plane a scan runs, and in which unit that is expressed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpatialAspects {
    pub roi: Rect2d,
    pub units: String,
}

/// Pixel shape of the sampled data and the unit of the sample values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataAspects {
    pub shape: Size2u,
    pub units: String,
}

/// The request form of a scan: everything but the samples.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanParameters2d {
    pub spatial: SpatialAspects,
    pub data: DataAspects,
    /// Free-form label, carried through to the resulting scan.
    #[serde(default)]
    pub name: String,
}

/// One completed 2D scan. Values are row-major: `shape.y` rows of `shape.x`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scan2d {
    pub params: ScanParameters2d,
    pub channel: String,
    /// Acquisition time, milliseconds since the epoch. Absent when the
    /// driver cannot date its data; diffing then falls back to the samples.
    #[serde(default)]
    pub timestamp_ms: Option<u64>,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanState {
    #[default]
    Free,
    Moving,
    Scanning,
    Interrupted,
}

/// Published whenever the device's scan state changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStateMsg {
    pub state: ScanState,
}
