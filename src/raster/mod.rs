//! Conversions between scans and coordinate grids, plus interpolation.
//!
//! A [`Grid`] is the in-memory form of a scan: row-major samples over
//! inclusive-endpoint axes spanning a physical ROI. Pure functions only,
//! with no device or transport knowledge.

use crate::msg::{
    DataAspects, Rect2d, Scan2d, ScanParameters2d, Size2u, SpatialAspects,
};
use crate::{Error, Result};

/// `n` evenly spaced values from `start` to `stop`, both inclusive.
pub fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

/// Row-major samples over a physical ROI.
///
/// `shape.x` is the number of columns (fast axis), `shape.y` the number of
/// rows; `data.len() == shape.x * shape.y`.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    data: Vec<f64>,
    shape: Size2u,
    roi: Rect2d,
    units: String,
}

impl Grid {
    pub fn new(data: Vec<f64>, shape: Size2u, roi: Rect2d, units: &str) -> Result<Self> {
        if data.len() != (shape.x as usize) * (shape.y as usize) {
            return Err(Error::InvalidGrid(format!(
                "data length {} does not match shape {}x{}",
                data.len(),
                shape.x,
                shape.y
            )));
        }
        Ok(Self { data, shape, roi, units: units.to_string() })
    }

    /// Synthetic diagonal-ramp source, handy for demo device processes.
    pub fn gradient(shape: Size2u, roi: Rect2d, units: &str) -> Self {
        let mut data = Vec::with_capacity((shape.x as usize) * (shape.y as usize));
        for row in 0..shape.y {
            for col in 0..shape.x {
                data.push(f64::from(row) + f64::from(col));
            }
        }
        Self { data, shape, roi, units: units.to_string() }
    }

    pub fn shape(&self) -> Size2u {
        self.shape
    }

    pub fn roi(&self) -> &Rect2d {
        &self.roi
    }

    pub fn units(&self) -> &str {
        &self.units
    }

    pub fn values(&self) -> &[f64] {
        &self.data
    }

    /// Column coordinates, inclusive of both ROI edges.
    pub fn xs(&self) -> Vec<f64> {
        linspace(
            self.roi.top_left.x,
            self.roi.top_left.x + self.roi.size.x,
            self.shape.x as usize,
        )
    }

    pub fn ys(&self) -> Vec<f64> {
        linspace(
            self.roi.top_left.y,
            self.roi.top_left.y + self.roi.size.y,
            self.shape.y as usize,
        )
    }

    fn value_at(&self, col: usize, row: usize) -> f64 {
        self.data[row * self.shape.x as usize + col]
    }

    /// Bilinear sample at a physical position, clamped to the ROI edges.
    pub fn sample(&self, x: f64, y: f64) -> f64 {
        let (c0, c1, tx) = axis_index(x, self.roi.top_left.x, self.roi.size.x, self.shape.x);
        let (r0, r1, ty) = axis_index(y, self.roi.top_left.y, self.roi.size.y, self.shape.y);

        let top = lerp(self.value_at(c0, r0), self.value_at(c1, r0), tx);
        let bottom = lerp(self.value_at(c0, r1), self.value_at(c1, r1), tx);
        lerp(top, bottom, ty)
    }

    /// Resample onto a new ROI and pixel shape.
    ///
    /// Plain bilinear interpolation: requesting fewer pixels than the
    /// source resolution aliases rather than averages.
    pub fn interp(&self, roi: &Rect2d, shape: Size2u) -> Grid {
        let xs = linspace(roi.top_left.x, roi.top_left.x + roi.size.x, shape.x as usize);
        let ys = linspace(roi.top_left.y, roi.top_left.y + roi.size.y, shape.y as usize);
        let mut data = Vec::with_capacity(xs.len() * ys.len());
        for &y in &ys {
            for &x in &xs {
                data.push(self.sample(x, y));
            }
        }
        Grid { data, shape, roi: *roi, units: self.units.clone() }
    }

    pub fn from_scan(scan: &Scan2d) -> Result<Self> {
        Self::new(
            scan.values.clone(),
            scan.params.data.shape,
            scan.params.spatial.roi,
            &scan.params.spatial.units,
        )
    }

    pub fn to_scan(&self, channel: &str, data_units: &str) -> Scan2d {
        Scan2d {
            params: ScanParameters2d {
                spatial: SpatialAspects { roi: self.roi, units: self.units.clone() },
                data: DataAspects { shape: self.shape, units: data_units.to_string() },
                name: String::new(),
            },
            channel: channel.to_string(),
            timestamp_ms: None,
            values: self.data.clone(),
        }
    }
}

/// Map a physical coordinate to the two bracketing sample indices and the
/// interpolation weight between them.
fn axis_index(pos: f64, origin: f64, extent: f64, count: u32) -> (usize, usize, f64) {
    let last = count.saturating_sub(1) as f64;
    if last == 0.0 || extent == 0.0 {
        return (0, 0, 0.0);
    }
    let frac = ((pos - origin) / extent * last).clamp(0.0, last);
    let lo = frac.floor() as usize;
    let hi = (lo + 1).min(last as usize);
    (lo, hi, frac - lo as f64)
}

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}
