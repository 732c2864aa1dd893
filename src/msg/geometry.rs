use serde::{Deserialize, Serialize};

/// A point in the sample plane, in physical units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point2d {
    pub x: f64,
    pub y: f64,
}

/// An extent in the sample plane, in physical units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Size2d {
    pub x: f64,
    pub y: f64,
}

/// An extent in pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size2u {
    pub x: u32,
    pub y: u32,
}

/// Region of interest: top-left corner plus size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect2d {
    pub top_left: Point2d,
    pub size: Size2d,
}

impl Point2d {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl Size2d {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl Size2u {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

impl Rect2d {
    pub fn new(top_left: Point2d, size: Size2d) -> Self {
        Self { top_left, size }
    }
}
