//! Device controller loop and drivers.

pub mod controller;
pub mod driver;
pub mod image;

pub use controller::DeviceController;
pub use driver::DeviceDriver;
pub use image::ImageController;
