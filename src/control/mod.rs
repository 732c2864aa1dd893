//! Request/reply control protocol with exclusive lease semantics.

pub mod client;
pub mod commands;
pub mod router;
pub mod server;

pub use client::{AdminControlClient, ControlClient};
pub use commands::{ControlRequest, ControlResponse, RequestCode};
pub use router::{ControlRouter, Decision, Outcome, RouterState};
pub use server::ControlServer;
