//! Reply side of the control protocol.
//!
//! The expected shape, mirrored by the device controller loop: call
//! `poll()` regularly; when a request comes back, handle it and `reply()`
//! as soon as possible. One request is outstanding at a time; further
//! requests wait in their sockets until the pending one is answered.

use std::time::{Duration, Instant};

use crate::control::commands::{
    self, parse_request, serialize_response, ControlRequest, ControlResponse,
};
use crate::msg::ParameterMsg;
use crate::wire::{park, Acceptor, Frame, FramedConn};
use crate::{Error, Result};

pub struct ControlServer {
    acceptor: Acceptor,
    conns: Vec<Option<FramedConn>>,
    /// Index of the connection whose request is awaiting a reply.
    pending: Option<usize>,
}

impl ControlServer {
    pub fn bind(url: &str) -> Result<Self> {
        Ok(Self {
            acceptor: Acceptor::bind(url)?,
            conns: Vec::new(),
            pending: None,
        })
    }

    /// Wait up to `timeout` for a request.
    ///
    /// Returns the caller's stable identity and the parsed request. While a
    /// request is pending un-replied this returns `None` immediately.
    pub fn poll(&mut self, timeout: Duration) -> Result<Option<(String, ControlRequest)>> {
        let deadline = Instant::now() + timeout;
        loop {
            for conn in self.acceptor.accept_new() {
                self.conns.push(Some(conn));
            }

            if self.pending.is_some() {
                return Ok(None);
            }

            if let Some(received) = self.scan_for_request() {
                return Ok(Some(received));
            }

            self.compact();
            if Instant::now() >= deadline {
                return Ok(None);
            }
            park();
        }
    }

    fn scan_for_request(&mut self) -> Option<(String, ControlRequest)> {
        for idx in 0..self.conns.len() {
            let Some(conn) = self.conns[idx].as_mut() else { continue };
            loop {
                match conn.try_recv() {
                    Ok(Some(Frame::Request { client_id, body })) => match parse_request(&body) {
                        Ok(request) => {
                            self.pending = Some(idx);
                            return Some((client_id, request));
                        }
                        Err(err) => {
                            log::warn!("malformed request from {client_id}: {err}");
                            let body = serialize_response(ControlResponse::RepFailure, None)
                                .unwrap_or_else(|_| vec![ControlResponse::RepFailure as u8]);
                            if conn.send(&Frame::Reply { body }).is_err() {
                                self.conns[idx] = None;
                                break;
                            }
                        }
                    },
                    Ok(Some(_)) => {
                        log::warn!("unexpected frame kind on control server, ignoring");
                    }
                    Ok(None) => break,
                    Err(Error::Disconnected) => {
                        self.conns[idx] = None;
                        break;
                    }
                    Err(err) => {
                        log::warn!("dropping control peer: {err}");
                        self.conns[idx] = None;
                        break;
                    }
                }
            }
        }
        None
    }

    /// Answer the pending request.
    ///
    /// A vanished requester is not an error: the reply is discarded and the
    /// caller will observe `NoResponse` through its own timeout.
    pub fn reply(&mut self, response: ControlResponse) -> Result<()> {
        self.reply_with(response, None)
    }

    pub fn reply_with(
        &mut self,
        response: ControlResponse,
        param: Option<&ParameterMsg>,
    ) -> Result<()> {
        let idx = self.pending.take().ok_or(Error::NoPendingRequest)?;
        let body = commands::serialize_response(response, param)?;
        if let Some(conn) = self.conns[idx].as_mut() {
            if let Err(err) = conn.send(&Frame::Reply { body }) {
                log::warn!("requester went away before reply: {err}");
                self.conns[idx] = None;
            }
        }
        Ok(())
    }

    fn compact(&mut self) {
        if self.pending.is_none() {
            self.conns.retain(Option::is_some);
        }
    }

    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.acceptor.local_addr()
    }
}
