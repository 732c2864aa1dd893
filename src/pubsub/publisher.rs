//! Publish side of the fabric.
//!
//! The publisher binds, peers connect and announce prefix subscriptions, and
//! filtering happens here: a message goes only to peers whose prefix matches
//! its envelope. There is no back-pressure: with no matching peer the
//! message is dropped, and a peer whose socket fails is disconnected.

use std::collections::VecDeque;

use crate::msg::{self, Msg};
use crate::wire::{Acceptor, Frame, FramedConn};
use crate::{Error, Result};

/// Subscription signalling observed by the publish socket. The replay broker
/// taps these to know when to re-emit cached state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionEvent {
    Subscribe(String),
    Unsubscribe(String),
}

struct Peer {
    conn: FramedConn,
    prefixes: Vec<String>,
}

pub struct Publisher {
    acceptor: Acceptor,
    peers: Vec<Peer>,
    events: VecDeque<SubscriptionEvent>,
}

impl Publisher {
    pub fn bind(url: &str) -> Result<Self> {
        Ok(Self {
            acceptor: Acceptor::bind(url)?,
            peers: Vec::new(),
            events: VecDeque::new(),
        })
    }

    /// Accept fresh peers and ingest any pending SUB/UNSUB frames.
    ///
    /// Called implicitly by `send`; brokers also call it from their poll
    /// loop so subscriptions are observed even between publishes.
    pub fn service(&mut self) {
        for conn in self.acceptor.accept_new() {
            self.peers.push(Peer { conn, prefixes: Vec::new() });
        }

        let mut dropped = Vec::new();
        for (idx, peer) in self.peers.iter_mut().enumerate() {
            loop {
                match peer.conn.try_recv() {
                    Ok(Some(Frame::Subscribe { prefix })) => {
                        if !peer.prefixes.contains(&prefix) {
                            peer.prefixes.push(prefix.clone());
                            self.events.push_back(SubscriptionEvent::Subscribe(prefix));
                        }
                    }
                    Ok(Some(Frame::Unsubscribe { prefix })) => {
                        peer.prefixes.retain(|p| p != &prefix);
                        self.events.push_back(SubscriptionEvent::Unsubscribe(prefix));
                    }
                    Ok(Some(_)) => {
                        log::warn!("unexpected frame kind on publish socket, ignoring");
                    }
                    Ok(None) => break,
                    Err(Error::Disconnected) => {
                        dropped.push(idx);
                        break;
                    }
                    Err(err) => {
                        log::warn!("dropping subscriber: {err}");
                        dropped.push(idx);
                        break;
                    }
                }
            }
        }
        for idx in dropped.into_iter().rev() {
            let peer = self.peers.remove(idx);
            for prefix in peer.prefixes {
                self.events.push_back(SubscriptionEvent::Unsubscribe(prefix));
            }
        }
    }

    /// Envelope + serialize + fan out to matching peers.
    pub fn send(&mut self, message: &Msg) -> Result<()> {
        self.service();
        let envelope = msg::envelope_of(message);
        let payload = msg::encode_payload(message)?;
        self.send_raw(&envelope, &payload);
        Ok(())
    }

    /// Fan out an already-encoded message. Used by the broker to forward
    /// and replay payloads it never parsed.
    pub fn send_raw(&mut self, envelope: &str, payload: &[u8]) {
        let frame = Frame::Message {
            envelope: envelope.to_string(),
            payload: payload.to_vec(),
        };
        let mut dropped = Vec::new();
        for (idx, peer) in self.peers.iter_mut().enumerate() {
            if !peer.prefixes.iter().any(|p| envelope.starts_with(p.as_str())) {
                continue;
            }
            if let Err(err) = peer.conn.send(&frame) {
                log::warn!("dropping subscriber mid-send: {err}");
                dropped.push(idx);
            }
        }
        for idx in dropped.into_iter().rev() {
            let peer = self.peers.remove(idx);
            for prefix in peer.prefixes {
                self.events.push_back(SubscriptionEvent::Unsubscribe(prefix));
            }
        }
    }

    /// Drain subscription events observed since the last call.
    pub fn take_subscription_events(&mut self) -> Vec<SubscriptionEvent> {
        self.events.drain(..).collect()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.acceptor.local_addr()
    }
}
