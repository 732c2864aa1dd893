//! Replay broker between publishers and subscribers.
//!
//! ```text
//! ┌───────────┐        ┌─────────────────┐        ┌────────────┐
//! │ Publisher │───────►│   PubSubCache   │───────►│ Subscriber │
//! └───────────┘ ingest │  cache + relay  │ replay └────────────┘
//!                      └─────────────────┘
//! ```
//!
//! Everything received upstream is admitted into a per-envelope bounded
//! FIFO of raw payload bytes and forwarded downstream verbatim; the broker
//! never parses payloads. When a downstream peer subscribes to a prefix, the
//! broker re-emits every cached FIFO whose envelope matches, in envelope
//! insertion order and FIFO order, before any further live forwarding. A
//! late subscriber therefore starts from the latest known state of every
//! stream it cares about.
//!
//! An upstream publisher going away does not clear the cache; replays keep
//! being served and ingest resumes when the publisher returns.

use crate::pubsub::cache::{CachePolicy, TopicCache};
use crate::pubsub::publisher::{Publisher, SubscriptionEvent};
use crate::wire::{Frame, FramedConn};
use crate::{Error, Result};

struct Upstream {
    url: String,
    conn: Option<FramedConn>,
}

pub struct PubSubCache {
    downstream: Publisher,
    upstreams: Vec<Upstream>,
    cache: TopicCache<Vec<u8>>,
}

impl PubSubCache {
    /// Bind the downstream publication socket and remember the upstream
    /// publisher urls. Bind failure is fatal; upstream connects are lazy.
    pub fn bind(url: &str, upstream_urls: &[String], policy: CachePolicy) -> Result<Self> {
        Ok(Self {
            downstream: Publisher::bind(url)?,
            upstreams: upstream_urls
                .iter()
                .map(|url| Upstream { url: url.clone(), conn: None })
                .collect(),
            cache: TopicCache::new(policy),
        })
    }

    /// One broker tick: observe subscriptions, replay, ingest, forward.
    pub fn poll(&mut self) -> Result<()> {
        self.downstream.service();

        // Replay before touching upstream so a new subscription sees cached
        // state ahead of any live message ingested this tick.
        for event in self.downstream.take_subscription_events() {
            if let SubscriptionEvent::Subscribe(prefix) = event {
                log::debug!("replaying cache for new subscription {prefix:?}");
                for (envelope, fifo) in self.cache.matching(&prefix) {
                    for payload in fifo {
                        self.downstream.send_raw(envelope, payload);
                    }
                }
            }
        }

        self.ensure_upstreams();
        for idx in 0..self.upstreams.len() {
            loop {
                let Some(conn) = self.upstreams[idx].conn.as_mut() else { break };
                match conn.try_recv() {
                    Ok(Some(Frame::Message { envelope, payload })) => {
                        self.cache.admit(&envelope, payload.clone());
                        self.downstream.send_raw(&envelope, &payload);
                    }
                    Ok(Some(_)) => {
                        log::warn!("unexpected frame kind from upstream, ignoring");
                    }
                    Ok(None) => break,
                    Err(Error::Disconnected) => {
                        log::info!(
                            "upstream {} disconnected; cache retained",
                            self.upstreams[idx].url
                        );
                        self.upstreams[idx].conn = None;
                    }
                    Err(err) => {
                        log::warn!("resetting upstream {}: {err}", self.upstreams[idx].url);
                        self.upstreams[idx].conn = None;
                    }
                }
            }
        }
        Ok(())
    }

    fn ensure_upstreams(&mut self) {
        for upstream in &mut self.upstreams {
            if upstream.conn.is_some() {
                continue;
            }
            match FramedConn::connect(&upstream.url) {
                Ok(mut conn) => {
                    // Subscribe to everything; the empty prefix matches all.
                    match conn.send(&Frame::Subscribe { prefix: String::new() }) {
                        Ok(()) => upstream.conn = Some(conn),
                        Err(err) => log::warn!("upstream subscribe failed: {err}"),
                    }
                }
                Err(err) => log::debug!("upstream {} not reachable: {err}", upstream.url),
            }
        }
    }

    /// Number of distinct envelopes currently cached.
    pub fn cached_envelopes(&self) -> usize {
        self.cache.iter().count()
    }

    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.downstream.local_addr()
    }
}
