//! Subscribe side of the fabric.
//!
//! A subscriber connects to one or more publishers, announces its topic
//! prefixes, and ingests matching messages into a local cache through the
//! cache logic. Decode failures are logged and dropped; a malformed message
//! never terminates the stream. A lost connection is retried on every poll.

use std::time::{Duration, Instant};

use crate::msg::{self, Msg};
use crate::pubsub::cache::{CacheLogic, CachePolicy, TopicCache};
use crate::wire::{park, Frame, FramedConn};
use crate::{Error, Result};

struct Source {
    url: String,
    conn: Option<FramedConn>,
}

pub struct Subscriber {
    sources: Vec<Source>,
    prefixes: Vec<String>,
    logic: CacheLogic,
    cache: TopicCache<Msg>,
}

impl Subscriber {
    /// Connect to `urls` and subscribe to the given envelope prefixes.
    ///
    /// A publisher that is not up yet is not fatal; the connection is
    /// retried on each `poll`.
    pub fn connect(
        urls: &[String],
        prefixes: &[String],
        logic: CacheLogic,
        policy: CachePolicy,
    ) -> Result<Self> {
        let mut sub = Self {
            sources: urls
                .iter()
                .map(|url| Source { url: url.clone(), conn: None })
                .collect(),
            prefixes: prefixes.to_vec(),
            logic,
            cache: TopicCache::new(policy),
        };
        sub.ensure_connected();
        Ok(sub)
    }

    /// Convenience: a single publisher url with default cache logic.
    pub fn simple(url: &str, prefixes: &[&str]) -> Result<Self> {
        let prefixes: Vec<String> = prefixes.iter().map(|p| p.to_string()).collect();
        Self::connect(
            &[url.to_string()],
            &prefixes,
            CacheLogic::new(),
            CachePolicy::default(),
        )
    }

    fn ensure_connected(&mut self) {
        for source in &mut self.sources {
            if source.conn.is_some() {
                continue;
            }
            match FramedConn::connect(&source.url) {
                Ok(mut conn) => {
                    let mut subscribed = true;
                    for prefix in &self.prefixes {
                        if let Err(err) = conn.send(&Frame::Subscribe { prefix: prefix.clone() }) {
                            log::warn!("subscribe to {} failed: {err}", source.url);
                            subscribed = false;
                            break;
                        }
                    }
                    if subscribed {
                        source.conn = Some(conn);
                    }
                }
                Err(err) => log::debug!("connect to {} failed: {err}", source.url),
            }
        }
    }

    /// Ingest until at least one message arrived or `timeout` elapsed.
    ///
    /// Returns true when one or more messages were admitted to the cache.
    /// All frames already available are drained before returning.
    pub fn poll(&mut self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            self.ensure_connected();
            let ingested = self.drain();
            if ingested {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            park();
        }
    }

    fn drain(&mut self) -> bool {
        let mut ingested = false;
        for source in &mut self.sources {
            let Some(conn) = source.conn.as_mut() else { continue };
            loop {
                match conn.try_recv() {
                    Ok(Some(Frame::Message { envelope, payload })) => {
                        match self.logic.decode(&envelope, &payload) {
                            Ok(message) => {
                                let key = msg::envelope_of(&message);
                                self.cache.admit(&key, message);
                                ingested = true;
                            }
                            Err(err) => {
                                log::warn!("dropping message under {envelope}: {err}");
                            }
                        }
                    }
                    Ok(Some(_)) => {
                        log::warn!("unexpected frame kind on subscribe socket, ignoring");
                    }
                    Ok(None) => break,
                    Err(Error::Disconnected) => {
                        log::debug!("publisher {} went away", source.url);
                        source.conn = None;
                        break;
                    }
                    Err(err) => {
                        log::warn!("resetting connection to {}: {err}", source.url);
                        source.conn = None;
                        break;
                    }
                }
            }
        }
        ingested
    }

    /// Read-only view of the local cache.
    pub fn cache(&self) -> &TopicCache<Msg> {
        &self.cache
    }

    /// True once a kill signal has been observed on any subscribed stream.
    pub fn saw_kill(&self) -> bool {
        self.cache.get(msg::ENV_KILL).is_some()
    }
}
