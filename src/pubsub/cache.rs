//! Cache logic: envelope resolution, per-topic history depth, bounded FIFOs.
//!
//! The broker caches raw payload bytes per envelope; subscribers cache
//! decoded messages. Both share [`TopicCache`], an insertion-ordered map of
//! envelope to bounded FIFO, and [`CachePolicy`], which answers how deep the
//! FIFO for an envelope should be. Specialised scan envelopes that were never
//! configured explicitly inherit their base envelope's depth, so a scan of a
//! brand-new channel/size still gets a FIFO on first admit.

use std::collections::{HashMap, VecDeque};

use indexmap::IndexMap;

use crate::msg::{self, Msg, MsgKind};
use crate::{Error, Result};

/// Per-envelope history depth. Constant for the lifetime of a broker.
#[derive(Debug, Clone)]
pub struct CachePolicy {
    default_depth: usize,
    depths: HashMap<String, usize>,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::new(1)
    }
}

impl CachePolicy {
    pub fn new(default_depth: usize) -> Self {
        Self { default_depth: default_depth.max(1), depths: HashMap::new() }
    }

    /// Configure the depth for one envelope. Configuring a base envelope
    /// (e.g. `"Scan2d"`) sets the fallback for all its specialisations.
    pub fn set_depth(&mut self, envelope: impl Into<String>, depth: usize) {
        self.depths.insert(envelope.into(), depth.max(1));
    }

    /// Depth for an envelope: exact entry, else the longest configured
    /// envelope that is a prefix of it, else the default.
    pub fn depth_for(&self, envelope: &str) -> usize {
        if let Some(&depth) = self.depths.get(envelope) {
            return depth;
        }
        self.depths
            .iter()
            .filter(|(key, _)| envelope.starts_with(key.as_str()))
            .max_by_key(|(key, _)| key.len())
            .map(|(_, &depth)| depth)
            .unwrap_or(self.default_depth)
    }
}

/// Insertion-ordered envelope → bounded FIFO of `T`.
///
/// Insertion order matters: broker replay walks entries in the order their
/// envelopes were first admitted.
#[derive(Debug, Clone)]
pub struct TopicCache<T> {
    entries: IndexMap<String, VecDeque<T>>,
    policy: CachePolicy,
}

impl<T> TopicCache<T> {
    pub fn new(policy: CachePolicy) -> Self {
        Self { entries: IndexMap::new(), policy }
    }

    /// Append to the envelope's FIFO, creating it at policy depth on first
    /// use and discarding the oldest entry when full.
    pub fn admit(&mut self, envelope: &str, value: T) {
        let depth = self.policy.depth_for(envelope);
        let fifo = self
            .entries
            .entry(envelope.to_string())
            .or_insert_with(|| VecDeque::with_capacity(depth));
        if fifo.len() == depth {
            fifo.pop_front();
        }
        fifo.push_back(value);
    }

    pub fn get(&self, envelope: &str) -> Option<&VecDeque<T>> {
        self.entries.get(envelope)
    }

    /// Latest entry for an envelope, if any.
    pub fn latest(&self, envelope: &str) -> Option<&T> {
        self.entries.get(envelope).and_then(|fifo| fifo.back())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &VecDeque<T>)> {
        self.entries.iter()
    }

    /// Envelopes in insertion order whose name starts with `prefix`.
    pub fn matching<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a VecDeque<T>)> {
        self.entries
            .iter()
            .filter(move |(envelope, _)| envelope.starts_with(prefix))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Maps envelopes to message types for decode, with prefix fallback.
#[derive(Debug, Clone)]
pub struct CacheLogic {
    known: Vec<String>,
}

impl Default for CacheLogic {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheLogic {
    /// Logic knowing every base envelope.
    pub fn new() -> Self {
        Self {
            known: MsgKind::ALL
                .iter()
                .map(|kind| kind.base_envelope().to_string())
                .collect(),
        }
    }

    /// Register a specialised envelope (e.g. a per-channel scan stream) so
    /// that resolution prefers it over the base.
    pub fn register(&mut self, envelope: impl Into<String>) {
        let envelope = envelope.into();
        if !self.known.contains(&envelope) {
            self.known.push(envelope);
        }
    }

    /// Resolve a received envelope to a known one: exact match, else the
    /// longest known envelope that is a prefix of it (first-longest-match).
    pub fn resolve(&self, envelope: &str) -> Result<&str> {
        let mut best: Option<&str> = None;
        for known in &self.known {
            if known == envelope {
                return Ok(known);
            }
            if envelope.starts_with(known.as_str())
                && best.map_or(true, |prev| known.len() > prev.len())
            {
                best = Some(known);
            }
        }
        best.ok_or_else(|| Error::UnknownEnvelope(envelope.to_string()))
    }

    /// Decode a payload received under `envelope`, applying prefix fallback.
    pub fn decode(&self, envelope: &str, payload: &[u8]) -> Result<Msg> {
        let resolved = self.resolve(envelope)?;
        let kind = msg::kind_of_envelope(resolved)?;
        msg::decode_payload(kind, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::{encode_payload, envelope_of, Scan2d, ScanState, ScanStateMsg};

    fn scan(channel: &str, size_x: f64, stamp: u64) -> Scan2d {
        let mut s = Scan2d::default();
        s.channel = channel.to_string();
        s.params.spatial.roi.size.x = size_x;
        s.timestamp_ms = Some(stamp);
        s
    }

    #[test]
    fn depth_one_keeps_only_latest() {
        let mut cache = TopicCache::new(CachePolicy::new(1));
        cache.admit("ScanState", ScanStateMsg { state: ScanState::Free });
        cache.admit("ScanState", ScanStateMsg { state: ScanState::Scanning });
        let fifo = cache.get("ScanState").unwrap();
        assert_eq!(fifo.len(), 1);
        assert_eq!(fifo[0].state, ScanState::Scanning);
    }

    #[test]
    fn deeper_fifo_keeps_order_and_bound() {
        let mut policy = CachePolicy::new(1);
        policy.set_depth("ScanState", 3);
        let mut cache = TopicCache::new(policy);
        for state in [
            ScanState::Free,
            ScanState::Moving,
            ScanState::Free,
            ScanState::Scanning,
        ] {
            cache.admit("ScanState", ScanStateMsg { state });
        }
        let fifo = cache.get("ScanState").unwrap();
        let states: Vec<_> = fifo.iter().map(|m| m.state).collect();
        assert_eq!(
            states,
            vec![ScanState::Moving, ScanState::Free, ScanState::Scanning]
        );
    }

    #[test]
    fn specialised_scan_envelope_inherits_base_depth() {
        let mut policy = CachePolicy::new(1);
        policy.set_depth("Scan2d", 2);
        assert_eq!(policy.depth_for("Scan2d_topo_5"), 2);
        assert_eq!(policy.depth_for("Scan2d"), 2);
        assert_eq!(policy.depth_for("ScanState"), 1);
    }

    #[test]
    fn explicit_specialisation_beats_base() {
        let mut policy = CachePolicy::new(1);
        policy.set_depth("Scan2d", 2);
        policy.set_depth("Scan2d_topo_5", 8);
        assert_eq!(policy.depth_for("Scan2d_topo_5"), 8);
        assert_eq!(policy.depth_for("Scan2d_phase_5"), 2);
    }

    #[test]
    fn scans_partition_per_channel_and_size() {
        let mut cache = TopicCache::new(CachePolicy::new(1));
        let a = Msg::Scan2d(scan("topo", 5.0, 1));
        let b = Msg::Scan2d(scan("topo", 50.0, 2));
        cache.admit(&envelope_of(&a), a.clone());
        cache.admit(&envelope_of(&b), b.clone());
        assert_eq!(cache.get("Scan2d_topo_5").unwrap().len(), 1);
        assert_eq!(cache.get("Scan2d_topo_50").unwrap().len(), 1);
    }

    #[test]
    fn decode_falls_back_to_base_envelope() {
        let logic = CacheLogic::new();
        let original = Msg::Scan2d(scan("newchan", 7.0, 3));
        let payload = encode_payload(&original).unwrap();
        let decoded = logic.decode("Scan2d_newchan_7", &payload).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn resolve_prefers_longest_known_prefix() {
        let mut logic = CacheLogic::new();
        logic.register("Scan2d_topo_5");
        assert_eq!(logic.resolve("Scan2d_topo_5").unwrap(), "Scan2d_topo_5");
        assert_eq!(logic.resolve("Scan2d_phase_5").unwrap(), "Scan2d");
    }

    #[test]
    fn unknown_envelope_is_an_error() {
        let logic = CacheLogic::new();
        assert!(matches!(
            logic.decode("Telemetry", b"{}"),
            Err(Error::UnknownEnvelope(_))
        ));
    }

    #[test]
    fn matching_preserves_insertion_order() {
        let mut cache = TopicCache::new(CachePolicy::new(1));
        cache.admit("Scan2d_topo_5", 1u8);
        cache.admit("ScanState", 2u8);
        cache.admit("Scan2d_phase_5", 3u8);
        let keys: Vec<_> = cache.matching("Scan2d").map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["Scan2d_topo_5", "Scan2d_phase_5"]);
    }
}
