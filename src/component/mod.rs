//! Component skeleton shared by every process in the fabric.
//!
//! A component is a single cooperative loop: check for the global kill
//! signal, do one unit of component-specific work, emit a heartbeat when one
//! is due, sleep. No iteration blocks without a timeout, and an error in one
//! iteration is logged and does not leak into the next.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::msg::{Heartbeat, Msg};
use crate::pubsub::{Publisher, Subscriber};
use crate::Result;

/// Work hooks a process plugs into the shared loop.
pub trait Component {
    fn name(&self) -> &str;

    /// One unit of component-specific work. Must not block unboundedly.
    fn per_loop(&mut self) -> Result<()>;

    /// Publisher used for heartbeats (and whatever else the component
    /// publishes). A component without one simply goes unmonitored.
    fn publisher_mut(&mut self) -> Option<&mut Publisher> {
        None
    }

    /// Subscriber checked for the kill signal each iteration.
    fn subscriber_mut(&mut self) -> Option<&mut Subscriber> {
        None
    }

    /// Component-initiated shutdown (e.g. the router after END_EXPERIMENT).
    fn wants_shutdown(&self) -> bool {
        false
    }
}

/// Periodic heartbeat publication with a monotonically increasing seq.
pub struct Heartbeater {
    name: String,
    period: Duration,
    seq: u64,
    last: Option<Instant>,
}

impl Heartbeater {
    pub fn new(name: &str, period: Duration) -> Self {
        Self { name: name.to_string(), period, seq: 0, last: None }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Publish a beat when the period has elapsed since the previous one.
    pub fn beat_if_due(&mut self, publisher: &mut Publisher) -> Result<()> {
        let due = match self.last {
            None => true,
            Some(at) => at.elapsed() >= self.period,
        };
        if !due {
            return Ok(());
        }
        publisher.send(&Msg::Heartbeat(Heartbeat {
            name: self.name.clone(),
            period_s: self.period.as_secs_f64(),
            seq: self.seq,
        }))?;
        self.seq += 1;
        self.last = Some(Instant::now());
        Ok(())
    }
}

/// Observer-side staleness detection over heartbeat streams.
///
/// Works from depth-1 caches: a beat's seq advancing resets the clock; a seq
/// frozen for more than twice the sender's period means the sender is dead.
/// A component never observed is treated as alive, since there is nothing
/// to time it against yet.
#[derive(Default)]
pub struct LivenessMonitor {
    seen: HashMap<String, BeatRecord>,
}

struct BeatRecord {
    seq: u64,
    period: Duration,
    at: Instant,
}

impl LivenessMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, beat: &Heartbeat) {
        let period = Duration::from_secs_f64(beat.period_s.max(0.001));
        match self.seen.get_mut(&beat.name) {
            Some(record) if record.seq == beat.seq => {}
            Some(record) => {
                record.seq = beat.seq;
                record.period = period;
                record.at = Instant::now();
            }
            None => {
                self.seen.insert(
                    beat.name.clone(),
                    BeatRecord { seq: beat.seq, period, at: Instant::now() },
                );
            }
        }
    }

    pub fn is_stale(&self, name: &str) -> bool {
        match self.seen.get(name) {
            Some(record) => record.at.elapsed() > record.period * 2,
            None => false,
        }
    }
}

/// Drives a [`Component`] until a kill signal or local shutdown.
pub struct Runner {
    loop_sleep: Duration,
    heartbeater: Heartbeater,
    stopped: bool,
}

impl Runner {
    pub fn new(name: &str, loop_sleep: Duration, hb_period: Duration) -> Self {
        Self {
            loop_sleep,
            heartbeater: Heartbeater::new(name, hb_period),
            stopped: false,
        }
    }

    pub fn run(&mut self, component: &mut dyn Component) {
        log::info!("component {} starting", component.name());
        while !self.stopped {
            self.tick(component);
        }
        log::info!("component {} stopped", component.name());
    }

    /// One loop iteration. Errors from `per_loop` are logged, not fatal:
    /// the next iteration starts from clean state.
    pub fn tick(&mut self, component: &mut dyn Component) {
        if let Some(subscriber) = component.subscriber_mut() {
            if let Err(err) = subscriber.poll(Duration::ZERO) {
                log::warn!("subscriber poll failed: {err}");
            }
            if subscriber.saw_kill() {
                log::info!("kill signal observed, shutting down");
                self.stopped = true;
                return;
            }
        }

        if let Err(err) = component.per_loop() {
            log::error!("loop iteration failed: {err}");
        }

        if let Some(publisher) = component.publisher_mut() {
            if let Err(err) = self.heartbeater.beat_if_due(publisher) {
                log::warn!("heartbeat failed: {err}");
            }
        }

        if component.wants_shutdown() {
            self.stopped = true;
            return;
        }
        std::thread::sleep(self.loop_sleep);
    }

    pub fn request_stop(&mut self) {
        self.stopped = true;
    }

    pub fn stopped(&self) -> bool {
        self.stopped
    }
}
