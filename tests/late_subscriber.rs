//! A broker between publisher and subscribers replays cached state to
//! late joiners.

use std::time::{Duration, Instant};

use probebus::msg::{
    envelope_of, ControlMode, ControlState, ExperimentProblem, Msg, Scan2d,
};
use probebus::pubsub::{CachePolicy, PubSubCache, Publisher, Subscriber};

fn named_scan(name: &str) -> Msg {
    let mut scan = Scan2d::default();
    scan.params.name = name.to_string();
    Msg::Scan2d(scan)
}

fn problem_status() -> Msg {
    Msg::ControlState(ControlState {
        mode: ControlMode::Problem,
        client_in_control: None,
        problems: [ExperimentProblem::TipShapeChanged].into(),
    })
}

fn poll_until<F: Fn(&Subscriber) -> bool>(sub: &mut Subscriber, deadline: Duration, done: F) {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        let _ = sub.poll(Duration::from_millis(10)).unwrap();
        if done(sub) {
            return;
        }
    }
    panic!("condition not reached within {deadline:?}");
}

#[test]
fn late_subscriber_inherits_cached_state() {
    let mut publisher = Publisher::bind("tcp://127.0.0.1:0").unwrap();
    let pub_url = publisher.local_addr().unwrap().to_string();

    let mut broker =
        PubSubCache::bind("tcp://127.0.0.1:0", &[pub_url], CachePolicy::default()).unwrap();
    let broker_url = broker
        .local_addr()
        .expect("broker downstream bound")
        .to_string();
    std::thread::spawn(move || loop {
        broker.poll().unwrap();
        std::thread::sleep(Duration::from_millis(1));
    });

    // Wait until the broker's subscribe-all reached the publisher.
    let start = Instant::now();
    loop {
        publisher.service();
        if !publisher.take_subscription_events().is_empty() {
            break;
        }
        assert!(start.elapsed() < Duration::from_secs(5), "broker never subscribed");
        std::thread::sleep(Duration::from_millis(1));
    }

    let mut sub_scan = Subscriber::simple(&broker_url, &["Scan2d"]).unwrap();
    let mut sub_status = Subscriber::simple(&broker_url, &["ControlState"]).unwrap();
    std::thread::sleep(Duration::from_millis(100));

    let scan = named_scan("john doe");
    let status = problem_status();
    publisher.send(&scan).unwrap();
    publisher.send(&status).unwrap();

    poll_until(&mut sub_scan, Duration::from_secs(2), |s| {
        s.cache().get(&envelope_of(&scan)).is_some()
    });
    poll_until(&mut sub_status, Duration::from_secs(2), |s| {
        s.cache().get("ControlState").is_some()
    });

    // The third subscriber joins after both messages went out, yet inherits
    // exactly the last scan and the last status from the broker's cache.
    let mut sub_both = Subscriber::simple(&broker_url, &["Scan2d", "ControlState"]).unwrap();
    poll_until(&mut sub_both, Duration::from_secs(2), |s| {
        s.cache().get(&envelope_of(&scan)).is_some() && s.cache().get("ControlState").is_some()
    });

    let scans = sub_both.cache().get(&envelope_of(&scan)).unwrap();
    assert_eq!(scans.len(), 1);
    assert_eq!(scans[0], scan);
    let statuses = sub_both.cache().get("ControlState").unwrap();
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0], status);

    // Live traffic still flows to everyone after the replay.
    publisher.send(&scan).unwrap();
    assert!(sub_scan.poll(Duration::from_secs(1)).unwrap());
    assert!(sub_both.poll(Duration::from_secs(1)).unwrap());
}

#[test]
fn depth_one_cache_replays_only_the_latest() {
    let mut publisher = Publisher::bind("tcp://127.0.0.1:0").unwrap();
    let pub_url = publisher.local_addr().unwrap().to_string();

    let mut broker =
        PubSubCache::bind("tcp://127.0.0.1:0", &[pub_url], CachePolicy::default()).unwrap();
    let broker_url = broker.local_addr().unwrap().to_string();
    std::thread::spawn(move || loop {
        broker.poll().unwrap();
        std::thread::sleep(Duration::from_millis(1));
    });

    let start = Instant::now();
    loop {
        publisher.service();
        if !publisher.take_subscription_events().is_empty() {
            break;
        }
        assert!(start.elapsed() < Duration::from_secs(5));
        std::thread::sleep(Duration::from_millis(1));
    }

    let first = named_scan("first");
    let second = named_scan("second");
    publisher.send(&first).unwrap();
    publisher.send(&second).unwrap();
    std::thread::sleep(Duration::from_millis(100));

    let mut late = Subscriber::simple(&broker_url, &["Scan2d"]).unwrap();
    poll_until(&mut late, Duration::from_secs(2), |s| {
        s.cache().get(&envelope_of(&second)).is_some()
    });

    let fifo = late.cache().get(&envelope_of(&second)).unwrap();
    assert_eq!(fifo.len(), 1);
    assert_eq!(fifo[0], second);
}
