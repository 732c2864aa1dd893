//! Lease exclusivity and problem-driven mode transitions through a live
//! router.

use std::time::{Duration, Instant};

use probebus::control::{AdminControlClient, ControlClient, ControlResponse, ControlRouter, ControlServer};
use probebus::msg::{ControlMode, ExperimentProblem, Msg};
use probebus::pubsub::{CacheLogic, CachePolicy, Publisher, Subscriber};

/// Router with no device behind it (these scenarios never forward) and a
/// state-broadcast publisher. Returns (router url, broadcast url).
fn spawn_router(initial_mode: ControlMode, admins: Vec<String>) -> (String, String) {
    let server = ControlServer::bind("tcp://127.0.0.1:0").unwrap();
    let router_url = server.local_addr().unwrap().to_string();
    // Unroutable device; forwarded requests would come back NoResponse.
    let device = ControlClient::new("tcp://127.0.0.1:9", "router")
        .with_timeouts(Duration::from_millis(50), 1);
    let publisher = Publisher::bind("tcp://127.0.0.1:0").unwrap();
    let pub_url = publisher.local_addr().unwrap().to_string();

    let mut router = ControlRouter::new(server, device, publisher, None, initial_mode, admins);
    std::thread::spawn(move || loop {
        router.poll(Duration::from_millis(5)).unwrap();
        if router.shutdown_requested() {
            break;
        }
    });
    (router_url, pub_url)
}

fn client(url: &str, identity: &str) -> ControlClient {
    ControlClient::new(url, identity).with_timeouts(Duration::from_millis(500), 4)
}

#[test]
fn one_lease_at_a_time() {
    let (url, _) = spawn_router(ControlMode::Manual, vec![]);
    let mut a = client(&url, "client_a");
    let mut b = client(&url, "client_b");

    assert_eq!(a.request_control(ControlMode::Manual), ControlResponse::Success);
    assert_eq!(
        b.request_control(ControlMode::Manual),
        ControlResponse::AlreadyUnderControl
    );

    assert_eq!(a.release_control(), ControlResponse::Success);
    assert_eq!(b.request_control(ControlMode::Manual), ControlResponse::Success);
}

#[test]
fn mode_mismatch_is_rejected() {
    let (url, _) = spawn_router(ControlMode::Manual, vec![]);
    let mut a = client(&url, "client_a");
    assert_eq!(
        a.request_control(ControlMode::Automated),
        ControlResponse::WrongMode
    );
}

#[test]
fn crashed_client_rebinds_by_identity() {
    let (url, _) = spawn_router(ControlMode::Manual, vec![]);

    let mut first = client(&url, "persistent");
    assert_eq!(first.request_control(ControlMode::Manual), ControlResponse::Success);
    drop(first); // the crash

    // Same identity, fresh process: the lease is still recognised as ours,
    // so a device command is forwarded (and dies at the unroutable device)
    // rather than rejected as NOT_IN_CONTROL.
    let mut reborn = client(&url, "persistent");
    assert_eq!(reborn.start_scan(), ControlResponse::NoResponse);
    // Re-requesting the same grant is an idempotent success, not a conflict.
    assert_eq!(reborn.request_control(ControlMode::Manual), ControlResponse::Success);
    assert_eq!(reborn.release_control(), ControlResponse::Success);
}

#[test]
fn problems_force_problem_mode_and_revoke_the_lease() {
    let (url, pub_url) = spawn_router(ControlMode::Automated, vec![]);

    let mut policy = CachePolicy::new(1);
    policy.set_depth("ControlState", 8);
    let mut watcher = Subscriber::connect(
        &[pub_url],
        &["ControlState".to_string()],
        CacheLogic::new(),
        policy,
    )
    .unwrap();
    std::thread::sleep(Duration::from_millis(100));

    let mut a = client(&url, "automation");
    let mut observer = client(&url, "observer");

    assert_eq!(a.request_control(ControlMode::Automated), ControlResponse::Success);
    assert_eq!(
        observer.add_experiment_problem(ExperimentProblem::TipShapeChanged),
        ControlResponse::Success
    );

    // The lease died with the mode change.
    assert_eq!(a.start_scan(), ControlResponse::NotInControl);

    assert_eq!(
        observer.remove_experiment_problem(ExperimentProblem::TipShapeChanged),
        ControlResponse::Success
    );
    assert_eq!(a.request_control(ControlMode::Automated), ControlResponse::Success);

    // The router broadcast each transition; the problem-mode state names
    // the asserted problem and no holder.
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        let _ = watcher.poll(Duration::from_millis(10)).unwrap();
        let states: Vec<_> = watcher
            .cache()
            .get("ControlState")
            .map(|fifo| fifo.iter().cloned().collect())
            .unwrap_or_default();
        let modes: Vec<ControlMode> = states
            .iter()
            .filter_map(|m| match m {
                Msg::ControlState(s) => Some(s.mode),
                _ => None,
            })
            .collect();
        if modes.contains(&ControlMode::Problem)
            && modes.last() == Some(&ControlMode::Automated)
        {
            let problem_state = states
                .iter()
                .find_map(|m| match m {
                    Msg::ControlState(s) if s.mode == ControlMode::Problem => Some(s.clone()),
                    _ => None,
                })
                .unwrap();
            assert!(problem_state
                .problems
                .contains(&ExperimentProblem::TipShapeChanged));
            assert_eq!(problem_state.client_in_control, None);
            break;
        }
        assert!(Instant::now() < deadline, "broadcasts not observed");
    }
}

#[test]
fn admin_gates_mode_changes_and_shutdown() {
    let (url, _) = spawn_router(ControlMode::Manual, vec!["boss".to_string()]);

    let mut rando = AdminControlClient::new(&url, "rando");
    assert_eq!(
        rando.set_control_mode(ControlMode::Automated),
        ControlResponse::CmdNotSupported
    );
    assert_eq!(rando.end_experiment(), ControlResponse::CmdNotSupported);

    let mut boss = AdminControlClient::new(&url, "boss");
    assert_eq!(
        boss.set_control_mode(ControlMode::Automated),
        ControlResponse::Success
    );
    assert_eq!(boss.end_experiment(), ControlResponse::Success);
}
