//! Client retry semantics: silence yields NO_RESPONSE, and a socket
//! teardown/rebuild mid-conversation still reaches a server that wakes up
//! late.

use std::net::TcpListener;
use std::time::{Duration, Instant};

use probebus::control::{ControlClient, ControlRequest, ControlResponse, ControlServer};

#[test]
fn silence_exhausts_into_no_response() {
    // Reserve a port, then free it so nothing listens there.
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = listener.local_addr().unwrap().to_string();
    drop(listener);

    let mut client = ControlClient::new(&url, "lonely")
        .with_timeouts(Duration::from_millis(100), 2);
    let started = Instant::now();
    assert_eq!(client.start_scan(), ControlResponse::NoResponse);
    // Two attempts only; far below an unbounded wait.
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn retries_reach_a_server_that_wakes_up_late() {
    let server = ControlServer::bind("tcp://127.0.0.1:0").unwrap();
    let url = server.local_addr().unwrap().to_string();

    // The server exists but serves nothing for a while; the client's
    // first sends time out and its socket is rebuilt in between.
    std::thread::spawn(move || {
        let mut server = server;
        std::thread::sleep(Duration::from_millis(450));
        loop {
            if let Ok(Some((identity, request))) = server.poll(Duration::from_millis(10)) {
                assert_eq!(identity, "patient");
                assert_eq!(request, ControlRequest::StopScan);
                server.reply(ControlResponse::Success).unwrap();
            }
        }
    });

    let mut client = ControlClient::new(&url, "patient")
        .with_timeouts(Duration::from_millis(150), 8);
    assert_eq!(client.stop_scan(), ControlResponse::Success);
}
