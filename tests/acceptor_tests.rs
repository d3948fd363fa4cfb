mod common;

use common::{wait_until, EchoInstance};
use std::io::Read;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

const CLIENTS: usize = 8;

fn spawned_workers(log: &str) -> usize {
    log.lines().filter(|line| line.contains("spawned worker")).count()
}

#[test]
fn test_concurrent_clients_get_only_their_own_bytes() {
    let instance = Arc::new(EchoInstance::new());
    instance.start();
    drop(instance.connect());

    // Hold every connection open at once before anyone talks.
    let barrier = Arc::new(Barrier::new(CLIENTS));
    let handles: Vec<_> = (0..CLIENTS)
        .map(|i| {
            let instance = Arc::clone(&instance);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut stream = instance.connect();
                barrier.wait();

                let mut replies = Vec::new();
                for round in 0..3 {
                    let message = format!("client-{}-round-{};", i, round).repeat(i + 1);
                    let reply = instance.round_trip(&mut stream, message.as_bytes());
                    replies.push((message.into_bytes(), reply));
                }
                replies
            })
        })
        .collect();

    for handle in handles {
        for (sent, received) in handle.join().unwrap() {
            assert_eq!(sent, received);
        }
    }
}

#[test]
fn test_one_worker_per_connection() {
    let instance = EchoInstance::new();
    instance.start();

    for i in 0..CLIENTS {
        let mut stream = instance.connect();
        let message = format!("ping-{}", i);
        assert_eq!(
            instance.round_trip(&mut stream, message.as_bytes()),
            message.as_bytes()
        );
    }

    assert!(
        wait_until(Duration::from_secs(5), || spawned_workers(&instance.log()) == CLIENTS),
        "log: {}",
        instance.log()
    );
}

#[test]
fn test_worker_closes_on_client_eof() {
    let instance = EchoInstance::new();
    instance.start();

    let mut stream = instance.connect();
    assert_eq!(instance.round_trip(&mut stream, b"bye"), b"bye");
    stream.shutdown(std::net::Shutdown::Write).unwrap();

    // The worker sees EOF, returns, and its exit closes the socket.
    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).unwrap();
    assert!(rest.is_empty());
}

#[cfg(target_os = "linux")]
#[test]
fn test_no_zombie_workers_left_behind() {
    let instance = Arc::new(EchoInstance::new());
    instance.start();
    let daemon = instance.pid().unwrap();

    let handles: Vec<_> = (0..CLIENTS)
        .map(|i| {
            let instance = Arc::clone(&instance);
            thread::spawn(move || {
                let mut stream = instance.connect();
                let message = format!("zombie-check-{}", i);
                assert_eq!(
                    instance.round_trip(&mut stream, message.as_bytes()),
                    message.as_bytes()
                );
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // Every worker has seen EOF by now; each exit interrupts accept and is
    // reaped on the next pass.
    let settled = wait_until(Duration::from_secs(5), || {
        common::children_of(daemon).is_empty()
    });
    assert!(
        settled,
        "daemon {} still has children: {:?}",
        daemon,
        common::children_of(daemon)
    );
}

#[test]
fn test_partial_line_reaches_client_without_flush() {
    let instance = EchoInstance::with_banner("ready> ");
    instance.start();

    // Nothing is sent first: the prompt has no newline and must still
    // arrive while the worker sits in its read.
    let mut stream = instance.connect();
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    let mut prompt = [0u8; 7];
    stream.read_exact(&mut prompt).expect("prompt never arrived");
    assert_eq!(&prompt, b"ready> ");

    assert_eq!(instance.round_trip(&mut stream, b"after"), b"after");
}
