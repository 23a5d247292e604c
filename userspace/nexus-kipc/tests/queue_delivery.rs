// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Integration tests for message queue delivery under real threads
//! OWNERS: @kernel-ipc-team
//!
//! TEST_SCENARIOS:
//!   - contended_queue_delivers_each_message_once(): 8 senders x 100 messages, 4 receivers
//!   - concurrent_equal_senders_keep_per_sender_order()
//!   - concurrent_mixed_senders_drain_priority_major()
//!   - drain_order_is_priority_major_fifo_minor(): proptest over arbitrary hint sequences
//!   - bounded_receive_times_out() / nowait_receive_reports_no_message()

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use nexus_kipc::{Caller, Error, Registry, Wait};
use proptest::prelude::*;

const SENDERS: u32 = 8;
const PER_SENDER: u32 = 100;
const RECEIVERS: u32 = 4;

#[test]
fn contended_queue_delivers_each_message_once() {
    let registry = Arc::new(Registry::new());
    let queue = registry.queue_create(&Caller::user(1)).unwrap();

    let receivers: Vec<_> = (0..RECEIVERS)
        .map(|r| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                let caller = Caller::user(500 + r);
                let mut seen = Vec::new();
                loop {
                    match registry.queue_receive(
                        &caller,
                        queue,
                        0,
                        Wait::Timeout(Duration::from_millis(500)),
                    ) {
                        Ok(msg) => seen.push(msg.into_payload()),
                        Err(Error::TimedOut) => break seen,
                        Err(other) => panic!("unexpected receive error {other}"),
                    }
                }
            })
        })
        .collect();

    let senders: Vec<_> = (0..SENDERS)
        .map(|s| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                let caller = Caller::user(100 + s);
                for n in 0..PER_SENDER {
                    let mut payload = s.to_le_bytes().to_vec();
                    payload.extend_from_slice(&n.to_le_bytes());
                    registry.queue_send(&caller, queue, 1, &payload, None).unwrap();
                }
            })
        })
        .collect();

    for sender in senders {
        sender.join().unwrap();
    }
    let delivered: Vec<Vec<u8>> =
        receivers.into_iter().flat_map(|receiver| receiver.join().unwrap()).collect();

    let distinct: HashSet<_> = delivered.iter().cloned().collect();
    assert_eq!(delivered.len(), (SENDERS * PER_SENDER) as usize);
    assert_eq!(distinct.len(), delivered.len());

    let stat = registry.queue_stat(queue).unwrap();
    assert_eq!(stat.depth, 0);
    assert_eq!(stat.sent, u64::from(SENDERS * PER_SENDER));
    assert_eq!(stat.received, stat.sent);
}

/// Runs `SENDERS` threads sending `PER_SENDER` tagged messages each, then drains with one receiver.
/// Returns `(priority, sender, sequence)` in delivery order.
fn fill_concurrently_then_drain(privileged: impl Fn(u32) -> bool) -> Vec<(u8, u32, u32)> {
    let registry = Arc::new(Registry::new());
    let queue = registry.queue_create(&Caller::user(1)).unwrap();

    let senders: Vec<_> = (0..SENDERS)
        .map(|s| {
            let registry = Arc::clone(&registry);
            let caller = if privileged(s) { Caller::privileged(100 + s) } else { Caller::user(100 + s) };
            thread::spawn(move || {
                for n in 0..PER_SENDER {
                    let mut payload = s.to_le_bytes().to_vec();
                    payload.extend_from_slice(&n.to_le_bytes());
                    registry.queue_send(&caller, queue, 1, &payload, None).unwrap();
                }
            })
        })
        .collect();
    for sender in senders {
        sender.join().unwrap();
    }

    let receiver = Caller::user(900);
    let mut drained = Vec::new();
    while let Ok(msg) = registry.queue_receive(&receiver, queue, 0, Wait::NonBlocking) {
        let (sender, sequence) = msg.payload().split_at(4);
        drained.push((
            msg.priority(),
            u32::from_le_bytes(sender.try_into().unwrap()),
            u32::from_le_bytes(sequence.try_into().unwrap()),
        ));
    }
    assert_eq!(drained.len(), (SENDERS * PER_SENDER) as usize);
    drained
}

fn assert_per_sender_fifo(drained: &[(u8, u32, u32)]) {
    let mut last: HashMap<u32, u32> = HashMap::new();
    for &(_, sender, sequence) in drained {
        if let Some(prev) = last.insert(sender, sequence) {
            assert!(prev < sequence, "sender {sender} delivered {sequence} after {prev}");
        }
    }
    assert_eq!(last.len(), SENDERS as usize);
}

#[test]
fn concurrent_equal_senders_keep_per_sender_order() {
    let drained = fill_concurrently_then_drain(|_| false);
    assert!(drained.iter().all(|&(priority, _, _)| priority == drained[0].0));
    assert_per_sender_fifo(&drained);
}

#[test]
fn concurrent_mixed_senders_drain_priority_major() {
    let drained = fill_concurrently_then_drain(|s| s % 2 == 0);
    for pair in drained.windows(2) {
        assert!(pair[0].0 >= pair[1].0, "priority rose: {pair:?}");
    }
    let boundary = (SENDERS / 2 * PER_SENDER) as usize;
    assert!(drained[..boundary].iter().all(|&(_, sender, _)| sender % 2 == 0));
    assert!(drained[boundary..].iter().all(|&(_, sender, _)| sender % 2 == 1));
    assert_per_sender_fifo(&drained);
}

#[test]
fn privileged_sender_jumps_the_line() {
    let registry = Registry::new();
    let user = Caller::user(10);
    let admin = Caller::privileged(1);
    let queue = registry.queue_create(&user).unwrap();
    registry.queue_send(&user, queue, 1, b"first", None).unwrap();
    registry.queue_send(&admin, queue, 1, b"urgent", None).unwrap();
    let msg = registry.queue_receive(&user, queue, 0, Wait::NonBlocking).unwrap();
    assert_eq!(msg.payload(), b"urgent");
    assert_eq!(msg.sender(), 1);
}

#[test]
fn bounded_receive_times_out() {
    let registry = Registry::new();
    let caller = Caller::user(2);
    let queue = registry.queue_create(&caller).unwrap();
    let start = Instant::now();
    let err = registry
        .queue_receive(&caller, queue, 0, Wait::Timeout(Duration::from_millis(50)))
        .unwrap_err();
    assert_eq!(err, Error::TimedOut);
    assert!(start.elapsed() >= Duration::from_millis(50));
}

#[test]
fn nowait_receive_reports_no_message() {
    let registry = Registry::new();
    let caller = Caller::user(2);
    let queue = registry.queue_create(&caller).unwrap();
    let start = Instant::now();
    assert_eq!(
        registry.queue_receive(&caller, queue, 0, Wait::NonBlocking).unwrap_err(),
        Error::NoMessage
    );
    assert!(start.elapsed() < Duration::from_millis(50));
}

#[test]
fn delete_wakes_blocked_receiver() {
    let registry = Arc::new(Registry::new());
    let caller = Caller::user(3);
    let queue = registry.queue_create(&caller).unwrap();
    let receiver = {
        let registry = Arc::clone(&registry);
        thread::spawn(move || {
            registry.queue_receive(&caller, queue, 0, Wait::Timeout(Duration::from_secs(10)))
        })
    };
    thread::sleep(Duration::from_millis(30));
    registry.queue_delete(&caller, queue).unwrap();
    assert!(matches!(receiver.join().unwrap(), Err(Error::InvalidHandle(_))));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn drain_order_is_priority_major_fifo_minor(
        hints in proptest::collection::vec(proptest::option::of(0u8..=100), 1..40),
    ) {
        let registry = Registry::new();
        let caller = Caller::user(9);
        let queue = registry.queue_create(&caller).unwrap();
        for (index, hint) in hints.iter().enumerate() {
            registry
                .queue_send(&caller, queue, 1, &(index as u32).to_le_bytes(), *hint)
                .unwrap();
        }

        let mut drained = Vec::new();
        while let Ok(msg) = registry.queue_receive(&caller, queue, 0, Wait::NonBlocking) {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(msg.payload());
            drained.push((msg.priority(), u32::from_le_bytes(raw)));
        }

        prop_assert_eq!(drained.len(), hints.len());
        for pair in drained.windows(2) {
            let (prev, next) = (pair[0], pair[1]);
            prop_assert!(prev.0 >= next.0, "priority rose: {:?}", pair);
            if prev.0 == next.0 {
                prop_assert!(prev.1 < next.1, "FIFO broken among equals: {:?}", pair);
            }
        }
    }
}
