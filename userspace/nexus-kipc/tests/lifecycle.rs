// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Integration tests for slot exhaustion, reuse and teardown
//! OWNERS: @kernel-ipc-team
//!
//! TEST_SCENARIOS:
//!   - every_table_recovers_exactly_one_slot()
//!   - segment_survives_attach_detach_until_destroy()
//!   - mapping_outlives_registry()

use nexus_kipc::{Caller, Error, IpcConfig, Registry, ResourceKind, Wait};

fn tight() -> Registry {
    Registry::with_config(IpcConfig {
        max_queues: 2,
        max_segments: 2,
        max_semaphores: 2,
        max_pipes: 4,
        ..IpcConfig::default()
    })
    .unwrap()
}

#[test]
fn every_table_recovers_exactly_one_slot() {
    let registry = tight();
    let caller = Caller::user(1);

    let queues = [registry.queue_create(&caller).unwrap(), registry.queue_create(&caller).unwrap()];
    assert_eq!(registry.queue_create(&caller).unwrap_err(), Error::ResourceExhausted(ResourceKind::Queue));
    registry.queue_delete(&caller, queues[0]).unwrap();
    assert_eq!(registry.queue_create(&caller).unwrap(), queues[0]);
    assert!(registry.queue_create(&caller).is_err());

    let segs = [registry.shm_create(&caller, 64).unwrap(), registry.shm_create(&caller, 64).unwrap()];
    assert_eq!(registry.shm_create(&caller, 64).unwrap_err(), Error::ResourceExhausted(ResourceKind::Segment));
    registry.shm_destroy(&caller, segs[1]).unwrap();
    assert_eq!(registry.shm_create(&caller, 64).unwrap(), segs[1]);
    assert!(registry.shm_create(&caller, 64).is_err());

    let sems = [registry.sem_create(&caller, 0).unwrap(), registry.sem_create(&caller, 0).unwrap()];
    assert_eq!(registry.sem_create(&caller, 0).unwrap_err(), Error::ResourceExhausted(ResourceKind::Semaphore));
    registry.sem_delete(&caller, sems[0]).unwrap();
    registry.sem_create(&caller, 0).unwrap();
    assert!(registry.sem_create(&caller, 0).is_err());

    let pipes = [registry.pipe_create(&caller).unwrap(), registry.pipe_create(&caller).unwrap()];
    assert_eq!(registry.pipe_create(&caller).unwrap_err(), Error::ResourceExhausted(ResourceKind::Pipe));
    registry.pipe_close(&caller, pipes[0].read).unwrap();
    // One free slot is not enough for a pair.
    assert!(registry.pipe_create(&caller).is_err());
    registry.pipe_close(&caller, pipes[0].write).unwrap();
    registry.pipe_create(&caller).unwrap();

    let stats = registry.stats();
    assert_eq!(stats.exhaustions, 8);
    assert_eq!(
        (stats.live_queues, stats.live_segments, stats.live_semaphores, stats.live_pipe_ends),
        (2, 2, 2, 4)
    );
}

#[test]
fn segment_survives_attach_detach_until_destroy() {
    let registry = Registry::new();
    let caller = Caller::user(2);
    let seg = registry.shm_create(&caller, 128).unwrap();

    let first = registry.shm_attach(&caller, seg).unwrap();
    let second = registry.shm_attach(&caller, seg).unwrap();
    first.write(0, &[0xAB; 16]).unwrap();
    registry.shm_detach(&caller, first).unwrap();
    registry.shm_detach(&caller, second).unwrap();

    let stat = registry.shm_stat(seg).unwrap();
    assert_eq!(stat.ref_count, 0);

    // Contents persist across attachments while the segment lives.
    let again = registry.shm_attach(&caller, seg).unwrap();
    let mut buf = [0u8; 16];
    again.read(0, &mut buf).unwrap();
    assert_eq!(buf, [0xAB; 16]);
    registry.shm_detach(&caller, again).unwrap();

    registry.shm_destroy(&caller, seg).unwrap();
    assert_eq!(registry.shm_stat(seg).unwrap_err(), Error::InvalidHandle(ResourceKind::Segment));
    assert_eq!(registry.shm_attach(&caller, seg).unwrap_err(), Error::InvalidHandle(ResourceKind::Segment));
}

#[test]
fn mapping_outlives_registry() {
    let caller = Caller::user(3);
    let mapping = {
        let registry = Registry::new();
        let seg = registry.shm_create(&caller, 32).unwrap();
        let queue = registry.queue_create(&caller).unwrap();
        registry.queue_send(&caller, queue, 1, b"dropped", None).unwrap();
        registry.shm_attach(&caller, seg).unwrap()
    };
    mapping.write(0, b"still mapped").unwrap();
    let mut buf = [0u8; 12];
    mapping.read(0, &mut buf).unwrap();
    assert_eq!(&buf, b"still mapped");
}

#[test]
fn stale_handles_rejected_after_delete() {
    let registry = Registry::new();
    let caller = Caller::user(4);
    let queue = registry.queue_create(&caller).unwrap();
    registry.queue_send(&caller, queue, 1, b"a", None).unwrap();
    registry.queue_send(&caller, queue, 2, b"b", None).unwrap();
    assert_eq!(registry.queue_delete(&caller, queue).unwrap(), 2);
    assert_eq!(
        registry.queue_send(&caller, queue, 1, b"c", None).unwrap_err(),
        Error::InvalidHandle(ResourceKind::Queue)
    );
    assert_eq!(
        registry.queue_receive(&caller, queue, 0, Wait::NonBlocking).unwrap_err(),
        Error::InvalidHandle(ResourceKind::Queue)
    );
}
