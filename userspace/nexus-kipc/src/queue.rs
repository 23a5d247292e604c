// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Priority message queues
//! OWNERS: @kernel-ipc-team
//! PUBLIC API: QueueHandle, Message, Received, QueueStat, Registry::queue_*
//! INVARIANTS:
//!   - Pending messages are sorted by descending priority, FIFO among equal priority
//!   - A message is either pending, delivered exactly once, or discarded on delete/teardown
//!   - Depth never exceeds `max_queue_messages`
//!
//! Senders never block unless they use `queue_send_wait`. Receivers block on the
//! has-messages condition up to their wait bound and re-check the predicate on every wake.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use log::{debug, trace};
use parking_lot::{Condvar, Mutex};

use crate::priority::{priority_score, PriorityInputs};
use crate::registry::Stats;
use crate::{Caller, Error, Pid, Registry, ResourceKind, Result, Wait};

slot_handle!(
    /// Handle of a message queue slot.
    QueueHandle
);

/// A queued message. Owned by its queue until delivered, then by the receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    mtype: i64,
    payload: Vec<u8>,
    priority: u8,
    sender: Pid,
    timestamp: Instant,
    seq: u64,
}

impl Message {
    /// Caller-chosen type tag.
    pub fn mtype(&self) -> i64 {
        self.mtype
    }

    /// Payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Consumes the message, returning its payload.
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Score the message was ordered by.
    pub fn priority(&self) -> u8 {
        self.priority
    }

    /// Pid of the sender.
    pub fn sender(&self) -> Pid {
        self.sender
    }

    /// Instant the message was enqueued.
    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }
}

/// Result of [`Registry::queue_receive_into`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Received {
    /// Bytes copied into the caller's buffer.
    pub len: usize,
    /// Type tag of the delivered message.
    pub mtype: i64,
    /// Priority the message was ordered by.
    pub priority: u8,
    /// Pid of the sender.
    pub sender: Pid,
    /// The payload was longer than the buffer and the tail was dropped.
    pub truncated: bool,
}

/// Diagnostic view of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStat {
    /// Pending messages.
    pub depth: usize,
    /// Pending payload bytes.
    pub bytes: usize,
    /// Messages accepted since creation.
    pub sent: u64,
    /// Messages delivered since creation.
    pub received: u64,
    /// Running average time between enqueue and delivery.
    pub avg_wait: Duration,
    /// Last sixteen receive filters, four bits each, newest in the low nibble.
    pub access_pattern: u64,
    /// Pid that created the queue.
    pub creator: Pid,
}

struct QueueState {
    messages: VecDeque<Message>,
    bytes: usize,
    next_seq: u64,
    avg_wait: Duration,
    access_pattern: u64,
    sent: u64,
    received: u64,
    closed: bool,
}

impl QueueState {
    fn new() -> Self {
        Self {
            messages: VecDeque::new(),
            bytes: 0,
            next_seq: 0,
            avg_wait: Duration::ZERO,
            access_pattern: 0,
            sent: 0,
            received: 0,
            closed: false,
        }
    }

    /// Places `msg` after the last message of equal-or-higher priority.
    fn insert(&mut self, msg: Message) {
        let pos = self
            .messages
            .iter()
            .position(|queued| queued.priority < msg.priority)
            .unwrap_or(self.messages.len());
        self.bytes += msg.payload.len();
        self.sent += 1;
        self.messages.insert(pos, msg);
    }

    fn find(&self, type_filter: i64) -> Option<usize> {
        if type_filter == 0 {
            (!self.messages.is_empty()).then_some(0)
        } else {
            self.messages.iter().position(|msg| msg.mtype == type_filter)
        }
    }

    fn take(&mut self, index: usize, type_filter: i64) -> Option<Message> {
        let msg = self.messages.remove(index)?;
        self.bytes -= msg.payload.len();
        self.received += 1;
        // EWMA with 1/8 weight for the newest sample.
        self.avg_wait = (self.avg_wait * 7 + msg.timestamp.elapsed()) / 8;
        self.access_pattern = (self.access_pattern << 4) | (type_filter as u64 & 0xf);
        Some(msg)
    }
}

pub(crate) struct MessageQueue {
    handle: u32,
    creator: Pid,
    max_messages: usize,
    state: Mutex<QueueState>,
    has_messages: Condvar,
    has_space: Condvar,
}

impl MessageQueue {
    fn new(handle: u32, creator: Pid, max_messages: usize) -> Self {
        Self {
            handle,
            creator,
            max_messages,
            state: Mutex::new(QueueState::new()),
            has_messages: Condvar::new(),
            has_space: Condvar::new(),
        }
    }

    fn send(
        &self,
        caller: &Caller,
        mtype: i64,
        payload: Vec<u8>,
        hint: Option<u8>,
        wait: Wait,
        default_timeout: Duration,
    ) -> Result<u8> {
        let deadline = wait.deadline(default_timeout);
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(Error::InvalidHandle(ResourceKind::Queue));
            }
            if state.messages.len() < self.max_messages {
                break;
            }
            if wait.is_non_blocking() {
                return Err(Error::QueueFull);
            }
            if Instant::now() >= deadline {
                return Err(Error::TimedOut);
            }
            self.has_space.wait_until(&mut state, deadline);
        }
        let priority = priority_score(&PriorityInputs {
            privileged: caller.privileged,
            payload_len: payload.len(),
            avg_wait: state.avg_wait,
            hint,
        });
        let seq = state.next_seq;
        state.next_seq += 1;
        trace!(
            "kipc: queue {} send type={} len={} prio={} from pid {}",
            self.handle,
            mtype,
            payload.len(),
            priority,
            caller.pid
        );
        state.insert(Message {
            mtype,
            payload,
            priority,
            sender: caller.pid,
            timestamp: Instant::now(),
            seq,
        });
        drop(state);
        // Receivers filter by type, so a single wake could land on a non-matching one.
        self.has_messages.notify_all();
        Ok(priority)
    }

    fn receive(&self, type_filter: i64, wait: Wait, default_timeout: Duration) -> Result<Message> {
        let deadline = wait.deadline(default_timeout);
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(Error::InvalidHandle(ResourceKind::Queue));
            }
            if let Some(msg) = state.find(type_filter).and_then(|index| state.take(index, type_filter)) {
                drop(state);
                self.has_space.notify_one();
                return Ok(msg);
            }
            if wait.is_non_blocking() {
                trace!("kipc: queue {} empty for type {}", self.handle, type_filter);
                return Err(Error::NoMessage);
            }
            if Instant::now() >= deadline {
                return Err(Error::TimedOut);
            }
            self.has_messages.wait_until(&mut state, deadline);
        }
    }

    /// Discards pending messages and wakes every waiter. Returns the discard count.
    pub(crate) fn close(&self) -> usize {
        let discarded = {
            let mut state = self.state.lock();
            state.closed = true;
            state.bytes = 0;
            let count = state.messages.len();
            state.messages.clear();
            count
        };
        self.has_messages.notify_all();
        self.has_space.notify_all();
        discarded
    }

    fn stat(&self) -> QueueStat {
        let state = self.state.lock();
        QueueStat {
            depth: state.messages.len(),
            bytes: state.bytes,
            sent: state.sent,
            received: state.received,
            avg_wait: state.avg_wait,
            access_pattern: state.access_pattern,
            creator: self.creator,
        }
    }
}

impl Registry {
    fn queue(&self, handle: QueueHandle) -> Result<std::sync::Arc<MessageQueue>> {
        self.resolve(|tables| &tables.queues, handle.raw())
    }

    /// Allocates an empty message queue.
    pub fn queue_create(&self, caller: &Caller) -> Result<QueueHandle> {
        self.op();
        let max_messages = self.config.max_queue_messages;
        let (handle, _) = self.allocate(
            |tables| &mut tables.queues,
            |handle| MessageQueue::new(handle, caller.pid, max_messages),
        )?;
        debug!("kipc: queue {handle} created by pid {}", caller.pid);
        Ok(QueueHandle(handle))
    }

    /// Enqueues a message without blocking and returns its computed priority.
    ///
    /// Fails with `QueueFull` when the queue holds `max_queue_messages`.
    pub fn queue_send(
        &self,
        caller: &Caller,
        handle: QueueHandle,
        mtype: i64,
        payload: &[u8],
        priority_hint: Option<u8>,
    ) -> Result<u8> {
        self.queue_send_wait(caller, handle, mtype, payload, priority_hint, Wait::NonBlocking)
    }

    /// Enqueues a message, waiting up to `wait` for space in a full queue.
    pub fn queue_send_wait(
        &self,
        caller: &Caller,
        handle: QueueHandle,
        mtype: i64,
        payload: &[u8],
        priority_hint: Option<u8>,
        wait: Wait,
    ) -> Result<u8> {
        self.op();
        if payload.len() > self.config.max_message_size {
            return Err(Error::InvalidSize);
        }
        let queue = self.queue(handle)?;
        let priority = queue.send(
            caller,
            mtype,
            payload.to_vec(),
            priority_hint,
            wait,
            self.config.default_timeout(),
        )?;
        Stats::bump(&self.stats.messages_sent);
        Ok(priority)
    }

    /// Removes and returns the first message matching `type_filter` (0 matches any).
    pub fn queue_receive(
        &self,
        caller: &Caller,
        handle: QueueHandle,
        type_filter: i64,
        wait: Wait,
    ) -> Result<Message> {
        self.op();
        let queue = self.queue(handle)?;
        let msg = queue.receive(type_filter, wait, self.config.default_timeout())?;
        Stats::bump(&self.stats.messages_received);
        trace!(
            "kipc: queue {} delivered seq={} to pid {}",
            handle,
            msg.seq,
            caller.pid
        );
        Ok(msg)
    }

    /// Like [`Registry::queue_receive`], copying the payload into `buf`.
    ///
    /// A payload longer than `buf` is truncated; the message is consumed either way.
    pub fn queue_receive_into(
        &self,
        caller: &Caller,
        handle: QueueHandle,
        type_filter: i64,
        buf: &mut [u8],
        wait: Wait,
    ) -> Result<Received> {
        let msg = self.queue_receive(caller, handle, type_filter, wait)?;
        let len = msg.payload.len().min(buf.len());
        buf[..len].copy_from_slice(&msg.payload[..len]);
        Ok(Received {
            len,
            mtype: msg.mtype,
            priority: msg.priority,
            sender: msg.sender,
            truncated: len < msg.payload.len(),
        })
    }

    /// Frees the queue, discarding pending messages. Blocked callers get `InvalidHandle`.
    pub fn queue_delete(&self, caller: &Caller, handle: QueueHandle) -> Result<usize> {
        self.op();
        let queue = self.release(|tables| &mut tables.queues, handle.raw())?;
        let discarded = queue.close();
        debug!("kipc: queue {handle} deleted by pid {} discarded={discarded}", caller.pid);
        Ok(discarded)
    }

    /// Returns counters and depth for the queue.
    pub fn queue_stat(&self, handle: QueueHandle) -> Result<QueueStat> {
        self.op();
        Ok(self.queue(handle)?.stat())
    }
}
