// Copyright (C) 2025 The sil-tracing Developers
//
// This file is part of sil-tracing.
//
// sil-tracing is free software: you can redistribute it and/or modify it under the terms of the
// GNU General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// sil-tracing is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with sil-tracing.  If
// not, see <http://www.gnu.org/licenses/>.

//! The asynchronous scheduler
//! ==========================
//!
//! # Introduction
//!
//! When a protocol is configured with `async.enabled=true`, producer threads stop touching the
//! protocol's resource altogether: they enqueue [`SchedulerCommand`]s onto a byte-capped FIFO
//! and a single background worker -- one per protocol instance -- pops them in order and drives
//! the protocol. Everything the asynchronous mode guarantees lives here:
//!
//! - **Queue bound**: the sum of enqueued item sizes never exceeds the configured cap.
//! - **Backpressure**: in throttle mode a full queue blocks producers until the worker frees
//!   space (or the scheduler stops); in drop-old mode the oldest enqueued packets are discarded
//!   to make room, and the discards are counted but not reported.
//! - **FIFO**: commands execute in enqueue order; across *different* protocols there is no
//!   ordering guarantee.
//! - **Graceful shutdown**: stopping raises a flag and wakes everyone; the worker drains the
//!   queue (the owner enqueues its `Disconnect` sentinel beforehand, so teardown runs as part
//!   of the drain), then exits. [`stop`](Scheduler::stop) joins the worker thread.
//!
//! # Discussion
//!
//! This is deliberately thread-and-condvar machinery, not a task system: the ordering and
//! backpressure semantics above are specified in terms of one worker owning one resource, and
//! a work-stealing executor would not preserve them.

use crate::packet::Packet;
use crate::protocol::ProtocolCommand;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

/// Queue-accounting overhead added to each item's packet size.
pub const QUEUE_OVERHEAD: u64 = 24;

/// How many commands the worker claims from the queue per wake-up.
const BATCH: usize = 16;

/// What the worker should do.
pub enum SchedulerAction {
    Connect,
    WritePacket,
    Disconnect,
    Dispatch,
}

/// One queued unit of work.
pub struct SchedulerCommand {
    pub action: SchedulerAction,
    pub packet: Option<Arc<Packet>>,
    pub command: Option<ProtocolCommand>,
}

impl SchedulerCommand {
    pub fn connect() -> SchedulerCommand {
        SchedulerCommand {
            action: SchedulerAction::Connect,
            packet: None,
            command: None,
        }
    }
    pub fn disconnect() -> SchedulerCommand {
        SchedulerCommand {
            action: SchedulerAction::Disconnect,
            packet: None,
            command: None,
        }
    }
    pub fn write_packet(packet: Arc<Packet>) -> SchedulerCommand {
        SchedulerCommand {
            action: SchedulerAction::WritePacket,
            packet: Some(packet),
            command: None,
        }
    }
    pub fn dispatch(command: ProtocolCommand) -> SchedulerCommand {
        SchedulerCommand {
            action: SchedulerAction::Dispatch,
            packet: None,
            command: Some(command),
        }
    }

    /// Effective byte size for queue accounting.
    fn size(&self) -> u64 {
        QUEUE_OVERHEAD
            + match &self.packet {
                Some(packet) => packet.size() as u64,
                None => 0,
            }
    }

    fn is_write(&self) -> bool {
        matches!(self.action, SchedulerAction::WritePacket)
    }
}

struct QueueState {
    items: VecDeque<SchedulerCommand>,
    bytes: u64,
    stopped: bool,
    /// Packets discarded in drop-old mode. Counted, never reported.
    dropped: u64,
}

struct Shared {
    queue: Mutex<QueueState>,
    cond: Condvar,
    threshold: u64,
    throttle: bool,
    /// The owning protocol's failure flag; a failed protocol must not throttle producers.
    failed: Arc<AtomicBool>,
}

/// A byte-capped FIFO plus the worker thread that drains it.
pub struct Scheduler {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// Spawn the worker. `executor` runs every command on the worker thread and returns `false`
    /// if the command failed (failures only matter during shutdown, where they abort the
    /// drain). Fails only when the OS refuses a thread.
    pub fn start<F>(
        threshold: u64,
        throttle: bool,
        failed: Arc<AtomicBool>,
        mut executor: F,
    ) -> std::io::Result<Scheduler>
    where
        F: FnMut(SchedulerCommand) -> bool + Send + 'static,
    {
        let shared = Arc::new(Shared {
            queue: Mutex::new(QueueState {
                items: VecDeque::new(),
                bytes: 0,
                stopped: false,
                dropped: 0,
            }),
            cond: Condvar::new(),
            threshold,
            throttle,
            failed,
        });
        let worker = Arc::clone(&shared);
        let thread = std::thread::Builder::new()
            .name("sil-scheduler".to_string())
            .spawn(move || loop {
                let batch = worker.dequeue();
                if batch.is_empty() {
                    break;
                }
                let stopping = worker.queue.lock().unwrap().stopped;
                for command in batch {
                    let ok = executor(command);
                    if stopping && !ok {
                        // the sink is gone and we're shutting down; no point draining further
                        worker.clear();
                        return;
                    }
                }
            })?;
        Ok(Scheduler {
            shared,
            thread: Some(thread),
        })
    }

    /// Enqueue a command. Returns `false` -- and drops the command -- when the scheduler has
    /// stopped or the command alone exceeds the whole queue cap (an oversized packet is
    /// discarded and the producer carries on; see the format documentation).
    pub fn schedule(&self, command: SchedulerCommand) -> bool {
        let size = command.size();
        if size > self.shared.threshold {
            return false;
        }
        let mut queue = self.shared.queue.lock().unwrap();
        if queue.stopped {
            return false;
        }
        if self.shared.throttle && !self.shared.failed.load(Ordering::Relaxed) {
            while queue.bytes + size > self.shared.threshold && !queue.stopped {
                queue = self.shared.cond.wait(queue).unwrap();
            }
            if queue.stopped {
                return false;
            }
        } else {
            // drop-old: shed write packets from the head, in enqueue order, until the new
            // item fits; lifecycle commands are never shed
            while queue.bytes + size > self.shared.threshold {
                let oldest_write = queue.items.iter().position(|item| item.is_write());
                match oldest_write.and_then(|at| queue.items.remove(at)) {
                    Some(victim) => {
                        queue.bytes -= victim.size();
                        queue.dropped += 1;
                    }
                    None => break,
                }
            }
        }
        queue.bytes += size;
        queue.items.push_back(command);
        self.shared.cond.notify_all();
        true
    }

    /// Discard everything queued (used by `async.clearondisconnect`).
    pub fn clear(&self) {
        self.shared.clear();
    }

    /// Stop and join the worker. The queue is drained first; enqueue a `Disconnect` sentinel
    /// before calling this to get clean protocol teardown as part of the drain.
    pub fn stop(&mut self) {
        {
            let mut queue = self.shared.queue.lock().unwrap();
            if queue.stopped {
                return;
            }
            queue.stopped = true;
            self.shared.cond.notify_all();
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    #[cfg(test)]
    fn dropped(&self) -> u64 {
        self.shared.queue.lock().unwrap().dropped
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    /// Block until work or shutdown; empty return means "stopped and fully drained".
    fn dequeue(&self) -> Vec<SchedulerCommand> {
        let mut queue = self.queue.lock().unwrap();
        while queue.items.is_empty() && !queue.stopped {
            queue = self.cond.wait(queue).unwrap();
        }
        let mut batch = Vec::with_capacity(BATCH);
        while batch.len() < BATCH {
            match queue.items.pop_front() {
                Some(item) => {
                    queue.bytes -= item.size();
                    batch.push(item);
                }
                None => break,
            }
        }
        // space freed; wake throttled producers
        self.cond.notify_all();
        batch
    }

    fn clear(&self) {
        let mut queue = self.queue.lock().unwrap();
        queue.items.clear();
        queue.bytes = 0;
        self.cond.notify_all();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::level::Level;
    use crate::packet::{LogEntry, LogEntryType, ViewerId, Watch, WatchType};
    use std::sync::Mutex as StdMutex;

    fn packet(n: usize) -> Arc<Packet> {
        Arc::new(Packet::Watch(Watch::new(
            Level::Message,
            format!("{}", n),
            "v",
            WatchType::Integer,
        )))
    }

    fn collected() -> (Arc<StdMutex<Vec<String>>>, impl FnMut(SchedulerCommand) -> bool) {
        let sink: Arc<StdMutex<Vec<String>>> = Arc::new(StdMutex::new(Vec::new()));
        let out = Arc::clone(&sink);
        let executor = move |command: SchedulerCommand| {
            match command.action {
                SchedulerAction::Connect => out.lock().unwrap().push("connect".to_string()),
                SchedulerAction::Disconnect => out.lock().unwrap().push("disconnect".to_string()),
                SchedulerAction::Dispatch => out.lock().unwrap().push("dispatch".to_string()),
                SchedulerAction::WritePacket => {
                    if let Some(Packet::Watch(w)) = command.packet.as_deref() {
                        out.lock().unwrap().push(w.name().unwrap().to_string());
                    }
                }
            }
            true
        };
        (sink, executor)
    }

    #[test]
    fn test_fifo_and_drain_on_stop() {
        let (sink, executor) = collected();
        let mut scheduler =
            Scheduler::start(1 << 20, true, Arc::new(AtomicBool::new(false)), executor).unwrap();
        assert!(scheduler.schedule(SchedulerCommand::connect()));
        for n in 0..1000 {
            assert!(scheduler.schedule(SchedulerCommand::write_packet(packet(n))));
        }
        assert!(scheduler.schedule(SchedulerCommand::disconnect()));
        scheduler.stop();

        let got = sink.lock().unwrap();
        assert_eq!(got.len(), 1002);
        assert_eq!(got[0], "connect");
        assert_eq!(*got.last().unwrap(), "disconnect");
        for n in 0..1000 {
            assert_eq!(got[n + 1], format!("{}", n));
        }
        // after stop, enqueue fails fast
        assert!(!scheduler.schedule(SchedulerCommand::connect()));
    }

    #[test]
    fn test_drop_old_keeps_a_suffix() {
        // Hold the worker on a sentinel command while we overflow the queue, so that every
        // packet faces the drop-old policy while the queue is full.
        let gate = Arc::new(StdMutex::new(()));
        let held = gate.lock().unwrap();
        let (started_tx, started_rx) = std::sync::mpsc::channel();

        let seen: Arc<StdMutex<Vec<usize>>> = Arc::new(StdMutex::new(Vec::new()));
        let out = Arc::clone(&seen);
        let waiter = Arc::clone(&gate);
        let mut scheduler = Scheduler::start(
            4096,
            false,
            Arc::new(AtomicBool::new(false)),
            move |command| {
                match command.action {
                    SchedulerAction::Connect => {
                        let _ = started_tx.send(());
                        drop(waiter.lock().unwrap());
                    }
                    SchedulerAction::WritePacket => {
                        if let Some(Packet::Watch(w)) = command.packet.as_deref() {
                            out.lock().unwrap().push(w.name().unwrap().parse().unwrap());
                        }
                    }
                    _ => {}
                }
                true
            },
        )
        .unwrap();
        assert!(scheduler.schedule(SchedulerCommand::connect()));
        started_rx.recv().unwrap(); // the worker now holds only the sentinel
        for n in 0..500 {
            assert!(scheduler.schedule(SchedulerCommand::write_packet(packet(n))));
        }
        assert!(scheduler.dropped() > 0);
        drop(held);
        scheduler.stop();

        let got = seen.lock().unwrap();
        assert!(!got.is_empty() && got.len() < 500);
        // whatever survived is a contiguous suffix of the submitted sequence
        assert_eq!(*got.last().unwrap(), 499);
        for pair in got.windows(2) {
            assert_eq!(pair[1], pair[0] + 1);
        }
    }

    #[test]
    fn test_queue_bound_is_hard() {
        // worker blocked: the queue alone enforces the cap
        let gate = Arc::new(StdMutex::new(()));
        let held = gate.lock().unwrap();
        let waiter = Arc::clone(&gate);
        let mut scheduler = Scheduler::start(
            2048,
            false,
            Arc::new(AtomicBool::new(false)),
            move |_| {
                drop(waiter.lock().unwrap());
                true
            },
        )
        .unwrap();
        for n in 0..200 {
            scheduler.schedule(SchedulerCommand::write_packet(packet(n)));
            let queue = scheduler.shared.queue.lock().unwrap();
            let total: u64 = queue.items.iter().map(|i| i.size()).sum();
            assert_eq!(total, queue.bytes);
            assert!(queue.bytes <= 2048);
        }
        drop(held);
        scheduler.stop();
    }

    #[test]
    fn test_oversized_packet_is_refused() {
        let (_, executor) = collected();
        let scheduler = Scheduler::start(64, true, Arc::new(AtomicBool::new(false)), executor).unwrap();
        let big = Arc::new(Packet::LogEntry(
            LogEntry::builder(LogEntryType::Message, ViewerId::Title)
                .title("x".repeat(1000))
                .build(),
        ));
        assert!(!scheduler.schedule(SchedulerCommand::write_packet(big)));
    }

    #[test]
    fn test_throttle_blocks_then_recovers() {
        let (sink, executor) = collected();
        let mut scheduler =
            Scheduler::start(2048, true, Arc::new(AtomicBool::new(false)), executor).unwrap();
        // far more bytes than the cap; producers must block rather than drop
        for n in 0..500 {
            assert!(scheduler.schedule(SchedulerCommand::write_packet(packet(n))));
        }
        scheduler.stop();
        assert_eq!(sink.lock().unwrap().len(), 500);
    }
}
