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

//! The protocol abstraction
//! ========================
//!
//! # Introduction
//!
//! A *protocol* is a named, option-parameterized transport: `tcp`, `file`, `pipe`, `mem` or
//! `text`. Each implementation supplies only the capability set that actually differs between
//! transports -- the [`ProtocolCore`] trait: recognize an option, open the resource, push one
//! packet, close the resource. Everything the transports share lives in the [`Protocol`]
//! wrapper built around a core:
//!
//! - the connect/disconnect state machine with rate-limited reconnection,
//! - the backlog ring (hold packets until a trigger level arrives),
//! - the synchronous write lock *or* the asynchronous [`Scheduler`] hand-off,
//! - the failure policy: synchronous callers see a [`ProtocolError`]; asynchronous failures
//!   are routed to the owner's [`EventSink`] and never reach the logging call site.
//!
//! [`Scheduler`]: crate::scheduler::Scheduler
//! [`ProtocolError`]: Error
//!
//! # Discussion
//!
//! Why a trait object rather than `std::io::Write`? Because the abstraction doesn't make sense
//! for us; `Write` is a general-purpose byte sink. Our semantics are different: "take this
//! packet & deliver it to the viewer", including handshakes, rotation and reconnection -- none
//! of which a byte sink can express.

use crate::level::Level;
use crate::options::{Connection, LookupTable};
use crate::packet::Packet;
use crate::scheduler::{Scheduler, SchedulerAction, SchedulerCommand};

use backtrace::Backtrace;

use std::collections::VecDeque;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

/// Default byte cap for both the async queue and the backlog ring.
pub const DEFAULT_QUEUE: u64 = 2 * 1024 * 1024;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// module error type
#[non_exhaustive]
pub enum Error {
    /// I/O or handshake failure in a protocol; carries the protocol's identity so asynchronous
    /// reports remain attributable
    Protocol {
        message: String,
        protocol: &'static str,
        options: String,
        back: Backtrace,
    },
    /// The connection string named a protocol this build does not provide
    UnknownProtocol {
        name: String,
        back: Backtrace,
    },
    /// Connection-string trouble while building a protocol
    Options {
        source: crate::options::Error,
        back: Backtrace,
    },
    Io {
        source: std::io::Error,
        back: Backtrace,
    },
}

impl Error {
    pub(crate) fn protocol(message: impl Into<String>, protocol: &'static str, options: &str) -> Error {
        Error::Protocol {
            message: message.into(),
            protocol,
            options: options.to_string(),
            back: Backtrace::new(),
        }
    }
}

impl std::convert::From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io {
            source: err,
            back: Backtrace::new(),
        }
    }
}

impl std::convert::From<crate::options::Error> for Error {
    fn from(err: crate::options::Error) -> Self {
        Error::Options {
            source: err,
            back: Backtrace::new(),
        }
    }
}

impl std::fmt::Display for Error {
    // `Error` is non-exhaustive so that adding variants won't be a breaking change to our
    // callers. That means the compiler won't catch us if we miss a variant here, so we
    // always include a `_` arm.
    #[allow(unreachable_patterns)]
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Protocol {
                message,
                protocol,
                options,
                ..
            } => write!(f, "{} [protocol {}, options {}]", message, protocol, options),
            Error::UnknownProtocol { name, .. } => {
                write!(f, "The requested protocol is unknown: \"{}\"", name)
            }
            Error::Options { source, .. } => write!(f, "{}", source),
            Error::Io { source, .. } => write!(f, "I/O error: {}", source),
            _ => write!(f, "protocol error"),
        }
    }
}

impl std::fmt::Debug for Error {
    #[allow(unreachable_patterns)]
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Protocol { back, .. } => write!(f, "{}\n{:#?}", self, back),
            Error::UnknownProtocol { back, .. } => write!(f, "{}\n{:#?}", self, back),
            Error::Options { back, .. } => write!(f, "{}\n{:#?}", self, back),
            Error::Io { back, .. } => write!(f, "{}\n{:#?}", self, back),
            _ => write!(f, "{}", self),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         event plumbing                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

type ErrorHandler = Box<dyn Fn(&(dyn std::error::Error + 'static)) + Send + Sync>;
type InfoHandler = Box<dyn Fn(&str) + Send + Sync>;

/// Where asynchronous failures and informational notices go.
///
/// Handlers are optional; with none installed, errors and notices still reach the process's
/// `tracing` subscriber.
#[derive(Default)]
pub struct EventSink {
    error: Mutex<Option<ErrorHandler>>,
    info: Mutex<Option<InfoHandler>>,
}

impl EventSink {
    pub fn new() -> EventSink {
        EventSink::default()
    }

    pub fn set_error_handler<F>(&self, handler: F)
    where
        F: Fn(&(dyn std::error::Error + 'static)) + Send + Sync + 'static,
    {
        *self.error.lock().unwrap() = Some(Box::new(handler));
    }
    pub fn set_info_handler<F: Fn(&str) + Send + Sync + 'static>(&self, handler: F) {
        *self.info.lock().unwrap() = Some(Box::new(handler));
    }

    pub fn error(&self, err: &(dyn std::error::Error + 'static)) {
        tracing::error!(target: "sil_tracing", "{}", err);
        if let Some(handler) = self.error.lock().unwrap().as_ref() {
            handler(err);
        }
    }
    pub fn info(&self, message: &str) {
        tracing::debug!(target: "sil_tracing", "{}", message);
        if let Some(handler) = self.info.lock().unwrap().as_ref() {
            handler(message);
        }
    }
}

/// Ambient identity & event routing handed to every core.
pub struct ProtocolContext {
    app_name: RwLock<String>,
    host_name: String,
    events: Arc<EventSink>,
}

impl ProtocolContext {
    pub fn new(app_name: &str, host_name: &str, events: Arc<EventSink>) -> ProtocolContext {
        ProtocolContext {
            app_name: RwLock::new(app_name.to_string()),
            host_name: host_name.to_string(),
            events,
        }
    }
    pub fn app_name(&self) -> String {
        self.app_name.read().unwrap().clone()
    }
    pub(crate) fn set_app_name(&self, app_name: &str) {
        *self.app_name.write().unwrap() = app_name.to_string();
    }
    pub fn host_name(&self) -> &str {
        &self.host_name
    }
    pub fn info(&self, message: &str) {
        self.events.info(message);
    }
    /// The producer-identification packet connection-oriented cores send after their handshake.
    pub fn log_header(&self) -> Packet {
        Packet::LogHeader(crate::packet::LogHeader::new(
            &self.app_name(),
            &self.host_name,
        ))
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                      the capability set                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Maintenance & control requests routed through [`Protocol::dispatch`].
pub enum ProtocolCommand {
    /// Flush buffered output to the sink.
    Flush,
    /// Re-emit retained packets into the supplied writer now (memory protocol).
    FlushToWriter(Box<dyn Write + Send>),
    /// Install a writer that receives the retained packets when the protocol disconnects
    /// (memory protocol: "capture, then forward on error").
    FlushOnDisconnect(Box<dyn Write + Send>),
}

/// Operations a transport must supply; everything else is shared machinery in [`Protocol`].
pub trait ProtocolCore: Send {
    /// The connection-string name (`"tcp"`, `"file"`, ...).
    fn name(&self) -> &'static str;
    /// Does this transport recognize `name` (base options are handled by the wrapper)?
    fn is_valid_option(&self, name: &str) -> bool;
    /// Pull this transport's options out of the table. Defaults apply; bad values fall back.
    fn load_options(&mut self, options: &LookupTable);
    /// Open the underlying resource.
    fn connect(&mut self, ctx: &ProtocolContext) -> Result<()>;
    /// Push one packet; only ever called while connected.
    fn write_packet(&mut self, packet: &Packet) -> Result<()>;
    /// Close the underlying resource; must be safe to call in any state.
    fn disconnect(&mut self) -> Result<()>;
    /// Handle a maintenance request; the default ignores it.
    fn dispatch(&mut self, command: ProtocolCommand, ctx: &ProtocolContext) -> Result<()> {
        let _ = (command, ctx);
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        the backlog ring                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

const PACKET_QUEUE_OVERHEAD: u64 = 24;

/// A bounded FIFO of retained packets; pushing past the byte cap sheds the oldest.
pub(crate) struct PacketQueue {
    items: VecDeque<Arc<Packet>>,
    bytes: u64,
    backlog: u64,
}

impl PacketQueue {
    pub(crate) fn new(backlog: u64) -> PacketQueue {
        PacketQueue {
            items: VecDeque::new(),
            bytes: 0,
            backlog,
        }
    }
    pub(crate) fn push(&mut self, packet: Arc<Packet>) {
        self.bytes += packet.size() as u64 + PACKET_QUEUE_OVERHEAD;
        self.items.push_back(packet);
        while self.bytes > self.backlog {
            if self.pop().is_none() {
                break;
            }
        }
    }
    pub(crate) fn pop(&mut self) -> Option<Arc<Packet>> {
        let packet = self.items.pop_front()?;
        self.bytes -= packet.size() as u64 + PACKET_QUEUE_OVERHEAD;
        Some(packet)
    }
    pub(crate) fn clear(&mut self) {
        self.items.clear();
        self.bytes = 0;
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         struct Protocol                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The connection lifecycle.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

struct ProtocolState {
    core: Box<dyn ProtocolCore>,
    state: ConnectionState,
    queue: PacketQueue,
    /// Gate for reconnection attempts; set whenever the connection drops.
    reconnect_at: Option<Instant>,
}

impl ProtocolState {
    fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

pub(crate) struct ProtocolInner {
    name: &'static str,
    caption: String,
    descriptor: String,
    level: Level,
    reconnect: bool,
    reconnect_interval: Duration,
    backlog_enabled: bool,
    backlog_flushon: Level,
    keep_open: bool,
    async_enabled: bool,
    async_throttle: bool,
    async_queue: u64,
    async_clear_on_disconnect: bool,
    failed: Arc<AtomicBool>,
    ctx: ProtocolContext,
    state: Mutex<ProtocolState>,
}

/// A named transport with options applied: the unit the root dispatcher fans out to.
pub struct Protocol {
    inner: Arc<ProtocolInner>,
    scheduler: Mutex<Option<Scheduler>>,
}

/// Options every protocol understands, handled by the wrapper.
fn is_common_option(name: &str) -> bool {
    matches!(
        name,
        "caption"
            | "level"
            | "reconnect"
            | "reconnect.interval"
            | "backlog"
            | "backlog.enabled"
            | "backlog.flushon"
            | "backlog.keepopen"
            | "backlog.queue"
            | "flushon"
            | "keepopen"
            | "async.enabled"
            | "async.queue"
            | "async.throttle"
            | "async.clearondisconnect"
    )
}

/// The shorthand keys `backlog`, `flushon` and `keepopen` expand to their dotted forms;
/// explicitly written dotted keys win over the expansion.
fn map_shorthand(table: &mut LookupTable, key: &str, value: &str) -> bool {
    match key {
        "backlog" => {
            table.put(key, value.to_string());
            if table.get_size("backlog", 0) > 0 {
                table.add("backlog.enabled", "true".to_string());
                table.add("backlog.queue", value.to_string());
            } else {
                table.add("backlog.enabled", "false".to_string());
                table.add("backlog.queue", "0".to_string());
            }
            true
        }
        "flushon" => {
            table.put(key, value.to_string());
            table.add("backlog.flushon", value.to_string());
            true
        }
        "keepopen" => {
            table.put(key, value.to_string());
            table.add("backlog.keepopen", value.to_string());
            true
        }
        _ => false,
    }
}

/// Build a [`Protocol`] from a parsed connection descriptor.
pub(crate) fn create_protocol(conn: &Connection, ctx: ProtocolContext) -> Result<Protocol> {
    let core: Box<dyn ProtocolCore> = match conn.name.as_str() {
        "tcp" => Box::new(crate::tcp::TcpCore::new()),
        "file" => Box::new(crate::file::FileCore::new()),
        #[cfg(unix)]
        "pipe" => Box::new(crate::pipe::PipeCore::new()),
        "mem" => Box::new(crate::mem::MemoryCore::new()),
        "text" => Box::new(crate::text::TextCore::new()),
        _ => {
            return Err(Error::UnknownProtocol {
                name: conn.name.clone(),
                back: Backtrace::new(),
            })
        }
    };
    Protocol::new(core, conn, ctx)
}

impl Protocol {
    fn new(mut core: Box<dyn ProtocolCore>, conn: &Connection, ctx: ProtocolContext) -> Result<Protocol> {
        let name = core.name();
        let mut table = LookupTable::new();
        for (key, value) in &conn.options {
            if map_shorthand(&mut table, key, value) {
                continue;
            }
            if !is_common_option(key) && !core.is_valid_option(key) {
                return Err(crate::options::Error::UnknownOption {
                    protocol: name.to_string(),
                    option: key.clone(),
                    back: Backtrace::new(),
                }
                .into());
            }
            table.put(key, value.clone());
        }

        let level = table.get_level("level", Level::Debug);
        let reconnect = table.get_bool("reconnect", false);
        let reconnect_interval =
            Duration::from_millis(table.get_millis("reconnect.interval", 10_000));
        let caption = table.get_string("caption", name);
        let backlog_enabled = table.get_bool("backlog.enabled", false);
        let backlog_queue = table.get_size("backlog.queue", DEFAULT_QUEUE);
        let backlog_flushon = table.get_level("backlog.flushon", Level::Error);
        let backlog_keepopen = table.get_bool("backlog.keepopen", false);
        let keep_open = !backlog_enabled || backlog_keepopen;
        let async_enabled = table.get_bool("async.enabled", false);
        let async_throttle = table.get_bool("async.throttle", true);
        let async_queue = table.get_size("async.queue", DEFAULT_QUEUE);
        let async_clear_on_disconnect = table.get_bool("async.clearondisconnect", false);

        core.load_options(&table);

        // the canonical textual form, used to decide instance preservation across reloads
        let descriptor = crate::options::canonical_descriptor(name, &conn.options);

        Ok(Protocol {
            inner: Arc::new(ProtocolInner {
                name,
                caption,
                descriptor,
                level,
                reconnect,
                reconnect_interval,
                backlog_enabled,
                backlog_flushon,
                keep_open,
                async_enabled,
                async_throttle,
                async_queue,
                async_clear_on_disconnect,
                failed: Arc::new(AtomicBool::new(false)),
                ctx,
                state: Mutex::new(ProtocolState {
                    core,
                    state: ConnectionState::Disconnected,
                    queue: PacketQueue::new(backlog_queue),
                    reconnect_at: None,
                }),
            }),
            scheduler: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }
    pub fn caption(&self) -> &str {
        &self.inner.caption
    }
    /// The normalized textual description of this instance.
    pub fn descriptor(&self) -> &str {
        &self.inner.descriptor
    }
    pub fn is_asynchronous(&self) -> bool {
        self.inner.async_enabled
    }
    pub fn failed(&self) -> bool {
        self.inner.failed.load(Ordering::Relaxed)
    }
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.state.lock().unwrap().state
    }
    pub(crate) fn set_app_name(&self, app_name: &str) {
        self.inner.ctx.set_app_name(app_name);
    }

    /// Open the protocol. In asynchronous mode this starts the worker and returns immediately;
    /// connection failures surface later through the event sink.
    pub fn connect(&self) -> Result<()> {
        if self.inner.async_enabled {
            let mut guard = self.scheduler.lock().unwrap();
            if guard.is_some() {
                return Ok(());
            }
            let inner = Arc::clone(&self.inner);
            let scheduler = Scheduler::start(
                self.inner.async_queue,
                self.inner.async_throttle,
                Arc::clone(&self.inner.failed),
                move |command| inner.execute(command),
            )?;
            scheduler.schedule(SchedulerCommand::connect());
            *guard = Some(scheduler);
            Ok(())
        } else {
            self.inner.impl_connect().map_err(|err| self.inner.fail(err))
        }
    }

    /// Hand one packet to the protocol. Packets below the protocol's level floor are ignored.
    pub fn write_packet(&self, packet: Arc<Packet>) -> Result<()> {
        if packet.level() < self.inner.level {
            return Ok(());
        }
        if self.inner.async_enabled {
            let guard = self.scheduler.lock().unwrap();
            match guard.as_ref() {
                Some(scheduler) => {
                    scheduler.schedule(SchedulerCommand::write_packet(packet));
                    Ok(())
                }
                // producers arriving after shutdown fail fast rather than vanish
                None => Err(Error::protocol(
                    "The protocol has been disconnected",
                    self.inner.name,
                    &self.inner.descriptor,
                )),
            }
        } else {
            self.inner
                .impl_write_packet(&packet)
                .map_err(|err| self.inner.fail(err))
        }
    }

    /// Route a maintenance request to the core (asynchronously when so configured).
    pub fn dispatch(&self, command: ProtocolCommand) -> Result<()> {
        if self.inner.async_enabled {
            let guard = self.scheduler.lock().unwrap();
            if let Some(scheduler) = guard.as_ref() {
                scheduler.schedule(SchedulerCommand::dispatch(command));
            }
            Ok(())
        } else {
            self.inner
                .impl_dispatch(command)
                .map_err(|err| self.inner.fail(err))
        }
    }

    /// Close the protocol. In asynchronous mode the queue is drained (or cleared, with
    /// `async.clearondisconnect`), a disconnect sentinel is executed, and the worker thread is
    /// joined before this returns.
    pub fn disconnect(&self) -> Result<()> {
        if self.inner.async_enabled {
            let taken = self.scheduler.lock().unwrap().take();
            if let Some(mut scheduler) = taken {
                if self.inner.async_clear_on_disconnect {
                    scheduler.clear();
                }
                scheduler.schedule(SchedulerCommand::disconnect());
                scheduler.stop();
            }
            Ok(())
        } else {
            self.inner
                .impl_disconnect()
                .map_err(|err| self.inner.fail(err))
        }
    }
}

impl ProtocolInner {
    fn fail(&self, err: Error) -> Error {
        self.failed.store(true, Ordering::Relaxed);
        err
    }

    /// Worker-side command execution; failures go to the event sink.
    fn execute(&self, command: SchedulerCommand) -> bool {
        let outcome = match command.action {
            SchedulerAction::Connect => self.impl_connect(),
            SchedulerAction::WritePacket => match command.packet {
                Some(packet) => self.impl_write_packet(&packet),
                None => Ok(()),
            },
            SchedulerAction::Disconnect => self.impl_disconnect(),
            SchedulerAction::Dispatch => match command.command {
                Some(cmd) => self.impl_dispatch(cmd),
                None => Ok(()),
            },
        };
        match outcome {
            Ok(()) => true,
            Err(err) => {
                self.failed.store(true, Ordering::Relaxed);
                self.ctx.events.error(&err);
                false
            }
        }
    }

    fn impl_connect(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.is_connected() || !self.keep_open {
            return Ok(());
        }
        state.state = ConnectionState::Connecting;
        match state.core.connect(&self.ctx) {
            Ok(()) => {
                state.state = ConnectionState::Connected;
                self.failed.store(false, Ordering::Relaxed);
                Ok(())
            }
            Err(err) => {
                self.reset(&mut state);
                Err(err)
            }
        }
    }

    fn impl_write_packet(&self, packet: &Arc<Packet>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let result: Result<()> = (|| {
            let mut skip = false;
            if self.backlog_enabled {
                if packet.level() >= self.backlog_flushon && packet.level() != Level::Control {
                    while let Some(held) = state.queue.pop() {
                        self.forward_packet(&mut state, &held, false)?;
                    }
                } else {
                    state.queue.push(Arc::clone(packet));
                    skip = true;
                }
            }
            if !skip {
                self.forward_packet(&mut state, packet, !self.keep_open)?;
            }
            Ok(())
        })();
        // a failure with a live (or half-open) connection drops it; a failure while already
        // disconnected must NOT touch the reconnect gate, or a steady stream of writes would
        // push the next attempt out forever
        if result.is_err() && state.state != ConnectionState::Disconnected {
            self.reset(&mut state);
        }
        result
    }

    fn forward_packet(
        &self,
        state: &mut ProtocolState,
        packet: &Packet,
        disconnect_after: bool,
    ) -> Result<()> {
        if !state.is_connected() {
            if !self.keep_open {
                state.state = ConnectionState::Connecting;
                state.core.connect(&self.ctx)?;
                state.state = ConnectionState::Connected;
                self.failed.store(false, Ordering::Relaxed);
            } else {
                self.try_reconnect(state);
            }
        }
        if !state.is_connected() {
            return Err(Error::protocol(
                "Not connected and reconnection is unavailable",
                self.name,
                &self.descriptor,
            ));
        }
        state.core.write_packet(packet)?;
        if disconnect_after {
            state.state = ConnectionState::Disconnected;
            state.core.disconnect()?;
        }
        Ok(())
    }

    /// One rate-limited reconnection attempt; failures are absorbed (the caller decides what a
    /// still-disconnected protocol means).
    fn try_reconnect(&self, state: &mut ProtocolState) {
        if !self.reconnect {
            return;
        }
        if let Some(at) = state.reconnect_at {
            if at.elapsed() < self.reconnect_interval {
                return;
            }
        }
        state.state = ConnectionState::Reconnecting;
        match state.core.connect(&self.ctx) {
            Ok(()) => {
                state.state = ConnectionState::Connected;
                self.failed.store(false, Ordering::Relaxed);
            }
            Err(_) => {
                self.failed.store(true, Ordering::Relaxed);
                self.reset(state);
            }
        }
    }

    fn impl_disconnect(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.is_connected() {
            let flushed = self.flush_backlog(&mut state);
            self.reset(&mut state);
            flushed
        } else {
            state.queue.clear();
            Ok(())
        }
    }

    /// On a clean disconnect, retained backlog packets would otherwise vanish silently.
    fn flush_backlog(&self, state: &mut ProtocolState) -> Result<()> {
        while let Some(held) = state.queue.pop() {
            state.core.write_packet(&held)?;
        }
        Ok(())
    }

    fn impl_dispatch(&self, command: ProtocolCommand) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.is_connected() {
            let ProtocolState { core, .. } = &mut *state;
            core.dispatch(command, &self.ctx)
        } else {
            Ok(())
        }
    }

    /// Drop the connection, remember when, so the reconnect gate has its reference point.
    fn reset(&self, state: &mut ProtocolState) {
        state.state = ConnectionState::Disconnected;
        state.queue.clear();
        let _ = state.core.disconnect();
        state.reconnect_at = Some(Instant::now());
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::options::parse;
    use crate::packet::{LogEntry, LogEntryType, ViewerId, Watch, WatchType};
    use std::sync::Mutex as StdMutex;

    /// A core that records what happens to it and can be told to fail.
    struct MockCore {
        log: Arc<StdMutex<Vec<String>>>,
        fail_connect: Arc<AtomicBool>,
    }

    impl ProtocolCore for MockCore {
        fn name(&self) -> &'static str {
            "mock"
        }
        fn is_valid_option(&self, name: &str) -> bool {
            name == "custom"
        }
        fn load_options(&mut self, options: &LookupTable) {
            if options.contains("custom") {
                self.log
                    .lock()
                    .unwrap()
                    .push(format!("option custom={}", options.get_string("custom", "")));
            }
        }
        fn connect(&mut self, _ctx: &ProtocolContext) -> Result<()> {
            if self.fail_connect.load(Ordering::Relaxed) {
                return Err(Error::protocol("connect refused", "mock", ""));
            }
            self.log.lock().unwrap().push("connect".to_string());
            Ok(())
        }
        fn write_packet(&mut self, packet: &Packet) -> Result<()> {
            let tag = match packet {
                Packet::Watch(w) => w.name().unwrap_or("").to_string(),
                _ => format!("{:?}", packet.kind()),
            };
            self.log.lock().unwrap().push(format!("write {}", tag));
            Ok(())
        }
        fn disconnect(&mut self) -> Result<()> {
            self.log.lock().unwrap().push("disconnect".to_string());
            Ok(())
        }
    }

    fn mock_protocol(options: &str) -> (Protocol, Arc<StdMutex<Vec<String>>>, Arc<AtomicBool>) {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let fail_connect = Arc::new(AtomicBool::new(false));
        let core = MockCore {
            log: Arc::clone(&log),
            fail_connect: Arc::clone(&fail_connect),
        };
        let conns = parse(&format!("mock({})", options)).unwrap();
        let ctx = ProtocolContext::new("app", "host", Arc::new(EventSink::new()));
        let protocol = Protocol::new(Box::new(core), &conns[0], ctx).unwrap();
        (protocol, log, fail_connect)
    }

    fn watch(name: &str) -> Arc<Packet> {
        Arc::new(Packet::Watch(Watch::new(
            Level::Message,
            name,
            "v",
            WatchType::String,
        )))
    }

    #[test]
    fn test_sync_lifecycle() {
        let (protocol, log, _) = mock_protocol("custom=hello");
        assert_eq!(protocol.connection_state(), ConnectionState::Disconnected);
        protocol.connect().unwrap();
        assert_eq!(protocol.connection_state(), ConnectionState::Connected);
        protocol.write_packet(watch("a")).unwrap();
        protocol.disconnect().unwrap();
        assert_eq!(protocol.connection_state(), ConnectionState::Disconnected);
        let got = log.lock().unwrap();
        assert_eq!(
            *got,
            vec!["option custom=hello", "connect", "write a", "disconnect"]
        );
    }

    #[test]
    fn test_unknown_option_is_rejected() {
        let conns = parse("mock(bogus=1)").unwrap();
        let ctx = ProtocolContext::new("app", "host", Arc::new(EventSink::new()));
        let core = MockCore {
            log: Arc::new(StdMutex::new(Vec::new())),
            fail_connect: Arc::new(AtomicBool::new(false)),
        };
        match Protocol::new(Box::new(core), &conns[0], ctx) {
            Err(Error::Options { .. }) => (),
            other => panic!("unexpected: {:?}", other.err()),
        }
    }

    #[test]
    fn test_level_floor_gates_writes() {
        let (protocol, log, _) = mock_protocol("level=error");
        protocol.connect().unwrap();
        protocol
            .write_packet(Arc::new(Packet::Watch(Watch::new(
                Level::Message,
                "quiet",
                "v",
                WatchType::String,
            ))))
            .unwrap();
        assert_eq!(log.lock().unwrap().len(), 1); // just the connect
        protocol
            .write_packet(Arc::new(Packet::Watch(Watch::new(
                Level::Error,
                "loud",
                "v",
                WatchType::String,
            ))))
            .unwrap();
        assert_eq!(log.lock().unwrap().last().unwrap(), "write loud");
    }

    #[test]
    fn test_failed_connect_surfaces_and_resets() {
        let (protocol, _, fail_connect) = mock_protocol("");
        fail_connect.store(true, Ordering::Relaxed);
        assert!(protocol.connect().is_err());
        assert!(protocol.failed());
        assert_eq!(protocol.connection_state(), ConnectionState::Disconnected);
        // reconnection is off by default, so writes report the dead connection
        assert!(protocol.write_packet(watch("x")).is_err());
    }

    #[test]
    fn test_reconnect_is_gated() {
        let (protocol, log, fail_connect) = mock_protocol("reconnect=true,reconnect.interval=1h");
        fail_connect.store(true, Ordering::Relaxed);
        assert!(protocol.connect().is_err());
        fail_connect.store(false, Ordering::Relaxed);
        // the gate was set by the failed attempt; an hour hasn't passed
        assert!(protocol.write_packet(watch("x")).is_err());
        assert!(!log.lock().unwrap().iter().any(|e| e == "write x"));
    }

    #[test]
    fn test_reconnect_after_interval() {
        let (protocol, log, fail_connect) = mock_protocol("reconnect=true,reconnect.interval=0ms");
        fail_connect.store(true, Ordering::Relaxed);
        assert!(protocol.connect().is_err());
        fail_connect.store(false, Ordering::Relaxed);
        protocol.write_packet(watch("x")).unwrap();
        assert!(log.lock().unwrap().iter().any(|e| e == "write x"));
        assert!(!protocol.failed());
    }

    #[test]
    fn test_backlog_holds_until_flush_level() {
        let (protocol, log, _) = mock_protocol("backlog.enabled=true,backlog.flushon=error,keepopen=true");
        protocol.connect().unwrap();
        protocol.write_packet(watch("one")).unwrap();
        protocol.write_packet(watch("two")).unwrap();
        assert_eq!(log.lock().unwrap().len(), 1); // held, nothing written
        protocol
            .write_packet(Arc::new(Packet::LogEntry(
                LogEntry::builder(LogEntryType::Error, ViewerId::Title)
                    .level(Level::Error)
                    .title("boom")
                    .build(),
            )))
            .unwrap();
        let got = log.lock().unwrap();
        assert_eq!(
            *got,
            vec!["connect", "write one", "write two", "write LogEntry"]
        );
    }

    #[test]
    fn test_async_lifecycle_joins_worker() {
        let (protocol, log, _) = mock_protocol("async.enabled=true");
        assert!(protocol.is_asynchronous());
        protocol.connect().unwrap();
        for n in 0..100 {
            protocol.write_packet(watch(&format!("{}", n))).unwrap();
        }
        protocol.disconnect().unwrap(); // drains & joins
        let got = log.lock().unwrap();
        assert_eq!(got[0], "connect");
        assert_eq!(*got.last().unwrap(), "disconnect");
        for n in 0..100 {
            assert_eq!(got[n + 1], format!("write {}", n));
        }
    }

    #[test]
    fn test_descriptor_is_normalized() {
        let (p1, _, _) = mock_protocol("custom=x, level = error");
        let (p2, _, _) = mock_protocol("LEVEL=error,custom=x");
        assert_eq!(p1.descriptor(), p2.descriptor());
        let (p3, _, _) = mock_protocol("custom=y");
        assert_ne!(p1.descriptor(), p3.descriptor());
    }
}
