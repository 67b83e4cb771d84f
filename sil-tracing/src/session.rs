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

//! Sessions: named emission contexts
//! =================================
//!
//! # Introduction
//!
//! Applications log through [`Session`]s. A session owns nothing but identity and gates --
//! a name stamped into every packet, an `active` flag, a level floor, a default color -- and
//! hands every packet it produces to its parent [`Hub`] for fan-out. Sessions are cheap,
//! clonable handles; the [`SessionManager`] keeps the named index.
//!
//! [`Hub`]: crate::hub::Hub
//! [`SessionManager`]: crate::manager::SessionManager
//!
//! ```no_run
//! use sil_tracing::Hub;
//! let hub = Hub::new("demo");
//! hub.set_connections("file(filename=demo.sil)").unwrap();
//! hub.set_enabled(true);
//! let session = hub.add_session("Main", true);
//! session.log_message("hello, viewer");
//! let _guard = session.track_method("demo::work");
//! // ... the matching leave-method packet goes out when the guard drops
//! ```
//!
//! # Discussion
//!
//! Everything here is deliberately non-fatal: a session whose parent hub has been torn down
//! logs nothing and errors nowhere. The level check [`is_on`](Session::is_on) reads atomics
//! without a lock; during a configuration reload a packet may slip through or be suppressed
//! against the half-applied state, which is acceptable by design.

use crate::hub::HubInner;
use crate::level::Level;
use crate::packet::{
    Color, ControlCommand, ControlCommandType, LogEntry, LogEntryType, Packet, ProcessFlow,
    ProcessFlowType, Ticks, ViewerId, Watch, WatchType,
};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

pub(crate) struct SessionInner {
    parent: Weak<HubInner>,
    name: RwLock<String>,
    active: AtomicBool,
    level: AtomicU8,
    color: AtomicU32,
    stored: AtomicBool,
    counters: Mutex<HashMap<String, i64>>,
    checkpoints: Mutex<HashMap<String, u64>>,
}

/// A named emission context; clone freely, it's a handle.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub(crate) fn new(parent: &Arc<HubInner>, name: &str) -> Session {
        Session {
            inner: Arc::new(SessionInner {
                parent: Arc::downgrade(parent),
                name: RwLock::new(name.to_string()),
                active: AtomicBool::new(true),
                level: AtomicU8::new(Level::Debug as u8),
                color: AtomicU32::new(Color::TRANSPARENT.value()),
                stored: AtomicBool::new(false),
                counters: Mutex::new(HashMap::new()),
                checkpoints: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub(crate) fn same_as(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn name(&self) -> String {
        self.inner.name.read().unwrap().clone()
    }

    /// Rename; re-registration in the manager is the caller's affair (see
    /// [`Hub::update_session`](crate::hub::Hub::update_session)).
    pub(crate) fn set_name(&self, name: &str) {
        *self.inner.name.write().unwrap() = name.to_string();
    }

    pub fn active(&self) -> bool {
        self.inner.active.load(Ordering::Relaxed)
    }
    pub fn set_active(&self, active: bool) {
        self.inner.active.store(active, Ordering::Relaxed);
    }

    pub fn level(&self) -> Level {
        Level::from_u8(self.inner.level.load(Ordering::Relaxed))
    }
    pub fn set_level(&self, level: Level) {
        self.inner.level.store(level as u8, Ordering::Relaxed);
    }

    pub fn color(&self) -> Color {
        Color(self.inner.color.load(Ordering::Relaxed))
    }
    pub fn set_color(&self, color: Color) {
        self.inner.color.store(color.value(), Ordering::Relaxed);
    }

    pub(crate) fn is_stored(&self) -> bool {
        self.inner.stored.load(Ordering::Relaxed)
    }
    pub(crate) fn set_stored(&self, stored: bool) {
        self.inner.stored.store(stored, Ordering::Relaxed);
    }

    /// Would a packet at `level` currently go out? Lock-free and best-effort.
    pub fn is_on(&self, level: Level) -> bool {
        match self.parent() {
            Some(parent) => {
                self.active()
                    && parent.is_enabled()
                    && level >= self.level()
                    && level >= parent.level()
            }
            None => false,
        }
    }

    fn parent(&self) -> Option<Arc<HubInner>> {
        self.inner.parent.upgrade()
    }

    fn default_level(&self) -> Level {
        self.parent()
            .map(|parent| parent.default_level())
            .unwrap_or(Level::Message)
    }

    ////////////////////////////////////////////////////////////////////////////////////////////
    //                                    packet producers                                    //
    ////////////////////////////////////////////////////////////////////////////////////////////

    fn send_log_entry(
        &self,
        level: Level,
        title: &str,
        log_entry_type: LogEntryType,
        viewer_id: ViewerId,
        color: Option<Color>,
        data: Option<Vec<u8>>,
    ) {
        let parent = match self.parent() {
            Some(parent) => parent,
            None => return,
        };
        let mut builder = LogEntry::builder(log_entry_type, viewer_id)
            .level(level)
            .title(title)
            .session_name(self.name())
            .app_name(parent.app_name())
            .hostname(parent.host_name())
            .color(color.unwrap_or(self.color()));
        if let Some(data) = data {
            builder = builder.data(data);
        }
        parent.dispatch_packet(Packet::LogEntry(builder.build()));
    }

    fn send_watch(&self, level: Level, name: &str, value: &str, watch_type: WatchType) {
        if let Some(parent) = self.parent() {
            parent.dispatch_packet(Packet::Watch(Watch::new(level, name, value, watch_type)));
        }
    }

    fn send_process_flow(&self, level: Level, title: &str, flow_type: ProcessFlowType) {
        let parent = match self.parent() {
            Some(parent) => parent,
            None => return,
        };
        let mut flow = ProcessFlow::new(level, title, flow_type);
        flow.hostname = Some(parent.host_name().to_string());
        parent.dispatch_packet(Packet::ProcessFlow(flow));
    }

    fn send_control_command(&self, control_command_type: ControlCommandType) {
        if !self.is_on(Level::Control) {
            return;
        }
        if let Some(parent) = self.parent() {
            parent.dispatch_packet(Packet::ControlCommand(ControlCommand::new(
                control_command_type,
                None,
            )));
        }
    }

    /// The general producer: a typed entry with an optional viewer payload.
    pub fn log_entry(
        &self,
        level: Level,
        title: &str,
        log_entry_type: LogEntryType,
        viewer_id: ViewerId,
        data: Option<Vec<u8>>,
    ) {
        if self.is_on(level) {
            self.send_log_entry(level, title, log_entry_type, viewer_id, None, data);
        }
    }

    pub fn log_debug(&self, title: &str) {
        if self.is_on(Level::Debug) {
            self.send_log_entry(
                Level::Debug,
                title,
                LogEntryType::Debug,
                ViewerId::Title,
                None,
                None,
            );
        }
    }

    pub fn log_verbose(&self, title: &str) {
        if self.is_on(Level::Verbose) {
            self.send_log_entry(
                Level::Verbose,
                title,
                LogEntryType::Verbose,
                ViewerId::Title,
                None,
                None,
            );
        }
    }

    pub fn log_message(&self, title: &str) {
        if self.is_on(Level::Message) {
            self.send_log_entry(
                Level::Message,
                title,
                LogEntryType::Message,
                ViewerId::Title,
                None,
                None,
            );
        }
    }

    pub fn log_warning(&self, title: &str) {
        if self.is_on(Level::Warning) {
            self.send_log_entry(
                Level::Warning,
                title,
                LogEntryType::Warning,
                ViewerId::Title,
                None,
                None,
            );
        }
    }

    pub fn log_error(&self, title: &str) {
        if self.is_on(Level::Error) {
            self.send_log_entry(
                Level::Error,
                title,
                LogEntryType::Error,
                ViewerId::Title,
                None,
                None,
            );
        }
    }

    pub fn log_fatal(&self, title: &str) {
        if self.is_on(Level::Fatal) {
            self.send_log_entry(
                Level::Fatal,
                title,
                LogEntryType::Fatal,
                ViewerId::Title,
                None,
                None,
            );
        }
    }

    pub fn log_colored(&self, level: Level, color: Color, title: &str) {
        if self.is_on(level) {
            self.send_log_entry(
                level,
                title,
                LogEntryType::Message,
                ViewerId::Title,
                Some(color),
                None,
            );
        }
    }

    pub fn log_separator(&self, level: Level) {
        if self.is_on(level) {
            self.send_log_entry(
                level,
                "",
                LogEntryType::Separator,
                ViewerId::NoViewer,
                None,
                None,
            );
        }
    }

    pub fn reset_callstack(&self, level: Level) {
        if self.is_on(level) {
            self.send_log_entry(
                level,
                "",
                LogEntryType::ResetCallstack,
                ViewerId::NoViewer,
                None,
                None,
            );
        }
    }

    ////////////////////////////////////////////////////////////////////////////////////////////
    //                                     process flow                                       //
    ////////////////////////////////////////////////////////////////////////////////////////////

    pub fn enter_method(&self, method_name: &str) {
        let level = self.default_level();
        if self.is_on(level) {
            self.send_log_entry(
                level,
                method_name,
                LogEntryType::EnterMethod,
                ViewerId::Title,
                None,
                None,
            );
            self.send_process_flow(level, method_name, ProcessFlowType::EnterMethod);
        }
    }

    pub fn leave_method(&self, method_name: &str) {
        let level = self.default_level();
        if self.is_on(level) {
            self.send_log_entry(
                level,
                method_name,
                LogEntryType::LeaveMethod,
                ViewerId::Title,
                None,
                None,
            );
            self.send_process_flow(level, method_name, ProcessFlowType::LeaveMethod);
        }
    }

    /// Emit the enter-method packet now; the matching leave-method goes out when the returned
    /// guard drops, on *any* exit path.
    pub fn track_method(&self, method_name: &str) -> MethodTracker {
        self.enter_method(method_name);
        MethodTracker {
            session: self.clone(),
            method_name: method_name.to_string(),
        }
    }

    pub fn enter_thread(&self, thread_name: &str) {
        let level = self.default_level();
        if self.is_on(level) {
            self.send_process_flow(level, thread_name, ProcessFlowType::EnterThread);
        }
    }

    pub fn leave_thread(&self, thread_name: &str) {
        let level = self.default_level();
        if self.is_on(level) {
            self.send_process_flow(level, thread_name, ProcessFlowType::LeaveThread);
        }
    }

    pub fn enter_process(&self, process_name: &str) {
        let level = self.default_level();
        if self.is_on(level) {
            self.send_process_flow(level, process_name, ProcessFlowType::EnterProcess);
        }
    }

    pub fn leave_process(&self, process_name: &str) {
        let level = self.default_level();
        if self.is_on(level) {
            self.send_process_flow(level, process_name, ProcessFlowType::LeaveProcess);
        }
    }

    ////////////////////////////////////////////////////////////////////////////////////////////
    //                                        watches                                         //
    ////////////////////////////////////////////////////////////////////////////////////////////

    pub fn watch_str(&self, name: &str, value: &str) {
        let level = self.default_level();
        if self.is_on(level) {
            self.send_watch(level, name, value, WatchType::String);
        }
    }

    pub fn watch_i64(&self, name: &str, value: i64) {
        let level = self.default_level();
        if self.is_on(level) {
            self.send_watch(level, name, &value.to_string(), WatchType::Integer);
        }
    }

    pub fn watch_f64(&self, name: &str, value: f64) {
        let level = self.default_level();
        if self.is_on(level) {
            self.send_watch(level, name, &value.to_string(), WatchType::Float);
        }
    }

    pub fn watch_bool(&self, name: &str, value: bool) {
        let level = self.default_level();
        if self.is_on(level) {
            let rendered = if value { "True" } else { "False" };
            self.send_watch(level, name, rendered, WatchType::Boolean);
        }
    }

    pub fn watch_char(&self, name: &str, value: char) {
        let level = self.default_level();
        if self.is_on(level) {
            self.send_watch(level, name, &value.to_string(), WatchType::Char);
        }
    }

    pub fn watch_timestamp(&self, name: &str, value: Ticks) {
        let level = self.default_level();
        if self.is_on(level) {
            self.send_watch(level, name, &value.to_string(), WatchType::Timestamp);
        }
    }

    ////////////////////////////////////////////////////////////////////////////////////////////
    //                                counters & checkpoints                                  //
    ////////////////////////////////////////////////////////////////////////////////////////////

    /// Bump a named counter and emit its new value as an integer watch.
    pub fn inc_counter(&self, name: &str) {
        let value = {
            let mut counters = self.inner.counters.lock().unwrap();
            let value = counters.entry(name.to_string()).or_insert(0);
            *value += 1;
            *value
        };
        let level = self.default_level();
        if self.is_on(level) {
            self.send_watch(level, name, &value.to_string(), WatchType::Integer);
        }
    }

    pub fn dec_counter(&self, name: &str) {
        let value = {
            let mut counters = self.inner.counters.lock().unwrap();
            let value = counters.entry(name.to_string()).or_insert(0);
            *value -= 1;
            *value
        };
        let level = self.default_level();
        if self.is_on(level) {
            self.send_watch(level, name, &value.to_string(), WatchType::Integer);
        }
    }

    /// Log a checkpoint: "name #N", counting occurrences per name.
    pub fn add_checkpoint(&self, name: &str) {
        let count = {
            let mut checkpoints = self.inner.checkpoints.lock().unwrap();
            let count = checkpoints.entry(name.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        let level = self.default_level();
        if self.is_on(level) {
            self.send_log_entry(
                level,
                &format!("{} #{}", name, count),
                LogEntryType::Checkpoint,
                ViewerId::Title,
                None,
                None,
            );
        }
    }

    ////////////////////////////////////////////////////////////////////////////////////////////
    //                                   control commands                                     //
    ////////////////////////////////////////////////////////////////////////////////////////////

    pub fn clear_log(&self) {
        self.send_control_command(ControlCommandType::ClearLog);
    }
    pub fn clear_watches(&self) {
        self.send_control_command(ControlCommandType::ClearWatches);
    }
    pub fn clear_auto_views(&self) {
        self.send_control_command(ControlCommandType::ClearAutoViews);
    }
    pub fn clear_process_flow(&self) {
        self.send_control_command(ControlCommandType::ClearProcessFlow);
    }
    pub fn clear_all(&self) {
        self.send_control_command(ControlCommandType::ClearAll);
    }
}

/// The scoped half of [`Session::track_method`]; emits the leave-method packet on drop.
pub struct MethodTracker {
    session: Session,
    method_name: String,
}

impl Drop for MethodTracker {
    fn drop(&mut self) {
        self.session.leave_method(&self.method_name);
    }
}
