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

//! The root dispatcher
//! ===================
//!
//! # Introduction
//!
//! A [`Hub`] is the process-wide coordinator: it owns the [`SessionManager`], the set of
//! configured [`Protocol`]s, the protocol-variables table, and the error/info event sinks.
//! Sessions hand every packet they produce to their hub, which fans it out to each protocol in
//! the textual order of the connection string -- synchronous protocols write under their own
//! lock, asynchronous ones enqueue and return.
//!
//! [`SessionManager`]: crate::manager::SessionManager
//! [`Protocol`]: crate::protocol::Protocol
//!
//! Applying a new connection string -- directly, or through a configuration reload -- keeps
//! every protocol instance whose normalized textual description is unchanged: its file stays
//! open, its socket stays up, its worker keeps running. Instances that disappeared are
//! disconnected (asynchronous workers joined, exactly once) and new ones are built and, when
//! the hub is enabled, connected.
//!
//! # Discussion
//!
//! Everything here is instrumentation, not business logic: failures on the logging path are
//! routed to the error event and the caller's thread continues. The only calls that can block
//! meaningfully are a throttled asynchronous enqueue and the explicit teardown paths
//! ([`set_enabled`](Hub::set_enabled)`(false)`, [`dispose`](Hub::dispose)), which join worker
//! threads.

use crate::config::{Configuration, Error as ConfigError};
use crate::level::Level;
use crate::manager::{SessionDefaults, SessionManager, SessionProperties};
use crate::options;
use crate::packet::{LogEntry, LogEntryType, Packet, ViewerId};
use crate::protocol::{
    create_protocol, Error, EventSink, Protocol, ProtocolCommand, ProtocolContext,
    Result as ProtocolResult,
};
use crate::session::Session;
use crate::variables::ProtocolVariables;

use backtrace::Backtrace;

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};

struct HubCore {
    protocols: Vec<Protocol>,
    connections: String,
}

pub(crate) struct HubInner {
    core: Mutex<HubCore>,
    enabled: AtomicBool,
    level: AtomicU8,
    default_level: AtomicU8,
    app_name: RwLock<String>,
    host_name: String,
    variables: ProtocolVariables,
    sessions: SessionManager,
    events: Arc<EventSink>,
}

impl HubInner {
    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }
    pub(crate) fn level(&self) -> Level {
        Level::from_u8(self.level.load(Ordering::Relaxed))
    }
    pub(crate) fn default_level(&self) -> Level {
        Level::from_u8(self.default_level.load(Ordering::Relaxed))
    }
    pub(crate) fn app_name(&self) -> String {
        self.app_name.read().unwrap().clone()
    }
    pub(crate) fn host_name(&self) -> &str {
        &self.host_name
    }

    /// Fan one packet out to every protocol, in connection-string order. Per-protocol
    /// failures go to the error event; the caller's thread never sees them.
    pub(crate) fn dispatch_packet(&self, packet: Packet) {
        if !self.is_enabled() {
            return;
        }
        let packet = Arc::new(packet);
        let core = self.core.lock().unwrap();
        for protocol in &core.protocols {
            if let Err(err) = protocol.write_packet(Arc::clone(&packet)) {
                self.events.error(&err);
            }
        }
    }
}

impl Drop for HubInner {
    /// Last handle gone: joins every remaining asynchronous worker.
    fn drop(&mut self) {
        let mut core = self.core.lock().unwrap();
        for protocol in core.protocols.drain(..) {
            let _ = protocol.disconnect();
        }
    }
}

/// Figure out a name for this host: `gethostname`, else a local IP, else `-`.
fn discover_host_name() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .or_else(|| local_ip_address::local_ip().ok().map(|ip| ip.to_string()))
        .unwrap_or_else(|| "-".to_string())
}

enum PlanItem {
    Reuse(usize),
    Fresh(Protocol),
}

/// The process-wide coordinator. Clone freely; clones share one underlying hub.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Hub {
    /// Build a hub with no connections, disabled. This is the inject-a-root path; most
    /// applications use the global [`hub()`](crate::hub) instead.
    pub fn new(app_name: &str) -> Hub {
        Hub {
            inner: Arc::new(HubInner {
                core: Mutex::new(HubCore {
                    protocols: Vec::new(),
                    connections: String::new(),
                }),
                enabled: AtomicBool::new(false),
                level: AtomicU8::new(Level::Debug as u8),
                default_level: AtomicU8::new(Level::Message as u8),
                app_name: RwLock::new(app_name.to_string()),
                host_name: discover_host_name(),
                variables: ProtocolVariables::new(),
                sessions: SessionManager::new(),
                events: Arc::new(EventSink::new()),
            }),
        }
    }

    ////////////////////////////////////////////////////////////////////////////////////////////
    //                                      attributes                                        //
    ////////////////////////////////////////////////////////////////////////////////////////////

    pub fn app_name(&self) -> String {
        self.inner.app_name()
    }

    pub fn set_app_name(&self, app_name: &str) {
        *self.inner.app_name.write().unwrap() = app_name.to_string();
        let core = self.inner.core.lock().unwrap();
        for protocol in &core.protocols {
            protocol.set_app_name(app_name);
        }
    }

    pub fn host_name(&self) -> &str {
        self.inner.host_name()
    }

    pub fn enabled(&self) -> bool {
        self.inner.is_enabled()
    }

    /// Enable or disable logging. Enabling connects every configured protocol; disabling
    /// disconnects them (joining asynchronous workers).
    pub fn set_enabled(&self, enabled: bool) {
        if enabled == self.inner.is_enabled() {
            return;
        }
        let core = self.inner.core.lock().unwrap();
        if enabled {
            self.connect_protocols(&core);
            self.inner.enabled.store(true, Ordering::Relaxed);
        } else {
            self.inner.enabled.store(false, Ordering::Relaxed);
            self.disconnect_protocols(&core);
        }
    }

    pub fn level(&self) -> Level {
        self.inner.level()
    }
    pub fn set_level(&self, level: Level) {
        self.inner.level.store(level as u8, Ordering::Relaxed);
    }

    pub fn default_level(&self) -> Level {
        self.inner.default_level()
    }
    pub fn set_default_level(&self, level: Level) {
        self.inner.default_level.store(level as u8, Ordering::Relaxed);
    }

    pub fn connections(&self) -> String {
        self.inner.core.lock().unwrap().connections.clone()
    }

    pub fn events(&self) -> &Arc<EventSink> {
        &self.inner.events
    }

    /// Install a handler for failures surfaced off the logging path (asynchronous writers,
    /// configuration reloads).
    pub fn on_error<F>(&self, handler: F)
    where
        F: Fn(&(dyn std::error::Error + 'static)) + Send + Sync + 'static,
    {
        self.inner.events.set_error_handler(handler);
    }

    /// Install a handler for notices: server banners, configuration-reload confirmations.
    pub fn on_info<F: Fn(&str) + Send + Sync + 'static>(&self, handler: F) {
        self.inner.events.set_info_handler(handler);
    }

    ////////////////////////////////////////////////////////////////////////////////////////////
    //                                protocol set management                                 //
    ////////////////////////////////////////////////////////////////////////////////////////////

    fn protocol_context(&self) -> ProtocolContext {
        ProtocolContext::new(
            &self.app_name(),
            &self.inner.host_name,
            Arc::clone(&self.inner.events),
        )
    }

    /// Apply a connection string, preserving protocol instances whose normalized description
    /// is unchanged. On error nothing is touched.
    pub fn set_connections(&self, connections: &str) -> ProtocolResult<()> {
        let expanded = self.inner.variables.expand(connections);
        let parsed = options::parse(&expanded)?;

        let mut core = self.inner.core.lock().unwrap();
        let mut used = vec![false; core.protocols.len()];
        let mut plan: Vec<PlanItem> = Vec::with_capacity(parsed.len());
        for conn in &parsed {
            let descriptor = options::canonical_descriptor(&conn.name, &conn.options);
            let reusable = core
                .protocols
                .iter()
                .enumerate()
                .find(|(at, protocol)| !used[*at] && protocol.descriptor() == descriptor)
                .map(|(at, _)| at);
            match reusable {
                Some(at) => {
                    used[at] = true;
                    plan.push(PlanItem::Reuse(at));
                }
                None => plan.push(PlanItem::Fresh(create_protocol(conn, self.protocol_context())?)),
            }
        }

        // commit: everything parseable and buildable; from here on, no failure path
        let old = std::mem::take(&mut core.protocols);
        let mut reusable: Vec<Option<Protocol>> = old.into_iter().map(Some).collect();
        let mut fresh = Vec::with_capacity(plan.len());
        for item in plan {
            match item {
                PlanItem::Reuse(at) => {
                    if let Some(protocol) = reusable[at].take() {
                        fresh.push(protocol);
                    }
                }
                PlanItem::Fresh(protocol) => fresh.push(protocol),
            }
        }
        for dropped in reusable.into_iter().flatten() {
            if let Err(err) = dropped.disconnect() {
                self.inner.events.error(&err);
            }
        }
        core.protocols = fresh;
        core.connections = connections.to_string();
        if self.inner.is_enabled() {
            self.connect_protocols(&core);
        }
        Ok(())
    }

    fn connect_protocols(&self, core: &HubCore) {
        for protocol in &core.protocols {
            if let Err(err) = protocol.connect() {
                self.inner.events.error(&err);
            }
        }
    }

    fn disconnect_protocols(&self, core: &HubCore) {
        for protocol in &core.protocols {
            if let Err(err) = protocol.disconnect() {
                self.inner.events.error(&err);
            }
        }
    }

    /// Route a maintenance command to the protocol with the given caption.
    pub fn dispatch(&self, caption: &str, command: ProtocolCommand) {
        let core = self.inner.core.lock().unwrap();
        let found = core
            .protocols
            .iter()
            .find(|protocol| protocol.caption().eq_ignore_ascii_case(caption));
        match found {
            Some(protocol) => {
                if let Err(err) = protocol.dispatch(command) {
                    self.inner.events.error(&err);
                }
            }
            None => self.inner.events.error(&Error::UnknownProtocol {
                name: caption.to_string(),
                back: Backtrace::new(),
            }),
        }
    }

    ////////////////////////////////////////////////////////////////////////////////////////////
    //                                       sessions                                         //
    ////////////////////////////////////////////////////////////////////////////////////////////

    /// Create (or fetch) a named session. With `store` true the session is registered under
    /// its name and an existing registration wins; with `store` false the session works but
    /// is invisible to [`get_session`](Self::get_session).
    pub fn add_session(&self, name: &str, store: bool) -> Session {
        if name.is_empty() {
            self.log_internal_error("add_session: empty session name");
            return Session::new(&self.inner, name);
        }
        if store {
            if let Some(existing) = self.inner.sessions.get(name) {
                return existing;
            }
        }
        let session = Session::new(&self.inner, name);
        self.inner.sessions.add(&session, store);
        session
    }

    pub fn get_session(&self, name: &str) -> Option<Session> {
        self.inner.sessions.get(name)
    }

    /// Remove from the name index; the session object remains usable.
    pub fn delete_session(&self, session: &Session) {
        self.inner.sessions.delete(session);
    }

    /// Rename a session atomically; on a name collision the first registrant keeps the name
    /// in the index.
    pub fn update_session(&self, session: &Session, new_name: &str) {
        let old_name = session.name();
        session.set_name(new_name);
        self.inner.sessions.update(session, new_name, &old_name);
    }

    pub fn session_defaults(&self) -> SessionDefaults {
        self.inner.sessions.defaults()
    }

    /// Replace the defaults block; existing sessions are not touched.
    pub fn load_session_defaults(&self, defaults: SessionDefaults) {
        self.inner.sessions.load_defaults(defaults);
    }

    /// Apply properties to the named session now, or whenever one is added.
    pub fn load_session_properties(&self, name: &str, properties: SessionProperties) {
        self.inner.sessions.load_session_properties(name, properties);
    }

    ////////////////////////////////////////////////////////////////////////////////////////////
    //                                  protocol variables                                    //
    ////////////////////////////////////////////////////////////////////////////////////////////

    pub fn set_variable(&self, key: &str, value: &str) {
        self.inner.variables.put(key, value);
    }
    pub fn get_variable(&self, key: &str) -> Option<String> {
        self.inner.variables.get(key)
    }
    pub fn unset_variable(&self, key: &str) {
        self.inner.variables.remove(key);
    }

    ////////////////////////////////////////////////////////////////////////////////////////////
    //                                 configuration loading                                  //
    ////////////////////////////////////////////////////////////////////////////////////////////

    /// Read a configuration file and apply it: enabled flag, levels, application name,
    /// connection string (preserving unchanged protocol instances), session defaults and
    /// per-session properties. All failures surface through the error event; an info event
    /// confirms success.
    pub fn load_configuration<P: AsRef<Path>>(&self, path: P) {
        let path = path.as_ref();
        let config = match Configuration::load_from_file(path) {
            Ok(config) => config,
            Err(err) => {
                self.inner.events.error(&err);
                return;
            }
        };
        self.apply_configuration(path, &config);
    }

    fn apply_configuration(&self, path: &Path, config: &Configuration) {
        if config.contains("appname") {
            let app_name = config.read_string("appname", &self.app_name());
            self.set_app_name(&app_name);
        }
        let connections = config.read_string("connections", "");
        if !connections.is_empty() {
            if config.contains("enabled") {
                if config.read_bool("enabled", false) {
                    self.try_connections(path, &connections);
                    self.set_enabled(true);
                } else {
                    self.set_enabled(false);
                    self.try_connections(path, &connections);
                }
            } else {
                self.try_connections(path, &connections);
            }
        }
        if config.contains("level") {
            self.set_level(config.read_level("level", self.level()));
        }
        if config.contains("defaultlevel") {
            self.set_default_level(config.read_level("defaultlevel", self.default_level()));
        }
        self.inner.sessions.load_configuration(config);
        self.inner.events.info(&format!(
            "Configuration applied from \"{}\"",
            path.display()
        ));
    }

    fn try_connections(&self, path: &Path, connections: &str) -> bool {
        match self.set_connections(connections) {
            Ok(()) => true,
            Err(err) => {
                self.inner.events.error(&ConfigError::LoadConnections {
                    path: path.to_path_buf(),
                    message: err.to_string(),
                    back: Backtrace::new(),
                });
                false
            }
        }
    }

    /// Read only the `connections` key from a file and apply it; optionally enable on
    /// success. Missing key and unreadable file both surface through the error event.
    pub fn load_connections<P: AsRef<Path>>(&self, path: P, enable: bool) {
        let path = path.as_ref();
        let config = match Configuration::load_from_file(path) {
            Ok(config) => config,
            Err(err) => {
                self.inner.events.error(&err);
                return;
            }
        };
        if !config.contains("connections") {
            self.inner.events.error(&ConfigError::LoadConnections {
                path: path.to_path_buf(),
                message: "Connections string was not found".to_string(),
                back: Backtrace::new(),
            });
            return;
        }
        let connections = config.read_string("connections", "");
        if self.try_connections(path, &connections) && enable {
            self.set_enabled(true);
        }
    }

    ////////////////////////////////////////////////////////////////////////////////////////////
    //                                       teardown                                         //
    ////////////////////////////////////////////////////////////////////////////////////////////

    /// Disable, disconnect every protocol (joining asynchronous workers), forget sessions.
    pub fn dispose(&self) {
        self.inner.enabled.store(false, Ordering::Relaxed);
        {
            let mut core = self.inner.core.lock().unwrap();
            for protocol in core.protocols.drain(..) {
                if let Err(err) = protocol.disconnect() {
                    self.inner.events.error(&err);
                }
            }
            core.connections.clear();
        }
        self.inner.sessions.clear();
    }

    /// Record a library-internal failure: always via `tracing`, and as an `InternalError`
    /// log entry when logging is up.
    pub(crate) fn log_internal_error(&self, message: &str) {
        tracing::error!(target: "sil_tracing", "{}", message);
        let entry = LogEntry::builder(LogEntryType::InternalError, ViewerId::Title)
            .level(Level::Error)
            .title(message)
            .session_name("sil-tracing")
            .app_name(self.app_name())
            .hostname(self.host_name())
            .build();
        self.inner.dispatch_packet(Packet::LogEntry(entry));
    }
}
