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

//! Structured diagnostics & tracing: categorized events, serialized into a compact binary
//! packet format and delivered asynchronously to viewers, files, pipes and memory buffers.
//!
//! # Introduction
//!
//! Applications acquire named [`Session`]s from a [`Hub`] and emit typed records through them:
//! titled log entries carrying viewer payloads, named watch values, process-flow markers,
//! control commands. Each record becomes a self-framed binary [`Packet`] which the hub fans
//! out to every configured *protocol* -- a named, option-parameterized transport:
//!
//! | name   | destination                                                      |
//! |--------|------------------------------------------------------------------|
//! | `tcp`  | a live viewer over TCP (banner handshake, then a packet stream)  |
//! | `file` | binary log files, rotating by time or size, optionally encrypted |
//! | `text` | human-readable, pattern-formatted lines; rotates like `file`     |
//! | `pipe` | the TCP semantics over a local duplex byte stream                |
//! | `mem`  | a bounded in-memory ring, flushed on request or disconnect       |
//!
//! [`Packet`]: crate::packet::Packet
//!
//! Protocols are configured with a *connection string* -- `tcp(host=viewer,port=4228),
//! file(filename=backup.sil,rotate=daily)` -- and every protocol accepts `async.enabled=true`,
//! which moves its writes onto a dedicated worker thread behind a bounded, byte-capped queue
//! (see [`scheduler`]). Logging calls then cost an enqueue; backpressure is configurable
//! between blocking producers and shedding the oldest queued packets.
//!
//! # Usage
//!
//! Most applications use the process-wide hub and the default session:
//!
//! ```no_run
//! use sil_tracing::{default_session, hub, shutdown};
//!
//! hub().set_connections("tcp(host=localhost)").unwrap();
//! hub().set_enabled(true);
//!
//! let log = default_session();
//! log.log_message("up and running");
//! log.watch_i64("jobs", 17);
//! {
//!     let _guard = log.track_method("startup");
//!     // the matching leave-method packet goes out when `_guard` drops
//! }
//!
//! shutdown(); // flush & join every asynchronous worker
//! ```
//!
//! Configuration can also live in a file, hot-reloaded when it changes on disk:
//!
//! ```no_run
//! use sil_tracing::{hub, ConfigurationTimer};
//! use std::time::Duration;
//!
//! hub().load_configuration("sil.cfg");
//! let _watch = ConfigurationTimer::new(hub(), "sil.cfg", Duration::from_secs(60)).unwrap();
//! ```
//!
//! Applications already instrumented with the [`tracing`] macros can install the bridge in
//! [`layer`] instead of calling sessions directly.
//!
//! # Discussion
//!
//! This library is instrumentation, not business logic: nothing on the logging hot path
//! panics or propagates transport failures to the caller. Synchronous configuration calls
//! (`set_connections`, `connect`) report their errors; asynchronous failures surface through
//! the hub's error event, and non-error notices (server banners, configuration reloads)
//! through its info event.

pub mod config;
pub mod crypt;
pub mod file;
pub mod formatter;
pub mod hub;
pub mod layer;
pub mod level;
pub mod manager;
pub mod mem;
pub mod options;
pub mod packet;
pub mod pattern;
#[cfg(unix)]
pub mod pipe;
pub mod protocol;
pub mod scheduler;
pub mod session;
pub mod silf;
pub mod tcp;
pub mod text;
pub mod variables;

pub use config::ConfigurationTimer;
pub use hub::Hub;
pub use level::Level;
pub use manager::{SessionDefaults, SessionProperties};
pub use session::{MethodTracker, Session};

use std::sync::OnceLock;

static GLOBAL_HUB: OnceLock<Hub> = OnceLock::new();

/// The process-wide [`Hub`]; created on first access, named after the current executable,
/// configured for a local viewer, and *disabled* until the application opts in with
/// [`Hub::set_enabled`].
pub fn hub() -> &'static Hub {
    GLOBAL_HUB.get_or_init(|| {
        let app_name = std::env::current_exe()
            .ok()
            .and_then(|path| {
                path.file_name()
                    .map(|name| name.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| "-".to_string());
        let hub = Hub::new(&app_name);
        let _ = hub.set_connections("tcp(host=localhost)");
        hub
    })
}

/// The global hub's stored `"Main"` session (created on first access).
pub fn default_session() -> Session {
    hub().add_session("Main", true)
}

/// Tear down the global hub: disable logging, disconnect every protocol and join all worker
/// threads. Safe to call when the global hub was never touched.
pub fn shutdown() {
    if let Some(hub) = GLOBAL_HUB.get() {
        hub.dispose();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_globals() {
        let first = hub() as *const Hub;
        let second = hub() as *const Hub;
        assert_eq!(first, second);
        assert!(!hub().enabled());

        let main = default_session();
        assert!(default_session().same_as(&main));
        // disabled hub: logging is a cheap no-op, not an error
        main.log_message("nobody listening");
        shutdown();
    }
}
