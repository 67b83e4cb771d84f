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

//! Test sending to a viewer listening on port 4228 on the local host.

use sil_tracing::{default_session, hub, layer::Layer, shutdown};
use tracing::{debug, error, info, trace, warn};
use tracing_subscriber::{
    layer::SubscriberExt, // Needed to get `with()`
    registry::Registry,
};

pub fn main() {
    hub().on_info(|message| eprintln!("info: {}", message));
    hub().on_error(|err| eprintln!("error: {}", err));
    hub().set_connections("tcp(host=localhost,port=4228,timeout=5s)")
        .unwrap();
    hub().set_enabled(true);

    // once through the tracing bridge...
    let subscriber = Registry::default().with(Layer::new(default_session()));
    let _guard = tracing::subscriber::set_default(subscriber);
    trace!("你好, TCP viewer.");
    debug!("你好, TCP viewer.");
    info!("你好, TCP viewer.");
    warn!("你好, TCP viewer.");
    error!("你好, TCP viewer.");

    // ...and once through the session API proper
    let log = default_session();
    let _method = log.track_method("tcp-test::main");
    log.log_message("direct session traffic");
    log.watch_i64("answer", 42);

    drop(_method);
    shutdown();
}
