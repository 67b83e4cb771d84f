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

//! Test writing rotating log files; open the results in a viewer to inspect them.

use sil_tracing::{hub, shutdown, Level};

pub fn main() {
    hub().on_error(|err| eprintln!("error: {}", err));
    hub().set_connections(
        "file(filename=test.sil,rotate=hourly,maxparts=24,async.enabled=true),\
         text(filename=test.txt,pattern=\"[%timestamp%] %level,8%: %title%\",indent=true)",
    )
    .unwrap();
    hub().set_enabled(true);

    let log = hub().add_session("FileTest", true);
    log.log_message("plain binary + text output");
    {
        let _outer = log.track_method("file-test::outer");
        log.log_debug("indented under outer");
        {
            let _inner = log.track_method("file-test::inner");
            log.log_colored(Level::Message, sil_tracing::packet::Color(0xFF2E8B57), "two deep");
        }
    }
    log.watch_f64("pi-ish", 3.14);
    log.log_separator(Level::Message);
    log.log_warning("rotation keeps the last 24 hourly parts");

    shutdown();
}
