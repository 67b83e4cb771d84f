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

//! Configuration files & hot reload
//! ================================
//!
//! # Introduction
//!
//! A configuration file is line-oriented `key = value` text:
//!
//! ```text
//! # connect to the local viewer, fall back to a file
//! enabled      = true
//! level        = message
//! connections  = tcp(host=localhost), file(filename=backup.sil)
//! sessiondefaults.level = debug
//! session.Db.color      = 0xFF00C800
//! ```
//!
//! `#` or `;` starts a comment (outside quotes); keys are case-insensitive; a quoted value may
//! embed `=`, `#` and `;`. [`Configuration`] parses the format; [`ConfigurationTimer`] watches
//! a file for modification-time changes on its own thread and re-applies it to a [`Hub`] --
//! the hot-reload path -- at a bounded polling interval.
//!
//! [`Hub`]: crate::hub::Hub

use crate::hub::Hub;
use crate::level::Level;
use crate::options::LookupTable;

use backtrace::Backtrace;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// module error type
#[non_exhaustive]
pub enum Error {
    /// The configuration file could not be read
    LoadConfiguration {
        path: PathBuf,
        source: std::io::Error,
        back: Backtrace,
    },
    /// The file was read, but its contents could not be applied
    LoadConnections {
        path: PathBuf,
        message: String,
        back: Backtrace,
    },
}

impl std::fmt::Display for Error {
    // `Error` is non-exhaustive so that adding variants won't be a breaking change to our
    // callers. That means the compiler won't catch us if we miss a variant here, so we
    // always include a `_` arm.
    #[allow(unreachable_patterns)]
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::LoadConfiguration { path, source, .. } => write!(
                f,
                "Could not read configuration file \"{}\": {}",
                path.display(),
                source
            ),
            Error::LoadConnections { path, message, .. } => write!(
                f,
                "Bad connections in configuration file \"{}\": {}",
                path.display(),
                message
            ),
            _ => write!(f, "configuration error"),
        }
    }
}

impl std::fmt::Debug for Error {
    #[allow(unreachable_patterns)]
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::LoadConfiguration { back, .. } => write!(f, "{}\n{:#?}", self, back),
            Error::LoadConnections { back, .. } => write!(f, "{}\n{:#?}", self, back),
            _ => write!(f, "{}", self),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                     struct Configuration                                       //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A parsed configuration: a case-insensitive key → value table that also remembers key order
/// (the `session.<name>.<attr>` scan needs it).
#[derive(Debug, Default)]
pub struct Configuration {
    items: LookupTable,
    keys: Vec<String>,
}

/// Cut an unquoted `#` or `;` comment off the end of `line`.
fn strip_comment(line: &str) -> &str {
    let mut quoted = false;
    for (at, c) in line.char_indices() {
        match c {
            '"' => quoted = !quoted,
            '#' | ';' if !quoted => return &line[..at],
            _ => (),
        }
    }
    line
}

impl Configuration {
    pub fn parse(text: &str) -> Configuration {
        let mut config = Configuration::default();
        for line in text.lines() {
            let line = strip_comment(line).trim();
            if line.is_empty() {
                continue;
            }
            let (key, value) = match line.split_once('=') {
                Some(pair) => pair,
                None => continue,
            };
            let key = key.trim().to_lowercase();
            let mut value = value.trim();
            if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
                value = &value[1..value.len() - 1];
            }
            if !config.items.contains(&key) {
                config.keys.push(key.clone());
            }
            config.items.put(&key, value.to_string());
        }
        config
    }

    pub fn load_from_file(path: &Path) -> Result<Configuration> {
        let text = std::fs::read_to_string(path).map_err(|err| Error::LoadConfiguration {
            path: path.to_path_buf(),
            source: err,
            back: Backtrace::new(),
        })?;
        Ok(Configuration::parse(&text))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.items.contains(key)
    }
    /// Keys in file order, lowercased.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }
    pub fn read_string(&self, key: &str, default: &str) -> String {
        self.items.get_string(key, default)
    }
    pub fn read_bool(&self, key: &str, default: bool) -> bool {
        self.items.get_bool(key, default)
    }
    pub fn read_integer(&self, key: &str, default: i64) -> i64 {
        self.items.get_integer(key, default)
    }
    pub fn read_level(&self, key: &str, default: Level) -> Level {
        self.items.get_level(key, default)
    }
    pub fn read_color(&self, key: &str, default: u32) -> u32 {
        self.items.get_color(key, default)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                   struct ConfigurationTimer                                    //
////////////////////////////////////////////////////////////////////////////////////////////////////

struct TimerShared {
    hub: Hub,
    path: PathBuf,
    last_modified: Mutex<Option<SystemTime>>,
    stop: Mutex<bool>,
    cond: Condvar,
}

impl TimerShared {
    fn modified_time(&self) -> Option<SystemTime> {
        std::fs::metadata(&self.path).and_then(|m| m.modified()).ok()
    }

    /// One poll: reload if the file's mtime moved forward since we last looked.
    fn check(&self) {
        let mtime = match self.modified_time() {
            Some(mtime) => mtime,
            None => return,
        };
        let changed = {
            let mut last = self.last_modified.lock().unwrap();
            match *last {
                Some(seen) if mtime <= seen => false,
                _ => {
                    *last = Some(mtime);
                    true
                }
            }
        };
        if changed {
            self.hub.events().info(&format!(
                "Configuration file change detected, reloading \"{}\"",
                self.path.display()
            ));
            self.hub.load_configuration(&self.path);
        }
    }
}

/// Watches a configuration file and re-applies it to a [`Hub`] when it changes.
///
/// The watcher is a plain polling thread (modification time, once per `interval`); stopping --
/// explicitly or by dropping -- joins it.
pub struct ConfigurationTimer {
    shared: Arc<TimerShared>,
    thread: Option<JoinHandle<()>>,
}

impl ConfigurationTimer {
    /// Start watching. `interval` is clamped into 1..=300 seconds.
    pub fn new<P: AsRef<Path>>(hub: &Hub, path: P, interval: Duration) -> std::io::Result<ConfigurationTimer> {
        let interval = interval.clamp(Duration::from_secs(1), Duration::from_secs(300));
        let shared = Arc::new(TimerShared {
            hub: hub.clone(),
            path: path.as_ref().to_path_buf(),
            last_modified: Mutex::new(None),
            stop: Mutex::new(false),
            cond: Condvar::new(),
        });
        // the current state is the baseline; only *changes* from here trigger a reload
        *shared.last_modified.lock().unwrap() = shared.modified_time();
        let worker = Arc::clone(&shared);
        let thread = std::thread::Builder::new()
            .name("sil-config-watch".to_string())
            .spawn(move || loop {
                {
                    let stop = worker.stop.lock().unwrap();
                    let (stop, _) = worker.cond.wait_timeout(stop, interval).unwrap();
                    if *stop {
                        break;
                    }
                }
                worker.check();
            })?;
        Ok(ConfigurationTimer {
            shared,
            thread: Some(thread),
        })
    }

    /// Check the file right now, without waiting for the next polling tick.
    pub fn poll(&self) {
        self.shared.check();
    }

    /// Stop watching and join the watcher thread.
    pub fn stop(&mut self) {
        {
            let mut stop = self.shared.stop.lock().unwrap();
            if *stop {
                return;
            }
            *stop = true;
            self.shared.cond.notify_all();
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for ConfigurationTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_basics() {
        let config = Configuration::parse(
            "# a comment\n\
             ; another\n\
             Enabled = true\n\
             level = warning   # trailing comment\n\
             AppName = \"my = app ; really\"\n\
             connections = tcp(host=localhost)\n\
             \n\
             session.Db.level = error\n",
        );
        assert!(config.read_bool("enabled", false));
        assert_eq!(config.read_level("LEVEL", Level::Debug), Level::Warning);
        assert_eq!(config.read_string("appname", ""), "my = app ; really");
        assert_eq!(config.read_string("connections", ""), "tcp(host=localhost)");
        assert!(config.contains("session.db.level"));
        assert_eq!(
            config.keys(),
            &[
                "enabled".to_string(),
                "level".to_string(),
                "appname".to_string(),
                "connections".to_string(),
                "session.db.level".to_string(),
            ]
        );
    }

    #[test]
    fn test_lines_without_equals_are_skipped() {
        let config = Configuration::parse("just some words\nkey = value\n");
        assert_eq!(config.keys().len(), 1);
        assert_eq!(config.read_string("key", ""), "value");
    }

    #[test]
    fn test_missing_file_is_a_load_error() {
        match Configuration::load_from_file(Path::new("/nonexistent/sil.cfg")) {
            Err(Error::LoadConfiguration { .. }) => (),
            other => panic!("unexpected: {:?}", other.err()),
        }
    }

    #[test]
    fn test_timer_reloads_on_change() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("sil.cfg");
        let log_path = dir.path().join("watched.sil");

        let hub = Hub::new("app");
        let reloads = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&reloads);
        hub.on_info(move |_| {
            count.fetch_add(1, Ordering::Relaxed);
        });

        // watch a file that doesn't exist yet; its appearance counts as a change
        let timer = ConfigurationTimer::new(&hub, &config_path, Duration::from_secs(300)).unwrap();
        timer.poll();
        assert_eq!(reloads.load(Ordering::Relaxed), 0);
        assert!(!hub.enabled());

        std::fs::write(
            &config_path,
            format!(
                "enabled = true\nconnections = file(filename=\"{}\")\n",
                log_path.display()
            ),
        )
        .unwrap();
        timer.poll();
        assert!(hub.enabled());
        assert!(reloads.load(Ordering::Relaxed) > 0);

        // unchanged file: polling again must not re-apply
        let seen = reloads.load(Ordering::Relaxed);
        timer.poll();
        assert_eq!(reloads.load(Ordering::Relaxed), seen);
        hub.dispose();
    }
}
