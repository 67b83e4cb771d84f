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

//! The session manager: the case-insensitive name → [`Session`] index, the defaults block
//! applied to sessions at creation, and the queue of per-session properties waiting for a
//! session of that name to appear.
//!
//! One lock guards all three. Holders of that lock never log (logging would re-enter the hub),
//! so the lock is short and uncontended; see the concurrency notes on the crate root.

use crate::config::Configuration;
use crate::level::Level;
use crate::packet::Color;
use crate::session::Session;

use std::collections::HashMap;
use std::sync::Mutex;

/// Attribute values stamped onto every session at creation time.
///
/// Changing the defaults never touches already-created sessions.
#[derive(Copy, Clone, Debug)]
pub struct SessionDefaults {
    pub active: bool,
    pub level: Level,
    pub color: Color,
}

impl std::default::Default for SessionDefaults {
    fn default() -> Self {
        SessionDefaults {
            active: true,
            level: Level::Debug,
            color: Color::TRANSPARENT,
        }
    }
}

impl SessionDefaults {
    fn assign(&self, session: &Session) {
        session.set_active(self.active);
        session.set_level(self.level);
        session.set_color(self.color);
    }
}

/// Properties queued for a session that may not exist yet.
#[derive(Clone, Debug, Default)]
pub struct SessionProperties {
    pub active: Option<bool>,
    pub level: Option<Level>,
    pub color: Option<Color>,
}

impl SessionProperties {
    fn assign(&self, session: &Session) {
        if let Some(active) = self.active {
            session.set_active(active);
        }
        if let Some(level) = self.level {
            session.set_level(level);
        }
        if let Some(color) = self.color {
            session.set_color(color);
        }
    }
}

#[derive(Default)]
struct ManagerState {
    sessions: HashMap<String, Session>,
    pending: HashMap<String, SessionProperties>,
    defaults: SessionDefaults,
}

/// The name index plus creation defaults. Lookup is case-insensitive; names are unique.
#[derive(Default)]
pub struct SessionManager {
    state: Mutex<ManagerState>,
}

const PREFIX: &str = "session.";

impl SessionManager {
    pub fn new() -> SessionManager {
        SessionManager::default()
    }

    pub fn defaults(&self) -> SessionDefaults {
        self.state.lock().unwrap().defaults
    }

    /// Replace the defaults block. Applies only to sessions created afterwards.
    pub fn load_defaults(&self, defaults: SessionDefaults) {
        self.state.lock().unwrap().defaults = defaults;
    }

    /// Register `session`. Defaults are stamped first, then any queued properties for its
    /// name. With `store` false the session works but is invisible to [`get`](Self::get).
    pub fn add(&self, session: &Session, store: bool) {
        let mut state = self.state.lock().unwrap();
        state.defaults.assign(session);
        let key = session.name().to_lowercase();
        if store {
            state.sessions.insert(key.clone(), session.clone());
            session.set_stored(true);
        }
        if let Some(properties) = state.pending.get(&key) {
            properties.assign(session);
        }
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Option<Session> {
        self.state
            .lock()
            .unwrap()
            .sessions
            .get(&name.to_lowercase())
            .cloned()
    }

    /// Remove from the index; the session object itself remains usable.
    pub fn delete(&self, session: &Session) {
        if !session.is_stored() {
            return;
        }
        let mut state = self.state.lock().unwrap();
        let key = session.name().to_lowercase();
        if let Some(found) = state.sessions.get(&key) {
            if found.same_as(session) {
                state.sessions.remove(&key);
            }
        }
    }

    /// Atomic rename in the index. A collision preserves the first registrant: the index entry
    /// under `to_name` is left untouched and only the session's own name changes.
    pub fn update(&self, session: &Session, to_name: &str, from_name: &str) {
        let mut state = self.state.lock().unwrap();
        let from_key = from_name.to_lowercase();
        let to_key = to_name.to_lowercase();
        if let Some(found) = state.sessions.get(&from_key) {
            if found.same_as(session) {
                state.sessions.remove(&from_key);
            }
        }
        if let Some(properties) = state.pending.get(&to_key) {
            properties.assign(session);
        }
        state.sessions.entry(to_key).or_insert_with(|| session.clone());
    }

    /// Apply `properties` to the named session now, or queue them for whenever such a session
    /// is added.
    pub fn load_session_properties(&self, name: &str, properties: SessionProperties) {
        let mut state = self.state.lock().unwrap();
        let key = name.to_lowercase();
        if let Some(session) = state.sessions.get(&key) {
            properties.assign(session);
        }
        state.pending.insert(key, properties);
    }

    /// Pull `sessiondefaults.*` and `session.<name>.<attr>` keys out of a configuration.
    pub fn load_configuration(&self, config: &Configuration) {
        {
            let mut state = self.state.lock().unwrap();
            state.pending.clear();
            state.defaults = SessionDefaults {
                active: config.read_bool("sessiondefaults.active", state.defaults.active),
                level: config.read_level("sessiondefaults.level", state.defaults.level),
                color: Color(config.read_color(
                    "sessiondefaults.color",
                    state.defaults.color.value(),
                )),
            };
        }
        for name in config.keys().iter().filter_map(|key| {
            key.strip_prefix(PREFIX)
                .and_then(|rest| rest.rsplit_once('.'))
                .map(|(name, _)| name.to_string())
        }) {
            let mut properties = SessionProperties::default();
            let prefix = format!("{}{}", PREFIX, name);
            if config.contains(&format!("{}.active", prefix)) {
                properties.active = Some(config.read_bool(&format!("{}.active", prefix), true));
            }
            if config.contains(&format!("{}.level", prefix)) {
                properties.level =
                    Some(config.read_level(&format!("{}.level", prefix), Level::Debug));
            }
            if config.contains(&format!("{}.color", prefix)) {
                properties.color = Some(Color(
                    config.read_color(&format!("{}.color", prefix), Color::TRANSPARENT.value()),
                ));
            }
            self.load_session_properties(&name, properties);
        }
    }

    /// Forget everything (hub teardown).
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.sessions.clear();
        state.pending.clear();
    }
}
