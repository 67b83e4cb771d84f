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

//! Protocol variables.
//!
//! A thread-safe `name → string` table whose entries substitute for `$name$` occurrences inside
//! connection strings before they are parsed. Lets deployments keep secrets (say, an encryption
//! key) out of the literal configuration:
//!
//! ```rust
//! use sil_tracing::variables::ProtocolVariables;
//! let vars = ProtocolVariables::new();
//! vars.put("key", "secret");
//! assert_eq!(
//!     vars.expand("file(encrypt=true,key=$key$),tcp(host=$missing$)"),
//!     "file(encrypt=true,key=secret),tcp(host=$missing$)"
//! );
//! ```
//!
//! Substitution is a single pass: replacement values are never re-scanned, and a `$name$` with
//! no table entry is left in place, literally.

use std::collections::HashMap;
use std::sync::Mutex;

/// The `$name$` substitution table.
#[derive(Debug, Default)]
pub struct ProtocolVariables {
    items: Mutex<HashMap<String, String>>,
}

impl ProtocolVariables {
    pub fn new() -> ProtocolVariables {
        ProtocolVariables::default()
    }

    /// Insert, overwriting any prior value.
    pub fn put(&self, key: &str, value: &str) {
        self.items
            .lock()
            .unwrap()
            .insert(key.to_ascii_lowercase(), value.to_string());
    }

    /// Insert only if `key` is not yet present.
    pub fn add(&self, key: &str, value: &str) {
        self.items
            .lock()
            .unwrap()
            .entry(key.to_ascii_lowercase())
            .or_insert_with(|| value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.items
            .lock()
            .unwrap()
            .get(&key.to_ascii_lowercase())
            .cloned()
    }

    pub fn remove(&self, key: &str) {
        self.items.lock().unwrap().remove(&key.to_ascii_lowercase());
    }

    pub fn clear(&self) {
        self.items.lock().unwrap().clear();
    }

    pub fn count(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    /// Expand every `$name$` occurrence in `connections`; unknown names stay literal.
    pub fn expand(&self, connections: &str) -> String {
        let items = self.items.lock().unwrap();
        if items.is_empty() {
            return connections.to_string();
        }
        let mut out = String::with_capacity(connections.len());
        let mut rest = connections;
        while let Some(start) = rest.find('$') {
            out.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            match after.find('$') {
                Some(end) => {
                    let name = &after[..end];
                    match items.get(&name.to_ascii_lowercase()) {
                        Some(value) => {
                            out.push_str(value);
                            rest = &after[end + 1..];
                        }
                        None => {
                            // not a known variable: emit the leading '$' and rescan from the
                            // second one, which may open a real variable
                            out.push('$');
                            rest = after;
                        }
                    }
                }
                None => {
                    out.push('$');
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        out
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_expand() {
        let vars = ProtocolVariables::new();
        vars.put("host", "viewer.example.com");
        vars.put("port", "4229");
        assert_eq!(
            vars.expand("tcp(host=$host$,port=$port$)"),
            "tcp(host=viewer.example.com,port=4229)"
        );
        // missing variables stay literal
        assert_eq!(vars.expand("tcp(host=$nope$)"), "tcp(host=$nope$)");
        // keys are case-insensitive
        assert_eq!(vars.expand("$HOST$"), "viewer.example.com");
    }

    #[test]
    fn test_expand_is_single_pass() {
        let vars = ProtocolVariables::new();
        vars.put("a", "$b$");
        vars.put("b", "deep");
        assert_eq!(vars.expand("x=$a$"), "x=$b$");
    }

    #[test]
    fn test_table_ops() {
        let vars = ProtocolVariables::new();
        vars.put("k", "1");
        vars.add("k", "2");
        assert_eq!(vars.get("k").as_deref(), Some("1"));
        vars.remove("k");
        assert_eq!(vars.get("k"), None);
        assert_eq!(vars.count(), 0);
    }
}
