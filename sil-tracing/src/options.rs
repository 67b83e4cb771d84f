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

//! Connection strings & typed options
//! ==================================
//!
//! # Introduction
//!
//! A connection string names one or more protocols, each with a parenthesized option list:
//!
//! ```text
//! conns   := proto ("," proto)*
//! proto   := name "(" (opt ("," opt)*)? ")"
//! opt     := key "=" value
//! value   := bare | '"' escaped '"'
//! ```
//!
//! ```rust
//! use sil_tracing::options::parse;
//! let conns = parse(r#"tcp(host=localhost,port=4228),file(filename="./a.sil")"#).unwrap();
//! assert_eq!(conns.len(), 2);
//! assert_eq!(conns[0].name, "tcp");
//! ```
//!
//! Whitespace around tokens is ignored. Quoted values accept the backslash escapes `\\` and
//! `\"`. Keys are case-insensitive and the *last* duplicate wins. Parse failures carry the byte
//! offset at which the parser gave up and the token it expected there.
//!
//! # Discussion
//!
//! Option values are plain strings until a protocol asks for them through one of the typed
//! accessors on [`LookupTable`]; a value that fails coercion yields the caller's default rather
//! than an error, so a typo in one option cannot take down an otherwise-good configuration.

use crate::level::Level;

use backtrace::Backtrace;

use std::collections::HashMap;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// module error type
#[non_exhaustive]
pub enum Error {
    /// Connection-string syntax error: `expected` names the token the parser wanted to see at
    /// byte `offset` of the input
    InvalidConnections {
        offset: usize,
        expected: &'static str,
        back: Backtrace,
    },
    /// An option key a protocol does not recognize
    UnknownOption {
        protocol: String,
        option: String,
        back: Backtrace,
    },
}

impl Error {
    pub(crate) fn invalid(offset: usize, expected: &'static str) -> Error {
        Error::InvalidConnections {
            offset,
            expected,
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
            Error::InvalidConnections {
                offset, expected, ..
            } => write!(
                f,
                "Invalid connections string: expected {} at byte {}",
                expected, offset
            ),
            Error::UnknownOption {
                protocol, option, ..
            } => write!(
                f,
                "Option \"{}\" is not available for protocol \"{}\"",
                option, protocol
            ),
            _ => write!(f, "connections parse error"),
        }
    }
}

impl std::fmt::Debug for Error {
    #[allow(unreachable_patterns)]
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::InvalidConnections { back, .. } => write!(f, "{}\n{:#?}", self, back),
            Error::UnknownOption { back, .. } => write!(f, "{}\n{:#?}", self, back),
            _ => write!(f, "{}", self),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            parsing                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// One parsed protocol descriptor: a name plus its options in textual order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Connection {
    pub name: String,
    /// `(key, value)` pairs in the order written; duplicate resolution happens on insertion
    /// into a [`LookupTable`]
    pub options: Vec<(String, String)>,
}

struct Scanner<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn skip_ws(&mut self) {
        while self.pos < self.input.len() && self.input[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }
    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }
    fn bump(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }
    fn eat(&mut self, c: u8) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// A run of characters up to (but excluding) any of `stop`, trimmed.
    fn bare(&mut self, stop: &[u8]) -> String {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if stop.contains(&c) {
                break;
            }
            self.pos += 1;
        }
        String::from_utf8_lossy(&self.input[start..self.pos])
            .trim()
            .to_string()
    }

    /// A quoted value; the opening `"` has been consumed.
    fn quoted(&mut self) -> Result<String> {
        let mut value: Vec<u8> = Vec::new();
        loop {
            match self.bump() {
                None => return Err(Error::invalid(self.pos, "closing `\"`")),
                Some(b'"') => return Ok(String::from_utf8_lossy(&value).into_owned()),
                Some(b'\\') => match self.bump() {
                    Some(b'"') => value.push(b'"'),
                    Some(b'\\') => value.push(b'\\'),
                    Some(c) => {
                        // unknown escape: keep both bytes
                        value.push(b'\\');
                        value.push(c);
                    }
                    None => return Err(Error::invalid(self.pos, "escaped character")),
                },
                Some(c) => value.push(c),
            }
        }
    }

    fn option(&mut self) -> Result<(String, String)> {
        let key_at = self.pos;
        let key = self.bare(b"=,()");
        if key.is_empty() {
            return Err(Error::invalid(key_at, "option key"));
        }
        if !self.eat(b'=') {
            return Err(Error::invalid(self.pos, "`=`"));
        }
        self.skip_ws();
        let value = if self.eat(b'"') {
            let v = self.quoted()?;
            self.skip_ws();
            v
        } else {
            self.bare(b",)")
        };
        Ok((key.to_ascii_lowercase(), value))
    }

    fn protocol(&mut self) -> Result<Connection> {
        let name_at = self.pos;
        let name = self.bare(b"(),=");
        if name.is_empty() {
            return Err(Error::invalid(name_at, "protocol name"));
        }
        if !self.eat(b'(') {
            return Err(Error::invalid(self.pos, "`(`"));
        }
        let mut options = Vec::new();
        self.skip_ws();
        if !self.eat(b')') {
            loop {
                options.push(self.option()?);
                self.skip_ws();
                if self.eat(b')') {
                    break;
                }
                if !self.eat(b',') {
                    return Err(Error::invalid(self.pos, "`,` or `)`"));
                }
                self.skip_ws();
            }
        }
        Ok(Connection {
            name: name.to_ascii_lowercase(),
            options,
        })
    }
}

/// Parse the connections part of a connection string into protocol descriptors, in textual
/// order. An empty (or all-whitespace) input is an empty configuration, not an error.
pub fn parse(connections: &str) -> Result<Vec<Connection>> {
    let mut scanner = Scanner {
        input: connections.as_bytes(),
        pos: 0,
    };
    let mut found = Vec::new();
    loop {
        scanner.skip_ws();
        if scanner.peek().is_none() {
            return Ok(found);
        }
        found.push(scanner.protocol()?);
        scanner.skip_ws();
        match scanner.peek() {
            None => return Ok(found),
            Some(b',') => {
                scanner.bump();
            }
            _ => return Err(Error::invalid(scanner.pos, "`,` or end of input")),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          LookupTable                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

const KB: u64 = 1024;
const MB: u64 = KB * 1024;
const GB: u64 = MB * 1024;

/// A case-insensitive `name → value` option map with typed, default-tolerant accessors.
#[derive(Clone, Debug, Default)]
pub struct LookupTable {
    items: HashMap<String, String>,
}

impl LookupTable {
    pub fn new() -> LookupTable {
        LookupTable::default()
    }

    /// Build from parsed pairs; later duplicates overwrite earlier ones.
    pub fn from_pairs(pairs: &[(String, String)]) -> LookupTable {
        let mut table = LookupTable::new();
        for (key, value) in pairs {
            table.put(key, value.clone());
        }
        table
    }

    /// Insert, overwriting any prior value.
    pub fn put(&mut self, key: &str, value: String) {
        self.items.insert(key.to_ascii_lowercase(), value);
    }

    /// Insert only if the key is not yet present.
    pub fn add(&mut self, key: &str, value: String) {
        self.items
            .entry(key.to_ascii_lowercase())
            .or_insert(value);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.items.contains_key(&key.to_ascii_lowercase())
    }

    pub fn get_string(&self, key: &str, default: &str) -> String {
        match self.items.get(&key.to_ascii_lowercase()) {
            Some(value) => value.clone(),
            None => default.to_string(),
        }
    }

    /// `true/false/yes/no/1/0`, case-insensitive; anything else falls back to `default`.
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.items.get(&key.to_ascii_lowercase()) {
            None => default,
            Some(value) => match value.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => true,
                "false" | "no" | "0" => false,
                _ => default,
            },
        }
    }

    /// A plain decimal integer.
    pub fn get_integer(&self, key: &str, default: i64) -> i64 {
        match self.items.get(&key.to_ascii_lowercase()) {
            None => default,
            Some(value) => value.trim().parse().unwrap_or(default),
        }
    }

    /// A byte count: a bare number is bytes, `kb`/`mb`/`gb` suffixes are binary units.
    pub fn get_size(&self, key: &str, default: u64) -> u64 {
        let value = match self.items.get(&key.to_ascii_lowercase()) {
            None => return default,
            Some(value) => value.trim().to_ascii_lowercase(),
        };
        let (digits, factor) = match value {
            _ if value.ends_with("kb") => (value[..value.len() - 2].to_string(), KB),
            _ if value.ends_with("mb") => (value[..value.len() - 2].to_string(), MB),
            _ if value.ends_with("gb") => (value[..value.len() - 2].to_string(), GB),
            _ => (value, 1),
        };
        match digits.trim().parse::<u64>() {
            Ok(n) => n.saturating_mul(factor),
            Err(_) => default,
        }
    }

    /// A duration in milliseconds: a bare number is milliseconds, with `ms`/`s`/`m`/`h`/`d`
    /// suffixes.
    pub fn get_millis(&self, key: &str, default: u64) -> u64 {
        let value = match self.items.get(&key.to_ascii_lowercase()) {
            None => return default,
            Some(value) => value.trim().to_ascii_lowercase(),
        };
        // check the two-character suffix before the one-character ones
        let (digits, factor) = if let Some(stripped) = value.strip_suffix("ms") {
            (stripped.to_string(), 1u64)
        } else if let Some(stripped) = value.strip_suffix('s') {
            (stripped.to_string(), 1_000)
        } else if let Some(stripped) = value.strip_suffix('m') {
            (stripped.to_string(), 60_000)
        } else if let Some(stripped) = value.strip_suffix('h') {
            (stripped.to_string(), 3_600_000)
        } else if let Some(stripped) = value.strip_suffix('d') {
            (stripped.to_string(), 86_400_000)
        } else {
            (value, 1)
        };
        match digits.trim().parse::<u64>() {
            Ok(n) => n.saturating_mul(factor),
            Err(_) => default,
        }
    }

    pub fn get_level(&self, key: &str, default: Level) -> Level {
        match self.items.get(&key.to_ascii_lowercase()) {
            None => default,
            Some(value) => Level::parse(value).unwrap_or(default),
        }
    }

    /// An ARGB color in hex; `0x`, `$` and `&h` prefixes are accepted.
    pub fn get_color(&self, key: &str, default: u32) -> u32 {
        let value = match self.items.get(&key.to_ascii_lowercase()) {
            None => return default,
            Some(value) => value.trim().to_ascii_lowercase(),
        };
        let digits = value
            .trim_start_matches("0x")
            .trim_start_matches("&h")
            .trim_start_matches('$');
        u32::from_str_radix(digits, 16).unwrap_or(default)
    }

    /// The value's literal bytes, zero-padded or truncated to exactly `size` bytes. Absent
    /// keys yield `None`.
    pub fn get_bytes(&self, key: &str, size: usize) -> Option<Vec<u8>> {
        let value = self.items.get(&key.to_ascii_lowercase())?;
        let mut bytes = value.trim().as_bytes().to_vec();
        bytes.resize(size, 0);
        Some(bytes)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       ConnectionsBuilder                                       //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Builds the canonical textual form of a protocol descriptor.
///
/// Two descriptors are "the same protocol instance" for configuration-reload purposes exactly
/// when their canonical forms are equal, so this form is deterministic: keys lowercased and
/// sorted, values quoted only when they must be.
#[derive(Debug, Default)]
pub struct ConnectionsBuilder {
    options: Vec<(String, String)>,
}

fn needs_quoting(value: &str) -> bool {
    value.is_empty()
        || value
            .chars()
            .any(|c| matches!(c, ',' | '(' | ')' | '"' | '\\') || c.is_whitespace())
}

impl ConnectionsBuilder {
    pub fn new() -> ConnectionsBuilder {
        ConnectionsBuilder::default()
    }

    pub fn add_option(&mut self, key: &str, value: &str) {
        self.options
            .push((key.to_ascii_lowercase(), value.to_string()));
    }

    /// Render as `name(k=v,...)`.
    pub fn build(mut self, name: &str) -> String {
        self.options.sort();
        let mut out = String::new();
        out.push_str(&name.to_ascii_lowercase());
        out.push('(');
        for (i, (key, value)) in self.options.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(key);
            out.push('=');
            if needs_quoting(value) {
                out.push('"');
                for c in value.chars() {
                    if c == '"' || c == '\\' {
                        out.push('\\');
                    }
                    out.push(c);
                }
                out.push('"');
            } else {
                out.push_str(value);
            }
        }
        out.push(')');
        out
    }
}

/// The normalized textual description of a protocol instance: duplicate keys resolved
/// last-wins, then rendered canonically. Configuration reload preserves exactly those
/// instances whose canonical form is unchanged.
pub(crate) fn canonical_descriptor(name: &str, options: &[(String, String)]) -> String {
    let mut effective: Vec<(String, String)> = Vec::new();
    for (key, value) in options {
        effective.retain(|(k, _)| k != key);
        effective.push((key.clone(), value.clone()));
    }
    let mut builder = ConnectionsBuilder::new();
    for (key, value) in &effective {
        builder.add_option(key, value);
    }
    builder.build(name)
}

#[cfg(test)]
mod test {
    use super::*;

    // the parser scenario from the interface contract
    #[test]
    fn test_two_protocols() {
        let conns =
            parse("tcp(host=localhost,port=4228,timeout=5000),file(filename=\"./a.sil\",append=true)")
                .unwrap();
        assert_eq!(conns.len(), 2);

        assert_eq!(conns[0].name, "tcp");
        let tcp = LookupTable::from_pairs(&conns[0].options);
        assert_eq!(tcp.get_string("host", ""), "localhost");
        assert_eq!(tcp.get_integer("port", 0), 4228);
        assert_eq!(tcp.get_millis("timeout", 0), 5000);

        assert_eq!(conns[1].name, "file");
        let file = LookupTable::from_pairs(&conns[1].options);
        assert_eq!(file.get_string("filename", ""), "./a.sil");
        assert!(file.get_bool("append", false));
    }

    #[test]
    fn test_whitespace_and_case() {
        let conns = parse("  Tcp ( Host = localhost , PORT=1 )  ").unwrap();
        assert_eq!(conns[0].name, "tcp");
        let table = LookupTable::from_pairs(&conns[0].options);
        assert_eq!(table.get_string("host", ""), "localhost");
        assert_eq!(table.get_integer("port", 0), 1);
    }

    #[test]
    fn test_quoting_and_escapes() {
        let conns = parse(r#"file(filename="a,b(c).sil",caption="say \"hi\" \\ there")"#).unwrap();
        let table = LookupTable::from_pairs(&conns[0].options);
        assert_eq!(table.get_string("filename", ""), "a,b(c).sil");
        assert_eq!(table.get_string("caption", ""), r#"say "hi" \ there"#);
    }

    #[test]
    fn test_last_duplicate_wins() {
        let conns = parse("tcp(port=1,port=2)").unwrap();
        let table = LookupTable::from_pairs(&conns[0].options);
        assert_eq!(table.get_integer("port", 0), 2);
    }

    #[test]
    fn test_errors_carry_offsets() {
        match parse("tcp") {
            Err(Error::InvalidConnections {
                offset, expected, ..
            }) => {
                assert_eq!(offset, 3);
                assert_eq!(expected, "`(`");
            }
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
        match parse("tcp(host)") {
            Err(Error::InvalidConnections { expected, .. }) => assert_eq!(expected, "`=`"),
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
        match parse(r#"tcp(host="unclosed)"#) {
            Err(Error::InvalidConnections { expected, .. }) => {
                assert_eq!(expected, "closing `\"`")
            }
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
        assert!(parse("").unwrap().is_empty());
    }

    #[test]
    fn test_coercions() {
        let mut table = LookupTable::new();
        table.put("a", "64".to_string());
        table.put("b", "4kb".to_string());
        table.put("c", "2MB".to_string());
        table.put("d", "1gb".to_string());
        assert_eq!(table.get_size("a", 0), 64);
        assert_eq!(table.get_size("b", 0), 4096);
        assert_eq!(table.get_size("c", 0), 2 * 1024 * 1024);
        assert_eq!(table.get_size("d", 0), 1024 * 1024 * 1024);
        assert_eq!(table.get_size("missing", 7), 7);

        table.put("t1", "250".to_string());
        table.put("t2", "250ms".to_string());
        table.put("t3", "5s".to_string());
        table.put("t4", "2m".to_string());
        table.put("t5", "1h".to_string());
        table.put("t6", "1d".to_string());
        assert_eq!(table.get_millis("t1", 0), 250);
        assert_eq!(table.get_millis("t2", 0), 250);
        assert_eq!(table.get_millis("t3", 0), 5_000);
        assert_eq!(table.get_millis("t4", 0), 120_000);
        assert_eq!(table.get_millis("t5", 0), 3_600_000);
        assert_eq!(table.get_millis("t6", 0), 86_400_000);

        table.put("yes", "YES".to_string());
        table.put("zero", "0".to_string());
        table.put("junk", "maybe".to_string());
        assert!(table.get_bool("yes", false));
        assert!(!table.get_bool("zero", true));
        assert!(table.get_bool("junk", true));

        table.put("lvl", "Warning".to_string());
        assert_eq!(table.get_level("lvl", Level::Debug), Level::Warning);

        table.put("col", "0x00FF00FF".to_string());
        assert_eq!(table.get_color("col", 0), 0x00FF00FF);

        table.put("key", "secret".to_string());
        let key = table.get_bytes("key", 16).unwrap();
        assert_eq!(key.len(), 16);
        assert_eq!(&key[..6], b"secret");
        assert_eq!(&key[6..], &[0u8; 10]);
        table.put("long", "0123456789abcdefXYZ".to_string());
        assert_eq!(table.get_bytes("long", 16).unwrap(), b"0123456789abcdef");
    }

    #[test]
    fn test_builder_is_canonical() {
        let mut b1 = ConnectionsBuilder::new();
        b1.add_option("Port", "4228");
        b1.add_option("host", "localhost");
        let mut b2 = ConnectionsBuilder::new();
        b2.add_option("host", "localhost");
        b2.add_option("port", "4228");
        assert_eq!(b1.build("TCP"), b2.build("tcp"));

        let mut b3 = ConnectionsBuilder::new();
        b3.add_option("filename", "a b.sil");
        assert_eq!(b3.build("file"), r#"file(filename="a b.sil")"#);
    }
}
