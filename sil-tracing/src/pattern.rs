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

//! Pattern-based text rendering.
//!
//! The text protocol (and the memory protocol in `astext` mode) renders log entries through a
//! pattern string such as the default
//!
//! ```text
//! [%timestamp%] %level%: %title%
//! ```
//!
//! Recognized variables: `%appname%`, `%session%`, `%hostname%`, `%title%`, `%timestamp%`,
//! `%level%`, `%color%`, `%logentrytype%`, `%viewerid%`, `%thread%`, `%process%`. A variable
//! may carry a width (`%level,8%`: right-align; negative widths left-align) and `%timestamp%`
//! accepts a [`chrono` format string] as `%timestamp{%H:%M:%S}%`. Anything that isn't a
//! recognized variable passes through literally. With `indent` enabled, the `%title%` column
//! shifts right by three spaces per unmatched enter-method entry.
//!
//! [`chrono` format string]: https://docs.rs/chrono/latest/chrono/format/strftime/index.html

use crate::formatter::Formatter;
use crate::packet::{LogEntry, LogEntryType, Packet, Ticks};

use std::io::Write;

/// The pattern the text protocol uses when none is configured.
pub const DEFAULT_PATTERN: &str = "[%timestamp%] %level%: %title%";

const INDENT_SPACES: &str = "   ";

#[derive(Clone, Debug, PartialEq, Eq)]
enum TokenKind {
    AppName,
    Session,
    HostName,
    Title,
    Timestamp,
    Level,
    Color,
    LogEntryType,
    ViewerId,
    Thread,
    Process,
    Literal,
}

#[derive(Clone, Debug)]
struct Token {
    kind: TokenKind,
    /// The literal text (for `Literal`) or the original variable spelling.
    value: String,
    /// The `{...}` argument, if any.
    options: String,
    /// Positive: right-align to this width; negative: left-align.
    width: i32,
}

impl Token {
    fn literal(value: &str) -> Token {
        Token {
            kind: TokenKind::Literal,
            value: value.to_string(),
            options: String::new(),
            width: 0,
        }
    }

    /// Only the title column participates in indentation.
    fn indents(&self) -> bool {
        self.kind == TokenKind::Title
    }

    fn expand(&self, entry: &LogEntry) -> String {
        match self.kind {
            TokenKind::AppName => entry.app_name().unwrap_or("").to_string(),
            TokenKind::Session => entry.session_name().unwrap_or("").to_string(),
            TokenKind::HostName => entry.hostname().unwrap_or("").to_string(),
            TokenKind::Title => entry.title().unwrap_or("").to_string(),
            TokenKind::Timestamp => format_timestamp(entry.timestamp(), &self.options),
            TokenKind::Level => format!("{}", entry.level()),
            TokenKind::Color => {
                if entry.color().is_transparent() {
                    "<default>".to_string()
                } else {
                    format!("{}", entry.color())
                }
            }
            TokenKind::LogEntryType => format!("{}", entry.log_entry_type()),
            TokenKind::ViewerId => format!("{}", entry.viewer_id()),
            TokenKind::Thread => format!("{}", entry.thread_id()),
            TokenKind::Process => format!("{}", entry.process_id()),
            TokenKind::Literal => self.value.clone(),
        }
    }
}

fn format_timestamp(timestamp: Ticks, spec: &str) -> String {
    let when = timestamp.to_datetime();
    if !spec.is_empty() {
        // an invalid user-supplied format yields a fmt error, not a panic; fall through
        let mut out = String::new();
        use std::fmt::Write as _;
        if write!(out, "{}", when.format(spec)).is_ok() {
            return out;
        }
    }
    format!("{}", when.format("%Y-%m-%d %H:%M:%S%.6f"))
}

/// Parse a `%name,width{options}%` variable (the `%`s included in `text`); a spelling that
/// isn't a known variable comes back as a literal.
fn parse_variable(text: &str) -> Token {
    let mut inner = &text[1..text.len() - 1];
    let mut options = String::new();
    if let Some(open) = inner.find('{') {
        if inner.ends_with('}') {
            options = inner[open + 1..inner.len() - 1].to_string();
            inner = &inner[..open];
        }
    }
    let mut width = 0;
    let name = match inner.find(',') {
        Some(comma) => {
            width = inner[comma + 1..].trim().parse().unwrap_or(0);
            &inner[..comma]
        }
        None => inner,
    };
    let kind = match name.to_ascii_lowercase().as_str() {
        "appname" => TokenKind::AppName,
        "session" => TokenKind::Session,
        "hostname" => TokenKind::HostName,
        "title" => TokenKind::Title,
        "timestamp" => TokenKind::Timestamp,
        "level" => TokenKind::Level,
        "color" => TokenKind::Color,
        "logentrytype" => TokenKind::LogEntryType,
        "viewerid" => TokenKind::ViewerId,
        "thread" => TokenKind::Thread,
        "process" => TokenKind::Process,
        _ => return Token::literal(text),
    };
    Token {
        kind,
        value: text.to_string(),
        options,
        width,
    }
}

/// A compiled pattern plus the indentation state it carries across entries.
pub struct PatternParser {
    pattern: String,
    tokens: Vec<Token>,
    indent: bool,
    indent_level: usize,
}

impl PatternParser {
    pub fn new() -> PatternParser {
        let mut parser = PatternParser {
            pattern: String::new(),
            tokens: Vec::new(),
            indent: false,
            indent_level: 0,
        };
        parser.set_pattern(DEFAULT_PATTERN);
        parser
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn set_pattern(&mut self, pattern: &str) {
        self.pattern = pattern.trim().to_string();
        self.indent_level = 0;
        self.tokens.clear();
        let mut rest = self.pattern.as_str();
        while !rest.is_empty() {
            if let Some(stripped) = rest.strip_prefix('%') {
                // find the closing '%', skipping a brace-delimited argument whose contents may
                // themselves contain '%' (chrono format specifiers)
                let bytes = stripped.as_bytes();
                let mut i = 0;
                let mut close = None;
                while i < bytes.len() {
                    match bytes[i] {
                        b'{' => match stripped[i..].find('}') {
                            Some(j) => i += j + 1,
                            None => i = bytes.len(),
                        },
                        b'%' => {
                            close = Some(i);
                            break;
                        }
                        _ => i += 1,
                    }
                }
                match close {
                    Some(close) => {
                        let var = &rest[..close + 2];
                        self.tokens.push(parse_variable(var));
                        rest = &rest[close + 2..];
                    }
                    None => {
                        self.tokens.push(Token::literal(rest));
                        break;
                    }
                }
            } else {
                let next = rest.find('%').unwrap_or(rest.len());
                self.tokens.push(Token::literal(&rest[..next]));
                rest = &rest[next..];
            }
        }
    }

    pub fn indent(&self) -> bool {
        self.indent
    }

    pub fn set_indent(&mut self, indent: bool) {
        self.indent = indent;
    }

    /// Render one entry through the pattern.
    pub fn expand(&mut self, entry: &LogEntry) -> String {
        if self.tokens.is_empty() {
            return String::new();
        }
        if entry.log_entry_type() == LogEntryType::LeaveMethod && self.indent_level > 0 {
            self.indent_level -= 1;
        }
        let mut line = String::new();
        for token in &self.tokens {
            if self.indent && token.indents() {
                for _ in 0..self.indent_level {
                    line.push_str(INDENT_SPACES);
                }
            }
            let expanded = token.expand(entry);
            let width = token.width;
            if width < 0 {
                line.push_str(&expanded);
                for _ in expanded.chars().count()..(-width) as usize {
                    line.push(' ');
                }
            } else if width > 0 {
                for _ in expanded.chars().count()..width as usize {
                    line.push(' ');
                }
                line.push_str(&expanded);
            } else {
                line.push_str(&expanded);
            }
        }
        if entry.log_entry_type() == LogEntryType::EnterMethod {
            self.indent_level += 1;
        }
        line
    }
}

impl std::default::Default for PatternParser {
    fn default() -> Self {
        PatternParser::new()
    }
}

/// The text [`Formatter`]: log entries become pattern-rendered CRLF lines; every other packet
/// kind has no text representation and is skipped.
pub struct TextFormat {
    parser: PatternParser,
    line: Option<Vec<u8>>,
}

impl TextFormat {
    pub fn new() -> TextFormat {
        TextFormat {
            parser: PatternParser::new(),
            line: None,
        }
    }

    pub fn set_pattern(&mut self, pattern: &str) {
        self.parser.set_pattern(pattern);
    }

    pub fn set_indent(&mut self, indent: bool) {
        self.parser.set_indent(indent);
    }
}

impl std::default::Default for TextFormat {
    fn default() -> Self {
        TextFormat::new()
    }
}

impl Formatter for TextFormat {
    fn compile(&mut self, packet: &Packet) -> usize {
        match packet {
            Packet::LogEntry(entry) => {
                let mut line = self.parser.expand(entry).into_bytes();
                line.extend_from_slice(b"\r\n");
                let len = line.len();
                self.line = Some(line);
                len
            }
            _ => {
                self.line = None;
                0
            }
        }
    }

    fn write(&mut self, sink: &mut dyn Write) -> std::io::Result<()> {
        if let Some(line) = &self.line {
            sink.write_all(line)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::level::Level;
    use crate::packet::{Color, ViewerId};

    fn entry(title: &str, entry_type: LogEntryType) -> LogEntry {
        LogEntry::builder(entry_type, ViewerId::Title)
            .level(Level::Message)
            .timestamp(Ticks::from_datetime(
                chrono::Utc.with_ymd_and_hms(2023, 5, 30, 12, 0, 0).unwrap(),
            ))
            .title(title)
            .session_name("Main")
            .app_name("demo")
            .build()
    }

    use chrono::TimeZone;

    #[test]
    fn test_default_pattern() {
        let mut parser = PatternParser::new();
        assert_eq!(
            parser.expand(&entry("hello", LogEntryType::Message)),
            "[2023-05-30 12:00:00.000000] Message: hello"
        );
    }

    #[test]
    fn test_custom_variables_and_width() {
        let mut parser = PatternParser::new();
        parser.set_pattern("%level,8%|%session%|%appname%|%title,-10%|");
        assert_eq!(
            parser.expand(&entry("hi", LogEntryType::Message)),
            " Message|Main|demo|hi        |"
        );
    }

    #[test]
    fn test_timestamp_options() {
        let mut parser = PatternParser::new();
        parser.set_pattern("%timestamp{%H:%M:%S}% %title%");
        assert_eq!(
            parser.expand(&entry("x", LogEntryType::Message)),
            "12:00:00 x"
        );
    }

    #[test]
    fn test_unknown_variable_is_literal() {
        let mut parser = PatternParser::new();
        parser.set_pattern("%nope% %title%");
        assert_eq!(parser.expand(&entry("t", LogEntryType::Message)), "%nope% t");
    }

    #[test]
    fn test_indentation_tracks_method_nesting() {
        let mut parser = PatternParser::new();
        parser.set_pattern("%title%");
        parser.set_indent(true);
        assert_eq!(parser.expand(&entry("outer", LogEntryType::EnterMethod)), "outer");
        assert_eq!(parser.expand(&entry("inside", LogEntryType::Message)), "   inside");
        assert_eq!(parser.expand(&entry("outer", LogEntryType::LeaveMethod)), "outer");
        assert_eq!(parser.expand(&entry("after", LogEntryType::Message)), "after");
    }

    #[test]
    fn test_color_token() {
        let mut parser = PatternParser::new();
        parser.set_pattern("%color%");
        assert_eq!(parser.expand(&entry("x", LogEntryType::Message)), "<default>");
        let colored = LogEntry::builder(LogEntryType::Message, ViewerId::Title)
            .color(Color(0xFF00FF00))
            .build();
        assert_eq!(parser.expand(&colored), "0xFF00FF00");
    }

    #[test]
    fn test_formatter_skips_non_entries() {
        let mut formatter = TextFormat::new();
        let watch = Packet::Watch(crate::packet::Watch::new(
            Level::Message,
            "w",
            "1",
            crate::packet::WatchType::Integer,
        ));
        assert_eq!(formatter.compile(&watch), 0);
        let mut out = Vec::new();
        formatter.write(&mut out).unwrap();
        assert!(out.is_empty());
        assert!(formatter.compile(&entry("x", LogEntryType::Message).into()) > 0);
    }
}
