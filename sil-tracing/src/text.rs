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

//! The text protocol: human-readable, pattern-formatted lines.
//!
//! Files open with a UTF-8 BOM and collect one CRLF-terminated line per log entry, rendered
//! through the same pattern machinery as the memory protocol's text mode (see
//! [`pattern`](crate::pattern)). Rotation -- time boundaries, `maxsize`, `maxparts` pruning --
//! behaves exactly like the binary file protocol's; there is no encryption here.

use crate::file::{
    expand_file_name, list_parts, parse_part_date, prune_parts, system_clock, Clock, FileRotate,
    FileRotater,
};
use crate::formatter::Formatter;
use crate::options::LookupTable;
use crate::packet::Packet;
use crate::pattern::{TextFormat, DEFAULT_PATTERN};
use crate::protocol::{Error, ProtocolCommand, ProtocolContext, ProtocolCore, Result};

use chrono::prelude::*;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

/// The byte-order mark opening every text log file.
pub const TEXT_HEADER_BOM: &[u8; 3] = &[0xEF, 0xBB, 0xBF];

const DEFAULT_BUFFER: usize = 0x2000;

/// The `text` protocol core.
pub struct TextCore {
    filename: String,
    append: bool,
    buffer: usize,
    rotate: FileRotate,
    max_size: u64,
    max_parts: u32,
    rotater: FileRotater,
    clock: Clock,
    base: Option<PathBuf>,
    sink: Option<BufWriter<File>>,
    formatter: TextFormat,
    file_size: u64,
    buffer_counter: usize,
}

impl TextCore {
    pub fn new() -> TextCore {
        TextCore::with_clock(system_clock())
    }

    pub(crate) fn with_clock(clock: Clock) -> TextCore {
        TextCore {
            filename: "log.txt".to_string(),
            append: false,
            buffer: 0,
            rotate: FileRotate::None,
            max_size: 0,
            max_parts: 0,
            rotater: FileRotater::new(FileRotate::None),
            clock,
            base: None,
            sink: None,
            formatter: TextFormat::new(),
            file_size: 0,
            buffer_counter: 0,
        }
    }

    fn is_rotating(&self) -> bool {
        self.rotate != FileRotate::None || self.max_size > 0
    }

    fn protocol_error(&self, message: &str) -> Error {
        Error::protocol(message, "text", &self.filename)
    }

    fn open_part(&mut self, append: bool) -> Result<()> {
        let base = match self.base.clone() {
            Some(base) => base,
            None => return Err(self.protocol_error("Log file is not open")),
        };
        let now = (self.clock)();
        let path = if self.is_rotating() {
            if append {
                list_parts(&base)
                    .pop()
                    .unwrap_or_else(|| expand_file_name(&base, now))
            } else {
                expand_file_name(&base, now)
            }
        } else {
            base.clone()
        };

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(append)
            .write(true)
            .truncate(!append)
            .open(&path)
            .map_err(|err| {
                self.protocol_error(&format!(
                    "Could not open log file \"{}\": {}",
                    path.display(),
                    err
                ))
            })?;
        self.file_size = if append {
            file.metadata().map(|m| m.len()).unwrap_or(0)
        } else {
            0
        };
        if self.file_size == 0 {
            file.write_all(TEXT_HEADER_BOM).map_err(Error::from)?;
            self.file_size = TEXT_HEADER_BOM.len() as u64;
        }
        self.buffer_counter = 0;
        let capacity = if self.buffer > 0 {
            self.buffer
        } else {
            DEFAULT_BUFFER
        };
        self.sink = Some(BufWriter::with_capacity(capacity, file));

        if self.is_rotating() {
            if self.rotate != FileRotate::None {
                let file_date = parse_part_date(&base, &path)
                    .map(|naive| Utc.from_utc_datetime(&naive))
                    .unwrap_or(now);
                self.rotater.initialize(file_date);
            }
            if self.max_parts > 0 {
                prune_parts(&base, self.max_parts);
            }
        }
        Ok(())
    }

    fn rotate_now(&mut self) -> Result<()> {
        self.close_sink()?;
        self.open_part(false)
    }

    fn close_sink(&mut self) -> Result<()> {
        if let Some(mut sink) = self.sink.take() {
            sink.flush().map_err(Error::from)?;
        }
        Ok(())
    }
}

impl std::default::Default for TextCore {
    fn default() -> Self {
        TextCore::new()
    }
}

impl ProtocolCore for TextCore {
    fn name(&self) -> &'static str {
        "text"
    }

    fn is_valid_option(&self, name: &str) -> bool {
        matches!(
            name,
            "append" | "buffer" | "filename" | "indent" | "maxsize" | "maxparts" | "pattern" | "rotate"
        )
    }

    fn load_options(&mut self, options: &LookupTable) {
        self.filename = options.get_string("filename", "log.txt");
        self.append = options.get_bool("append", false);
        self.buffer = options.get_size("buffer", 0) as usize;
        self.rotate = FileRotate::parse(&options.get_string("rotate", "none"))
            .unwrap_or(FileRotate::None);
        self.max_size = options.get_size("maxsize", 0);
        self.max_parts = if self.max_size > 0 && self.rotate == FileRotate::None {
            options.get_integer("maxparts", 2) as u32
        } else {
            options.get_integer("maxparts", 0) as u32
        };
        self.formatter
            .set_pattern(&options.get_string("pattern", DEFAULT_PATTERN));
        self.formatter.set_indent(options.get_bool("indent", false));
        self.rotater = FileRotater::new(self.rotate);
    }

    fn connect(&mut self, ctx: &ProtocolContext) -> Result<()> {
        let expanded = self
            .filename
            .replace("%appname%", &ctx.app_name())
            .replace("%machinename%", ctx.host_name());
        let base = PathBuf::from(&expanded);
        if let Some(dir) = base.parent() {
            if !dir.as_os_str().is_empty() && !dir.is_dir() {
                std::fs::create_dir_all(dir).map_err(|err| {
                    self.protocol_error(&format!("Could not create log directory: {}", err))
                })?;
            }
        }
        self.base = Some(base);
        self.open_part(self.append)
    }

    fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        let line_size = self.formatter.compile(packet) as u64;
        if line_size == 0 {
            return Ok(()); // only log entries have a text rendering
        }
        if self.rotate != FileRotate::None {
            let now = (self.clock)();
            if self.rotater.update(now) {
                self.rotate_now()?;
            }
        }
        if self.max_size > 0 {
            self.file_size += line_size;
            if self.file_size > self.max_size {
                self.rotate_now()?;
                if line_size > self.max_size {
                    return Ok(());
                }
                self.file_size += line_size;
            }
        }
        let sink = self
            .sink
            .as_mut()
            .ok_or_else(|| Error::protocol("Log file is not open", "text", ""))?;
        self.formatter.write(sink).map_err(Error::from)?;
        if self.buffer > 0 {
            self.buffer_counter += line_size as usize;
            if self.buffer_counter > self.buffer {
                self.buffer_counter = 0;
                sink.flush().map_err(Error::from)?;
            }
        } else {
            sink.flush().map_err(Error::from)?;
        }
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        self.close_sink()
    }

    fn dispatch(&mut self, command: ProtocolCommand, _ctx: &ProtocolContext) -> Result<()> {
        if let ProtocolCommand::Flush = command {
            if let Some(sink) = self.sink.as_mut() {
                sink.flush().map_err(Error::from)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::level::Level;
    use crate::packet::{LogEntry, LogEntryType, Ticks, ViewerId};
    use crate::protocol::EventSink;
    use std::sync::Arc;

    fn ctx() -> ProtocolContext {
        ProtocolContext::new("app", "host", Arc::new(EventSink::new()))
    }

    fn entry(title: &str) -> Packet {
        Packet::LogEntry(
            LogEntry::builder(LogEntryType::Message, ViewerId::Title)
                .level(Level::Message)
                .timestamp(Ticks::from_datetime(
                    Utc.with_ymd_and_hms(2023, 5, 30, 8, 15, 0).unwrap(),
                ))
                .title(title)
                .build(),
        )
    }

    fn core_with(options: &str) -> TextCore {
        let conns = crate::options::parse(&format!("text({})", options)).unwrap();
        let mut core = TextCore::new();
        core.load_options(&LookupTable::from_pairs(&conns[0].options));
        core
    }

    #[test]
    fn test_lines_with_bom_and_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        let mut core = core_with(&format!(
            "filename=\"{}\",pattern=\"%level%: %title%\"",
            path.display()
        ));
        let ctx = ctx();
        core.connect(&ctx).unwrap();
        core.write_packet(&entry("one")).unwrap();
        core.write_packet(&entry("two")).unwrap();
        // non-entries have no text form and land nowhere
        core.write_packet(&Packet::Watch(crate::packet::Watch::new(
            Level::Message,
            "w",
            "1",
            crate::packet::WatchType::Integer,
        )))
        .unwrap();
        core.disconnect().unwrap();

        let raw = std::fs::read(&path).unwrap();
        assert_eq!(&raw[..3], TEXT_HEADER_BOM);
        let text = String::from_utf8(raw[3..].to_vec()).unwrap();
        assert_eq!(text, "Message: one\r\nMessage: two\r\n");
    }

    #[test]
    fn test_size_rotation_applies() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("log.txt");
        let mut core = core_with(&format!(
            "filename=\"{}\",pattern=\"%title%\",maxsize=64,maxparts=0",
            base.display()
        ));
        let ctx = ctx();
        core.connect(&ctx).unwrap();
        for n in 0..20 {
            core.write_packet(&entry(&format!("line {:02}", n))).unwrap();
        }
        core.disconnect().unwrap();
        let parts = list_parts(&base);
        assert!(parts.len() > 1);
        let mut lines = Vec::new();
        for part in &parts {
            let raw = std::fs::read(part).unwrap();
            let text = String::from_utf8(raw[3..].to_vec()).unwrap();
            lines.extend(text.lines().map(|l| l.to_string()));
        }
        assert_eq!(lines, (0..20).map(|n| format!("line {:02}", n)).collect::<Vec<_>>());
    }
}
