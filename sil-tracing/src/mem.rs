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

//! The memory protocol: a bounded ring of recent packets, kept in RAM.
//!
//! Nothing leaves the process until asked: the newest packets (up to `maxsize` bytes, default
//! 2 MiB) are retained, oldest-out on overflow. A flush -- requested through
//! [`ProtocolCommand::FlushToWriter`], or automatically at disconnect once a writer has been
//! installed with [`ProtocolCommand::FlushOnDisconnect`] -- re-emits the retained packets as a
//! complete log stream: the binary magic plus packets, or, with `astext=true`, a BOM plus
//! pattern-formatted lines. The usual trick is "capture everything cheaply, write it somewhere
//! only when something goes wrong".

use crate::formatter::Formatter;
use crate::options::LookupTable;
use crate::packet::Packet;
use crate::pattern::{TextFormat, DEFAULT_PATTERN};
use crate::protocol::{Error, PacketQueue, ProtocolCommand, ProtocolContext, ProtocolCore, Result};
use crate::silf::{BinaryFormatter, MAGIC_PLAIN};
use crate::text::TEXT_HEADER_BOM;

use std::io::Write;
use std::sync::Arc;

const DEFAULT_MAXSIZE: u64 = 2 * 1024 * 1024;

/// The `mem` protocol core.
pub struct MemoryCore {
    max_size: u64,
    as_text: bool,
    pattern: String,
    indent: bool,
    queue: Option<PacketQueue>,
    flush_on_disconnect: Option<Box<dyn Write + Send>>,
}

impl MemoryCore {
    pub fn new() -> MemoryCore {
        MemoryCore {
            max_size: DEFAULT_MAXSIZE,
            as_text: false,
            pattern: DEFAULT_PATTERN.to_string(),
            indent: false,
            queue: None,
            flush_on_disconnect: None,
        }
    }

    fn formatter(&self) -> Box<dyn Formatter + Send> {
        if self.as_text {
            let mut formatter = TextFormat::new();
            formatter.set_pattern(&self.pattern);
            formatter.set_indent(self.indent);
            Box::new(formatter)
        } else {
            Box::new(BinaryFormatter::new())
        }
    }

    /// Drain the ring into `sink` as a complete, self-describing stream.
    fn flush_to(&mut self, sink: &mut dyn Write) -> Result<()> {
        if self.as_text {
            sink.write_all(TEXT_HEADER_BOM).map_err(Error::from)?;
        } else {
            sink.write_all(MAGIC_PLAIN).map_err(Error::from)?;
        }
        let mut formatter = self.formatter();
        if let Some(queue) = self.queue.as_mut() {
            while let Some(packet) = queue.pop() {
                formatter.format(&packet, sink).map_err(Error::from)?;
            }
        }
        sink.flush().map_err(Error::from)?;
        Ok(())
    }
}

impl std::default::Default for MemoryCore {
    fn default() -> Self {
        MemoryCore::new()
    }
}

impl ProtocolCore for MemoryCore {
    fn name(&self) -> &'static str {
        "mem"
    }

    fn is_valid_option(&self, name: &str) -> bool {
        matches!(name, "astext" | "indent" | "maxsize" | "pattern")
    }

    fn load_options(&mut self, options: &LookupTable) {
        self.max_size = options.get_size("maxsize", DEFAULT_MAXSIZE);
        self.as_text = options.get_bool("astext", false);
        self.pattern = options.get_string("pattern", DEFAULT_PATTERN);
        self.indent = options.get_bool("indent", false);
    }

    fn connect(&mut self, _ctx: &ProtocolContext) -> Result<()> {
        self.queue = Some(PacketQueue::new(self.max_size));
        Ok(())
    }

    fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        if let Some(queue) = self.queue.as_mut() {
            queue.push(Arc::new(packet.clone()));
        }
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        if let Some(mut sink) = self.flush_on_disconnect.take() {
            self.flush_to(&mut *sink)?;
        }
        self.queue = None;
        Ok(())
    }

    fn dispatch(&mut self, command: ProtocolCommand, _ctx: &ProtocolContext) -> Result<()> {
        match command {
            ProtocolCommand::Flush => Ok(()),
            ProtocolCommand::FlushToWriter(mut sink) => self.flush_to(&mut *sink),
            ProtocolCommand::FlushOnDisconnect(sink) => {
                self.flush_on_disconnect = Some(sink);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::level::Level;
    use crate::packet::{LogEntry, LogEntryType, ViewerId};
    use crate::protocol::EventSink;
    use crate::silf::PacketReader;
    use std::sync::Mutex;

    /// A `Write` the test can peek at after handing ownership away.
    #[derive(Clone)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn new() -> SharedBuf {
            SharedBuf(Arc::new(Mutex::new(Vec::new())))
        }
        fn take(&self) -> Vec<u8> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(data);
            Ok(data.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn ctx() -> ProtocolContext {
        ProtocolContext::new("app", "host", Arc::new(EventSink::new()))
    }

    fn entry(n: usize) -> Packet {
        Packet::LogEntry(
            LogEntry::builder(LogEntryType::Message, ViewerId::Title)
                .level(Level::Message)
                .title(format!("{}", n))
                .build(),
        )
    }

    #[test]
    fn test_flush_to_writer_emits_a_valid_stream() {
        let mut core = MemoryCore::new();
        let ctx = ctx();
        core.connect(&ctx).unwrap();
        for n in 0..5 {
            core.write_packet(&entry(n)).unwrap();
        }
        let buf = SharedBuf::new();
        core.dispatch(ProtocolCommand::FlushToWriter(Box::new(buf.clone())), &ctx)
            .unwrap();
        let bytes = buf.take();
        assert_eq!(&bytes[..4], MAGIC_PLAIN);
        let mut reader = PacketReader::new(&bytes[4..]);
        let mut n = 0;
        while let Some(packet) = reader.read_packet().unwrap() {
            match packet {
                Packet::LogEntry(e) => assert_eq!(e.title(), Some(format!("{}", n).as_str())),
                _ => panic!("wrong kind"),
            }
            n += 1;
        }
        assert_eq!(n, 5);
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let conns = crate::options::parse("mem(maxsize=512)").unwrap();
        let mut core = MemoryCore::new();
        core.load_options(&LookupTable::from_pairs(&conns[0].options));
        let ctx = ctx();
        core.connect(&ctx).unwrap();
        for n in 0..100 {
            core.write_packet(&entry(n)).unwrap();
        }
        let buf = SharedBuf::new();
        core.dispatch(ProtocolCommand::FlushToWriter(Box::new(buf.clone())), &ctx)
            .unwrap();
        let bytes = buf.take();
        let mut reader = PacketReader::new(&bytes[4..]);
        let mut titles: Vec<usize> = Vec::new();
        while let Some(packet) = reader.read_packet().unwrap() {
            if let Packet::LogEntry(e) = packet {
                titles.push(e.title().unwrap().parse().unwrap());
            }
        }
        assert!(!titles.is_empty() && titles.len() < 100);
        // the ring keeps the newest: a contiguous suffix
        assert_eq!(*titles.last().unwrap(), 99);
        for pair in titles.windows(2) {
            assert_eq!(pair[1], pair[0] + 1);
        }
    }

    #[test]
    fn test_flush_on_disconnect_hook() {
        let mut core = MemoryCore::new();
        let ctx = ctx();
        core.connect(&ctx).unwrap();
        core.write_packet(&entry(0)).unwrap();
        let buf = SharedBuf::new();
        core.dispatch(
            ProtocolCommand::FlushOnDisconnect(Box::new(buf.clone())),
            &ctx,
        )
        .unwrap();
        assert!(buf.take().is_empty()); // nothing until the disconnect
        core.disconnect().unwrap();
        let bytes = buf.take();
        assert_eq!(&bytes[..4], MAGIC_PLAIN);
        assert!(bytes.len() > 4);
    }

    #[test]
    fn test_astext_mode() {
        let conns = crate::options::parse("mem(astext=true,pattern=\"%title%\")").unwrap();
        let mut core = MemoryCore::new();
        core.load_options(&LookupTable::from_pairs(&conns[0].options));
        let ctx = ctx();
        core.connect(&ctx).unwrap();
        core.write_packet(&entry(7)).unwrap();
        let buf = SharedBuf::new();
        core.dispatch(ProtocolCommand::FlushToWriter(Box::new(buf.clone())), &ctx)
            .unwrap();
        let bytes = buf.take();
        assert_eq!(&bytes[..3], TEXT_HEADER_BOM);
        assert_eq!(&bytes[3..], b"7\r\n");
    }
}
