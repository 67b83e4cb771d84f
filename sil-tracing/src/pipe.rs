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

//! The pipe protocol: TCP semantics over a local duplex byte stream.
//!
//! Identical to the TCP protocol past the transport -- same banner handshake, same log-header
//! preamble, same unframed packet stream -- but connected to a Unix-domain stream socket on the
//! local machine, for viewers that sit on the same host. The `pipename` option names the
//! socket: a bare name becomes `/tmp/<name>.pipe`, an absolute path is used as given.

use crate::formatter::Formatter;
use crate::options::LookupTable;
use crate::packet::Packet;
use crate::protocol::{Error, ProtocolContext, ProtocolCore, Result};
use crate::silf::BinaryFormatter;
use crate::tcp::{client_banner, read_banner};

use std::io::Write;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;

/// The `pipe` protocol core.
pub struct PipeCore {
    pipe_name: String,
    stream: Option<UnixStream>,
    formatter: BinaryFormatter,
}

impl PipeCore {
    pub fn new() -> PipeCore {
        PipeCore {
            pipe_name: "sil".to_string(),
            stream: None,
            formatter: BinaryFormatter::new(),
        }
    }

    fn socket_path(&self) -> PathBuf {
        if self.pipe_name.starts_with('/') {
            PathBuf::from(&self.pipe_name)
        } else {
            PathBuf::from(format!("/tmp/{}.pipe", self.pipe_name))
        }
    }

    fn protocol_error(&self, message: String) -> Error {
        Error::protocol(message, "pipe", &self.pipe_name)
    }
}

impl std::default::Default for PipeCore {
    fn default() -> Self {
        PipeCore::new()
    }
}

impl ProtocolCore for PipeCore {
    fn name(&self) -> &'static str {
        "pipe"
    }

    fn is_valid_option(&self, name: &str) -> bool {
        name == "pipename"
    }

    fn load_options(&mut self, options: &LookupTable) {
        self.pipe_name = options.get_string("pipename", "sil");
    }

    fn connect(&mut self, ctx: &ProtocolContext) -> Result<()> {
        let path = self.socket_path();
        let mut stream = UnixStream::connect(&path).map_err(|err| {
            self.protocol_error(format!("Could not open pipe \"{}\": {}", path.display(), err))
        })?;
        let banner = read_banner(&mut stream)
            .map_err(|err| self.protocol_error(format!("Handshake failed: {}", err)))?;
        ctx.info(&format!("Server banner: \"{}\"", banner));
        stream
            .write_all(client_banner(self.name()).as_bytes())
            .and_then(|_| stream.flush())
            .map_err(|err| self.protocol_error(format!("Handshake failed: {}", err)))?;
        self.stream = Some(stream);
        self.write_packet(&ctx.log_header())
    }

    fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| Error::protocol("Not connected", "pipe", ""))?;
        self.formatter
            .format(packet, stream)
            .and_then(|_| stream.flush())
            .map_err(Error::from)?;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::level::Level;
    use crate::packet::{LogEntry, LogEntryType, PacketKind, ViewerId};
    use crate::protocol::EventSink;
    use crate::silf::PacketReader;
    use std::os::unix::net::UnixListener;
    use std::sync::Arc;

    #[test]
    fn test_pipe_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("viewer.pipe");
        let listener = UnixListener::bind(&path).unwrap();
        let viewer = std::thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            socket.write_all(b"SmartInspect Test Viewer v1.0\r\n").unwrap();
            let _client = read_banner(&mut socket).unwrap();
            let mut reader = PacketReader::new(socket);
            let mut packets = Vec::new();
            while let Ok(Some(packet)) = reader.read_packet() {
                packets.push(packet);
            }
            packets
        });

        let conns =
            crate::options::parse(&format!("pipe(pipename=\"{}\")", path.display())).unwrap();
        let mut core = PipeCore::new();
        core.load_options(&LookupTable::from_pairs(&conns[0].options));
        let ctx = ProtocolContext::new("app", "host", Arc::new(EventSink::new()));
        core.connect(&ctx).unwrap();
        core.write_packet(&Packet::LogEntry(
            LogEntry::builder(LogEntryType::Message, ViewerId::Title)
                .level(Level::Message)
                .title("over the pipe")
                .build(),
        ))
        .unwrap();
        core.disconnect().unwrap();

        let packets = viewer.join().unwrap();
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].kind(), PacketKind::LogHeader);
        match &packets[1] {
            Packet::LogEntry(e) => assert_eq!(e.title(), Some("over the pipe")),
            _ => panic!("wrong kind"),
        }
    }

    #[test]
    fn test_missing_pipe_is_an_error() {
        let mut core = PipeCore::new();
        let mut table = LookupTable::new();
        table.put("pipename", "/nonexistent/nowhere.pipe".to_string());
        core.load_options(&table);
        let ctx = ProtocolContext::new("app", "host", Arc::new(EventSink::new()));
        assert!(core.connect(&ctx).is_err());
    }
}
