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

//! The TCP protocol: a live connection to a viewer.
//!
//! On connect, the server identifies itself with a banner line terminated by `\n`; the banner
//! is surfaced through the owner's info event and answered with a client banner. The protocol
//! then sends a log-header packet identifying the producer and streams packets as their plain
//! binary encoding -- the in-band `size` field is the only framing, and the server sends
//! nothing further during normal operation. Any I/O failure drops the connection; with
//! `reconnect=true` a later write will retry, subject to the reconnect interval.

use crate::formatter::Formatter;
use crate::options::LookupTable;
use crate::packet::Packet;
use crate::protocol::{Error, ProtocolContext, ProtocolCore, Result};
use crate::silf::BinaryFormatter;

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Longest banner line we'll accept before deciding the peer is not a viewer.
const MAX_BANNER: usize = 0x400;

/// Read the peer's banner: bytes up to and including `\n`.
pub(crate) fn read_banner<R: Read>(reader: &mut R) -> std::io::Result<String> {
    let mut banner = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = reader.read(&mut byte)?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "Connection closed before the server banner arrived",
            ));
        }
        if byte[0] == b'\n' {
            break;
        }
        banner.push(byte[0]);
        if banner.len() > MAX_BANNER {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "Server banner exceeds any plausible length",
            ));
        }
    }
    Ok(String::from_utf8_lossy(&banner).trim_end_matches('\r').to_string())
}

/// The line we answer a banner with.
pub(crate) fn client_banner(protocol: &str) -> String {
    format!(
        "sil-tracing v{} ({})\r\n",
        env!("CARGO_PKG_VERSION"),
        protocol
    )
}

/// The `tcp` protocol core.
pub struct TcpCore {
    host: String,
    port: u16,
    timeout: Duration,
    stream: Option<TcpStream>,
    formatter: BinaryFormatter,
}

impl TcpCore {
    pub fn new() -> TcpCore {
        TcpCore {
            host: "127.0.0.1".to_string(),
            port: 4228,
            timeout: Duration::from_millis(30_000),
            stream: None,
            formatter: BinaryFormatter::new(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn protocol_error(&self, message: String) -> Error {
        Error::protocol(message, "tcp", &self.endpoint())
    }
}

impl std::default::Default for TcpCore {
    fn default() -> Self {
        TcpCore::new()
    }
}

impl ProtocolCore for TcpCore {
    fn name(&self) -> &'static str {
        "tcp"
    }

    fn is_valid_option(&self, name: &str) -> bool {
        matches!(name, "host" | "port" | "timeout")
    }

    fn load_options(&mut self, options: &LookupTable) {
        self.host = options.get_string("host", "127.0.0.1");
        self.port = options.get_integer("port", 4228) as u16;
        self.timeout = Duration::from_millis(options.get_millis("timeout", 30_000));
    }

    fn connect(&mut self, ctx: &ProtocolContext) -> Result<()> {
        let mut addrs = self
            .endpoint()
            .to_socket_addrs()
            .map_err(|err| self.protocol_error(format!("Could not resolve host: {}", err)))?;
        let addr = addrs
            .next()
            .ok_or_else(|| self.protocol_error("Host resolved to no addresses".to_string()))?;
        let mut stream = TcpStream::connect_timeout(&addr, self.timeout)
            .map_err(|err| self.protocol_error(format!("Could not connect: {}", err)))?;
        stream
            .set_read_timeout(Some(self.timeout))
            .and_then(|_| stream.set_write_timeout(Some(self.timeout)))
            .map_err(Error::from)?;

        let banner = read_banner(&mut stream)
            .map_err(|err| self.protocol_error(format!("Handshake failed: {}", err)))?;
        ctx.info(&format!("Server banner: \"{}\"", banner));
        stream
            .write_all(client_banner(self.name()).as_bytes())
            .and_then(|_| stream.flush())
            .map_err(|err| self.protocol_error(format!("Handshake failed: {}", err)))?;
        self.stream = Some(stream);

        // identify the producer before any application packets
        self.write_packet(&ctx.log_header())
    }

    fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| Error::protocol("Not connected", "tcp", ""))?;
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
    use std::net::TcpListener;
    use std::sync::{Arc, Mutex};

    /// A minimal viewer: accept, send a banner, read the client banner, collect packets.
    fn spawn_viewer() -> (u16, std::thread::JoinHandle<Vec<Packet>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = std::thread::spawn(move || {
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
        (port, handle)
    }

    #[test]
    fn test_handshake_and_stream() {
        let (port, viewer) = spawn_viewer();
        let conns = crate::options::parse(&format!("tcp(host=127.0.0.1,port={})", port)).unwrap();
        let mut core = TcpCore::new();
        core.load_options(&LookupTable::from_pairs(&conns[0].options));

        let banner_seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let events = Arc::new(EventSink::new());
        let sink = Arc::clone(&banner_seen);
        events.set_info_handler(move |message| sink.lock().unwrap().push(message.to_string()));
        let ctx = ProtocolContext::new("app", "host", events);

        core.connect(&ctx).unwrap();
        for n in 0..3 {
            core.write_packet(&Packet::LogEntry(
                LogEntry::builder(LogEntryType::Message, ViewerId::Title)
                    .level(Level::Message)
                    .title(format!("{}", n))
                    .build(),
            ))
            .unwrap();
        }
        core.disconnect().unwrap();

        let packets = viewer.join().unwrap();
        // the banner reached the info event
        assert!(banner_seen
            .lock()
            .unwrap()
            .iter()
            .any(|m| m.contains("SmartInspect Test Viewer")));
        // a log header leads, then the entries, framed purely by the size field
        assert_eq!(packets.len(), 4);
        assert_eq!(packets[0].kind(), PacketKind::LogHeader);
        for (n, packet) in packets[1..].iter().enumerate() {
            match packet {
                Packet::LogEntry(e) => assert_eq!(e.title(), Some(format!("{}", n).as_str())),
                _ => panic!("wrong kind"),
            }
        }
    }

    #[test]
    fn test_connect_refused_is_an_error() {
        // a port nothing listens on; bind-then-drop reserves one
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let conns =
            crate::options::parse(&format!("tcp(host=127.0.0.1,port={},timeout=1s)", port)).unwrap();
        let mut core = TcpCore::new();
        core.load_options(&LookupTable::from_pairs(&conns[0].options));
        let ctx = ProtocolContext::new("app", "host", Arc::new(EventSink::new()));
        assert!(core.connect(&ctx).is_err());
    }
}
