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

//! The `.sil` binary packet format
//! ===============================
//!
//! # Introduction
//!
//! Every packet is emitted as a single contiguous byte sequence:
//!
//! ```text
//! +---------------+-------------------+--------------------------------------+
//! | kind (u16 LE) | size (u32 LE)     | kind-specific body (size - 6 bytes)  |
//! +---------------+-------------------+--------------------------------------+
//! ```
//!
//! `size` counts the entire packet *including* the six-byte prefix, so a receiver can partition
//! a stream into packets using nothing but this field. The body is a fixed header (scalars,
//! little-endian) followed by the four-byte lengths of each variable field and then the field
//! bytes themselves, in the same order as their lengths. A length of `0xFFFFFFFF` means the
//! field is *absent*, which is distinct from a zero-length (empty) field.
//!
//! # Discussion
//!
//! Strings are UTF-8 without BOM. Decoding accepts any well-formed packet; tag values this
//! build doesn't recognize inside a known packet kind are preserved opaquely (see the `Other`
//! enum variants in [`packet`](crate::packet)), so `decode(encode(p)) == p` holds even across
//! format revisions.

use crate::{
    formatter::Formatter,
    packet::{
        ControlCommand, ControlCommandType, LogEntry, LogEntryType, LogHeader, Packet, PacketKind,
        ProcessFlow, ProcessFlowType, Ticks, ViewerId, Watch, WatchType,
    },
};

use backtrace::Backtrace;
use bytes::BufMut;

use std::io::{Read, Write};

/// Magic bytes opening an unencrypted log file.
pub const MAGIC_PLAIN: &[u8; 4] = b"SILF";
/// Magic bytes opening an encrypted log file; followed by a 16-byte IV, then ciphertext.
pub const MAGIC_ENCRYPTED: &[u8; 4] = b"SILE";

/// Bytes in the kind + size prefix.
pub const PACKET_HEADER_SIZE: usize = 6;

/// The wire encoding of an absent variable-length field.
const ABSENT: u32 = 0xFFFF_FFFF;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// module error type
#[non_exhaustive]
pub enum Error {
    /// The input ended in the middle of a packet
    Truncated {
        back: Backtrace,
    },
    /// The two-byte kind tag names no known packet kind
    UnknownKind {
        tag: u16,
        back: Backtrace,
    },
    /// The declared packet size is smaller than its own prefix, or disagrees with the body
    BadSize {
        size: u32,
        back: Backtrace,
    },
    /// A string field held invalid UTF-8
    BadUtf8 {
        source: std::string::FromUtf8Error,
        back: Backtrace,
    },
    Io {
        source: std::io::Error,
        back: Backtrace,
    },
}

impl std::convert::From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io {
            source: err,
            back: Backtrace::new(),
        }
    }
}

impl std::convert::From<std::string::FromUtf8Error> for Error {
    fn from(err: std::string::FromUtf8Error) -> Self {
        Error::BadUtf8 {
            source: err,
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
            Error::Truncated { .. } => write!(f, "Input ended in the middle of a packet"),
            Error::UnknownKind { tag, .. } => write!(f, "Unknown packet kind tag {}", tag),
            Error::BadSize { size, .. } => write!(f, "Implausible packet size {}", size),
            Error::BadUtf8 { source, .. } => write!(f, "Invalid UTF-8 in packet field: {}", source),
            Error::Io { source, .. } => write!(f, "I/O error: {}", source),
            _ => write!(f, "packet format error"),
        }
    }
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Truncated { back } => write!(f, "{}\n{:#?}", self, back),
            Error::UnknownKind { back, .. } => write!(f, "{}\n{:#?}", self, back),
            Error::BadSize { back, .. } => write!(f, "{}\n{:#?}", self, back),
            Error::BadUtf8 { back, .. } => write!(f, "{}\n{:#?}", self, back),
            Error::Io { back, .. } => write!(f, "{}\n{:#?}", self, back),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         encoded sizes                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

fn var_size(field: Option<usize>) -> usize {
    4 + field.unwrap_or(0)
}

impl Packet {
    /// The exact number of bytes [`encode`] produces for this packet, including the six-byte
    /// prefix. This figure is also the unit of queue accounting in the scheduler and the
    /// backlog ring.
    pub fn size(&self) -> u32 {
        let body = match self {
            Packet::LogEntry(p) => {
                28 + var_size(p.title.as_ref().map(|s| s.len()))
                    + var_size(p.session_name.as_ref().map(|s| s.len()))
                    + var_size(p.app_name.as_ref().map(|s| s.len()))
                    + var_size(p.hostname.as_ref().map(|s| s.len()))
                    + var_size(p.data.as_ref().map(|d| d.len()))
            }
            Packet::Watch(p) => {
                12 + var_size(p.name.as_ref().map(|s| s.len()))
                    + var_size(p.value.as_ref().map(|s| s.len()))
            }
            Packet::ControlCommand(p) => 4 + var_size(p.data.as_ref().map(|d| d.len())),
            Packet::ProcessFlow(p) => {
                20 + var_size(p.title.as_ref().map(|s| s.len()))
                    + var_size(p.hostname.as_ref().map(|s| s.len()))
            }
            Packet::LogHeader(p) => var_size(p.content.as_ref().map(|s| s.len())),
        };
        (PACKET_HEADER_SIZE + body) as u32
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            encoding                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

fn put_len(buf: &mut Vec<u8>, field: Option<usize>) {
    match field {
        Some(n) => buf.put_u32_le(n as u32),
        None => buf.put_u32_le(ABSENT),
    }
}

fn put_str(buf: &mut Vec<u8>, field: &Option<String>) {
    if let Some(s) = field {
        buf.put_slice(s.as_bytes());
    }
}

fn put_bytes(buf: &mut Vec<u8>, field: &Option<Vec<u8>>) {
    if let Some(d) = field {
        buf.put_slice(d);
    }
}

fn encode_body(packet: &Packet, buf: &mut Vec<u8>) {
    match packet {
        Packet::LogEntry(p) => {
            buf.put_u32_le(p.log_entry_type.value() as u32);
            buf.put_u32_le(p.viewer_id.value() as u32);
            buf.put_u32_le(p.color.value());
            buf.put_u64_le(p.timestamp.0);
            buf.put_u32_le(p.process_id);
            buf.put_u32_le(p.thread_id);
            put_len(buf, p.title.as_ref().map(|s| s.len()));
            put_len(buf, p.session_name.as_ref().map(|s| s.len()));
            put_len(buf, p.app_name.as_ref().map(|s| s.len()));
            put_len(buf, p.hostname.as_ref().map(|s| s.len()));
            put_len(buf, p.data.as_ref().map(|d| d.len()));
            put_str(buf, &p.title);
            put_str(buf, &p.session_name);
            put_str(buf, &p.app_name);
            put_str(buf, &p.hostname);
            put_bytes(buf, &p.data);
        }
        Packet::Watch(p) => {
            buf.put_u32_le(p.watch_type.value() as u32);
            buf.put_u64_le(p.timestamp.0);
            put_len(buf, p.name.as_ref().map(|s| s.len()));
            put_len(buf, p.value.as_ref().map(|s| s.len()));
            put_str(buf, &p.name);
            put_str(buf, &p.value);
        }
        Packet::ControlCommand(p) => {
            buf.put_u32_le(p.control_command_type.value() as u32);
            put_len(buf, p.data.as_ref().map(|d| d.len()));
            put_bytes(buf, &p.data);
        }
        Packet::ProcessFlow(p) => {
            buf.put_u32_le(p.process_flow_type.value() as u32);
            buf.put_u64_le(p.timestamp.0);
            buf.put_u32_le(p.process_id);
            buf.put_u32_le(p.thread_id);
            put_len(buf, p.title.as_ref().map(|s| s.len()));
            put_len(buf, p.hostname.as_ref().map(|s| s.len()));
            put_str(buf, &p.title);
            put_str(buf, &p.hostname);
        }
        Packet::LogHeader(p) => {
            put_len(buf, p.content.as_ref().map(|s| s.len()));
            put_str(buf, &p.content);
        }
    }
}

/// Encode one packet to its full wire representation.
pub fn encode(packet: &Packet) -> Vec<u8> {
    let size = packet.size();
    let mut buf = Vec::with_capacity(size as usize);
    buf.put_u16_le(packet.kind().tag());
    buf.put_u32_le(size);
    encode_body(packet, &mut buf);
    debug_assert_eq!(buf.len(), size as usize);
    buf
}

/// The standard binary [`Formatter`].
///
/// Re-uses its internal buffer across packets; a very large packet will shrink the buffer back
/// after it has been written so memory can be reclaimed.
pub struct BinaryFormatter {
    buf: Vec<u8>,
}

const MAX_RETAINED_CAPACITY: usize = 10 * 1024 * 1024;

impl BinaryFormatter {
    pub fn new() -> BinaryFormatter {
        BinaryFormatter { buf: Vec::new() }
    }
}

impl std::default::Default for BinaryFormatter {
    fn default() -> Self {
        BinaryFormatter::new()
    }
}

impl Formatter for BinaryFormatter {
    fn compile(&mut self, packet: &Packet) -> usize {
        if self.buf.capacity() > MAX_RETAINED_CAPACITY {
            self.buf = Vec::new();
        } else {
            self.buf.clear();
        }
        self.buf.put_u16_le(packet.kind().tag());
        self.buf.put_u32_le(packet.size());
        encode_body(packet, &mut self.buf);
        self.buf.len()
    }

    fn write(&mut self, sink: &mut dyn Write) -> std::io::Result<()> {
        sink.write_all(&self.buf)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            decoding                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A checked little-endian reader over a packet body.
struct Body<'a> {
    buf: &'a [u8],
}

impl<'a> Body<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() < n {
            return Err(Error::Truncated {
                back: Backtrace::new(),
            });
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }
    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
    fn i32(&mut self) -> Result<i32> {
        Ok(self.u32()? as i32)
    }
    fn u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }
    /// Read a variable-field length: `None` for the absent marker.
    fn len(&mut self) -> Result<Option<usize>> {
        let raw = self.u32()?;
        if raw == ABSENT {
            Ok(None)
        } else {
            Ok(Some(raw as usize))
        }
    }
    fn string(&mut self, len: Option<usize>) -> Result<Option<String>> {
        match len {
            None => Ok(None),
            Some(n) => Ok(Some(String::from_utf8(self.take(n)?.to_vec())?)),
        }
    }
    fn bytes(&mut self, len: Option<usize>) -> Result<Option<Vec<u8>>> {
        match len {
            None => Ok(None),
            Some(n) => Ok(Some(self.take(n)?.to_vec())),
        }
    }
}

fn decode_body(kind: PacketKind, body: &[u8]) -> Result<Packet> {
    let mut b = Body { buf: body };
    let packet = match kind {
        PacketKind::LogEntry => {
            let log_entry_type = LogEntryType::from_value(b.i32()?);
            let viewer_id = ViewerId::from_value(b.i32()?);
            let color = crate::packet::Color(b.u32()?);
            let timestamp = Ticks(b.u64()?);
            let process_id = b.u32()?;
            let thread_id = b.u32()?;
            let title_len = b.len()?;
            let session_len = b.len()?;
            let appname_len = b.len()?;
            let hostname_len = b.len()?;
            let data_len = b.len()?;
            Packet::LogEntry(LogEntry {
                // decoded packets do not carry a level on the wire; viewers treat the
                // entry type as authoritative
                level: crate::level::Level::Message,
                log_entry_type,
                viewer_id,
                color,
                timestamp,
                process_id,
                thread_id,
                title: b.string(title_len)?,
                session_name: b.string(session_len)?,
                app_name: b.string(appname_len)?,
                hostname: b.string(hostname_len)?,
                data: b.bytes(data_len)?,
            })
        }
        PacketKind::Watch => {
            let watch_type = WatchType::from_value(b.i32()?);
            let timestamp = Ticks(b.u64()?);
            let name_len = b.len()?;
            let value_len = b.len()?;
            Packet::Watch(Watch {
                level: crate::level::Level::Message,
                watch_type,
                timestamp,
                name: b.string(name_len)?,
                value: b.string(value_len)?,
            })
        }
        PacketKind::ControlCommand => {
            let control_command_type = ControlCommandType::from_value(b.i32()?);
            let data_len = b.len()?;
            Packet::ControlCommand(ControlCommand {
                control_command_type,
                data: b.bytes(data_len)?,
            })
        }
        PacketKind::ProcessFlow => {
            let process_flow_type = ProcessFlowType::from_value(b.i32()?);
            let timestamp = Ticks(b.u64()?);
            let process_id = b.u32()?;
            let thread_id = b.u32()?;
            let title_len = b.len()?;
            let hostname_len = b.len()?;
            Packet::ProcessFlow(ProcessFlow {
                level: crate::level::Level::Message,
                process_flow_type,
                timestamp,
                process_id,
                thread_id,
                title: b.string(title_len)?,
                hostname: b.string(hostname_len)?,
            })
        }
        PacketKind::LogHeader => {
            let content_len = b.len()?;
            Packet::LogHeader(LogHeader {
                content: b.string(content_len)?,
            })
        }
    };
    Ok(packet)
}

/// Decode one packet from the head of `input`, returning it and the number of bytes consumed.
pub fn decode(input: &[u8]) -> Result<(Packet, usize)> {
    if input.len() < PACKET_HEADER_SIZE {
        return Err(Error::Truncated {
            back: Backtrace::new(),
        });
    }
    let tag = u16::from_le_bytes([input[0], input[1]]);
    let kind = PacketKind::from_tag(tag).ok_or_else(|| Error::UnknownKind {
        tag,
        back: Backtrace::new(),
    })?;
    let size = u32::from_le_bytes([input[2], input[3], input[4], input[5]]) as usize;
    if size < PACKET_HEADER_SIZE {
        return Err(Error::BadSize {
            size: size as u32,
            back: Backtrace::new(),
        });
    }
    if input.len() < size {
        return Err(Error::Truncated {
            back: Backtrace::new(),
        });
    }
    let packet = decode_body(kind, &input[PACKET_HEADER_SIZE..size])?;
    Ok((packet, size))
}

/// Incrementally decode a packet stream, e.g. a `.sil` file after its magic.
pub struct PacketReader<R: Read> {
    source: R,
}

impl<R: Read> PacketReader<R> {
    pub fn new(source: R) -> PacketReader<R> {
        PacketReader { source }
    }

    /// Read the next packet; `None` on clean end-of-stream (i.e. EOF on a packet boundary).
    pub fn read_packet(&mut self) -> Result<Option<Packet>> {
        let mut header = [0u8; PACKET_HEADER_SIZE];
        let mut got = 0;
        while got < header.len() {
            match self.source.read(&mut header[got..])? {
                0 if got == 0 => return Ok(None),
                0 => {
                    return Err(Error::Truncated {
                        back: Backtrace::new(),
                    })
                }
                n => got += n,
            }
        }
        let tag = u16::from_le_bytes([header[0], header[1]]);
        let kind = PacketKind::from_tag(tag).ok_or_else(|| Error::UnknownKind {
            tag,
            back: Backtrace::new(),
        })?;
        let size = u32::from_le_bytes([header[2], header[3], header[4], header[5]]) as usize;
        if size < PACKET_HEADER_SIZE {
            return Err(Error::BadSize {
                size: size as u32,
                back: Backtrace::new(),
            });
        }
        let mut body = vec![0u8; size - PACKET_HEADER_SIZE];
        self.source.read_exact(&mut body).map_err(|err| {
            if err.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::Truncated {
                    back: Backtrace::new(),
                }
            } else {
                Error::from(err)
            }
        })?;
        Ok(Some(decode_body(kind, &body)?))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::level::Level;
    use crate::packet::Color;

    fn sample_log_entry() -> LogEntry {
        LogEntry::builder(LogEntryType::Message, ViewerId::Title)
            .level(Level::Message)
            .color(Color(0x00FFFFFF))
            .timestamp(Ticks(0x08D96A1234567890))
            .process_id(1)
            .thread_id(2)
            .title("hi")
            .session_name("Main")
            .app_name("App")
            .hostname("H")
            .data(Vec::new())
            .build()
    }

    #[test]
    fn test_log_entry_layout() {
        let bytes = encode(&sample_log_entry().into());
        // kind tag
        assert_eq!(&bytes[0..2], &[0x04, 0x00]);
        // total size, including the 6-byte prefix
        assert_eq!(bytes.len(), 64);
        assert_eq!(&bytes[2..6], &64u32.to_le_bytes());
        // fixed header
        assert_eq!(&bytes[6..10], &100u32.to_le_bytes()); // Message entry type
        assert_eq!(&bytes[10..14], &0u32.to_le_bytes()); // Title viewer
        assert_eq!(&bytes[14..18], &0x00FFFFFFu32.to_le_bytes());
        assert_eq!(&bytes[18..26], &0x08D96A1234567890u64.to_le_bytes());
        assert_eq!(&bytes[26..30], &1u32.to_le_bytes());
        assert_eq!(&bytes[30..34], &2u32.to_le_bytes());
        // lengths: title, session, appname, hostname, data
        assert_eq!(&bytes[34..38], &2u32.to_le_bytes());
        assert_eq!(&bytes[38..42], &4u32.to_le_bytes());
        assert_eq!(&bytes[42..46], &3u32.to_le_bytes());
        assert_eq!(&bytes[46..50], &1u32.to_le_bytes());
        assert_eq!(&bytes[50..54], &0u32.to_le_bytes());
        assert_eq!(&bytes[54..64], b"hiMainAppH");
        // encoding is a pure function of the packet
        assert_eq!(bytes, encode(&sample_log_entry().into()));
    }

    #[test]
    fn test_absent_vs_empty() {
        let absent = LogEntry::builder(LogEntryType::Comment, ViewerId::NoViewer).build();
        let bytes = encode(&absent.clone().into());
        let (decoded, used) = decode(&bytes).unwrap();
        assert_eq!(used, bytes.len());
        match &decoded {
            Packet::LogEntry(e) => {
                assert_eq!(e.title(), None);
                assert_eq!(e.data(), None);
            }
            _ => panic!("wrong kind"),
        }

        let empty = LogEntry::builder(LogEntryType::Comment, ViewerId::NoViewer)
            .title("")
            .data(Vec::new())
            .build();
        let bytes = encode(&empty.into());
        let (decoded, _) = decode(&bytes).unwrap();
        match &decoded {
            Packet::LogEntry(e) => {
                assert_eq!(e.title(), Some(""));
                assert_eq!(e.data(), Some(&[][..]));
            }
            _ => panic!("wrong kind"),
        }
    }

    #[test]
    fn test_round_trip_all_kinds() {
        let packets: Vec<Packet> = vec![
            sample_log_entry().into(),
            Watch::new(Level::Message, "x", "42", WatchType::Integer).into(),
            ControlCommand::new(ControlCommandType::ClearAll, Some(vec![1, 2, 3])).into(),
            ProcessFlow::new(Level::Debug, "main", ProcessFlowType::EnterMethod).into(),
            LogHeader::new("app", "host").into(),
            // unknown tags survive
            Packet::LogEntry(
                LogEntry::builder(LogEntryType::Other(4711), ViewerId::Other(9999))
                    .title("?")
                    .build(),
            ),
        ];
        for packet in &packets {
            let bytes = encode(packet);
            assert_eq!(bytes.len(), packet.size() as usize);
            let (decoded, used) = decode(&bytes).unwrap();
            assert_eq!(used, bytes.len());
            // level is not on the wire; compare the re-encoding byte-for-byte
            assert_eq!(encode(&decoded), bytes);
        }
    }

    #[test]
    fn test_framing_partition() {
        // a receiver must partition a stream using only the in-band size field
        let packets: Vec<Packet> = (0..100)
            .map(|i| {
                Packet::LogEntry(
                    LogEntry::builder(LogEntryType::Message, ViewerId::Title)
                        .title(format!("packet {}", i))
                        .build(),
                )
            })
            .collect();
        let mut stream = Vec::new();
        for packet in &packets {
            stream.extend_from_slice(&encode(packet));
        }
        let mut reader = PacketReader::new(&stream[..]);
        let mut n = 0;
        while let Some(packet) = reader.read_packet().unwrap() {
            match packet {
                Packet::LogEntry(e) => {
                    assert_eq!(e.title(), Some(format!("packet {}", n).as_str()))
                }
                _ => panic!("wrong kind"),
            }
            n += 1;
        }
        assert_eq!(n, 100);
    }

    #[test]
    fn test_formatter_matches_encode() {
        let packet: Packet = sample_log_entry().into();
        let mut formatter = BinaryFormatter::new();
        let size = formatter.compile(&packet);
        assert_eq!(size, packet.size() as usize);
        let mut out = Vec::new();
        formatter.write(&mut out).unwrap();
        assert_eq!(out, encode(&packet));
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(decode(&[0x04]), Err(Error::Truncated { .. })));
        let mut bytes = encode(&sample_log_entry().into());
        bytes[0] = 0x63;
        assert!(matches!(
            decode(&bytes),
            Err(Error::UnknownKind { tag: 0x63, .. })
        ));
    }
}
