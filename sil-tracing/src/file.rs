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

//! The file protocol
//! =================
//!
//! # Introduction
//!
//! Writes the binary packet stream to disk, with two independent rotation triggers and an
//! optional encrypting stream:
//!
//! - *Time*: when the wall clock crosses an `hourly`/`daily`/`weekly`/`monthly` boundary
//!   between writes, the current file closes and a new one opens whose name encodes the
//!   moment of rotation (`log-2023-05-30-14-00-00.sil`).
//! - *Size*: a packet that would push the file past `maxsize` forces a rotation first.
//!
//! After each rotation, `maxparts` prunes the oldest parts -- ordered by the timestamp encoded
//! in their names, with filesystem mtime breaking ties; files matching the pattern but not
//! parsing as a timestamp are left alone.
//!
//! Plain files open with the `SILF` magic. With `encrypt=true` the file instead starts with
//! `SILE` and a random 16-byte IV, and everything after -- including an inner `SILF` header --
//! is AES-128-CBC ciphertext, so decrypting yields a byte-exact plain log file.
//!
//! # Discussion
//!
//! Rotation state lives entirely in this module so the text protocol can share it; see
//! [`FileRotater`] and the part-naming helpers.

use crate::formatter::Formatter;
use crate::options::LookupTable;
use crate::packet::Packet;
use crate::protocol::{Error, ProtocolCommand, ProtocolContext, ProtocolCore, Result};
use crate::silf::{BinaryFormatter, MAGIC_ENCRYPTED, MAGIC_PLAIN};
use crate::{crypt, crypt::EncryptingWriter};

use chrono::prelude::*;
use rand::RngCore;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const DEFAULT_BUFFER: usize = 0x2000;

/// The injectable wall clock; rotation tests advance it by hand.
pub(crate) type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub(crate) fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        rotation state                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The time-based rotation modes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FileRotate {
    None,
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

impl FileRotate {
    pub fn parse(text: &str) -> Option<FileRotate> {
        match text.trim().to_ascii_lowercase().as_str() {
            "none" | "norotate" => Some(FileRotate::None),
            "hourly" => Some(FileRotate::Hourly),
            "daily" => Some(FileRotate::Daily),
            "weekly" => Some(FileRotate::Weekly),
            "monthly" => Some(FileRotate::Monthly),
            _ => None,
        }
    }
}

/// Detects boundary crossings by comparing a per-mode "time value" across writes.
pub(crate) struct FileRotater {
    mode: FileRotate,
    time_value: i64,
}

impl FileRotater {
    pub(crate) fn new(mode: FileRotate) -> FileRotater {
        FileRotater {
            mode,
            time_value: 0,
        }
    }

    fn time_value(&self, now: DateTime<Utc>) -> i64 {
        let date = now.date_naive();
        match self.mode {
            FileRotate::None => 0,
            FileRotate::Hourly => date.num_days_from_ce() as i64 * 24 + now.hour() as i64,
            FileRotate::Daily => date.num_days_from_ce() as i64,
            FileRotate::Weekly => {
                let monday = date
                    - chrono::Duration::days(date.weekday().num_days_from_monday() as i64);
                monday.num_days_from_ce() as i64
            }
            FileRotate::Monthly => date.year() as i64 * 12 + date.month() as i64,
        }
    }

    pub(crate) fn initialize(&mut self, now: DateTime<Utc>) {
        self.time_value = self.time_value(now);
    }

    /// True exactly when `now` lies past the boundary the last observed time was in.
    pub(crate) fn update(&mut self, now: DateTime<Utc>) -> bool {
        let time_value = self.time_value(now);
        if time_value != self.time_value {
            self.time_value = time_value;
            true
        } else {
            false
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       part-name helpers                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

const DATETIME_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";
const DATETIME_LEN: usize = 19; // yyyy-MM-dd-HH-mm-ss

fn split_base(base: &Path) -> (PathBuf, String, String) {
    let dir = base.parent().map(PathBuf::from).unwrap_or_default();
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = base
        .extension()
        .map(|s| format!(".{}", s.to_string_lossy()))
        .unwrap_or_default();
    (dir, stem, ext)
}

/// `log.sil` + a moment → `log-2023-05-30-14-00-00.sil`, dodging collisions with an `a` suffix.
pub(crate) fn expand_file_name(base: &Path, now: DateTime<Utc>) -> PathBuf {
    let (dir, stem, ext) = split_base(base);
    let mut name = format!("{}-{}{}", stem, now.format(DATETIME_FORMAT), ext);
    let mut path = dir.join(&name);
    while path.exists() {
        let dot = name.len() - ext.len();
        name.insert(dot, 'a');
        path = dir.join(&name);
    }
    path
}

/// The timestamp a rotated part's name encodes, if it parses.
pub(crate) fn parse_part_date(base: &Path, part: &Path) -> Option<NaiveDateTime> {
    let (_, stem, ext) = split_base(base);
    let name = part.file_name()?.to_string_lossy().into_owned();
    let rest = name.strip_prefix(&stem)?.strip_prefix('-')?;
    let rest = rest.strip_suffix(&ext)?;
    let value = if rest.len() > DATETIME_LEN {
        &rest[..DATETIME_LEN]
    } else {
        rest
    };
    NaiveDateTime::parse_from_str(value, DATETIME_FORMAT).ok()
}

/// All rotated parts of `base`, oldest first: ordered by name-encoded timestamp, mtime as the
/// tie-break. Files that match the pattern but don't parse are ignored.
pub(crate) fn list_parts(base: &Path) -> Vec<PathBuf> {
    let (dir, _, _) = split_base(base);
    let dir = if dir.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        dir
    };
    let mut parts: Vec<(NaiveDateTime, std::time::SystemTime, PathBuf)> = Vec::new();
    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if let Some(date) = parse_part_date(base, &path) {
            let mtime = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(std::time::UNIX_EPOCH);
            parts.push((date, mtime, path));
        }
    }
    parts.sort();
    parts.into_iter().map(|(_, _, path)| path).collect()
}

/// Delete the oldest parts until at most `max_parts` remain.
pub(crate) fn prune_parts(base: &Path, max_parts: u32) {
    let parts = list_parts(base);
    if parts.len() <= max_parts as usize {
        return;
    }
    for victim in &parts[..parts.len() - max_parts as usize] {
        let _ = std::fs::remove_file(victim);
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        the file core                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

enum FileSink {
    Plain(BufWriter<File>),
    Encrypted(BufWriter<EncryptingWriter<File>>),
}

impl FileSink {
    fn close(self) -> std::io::Result<()> {
        match self {
            FileSink::Plain(mut sink) => sink.flush(),
            FileSink::Encrypted(sink) => {
                let cipher = sink
                    .into_inner()
                    .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err.to_string()))?;
                cipher.finish()?;
                Ok(())
            }
        }
    }
}

impl Write for FileSink {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        match self {
            FileSink::Plain(sink) => sink.write(data),
            FileSink::Encrypted(sink) => sink.write(data),
        }
    }
    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            FileSink::Plain(sink) => sink.flush(),
            FileSink::Encrypted(sink) => sink.flush(),
        }
    }
}

/// The `file` protocol core.
pub struct FileCore {
    filename: String,
    append: bool,
    buffer: usize,
    rotate: FileRotate,
    max_size: u64,
    max_parts: u32,
    encrypt: bool,
    key: Option<Vec<u8>>,
    rotater: FileRotater,
    clock: Clock,
    /// The filename template with `%appname%`/`%machinename%` expanded; set at connect so
    /// rotation can re-open without the connect-time context.
    base: Option<PathBuf>,
    sink: Option<FileSink>,
    formatter: BinaryFormatter,
    file_size: u64,
    buffer_counter: usize,
}

impl FileCore {
    pub fn new() -> FileCore {
        FileCore::with_clock(system_clock())
    }

    pub(crate) fn with_clock(clock: Clock) -> FileCore {
        FileCore {
            filename: "log.sil".to_string(),
            append: false,
            buffer: 0,
            rotate: FileRotate::None,
            max_size: 0,
            max_parts: 0,
            encrypt: false,
            key: None,
            rotater: FileRotater::new(FileRotate::None),
            clock,
            base: None,
            sink: None,
            formatter: BinaryFormatter::new(),
            file_size: 0,
            buffer_counter: 0,
        }
    }

    fn is_rotating(&self) -> bool {
        self.rotate != FileRotate::None || self.max_size > 0
    }

    fn protocol_error(&self, message: &str) -> Error {
        Error::protocol(message, "file", &self.filename)
    }

    fn do_connect(&mut self, ctx: &ProtocolContext, append: bool) -> Result<()> {
        if self.encrypt {
            match &self.key {
                None => return Err(self.protocol_error("No encryption key")),
                Some(key) if key.len() != crypt::KEY_SIZE => {
                    return Err(self.protocol_error("Invalid encryption key size"))
                }
                _ => (),
            }
        }

        let expanded = self
            .filename
            .replace("%appname%", &ctx.app_name())
            .replace("%machinename%", ctx.host_name());
        let base = PathBuf::from(&expanded);
        if let Some(dir) = base.parent() {
            if !dir.as_os_str().is_empty() && !dir.is_dir() {
                std::fs::create_dir_all(dir)
                    .map_err(|err| self.protocol_error(&format!("Could not create log directory: {}", err)))?;
            }
        }
        self.base = Some(base);
        self.open_part(append)
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
        self.buffer_counter = 0;

        let capacity = if self.buffer > 0 {
            self.buffer
        } else {
            DEFAULT_BUFFER
        };
        let sink = if self.encrypt {
            let mut iv = [0u8; crypt::BLOCK_SIZE];
            rand::thread_rng().fill_bytes(&mut iv);
            file.write_all(MAGIC_ENCRYPTED)
                .and_then(|_| file.write_all(&iv))
                .map_err(Error::from)?;
            self.file_size = (MAGIC_ENCRYPTED.len() + iv.len()) as u64;
            let mut key = [0u8; crypt::KEY_SIZE];
            if let Some(bytes) = self.key.as_deref() {
                key.copy_from_slice(bytes);
            }
            let mut cipher = EncryptingWriter::new(file, &key, &iv);
            cipher.write_all(MAGIC_PLAIN).map_err(Error::from)?;
            self.file_size += MAGIC_PLAIN.len() as u64;
            FileSink::Encrypted(BufWriter::with_capacity(capacity, cipher))
        } else {
            if self.file_size == 0 {
                file.write_all(MAGIC_PLAIN).map_err(Error::from)?;
                self.file_size = MAGIC_PLAIN.len() as u64;
            }
            FileSink::Plain(BufWriter::with_capacity(capacity, file))
        };
        self.sink = Some(sink);

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
        if let Some(sink) = self.sink.take() {
            sink.close().map_err(Error::from)?;
        }
        Ok(())
    }

}

impl std::default::Default for FileCore {
    fn default() -> Self {
        FileCore::new()
    }
}

impl ProtocolCore for FileCore {
    fn name(&self) -> &'static str {
        "file"
    }

    fn is_valid_option(&self, name: &str) -> bool {
        matches!(
            name,
            "append" | "buffer" | "encrypt" | "filename" | "key" | "maxsize" | "maxparts" | "rotate"
        )
    }

    fn load_options(&mut self, options: &LookupTable) {
        self.filename = options.get_string("filename", "log.sil");
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
        self.encrypt = options.get_bool("encrypt", false);
        self.key = options.get_bytes("key", crypt::KEY_SIZE);
        if self.encrypt {
            // appending would splice two CBC streams into one file
            self.append = false;
        }
        self.rotater = FileRotater::new(self.rotate);
    }

    fn connect(&mut self, ctx: &ProtocolContext) -> Result<()> {
        self.do_connect(ctx, self.append)
    }

    fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        let packet_size = self.formatter.compile(packet) as u64;
        if self.rotate != FileRotate::None {
            let now = (self.clock)();
            if self.rotater.update(now) {
                self.rotate_now()?;
            }
        }
        if self.max_size > 0 {
            self.file_size += packet_size;
            if self.file_size > self.max_size {
                self.rotate_now()?;
                if packet_size > self.max_size {
                    // a single packet larger than every part; nothing sane to do with it
                    return Ok(());
                }
                self.file_size += packet_size;
            }
        }
        let sink = self
            .sink
            .as_mut()
            .ok_or_else(|| Error::protocol("Log file is not open", "file", ""))?;
        self.formatter.write(sink).map_err(Error::from)?;
        if self.buffer > 0 {
            self.buffer_counter += packet_size as usize;
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
    use crate::packet::{LogEntry, LogEntryType, ViewerId};
    use crate::protocol::EventSink;
    use crate::silf::PacketReader;
    use std::io::Read;
    use std::sync::Mutex;

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

    fn read_titles(path: &Path) -> Vec<usize> {
        let mut file = File::open(path).unwrap();
        let mut magic = [0u8; 4];
        file.read_exact(&mut magic).unwrap();
        assert_eq!(&magic, MAGIC_PLAIN);
        let mut reader = PacketReader::new(file);
        let mut titles = Vec::new();
        while let Some(packet) = reader.read_packet().unwrap() {
            if let Packet::LogEntry(e) = packet {
                titles.push(e.title().unwrap().parse().unwrap());
            }
        }
        titles
    }

    fn manual_clock(start: DateTime<Utc>) -> (Arc<Mutex<DateTime<Utc>>>, Clock) {
        let now = Arc::new(Mutex::new(start));
        let reader = Arc::clone(&now);
        (now, Arc::new(move || *reader.lock().unwrap()))
    }

    fn core_with(options: &str, clock: Clock) -> FileCore {
        let conns = crate::options::parse(&format!("file({})", options)).unwrap();
        let mut core = FileCore::with_clock(clock);
        core.load_options(&LookupTable::from_pairs(&conns[0].options));
        core
    }

    #[test]
    fn test_plain_write_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.sil");
        let mut core = core_with(
            &format!("filename=\"{}\"", path.display()),
            system_clock(),
        );
        let ctx = ctx();
        core.connect(&ctx).unwrap();
        for n in 0..10 {
            core.write_packet(&entry(n)).unwrap();
        }
        core.disconnect().unwrap();
        assert_eq!(read_titles(&path), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_append_resumes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.sil");
        for round in 0..2 {
            let mut core = core_with(
                &format!("filename=\"{}\",append=true", path.display()),
                system_clock(),
            );
            let ctx = ctx();
            core.connect(&ctx).unwrap();
            core.write_packet(&entry(round)).unwrap();
            core.disconnect().unwrap();
        }
        assert_eq!(read_titles(&path), vec![0, 1]);
    }

    #[test]
    fn test_hourly_rotation_and_prune() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("log.sil");
        let start = Utc.with_ymd_and_hms(2023, 5, 30, 0, 30, 0).unwrap();
        let (now, clock) = manual_clock(start);
        let mut core = core_with(
            &format!("filename=\"{}\",rotate=hourly,maxparts=3", base.display()),
            clock,
        );
        let ctx = ctx();
        core.connect(&ctx).unwrap();
        for hour in 0..5 {
            *now.lock().unwrap() = start + chrono::Duration::hours(hour);
            core.write_packet(&entry(hour as usize)).unwrap();
        }
        core.disconnect().unwrap();

        let parts = list_parts(&base);
        assert_eq!(parts.len(), 3);
        // rotation monotonicity: name-encoded timestamps strictly increase
        let dates: Vec<_> = parts
            .iter()
            .map(|p| parse_part_date(&base, p).unwrap())
            .collect();
        assert!(dates.windows(2).all(|w| w[0] < w[1]));
        // the survivors are the three most recent hours
        assert_eq!(dates[0].hour(), 2);
        assert_eq!(dates[1].hour(), 3);
        assert_eq!(dates[2].hour(), 4);
    }

    #[test]
    fn test_size_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("log.sil");
        let mut core = core_with(
            &format!("filename=\"{}\",maxsize=256,maxparts=0", base.display()),
            system_clock(),
        );
        let ctx = ctx();
        core.connect(&ctx).unwrap();
        for n in 0..20 {
            core.write_packet(&entry(n)).unwrap();
        }
        core.disconnect().unwrap();
        let parts = list_parts(&base);
        assert!(parts.len() > 1);
        // every packet landed in exactly one part, in order
        let mut all = Vec::new();
        for part in &parts {
            all.extend(read_titles(part));
        }
        assert_eq!(all, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_encrypted_file_decrypts_to_plain_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.sil");
        let mut core = core_with(
            &format!("filename=\"{}\",encrypt=true,key=secret", path.display()),
            system_clock(),
        );
        let ctx = ctx();
        core.connect(&ctx).unwrap();
        for n in 0..5 {
            core.write_packet(&entry(n)).unwrap();
        }
        core.disconnect().unwrap();

        let raw = std::fs::read(&path).unwrap();
        assert_eq!(&raw[..4], MAGIC_ENCRYPTED);
        let mut iv = [0u8; crypt::BLOCK_SIZE];
        iv.copy_from_slice(&raw[4..20]);
        let mut key = [0u8; crypt::KEY_SIZE];
        key[..6].copy_from_slice(b"secret");
        let plain = crypt::decrypt(&key, &iv, &raw[20..]).unwrap();
        assert_eq!(&plain[..4], MAGIC_PLAIN);
        let mut reader = PacketReader::new(&plain[4..]);
        let mut titles = Vec::new();
        while let Some(packet) = reader.read_packet().unwrap() {
            if let Packet::LogEntry(e) = packet {
                titles.push(e.title().unwrap().to_string());
            }
        }
        assert_eq!(titles, vec!["0", "1", "2", "3", "4"]);
    }

    #[test]
    fn test_encrypt_without_key_refuses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.sil");
        let mut core = core_with(
            &format!("filename=\"{}\",encrypt=true", path.display()),
            system_clock(),
        );
        assert!(core.connect(&ctx()).is_err());
    }

    #[test]
    fn test_encrypt_with_empty_key_pads_to_zeros() {
        // an explicitly-supplied empty key normalizes to sixteen zero bytes -- degenerate,
        // but a present key nonetheless
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.sil");
        let mut core = core_with(
            &format!("filename=\"{}\",encrypt=true,key=\"\"", path.display()),
            system_clock(),
        );
        let ctx = ctx();
        core.connect(&ctx).unwrap();
        core.write_packet(&entry(0)).unwrap();
        core.disconnect().unwrap();

        let raw = std::fs::read(&path).unwrap();
        assert_eq!(&raw[..4], MAGIC_ENCRYPTED);
        let mut iv = [0u8; crypt::BLOCK_SIZE];
        iv.copy_from_slice(&raw[4..20]);
        let plain = crypt::decrypt(&[0u8; crypt::KEY_SIZE], &iv, &raw[20..]).unwrap();
        assert_eq!(&plain[..4], MAGIC_PLAIN);
    }

    #[test]
    fn test_part_name_parsing() {
        let base = PathBuf::from("/var/log/app.sil");
        assert_eq!(
            parse_part_date(&base, Path::new("/var/log/app-2023-05-30-14-00-00.sil")),
            Some(
                NaiveDate::from_ymd_opt(2023, 5, 30)
                    .unwrap()
                    .and_hms_opt(14, 0, 0)
                    .unwrap()
            )
        );
        assert_eq!(
            parse_part_date(&base, Path::new("/var/log/app-not-a-date.sil")),
            None
        );
        assert_eq!(parse_part_date(&base, Path::new("/var/log/other.sil")), None);
    }
}
