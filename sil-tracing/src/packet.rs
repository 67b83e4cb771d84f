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

//! The packet model
//! ================
//!
//! # Introduction
//!
//! Everything this library emits is a [`Packet`]: a closed sum of five record kinds, each of
//! which is immutable once constructed and self-framed on the wire (see [`silf`]). [`LogEntry`]
//! is the workhorse -- a titled, typed record with an opaque viewer payload; [`Watch`] carries a
//! named value; [`ProcessFlow`] marks enter/leave transitions; [`ControlCommand`] instructs the
//! viewer; [`LogHeader`] identifies the producer at the start of a connection.
//!
//! [`silf`]: crate::silf
//!
//! # Discussion
//!
//! Where the viewer protocol admits open-ended values (viewer ids, entry types), the
//! corresponding enums carry an `Other` variant so that decoding a stream produced by a newer
//! writer preserves, rather than rejects, the unknown tag.

use crate::level::Level;

use chrono::prelude::*;

use std::sync::atomic::{AtomicU32, Ordering};

type StdResult<T, E> = std::result::Result<T, E>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         utility types                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// An ARGB color, stored as `0xAARRGGBB`.
///
/// The default is fully transparent black, which viewers interpret as "no color assigned".
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Color(pub u32);

impl Color {
    pub const TRANSPARENT: Color = Color(0x00000000);

    pub fn from_argb(a: u8, r: u8, g: u8, b: u8) -> Color {
        Color((a as u32) << 24 | (r as u32) << 16 | (g as u32) << 8 | b as u32)
    }
    pub fn value(&self) -> u32 {
        self.0
    }
    pub fn is_transparent(&self) -> bool {
        self.0 >> 24 == 0
    }
}

impl std::default::Default for Color {
    fn default() -> Self {
        Color::TRANSPARENT
    }
}

impl std::fmt::Display for Color {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> StdResult<(), std::fmt::Error> {
        write!(f, "0x{:08X}", self.0)
    }
}

/// A timestamp in 100-nanosecond units since 0001-01-01T00:00:00 UTC.
///
/// This is the canonical tick representation of the `.sil` format; implementations must match
/// it bit-for-bit, so the Unix-epoch offset below is part of the wire contract.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ticks(pub u64);

/// Ticks elapsed between 0001-01-01 and 1970-01-01, both UTC.
const UNIX_EPOCH_TICKS: u64 = 621_355_968_000_000_000;

impl Ticks {
    /// The current wall-clock time.
    pub fn now() -> Ticks {
        Ticks::from_datetime(Utc::now())
    }

    /// Convert from a [`chrono`] timestamp. Sub-microsecond precision is discarded (the
    /// tick-to-nanosecond conversion would overflow `i64` over a 2000-year span otherwise).
    pub fn from_datetime(when: DateTime<Utc>) -> Ticks {
        let micros = when.timestamp() as i64 * 1_000_000 + when.timestamp_subsec_micros() as i64;
        if micros <= -(UNIX_EPOCH_TICKS as i64 / 10) {
            return Ticks(0);
        }
        Ticks((UNIX_EPOCH_TICKS as i64 + micros * 10) as u64)
    }

    /// Convert back to a [`chrono`] timestamp.
    pub fn to_datetime(self) -> DateTime<Utc> {
        let micros = (self.0 as i64 - UNIX_EPOCH_TICKS as i64) / 10;
        Utc.timestamp_opt(
            micros.div_euclid(1_000_000),
            (micros.rem_euclid(1_000_000) * 1_000) as u32,
        )
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap())
    }
}

impl std::fmt::Display for Ticks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> StdResult<(), std::fmt::Error> {
        write!(f, "{}", self.to_datetime().format("%Y-%m-%d %H:%M:%S%.6f"))
    }
}

/// The OS process id, saturated to 32 bits.
pub fn current_process_id() -> u32 {
    std::process::id()
}

/// A small, stable numeric id for the current thread.
///
/// Stable Rust exposes no numeric accessor on [`std::thread::ThreadId`], so ids are handed out
/// from a process-global counter on first use per thread.
pub fn current_thread_id() -> u32 {
    static NEXT: AtomicU32 = AtomicU32::new(1);
    thread_local! {
        static ID: u32 = NEXT.fetch_add(1, Ordering::Relaxed);
    }
    ID.with(|id| *id)
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        the closed enums                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The wire tag of each packet kind.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PacketKind {
    ControlCommand,
    LogEntry,
    Watch,
    ProcessFlow,
    LogHeader,
}

impl PacketKind {
    /// The 16-bit tag that leads each packet on the wire.
    pub fn tag(self) -> u16 {
        match self {
            PacketKind::ControlCommand => 1,
            PacketKind::LogEntry => 4,
            PacketKind::Watch => 5,
            PacketKind::ProcessFlow => 6,
            PacketKind::LogHeader => 7,
        }
    }
    pub fn from_tag(tag: u16) -> Option<PacketKind> {
        match tag {
            1 => Some(PacketKind::ControlCommand),
            4 => Some(PacketKind::LogEntry),
            5 => Some(PacketKind::Watch),
            6 => Some(PacketKind::ProcessFlow),
            7 => Some(PacketKind::LogHeader),
            _ => None,
        }
    }
}

/// How the viewer should interpret a [`LogEntry`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum LogEntryType {
    Separator,
    EnterMethod,
    LeaveMethod,
    ResetCallstack,
    Message,
    Warning,
    Error,
    InternalError,
    Comment,
    VariableValue,
    Checkpoint,
    Debug,
    Verbose,
    Fatal,
    Conditional,
    Assert,
    Text,
    Binary,
    Graphic,
    Source,
    Object,
    WebContent,
    System,
    MemoryStatistic,
    DatabaseResult,
    DatabaseStructure,
    /// A tag this build doesn't know; preserved opaquely.
    Other(i32),
}

impl LogEntryType {
    pub fn value(self) -> i32 {
        match self {
            LogEntryType::Separator => 0,
            LogEntryType::EnterMethod => 1,
            LogEntryType::LeaveMethod => 2,
            LogEntryType::ResetCallstack => 3,
            LogEntryType::Message => 100,
            LogEntryType::Warning => 101,
            LogEntryType::Error => 102,
            LogEntryType::InternalError => 103,
            LogEntryType::Comment => 104,
            LogEntryType::VariableValue => 105,
            LogEntryType::Checkpoint => 106,
            LogEntryType::Debug => 107,
            LogEntryType::Verbose => 108,
            LogEntryType::Fatal => 109,
            LogEntryType::Conditional => 110,
            LogEntryType::Assert => 111,
            LogEntryType::Text => 200,
            LogEntryType::Binary => 201,
            LogEntryType::Graphic => 202,
            LogEntryType::Source => 203,
            LogEntryType::Object => 204,
            LogEntryType::WebContent => 205,
            LogEntryType::System => 206,
            LogEntryType::MemoryStatistic => 207,
            LogEntryType::DatabaseResult => 208,
            LogEntryType::DatabaseStructure => 209,
            LogEntryType::Other(v) => v,
        }
    }
    pub fn from_value(value: i32) -> LogEntryType {
        match value {
            0 => LogEntryType::Separator,
            1 => LogEntryType::EnterMethod,
            2 => LogEntryType::LeaveMethod,
            3 => LogEntryType::ResetCallstack,
            100 => LogEntryType::Message,
            101 => LogEntryType::Warning,
            102 => LogEntryType::Error,
            103 => LogEntryType::InternalError,
            104 => LogEntryType::Comment,
            105 => LogEntryType::VariableValue,
            106 => LogEntryType::Checkpoint,
            107 => LogEntryType::Debug,
            108 => LogEntryType::Verbose,
            109 => LogEntryType::Fatal,
            110 => LogEntryType::Conditional,
            111 => LogEntryType::Assert,
            200 => LogEntryType::Text,
            201 => LogEntryType::Binary,
            202 => LogEntryType::Graphic,
            203 => LogEntryType::Source,
            204 => LogEntryType::Object,
            205 => LogEntryType::WebContent,
            206 => LogEntryType::System,
            207 => LogEntryType::MemoryStatistic,
            208 => LogEntryType::DatabaseResult,
            209 => LogEntryType::DatabaseStructure,
            v => LogEntryType::Other(v),
        }
    }
}

impl std::fmt::Display for LogEntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> StdResult<(), std::fmt::Error> {
        match self {
            LogEntryType::Other(v) => write!(f, "{}", v),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Which viewer renders a [`LogEntry`]'s payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ViewerId {
    NoViewer,
    Title,
    Data,
    List,
    ValueList,
    Inspector,
    Table,
    Web,
    Binary,
    HtmlSource,
    JavaScriptSource,
    VbScriptSource,
    PerlSource,
    SqlSource,
    IniSource,
    PythonSource,
    XmlSource,
    Bitmap,
    Jpeg,
    Icon,
    Metafile,
    Png,
    /// An id this build doesn't know; preserved opaquely.
    Other(i32),
}

impl ViewerId {
    pub fn value(self) -> i32 {
        match self {
            ViewerId::NoViewer => -1,
            ViewerId::Title => 0,
            ViewerId::Data => 1,
            ViewerId::List => 2,
            ViewerId::ValueList => 3,
            ViewerId::Inspector => 4,
            ViewerId::Table => 5,
            ViewerId::Web => 100,
            ViewerId::Binary => 200,
            ViewerId::HtmlSource => 300,
            ViewerId::JavaScriptSource => 301,
            ViewerId::VbScriptSource => 302,
            ViewerId::PerlSource => 303,
            ViewerId::SqlSource => 304,
            ViewerId::IniSource => 305,
            ViewerId::PythonSource => 306,
            ViewerId::XmlSource => 307,
            ViewerId::Bitmap => 400,
            ViewerId::Jpeg => 401,
            ViewerId::Icon => 402,
            ViewerId::Metafile => 403,
            ViewerId::Png => 404,
            ViewerId::Other(v) => v,
        }
    }
    pub fn from_value(value: i32) -> ViewerId {
        match value {
            -1 => ViewerId::NoViewer,
            0 => ViewerId::Title,
            1 => ViewerId::Data,
            2 => ViewerId::List,
            3 => ViewerId::ValueList,
            4 => ViewerId::Inspector,
            5 => ViewerId::Table,
            100 => ViewerId::Web,
            200 => ViewerId::Binary,
            300 => ViewerId::HtmlSource,
            301 => ViewerId::JavaScriptSource,
            302 => ViewerId::VbScriptSource,
            303 => ViewerId::PerlSource,
            304 => ViewerId::SqlSource,
            305 => ViewerId::IniSource,
            306 => ViewerId::PythonSource,
            307 => ViewerId::XmlSource,
            400 => ViewerId::Bitmap,
            401 => ViewerId::Jpeg,
            402 => ViewerId::Icon,
            403 => ViewerId::Metafile,
            404 => ViewerId::Png,
            v => ViewerId::Other(v),
        }
    }
}

impl std::fmt::Display for ViewerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> StdResult<(), std::fmt::Error> {
        match self {
            ViewerId::Other(v) => write!(f, "{}", v),
            other => write!(f, "{:?}", other),
        }
    }
}

/// The declared type of a [`Watch`] value.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum WatchType {
    Char,
    String,
    Integer,
    Float,
    Boolean,
    Address,
    Timestamp,
    Object,
    Other(i32),
}

impl WatchType {
    pub fn value(self) -> i32 {
        match self {
            WatchType::Char => 0,
            WatchType::String => 1,
            WatchType::Integer => 2,
            WatchType::Float => 3,
            WatchType::Boolean => 4,
            WatchType::Address => 5,
            WatchType::Timestamp => 6,
            WatchType::Object => 7,
            WatchType::Other(v) => v,
        }
    }
    pub fn from_value(value: i32) -> WatchType {
        match value {
            0 => WatchType::Char,
            1 => WatchType::String,
            2 => WatchType::Integer,
            3 => WatchType::Float,
            4 => WatchType::Boolean,
            5 => WatchType::Address,
            6 => WatchType::Timestamp,
            7 => WatchType::Object,
            v => WatchType::Other(v),
        }
    }
}

/// The transition a [`ProcessFlow`] packet marks.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ProcessFlowType {
    EnterMethod,
    LeaveMethod,
    EnterThread,
    LeaveThread,
    EnterProcess,
    LeaveProcess,
    Other(i32),
}

impl ProcessFlowType {
    pub fn value(self) -> i32 {
        match self {
            ProcessFlowType::EnterMethod => 0,
            ProcessFlowType::LeaveMethod => 1,
            ProcessFlowType::EnterThread => 2,
            ProcessFlowType::LeaveThread => 3,
            ProcessFlowType::EnterProcess => 4,
            ProcessFlowType::LeaveProcess => 5,
            ProcessFlowType::Other(v) => v,
        }
    }
    pub fn from_value(value: i32) -> ProcessFlowType {
        match value {
            0 => ProcessFlowType::EnterMethod,
            1 => ProcessFlowType::LeaveMethod,
            2 => ProcessFlowType::EnterThread,
            3 => ProcessFlowType::LeaveThread,
            4 => ProcessFlowType::EnterProcess,
            5 => ProcessFlowType::LeaveProcess,
            v => ProcessFlowType::Other(v),
        }
    }
}

/// What a [`ControlCommand`] instructs the viewer to do.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ControlCommandType {
    ClearLog,
    ClearWatches,
    ClearAutoViews,
    ClearAll,
    ClearProcessFlow,
    Other(i32),
}

impl ControlCommandType {
    pub fn value(self) -> i32 {
        match self {
            ControlCommandType::ClearLog => 0,
            ControlCommandType::ClearWatches => 1,
            ControlCommandType::ClearAutoViews => 2,
            ControlCommandType::ClearAll => 3,
            ControlCommandType::ClearProcessFlow => 4,
            ControlCommandType::Other(v) => v,
        }
    }
    pub fn from_value(value: i32) -> ControlCommandType {
        match value {
            0 => ControlCommandType::ClearLog,
            1 => ControlCommandType::ClearWatches,
            2 => ControlCommandType::ClearAutoViews,
            3 => ControlCommandType::ClearAll,
            4 => ControlCommandType::ClearProcessFlow,
            v => ControlCommandType::Other(v),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        the packet kinds                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A titled, typed record with an opaque viewer payload.
///
/// Variable-length fields distinguish *absent* (`None`) from *empty*; the distinction survives
/// the wire (see [`silf`](crate::silf)).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
    pub(crate) level: Level,
    pub(crate) log_entry_type: LogEntryType,
    pub(crate) viewer_id: ViewerId,
    pub(crate) color: Color,
    pub(crate) timestamp: Ticks,
    pub(crate) process_id: u32,
    pub(crate) thread_id: u32,
    pub(crate) title: Option<String>,
    pub(crate) session_name: Option<String>,
    pub(crate) app_name: Option<String>,
    pub(crate) hostname: Option<String>,
    pub(crate) data: Option<Vec<u8>>,
}

impl LogEntry {
    /// Start building a log entry; process/thread ids and the timestamp are captured here.
    pub fn builder(log_entry_type: LogEntryType, viewer_id: ViewerId) -> LogEntryBuilder {
        LogEntryBuilder {
            imp: LogEntry {
                level: Level::Message,
                log_entry_type,
                viewer_id,
                color: Color::TRANSPARENT,
                timestamp: Ticks::now(),
                process_id: current_process_id(),
                thread_id: current_thread_id(),
                title: None,
                session_name: None,
                app_name: None,
                hostname: None,
                data: None,
            },
        }
    }

    pub fn level(&self) -> Level {
        self.level
    }
    pub fn log_entry_type(&self) -> LogEntryType {
        self.log_entry_type
    }
    pub fn viewer_id(&self) -> ViewerId {
        self.viewer_id
    }
    pub fn color(&self) -> Color {
        self.color
    }
    pub fn timestamp(&self) -> Ticks {
        self.timestamp
    }
    pub fn process_id(&self) -> u32 {
        self.process_id
    }
    pub fn thread_id(&self) -> u32 {
        self.thread_id
    }
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }
    pub fn session_name(&self) -> Option<&str> {
        self.session_name.as_deref()
    }
    pub fn app_name(&self) -> Option<&str> {
        self.app_name.as_deref()
    }
    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }
    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }
}

pub struct LogEntryBuilder {
    imp: LogEntry,
}

impl LogEntryBuilder {
    pub fn level(mut self, level: Level) -> Self {
        self.imp.level = level;
        self
    }
    pub fn color(mut self, color: Color) -> Self {
        self.imp.color = color;
        self
    }
    pub fn timestamp(mut self, timestamp: Ticks) -> Self {
        self.imp.timestamp = timestamp;
        self
    }
    pub fn process_id(mut self, process_id: u32) -> Self {
        self.imp.process_id = process_id;
        self
    }
    pub fn thread_id(mut self, thread_id: u32) -> Self {
        self.imp.thread_id = thread_id;
        self
    }
    pub fn title<S: Into<String>>(mut self, title: S) -> Self {
        self.imp.title = Some(title.into());
        self
    }
    pub fn session_name<S: Into<String>>(mut self, name: S) -> Self {
        self.imp.session_name = Some(name.into());
        self
    }
    pub fn app_name<S: Into<String>>(mut self, name: S) -> Self {
        self.imp.app_name = Some(name.into());
        self
    }
    pub fn hostname<S: Into<String>>(mut self, name: S) -> Self {
        self.imp.hostname = Some(name.into());
        self
    }
    pub fn data<D: Into<Vec<u8>>>(mut self, data: D) -> Self {
        self.imp.data = Some(data.into());
        self
    }
    pub fn build(self) -> LogEntry {
        self.imp
    }
}

/// A named value of a declared type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Watch {
    pub(crate) level: Level,
    pub(crate) watch_type: WatchType,
    pub(crate) timestamp: Ticks,
    pub(crate) name: Option<String>,
    pub(crate) value: Option<String>,
}

impl Watch {
    pub fn new<N: Into<String>, V: Into<String>>(
        level: Level,
        name: N,
        value: V,
        watch_type: WatchType,
    ) -> Watch {
        Watch {
            level,
            watch_type,
            timestamp: Ticks::now(),
            name: Some(name.into()),
            value: Some(value.into()),
        }
    }
    pub fn level(&self) -> Level {
        self.level
    }
    pub fn watch_type(&self) -> WatchType {
        self.watch_type
    }
    pub fn timestamp(&self) -> Ticks {
        self.timestamp
    }
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }
}

/// An instruction to the viewer, with an optional payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControlCommand {
    pub(crate) control_command_type: ControlCommandType,
    pub(crate) data: Option<Vec<u8>>,
}

impl ControlCommand {
    pub fn new(control_command_type: ControlCommandType, data: Option<Vec<u8>>) -> ControlCommand {
        ControlCommand {
            control_command_type,
            data,
        }
    }
    /// Control commands always travel at the `Control` level.
    pub fn level(&self) -> Level {
        Level::Control
    }
    pub fn control_command_type(&self) -> ControlCommandType {
        self.control_command_type
    }
    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }
}

/// An enter/leave transition for methods, threads or processes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessFlow {
    pub(crate) level: Level,
    pub(crate) process_flow_type: ProcessFlowType,
    pub(crate) timestamp: Ticks,
    pub(crate) process_id: u32,
    pub(crate) thread_id: u32,
    pub(crate) title: Option<String>,
    pub(crate) hostname: Option<String>,
}

impl ProcessFlow {
    pub fn new<T: Into<String>>(
        level: Level,
        title: T,
        process_flow_type: ProcessFlowType,
    ) -> ProcessFlow {
        ProcessFlow {
            level,
            process_flow_type,
            timestamp: Ticks::now(),
            process_id: current_process_id(),
            thread_id: current_thread_id(),
            title: Some(title.into()),
            hostname: None,
        }
    }
    pub fn level(&self) -> Level {
        self.level
    }
    pub fn process_flow_type(&self) -> ProcessFlowType {
        self.process_flow_type
    }
    pub fn timestamp(&self) -> Ticks {
        self.timestamp
    }
    pub fn process_id(&self) -> u32 {
        self.process_id
    }
    pub fn thread_id(&self) -> u32 {
        self.thread_id
    }
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }
    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }
}

/// A `key=value` block identifying the producer, sent at the head of live connections.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogHeader {
    pub(crate) content: Option<String>,
}

impl LogHeader {
    pub fn new(app_name: &str, hostname: &str) -> LogHeader {
        LogHeader {
            content: Some(format!("hostname={}\r\nappname={}\r\n", hostname, app_name)),
        }
    }
    /// Log headers travel at the `Control` level so that no floor can gate them out.
    pub fn level(&self) -> Level {
        Level::Control
    }
    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          enum Packet                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A self-framed record; the closed sum of all five kinds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Packet {
    ControlCommand(ControlCommand),
    LogEntry(LogEntry),
    Watch(Watch),
    ProcessFlow(ProcessFlow),
    LogHeader(LogHeader),
}

impl Packet {
    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::ControlCommand(_) => PacketKind::ControlCommand,
            Packet::LogEntry(_) => PacketKind::LogEntry,
            Packet::Watch(_) => PacketKind::Watch,
            Packet::ProcessFlow(_) => PacketKind::ProcessFlow,
            Packet::LogHeader(_) => PacketKind::LogHeader,
        }
    }
    pub fn level(&self) -> Level {
        match self {
            Packet::ControlCommand(p) => p.level(),
            Packet::LogEntry(p) => p.level(),
            Packet::Watch(p) => p.level(),
            Packet::ProcessFlow(p) => p.level(),
            Packet::LogHeader(p) => p.level(),
        }
    }
}

impl From<LogEntry> for Packet {
    fn from(p: LogEntry) -> Self {
        Packet::LogEntry(p)
    }
}
impl From<Watch> for Packet {
    fn from(p: Watch) -> Self {
        Packet::Watch(p)
    }
}
impl From<ControlCommand> for Packet {
    fn from(p: ControlCommand) -> Self {
        Packet::ControlCommand(p)
    }
}
impl From<ProcessFlow> for Packet {
    fn from(p: ProcessFlow) -> Self {
        Packet::ProcessFlow(p)
    }
}
impl From<LogHeader> for Packet {
    fn from(p: LogHeader) -> Self {
        Packet::LogHeader(p)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_ticks_round_trip() {
        let now = Utc.with_ymd_and_hms(2023, 5, 30, 12, 34, 56).unwrap();
        let ticks = Ticks::from_datetime(now);
        assert_eq!(ticks.to_datetime(), now);
        // the documented Unix-epoch offset
        assert_eq!(
            Ticks::from_datetime(Utc.timestamp_opt(0, 0).unwrap()),
            Ticks(621_355_968_000_000_000)
        );
    }

    #[test]
    fn test_thread_ids() {
        let here = current_thread_id();
        assert_eq!(here, current_thread_id());
        let there = std::thread::spawn(current_thread_id).join().unwrap();
        assert_ne!(here, there);
    }

    #[test]
    fn test_tags() {
        assert_eq!(PacketKind::LogEntry.tag(), 4);
        assert_eq!(PacketKind::from_tag(7), Some(PacketKind::LogHeader));
        assert_eq!(PacketKind::from_tag(2), None);
        assert_eq!(LogEntryType::from_value(422), LogEntryType::Other(422));
        assert_eq!(LogEntryType::from_value(422).value(), 422);
        assert_eq!(ViewerId::from_value(-1), ViewerId::NoViewer);
    }

    #[test]
    fn test_builder() {
        let entry = LogEntry::builder(LogEntryType::Message, ViewerId::Title)
            .level(Level::Warning)
            .title("hi")
            .session_name("Main")
            .build();
        assert_eq!(entry.level(), Level::Warning);
        assert_eq!(entry.title(), Some("hi"));
        assert_eq!(entry.app_name(), None);
        assert!(entry.color().is_transparent());
    }
}
