// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Named request logs in Common Log Format.
//!
//! ```text
//! 127.0.0.1 - ops [10/Oct/2025:13:55:36 +0200] "GET /api/get_status HTTP/1.1" 200 183
//! ```
//!
//! A live log list starts with the lines already in the file and continues
//! with every entry appended afterwards. The file length is recorded under
//! the same lock `append` writes under, so the history is read up to exactly
//! the first live entry. Lines that fail to decode or parse are skipped.

use crate::events::{AdminBus, AdminEvent, LOG_APPENDED};
use chrono::{DateTime, FixedOffset, Local, Timelike};
use futures::stream::{self, StreamExt, TryStreamExt};
use livelist::{
    EventMap, KeySchema, Keyed, LiveError, LiveList, LiveStream, Producer, Snapshot, Subscription,
};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tracing::debug;

/// `strftime` format of the bracketed CLF timestamp.
pub const CLF_TIME: &str = "%d/%b/%Y:%H:%M:%S %z";

/// Log errors.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("no log named '{0}'")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed log line: {0}")]
    Parse(String),

    #[error(transparent)]
    Live(#[from] LiveError),
}

/// One request log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub ts: DateTime<FixedOffset>,
    pub ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    pub method: String,
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
}

// Log lists are append-only.
impl Keyed for LogEntry {
    const KEY: KeySchema = KeySchema::EMPTY;
}

impl LogEntry {
    /// Entry stamped with the current local time, at CLF (second) precision.
    pub fn now(
        ip: impl Into<String>,
        method: impl Into<String>,
        uri: impl Into<String>,
        status: u16,
    ) -> Self {
        let ts: DateTime<FixedOffset> = Local::now().into();
        Self {
            ts: ts.with_nanosecond(0).unwrap_or(ts),
            ip: ip.into(),
            user: None,
            method: method.into(),
            uri: uri.into(),
            protocol: None,
            status,
            length: None,
        }
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {} [{}] \"{} {}",
            self.ip,
            self.user.as_deref().unwrap_or("-"),
            self.ts.format(CLF_TIME),
            self.method,
            self.uri
        )?;
        if let Some(protocol) = &self.protocol {
            write!(f, " {}", protocol)?;
        }
        write!(f, "\" {} ", self.status)?;
        match self.length {
            Some(len) => write!(f, "{}", len),
            None => f.write_str("-"),
        }
    }
}

impl FromStr for LogEntry {
    type Err = LogError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let bad = || LogError::Parse(line.to_string());

        let (ip, rest) = line.split_once(' ').ok_or_else(bad)?;
        let (_ident, rest) = rest.split_once(' ').ok_or_else(bad)?;
        let (user, rest) = rest.split_once(' ').ok_or_else(bad)?;

        let rest = rest.strip_prefix('[').ok_or_else(bad)?;
        let (ts, rest) = rest.split_once("] ").ok_or_else(bad)?;
        let ts = DateTime::parse_from_str(ts, CLF_TIME).map_err(|_| bad())?;

        let rest = rest.strip_prefix('"').ok_or_else(bad)?;
        let (request, rest) = rest.rsplit_once("\" ").ok_or_else(bad)?;
        let mut request = request.split(' ');
        let method = request.next().filter(|m| !m.is_empty()).ok_or_else(bad)?;
        let uri = request.next().ok_or_else(bad)?;
        let protocol = request.next();

        let mut tail = rest.split_whitespace();
        let status = tail.next().and_then(|s| s.parse().ok()).ok_or_else(bad)?;
        let length = match tail.next() {
            None | Some("-") => None,
            Some(n) => Some(n.parse().map_err(|_| bad())?),
        };

        Ok(Self {
            ts,
            ip: ip.to_string(),
            user: (user != "-").then(|| user.to_string()),
            method: method.to_string(),
            uri: uri.to_string(),
            protocol: protocol.map(str::to_string),
            status,
            length,
        })
    }
}

struct LogFile {
    path: PathBuf,
    /// Append handle, opened on first write and dropped after a write error.
    /// Held while appending and while opening a live list.
    out: Mutex<Option<BufWriter<File>>>,
}

impl LogFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            out: Mutex::new(None),
        }
    }

    fn open(&self) -> std::io::Result<BufWriter<File>> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        Ok(BufWriter::new(file))
    }
}

/// Configured logs, by name.
pub struct LogBook {
    bus: Arc<AdminBus>,
    files: RwLock<BTreeMap<String, Arc<LogFile>>>,
}

impl LogBook {
    pub fn new(bus: Arc<AdminBus>, logs: impl IntoIterator<Item = (String, PathBuf)>) -> Self {
        let book = Self {
            bus,
            files: RwLock::new(BTreeMap::new()),
        };
        book.configure(logs);
        book
    }

    /// Replace the set of logs. Logs whose path is unchanged keep their state.
    pub fn configure(&self, logs: impl IntoIterator<Item = (String, PathBuf)>) {
        let mut files = self.files.write();
        let mut next = BTreeMap::new();
        for (name, path) in logs {
            let file = match files.remove(&name) {
                Some(file) if file.path == path => file,
                _ => Arc::new(LogFile::new(path)),
            };
            next.insert(name, file);
        }
        *files = next;
    }

    pub fn names(&self) -> Vec<String> {
        self.files.read().keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.files.read().contains_key(name)
    }

    /// File backing `name`.
    pub fn path(&self, name: &str) -> Option<PathBuf> {
        self.files.read().get(name).map(|f| f.path.clone())
    }

    fn file(&self, name: &str) -> Result<Arc<LogFile>, LogError> {
        self.files
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| LogError::NotFound(name.to_string()))
    }

    /// Append `entry` to log `name` and publish it.
    pub fn append(&self, name: &str, entry: LogEntry) -> Result<(), LogError> {
        let file = self.file(name)?;
        let mut out = file.out.lock();

        let mut writer = match out.take() {
            Some(writer) => writer,
            None => file.open()?,
        };
        writeln!(writer, "{}", entry)?;
        writer.flush()?;
        *out = Some(writer);

        self.bus.emit(&AdminEvent::LogAppended {
            log: name.to_string(),
            entry,
        });
        Ok(())
    }

    /// Open a live list of log `name`: its history, then appended entries.
    pub fn open_list(&self, name: &str, capacity: usize) -> Result<LiveStream<LogEntry>, LogError> {
        let view = LogView {
            bus: &self.bus,
            file: self.file(name)?,
        };
        let stream = livelist::open(&view, capacity, |list| bind(list, name))?;
        Ok(stream)
    }
}

impl fmt::Debug for LogBook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogBook").field("logs", &self.names()).finish()
    }
}

struct LogView<'a> {
    bus: &'a Arc<AdminBus>,
    file: Arc<LogFile>,
}

impl Producer<AdminEvent> for LogView<'_> {
    type Item = LogEntry;

    fn snapshot_and_subscribe(
        &self,
        map: EventMap<AdminEvent>,
    ) -> livelist::Result<(Snapshot<LogEntry>, Subscription<AdminEvent>)> {
        let lock = self.file.out.lock();
        let len = match std::fs::metadata(&self.file.path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };
        let subscription = Subscription::bind(self.bus, map);
        drop(lock);

        Ok((history(&self.file.path, len), subscription))
    }
}

/// Entries of the first `len` bytes of `path`.
fn history(path: &Path, len: u64) -> Snapshot<LogEntry> {
    if len == 0 {
        return Snapshot::Items(Vec::new());
    }
    let path = path.to_path_buf();

    let segments = stream::once(async move {
        let file = tokio::fs::File::open(&path).await?;
        Ok::<_, std::io::Error>(BufReader::new(file.take(len)).split(b'\n'))
    })
    .map_ok(|segments| {
        stream::try_unfold(segments, |mut segments| async move {
            let segment = segments.next_segment().await?;
            Ok::<_, std::io::Error>(segment.map(|raw| (raw, segments)))
        })
    })
    .try_flatten();

    let entries = segments
        .map_err(LiveError::from)
        .try_filter_map(|raw| async move { Ok(parse_line(&raw)) });
    Snapshot::from_stream(entries.boxed())
}

fn parse_line(raw: &[u8]) -> Option<LogEntry> {
    let line = match std::str::from_utf8(raw) {
        Ok(line) => line.trim_end_matches('\r'),
        Err(e) => {
            debug!("Skipping undecodable log line: {}", e);
            return None;
        }
    };
    if line.is_empty() {
        return None;
    }
    match line.parse() {
        Ok(entry) => Some(entry),
        Err(e) => {
            debug!("Skipping log line: {}", e);
            None
        }
    }
}

/// Forward entries appended to log `name` to `list`.
fn bind(list: &LiveList<LogEntry>, name: &str) -> EventMap<AdminEvent> {
    let list = list.clone();
    let name = name.to_string();
    EventMap::new().on(LOG_APPENDED, move |ev: &AdminEvent| {
        if let AdminEvent::LogAppended { log, entry } = ev {
            if *log == name {
                list.add(entry.clone());
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use livelist::{EventBus, Frame};
    use tempfile::TempDir;

    const LINE: &str =
        r#"10.0.0.2 - ops [10/Oct/2025:13:55:36 +0200] "GET /api/get_status HTTP/1.1" 200 183"#;

    fn book(dir: &TempDir) -> (Arc<AdminBus>, LogBook) {
        let bus = Arc::new(EventBus::new());
        let book = LogBook::new(
            Arc::clone(&bus),
            [
                ("log".to_string(), dir.path().join("admin.log")),
                ("access".to_string(), dir.path().join("sub").join("access.log")),
            ],
        );
        (bus, book)
    }

    fn entry(uri: &str) -> LogEntry {
        LogEntry::now("127.0.0.1", "GET", uri, 200)
    }

    #[test]
    fn test_parse_clf_line() {
        let entry: LogEntry = LINE.parse().unwrap();
        assert_eq!(entry.ip, "10.0.0.2");
        assert_eq!(entry.user.as_deref(), Some("ops"));
        assert_eq!(entry.method, "GET");
        assert_eq!(entry.uri, "/api/get_status");
        assert_eq!(entry.protocol.as_deref(), Some("HTTP/1.1"));
        assert_eq!(entry.status, 200);
        assert_eq!(entry.length, Some(183));
        assert_eq!(entry.to_string(), LINE);
    }

    #[test]
    fn test_parse_anonymous_without_length() {
        let line = r#"::1 - - [01/Jan/2026:00:00:00 +0000] "POST /api/set_config" 409 -"#;
        let entry: LogEntry = line.parse().unwrap();
        assert_eq!(entry.user, None);
        assert_eq!(entry.protocol, None);
        assert_eq!(entry.length, None);
        assert_eq!(entry.to_string(), line);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<LogEntry>().is_err());
        assert!("hello world".parse::<LogEntry>().is_err());
        assert!(r#"1.2.3.4 - - [yesterday] "GET / HTTP/1.1" 200 1"#
            .parse::<LogEntry>()
            .is_err());
    }

    #[test]
    fn test_unknown_log() {
        let dir = TempDir::new().unwrap();
        let (bus, book) = book(&dir);
        assert!(matches!(book.open_list("nope", 8), Err(LogError::NotFound(_))));
        assert!(matches!(book.append("nope", entry("/")), Err(LogError::NotFound(_))));
        assert!(bus.is_empty());
    }

    #[tokio::test]
    async fn test_history_then_live() {
        let dir = TempDir::new().unwrap();
        let (_bus, book) = book(&dir);
        book.append("access", entry("/one")).unwrap();
        book.append("access", entry("/two")).unwrap();
        std::fs::OpenOptions::new()
            .append(true)
            .open(book.path("access").unwrap())
            .and_then(|mut f| writeln!(f, "not a log line"))
            .unwrap();

        let mut stream = book.open_list("access", 16).unwrap();
        book.append("access", entry("/three")).unwrap();
        book.append("log", entry("/elsewhere")).unwrap();

        let mut uris = Vec::new();
        let mut saw_ready = false;
        while let Some(frame) = stream.next().await {
            match frame {
                Frame::Add(e) => uris.push(e.uri),
                Frame::Ready => saw_ready = true,
                other => panic!("unexpected frame {:?}", other),
            }
            if uris.len() == 3 {
                break;
            }
        }
        assert!(saw_ready);
        assert_eq!(uris, vec!["/one", "/two", "/three"]);
    }

    #[tokio::test]
    async fn test_history_skips_undecodable_lines() {
        let dir = TempDir::new().unwrap();
        let (_bus, book) = book(&dir);
        book.append("log", entry("/one")).unwrap();
        std::fs::OpenOptions::new()
            .append(true)
            .open(book.path("log").unwrap())
            .and_then(|mut f| f.write_all(b"\xff\xfe garbage\r\n\n"))
            .unwrap();
        book.append("log", entry("/two")).unwrap();

        let mut stream = book.open_list("log", 16).unwrap();
        let frames: Vec<_> = (&mut stream).take(3).collect().await;
        let uris: Vec<_> = frames
            .iter()
            .filter_map(|frame| match frame {
                Frame::Add(e) => Some(e.uri.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(uris, vec!["/one", "/two"]);
        assert_eq!(frames[2], Frame::Ready);
        assert!(!stream.is_finished());
    }

    #[test]
    fn test_parse_line_tolerates_crlf() {
        let crlf = format!("{}\r", LINE);
        assert_eq!(parse_line(crlf.as_bytes()).map(|e| e.uri), Some("/api/get_status".into()));
        assert!(parse_line(b"").is_none());
        assert!(parse_line(b"\xff").is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_append_reuses_open_handle() {
        let dir = TempDir::new().unwrap();
        let (_bus, book) = book(&dir);
        book.append("access", entry("/one")).unwrap();

        let moved = dir.path().join("moved.log");
        std::fs::rename(book.path("access").unwrap(), &moved).unwrap();
        book.append("access", entry("/two")).unwrap();

        let text = std::fs::read_to_string(&moved).unwrap();
        let uris: Vec<_> = text
            .lines()
            .map(|line| line.parse::<LogEntry>().unwrap().uri)
            .collect();
        assert_eq!(uris, vec!["/one", "/two"]);
        assert!(!book.path("access").unwrap().exists());
    }

    #[test]
    fn test_reconfigured_path_opens_new_file() {
        let dir = TempDir::new().unwrap();
        let (_bus, book) = book(&dir);
        book.append("log", entry("/one")).unwrap();

        let other = dir.path().join("other.log");
        book.configure([("log".to_string(), other.clone())]);
        book.append("log", entry("/two")).unwrap();

        let first = std::fs::read_to_string(dir.path().join("admin.log")).unwrap();
        let second = std::fs::read_to_string(&other).unwrap();
        assert_eq!(first.lines().count(), 1);
        assert!(second.contains("/two"));
    }

    #[tokio::test]
    async fn test_missing_file_is_empty_history() {
        let dir = TempDir::new().unwrap();
        let (_bus, book) = book(&dir);
        let mut stream = book.open_list("log", 16).unwrap();
        assert_eq!(stream.next().await, Some(Frame::Ready));
    }

    #[test]
    fn test_configure_keeps_unchanged_logs() {
        let dir = TempDir::new().unwrap();
        let (_bus, book) = book(&dir);
        book.configure([("log".to_string(), dir.path().join("admin.log"))]);
        assert_eq!(book.names(), vec!["log".to_string()]);
        assert!(!book.contains("access"));
    }
}
