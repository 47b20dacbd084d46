//! Global Logger Module
//!
//! Unified logging interface. Records are echoed to stderr and, once `init`
//! has been called, persisted to the SQLite `global_logs` table by a
//! background batch writer.

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{mpsc, Once, RwLock};
use std::time::{Duration, Instant};

static INIT: Once = Once::new();

const BATCH_SIZE: usize = 100;
const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

// Log message for batching
#[derive(Debug, Clone)]
struct LogMessage {
    timestamp: i64,
    level: LogLevel,
    source: String,
    message: String,
}

// Async log channel sender
static LOG_SENDER: RwLock<Option<mpsc::Sender<LogMessage>>> = RwLock::new(None);

static MIN_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum LogLevel {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Debug,
            1 => LogLevel::Info,
            2 => LogLevel::Warn,
            _ => LogLevel::Error,
        }
    }
}

/// Set the minimum level echoed to stderr. Persistence keeps every level.
pub fn set_level(level: LogLevel) {
    MIN_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn level() -> LogLevel {
    LogLevel::from_u8(MIN_LEVEL.load(Ordering::Relaxed))
}

fn open_conn(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

fn create_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS global_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp INTEGER NOT NULL,
            level TEXT NOT NULL,
            source TEXT NOT NULL,
            message TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_global_logs_timestamp ON global_logs(timestamp DESC);
        CREATE INDEX IF NOT EXISTS idx_global_logs_level ON global_logs(level);",
    )
}

/// Start persisting logs to `db_path`. Later calls are no-ops.
pub fn init(db_path: &Path) {
    INIT.call_once(|| {
        let path = db_path.to_path_buf();
        match open_conn(&path).and_then(|conn| create_schema(&conn)) {
            Ok(()) => spawn_batch_writer(path),
            Err(e) => eprintln!("[logger] failed to initialize log table: {}", e),
        }
    });
}

fn spawn_batch_writer(path: PathBuf) {
    let (tx, rx) = mpsc::channel::<LogMessage>();

    if let Ok(mut sender) = LOG_SENDER.write() {
        *sender = Some(tx);
    }

    std::thread::spawn(move || {
        let mut buffer = Vec::with_capacity(BATCH_SIZE);
        let mut last_flush = Instant::now();

        loop {
            let timeout = FLUSH_INTERVAL
                .checked_sub(last_flush.elapsed())
                .unwrap_or(Duration::ZERO);

            match rx.recv_timeout(timeout) {
                Ok(msg) => {
                    buffer.push(msg);
                    if buffer.len() >= BATCH_SIZE || last_flush.elapsed() >= FLUSH_INTERVAL {
                        flush_logs(&path, &mut buffer);
                        last_flush = Instant::now();
                    }
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    flush_logs(&path, &mut buffer);
                    last_flush = Instant::now();
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }

        flush_logs(&path, &mut buffer);
    });
}

fn flush_logs(path: &Path, buffer: &mut Vec<LogMessage>) {
    if buffer.is_empty() {
        return;
    }

    let result = open_conn(path).and_then(|mut conn| {
        let tx = conn.transaction()?;
        for msg in buffer.iter() {
            tx.execute(
                "INSERT INTO global_logs (timestamp, level, source, message) VALUES (?1, ?2, ?3, ?4)",
                params![msg.timestamp, msg.level.as_str(), msg.source, msg.message],
            )?;
        }
        tx.commit()
    });

    if let Err(e) = result {
        eprintln!("[logger] dropped {} log records: {}", buffer.len(), e);
    }
    buffer.clear();
}

fn format_line(msg: &LogMessage) -> String {
    let ts = chrono::DateTime::from_timestamp(msg.timestamp, 0)
        .map(|t| t.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_default();
    format!(
        "{} {:<5} [{}] {}",
        ts,
        msg.level.as_str().to_uppercase(),
        msg.source,
        msg.message
    )
}

fn log_internal(level: LogLevel, source: &str, message: &str) {
    let msg = LogMessage {
        timestamp: chrono::Utc::now().timestamp(),
        level,
        source: source.to_string(),
        message: message.to_string(),
    };

    if level >= self::level() {
        eprintln!("{}", format_line(&msg));
    }

    if let Ok(guard) = LOG_SENDER.read() {
        if let Some(sender) = guard.as_ref() {
            let _ = sender.send(msg);
        }
    }
}

pub fn debug(source: &str, message: &str) {
    log_internal(LogLevel::Debug, source, message);
}

pub fn info(source: &str, message: &str) {
    log_internal(LogLevel::Info, source, message);
}

pub fn warn(source: &str, message: &str) {
    log_internal(LogLevel::Warn, source, message);
}

pub fn error(source: &str, message: &str) {
    log_internal(LogLevel::Error, source, message);
}
