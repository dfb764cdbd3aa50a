//! Tracing for transaction and collection events
//!
//! This module records:
//! - Transaction begin / commit / abort, with the transaction's serial number
//! - Image loads and writes for file-backed stores
//! - Mutating list and dict operations with the resulting length
//!
//! Enable with OOCMAP_TRACE=1 (or `StoreOptions::trace`). Set
//! OOCMAP_TRACE_FILE=<path> to append events to a file instead of stderr.

use std::fmt::Write as FmtWrite;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::Mutex;
use std::sync::Once;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use crate::key::CollectionId;

/// Global flag to enable/disable tracing
static TRACING_ENABLED: AtomicBool = AtomicBool::new(false);
/// Global event counter for ordering
static EVENT_COUNTER: AtomicU64 = AtomicU64::new(0);
/// Start time for relative timestamps
static START_TIME: Mutex<Option<Instant>> = Mutex::new(None);
/// File for incremental output; stderr when unset
static TRACE_FILE: Mutex<Option<File>> = Mutex::new(None);
/// Most recent events, kept so a failing caller can dump them
static RECENT_EVENTS: Mutex<Vec<TraceEvent>> = Mutex::new(Vec::new());

static ENV_INIT: Once = Once::new();

const RECENT_CAPACITY: usize = 1024;

/// Read the environment once. Called whenever a store is opened.
pub fn init() {
    ENV_INIT.call_once(|| {
        if std::env::var("OOCMAP_TRACE").is_ok() {
            enable();
        }
    });
}

/// Turn tracing on for the rest of the process.
pub fn enable() {
    if TRACING_ENABLED.swap(true, Ordering::SeqCst) {
        return;
    }
    if let Ok(mut start) = START_TIME.lock() {
        *start = Some(Instant::now());
    }

    if let Ok(path) = std::env::var("OOCMAP_TRACE_FILE") {
        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(mut file) => {
                let _ = writeln!(file, "# oocmap trace");
                let _ = writeln!(file, "# Format: seq timestamp_us event details");
                if let Ok(mut guard) = TRACE_FILE.lock() {
                    *guard = Some(file);
                }
                eprintln!("[OOC_TRACE] Tracing to {}", path);
            }
            Err(e) => {
                eprintln!("[OOC_TRACE] Failed to open trace file {}: {}", path, e);
            }
        }
    }
}

/// Check if tracing is enabled
#[inline]
pub fn is_enabled() -> bool {
    TRACING_ENABLED.load(Ordering::Relaxed)
}

fn timestamp_us() -> u64 {
    if let Ok(start) = START_TIME.lock() {
        if let Some(start) = *start {
            return start.elapsed().as_micros() as u64;
        }
    }
    0
}

#[derive(Debug, Clone)]
pub struct TraceEvent {
    pub seq: u64,
    pub timestamp_us: u64,
    pub event: EventKind,
}

#[derive(Debug, Clone)]
pub enum EventKind {
    TxnBegin { txn: u64, write: bool },
    TxnCommit { txn: u64, write: bool },
    TxnAbort { txn: u64, write: bool },
    ImageLoad { bytes: usize, entries: usize },
    ImageWrite { bytes: usize },
    ImageCompact { log_bytes: u64, ok: bool },
    ListOp {
        op: &'static str,
        id: CollectionId,
        length: u32,
    },
    DictOp {
        op: &'static str,
        id: CollectionId,
        count: u32,
    },
}

fn mode(write: bool) -> &'static str {
    if write { "rw" } else { "ro" }
}

fn format_event(event: &TraceEvent) -> String {
    let mut line = String::new();
    let _ = write!(line, "{:08} {:012} ", event.seq, event.timestamp_us);
    let _ = match &event.event {
        EventKind::TxnBegin { txn, write } => {
            write!(line, "TXN_BEGIN  txn={} mode={}", txn, mode(*write))
        }
        EventKind::TxnCommit { txn, write } => {
            write!(line, "TXN_COMMIT txn={} mode={}", txn, mode(*write))
        }
        EventKind::TxnAbort { txn, write } => {
            write!(line, "TXN_ABORT  txn={} mode={}", txn, mode(*write))
        }
        EventKind::ImageLoad { bytes, entries } => {
            write!(line, "IMG_LOAD   bytes={} entries={}", bytes, entries)
        }
        EventKind::ImageWrite { bytes } => write!(line, "IMG_WRITE  bytes={}", bytes),
        EventKind::ImageCompact { log_bytes, ok } => {
            write!(line, "IMG_COMPACT log_bytes={} ok={}", log_bytes, ok)
        }
        EventKind::ListOp { op, id, length } => {
            write!(line, "LIST       op={} id={} len={}", op, id, length)
        }
        EventKind::DictOp { op, id, count } => {
            write!(line, "DICT       op={} id={} count={}", op, id, count)
        }
    };
    line
}

/// Record an event
pub fn record(event: EventKind) {
    if !is_enabled() {
        return;
    }

    let trace_event = TraceEvent {
        seq: EVENT_COUNTER.fetch_add(1, Ordering::SeqCst),
        timestamp_us: timestamp_us(),
        event,
    };

    let line = format_event(&trace_event);
    match TRACE_FILE.lock() {
        Ok(mut guard) => match guard.as_mut() {
            Some(file) => {
                let _ = writeln!(file, "{}", line);
            }
            None => eprintln!("[OOC_TRACE] {}", line),
        },
        Err(_) => eprintln!("[OOC_TRACE] {}", line),
    }

    if let Ok(mut recent) = RECENT_EVENTS.lock() {
        if recent.len() >= RECENT_CAPACITY {
            recent.remove(0);
        }
        recent.push(trace_event);
    }
}

/// Formatted copy of the most recent events.
pub fn recent_events() -> Vec<String> {
    match RECENT_EVENTS.lock() {
        Ok(recent) => recent.iter().map(format_event).collect(),
        Err(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_txn_event() {
        let event = TraceEvent {
            seq: 7,
            timestamp_us: 1500,
            event: EventKind::TxnCommit {
                txn: 3,
                write: true,
            },
        };
        assert_eq!(
            format_event(&event),
            "00000007 000000001500 TXN_COMMIT txn=3 mode=rw"
        );
    }

    #[test]
    fn test_format_list_event() {
        let event = TraceEvent {
            seq: 0,
            timestamp_us: 0,
            event: EventKind::ListOp {
                op: "repeat",
                id: 9,
                length: 6,
            },
        };
        assert!(format_event(&event).ends_with("LIST       op=repeat id=9 len=6"));
    }
}
