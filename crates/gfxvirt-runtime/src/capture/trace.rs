//! Recorded calls and the sinks they are written to.

use std::io::Write;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::value::{ReturnValue, Value};

/// One intercepted call, with every handle expressed as a virtual id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiCallRecord {
    pub call: String,
    /// Begins a tracked entry (object lifetime or command-buffer state).
    pub tracked: bool,
    pub params: Vec<Value>,
    pub result: ReturnValue,
    /// The call failed and its output parameters were not encoded.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub output_omitted: bool,
}

pub trait TraceWriter: Send + Sync {
    fn write_call(&self, record: &ApiCallRecord);

    fn flush(&self) {}
}

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct MemoryTrace {
    records: Mutex<Vec<ApiCallRecord>>,
}

impl MemoryTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ApiCallRecord> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn take(&self) -> Vec<ApiCallRecord> {
        std::mem::take(
            &mut *self
                .records
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TraceWriter for MemoryTrace {
    fn write_call(&self, record: &ApiCallRecord) {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(record.clone());
    }
}

/// Writes one JSON object per line.
#[derive(Debug)]
pub struct JsonLinesTrace<W> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLinesTrace<W> {
    pub fn new(out: W) -> Self {
        Self { out: Mutex::new(out) }
    }

    pub fn into_inner(self) -> W {
        self.out
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<W: Write + Send> TraceWriter for JsonLinesTrace<W> {
    fn write_call(&self, record: &ApiCallRecord) {
        let mut out = self
            .out
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let written = serde_json::to_writer(&mut *out, record)
            .map_err(std::io::Error::from)
            .and_then(|()| out.write_all(b"\n"));
        if let Err(err) = written {
            warn!(call = %record.call, %err, "failed to write trace record");
        }
    }

    fn flush(&self) {
        let mut out = self
            .out
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Err(err) = out.flush() {
            warn!(%err, "failed to flush trace");
        }
    }
}

/// Parses a JSON-lines trace back into records.
pub fn read_json_lines(text: &str) -> Result<Vec<ApiCallRecord>, serde_json::Error> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(serde_json::from_str)
        .collect()
}
