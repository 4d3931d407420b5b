//! Status record decoding
//!
//! The probe agent writes one JSON object per line. Lines that are JSON but
//! carry no counters are agent diagnostics and are skipped; anything that is
//! not JSON at all means the stream is corrupt.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::common::{Error, Result};

/// Cumulative dial counters reported by the agent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusRecord {
    pub success: u64,
    pub fail: u64,
}

/// One line of agent output as written on the wire
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WireRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WireRecord {
    fn counters(&self) -> Option<StatusRecord> {
        Some(StatusRecord {
            success: self.success?,
            fail: self.fail?,
        })
    }
}

/// Decode a single line
///
/// Returns `Ok(None)` for blank lines and for JSON objects without both counters.
pub fn decode_line(line: &str) -> Result<Option<StatusRecord>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let wire: WireRecord = serde_json::from_str(line)
        .map_err(|e| Error::StreamDecode(format!("{} in line '{}'", e, truncate(line))))?;

    if let Some(error) = &wire.error {
        tracing::debug!(error = %error, "Probe reported dial error");
    }
    Ok(wire.counters())
}

fn truncate(line: &str) -> &str {
    match line.char_indices().nth(120) {
        Some((idx, _)) => &line[..idx],
        None => line,
    }
}

/// Longest line accepted from the agent, excluding the newline
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Reads status records from followed container output
pub struct RecordReader<R> {
    reader: R,
    line: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin> RecordReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: Vec::new(),
        }
    }

    /// Next status record, or `None` once the stream ends
    pub async fn next_record(&mut self) -> Result<Option<StatusRecord>> {
        loop {
            self.line.clear();
            let limit = MAX_LINE_LEN as u64 + 1;
            let bytes_read = (&mut self.reader)
                .take(limit)
                .read_until(b'\n', &mut self.line)
                .await?;
            if bytes_read == 0 {
                return Ok(None);
            }
            if self.line.len() > MAX_LINE_LEN && self.line.last() != Some(&b'\n') {
                return Err(Error::StreamDecode(format!(
                    "line longer than {} bytes",
                    MAX_LINE_LEN
                )));
            }

            let line = std::str::from_utf8(&self.line)
                .map_err(|e| Error::StreamDecode(format!("invalid UTF-8 in line: {}", e)))?;
            if let Some(record) = decode_line(line)? {
                return Ok(Some(record));
            }
        }
    }
}
