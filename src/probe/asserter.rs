//! Reachability assertion
//!
//! Verdicts are edge-triggered: only a change in a counter between two
//! consecutive records decides a case. Counts carried over from before the
//! log window count as a change against the initial `{0, 0}`.

use std::time::Duration;

use tokio::io::AsyncBufRead;
use tokio_util::sync::CancellationToken;

use crate::common::{Error, Result};

use super::stream::{RecordReader, StatusRecord};

/// What a test case expects of the destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expectation {
    Reachable,
    Unreachable,
}

/// Decide a verdict from two consecutive records
///
/// `None` means undecided. A record where both counters moved is decided by
/// the counter that contradicts the expectation.
pub fn evaluate(
    expectation: Expectation,
    previous: StatusRecord,
    current: StatusRecord,
) -> Option<Result<()>> {
    let succeeded = current.success > previous.success;
    let failed = current.fail > previous.fail;

    match expectation {
        Expectation::Reachable if failed => Some(Err(Error::AssertionMismatch(
            "could not reach destination".to_string(),
        ))),
        Expectation::Reachable if succeeded => Some(Ok(())),
        Expectation::Unreachable if succeeded => Some(Err(Error::AssertionMismatch(
            "destination was unexpectedly reachable".to_string(),
        ))),
        Expectation::Unreachable if failed => Some(Ok(())),
        _ => None,
    }
}

/// Read records until the expectation is met or violated
pub async fn assert_records<R: AsyncBufRead + Unpin>(
    reader: &mut RecordReader<R>,
    expectation: Expectation,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    let decide = async {
        let mut previous = StatusRecord::default();
        while let Some(current) = reader.next_record().await? {
            tracing::debug!(success = current.success, fail = current.fail, "Status record");
            if let Some(verdict) = evaluate(expectation, previous, current) {
                return verdict;
            }
            previous = current;
        }
        Err(Error::StreamEnded)
    };

    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        verdict = tokio::time::timeout(timeout, decide) => {
            verdict.unwrap_or(Err(Error::AssertionTimeout(timeout.as_secs())))
        }
    }
}
