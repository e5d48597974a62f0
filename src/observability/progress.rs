//! Progress notifications
//!
//! Advisory events raised at fixed checkpoints of a request. Sinks must not
//! block; the pipeline never waits on, or fails because of, a sink.

use crate::execution_loop::attempt::AttemptOutcome;
use crate::sql::CandidateSource;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    ExtractionComplete {
        attempt: u32,
        source: Option<CandidateSource>,
        sql: String,
    },
    ExecutionComplete {
        attempt: u32,
        outcome: AttemptOutcome,
        row_count: usize,
        duration_ms: u64,
    },
    RetryTriggered {
        attempt: u32,
        next_attempt: u32,
        reason: String,
    },
    Finished {
        success: bool,
        attempt_count: u32,
    },
}

pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Logs every event at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn emit(&self, event: ProgressEvent) {
        match &event {
            ProgressEvent::ExtractionComplete { attempt, source, .. } => {
                info!("Attempt {}: extraction complete ({:?})", attempt, source)
            }
            ProgressEvent::ExecutionComplete {
                attempt,
                outcome,
                row_count,
                duration_ms,
            } => info!(
                "Attempt {}: execution complete, {:?}, {} rows in {}ms",
                attempt, outcome, row_count, duration_ms
            ),
            ProgressEvent::RetryTriggered {
                attempt,
                next_attempt,
                reason,
            } => info!(
                "Attempt {} failed ({}), retrying as attempt {}",
                attempt, reason, next_attempt
            ),
            ProgressEvent::Finished {
                success,
                attempt_count,
            } => info!(
                "Finished after {} attempt(s), success={}",
                attempt_count, success
            ),
        }
    }
}

/// Forwards events to a channel, e.g. for streaming to a client.
/// Events are dropped once the receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelProgress {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelProgress {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelProgress {
    fn emit(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_progress_forwards_events() {
        let (sink, mut rx) = ChannelProgress::new();
        sink.emit(ProgressEvent::Finished {
            success: true,
            attempt_count: 1,
        });
        assert_eq!(
            rx.recv().await,
            Some(ProgressEvent::Finished {
                success: true,
                attempt_count: 1
            })
        );
    }

    #[test]
    fn test_closed_channel_is_ignored() {
        let (sink, rx) = ChannelProgress::new();
        drop(rx);
        sink.emit(ProgressEvent::RetryTriggered {
            attempt: 1,
            next_attempt: 2,
            reason: "zero rows".to_string(),
        });
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let json = serde_json::to_value(ProgressEvent::Finished {
            success: false,
            attempt_count: 2,
        })
        .unwrap();
        assert_eq!(json["event"], "finished");
    }
}
