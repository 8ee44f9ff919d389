//! JSON-lines message transport.
//!
//! Reads one [`IncomingEvent`] per line and writes one [`OutgoingReply`] per
//! line for every segment that produced a non-empty reply:
//!
//! ```text
//! in:  {"message":[{"type":"image","data":{"url":"https://..."}}],"sender":{"user_id":1,"nickname":"alice"}}
//! out: {"user_id":1,"reply":"Call-out! ..."}
//! ```
//!
//! Each segment runs as its own task; replies are written in completion
//! order, not input order.

use super::Dispatcher;
use crate::models::IncomingEvent;
use crate::storage::DuplicateStore;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

/// A reply addressed to the sender of the triggering message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingReply {
    /// Recipient.
    pub user_id: u64,
    /// Reply text.
    pub reply: String,
}

/// Counters for one transport session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Events parsed.
    pub events: usize,
    /// Lines that were not valid events.
    pub malformed: usize,
    /// Segments dispatched.
    pub segments: usize,
    /// Replies written.
    pub replies: usize,
}

/// Serves events from `input` until it closes and every task has finished.
///
/// Store outages and other per-segment failures are logged and do not stop
/// the loop.
///
/// # Errors
///
/// Returns [`Error::OperationFailed`] if reading input or writing output fails.
pub async fn serve_json_lines<S, R, W>(
    dispatcher: Arc<Dispatcher<S>>,
    input: R,
    mut output: W,
) -> Result<TransportStats>
where
    S: DuplicateStore + 'static,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<OutgoingReply>();
    let mut tx = Some(tx);
    let mut lines = input.lines();
    let mut stats = TransportStats::default();

    loop {
        tokio::select! {
            line = lines.next_line(), if tx.is_some() => {
                match line.map_err(|e| io_error("read_event", &e))? {
                    Some(line) => {
                        if let Some(sender) = &tx {
                            dispatch_line(&dispatcher, &line, sender, &mut stats);
                        }
                    },
                    // Input closed: once the in-flight tasks drop their senders, recv ends.
                    None => tx = None,
                }
            },
            reply = rx.recv() => {
                let Some(reply) = reply else { break };
                write_reply(&mut output, &reply).await?;
                stats.replies += 1;
            },
        }
    }

    output
        .flush()
        .await
        .map_err(|e| io_error("flush_replies", &e))?;
    tracing::info!(
        events = stats.events,
        segments = stats.segments,
        replies = stats.replies,
        malformed = stats.malformed,
        "Transport input closed"
    );
    Ok(stats)
}

fn dispatch_line<S: DuplicateStore + 'static>(
    dispatcher: &Arc<Dispatcher<S>>,
    line: &str,
    replies: &mpsc::UnboundedSender<OutgoingReply>,
    stats: &mut TransportStats,
) {
    if line.trim().is_empty() {
        return;
    }

    let event: IncomingEvent = match serde_json::from_str(line) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(error = %e, "Skipping malformed event");
            stats.malformed += 1;
            return;
        },
    };
    stats.events += 1;

    for segment in event.message {
        stats.segments += 1;
        let dispatcher = Arc::clone(dispatcher);
        let sender = event.sender.clone();
        let replies = replies.clone();

        tokio::spawn(async move {
            match dispatcher.handle(&segment, &sender).await {
                Ok(reply) if reply.is_empty() => {},
                Ok(reply) => {
                    let _ = replies.send(OutgoingReply {
                        user_id: sender.user_id,
                        reply,
                    });
                },
                Err(e) => {
                    tracing::error!(user_id = sender.user_id, error = %e, "Segment processing failed");
                },
            }
        });
    }
}

async fn write_reply<W: AsyncWrite + Unpin>(output: &mut W, reply: &OutgoingReply) -> Result<()> {
    let mut line = serde_json::to_string(reply).map_err(|e| Error::OperationFailed {
        operation: "serialize_reply".to_string(),
        cause: e.to_string(),
    })?;
    line.push('\n');
    output
        .write_all(line.as_bytes())
        .await
        .map_err(|e| io_error("write_reply", &e))?;
    output.flush().await.map_err(|e| io_error("flush_replies", &e))
}

fn io_error(operation: &str, e: &std::io::Error) -> Error {
    Error::OperationFailed {
        operation: operation.to_string(),
        cause: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DupwatchConfig;
    use crate::features::feature_list;
    use crate::storage::MemoryDuplicateStore;
    use tokio::io::BufReader;

    fn dispatcher() -> Arc<Dispatcher<MemoryDuplicateStore>> {
        Arc::new(
            Dispatcher::from_config(MemoryDuplicateStore::new(), &DupwatchConfig::default())
                .unwrap(),
        )
    }

    async fn run(input: &str) -> (TransportStats, Vec<OutgoingReply>) {
        let mut output = Vec::new();
        let stats = serve_json_lines(dispatcher(), BufReader::new(input.as_bytes()), &mut output)
            .await
            .unwrap();
        let replies = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        (stats, replies)
    }

    #[tokio::test]
    async fn test_feature_list_round_trip() {
        let input = concat!(
            r#"{"message":[{"type":"text","data":{"text":"echo features"}}],"sender":{"user_id":7,"nickname":"alice"}}"#,
            "\n",
        );
        let (stats, replies) = run(input).await;

        assert_eq!(stats.events, 1);
        assert_eq!(stats.replies, 1);
        assert_eq!(
            replies,
            vec![OutgoingReply {
                user_id: 7,
                reply: feature_list(),
            }]
        );
    }

    #[tokio::test]
    async fn test_silent_and_malformed_lines() {
        let input = concat!(
            "not json\n",
            "\n",
            r#"{"message":[{"type":"text","data":{"text":"hi"}},{"type":"face","data":{}}],"sender":{"user_id":1,"nickname":"a"}}"#,
            "\n",
            r#"{"message":[{"type":"image","data":{"url":"not a url"}}],"sender":{"user_id":2,"nickname":"b"}}"#,
            "\n",
        );
        let (stats, replies) = run(input).await;

        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.events, 2);
        assert_eq!(stats.segments, 3);
        assert!(replies.is_empty());
    }

    #[tokio::test]
    async fn test_empty_input() {
        let (stats, replies) = run("").await;
        assert_eq!(stats, TransportStats::default());
        assert!(replies.is_empty());
    }
}
