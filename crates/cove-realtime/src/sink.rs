//! The outbound sink capability.
//!
//! A sink is anything that can accept one serialized event frame without
//! blocking and report failure synchronously. Transports (WebSocket, SSE)
//! satisfy the contract with a bounded mpsc sender whose receiver side
//! drains into the actual connection.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Why a sink write was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SinkError {
    /// The receiving side is gone (client disconnected).
    #[error("sink closed")]
    Closed,
    /// The bounded buffer is full (client too slow to drain it).
    #[error("sink buffer full")]
    Full,
}

/// Write-capable handle to one connection's outbound stream.
///
/// `try_send` must never block: a slow client costs the fan-out loop one
/// failed write, not a stall.
pub trait EventSink: Send + Sync {
    fn try_send(&self, frame: &str) -> Result<(), SinkError>;
}

impl EventSink for mpsc::Sender<String> {
    fn try_send(&self, frame: &str) -> Result<(), SinkError> {
        mpsc::Sender::try_send(self, frame.to_string()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::Full,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

impl<S: EventSink + ?Sized> EventSink for Arc<S> {
    fn try_send(&self, frame: &str) -> Result<(), SinkError> {
        (**self).try_send(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mpsc_sender_reports_full_and_closed() {
        let (tx, mut rx) = mpsc::channel::<String>(1);

        EventSink::try_send(&tx, "one").expect("first send fits the buffer");
        assert_eq!(EventSink::try_send(&tx, "two"), Err(SinkError::Full));

        rx.recv().await.expect("buffered frame");
        rx.close();
        // Drain-then-close: further sends fail with Closed.
        while rx.recv().await.is_some() {}
        assert_eq!(EventSink::try_send(&tx, "three"), Err(SinkError::Closed));
    }
}
