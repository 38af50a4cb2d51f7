//! Per-connection outbound queues.
//!
//! The registry never touches the network. Delivering a message to a
//! connection means pushing pre-encoded text onto that connection's bounded
//! outbox; the connection's own session task drains it onto the socket.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Receiving half of an outbox, owned by the session task.
pub type OutboxReceiver = mpsc::Receiver<Arc<str>>;

/// Why a message could not be queued for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The consumer is not keeping up.
    #[error("outbox full")]
    Full,

    /// The session task is gone.
    #[error("outbox closed")]
    Closed,
}

/// Sending half of a connection's outbound queue.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::Sender<Arc<str>>,
}

/// Create an outbox holding at most `capacity` undelivered messages.
#[must_use]
pub fn channel(capacity: usize) -> (Outbox, OutboxReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (Outbox { tx }, rx)
}

impl Outbox {
    /// Queue a message without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError`] if the queue is full or its receiver dropped.
    pub fn deliver(&self, text: &Arc<str>) -> Result<(), DeliveryError> {
        self.tx.try_send(Arc::clone(text)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Check whether the receiving half has been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deliver_and_receive() {
        let (outbox, mut rx) = channel(2);
        let text: Arc<str> = Arc::from("hello");

        outbox.deliver(&text).unwrap();
        assert_eq!(rx.try_recv().unwrap().as_ref(), "hello");
    }

    #[test]
    fn test_full_outbox() {
        let (outbox, _rx) = channel(1);
        let text: Arc<str> = Arc::from("x");

        outbox.deliver(&text).unwrap();
        assert_eq!(outbox.deliver(&text), Err(DeliveryError::Full));
    }

    #[test]
    fn test_closed_outbox() {
        let (outbox, rx) = channel(4);
        drop(rx);

        assert!(outbox.is_closed());
        assert_eq!(outbox.deliver(&Arc::from("x")), Err(DeliveryError::Closed));
    }
}
