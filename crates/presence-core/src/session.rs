//! Per-connection session driver.
//!
//! A session walks one connection through `Connecting → Admitted → Closed`:
//! it reads the admission payload, reserves an identity, writes the
//! admission messages, has the hub announce the connection, then pumps the
//! outbox onto the socket and socket messages into [`Hub::relay`] until
//! either side goes away.

use crate::hub::{Admitted, Hub};
use crate::outbox::{self, OutboxReceiver};
use presence_protocol::{codec, ClientId};
use presence_transport::{Connection, Transport, TransportError};
use std::sync::Arc;
use tracing::{debug, warn};

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The connection closed before sending an admission payload.
    Abandoned,
    /// The first message was not a valid admission payload.
    Rejected,
    /// The hub refused the admission.
    Refused,
    /// The admission messages could not be written, so the connection was
    /// never announced.
    Aborted,
    /// The connection was admitted and has since left.
    Completed {
        /// Identity the connection held.
        id: ClientId,
    },
}

/// Drive one connection from admission to close.
///
/// Never allocates an identity for a connection whose first message is not
/// an admission payload. Once admitted, any transport failure or hub-side
/// eviction ends the session; the identity is released exactly once.
pub async fn run_session(hub: Arc<Hub>, conn: Box<dyn Connection>) -> SessionOutcome {
    run_session_with(hub, conn, |_| {}).await
}

/// [`run_session`], calling `on_admitted` right after the connection has
/// been announced.
pub async fn run_session_with<F>(
    hub: Arc<Hub>,
    mut conn: Box<dyn Connection>,
    on_admitted: F,
) -> SessionOutcome
where
    F: FnOnce(&Admitted) + Send,
{
    let label = conn.id().clone();

    let first = match conn.recv().await {
        Ok(Some(text)) => text,
        Ok(None) => {
            debug!(connection = %label, "Closed before admission");
            return SessionOutcome::Abandoned;
        }
        Err(e) => {
            debug!(connection = %label, error = %e, "Transport error before admission");
            return SessionOutcome::Abandoned;
        }
    };

    let admission = match codec::decode_admission(&first) {
        Ok(admission) => admission,
        Err(e) => {
            warn!(connection = %label, error = %e, "Malformed admission, closing");
            close(conn.as_mut()).await;
            return SessionOutcome::Rejected;
        }
    };

    let (outbox, mut queued) = outbox::channel(hub.config().outbox_capacity);
    let admitted = match hub.admit(outbox, admission.user_data) {
        Ok(admitted) => admitted,
        Err(e) => {
            warn!(connection = %label, error = %e, "Admission refused, closing");
            close(conn.as_mut()).await;
            return SessionOutcome::Refused;
        }
    };

    if let Err(e) = write_intro(conn.as_mut(), &mut queued, admitted.intro_messages).await {
        debug!(client_id = %admitted.id, error = %e, "Admission messages not written, withdrawing");
        hub.evict_admission(&admitted);
        close(conn.as_mut()).await;
        return SessionOutcome::Aborted;
    }
    if let Err(e) = hub.announce(&admitted) {
        debug!(client_id = %admitted.id, error = %e, "Admission withdrawn before announcement");
        close(conn.as_mut()).await;
        return SessionOutcome::Aborted;
    }
    on_admitted(&admitted);

    debug!(
        connection = %label,
        client_id = %admitted.id,
        remote = ?conn.remote_addr(),
        "Session admitted"
    );

    loop {
        tokio::select! {
            biased;

            next = queued.recv() => match next {
                Some(text) => {
                    if let Err(e) = conn.send(&text).await {
                        debug!(client_id = %admitted.id, error = %e, "Send failed");
                        break;
                    }
                }
                None => {
                    debug!(client_id = %admitted.id, "Evicted by hub");
                    break;
                }
            },

            inbound = conn.recv() => match inbound {
                Ok(Some(text)) => {
                    hub.relay(admitted.id, &text);
                }
                Ok(None) => {
                    debug!(client_id = %admitted.id, "Connection closed");
                    break;
                }
                Err(e) => {
                    warn!(client_id = %admitted.id, error = %e, "Transport error");
                    break;
                }
            },
        }
    }

    hub.evict_admission(&admitted);
    close(conn.as_mut()).await;

    SessionOutcome::Completed { id: admitted.id }
}

/// Write the first `count` queued messages, the ones [`Hub::admit`] put
/// there.
async fn write_intro(
    conn: &mut dyn Connection,
    queued: &mut OutboxReceiver,
    count: usize,
) -> Result<(), TransportError> {
    for _ in 0..count {
        // The hub dropped the reservation
        let Some(text) = queued.recv().await else {
            return Err(TransportError::ConnectionClosed);
        };
        conn.send(&text).await?;
    }
    Ok(())
}

async fn close(conn: &mut dyn Connection) {
    if let Err(e) = conn.close().await {
        debug!(connection = %conn.id(), error = %e, "Close failed");
    }
}

/// Accept connections from `transport` and run a session for each.
///
/// Returns when the transport shuts down. Failed handshakes are logged and
/// skipped.
///
/// # Errors
///
/// Returns an error if the transport's listener fails.
pub async fn serve<T>(hub: Arc<Hub>, transport: &T) -> Result<(), TransportError>
where
    T: Transport + ?Sized,
{
    loop {
        match transport.accept().await {
            Ok(conn) => {
                let hub = Arc::clone(&hub);
                tokio::spawn(async move {
                    run_session(hub, conn).await;
                });
            }
            Err(TransportError::ConnectionClosed) => {
                debug!(transport = transport.name(), "Transport closed");
                return Ok(());
            }
            Err(TransportError::Io(e)) => return Err(TransportError::Io(e)),
            Err(e) => warn!(transport = transport.name(), error = %e, "Accept failed"),
        }
    }
}
