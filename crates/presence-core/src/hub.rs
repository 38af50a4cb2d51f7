//! The presence hub.
//!
//! The hub owns the registry behind one lock. Admission, relay and eviction
//! each run as a single critical section, so every connection observes hub
//! events in the same global order. Nothing inside the lock waits on the
//! network: delivery is a non-blocking push onto the target's outbox, and a
//! failed push evicts that target.
//!
//! Admission takes two steps. [`Hub::admit`] reserves an identity and queues
//! the newcomer's private messages; [`Hub::announce`] tells everyone else,
//! once the session has written those messages to the socket. A reservation
//! that is withdrawn in between leaves no trace for other clients.

use crate::identity::ReusePolicy;
use crate::outbox::{DeliveryError, Outbox};
use crate::registry::{Registry, RegistryError};
use parking_lot::Mutex;
use presence_protocol::{codec, ClientId, ProtocolError, ServerMessage, UserData};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

/// Hub errors.
#[derive(Debug, Error)]
pub enum HubError {
    /// The hub already holds the maximum number of connections.
    #[error("Hub is full ({0} connections)")]
    Full(usize),

    /// The new connection could not receive its admission messages.
    #[error("Admission aborted: {0}")]
    AdmissionAborted(DeliveryError),

    /// The admission was withdrawn or already announced.
    #[error("Client {0} has no pending admission")]
    NotPending(ClientId),

    /// A message could not be encoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Internal consistency fault.
    #[error("Registry inconsistent: {0}")]
    Inconsistent(#[from] RegistryError),
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Maximum number of live connections.
    pub max_connections: usize,
    /// Capacity of each connection's outbox.
    pub outbox_capacity: usize,
    /// Order in which released identities are reused.
    pub reuse_policy: ReusePolicy,
    /// Whether relayed messages are echoed back to their sender.
    pub echo_to_sender: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_connections: 1024,
            outbox_capacity: 4096,
            reuse_policy: ReusePolicy::Smallest,
            echo_to_sender: true,
        }
    }
}

/// Result of a successful admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admitted {
    /// Identity assigned to the connection.
    pub id: ClientId,
    /// Admission serial, distinguishes successive holders of `id`.
    pub serial: u64,
    /// Announced connections plus this one, as reported in `connection_info`.
    pub total_connections: usize,
    /// Messages queued on the outbox by [`Hub::admit`], all of which must be
    /// written before [`Hub::announce`].
    pub intro_messages: usize,
}

/// Hub statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Number of announced connections.
    pub connections: usize,
    /// Admissions reserved but not yet announced.
    pub pending: usize,
    /// Identities waiting for reuse.
    pub free_identities: usize,
    /// Highest identity ever minted.
    pub high_water: u32,
    /// Announced admissions since start.
    pub admitted_total: u64,
    /// Reservations dropped before they were announced.
    pub withdrawn_total: u64,
    /// Evictions of announced connections since start, for any reason.
    pub evicted_total: u64,
    /// Relay operations since start.
    pub relayed_total: u64,
    /// Deliveries that failed and caused an eviction.
    pub failed_deliveries: u64,
}

struct Inner {
    registry: Registry,
    admitted_total: u64,
    withdrawn_total: u64,
    evicted_total: u64,
    relayed_total: u64,
    failed_deliveries: u64,
}

impl Inner {
    /// Queue `text` for every registered connection except `except`,
    /// pending ones included.
    ///
    /// Targets whose outbox rejects the message are evicted once the pass is
    /// over, which may cascade into further departure broadcasts.
    fn broadcast(&mut self, text: &Arc<str>, except: Option<ClientId>) -> usize {
        let mut delivered = 0;
        let mut failed = Vec::new();

        for record in self.registry.records() {
            if Some(record.id) == except {
                continue;
            }
            match record.outbox.deliver(text) {
                Ok(()) => delivered += 1,
                Err(e) => failed.push((record.id, e)),
            }
        }

        for (id, reason) in failed {
            // Already removed by an earlier eviction's cascade
            if self.registry.serial_of(id).is_none() {
                continue;
            }
            self.failed_deliveries += 1;
            warn!(client_id = %id, reason = %reason, "Delivery failed, evicting");
            self.evict(id);
        }

        delivered
    }

    fn evict(&mut self, id: ClientId) -> bool {
        let record = match self.registry.remove(id) {
            Ok(Some((record, _payload))) => record,
            Ok(None) => return false,
            Err(e) => {
                error!(client_id = %id, error = %e, "Registry refused eviction");
                debug_assert!(false, "registry refused eviction: {e}");
                return false;
            }
        };

        if !record.announced {
            self.withdrawn_total += 1;
            debug!(client_id = %id, "Pending admission withdrawn");
            return true;
        }
        self.evicted_total += 1;

        debug!(
            client_id = %id,
            connected_for = ?record.admitted_at.elapsed(),
            remaining = self.registry.len(),
            "Client evicted"
        );

        match codec::encode_shared(&ServerMessage::user_disconnected(id)) {
            Ok(notice) => {
                self.broadcast(&notice, None);
            }
            Err(e) => error!(client_id = %id, error = %e, "Failed to encode departure notice"),
        }
        true
    }

    fn check(&self) {
        if let Err(e) = self.registry.check_invariants() {
            error!(error = %e, "Registry invariant violated");
            debug_assert!(false, "registry invariant violated: {e}");
        }
    }
}

/// The presence hub.
pub struct Hub {
    inner: Mutex<Inner>,
    config: HubConfig,
}

impl Hub {
    /// Create a hub with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HubConfig::default())
    }

    /// Create a hub with custom configuration.
    #[must_use]
    pub fn with_config(config: HubConfig) -> Self {
        info!("Creating hub with config: {:?}", config);
        Self {
            inner: Mutex::new(Inner {
                registry: Registry::new(config.reuse_policy),
                admitted_total: 0,
                withdrawn_total: 0,
                evicted_total: 0,
                relayed_total: 0,
                failed_deliveries: 0,
            }),
            config,
        }
    }

    /// The hub's configuration.
    #[must_use]
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Reserve an identity for a connection and queue its admission
    /// messages.
    ///
    /// Queues `connection_info` and one `existing_user` per announced peer on
    /// `outbox`, then registers the connection as pending. A pending
    /// connection receives every broadcast from then on, but nobody else sees
    /// it until [`Hub::announce`].
    ///
    /// If `outbox` rejects any of its admission messages the identity is
    /// released and nothing is registered.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub is full, the admission messages cannot be
    /// delivered or encoded, or the registry is inconsistent.
    pub fn admit(&self, outbox: Outbox, user_data: UserData) -> Result<Admitted, HubError> {
        let mut inner = self.inner.lock();

        if inner.registry.reserved() >= self.config.max_connections {
            return Err(HubError::Full(self.config.max_connections));
        }

        let id = inner.registry.allocate()?;
        let total_connections = inner.registry.len() + 1;

        let queued = Self::introduction(&inner.registry, id, total_connections).and_then(|intro| {
            for text in &intro {
                outbox.deliver(text).map_err(HubError::AdmissionAborted)?;
            }
            Ok(intro.len())
        });
        let intro_messages = match queued {
            Ok(count) => count,
            Err(e) => {
                inner.registry.release_unused(id);
                warn!(client_id = %id, error = %e, "Admission aborted");
                return Err(e);
            }
        };

        let serial = match inner.registry.insert(id, outbox, user_data) {
            Ok(serial) => serial,
            Err(e) => {
                error!(client_id = %id, error = %e, "Registry refused admission");
                return Err(e.into());
            }
        };
        inner.check();

        debug!(client_id = %id, total = total_connections, "Client reserved");

        Ok(Admitted {
            id,
            serial,
            total_connections,
            intro_messages,
        })
    }

    /// Encode the newcomer's private messages.
    fn introduction(
        registry: &Registry,
        id: ClientId,
        total_connections: usize,
    ) -> Result<Vec<Arc<str>>, HubError> {
        let mut intro = Vec::with_capacity(total_connections);
        intro.push(codec::encode_shared(&ServerMessage::connection_info(
            id,
            total_connections,
        ))?);
        for (peer, data) in registry.entries() {
            intro.push(codec::encode_shared(&ServerMessage::existing_user(
                peer,
                data.clone(),
            ))?);
        }
        Ok(intro)
    }

    /// Announce a pending admission with `user_connected` to every other
    /// connection.
    ///
    /// From here on the connection counts as live, shows up in snapshots and
    /// may relay. Returns the number of connections notified.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotPending`] if the admission was withdrawn,
    /// evicted or already announced. If the announcement cannot be encoded
    /// the reservation is withdrawn and the encoding error returned.
    pub fn announce(&self, admitted: &Admitted) -> Result<usize, HubError> {
        let mut inner = self.inner.lock();
        let id = admitted.id;

        if inner.registry.serial_of(id) != Some(admitted.serial) {
            return Err(HubError::NotPending(id));
        }
        let Some(user_data) = inner.registry.payload(id).cloned() else {
            return Err(RegistryError::Orphaned(id).into());
        };
        let announcement = match codec::encode_shared(&ServerMessage::user_connected(id, user_data))
        {
            Ok(text) => text,
            Err(e) => {
                warn!(client_id = %id, error = %e, "Announcement unencodable, withdrawing");
                inner.evict(id);
                inner.check();
                return Err(e.into());
            }
        };
        if !inner.registry.announce(id) {
            return Err(HubError::NotPending(id));
        }
        inner.admitted_total += 1;

        let notified = inner.broadcast(&announcement, Some(id));
        inner.check();

        debug!(
            client_id = %id,
            total = inner.registry.len(),
            notified,
            "Client admitted"
        );
        Ok(notified)
    }

    /// Relay a client message to every live connection.
    ///
    /// The sender receives its own message unless `echo_to_sender` is off.
    /// Messages from identities that are no longer registered are dropped.
    ///
    /// Returns the number of connections the message was queued for.
    pub fn relay(&self, sender: ClientId, message: &str) -> usize {
        let text = match codec::encode_shared(&ServerMessage::relay(message)) {
            Ok(text) => text,
            Err(e) => {
                warn!(client_id = %sender, error = %e, "Dropping unencodable relay message");
                return 0;
            }
        };

        let mut inner = self.inner.lock();

        if !inner.registry.contains(sender) {
            debug!(client_id = %sender, "Relay from unregistered client dropped");
            return 0;
        }

        let except = (!self.config.echo_to_sender).then_some(sender);
        let count = inner.broadcast(&text, except);
        inner.relayed_total += 1;

        trace!(client_id = %sender, recipients = count, "Relayed message");
        count
    }

    /// Evict a connection and announce its departure.
    ///
    /// A pending connection is withdrawn without any notice. Returns `false`
    /// if the identity is not registered.
    pub fn evict(&self, id: ClientId) -> bool {
        let mut inner = self.inner.lock();
        let evicted = inner.evict(id);
        if evicted {
            inner.check();
        }
        evicted
    }

    /// Evict a connection only if `id` still belongs to this admission.
    ///
    /// A session whose identity was already evicted and handed to someone
    /// else must not evict the new holder.
    pub fn evict_admission(&self, admitted: &Admitted) -> bool {
        let mut inner = self.inner.lock();
        if inner.registry.serial_of(admitted.id) != Some(admitted.serial) {
            return false;
        }
        let evicted = inner.evict(admitted.id);
        inner.check();
        evicted
    }

    /// Number of announced connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().registry.len()
    }

    /// Check if no connection has been announced.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().registry.is_empty()
    }

    /// Check if an identity belongs to an announced connection.
    #[must_use]
    pub fn contains(&self, id: ClientId) -> bool {
        self.inner.lock().registry.contains(id)
    }

    /// Verify the registry's internal consistency.
    ///
    /// # Errors
    ///
    /// Returns the first inconsistency found.
    pub fn check_invariants(&self) -> Result<(), RegistryError> {
        self.inner.lock().registry.check_invariants()
    }

    /// Check if an identity is waiting in the free pool.
    #[must_use]
    pub fn is_free(&self, id: ClientId) -> bool {
        self.inner.lock().registry.is_free(id)
    }

    /// Identities and payloads of announced connections, in arrival order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(ClientId, UserData)> {
        self.inner
            .lock()
            .registry
            .entries()
            .map(|(id, data)| (id, data.clone()))
            .collect()
    }

    /// Get hub statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        let inner = self.inner.lock();
        HubStats {
            connections: inner.registry.len(),
            pending: inner.registry.reserved() - inner.registry.len(),
            free_identities: inner.registry.free_identities(),
            high_water: inner.registry.high_water(),
            admitted_total: inner.admitted_total,
            withdrawn_total: inner.withdrawn_total,
            evicted_total: inner.evicted_total,
            relayed_total: inner.relayed_total,
            failed_deliveries: inner.failed_deliveries,
        }
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::{self, OutboxReceiver};
    use serde_json::json;

    fn payload(name: &str) -> UserData {
        let mut data = UserData::new();
        data.insert("name".into(), json!(name));
        data
    }

    fn drain(rx: &mut OutboxReceiver) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(text) = rx.try_recv() {
            out.push(codec::decode(&text).unwrap());
        }
        out
    }

    fn join(hub: &Hub, name: &str) -> (Admitted, OutboxReceiver) {
        let (outbox, rx) = outbox::channel(64);
        let admitted = hub.admit(outbox, payload(name)).unwrap();
        hub.announce(&admitted).unwrap();
        (admitted, rx)
    }

    #[test]
    fn test_admission_messages() {
        let hub = Hub::new();
        let (a, mut rx_a) = join(&hub, "a");
        let (b, mut rx_b) = join(&hub, "b");

        assert_eq!(a.id, ClientId::new(1));
        assert_eq!(b.id, ClientId::new(2));
        assert_eq!(b.total_connections, 2);

        assert_eq!(
            drain(&mut rx_b),
            vec![
                ServerMessage::connection_info(b.id, 2),
                ServerMessage::existing_user(a.id, payload("a")),
            ]
        );
        assert_eq!(
            drain(&mut rx_a),
            vec![
                ServerMessage::connection_info(a.id, 1),
                ServerMessage::user_connected(b.id, payload("b")),
            ]
        );
    }

    #[test]
    fn test_reuse_scenario() {
        let hub = Hub::new();
        let (_a, _rx_a) = join(&hub, "a");
        let (b, rx_b) = join(&hub, "b");
        let (_c, _rx_c) = join(&hub, "c");

        drop(rx_b);
        assert!(hub.evict(b.id));

        let (d, mut rx_d) = join(&hub, "d");
        assert_eq!(d.id, ClientId::new(2));
        assert_eq!(
            drain(&mut rx_d),
            vec![
                ServerMessage::connection_info(d.id, 3),
                ServerMessage::existing_user(ClientId::new(1), payload("a")),
                ServerMessage::existing_user(ClientId::new(3), payload("c")),
            ]
        );
        assert_eq!(hub.stats().high_water, 3);
    }

    #[test]
    fn test_fifo_reuse_policy() {
        let hub = Hub::with_config(HubConfig {
            reuse_policy: ReusePolicy::Fifo,
            ..Default::default()
        });
        let members: Vec<_> = ["a", "b", "c", "d"].iter().map(|n| join(&hub, n)).collect();

        hub.evict(members[2].0.id);
        hub.evict(members[0].0.id);

        let (e, _rx_e) = join(&hub, "e");
        let (f, _rx_f) = join(&hub, "f");
        let (g, _rx_g) = join(&hub, "g");
        assert_eq!(e.id, ClientId::new(3));
        assert_eq!(f.id, ClientId::new(1));
        assert_eq!(g.id, ClientId::new(5));
    }

    #[test]
    fn test_relay_reaches_everyone_including_sender() {
        let hub = Hub::new();
        let (a, mut rx_a) = join(&hub, "a");
        let (_b, mut rx_b) = join(&hub, "b");
        let (_c, mut rx_c) = join(&hub, "c");
        for rx in [&mut rx_a, &mut rx_b, &mut rx_c] {
            drain(rx);
        }

        assert_eq!(hub.relay(a.id, "hello"), 3);

        for rx in [&mut rx_a, &mut rx_b, &mut rx_c] {
            assert_eq!(drain(rx), vec![ServerMessage::relay("hello")]);
        }
    }

    #[test]
    fn test_relay_without_echo() {
        let hub = Hub::with_config(HubConfig {
            echo_to_sender: false,
            ..Default::default()
        });
        let (a, mut rx_a) = join(&hub, "a");
        let (_b, mut rx_b) = join(&hub, "b");
        drain(&mut rx_a);
        drain(&mut rx_b);

        assert_eq!(hub.relay(a.id, "hello"), 1);
        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(drain(&mut rx_b), vec![ServerMessage::relay("hello")]);
    }

    #[test]
    fn test_relay_from_unknown_sender_dropped() {
        let hub = Hub::new();
        let (_a, mut rx_a) = join(&hub, "a");
        drain(&mut rx_a);

        assert_eq!(hub.relay(ClientId::new(42), "ghost"), 0);
        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(hub.stats().relayed_total, 0);
    }

    #[test]
    fn test_eviction_cleanup_and_departure() {
        let hub = Hub::new();
        let (a, mut rx_a) = join(&hub, "a");
        let (b, mut rx_b) = join(&hub, "b");
        let (c, mut rx_c) = join(&hub, "c");
        for rx in [&mut rx_a, &mut rx_b, &mut rx_c] {
            drain(rx);
        }

        assert!(hub.evict(b.id));

        assert!(!hub.contains(b.id));
        assert!(hub.is_free(b.id));
        assert!(hub.snapshot().iter().all(|(id, _)| *id != b.id));

        let notice = ServerMessage::user_disconnected(b.id);
        assert_eq!(drain(&mut rx_a), vec![notice.clone()]);
        assert_eq!(drain(&mut rx_c), vec![notice]);
        assert!(drain(&mut rx_b).is_empty());

        let ids: Vec<_> = hub.snapshot().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![a.id, c.id]);
    }

    #[test]
    fn test_double_eviction_is_noop() {
        let hub = Hub::new();
        let (a, _rx_a) = join(&hub, "a");
        let (_b, mut rx_b) = join(&hub, "b");
        drain(&mut rx_b);

        assert!(hub.evict(a.id));
        assert!(!hub.evict(a.id));
        assert_eq!(drain(&mut rx_b).len(), 1);
        assert_eq!(hub.stats().evicted_total, 1);
    }

    #[test]
    fn test_stale_admission_cannot_evict_new_holder() {
        let hub = Hub::new();
        let (old, _rx_old) = join(&hub, "old");
        hub.evict(old.id);

        let (new, _rx_new) = join(&hub, "new");
        assert_eq!(new.id, old.id);

        assert!(!hub.evict_admission(&old));
        assert!(hub.contains(new.id));
        assert!(hub.evict_admission(&new));
        assert!(hub.is_empty());
    }

    #[test]
    fn test_failed_delivery_evicts_only_target() {
        let hub = Hub::new();
        let (a, mut rx_a) = join(&hub, "a");
        let (b, rx_b) = join(&hub, "b");
        let (c, mut rx_c) = join(&hub, "c");
        drain(&mut rx_a);
        drain(&mut rx_c);
        drop(rx_b);

        // b's outbox is gone: a and c still get the relay, then b's departure
        assert_eq!(hub.relay(a.id, "move"), 2);

        let expected = vec![
            ServerMessage::relay("move"),
            ServerMessage::user_disconnected(b.id),
        ];
        assert_eq!(drain(&mut rx_a), expected);
        assert_eq!(drain(&mut rx_c), expected);
        assert!(!hub.contains(b.id));
        assert!(hub.contains(c.id));

        let stats = hub.stats();
        assert_eq!(stats.failed_deliveries, 1);
        assert_eq!(stats.evicted_total, 1);
    }

    #[test]
    fn test_slow_consumer_cascade() {
        let hub = Hub::new();
        let (a, mut rx_a) = join(&hub, "a");

        // Room for connection_info + one existing_user, nothing more
        let (outbox, _rx_slow) = outbox::channel(2);
        let slow = hub.admit(outbox, payload("slow")).unwrap();
        hub.announce(&slow).unwrap();
        drain(&mut rx_a);

        assert_eq!(hub.relay(a.id, "tick"), 1);
        assert!(!hub.contains(slow.id));
        assert_eq!(
            drain(&mut rx_a),
            vec![
                ServerMessage::relay("tick"),
                ServerMessage::user_disconnected(slow.id),
            ]
        );
    }

    #[test]
    fn test_admission_abort_releases_identity() {
        let hub = Hub::new();
        let (_a, mut rx_a) = join(&hub, "a");
        drain(&mut rx_a);

        let (outbox, rx) = outbox::channel(8);
        drop(rx);
        assert!(matches!(
            hub.admit(outbox, payload("ghost")),
            Err(HubError::AdmissionAborted(DeliveryError::Closed))
        ));

        assert!(drain(&mut rx_a).is_empty());
        assert!(hub.is_free(ClientId::new(2)));
        assert_eq!(hub.len(), 1);
        assert_eq!(join(&hub, "b").0.id, ClientId::new(2));
    }

    #[test]
    fn test_admission_abort_on_small_outbox() {
        let hub = Hub::new();
        let (_a, _rx_a) = join(&hub, "a");
        let (_b, _rx_b) = join(&hub, "b");

        // connection_info + two existing_user messages do not fit
        let (outbox, _rx) = outbox::channel(2);
        assert!(matches!(
            hub.admit(outbox, payload("c")),
            Err(HubError::AdmissionAborted(DeliveryError::Full))
        ));
        assert_eq!(hub.len(), 2);
    }

    #[test]
    fn test_hub_full() {
        let hub = Hub::with_config(HubConfig {
            max_connections: 2,
            ..Default::default()
        });
        let (_a, _rx_a) = join(&hub, "a");
        let (_b, _rx_b) = join(&hub, "b");

        let (outbox, _rx) = outbox::channel(8);
        assert!(matches!(
            hub.admit(outbox, payload("c")),
            Err(HubError::Full(2))
        ));
        assert_eq!(hub.stats().high_water, 2);
    }

    #[test]
    fn test_payload_is_opaque() {
        let hub = Hub::new();
        let mut odd = UserData::new();
        odd.insert("nested".into(), json!({"deep": [1, null, {"x": true}]}));

        let (outbox, _rx) = outbox::channel(8);
        let admitted = hub.admit(outbox, odd.clone()).unwrap();
        hub.announce(&admitted).unwrap();
        let (_b, mut rx_b) = join(&hub, "b");

        assert_eq!(
            drain(&mut rx_b)[1],
            ServerMessage::existing_user(admitted.id, odd)
        );
    }

    #[test]
    fn test_pending_admission_is_invisible() {
        let hub = Hub::new();
        let (a, mut rx_a) = join(&hub, "a");
        drain(&mut rx_a);

        let (outbox, mut rx_b) = outbox::channel(64);
        let b = hub.admit(outbox, payload("b")).unwrap();
        assert_eq!(b.intro_messages, 2);

        // Nobody hears about b, and b cannot relay yet
        assert!(drain(&mut rx_a).is_empty());
        assert!(!hub.contains(b.id));
        assert_eq!(hub.len(), 1);
        assert_eq!(hub.stats().pending, 1);
        assert_eq!(hub.relay(b.id, "early"), 0);

        // A newcomer's snapshot leaves b out, but b hears about the newcomer
        let (c, mut rx_c) = join(&hub, "c");
        assert_eq!(c.id, ClientId::new(3));
        assert_eq!(
            drain(&mut rx_c),
            vec![
                ServerMessage::connection_info(c.id, 2),
                ServerMessage::existing_user(a.id, payload("a")),
            ]
        );
        assert_eq!(
            drain(&mut rx_b),
            vec![
                ServerMessage::connection_info(b.id, 2),
                ServerMessage::existing_user(a.id, payload("a")),
                ServerMessage::user_connected(c.id, payload("c")),
            ]
        );

        assert_eq!(hub.announce(&b).unwrap(), 2);
        let joined = ServerMessage::user_connected(b.id, payload("b"));
        assert_eq!(
            drain(&mut rx_a),
            vec![ServerMessage::user_connected(c.id, payload("c")), joined.clone()]
        );
        assert_eq!(drain(&mut rx_c), vec![joined]);
        assert!(drain(&mut rx_b).is_empty());

        let stats = hub.stats();
        assert_eq!(stats.connections, 3);
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.admitted_total, 3);
    }

    #[test]
    fn test_withdrawn_admission_leaves_no_trace() {
        let hub = Hub::new();
        let (_a, mut rx_a) = join(&hub, "a");
        drain(&mut rx_a);

        let (outbox, _rx_b) = outbox::channel(64);
        let b = hub.admit(outbox, payload("b")).unwrap();
        assert!(hub.evict_admission(&b));

        assert!(drain(&mut rx_a).is_empty());
        assert!(hub.is_free(b.id));
        assert!(matches!(hub.announce(&b), Err(HubError::NotPending(id)) if id == b.id));
        hub.check_invariants().unwrap();

        let stats = hub.stats();
        assert_eq!(stats.connections, 1);
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.admitted_total, 1);
        assert_eq!(stats.withdrawn_total, 1);
        assert_eq!(stats.evicted_total, 0);
    }

    #[test]
    fn test_announce_twice_fails() {
        let hub = Hub::new();
        let (a, _rx_a) = join(&hub, "a");

        assert!(matches!(hub.announce(&a), Err(HubError::NotPending(_))));
        assert_eq!(hub.stats().admitted_total, 1);
    }

    #[test]
    fn test_pending_admission_counts_toward_capacity() {
        let hub = Hub::with_config(HubConfig {
            max_connections: 1,
            ..Default::default()
        });
        let (outbox, _rx) = outbox::channel(8);
        let pending = hub.admit(outbox, payload("a")).unwrap();

        let (outbox, _rx_b) = outbox::channel(8);
        assert!(matches!(
            hub.admit(outbox, payload("b")),
            Err(HubError::Full(1))
        ));

        hub.evict_admission(&pending);
        assert_eq!(join(&hub, "b").0.id, ClientId::new(1));
    }

    #[test]
    fn test_cascade_counts_each_failure_once() {
        let hub = Hub::new();
        let (a, mut rx_a) = join(&hub, "a");
        let (b, rx_b) = join(&hub, "b");
        let (c, rx_c) = join(&hub, "c");
        drain(&mut rx_a);
        drop(rx_b);
        drop(rx_c);

        // b's departure notice also fails for c, which is evicted before the
        // relay pass gets back to it
        assert_eq!(hub.relay(a.id, "x"), 1);
        assert_eq!(
            drain(&mut rx_a),
            vec![
                ServerMessage::relay("x"),
                ServerMessage::user_disconnected(b.id),
                ServerMessage::user_disconnected(c.id),
            ]
        );

        let stats = hub.stats();
        assert_eq!(stats.failed_deliveries, 2);
        assert_eq!(stats.evicted_total, 2);
        assert_eq!(stats.connections, 1);
        hub.check_invariants().unwrap();
    }
}
