//! Connection registry.
//!
//! Holds every admitted connection in arrival order together with its
//! admission payload. The registry itself is not synchronized; the hub
//! wraps it in a single lock so each mutation is one transaction.
//!
//! A record starts out pending: it receives broadcasts but is invisible to
//! everyone else (no snapshot entry, not counted, cannot relay) until it is
//! announced.

use crate::identity::{IdentityPool, ReusePolicy};
use crate::outbox::Outbox;
use presence_protocol::{ClientId, UserData};
use std::collections::HashMap;
use std::time::Instant;
use thiserror::Error;

/// Registry consistency errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No identity left to hand out.
    #[error("Identity space exhausted")]
    IdentitiesExhausted,

    /// An identity was about to be registered twice.
    #[error("Identity collision: {0}")]
    IdentityCollision(ClientId),

    /// A record and its payload entry disagree.
    #[error("Orphaned payload or record for identity {0}")]
    Orphaned(ClientId),

    /// A live identity is also sitting in the free pool.
    #[error("Identity {0} is both live and free")]
    LiveAndFree(ClientId),
}

/// One admitted connection.
#[derive(Debug)]
pub struct Record {
    /// Identity assigned at admission.
    pub id: ClientId,
    /// Process-unique admission number, never reused.
    pub serial: u64,
    /// Queue feeding the connection's socket.
    pub outbox: Outbox,
    /// Whether the other connections have been told about this one.
    pub announced: bool,
    /// When the connection was admitted.
    pub admitted_at: Instant,
}

/// The registry of live connections.
#[derive(Debug)]
pub struct Registry {
    /// Arrival order, which is also broadcast order.
    connections: Vec<Record>,
    payloads: HashMap<ClientId, UserData>,
    identities: IdentityPool,
    next_serial: u64,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(policy: ReusePolicy) -> Self {
        Self {
            connections: Vec::new(),
            payloads: HashMap::new(),
            identities: IdentityPool::new(policy),
            next_serial: 0,
        }
    }

    /// Number of announced connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.iter().filter(|r| r.announced).count()
    }

    /// Check if no connection has been announced.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.connections.iter().any(|r| r.announced)
    }

    /// Number of records, pending ones included.
    #[must_use]
    pub fn reserved(&self) -> usize {
        self.connections.len()
    }

    /// Check if an identity belongs to an announced connection.
    #[must_use]
    pub fn contains(&self, id: ClientId) -> bool {
        self.connections.iter().any(|r| r.id == id && r.announced)
    }

    /// Admission serial of the record holding `id`, pending or announced.
    #[must_use]
    pub fn serial_of(&self, id: ClientId) -> Option<u64> {
        self.connections
            .iter()
            .find(|r| r.id == id)
            .map(|r| r.serial)
    }

    /// Payload of a live connection.
    #[must_use]
    pub fn payload(&self, id: ClientId) -> Option<&UserData> {
        self.payloads.get(&id)
    }

    /// Every record in arrival order, pending ones included.
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.connections.iter()
    }

    /// Identities and payloads of announced connections, in arrival order.
    pub fn entries(&self) -> impl Iterator<Item = (ClientId, &UserData)> {
        self.connections
            .iter()
            .filter(|r| r.announced)
            .filter_map(|r| self.payloads.get(&r.id).map(|data| (r.id, data)))
    }

    /// Number of identities waiting for reuse.
    #[must_use]
    pub fn free_identities(&self) -> usize {
        self.identities.free_count()
    }

    /// Check whether an identity is in the free pool.
    #[must_use]
    pub fn is_free(&self, id: ClientId) -> bool {
        self.identities.is_free(id)
    }

    /// Highest identity ever minted.
    #[must_use]
    pub fn high_water(&self) -> u32 {
        self.identities.high_water()
    }

    /// Reserve an identity for an admission in progress.
    ///
    /// # Errors
    ///
    /// Returns an error if no identity can be produced.
    pub fn allocate(&mut self) -> Result<ClientId, RegistryError> {
        self.identities
            .acquire()
            .ok_or(RegistryError::IdentitiesExhausted)
    }

    /// Give back an identity whose admission did not complete.
    pub fn release_unused(&mut self, id: ClientId) {
        self.identities.release(id);
    }

    /// Register a pending connection under a previously allocated identity.
    ///
    /// Returns the admission serial.
    ///
    /// # Errors
    ///
    /// Returns an error if the identity is already registered.
    pub fn insert(
        &mut self,
        id: ClientId,
        outbox: Outbox,
        payload: UserData,
    ) -> Result<u64, RegistryError> {
        if self.payloads.contains_key(&id) || self.connections.iter().any(|r| r.id == id) {
            return Err(RegistryError::IdentityCollision(id));
        }

        self.next_serial += 1;
        let serial = self.next_serial;

        self.connections.push(Record {
            id,
            serial,
            outbox,
            announced: false,
            admitted_at: Instant::now(),
        });
        self.payloads.insert(id, payload);

        Ok(serial)
    }

    /// Mark a pending connection as announced.
    ///
    /// Returns `false` if `id` has no pending record.
    pub fn announce(&mut self, id: ClientId) -> bool {
        match self
            .connections
            .iter_mut()
            .find(|r| r.id == id && !r.announced)
        {
            Some(record) => {
                record.announced = true;
                true
            }
            None => false,
        }
    }

    /// Remove a connection and its payload, and free its identity.
    ///
    /// Returns `Ok(None)` if the identity is not registered.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Orphaned`] and changes nothing if the record
    /// has no payload.
    pub fn remove(&mut self, id: ClientId) -> Result<Option<(Record, UserData)>, RegistryError> {
        let Some(index) = self.connections.iter().position(|r| r.id == id) else {
            return Ok(None);
        };
        let Some(payload) = self.payloads.remove(&id) else {
            return Err(RegistryError::Orphaned(id));
        };
        let record = self.connections.remove(index);
        self.identities.release(id);
        Ok(Some((record, payload)))
    }

    /// Verify the registry invariants.
    ///
    /// # Errors
    ///
    /// Returns the first violation found.
    pub fn check_invariants(&self) -> Result<(), RegistryError> {
        let mut seen = std::collections::HashSet::with_capacity(self.connections.len());
        for record in &self.connections {
            if !seen.insert(record.id) {
                return Err(RegistryError::IdentityCollision(record.id));
            }
            if !self.payloads.contains_key(&record.id) {
                return Err(RegistryError::Orphaned(record.id));
            }
            if self.identities.is_free(record.id) {
                return Err(RegistryError::LiveAndFree(record.id));
            }
        }
        if let Some(id) = self.payloads.keys().find(|id| !seen.contains(*id)) {
            return Err(RegistryError::Orphaned(*id));
        }
        Ok(())
    }
}
