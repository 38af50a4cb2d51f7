//! Identity allocation.
//!
//! Identities are small positive integers. A released identity goes back to
//! a free pool and is handed out again before the counter mints a new one.

use presence_protocol::ClientId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};

/// Order in which released identities are reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReusePolicy {
    /// Always hand out the smallest free identity.
    #[default]
    Smallest,
    /// Hand out free identities in the order they were released.
    Fifo,
}

#[derive(Debug)]
enum FreeList {
    Smallest(BTreeSet<ClientId>),
    Fifo {
        queue: VecDeque<ClientId>,
        members: BTreeSet<ClientId>,
    },
}

/// Pool of reusable identities backed by a monotonic counter.
#[derive(Debug)]
pub struct IdentityPool {
    free: FreeList,
    /// Highest identity ever minted. Never decreases.
    next: u32,
}

impl IdentityPool {
    /// Create an empty pool. The first identity handed out is 1.
    #[must_use]
    pub fn new(policy: ReusePolicy) -> Self {
        let free = match policy {
            ReusePolicy::Smallest => FreeList::Smallest(BTreeSet::new()),
            ReusePolicy::Fifo => FreeList::Fifo {
                queue: VecDeque::new(),
                members: BTreeSet::new(),
            },
        };
        Self { free, next: 0 }
    }

    /// The reuse policy this pool was created with.
    #[must_use]
    pub fn policy(&self) -> ReusePolicy {
        match self.free {
            FreeList::Smallest(_) => ReusePolicy::Smallest,
            FreeList::Fifo { .. } => ReusePolicy::Fifo,
        }
    }

    /// Take an identity, preferring a released one.
    ///
    /// Returns `None` only when the counter is exhausted and nothing is free.
    pub fn acquire(&mut self) -> Option<ClientId> {
        let reused = match &mut self.free {
            FreeList::Smallest(set) => set.pop_first(),
            FreeList::Fifo { queue, members } => {
                let id = queue.pop_front();
                if let Some(id) = id {
                    members.remove(&id);
                }
                id
            }
        };
        if reused.is_some() {
            return reused;
        }

        self.next = self.next.checked_add(1)?;
        Some(ClientId::new(self.next))
    }

    /// Return an identity to the pool.
    ///
    /// Returns `false` (and changes nothing) if the identity was never
    /// minted or is already free.
    pub fn release(&mut self, id: ClientId) -> bool {
        if id.get() == 0 || id.get() > self.next {
            return false;
        }
        match &mut self.free {
            FreeList::Smallest(set) => set.insert(id),
            FreeList::Fifo { queue, members } => {
                if !members.insert(id) {
                    return false;
                }
                queue.push_back(id);
                true
            }
        }
    }

    /// Check whether an identity is currently in the free pool.
    #[must_use]
    pub fn is_free(&self, id: ClientId) -> bool {
        match &self.free {
            FreeList::Smallest(set) => set.contains(&id),
            FreeList::Fifo { members, .. } => members.contains(&id),
        }
    }

    /// Number of released identities waiting for reuse.
    #[must_use]
    pub fn free_count(&self) -> usize {
        match &self.free {
            FreeList::Smallest(set) => set.len(),
            FreeList::Fifo { queue, .. } => queue.len(),
        }
    }

    /// Highest identity minted so far (0 before the first acquire).
    #[must_use]
    pub fn high_water(&self) -> u32 {
        self.next
    }
}
