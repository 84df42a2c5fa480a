//! Cross-VM Shared State
//!
//! Versioned key/value store and named FIFO queues backing the fake host's
//! shared data and shared queue functions.

use std::collections::{HashMap, VecDeque};

use crate::types::{Bytes, Status};

/// Maximum number of messages per queue
pub const MAX_QUEUE_SIZE: usize = 1000;

/// Maximum message size in bytes
pub const MAX_MESSAGE_SIZE: usize = 65536; // 64KB

// ============================================================
// Shared data
// ============================================================

/// Key/value store with compare-and-swap versions
#[derive(Debug)]
pub(crate) struct SharedDataStore {
    /// key -> (value, cas)
    entries: HashMap<String, (Bytes, u32)>,
    /// Next CAS value
    next_cas: u32,
}

impl SharedDataStore {
    pub(crate) fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_cas: 1,
        }
    }

    pub(crate) fn get(&self, key: &str) -> Option<(Bytes, u32)> {
        self.entries.get(key).cloned()
    }

    /// Write `key`; a non-zero `cas` must match the stored version
    ///
    /// A versioned write to a missing key fails: there is no version to match.
    pub(crate) fn set(&mut self, key: &str, value: Option<Bytes>, cas: u32) -> Result<(), Status> {
        if cas != 0 {
            match self.entries.get(key) {
                Some((_, current)) if *current == cas => {}
                _ => return Err(Status::CasMismatch),
            }
        }

        match value {
            Some(value) => {
                let version = self.next_cas;
                // 0 means "unversioned" on the wire
                self.next_cas = self.next_cas.checked_add(1).unwrap_or(1);
                self.entries.insert(key.to_string(), (value, version));
            }
            None => {
                self.entries.remove(key);
            }
        }
        Ok(())
    }
}

// ============================================================
// Shared queues
// ============================================================

#[derive(Debug)]
struct SharedQueue {
    /// Root context that registered the queue
    owner: u32,
    messages: VecDeque<Bytes>,
}

/// Shared queue registry
#[derive(Debug)]
pub(crate) struct SharedQueueRegistry {
    /// (vm_id, name) -> queue id
    name_to_id: HashMap<(String, String), u32>,
    queues: HashMap<u32, SharedQueue>,
    /// Next queue ID to allocate
    next_queue_id: u32,
}

impl SharedQueueRegistry {
    pub(crate) fn new() -> Self {
        Self {
            name_to_id: HashMap::new(),
            queues: HashMap::new(),
            next_queue_id: 1,
        }
    }

    /// Register or get existing queue by name
    pub(crate) fn register(&mut self, vm_id: &str, name: &str, owner: u32) -> u32 {
        let key = (vm_id.to_string(), name.to_string());
        if let Some(&id) = self.name_to_id.get(&key) {
            return id;
        }

        let id = self.next_queue_id;
        self.next_queue_id += 1;
        self.name_to_id.insert(key, id);
        self.queues.insert(
            id,
            SharedQueue {
                owner,
                messages: VecDeque::new(),
            },
        );
        id
    }

    /// Resolve queue name to ID
    pub(crate) fn resolve(&self, vm_id: &str, name: &str) -> Option<u32> {
        self.name_to_id
            .get(&(vm_id.to_string(), name.to_string()))
            .copied()
    }

    /// Enqueue data, returning the owning root context to notify
    pub(crate) fn enqueue(&mut self, queue_id: u32, data: Bytes) -> Result<u32, Status> {
        let queue = self.queues.get_mut(&queue_id).ok_or(Status::NotFound)?;
        if queue.messages.len() >= MAX_QUEUE_SIZE || data.len() > MAX_MESSAGE_SIZE {
            return Err(Status::ResultMismatch);
        }
        queue.messages.push_back(data);
        Ok(queue.owner)
    }

    /// Dequeue data; `Empty` when the queue holds nothing
    pub(crate) fn dequeue(&mut self, queue_id: u32) -> Result<Bytes, Status> {
        let queue = self.queues.get_mut(&queue_id).ok_or(Status::NotFound)?;
        queue.messages.pop_front().ok_or(Status::Empty)
    }

    pub(crate) fn len(&self, queue_id: u32) -> usize {
        self.queues
            .get(&queue_id)
            .map(|queue| queue.messages.len())
            .unwrap_or(0)
    }
}
