//! Per-side connection routing table
//!
//! Maps live [`ConnectionId`]s to whatever record the owning side keeps
//! for them; entries hold write-handles, never sockets. Lookups clone
//! the entry out so the lock is only held for the map operation itself,
//! never across socket I/O.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::id::ConnectionId;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("connection {0} is already registered")]
    AlreadyRegistered(ConnectionId),
}

/// Routing table shared between the tasks of one side.
#[derive(Debug)]
pub struct ConnTable<T> {
    entries: Arc<Mutex<HashMap<ConnectionId, T>>>,
}

impl<T> Clone for ConnTable<T> {
    fn clone(&self) -> Self {
        Self { entries: self.entries.clone() }
    }
}

impl<T> Default for ConnTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ConnTable<T> {
    pub fn new() -> Self {
        Self { entries: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Register a new connection. A live id may not be reused.
    pub fn insert(&self, id: ConnectionId, entry: T) -> Result<(), TableError> {
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(&id) {
            return Err(TableError::AlreadyRegistered(id));
        }
        entries.insert(id, entry);
        Ok(())
    }

    pub fn remove(&self, id: ConnectionId) -> Option<T> {
        self.entries.lock().unwrap().remove(&id)
    }

    /// Remove and return all entries.
    pub fn drain(&self) -> Vec<(ConnectionId, T)> {
        self.entries.lock().unwrap().drain().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> ConnTable<T> {
    pub fn lookup(&self, id: ConnectionId) -> Option<T> {
        self.entries.lock().unwrap().get(&id).cloned()
    }

    /// Remove and return every entry matching the predicate. Used for
    /// the teardown sweep when a tunnel goes down.
    pub fn remove_matching(
        &self,
        mut pred: impl FnMut(ConnectionId, &T) -> bool,
    ) -> Vec<(ConnectionId, T)> {
        let mut entries = self.entries.lock().unwrap();
        let mut removed = Vec::new();
        entries.retain(|id, entry| {
            if pred(*id, entry) {
                removed.push((*id, entry.clone()));
                false
            } else {
                true
            }
        });
        removed
    }
}
