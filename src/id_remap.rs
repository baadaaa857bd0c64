// A mapping between foreign (sender-issued) and local object ids that can be
// queried in either direction.

use std::collections::HashMap;

use crate::types::Guid;

/// Relates ids another peer uses for objects to the ids this process uses.
///
/// Inbound messages resolve foreign ids through [`lookup`](Self::lookup);
/// a client rewrites local ids back to server-issued ids on send through
/// [`reverse`](Self::reverse). Keys are always foreign ids; local ids are
/// never used as keys. Append-mostly during a session, cleared on shutdown.
pub struct IdRemapTable {
    foreign_to_local: HashMap<Guid, Guid>,
    local_to_foreign: HashMap<Guid, Guid>,
}

impl IdRemapTable {
    pub fn new() -> Self {
        Self {
            foreign_to_local: HashMap::new(),
            local_to_foreign: HashMap::new(),
        }
    }

    pub fn insert(&mut self, foreign: Guid, local: Guid) {
        self.foreign_to_local.insert(foreign, local);
        self.local_to_foreign.insert(local, foreign);
    }

    pub fn lookup(&self, foreign: &Guid) -> Option<&Guid> {
        self.foreign_to_local.get(foreign)
    }

    pub fn reverse(&self, local: &Guid) -> Option<&Guid> {
        self.local_to_foreign.get(local)
    }

    /// Translates a foreign id to the local id, or passes the id through
    /// unchanged when no mapping exists.
    pub fn resolve(&self, id: &Guid) -> Guid {
        match self.foreign_to_local.get(id) {
            Some(local) => *local,
            None => *id,
        }
    }

    /// Rewrites a local id to the foreign id a remote peer knows it by, or
    /// passes the id through unchanged when no mapping exists.
    pub fn to_foreign(&self, id: &Guid) -> Guid {
        match self.local_to_foreign.get(id) {
            Some(foreign) => *foreign,
            None => *id,
        }
    }

    pub fn contains_foreign(&self, foreign: &Guid) -> bool {
        self.foreign_to_local.contains_key(foreign)
    }

    /// Snapshot of the foreign-to-local table, handed to the engine as the
    /// active id-mapping for reference-rebinding deserializers.
    pub fn forward_table(&self) -> HashMap<Guid, Guid> {
        self.foreign_to_local.clone()
    }

    pub fn len(&self) -> usize {
        self.foreign_to_local.len()
    }

    pub fn is_empty(&self) -> bool {
        self.foreign_to_local.is_empty()
    }

    pub fn clear(&mut self) {
        self.foreign_to_local.clear();
        self.local_to_foreign.clear();
    }
}
