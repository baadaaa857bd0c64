use crate::{
    role::ObjectRole,
    types::{ClientId, Guid},
};

/// Ownership applied to an object when its queued spawn is dispatched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OwnershipOverride {
    pub owner_client_id: ClientId,
    pub role: ObjectRole,
    /// Extends the override to queued scene descendants and, once applied,
    /// down the registry hierarchy.
    pub hierarchical: bool,
}

/// A spawn submitted by gameplay code, drained by the replication tick.
#[derive(Clone, Debug)]
pub struct SpawnIntent {
    pub object_id: Guid,
    /// Explicit recipients; `None` broadcasts.
    pub targets: Option<Vec<ClientId>>,
    pub ownership: Option<OwnershipOverride>,
}

impl SpawnIntent {
    pub fn new(object_id: Guid, targets: Option<Vec<ClientId>>) -> Self {
        Self {
            object_id,
            targets,
            ownership: None,
        }
    }
}
