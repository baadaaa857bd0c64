use std::{fmt, ops::Deref};

use uuid::Uuid;

/// Id of a connected peer. The server reserves [`SERVER_CLIENT_ID`].
pub type ClientId = u32;

/// Well-known client id of the authoritative server.
pub const SERVER_CLIENT_ID: ClientId = 0;

/// Whether the local host runs as the authoritative server or as a client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostType {
    Server,
    Client,
}

impl HostType {
    pub fn is_client(&self) -> bool {
        matches!(self, HostType::Client)
    }
}

/// Opaque 128-bit identifier used for engine objects, prefab assets and
/// prefab-objects. Stable within a process; peers relate their ids through
/// the remap table.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Guid {
    inner: Uuid,
}

impl Guid {
    /// The all-zero guid, used where the source side has no id to send
    /// (eg. an object without a parent).
    pub const EMPTY: Guid = Guid { inner: Uuid::nil() };

    pub fn new(inner: Uuid) -> Self {
        Self { inner }
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self {
            inner: Uuid::from_bytes(bytes),
        }
    }

    pub fn to_bytes(&self) -> [u8; 16] {
        self.inner.into_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_nil()
    }
}

impl From<Uuid> for Guid {
    fn from(inner: Uuid) -> Self {
        Self { inner }
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.inner.fmt(f)
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Guid({})", self.inner)
    }
}

/// Opaque handle to a type registered with the engine's scripting system.
/// Issued by the engine; the replicator only compares and stores it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TypeHandle {
    inner: u32,
}

impl TypeHandle {
    pub const fn new(value: u32) -> Self {
        Self { inner: value }
    }
}

impl Deref for TypeHandle {
    type Target = u32;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
