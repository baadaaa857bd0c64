//! # Net Replicator
//! Keeps engine objects in sync between one authoritative server and many
//! clients by exchanging spawn, despawn, replicate and role-change messages
//! over channels supplied by a lower network layer.

#![deny(trivial_numeric_casts, unstable_features, unused_import_braces)]

mod config;
mod error;
mod id_remap;
mod intent;
mod messages;
mod registry;
mod replicator;
mod role;
mod serializers;
mod stream;
mod transport;
mod types;
mod world;

pub use config::ReplicatorConfig;
pub use error::ReplicateError;
pub use id_remap::IdRemapTable;
pub use intent::{OwnershipOverride, SpawnIntent};
pub use messages::{
    MessageId, ObjectDespawnMessage, ObjectReplicateMessage, ObjectRoleMessage,
    ObjectSpawnMessage, TYPE_NAME_LEN,
};
pub use registry::{ObjectRegistry, ReplicatedObject};
pub use replicator::NetworkReplicator;
pub use role::ObjectRole;
pub use serializers::{SerializeFn, SerializerRegistry};
pub use stream::NetworkStream;
pub use transport::{ChannelKind, ConnectionHandle, NetworkPeer, OutMessage, RemoteClient};
pub use types::{ClientId, Guid, HostType, TypeHandle, SERVER_CLIENT_ID};
pub use world::{EngineWorld, PrefabLink, SerializeDirection};
