// Maps engine types to the functions that move their state through a
// NetworkStream. Types without a direct entry fall back to the engine's
// network-serializable capability, then to their base type chain.

use std::collections::HashMap;

use crate::{
    error::ReplicateError,
    stream::NetworkStream,
    types::{Guid, TypeHandle},
    world::{EngineWorld, SerializeDirection},
};

/// A registered serialize or deserialize function. Closures capture whatever
/// context they need (the source's opaque tag mechanism is subsumed by the
/// capture).
pub type SerializeFn =
    Box<dyn Fn(&mut dyn EngineWorld, &Guid, &mut NetworkStream) -> std::io::Result<()> + Send + Sync>;

enum SerializerFns {
    /// Functions registered by game code for this exact type.
    Handlers {
        serialize: SerializeFn,
        deserialize: SerializeFn,
    },
    /// Synthesized entry delegating to the object's network-serializable
    /// capability; cached after the first successful interface probe.
    Capability,
}

/// Per-type serializer dispatch table.
///
/// Gameplay types frequently derive from common bases, so a single
/// registered base serializer serves descendants through the base-type walk
/// in [`invoke`](Self::invoke).
pub struct SerializerRegistry {
    entries: HashMap<TypeHandle, SerializerFns>,
}

impl SerializerRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Registers a serialize/deserialize pair for the exact type.
    pub fn register(
        &mut self,
        type_handle: TypeHandle,
        serialize: SerializeFn,
        deserialize: SerializeFn,
    ) {
        self.entries.insert(
            type_handle,
            SerializerFns::Handlers {
                serialize,
                deserialize,
            },
        );
    }

    pub fn contains(&self, type_handle: &TypeHandle) -> bool {
        self.entries.contains_key(type_handle)
    }

    /// Moves the object's state through the stream in the given direction.
    ///
    /// Resolution order: exact entry, then the network-serializable
    /// capability (cached once probed), then the base type, recursively.
    pub fn invoke(
        &mut self,
        world: &mut dyn EngineWorld,
        type_handle: &TypeHandle,
        object: &Guid,
        stream: &mut NetworkStream,
        direction: SerializeDirection,
    ) -> Result<(), ReplicateError> {
        let mut current = *type_handle;
        loop {
            if !self.entries.contains_key(&current) {
                if world.type_is_serializable(&current) {
                    self.entries.insert(current, SerializerFns::Capability);
                } else if let Some(base) = world.base_type(&current) {
                    current = base;
                    continue;
                } else {
                    return Err(ReplicateError::MissingSerializer(*type_handle));
                }
            }

            match self.entries.get(&current).unwrap() {
                SerializerFns::Handlers {
                    serialize,
                    deserialize,
                } => {
                    let func = match direction {
                        SerializeDirection::Write => serialize,
                        SerializeDirection::Read => deserialize,
                    };
                    func(world, object, stream)?;
                }
                SerializerFns::Capability => {
                    world.capability_serialize(object, stream, direction)?;
                }
            }
            return Ok(());
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
