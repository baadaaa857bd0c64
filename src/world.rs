// Contract with the engine's scripting system and scene graph. The engine
// owns every object; the replicator refers to them by id only.

use std::{collections::HashMap, io};

use crate::{
    stream::NetworkStream,
    types::{Guid, TypeHandle},
};

/// Which way a serializer invocation moves data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SerializeDirection {
    /// Object state into the stream.
    Write,
    /// Stream contents into the object.
    Read,
}

/// Prefab association of a scene object: the prefab asset it was instanced
/// from, and its stable sub-id within that prefab.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PrefabLink {
    pub prefab_id: Guid,
    pub prefab_object_id: Guid,
}

/// Everything the replicator asks of the engine: object identity and
/// lifetime, type introspection, capability dispatch, the scene graph and
/// prefab instantiation.
///
/// Calls happen with the registry lock held, so implementations must not call
/// back into the replicator.
pub trait EngineWorld {
    // Objects //

    /// Whether an object with this id is currently alive in the engine.
    fn has_object(&self, id: &Guid) -> bool;

    fn object_type(&self, id: &Guid) -> Option<TypeHandle>;

    /// Constructs and registers a fresh object of the given type, returning
    /// its new id. `None` when the type cannot be instantiated.
    fn construct_object(&mut self, type_handle: &TypeHandle) -> Option<Guid>;

    /// Deletes an engine object. For attachment-style objects (eg. scripts)
    /// the engine applies its own policy of deleting the holder.
    fn destroy_object(&mut self, id: &Guid);

    // Type system //

    fn find_type(&self, fullname: &str) -> Option<TypeHandle>;

    fn type_fullname(&self, type_handle: &TypeHandle) -> Option<String>;

    fn base_type(&self, type_handle: &TypeHandle) -> Option<TypeHandle>;

    /// Whether the type implements the engine's network-serializable
    /// capability, discovered by interface introspection.
    fn type_is_serializable(&self, type_handle: &TypeHandle) -> bool;

    /// Dispatches through the object's network-serializable capability.
    /// Only called for objects whose type reported the capability.
    fn capability_serialize(
        &mut self,
        id: &Guid,
        stream: &mut NetworkStream,
        direction: SerializeDirection,
    ) -> io::Result<()>;

    // Lifecycle hooks //

    /// Whether the object implements the network-object lifecycle interface.
    fn has_network_hooks(&self, id: &Guid) -> bool;

    fn on_network_spawn(&mut self, id: &Guid);

    fn on_network_despawn(&mut self, id: &Guid);

    fn on_network_serialize(&mut self, id: &Guid);

    fn on_network_deserialize(&mut self, id: &Guid);

    // Scene graph //

    fn is_scene_object(&self, id: &Guid) -> bool;

    fn scene_parent(&self, id: &Guid) -> Option<Guid>;

    fn set_scene_parent(&mut self, child: &Guid, parent: &Guid);

    fn children(&self, id: &Guid) -> Vec<Guid>;

    // Prefabs //

    fn prefab_link(&self, id: &Guid) -> Option<PrefabLink>;

    /// Loads the prefab asset and spawns an instance, returning the instance
    /// root. `None` when the asset is missing or instantiation fails.
    fn spawn_prefab(&mut self, prefab_id: &Guid) -> Option<Guid>;

    /// Walks a prefab instance's tree for the object carrying the given
    /// prefab-object id.
    fn find_prefab_object(&self, instance_root: &Guid, prefab_object_id: &Guid) -> Option<Guid>;

    // Id lookup //

    /// Installs (or clears) the id mapping deserializers consult when
    /// rebinding object references, so foreign ids resolve to local objects.
    fn set_id_lookup(&mut self, mapping: Option<HashMap<Guid, Guid>>);
}
