// The keyed set of replicated-object records and its resolution rules.

use std::collections::HashMap;

use log::info;

use crate::{
    id_remap::IdRemapTable,
    role::ObjectRole,
    types::{ClientId, Guid},
    world::EngineWorld,
};

/// Registry record for one replicated object. The engine keeps the object
/// alive; the record refers to it by id only.
pub struct ReplicatedObject {
    /// Local stable id of the engine object.
    pub object_id: Guid,
    /// Local id of the logical parent, or [`Guid::EMPTY`].
    pub parent_id: Guid,
    /// Client that owns the object; [`crate::SERVER_CLIENT_ID`] for the
    /// server.
    pub owner_client_id: ClientId,
    /// Last frame counter accepted from the owner; `0` before any
    /// authoritative frame arrived. Only ever increases, apart from resets
    /// on ownership transfer.
    pub last_owner_frame: u32,
    pub role: ObjectRole,
    /// Whether a spawn message has been sent or received for this object.
    pub spawned: bool,
    /// Explicit recipients; `None` broadcasts to all connected peers except
    /// the owner.
    pub target_client_ids: Option<Vec<ClientId>>,
    /// Whether the object implements the network-object lifecycle interface.
    pub has_hooks: bool,
    /// Rate-limits the missing-serializer error to one log per object.
    pub(crate) invalid_type_warned: bool,
}

impl ReplicatedObject {
    pub fn new(object_id: Guid, parent_id: Guid, owner_client_id: ClientId, role: ObjectRole) -> Self {
        Self {
            object_id,
            parent_id,
            owner_client_id,
            last_owner_frame: 0,
            role,
            spawned: false,
            target_client_ids: None,
            has_hooks: false,
            invalid_type_warned: false,
        }
    }
}

/// All replicated-object records, keyed by local object id.
pub struct ObjectRegistry {
    objects: HashMap<Guid, ReplicatedObject>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self {
            objects: HashMap::new(),
        }
    }

    pub fn insert(&mut self, item: ReplicatedObject) {
        self.objects.insert(item.object_id, item);
    }

    pub fn remove(&mut self, id: &Guid) -> Option<ReplicatedObject> {
        self.objects.remove(id)
    }

    pub fn contains(&self, id: &Guid) -> bool {
        self.objects.contains_key(id)
    }

    pub fn get(&self, id: &Guid) -> Option<&ReplicatedObject> {
        self.objects.get(id)
    }

    pub fn get_mut(&mut self, id: &Guid) -> Option<&mut ReplicatedObject> {
        self.objects.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReplicatedObject> {
        self.objects.values()
    }

    /// Snapshot of all local ids, for sweeps that remove while visiting.
    pub fn ids(&self) -> Vec<Guid> {
        self.objects.keys().copied().collect()
    }

    pub fn clear(&mut self) {
        self.objects.clear();
    }

    /// Resolves an id to a registered local id: direct lookup first, then
    /// one retry through the remap table.
    pub fn resolve(&self, remap: &IdRemapTable, id: &Guid) -> Option<Guid> {
        if self.objects.contains_key(id) {
            return Some(*id);
        }
        let remapped = remap.resolve(id);
        if self.objects.contains_key(&remapped) {
            return Some(remapped);
        }
        None
    }

    /// [`resolve`](Self::resolve), then a heuristic match for objects both
    /// sides instantiated independently: an entry that has not yet accepted
    /// an authoritative frame, under the same (remapped) parent, of the
    /// exact type. A match installs a remap entry so future lookups are
    /// direct.
    pub fn resolve_heuristic(
        &self,
        remap: &mut IdRemapTable,
        world: &dyn EngineWorld,
        id: &Guid,
        parent_id: &Guid,
        type_name: &str,
    ) -> Option<Guid> {
        if let Some(local) = self.resolve(remap, id) {
            return Some(local);
        }

        let parent_id = remap.resolve(parent_id);
        let object_type = world.find_type(type_name)?;
        for item in self.objects.values() {
            if item.last_owner_frame == 0
                && item.parent_id == parent_id
                && world.has_object(&item.object_id)
                && world.object_type(&item.object_id) == Some(object_type)
            {
                info!(
                    "remap object id {} into object {} ({})",
                    id, item.object_id, type_name
                );
                remap.insert(*id, item.object_id);
                return Some(item.object_id);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap as StdHashMap, io};

    use uuid::Uuid;

    use crate::{
        stream::NetworkStream,
        types::TypeHandle,
        world::{PrefabLink, SerializeDirection},
        SERVER_CLIENT_ID,
    };

    use super::*;

    const DOOR: TypeHandle = TypeHandle::new(10);
    const BALL: TypeHandle = TypeHandle::new(11);

    /// World of typed objects, just enough for resolution tests.
    struct PairWorld {
        types: StdHashMap<Guid, TypeHandle>,
    }

    impl PairWorld {
        fn new() -> Self {
            Self {
                types: StdHashMap::new(),
            }
        }

        fn add(&mut self, id: Guid, type_handle: TypeHandle) {
            self.types.insert(id, type_handle);
        }
    }

    impl EngineWorld for PairWorld {
        fn has_object(&self, id: &Guid) -> bool {
            self.types.contains_key(id)
        }
        fn object_type(&self, id: &Guid) -> Option<TypeHandle> {
            self.types.get(id).copied()
        }
        fn construct_object(&mut self, _type_handle: &TypeHandle) -> Option<Guid> {
            unimplemented!()
        }
        fn destroy_object(&mut self, _id: &Guid) {
            unimplemented!()
        }
        fn find_type(&self, fullname: &str) -> Option<TypeHandle> {
            match fullname {
                "Game.Door" => Some(DOOR),
                "Game.Ball" => Some(BALL),
                _ => None,
            }
        }
        fn type_fullname(&self, _type_handle: &TypeHandle) -> Option<String> {
            None
        }
        fn base_type(&self, _type_handle: &TypeHandle) -> Option<TypeHandle> {
            None
        }
        fn type_is_serializable(&self, _type_handle: &TypeHandle) -> bool {
            false
        }
        fn capability_serialize(
            &mut self,
            _id: &Guid,
            _stream: &mut NetworkStream,
            _direction: SerializeDirection,
        ) -> io::Result<()> {
            Ok(())
        }
        fn has_network_hooks(&self, _id: &Guid) -> bool {
            false
        }
        fn on_network_spawn(&mut self, _id: &Guid) {}
        fn on_network_despawn(&mut self, _id: &Guid) {}
        fn on_network_serialize(&mut self, _id: &Guid) {}
        fn on_network_deserialize(&mut self, _id: &Guid) {}
        fn is_scene_object(&self, _id: &Guid) -> bool {
            true
        }
        fn scene_parent(&self, _id: &Guid) -> Option<Guid> {
            None
        }
        fn set_scene_parent(&mut self, _child: &Guid, _parent: &Guid) {}
        fn children(&self, _id: &Guid) -> Vec<Guid> {
            Vec::new()
        }
        fn prefab_link(&self, _id: &Guid) -> Option<PrefabLink> {
            None
        }
        fn spawn_prefab(&mut self, _prefab_id: &Guid) -> Option<Guid> {
            None
        }
        fn find_prefab_object(&self, _instance_root: &Guid, _prefab_object_id: &Guid) -> Option<Guid> {
            None
        }
        fn set_id_lookup(&mut self, _mapping: Option<StdHashMap<Guid, Guid>>) {}
    }

    fn guid() -> Guid {
        Guid::new(Uuid::new_v4())
    }

    #[test]
    fn resolve_follows_remap() {
        let mut registry = ObjectRegistry::new();
        let mut remap = IdRemapTable::new();
        let local = guid();
        let foreign = guid();
        registry.insert(ReplicatedObject::new(
            local,
            Guid::EMPTY,
            SERVER_CLIENT_ID,
            ObjectRole::Replicated,
        ));
        remap.insert(foreign, local);

        assert_eq!(registry.resolve(&remap, &local), Some(local));
        assert_eq!(registry.resolve(&remap, &foreign), Some(local));
        assert_eq!(registry.resolve(&remap, &guid()), None);
    }

    #[test]
    fn heuristic_pairs_by_parent_and_type_and_installs_remap() {
        let mut registry = ObjectRegistry::new();
        let mut remap = IdRemapTable::new();
        let mut world = PairWorld::new();

        let parent_local = guid();
        let parent_foreign = guid();
        remap.insert(parent_foreign, parent_local);

        let local = guid();
        world.add(local, DOOR);
        registry.insert(ReplicatedObject::new(
            local,
            parent_local,
            SERVER_CLIENT_ID,
            ObjectRole::Replicated,
        ));

        let foreign = guid();
        let found =
            registry.resolve_heuristic(&mut remap, &world, &foreign, &parent_foreign, "Game.Door");
        assert_eq!(found, Some(local));
        // future lookups go through the installed remap entry
        assert_eq!(remap.lookup(&foreign), Some(&local));
        assert_eq!(registry.resolve(&remap, &foreign), Some(local));
    }

    #[test]
    fn heuristic_rejects_wrong_type_or_synced_entry() {
        let mut registry = ObjectRegistry::new();
        let mut remap = IdRemapTable::new();
        let mut world = PairWorld::new();

        let parent = guid();
        let local = guid();
        world.add(local, DOOR);
        registry.insert(ReplicatedObject::new(
            local,
            parent,
            SERVER_CLIENT_ID,
            ObjectRole::Replicated,
        ));

        // wrong type
        assert_eq!(
            registry.resolve_heuristic(&mut remap, &world, &guid(), &parent, "Game.Ball"),
            None
        );

        // already received an authoritative frame
        registry.get_mut(&local).unwrap().last_owner_frame = 3;
        assert_eq!(
            registry.resolve_heuristic(&mut remap, &world, &guid(), &parent, "Game.Door"),
            None
        );
    }
}
