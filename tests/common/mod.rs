// Test doubles: an in-memory engine world and a recording transport peer.

use std::collections::HashMap;
use std::io;

use uuid::Uuid;

use net_replicator::{
    ChannelKind, ConnectionHandle, EngineWorld, Guid, NetworkPeer, NetworkStream, OutMessage,
    PrefabLink, SerializeDirection, TypeHandle,
};

pub const BALL_TYPE: TypeHandle = TypeHandle::new(1);
pub const ACTOR_TYPE: TypeHandle = TypeHandle::new(2);
pub const SCRIPT_TYPE: TypeHandle = TypeHandle::new(3);
pub const OPAQUE_TYPE: TypeHandle = TypeHandle::new(4);

pub struct TypeInfo {
    pub fullname: &'static str,
    pub base: Option<TypeHandle>,
    pub serializable: bool,
    pub scene: bool,
    pub hooks: bool,
}

pub struct MockObject {
    pub type_handle: TypeHandle,
    pub scene: bool,
    pub parent: Option<Guid>,
    pub prefab: Option<PrefabLink>,
    pub hooks: bool,
    /// The replicated state; moved through the capability serializer.
    pub value: u32,
}

pub struct PrefabObjectSpec {
    pub prefab_object_id: Guid,
    pub type_handle: TypeHandle,
}

/// Engine stand-in: typed objects, a scene graph, prefab templates and a
/// record of every lifecycle hook invocation.
pub struct MockWorld {
    pub objects: HashMap<Guid, MockObject>,
    types: HashMap<TypeHandle, TypeInfo>,
    /// Prefab templates; the first entry is the instance root.
    prefabs: HashMap<Guid, Vec<PrefabObjectSpec>>,
    pub id_lookup: Option<HashMap<Guid, Guid>>,
    /// `(hook, object)` pairs in invocation order.
    pub events: Vec<(&'static str, Guid)>,
}

impl MockWorld {
    /// A world with the shared type registry every host in a test uses.
    pub fn new() -> Self {
        let mut types = HashMap::new();
        types.insert(
            BALL_TYPE,
            TypeInfo {
                fullname: "Game.Ball",
                base: None,
                serializable: true,
                scene: false,
                hooks: true,
            },
        );
        types.insert(
            ACTOR_TYPE,
            TypeInfo {
                fullname: "Game.Actor",
                base: None,
                serializable: true,
                scene: true,
                hooks: false,
            },
        );
        types.insert(
            SCRIPT_TYPE,
            TypeInfo {
                fullname: "Game.Script",
                base: Some(ACTOR_TYPE),
                serializable: true,
                scene: true,
                hooks: false,
            },
        );
        types.insert(
            OPAQUE_TYPE,
            TypeInfo {
                fullname: "Game.Opaque",
                base: None,
                serializable: false,
                scene: false,
                hooks: false,
            },
        );
        Self {
            objects: HashMap::new(),
            types,
            prefabs: HashMap::new(),
            id_lookup: None,
            events: Vec::new(),
        }
    }

    pub fn create(&mut self, type_handle: TypeHandle, parent: Option<Guid>) -> Guid {
        let id = Guid::new(Uuid::new_v4());
        let info = self.types.get(&type_handle).expect("unregistered type");
        self.objects.insert(
            id,
            MockObject {
                type_handle,
                scene: info.scene,
                parent,
                prefab: None,
                hooks: info.hooks,
                value: 0,
            },
        );
        id
    }

    pub fn add_prefab(&mut self, prefab_id: Guid, specs: Vec<PrefabObjectSpec>) {
        self.prefabs.insert(prefab_id, specs);
    }

    pub fn value_of(&self, id: &Guid) -> u32 {
        self.objects.get(id).expect("object missing").value
    }

    pub fn set_value(&mut self, id: &Guid, value: u32) {
        self.objects.get_mut(id).expect("object missing").value = value;
    }

    fn remove_subtree(&mut self, id: &Guid) {
        let children: Vec<Guid> = self
            .objects
            .iter()
            .filter(|(_, object)| object.parent == Some(*id))
            .map(|(child, _)| *child)
            .collect();
        for child in children {
            self.remove_subtree(&child);
        }
        self.objects.remove(id);
    }
}

impl EngineWorld for MockWorld {
    fn has_object(&self, id: &Guid) -> bool {
        self.objects.contains_key(id)
    }

    fn object_type(&self, id: &Guid) -> Option<TypeHandle> {
        self.objects.get(id).map(|object| object.type_handle)
    }

    fn construct_object(&mut self, type_handle: &TypeHandle) -> Option<Guid> {
        if !self.types.contains_key(type_handle) {
            return None;
        }
        Some(self.create(*type_handle, None))
    }

    fn destroy_object(&mut self, id: &Guid) {
        self.remove_subtree(id);
    }

    fn find_type(&self, fullname: &str) -> Option<TypeHandle> {
        self.types
            .iter()
            .find(|(_, info)| info.fullname == fullname)
            .map(|(handle, _)| *handle)
    }

    fn type_fullname(&self, type_handle: &TypeHandle) -> Option<String> {
        self.types
            .get(type_handle)
            .map(|info| info.fullname.to_string())
    }

    fn base_type(&self, type_handle: &TypeHandle) -> Option<TypeHandle> {
        self.types.get(type_handle).and_then(|info| info.base)
    }

    fn type_is_serializable(&self, type_handle: &TypeHandle) -> bool {
        self.types
            .get(type_handle)
            .map(|info| info.serializable)
            .unwrap_or(false)
    }

    fn capability_serialize(
        &mut self,
        id: &Guid,
        stream: &mut NetworkStream,
        direction: SerializeDirection,
    ) -> io::Result<()> {
        let object = self
            .objects
            .get_mut(id)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;
        match direction {
            SerializeDirection::Write => stream.write_u32(object.value),
            SerializeDirection::Read => object.value = stream.read_u32()?,
        }
        Ok(())
    }

    fn has_network_hooks(&self, id: &Guid) -> bool {
        self.objects.get(id).map(|object| object.hooks).unwrap_or(false)
    }

    fn on_network_spawn(&mut self, id: &Guid) {
        self.events.push(("spawn", *id));
    }

    fn on_network_despawn(&mut self, id: &Guid) {
        self.events.push(("despawn", *id));
    }

    fn on_network_serialize(&mut self, id: &Guid) {
        self.events.push(("serialize", *id));
    }

    fn on_network_deserialize(&mut self, id: &Guid) {
        self.events.push(("deserialize", *id));
    }

    fn is_scene_object(&self, id: &Guid) -> bool {
        self.objects.get(id).map(|object| object.scene).unwrap_or(false)
    }

    fn scene_parent(&self, id: &Guid) -> Option<Guid> {
        self.objects.get(id).and_then(|object| object.parent)
    }

    fn set_scene_parent(&mut self, child: &Guid, parent: &Guid) {
        if let Some(object) = self.objects.get_mut(child) {
            object.parent = Some(*parent);
        }
    }

    fn children(&self, id: &Guid) -> Vec<Guid> {
        self.objects
            .iter()
            .filter(|(_, object)| object.parent == Some(*id))
            .map(|(child, _)| *child)
            .collect()
    }

    fn prefab_link(&self, id: &Guid) -> Option<PrefabLink> {
        self.objects.get(id).and_then(|object| object.prefab)
    }

    fn spawn_prefab(&mut self, prefab_id: &Guid) -> Option<Guid> {
        let specs = self.prefabs.get(prefab_id)?;
        let mut created: Vec<(Guid, Guid, TypeHandle)> = Vec::new();
        for spec in specs {
            created.push((Guid::new(Uuid::new_v4()), spec.prefab_object_id, spec.type_handle));
        }
        let root = created.first()?.0;
        for (index, (id, prefab_object_id, type_handle)) in created.iter().enumerate() {
            let info = self.types.get(type_handle)?;
            self.objects.insert(
                *id,
                MockObject {
                    type_handle: *type_handle,
                    scene: true,
                    parent: if index == 0 { None } else { Some(root) },
                    prefab: Some(PrefabLink {
                        prefab_id: *prefab_id,
                        prefab_object_id: *prefab_object_id,
                    }),
                    hooks: info.hooks,
                    value: 0,
                },
            );
        }
        Some(root)
    }

    fn find_prefab_object(&self, instance_root: &Guid, prefab_object_id: &Guid) -> Option<Guid> {
        let matches = |id: &Guid| {
            self.objects
                .get(id)
                .and_then(|object| object.prefab)
                .map(|link| link.prefab_object_id == *prefab_object_id)
                .unwrap_or(false)
        };
        if matches(instance_root) {
            return Some(*instance_root);
        }
        let mut pending = self.children(instance_root);
        while let Some(id) = pending.pop() {
            if matches(&id) {
                return Some(id);
            }
            pending.extend(self.children(&id));
        }
        None
    }

    fn set_id_lookup(&mut self, mapping: Option<HashMap<Guid, Guid>>) {
        self.id_lookup = mapping;
    }
}

#[derive(Clone)]
pub struct SentMessage {
    pub channel: ChannelKind,
    pub bytes: Vec<u8>,
    /// `None` when sent client-to-host.
    pub targets: Option<Vec<ConnectionHandle>>,
}

/// Peer that records everything queued on it.
pub struct RecordingPeer {
    pub sent: Vec<SentMessage>,
}

impl RecordingPeer {
    pub fn new() -> Self {
        Self { sent: Vec::new() }
    }

    /// Drains recorded messages addressed to the given connection (or sent
    /// host-ward with no target list). A message addressed to several
    /// connections stays queued for the others.
    pub fn drain_for(&mut self, connection: ConnectionHandle) -> Vec<SentMessage> {
        let mut matched = Vec::new();
        let mut kept = Vec::new();
        for mut message in self.sent.drain(..) {
            let addressed = message
                .targets
                .as_ref()
                .map(|targets| targets.contains(&connection));
            match addressed {
                Some(true) => {
                    matched.push(message.clone());
                    if let Some(targets) = &mut message.targets {
                        targets.retain(|target| *target != connection);
                        if !targets.is_empty() {
                            kept.push(message);
                        }
                    }
                }
                Some(false) => kept.push(message),
                None => matched.push(message),
            }
        }
        self.sent = kept;
        matched
    }

    pub fn drain_all(&mut self) -> Vec<SentMessage> {
        self.sent.drain(..).collect()
    }
}

impl NetworkPeer for RecordingPeer {
    fn begin_send(&mut self) -> OutMessage {
        OutMessage::new()
    }

    fn end_send(
        &mut self,
        channel: ChannelKind,
        message: OutMessage,
        targets: Option<&[ConnectionHandle]>,
    ) {
        self.sent.push(SentMessage {
            channel,
            bytes: message.bytes().to_vec(),
            targets: targets.map(|targets| targets.to_vec()),
        });
    }
}
