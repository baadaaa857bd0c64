// The replication control loop: control API for gameplay threads, the
// per-tick driver, and the inbound message handlers. All state lives behind
// one lock; gameplay threads and the engine tick contend only on that.

use std::io::Cursor;
use std::sync::{Mutex, MutexGuard};

use byteorder::ReadBytesExt;
use log::{debug, error, info, warn};

use crate::{
    config::ReplicatorConfig,
    error::ReplicateError,
    id_remap::IdRemapTable,
    intent::{OwnershipOverride, SpawnIntent},
    messages::{
        MessageId, ObjectDespawnMessage, ObjectReplicateMessage, ObjectRoleMessage,
        ObjectSpawnMessage,
    },
    registry::{ObjectRegistry, ReplicatedObject},
    role::ObjectRole,
    serializers::{SerializeFn, SerializerRegistry},
    stream::NetworkStream,
    transport::{ChannelKind, ConnectionHandle, NetworkPeer, RemoteClient},
    types::{ClientId, Guid, HostType, TypeHandle, SERVER_CLIENT_ID},
    world::{EngineWorld, SerializeDirection},
};

/// Builds the list of connections a message is addressed to: every connected
/// client, narrowed by an optional allow-list, minus an optional excluded
/// client.
fn collect_targets(
    clients: &[RemoteClient],
    allow: Option<&[ClientId]>,
    exclude: Option<ClientId>,
) -> Vec<ConnectionHandle> {
    let mut targets = Vec::with_capacity(clients.len());
    for client in clients {
        if let Some(excluded) = exclude {
            if client.client_id == excluded {
                continue;
            }
        }
        if let Some(allowed) = allow {
            if !allowed.contains(&client.client_id) {
                continue;
            }
        }
        targets.push(client.connection);
    }
    targets
}

/// Whether `object` sits below `ancestor` in the scene graph.
fn is_scene_descendant(world: &dyn EngineWorld, object: &Guid, ancestor: &Guid) -> bool {
    let mut current = world.scene_parent(object);
    while let Some(parent) = current {
        if parent == *ancestor {
            return true;
        }
        current = world.scene_parent(&parent);
    }
    false
}

struct ReplicatorState {
    online: bool,
    mode: HostType,
    local_client_id: ClientId,
    clients: Vec<RemoteClient>,
    new_clients: Vec<RemoteClient>,
    objects: ObjectRegistry,
    spawn_queue: Vec<SpawnIntent>,
    despawn_queue: Vec<Guid>,
    remap: IdRemapTable,
    serializers: SerializerRegistry,
    write_stream: NetworkStream,
    read_stream: NetworkStream,
    /// Whether the remap snapshot is currently installed as the engine's
    /// active id-mapping (between pre-update and the end of update).
    id_lookup_active: bool,
}

/// Keeps engine objects in sync between the authoritative server and its
/// clients. Owned by the engine's network service; brought online with
/// [`start`](Self::start) and torn down with [`stop`](Self::stop). While
/// offline every control call is a no-op.
pub struct NetworkReplicator {
    state: Mutex<ReplicatorState>,
}

impl NetworkReplicator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ReplicatorState {
                online: false,
                mode: HostType::Server,
                local_client_id: SERVER_CLIENT_ID,
                clients: Vec::new(),
                new_clients: Vec::new(),
                objects: ObjectRegistry::new(),
                spawn_queue: Vec::new(),
                despawn_queue: Vec::new(),
                remap: IdRemapTable::new(),
                serializers: SerializerRegistry::new(),
                write_stream: NetworkStream::new(),
                read_stream: NetworkStream::new(),
                id_lookup_active: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<ReplicatorState> {
        self.state.lock().expect("replicator state lock poisoned")
    }

    /// Brings replication online. Objects added afterwards replicate
    /// according to `config.mode`.
    pub fn start(&self, config: ReplicatorConfig) {
        let mut state = self.lock();
        if state.online {
            warn!("replicator restarted while online");
        }
        state.online = true;
        state.mode = config.mode;
        state.local_client_id = config.local_client_id;
        info!(
            "replication online as {:?} (client id {})",
            config.mode, config.local_client_id
        );
    }

    pub fn is_online(&self) -> bool {
        self.lock().online
    }

    /// Tears replication down: despawns every spawned object locally,
    /// empties the registry, queues, and remap table, and releases the
    /// cached streams. Registered serializers survive.
    pub fn stop(&self, world: &mut dyn EngineWorld) {
        let mut state = self.lock();
        if !state.online {
            return;
        }
        state.clear(world);
    }

    /// Registers a serialize/deserialize pair for an exact type. Callable
    /// while offline; registrations persist across sessions.
    pub fn add_serializer(
        &self,
        type_handle: TypeHandle,
        serialize: SerializeFn,
        deserialize: SerializeFn,
    ) {
        self.lock().serializers.register(type_handle, serialize, deserialize);
    }

    /// Runs the serializer dispatch for one object through a caller-owned
    /// stream. The world must not call back into the replicator.
    pub fn invoke_serializer(
        &self,
        world: &mut dyn EngineWorld,
        type_handle: &TypeHandle,
        object: &Guid,
        stream: &mut NetworkStream,
        direction: SerializeDirection,
    ) -> Result<(), ReplicateError> {
        self.lock()
            .serializers
            .invoke(world, type_handle, object, stream, direction)
    }

    /// Registers an object for replication. The parent defaults to the
    /// object's scene parent.
    pub fn add_object(&self, world: &mut dyn EngineWorld, object_id: &Guid, parent: Option<&Guid>) {
        let mut state = self.lock();
        if !state.online {
            return;
        }
        state.add_object(world, object_id, parent);
    }

    /// Unregisters an object without despawning it anywhere.
    pub fn remove_object(&self, object_id: &Guid) {
        let mut state = self.lock();
        if !state.online {
            return;
        }
        if state.objects.remove(object_id).is_some() {
            info!("remove object {}", object_id);
        } else {
            warn!("remove of unregistered object {}", object_id);
        }
    }

    /// Queues a spawn, broadcast to everyone. No-op if already spawned.
    pub fn spawn_object(&self, object_id: &Guid) {
        self.queue_spawn(object_id, None);
    }

    /// Queues a spawn addressed to an explicit set of clients.
    pub fn spawn_object_to(&self, object_id: &Guid, targets: &[ClientId]) {
        self.queue_spawn(object_id, Some(targets.to_vec()));
    }

    fn queue_spawn(&self, object_id: &Guid, targets: Option<Vec<ClientId>>) {
        let mut state = self.lock();
        if !state.online {
            return;
        }
        if let Some(item) = state.objects.get(object_id) {
            if item.spawned {
                return;
            }
        }
        state.spawn_queue.push(SpawnIntent::new(*object_id, targets));
    }

    /// Despawns a locally-owned, spawned object: deletes it in the engine
    /// immediately and emits the despawn message on the next tick.
    pub fn despawn_object(&self, world: &mut dyn EngineWorld, object_id: &Guid) {
        let mut state = self.lock();
        if !state.online {
            return;
        }
        let Some(item) = state.objects.get(object_id) else {
            return;
        };
        if !item.spawned || item.owner_client_id != state.local_client_id {
            return;
        }
        if !world.has_object(object_id) {
            return; // already despawned; the record is reaped next tick
        }
        let has_hooks = item.has_hooks;
        debug_assert!(!state.despawn_queue.contains(object_id));
        state.despawn_queue.push(*object_id);
        // a queued spawn for the same object must never go out
        state.spawn_queue.retain(|intent| intent.object_id != *object_id);
        if has_hooks {
            world.on_network_despawn(object_id);
        }
        world.destroy_object(object_id);
    }

    /// Owner of the object, or [`SERVER_CLIENT_ID`] when unknown.
    pub fn object_owner(&self, object_id: &Guid) -> ClientId {
        let state = self.lock();
        match state.objects.get(object_id) {
            Some(item) => item.owner_client_id,
            None => SERVER_CLIENT_ID,
        }
    }

    /// Local role for the object, or [`ObjectRole::None`] when unknown.
    pub fn object_role(&self, object_id: &Guid) -> ObjectRole {
        let state = self.lock();
        match state.objects.get(object_id) {
            Some(item) => item.role,
            None => ObjectRole::None,
        }
    }

    /// Changes object ownership. The current owner hands authority off by
    /// naming the new owner and a downgraded local role; a non-owner may
    /// only adjust its own local role. With `hierarchical`, the change
    /// recurses over registered children.
    pub fn set_object_ownership(
        &self,
        peer: &mut dyn NetworkPeer,
        object_id: &Guid,
        owner_client_id: ClientId,
        local_role: ObjectRole,
        hierarchical: bool,
    ) {
        let mut state = self.lock();
        if !state.online {
            return;
        }
        state.set_ownership(peer, object_id, owner_client_id, local_role, hierarchical);
    }

    /// Marks an owned object as changed.
    pub fn dirty_object(&self, object_id: &Guid) {
        let state = self.lock();
        if !state.online {
            return;
        }
        let Some(item) = state.objects.get(object_id) else {
            return;
        };
        if item.role != ObjectRole::OwnedAuthoritative {
            return;
        }
        // TODO: per-object replication frequency and dirtying
    }

    /// Notifies the replicator of a newly connected client; spawned objects
    /// are backfilled to it on the next tick.
    pub fn client_connected(&self, client: RemoteClient) {
        let mut state = self.lock();
        if !state.online {
            return;
        }
        state.clients.push(client);
        state.new_clients.push(client);
    }

    /// Notifies the replicator of a disconnect. Objects owned by that client
    /// are despawned locally and their despawn messages queued for everyone
    /// else.
    pub fn client_disconnected(&self, world: &mut dyn EngineWorld, client_id: ClientId) {
        let mut state = self.lock();
        if !state.online {
            return;
        }
        state.new_clients.retain(|c| c.client_id != client_id);
        state.clients.retain(|c| c.client_id != client_id);

        for id in state.objects.ids() {
            let Some(item) = state.objects.get(&id) else {
                continue;
            };
            if !item.spawned || item.owner_client_id != client_id || !world.has_object(&id) {
                continue;
            }
            let has_hooks = item.has_hooks;
            state.despawn_queue.push(id);
            if has_hooks {
                world.on_network_despawn(&id);
            }
            world.destroy_object(&id);
            state.objects.remove(&id);
        }
    }

    /// Installs the remap table as the engine's active id-mapping so that
    /// deserializers rebinding object references translate foreign ids.
    /// Call before dispatching received messages each tick.
    pub fn pre_update(&self, world: &mut dyn EngineWorld) {
        let mut state = self.lock();
        if !state.online {
            return;
        }
        world.set_id_lookup(Some(state.remap.forward_table()));
        state.id_lookup_active = true;
    }

    /// Runs one replication tick: late-joiner backfill, despawn and spawn
    /// dispatch, then the authoritative state broadcast. `frame` is the
    /// engine tick counter stamped into replicate messages.
    pub fn update(&self, frame: u32, world: &mut dyn EngineWorld, peer: &mut dyn NetworkPeer) {
        let mut state = self.lock();
        if !state.online {
            return;
        }
        state.update(frame, world, peer);
    }

    /// Dispatches one received message. `sender` is the originating client
    /// on the server and `None` on a client (messages from the server).
    pub fn receive(
        &self,
        world: &mut dyn EngineWorld,
        peer: &mut dyn NetworkPeer,
        sender: Option<ClientId>,
        payload: &[u8],
    ) {
        let mut state = self.lock();
        if !state.online {
            return;
        }
        let mut reader = Cursor::new(payload);
        let Ok(id_byte) = reader.read_u8() else {
            warn!("empty network message");
            return;
        };
        match MessageId::from(id_byte) {
            MessageId::ObjectReplicate => match ObjectReplicateMessage::read(&mut reader) {
                Ok(message) => {
                    let start = reader.position() as usize;
                    let end = start + message.data_size as usize;
                    if end > payload.len() {
                        warn!("replicate payload truncated for {}", message.object_id);
                        return;
                    }
                    state.on_replicate(world, sender, &message, &payload[start..end]);
                }
                Err(err) => warn!("malformed replicate message: {}", err),
            },
            MessageId::ObjectSpawn => match ObjectSpawnMessage::read(&mut reader) {
                Ok(message) => state.on_spawn(world, &message),
                Err(err) => warn!("malformed spawn message: {}", err),
            },
            MessageId::ObjectDespawn => match ObjectDespawnMessage::read(&mut reader) {
                Ok(message) => state.on_despawn(world, sender, &message),
                Err(err) => warn!("malformed despawn message: {}", err),
            },
            MessageId::ObjectRole => match ObjectRoleMessage::read(&mut reader) {
                Ok(message) => state.on_role(world, peer, sender, &message),
                Err(err) => warn!("malformed role message: {}", err),
            },
            MessageId::Unknown => warn!("unknown message id {}", id_byte),
        }
    }
}

impl Default for NetworkReplicator {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplicatorState {
    fn add_object(&mut self, world: &mut dyn EngineWorld, object_id: &Guid, parent: Option<&Guid>) {
        if self.objects.contains(object_id) {
            return;
        }
        if !world.has_object(object_id) {
            return;
        }

        // Automatic parenting for scene objects
        let parent_id = match parent {
            Some(parent) => *parent,
            None => world.scene_parent(object_id).unwrap_or(Guid::EMPTY),
        };

        // Server owns objects by default
        let role = if self.mode.is_client() {
            ObjectRole::Replicated
        } else {
            ObjectRole::OwnedAuthoritative
        };
        let mut item = ReplicatedObject::new(*object_id, parent_id, SERVER_CLIENT_ID, role);
        item.has_hooks = world.has_network_hooks(object_id);
        info!("add new object {} (parent {})", object_id, parent_id);
        self.objects.insert(item);
    }

    fn set_ownership(
        &mut self,
        peer: &mut dyn NetworkPeer,
        object_id: &Guid,
        owner_client_id: ClientId,
        local_role: ObjectRole,
        hierarchical: bool,
    ) {
        if !self.objects.contains(object_id) {
            // the object may be spawning this very tick; stash the override
            for intent in &mut self.spawn_queue {
                if intent.object_id == *object_id {
                    intent.ownership = Some(OwnershipOverride {
                        owner_client_id,
                        role: local_role,
                        hierarchical,
                    });
                    break;
                }
            }
            return;
        }

        let local_client_id = self.local_client_id;
        let is_owner = self
            .objects
            .get(object_id)
            .map(|item| item.owner_client_id == local_client_id)
            .unwrap_or(false);

        if is_owner {
            if owner_client_id != local_client_id {
                // handing authority off: the owner downgrades itself
                // atomically with the role broadcast
                if local_role == ObjectRole::OwnedAuthoritative {
                    error!("owner of {} must downgrade its role when handing off", object_id);
                    return;
                }
                {
                    let item = self.objects.get_mut(object_id).unwrap();
                    item.owner_client_id = owner_client_id;
                    item.last_owner_frame = 1;
                    item.role = local_role;
                }
                self.send_role_message(peer, object_id, owner_client_id, None);
            } else if local_role != ObjectRole::OwnedAuthoritative {
                error!("owner of {} cannot drop authority without a new owner", object_id);
                return;
            }
        } else {
            // a non-owner may only adjust its local role
            if local_role == ObjectRole::OwnedAuthoritative {
                error!("cannot claim authority over {} without ownership", object_id);
                return;
            }
            self.objects.get_mut(object_id).unwrap().role = local_role;
        }

        if hierarchical {
            let children: Vec<Guid> = self
                .objects
                .iter()
                .filter(|item| item.parent_id == *object_id)
                .map(|item| item.object_id)
                .collect();
            for child in children {
                self.set_ownership(peer, &child, owner_client_id, local_role, hierarchical);
            }
        }
    }

    fn clear(&mut self, world: &mut dyn EngineWorld) {
        info!("replication shutdown");
        for id in self.objects.ids() {
            let Some(item) = self.objects.get(&id) else {
                continue;
            };
            if item.spawned && world.has_object(&id) {
                if item.has_hooks {
                    world.on_network_despawn(&id);
                }
                world.destroy_object(&id);
            }
        }
        self.objects.clear();
        self.spawn_queue.clear();
        self.despawn_queue.clear();
        self.remap.clear();
        self.write_stream.free();
        self.read_stream.free();
        self.new_clients.clear();
        self.clients.clear();
        if self.id_lookup_active {
            world.set_id_lookup(None);
            self.id_lookup_active = false;
        }
        self.online = false;
    }

    /// Re-installs the engine id-mapping after the remap table changed, but
    /// only while a mapping is active.
    fn refresh_id_lookup(&self, world: &mut dyn EngineWorld) {
        if self.id_lookup_active {
            world.set_id_lookup(Some(self.remap.forward_table()));
        }
    }

    fn send_spawn_message(
        &self,
        world: &dyn EngineWorld,
        peer: &mut dyn NetworkPeer,
        object_id: &Guid,
        targets: &[ConnectionHandle],
    ) {
        let Some(item) = self.objects.get(object_id) else {
            return;
        };
        let Some(type_handle) = world.object_type(object_id) else {
            return;
        };
        let Some(type_name) = world.type_fullname(&type_handle) else {
            return;
        };

        let is_client = self.mode.is_client();
        let (mut wire_object_id, mut wire_parent_id) = (item.object_id, item.parent_id);
        if is_client {
            // rewrite local ids into the server-issued ids
            wire_object_id = self.remap.to_foreign(&wire_object_id);
            wire_parent_id = self.remap.to_foreign(&wire_parent_id);
        }

        let mut prefab_id = Guid::EMPTY;
        let mut prefab_object_id = Guid::EMPTY;
        if world.is_scene_object(object_id) {
            if let Some(link) = world.prefab_link(object_id) {
                prefab_id = link.prefab_id;
                prefab_object_id = link.prefab_object_id;
            }
        }

        let message = ObjectSpawnMessage {
            object_id: wire_object_id,
            parent_id: wire_parent_id,
            prefab_id,
            prefab_object_id,
            owner_client_id: item.owner_client_id,
            type_name,
        };
        let mut out = peer.begin_send();
        message.write(out.buffer_mut());
        if is_client {
            peer.end_send(ChannelKind::ReliableOrdered, out, None);
        } else {
            peer.end_send(ChannelKind::ReliableOrdered, out, Some(targets));
        }
    }

    fn send_role_message(
        &self,
        peer: &mut dyn NetworkPeer,
        object_id: &Guid,
        owner_client_id: ClientId,
        exclude: Option<ClientId>,
    ) {
        let is_client = self.mode.is_client();
        let wire_object_id = if is_client {
            self.remap.to_foreign(object_id)
        } else {
            *object_id
        };
        let message = ObjectRoleMessage {
            object_id: wire_object_id,
            owner_client_id,
        };
        let mut out = peer.begin_send();
        message.write(out.buffer_mut());
        if is_client {
            peer.end_send(ChannelKind::ReliableOrdered, out, None);
        } else {
            let targets = collect_targets(&self.clients, None, exclude);
            peer.end_send(ChannelKind::ReliableOrdered, out, Some(&targets));
        }
    }

    fn update(&mut self, frame: u32, world: &mut dyn EngineWorld, peer: &mut dyn NetworkPeer) {
        let is_client = self.mode.is_client();

        // Sync previously spawned objects with late-joining clients
        if !is_client && !self.new_clients.is_empty() {
            for id in self.objects.ids() {
                let Some(item) = self.objects.get(&id) else {
                    continue;
                };
                if !item.spawned || !world.has_object(&id) {
                    continue;
                }
                let targets = collect_targets(
                    &self.new_clients,
                    item.target_client_ids.as_deref(),
                    None,
                );
                self.send_spawn_message(world, peer, &id, &targets);
            }
            self.new_clients.clear();
        }

        // Collect this tick's broadcast set
        let broadcast = collect_targets(&self.clients, None, None);
        if !is_client && broadcast.is_empty() {
            // the server has nobody to send to
            world.set_id_lookup(None);
            self.id_lookup_active = false;
            return;
        }

        // Despawns
        if !self.despawn_queue.is_empty() {
            let queue = std::mem::take(&mut self.despawn_queue);
            for id in queue {
                info!("despawn object {}", id);
                let wire_id = if is_client { self.remap.to_foreign(&id) } else { id };
                let message = ObjectDespawnMessage { object_id: wire_id };
                let mut out = peer.begin_send();
                message.write(out.buffer_mut());
                if is_client {
                    peer.end_send(ChannelKind::ReliableOrdered, out, None);
                } else {
                    peer.end_send(ChannelKind::ReliableOrdered, out, Some(&broadcast));
                }
            }
        }

        // Spawns
        if !self.spawn_queue.is_empty() {
            // First pass: a hierarchical override extends to queued scene
            // descendants, so intent order within the tick does not matter
            for i in 0..self.spawn_queue.len() {
                let Some(ownership) = self.spawn_queue[i].ownership else {
                    continue;
                };
                if !ownership.hierarchical {
                    continue;
                }
                let ancestor = self.spawn_queue[i].object_id;
                for j in 0..self.spawn_queue.len() {
                    if i == j || self.spawn_queue[j].ownership.is_some() {
                        continue;
                    }
                    if is_scene_descendant(world, &self.spawn_queue[j].object_id, &ancestor) {
                        self.spawn_queue[j].ownership = Some(OwnershipOverride {
                            owner_client_id: ownership.owner_client_id,
                            role: ownership.role,
                            hierarchical: false,
                        });
                    }
                }
            }

            // Second pass: dispatch
            let queue = std::mem::take(&mut self.spawn_queue);
            for intent in queue {
                let id = intent.object_id;
                if !world.has_object(&id) {
                    continue; // deleted before its spawn went out
                }
                if !self.objects.contains(&id) {
                    self.add_object(world, &id, None);
                }
                if !self.objects.contains(&id) {
                    continue;
                }
                {
                    let item = self.objects.get(&id).unwrap();
                    if item.owner_client_id != self.local_client_id
                        || item.role != ObjectRole::OwnedAuthoritative
                    {
                        continue; // not ours to spawn
                    }
                }

                if let Some(ownership) = intent.ownership {
                    {
                        let item = self.objects.get_mut(&id).unwrap();
                        item.role = ownership.role;
                        item.owner_client_id = ownership.owner_client_id;
                    }
                    if ownership.hierarchical {
                        self.set_ownership(
                            peer,
                            &id,
                            ownership.owner_client_id,
                            ownership.role,
                            true,
                        );
                    }
                }
                if let Some(targets) = intent.targets {
                    if is_client {
                        warn!("explicit spawn targets are server-side only; ignored for {}", id);
                    } else {
                        self.objects.get_mut(&id).unwrap().target_client_ids = Some(targets);
                    }
                }

                info!("spawn object {}", id);
                let targets = {
                    let item = self.objects.get(&id).unwrap();
                    collect_targets(&self.clients, item.target_client_ids.as_deref(), None)
                };
                self.send_spawn_message(world, peer, &id, &targets);
                self.objects.get_mut(&id).unwrap().spawned = true;
            }
        }

        // State broadcast over all registered objects
        let mut dead: Vec<Guid> = Vec::new();
        for id in self.objects.ids() {
            if !world.has_object(&id) {
                info!("remove object {} (backing object destroyed)", id);
                dead.push(id);
                continue;
            }
            let (role, owner, has_hooks) = {
                let item = self.objects.get(&id).unwrap();
                (item.role, item.owner_client_id, item.has_hooks)
            };
            // owned objects replicate out; the server additionally relays
            // client-owned state to the other clients
            let relays = !is_client && owner != self.local_client_id;
            if role != ObjectRole::OwnedAuthoritative && !relays {
                continue;
            }

            if has_hooks {
                world.on_network_serialize(&id);
            }

            let Some(type_handle) = world.object_type(&id) else {
                continue;
            };
            self.write_stream.initialize();
            if let Err(err) = self.serializers.invoke(
                world,
                &type_handle,
                &id,
                &mut self.write_stream,
                SerializeDirection::Write,
            ) {
                let item = self.objects.get_mut(&id).unwrap();
                if !item.invalid_type_warned {
                    item.invalid_type_warned = true;
                    error!("cannot serialize object {} of type {:?}: {}", id, type_handle, err);
                }
                continue;
            }

            let size = self.write_stream.position();
            assert!(
                size <= u16::MAX as usize,
                "replicated payload for {} exceeds the wire limit",
                id
            );

            let (mut wire_object_id, mut wire_parent_id) = {
                let item = self.objects.get(&id).unwrap();
                (item.object_id, item.parent_id)
            };
            if is_client {
                wire_object_id = self.remap.to_foreign(&wire_object_id);
                wire_parent_id = self.remap.to_foreign(&wire_parent_id);
            }
            let message = ObjectReplicateMessage {
                owner_frame: frame,
                object_id: wire_object_id,
                parent_id: wire_parent_id,
                type_name: world.type_fullname(&type_handle).unwrap_or_default(),
                data_size: size as u16,
            };
            let mut out = peer.begin_send();
            message.write(out.buffer_mut());
            out.buffer_mut().extend_from_slice(self.write_stream.bytes());
            if is_client {
                peer.end_send(ChannelKind::Unreliable, out, None);
            } else {
                let targets = {
                    let item = self.objects.get(&id).unwrap();
                    collect_targets(&self.clients, item.target_client_ids.as_deref(), Some(owner))
                };
                peer.end_send(ChannelKind::Unreliable, out, Some(&targets));
            }
        }
        for id in &dead {
            self.objects.remove(id);
        }

        // Drop the engine id-mapping until the next pre-update
        world.set_id_lookup(None);
        self.id_lookup_active = false;
    }

    fn on_replicate(
        &mut self,
        world: &mut dyn EngineWorld,
        sender: Option<ClientId>,
        message: &ObjectReplicateMessage,
        data: &[u8],
    ) {
        let remap_len = self.remap.len();
        let Some(local_id) = self.objects.resolve_heuristic(
            &mut self.remap,
            &*world,
            &message.object_id,
            &message.parent_id,
            &message.type_name,
        ) else {
            // replication raced ahead of the spawn message; drop it
            debug!("replicate for unknown object {}", message.object_id);
            return;
        };
        if self.remap.len() != remap_len {
            self.refresh_id_lookup(world);
        }

        if !world.has_object(&local_id) {
            return;
        }
        let (owner, role, last_owner_frame, has_hooks) = {
            let item = self.objects.get(&local_id).unwrap();
            (item.owner_client_id, item.role, item.last_owner_frame, item.has_hooks)
        };

        // only the owner may drive this object's state
        if let Some(sender_id) = sender {
            if owner != sender_id {
                return;
            }
        }
        // stale cross-over after an ownership change
        if role == ObjectRole::OwnedAuthoritative {
            return;
        }
        // the unreliable channel reorders; old frames lose
        if last_owner_frame >= message.owner_frame {
            return;
        }
        self.objects.get_mut(&local_id).unwrap().last_owner_frame = message.owner_frame;

        let Some(type_handle) = world.object_type(&local_id) else {
            return;
        };
        self.read_stream.initialize_read(data);
        if let Err(err) = self.serializers.invoke(
            world,
            &type_handle,
            &local_id,
            &mut self.read_stream,
            SerializeDirection::Read,
        ) {
            let item = self.objects.get_mut(&local_id).unwrap();
            if !item.invalid_type_warned {
                item.invalid_type_warned = true;
                error!(
                    "cannot deserialize object {} of type {:?}: {}",
                    local_id, type_handle, err
                );
            }
        }

        if has_hooks {
            world.on_network_deserialize(&local_id);
        }
    }

    fn on_spawn(&mut self, world: &mut dyn EngineWorld, message: &ObjectSpawnMessage) {
        let remap_len = self.remap.len();
        if let Some(local_id) = self.objects.resolve_heuristic(
            &mut self.remap,
            &*world,
            &message.object_id,
            &message.parent_id,
            &message.type_name,
        ) {
            // already known (paired heuristically or spawned before); a
            // repeated spawn is a state no-op
            if self.remap.len() != remap_len {
                self.refresh_id_lookup(world);
            }
            let is_client = self.mode.is_client();
            let item = self.objects.get_mut(&local_id).unwrap();
            item.spawned = true;
            if is_client {
                // the server always knows best; adopt its ownership
                item.owner_client_id = message.owner_client_id;
                if item.role == ObjectRole::OwnedAuthoritative {
                    item.role = ObjectRole::Replicated;
                }
            }
            return;
        }

        // Reconstruct the object locally
        let parent_local = self.objects.resolve(&self.remap, &message.parent_id);
        let object = if !message.prefab_id.is_empty() {
            match self.reconstruct_from_prefab(world, message, parent_local) {
                Some(object) => object,
                None => return,
            }
        } else {
            let Some(type_handle) = world.find_type(&message.type_name) else {
                error!("failed to spawn object of type {}", message.type_name);
                return;
            };
            match world.construct_object(&type_handle) {
                Some(object) => object,
                None => {
                    error!("failed to spawn object of type {}", message.type_name);
                    return;
                }
            }
        };

        // Register it
        let parent_id = parent_local.unwrap_or(Guid::EMPTY);
        let role = if message.owner_client_id == self.local_client_id {
            // the remote side spawned an object the local client should own
            ObjectRole::OwnedAuthoritative
        } else {
            ObjectRole::Replicated
        };
        let mut item = ReplicatedObject::new(object, parent_id, message.owner_client_id, role);
        item.spawned = true;
        item.has_hooks = world.has_network_hooks(&object);
        let has_hooks = item.has_hooks;
        info!("add new object {} (parent {})", object, parent_id);
        self.objects.insert(item);

        // Boost future lookups by using indirection
        info!("remap object id {} into object {}", message.object_id, object);
        self.remap.insert(message.object_id, object);
        self.refresh_id_lookup(world);

        // Automatic parenting for scene objects
        if world.is_scene_object(&object) {
            let direct = parent_local.filter(|p| world.has_object(p) && world.is_scene_object(p));
            if let Some(parent) = direct {
                world.set_scene_parent(&object, &parent);
            } else {
                let engine_parent = self.remap.resolve(&message.parent_id);
                if world.has_object(&engine_parent) && world.is_scene_object(&engine_parent) {
                    world.set_scene_parent(&object, &engine_parent);
                }
            }
        }

        if has_hooks {
            world.on_network_spawn(&object);
        }
    }

    /// Locates or creates the engine object for a prefab-borne spawn.
    /// Reuse order: the parent itself when it is an instance of the same
    /// prefab, then an unbound instance among the parent's children, then a
    /// freshly spawned prefab. Failures leave no partial instance behind.
    fn reconstruct_from_prefab(
        &self,
        world: &mut dyn EngineWorld,
        message: &ObjectSpawnMessage,
        parent_local: Option<Guid>,
    ) -> Option<Guid> {
        let mut object: Option<Guid> = None;
        let mut prefab_instance: Option<Guid> = None;

        let parent_scene =
            parent_local.filter(|p| world.has_object(p) && world.is_scene_object(p));
        if let Some(parent) = parent_scene {
            if world.prefab_link(&parent).map(|link| link.prefab_id) == Some(message.prefab_id) {
                // the parent is an instance of this very prefab
                prefab_instance = Some(parent);
            }
        }

        if prefab_instance.is_none() {
            // the prefab may have been spawned earlier (eg. its actor came
            // through before this networked script); search the parent's
            // children for an instance whose object is still unbound
            let engine_parent = self.remap.resolve(&message.parent_id);
            if world.has_object(&engine_parent) && world.is_scene_object(&engine_parent) {
                for child in world.children(&engine_parent) {
                    if world.prefab_link(&child).map(|link| link.prefab_id)
                        != Some(message.prefab_id)
                    {
                        continue;
                    }
                    if !self.objects.contains(&child) {
                        continue;
                    }
                    if let Some(candidate) =
                        world.find_prefab_object(&child, &message.prefab_object_id)
                    {
                        if self.objects.contains(&candidate) {
                            // that instance's object is already bound
                            continue;
                        }
                        object = Some(candidate);
                        prefab_instance = Some(child);
                        break;
                    }
                }
            }
        }

        let instance = match prefab_instance {
            Some(instance) => instance,
            None => match world.spawn_prefab(&message.prefab_id) {
                Some(instance) => instance,
                None => {
                    error!("failed to load or spawn prefab {}", message.prefab_id);
                    return None;
                }
            },
        };

        if object.is_none() {
            object = world.find_prefab_object(&instance, &message.prefab_object_id);
        }
        if object.is_none() {
            error!(
                "failed to find object {} in prefab {}",
                message.prefab_object_id, message.prefab_id
            );
            world.destroy_object(&instance);
            return None;
        }
        object
    }

    fn on_despawn(
        &mut self,
        world: &mut dyn EngineWorld,
        sender: Option<ClientId>,
        message: &ObjectDespawnMessage,
    ) {
        let Some(local_id) = self.objects.resolve(&self.remap, &message.object_id) else {
            error!("failed to despawn object {}", message.object_id);
            return;
        };
        let (spawned, owner, has_hooks) = {
            let item = self.objects.get(&local_id).unwrap();
            (item.spawned, item.owner_client_id, item.has_hooks)
        };
        if !spawned || !world.has_object(&local_id) {
            return;
        }
        // only the owner may despawn
        if let Some(sender_id) = sender {
            if owner != sender_id {
                return;
            }
        }
        if has_hooks {
            world.on_network_despawn(&local_id);
        }
        self.objects.remove(&local_id);
        world.destroy_object(&local_id);
    }

    fn on_role(
        &mut self,
        world: &mut dyn EngineWorld,
        peer: &mut dyn NetworkPeer,
        sender: Option<ClientId>,
        message: &ObjectRoleMessage,
    ) {
        let Some(local_id) = self.objects.resolve(&self.remap, &message.object_id) else {
            error!("unknown object role update {}", message.object_id);
            return;
        };
        if !world.has_object(&local_id) {
            return;
        }
        {
            let item = self.objects.get(&local_id).unwrap();
            if let Some(sender_id) = sender {
                if item.owner_client_id != sender_id {
                    return;
                }
            }
        }

        let local_client_id = self.local_client_id;
        {
            let item = self.objects.get_mut(&local_id).unwrap();
            item.owner_client_id = message.owner_client_id;
            // force the next inbound replicate to supersede buffered state
            item.last_owner_frame = 1;
            if item.owner_client_id == local_client_id {
                // upgrade automatically; the local client produces frames now
                item.role = ObjectRole::OwnedAuthoritative;
                item.last_owner_frame = 0;
            } else if item.role == ObjectRole::OwnedAuthoritative {
                item.role = ObjectRole::Replicated;
            }
        }

        if !self.mode.is_client() {
            // relay the ownership change to everyone but the originator
            self.send_role_message(peer, &local_id, message.owner_client_id, sender);
        }
    }
}
