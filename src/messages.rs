// Wire formats for the four replication messages. Packed little-endian with
// no padding; each message leads with its id byte.

use std::io::{self, Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::types::{ClientId, Guid};

/// Fixed size of the NUL-terminated type-name field on the wire.
pub const TYPE_NAME_LEN: usize = 128;

/// Discriminates the replication messages on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    /// Authoritative state snapshot for one object
    ObjectReplicate = 1,
    /// An object entered replication; receivers reconstruct it
    ObjectSpawn = 2,
    /// An object left replication; receivers delete it
    ObjectDespawn = 3,
    /// Object ownership moved to another client
    ObjectRole = 4,
    /// An unrecognized message id
    Unknown = 255,
}

impl From<u8> for MessageId {
    fn from(orig: u8) -> Self {
        match orig {
            1 => return MessageId::ObjectReplicate,
            2 => return MessageId::ObjectSpawn,
            3 => return MessageId::ObjectDespawn,
            4 => return MessageId::ObjectRole,
            _ => return MessageId::Unknown,
        };
    }
}

fn write_guid(out: &mut Vec<u8>, guid: &Guid) {
    out.extend_from_slice(&guid.to_bytes());
}

fn read_guid(reader: &mut Cursor<&[u8]>) -> io::Result<Guid> {
    let mut bytes = [0u8; 16];
    reader.read_exact(&mut bytes)?;
    Ok(Guid::from_bytes(bytes))
}

fn write_type_name(out: &mut Vec<u8>, name: &str) {
    let bytes = name.as_bytes();
    let count = bytes.len().min(TYPE_NAME_LEN - 1);
    out.extend_from_slice(&bytes[..count]);
    out.resize(out.len() + (TYPE_NAME_LEN - count), 0);
}

fn read_type_name(reader: &mut Cursor<&[u8]>) -> io::Result<String> {
    let mut bytes = [0u8; TYPE_NAME_LEN];
    reader.read_exact(&mut bytes)?;
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(TYPE_NAME_LEN);
    Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
}

/// Header of a state snapshot; `data_size` payload bytes follow on the same
/// message.
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectReplicateMessage {
    pub owner_frame: u32,
    pub object_id: Guid,
    pub parent_id: Guid,
    pub type_name: String,
    pub data_size: u16,
}

impl ObjectReplicateMessage {
    pub fn write(&self, out: &mut Vec<u8>) {
        out.write_u8(MessageId::ObjectReplicate as u8).unwrap();
        out.write_u32::<LittleEndian>(self.owner_frame).unwrap();
        write_guid(out, &self.object_id);
        write_guid(out, &self.parent_id);
        write_type_name(out, &self.type_name);
        out.write_u16::<LittleEndian>(self.data_size).unwrap();
    }

    /// Reads the header; assumes the id byte was already consumed.
    pub fn read(reader: &mut Cursor<&[u8]>) -> io::Result<Self> {
        Ok(Self {
            owner_frame: reader.read_u32::<LittleEndian>()?,
            object_id: read_guid(reader)?,
            parent_id: read_guid(reader)?,
            type_name: read_type_name(reader)?,
            data_size: reader.read_u16::<LittleEndian>()?,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ObjectSpawnMessage {
    pub object_id: Guid,
    pub parent_id: Guid,
    pub prefab_id: Guid,
    pub prefab_object_id: Guid,
    pub owner_client_id: ClientId,
    pub type_name: String,
}

impl ObjectSpawnMessage {
    pub fn write(&self, out: &mut Vec<u8>) {
        out.write_u8(MessageId::ObjectSpawn as u8).unwrap();
        write_guid(out, &self.object_id);
        write_guid(out, &self.parent_id);
        write_guid(out, &self.prefab_id);
        write_guid(out, &self.prefab_object_id);
        out.write_u32::<LittleEndian>(self.owner_client_id).unwrap();
        write_type_name(out, &self.type_name);
    }

    pub fn read(reader: &mut Cursor<&[u8]>) -> io::Result<Self> {
        Ok(Self {
            object_id: read_guid(reader)?,
            parent_id: read_guid(reader)?,
            prefab_id: read_guid(reader)?,
            prefab_object_id: read_guid(reader)?,
            owner_client_id: reader.read_u32::<LittleEndian>()?,
            type_name: read_type_name(reader)?,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ObjectDespawnMessage {
    pub object_id: Guid,
}

impl ObjectDespawnMessage {
    pub fn write(&self, out: &mut Vec<u8>) {
        out.write_u8(MessageId::ObjectDespawn as u8).unwrap();
        write_guid(out, &self.object_id);
    }

    pub fn read(reader: &mut Cursor<&[u8]>) -> io::Result<Self> {
        Ok(Self {
            object_id: read_guid(reader)?,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ObjectRoleMessage {
    pub object_id: Guid,
    pub owner_client_id: ClientId,
}

impl ObjectRoleMessage {
    pub fn write(&self, out: &mut Vec<u8>) {
        out.write_u8(MessageId::ObjectRole as u8).unwrap();
        write_guid(out, &self.object_id);
        out.write_u32::<LittleEndian>(self.owner_client_id).unwrap();
    }

    pub fn read(reader: &mut Cursor<&[u8]>) -> io::Result<Self> {
        Ok(Self {
            object_id: read_guid(reader)?,
            owner_client_id: reader.read_u32::<LittleEndian>()?,
        })
    }
}
