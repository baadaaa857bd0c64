use crate::types::{ClientId, HostType, SERVER_CLIENT_ID};

/// Settings the replicator is brought online with.
#[derive(Clone, Copy, Debug)]
pub struct ReplicatorConfig {
    /// Whether this host is the authoritative server or a client.
    pub mode: HostType,
    /// Id the local host is known by; [`SERVER_CLIENT_ID`] on the server,
    /// the transport-assigned id on a client.
    pub local_client_id: ClientId,
}

impl ReplicatorConfig {
    pub fn server() -> Self {
        Self {
            mode: HostType::Server,
            local_client_id: SERVER_CLIENT_ID,
        }
    }

    pub fn client(local_client_id: ClientId) -> Self {
        Self {
            mode: HostType::Client,
            local_client_id,
        }
    }
}
