// Contract with the lower network layer. The peer owns framing, channels and
// connection state; the replicator only assembles messages and picks targets.

use std::ops::Deref;

use crate::types::ClientId;

/// Delivery guarantees a message is sent with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelKind {
    /// Delivered exactly once, in send order per peer. Used for lifecycle and
    /// ownership messages.
    ReliableOrdered,
    /// May drop, duplicate or reorder. Used for state snapshots, which are
    /// gated by the owner frame counter on receive.
    Unreliable,
}

/// Handle to a live connection held by the transport peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionHandle {
    inner: u32,
}

impl ConnectionHandle {
    pub fn new(value: u32) -> Self {
        Self { inner: value }
    }
}

impl Deref for ConnectionHandle {
    type Target = u32;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

/// A connected remote client as the replicator sees it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RemoteClient {
    pub client_id: ClientId,
    pub connection: ConnectionHandle,
}

/// An outgoing message under assembly, obtained from
/// [`NetworkPeer::begin_send`].
pub struct OutMessage {
    buffer: Vec<u8>,
}

impl OutMessage {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub(crate) fn buffer_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buffer
    }
}

impl Default for OutMessage {
    fn default() -> Self {
        Self::new()
    }
}

/// Transport peer supplied by the lower network layer. Implementations must
/// not block: `end_send` queues the message and returns.
pub trait NetworkPeer {
    /// Starts assembling a new outgoing message.
    fn begin_send(&mut self) -> OutMessage;

    /// Queues a finished message on the given channel. `targets` names the
    /// connections to address (server side); `None` sends to the remote host
    /// the peer is connected to (client side).
    fn end_send(
        &mut self,
        channel: ChannelKind,
        message: OutMessage,
        targets: Option<&[ConnectionHandle]>,
    );
}
