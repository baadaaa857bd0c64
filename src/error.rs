use std::io;

use thiserror::Error;

use crate::types::TypeHandle;

/// Failures local to a single serialize/deserialize attempt. These never
/// cross the replicator boundary; callers drop the affected message and log.
#[derive(Debug, Error)]
pub enum ReplicateError {
    /// No serializer is registered for the type or any of its base types,
    /// and the type does not expose the network-serializable capability.
    #[error("no serializer available for type {0:?}")]
    MissingSerializer(TypeHandle),

    /// Reading or writing the byte stream failed (eg. truncated payload).
    #[error("stream error: {0}")]
    Stream(#[from] io::Error),
}
