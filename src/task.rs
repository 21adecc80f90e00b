use bytes::Bytes;

/// Partition key for tasks and workers. Groups sharing a key share a worker
/// pool and a queue.
pub type GroupId = String;

/// A unit of work routed by the dispatcher. The payload is opaque here; the
/// proxy and its workers agree on the encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub payload: Bytes,
}

impl Task {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }
}
