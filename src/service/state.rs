//! Service state — one clipboard per buffer, connection tracking.
//!
//! All methods are pure state transitions with no I/O.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::backend::{ClipboardBuffer, DataMap};

/// Unique identifier for a client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Content of one clipboard buffer.
#[derive(Debug, Default)]
struct ClipboardData {
    /// Bumped on every accepted offer.
    sequence_number: u64,
    data: DataMap,
    /// Connection whose offer is current. Cleared when it disconnects;
    /// the data stays.
    owner: Option<ConnectionId>,
}

/// Owned exclusively by the service loop.
#[derive(Debug, Default)]
pub struct ServiceState {
    buffers: HashMap<ClipboardBuffer, ClipboardData>,
    connections: HashSet<ConnectionId>,
}

impl ServiceState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_connection(&mut self, id: ConnectionId) {
        self.connections.insert(id);
    }

    /// Clients that completed the handshake and are still connected.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Forget a connection and drop any ownership it held. Returns the
    /// buffers it owned; their content is kept.
    pub fn remove_connection(&mut self, id: ConnectionId) -> Vec<ClipboardBuffer> {
        self.connections.remove(&id);
        let mut released = Vec::new();
        for (buffer, clipboard) in &mut self.buffers {
            if clipboard.owner == Some(id) {
                clipboard.owner = None;
                released.push(*buffer);
            }
        }
        released
    }

    /// Replace the buffer content and make `owner` its owner.
    ///
    /// Returns the previous owner when ownership moved to a different
    /// connection, so it can be told it lost the selection.
    pub fn offer(
        &mut self,
        buffer: ClipboardBuffer,
        data: DataMap,
        owner: ConnectionId,
    ) -> Option<ConnectionId> {
        let clipboard = self.buffers.entry(buffer).or_default();
        clipboard.sequence_number += 1;
        clipboard.data = data;
        let previous = clipboard.owner.replace(owner);
        previous.filter(|prev| *prev != owner)
    }

    pub fn read(&self, buffer: ClipboardBuffer, mime_type: &str) -> Option<&[u8]> {
        self.buffers
            .get(&buffer)
            .and_then(|clipboard| clipboard.data.get(mime_type))
            .map(Vec::as_slice)
    }

    /// Advertised MIME types, sorted.
    pub fn mime_types(&self, buffer: ClipboardBuffer) -> Vec<String> {
        let mut types: Vec<String> = self
            .buffers
            .get(&buffer)
            .map(|clipboard| clipboard.data.keys().cloned().collect())
            .unwrap_or_default();
        types.sort();
        types
    }

    pub fn sequence_number(&self, buffer: ClipboardBuffer) -> u64 {
        self.buffers
            .get(&buffer)
            .map_or(0, |clipboard| clipboard.sequence_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COPY: ClipboardBuffer = ClipboardBuffer::CopyPaste;

    fn text(value: &str) -> DataMap {
        DataMap::from([("text/plain".to_string(), value.as_bytes().to_vec())])
    }

    #[test]
    fn empty_buffer_defaults() {
        let state = ServiceState::new();
        assert_eq!(state.sequence_number(COPY), 0);
        assert!(state.mime_types(COPY).is_empty());
        assert_eq!(state.read(COPY, "text/plain"), None);
        assert_eq!(state.connection_count(), 0);
    }

    #[test]
    fn offer_replaces_content_and_bumps_sequence() {
        let mut state = ServiceState::new();
        let conn = ConnectionId::new();
        state.add_connection(conn);

        assert_eq!(state.offer(COPY, text("one"), conn), None);
        assert_eq!(state.offer(COPY, text("two"), conn), None);
        assert_eq!(state.sequence_number(COPY), 2);
        assert_eq!(state.read(COPY, "text/plain"), Some(&b"two"[..]));
        assert_eq!(state.remove_connection(conn), vec![COPY]);
    }

    #[test]
    fn offer_reports_displaced_owner() {
        let mut state = ServiceState::new();
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        state.offer(COPY, text("a"), a);
        assert_eq!(state.offer(COPY, text("b"), b), Some(a));
        assert_eq!(state.offer(COPY, text("a again"), a), Some(b));
    }

    #[test]
    fn buffers_are_independent() {
        let mut state = ServiceState::new();
        let conn = ConnectionId::new();
        state.offer(ClipboardBuffer::Selection, text("sel"), conn);
        assert_eq!(state.sequence_number(COPY), 0);
        assert_eq!(state.sequence_number(ClipboardBuffer::Selection), 1);
        assert_eq!(state.read(COPY, "text/plain"), None);
    }

    #[test]
    fn disconnect_drops_ownership_keeps_data() {
        let mut state = ServiceState::new();
        let conn = ConnectionId::new();
        state.add_connection(conn);
        state.offer(COPY, text("kept"), conn);

        assert_eq!(state.connection_count(), 1);
        assert_eq!(state.remove_connection(conn), vec![COPY]);
        assert_eq!(state.connection_count(), 0);
        // Nothing left to release, and the next offer displaces nobody.
        assert!(state.remove_connection(conn).is_empty());
        assert_eq!(state.read(COPY, "text/plain"), Some(&b"kept"[..]));
        assert_eq!(state.mime_types(COPY), vec!["text/plain".to_string()]);
        assert_eq!(state.offer(COPY, text("new"), ConnectionId::new()), None);
    }

    #[test]
    fn mime_types_are_sorted() {
        let mut state = ServiceState::new();
        let data = DataMap::from([
            ("text/plain".to_string(), vec![1]),
            ("image/png".to_string(), vec![2]),
            ("text/html".to_string(), vec![3]),
        ]);
        state.offer(COPY, data, ConnectionId::new());
        assert_eq!(state.mime_types(COPY), vec!["image/png", "text/html", "text/plain"]);
    }
}
