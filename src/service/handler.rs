//! Message dispatch and request handling.
//!
//! Pure logic — no I/O. Each handler takes a mutable reference to
//! [`ServiceState`] and returns a response plus an optional
//! [`Notification`] for a connection that just lost a selection.

use crate::backend::ClipboardBuffer;
use crate::ipc::protocol::{Message, PROTOCOL_VERSION, Status, map_from_entries};

use super::state::{ConnectionId, ServiceState};

/// An unsolicited message the service loop must push to another
/// connection.
#[derive(Debug)]
pub struct Notification {
    pub target_connection: ConnectionId,
    pub message: Message,
}

/// Dispatch a request message to the appropriate handler.
///
/// Server-originated variants sent by a client are answered with
/// `unknown_type`.
pub fn handle_message(
    state: &mut ServiceState,
    request: Message,
    connection_id: ConnectionId,
) -> (Message, Option<Notification>) {
    match request {
        Message::Hello { id, version } => (handle_hello(state, id, version, connection_id), None),
        Message::Offer {
            id,
            clipboard,
            entries,
        } => {
            let displaced = state.offer(clipboard, map_from_entries(entries), connection_id);
            tracing::debug!(
                ?connection_id,
                ?clipboard,
                sequence_number = state.sequence_number(clipboard),
                "selection offered"
            );
            (
                Message::ok(id),
                displaced.map(|target| selection_lost(target, clipboard)),
            )
        }
        Message::Read {
            id,
            clipboard,
            mime_type,
        } => (handle_read(state, id, clipboard, &mime_type), None),
        Message::ListMimeTypes { id, clipboard } => (
            Message::Response {
                id,
                status: Status::Ok,
                error: None,
                data: None,
                mime_types: Some(state.mime_types(clipboard)),
                sequence_number: None,
            },
            None,
        ),
        Message::GetSequenceNumber { id, clipboard } => (
            Message::Response {
                id,
                status: Status::Ok,
                error: None,
                data: None,
                mime_types: None,
                sequence_number: Some(state.sequence_number(clipboard)),
            },
            None,
        ),
        Message::HelloAck { id, .. }
        | Message::Response { id, .. }
        | Message::SelectionChanged { id, .. } => (Message::error(id, "unknown_type"), None),
    }
}

fn handle_hello(
    state: &mut ServiceState,
    id: u32,
    version: u32,
    connection_id: ConnectionId,
) -> Message {
    let error = if id != 0 {
        Some("invalid_hello_id")
    } else if version != PROTOCOL_VERSION {
        Some("version_mismatch")
    } else {
        None
    };
    match error {
        None => {
            state.add_connection(connection_id);
            tracing::info!(?connection_id, clients = state.connection_count(), "client connected");
        }
        Some(reason) => tracing::info!(?connection_id, reason, "handshake rejected"),
    }
    Message::HelloAck {
        id: 0,
        status: if error.is_none() { Status::Ok } else { Status::Error },
        error: error.map(str::to_string),
    }
}

/// A missing MIME type is not an error: the reply simply has no data.
fn handle_read(state: &ServiceState, id: u32, clipboard: ClipboardBuffer, mime_type: &str) -> Message {
    Message::Response {
        id,
        status: Status::Ok,
        error: None,
        data: state.read(clipboard, mime_type).map(<[u8]>::to_vec),
        mime_types: None,
        sequence_number: None,
    }
}

fn selection_lost(target: ConnectionId, clipboard: ClipboardBuffer) -> Notification {
    Notification {
        target_connection: target,
        message: Message::SelectionChanged {
            id: 0,
            clipboard,
            owned: false,
        },
    }
}
