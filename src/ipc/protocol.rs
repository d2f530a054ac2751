//! Wire protocol between clipboard clients and the clipboard service.
//!
//! Every message is a MessagePack map tagged by `type` and carrying an
//! `id`. Requests get exactly one `response` with the same id; the
//! service may also push `selection_changed` (id 0) at any time.

use serde::{Deserialize, Serialize};

use crate::backend::{ClipboardBuffer, DataMap};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Message {
    // -- Handshake --
    #[serde(rename = "hello")]
    Hello { id: u32, version: u32 },

    #[serde(rename = "hello_ack")]
    HelloAck {
        id: u32,
        status: Status,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    // -- Clipboard requests --
    #[serde(rename = "offer")]
    Offer {
        id: u32,
        clipboard: ClipboardBuffer,
        entries: Vec<MimeEntry>,
    },

    #[serde(rename = "read")]
    Read {
        id: u32,
        clipboard: ClipboardBuffer,
        mime_type: String,
    },

    #[serde(rename = "list_mime_types")]
    ListMimeTypes { id: u32, clipboard: ClipboardBuffer },

    #[serde(rename = "get_sequence_number")]
    GetSequenceNumber { id: u32, clipboard: ClipboardBuffer },

    // -- Unsolicited (service → client) --
    #[serde(rename = "selection_changed")]
    SelectionChanged {
        id: u32,
        clipboard: ClipboardBuffer,
        owned: bool,
    },

    // -- Generic response --
    #[serde(rename = "response")]
    Response {
        id: u32,
        status: Status,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
        data: Option<Vec<u8>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_types: Option<Vec<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sequence_number: Option<u64>,
    },
}

impl Message {
    pub fn id(&self) -> u32 {
        match self {
            Message::Hello { id, .. }
            | Message::HelloAck { id, .. }
            | Message::Offer { id, .. }
            | Message::Read { id, .. }
            | Message::ListMimeTypes { id, .. }
            | Message::GetSequenceNumber { id, .. }
            | Message::SelectionChanged { id, .. }
            | Message::Response { id, .. } => *id,
        }
    }

    /// A bare `ok` response.
    pub fn ok(id: u32) -> Self {
        Message::Response {
            id,
            status: Status::Ok,
            error: None,
            data: None,
            mime_types: None,
            sequence_number: None,
        }
    }

    /// An `error` response with a machine-readable reason.
    pub fn error(id: u32, reason: &str) -> Self {
        Message::Response {
            id,
            status: Status::Error,
            error: Some(reason.to_string()),
            data: None,
            mime_types: None,
            sequence_number: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
}

/// One advertised format inside an `offer`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MimeEntry {
    pub mime_type: String,
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

/// Flatten a data map for the wire. Entries are sorted by MIME type so
/// the encoding is deterministic.
pub fn entries_from_map(data: DataMap) -> Vec<MimeEntry> {
    let mut entries: Vec<MimeEntry> = data
        .into_iter()
        .map(|(mime_type, data)| MimeEntry { mime_type, data })
        .collect();
    entries.sort_by(|a, b| a.mime_type.cmp(&b.mime_type));
    entries
}

/// Rebuild a data map. A repeated MIME type keeps its last payload.
pub fn map_from_entries(entries: Vec<MimeEntry>) -> DataMap {
    entries
        .into_iter()
        .map(|entry| (entry.mime_type, entry.data))
        .collect()
}

pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum payload size (16 MiB).
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Minimal envelope for extracting `{type, id}` from messages this
/// version does not know, so the error response can echo the id.
#[derive(Debug, Deserialize)]
pub struct RawEnvelope {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub id: u32,
}
