//! Backend abstraction — the asynchronous platform clipboard service.
//!
//! A backend offers data, requests data by MIME type, enumerates the
//! advertised MIME types and reports selection ownership. Every
//! asynchronous operation takes a completion callback that the backend
//! invokes exactly once, on the event loop thread. Backends are `!Send`:
//! they live on the UI thread and schedule their work with
//! `tokio::task::spawn_local`, so their asynchronous methods must be
//! called from inside the event loop (the bridge always does this).

pub mod memory;
pub mod service;
pub mod xclip;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub use memory::{MemoryBackend, MemorySelection};
pub use service::{ServiceBackend, ServiceConnection};
pub use xclip::XclipBackend;

/// MIME type → owned payload. Keys are unique, order is irrelevant.
pub type DataMap = HashMap<String, Vec<u8>>;

/// Fired once when an offer has been accepted by the platform.
pub type OfferDone = Box<dyn FnOnce()>;

/// Fired once with the requested payload, or an empty map if the MIME
/// type is not available.
pub type DataReceived = Box<dyn FnOnce(DataMap)>;

/// Fired once with the currently advertised MIME types.
pub type MimeTypesReceived = Box<dyn FnOnce(Vec<String>)>;

/// Which system clipboard buffer an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipboardBuffer {
    /// The explicit copy/paste clipboard.
    CopyPaste,
    /// The implicit selection buffer (middle-click paste).
    Selection,
}

/// Errors raised while attaching to a platform clipboard.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("$XDG_RUNTIME_DIR is not set")]
    NoRuntimeDir,
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("X11: {0}")]
    X11(String),
}

/// The asynchronous platform clipboard consumed by [`crate::bridge::SyncBridge`].
pub trait ClipboardBackend {
    /// Whether this process currently owns the selection. Synchronous.
    fn is_selection_owner(&self) -> bool;

    /// Advertise `data` as the clipboard content.
    fn offer_clipboard_data(&self, data: DataMap, on_done: OfferDone);

    /// Fetch the payload for `mime_type` from the current owner.
    fn request_clipboard_data(&self, mime_type: &str, on_done: DataReceived);

    /// List the MIME types the current owner advertises.
    fn get_available_mime_types(&self, on_done: MimeTypesReceived);
}
