//! Clipboard service client backend.
//!
//! One [`ServiceConnection`] per process talks to the clipboard service
//! over its Unix socket. Requests are written by a writer task; a reader
//! task routes each `response` back to the callback stored under its
//! request id. Both tasks run on the event loop, so callbacks fire on the
//! loop thread. A [`ServiceBackend`] binds the connection to one
//! clipboard buffer.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::Path;
use std::rc::{Rc, Weak};

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Framed;

use super::{
    BackendError, ClipboardBackend, ClipboardBuffer, DataMap, DataReceived, MimeTypesReceived,
    OfferDone,
};
use crate::ipc::codec::MessageCodec;
use crate::ipc::protocol::{Message, PROTOCOL_VERSION, Status, entries_from_map};

type ClientFramed = Framed<UnixStream, MessageCodec>;

/// Callback waiting for the response with a given id.
enum Pending {
    Offer {
        clipboard: ClipboardBuffer,
        on_done: OfferDone,
    },
    Read {
        mime_type: String,
        on_done: DataReceived,
    },
    MimeTypes(MimeTypesReceived),
    SequenceNumber(oneshot::Sender<u64>),
}

impl Pending {
    /// Resolve without an answer. Data and type callbacks get an empty
    /// value; an offer callback is dropped, which reads as "not
    /// acknowledged" to the bridge.
    fn abandon(self) {
        match self {
            Pending::Offer { .. } | Pending::SequenceNumber(_) => {}
            Pending::Read { on_done, .. } => on_done(DataMap::new()),
            Pending::MimeTypes(on_done) => on_done(Vec::new()),
        }
    }
}

struct Inner {
    outgoing: mpsc::UnboundedSender<Message>,
    next_id: Cell<u32>,
    pending: RefCell<HashMap<u32, Pending>>,
    owned: RefCell<HashMap<ClipboardBuffer, bool>>,
    connected: Cell<bool>,
}

/// A live connection to the clipboard service. Cheap to clone.
#[derive(Clone)]
pub struct ServiceConnection {
    inner: Rc<Inner>,
}

impl ServiceConnection {
    /// Connect and handshake. Must run on the event loop, since the I/O
    /// tasks are spawned with `spawn_local`.
    pub async fn connect(path: &Path) -> Result<Self, BackendError> {
        let stream = UnixStream::connect(path)
            .await
            .map_err(|e| BackendError::Connect(format!("{}: {e}", path.display())))?;
        let mut framed = Framed::new(stream, MessageCodec::new());
        handshake(&mut framed).await?;

        let (sink, stream) = framed.split();
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let inner = Rc::new(Inner {
            outgoing,
            next_id: Cell::new(1),
            pending: RefCell::new(HashMap::new()),
            owned: RefCell::new(HashMap::new()),
            connected: Cell::new(true),
        });

        tokio::task::spawn_local(write_loop(sink, outgoing_rx));
        tokio::task::spawn_local(read_loop(stream, Rc::downgrade(&inner)));

        tracing::debug!(path = %path.display(), "connected to clipboard service");
        Ok(Self { inner })
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.get()
    }

    /// Number of requests still waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.borrow().len()
    }

    /// The service's offer count for `clipboard`, shared by every client.
    /// `None` if the service cannot answer.
    pub async fn sequence_number(&self, clipboard: ClipboardBuffer) -> Option<u64> {
        let (tx, rx) = oneshot::channel();
        self.request(
            |id| Message::GetSequenceNumber { id, clipboard },
            Pending::SequenceNumber(tx),
        );
        rx.await.ok()
    }

    fn is_owner(&self, clipboard: ClipboardBuffer) -> bool {
        self.inner.owned.borrow().get(&clipboard).copied().unwrap_or(false)
    }

    /// Send a request built from a fresh id and remember its callback.
    fn request(&self, build: impl FnOnce(u32) -> Message, pending: Pending) {
        if !self.inner.connected.get() {
            defer_abandon(pending);
            return;
        }
        let id = self.inner.allocate_id();
        self.inner.pending.borrow_mut().insert(id, pending);
        if self.inner.outgoing.send(build(id)).is_err() {
            tracing::debug!(id, "clipboard service writer gone");
            if let Some(pending) = self.inner.pending.borrow_mut().remove(&id) {
                defer_abandon(pending);
            }
        }
    }
}

impl Inner {
    fn allocate_id(&self) -> u32 {
        let id = self.next_id.get();
        // Zero is reserved for unsolicited messages.
        self.next_id.set(id.checked_add(1).unwrap_or(1));
        id
    }

    fn route(&self, msg: Message) {
        match msg {
            Message::Response {
                id,
                status,
                error,
                data,
                mime_types,
                sequence_number,
            } => {
                let Some(pending) = self.pending.borrow_mut().remove(&id) else {
                    tracing::debug!(id, "response for unknown request");
                    return;
                };
                if status == Status::Error {
                    tracing::warn!(id, error = error.as_deref().unwrap_or(""), "clipboard service error");
                    pending.abandon();
                    return;
                }
                match pending {
                    Pending::Offer { clipboard, on_done } => {
                        self.owned.borrow_mut().insert(clipboard, true);
                        on_done();
                    }
                    Pending::Read { mime_type, on_done } => {
                        let data = data
                            .map(|bytes| DataMap::from([(mime_type, bytes)]))
                            .unwrap_or_default();
                        on_done(data);
                    }
                    Pending::MimeTypes(on_done) => on_done(mime_types.unwrap_or_default()),
                    Pending::SequenceNumber(tx) => {
                        if let Some(number) = sequence_number {
                            let _ = tx.send(number);
                        }
                    }
                }
            }
            Message::SelectionChanged {
                clipboard, owned, ..
            } => {
                tracing::debug!(?clipboard, owned, "selection ownership changed");
                self.owned.borrow_mut().insert(clipboard, owned);
            }
            other => tracing::debug!(msg = ?other, "ignoring unexpected message"),
        }
    }

    fn disconnected(&self) {
        self.connected.set(false);
        self.owned.borrow_mut().clear();
        let pending: Vec<Pending> = self.pending.borrow_mut().drain().map(|(_, p)| p).collect();
        tracing::warn!(outstanding = pending.len(), "clipboard service connection lost");
        for callback in pending {
            callback.abandon();
        }
    }
}

async fn handshake(framed: &mut ClientFramed) -> Result<(), BackendError> {
    let handshake_err = |e: &dyn std::fmt::Display| BackendError::Handshake(e.to_string());

    framed
        .send(Message::Hello {
            id: 0,
            version: PROTOCOL_VERSION,
        })
        .await
        .map_err(|e| handshake_err(&e))?;

    match framed.next().await {
        Some(Ok(Message::HelloAck {
            status: Status::Ok, ..
        })) => Ok(()),
        Some(Ok(Message::HelloAck { error, .. })) => Err(BackendError::Handshake(
            error.unwrap_or_else(|| "rejected".into()),
        )),
        Some(Ok(other)) => Err(BackendError::Handshake(format!("unexpected {other:?}"))),
        Some(Err(e)) => Err(handshake_err(&e)),
        None => Err(BackendError::Handshake("connection closed".into())),
    }
}

async fn write_loop(
    mut sink: SplitSink<ClientFramed, Message>,
    mut outgoing: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = outgoing.recv().await {
        if let Err(e) = sink.send(msg).await {
            tracing::warn!(error = %e, "clipboard service write failed");
            break;
        }
    }
}

async fn read_loop(mut stream: SplitStream<ClientFramed>, inner: Weak<Inner>) {
    while let Some(frame) = stream.next().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        match frame {
            Ok(msg) => inner.route(msg),
            Err(e) => {
                tracing::warn!(error = %e, "clipboard service read failed");
                break;
            }
        }
    }
    if let Some(inner) = inner.upgrade() {
        inner.disconnected();
    }
}

/// Abandon on the next loop turn, so the callback never runs inside
/// the caller's dispatch.
fn defer_abandon(pending: Pending) {
    tokio::task::spawn_local(async move { pending.abandon() });
}

/// [`ClipboardBackend`] for one buffer of the clipboard service.
pub struct ServiceBackend {
    connection: ServiceConnection,
    clipboard: ClipboardBuffer,
}

impl ServiceBackend {
    pub fn new(connection: &ServiceConnection, clipboard: ClipboardBuffer) -> Self {
        Self {
            connection: connection.clone(),
            clipboard,
        }
    }
}

impl ClipboardBackend for ServiceBackend {
    fn is_selection_owner(&self) -> bool {
        self.connection.is_owner(self.clipboard)
    }

    fn offer_clipboard_data(&self, data: DataMap, on_done: OfferDone) {
        let clipboard = self.clipboard;
        let entries = entries_from_map(data);
        self.connection.request(
            |id| Message::Offer {
                id,
                clipboard,
                entries,
            },
            Pending::Offer { clipboard, on_done },
        );
    }

    fn request_clipboard_data(&self, mime_type: &str, on_done: DataReceived) {
        let clipboard = self.clipboard;
        let requested = mime_type.to_string();
        self.connection.request(
            |id| Message::Read {
                id,
                clipboard,
                mime_type: requested,
            },
            Pending::Read {
                mime_type: mime_type.to_string(),
                on_done,
            },
        );
    }

    fn get_available_mime_types(&self, on_done: MimeTypesReceived) {
        let clipboard = self.clipboard;
        self.connection.request(
            |id| Message::ListMimeTypes { id, clipboard },
            Pending::MimeTypes(on_done),
        );
    }
}
