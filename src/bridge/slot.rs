//! One in-flight clipboard operation.
//!
//! A [`RequestSlot`] carries the operation's parameters, its deadline and
//! a single-shot completion sender. The matching receiver stays with the
//! waiting bridge; backend callbacks only ever see a `Weak` handle to the
//! slot, so a callback arriving after the slot was retired finds nothing
//! to complete.

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::backend::DataMap;

/// Identifier of a request, unique for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a request asks the backend to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    /// Fetch the payload for one MIME type.
    Read { mime_type: String },
    /// Advertise a data map as the clipboard content.
    Offer { data: DataMap },
    /// List the advertised MIME types.
    Enumerate,
}

impl RequestKind {
    pub fn name(&self) -> &'static str {
        match self {
            RequestKind::Read { .. } => "read",
            RequestKind::Offer { .. } => "offer",
            RequestKind::Enumerate => "enumerate",
        }
    }

    /// The sentinel returned when the request is aborted or the backend
    /// has nothing to give.
    pub fn empty_reply(&self) -> Reply {
        match self {
            RequestKind::Read { .. } => Reply::Read(Vec::new()),
            RequestKind::Offer { .. } => Reply::Offer {
                acknowledged: false,
            },
            RequestKind::Enumerate => Reply::Enumerate(Vec::new()),
        }
    }
}

/// Result of a request, shaped by its kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Read(Vec<u8>),
    Offer { acknowledged: bool },
    Enumerate(Vec<String>),
}

impl Reply {
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Reply::Read(bytes) => bytes,
            _ => Vec::new(),
        }
    }

    pub fn into_mime_types(self) -> Vec<String> {
        match self {
            Reply::Enumerate(types) => types,
            _ => Vec::new(),
        }
    }
}

#[derive(Debug)]
pub struct RequestSlot {
    id: RequestId,
    kind: RequestKind,
    deadline: Instant,
    completion: RefCell<Option<oneshot::Sender<Reply>>>,
}

impl RequestSlot {
    /// Create a slot and the receiver that resolves when it completes.
    pub fn new(kind: RequestKind, deadline: Instant) -> (Self, oneshot::Receiver<Reply>) {
        let (tx, rx) = oneshot::channel();
        let slot = Self {
            id: RequestId::new(),
            kind,
            deadline,
            completion: RefCell::new(Some(tx)),
        };
        (slot, rx)
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn kind(&self) -> &RequestKind {
        &self.kind
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Whether the deadline has passed at `now`.
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    pub fn is_completed(&self) -> bool {
        self.completion.borrow().is_none()
    }

    /// Signal completion with `reply`.
    ///
    /// # Panics
    ///
    /// If the slot was already completed.
    pub fn complete(&self, reply: Reply) {
        let tx = self
            .completion
            .borrow_mut()
            .take()
            .unwrap_or_else(|| panic!("request {} completed twice", self.id));
        // The receiver is gone only if the waiting future was dropped.
        let _ = tx.send(reply);
    }

    /// Give up on the slot without a reply. The waiting receiver sees a
    /// closed channel. No-op once completed.
    pub fn abandon(&self) {
        self.completion.borrow_mut().take();
    }

    /// Complete a read with the payload for the requested MIME type.
    pub fn complete_read(&self, mut data: DataMap) {
        let bytes = match &self.kind {
            RequestKind::Read { mime_type } => data.remove(mime_type).unwrap_or_default(),
            other => panic!("read completion for {} request {}", other.name(), self.id),
        };
        self.complete(Reply::Read(bytes));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn read_slot(mime: &str) -> (RequestSlot, oneshot::Receiver<Reply>) {
        RequestSlot::new(
            RequestKind::Read {
                mime_type: mime.into(),
            },
            Instant::now() + Duration::from_secs(1),
        )
    }

    #[test]
    fn complete_delivers_reply() {
        let (slot, mut rx) = read_slot("text/plain");
        assert!(!slot.is_completed());
        slot.complete(Reply::Read(b"hi".to_vec()));
        assert!(slot.is_completed());
        assert_eq!(rx.try_recv().unwrap(), Reply::Read(b"hi".to_vec()));
    }

    #[test]
    #[should_panic(expected = "completed twice")]
    fn double_completion_panics() {
        let (slot, _rx) = read_slot("text/plain");
        slot.complete(Reply::Read(Vec::new()));
        slot.complete(Reply::Read(Vec::new()));
    }

    #[test]
    fn complete_read_extracts_requested_type() {
        let (slot, mut rx) = read_slot("text/html");
        let data = DataMap::from([
            ("text/plain".to_string(), b"plain".to_vec()),
            ("text/html".to_string(), b"<b>x</b>".to_vec()),
        ]);
        slot.complete_read(data);
        assert_eq!(rx.try_recv().unwrap(), Reply::Read(b"<b>x</b>".to_vec()));
    }

    #[test]
    fn complete_read_missing_type_is_empty() {
        let (slot, mut rx) = read_slot("image/png");
        slot.complete_read(DataMap::new());
        assert_eq!(rx.try_recv().unwrap(), Reply::Read(Vec::new()));
    }

    #[test]
    fn abandon_closes_the_receiver() {
        let (slot, mut rx) = read_slot("text/plain");
        slot.abandon();
        assert!(slot.is_completed());
        assert!(matches!(
            rx.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
        // A second abandon is a no-op.
        slot.abandon();
    }

    #[test]
    fn completing_after_receiver_dropped_is_harmless() {
        let (slot, rx) = read_slot("text/plain");
        drop(rx);
        slot.complete(Reply::Read(Vec::new()));
        assert!(slot.is_completed());
    }

    #[test]
    fn empty_reply_per_kind() {
        assert_eq!(
            RequestKind::Read {
                mime_type: "a".into()
            }
            .empty_reply(),
            Reply::Read(Vec::new())
        );
        assert_eq!(
            RequestKind::Offer {
                data: DataMap::new()
            }
            .empty_reply(),
            Reply::Offer {
                acknowledged: false
            }
        );
        assert_eq!(
            RequestKind::Enumerate.empty_reply(),
            Reply::Enumerate(Vec::new())
        );
    }

    #[test]
    fn expiry_is_inclusive_of_deadline() {
        let now = Instant::now();
        let (slot, _rx) = RequestSlot::new(RequestKind::Enumerate, now);
        assert!(slot.is_expired(now));
        assert!(!slot.is_expired(now - Duration::from_millis(1)));
    }

    #[test]
    fn ids_are_unique() {
        let (a, _) = read_slot("x");
        let (b, _) = read_slot("x");
        assert_ne!(a.id(), b.id());
    }
}
