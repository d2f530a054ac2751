//! In-process clipboard backend.
//!
//! A [`MemorySelection`] plays the compositor: it holds the advertised
//! data and remembers which client offered it. Each [`MemoryBackend`] is
//! one client of that selection. Answers are delivered on the event loop
//! after a configurable latency, or withheld entirely while the backend
//! is stalled.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::{ClipboardBackend, DataMap, DataReceived, MimeTypesReceived, OfferDone};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ClientId(u64);

impl ClientId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Default)]
struct SelectionState {
    data: DataMap,
    owner: Option<ClientId>,
    requests_served: u64,
}

/// Shared selection state. Cheap to clone.
#[derive(Clone, Default)]
pub struct MemorySelection {
    state: Rc<RefCell<SelectionState>>,
}

impl MemorySelection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current content, regardless of owner.
    pub fn contents(&self) -> DataMap {
        self.state.borrow().data.clone()
    }

    /// Number of data requests answered so far.
    pub fn requests_served(&self) -> u64 {
        self.state.borrow().requests_served
    }

    /// Drop ownership and content, as if the owner went away.
    pub fn clear(&self) {
        let mut state = self.state.borrow_mut();
        state.data.clear();
        state.owner = None;
    }
}

/// A deferred answer held back by a stalled backend.
type Deferred = Box<dyn FnOnce()>;

/// One client of a [`MemorySelection`].
pub struct MemoryBackend {
    id: ClientId,
    selection: MemorySelection,
    latency: Duration,
    stalled: Cell<bool>,
    withheld: RefCell<Vec<Deferred>>,
}

impl MemoryBackend {
    pub fn new(selection: &MemorySelection) -> Self {
        Self {
            id: ClientId::new(),
            selection: selection.clone(),
            latency: Duration::ZERO,
            stalled: Cell::new(false),
            withheld: RefCell::new(Vec::new()),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// While stalled, answers are computed but their callbacks are kept
    /// until [`MemoryBackend::release_withheld`].
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.set(stalled);
    }

    pub fn withheld_count(&self) -> usize {
        self.withheld.borrow().len()
    }

    /// Fire every withheld callback now, in request order.
    pub fn release_withheld(&self) -> usize {
        let withheld: Vec<Deferred> = self.withheld.borrow_mut().drain(..).collect();
        let count = withheld.len();
        for answer in withheld {
            answer();
        }
        count
    }

    fn deliver(&self, answer: Deferred) {
        if self.stalled.get() {
            self.withheld.borrow_mut().push(answer);
            return;
        }
        let latency = self.latency;
        tokio::task::spawn_local(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            answer();
        });
    }
}

impl ClipboardBackend for MemoryBackend {
    fn is_selection_owner(&self) -> bool {
        self.selection.state.borrow().owner == Some(self.id)
    }

    fn offer_clipboard_data(&self, data: DataMap, on_done: OfferDone) {
        {
            let mut state = self.selection.state.borrow_mut();
            state.data = data;
            state.owner = Some(self.id);
        }
        tracing::trace!(client = self.id.0, "memory selection taken");
        self.deliver(on_done);
    }

    fn request_clipboard_data(&self, mime_type: &str, on_done: DataReceived) {
        let answer = {
            let mut state = self.selection.state.borrow_mut();
            state.requests_served += 1;
            state
                .data
                .get(mime_type)
                .map(|bytes| DataMap::from([(mime_type.to_string(), bytes.clone())]))
                .unwrap_or_default()
        };
        self.deliver(Box::new(move || on_done(answer)));
    }

    fn get_available_mime_types(&self, on_done: MimeTypesReceived) {
        let types: Vec<String> = self.selection.state.borrow().data.keys().cloned().collect();
        self.deliver(Box::new(move || on_done(types)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::EventLoop;

    fn text(value: &str) -> DataMap {
        DataMap::from([("text/plain".to_string(), value.as_bytes().to_vec())])
    }

    #[test]
    fn offer_takes_ownership_from_other_client() {
        let event_loop = EventLoop::new().unwrap();
        let selection = MemorySelection::new();
        let a = MemoryBackend::new(&selection);
        let b = MemoryBackend::new(&selection);

        event_loop.run_until(async {
            a.offer_clipboard_data(text("a"), Box::new(|| {}));
        });
        assert!(a.is_selection_owner());
        assert!(!b.is_selection_owner());

        event_loop.run_until(async {
            b.offer_clipboard_data(text("b"), Box::new(|| {}));
        });
        assert!(!a.is_selection_owner());
        assert!(b.is_selection_owner());
        assert_eq!(selection.contents(), text("b"));
    }

    #[test]
    fn request_answers_after_latency() {
        let event_loop = EventLoop::new().unwrap();
        let selection = MemorySelection::new();
        let owner = MemoryBackend::new(&selection);
        let reader = MemoryBackend::new(&selection).with_latency(Duration::from_millis(15));

        let received = event_loop.run_until(async {
            owner.offer_clipboard_data(text("payload"), Box::new(|| {}));
            let (tx, rx) = tokio::sync::oneshot::channel();
            let started = tokio::time::Instant::now();
            reader.request_clipboard_data(
                "text/plain",
                Box::new(move |data| {
                    let _ = tx.send(data);
                }),
            );
            let data = rx.await.unwrap();
            assert!(started.elapsed() >= Duration::from_millis(15));
            data
        });
        assert_eq!(received, text("payload"));
        assert_eq!(selection.requests_served(), 1);
    }

    #[test]
    fn missing_type_answers_empty_map() {
        let event_loop = EventLoop::new().unwrap();
        let selection = MemorySelection::new();
        let reader = MemoryBackend::new(&selection);

        let received = event_loop.run_until(async {
            let (tx, rx) = tokio::sync::oneshot::channel();
            reader.request_clipboard_data(
                "image/png",
                Box::new(move |data| {
                    let _ = tx.send(data);
                }),
            );
            rx.await.unwrap()
        });
        assert!(received.is_empty());
    }

    #[test]
    fn stalled_backend_withholds_until_released() {
        let selection = MemorySelection::new();
        let backend = MemoryBackend::new(&selection);
        backend.set_stalled(true);

        let fired = Rc::new(Cell::new(0));
        let counter = Rc::clone(&fired);
        backend.get_available_mime_types(Box::new(move |_| counter.set(counter.get() + 1)));
        assert_eq!(backend.withheld_count(), 1);
        assert_eq!(fired.get(), 0);

        assert_eq!(backend.release_withheld(), 1);
        assert_eq!(fired.get(), 1);
        assert_eq!(backend.withheld_count(), 0);
    }

    #[test]
    fn clear_drops_owner_and_content() {
        let event_loop = EventLoop::new().unwrap();
        let selection = MemorySelection::new();
        let backend = MemoryBackend::new(&selection);
        event_loop.run_until(async {
            backend.offer_clipboard_data(text("x"), Box::new(|| {}));
        });
        selection.clear();
        assert!(!backend.is_selection_owner());
        assert!(selection.contents().is_empty());
    }
}
