//! Synchronous request bridge over an asynchronous clipboard backend.
//!
//! Client code wants blocking answers ("which MIME types are on the
//! clipboard?", "give me the bytes for text/plain"), the platform only
//! answers through callbacks, and sometimes never answers at all. The
//! [`SyncBridge`] turns one request into a bounded nested wait:
//!
//! 1. At most one [`RequestSlot`] is outstanding per bridge. A second
//!    request while one is pending is a caller bug and panics.
//! 2. Reads and enumerations are served straight from the offered-data
//!    cache while this process owns the selection.
//! 3. Otherwise the request is dispatched to the backend and the calling
//!    thread keeps driving its [`EventLoop`] until the callback completes
//!    the slot or a repeating abort check sees the deadline has passed.
//! 4. Callbacks hold only a `Weak` handle to the slot. Once the wait
//!    returns the slot is dropped, so late callbacks are discarded. A
//!    callback the backend drops unused ends the wait immediately.

pub mod event_loop;
pub mod slot;

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::{self, Instant};

use crate::backend::{ClipboardBackend, DataMap};

pub use event_loop::EventLoop;
pub use slot::{Reply, RequestId, RequestKind, RequestSlot};

/// Timing knobs for the nested wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeConfig {
    /// How long a request may stay outstanding before it is aborted.
    pub request_timeout: Duration,
    /// Period of the abort check while waiting.
    pub abort_poll_interval: Duration,
}

impl BridgeConfig {
    /// Shortest abort check period the bridge will arm.
    pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_millis(1000),
            abort_poll_interval: Duration::from_millis(100),
        }
    }
}

/// How a nested wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitEnd {
    Completed,
    TimedOut,
    CallbackDropped,
}

pub struct SyncBridge {
    event_loop: Rc<EventLoop>,
    config: BridgeConfig,
    backend: RefCell<Option<Rc<dyn ClipboardBackend>>>,
    /// What this process advertised last.
    offered: RefCell<DataMap>,
    in_flight: Cell<Option<RequestId>>,
    sequence_number: Cell<u64>,
}

impl SyncBridge {
    /// A zero `abort_poll_interval` is raised to
    /// [`BridgeConfig::MIN_POLL_INTERVAL`].
    pub fn new(event_loop: Rc<EventLoop>, mut config: BridgeConfig) -> Self {
        if config.abort_poll_interval < BridgeConfig::MIN_POLL_INTERVAL {
            tracing::warn!(
                requested = ?config.abort_poll_interval,
                "abort poll interval too short, using the minimum"
            );
            config.abort_poll_interval = BridgeConfig::MIN_POLL_INTERVAL;
        }
        Self {
            event_loop,
            config,
            backend: RefCell::new(None),
            offered: RefCell::new(DataMap::new()),
            in_flight: Cell::new(None),
            sequence_number: Cell::new(0),
        }
    }

    /// Attach or swap the backend.
    pub fn set_backend(&self, backend: Rc<dyn ClipboardBackend>) {
        assert!(
            self.is_idle(),
            "backend swapped while a clipboard request is in flight"
        );
        *self.backend.borrow_mut() = Some(backend);
    }

    pub fn has_backend(&self) -> bool {
        self.backend.borrow().is_some()
    }

    pub fn config(&self) -> BridgeConfig {
        self.config
    }

    /// No request is outstanding.
    pub fn is_idle(&self) -> bool {
        self.in_flight.get().is_none()
    }

    /// Number of offers dispatched so far.
    pub fn sequence_number(&self) -> u64 {
        self.sequence_number.get()
    }

    /// A copy of the data map this process advertised last.
    pub fn offered_data(&self) -> DataMap {
        self.offered.borrow().clone()
    }

    /// Run `kind` to completion, driving the event loop while waiting.
    ///
    /// Must be called from outside the event loop; tasks running on the
    /// loop use [`SyncBridge::execute_async`].
    pub fn execute(&self, kind: RequestKind) -> Reply {
        self.event_loop.run_until(self.execute_async(kind))
    }

    /// The request state machine as a future.
    ///
    /// # Panics
    ///
    /// If another request is outstanding on this bridge or no backend is
    /// attached.
    pub async fn execute_async(&self, kind: RequestKind) -> Reply {
        if let Some(pending) = self.in_flight.get() {
            panic!(
                "clipboard {} request issued while request {pending} is still in flight",
                kind.name()
            );
        }
        let backend = self.backend();

        // Ownership is queried on every call, never cached.
        if !matches!(kind, RequestKind::Offer { .. }) && backend.is_selection_owner() {
            return self.serve_from_cache(&kind);
        }

        let is_offer = matches!(kind, RequestKind::Offer { .. });
        let deadline = Instant::now() + self.config.request_timeout;
        let (slot, completion) = RequestSlot::new(kind, deadline);
        let slot = Rc::new(slot);

        self.in_flight.set(Some(slot.id()));
        let _idle = InFlightGuard(&self.in_flight);

        tracing::debug!(request = %slot.id(), kind = slot.kind().name(), "dispatching clipboard request");
        self.dispatch(backend.as_ref(), &slot);

        let (end, reply) = self.wait(&slot, completion).await;
        match end {
            WaitEnd::Completed => {
                tracing::debug!(request = %slot.id(), "clipboard request completed");
            }
            WaitEnd::TimedOut => {
                tracing::warn!(
                    request = %slot.id(),
                    kind = slot.kind().name(),
                    timeout_ms = self.config.request_timeout.as_millis() as u64,
                    "clipboard request timed out"
                );
            }
            WaitEnd::CallbackDropped => {
                tracing::warn!(
                    request = %slot.id(),
                    kind = slot.kind().name(),
                    "backend dropped the completion callback"
                );
            }
        }

        if is_offer {
            self.sequence_number.set(self.sequence_number.get() + 1);
        }
        reply
    }

    fn backend(&self) -> Rc<dyn ClipboardBackend> {
        self.backend
            .borrow()
            .clone()
            .unwrap_or_else(|| panic!("clipboard backend used before it was set"))
    }

    fn serve_from_cache(&self, kind: &RequestKind) -> Reply {
        let offered = self.offered.borrow();
        tracing::trace!(kind = kind.name(), "serving clipboard request from offered data");
        match kind {
            RequestKind::Read { mime_type } => {
                Reply::Read(offered.get(mime_type).cloned().unwrap_or_default())
            }
            RequestKind::Enumerate => Reply::Enumerate(offered.keys().cloned().collect()),
            RequestKind::Offer { .. } => unreachable!("offers never take the fast path"),
        }
    }

    fn dispatch(&self, backend: &dyn ClipboardBackend, slot: &Rc<RequestSlot>) {
        let completer = Completer::new(slot);
        match slot.kind() {
            RequestKind::Read { mime_type } => {
                backend.request_clipboard_data(
                    mime_type,
                    Box::new(move |data| {
                        if let Some(slot) = completer.into_slot() {
                            slot.complete_read(data);
                        }
                    }),
                );
            }
            RequestKind::Offer { data } => {
                // The cache is replaced wholesale, never patched.
                *self.offered.borrow_mut() = data.clone();
                backend.offer_clipboard_data(
                    data.clone(),
                    Box::new(move || {
                        if let Some(slot) = completer.into_slot() {
                            slot.complete(Reply::Offer { acknowledged: true });
                        }
                    }),
                );
            }
            RequestKind::Enumerate => {
                backend.get_available_mime_types(Box::new(move |types| {
                    if let Some(slot) = completer.into_slot() {
                        slot.complete(Reply::Enumerate(types));
                    }
                }));
            }
        }
    }

    /// Nested wait: yield to the event loop until the slot completes or
    /// the abort check finds the deadline has passed.
    async fn wait(
        &self,
        slot: &RequestSlot,
        mut completion: oneshot::Receiver<Reply>,
    ) -> (WaitEnd, Reply) {
        let period = self.config.abort_poll_interval;
        let mut abort_check = time::interval_at(Instant::now() + period, period);
        abort_check.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                reply = &mut completion => {
                    return match reply {
                        Ok(reply) => (WaitEnd::Completed, reply),
                        Err(_) => (WaitEnd::CallbackDropped, slot.kind().empty_reply()),
                    };
                }

                _ = abort_check.tick() => {
                    if !slot.is_completed() && slot.is_expired(Instant::now()) {
                        return (WaitEnd::TimedOut, slot.kind().empty_reply());
                    }
                }
            }
        }
    }
}

/// The slot handle carried by a backend callback.
///
/// Holds only a `Weak` reference, so callbacks arriving after the wait
/// has returned find nothing to complete. Dropped without being invoked,
/// it abandons the slot and the wait ends at once.
struct Completer {
    handle: Weak<RequestSlot>,
    id: RequestId,
    invoked: bool,
}

impl Completer {
    fn new(slot: &Rc<RequestSlot>) -> Self {
        Self {
            handle: Rc::downgrade(slot),
            id: slot.id(),
            invoked: false,
        }
    }

    fn into_slot(mut self) -> Option<Rc<RequestSlot>> {
        self.invoked = true;
        let slot = self.handle.upgrade();
        if slot.is_none() {
            tracing::debug!(request = %self.id, "discarding callback for retired clipboard request");
        }
        slot
    }
}

impl Drop for Completer {
    fn drop(&mut self) {
        if self.invoked {
            return;
        }
        if let Some(slot) = self.handle.upgrade() {
            slot.abandon();
        }
    }
}

struct InFlightGuard<'a>(&'a Cell<Option<RequestId>>);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.set(None);
    }
}
