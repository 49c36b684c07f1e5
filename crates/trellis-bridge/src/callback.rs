//! The callback registry.
//!
//! Maps a [`CallbackKey`] to the script-side handle that should receive
//! deliveries for it. Each entry owns a delivery lane and a liveness flag
//! shared with everything queued on that lane, so a delivery queued before
//! the entry was replaced, unsubscribed or purged is dropped when its turn
//! comes.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tracing::{debug, trace, warn};
use trellis_core::{CallbackHandle, RequestId, Response};

use crate::executor::{AsyncInvocationExecutor, LaneId};
use crate::script::ScriptTarget;

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// Identifies one extension instance for its whole life.
///
/// Never reused, so keys left over from a disposed instance cannot reach a
/// newer one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(u64);

impl InstanceId {
    pub(crate) fn next() -> Self {
        Self(NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed))
    }

    /// The numeric value.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "inst-{}", self.0)
    }
}

/// Which registration under an (instance, action) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackSlot {
    /// The persistent event subscription.
    Subscription,
    /// Deferred deliveries of one request.
    Request(RequestId),
}

/// Registry key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallbackKey {
    instance: InstanceId,
    action: String,
    slot: CallbackSlot,
}

impl CallbackKey {
    /// The subscription key of `action` on `instance`.
    #[must_use]
    pub fn subscription(instance: InstanceId, action: impl Into<String>) -> Self {
        Self {
            instance,
            action: action.into(),
            slot: CallbackSlot::Subscription,
        }
    }

    /// The one-shot key of request `request`.
    #[must_use]
    pub fn request(instance: InstanceId, action: impl Into<String>, request: RequestId) -> Self {
        Self {
            instance,
            action: action.into(),
            slot: CallbackSlot::Request(request),
        }
    }

    /// Owning instance.
    #[must_use]
    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    /// Canonical action name.
    #[must_use]
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Which registration.
    #[must_use]
    pub fn slot(&self) -> CallbackSlot {
        self.slot
    }
}

impl fmt::Display for CallbackKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.slot {
            CallbackSlot::Subscription => write!(f, "{}/{}", self.instance, self.action),
            CallbackSlot::Request(id) => write!(f, "{}/{}#{}", self.instance, self.action, id),
        }
    }
}

/// When an entry removes itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Closing {
    /// Only on unsubscribe or purge. Deliveries are never terminal.
    Never,
    /// After the first delivery, which is always terminal.
    AfterFirst,
    /// After the first delivery the sender marks terminal.
    OnTerminal,
}

impl Closing {
    fn shape(self, response: Response) -> Response {
        match self {
            Self::Never => response.with_terminal(false),
            Self::AfterFirst => response.with_terminal(true),
            Self::OnTerminal => response,
        }
    }

    fn closes(self, response: &Response) -> bool {
        match self {
            Self::Never => false,
            Self::AfterFirst => true,
            Self::OnTerminal => response.is_terminal(),
        }
    }
}

struct Entry {
    handle: CallbackHandle,
    target: ScriptTarget,
    alive: Arc<AtomicBool>,
    lane: LaneId,
    closing: Closing,
}

/// Live callback registrations.
pub struct CallbackRegistry {
    entries: DashMap<CallbackKey, Entry>,
    executor: Arc<AsyncInvocationExecutor>,
}

impl CallbackRegistry {
    /// An empty registry delivering through `executor`.
    #[must_use]
    pub fn new(executor: Arc<AsyncInvocationExecutor>) -> Self {
        Self {
            entries: DashMap::new(),
            executor,
        }
    }

    /// Register `handle` for `key`, or unregister `key` if the handle is
    /// invalid.
    ///
    /// A valid handle replaces any earlier registration for the key;
    /// deliveries still queued for the old one are dropped. Subscription
    /// keys stay until removed; request keys close after one delivery.
    ///
    /// Returns whether the key is registered afterwards.
    pub fn put(&self, key: CallbackKey, handle: &CallbackHandle, target: &ScriptTarget) -> bool {
        let closing = match key.slot {
            CallbackSlot::Subscription => Closing::Never,
            CallbackSlot::Request(_) => Closing::AfterFirst,
        };
        self.put_closing(key, handle, target, closing)
    }

    pub(crate) fn put_closing(
        &self,
        key: CallbackKey,
        handle: &CallbackHandle,
        target: &ScriptTarget,
        closing: Closing,
    ) -> bool {
        if !handle.is_valid() {
            if self.remove(&key) {
                debug!(%key, "Callback unsubscribed");
            } else {
                trace!(%key, "Unsubscribe for unknown callback ignored");
            }
            return false;
        }

        let entry = Entry {
            handle: handle.clone(),
            target: target.clone(),
            alive: Arc::new(AtomicBool::new(true)),
            lane: LaneId::next(),
            closing,
        };
        trace!(%key, handle = %handle, lane = %entry.lane, "Callback registered");
        if let Some(previous) = self.entries.insert(key, entry) {
            self.retire(&previous);
        }
        true
    }

    /// Unregister `key`. Returns whether it was registered.
    pub fn remove(&self, key: &CallbackKey) -> bool {
        match self.entries.remove(key) {
            Some((_, entry)) => {
                self.retire(&entry);
                true
            },
            None => false,
        }
    }

    /// Stop accepting deliveries for `key` while letting the ones already
    /// queued drain. Returns whether it was registered.
    pub fn close(&self, key: &CallbackKey) -> bool {
        match self.entries.remove(key) {
            Some((_, entry)) => {
                self.executor.close_lane(entry.lane);
                true
            },
            None => false,
        }
    }

    /// Whether `key` is registered.
    #[must_use]
    pub fn contains(&self, key: &CallbackKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Queue `response` for the handle registered under `key`.
    ///
    /// Returns `false` and drops the response if nothing is registered.
    pub fn invoke(&self, key: &CallbackKey, response: Response) -> bool {
        let (handle, target, alive, lane, response, closes) = {
            let Some(entry) = self.entries.get(key) else {
                trace!(%key, "No callback registered, delivery dropped");
                return false;
            };
            let response = entry.closing.shape(response);
            let closes = entry.closing.closes(&response);
            (
                entry.handle.clone(),
                entry.target.clone(),
                Arc::clone(&entry.alive),
                entry.lane,
                response,
                closes,
            )
        };

        // A closing delivery must win the removal, so a one-shot key
        // delivers once even under concurrent invokes.
        if closes
            && self
                .entries
                .remove_if(key, |_, e| Arc::ptr_eq(&e.alive, &alive))
                .is_none()
        {
            trace!(%key, "Callback closed concurrently, delivery dropped");
            return false;
        }

        let ready = target.ready().clone();
        let flag = Arc::clone(&alive);
        let queued = self.executor.enqueue(
            lane,
            &ready,
            Box::new(move || {
                if flag.load(Ordering::Acquire) {
                    target.deliver(&handle, response);
                } else {
                    trace!(handle = %handle, "Callback gone, queued delivery dropped");
                }
            }),
        );
        // A replacement may have retired the lane while this delivery was
        // being queued on it.
        if closes || !alive.load(Ordering::Acquire) {
            self.executor.close_lane(lane);
        }
        if !queued {
            debug!(%key, "Executor refused delivery");
        }
        queued
    }

    /// Drop every registration of `instance`.
    ///
    /// Returns the number removed.
    pub fn purge_instance(&self, instance: InstanceId) -> usize {
        let keys: Vec<CallbackKey> = self
            .entries
            .iter()
            .filter(|e| e.key().instance == instance)
            .map(|e| e.key().clone())
            .collect();
        let purged = keys.into_iter().filter(|k| self.remove(k)).count();
        if purged > 0 {
            debug!(%instance, purged, "Purged callbacks");
        }
        purged
    }

    /// Deliver outside any registration, e.g. a late permission denial.
    pub fn deliver_direct(&self, target: &ScriptTarget, handle: &CallbackHandle, response: Response) {
        if !handle.is_valid() {
            trace!("No valid handle, direct delivery dropped");
            return;
        }
        let handle = handle.clone();
        let deliver_to = target.clone();
        if !self.executor.deliver_unordered(
            target.ready(),
            Box::new(move || deliver_to.deliver(&handle, response)),
        ) {
            warn!("Executor refused direct delivery");
        }
    }

    fn retire(&self, entry: &Entry) {
        entry.alive.store(false, Ordering::Release);
        self.executor.close_lane(entry.lane);
    }
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("entries", &self.entries.len())
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
enum SenderTarget {
    Detached,
    Bound {
        registry: Arc<CallbackRegistry>,
        key: CallbackKey,
    },
}

/// Closes a request key once the last sender for it is gone.
struct KeyOwner {
    registry: Arc<CallbackRegistry>,
    key: CallbackKey,
}

impl Drop for KeyOwner {
    fn drop(&mut self) {
        if self.registry.close(&self.key) {
            trace!(key = %self.key, "Last sender dropped, request callback closed");
        }
    }
}

/// What a feature uses to push deliveries to its caller.
///
/// SYNC and ASYNC calls get a detached sender, whose sends go nowhere.
/// A held sender buffers sends until released, which keeps deliveries of a
/// SYNC_CALLBACK call behind its synchronous return value.
#[derive(Clone)]
pub struct CallbackSender {
    target: SenderTarget,
    held: Arc<Mutex<Option<Vec<Response>>>>,
    _owner: Option<Arc<KeyOwner>>,
}

impl CallbackSender {
    /// A sender that drops everything.
    #[must_use]
    pub fn detached() -> Self {
        Self {
            target: SenderTarget::Detached,
            held: Arc::new(Mutex::new(None)),
            _owner: None,
        }
    }

    /// A sender delivering straight to `key`.
    #[must_use]
    pub fn bound(registry: Arc<CallbackRegistry>, key: CallbackKey) -> Self {
        Self {
            target: SenderTarget::Bound { registry, key },
            held: Arc::new(Mutex::new(None)),
            _owner: None,
        }
    }

    /// A sender that buffers until [`release`](Self::release).
    ///
    /// On a request key, dropping the last clone closes the key, so a call
    /// that sends nothing leaves no registration behind. Deliveries already
    /// queued still arrive.
    #[must_use]
    pub fn held(registry: Arc<CallbackRegistry>, key: CallbackKey) -> Self {
        let owner = matches!(key.slot, CallbackSlot::Request(_)).then(|| {
            Arc::new(KeyOwner {
                registry: Arc::clone(&registry),
                key: key.clone(),
            })
        });
        Self {
            target: SenderTarget::Bound { registry, key },
            held: Arc::new(Mutex::new(Some(Vec::new()))),
            _owner: owner,
        }
    }

    /// Send a delivery. Returns whether it was accepted.
    pub fn send(&self, response: Response) -> bool {
        let SenderTarget::Bound { registry, key } = &self.target else {
            trace!("Detached sender, delivery dropped");
            return false;
        };
        {
            let mut held = self.held.lock().unwrap_or_else(|e| {
                warn!("Callback sender lock poisoned, recovering");
                e.into_inner()
            });
            if let Some(buffer) = held.as_mut() {
                buffer.push(response);
                return true;
            }
        }
        registry.invoke(key, response)
    }

    /// Flush buffered deliveries in order and stop buffering.
    pub fn release(&self) {
        let buffered = self
            .held
            .lock()
            .unwrap_or_else(|e| {
                warn!("Callback sender lock poisoned, recovering");
                e.into_inner()
            })
            .take();
        let (Some(buffered), SenderTarget::Bound { registry, key }) = (buffered, &self.target)
        else {
            return;
        };
        for response in buffered {
            registry.invoke(key, response);
        }
    }

    /// Whether sends can still reach a receiver.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        match &self.target {
            SenderTarget::Detached => false,
            SenderTarget::Bound { registry, key } => registry.contains(key),
        }
    }

    /// The key deliveries go to, if bound.
    #[must_use]
    pub fn key(&self) -> Option<&CallbackKey> {
        match &self.target {
            SenderTarget::Detached => None,
            SenderTarget::Bound { key, .. } => Some(key),
        }
    }
}

impl fmt::Debug for CallbackSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackSender")
            .field("key", &self.key())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "callback_tests.rs"]
mod tests;
