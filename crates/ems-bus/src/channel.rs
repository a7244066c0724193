//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Value and channel bus shared by components and calculators."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{ReentrantMutex, RwLock};
use tracing::{debug, error, warn};

use crate::value::Value;

/// Outcome of a listener callback. Errors are logged by the channel and never
/// reach the publisher.
pub type ListenerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

type ListenerFn = dyn Fn(&Value) -> ListenerResult + Send + Sync;

struct ListenerSlot {
    id: u64,
    active: AtomicBool,
    callback: Box<ListenerFn>,
}

/// Named holder of the latest [`Value`] for one measurement or setpoint.
pub struct Channel {
    name: String,
    latest: RwLock<Value>,
    listeners: RwLock<Vec<Arc<ListenerSlot>>>,
    // Serialises store-and-notify so listeners observe writes in publish order.
    // Reentrant so a listener may publish or deregister on the same thread.
    delivery: ReentrantMutex<()>,
    next_listener: AtomicU64,
}

impl Channel {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            latest: RwLock::new(Value::unknown()),
            listeners: RwLock::new(Vec::new()),
            delivery: ReentrantMutex::new(()),
            next_listener: AtomicU64::new(1),
        }
    }

    /// Channel name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Latest value, or the unknown value when nothing was published yet.
    pub fn latest(&self) -> Value {
        self.latest.read().clone()
    }

    /// Store `value` as latest and notify every registered listener in order.
    pub fn publish(&self, value: Value) {
        let _delivery = self.delivery.lock();
        *self.latest.write() = value.clone();
        let listeners: Vec<Arc<ListenerSlot>> = self.listeners.read().clone();
        for slot in listeners {
            if !slot.active.load(Ordering::Acquire) {
                continue;
            }
            match catch_unwind(AssertUnwindSafe(|| (slot.callback)(&value))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(channel = %self.name, listener = slot.id, error = %err, "channel listener failed");
                }
                Err(_) => {
                    error!(channel = %self.name, listener = slot.id, "channel listener panicked");
                }
            }
        }
    }

    /// Register a listener invoked synchronously on every publish.
    pub fn subscribe<F>(self: &Arc<Self>, callback: F) -> ListenerHandle
    where
        F: Fn(&Value) -> ListenerResult + Send + Sync + 'static,
    {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        let slot = Arc::new(ListenerSlot {
            id,
            active: AtomicBool::new(true),
            callback: Box::new(callback),
        });
        self.listeners.write().push(slot);
        debug!(channel = %self.name, listener = id, "listener registered");
        ListenerHandle {
            channel: Arc::downgrade(self),
            channel_name: self.name.clone(),
            id,
            registered: AtomicBool::new(true),
        }
    }

    /// Number of currently registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    fn deregister(&self, id: u64) {
        // Waits for an in-flight delivery on another thread to finish.
        let _delivery = self.delivery.lock();
        let mut listeners = self.listeners.write();
        if let Some(position) = listeners.iter().position(|slot| slot.id == id) {
            let slot = listeners.remove(position);
            slot.active.store(false, Ordering::Release);
            debug!(channel = %self.name, listener = id, "listener deregistered");
        }
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("latest", &*self.latest.read())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Handle for a registered listener.
///
/// Dropping the handle leaves the listener registered; call
/// [`ListenerHandle::deregister`] to stop deliveries.
#[must_use = "dropping the handle does not deregister the listener"]
pub struct ListenerHandle {
    channel: Weak<Channel>,
    channel_name: String,
    id: u64,
    registered: AtomicBool,
}

impl ListenerHandle {
    /// Stop deliveries to this listener. Idempotent.
    ///
    /// Once this returns no new delivery to the listener starts.
    pub fn deregister(&self) {
        if !self.registered.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(channel) = self.channel.upgrade() {
            channel.deregister(self.id);
        }
    }

    /// Whether [`ListenerHandle::deregister`] has not been called yet.
    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    /// Name of the channel the listener is attached to.
    pub fn channel_name(&self) -> &str {
        &self.channel_name
    }
}

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("channel", &self.channel_name)
            .field("id", &self.id)
            .field("registered", &self.is_registered())
            .finish()
    }
}
