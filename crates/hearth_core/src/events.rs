//! Namespaced publish/subscribe with positional, type-checked arguments.
//!
//! Every event lives in the directory under `<owner>.<local>` and carries the
//! argument signature its creator declared. Listeners are kept in
//! registration order and each one is invoked in isolation: a panicking
//! listener is logged and the remaining listeners still run.

use crate::directory;
use crate::error::{panic_message, EventError};
use crate::gate::{DispatchGate, DispatchPass};
use crate::types::{check_arguments, check_signature, parse_types, ArgumentList, TypeKind, TypeSpec, Value};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error};

/// Callback invoked with the full event name and the fired arguments.
pub type ListenerFn = Arc<dyn Fn(&str, &[Value]) + Send + Sync>;

/// Wraps a closure as a [`ListenerFn`].
pub fn listener<F>(f: F) -> ListenerFn
where
    F: Fn(&str, &[Value]) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Full directory name of a created event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventHandle(String);

impl EventHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for EventHandle {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Clone)]
struct Listener {
    subscriber: String,
    callback: ListenerFn,
}

struct Event {
    owner: String,
    signature: Vec<TypeSpec>,
    listeners: Vec<Listener>,
}

/// Snapshot of an event's directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventInfo {
    pub name: String,
    pub owner: String,
    pub signature: Vec<String>,
    /// Subscriber names in dispatch order
    pub listeners: Vec<String>,
}

// One admitted listener invocation; the callback is released before the pass
struct Call {
    listener: Listener,
    _pass: DispatchPass,
}

/// Directory of events for one host.
#[derive(Default)]
pub struct EventBus {
    events: RwLock<HashMap<String, Event>>,
    gate: Arc<DispatchGate>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gate every listener invocation passes through.
    pub fn gate(&self) -> &Arc<DispatchGate> {
        &self.gate
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Event>> {
        self.events.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Event>> {
        self.events.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Creates `<owner>.<local>` with the given argument types.
    pub fn create(&self, owner: &str, local: &str, signature: &[&str]) -> Result<EventHandle, EventError> {
        let name = directory::full_name(owner, local)?;
        let signature = parse_types(signature);
        if let Some(spec) = signature.iter().find(|s| s.kind() == TypeKind::None) {
            return Err(EventError::UnsupportedType {
                event: name,
                type_str: spec.text().to_string(),
            });
        }

        let mut events = self.write();
        if events.contains_key(&name) {
            return Err(EventError::DuplicateName(name));
        }
        events.insert(
            name.clone(),
            Event {
                owner: owner.to_string(),
                signature,
                listeners: Vec::new(),
            },
        );
        drop(events);

        debug!(event = %name, "Event created");
        Ok(EventHandle(name))
    }

    /// Subscribes `callback` on behalf of `subscriber`.
    ///
    /// The listener's declared `signature` must match the event's exactly.
    /// A subscriber may register a given callback only once per event.
    pub fn register_listener(
        &self,
        subscriber: &str,
        event: &str,
        signature: &[&str],
        callback: ListenerFn,
    ) -> Result<(), EventError> {
        let requested = parse_types(signature);
        let mut events = self.write();
        let entry = events
            .get_mut(event)
            .ok_or_else(|| EventError::NotFound(event.to_string()))?;

        check_signature(&entry.signature, &requested).map_err(|mismatch| {
            EventError::SignatureMismatch {
                event: event.to_string(),
                mismatch,
            }
        })?;

        if entry
            .listeners
            .iter()
            .any(|l| l.subscriber == subscriber && Arc::ptr_eq(&l.callback, &callback))
        {
            return Err(EventError::DuplicateListener {
                event: event.to_string(),
                subscriber: subscriber.to_string(),
            });
        }

        entry.listeners.push(Listener {
            subscriber: subscriber.to_string(),
            callback,
        });
        debug!(event, subscriber, "Listener registered");
        Ok(())
    }

    /// Removes one `(subscriber, callback)` registration.
    pub fn unregister_listener(
        &self,
        subscriber: &str,
        event: &str,
        callback: &ListenerFn,
    ) -> Result<(), EventError> {
        let mut events = self.write();
        let entry = events
            .get_mut(event)
            .ok_or_else(|| EventError::NotFound(event.to_string()))?;

        let position = entry
            .listeners
            .iter()
            .position(|l| l.subscriber == subscriber && Arc::ptr_eq(&l.callback, callback))
            .ok_or_else(|| EventError::ListenerNotFound {
                event: event.to_string(),
                subscriber: subscriber.to_string(),
            })?;
        entry.listeners.remove(position);
        Ok(())
    }

    /// Removes every listener of `event`. Returns how many were removed.
    pub fn unregister_all_listeners(&self, event: &str) -> Result<usize, EventError> {
        let mut events = self.write();
        let entry = events
            .get_mut(event)
            .ok_or_else(|| EventError::NotFound(event.to_string()))?;
        let removed = entry.listeners.len();
        entry.listeners.clear();
        Ok(removed)
    }

    /// Removes every listener `subscriber` holds on any event.
    pub fn unregister_all_listeners_of_plugin(&self, subscriber: &str) -> usize {
        let mut events = self.write();
        let mut removed = 0;
        for entry in events.values_mut() {
            let before = entry.listeners.len();
            entry.listeners.retain(|l| l.subscriber != subscriber);
            removed += before - entry.listeners.len();
        }
        removed
    }

    /// Invokes every listener of `event` in registration order.
    ///
    /// The arguments are checked against the event's signature first; on a
    /// mismatch no listener runs. Listeners of a plugin that is being
    /// unloaded are skipped. Returns the number of listeners invoked.
    pub fn fire(&self, event: &str, args: &ArgumentList) -> Result<usize, EventError> {
        let calls: Vec<Call> = {
            let events = self.read();
            let entry = events
                .get(event)
                .ok_or_else(|| EventError::NotFound(event.to_string()))?;
            check_arguments(&entry.signature, args).map_err(|mismatch| {
                EventError::ArgumentMismatch {
                    event: event.to_string(),
                    mismatch,
                }
            })?;
            entry
                .listeners
                .iter()
                .filter_map(|l| {
                    self.gate.enter(&l.subscriber).map(|pass| Call {
                        listener: l.clone(),
                        _pass: pass,
                    })
                })
                .collect()
        };

        let invoked = calls.len();
        for call in calls {
            let listener = &call.listener;
            let result = catch_unwind(AssertUnwindSafe(|| {
                (listener.callback)(event, args.as_slice())
            }));
            if let Err(payload) = result {
                error!(
                    event,
                    subscriber = %listener.subscriber,
                    "Listener panicked: {}",
                    panic_message(&*payload)
                );
            }
        }

        Ok(invoked)
    }

    /// Removes `event` and all of its listeners.
    pub fn destroy(&self, event: &str) -> Result<(), EventError> {
        self.write()
            .remove(event)
            .map(|_| debug!(event, "Event destroyed"))
            .ok_or_else(|| EventError::NotFound(event.to_string()))
    }

    /// Removes `<owner>.<local>`.
    pub fn destroy_plugin_event(&self, owner: &str, local: &str) -> Result<(), EventError> {
        let name = directory::full_name(owner, local)?;
        self.destroy(&name)
    }

    /// Removes every event in the namespace of `owner`. Returns how many were removed.
    pub fn destroy_all_plugin_events(&self, owner: &str) -> usize {
        let mut events = self.write();
        let before = events.len();
        events.retain(|name, _| !directory::is_owned_by(name, owner));
        before - events.len()
    }

    pub fn contains(&self, event: &str) -> bool {
        self.read().contains_key(event)
    }

    pub fn listener_count(&self, event: &str) -> Option<usize> {
        self.read().get(event).map(|e| e.listeners.len())
    }

    pub fn event_info(&self, event: &str) -> Option<EventInfo> {
        self.read().get(event).map(|entry| EventInfo {
            name: event.to_string(),
            owner: entry.owner.clone(),
            signature: entry.signature.iter().map(|s| s.text().to_string()).collect(),
            listeners: entry.listeners.iter().map(|l| l.subscriber.clone()).collect(),
        })
    }

    /// Sorted names of all events.
    pub fn event_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Sorted names of events `subscriber` listens to.
    pub fn subscriptions_of(&self, subscriber: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .read()
            .iter()
            .filter(|(_, e)| e.listeners.iter().any(|l| l.subscriber == subscriber))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
