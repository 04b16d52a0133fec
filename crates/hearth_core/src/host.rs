//! The host context every plugin runs against.
//!
//! A [`Host`] owns the event and service directories and the run state. It
//! publishes its own events and services under the reserved `host`
//! namespace so plugins can react to the main loop and drive it.

use crate::error::{EventError, ServiceError};
use crate::events::{EventBus, EventHandle, ListenerFn};
use crate::gate::DispatchGate;
use crate::log::{dispatch_once, LogLevel};
use crate::services::{service_fn, Service, ServiceFn, ServiceRegistry};
use crate::types::{ArgumentList, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use tracing::{info, warn};
use uuid::Uuid;

/// Namespace of the built-in events and services.
pub const HOST_NAMESPACE: &str = "host";

pub const START_EVENT: &str = "host.start";
pub const PAUSE_EVENT: &str = "host.pause";
pub const EXIT_EVENT: &str = "host.exit";
pub const TICK_EVENT: &str = "host.tick";
/// Fired for every log line with `(uint8 level, char* plugin, char* message)`
pub const LOG_EVENT: &str = "host.log";

/// Unique identifier for a host instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostId(pub Uuid);

impl HostId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for HostId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Run state driven by the main loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HostState {
    Paused,
    Running,
    Terminated,
}

/// The operations a plugin may perform on its host.
///
/// Plugins only ever hold a `dyn HostContext` built by the host, so every
/// call lands in the host's own code. A plugin module links its own copy of
/// this crate; calling inherent [`Host`] methods from there would run that
/// copy, whose logging has no subscriber installed.
pub trait HostContext: Send + Sync {
    fn host_name(&self) -> &str;

    fn host_state(&self) -> HostState;

    /// Logs a line on behalf of `plugin` and forwards it to `host.log`.
    ///
    /// # Arguments
    ///
    /// * `level` - Severity of the line
    /// * `plugin` - Name of the plugin logging it
    /// * `message` - The line itself
    fn log(&self, level: LogLevel, plugin: &str, message: &str);

    fn create_event(&self, owner: &str, local: &str, signature: &[&str]) -> Result<EventHandle, EventError>;

    fn destroy_event(&self, owner: &str, local: &str) -> Result<(), EventError>;

    /// Fires `event`, returning how many listeners ran.
    fn fire(&self, event: &str, args: &ArgumentList) -> Result<usize, EventError>;

    fn register_listener(
        &self,
        subscriber: &str,
        event: &str,
        signature: &[&str],
        callback: ListenerFn,
    ) -> Result<(), EventError>;

    fn unregister_listener(&self, subscriber: &str, event: &str, callback: &ListenerFn) -> Result<(), EventError>;

    fn create_service(
        &self,
        owner: &str,
        local: &str,
        ret: &str,
        argv: &[&str],
        callable: ServiceFn,
    ) -> Result<Arc<Service>, ServiceError>;

    fn destroy_service(&self, owner: &str, local: &str) -> Result<(), ServiceError>;

    /// Looks up `name` and checks it against the caller's expected signature.
    fn get_service(&self, name: &str, ret: &str, argv: &[&str]) -> Result<Arc<Service>, ServiceError>;

    /// Calls `service` with host-side validation and dispatch accounting.
    fn call_service(&self, service: &Service, args: &ArgumentList) -> Result<Value, ServiceError>;
}

/// Owns the directories shared by all plugins loaded into it.
pub struct Host {
    id: HostId,
    name: String,
    state: Mutex<HostState>,
    events: Arc<EventBus>,
    services: ServiceRegistry,
}

impl Host {
    /// Creates a host in the `Paused` state with the built-in events and services registered.
    pub fn new(name: impl Into<String>) -> Arc<Host> {
        let events = Arc::new(EventBus::new());
        let host = Arc::new_cyclic(|weak: &Weak<Host>| {
            register_builtin_events(&events);
            let services = ServiceRegistry::with_event_bus(events.clone());
            register_builtin_services(&services, weak);
            Host {
                id: HostId::new(),
                name: name.into(),
                state: Mutex::new(HostState::Paused),
                events,
                services,
            }
        });
        info!(host = %host.name, id = %host.id, "Host created");
        host
    }

    pub fn id(&self) -> HostId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    /// Gate shared by the event bus and the service registry.
    pub fn gate(&self) -> &Arc<DispatchGate> {
        self.events.gate()
    }

    pub fn state(&self) -> HostState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn transition(&self, next: HostState, event: &str) {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if *state == next || *state == HostState::Terminated {
                return;
            }
            *state = next;
        }
        info!(host = %self.name, state = ?next, "Host state changed");
        self.fire_builtin(event, &ArgumentList::new());
    }

    pub fn start(&self) {
        self.transition(HostState::Running, START_EVENT);
    }

    pub fn pause(&self) {
        self.transition(HostState::Paused, PAUSE_EVENT);
    }

    /// Moves to `Terminated`. The state is final.
    pub fn exit(&self) {
        self.transition(HostState::Terminated, EXIT_EVENT);
    }

    /// Fires `host.tick` if the host is running.
    pub fn tick(&self) {
        if self.state() == HostState::Running {
            self.fire_builtin(TICK_EVENT, &ArgumentList::new());
        }
    }

    /// Emits a log line for `plugin` and forwards it to `host.log` listeners.
    pub fn log(&self, level: LogLevel, plugin: &str, message: &str) {
        level.emit(plugin, message);
        dispatch_once(|| {
            let args = ArgumentList::new()
                .with(level.as_u8())
                .with(plugin)
                .with(message);
            self.fire_builtin(LOG_EVENT, &args);
        });
    }

    fn fire_builtin(&self, event: &str, args: &ArgumentList) {
        if let Err(e) = self.events.fire(event, args) {
            warn!(event, "Failed to fire built-in event: {}", e);
        }
    }
}

impl HostContext for Host {
    fn host_name(&self) -> &str {
        &self.name
    }

    fn host_state(&self) -> HostState {
        self.state()
    }

    fn log(&self, level: LogLevel, plugin: &str, message: &str) {
        Host::log(self, level, plugin, message);
    }

    fn create_event(&self, owner: &str, local: &str, signature: &[&str]) -> Result<EventHandle, EventError> {
        self.events.create(owner, local, signature)
    }

    fn destroy_event(&self, owner: &str, local: &str) -> Result<(), EventError> {
        self.events.destroy_plugin_event(owner, local)
    }

    fn fire(&self, event: &str, args: &ArgumentList) -> Result<usize, EventError> {
        self.events.fire(event, args)
    }

    fn register_listener(
        &self,
        subscriber: &str,
        event: &str,
        signature: &[&str],
        callback: ListenerFn,
    ) -> Result<(), EventError> {
        self.events.register_listener(subscriber, event, signature, callback)
    }

    fn unregister_listener(&self, subscriber: &str, event: &str, callback: &ListenerFn) -> Result<(), EventError> {
        self.events.unregister_listener(subscriber, event, callback)
    }

    fn create_service(
        &self,
        owner: &str,
        local: &str,
        ret: &str,
        argv: &[&str],
        callable: ServiceFn,
    ) -> Result<Arc<Service>, ServiceError> {
        self.services.create(owner, local, ret, argv, callable)
    }

    fn destroy_service(&self, owner: &str, local: &str) -> Result<(), ServiceError> {
        self.services.destroy_plugin_service(owner, local)
    }

    fn get_service(&self, name: &str, ret: &str, argv: &[&str]) -> Result<Arc<Service>, ServiceError> {
        self.services.get_checked(name, ret, argv)
    }

    fn call_service(&self, service: &Service, args: &ArgumentList) -> Result<Value, ServiceError> {
        service.call(args)
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

fn register_builtin_events(events: &EventBus) {
    let builtins: [(&str, &[&str]); 7] = [
        ("start", &[]),
        ("pause", &[]),
        ("exit", &[]),
        ("tick", &[]),
        ("log", &["uint8", "char*", "char*"]),
        ("service_created", &["char*"]),
        ("service_destroyed", &["char*"]),
    ];
    for (local, signature) in builtins {
        if let Err(e) = events.create(HOST_NAMESPACE, local, signature) {
            warn!(event = local, "Failed to register built-in event: {}", e);
        }
    }
}

fn register_builtin_services(services: &ServiceRegistry, host: &Weak<Host>) {
    let transitions: [(&str, fn(&Host)); 3] = [
        ("start", Host::start),
        ("pause", Host::pause),
        ("exit", Host::exit),
    ];
    for (local, transition) in transitions {
        let host = host.clone();
        let callable = service_fn(move |_| {
            if let Some(host) = host.upgrade() {
                transition(&host);
            }
            Value::None
        });
        if let Err(e) = services.create(HOST_NAMESPACE, local, "void", &[], callable) {
            warn!(service = local, "Failed to register built-in service: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::listener;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_builtins_registered() {
        let host = Host::new("test");
        for event in [START_EVENT, PAUSE_EVENT, EXIT_EVENT, TICK_EVENT, LOG_EVENT] {
            assert!(host.events().contains(event), "{event} missing");
        }
        assert!(host.events().contains("host.service_created"));
        assert!(host.events().contains("host.service_destroyed"));
        assert_eq!(
            host.services().service_names(),
            vec!["host.exit", "host.pause", "host.start"]
        );
        assert_eq!(host.state(), HostState::Paused);
    }

    #[test]
    fn test_state_services() {
        let host = Host::new("test");
        let start = host.services().get_checked("host.start", "void", &[]).unwrap();
        let exit = host.services().get("host.exit").unwrap();

        start.call(&ArgumentList::new()).unwrap();
        assert_eq!(host.state(), HostState::Running);

        exit.call(&ArgumentList::new()).unwrap();
        assert_eq!(host.state(), HostState::Terminated);

        // Terminated is final
        host.start();
        assert_eq!(host.state(), HostState::Terminated);
    }

    #[test]
    fn test_tick_only_while_running() {
        let host = Host::new("test");
        let ticks = Arc::new(AtomicUsize::new(0));
        let t = ticks.clone();
        host.events()
            .register_listener("counter", TICK_EVENT, &[], listener(move |_, _| {
                t.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        host.tick();
        host.start();
        host.tick();
        host.tick();
        host.pause();
        host.tick();
        assert_eq!(ticks.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_log_event_is_not_reentrant() {
        let host = Host::new("test");
        let seen = Arc::new(AtomicUsize::new(0));

        let weak = Arc::downgrade(&host);
        let s = seen.clone();
        host.events()
            .register_listener(
                "echo",
                LOG_EVENT,
                &["uint8", "char*", "char*"],
                listener(move |_, args| {
                    assert!(matches!(args[0], Value::UInt8(2)));
                    s.fetch_add(1, Ordering::SeqCst);
                    if let Some(host) = weak.upgrade() {
                        host.log(LogLevel::Info, "echo", "logged from a log listener");
                    }
                }),
            )
            .unwrap();

        host.log(LogLevel::Error, "tester", "something failed");
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_hosts_are_independent() {
        let a = Host::new("a");
        let b = Host::new("b");
        a.events().create("plugin", "only_in_a", &[]).unwrap();
        assert!(!b.events().contains("plugin.only_in_a"));
        assert_ne!(a.id(), b.id());
    }
}
