//! The contract between the host and a plugin.
//!
//! Every plugin module exports four fixed entry points:
//!
//! - `plugin_init` returns a [`PluginDescriptor`] or null on failure. This
//!   is where a plugin creates its events and services.
//! - `plugin_start` runs once all plugins are loaded and returns whether the
//!   plugin is operational. Subscriptions to other plugins belong here.
//! - `plugin_stop` runs on unload, only if start succeeded.
//! - `plugin_deinit` (optional) runs last, after the host has purged the
//!   plugin's registrations.
//!
//! Each entry point receives a [`PluginContext`] scoped to the plugin's own
//! namespace. Rust plugins implement [`Plugin`] and call
//! [`export_plugin!`](crate::export_plugin) to generate the exports.

use crate::error::{panic_message, EventError, ServiceError};
use crate::events::{EventHandle, ListenerFn};
use crate::host::HostContext;
use crate::log::LogLevel;
use crate::services::{Service, ServiceFn};
use crate::types::{ArgumentList, Value};
use crate::version::VersionTriple;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

/// Symbol name of the init entry point.
pub const INIT_SYMBOL: &str = "plugin_init";
/// Symbol name of the start entry point.
pub const START_SYMBOL: &str = "plugin_start";
/// Symbol name of the stop entry point.
pub const STOP_SYMBOL: &str = "plugin_stop";
/// Symbol name of the optional deinit entry point.
pub const DEINIT_SYMBOL: &str = "plugin_deinit";

/// Language a plugin was written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginLanguage {
    C,
    Cpp,
    #[default]
    Rust,
    Python,
    Other,
}

/// Metadata a plugin reports about itself from its init entry point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub name: String,
    pub category: String,
    pub author: String,
    pub description: String,
    pub website: String,
    pub language: PluginLanguage,
    pub version: VersionTriple,
}

impl PluginDescriptor {
    pub fn new(name: impl Into<String>, version: VersionTriple) -> Self {
        Self {
            name: name.into(),
            category: String::new(),
            author: String::new(),
            description: String::new(),
            website: String::new(),
            language: PluginLanguage::default(),
            version,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_website(mut self, website: impl Into<String>) -> Self {
        self.website = website.into();
        self
    }

    pub fn with_language(mut self, language: PluginLanguage) -> Self {
        self.language = language;
        self
    }
}

/// The host as seen by one plugin.
///
/// Creation calls are placed in the plugin's own namespace and subscriptions
/// are recorded under its name, so the host can revoke all of them when the
/// plugin is unloaded. Every operation goes through the host's
/// [`HostContext`] vtable; plugins should log, fire and call services
/// through the context rather than through types from their own copy of
/// this crate.
#[derive(Clone)]
pub struct PluginContext {
    host: Arc<dyn HostContext>,
    plugin: String,
}

/// A [`PluginContext`] that does not keep the host alive.
#[derive(Clone)]
pub struct WeakPluginContext {
    host: Weak<dyn HostContext>,
    plugin: String,
}

impl PluginContext {
    pub fn new(host: Arc<dyn HostContext>, plugin: impl Into<String>) -> Self {
        Self {
            host,
            plugin: plugin.into(),
        }
    }

    pub fn host(&self) -> &dyn HostContext {
        &*self.host
    }

    pub fn plugin_name(&self) -> &str {
        &self.plugin
    }

    /// For callbacks stored in the host's directories, which must not own the host.
    pub fn downgrade(&self) -> WeakPluginContext {
        WeakPluginContext {
            host: Arc::downgrade(&self.host),
            plugin: self.plugin.clone(),
        }
    }

    /// Creates `<plugin>.<local>`.
    pub fn create_event(&self, local: &str, signature: &[&str]) -> Result<EventHandle, EventError> {
        self.host.create_event(&self.plugin, local, signature)
    }

    pub fn destroy_event(&self, local: &str) -> Result<(), EventError> {
        self.host.destroy_event(&self.plugin, local)
    }

    pub fn fire(&self, event: impl AsRef<str>, args: &ArgumentList) -> Result<usize, EventError> {
        self.host.fire(event.as_ref(), args)
    }

    /// Subscribes to any event by full name.
    pub fn listen(&self, event: &str, signature: &[&str], callback: ListenerFn) -> Result<(), EventError> {
        self.host.register_listener(&self.plugin, event, signature, callback)
    }

    pub fn unlisten(&self, event: &str, callback: &ListenerFn) -> Result<(), EventError> {
        self.host.unregister_listener(&self.plugin, event, callback)
    }

    /// Registers `<plugin>.<local>`.
    pub fn create_service(
        &self,
        local: &str,
        ret: &str,
        argv: &[&str],
        callable: ServiceFn,
    ) -> Result<Arc<Service>, ServiceError> {
        self.host.create_service(&self.plugin, local, ret, argv, callable)
    }

    pub fn destroy_service(&self, local: &str) -> Result<(), ServiceError> {
        self.host.destroy_service(&self.plugin, local)
    }

    /// Looks up a service by full name and checks it has the expected signature.
    pub fn service(&self, name: &str, ret: &str, argv: &[&str]) -> Result<Arc<Service>, ServiceError> {
        self.host.get_service(name, ret, argv)
    }

    /// Calls a service obtained from [`service`](Self::service).
    pub fn call(&self, service: &Service, args: &ArgumentList) -> Result<Value, ServiceError> {
        self.host.call_service(service, args)
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        self.host.log(level, &self.plugin, message);
    }
}

impl WeakPluginContext {
    /// `None` once the host is gone.
    pub fn upgrade(&self) -> Option<PluginContext> {
        self.host.upgrade().map(|host| PluginContext {
            host,
            plugin: self.plugin.clone(),
        })
    }
}

impl fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginContext")
            .field("host", &self.host.host_name())
            .field("plugin", &self.plugin)
            .finish()
    }
}

/// A plugin written in Rust.
pub trait Plugin: Send + Sized + 'static {
    /// Builds the plugin and registers its events and services.
    fn init(ctx: &PluginContext) -> Option<Self>;

    fn descriptor(&self) -> PluginDescriptor;

    fn start(&mut self, _ctx: &PluginContext) -> bool {
        true
    }

    fn stop(&mut self, _ctx: &PluginContext) {}

    fn deinit(self, _ctx: &PluginContext) {}
}

/// Runs one plugin stage, turning a panic into a logged `None`.
pub fn guard<R>(ctx: &PluginContext, stage: &str, f: impl FnOnce() -> R) -> Option<R> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(payload) => {
            ctx.log(
                LogLevel::Error,
                &format!("panicked during {stage}: {}", panic_message(&*payload)),
            );
            None
        }
    }
}

/// Generates the module entry points for a type implementing [`Plugin`].
///
/// The plugin instance lives in a static slot between `plugin_init` and
/// `plugin_deinit`. Panics are caught at the boundary and reported through
/// the host log; a panicking init or start is reported as a failure.
///
/// ```ignore
/// struct Greeter;
///
/// impl hearth_core::Plugin for Greeter {
///     fn init(ctx: &PluginContext) -> Option<Self> { Some(Greeter) }
///     fn descriptor(&self) -> PluginDescriptor {
///         PluginDescriptor::new("greeter", VersionTriple::new(0, 1, 0))
///     }
/// }
///
/// hearth_core::export_plugin!(Greeter);
/// ```
#[macro_export]
macro_rules! export_plugin {
    ($plugin_type:ty) => {
        static PLUGIN_INSTANCE: ::std::sync::Mutex<::std::option::Option<$plugin_type>> =
            ::std::sync::Mutex::new(::std::option::Option::None);

        fn plugin_slot(
        ) -> ::std::sync::MutexGuard<'static, ::std::option::Option<$plugin_type>> {
            PLUGIN_INSTANCE.lock().unwrap_or_else(|e| e.into_inner())
        }

        /// # Safety
        ///
        /// `ctx` must be null or point to a live `PluginContext`.
        #[no_mangle]
        #[allow(improper_ctypes_definitions)]
        pub unsafe extern "C" fn plugin_init(
            ctx: *const $crate::PluginContext,
        ) -> *mut $crate::PluginDescriptor {
            let Some(ctx) = ctx.as_ref() else {
                return ::std::ptr::null_mut();
            };
            let created = $crate::plugin::guard(ctx, "init", || {
                <$plugin_type as $crate::Plugin>::init(ctx)
            });
            match created.flatten() {
                Some(plugin) => {
                    let descriptor = $crate::Plugin::descriptor(&plugin);
                    *plugin_slot() = Some(plugin);
                    ::std::boxed::Box::into_raw(::std::boxed::Box::new(descriptor))
                }
                None => ::std::ptr::null_mut(),
            }
        }

        /// # Safety
        ///
        /// `ctx` must be null or point to a live `PluginContext`.
        #[no_mangle]
        #[allow(improper_ctypes_definitions)]
        pub unsafe extern "C" fn plugin_start(ctx: *const $crate::PluginContext) -> bool {
            let Some(ctx) = ctx.as_ref() else {
                return false;
            };
            let mut slot = plugin_slot();
            let Some(plugin) = slot.as_mut() else {
                return false;
            };
            $crate::plugin::guard(ctx, "start", || $crate::Plugin::start(plugin, ctx))
                .unwrap_or(false)
        }

        /// # Safety
        ///
        /// `ctx` must be null or point to a live `PluginContext`.
        #[no_mangle]
        #[allow(improper_ctypes_definitions)]
        pub unsafe extern "C" fn plugin_stop(ctx: *const $crate::PluginContext) {
            let Some(ctx) = ctx.as_ref() else {
                return;
            };
            if let Some(plugin) = plugin_slot().as_mut() {
                $crate::plugin::guard(ctx, "stop", || $crate::Plugin::stop(plugin, ctx));
            }
        }

        /// # Safety
        ///
        /// `ctx` must be null or point to a live `PluginContext`.
        #[no_mangle]
        #[allow(improper_ctypes_definitions)]
        pub unsafe extern "C" fn plugin_deinit(ctx: *const $crate::PluginContext) {
            let Some(ctx) = ctx.as_ref() else {
                return;
            };
            let plugin = plugin_slot().take();
            if let Some(plugin) = plugin {
                $crate::plugin::guard(ctx, "deinit", || $crate::Plugin::deinit(plugin, ctx));
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::listener;
    use crate::host::{Host, LOG_EVENT};
    use crate::services::service_fn;
    use std::sync::Mutex;

    #[test]
    fn test_context_scopes_names() {
        let host = Host::new("test");
        let ctx = PluginContext::new(host.clone(), "greeter");

        let event = ctx.create_event("greeted", &["char*"]).unwrap();
        assert_eq!(event.as_str(), "greeter.greeted");
        ctx.create_service("greet", "void", &[], service_fn(|_| Value::None))
            .unwrap();
        assert!(host.services().contains("greeter.greet"));

        let other = PluginContext::new(host.clone(), "logger");
        other
            .listen("greeter.greeted", &["char*"], listener(|_, _| {}))
            .unwrap();
        assert_eq!(host.events().subscriptions_of("logger"), vec!["greeter.greeted"]);

        assert!(other.service("greeter.greet", "void", &[]).is_ok());
        assert!(other.service("greeter.greet", "int32", &[]).is_err());
    }

    #[test]
    fn test_guard_catches_panics() {
        let ctx = PluginContext::new(Host::new("test"), "boom");
        assert_eq!(guard(&ctx, "start", || 5), Some(5));
        assert_eq!(guard(&ctx, "start", || -> i32 { panic!("nope") }), None);
    }

    #[test]
    fn test_descriptor_builder() {
        let descriptor = PluginDescriptor::new("greeter", VersionTriple::new(0, 1, 0))
            .with_category("demo")
            .with_author("hearth developers")
            .with_language(PluginLanguage::C);
        assert_eq!(descriptor.category, "demo");
        assert_eq!(descriptor.language, PluginLanguage::C);
        assert!(descriptor.website.is_empty());
    }

    #[test]
    fn test_context_routes_through_host() {
        let host = Host::new("test");
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = lines.clone();
        host.events()
            .register_listener(
                "watcher",
                LOG_EVENT,
                &["uint8", "char*", "char*"],
                listener(move |_, args| {
                    let plugin = args[1].as_str().unwrap_or_default();
                    let message = args[2].as_str().unwrap_or_default();
                    sink.lock().unwrap().push(format!("{plugin}: {message}"));
                }),
            )
            .unwrap();

        let ctx = PluginContext::new(host.clone(), "greeter");
        ctx.create_service("twice", "int32", &["int32"], service_fn(|args| {
            Value::Int32(args.get(0).and_then(Value::as_i64).unwrap_or(0) as i32 * 2)
        }))
        .unwrap();
        ctx.log(LogLevel::Info, "Greeter ready");

        let twice = ctx.service("greeter.twice", "int32", &["int32"]).unwrap();
        let result = ctx.call(&twice, &ArgumentList::new().with(21i32));
        assert!(matches!(result, Ok(Value::Int32(42))));
        assert_eq!(*lines.lock().unwrap(), vec!["greeter: Greeter ready"]);
        assert_eq!(ctx.host().host_name(), "test");
    }

    #[test]
    fn test_weak_context_does_not_keep_host() {
        let host = Host::new("test");
        let weak = PluginContext::new(host.clone(), "greeter").downgrade();
        assert_eq!(weak.upgrade().map(|ctx| ctx.plugin_name().to_string()).as_deref(), Some("greeter"));

        drop(host);
        assert!(weak.upgrade().is_none());
    }
}
