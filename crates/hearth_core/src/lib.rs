//! Core of the hearth plugin host.
//!
//! This crate holds everything plugins and the host share:
//!
//! - [`Host`]: the context owning the event and service directories
//! - [`EventBus`]: namespaced publish/subscribe with checked argument types
//! - [`ServiceRegistry`]: named callables validated by a runtime signature
//! - [`Plugin`], [`PluginContext`] and [`export_plugin!`]: the plugin contract
//! - [`DispatchGate`]: waits out calls into a plugin before it is unloaded
//! - [`VersionTriple`] and [`VersionCriteria`]: plugin version matching
//!
//! Plugins only depend on this crate. Loading modules from disk lives in
//! `plugin_system`.

pub mod directory;
pub mod error;
pub mod events;
pub mod gate;
pub mod host;
pub mod log;
pub mod plugin;
pub mod services;
pub mod types;
pub mod version;

pub use error::{
    DirectoryError, ErrorCategory, EventError, ModuleError, PluginError, ServiceError,
};
pub use events::{listener, EventBus, EventHandle, EventInfo, ListenerFn};
pub use gate::{DispatchGate, DispatchPass};
pub use host::{Host, HostContext, HostId, HostState};
pub use log::LogLevel;
pub use plugin::{Plugin, PluginContext, PluginDescriptor, PluginLanguage, WeakPluginContext};
pub use services::{service_fn, Service, ServiceFn, ServiceRegistry, ServiceSignature};
pub use types::{ArgumentList, TypeKind, TypeMismatch, TypeSpec, Value};
pub use version::{parse_version, VersionCriteria, VersionTriple};
