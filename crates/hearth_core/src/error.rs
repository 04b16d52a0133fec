//! Error types for every subsystem of the host core.
//!
//! Each error reports a coarse [`ErrorCategory`] so callers can decide how
//! loudly to react without matching on every variant.

use crate::types::TypeMismatch;
use crate::version::{VersionCriteria, VersionTriple};
use std::any::Any;
use std::path::PathBuf;

/// Broad classification shared by all core errors.
///
/// - **Configuration**: the request itself cannot be satisfied (duplicate
///   plugin, no matching file, malformed version).
/// - **Linkage**: a module could not be opened or a symbol was not found.
/// - **ContractViolation**: a plugin or caller broke a rule of the host
///   (bad names, duplicate registrations, mismatched signatures).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Configuration,
    Linkage,
    ContractViolation,
}

/// Errors raised while validating a dotted directory name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    #[error("Directory name is empty")]
    Empty,
    #[error("Directory name '{0}' contains an empty segment")]
    EmptySegment(String),
    #[error("Directory name '{name}' contains invalid character '{ch}'")]
    InvalidCharacter { name: String, ch: char },
}

/// Errors that can occur during event bus operations.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// The event name failed validation
    #[error("Invalid event name: {0}")]
    InvalidName(#[from] DirectoryError),
    /// An event with the same full name already exists
    #[error("Event already exists: {0}")]
    DuplicateName(String),
    /// No event is registered under this name
    #[error("Event not found: {0}")]
    NotFound(String),
    /// The subscriber already registered this callback on the event
    #[error("Plugin {subscriber} already listens to {event} with this callback")]
    DuplicateListener { event: String, subscriber: String },
    /// No matching listener to remove
    #[error("Plugin {subscriber} has no such listener on {event}")]
    ListenerNotFound { event: String, subscriber: String },
    /// A type in the declared signature is not a usable argument type
    #[error("Event {event} declares unsupported argument type '{type_str}'")]
    UnsupportedType { event: String, type_str: String },
    /// A listener declared a signature different from the event's
    #[error("Listener signature does not match event {event}: {mismatch}")]
    SignatureMismatch { event: String, mismatch: TypeMismatch },
    /// Fired arguments do not match the event's signature
    #[error("Arguments do not match event {event}: {mismatch}")]
    ArgumentMismatch { event: String, mismatch: TypeMismatch },
}

impl EventError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            EventError::NotFound(_) | EventError::ListenerNotFound { .. } => {
                ErrorCategory::Configuration
            }
            _ => ErrorCategory::ContractViolation,
        }
    }
}

/// Errors that can occur during service registry operations.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Invalid service name: {0}")]
    InvalidName(#[from] DirectoryError),
    #[error("Service already exists: {0}")]
    DuplicateName(String),
    #[error("Service not found: {0}")]
    NotFound(String),
    #[error("Service {service} declares unsupported type '{type_str}'")]
    UnsupportedType { service: String, type_str: String },
    /// The caller's expected signature differs from the registered one
    #[error("Type check failed for service {service}: {mismatch}")]
    TypeMismatch { service: String, mismatch: TypeMismatch },
    /// A textual argument could not be converted to its declared type
    #[error("Service {service}: argument {index} '{value}' is not a valid {type_str}")]
    ArgumentParse {
        service: String,
        index: usize,
        value: String,
        type_str: String,
    },
    /// The service was destroyed while a caller still held it
    #[error("Service {0} has been revoked")]
    Revoked(String),
    /// The callable panicked
    #[error("Service {service} panicked: {message}")]
    Panicked { service: String, message: String },
}

impl ServiceError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ServiceError::NotFound(_) | ServiceError::Revoked(_) => ErrorCategory::Configuration,
            _ => ErrorCategory::ContractViolation,
        }
    }
}

/// Errors reported by a module loader backend.
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    #[error("Module not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("Failed to load module {}: {reason}", .path.display())]
    LoadFailed { path: PathBuf, reason: String },
    #[error("Module {} is missing symbol {symbol}", .path.display())]
    SymbolMissing { path: PathBuf, symbol: String },
    #[error("Failed to close module {}: {reason}", .path.display())]
    CloseFailed { path: PathBuf, reason: String },
}

impl ModuleError {
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::Linkage
    }
}

/// Errors that can occur during plugin lifecycle management.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// A plugin with this name is already loaded
    #[error("Plugin {0} is already loaded")]
    AlreadyLoaded(String),
    /// The plugin name is not a valid single directory segment or is reserved
    #[error("Invalid plugin name '{0}'")]
    InvalidName(String),
    /// A version string could not be parsed
    #[error("Malformed version string '{0}'")]
    MalformedVersion(String),
    /// No file in the search paths satisfies the request
    #[error("No file found for plugin {name} matching {criteria} version {version}")]
    NoMatchingFile {
        name: String,
        version: VersionTriple,
        criteria: VersionCriteria,
    },
    /// Opening the module or resolving an entry point failed
    #[error(transparent)]
    Module(#[from] ModuleError),
    /// The init entry point returned no descriptor
    #[error("Plugin {0} failed to initialize")]
    InitializationFailed(String),
    /// The descriptor reports another name than the one requested
    #[error("Plugin file for {expected} reports name {reported}")]
    NameMismatch { expected: String, reported: String },
    /// The descriptor reports another version than the file name encodes
    #[error("Plugin {name} reports version {reported} but its file encodes {file}")]
    VersionMismatch {
        name: String,
        file: VersionTriple,
        reported: VersionTriple,
    },
    /// The start entry point reported failure
    #[error("Plugin {0} failed to start")]
    StartFailed(String),
    /// No loaded plugin has this name
    #[error("Plugin not found: {0}")]
    NotFound(String),
    /// Another load or unload of this plugin is in progress, or the caller
    /// is running inside the plugin it tried to unload
    #[error("Plugin {0} is busy")]
    Busy(String),
    /// An entry point panicked
    #[error("Plugin {name} panicked during {stage}: {message}")]
    Panicked {
        name: String,
        stage: &'static str,
        message: String,
    },
}

impl PluginError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            PluginError::AlreadyLoaded(_)
            | PluginError::InvalidName(_)
            | PluginError::MalformedVersion(_)
            | PluginError::NoMatchingFile { .. }
            | PluginError::NotFound(_)
            | PluginError::Busy(_) => ErrorCategory::Configuration,
            PluginError::Module(e) => e.category(),
            PluginError::InitializationFailed(_)
            | PluginError::NameMismatch { .. }
            | PluginError::VersionMismatch { .. }
            | PluginError::StartFailed(_)
            | PluginError::Panicked { .. } => ErrorCategory::ContractViolation,
        }
    }
}

/// Extracts a readable message from a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(
            PluginError::AlreadyLoaded("a".into()).category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            PluginError::Module(ModuleError::SymbolMissing {
                path: PathBuf::from("plugin_a-1-0-0.so"),
                symbol: "plugin_start".into(),
            })
            .category(),
            ErrorCategory::Linkage
        );
        assert_eq!(
            PluginError::VersionMismatch {
                name: "a".into(),
                file: VersionTriple::new(1, 0, 0),
                reported: VersionTriple::new(1, 0, 1),
            }
            .category(),
            ErrorCategory::ContractViolation
        );
        assert_eq!(
            EventError::DuplicateName("a.b".into()).category(),
            ErrorCategory::ContractViolation
        );
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*payload), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(&*payload), "bang");
        let payload: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(&*payload), "unknown panic payload");
    }
}
