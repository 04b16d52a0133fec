//! Plugin discovery, versioned loading and lifecycle management.
//!
//! The [`PluginManager`] finds a plugin file matching a requested name and
//! version, opens it through a [`ModuleLoader`], runs the plugin's entry
//! points and keeps the plugin registered under its name. Unloading waits
//! for calls already running inside the plugin, then purges every event,
//! service and listener the plugin owns before its module is closed.

pub mod discovery;
pub mod module_loader;

pub use discovery::{discover, parse_plugin_file_name, select_candidate, PluginCandidate};
pub use module_loader::{DylibLoader, EntryPoints, Module, ModuleLoader, StaticModuleLoader};

use hearth_core::error::panic_message;
use hearth_core::host::HOST_NAMESPACE;
use hearth_core::{
    directory, Host, PluginContext, PluginDescriptor, PluginError, PluginLanguage, VersionCriteria,
    VersionTriple,
};
use serde::Serialize;
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::SystemTime;
use tracing::{debug, error, info, warn};

// ============================================================================
// Plugin Manager
// ============================================================================

/// Owns the loaded plugins of one host.
///
/// The manager is shared between threads by reference. Loads and unloads of
/// the same name are serialized: a second attempt while one is in progress
/// fails with [`PluginError::Busy`].
///
/// # Example
///
/// ```no_run
/// use hearth_core::{Host, VersionCriteria, VersionTriple};
/// use plugin_system::PluginManager;
///
/// let host = Host::new("main");
/// let manager = PluginManager::with_dylib_loader(host.clone(), vec!["./plugins".into()]);
///
/// manager.load("greeter", VersionTriple::new(0, 1, 0), VersionCriteria::Minimum)?;
/// manager.start("greeter")?;
/// host.start();
/// manager.unload("greeter")?;
/// # Ok::<(), hearth_core::PluginError>(())
/// ```
pub struct PluginManager {
    host: Arc<Host>,
    loader: Arc<dyn ModuleLoader>,
    search_paths: Vec<PathBuf>,
    /// Loaded plugins in load order
    plugins: RwLock<Vec<LoadedPlugin>>,
    /// Names with a load or unload in progress
    busy: Mutex<HashSet<String>>,
}

/// Marks a plugin name busy until dropped.
struct Reservation<'a> {
    busy: &'a Mutex<HashSet<String>>,
    name: String,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.busy
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.name);
    }
}

/// A plugin whose init entry point succeeded
struct LoadedPlugin {
    descriptor: PluginDescriptor,
    path: PathBuf,
    context: PluginContext,
    entry_points: EntryPoints,
    module: Box<dyn Module>,
    started: bool,
    loaded_at: SystemTime,
}

/// Public view of a loaded plugin.
#[derive(Debug, Clone, Serialize)]
pub struct PluginInfo {
    pub name: String,
    pub version: VersionTriple,
    pub category: String,
    pub author: String,
    pub description: String,
    pub website: String,
    pub language: PluginLanguage,
    pub path: PathBuf,
    pub started: bool,
    pub loaded_at: SystemTime,
}

/// One entry of a bulk load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginRequest {
    pub name: String,
    pub version: VersionTriple,
    pub criteria: VersionCriteria,
}

impl PluginRequest {
    pub fn new(name: impl Into<String>, version: VersionTriple, criteria: VersionCriteria) -> Self {
        Self {
            name: name.into(),
            version,
            criteria,
        }
    }
}

/// Outcome of [`PluginManager::load_all`].
#[derive(Debug, Default)]
pub struct LoadSummary {
    /// Plugins loaded and started, in request order
    pub loaded: Vec<String>,
    pub failed: Vec<(String, PluginError)>,
}

impl LoadSummary {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

impl PluginManager {
    /// Creates a manager for `host`.
    ///
    /// # Arguments
    ///
    /// * `host` - Host whose directories the plugins register into
    /// * `search_paths` - Directories scanned for plugin files, in priority order
    /// * `loader` - Opens plugin files; [`DylibLoader`] for shared libraries
    pub fn new(host: Arc<Host>, search_paths: Vec<PathBuf>, loader: Arc<dyn ModuleLoader>) -> Self {
        Self {
            host,
            loader,
            search_paths,
            plugins: RwLock::new(Vec::new()),
            busy: Mutex::new(HashSet::new()),
        }
    }

    /// A manager loading shared libraries from disk.
    ///
    /// Plugin files must be named `plugin_<name>-<major>-<minor>-<patch>`
    /// with the platform's library extension.
    pub fn with_dylib_loader(host: Arc<Host>, search_paths: Vec<PathBuf>) -> Self {
        Self::new(host, search_paths, Arc::new(DylibLoader))
    }

    pub fn host(&self) -> &Arc<Host> {
        &self.host
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<LoadedPlugin>> {
        self.plugins.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<LoadedPlugin>> {
        self.plugins.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Lists every plugin file in the search paths.
    pub fn discover(&self) -> Vec<PluginCandidate> {
        discover(&self.search_paths, self.loader.file_extension())
    }

    fn reserve(&self, name: &str) -> Result<Reservation<'_>, PluginError> {
        let mut busy = self.busy.lock().unwrap_or_else(|e| e.into_inner());
        if !busy.insert(name.to_string()) {
            warn!("Plugin {} is being loaded or unloaded", name);
            return Err(PluginError::Busy(name.to_string()));
        }
        Ok(Reservation {
            busy: &self.busy,
            name: name.to_string(),
        })
    }

    /// Finds the file to load for a request.
    ///
    /// # Returns
    ///
    /// The highest version accepted by `criteria`; on a tie the candidate
    /// from the earliest search path.
    pub fn find_plugin(
        &self,
        name: &str,
        version: VersionTriple,
        criteria: VersionCriteria,
    ) -> Result<PluginCandidate, PluginError> {
        let candidates = self.discover();
        select_candidate(&candidates, name, version, criteria)
            .cloned()
            .ok_or_else(|| PluginError::NoMatchingFile {
                name: name.to_string(),
                version,
                criteria,
            })
    }

    /// Loads and initializes a plugin. The plugin is not started.
    ///
    /// A failed attempt releases everything it acquired, in reverse order,
    /// and leaves no registrations behind.
    ///
    /// # Arguments
    ///
    /// * `name` - Plugin name, a single directory segment other than `host`
    /// * `version` - Version the request is compared against
    /// * `criteria` - `Exact` needs an equal version, `Minimum` accepts any
    ///   version at least as high
    ///
    /// # Returns
    ///
    /// `Ok(())` once the plugin's init entry point succeeded and its
    /// descriptor matched the file. [`PluginError::AlreadyLoaded`] and
    /// [`PluginError::Busy`] leave the plugin already present untouched.
    pub fn load(&self, name: &str, version: VersionTriple, criteria: VersionCriteria) -> Result<(), PluginError> {
        validate_plugin_name(name)?;
        let _reservation = self.reserve(name)?;
        if self.is_loaded(name) {
            warn!("Plugin {} is already loaded", name);
            return Err(PluginError::AlreadyLoaded(name.to_string()));
        }

        let candidate = self.find_plugin(name, version, criteria)?;
        info!(
            "Loading plugin {} v{} from {}",
            name,
            candidate.version,
            candidate.path.display()
        );

        let module = self.loader.open(&candidate.path)?;
        let entry_points = match module.entry_points() {
            Ok(entry_points) => entry_points,
            Err(e) => {
                close_module(module);
                return Err(e.into());
            }
        };

        let context = PluginContext::new(self.host.clone(), name);
        let descriptor = match guarded(name, "init", || (entry_points.init)(&context)) {
            Ok(Some(descriptor)) => descriptor,
            Ok(None) => {
                self.teardown(name, &context, entry_points, module, false);
                return Err(PluginError::InitializationFailed(name.to_string()));
            }
            Err(e) => {
                self.teardown(name, &context, entry_points, module, false);
                return Err(e);
            }
        };

        if let Err(e) = verify_descriptor(name, &candidate, &descriptor) {
            error!("Rejecting plugin {}: {}", name, e);
            self.teardown(name, &context, entry_points, module, true);
            return Err(e);
        }

        let loaded = LoadedPlugin {
            descriptor,
            path: candidate.path,
            context,
            entry_points,
            module,
            started: false,
            loaded_at: SystemTime::now(),
        };

        self.write().push(loaded);

        info!("Plugin {} v{} loaded", name, candidate.version);
        Ok(())
    }

    /// Runs the start entry point of a loaded plugin.
    ///
    /// A plugin whose start fails stays loaded but not started, and its stop
    /// entry point will not run on unload.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the plugin is started, including when it already was.
    /// [`PluginError::StartFailed`] if the entry point returned false.
    pub fn start(&self, name: &str) -> Result<(), PluginError> {
        let mut plugins = self.write();
        let plugin = plugins
            .iter_mut()
            .find(|p| p.descriptor.name == name)
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;

        if plugin.started {
            debug!("Plugin {} already started", name);
            return Ok(());
        }

        let started = guarded(name, "start", || (plugin.entry_points.start)(&plugin.context))?;
        if !started {
            error!("Plugin {} failed to start", name);
            return Err(PluginError::StartFailed(name.to_string()));
        }

        plugin.started = true;
        info!("Plugin {} started", name);
        Ok(())
    }

    /// Starts every loaded plugin that has not been started, in load order.
    pub fn start_all(&self) -> Vec<(String, PluginError)> {
        self.loaded_plugins()
            .into_iter()
            .filter_map(|name| self.start(&name).err().map(|e| (name, e)))
            .collect()
    }

    /// Loads every request, then starts every plugin that loaded.
    ///
    /// A plugin that fails to start is unloaded again. Failures are collected
    /// and do not stop the remaining requests.
    ///
    /// # Arguments
    ///
    /// * `requests` - Plugins to load, in load order
    ///
    /// # Returns
    ///
    /// The names that are now running and the errors of those that are not.
    pub fn load_all(&self, requests: &[PluginRequest]) -> LoadSummary {
        let mut summary = LoadSummary::default();

        info!("Loading {} plugins", requests.len());
        let mut loaded = Vec::new();
        for request in requests {
            match self.load(&request.name, request.version, request.criteria) {
                Ok(()) => loaded.push(request.name.clone()),
                Err(e) => {
                    error!("Failed to load plugin {}: {}", request.name, e);
                    summary.failed.push((request.name.clone(), e));
                }
            }
        }

        for name in loaded {
            match self.start(&name) {
                Ok(()) => summary.loaded.push(name),
                Err(e) => {
                    if let Err(unload_error) = self.unload(&name) {
                        warn!("Failed to unload plugin {}: {}", name, unload_error);
                    }
                    summary.failed.push((name, e));
                }
            }
        }

        if !summary.is_complete() {
            warn!("Failed to load {} plugins", summary.failed.len());
            for (name, error) in &summary.failed {
                warn!("  {}: {}", name, error);
            }
        }
        info!("{} plugins loaded and started", summary.loaded.len());
        summary
    }

    /// Stops and unloads a plugin.
    ///
    /// Listener and service calls already running inside the plugin finish
    /// first; new ones are refused. Stop runs only if start succeeded. The
    /// plugin's services, events and listener registrations are purged
    /// before deinit runs and the module is closed.
    ///
    /// # Returns
    ///
    /// [`PluginError::Busy`] when called from inside the plugin's own code,
    /// or while another load or unload of it is in progress.
    pub fn unload(&self, name: &str) -> Result<(), PluginError> {
        if self.host.gate().is_held_by_current_thread(name) {
            warn!("Plugin {} cannot be unloaded from its own callbacks", name);
            return Err(PluginError::Busy(name.to_string()));
        }
        let _reservation = self.reserve(name)?;

        let plugin = {
            let mut plugins = self.write();
            let index = plugins
                .iter()
                .position(|p| p.descriptor.name == name)
                .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
            plugins.remove(index)
        };

        info!("Unloading plugin: {}", name);
        self.host.gate().close(name);
        let LoadedPlugin {
            context,
            entry_points,
            module,
            started,
            ..
        } = plugin;

        if started {
            if let Err(e) = guarded(name, "stop", || (entry_points.stop)(&context)) {
                error!("Error stopping plugin {}: {}", name, e);
            }
        }

        self.teardown(name, &context, entry_points, module, true);
        info!("Plugin {} unloaded", name);
        Ok(())
    }

    /// Unloads every plugin in reverse load order.
    pub fn unload_all(&self) {
        let names = self.loaded_plugins();
        if names.is_empty() {
            return;
        }

        info!("Unloading {} plugins", names.len());
        for name in names.iter().rev() {
            if let Err(e) = self.unload(name) {
                error!("Error unloading plugin {}: {}", name, e);
            }
        }
        info!("All plugins unloaded");
    }

    /// Waits out calls into the plugin, purges registrations, runs deinit and
    /// closes the module.
    fn teardown(
        &self,
        name: &str,
        context: &PluginContext,
        entry_points: EntryPoints,
        module: Box<dyn Module>,
        run_deinit: bool,
    ) {
        let gate = self.host.gate();
        gate.close(name);

        let services = self.host.services().destroy_all_plugin_services(name);
        let events = self.host.events().destroy_all_plugin_events(name);
        let listeners = self.host.events().unregister_all_listeners_of_plugin(name);
        debug!(
            plugin = name,
            services, events, listeners, "Purged plugin registrations"
        );

        if run_deinit {
            if let Some(deinit) = &entry_points.deinit {
                if let Err(e) = guarded(name, "deinit", || deinit(context)) {
                    error!("Error deinitializing plugin {}: {}", name, e);
                }
            }
        }

        drop(entry_points);
        close_module(module);
        gate.reopen(name);
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.read().iter().any(|p| p.descriptor.name == name)
    }

    /// Names of loaded plugins in load order.
    pub fn loaded_plugins(&self) -> Vec<String> {
        self.read().iter().map(|p| p.descriptor.name.clone()).collect()
    }

    pub fn plugin_info(&self, name: &str) -> Option<PluginInfo> {
        self.read()
            .iter()
            .find(|p| p.descriptor.name == name)
            .map(LoadedPlugin::info)
    }

    pub fn plugin_infos(&self) -> Vec<PluginInfo> {
        self.read().iter().map(LoadedPlugin::info).collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

impl Drop for PluginManager {
    fn drop(&mut self) {
        self.unload_all();
    }
}

impl LoadedPlugin {
    fn info(&self) -> PluginInfo {
        let d = &self.descriptor;
        PluginInfo {
            name: d.name.clone(),
            version: d.version,
            category: d.category.clone(),
            author: d.author.clone(),
            description: d.description.clone(),
            website: d.website.clone(),
            language: d.language,
            path: self.path.clone(),
            started: self.started,
            loaded_at: self.loaded_at,
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn validate_plugin_name(name: &str) -> Result<(), PluginError> {
    if name == HOST_NAMESPACE || directory::validate_owner(name).is_err() {
        return Err(PluginError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn verify_descriptor(
    name: &str,
    candidate: &PluginCandidate,
    descriptor: &PluginDescriptor,
) -> Result<(), PluginError> {
    if descriptor.name != name {
        return Err(PluginError::NameMismatch {
            expected: name.to_string(),
            reported: descriptor.name.clone(),
        });
    }
    if descriptor.version != candidate.version {
        return Err(PluginError::VersionMismatch {
            name: name.to_string(),
            file: candidate.version,
            reported: descriptor.version,
        });
    }
    Ok(())
}

fn guarded<R>(name: &str, stage: &'static str, f: impl FnOnce() -> R) -> Result<R, PluginError> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|payload| PluginError::Panicked {
        name: name.to_string(),
        stage,
        message: panic_message(&*payload),
    })
}

fn close_module(module: Box<dyn Module>) {
    let path = module.path().to_path_buf();
    if let Err(e) = module.close() {
        warn!("Failed to close module {}: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plugin_name_validation() {
        assert!(validate_plugin_name("greeter").is_ok());
        assert!(validate_plugin_name("greeter_2").is_ok());
        for name in ["", "host", "a.b", "with-dash", "sp ace"] {
            assert!(
                matches!(validate_plugin_name(name), Err(PluginError::InvalidName(_))),
                "{name:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_manager_creation() {
        let manager = PluginManager::with_dylib_loader(Host::new("test"), vec![PathBuf::from("./test_plugins")]);
        assert!(manager.is_empty());
        assert!(manager.discover().is_empty());
        assert!(matches!(manager.unload("missing"), Err(PluginError::NotFound(_))));
    }

    #[test]
    fn test_missing_file_is_a_configuration_error() {
        let manager = PluginManager::with_dylib_loader(Host::new("test"), vec![PathBuf::from("./test_plugins")]);
        let err = manager
            .load("ghost", VersionTriple::new(1, 0, 0), VersionCriteria::Minimum)
            .unwrap_err();
        assert!(matches!(err, PluginError::NoMatchingFile { .. }));
        assert_eq!(err.category(), hearth_core::ErrorCategory::Configuration);
    }
}
