//! Opening plugin modules and resolving their entry points.
//!
//! [`ModuleLoader`] is the only place that knows how a module gets into the
//! process. [`DylibLoader`] maps shared libraries with `libloading`, and it
//! is the only host code that needs `unsafe`. [`StaticModuleLoader`]
//! serves plugins compiled into the host binary through the same lifecycle.

use hearth_core::plugin::{DEINIT_SYMBOL, INIT_SYMBOL, START_SYMBOL, STOP_SYMBOL};
use hearth_core::{ModuleError, Plugin, PluginContext, PluginDescriptor};
use libloading::Library;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::debug;

type InitFn = unsafe extern "C" fn(*const PluginContext) -> *mut PluginDescriptor;
type StartFn = unsafe extern "C" fn(*const PluginContext) -> bool;
type StopFn = unsafe extern "C" fn(*const PluginContext);

/// The resolved entry points of a module.
///
/// These must be dropped before the module they came from is closed.
pub struct EntryPoints {
    pub init: Box<dyn Fn(&PluginContext) -> Option<PluginDescriptor> + Send + Sync>,
    pub start: Box<dyn Fn(&PluginContext) -> bool + Send + Sync>,
    pub stop: Box<dyn Fn(&PluginContext) + Send + Sync>,
    pub deinit: Option<Box<dyn Fn(&PluginContext) + Send + Sync>>,
}

impl EntryPoints {
    /// Entry points driving an in-process [`Plugin`] implementation.
    pub fn from_plugin<P: Plugin>() -> Self {
        let slot: Arc<Mutex<Option<P>>> = Arc::new(Mutex::new(None));

        let init_slot = slot.clone();
        let start_slot = slot.clone();
        let stop_slot = slot.clone();
        Self {
            init: Box::new(move |ctx: &PluginContext| {
                let plugin = P::init(ctx)?;
                let descriptor = plugin.descriptor();
                *lock_slot(&init_slot) = Some(plugin);
                Some(descriptor)
            }),
            start: Box::new(move |ctx: &PluginContext| {
                lock_slot(&start_slot)
                    .as_mut()
                    .is_some_and(|plugin| plugin.start(ctx))
            }),
            stop: Box::new(move |ctx: &PluginContext| {
                if let Some(plugin) = lock_slot(&stop_slot).as_mut() {
                    plugin.stop(ctx);
                }
            }),
            deinit: Some(Box::new(move |ctx: &PluginContext| {
                let plugin = lock_slot(&slot).take();
                if let Some(plugin) = plugin {
                    plugin.deinit(ctx);
                }
            })),
        }
    }
}

fn lock_slot<P>(slot: &Mutex<Option<P>>) -> MutexGuard<'_, Option<P>> {
    slot.lock().unwrap_or_else(|e| e.into_inner())
}

/// An opened module.
pub trait Module: Send + Sync {
    fn path(&self) -> &Path;

    /// Resolves the fixed entry point symbols. Init, start and stop are required.
    fn entry_points(&self) -> Result<EntryPoints, ModuleError>;

    /// Releases the module. Entry points obtained from it must already be dropped.
    fn close(self: Box<Self>) -> Result<(), ModuleError>;
}

/// Opens modules from paths found during discovery.
pub trait ModuleLoader: Send + Sync {
    /// File extension of candidate modules, without the dot.
    fn file_extension(&self) -> &str {
        std::env::consts::DLL_EXTENSION
    }

    fn open(&self, path: &Path) -> Result<Box<dyn Module>, ModuleError>;
}

// ============================================================================
// Shared libraries
// ============================================================================

/// Loads plugins from shared libraries (`.so`, `.dll`, `.dylib`).
#[derive(Debug, Default, Clone, Copy)]
pub struct DylibLoader;

impl ModuleLoader for DylibLoader {
    fn open(&self, path: &Path) -> Result<Box<dyn Module>, ModuleError> {
        if !path.is_file() {
            return Err(ModuleError::NotFound(path.to_path_buf()));
        }

        debug!("Opening shared library: {}", path.display());
        // SAFETY: loading a library runs its initializers. Plugin files are
        // trusted artifacts placed in the configured search paths.
        let library = unsafe { Library::new(path) }.map_err(|e| ModuleError::LoadFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Ok(Box::new(DylibModule {
            path: path.to_path_buf(),
            library,
        }))
    }
}

struct DylibModule {
    path: PathBuf,
    library: Library,
}

impl DylibModule {
    fn symbol<T: Copy>(&self, name: &str) -> Result<T, ModuleError> {
        // SAFETY: the entry point types are fixed by the plugin contract and
        // `export_plugin!` generates them with exactly these signatures.
        let symbol = unsafe { self.library.get::<T>(name.as_bytes()) }.map_err(|_| {
            ModuleError::SymbolMissing {
                path: self.path.clone(),
                symbol: name.to_string(),
            }
        })?;
        Ok(*symbol)
    }
}

impl Module for DylibModule {
    fn path(&self) -> &Path {
        &self.path
    }

    fn entry_points(&self) -> Result<EntryPoints, ModuleError> {
        let init: InitFn = self.symbol(INIT_SYMBOL)?;
        let start: StartFn = self.symbol(START_SYMBOL)?;
        let stop: StopFn = self.symbol(STOP_SYMBOL)?;
        let deinit: Option<StopFn> = self.symbol(DEINIT_SYMBOL).ok();

        // SAFETY (all closures below): the manager drops entry points before
        // closing the module, so the function pointers stay mapped.
        Ok(EntryPoints {
            init: Box::new(move |ctx: &PluginContext| {
                let raw = unsafe { init(ctx) };
                if raw.is_null() {
                    None
                } else {
                    Some(*unsafe { Box::from_raw(raw) })
                }
            }),
            start: Box::new(move |ctx: &PluginContext| unsafe { start(ctx) }),
            stop: Box::new(move |ctx: &PluginContext| unsafe { stop(ctx) }),
            deinit: deinit.map(|deinit| {
                Box::new(move |ctx: &PluginContext| unsafe { deinit(ctx) })
                    as Box<dyn Fn(&PluginContext) + Send + Sync>
            }),
        })
    }

    fn close(self: Box<Self>) -> Result<(), ModuleError> {
        let DylibModule { path, library } = *self;
        debug!("Closing shared library: {}", path.display());
        library
            .close()
            .map_err(|e| ModuleError::CloseFailed {
                path,
                reason: e.to_string(),
            })
    }
}

// ============================================================================
// Statically linked plugins
// ============================================================================

/// Produces fresh entry points each time the module is opened.
pub type EntryFactory = Arc<dyn Fn() -> EntryPoints + Send + Sync>;

/// Serves plugins compiled into the host, keyed by the file name discovery
/// would find for them (for example `plugin_greeter-0-1-0.so`).
///
/// Clones share the same table, so plugins registered after the loader was
/// handed to a manager are still visible.
#[derive(Clone)]
pub struct StaticModuleLoader {
    modules: Arc<RwLock<HashMap<String, EntryFactory>>>,
    extension: String,
}

impl Default for StaticModuleLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticModuleLoader {
    pub fn new() -> Self {
        Self::with_extension(std::env::consts::DLL_EXTENSION)
    }

    pub fn with_extension(extension: impl Into<String>) -> Self {
        Self {
            modules: Arc::default(),
            extension: extension.into(),
        }
    }

    pub fn register<F>(&self, file_name: impl Into<String>, factory: F)
    where
        F: Fn() -> EntryPoints + Send + Sync + 'static,
    {
        self.modules
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(file_name.into(), Arc::new(factory));
    }

    pub fn register_plugin<P: Plugin>(&self, file_name: impl Into<String>) {
        self.register(file_name, EntryPoints::from_plugin::<P>);
    }
}

impl ModuleLoader for StaticModuleLoader {
    fn file_extension(&self) -> &str {
        &self.extension
    }

    fn open(&self, path: &Path) -> Result<Box<dyn Module>, ModuleError> {
        let factory = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| {
                self.modules
                    .read()
                    .unwrap_or_else(|e| e.into_inner())
                    .get(name)
                    .cloned()
            })
            .ok_or_else(|| ModuleError::NotFound(path.to_path_buf()))?;

        Ok(Box::new(StaticModule {
            path: path.to_path_buf(),
            factory,
        }))
    }
}

struct StaticModule {
    path: PathBuf,
    factory: EntryFactory,
}

impl Module for StaticModule {
    fn path(&self) -> &Path {
        &self.path
    }

    fn entry_points(&self) -> Result<EntryPoints, ModuleError> {
        Ok((self.factory)())
    }

    fn close(self: Box<Self>) -> Result<(), ModuleError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_core::{Host, VersionTriple};

    struct Counter {
        starts: u32,
    }

    impl Plugin for Counter {
        fn init(_ctx: &PluginContext) -> Option<Self> {
            Some(Counter { starts: 0 })
        }

        fn descriptor(&self) -> PluginDescriptor {
            PluginDescriptor::new("counter", VersionTriple::new(1, 0, 0))
        }

        fn start(&mut self, _ctx: &PluginContext) -> bool {
            self.starts += 1;
            self.starts == 1
        }
    }

    #[test]
    fn test_dylib_missing_file() {
        let result = DylibLoader.open(Path::new("/nonexistent/plugin_x-1-0-0.so"));
        assert!(matches!(result, Err(ModuleError::NotFound(_))));
    }

    #[test]
    fn test_dylib_rejects_non_library() {
        let file = tempfile::Builder::new()
            .prefix("plugin_fake-1-0-0")
            .suffix(".so")
            .tempfile()
            .unwrap();
        std::fs::write(file.path(), b"not a library").unwrap();
        assert!(matches!(
            DylibLoader.open(file.path()),
            Err(ModuleError::LoadFailed { .. })
        ));
    }

    #[test]
    fn test_static_loader_lookup() {
        let loader = StaticModuleLoader::new();
        loader.register_plugin::<Counter>("plugin_counter-1-0-0.so");

        assert!(loader.open(Path::new("/plugins/plugin_counter-1-0-0.so")).is_ok());
        assert!(matches!(
            loader.open(Path::new("/plugins/plugin_other-1-0-0.so")),
            Err(ModuleError::NotFound(_))
        ));
    }

    #[test]
    fn test_entry_points_from_plugin() {
        let ctx = PluginContext::new(Host::new("test"), "counter");
        let entry = EntryPoints::from_plugin::<Counter>();

        // Start before init has no instance to run
        assert!(!(entry.start)(&ctx));

        let descriptor = (entry.init)(&ctx).unwrap();
        assert_eq!(descriptor.name, "counter");
        assert!((entry.start)(&ctx));
        assert!(!(entry.start)(&ctx));

        (entry.stop)(&ctx);
        (entry.deinit.as_ref().unwrap())(&ctx);
        assert!(!(entry.start)(&ctx));
    }
}
