//! Loads the greeter plugin as a real shared library.
//!
//! The library is built into its own target directory so the nested cargo
//! invocation does not wait on the lock held by the outer one. Set
//! `HEARTH_GREETER_LIB` to use a prebuilt library instead.

use hearth_core::{listener, ArgumentList, Host, Value, VersionCriteria, VersionTriple};
use plugin_system::PluginManager;
use std::env;
use std::env::consts::{DLL_EXTENSION, DLL_PREFIX, DLL_SUFFIX};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex, OnceLock};
use tempfile::TempDir;
use tracing_subscriber::fmt::MakeWriter;

const GREETER_VERSION: VersionTriple = VersionTriple::new(0, 1, 0);

// ============================================================================
// Fixture
// ============================================================================

/// Path of the compiled greeter library, built once per test binary.
fn greeter_library() -> &'static Path {
    static LIBRARY: OnceLock<PathBuf> = OnceLock::new();
    LIBRARY.get_or_init(|| {
        if let Some(path) = env::var_os("HEARTH_GREETER_LIB") {
            return PathBuf::from(path);
        }

        // target/<profile>/deps/dylib-<hash>
        let exe = env::current_exe().unwrap();
        let profile_dir = exe.parent().and_then(Path::parent).unwrap();
        let target_dir = profile_dir.parent().unwrap().join("dylib-tests");
        let profile = profile_dir.file_name().unwrap().to_str().unwrap().to_string();
        let cargo_profile = if profile == "debug" { "dev" } else { profile.as_str() };

        let cargo = env::var("CARGO").unwrap_or_else(|_| "cargo".to_string());
        let status = Command::new(cargo)
            .args(["build", "-p", "plugin_greeter", "--profile", cargo_profile, "--target-dir"])
            .arg(&target_dir)
            .current_dir(env!("CARGO_MANIFEST_DIR"))
            .status()
            .unwrap();
        assert!(status.success(), "building plugin_greeter failed");

        target_dir
            .join(&profile)
            .join(format!("{DLL_PREFIX}plugin_greeter{DLL_SUFFIX}"))
    })
}

/// A search path holding the greeter under its versioned file name.
fn install_greeter() -> TempDir {
    let dir = TempDir::new().unwrap();
    let file_name = format!("plugin_greeter-0-1-0.{DLL_EXTENSION}");
    std::fs::copy(greeter_library(), dir.path().join(file_name)).unwrap();
    dir
}

/// Collects formatted log output in memory.
#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl Capture {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for Capture {
    type Writer = Capture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn call_greet(host: &Host, name: &str) -> Value {
    let greet = host
        .services()
        .get_checked("greeter.greet", "int32", &["char*"])
        .unwrap();
    greet.call(&ArgumentList::new().with(name)).unwrap()
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn test_greeter_library_lifecycle() {
    let dir = install_greeter();
    let host = Host::new("dylib");
    let manager = PluginManager::with_dylib_loader(host.clone(), vec![dir.path().to_path_buf()]);

    let candidates = manager.discover();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].name, "greeter");

    manager
        .load("greeter", GREETER_VERSION, VersionCriteria::Exact)
        .unwrap();
    manager.start("greeter").unwrap();
    let info = manager.plugin_info("greeter").unwrap();
    assert_eq!(info.version, GREETER_VERSION);
    assert!(info.started);

    let greeted = Arc::new(Mutex::new(Vec::new()));
    let sink = greeted.clone();
    host.events()
        .register_listener(
            "observer",
            "greeter.greeted",
            &["char*"],
            listener(move |_, args| {
                sink.lock().unwrap().push(args[0].as_str().unwrap_or_default().to_string());
            }),
        )
        .unwrap();

    assert!(matches!(call_greet(&host, "ada"), Value::Int32(1)));
    assert!(matches!(call_greet(&host, "grace"), Value::Int32(2)));
    assert_eq!(*greeted.lock().unwrap(), vec!["ada", "grace"]);

    manager.unload("greeter").unwrap();
    assert!(!host.events().contains("greeter.greeted"));
    assert!(!host.services().contains("greeter.greet"));

    // A fresh instance after reloading
    manager
        .load("greeter", GREETER_VERSION, VersionCriteria::Minimum)
        .unwrap();
    manager.start("greeter").unwrap();
    assert!(matches!(call_greet(&host, "ada"), Value::Int32(1)));
    manager.unload_all();
    assert!(manager.is_empty());
}

#[test]
fn test_greeter_logs_reach_host_subscriber() {
    let dir = install_greeter();
    let capture = Capture::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(capture.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::TRACE)
        .finish();

    let forwarded = tracing::subscriber::with_default(subscriber, || {
        let host = Host::new("dylib");
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = lines.clone();
        host.events()
            .register_listener(
                "observer",
                "host.log",
                &["uint8", "char*", "char*"],
                listener(move |_, args| {
                    sink.lock().unwrap().push(args[2].as_str().unwrap_or_default().to_string());
                }),
            )
            .unwrap();

        let manager = PluginManager::with_dylib_loader(host.clone(), vec![dir.path().to_path_buf()]);
        manager
            .load("greeter", GREETER_VERSION, VersionCriteria::Exact)
            .unwrap();
        manager.start("greeter").unwrap();
        call_greet(&host, "ada");
        manager.unload("greeter").unwrap();

        let lines = lines.lock().unwrap().clone();
        lines
    });

    assert!(forwarded.iter().any(|l| l == "Greeter ready"));
    let output = capture.text();
    for expected in ["Greeter ready", "Hello, ada!", "Greeter stopping after 1 greetings"] {
        assert!(output.contains(expected), "{expected:?} missing from log output:\n{output}");
    }
    assert!(output.contains("greeter"));
}
