//! Greeter plugin.
//!
//! Owns the `greeter.greeted(char*)` event and the `greeter.greet` service,
//! `int32(char*)`, which greets a name, fires `greeter.greeted` and returns
//! the number of greetings so far.
//!
//! Deploy as `plugin_greeter-0-1-0.<ext>` in a plugin search path.

use hearth_core::{
    export_plugin, service_fn, ArgumentList, LogLevel, Plugin, PluginContext, PluginDescriptor,
    PluginLanguage, Value, VersionTriple,
};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

pub const NAME: &str = "greeter";
pub const VERSION: VersionTriple = VersionTriple::new(0, 1, 0);

pub struct Greeter {
    greetings: Arc<AtomicI32>,
}

impl Plugin for Greeter {
    fn init(ctx: &PluginContext) -> Option<Self> {
        ctx.create_event("greeted", &["char*"]).ok()?;

        let greetings = Arc::new(AtomicI32::new(0));
        let counter = greetings.clone();
        let weak = ctx.downgrade();
        ctx.create_service(
            "greet",
            "int32",
            &["char*"],
            service_fn(move |args| {
                let name = args.get(0).and_then(Value::as_str).unwrap_or("stranger");
                let count = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some(ctx) = weak.upgrade() {
                    greet(&ctx, name);
                }
                Value::Int32(count)
            }),
        )
        .ok()?;

        Some(Greeter { greetings })
    }

    fn descriptor(&self) -> PluginDescriptor {
        PluginDescriptor::new(NAME, VERSION)
            .with_category("demo")
            .with_author("Hearth Team")
            .with_description("Greets whoever asks and announces it")
            .with_language(PluginLanguage::Rust)
    }

    fn start(&mut self, ctx: &PluginContext) -> bool {
        ctx.log(LogLevel::Info, "Greeter ready");
        true
    }

    fn stop(&mut self, ctx: &PluginContext) {
        let count = self.greetings.load(Ordering::SeqCst);
        ctx.log(LogLevel::Info, &format!("Greeter stopping after {count} greetings"));
    }
}

fn greet(ctx: &PluginContext, name: &str) {
    ctx.log(LogLevel::User, &format!("Hello, {name}!"));
    if let Err(e) = ctx.fire("greeter.greeted", &ArgumentList::new().with(name)) {
        ctx.log(LogLevel::Warning, &format!("Could not announce greeting: {e}"));
    }
}

export_plugin!(Greeter);

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_core::{listener, Host};
    use std::sync::Mutex;

    #[test]
    fn test_greet_fires_event_and_counts() {
        let host = Host::new("test");
        let ctx = PluginContext::new(host.clone(), NAME);
        let greeter = Greeter::init(&ctx).unwrap();
        assert_eq!(greeter.descriptor().version, VERSION);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        host.events()
            .register_listener(
                "observer",
                "greeter.greeted",
                &["char*"],
                listener(move |_, args| {
                    sink.lock().unwrap().push(args[0].as_str().unwrap().to_string());
                }),
            )
            .unwrap();

        let greet = host
            .services()
            .get_checked("greeter.greet", "int32", &["char*"])
            .unwrap();
        let args = greet.create_argument_list_from_strings(&["ada"]).unwrap();
        assert!(matches!(greet.call(&args), Ok(Value::Int32(1))));
        assert!(matches!(greet.call(&args), Ok(Value::Int32(2))));

        assert_eq!(*seen.lock().unwrap(), vec!["ada", "ada"]);
    }

    #[test]
    fn test_init_fails_when_event_exists() {
        let host = Host::new("test");
        host.events().create(NAME, "greeted", &["char*"]).unwrap();
        assert!(Greeter::init(&PluginContext::new(host, NAME)).is_none());
    }
}
