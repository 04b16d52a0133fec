//! Logger plugin.
//!
//! Watches the host and the greeter: counts every `host.log` line, reports
//! greetings and newly created services, and greets itself through
//! `greeter.greet` when it starts. The line count is published as the
//! `logger.lines` service, `uint32()`.
//!
//! Deploy as `plugin_logger-0-1-0.<ext>` in a plugin search path.

use hearth_core::{
    export_plugin, listener, service_fn, LogLevel, Plugin, PluginContext, PluginDescriptor, Value,
    VersionTriple,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

pub const NAME: &str = "logger";
pub const VERSION: VersionTriple = VersionTriple::new(0, 1, 0);

pub struct Logger {
    lines: Arc<AtomicU32>,
    ticks: Arc<AtomicU32>,
}

impl Plugin for Logger {
    fn init(ctx: &PluginContext) -> Option<Self> {
        let lines = Arc::new(AtomicU32::new(0));
        let counter = lines.clone();
        ctx.create_service(
            "lines",
            "uint32",
            &[],
            service_fn(move |_| Value::UInt32(counter.load(Ordering::SeqCst))),
        )
        .ok()?;

        Some(Logger {
            lines,
            ticks: Arc::new(AtomicU32::new(0)),
        })
    }

    fn descriptor(&self) -> PluginDescriptor {
        PluginDescriptor::new(NAME, VERSION)
            .with_category("demo")
            .with_author("Hearth Team")
            .with_description("Logs what other plugins do")
    }

    fn start(&mut self, ctx: &PluginContext) -> bool {
        let lines = self.lines.clone();
        if let Err(e) = ctx.listen(
            "host.log",
            &["uint8", "char*", "char*"],
            listener(move |_, _| {
                lines.fetch_add(1, Ordering::SeqCst);
            }),
        ) {
            ctx.log(LogLevel::Error, &format!("Cannot watch host.log: {e}"));
            return false;
        }

        let ticks = self.ticks.clone();
        if let Err(e) = ctx.listen(
            "host.tick",
            &[],
            listener(move |_, _| {
                ticks.fetch_add(1, Ordering::SeqCst);
            }),
        ) {
            ctx.log(LogLevel::Warning, &format!("Cannot watch host.tick: {e}"));
        }

        let reporter = ctx.clone();
        if let Err(e) = ctx.listen(
            "host.service_created",
            &["char*"],
            listener(move |_, args| {
                if let Some(service) = args[0].as_str() {
                    reporter.log(LogLevel::Info, &format!("Service created: {service}"));
                }
            }),
        ) {
            ctx.log(LogLevel::Warning, &format!("Cannot watch service creation: {e}"));
        }

        // The greeter is optional
        let reporter = ctx.clone();
        match ctx.listen(
            "greeter.greeted",
            &["char*"],
            listener(move |_, args| {
                if let Some(name) = args[0].as_str() {
                    reporter.log(LogLevel::Info, &format!("Greeter greeted {name}"));
                }
            }),
        ) {
            Ok(()) => greet_self(ctx),
            Err(e) => ctx.log(LogLevel::Warning, &format!("Greeter not available: {e}")),
        }

        true
    }

    fn stop(&mut self, ctx: &PluginContext) {
        ctx.log(
            LogLevel::Info,
            &format!(
                "Logger stopping: {} log lines over {} ticks",
                self.lines.load(Ordering::SeqCst),
                self.ticks.load(Ordering::SeqCst)
            ),
        );
    }
}

fn greet_self(ctx: &PluginContext) {
    let greet = match ctx.service("greeter.greet", "int32", &["char*"]) {
        Ok(greet) => greet,
        Err(e) => {
            ctx.log(LogLevel::Warning, &format!("greeter.greet unusable: {e}"));
            return;
        }
    };

    let result = greet
        .create_argument_list_from_strings(&[NAME])
        .and_then(|args| {
            let value = ctx.call(&greet, &args);
            greet.destroy_argument_list(args);
            value
        });
    match result {
        Ok(Value::Int32(count)) => ctx.log(LogLevel::Info, &format!("Greeted, greeting #{count}")),
        Ok(other) => ctx.log(LogLevel::Warning, &format!("Unexpected greeting result {other:?}")),
        Err(e) => ctx.log(LogLevel::Warning, &format!("Greeting failed: {e}")),
    }
}

export_plugin!(Logger);

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_core::{ArgumentList, Host};
    use std::sync::Mutex;

    /// Stands in for the greeter plugin, recording who was greeted.
    fn fake_greeter(host: &Arc<Host>) -> Arc<Mutex<Vec<String>>> {
        let greeter = PluginContext::new(host.clone(), "greeter");
        greeter.create_event("greeted", &["char*"]).unwrap();
        let greeted = Arc::new(Mutex::new(Vec::new()));
        let sink = greeted.clone();
        greeter
            .create_service(
                "greet",
                "int32",
                &["char*"],
                service_fn(move |args| {
                    let mut names = sink.lock().unwrap();
                    names.push(args.get(0).and_then(Value::as_str).unwrap_or_default().to_string());
                    Value::Int32(names.len() as i32)
                }),
            )
            .unwrap();
        greeted
    }

    #[test]
    fn test_start_greets_through_greeter() {
        let host = Host::new("test");
        let greeted = fake_greeter(&host);
        let ctx = PluginContext::new(host.clone(), NAME);

        let mut logger = Logger::init(&ctx).unwrap();
        assert!(logger.start(&ctx));

        assert_eq!(*greeted.lock().unwrap(), vec!["logger"]);
        assert_eq!(host.events().subscriptions_of(NAME).len(), 4);
    }

    #[test]
    fn test_counts_log_lines_and_ticks() {
        let host = Host::new("test");
        let ctx = PluginContext::new(host.clone(), NAME);
        let mut logger = Logger::init(&ctx).unwrap();

        // Starts without a greeter
        assert!(logger.start(&ctx));
        let before = logger.lines.load(Ordering::SeqCst);

        host.log(LogLevel::Info, "other", "one");
        host.log(LogLevel::Warning, "other", "two");
        host.start();
        host.tick();
        host.tick();

        let lines = host.services().get("logger.lines").unwrap();
        assert!(matches!(
            lines.call(&ArgumentList::new()),
            Ok(Value::UInt32(n)) if n == before + 2
        ));
        assert_eq!(logger.ticks.load(Ordering::SeqCst), 2);
    }
}
