//! Logging sink selection (§6: five severities, `{stderr, syslog, user
//! callback}` sinks, any combination permitted) layered over `tracing`,
//! adapted from the teacher's single JSON-to-stderr `FileWriter` sink
//! (`bindings::logging`) to the spec's three-sink set.

use crate::config::{LogConfig, LogLevel};
use std::ffi::CString;
use std::sync::{Arc, Mutex};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// A caller-supplied sink: `(level, message)` for every event that passes
/// the configured filter. Boxed so `init` can accept any closure.
pub type UserCallback = Arc<dyn Fn(LogLevel, &str) + Send + Sync>;

fn level_filter(level: LogLevel) -> LevelFilter {
    match level {
        LogLevel::None => LevelFilter::OFF,
        LogLevel::Error => LevelFilter::ERROR,
        LogLevel::Warning => LevelFilter::WARN,
        LogLevel::Info => LevelFilter::INFO,
        LogLevel::Debug => LevelFilter::DEBUG,
    }
}

/// Installs a global `tracing` subscriber built from `config`'s selected
/// sinks. Idempotent: a second call is a no-op (mirrors the teacher's
/// `setup_env_tracing`'s `std::sync::Once` guard), since only one global
/// default subscriber can be installed per process.
pub fn init(config: &LogConfig, user_callback: Option<UserCallback>) {
    static ONCE: std::sync::Once = std::sync::Once::new();
    ONCE.call_once(|| {
        let filter = EnvFilter::builder()
            .with_default_directive(level_filter(config.level).into())
            .from_env_lossy();

        let registry = tracing_subscriber::registry().with(filter);

        let stderr_layer = config
            .stderr
            .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_target(false));

        let syslog_layer = config.syslog.then(SyslogLayer::new);

        let callback_layer = user_callback.map(CallbackLayer::new);

        registry.with(stderr_layer).with(syslog_layer).with(callback_layer).init();
    });
}

/// Writes each event's formatted message to `syslog(3)` via a thin `libc`
/// wrapper, per §6's `syslog` sink.
struct SyslogLayer {
    opened: Mutex<bool>,
}

impl SyslogLayer {
    fn new() -> SyslogLayer {
        SyslogLayer {
            opened: Mutex::new(false),
        }
    }

    fn ensure_open(&self) {
        let mut opened = self.opened.lock().unwrap();
        if !*opened {
            let ident = CString::new(env!("CARGO_PKG_NAME")).unwrap();
            unsafe {
                // `ident` is intentionally leaked: `openlog` retains the
                // pointer for the process lifetime.
                libc::openlog(ident.into_raw(), libc::LOG_PID, libc::LOG_DAEMON);
            }
            *opened = true;
        }
    }
}

impl<S> Layer<S> for SyslogLayer
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        self.ensure_open();
        let mut message = String::new();
        let mut visitor = MessageVisitor(&mut message);
        event.record(&mut visitor);
        let priority = match *event.metadata().level() {
            tracing::Level::ERROR => libc::LOG_ERR,
            tracing::Level::WARN => libc::LOG_WARNING,
            tracing::Level::INFO => libc::LOG_INFO,
            _ => libc::LOG_DEBUG,
        };
        if let Ok(c_message) = CString::new(message) {
            unsafe {
                libc::syslog(priority, c_message.as_ptr());
            }
        }
    }
}

/// Forwards each event's formatted message to a caller-supplied callback,
/// per §6's "user callback" sink.
struct CallbackLayer {
    callback: UserCallback,
}

impl CallbackLayer {
    fn new(callback: UserCallback) -> CallbackLayer {
        CallbackLayer { callback }
    }
}

impl<S> Layer<S> for CallbackLayer
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let mut message = String::new();
        let mut visitor = MessageVisitor(&mut message);
        event.record(&mut visitor);
        let level = match *event.metadata().level() {
            tracing::Level::ERROR => LogLevel::Error,
            tracing::Level::WARN => LogLevel::Warning,
            tracing::Level::INFO => LogLevel::Info,
            _ => LogLevel::Debug,
        };
        (self.callback)(level, &message);
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl tracing::field::Visit for MessageVisitor<'_> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{value:?}"));
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_level_filter_mapping() {
        assert_eq!(level_filter(LogLevel::None), LevelFilter::OFF);
        assert_eq!(level_filter(LogLevel::Debug), LevelFilter::DEBUG);
    }

    #[test]
    fn test_callback_layer_receives_formatted_events() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let layer = CallbackLayer::new(Arc::new(move |_level, _msg| {
            calls2.fetch_add(1, Ordering::SeqCst);
        }));
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::error!("test event");
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
