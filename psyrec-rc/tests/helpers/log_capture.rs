//! Log Capture Utilities for Testing
//!
//! A tracing layer recording every event with its level, message and
//! structured fields, so tests can assert on diagnostics.

use std::fmt::Write as _;
use std::sync::{Arc, Mutex};
use tracing::subscriber::DefaultGuard;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;

/// Captured log record
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub level: Level,
    pub message: String,
    /// `name=value` pairs of the non-message fields
    pub fields: String,
}

impl LogRecord {
    /// Message and fields as one searchable line
    pub fn line(&self) -> String {
        format!("{} {}", self.message, self.fields)
    }
}

/// Log capture layer for testing
#[derive(Clone, Default)]
pub struct LogCapture {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl LogCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().unwrap().clone()
    }

    /// Records at exactly this level
    pub fn at_level(&self, level: Level) -> Vec<LogRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.level == level)
            .collect()
    }

    /// Whether a record at this level mentions every pattern
    pub fn has(&self, level: Level, patterns: &[&str]) -> bool {
        self.at_level(level).iter().any(|r| {
            let line = r.line();
            patterns.iter().all(|p| line.contains(p))
        })
    }

    pub fn assert_has(&self, level: Level, patterns: &[&str]) {
        assert!(
            self.has(level, patterns),
            "Expected a {} log mentioning {:?}. All logs:\n{}",
            level,
            patterns,
            self.dump()
        );
    }

    /// Assert no record at this level mentions the pattern
    pub fn assert_none_at(&self, level: Level, pattern: &str) {
        let matches: Vec<String> = self
            .at_level(level)
            .iter()
            .map(LogRecord::line)
            .filter(|line| line.contains(pattern))
            .collect();
        assert!(
            matches.is_empty(),
            "Expected no {} logs mentioning '{}', found:\n{}",
            level,
            pattern,
            matches.join("\n")
        );
    }

    pub fn dump(&self) -> String {
        self.records()
            .iter()
            .map(|r| format!("{} {}", r.level, r.line()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl<S> tracing_subscriber::Layer<S> for LogCapture
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        use tracing::field::Visit;

        #[derive(Default)]
        struct RecordVisitor {
            message: String,
            fields: String,
        }

        impl Visit for RecordVisitor {
            fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
                if field.name() == "message" {
                    self.message = value.to_string();
                } else {
                    let _ = write!(self.fields, "{}={} ", field.name(), value);
                }
            }

            fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
                if field.name() == "message" {
                    self.message = format!("{:?}", value);
                } else {
                    let _ = write!(self.fields, "{}={:?} ", field.name(), value);
                }
            }
        }

        let mut visitor = RecordVisitor::default();
        event.record(&mut visitor);

        self.records.lock().unwrap().push(LogRecord {
            level: *event.metadata().level(),
            message: visitor.message,
            fields: visitor.fields.trim_end().to_string(),
        });
    }
}

/// Capture logs emitted on the current thread until the guard is dropped
///
/// With `#[tokio::test]` (current-thread runtime) this covers everything
/// run on the test task, but not work moved to blocking worker threads.
pub fn capture_logs() -> (LogCapture, DefaultGuard) {
    let capture = LogCapture::new();
    let subscriber = tracing_subscriber::registry().with(capture.clone());
    let guard = tracing::subscriber::set_default(subscriber);
    (capture, guard)
}
