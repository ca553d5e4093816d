//! Logger initialization for the server.

use std::{io::IsTerminal, str::FromStr, sync::Once};

use logforth::{append::Stderr, filter::EnvFilter, layout::Layout};

static INIT: Once = Once::new();

/// Stderr layout: `<utc timestamp> <level> <target>: <message>`.
///
/// The target is included because prism's filters are per-crate
/// (`gateway=debug`); a line without it cannot be traced back to the
/// component that logged it.
#[derive(Debug)]
struct StderrLayout {
    color: bool,
}

impl Layout for StderrLayout {
    fn format(
        &self,
        record: &log::Record<'_>,
        _diagnostics: &[Box<dyn logforth::diagnostic::Diagnostic>],
    ) -> anyhow::Result<Vec<u8>> {
        // jiff timestamps render as RFC 3339 in UTC with a Z suffix.
        let timestamp = jiff::Timestamp::now();
        let level = record.level();
        let target = record.target();
        let message = record.args();

        let line = if self.color {
            let paint = level_color(level);
            format!("{timestamp} {paint}{level:>5}\x1b[0m {target}: {message}")
        } else {
            format!("{timestamp} {level:>5} {target}: {message}")
        };

        Ok(line.into_bytes())
    }
}

fn level_color(level: log::Level) -> &'static str {
    match level {
        log::Level::Error => "\x1b[31m",
        log::Level::Warn => "\x1b[33m",
        log::Level::Info => "\x1b[32m",
        log::Level::Debug | log::Level::Trace => "\x1b[90m",
    }
}

/// Initialize the logger.
///
/// The log filter should be a string like "info" or "gateway=debug".
pub(crate) fn init(log_filter: &str) {
    let log_filter = log_filter.to_owned();

    INIT.call_once(move || {
        logforth::builder()
            .dispatch(move |dispatch| {
                let filter = EnvFilter::from_str(&log_filter)
                    .unwrap_or_else(|_| EnvFilter::from_str("info").expect("default filter should be valid"));

                let layout = StderrLayout {
                    color: std::io::stderr().is_terminal(),
                };

                dispatch.filter(filter).append(Stderr::default().with_layout(layout))
            })
            .apply();
    });
}
