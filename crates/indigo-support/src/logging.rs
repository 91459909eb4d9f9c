use slog::Logger;
use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::Severity;
use sloggers::Build;

/// Builds the process-wide logger. Every long-lived object (bus, adapters,
/// server) is handed a child of this logger rather than reaching for a
/// global, so log lines can be correlated back to the connection or device
/// that produced them.
pub fn init(level: Severity) -> Logger {
    let mut builder = TerminalLoggerBuilder::new();
    builder.level(level);
    builder.destination(Destination::Stderr);
    builder.build().expect("failed to build terminal logger")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_a_logger_without_panicking() {
        let logger = init(Severity::Debug);
        slog::info!(logger, "logger smoke test");
    }
}
