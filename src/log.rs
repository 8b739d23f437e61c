//! Logging interface used by executors, journals and the upgrade engine.

use std::fmt;

/// Destination for the operator-facing messages produced during an upgrade.
///
/// Messages are passed as [fmt::Arguments] so callers write
/// `log.write_information(format_args!("Executing script '{}'", name))`.
pub trait UpgradeLog: Send + Sync {
    fn write_information(&self, message: fmt::Arguments<'_>);

    fn write_warning(&self, message: fmt::Arguments<'_>) {
        self.write_information(message)
    }

    fn write_error(&self, message: fmt::Arguments<'_>);
}

/// Forwards messages to `tracing` events under the `upshift` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLog;

impl UpgradeLog for TracingLog {
    fn write_information(&self, message: fmt::Arguments<'_>) {
        tracing::info!(target: "upshift", "{}", message);
    }

    fn write_warning(&self, message: fmt::Arguments<'_>) {
        tracing::warn!(target: "upshift", "{}", message);
    }

    fn write_error(&self, message: fmt::Arguments<'_>) {
        tracing::error!(target: "upshift", "{}", message);
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLog;

impl UpgradeLog for NoopLog {
    fn write_information(&self, _message: fmt::Arguments<'_>) {}

    fn write_error(&self, _message: fmt::Arguments<'_>) {}
}
