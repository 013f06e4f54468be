/// Receives leveled diagnostics from an instance. Lower verbosity means
/// more important.
#[mockall::automock]
pub trait InstanceLogger: std::fmt::Debug + Send + Sync {
    fn log(&self, verbosity: u8, message: &str);
}

#[derive(Debug, Clone, Default)]
pub struct NoopLogger;

impl InstanceLogger for NoopLogger {
    fn log(&self, _verbosity: u8, _message: &str) {}
}

/// Forwards to `tracing`: verbosity 0 is info, 1 is debug, anything higher
/// is trace.
#[derive(Debug, Clone, Default)]
pub struct TracingLogger;

impl InstanceLogger for TracingLogger {
    fn log(&self, verbosity: u8, message: &str) {
        match verbosity {
            0 => tracing::info!("{}", message),
            1 => tracing::debug!("{}", message),
            _ => tracing::trace!("{}", message),
        }
    }
}
