/// High-frequency, low-signal syscalls excluded from tracing on Linux.
pub const TRACER_FILTERED_LINUX_CALLS: [&str; 3] = ["wait4", "clock_nanosleep", "nanosleep"];
pub const TRACER_FLAGS: &str = "-s 100 -x -f";
/// Separates the tracer invocation line from the program output.
pub const TRACER_PREAMBLE_MARKER: &str = "\n\n<...>\n";

/// Verbosity of routine per-run messages.
pub const LOG_VERBOSE: u8 = 2;
/// Verbosity of messages that should always be seen.
pub const LOG_IMPORTANT: u8 = 0;

/// How long the native VM keeps draining output after the process is gone.
pub const OUTPUT_DRAIN_GRACE_MS: u64 = 500;

/// Upper bound on building one reproducer.
pub const DEFAULT_COMPILE_TIMEOUT_SECS: u64 = 60;
