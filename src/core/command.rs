use itertools::Itertools;

use crate::constants::{TRACER_FILTERED_LINUX_CALLS, TRACER_FLAGS, TRACER_PREAMBLE_MARKER};
use crate::core::domain::{CompileOptions, Os};

/// Command line of the harness that replays a serialized program.
#[derive(Debug, Clone)]
pub struct ExecprogCmd<'a> {
    pub execprog: &'a str,
    pub executor: &'a str,
    pub os: Os,
    pub arch: &'a str,
    pub vm_type: &'a str,
    pub opts: &'a CompileOptions,
    /// Flags older harness binaries do not understand.
    pub optional_flags: bool,
    pub slowdown: u32,
    pub prog_file: &'a str,
}

impl ExecprogCmd<'_> {
    pub fn build(&self) -> String {
        let opts = self.opts;
        let repeat_count = if opts.repeat { 0 } else { 1 };

        let mut flags = vec![
            format!("-executor={}", self.executor),
            format!("-sandbox={}", opts.sandbox),
        ];
        if self.optional_flags {
            flags.push(format!("-sandbox_arg={}", opts.sandbox_arg));
        }
        flags.push(format!("-procs={}", opts.procs));
        flags.push(format!("-repeat={}", repeat_count));
        flags.push(format!("-threaded={}", opts.threaded));
        if !self.optional_flags {
            flags.push(format!("-collide={}", opts.collide));
        }
        flags.push("-cover=0".to_string());
        if let Some(fault) = opts.fault.filter(|f| f.call >= 0) {
            flags.push(format!("-fault_call={}", fault.call));
            flags.push(format!("-fault_nth={}", fault.nth));
        }

        format!(
            "{} {} -os={} -arch={} -type={} -timeout_scale={} {}",
            self.execprog,
            flags.join(" "),
            self.os,
            self.arch,
            self.vm_type,
            self.slowdown,
            self.prog_file
        )
    }
}

/// Prefixes `command` with a syscall tracer. On Linux the noisiest calls
/// are dropped inside the VM so they do not fill the console buffer.
pub fn wrap_with_tracer(tracer: &str, os: Os, command: &str) -> String {
    let filter = if os.is_linux_family() {
        format!(" -e \\!{}", TRACER_FILTERED_LINUX_CALLS.iter().join(","))
    } else {
        String::new()
    };
    format!("{}{} {} {}", tracer, filter, TRACER_FLAGS, command)
}

/// Header prepended to the output of a traced run.
pub fn tracer_preamble(wrapped_command: &str) -> Vec<u8> {
    format!("{}{}", wrapped_command, TRACER_PREAMBLE_MARKER).into_bytes()
}
